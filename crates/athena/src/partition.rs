//! Partition identities and how they render into SQL and storage paths.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Hive's stand-in for a NULL partition value.
pub const HIVE_DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Values of one partition, ordered as in `partitioned_by`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionValues(Vec<(String, Option<String>)>);

impl PartitionValues {
    pub fn new(pairs: Vec<(String, Option<String>)>) -> Self {
        Self(pairs)
    }

    /// Zip partition columns with one row of values.
    pub fn from_row(columns: &[String], values: Vec<Option<String>>) -> Self {
        Self(columns.iter().cloned().zip(values).collect())
    }

    pub fn pairs(&self) -> &[(String, Option<String>)] {
        &self.0
    }

    /// `PARTITION (...)` body for Hive DDL: `(dt='2024-01-01', region='eu')`.
    pub fn spec_sql(&self) -> String {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(col, val)| {
                let v = val.as_deref().unwrap_or(HIVE_DEFAULT_PARTITION);
                format!("{col}={}", quote_literal(v))
            })
            .collect();
        format!("({})", parts.join(", "))
    }

    /// Row predicate selecting this partition's rows.
    ///
    /// Compares as varchar so the same text works for any partition type.
    pub fn predicate_sql(&self) -> String {
        if self.0.is_empty() {
            return "TRUE".to_string();
        }
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(col, val)| match val {
                Some(v) => format!("CAST({col} AS varchar) = {}", quote_literal(v)),
                None => format!("{col} IS NULL"),
            })
            .collect();
        parts.join(" AND ")
    }

    /// Hive-style relative path: `dt=2024-01-01/region=eu`.
    pub fn path(&self) -> String {
        self.0
            .iter()
            .map(|(col, val)| {
                let v = val.as_deref().unwrap_or(HIVE_DEFAULT_PARTITION);
                format!("{}={}", escape_path_name(col), escape_path_name(v))
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for PartitionValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Single-quoted SQL string literal with embedded quotes doubled.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Percent-escape the characters Hive escapes in partition directory names.
pub fn escape_path_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let needs_escape = c.is_control()
            || matches!(
                c,
                '"' | '#' | '%' | '\'' | '*' | '/' | ':' | '=' | '?' | '\\' | '{' | '[' | ']' | '^'
            );
        if needs_escape {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{b:02X}"));
            }
        } else {
            out.push(c);
        }
    }
    out
}
