use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A fully qualified table name: `database.schema.identifier`.
///
/// Rendered unquoted. Names that need quoting must be escaped where the
/// source is declared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relation {
    pub database: String,
    pub schema: String,
    pub identifier: String,
}

impl Relation {
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            identifier: identifier.into(),
        }
    }

    /// Parse `database.schema.identifier` or `schema.identifier`.
    ///
    /// The two-part form takes `default_database` for the catalog.
    pub fn parse(name: &str, default_database: &str) -> Result<Self, ConfigError> {
        let parts: Vec<&str> = name.split('.').collect();
        if parts.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::invalid("relation", format!("empty name part in '{name}'")));
        }
        match parts.as_slice() {
            [schema, identifier] => Ok(Self::new(default_database, *schema, *identifier)),
            [database, schema, identifier] => Ok(Self::new(*database, *schema, *identifier)),
            _ => Err(ConfigError::invalid(
                "relation",
                format!("expected schema.table or database.schema.table, got '{name}'"),
            )),
        }
    }

    /// Same database and schema, different table name.
    pub fn with_identifier(&self, identifier: impl Into<String>) -> Self {
        Self {
            database: self.database.clone(),
            schema: self.schema.clone(),
            identifier: identifier.into(),
        }
    }

    /// `schema.identifier`, the form Hive DDL statements accept.
    pub fn ddl_name(&self) -> String {
        format!("{}.{}", self.schema, self.identifier)
    }

    /// The engine's partition metadata table for this relation.
    ///
    /// The `$` suffix forces quoting here, the only place names are quoted.
    pub fn partitions_table(&self) -> String {
        format!(
            "\"{}\".\"{}\".\"{}$partitions\"",
            self.database, self.schema, self.identifier
        )
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.identifier)
    }
}
