//! Per-model table configuration and CTAS rendering.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use dbathena_core::{ConfigError, Relation};

use crate::config::{join_s3_path, ConnectionProfile};
use crate::partition::quote_literal;

/// Storage formats Athena can write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileFormat {
    Orc,
    #[default]
    Parquet,
    Avro,
    Json,
    Textfile,
}

impl FileFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            FileFormat::Orc => "ORC",
            FileFormat::Parquet => "PARQUET",
            FileFormat::Avro => "AVRO",
            FileFormat::Json => "JSON",
            FileFormat::Textfile => "TEXTFILE",
        }
    }
}

impl fmt::Display for FileFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ORC" => Ok(FileFormat::Orc),
            "PARQUET" => Ok(FileFormat::Parquet),
            "AVRO" => Ok(FileFormat::Avro),
            "JSON" => Ok(FileFormat::Json),
            "TEXTFILE" => Ok(FileFormat::Textfile),
            other => Err(ConfigError::invalid(
                "format",
                format!("'{other}' is not one of ORC, PARQUET, AVRO, JSON, TEXTFILE"),
            )),
        }
    }
}

impl<'de> Deserialize<'de> for FileFormat {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// How a model's table is laid out in storage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Where the table data lives; derived under the data dir when unset.
    #[serde(default)]
    pub external_location: Option<String>,
    #[serde(default)]
    pub partitioned_by: Vec<String>,
    #[serde(default)]
    pub bucketed_by: Vec<String>,
    #[serde(default)]
    pub bucket_count: Option<u32>,
    #[serde(default)]
    pub format: FileFormat,
    #[serde(default)]
    pub write_compression: Option<String>,
    /// Only meaningful for TEXTFILE.
    #[serde(default)]
    pub field_delimiter: Option<String>,
}

impl TableConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Unpartitioned PARQUET table at a fixed location, used for staging.
    pub fn staging(location: impl Into<String>) -> Self {
        Self {
            external_location: Some(location.into()),
            ..Self::default()
        }
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partitioned_by.is_empty()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match (self.bucketed_by.is_empty(), self.bucket_count) {
            (true, Some(_)) => {
                return Err(ConfigError::invalid("bucket_count", "set without bucketed_by"));
            }
            (false, None) => {
                return Err(ConfigError::invalid("bucketed_by", "set without bucket_count"));
            }
            (false, Some(0)) => {
                return Err(ConfigError::invalid("bucket_count", "must be positive"));
            }
            _ => {}
        }

        if let Some(col) = self
            .bucketed_by
            .iter()
            .find(|c| self.partitioned_by.contains(c))
        {
            return Err(ConfigError::invalid(
                "bucketed_by",
                format!("'{col}' is also a partition column"),
            ));
        }

        if self.field_delimiter.is_some() && self.format != FileFormat::Textfile {
            return Err(ConfigError::invalid(
                "field_delimiter",
                format!("only valid with format TEXTFILE, not {}", self.format),
            ));
        }

        if let Some(loc) = &self.external_location {
            if !loc.starts_with("s3://") {
                return Err(ConfigError::invalid(
                    "external_location",
                    format!("expected an s3:// URI, got '{loc}'"),
                ));
            }
        }

        Ok(())
    }

    /// The table's storage location: the configured one, or a fresh path
    /// `{data_dir}/tables/{uuid}`.
    pub fn resolve_location(&self, profile: &ConnectionProfile) -> String {
        match &self.external_location {
            Some(loc) => loc.clone(),
            None => join_s3_path(profile.data_dir(), &format!("tables/{}", Uuid::new_v4())),
        }
    }

    /// `WITH (...)` properties for a CTAS statement.
    pub fn with_properties(&self, location: &str) -> Vec<String> {
        let mut props = vec![
            format!("external_location={}", quote_literal(location)),
            format!("format={}", quote_literal(self.format.as_str())),
        ];
        if self.is_partitioned() {
            props.push(format!("partitioned_by=ARRAY[{}]", quote_list(&self.partitioned_by)));
        }
        if let Some(count) = self.bucket_count {
            props.push(format!("bucketed_by=ARRAY[{}]", quote_list(&self.bucketed_by)));
            props.push(format!("bucket_count={count}"));
        }
        if let Some(compression) = &self.write_compression {
            props.push(format!("write_compression={}", quote_literal(compression)));
        }
        if let Some(delimiter) = &self.field_delimiter {
            props.push(format!("field_delimiter={}", quote_literal(delimiter)));
        }
        props
    }

    /// Render `CREATE TABLE relation WITH (...) AS sql`.
    pub fn ctas_sql(&self, relation: &Relation, sql: &str, location: &str) -> Result<String, ConfigError> {
        self.validate()?;
        Ok(format!(
            "CREATE TABLE {relation}\nWITH (\n  {}\n)\nAS\n{}",
            self.with_properties(location).join(",\n  "),
            sql.trim().trim_end_matches(';')
        ))
    }
}

fn quote_list(items: &[String]) -> String {
    items
        .iter()
        .map(|s| quote_literal(s))
        .collect::<Vec<_>>()
        .join(", ")
}
