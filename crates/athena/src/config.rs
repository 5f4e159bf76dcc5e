use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use dbathena_core::config::{active_profile, profiled_env_first, profiled_env_opt, profiled_env_parse};
use dbathena_core::ConfigError;

/// Seconds between status checks when the profile does not say.
pub const DEFAULT_POLL_INTERVAL: u64 = 1;

/// Failed attempts retried when the profile does not say.
pub const DEFAULT_NUM_RETRIES: u32 = 5;

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL
}

fn default_num_retries() -> u32 {
    DEFAULT_NUM_RETRIES
}

// ── ConnectionProfile ────────────────────────────────────────────

/// Connection settings for an Athena target.
///
/// Built once from a YAML profile or from environment variables and not
/// changed afterwards. `catalog` is accepted as an alias of `database`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// S3 prefix where the engine writes results and metadata.
    pub s3_staging_dir: String,
    pub region_name: String,
    /// Catalog database the queries run in. Should be lowercase.
    pub schema: String,
    /// Data catalog. Should be lowercase.
    #[serde(alias = "catalog")]
    pub database: String,
    /// Seconds between query status checks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default)]
    pub aws_profile_name: Option<String>,
    #[serde(default)]
    pub work_group: Option<String>,
    /// Retries after the first failed attempt.
    #[serde(default = "default_num_retries")]
    pub num_retries: u32,
    /// Cancel a query that runs longer than this many seconds.
    #[serde(default)]
    pub query_timeout: Option<u64>,
    /// Root for default table locations; falls back to `s3_staging_dir`.
    #[serde(default)]
    pub s3_data_dir: Option<String>,
}

impl ConnectionProfile {
    /// Minimal profile with defaults for every optional key.
    pub fn new(
        s3_staging_dir: impl Into<String>,
        region_name: impl Into<String>,
        schema: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            s3_staging_dir: s3_staging_dir.into(),
            region_name: region_name.into(),
            schema: schema.into(),
            database: database.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            aws_profile_name: None,
            work_group: None,
            num_retries: DEFAULT_NUM_RETRIES,
            query_timeout: None,
            s3_data_dir: None,
        }
    }

    /// Parse a flat YAML profile (the keys of one dbt output block).
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let profile: Self =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&text)
    }

    /// Pick one output out of a dbt `profiles.yml` document.
    ///
    /// `target` defaults to the profile's own `target` key.
    pub fn from_profiles_yml(
        yaml: &str,
        profile_name: &str,
        target: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let doc: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let entry = doc
            .get(profile_name)
            .ok_or_else(|| ConfigError::invalid("profile", format!("no profile named '{profile_name}'")))?;

        let target = match target {
            Some(t) => t.to_string(),
            None => entry
                .get("target")
                .and_then(|t| t.as_str())
                .map(|t| t.to_string())
                .ok_or(ConfigError::Missing("target"))?,
        };

        let output = entry
            .get("outputs")
            .and_then(|o| o.get(target.as_str()))
            .ok_or_else(|| ConfigError::invalid("target", format!("no output named '{target}'")))?;

        if let Some(kind) = output.get("type").and_then(|t| t.as_str()) {
            if kind != "athena" {
                return Err(ConfigError::invalid("type", format!("expected 'athena', got '{kind}'")));
            }
        }

        let profile: Self = serde_yaml::from_value(output.clone())
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        profile.validate()?;
        Ok(profile)
    }

    /// Build from environment variables using the active profile prefix.
    ///
    /// Reads `DBATHENA_PROFILE` to determine the prefix; see
    /// [`from_env_profiled`](Self::from_env_profiled) for the keys.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_profiled(&active_profile())
    }

    /// Build from `ATHENA_*` env vars, each tried as `{PROFILE}_ATHENA_*` first.
    ///
    /// `ATHENA_REGION_NAME` falls back to `AWS_REGION`, `ATHENA_DATABASE`
    /// falls back to `ATHENA_CATALOG`.
    pub fn from_env_profiled(profile: &str) -> Result<Self, ConfigError> {
        let s3_staging_dir = profiled_env_opt(profile, "ATHENA_S3_STAGING_DIR")
            .ok_or(ConfigError::Missing("s3_staging_dir"))?;
        let region_name = profiled_env_first(profile, &["ATHENA_REGION_NAME", "AWS_REGION"])
            .ok_or(ConfigError::Missing("region_name"))?;
        let schema =
            profiled_env_opt(profile, "ATHENA_SCHEMA").ok_or(ConfigError::Missing("schema"))?;
        let database = profiled_env_first(profile, &["ATHENA_DATABASE", "ATHENA_CATALOG"])
            .ok_or(ConfigError::Missing("database"))?;

        let cfg = Self {
            s3_staging_dir,
            region_name,
            schema,
            database,
            poll_interval: profiled_env_parse(profile, "ATHENA_POLL_INTERVAL")
                .unwrap_or(DEFAULT_POLL_INTERVAL),
            aws_profile_name: profiled_env_opt(profile, "ATHENA_AWS_PROFILE_NAME"),
            work_group: profiled_env_opt(profile, "ATHENA_WORK_GROUP"),
            num_retries: profiled_env_parse(profile, "ATHENA_NUM_RETRIES")
                .unwrap_or(DEFAULT_NUM_RETRIES),
            query_timeout: profiled_env_parse(profile, "ATHENA_QUERY_TIMEOUT"),
            s3_data_dir: profiled_env_opt(profile, "ATHENA_S3_DATA_DIR"),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Check required keys and value shapes.
    ///
    /// Mixed-case `schema`/`database` values are passed through with a
    /// warning; the engine decides what to do with them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("s3_staging_dir", &self.s3_staging_dir),
            ("region_name", &self.region_name),
            ("schema", &self.schema),
            ("database", &self.database),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(key, "must not be empty"));
            }
        }

        if !self.s3_staging_dir.starts_with("s3://") {
            return Err(ConfigError::invalid(
                "s3_staging_dir",
                format!("expected an s3:// URI, got '{}'", self.s3_staging_dir),
            ));
        }
        if let Some(dir) = &self.s3_data_dir {
            if !dir.starts_with("s3://") {
                return Err(ConfigError::invalid(
                    "s3_data_dir",
                    format!("expected an s3:// URI, got '{dir}'"),
                ));
            }
        }
        if self.poll_interval == 0 {
            return Err(ConfigError::invalid("poll_interval", "must be at least 1 second"));
        }
        if self.query_timeout == Some(0) {
            return Err(ConfigError::invalid("query_timeout", "must be at least 1 second"));
        }

        for (key, value) in [("schema", &self.schema), ("database", &self.database)] {
            if value.chars().any(|c| c.is_uppercase()) {
                warn!(key, value = %value, "Athena expects lowercase names; passing through unchanged");
            }
        }

        Ok(())
    }

    pub fn poll_interval_duration(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn query_timeout_duration(&self) -> Option<Duration> {
        self.query_timeout.map(Duration::from_secs)
    }

    /// Root under which tables without an explicit location are placed.
    pub fn data_dir(&self) -> &str {
        self.s3_data_dir.as_deref().unwrap_or(&self.s3_staging_dir)
    }
}

/// Join an S3 prefix and a relative path with exactly one `/` between them.
pub fn join_s3_path(base: &str, rest: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        rest.trim_start_matches('/')
    )
}

// ── Tests ────────────────────────────────────────────────────────
