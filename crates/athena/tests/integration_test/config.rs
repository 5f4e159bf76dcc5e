//! Tests for ConnectionProfile and TableConfig loading from files and env.

use std::env;
use std::io::Write;
use std::sync::Mutex;

use dbathena_adapter::*;
use dbathena_core::ConfigError;

// Env-based tests must run serially to avoid interfering with each other.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_athena_env() {
    let keys = [
        "DBATHENA_PROFILE",
        "ATHENA_S3_STAGING_DIR",
        "ATHENA_REGION_NAME",
        "ATHENA_SCHEMA",
        "ATHENA_DATABASE",
        "ATHENA_CATALOG",
        "ATHENA_POLL_INTERVAL",
        "ATHENA_WORK_GROUP",
        "ATHENA_NUM_RETRIES",
        "ATHENA_QUERY_TIMEOUT",
        "AWS_REGION",
        "PROD_ATHENA_SCHEMA",
        "PROD_ATHENA_WORK_GROUP",
    ];
    for k in keys {
        env::remove_var(k);
    }
}

#[test]
fn test_profile_from_env_with_active_profile() {
    let _lock = ENV_LOCK.lock().unwrap();
    clear_athena_env();

    env::set_var("ATHENA_S3_STAGING_DIR", "s3://bucket/staging/");
    env::set_var("ATHENA_REGION_NAME", "eu-west-1");
    env::set_var("ATHENA_SCHEMA", "dev");
    env::set_var("ATHENA_DATABASE", "awsdatacatalog");
    env::set_var("ATHENA_POLL_INTERVAL", "3");
    env::set_var("ATHENA_QUERY_TIMEOUT", "600");
    env::set_var("DBATHENA_PROFILE", "prod");
    env::set_var("PROD_ATHENA_SCHEMA", "prod");
    env::set_var("PROD_ATHENA_WORK_GROUP", "etl");

    let cfg = ConnectionProfile::from_env().unwrap();

    assert_eq!(cfg.schema, "prod");
    assert_eq!(cfg.work_group.as_deref(), Some("etl"));
    assert_eq!(cfg.poll_interval, 3);
    assert_eq!(cfg.poll_interval_duration().as_secs(), 3);
    assert_eq!(cfg.query_timeout_duration().map(|d| d.as_secs()), Some(600));

    clear_athena_env();
}

#[test]
fn test_profile_from_yaml_file() {
    let dir = env::temp_dir().join(format!("dbathena-profile-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("profile.yml");
    let mut f = std::fs::File::create(&path).unwrap();
    writeln!(
        f,
        "s3_staging_dir: s3://bucket/staging/\n\
         region_name: us-east-1\n\
         schema: analytics\n\
         database: awsdatacatalog\n\
         aws_profile_name: analyst\n\
         num_retries: 2"
    )
    .unwrap();

    let cfg = ConnectionProfile::from_yaml_file(&path).unwrap();
    assert_eq!(cfg.aws_profile_name.as_deref(), Some("analyst"));
    assert_eq!(cfg.num_retries, 2);

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_missing_profile_file_is_io_error() {
    let err = ConnectionProfile::from_yaml_file("/nonexistent/profile.yml").unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)));
}

#[test]
fn test_table_config_rejects_delimiter_outside_textfile() {
    let err = TableConfig::from_yaml_str("format: json\nfield_delimiter: ','\n").unwrap_err();
    assert!(err.to_string().contains("field_delimiter"));

    let ok = TableConfig::from_yaml_str("format: textfile\nfield_delimiter: '\\t'\n").unwrap();
    assert_eq!(ok.format, FileFormat::Textfile);
    assert_eq!(ok.field_delimiter.as_deref(), Some("\\t"));
}

#[test]
fn test_table_config_unknown_format() {
    assert!(TableConfig::from_yaml_str("format: csv\n").is_err());
}
