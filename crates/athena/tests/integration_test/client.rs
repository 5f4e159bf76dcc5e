//! Tests for AthenaClient against the mock engine: retries and result shape.

use std::sync::Arc;

use dbathena_adapter::*;

use crate::support::{client, MockEngine, Reply};

#[tokio::test]
async fn test_query_returns_rows_without_header_echo() {
    let engine = Arc::new(MockEngine::new().on(
        "FROM events",
        Reply::rows(&["id", "dt"], &[&["1", "2024-01-01"], &["2", "2024-01-02"]]),
    ));

    let result = client(engine.clone(), 0)
        .execute("SELECT id, dt FROM events")
        .await
        .unwrap();

    assert_eq!(result.row_count(), 2);
    assert_eq!(result.get_value(0, "id"), Some("1"));
    assert_eq!(result.get_value(1, "dt"), Some("2024-01-02"));
    assert_eq!(result.metadata.state, QueryState::Succeeded);
    assert_eq!(result.metadata.attempts, 1);
    assert_eq!(engine.submitted().len(), 1);
}

#[tokio::test]
async fn test_show_tables_keeps_first_row() {
    let engine = Arc::new(MockEngine::new().on(
        "SHOW TABLES",
        Reply::listing(&["tab_name"], &[&["events"], &["users"]]),
    ));

    let result = client(engine, 0).execute("SHOW TABLES IN analytics").await.unwrap();

    assert_eq!(result.row_count(), 2);
    assert_eq!(result.get_value(0, "tab_name"), Some("events"));
    assert_eq!(result.get_value(1, "tab_name"), Some("users"));
}

#[tokio::test]
async fn test_always_failing_query_is_attempted_n_plus_one_times() {
    for retries in [0u32, 2, 5] {
        let engine = Arc::new(MockEngine::new().on("SELECT", Reply::Fail("GENERIC_INTERNAL_ERROR".into())));

        let err = client(engine.clone(), retries)
            .execute("SELECT 1")
            .await
            .unwrap_err();

        assert_eq!(engine.submitted().len(), retries as usize + 1);
        match err {
            AthenaError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, retries + 1);
                assert!(last.to_string().contains("GENERIC_INTERNAL_ERROR"));
            }
            other => panic!("expected RetriesExhausted, got {other}"),
        }
    }
}

#[tokio::test]
async fn test_engine_error_text_passes_through_unmodified() {
    let reason = "HIVE_TOO_MANY_OPEN_PARTITIONS: Exceeded limit of 100 open writers for partitions/buckets";
    let engine = Arc::new(MockEngine::new().on("INSERT INTO", Reply::Fail(reason.into())));

    let err = client(engine, 0)
        .execute_statement("INSERT INTO t SELECT * FROM s")
        .await
        .unwrap_err();

    match err {
        AthenaError::RetriesExhausted { last, .. } => match *last {
            AthenaError::QueryFailed { reason: got, .. } => assert_eq!(got, reason),
            other => panic!("unexpected inner error: {other}"),
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_status_reports_existing_query() {
    let engine = Arc::new(MockEngine::new());
    let c = client(engine, 0);
    let meta = c.execute_statement("CREATE TABLE x AS SELECT 1").await.unwrap();

    let status = c.status(&meta.query_id).await.unwrap();
    assert_eq!(status.state, QueryState::Succeeded);
    assert_eq!(status.bytes_scanned, 1024);
    assert!(status.output_location.unwrap().ends_with(".csv"));
}

/// This test requires valid AWS credentials and network access.
///
/// Run with: `cargo test test_real_athena_query -- --ignored`
///
/// Set `ATHENA_S3_STAGING_DIR`, `ATHENA_REGION_NAME`, `ATHENA_SCHEMA` and
/// `ATHENA_DATABASE` before running; AWS credentials must be configured.
#[tokio::test]
#[ignore]
async fn test_real_athena_query() {
    let profile = ConnectionProfile::from_env().expect("ATHENA_* env vars must be set");
    let client = AthenaClient::connect(profile).await.expect("failed to create client");

    let result = client
        .execute("SELECT 1 AS test_column")
        .await
        .expect("query execution failed");

    assert_eq!(result.column_count(), 1);
    assert_eq!(result.get_value(0, "test_column"), Some("1"));
    assert_eq!(result.metadata.state, QueryState::Succeeded);
    println!("{result}");
}
