//! Tests for IncrementalRunner: statement order and partition handling.

use std::sync::Arc;

use dbathena_adapter::*;
use dbathena_core::{ConfigError, Relation};

use crate::support::{client, MockEngine, RecordingStore, Reply};

fn model(strategy: IncrementalStrategy, partitioned: bool) -> IncrementalModel {
    IncrementalModel {
        relation: Relation::new("awsdatacatalog", "analytics", "events"),
        sql: "SELECT id, payload, dt FROM raw.events WHERE dt >= '2024-01-02'".into(),
        table: TableConfig {
            partitioned_by: if partitioned { vec!["dt".into()] } else { vec![] },
            ..TableConfig::default()
        },
        incremental: IncrementalConfig::new(strategy),
    }
}

/// Engine for an existing `events` table partitioned by `dt`, holding
/// 2024-01-01 and 2024-01-02, with new data for 2024-01-02 and 2024-01-03.
fn existing_table_engine() -> MockEngine {
    MockEngine::new()
        .on("information_schema.tables", Reply::rows(&["table_name"], &[&["events"]]))
        .on(
            "information_schema.columns",
            Reply::rows(&["column_name"], &[&["id"], &["payload"], &["dt"]]),
        )
        .on(
            "SELECT DISTINCT dt FROM",
            Reply::rows(&["dt"], &[&["2024-01-02"], &["2024-01-03"]]),
        )
        .on(
            "events$partitions",
            Reply::rows(&["dt"], &[&["2024-01-01"], &["2024-01-02"]]),
        )
        .on(
            "\"$path\"",
            Reply::rows(
                &["$path"],
                &[
                    &["s3://bucket/tables/events/dt=2024-01-02/part-0.parquet"],
                    &["s3://bucket/tables/events/dt=2024-01-02/part-1.parquet"],
                ],
            ),
        )
}

fn runner(engine: Arc<MockEngine>, store: Arc<RecordingStore>, retries: u32) -> IncrementalRunner {
    IncrementalRunner::new(Arc::new(client(engine, retries)), store)
}

#[tokio::test]
async fn test_first_run_creates_partitioned_table() {
    let engine = Arc::new(MockEngine::new());
    let store = Arc::new(RecordingStore::default());

    let summary = runner(engine.clone(), store.clone(), 0)
        .run(&model(IncrementalStrategy::InsertOverwrite, true))
        .await
        .unwrap();

    assert!(summary.created);
    let sql = engine.submitted();
    assert_eq!(sql.len(), 2);
    assert!(sql[0].contains("information_schema.tables"));
    assert!(sql[1].starts_with("CREATE TABLE awsdatacatalog.analytics.events"));
    assert!(sql[1].contains("partitioned_by=ARRAY['dt']"));
    assert!(sql[1].contains("external_location='s3://bucket/staging/tables/"));
    assert!(store.deleted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_insert_overwrite_replaces_only_intersecting_partitions() {
    let engine = Arc::new(existing_table_engine());
    let store = Arc::new(RecordingStore::default());

    let summary = runner(engine.clone(), store.clone(), 0)
        .run(&model(IncrementalStrategy::InsertOverwrite, true))
        .await
        .unwrap();

    assert!(!summary.created);
    assert_eq!(summary.strategy, IncrementalStrategy::InsertOverwrite);
    assert_eq!(summary.plan.replaced.len(), 1);
    assert_eq!(summary.plan.replaced[0].path(), "dt=2024-01-02");
    assert_eq!(summary.plan.added[0].path(), "dt=2024-01-03");
    assert_eq!(summary.plan.untouched[0].path(), "dt=2024-01-01");
    assert_eq!(summary.objects_deleted, 2);

    // Only the replaced partition's files are removed.
    let deleted = store.deleted.lock().unwrap().clone();
    assert!(deleted.iter().all(|u| u.contains("dt=2024-01-02")));

    let sql = engine.submitted();
    let alter: Vec<&String> = sql.iter().filter(|s| s.starts_with("ALTER TABLE")).collect();
    assert_eq!(alter.len(), 1);
    assert_eq!(
        alter[0].as_str(),
        "ALTER TABLE analytics.events DROP IF EXISTS PARTITION (dt='2024-01-02')"
    );
    assert!(sql.iter().all(|s| !s.contains("2024-01-01")));

    // Files are listed before the catalog forgets the partition, and the
    // insert comes after the drop.
    let paths = engine.position("\"$path\"").unwrap();
    let drop = engine.position("ALTER TABLE").unwrap();
    let insert = engine.position("INSERT INTO").unwrap();
    assert!(paths < drop && drop < insert);

    let insert_sql = &sql[insert];
    assert!(insert_sql.starts_with("INSERT INTO awsdatacatalog.analytics.events (id, payload, dt)"));
    assert!(insert_sql.contains("events__dbt_tmp_"));

    // Staging table is created first and dropped last.
    assert!(sql[1].starts_with("CREATE TABLE awsdatacatalog.analytics.events__dbt_tmp_"));
    assert!(sql[1].contains("external_location='s3://bucket/staging/tmp/events__dbt_tmp_"));
    assert!(sql.last().unwrap().starts_with("DROP TABLE IF EXISTS analytics.events__dbt_tmp_"));
}

#[tokio::test]
async fn test_append_never_touches_existing_partitions() {
    let engine = Arc::new(existing_table_engine());
    let store = Arc::new(RecordingStore::default());

    let summary = runner(engine.clone(), store.clone(), 0)
        .run(&model(IncrementalStrategy::Append, true))
        .await
        .unwrap();

    assert!(summary.plan.replaced.is_empty());
    assert_eq!(summary.plan.appended[0].path(), "dt=2024-01-02");
    assert_eq!(summary.plan.added[0].path(), "dt=2024-01-03");
    assert_eq!(summary.objects_deleted, 0);
    assert!(store.deleted.lock().unwrap().is_empty());

    assert!(engine.position("ALTER TABLE").is_none());
    assert!(engine.position("\"$path\"").is_none());
    assert!(engine.position("INSERT INTO").is_some());
}

#[tokio::test]
async fn test_unpartitioned_insert_overwrite_clears_whole_table() {
    let engine = Arc::new(existing_table_engine());
    let store = Arc::new(RecordingStore::default());

    let summary = runner(engine.clone(), store.clone(), 0)
        .run(&model(IncrementalStrategy::InsertOverwrite, false))
        .await
        .unwrap();

    assert_eq!(summary.objects_deleted, 2);
    let sql = engine.submitted();
    let paths = engine.position("\"$path\"").unwrap();
    assert!(!sql[paths].contains("WHERE"));
    assert!(engine.position("$partitions").is_none());
    assert!(engine.position("ALTER TABLE").is_none());
    assert!(paths < engine.position("INSERT INTO").unwrap());
}

#[tokio::test]
async fn test_unpartitioned_append_only_inserts() {
    let engine = Arc::new(existing_table_engine());
    let store = Arc::new(RecordingStore::default());

    let summary = runner(engine.clone(), store.clone(), 0)
        .run(&model(IncrementalStrategy::Append, false))
        .await
        .unwrap();

    assert_eq!(summary.objects_deleted, 0);
    assert!(engine.position("\"$path\"").is_none());
    assert!(engine.position("INSERT INTO").is_some());
}

#[tokio::test]
async fn test_unique_key_rejected_before_any_query() {
    for strategy in [IncrementalStrategy::Append, IncrementalStrategy::InsertOverwrite] {
        let engine = Arc::new(existing_table_engine());
        let store = Arc::new(RecordingStore::default());
        let mut m = model(strategy, true);
        m.incremental.unique_key = Some(UniqueKey::Single("id".into()));

        let err = runner(engine.clone(), store, 0).run(&m).await.unwrap_err();

        assert!(matches!(err, AthenaError::Config(ConfigError::Unsupported(_))));
        assert!(engine.submitted().is_empty());
    }
}

#[tokio::test]
async fn test_unknown_strategy_rejected_before_any_query() {
    let engine = Arc::new(existing_table_engine());
    let mut m = model(IncrementalStrategy::Append, true);
    m.incremental.incremental_strategy = Some("merge".into());

    let err = runner(engine.clone(), Arc::new(RecordingStore::default()), 0)
        .run(&m)
        .await
        .unwrap_err();

    assert!(matches!(err, AthenaError::Config(_)));
    assert!(engine.submitted().is_empty());
}

#[tokio::test]
async fn test_staging_table_dropped_when_insert_fails() {
    let engine = Arc::new(
        MockEngine::new()
            .on("INSERT INTO", Reply::Fail("HIVE_PARTITION_SCHEMA_MISMATCH".into()))
            .on("information_schema.tables", Reply::rows(&["table_name"], &[&["events"]]))
            .on("information_schema.columns", Reply::rows(&["column_name"], &[&["id"]])),
    );

    let err = runner(engine.clone(), Arc::new(RecordingStore::default()), 1)
        .run(&model(IncrementalStrategy::Append, false))
        .await
        .unwrap_err();

    assert!(matches!(err, AthenaError::RetriesExhausted { attempts: 2, .. }));
    let sql = engine.submitted();
    assert_eq!(sql.iter().filter(|s| s.starts_with("INSERT INTO")).count(), 2);
    assert!(sql.last().unwrap().starts_with("DROP TABLE IF EXISTS analytics.events__dbt_tmp_"));
}

#[tokio::test]
async fn test_staging_data_removed_after_run() {
    let engine = Arc::new(existing_table_engine());
    let store = Arc::new(RecordingStore::default());

    runner(engine.clone(), store.clone(), 0)
        .run(&model(IncrementalStrategy::Append, true))
        .await
        .unwrap();

    // Emptied before the staging CTAS and again after the staging drop.
    let cleared = store.cleared();
    assert_eq!(cleared.len(), 2);
    assert!(cleared[0].starts_with("s3://bucket/staging/tmp/events__dbt_tmp_"));
    assert_eq!(cleared[0], cleared[1]);

    let ctas = engine.submitted()[1].clone();
    assert!(ctas.contains(&format!("external_location='{}'", cleared[0])));
}

#[tokio::test]
async fn test_staging_data_removed_when_insert_fails() {
    let engine = Arc::new(
        MockEngine::new()
            .on("INSERT INTO", Reply::Fail("HIVE_PARTITION_SCHEMA_MISMATCH".into()))
            .on("information_schema.tables", Reply::rows(&["table_name"], &[&["events"]]))
            .on("information_schema.columns", Reply::rows(&["column_name"], &[&["id"]])),
    );
    let store = Arc::new(RecordingStore::default());

    runner(engine, store.clone(), 0)
        .run(&model(IncrementalStrategy::Append, false))
        .await
        .unwrap_err();

    let cleared = store.cleared();
    assert_eq!(cleared.len(), 2);
    assert!(cleared[1].contains("/tmp/events__dbt_tmp_"));
}

#[tokio::test]
async fn test_retried_staging_ctas_starts_from_empty_location() {
    let engine = Arc::new(
        MockEngine::new()
            .on("events__dbt_tmp_", Reply::Fail("HIVE_PATH_ALREADY_EXISTS".into()))
            .on("information_schema.tables", Reply::rows(&["table_name"], &[&["events"]])),
    );
    let store = Arc::new(RecordingStore::default());

    let err = runner(engine.clone(), store.clone(), 2)
        .run(&model(IncrementalStrategy::Append, false))
        .await
        .unwrap_err();

    assert!(matches!(err, AthenaError::RetriesExhausted { attempts: 3, .. }));
    let sql = engine.submitted();
    let ctas = sql.iter().filter(|s| s.starts_with("CREATE TABLE")).count();
    assert_eq!(ctas, 3);
    // One clear per CTAS attempt, plus the cleanup after the drop.
    assert_eq!(store.cleared().len(), 4);
    assert!(engine.position("INSERT INTO").is_none());
}

#[tokio::test]
async fn test_first_run_clears_explicit_location() {
    let engine = Arc::new(MockEngine::new());
    let store = Arc::new(RecordingStore::default());
    let mut m = model(IncrementalStrategy::InsertOverwrite, true);
    m.table.external_location = Some("s3://warehouse/analytics/events/".into());

    let summary = runner(engine.clone(), store.clone(), 0).run(&m).await.unwrap();

    assert!(summary.created);
    assert_eq!(store.cleared(), vec!["s3://warehouse/analytics/events/".to_string()]);
    assert!(engine.submitted()[1].contains("external_location='s3://warehouse/analytics/events/'"));
}
