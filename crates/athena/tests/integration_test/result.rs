//! Tests for AthenaQueryResult as returned to callers.

use chrono::Utc;
use dbathena_adapter::*;

fn result() -> AthenaQueryResult {
    AthenaQueryResult {
        columns: vec![
            AthenaColumn {
                name: "id".to_string(),
                data_type: "bigint".to_string(),
            },
            AthenaColumn {
                name: "dt".to_string(),
                data_type: "date".to_string(),
            },
        ],
        rows: vec![
            vec![Some("1".to_string()), Some("2024-01-01".to_string())],
            vec![Some("2".to_string()), Some("2024-01-01".to_string())],
            vec![Some("3".to_string()), None],
        ],
        metadata: QueryMetadata {
            query_id: "test-123".to_string(),
            bytes_scanned: 10 * 1024 * 1024,
            execution_time_ms: 1500,
            state: QueryState::Succeeded,
            output_location: Some("s3://bucket/results/test-123.csv".to_string()),
            attempts: 2,
            submitted_at: Utc::now(),
        },
    }
}

#[test]
fn test_partition_values_from_result() {
    let r = result();
    let keys = vec!["dt".to_string()];
    let parts: Vec<PartitionValues> = r
        .distinct_tuples(&keys)
        .unwrap()
        .into_iter()
        .map(|v| PartitionValues::from_row(&keys, v))
        .collect();

    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].path(), "dt=__HIVE_DEFAULT_PARTITION__");
    assert_eq!(parts[1].path(), "dt=2024-01-01");
}

#[test]
fn test_display_and_json() {
    let r = result();
    let text = r.to_string();
    assert!(text.contains("test-123"));
    assert!(text.contains("3 rows"));
    assert!(text.contains("10.000 MB"));
    assert!(text.contains("2 attempt(s)"));

    let json = serde_json::to_value(&r).unwrap();
    assert_eq!(json["metadata"]["state"], "SUCCEEDED");
    assert_eq!(json["rows"][2][1], serde_json::Value::Null);
}
