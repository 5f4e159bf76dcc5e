//! The seam between [`AthenaClient`](crate::AthenaClient) and the remote engine.
//!
//! [`QueryBackend`] exposes the four engine calls the client needs. The
//! production implementation, [`AwsAthenaBackend`], wraps `aws-sdk-athena`.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_athena::types::{QueryExecutionContext, QueryExecutionState, ResultConfiguration};
use aws_types::region::Region;
use aws_types::SdkConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::AthenaError;
use crate::config::ConnectionProfile;
use crate::result::AthenaColumn;

// ---------------------------------------------------------------------------
// Wire-neutral types
// ---------------------------------------------------------------------------

/// Lifecycle state of a query execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// What to submit: the statement plus where and as whom to run it.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub sql: String,
    /// Data catalog (`database` in the profile).
    pub catalog: String,
    /// Catalog database (`schema` in the profile).
    pub database: String,
    pub output_location: String,
    pub work_group: Option<String>,
}

/// A point-in-time view of one query execution.
#[derive(Debug, Clone)]
pub struct QueryExecutionInfo {
    pub state: QueryState,
    pub state_change_reason: Option<String>,
    pub bytes_scanned: u64,
    pub execution_time_ms: u64,
    pub output_location: Option<String>,
}

/// One page of `GetQueryResults`.
#[derive(Debug, Clone, Default)]
pub struct ResultPage {
    pub columns: Vec<AthenaColumn>,
    /// Raw rows, including the header echo on the first page of a SELECT.
    pub rows: Vec<Vec<Option<String>>>,
    pub update_count: Option<i64>,
    pub next_token: Option<String>,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Remote query engine operations used by the client.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Submit a statement; returns the engine's query execution id.
    async fn start_query(&self, request: &QueryRequest) -> Result<String, AthenaError>;

    /// Fetch the current execution state of a submitted query.
    async fn query_execution(&self, query_id: &str) -> Result<QueryExecutionInfo, AthenaError>;

    /// Fetch one page of results for a succeeded query.
    async fn result_page(
        &self,
        query_id: &str,
        next_token: Option<&str>,
    ) -> Result<ResultPage, AthenaError>;

    /// Ask the engine to stop a running query.
    async fn stop_query(&self, query_id: &str) -> Result<(), AthenaError>;
}

// ---------------------------------------------------------------------------
// AWS implementation
// ---------------------------------------------------------------------------

/// Load the shared AWS SDK config for a connection profile.
///
/// Honors `region_name` and, when set, `aws_profile_name`.
pub async fn load_sdk_config(profile: &ConnectionProfile) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(profile.region_name.clone()));
    if let Some(name) = &profile.aws_profile_name {
        loader = loader.profile_name(name);
    }
    loader.load().await
}

/// [`QueryBackend`] backed by the AWS Athena API.
pub struct AwsAthenaBackend {
    client: aws_sdk_athena::Client,
}

impl AwsAthenaBackend {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_athena::Client::new(sdk_config),
        }
    }

    pub async fn from_profile(profile: &ConnectionProfile) -> Self {
        let sdk_config = load_sdk_config(profile).await;
        info!(
            region = %profile.region_name,
            aws_profile = profile.aws_profile_name.as_deref().unwrap_or("(default)"),
            "Athena backend initialised"
        );
        Self::new(&sdk_config)
    }
}

fn map_state(state: Option<&QueryExecutionState>) -> QueryState {
    match state {
        Some(QueryExecutionState::Succeeded) => QueryState::Succeeded,
        Some(QueryExecutionState::Failed) => QueryState::Failed,
        Some(QueryExecutionState::Cancelled) => QueryState::Cancelled,
        Some(QueryExecutionState::Running) => QueryState::Running,
        // Queued, missing, or a variant newer than this SDK.
        _ => QueryState::Queued,
    }
}

#[async_trait]
impl QueryBackend for AwsAthenaBackend {
    async fn start_query(&self, request: &QueryRequest) -> Result<String, AthenaError> {
        let mut ctx = QueryExecutionContext::builder();
        if !request.catalog.is_empty() {
            ctx = ctx.catalog(&request.catalog);
        }
        if !request.database.is_empty() {
            ctx = ctx.database(&request.database);
        }

        let resp = self
            .client
            .start_query_execution()
            .query_string(&request.sql)
            .query_execution_context(ctx.build())
            .result_configuration(
                ResultConfiguration::builder()
                    .output_location(&request.output_location)
                    .build(),
            )
            .set_work_group(request.work_group.clone())
            .send()
            .await
            .map_err(|e| AthenaError::AwsSdk(e.to_string()))?;

        resp.query_execution_id()
            .map(|id| id.to_string())
            .ok_or_else(|| AthenaError::AwsSdk("No query execution ID returned".into()))
    }

    async fn query_execution(&self, query_id: &str) -> Result<QueryExecutionInfo, AthenaError> {
        let resp = self
            .client
            .get_query_execution()
            .query_execution_id(query_id)
            .send()
            .await
            .map_err(|e| AthenaError::AwsSdk(e.to_string()))?;

        let qe = resp
            .query_execution()
            .ok_or_else(|| AthenaError::AwsSdk("No query execution in response".into()))?;

        let status = qe.status();
        let stats = qe.statistics();

        Ok(QueryExecutionInfo {
            state: map_state(status.and_then(|s| s.state())),
            state_change_reason: status
                .and_then(|s| s.state_change_reason())
                .map(|s| s.to_string()),
            bytes_scanned: stats
                .and_then(|s| s.data_scanned_in_bytes())
                .unwrap_or(0)
                .max(0) as u64,
            execution_time_ms: stats
                .and_then(|s| s.engine_execution_time_in_millis())
                .unwrap_or(0)
                .max(0) as u64,
            output_location: qe
                .result_configuration()
                .and_then(|rc| rc.output_location())
                .map(|s| s.to_string()),
        })
    }

    async fn result_page(
        &self,
        query_id: &str,
        next_token: Option<&str>,
    ) -> Result<ResultPage, AthenaError> {
        let output = self
            .client
            .get_query_results()
            .query_execution_id(query_id)
            .set_next_token(next_token.map(|t| t.to_string()))
            .send()
            .await
            .map_err(|e| AthenaError::AwsSdk(e.to_string()))?;

        let result_set = output
            .result_set()
            .ok_or_else(|| AthenaError::ParseError("No ResultSet in response".into()))?;

        let columns = result_set
            .result_set_metadata()
            .map(|meta| {
                meta.column_info()
                    .iter()
                    .map(|ci| AthenaColumn {
                        name: ci.name().to_string(),
                        data_type: ci.r#type().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let rows = result_set
            .rows()
            .iter()
            .map(|row| {
                row.data()
                    .iter()
                    .map(|datum| datum.var_char_value().map(|v| v.to_string()))
                    .collect()
            })
            .collect();

        debug!(query_id = %query_id, paged = next_token.is_some(), "Fetched result page");

        Ok(ResultPage {
            columns,
            rows,
            update_count: output.update_count(),
            next_token: output.next_token().map(|t| t.to_string()),
        })
    }

    async fn stop_query(&self, query_id: &str) -> Result<(), AthenaError> {
        self.client
            .stop_query_execution()
            .query_execution_id(query_id)
            .send()
            .await
            .map_err(|e| AthenaError::AwsSdk(e.to_string()))?;
        Ok(())
    }
}
