//! AWS Athena query execution client.
//!
//! Provides [`AthenaClient`] for executing SQL against Athena: fixed-interval
//! status polling, whole-attempt retries bounded by `num_retries`, optional
//! timeout enforcement, and paged result parsing into [`AthenaQueryResult`].

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use dbathena_core::ConfigError;

use crate::backend::{AwsAthenaBackend, QueryBackend, QueryExecutionInfo, QueryRequest, QueryState};
use crate::config::ConnectionProfile;
use crate::result::{AthenaColumn, AthenaQueryResult, QueryMetadata};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Errors that can occur during Athena operations.
#[derive(Debug, thiserror::Error)]
pub enum AthenaError {
    /// The query execution failed on the Athena side.
    #[error("Query {query_id} failed: {reason}")]
    QueryFailed { query_id: String, reason: String },

    /// The query was cancelled (either by the user or by Athena).
    #[error("Query {query_id} was cancelled")]
    QueryCancelled { query_id: String },

    /// The query exceeded the configured timeout.
    #[error("Query {query_id} timed out after {seconds}s")]
    QueryTimeout { query_id: String, seconds: u64 },

    /// Every allowed attempt failed.
    #[error("Query failed after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<AthenaError>,
    },

    /// An AWS SDK error (stringified).
    #[error("AWS SDK error: {0}")]
    AwsSdk(String),

    /// Failed to parse Athena result data.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Object storage cleanup failed.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl AthenaError {
    /// Whether a fresh submission might succeed where this attempt did not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AthenaError::QueryFailed { .. } | AthenaError::AwsSdk(_))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Client for executing queries against AWS Athena.
///
/// One call runs one query at a time. An attempt is submit, poll to a
/// terminal state, then fetch. Submission errors and FAILED states retry the
/// attempt from submission; status-check errors are retried against the same
/// query execution so a running statement is never submitted twice.
pub struct AthenaClient {
    profile: ConnectionProfile,
    backend: Arc<dyn QueryBackend>,
    poll_interval: Duration,
}

impl AthenaClient {
    /// Connect to Athena with the AWS SDK, using the profile's region and
    /// credentials profile.
    pub async fn connect(profile: ConnectionProfile) -> Result<Self, AthenaError> {
        profile.validate()?;
        let backend = AwsAthenaBackend::from_profile(&profile).await;
        info!(
            schema = %profile.schema,
            database = %profile.database,
            work_group = profile.work_group.as_deref().unwrap_or("(default)"),
            num_retries = profile.num_retries,
            "AthenaClient initialised"
        );
        Ok(Self::with_backend(profile, Arc::new(backend)))
    }

    /// Build a client over any [`QueryBackend`].
    pub fn with_backend(profile: ConnectionProfile, backend: Arc<dyn QueryBackend>) -> Self {
        let poll_interval = profile.poll_interval_duration();
        Self {
            profile,
            backend,
            poll_interval,
        }
    }

    /// Override the profile's poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn profile(&self) -> &ConnectionProfile {
        &self.profile
    }

    // -----------------------------------------------------------------------
    // Public API
    // -----------------------------------------------------------------------

    /// Execute a query and return its rows.
    pub async fn execute(&self, sql: &str) -> Result<AthenaQueryResult, AthenaError> {
        self.run_with_retries(sql, true, no_setup).await
    }

    /// Execute a statement whose rows are not needed (DDL, INSERT, CTAS).
    pub async fn execute_statement(&self, sql: &str) -> Result<QueryMetadata, AthenaError> {
        Ok(self.run_with_retries(sql, false, no_setup).await?.metadata)
    }

    /// Like [`execute_statement`](Self::execute_statement), awaiting `setup`
    /// before every submission.
    ///
    /// A CTAS needs an empty target location, including when it is retried
    /// after a failed attempt left files behind.
    pub async fn execute_statement_with_setup<F, Fut>(
        &self,
        sql: &str,
        setup: F,
    ) -> Result<QueryMetadata, AthenaError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), AthenaError>>,
    {
        Ok(self.run_with_retries(sql, false, setup).await?.metadata)
    }

    /// Cancel a running Athena query.
    pub async fn cancel(&self, query_id: &str) -> Result<(), AthenaError> {
        info!(query_id = %query_id, "Cancelling query");
        self.backend.stop_query(query_id).await?;
        info!(query_id = %query_id, "Query cancellation requested");
        Ok(())
    }

    /// Current status of an existing query execution.
    pub async fn status(&self, query_id: &str) -> Result<QueryMetadata, AthenaError> {
        let info = self.backend.query_execution(query_id).await?;
        Ok(Self::metadata(query_id, &info, 1))
    }

    // -----------------------------------------------------------------------
    // Private helpers
    // -----------------------------------------------------------------------

    /// Run attempts until one succeeds, a non-retryable error occurs, or
    /// `num_retries + 1` attempts have failed.
    async fn run_with_retries<F, Fut>(
        &self,
        sql: &str,
        fetch_rows: bool,
        setup: F,
    ) -> Result<AthenaQueryResult, AthenaError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), AthenaError>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt: u32 = 1;

        loop {
            setup().await?;
            match self.attempt(sql, fetch_rows, attempt).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => {
                    if attempt >= max_attempts {
                        error!(attempts = attempt, error = %e, "Query failed, no retries left");
                        return Err(AthenaError::RetriesExhausted {
                            attempts: attempt,
                            last: Box::new(e),
                        });
                    }
                    warn!(attempt, max_attempts, error = %e, "Query attempt failed, retrying");
                    tokio::time::sleep(self.poll_interval).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        sql: &str,
        fetch_rows: bool,
        attempt: u32,
    ) -> Result<AthenaQueryResult, AthenaError> {
        let request = QueryRequest {
            sql: sql.to_string(),
            catalog: self.profile.database.clone(),
            database: self.profile.schema.clone(),
            output_location: self.profile.s3_staging_dir.clone(),
            work_group: self.profile.work_group.clone(),
        };

        let submitted_at = Utc::now();
        let query_id = self.backend.start_query(&request).await?;
        info!(query_id = %query_id, attempt, "Query execution started");

        let info = self.poll_until_complete(&query_id).await?;

        let mut metadata = Self::metadata(&query_id, &info, attempt);
        metadata.submitted_at = submitted_at;

        if !fetch_rows {
            return Ok(AthenaQueryResult {
                columns: Vec::new(),
                rows: Vec::new(),
                metadata,
            });
        }
        self.fetch_results(metadata).await
    }

    fn max_attempts(&self) -> u32 {
        self.profile.num_retries.saturating_add(1)
    }

    /// Check status every `poll_interval` until the query reaches SUCCEEDED,
    /// FAILED or CANCELLED, or the profile's timeout runs out.
    ///
    /// A failed status check is retried up to `num_retries` times in a row.
    /// When they run out the result is `RetriesExhausted`, which is not
    /// retried from submission.
    async fn poll_until_complete(&self, query_id: &str) -> Result<QueryExecutionInfo, AthenaError> {
        let start = Instant::now();
        let timeout = self.profile.query_timeout_duration();
        let max_checks = self.max_attempts();
        let mut failed_checks: u32 = 0;

        loop {
            let info = match self.backend.query_execution(query_id).await {
                Ok(info) => {
                    failed_checks = 0;
                    info
                }
                Err(e) if e.is_retryable() => {
                    failed_checks += 1;
                    if failed_checks >= max_checks {
                        error!(
                            query_id = %query_id,
                            checks = failed_checks,
                            error = %e,
                            "Status check failed, no retries left"
                        );
                        return Err(AthenaError::RetriesExhausted {
                            attempts: failed_checks,
                            last: Box::new(e),
                        });
                    }
                    warn!(
                        query_id = %query_id,
                        checks = failed_checks,
                        error = %e,
                        "Status check failed, retrying"
                    );
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
                Err(e) => return Err(e),
            };

            debug!(
                query_id = %query_id,
                state = ?info.state,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Polling query status"
            );

            match info.state {
                QueryState::Succeeded => return Ok(info),

                QueryState::Failed => {
                    let reason = info
                        .state_change_reason
                        .unwrap_or_else(|| "unknown".to_string());
                    warn!(query_id = %query_id, reason = %reason, "Query failed");
                    return Err(AthenaError::QueryFailed {
                        query_id: query_id.to_string(),
                        reason,
                    });
                }

                QueryState::Cancelled => {
                    warn!(query_id = %query_id, "Query was cancelled");
                    return Err(AthenaError::QueryCancelled {
                        query_id: query_id.to_string(),
                    });
                }

                QueryState::Queued | QueryState::Running => {}
            }

            if let Some(limit) = timeout {
                if start.elapsed() >= limit {
                    warn!(
                        query_id = %query_id,
                        timeout_seconds = limit.as_secs(),
                        "Query timed out, cancelling"
                    );
                    // Best-effort cancel; the timeout is what gets reported.
                    if let Err(e) = self.cancel(query_id).await {
                        warn!(query_id = %query_id, error = %e, "Cancel after timeout failed");
                    }
                    return Err(AthenaError::QueryTimeout {
                        query_id: query_id.to_string(),
                        seconds: limit.as_secs(),
                    });
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Fetch every result page and merge them.
    ///
    /// SELECT results repeat the column labels as the first row of the first
    /// page; that row is skipped. DDL and utility statements (SHOW, DESCRIBE)
    /// have no such row and keep every row.
    async fn fetch_results(&self, metadata: QueryMetadata) -> Result<AthenaQueryResult, AthenaError> {
        let query_id = metadata.query_id.clone();
        let mut columns = Vec::new();
        let mut rows = Vec::new();
        let mut next_token: Option<String> = None;
        let mut first_page = true;

        loop {
            let page = self
                .backend
                .result_page(&query_id, next_token.as_deref())
                .await?;

            let skip = if first_page
                && page.update_count.is_none()
                && page.rows.first().is_some_and(|row| is_header_echo(row, &page.columns))
            {
                1
            } else {
                0
            };
            if first_page {
                columns = page.columns;
            }
            rows.extend(page.rows.into_iter().skip(skip));

            first_page = false;
            next_token = page.next_token;
            if next_token.is_none() {
                break;
            }
        }

        if let Some(bad) = rows.iter().position(|r| r.len() != columns.len()) {
            return Err(AthenaError::ParseError(format!(
                "row {bad} has {} values, expected {}",
                rows[bad].len(),
                columns.len()
            )));
        }

        debug!(
            columns = columns.len(),
            rows = rows.len(),
            query_id = %query_id,
            "Parsed Athena results"
        );

        Ok(AthenaQueryResult {
            columns,
            rows,
            metadata,
        })
    }

    fn metadata(query_id: &str, info: &QueryExecutionInfo, attempts: u32) -> QueryMetadata {
        QueryMetadata {
            query_id: query_id.to_string(),
            bytes_scanned: info.bytes_scanned,
            execution_time_ms: info.execution_time_ms,
            state: info.state,
            output_location: info.output_location.clone(),
            attempts,
            submitted_at: Utc::now(),
        }
    }
}

async fn no_setup() -> Result<(), AthenaError> {
    Ok(())
}

/// Whether `row` holds exactly the column labels.
fn is_header_echo(row: &[Option<String>], columns: &[AthenaColumn]) -> bool {
    row.len() == columns.len()
        && row
            .iter()
            .zip(columns)
            .all(|(value, col)| value.as_deref() == Some(col.name.as_str()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
