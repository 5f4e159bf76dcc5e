//! Running an incremental model against Athena.
//!
//! The model's SQL is first staged into a temporary table. The partitions it
//! produced are compared with the target's partitions, the strategy decides
//! what to replace, and the staged rows are inserted into the target. The
//! staging table and its data are removed whether or not the insert worked.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use dbathena_core::Relation;

use crate::client::{AthenaClient, AthenaError};
use crate::config::join_s3_path;
use crate::incremental::{
    plan_partitions, IncrementalConfig, IncrementalStrategy, PartitionPlan, MAX_PARTITIONS_PER_QUERY,
};
use crate::partition::{quote_literal, PartitionValues};
use crate::storage::PartitionStore;
use crate::table::TableConfig;

/// A model to materialize incrementally.
#[derive(Debug, Clone)]
pub struct IncrementalModel {
    pub relation: Relation,
    /// The model's SELECT.
    pub sql: String,
    pub table: TableConfig,
    pub incremental: IncrementalConfig,
}

/// What one run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub relation: Relation,
    pub strategy: IncrementalStrategy,
    /// The target did not exist and was created from the model.
    pub created: bool,
    pub plan: PartitionPlan,
    /// Data files removed from replaced partitions (or the whole table).
    pub objects_deleted: usize,
}

/// Executes incremental materializations.
pub struct IncrementalRunner {
    client: Arc<AthenaClient>,
    store: Arc<dyn PartitionStore>,
}

impl IncrementalRunner {
    pub fn new(client: Arc<AthenaClient>, store: Arc<dyn PartitionStore>) -> Self {
        Self { client, store }
    }

    /// Materialize `model` into its target.
    ///
    /// Configuration problems (unknown strategy, `unique_key`, bad table
    /// settings) are reported before any statement is submitted.
    pub async fn run(&self, model: &IncrementalModel) -> Result<RunSummary, AthenaError> {
        let strategy = model.incremental.validate()?;
        model.table.validate()?;

        if !self.relation_exists(&model.relation).await? {
            let location = model.table.resolve_location(self.client.profile());
            let ctas = model.table.ctas_sql(&model.relation, &model.sql, &location)?;
            self.create_table_as(&ctas, &location).await?;
            info!(relation = %model.relation, location = %location, "Created target table");
            return Ok(RunSummary {
                relation: model.relation.clone(),
                strategy,
                created: true,
                plan: PartitionPlan::default(),
                objects_deleted: 0,
            });
        }

        let staging = staging_relation(&model.relation);
        let staging_location = join_s3_path(
            &self.client.profile().s3_staging_dir,
            &format!("tmp/{}", staging.identifier),
        );
        let ctas = TableConfig::staging(staging_location.clone()).ctas_sql(
            &staging,
            &model.sql,
            &staging_location,
        )?;
        let outcome = match self.create_table_as(&ctas, &staging_location).await {
            Ok(()) => self.write_from_staging(model, strategy, &staging).await,
            Err(e) => Err(e),
        };

        self.drop_staging(&staging, &staging_location).await;

        outcome
    }

    /// Run a CTAS, emptying its location before every attempt.
    async fn create_table_as(&self, ctas: &str, location: &str) -> Result<(), AthenaError> {
        let store = &self.store;
        self.client
            .execute_statement_with_setup(ctas, move || async move {
                let removed = store.delete_prefix(location).await?;
                if removed > 0 {
                    warn!(location = %location, objects = removed, "Cleared leftover files before CTAS");
                }
                Ok::<(), AthenaError>(())
            })
            .await?;
        Ok(())
    }

    /// Best effort: failures are logged, never returned.
    async fn drop_staging(&self, staging: &Relation, location: &str) {
        if let Err(e) = self.client.execute_statement(&drop_table_sql(staging)).await {
            warn!(relation = %staging, error = %e, "Failed to drop staging table");
        }
        if let Err(e) = self.store.delete_prefix(location).await {
            warn!(relation = %staging, location = %location, error = %e, "Failed to delete staging data");
        }
    }

    async fn write_from_staging(
        &self,
        model: &IncrementalModel,
        strategy: IncrementalStrategy,
        staging: &Relation,
    ) -> Result<RunSummary, AthenaError> {
        let target = &model.relation;
        let columns = self.target_columns(target).await?;
        if columns.is_empty() {
            return Err(AthenaError::ParseError(format!("no columns found for {target}")));
        }

        let mut plan = PartitionPlan::default();
        let mut objects_deleted = 0;

        if model.table.is_partitioned() {
            let keys = &model.table.partitioned_by;
            let incoming = self
                .partitions_from(&distinct_partitions_sql(staging, keys), keys)
                .await?;
            let existing = self
                .partitions_from(&format!("SELECT * FROM {}", target.partitions_table()), keys)
                .await?;

            plan = plan_partitions(strategy, &existing, &incoming);
            info!(
                relation = %target,
                strategy = %strategy,
                replaced = plan.replaced.len(),
                appended = plan.appended.len(),
                added = plan.added.len(),
                untouched = plan.untouched.len(),
                "Planned incremental write"
            );
            if plan.exceeds_partition_limit() {
                warn!(
                    relation = %target,
                    partitions = plan.written(),
                    limit = MAX_PARTITIONS_PER_QUERY,
                    "Insert touches more partitions than Athena allows in one query"
                );
            }

            if !plan.replaced.is_empty() {
                objects_deleted = self.drop_partitions(target, &plan.replaced).await?;
            }
        } else if strategy == IncrementalStrategy::InsertOverwrite {
            let files = self.data_files(&file_paths_sql(target, &[])).await?;
            objects_deleted = self.store.delete_objects(&files).await?;
            info!(relation = %target, files = objects_deleted, "Cleared unpartitioned target");
        }

        self.client
            .execute_statement(&insert_sql(target, staging, &columns))
            .await?;
        info!(relation = %target, strategy = %strategy, "Incremental insert complete");

        Ok(RunSummary {
            relation: target.clone(),
            strategy,
            created: false,
            plan,
            objects_deleted,
        })
    }

    /// Drop replaced partitions from the catalog and delete their files.
    ///
    /// File paths are collected first; once the catalog entry is gone the
    /// engine can no longer list them.
    async fn drop_partitions(
        &self,
        target: &Relation,
        partitions: &[PartitionValues],
    ) -> Result<usize, AthenaError> {
        let mut files = Vec::new();
        for chunk in partitions.chunks(MAX_PARTITIONS_PER_QUERY) {
            files.extend(self.data_files(&file_paths_sql(target, chunk)).await?);
        }

        for chunk in partitions.chunks(MAX_PARTITIONS_PER_QUERY) {
            self.client
                .execute_statement(&drop_partitions_sql(target, chunk))
                .await?;
            debug!(
                relation = %target,
                partitions = %chunk.iter().map(|p| p.path()).collect::<Vec<_>>().join(", "),
                "Dropped partitions"
            );
        }

        if files.is_empty() {
            return Ok(0);
        }
        self.store.delete_objects(&files).await
    }

    async fn relation_exists(&self, relation: &Relation) -> Result<bool, AthenaError> {
        let result = self.client.execute(&table_exists_sql(relation)).await?;
        Ok(!result.is_empty())
    }

    async fn target_columns(&self, relation: &Relation) -> Result<Vec<String>, AthenaError> {
        let result = self.client.execute(&columns_sql(relation)).await?;
        let values = result
            .column_values("column_name")
            .ok_or_else(|| AthenaError::ParseError("column_name missing from result".into()))?;
        Ok(values.into_iter().flatten().map(|s| s.to_string()).collect())
    }

    async fn partitions_from(
        &self,
        sql: &str,
        keys: &[String],
    ) -> Result<BTreeSet<PartitionValues>, AthenaError> {
        let result = self.client.execute(sql).await?;
        let tuples = result.distinct_tuples(keys).ok_or_else(|| {
            AthenaError::ParseError(format!("partition columns {keys:?} missing from result"))
        })?;
        Ok(tuples
            .into_iter()
            .map(|values| PartitionValues::from_row(keys, values))
            .collect())
    }

    async fn data_files(&self, sql: &str) -> Result<Vec<String>, AthenaError> {
        let result = self.client.execute(sql).await?;
        let values = result
            .column_values("$path")
            .ok_or_else(|| AthenaError::ParseError("$path missing from result".into()))?;
        Ok(values.into_iter().flatten().map(|s| s.to_string()).collect())
    }
}

// ---------------------------------------------------------------------------
// SQL builders
// ---------------------------------------------------------------------------

/// `{identifier}__dbt_tmp_{8 hex chars}` next to the target.
pub fn staging_relation(target: &Relation) -> Relation {
    let suffix = Uuid::new_v4().simple().to_string();
    target.with_identifier(format!("{}__dbt_tmp_{}", target.identifier, &suffix[..8]))
}

pub fn table_exists_sql(relation: &Relation) -> String {
    format!(
        "SELECT table_name FROM {}.information_schema.tables WHERE table_schema = {} AND table_name = {}",
        relation.database,
        quote_literal(&relation.schema),
        quote_literal(&relation.identifier)
    )
}

pub fn columns_sql(relation: &Relation) -> String {
    format!(
        "SELECT column_name FROM {}.information_schema.columns WHERE table_schema = {} AND table_name = {} ORDER BY ordinal_position",
        relation.database,
        quote_literal(&relation.schema),
        quote_literal(&relation.identifier)
    )
}

pub fn distinct_partitions_sql(relation: &Relation, keys: &[String]) -> String {
    format!("SELECT DISTINCT {} FROM {relation}", keys.join(", "))
}

/// Data files of the given partitions, or of the whole table when empty.
pub fn file_paths_sql(relation: &Relation, partitions: &[PartitionValues]) -> String {
    let mut sql = format!("SELECT DISTINCT \"$path\" FROM {relation}");
    if !partitions.is_empty() {
        let predicates: Vec<String> = partitions
            .iter()
            .map(|p| format!("({})", p.predicate_sql()))
            .collect();
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" OR "));
    }
    sql
}

pub fn drop_partitions_sql(relation: &Relation, partitions: &[PartitionValues]) -> String {
    let specs: Vec<String> = partitions
        .iter()
        .map(|p| format!("PARTITION {}", p.spec_sql()))
        .collect();
    format!(
        "ALTER TABLE {} DROP IF EXISTS {}",
        relation.ddl_name(),
        specs.join(", ")
    )
}

pub fn insert_sql(target: &Relation, source: &Relation, columns: &[String]) -> String {
    let cols = columns.join(", ");
    format!("INSERT INTO {target} ({cols})\nSELECT {cols} FROM {source}")
}

pub fn drop_table_sql(relation: &Relation) -> String {
    format!("DROP TABLE IF EXISTS {}", relation.ddl_name())
}
