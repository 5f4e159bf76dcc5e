//! Incremental strategy selection and partition planning.
//!
//! Two strategies are supported. `append` only adds rows. `insert_overwrite`
//! replaces the partitions that the new data touches and leaves every other
//! partition alone. Merging on a `unique_key` is not supported and is
//! rejected before anything runs.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use dbathena_core::ConfigError;

use crate::partition::PartitionValues;

/// Most partitions a single CTAS or INSERT may write.
pub const MAX_PARTITIONS_PER_QUERY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncrementalStrategy {
    Append,
    InsertOverwrite,
}

impl IncrementalStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            IncrementalStrategy::Append => "append",
            IncrementalStrategy::InsertOverwrite => "insert_overwrite",
        }
    }
}

impl fmt::Display for IncrementalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncrementalStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "append" => Ok(IncrementalStrategy::Append),
            "insert_overwrite" => Ok(IncrementalStrategy::InsertOverwrite),
            other => Err(ConfigError::Unsupported(format!(
                "incremental_strategy '{other}'; expected 'append' or 'insert_overwrite'"
            ))),
        }
    }
}

/// A `unique_key` as models write it: one column or a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UniqueKey {
    Single(String),
    Multiple(Vec<String>),
}

impl UniqueKey {
    pub fn is_empty(&self) -> bool {
        match self {
            UniqueKey::Single(s) => s.trim().is_empty(),
            UniqueKey::Multiple(v) => v.iter().all(|s| s.trim().is_empty()),
        }
    }
}

/// Incremental settings from a model's config block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncrementalConfig {
    /// Strategy name; `insert_overwrite` when unset.
    #[serde(default)]
    pub incremental_strategy: Option<String>,
    #[serde(default)]
    pub unique_key: Option<UniqueKey>,
}

impl IncrementalConfig {
    pub fn new(strategy: IncrementalStrategy) -> Self {
        Self {
            incremental_strategy: Some(strategy.as_str().to_string()),
            unique_key: None,
        }
    }

    /// Resolve the strategy, refusing configurations the adapter cannot honor.
    ///
    /// A non-empty `unique_key` is always an error: neither strategy merges,
    /// and falling back to one of them would silently change semantics.
    pub fn validate(&self) -> Result<IncrementalStrategy, ConfigError> {
        let strategy = match &self.incremental_strategy {
            Some(name) => name.parse()?,
            None => IncrementalStrategy::InsertOverwrite,
        };

        if let Some(key) = &self.unique_key {
            if !key.is_empty() {
                return Err(ConfigError::Unsupported(format!(
                    "unique_key is not supported with the '{strategy}' strategy; \
                     remove it or deduplicate in the model"
                )));
            }
        }

        Ok(strategy)
    }
}

/// What happens to each partition in an incremental run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartitionPlan {
    /// Existing partitions whose data is deleted and rewritten.
    pub replaced: Vec<PartitionValues>,
    /// Existing partitions that receive extra rows without being rewritten.
    pub appended: Vec<PartitionValues>,
    /// Partitions that do not exist yet.
    pub added: Vec<PartitionValues>,
    /// Existing partitions the new data does not touch.
    pub untouched: Vec<PartitionValues>,
}

impl PartitionPlan {
    /// Partitions the INSERT writes into.
    pub fn written(&self) -> usize {
        self.replaced.len() + self.appended.len() + self.added.len()
    }

    pub fn exceeds_partition_limit(&self) -> bool {
        self.written() > MAX_PARTITIONS_PER_QUERY
    }
}

/// Decide the fate of every partition given what exists and what arrives.
///
/// `replaced` is only ever non-empty for `insert_overwrite`, and then holds
/// exactly the intersection of `existing` and `incoming`.
pub fn plan_partitions(
    strategy: IncrementalStrategy,
    existing: &BTreeSet<PartitionValues>,
    incoming: &BTreeSet<PartitionValues>,
) -> PartitionPlan {
    let overlap: Vec<PartitionValues> = existing.intersection(incoming).cloned().collect();
    let added = incoming.difference(existing).cloned().collect();
    let untouched = existing.difference(incoming).cloned().collect();

    let (replaced, appended) = match strategy {
        IncrementalStrategy::InsertOverwrite => (overlap, Vec::new()),
        IncrementalStrategy::Append => (Vec::new(), overlap),
    };

    PartitionPlan {
        replaced,
        appended,
        added,
        untouched,
    }
}
