pub mod backend;
pub mod client;
pub mod config;
pub mod incremental;
pub mod materialize;
pub mod partition;
pub mod result;
pub mod storage;
pub mod table;

pub use backend::{AwsAthenaBackend, QueryBackend, QueryExecutionInfo, QueryRequest, QueryState, ResultPage};
pub use client::{AthenaClient, AthenaError};
pub use config::ConnectionProfile;
pub use incremental::{
    plan_partitions, IncrementalConfig, IncrementalStrategy, PartitionPlan, UniqueKey,
    MAX_PARTITIONS_PER_QUERY,
};
pub use materialize::{IncrementalModel, IncrementalRunner, RunSummary};
pub use partition::PartitionValues;
pub use result::{AthenaColumn, AthenaQueryResult, QueryMetadata};
pub use storage::{PartitionStore, S3PartitionStore};
pub use table::{FileFormat, TableConfig};
