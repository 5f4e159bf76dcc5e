//! Deleting table data files from S3.
//!
//! Dropping a partition or table in the catalog leaves its files behind, so
//! an `insert_overwrite` removes the data files of every replaced partition
//! and staging tables have their whole location removed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_types::SdkConfig;
use tracing::{debug, info};

use crate::client::AthenaError;

/// S3 DeleteObjects accepts at most this many keys per request.
const DELETE_BATCH: usize = 1000;

/// A parsed `s3://bucket/key` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub key: String,
}

impl S3Location {
    pub fn parse(uri: &str) -> Result<Self, AthenaError> {
        let rest = uri
            .strip_prefix("s3://")
            .ok_or_else(|| AthenaError::Storage(format!("not an s3:// URI: '{uri}'")))?;
        let (bucket, key) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(AthenaError::Storage(format!("missing bucket in '{uri}'")));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

/// Removes data files that back a table.
#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// Delete the given object URIs; returns how many were deleted.
    async fn delete_objects(&self, uris: &[String]) -> Result<usize, AthenaError>;

    /// Delete every object under a table location; returns how many were
    /// deleted. A location with nothing under it is not an error.
    async fn delete_prefix(&self, location: &str) -> Result<usize, AthenaError>;
}

/// Parse a table location into a bucket and a `/`-terminated key prefix.
///
/// Bucket roots are refused so a bad location can never empty a bucket.
pub fn location_prefix(location: &str) -> Result<S3Location, AthenaError> {
    let mut loc = S3Location::parse(location)?;
    if loc.key.trim_matches('/').is_empty() {
        return Err(AthenaError::Storage(format!(
            "refusing to delete bucket root '{location}'"
        )));
    }
    if !loc.key.ends_with('/') {
        loc.key.push('/');
    }
    Ok(loc)
}

/// Group URIs by bucket, keeping first-seen key order within each bucket.
pub fn group_by_bucket(uris: &[String]) -> Result<BTreeMap<String, Vec<String>>, AthenaError> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for uri in uris {
        let loc = S3Location::parse(uri)?;
        if loc.key.is_empty() {
            return Err(AthenaError::Storage(format!("refusing to delete bucket root '{uri}'")));
        }
        let keys = grouped.entry(loc.bucket).or_default();
        if !keys.contains(&loc.key) {
            keys.push(loc.key);
        }
    }
    Ok(grouped)
}

/// [`PartitionStore`] backed by `aws-sdk-s3`.
pub struct S3PartitionStore {
    client: aws_sdk_s3::Client,
}

impl S3PartitionStore {
    pub fn new(sdk_config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_s3::Client::new(sdk_config),
        }
    }

    async fn delete_keys(&self, bucket: &str, keys: &[String]) -> Result<usize, AthenaError> {
        let mut deleted = 0;
        for chunk in keys.chunks(DELETE_BATCH) {
            let objects = chunk
                .iter()
                .map(|k| ObjectIdentifier::builder().key(k).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AthenaError::Storage(e.to_string()))?;

            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(|e| AthenaError::Storage(e.to_string()))?;

            let resp = self
                .client
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| AthenaError::Storage(e.to_string()))?;

            if let Some(err) = resp.errors().first() {
                return Err(AthenaError::Storage(format!(
                    "failed to delete s3://{bucket}/{}: {}",
                    err.key().unwrap_or("?"),
                    err.message().unwrap_or("unknown error")
                )));
            }

            debug!(bucket = %bucket, count = chunk.len(), "Deleted object batch");
            deleted += chunk.len();
        }
        Ok(deleted)
    }

    /// Every key under `prefix`, following continuation tokens.
    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, AthenaError> {
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| AthenaError::Storage(e.to_string()))?;

            keys.extend(resp.contents().iter().filter_map(|o| o.key()).map(|k| k.to_string()));

            match resp.next_continuation_token() {
                Some(next) if resp.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(keys)
    }
}

#[async_trait]
impl PartitionStore for S3PartitionStore {
    async fn delete_objects(&self, uris: &[String]) -> Result<usize, AthenaError> {
        let mut deleted = 0;
        for (bucket, keys) in group_by_bucket(uris)? {
            deleted += self.delete_keys(&bucket, &keys).await?;
        }
        info!(deleted, "Deleted table data files");
        Ok(deleted)
    }

    async fn delete_prefix(&self, location: &str) -> Result<usize, AthenaError> {
        let loc = location_prefix(location)?;
        let keys = self.list_keys(&loc.bucket, &loc.key).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let deleted = self.delete_keys(&loc.bucket, &keys).await?;
        info!(location = %location, deleted, "Deleted table location");
        Ok(deleted)
    }
}
