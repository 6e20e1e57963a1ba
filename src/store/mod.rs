//! Collaborator contracts consumed by the coordination layer.
//!
//! The layer never talks to a concrete database. Everything it needs from the
//! outside world goes through three traits:
//!
//! - [`MetricsSource`]: consumed-capacity figures (CloudWatch-shaped), best effort
//! - [`TableStore`]: batch writes, key-condition queries and scans over items
//! - [`ArchiveStore`]: blob storage for archived partitions and snapshots
//!
//! In-memory implementations with failure injection live in
//! [`crate::testing`].

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{
    CapacityMetric, CapacityStats, IndexDescriptor, Item, KeyCondition, MetricTarget,
    MetricWindow, PartitionDescriptor, PartitionMetrics, ScanFilter, WriteRequest,
};

/// Source of consumed-capacity metrics.
///
/// Implementations may be slow or unavailable; callers bound every call with a
/// timeout and treat failures as [`crate::Error::MetricsUnavailable`].
#[async_trait]
pub trait MetricsSource: Send + Sync + std::fmt::Debug {
    /// Consumed capacity of one target over a window.
    async fn get_consumed_capacity(
        &self,
        table: &str,
        target: &MetricTarget,
        metric: CapacityMetric,
        window: &MetricWindow,
    ) -> Result<CapacityStats>;

    /// Current load sample for every partition of a table.
    async fn list_partition_metrics(
        &self,
        table: &str,
        window: &MetricWindow,
    ) -> Result<Vec<PartitionMetrics>>;
}

/// Item storage keyed by partition key and sort key.
#[async_trait]
pub trait TableStore: Send + Sync + std::fmt::Debug {
    /// Apply puts and deletes. Puts overwrite, deletes of missing items are no-ops.
    async fn batch_write(&self, table: &str, requests: Vec<WriteRequest>) -> Result<()>;

    /// Items matching a key condition, ordered by sort key.
    async fn query(&self, table: &str, condition: &KeyCondition) -> Result<Vec<Item>>;

    /// Items matching a scan filter.
    async fn scan(&self, table: &str, filter: &ScanFilter) -> Result<Vec<Item>>;

    /// Known partitions of a table.
    async fn list_partitions(&self, table: &str) -> Result<Vec<PartitionDescriptor>>;

    /// Make a partition addressable before any item is written to it.
    /// Creating an existing partition is a no-op.
    async fn create_partition(&self, table: &str, partition_key: &str) -> Result<()>;

    /// Remove an empty partition so it is no longer listed. Dropping a missing
    /// partition is a no-op; dropping one that still holds items fails.
    async fn drop_partition(&self, table: &str, partition_key: &str) -> Result<()>;

    /// Secondary indexes defined on a table.
    async fn list_indexes(&self, table: &str) -> Result<Vec<IndexDescriptor>>;
}

/// Reference to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef(pub String);

impl BlobRef {
    /// Blob key as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cold storage for archived partitions.
#[async_trait]
pub trait ArchiveStore: Send + Sync + std::fmt::Debug {
    /// Store bytes under a key, overwriting any previous blob.
    async fn put(&self, key: &str, data: Bytes) -> Result<BlobRef>;

    /// Fetch a blob; `None` when it does not exist.
    async fn get(&self, blob: &BlobRef) -> Result<Option<Bytes>>;

    /// Delete a blob; deleting a missing blob is a no-op.
    async fn delete(&self, blob: &BlobRef) -> Result<()>;
}
