//! Partition and shard coordination for key-value tables.
//!
//! This crate sits between an application and a partitioned table store and
//! keeps the data layout healthy:
//! - **Time-based partitioning** spreads an entity's writes over time buckets
//! - **Consistent-hash sharding** with online shard split and merge
//! - **Hot-partition rebalancing** by split, redistribute, cache or throttle
//! - **Partition lifecycle** from creation ahead of writes to archive and delete
//! - **Index review** of secondary-index utilization and cost
//!
//! The layer never talks to a database directly. Storage, metrics and cold
//! storage are reached through the traits in [`store`]; in-memory versions
//! with failure injection live in [`testing`].
//!
//! # Example
//!
//! ```rust,no_run
//! use shardplane::config::{HotPartitionConfig, ShardConfig};
//! use shardplane::rebalancing::HotPartitionManager;
//! use shardplane::sharding::ShardManager;
//! use shardplane::testing::{MemoryMetricsSource, MemoryTableStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryTableStore::new());
//!
//!     // Hash-sharded key space with four shards
//!     let shards = ShardManager::new(ShardConfig::new(4), store.clone())?;
//!     shards.put_item("tenant-1:order-42", "pending").await?;
//!     shards.add_shard().await?;
//!
//!     // Watch a table for hot partitions
//!     let source = Arc::new(MemoryMetricsSource::new());
//!     let hot = Arc::new(HotPartitionManager::new(
//!         HotPartitionConfig::default(),
//!         source,
//!         store,
//!     ));
//!     hot.start_monitoring("events");
//!
//!     hot.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Application Layer                         │
//! └──────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//! ┌────────────────┐  ┌───────────────────┐  ┌──────────────────┐
//! │ ShardManager   │  │ HotPartition      │  │ PartitionLifecycle│
//! │ hash ring,     │  │ Manager           │  │ Manager           │
//! │ split / merge  │  │ detect, rebalance │  │ rules, archive    │
//! └────────────────┘  └───────────────────┘  └──────────────────┘
//!          │                    │   shared locks + registry │
//!          ▼                    ▼                     ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │        TableStore  ·  MetricsSource  ·  ArchiveStore          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Consistency Model
//!
//! - **Shard migrations**: copy, verify, cut over, then delete; a failed copy
//!   leaves the topology untouched
//! - **Rebalances**: copies are verified before originals are removed and every
//!   failure rolls back
//! - **Lifecycle**: a partition is only emptied after its snapshot is stored

pub mod config;
pub mod error;
pub mod index;
pub mod lifecycle;
pub mod metrics;
pub mod monitor;
pub mod partitioning;
pub mod rebalancing;
pub mod retry;
pub mod sharding;
pub mod store;
pub mod testing;
pub mod types;

// Re-exports for convenience
pub use config::{
    ArchiveConfig, CoordinatorConfig, HotPartitionConfig, HotPartitionThresholds, IndexConfig,
    LifecycleConfig, PartitionerConfig, ShardConfig,
};
pub use error::{Error, Result};
pub use types::{
    CapacityMetric, IndexDescriptor, Item, KeyCondition, MetricTarget, MetricWindow,
    PartitionDescriptor, PartitionMetrics, ScanFilter, WriteRequest,
};

pub use index::IndexManager;
pub use lifecycle::{PartitionArchiver, PartitionLifecycleManager, PartitionState};
pub use partitioning::{Granularity, TimeBasedPartitioner};
pub use rebalancing::{HotPartitionManager, RebalanceEvent, RebalanceStrategy};
pub use sharding::{HashAlgorithm, ShardManager};
pub use store::{ArchiveStore, BlobRef, MetricsSource, TableStore};

pub use metrics::LayerMetrics;
pub use retry::RetryPolicy;
