//! Time-based partitioning of entity data.
//!
//! Writes for an entity type are spread over time buckets so that no single
//! partition key absorbs all traffic. The partitioner is pure key arithmetic
//! plus two table-level passes (hot detection and archival).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TimeBasedPartitioner                      │
//! │                                                             │
//! │  ("USER", 2024-03-15T13:45, Monthly) ──► "USER#2024-03"     │
//! │                                                             │
//! │  range [2024-01-15, 2024-03-15]                             │
//! │      ──► ["2024-01", "2024-02", "2024-03"]                  │
//! │                                                             │
//! │  split "USER#2024-03" ──► "USER#2024-03#0"                  │
//! │                           "USER#2024-03#1"                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use shardplane::partitioning::{Granularity, TimeBasedPartitioner};
//!
//! let partitioner = TimeBasedPartitioner::default();
//! let key = partitioner.generate_partition_key("USER", chrono::Utc::now(), Granularity::Monthly);
//! ```

mod distribute;
mod time;

pub use distribute::{distribute_items, split_keys};
pub use time::{
    bucket_bounds, entity_of, partition_key, ArchiveSummary, Granularity, TimeBasedPartitioner,
    KEY_SEPARATOR,
};

pub(crate) use time::last_activity;
