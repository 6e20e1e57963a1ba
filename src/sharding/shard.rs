//! Shard descriptors.

use super::hash::HASH_SPACE;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Shard identifier. Ids are never reused.
pub type ShardId = u32;

/// Lifecycle status of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShardStatus {
    /// Serving reads and writes.
    Active,
    /// Source or target of an in-flight migration.
    Migrating,
    /// Removed from the ring; kept for bookkeeping only.
    Retired,
}

impl std::fmt::Display for ShardStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShardStatus::Active => write!(f, "ACTIVE"),
            ShardStatus::Migrating => write!(f, "MIGRATING"),
            ShardStatus::Retired => write!(f, "RETIRED"),
        }
    }
}

/// A contiguous slice `[start, end)` of the hash space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shard {
    pub id: ShardId,
    /// Inclusive start position.
    pub start: u64,
    /// Exclusive end position; at most [`HASH_SPACE`].
    pub end: u64,
    pub status: ShardStatus,
    /// Accumulated load units routed to this shard.
    pub load: f64,
    pub created_at: DateTime<Utc>,
}

impl Shard {
    pub(crate) fn new(id: ShardId, start: u64, end: u64) -> Self {
        Self {
            id,
            start,
            end,
            status: ShardStatus::Active,
            load: 0.0,
            created_at: Utc::now(),
        }
    }

    /// Number of hash positions owned.
    pub fn width(&self) -> u64 {
        self.end - self.start
    }

    /// Whether `position` falls inside the range.
    pub fn contains(&self, position: u32) -> bool {
        let p = u64::from(position);
        p >= self.start && p < self.end
    }

    /// Fraction of the hash space owned.
    pub fn coverage(&self) -> f64 {
        self.width() as f64 / HASH_SPACE as f64
    }

    /// Inclusive start as hex.
    pub fn start_hex(&self) -> String {
        format!("{:08x}", self.start)
    }

    /// Inclusive end (last owned position) as hex.
    pub fn end_hex(&self) -> String {
        format!("{:08x}", self.end.saturating_sub(1))
    }

    /// Partition key under which this shard's items are stored.
    pub fn storage_key(&self) -> String {
        storage_key(self.id)
    }
}

/// Partition key for items of shard `id`.
pub fn storage_key(id: ShardId) -> String {
    format!("shard-{:05}", id)
}
