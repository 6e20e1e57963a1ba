//! Per-partition mutual exclusion.
//!
//! Rebalancing and lifecycle actions on the same partition must not overlap.
//! Locks are non-blocking: a caller that finds the partition busy gives up and
//! reports it instead of queueing.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::trace;

/// Lock table keyed by (table, partition key).
#[derive(Debug, Default)]
pub struct PartitionLocks {
    held: DashMap<(String, String), Instant>,
}

impl PartitionLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shareable lock table.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Take the lock for a partition, or `None` if it is held.
    ///
    /// The lock is released when the guard drops.
    pub fn try_acquire(&self, table: &str, partition_key: &str) -> Option<PartitionGuard<'_>> {
        let key = (table.to_string(), partition_key.to_string());
        match self.held.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                trace!(table, partition_key, "Partition lock acquired");
                Some(PartitionGuard { locks: self, key })
            }
        }
    }

    /// Whether a partition is locked.
    pub fn is_locked(&self, table: &str, partition_key: &str) -> bool {
        self.held
            .contains_key(&(table.to_string(), partition_key.to_string()))
    }

    /// Number of held locks.
    pub fn held_count(&self) -> usize {
        self.held.len()
    }
}

/// Releases its partition lock on drop.
#[derive(Debug)]
pub struct PartitionGuard<'a> {
    locks: &'a PartitionLocks,
    key: (String, String),
}

impl PartitionGuard<'_> {
    /// Partition key this guard protects.
    pub fn partition_key(&self) -> &str {
        &self.key.1
    }
}

impl Drop for PartitionGuard<'_> {
    fn drop(&mut self) {
        if let Some((_, acquired)) = self.locks.held.remove(&self.key) {
            trace!(
                table = %self.key.0,
                partition_key = %self.key.1,
                held_ms = acquired.elapsed().as_millis() as u64,
                "Partition lock released"
            );
        }
    }
}
