//! Partition state machine and registry.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Lifecycle state of a partition.
///
/// ```text
/// CREATED → ACTIVE ⇄ HOT → REBALANCING → ACTIVE
///             │
///             ▼
///        ARCHIVING → ARCHIVED → RESTORING → ACTIVE
///             │          │          │
///          (ACTIVE)      ▼      (ARCHIVED)
///                     DELETED
/// ```
///
/// Edges in parentheses are rollbacks after a failed step. `DELETED` is
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartitionState {
    Created,
    Active,
    Hot,
    Rebalancing,
    Archiving,
    Archived,
    Restoring,
    Deleted,
}

impl PartitionState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(&self, next: PartitionState) -> bool {
        use PartitionState::*;
        matches!(
            (self, next),
            (Created, Active)
                | (Created, Archiving)
                | (Active, Hot)
                | (Active, Archiving)
                | (Hot, Rebalancing)
                | (Hot, Active)
                | (Rebalancing, Active)
                | (Archiving, Archived)
                | (Archiving, Active)
                | (Archived, Restoring)
                | (Archived, Deleted)
                | (Restoring, Active)
                | (Restoring, Archived)
        )
    }

    /// Whether no transition leaves this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PartitionState::Deleted)
    }

    /// Whether the partition's live data is in cold storage.
    pub fn is_archived(&self) -> bool {
        matches!(self, PartitionState::Archived | PartitionState::Deleted)
    }
}

impl std::fmt::Display for PartitionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PartitionState::Created => "CREATED",
            PartitionState::Active => "ACTIVE",
            PartitionState::Hot => "HOT",
            PartitionState::Rebalancing => "REBALANCING",
            PartitionState::Archiving => "ARCHIVING",
            PartitionState::Archived => "ARCHIVED",
            PartitionState::Restoring => "RESTORING",
            PartitionState::Deleted => "DELETED",
        };
        f.write_str(s)
    }
}

/// Registry entry for one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub state: PartitionState,
    pub updated_at: DateTime<Utc>,
    /// When the partition entered `Archived`, if it has.
    pub archived_at: Option<DateTime<Utc>>,
}

/// States of known partitions, keyed by (table, partition key).
///
/// Partitions the registry has never seen are treated as `Active`: they exist
/// in the table store but were created outside this layer.
#[derive(Debug, Default)]
pub struct PartitionRegistry {
    records: DashMap<(String, String), PartitionRecord>,
}

impl PartitionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, `Active` when unknown.
    pub fn state(&self, table: &str, partition_key: &str) -> PartitionState {
        self.get(table, partition_key)
            .map_or(PartitionState::Active, |r| r.state)
    }

    /// Record for a partition, if registered.
    pub fn get(&self, table: &str, partition_key: &str) -> Option<PartitionRecord> {
        self.records
            .get(&(table.to_string(), partition_key.to_string()))
            .map(|r| r.clone())
    }

    /// Whether the partition has been registered.
    pub fn contains(&self, table: &str, partition_key: &str) -> bool {
        self.records
            .contains_key(&(table.to_string(), partition_key.to_string()))
    }

    /// Register a partition in `state` unless it is already known.
    ///
    /// Returns `true` if it was newly registered.
    pub fn register(&self, table: &str, partition_key: &str, state: PartitionState) -> bool {
        let key = (table.to_string(), partition_key.to_string());
        let mut inserted = false;
        self.records.entry(key).or_insert_with(|| {
            inserted = true;
            PartitionRecord {
                state,
                updated_at: Utc::now(),
                archived_at: None,
            }
        });
        inserted
    }

    /// Move a partition to `to`, validating the transition.
    pub fn transition(&self, table: &str, partition_key: &str, to: PartitionState) -> Result<PartitionState> {
        let key = (table.to_string(), partition_key.to_string());
        let now = Utc::now();
        let mut entry = self.records.entry(key).or_insert_with(|| PartitionRecord {
            state: PartitionState::Active,
            updated_at: now,
            archived_at: None,
        });

        let from = entry.state;
        if !from.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                partition_key: partition_key.to_string(),
                from,
                to,
            });
        }

        entry.state = to;
        entry.updated_at = now;
        if to == PartitionState::Archived && from == PartitionState::Archiving {
            entry.archived_at = Some(now);
        }
        debug!(table, partition_key, %from, %to, "Partition state changed");
        Ok(from)
    }

    /// Move a partition to `to` only if it is currently in `from`.
    ///
    /// Returns `false` without error when the current state differs.
    pub fn transition_if(
        &self,
        table: &str,
        partition_key: &str,
        from: PartitionState,
        to: PartitionState,
    ) -> Result<bool> {
        if self.state(table, partition_key) != from {
            return Ok(false);
        }
        self.transition(table, partition_key, to).map(|_| true)
    }

    /// Overwrite when a partition was archived.
    #[cfg(test)]
    pub(crate) fn set_archived_at(&self, table: &str, partition_key: &str, at: DateTime<Utc>) {
        if let Some(mut record) = self
            .records
            .get_mut(&(table.to_string(), partition_key.to_string()))
        {
            record.archived_at = Some(at);
        }
    }

    /// Drop a partition from the registry.
    pub fn forget(&self, table: &str, partition_key: &str) -> Option<PartitionRecord> {
        self.records
            .remove(&(table.to_string(), partition_key.to_string()))
            .map(|(_, r)| r)
    }

    /// Registered partitions of a table in `state`, sorted by key.
    pub fn partitions_in(&self, table: &str, state: PartitionState) -> Vec<String> {
        let mut keys: Vec<String> = self
            .records
            .iter()
            .filter(|e| e.key().0 == table && e.value().state == state)
            .map(|e| e.key().1.clone())
            .collect();
        keys.sort();
        keys
    }
}
