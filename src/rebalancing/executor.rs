//! Item moves for structural rebalancing.
//!
//! Both moves follow the same order: write the copies, read them back, and
//! only then delete the originals. A failure at any step undoes the steps
//! before it so the original partition stays authoritative.

use crate::error::{Error, Result};
use crate::partitioning::{distribute_items, split_keys};
use crate::store::TableStore;
use crate::types::{Item, KeyCondition, WriteRequest};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Outcome of a split.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SplitOutcome {
    pub new_partitions: Vec<String>,
    pub items_moved: u64,
}

/// Moves items between partitions of one table.
#[derive(Debug)]
pub(crate) struct RebalanceExecutor<'a> {
    store: &'a dyn TableStore,
    table: &'a str,
    batch_size: usize,
}

impl<'a> RebalanceExecutor<'a> {
    pub fn new(store: &'a dyn TableStore, table: &'a str, batch_size: usize) -> Self {
        Self {
            store,
            table,
            batch_size: batch_size.max(1),
        }
    }

    /// Split `partition_key` into two children and retire it.
    ///
    /// The child keys are returned in the error path too, through
    /// [`split_keys`], so callers can always report them.
    pub async fn split(&self, partition_key: &str) -> Result<SplitOutcome> {
        let new_partitions = split_keys(partition_key, 2);

        for child in &new_partitions {
            if !self.items(child).await?.is_empty() {
                return Err(Error::MigrationFailure(format!(
                    "split target {} already holds items",
                    child
                )));
            }
        }

        let originals = self.items(partition_key).await?;
        let groups = distribute_items(&originals, &new_partitions);

        // Only children this split creates are dropped on rollback.
        let existing: HashSet<String> = self
            .store
            .list_partitions(self.table)
            .await?
            .into_iter()
            .map(|p| p.partition_key)
            .collect();
        let mut created = Vec::new();
        for child in new_partitions.iter().filter(|c| !existing.contains(*c)) {
            if let Err(e) = self.store.create_partition(self.table, child).await {
                self.drop_partitions(&created).await;
                return Err(e);
            }
            created.push(child.clone());
        }

        let copies: Vec<Item> = groups.into_iter().flatten().collect();
        if let Err(e) = self.copy_and_verify(&copies).await {
            self.undo_copies(&copies).await;
            self.drop_partitions(&created).await;
            return Err(e);
        }

        if let Err(e) = self.delete_items(&originals).await {
            self.restore_originals(&originals).await;
            self.undo_copies(&copies).await;
            self.drop_partitions(&created).await;
            return Err(Error::MigrationFailure(format!(
                "retiring {} failed: {}",
                partition_key, e
            )));
        }

        if let Err(e) = self.store.drop_partition(self.table, partition_key).await {
            warn!(table = self.table, partition_key, error = %e, "Failed to drop split partition");
        }

        debug!(
            table = self.table,
            partition_key,
            items = originals.len(),
            "Split partition"
        );
        Ok(SplitOutcome {
            new_partitions,
            items_moved: originals.len() as u64,
        })
    }

    /// Move `fraction` of `partition_key`'s items into `targets`.
    ///
    /// Items whose sort key already exists in the chosen target stay where
    /// they are. Returns the number of items moved.
    pub async fn redistribute(
        &self,
        partition_key: &str,
        targets: &[String],
        fraction: f64,
    ) -> Result<u64> {
        if targets.is_empty() {
            return Ok(0);
        }

        let originals = self.items(partition_key).await?;
        let count = ((originals.len() as f64) * fraction).floor() as usize;
        let count = if originals.is_empty() { 0 } else { count.max(1) };
        let moving = &originals[originals.len() - count..];

        let mut taken: Vec<HashSet<String>> = Vec::with_capacity(targets.len());
        for target in targets {
            taken.push(
                self.items(target)
                    .await?
                    .into_iter()
                    .map(|item| item.sort_key)
                    .collect(),
            );
        }

        let mut copies = Vec::new();
        let mut moved = Vec::new();
        for (slot, group) in distribute_items(moving, targets).into_iter().enumerate() {
            for copy in group {
                if taken[slot].contains(&copy.sort_key) {
                    continue;
                }
                moved.push(Item::new(partition_key, copy.sort_key.clone(), copy.payload.clone()));
                copies.push(copy);
            }
        }

        if let Err(e) = self.copy_and_verify(&copies).await {
            self.undo_copies(&copies).await;
            return Err(e);
        }

        if let Err(e) = self.delete_items(&moved).await {
            self.restore_originals(&moved).await;
            self.undo_copies(&copies).await;
            return Err(Error::MigrationFailure(format!(
                "removing moved items from {} failed: {}",
                partition_key, e
            )));
        }

        Ok(moved.len() as u64)
    }

    async fn items(&self, partition_key: &str) -> Result<Vec<Item>> {
        self.store
            .query(self.table, &KeyCondition::partition(partition_key))
            .await
    }

    async fn copy_and_verify(&self, copies: &[Item]) -> Result<()> {
        let puts = copies.iter().cloned().map(WriteRequest::Put).collect();
        self.write_batched(puts)
            .await
            .map_err(|e| Error::MigrationFailure(format!("copy failed: {}", e)))?;

        let mut partitions: Vec<&str> = copies.iter().map(|i| i.partition_key.as_str()).collect();
        partitions.sort_unstable();
        partitions.dedup();

        for partition in partitions {
            let present: HashSet<String> = self
                .items(partition)
                .await?
                .into_iter()
                .map(|item| item.sort_key)
                .collect();
            let missing = copies
                .iter()
                .filter(|c| c.partition_key == partition && !present.contains(&c.sort_key))
                .count();
            if missing > 0 {
                return Err(Error::MigrationFailure(format!(
                    "{} items missing from {} after copy",
                    missing, partition
                )));
            }
        }
        Ok(())
    }

    async fn delete_items(&self, items: &[Item]) -> Result<()> {
        self.write_batched(items.iter().map(Item::delete_request).collect())
            .await
    }

    async fn undo_copies(&self, copies: &[Item]) {
        if let Err(e) = self.delete_items(copies).await {
            warn!(table = self.table, error = %e, "Failed to remove partial copies");
        }
    }

    async fn drop_partitions(&self, partition_keys: &[String]) {
        for key in partition_keys {
            if let Err(e) = self.store.drop_partition(self.table, key).await {
                warn!(table = self.table, partition_key = %key, error = %e, "Failed to drop partition");
            }
        }
    }

    async fn restore_originals(&self, originals: &[Item]) {
        let puts = originals.iter().cloned().map(WriteRequest::Put).collect();
        if let Err(e) = self.write_batched(puts).await {
            warn!(table = self.table, error = %e, "Failed to restore original items");
        }
    }

    async fn write_batched(&self, requests: Vec<WriteRequest>) -> Result<()> {
        for chunk in requests.chunks(self.batch_size) {
            self.store.batch_write(self.table, chunk.to_vec()).await?;
        }
        Ok(())
    }
}
