//! Partition archival, export and restore.
//!
//! Archive layout in the blob store, per partition:
//!
//! ```text
//! {prefix}/{table}/{partition_key}/data       encoded items (LZ4 + CRC32)
//! {prefix}/{table}/{partition_key}/manifest   bincode ArchiveSnapshot
//! ```
//!
//! The manifest is written after the data blob, and live items are deleted
//! only after both are stored. A crash at any point leaves either the live
//! partition or a complete archive, never neither.

use super::codec::{decode_items, encode_items};
use crate::config::ArchiveConfig;
use crate::error::{Error, Result};
use crate::metrics::LayerMetrics;
use crate::store::{ArchiveStore, BlobRef, TableStore};
use crate::types::{Item, KeyCondition, WriteRequest};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Manifest describing one stored partition snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveSnapshot {
    /// Unique id of the export that produced this snapshot.
    pub snapshot_id: Uuid,
    pub table: String,
    pub partition_key: String,
    /// Blob holding the encoded items.
    pub blob_ref: BlobRef,
    /// Size of the uncompressed encoding.
    pub original_bytes: u64,
    /// Size of the stored blob.
    pub compressed_bytes: u64,
    pub compressed: bool,
    pub item_count: u64,
    /// CRC32 of the stored blob.
    pub checksum: u32,
    pub created_at: DateTime<Utc>,
}

impl ArchiveSnapshot {
    /// Stored size over original size.
    pub fn compression_ratio(&self) -> f64 {
        if self.original_bytes == 0 {
            1.0
        } else {
            self.compressed_bytes as f64 / self.original_bytes as f64
        }
    }
}

/// Moves partitions between the table store and the archive store.
#[derive(Debug)]
pub struct PartitionArchiver {
    store: Arc<dyn TableStore>,
    archive: Arc<dyn ArchiveStore>,
    config: ArchiveConfig,
    batch_size: usize,
    metrics: Arc<LayerMetrics>,
}

impl PartitionArchiver {
    /// Create an archiver.
    pub fn new(
        store: Arc<dyn TableStore>,
        archive: Arc<dyn ArchiveStore>,
        config: ArchiveConfig,
    ) -> Self {
        Self {
            store,
            archive,
            config,
            batch_size: 25,
            metrics: Arc::new(LayerMetrics::new()),
        }
    }

    /// Record into a shared metrics set.
    pub fn with_metrics(mut self, metrics: Arc<LayerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Set the batch size for item deletes and restores.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Table store the archiver reads from.
    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    /// Configuration.
    pub fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Write a snapshot of a partition without touching its live items.
    #[instrument(skip(self))]
    pub async fn export_partition(&self, table: &str, partition_key: &str) -> Result<ArchiveSnapshot> {
        let items = self.live_items(table, partition_key).await?;
        let snapshot = self.write_snapshot(table, partition_key, &items).await?;
        self.metrics.snapshots_exported.inc();
        info!(
            table,
            partition_key,
            items = snapshot.item_count,
            bytes = snapshot.compressed_bytes,
            "Exported partition snapshot"
        );
        Ok(snapshot)
    }

    /// Snapshot a partition, then delete its live items.
    ///
    /// Blob writes are retried per the configured policy; when they still
    /// fail the partition is left untouched and
    /// [`Error::ArchiveWriteFailure`] is returned.
    #[instrument(skip(self))]
    pub async fn archive_partition(&self, table: &str, partition_key: &str) -> Result<ArchiveSnapshot> {
        let started = Instant::now();
        let items = self.live_items(table, partition_key).await?;
        if items.is_empty() {
            // Already archived; an empty snapshot must not replace the real one.
            if let Some(existing) = self.load_snapshot(table, partition_key).await? {
                debug!(table, partition_key, "Partition empty, keeping existing snapshot");
                return Ok(existing);
            }
        }

        let snapshot = match self.write_snapshot(table, partition_key, &items).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.metrics.archive_failures.inc();
                return Err(e);
            }
        };

        let mut deleted = 0;
        for chunk in items.chunks(self.batch_size) {
            let deletes = chunk.iter().map(Item::delete_request).collect();
            if let Err(e) = self.store.batch_write(table, deletes).await {
                self.metrics.archive_failures.inc();
                warn!(table, partition_key, error = %e, "Failed to delete archived items, restoring");
                self.rewrite(table, &items[..deleted]).await;
                return Err(e);
            }
            deleted += chunk.len();
        }

        self.metrics
            .record_archive(started.elapsed(), snapshot.original_bytes);
        info!(
            table,
            partition_key,
            items = snapshot.item_count,
            original_bytes = snapshot.original_bytes,
            compressed_bytes = snapshot.compressed_bytes,
            "Archived partition"
        );
        Ok(snapshot)
    }

    /// Manifest of a partition's snapshot, if one exists.
    pub async fn load_snapshot(&self, table: &str, partition_key: &str) -> Result<Option<ArchiveSnapshot>> {
        let manifest = BlobRef(self.blob_key(table, partition_key, "manifest"));
        match self.archive.get(&manifest).await? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Rewrite a partition's items from its snapshot.
    ///
    /// A missing snapshot fails immediately with [`Error::RestoreNotFound`].
    /// Items already present are overwritten with their archived version.
    #[instrument(skip(self))]
    pub async fn restore_partition(&self, table: &str, partition_key: &str) -> Result<ArchiveSnapshot> {
        let not_found = || Error::RestoreNotFound {
            table: table.to_string(),
            partition_key: partition_key.to_string(),
        };

        let snapshot = self
            .load_snapshot(table, partition_key)
            .await?
            .ok_or_else(not_found)?;
        let data = self
            .archive
            .get(&snapshot.blob_ref)
            .await?
            .ok_or_else(not_found)?;

        let items = decode_items(&data, snapshot.compressed, snapshot.checksum)?;
        if items.len() as u64 != snapshot.item_count {
            return Err(Error::Codec(format!(
                "snapshot lists {} items, blob holds {}",
                snapshot.item_count,
                items.len()
            )));
        }

        self.store.create_partition(table, partition_key).await?;
        let puts: Vec<WriteRequest> = items.into_iter().map(WriteRequest::Put).collect();
        for chunk in puts.chunks(self.batch_size) {
            self.store.batch_write(table, chunk.to_vec()).await?;
        }

        self.metrics.partitions_restored.inc();
        info!(table, partition_key, items = snapshot.item_count, "Restored partition");
        Ok(snapshot)
    }

    /// Remove a partition's snapshot. Missing snapshots are a no-op.
    #[instrument(skip(self))]
    pub async fn delete_snapshot(&self, table: &str, partition_key: &str) -> Result<bool> {
        let Some(snapshot) = self.load_snapshot(table, partition_key).await? else {
            return Ok(false);
        };
        self.archive.delete(&snapshot.blob_ref).await?;
        self.archive
            .delete(&BlobRef(self.blob_key(table, partition_key, "manifest")))
            .await?;
        self.metrics.partitions_deleted.inc();
        debug!(table, partition_key, "Deleted partition snapshot");
        Ok(true)
    }

    /// Put items back after a partial delete. The partition must stay whole
    /// so a later archive pass snapshots every item again.
    async fn rewrite(&self, table: &str, items: &[Item]) {
        for chunk in items.chunks(self.batch_size) {
            let puts = chunk.iter().cloned().map(WriteRequest::Put).collect();
            if let Err(e) = self.store.batch_write(table, puts).await {
                warn!(table, error = %e, "Failed to restore items after partial archive");
                return;
            }
        }
    }

    async fn live_items(&self, table: &str, partition_key: &str) -> Result<Vec<Item>> {
        self.store
            .query(table, &KeyCondition::partition(partition_key))
            .await
    }

    async fn write_snapshot(
        &self,
        table: &str,
        partition_key: &str,
        items: &[Item],
    ) -> Result<ArchiveSnapshot> {
        let encoded = encode_items(items, self.config.compression)?;
        let write_failure = |e: Error| Error::ArchiveWriteFailure {
            partition_key: partition_key.to_string(),
            reason: e.to_string(),
        };

        let data_key = self.blob_key(table, partition_key, "data");
        let data = encoded.data.clone();
        let blob_ref = self
            .config
            .retry
            .run("archive data put", || self.archive.put(&data_key, data.clone()))
            .await
            .map_err(write_failure)?;

        let snapshot = ArchiveSnapshot {
            snapshot_id: Uuid::new_v4(),
            table: table.to_string(),
            partition_key: partition_key.to_string(),
            blob_ref,
            original_bytes: encoded.original_bytes,
            compressed_bytes: encoded.data.len() as u64,
            compressed: self.config.compression,
            item_count: items.len() as u64,
            checksum: encoded.checksum,
            created_at: Utc::now(),
        };

        let manifest_key = self.blob_key(table, partition_key, "manifest");
        let manifest = Bytes::from(bincode::serialize(&snapshot)?);
        self.config
            .retry
            .run("archive manifest put", || {
                self.archive.put(&manifest_key, manifest.clone())
            })
            .await
            .map_err(write_failure)?;

        Ok(snapshot)
    }

    fn blob_key(&self, table: &str, partition_key: &str, part: &str) -> String {
        format!("{}/{}/{}/{}", self.config.key_prefix, table, partition_key, part)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use crate::testing::{MemoryArchiveStore, MemoryTableStore};
    use std::time::Duration;

    async fn setup(items: usize) -> (PartitionArchiver, Arc<MemoryTableStore>, Arc<MemoryArchiveStore>) {
        let store = Arc::new(MemoryTableStore::new());
        let archive = Arc::new(MemoryArchiveStore::new());
        let puts = (0..items)
            .map(|i| WriteRequest::Put(Item::new("USER#2023-01", format!("sk-{:04}", i), vec![7u8; 32])))
            .collect();
        store.batch_write("t", puts).await.unwrap();

        let config = ArchiveConfig::default().with_retry(
            RetryPolicy::default()
                .with_max_attempts(3)
                .with_backoff(Duration::from_millis(1), Duration::from_millis(2)),
        );
        let archiver = PartitionArchiver::new(store.clone(), archive.clone(), config);
        (archiver, store, archive)
    }

    #[tokio::test]
    async fn test_archive_then_restore() {
        let (archiver, store, archive) = setup(100).await;

        let snapshot = archiver.archive_partition("t", "USER#2023-01").await.unwrap();
        assert_eq!(snapshot.item_count, 100);
        assert!(snapshot.compressed_bytes < snapshot.original_bytes);
        assert_eq!(store.item_count("t"), 0);
        assert_eq!(archive.blob_count(), 2);

        let restored = archiver.restore_partition("t", "USER#2023-01").await.unwrap();
        assert_eq!(restored.snapshot_id, snapshot.snapshot_id);
        assert_eq!(store.item_count("t"), 100);
    }

    #[tokio::test]
    async fn test_export_is_non_destructive() {
        let (archiver, store, _) = setup(10).await;
        let snapshot = archiver.export_partition("t", "USER#2023-01").await.unwrap();
        assert_eq!(snapshot.item_count, 10);
        assert_eq!(store.item_count("t"), 10);
    }

    #[tokio::test]
    async fn test_transient_blob_failure_is_retried() {
        let (archiver, store, archive) = setup(10).await;
        archive.fail_next_puts(2);
        archiver.archive_partition("t", "USER#2023-01").await.unwrap();
        assert_eq!(store.item_count("t"), 0);
    }

    #[tokio::test]
    async fn test_persistent_blob_failure_keeps_items() {
        let (archiver, store, archive) = setup(10).await;
        archive.fail_next_puts(100);
        let err = archiver.archive_partition("t", "USER#2023-01").await.unwrap_err();
        assert!(matches!(err, Error::ArchiveWriteFailure { .. }));
        assert_eq!(store.item_count("t"), 10);
    }

    #[tokio::test]
    async fn test_partial_delete_puts_items_back() {
        let (archiver, store, _) = setup(60).await;
        store.fail_write_at(1);

        let err = archiver.archive_partition("t", "USER#2023-01").await.unwrap_err();
        assert!(matches!(err, Error::Store(_)));
        assert_eq!(store.item_count("t"), 60);
    }

    #[tokio::test]
    async fn test_empty_partition_keeps_snapshot() {
        let (archiver, _, _) = setup(10).await;
        let first = archiver.archive_partition("t", "USER#2023-01").await.unwrap();
        let again = archiver.archive_partition("t", "USER#2023-01").await.unwrap();
        assert_eq!(again.snapshot_id, first.snapshot_id);
        assert_eq!(again.item_count, 10);
    }

    #[tokio::test]
    async fn test_restore_missing_snapshot() {
        let (archiver, _, archive) = setup(0).await;
        let err = archiver.restore_partition("t", "USER#1999-01").await.unwrap_err();
        assert!(matches!(err, Error::RestoreNotFound { .. }));
        assert_eq!(archive.get_calls(), 1);
    }

    #[tokio::test]
    async fn test_corrupted_blob_rejected() {
        let (archiver, _, archive) = setup(20).await;
        let snapshot = archiver.archive_partition("t", "USER#2023-01").await.unwrap();
        archive.corrupt(&snapshot.blob_ref);

        let err = archiver.restore_partition("t", "USER#2023-01").await.unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. } | Error::Codec(_)));
    }

    #[tokio::test]
    async fn test_delete_snapshot() {
        let (archiver, _, archive) = setup(5).await;
        archiver.archive_partition("t", "USER#2023-01").await.unwrap();
        assert!(archiver.delete_snapshot("t", "USER#2023-01").await.unwrap());
        assert!(!archiver.delete_snapshot("t", "USER#2023-01").await.unwrap());
        assert_eq!(archive.blob_count(), 0);
    }
}
