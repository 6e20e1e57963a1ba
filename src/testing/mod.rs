//! In-memory collaborators and end-to-end scenarios.
//!
//! The three store traits are implemented over plain maps, each with the
//! failure injection the scenarios need:
//!
//! | Type                  | Failpoints                                          |
//! |-----------------------|-----------------------------------------------------|
//! | [`MemoryTableStore`]  | fail every write after N, fail the Nth write, fail puts by key prefix |
//! | [`MemoryMetricsSource`] | outage, slow responses                            |
//! | [`MemoryArchiveStore`]  | fail the next N puts                              |
//!
//! Batch writes are atomic: an injected failure rejects the whole batch before
//! any request is applied.

mod hot_partition_e2e_tests;
mod shard_e2e_tests;

use crate::error::{Error, Result};
use crate::store::{ArchiveStore, BlobRef, MetricsSource, TableStore};
use crate::types::{
    CapacityMetric, CapacityStats, Datapoint, IndexDescriptor, Item, KeyCondition, MetricTarget,
    MetricWindow, PartitionDescriptor, PartitionMetrics, ScanFilter, WriteRequest,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Install a test subscriber once. `RUST_LOG` overrides the default level.
#[cfg(test)]
pub(crate) fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// Table store
// ============================================================================

#[derive(Debug)]
struct PartitionMeta {
    created_at: DateTime<Utc>,
    last_write_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct TableData {
    /// Keyed by (partition key, sort key) so queries come back sorted.
    items: BTreeMap<(String, String), Item>,
    partitions: BTreeMap<String, PartitionMeta>,
    indexes: Vec<IndexDescriptor>,
}

#[derive(Debug, Default)]
struct WriteFailpoints {
    /// Writes allowed before every later write fails.
    fail_after: Option<usize>,
    /// Index of the single upcoming write that fails.
    fail_at: Option<usize>,
    /// Fail batches putting to a partition with this prefix.
    put_prefix: Option<String>,
}

impl WriteFailpoints {
    fn check(&mut self, requests: &[WriteRequest]) -> Result<()> {
        if let Some(remaining) = self.fail_after.as_mut() {
            if *remaining == 0 {
                return Err(Error::Store("injected write failure".to_string()));
            }
            *remaining -= 1;
        }

        if let Some(index) = self.fail_at {
            if index == 0 {
                self.fail_at = None;
                return Err(Error::Store("injected one-shot write failure".to_string()));
            }
            self.fail_at = Some(index - 1);
        }

        if let Some(prefix) = &self.put_prefix {
            let hit = requests.iter().any(|r| {
                matches!(r, WriteRequest::Put(item) if item.partition_key.starts_with(prefix.as_str()))
            });
            if hit {
                return Err(Error::Store(format!("injected put failure for {}", prefix)));
            }
        }
        Ok(())
    }
}

/// [`TableStore`] over in-memory maps.
///
/// Partitions stay listed once created or written, even when emptied, until
/// dropped. Writes never set `last_write_at`; use
/// [`set_last_write`](Self::set_last_write).
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: RwLock<HashMap<String, TableData>>,
    failpoints: Mutex<WriteFailpoints>,
    writes: AtomicU64,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Items stored in a table.
    pub fn item_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.items.len())
    }

    /// Partitions known in a table, including empty ones.
    pub fn partition_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.partitions.len())
    }

    /// Successful batch writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Let `n` more batch writes succeed, then fail all of them.
    pub fn fail_writes_after(&self, n: usize) {
        self.failpoints.lock().fail_after = Some(n);
    }

    /// Fail only the `n`th upcoming batch write (0-based).
    pub fn fail_write_at(&self, n: usize) {
        self.failpoints.lock().fail_at = Some(n);
    }

    /// Fail any batch containing a put to a partition starting with `prefix`.
    pub fn fail_puts_matching(&self, prefix: impl Into<String>) {
        self.failpoints.lock().put_prefix = Some(prefix.into());
    }

    pub fn clear_failures(&self) {
        *self.failpoints.lock() = WriteFailpoints::default();
    }

    /// Define a table's secondary indexes.
    pub fn set_indexes(&self, table: &str, indexes: Vec<IndexDescriptor>) {
        self.tables
            .write()
            .entry(table.to_string())
            .or_default()
            .indexes = indexes;
    }

    /// Set a partition's last write time, creating the partition if needed.
    pub fn set_last_write(&self, table: &str, partition_key: &str, at: DateTime<Utc>) {
        let mut tables = self.tables.write();
        let data = tables.entry(table.to_string()).or_default();
        data.partitions
            .entry(partition_key.to_string())
            .or_insert_with(|| PartitionMeta {
                created_at: at,
                last_write_at: None,
            })
            .last_write_at = Some(at);
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn batch_write(&self, table: &str, requests: Vec<WriteRequest>) -> Result<()> {
        self.failpoints.lock().check(&requests)?;

        let now = Utc::now();
        let mut tables = self.tables.write();
        let data = tables.entry(table.to_string()).or_default();
        for request in requests {
            match request {
                WriteRequest::Put(item) => {
                    data.partitions
                        .entry(item.partition_key.clone())
                        .or_insert_with(|| PartitionMeta {
                            created_at: now,
                            last_write_at: None,
                        });
                    data.items
                        .insert((item.partition_key.clone(), item.sort_key.clone()), item);
                }
                WriteRequest::Delete {
                    partition_key,
                    sort_key,
                } => {
                    data.items.remove(&(partition_key, sort_key));
                }
            }
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn query(&self, table: &str, condition: &KeyCondition) -> Result<Vec<Item>> {
        let tables = self.tables.read();
        let Some(data) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(data
            .items
            .values()
            .filter(|item| condition.matches(item))
            .cloned()
            .collect())
    }

    async fn scan(&self, table: &str, filter: &ScanFilter) -> Result<Vec<Item>> {
        let tables = self.tables.read();
        let Some(data) = tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(data
            .items
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect())
    }

    async fn list_partitions(&self, table: &str) -> Result<Vec<PartitionDescriptor>> {
        let tables = self.tables.read();
        let Some(data) = tables.get(table) else {
            return Ok(Vec::new());
        };

        let mut stats: HashMap<&str, (u64, u64)> = HashMap::new();
        for item in data.items.values() {
            let entry = stats.entry(item.partition_key.as_str()).or_default();
            entry.0 += 1;
            entry.1 += item.size_bytes();
        }

        Ok(data
            .partitions
            .iter()
            .map(|(key, meta)| {
                let (item_count, size_bytes) = stats.get(key.as_str()).copied().unwrap_or_default();
                PartitionDescriptor {
                    partition_key: key.clone(),
                    created_at: Some(meta.created_at),
                    last_write_at: meta.last_write_at,
                    item_count,
                    size_bytes,
                }
            })
            .collect())
    }

    async fn create_partition(&self, table: &str, partition_key: &str) -> Result<()> {
        let mut tables = self.tables.write();
        tables
            .entry(table.to_string())
            .or_default()
            .partitions
            .entry(partition_key.to_string())
            .or_insert_with(|| PartitionMeta {
                created_at: Utc::now(),
                last_write_at: None,
            });
        Ok(())
    }

    async fn drop_partition(&self, table: &str, partition_key: &str) -> Result<()> {
        let mut tables = self.tables.write();
        let Some(data) = tables.get_mut(table) else {
            return Ok(());
        };
        if data.items.keys().any(|(pk, _)| pk == partition_key) {
            return Err(Error::Store(format!(
                "partition {} still holds items",
                partition_key
            )));
        }
        data.partitions.remove(partition_key);
        Ok(())
    }

    async fn list_indexes(&self, table: &str) -> Result<Vec<IndexDescriptor>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|t| t.indexes.clone())
            .unwrap_or_default())
    }
}

// ============================================================================
// Metrics source
// ============================================================================

type CapacityKey = (String, MetricTarget, CapacityMetric);

/// [`MetricsSource`] answering from canned samples.
#[derive(Debug, Default)]
pub struct MemoryMetricsSource {
    partitions: RwLock<HashMap<String, Vec<PartitionMetrics>>>,
    capacity: RwLock<HashMap<CapacityKey, Vec<f64>>>,
    unavailable: AtomicBool,
    delay: Mutex<Duration>,
    calls: AtomicU64,
}

impl MemoryMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Samples returned by `list_partition_metrics` for a table.
    pub fn set_partition_metrics(&self, table: &str, metrics: Vec<PartitionMetrics>) {
        self.partitions.write().insert(table.to_string(), metrics);
    }

    /// Datapoint values returned for one capacity query target.
    pub fn set_capacity(&self, table: &str, target: MetricTarget, metric: CapacityMetric, values: &[f64]) {
        self.capacity
            .write()
            .insert((table.to_string(), target, metric), values.to_vec());
    }

    /// Make every call fail with `MetricsUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Delay every call by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Calls received so far.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::MetricsUnavailable("injected outage".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl MetricsSource for MemoryMetricsSource {
    async fn get_consumed_capacity(
        &self,
        table: &str,
        target: &MetricTarget,
        metric: CapacityMetric,
        window: &MetricWindow,
    ) -> Result<CapacityStats> {
        self.enter().await?;
        let key = (table.to_string(), target.clone(), metric);
        let values = self.capacity.read().get(&key).cloned().unwrap_or_default();

        let period = ChronoDuration::seconds(i64::from(window.period_secs));
        let datapoints = values
            .into_iter()
            .zip(0i32..)
            .map(|(value, i)| Datapoint {
                timestamp: window.start + period * i,
                value,
            })
            .collect();
        Ok(CapacityStats::from_datapoints(datapoints))
    }

    async fn list_partition_metrics(
        &self,
        table: &str,
        _window: &MetricWindow,
    ) -> Result<Vec<PartitionMetrics>> {
        self.enter().await?;
        Ok(self.partitions.read().get(table).cloned().unwrap_or_default())
    }
}

// ============================================================================
// Archive store
// ============================================================================

/// [`ArchiveStore`] over a map of blobs.
#[derive(Debug, Default)]
pub struct MemoryArchiveStore {
    blobs: RwLock<HashMap<String, Bytes>>,
    failing_puts: AtomicU32,
    get_calls: AtomicU64,
}

impl MemoryArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` puts with a retryable error.
    pub fn fail_next_puts(&self, n: u32) {
        self.failing_puts.store(n, Ordering::SeqCst);
    }

    pub fn clear_failures(&self) {
        self.failing_puts.store(0, Ordering::SeqCst);
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.read().len()
    }

    /// Whether a blob exists under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.blobs.read().contains_key(key)
    }

    /// `get` calls received so far.
    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Flip a byte in the middle of a stored blob.
    pub fn corrupt(&self, blob: &BlobRef) {
        let mut blobs = self.blobs.write();
        if let Some(data) = blobs.get_mut(blob.as_str()) {
            let mut bytes = data.to_vec();
            if !bytes.is_empty() {
                let mid = bytes.len() / 2;
                bytes[mid] ^= 0xff;
            }
            *data = Bytes::from(bytes);
        }
    }
}

#[async_trait]
impl ArchiveStore for MemoryArchiveStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<BlobRef> {
        let injected = self
            .failing_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::ArchiveStore(format!("injected put failure for {}", key)));
        }
        self.blobs.write().insert(key.to_string(), data);
        Ok(BlobRef(key.to_string()))
    }

    async fn get(&self, blob: &BlobRef) -> Result<Option<Bytes>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.blobs.read().get(blob.as_str()).cloned())
    }

    async fn delete(&self, blob: &BlobRef) -> Result<()> {
        self.blobs.write().remove(blob.as_str());
        Ok(())
    }
}
