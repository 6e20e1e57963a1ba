//! Shard manager: key routing, topology changes and key migration.
//!
//! Items routed through the manager are stored in the shard table under a
//! shard-qualified partition key (`shard-00003`) with the caller's key as sort
//! key. Moving a range between shards is a four-step migration:
//!
//! 1. **Quiesce**: mark the source `Migrating`; new writes to it wait.
//! 2. **Copy**: batch-put the affected items under the target shard.
//! 3. **Verify**: read the target back and check every copied key is there.
//! 4. **Cutover + retire**: swap the ring, release writers, then delete the
//!    source copies.
//!
//! A failure before cutover deletes the partial copies and leaves the ring
//! untouched. A failure while retiring leaves harmless strays that
//! [`ShardManager::reclaim_stray_items`] removes later.

use super::hash::HashAlgorithm;
use super::ring::ShardRing;
use super::shard::{storage_key, Shard, ShardId, ShardStatus};
use crate::config::ShardConfig;
use crate::error::{Error, Result};
use crate::metrics::LayerMetrics;
use crate::store::TableStore;
use crate::types::{Item, KeyCondition, WriteRequest};
use bytes::Bytes;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tracing::{debug, error, info, instrument, warn};

/// Shard counts and load dispersion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardStatistics {
    /// Shards in the ring (active or migrating).
    pub total_shards: usize,
    pub active_shards: usize,
    pub migrating_shards: usize,
    /// Shards removed from the ring.
    pub retired_shards: usize,
    /// Normalized load dispersion in `[0, 1]`; 0 is perfectly balanced.
    pub load_balance: f64,
}

/// Normalized dispersion of per-shard load density.
///
/// Each sample is `(load, coverage)`. Load is assumed spread evenly over a
/// shard's range, so shards are compared by load per unit of coverage. The
/// coverage-weighted coefficient of variation is divided by its maximum,
/// `sqrt((1 - c) / c)` for the smallest coverage `c`, reached when that shard
/// carries all the load. With equal ranges this is `CV(load) / sqrt(n - 1)`.
pub fn load_balance(samples: &[(f64, f64)]) -> f64 {
    let total_load: f64 = samples.iter().map(|(load, _)| load).sum();
    let total_coverage: f64 = samples.iter().map(|(_, coverage)| coverage).sum();
    if samples.len() <= 1 || total_load <= 0.0 || total_coverage <= 0.0 {
        return 0.0;
    }

    let mut variance = 0.0;
    let mut smallest = 1.0f64;
    for (load, coverage) in samples {
        let share = coverage / total_coverage;
        if share <= 0.0 {
            continue;
        }
        smallest = smallest.min(share);
        variance += share * (load / share - total_load).powi(2);
    }
    if smallest >= 1.0 {
        return 0.0;
    }

    let cv = variance.sqrt() / total_load;
    (cv / ((1.0 - smallest) / smallest).sqrt()).clamp(0.0, 1.0)
}

/// Owns the shard ring and moves keys when it changes.
#[derive(Debug)]
pub struct ShardManager {
    config: ShardConfig,
    store: Arc<dyn TableStore>,

    ring: RwLock<ShardRing>,
    retired: RwLock<Vec<Shard>>,
    next_id: AtomicU32,

    /// Serializes topology changes.
    topology: AsyncMutex<()>,

    /// Held shared by writers and exclusively while marking shards migrating,
    /// so no write is in flight to a shard when its copy starts.
    write_gate: AsyncRwLock<()>,

    /// Shards currently being migrated.
    migrating: watch::Sender<BTreeSet<ShardId>>,

    metrics: Arc<LayerMetrics>,
}

impl ShardManager {
    /// Create a manager with `config.shard_count` equal-width shards.
    pub fn new(config: ShardConfig, store: Arc<dyn TableStore>) -> Result<Self> {
        let ring = ShardRing::new(config.shard_count, config.hash_algorithm)?;
        let (migrating, _) = watch::channel(BTreeSet::new());
        let metrics = Arc::new(LayerMetrics::new());
        metrics.shards.set(ring.len() as i64);

        info!(
            shards = config.shard_count,
            hash = %config.hash_algorithm,
            table = %config.shard_table,
            "Created shard manager"
        );

        Ok(Self {
            next_id: AtomicU32::new(config.shard_count),
            config,
            store,
            ring: RwLock::new(ring),
            retired: RwLock::new(Vec::new()),
            topology: AsyncMutex::new(()),
            write_gate: AsyncRwLock::new(()),
            migrating,
            metrics,
        })
    }

    /// Record into a shared metrics set.
    pub fn with_metrics(mut self, metrics: Arc<LayerMetrics>) -> Self {
        metrics.shards.set(self.ring.read().len() as i64);
        self.metrics = metrics;
        self
    }

    /// Configuration.
    pub fn config(&self) -> &ShardConfig {
        &self.config
    }

    /// Hash algorithm placing keys on the ring.
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.ring.read().algorithm()
    }

    /// Shard owning `key` under the current topology.
    pub fn get_shard_for_key(&self, key: &str) -> ShardId {
        self.ring.read().shard_for(key.as_bytes())
    }

    /// Shard by id, including retired shards.
    pub fn shard(&self, id: ShardId) -> Option<Shard> {
        if let Some(shard) = self.ring.read().get(id) {
            return Some(shard.clone());
        }
        self.retired.read().iter().find(|s| s.id == id).cloned()
    }

    /// Shards in the ring, ordered by range start.
    pub fn shards(&self) -> Vec<Shard> {
        self.ring.read().shards().into_iter().cloned().collect()
    }

    /// Shards removed from the ring.
    pub fn retired_shards(&self) -> Vec<Shard> {
        self.retired.read().clone()
    }

    /// Add `units` of load to the shard owning `key`.
    pub fn record_load(&self, key: &str, units: f64) -> ShardId {
        let mut ring = self.ring.write();
        let id = ring.shard_for(key.as_bytes());
        if let Some(shard) = ring.get_mut(id) {
            shard.load += units;
        }
        id
    }

    /// Counts and load dispersion of the current topology.
    pub fn get_shard_statistics(&self) -> ShardStatistics {
        let ring = self.ring.read();
        let shards = ring.shards();
        let samples: Vec<(f64, f64)> = shards.iter().map(|s| (s.load, s.coverage())).collect();
        let migrating = shards
            .iter()
            .filter(|s| s.status == ShardStatus::Migrating)
            .count();

        let stats = ShardStatistics {
            total_shards: shards.len(),
            active_shards: shards.len() - migrating,
            migrating_shards: migrating,
            retired_shards: self.retired.read().len(),
            load_balance: load_balance(&samples),
        };
        self.metrics.load_balance.set(stats.load_balance);
        stats
    }

    /// Store `payload` under `key` on its owning shard.
    ///
    /// Waits while the owning shard is migrating, at most
    /// `cutover_timeout`; past that the write fails with [`Error::Timeout`].
    pub async fn put_item(&self, key: &str, payload: impl Into<Bytes>) -> Result<ShardId> {
        let payload = payload.into();
        let (shard_id, _gate) =
            tokio::time::timeout(self.config.cutover_timeout, self.acquire_write(key)).await??;

        let item = Item::new(storage_key(shard_id), key, payload);
        self.store
            .batch_write(&self.config.shard_table, vec![WriteRequest::Put(item)])
            .await?;

        if let Some(shard) = self.ring.write().get_mut(shard_id) {
            shard.load += 1.0;
        }
        Ok(shard_id)
    }

    /// Payload stored under `key`, if any.
    pub async fn get_item(&self, key: &str) -> Result<Option<Bytes>> {
        let shard_id = self.get_shard_for_key(key);
        let condition = KeyCondition::partition(storage_key(shard_id)).with_sort_prefix(key);
        let items = self.store.query(&self.config.shard_table, &condition).await?;
        Ok(items
            .into_iter()
            .find(|item| item.sort_key == key)
            .map(|item| item.payload))
    }

    async fn acquire_write(&self, key: &str) -> Result<(ShardId, tokio::sync::RwLockReadGuard<'_, ()>)> {
        let mut rx = self.migrating.subscribe();
        loop {
            let blocked = {
                let migrating = rx.borrow_and_update();
                migrating.contains(&self.get_shard_for_key(key))
            };
            if blocked {
                rx.changed()
                    .await
                    .map_err(|_| Error::Internal("migration channel closed".to_string()))?;
                continue;
            }

            let gate = self.write_gate.read().await;
            let shard_id = self.get_shard_for_key(key);
            if !self.migrating.borrow().contains(&shard_id) {
                return Ok((shard_id, gate));
            }
        }
    }

    /// Carve a new shard out of the most loaded one and migrate its keys.
    ///
    /// Returns the new shard. On failure the ring is unchanged and the
    /// partial copies are removed.
    #[instrument(skip(self))]
    pub async fn add_shard(&self) -> Result<Shard> {
        let _topology = self.topology.lock().await;

        let (source, split_at, end) = {
            let ring = self.ring.read();
            let source = ring
                .split_candidate()
                .ok_or_else(|| Error::Internal("no active shard to split".to_string()))?;
            let (split_at, end) = ring.split_range(source)?;
            (source, split_at, end)
        };
        let new_id = self.next_id.fetch_add(1, Ordering::SeqCst);

        info!(
            source,
            new_shard = new_id,
            split_at = format_args!("{:08x}", split_at),
            "Adding shard"
        );

        let started = Instant::now();
        self.begin_migration(&[source]).await;

        let outcome = async {
            let items = self.shard_items(source).await?;
            let moving: Vec<Item> = {
                let ring = self.ring.read();
                items
                    .iter()
                    .filter(|item| {
                        let p = u64::from(ring.position(item.sort_key.as_bytes()));
                        p >= split_at && p < end
                    })
                    .cloned()
                    .collect()
            };
            self.copy_and_verify(&moving, new_id).await?;
            Ok::<_, Error>(moving)
        }
        .await;

        let moving = match outcome {
            Ok(v) => v,
            Err(e) => {
                self.abort_migration(&[source], new_id, started).await;
                error!(source, new_shard = new_id, error = %e, "Shard split rolled back");
                return Err(Error::MigrationFailure(format!(
                    "split of shard {} failed: {}",
                    source, e
                )));
            }
        };

        // Cutover. Load follows the range: the new shard takes the share of
        // the source's load that its share of the range represents.
        let new_shard = {
            let mut ring = self.ring.write();
            let source_width = ring.get(source).map_or(0, Shard::width);
            ring.apply_split(source, new_id, split_at)?;
            let fraction = if source_width > 0 {
                (end - split_at) as f64 / source_width as f64
            } else {
                0.0
            };
            let moved_load = ring.get(source).map_or(0.0, |s| s.load * fraction);
            if let Some(shard) = ring.get_mut(source) {
                shard.load -= moved_load;
            }
            let shard = ring
                .get_mut(new_id)
                .ok_or(Error::ShardNotFound(new_id))?;
            shard.load = moved_load;
            shard.clone()
        };
        self.end_migration(&[source]);

        self.retire_source_copies(source, &moving).await;

        self.metrics.shards.inc();
        self.metrics
            .record_migration(true, started.elapsed(), moving.len() as u64);
        info!(
            source,
            new_shard = new_id,
            items_moved = moving.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Shard added"
        );
        Ok(new_shard)
    }

    /// Merge shard `id` into an adjacent shard and retire it.
    ///
    /// Every key of the removed shard is migrated. The last shard cannot be
    /// removed.
    #[instrument(skip(self))]
    pub async fn remove_shard(&self, id: ShardId) -> Result<Shard> {
        let _topology = self.topology.lock().await;

        let target = self.ring.read().merge_target(id)?;
        info!(shard_id = id, target, "Removing shard");

        let started = Instant::now();
        self.begin_migration(&[id]).await;

        let outcome = async {
            let items = self.shard_items(id).await?;
            self.copy_and_verify(&items, target).await?;
            Ok::<_, Error>(items)
        }
        .await;

        let moving = match outcome {
            Ok(items) => items,
            Err(e) => {
                self.abort_migration(&[id], target, started).await;
                error!(shard_id = id, target, error = %e, "Shard removal rolled back");
                return Err(Error::MigrationFailure(format!(
                    "removal of shard {} failed: {}",
                    id, e
                )));
            }
        };

        let retired = {
            let mut ring = self.ring.write();
            let mut removed = ring.apply_merge(id, target)?;
            if let Some(shard) = ring.get_mut(target) {
                shard.load += removed.load;
            }
            removed.status = ShardStatus::Retired;
            removed
        };
        self.retired.write().push(retired.clone());
        self.end_migration(&[id]);

        self.retire_source_copies(id, &moving).await;

        self.metrics.shards.dec();
        self.metrics
            .record_migration(true, started.elapsed(), moving.len() as u64);
        info!(
            shard_id = id,
            target,
            items_moved = moving.len(),
            "Shard removed"
        );
        Ok(retired)
    }

    /// Delete items stored under shard `id` that the ring no longer routes
    /// there. Strays missing from their owning shard are copied over first.
    ///
    /// Returns the number of items removed. Idempotent.
    #[instrument(skip(self))]
    pub async fn reclaim_stray_items(&self, id: ShardId) -> Result<usize> {
        let _topology = self.topology.lock().await;

        let items = self.shard_items(id).await?;
        let mut strays: HashMap<ShardId, Vec<Item>> = HashMap::new();
        {
            let ring = self.ring.read();
            for item in items {
                let owner = ring.shard_for(item.sort_key.as_bytes());
                if owner != id {
                    strays.entry(owner).or_default().push(item);
                }
            }
        }

        let mut reclaimed = 0;
        for (owner, items) in strays {
            let present: HashSet<String> = self
                .shard_items(owner)
                .await?
                .into_iter()
                .map(|item| item.sort_key)
                .collect();
            let missing: Vec<WriteRequest> = items
                .iter()
                .filter(|item| !present.contains(&item.sort_key))
                .map(|item| WriteRequest::Put(item.with_partition(storage_key(owner))))
                .collect();
            if !missing.is_empty() {
                warn!(shard_id = id, owner, count = missing.len(), "Copying strays missing from owner");
                self.write_batched(missing).await?;
            }

            let deletes: Vec<WriteRequest> = items.iter().map(Item::delete_request).collect();
            reclaimed += deletes.len();
            self.write_batched(deletes).await?;
        }

        if reclaimed > 0 {
            info!(shard_id = id, reclaimed, "Reclaimed stray items");
        }
        Ok(reclaimed)
    }

    async fn shard_items(&self, id: ShardId) -> Result<Vec<Item>> {
        self.store
            .query(&self.config.shard_table, &KeyCondition::partition(storage_key(id)))
            .await
    }

    async fn begin_migration(&self, shards: &[ShardId]) {
        let _gate = self.write_gate.write().await;
        {
            let mut ring = self.ring.write();
            for id in shards {
                if let Some(shard) = ring.get_mut(*id) {
                    shard.status = ShardStatus::Migrating;
                }
            }
        }
        self.migrating.send_modify(|set| set.extend(shards.iter().copied()));
    }

    fn end_migration(&self, shards: &[ShardId]) {
        {
            let mut ring = self.ring.write();
            for id in shards {
                if let Some(shard) = ring.get_mut(*id) {
                    shard.status = ShardStatus::Active;
                }
            }
        }
        self.migrating.send_modify(|set| {
            for id in shards {
                set.remove(id);
            }
        });
    }

    async fn abort_migration(&self, shards: &[ShardId], target: ShardId, started: Instant) {
        // Only copies are removed: the target may be a live shard with its own items.
        if let Err(e) = self.delete_copies(shards, target).await {
            warn!(target, error = %e, "Failed to remove partial copies, reclaim later");
        }
        self.end_migration(shards);
        self.metrics.record_migration(false, started.elapsed(), 0);
    }

    async fn delete_copies(&self, sources: &[ShardId], target: ShardId) -> Result<()> {
        let mut copied = Vec::new();
        for source in sources {
            let keys: HashSet<String> = self
                .shard_items(*source)
                .await?
                .into_iter()
                .map(|item| item.sort_key)
                .collect();
            copied.extend(
                self.shard_items(target)
                    .await?
                    .into_iter()
                    .filter(|item| keys.contains(&item.sort_key))
                    .map(|item| item.delete_request()),
            );
        }
        self.write_batched(copied).await
    }

    async fn copy_and_verify(&self, items: &[Item], target: ShardId) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let target_key = storage_key(target);
        let puts: Vec<WriteRequest> = items
            .iter()
            .map(|item| WriteRequest::Put(item.with_partition(target_key.as_str())))
            .collect();
        self.write_batched(puts).await?;

        let present: HashSet<String> = self
            .shard_items(target)
            .await?
            .into_iter()
            .map(|item| item.sort_key)
            .collect();
        let missing = items
            .iter()
            .filter(|item| !present.contains(&item.sort_key))
            .count();
        if missing > 0 {
            return Err(Error::MigrationFailure(format!(
                "{} of {} items missing from shard {} after copy",
                missing,
                items.len(),
                target
            )));
        }

        debug!(target, items = items.len(), "Copied and verified items");
        Ok(())
    }

    async fn retire_source_copies(&self, source: ShardId, moved: &[Item]) {
        let deletes: Vec<WriteRequest> = moved.iter().map(Item::delete_request).collect();
        if let Err(e) = self.write_batched(deletes).await {
            warn!(
                shard_id = source,
                error = %e,
                "Failed to delete migrated items from source, reclaim later"
            );
        }
    }

    async fn write_batched(&self, requests: Vec<WriteRequest>) -> Result<()> {
        for chunk in requests.chunks(self.config.batch_size.max(1)) {
            self.store
                .batch_write(&self.config.shard_table, chunk.to_vec())
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryTableStore;

    fn manager(shards: u32) -> (ShardManager, Arc<MemoryTableStore>) {
        let store = Arc::new(MemoryTableStore::new());
        let manager = ShardManager::new(ShardConfig::new(shards), store.clone()).unwrap();
        (manager, store)
    }

    fn even(loads: &[f64]) -> Vec<(f64, f64)> {
        let coverage = 1.0 / loads.len() as f64;
        loads.iter().map(|load| (*load, coverage)).collect()
    }

    #[test]
    fn test_load_balance_score() {
        assert_eq!(load_balance(&[]), 0.0);
        assert_eq!(load_balance(&even(&[5.0])), 0.0);
        assert_eq!(load_balance(&even(&[0.0, 0.0, 0.0])), 0.0);
        assert_eq!(load_balance(&even(&[3.0, 3.0, 3.0, 3.0])), 0.0);
        assert!((load_balance(&even(&[10.0, 0.0, 0.0, 0.0])) - 1.0).abs() < 1e-9);

        let mid = load_balance(&even(&[6.0, 2.0, 2.0, 2.0]));
        assert!(mid > 0.0 && mid < 1.0);
        // CV(load) / sqrt(n - 1) for equal ranges.
        let cv = (3.0f64).sqrt() / 3.0;
        assert!((mid - cv / (3.0f64).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_load_balance_weighs_by_coverage() {
        // Half the load on half the range is as balanced as it gets.
        assert!(load_balance(&[(50.0, 0.5), (25.0, 0.25), (25.0, 0.25)]) < 1e-9);
        // All load on the narrowest shard is the worst case.
        let worst = load_balance(&[(0.0, 0.5), (0.0, 0.25), (100.0, 0.25)]);
        assert!((worst - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_adding_shards_never_raises_load_balance() {
        let (manager, store) = manager(4);
        for i in 0..4000 {
            manager.put_item(&format!("user:{}", i), vec![1u8]).await.unwrap();
        }
        let start = manager.get_shard_statistics().load_balance;

        let mut previous = start;
        let mut scores = Vec::new();
        for _ in 0..8 {
            manager.add_shard().await.unwrap();
            let score = manager.get_shard_statistics().load_balance;
            assert!(score <= previous + 1e-9, "{} rose above {}", score, previous);
            previous = score;
            scores.push(score);
        }

        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        assert!(mean <= start + 1e-9, "mean {} above start {}", mean, start);
        let total: f64 = manager.shards().iter().map(|s| s.load).sum();
        assert!((total - 4000.0).abs() < 1e-6);
        assert_eq!(manager.get_shard_statistics().total_shards, 12);
        assert_eq!(store.item_count("shards"), 4000);
    }

    #[test]
    fn test_routing_is_stable() {
        let (manager, _) = manager(4);
        for i in 0..100 {
            let key = format!("user:{}", i);
            assert_eq!(manager.get_shard_for_key(&key), manager.get_shard_for_key(&key));
        }
    }

    #[test]
    fn test_hash_functions_route_differently() {
        let store: Arc<dyn TableStore> = Arc::new(MemoryTableStore::new());
        let murmur = ShardManager::new(ShardConfig::new(16), store.clone()).unwrap();
        let sha = ShardManager::new(
            ShardConfig::new(16).with_hash_algorithm(HashAlgorithm::Sha256),
            store,
        )
        .unwrap();

        let differs = (0..50)
            .map(|i| format!("key-{}", i))
            .any(|k| murmur.get_shard_for_key(&k) != sha.get_shard_for_key(&k));
        assert!(differs);
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let (manager, _) = manager(4);
        let shard = manager.put_item("user:1", "alice").await.unwrap();
        assert_eq!(shard, manager.get_shard_for_key("user:1"));
        assert_eq!(
            manager.get_item("user:1").await.unwrap(),
            Some(Bytes::from("alice"))
        );
        assert_eq!(manager.get_item("user:2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_add_shard_moves_only_upper_half() {
        let (manager, store) = manager(4);
        for i in 0..200 {
            manager.put_item(&format!("key-{}", i), vec![1u8]).await.unwrap();
        }
        let before: HashMap<String, ShardId> = (0..200)
            .map(|i| {
                let k = format!("key-{}", i);
                let s = manager.get_shard_for_key(&k);
                (k, s)
            })
            .collect();

        let new_shard = manager.add_shard().await.unwrap();
        assert_eq!(new_shard.id, 4);
        assert_eq!(manager.get_shard_statistics().total_shards, 5);

        for (key, old) in &before {
            let now = manager.get_shard_for_key(key);
            assert!(now == *old || now == new_shard.id, "{} moved to a third shard", key);
            assert_eq!(manager.get_item(key).await.unwrap(), Some(Bytes::from(vec![1u8])));
        }
        assert_eq!(store.item_count("shards"), 200);
    }

    #[tokio::test]
    async fn test_remove_shard() {
        let (manager, store) = manager(3);
        for i in 0..90 {
            manager.put_item(&format!("key-{}", i), "v").await.unwrap();
        }

        let retired = manager.remove_shard(1).await.unwrap();
        assert_eq!(retired.status, ShardStatus::Retired);

        let stats = manager.get_shard_statistics();
        assert_eq!(stats.total_shards, 2);
        assert_eq!(stats.retired_shards, 1);
        assert_eq!(store.item_count("shards"), 90);
        for i in 0..90 {
            let key = format!("key-{}", i);
            assert_ne!(manager.get_shard_for_key(&key), 1);
            assert!(manager.get_item(&key).await.unwrap().is_some());
        }

        assert!(matches!(manager.remove_shard(1).await, Err(Error::ShardNotFound(1))));
        manager.remove_shard(0).await.unwrap();
        assert!(matches!(manager.remove_shard(2).await, Err(Error::LastShard)));
    }

    #[tokio::test]
    async fn test_failed_copy_rolls_back() {
        let (manager, store) = manager(2);
        for i in 0..50 {
            manager.put_item(&format!("key-{}", i), "v").await.unwrap();
        }

        store.fail_writes_after(0);
        let result = manager.add_shard().await;
        assert!(matches!(result, Err(Error::MigrationFailure(_))));
        store.clear_failures();

        let stats = manager.get_shard_statistics();
        assert_eq!(stats.total_shards, 2);
        assert_eq!(stats.migrating_shards, 0);
        assert_eq!(store.item_count("shards"), 50);

        // Writes are not left blocked and the next id is still fresh.
        manager.put_item("after", "v").await.unwrap();
        assert_eq!(manager.add_shard().await.unwrap().id, 3);
    }

    #[tokio::test]
    async fn test_reclaim_stray_items() {
        let (manager, store) = manager(2);
        manager.put_item("key-1", "v").await.unwrap();
        let owner = manager.get_shard_for_key("key-1");
        let other = 1 - owner;

        // A leftover copy under the wrong shard.
        store
            .batch_write(
                "shards",
                vec![WriteRequest::Put(Item::new(storage_key(other), "key-1", "v"))],
            )
            .await
            .unwrap();

        assert_eq!(manager.reclaim_stray_items(other).await.unwrap(), 1);
        assert_eq!(manager.reclaim_stray_items(other).await.unwrap(), 0);
        assert_eq!(store.item_count("shards"), 1);
    }

    #[tokio::test]
    async fn test_record_load_drives_split_choice() {
        let (manager, _) = manager(4);
        let hot = manager.record_load("hot-key", 100.0);
        assert!(manager.get_shard_statistics().load_balance > 0.0);

        let added = manager.add_shard().await.unwrap();
        let source = manager.shard(hot).unwrap();
        assert_eq!(added.start, source.end);
    }
}
