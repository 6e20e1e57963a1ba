//! Hot-partition monitoring and rebalancing.
//!
//! Each monitored table gets an owned [`PeriodicTask`]. A tick samples the
//! table's partition metrics, ranks the hot ones and rebalances the hottest
//! few. A metrics source that is down or slow costs one skipped tick, never a
//! blocked monitor.

use super::executor::RebalanceExecutor;
use super::locks::PartitionLocks;
use super::strategy::{rank_by_priority, select_strategy, HotPartitionRecord, RebalanceStrategy};
use crate::config::HotPartitionConfig;
use crate::error::{Error, Result};
use crate::lifecycle::{PartitionRegistry, PartitionState};
use crate::metrics::LayerMetrics;
use crate::monitor::PeriodicTask;
use crate::partitioning::{entity_of, split_keys};
use crate::store::{MetricsSource, TableStore};
use crate::types::{MetricWindow, PartitionMetrics};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

/// Aggregation period requested for tick samples, in seconds.
const SAMPLE_PERIOD_SECS: u32 = 60;

/// Monitoring state of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonitorState {
    /// Not monitored.
    Idle,
    /// Waiting for the next tick.
    Monitoring,
    /// Sampling metrics and ranking partitions.
    Detecting,
    /// Executing rebalances.
    Rebalancing,
}

/// Notifications for the surrounding service.
///
/// CACHE and THROTTLE are advisory: this layer only asks, the service decides
/// how to cache or throttle.
#[derive(Debug, Clone, PartialEq)]
pub enum RebalanceEvent {
    /// Put a read-through cache in front of the partition.
    CacheRequested {
        table: String,
        partition_key: String,
        ttl_hint: Duration,
    },
    /// Limit writes to the partition.
    ThrottleRequested {
        table: String,
        partition_key: String,
        suggested_wcu_limit: f64,
    },
    /// The partition was replaced by two children.
    PartitionSplit {
        table: String,
        original: String,
        new_partitions: Vec<String>,
        items_moved: u64,
    },
    /// Part of the partition's items moved to siblings.
    Redistributed {
        table: String,
        source: String,
        targets: Vec<String>,
        items_moved: u64,
    },
}

/// Outcome of one rebalance attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceResult {
    pub strategy: RebalanceStrategy,
    pub original_partition: String,
    /// Partitions created by the attempt. Always two for SPLIT, even when it
    /// failed and they were rolled back.
    pub new_partitions: Vec<String>,
    pub success: bool,
    /// Failure reason, `None` on success.
    pub reason: Option<String>,
    pub items_moved: u64,
}

impl RebalanceResult {
    fn succeeded(strategy: RebalanceStrategy, original: &str) -> Self {
        Self {
            strategy,
            original_partition: original.to_string(),
            new_partitions: Vec::new(),
            success: true,
            reason: None,
            items_moved: 0,
        }
    }

    fn failed(strategy: RebalanceStrategy, original: &str, reason: impl Into<String>) -> Self {
        let new_partitions = if strategy == RebalanceStrategy::Split {
            split_keys(original, 2)
        } else {
            Vec::new()
        };
        Self {
            strategy,
            original_partition: original.to_string(),
            new_partitions,
            success: false,
            reason: Some(reason.into()),
            items_moved: 0,
        }
    }
}

/// Result of one monitoring tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Partitions sampled.
    pub sampled: usize,
    /// Hot partitions, hottest first.
    pub hot: Vec<HotPartitionRecord>,
    /// Rebalances attempted this tick.
    pub rebalanced: Vec<RebalanceResult>,
}

/// Watches tables for hot partitions and relieves them.
#[derive(Debug)]
pub struct HotPartitionManager {
    config: HotPartitionConfig,
    metrics_source: Arc<dyn MetricsSource>,
    store: Arc<dyn TableStore>,
    locks: Arc<PartitionLocks>,
    registry: Arc<PartitionRegistry>,
    metrics: Arc<LayerMetrics>,
    events: broadcast::Sender<RebalanceEvent>,
    states: DashMap<String, MonitorState>,
    monitors: Mutex<HashMap<String, PeriodicTask>>,
    /// Stopped monitors whose last tick may still be running.
    stopping: Mutex<HashMap<String, PeriodicTask>>,
}

impl HotPartitionManager {
    /// Create a manager with private locks, registry and metrics.
    pub fn new(
        config: HotPartitionConfig,
        metrics_source: Arc<dyn MetricsSource>,
        store: Arc<dyn TableStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            config,
            metrics_source,
            store,
            locks: PartitionLocks::shared(),
            registry: Arc::new(PartitionRegistry::new()),
            metrics: Arc::new(LayerMetrics::new()),
            events,
            states: DashMap::new(),
            monitors: Mutex::new(HashMap::new()),
            stopping: Mutex::new(HashMap::new()),
        }
    }

    /// Share partition locks with other components.
    pub fn with_locks(mut self, locks: Arc<PartitionLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Share the partition registry with other components.
    pub fn with_registry(mut self, registry: Arc<PartitionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Record into a shared metrics set.
    pub fn with_metrics(mut self, metrics: Arc<LayerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Configuration.
    pub fn config(&self) -> &HotPartitionConfig {
        &self.config
    }

    /// Metrics recorded by this manager.
    pub fn metrics(&self) -> &Arc<LayerMetrics> {
        &self.metrics
    }

    /// Partition registry.
    pub fn registry(&self) -> &Arc<PartitionRegistry> {
        &self.registry
    }

    /// Receive rebalance events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RebalanceEvent> {
        self.events.subscribe()
    }

    /// Monitoring state of a table.
    pub fn monitor_state(&self, table: &str) -> MonitorState {
        self.states
            .get(table)
            .map_or(MonitorState::Idle, |s| *s)
    }

    /// Whether a monitor is running for `table`.
    pub fn is_monitoring(&self, table: &str) -> bool {
        self.monitors
            .lock()
            .get(table)
            .is_some_and(|task| !task.is_stopping() && !task.is_finished())
    }

    /// Start ticking `table` every `monitor_interval`.
    ///
    /// Returns `false` and does nothing if the table is already monitored, or
    /// while a stopped monitor for it is still finishing its last tick.
    pub fn start_monitoring(self: &Arc<Self>, table: &str) -> bool {
        let mut monitors = self.monitors.lock();
        if monitors
            .get(table)
            .is_some_and(|task| !task.is_stopping() && !task.is_finished())
        {
            debug!(table, "Already monitoring");
            return false;
        }

        {
            let mut stopping = self.stopping.lock();
            stopping.retain(|_, task| !task.is_finished());
            if stopping.contains_key(table) {
                debug!(table, "Previous monitor still finishing a tick");
                return false;
            }
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let tick_table = table.to_string();
        let task = PeriodicTask::spawn(
            format!("hot-partition-monitor:{}", table),
            self.config.monitor_interval,
            move || {
                let weak = weak.clone();
                let table = tick_table.clone();
                async move {
                    let Some(manager) = weak.upgrade() else {
                        return;
                    };
                    if let Err(e) = manager.run_tick(&table).await {
                        debug!(table = %table, error = %e, "Monitoring tick skipped");
                    }
                }
            },
        );

        monitors.insert(table.to_string(), task);
        self.states.insert(table.to_string(), MonitorState::Monitoring);
        self.metrics.monitored_tables.inc();
        info!(
            table,
            interval_ms = self.config.monitor_interval.as_millis() as u64,
            "Started hot-partition monitoring"
        );
        true
    }

    /// Stop monitoring `table`. Future ticks are cancelled; a tick already
    /// running finishes in the background and the table cannot be monitored
    /// again until it has. Returns `false` if not monitored.
    pub fn stop_monitoring(&self, table: &str) -> bool {
        let task = self.monitors.lock().remove(table);
        match task {
            Some(task) => {
                task.stop();
                if !task.is_finished() {
                    self.stopping.lock().insert(table.to_string(), task);
                }
                self.states.insert(table.to_string(), MonitorState::Idle);
                self.metrics.monitored_tables.dec();
                info!(table, "Stopped hot-partition monitoring");
                true
            }
            None => false,
        }
    }

    /// Stop every monitor and wait for in-flight ticks to finish.
    pub async fn shutdown(&self) {
        let tasks: Vec<(String, PeriodicTask)> = self.monitors.lock().drain().collect();
        for (table, task) in tasks {
            task.join().await;
            self.states.insert(table, MonitorState::Idle);
            self.metrics.monitored_tables.dec();
        }
        let stopping: Vec<PeriodicTask> = self.stopping.lock().drain().map(|(_, t)| t).collect();
        for task in stopping {
            task.join().await;
        }
        info!("Hot-partition manager shut down");
    }

    /// Run one monitoring pass over `table`.
    ///
    /// Fails with [`Error::MetricsUnavailable`] when the metrics source errors
    /// or times out; the tick is then counted as skipped.
    #[instrument(skip(self))]
    pub async fn run_tick(&self, table: &str) -> Result<TickReport> {
        let started = Instant::now();
        self.set_state(table, MonitorState::Detecting);

        let samples = match self.sample(table).await {
            Ok(samples) => samples,
            Err(e) => {
                self.metrics.ticks_skipped.inc();
                warn!(table, error = %e, "Skipping tick, metrics unavailable");
                self.settle_state(table);
                return Err(e);
            }
        };

        let thresholds = &self.config.thresholds;
        let hot: Vec<(&PartitionMetrics, HotPartitionRecord)> = rank_by_priority(&samples)
            .into_iter()
            .filter_map(|m| HotPartitionRecord::detect(m, thresholds).map(|r| (m, r)))
            .collect();

        for (_, record) in &hot {
            self.mark_hot(table, &record.partition_key);
        }
        let still_hot: HashSet<&str> = hot.iter().map(|(_, r)| r.partition_key.as_str()).collect();
        for key in self.registry.partitions_in(table, PartitionState::Hot) {
            if !still_hot.contains(key.as_str())
                && self
                    .registry
                    .transition_if(table, &key, PartitionState::Hot, PartitionState::Active)
                    .unwrap_or(false)
            {
                debug!(table, partition_key = %key, "Partition cooled down");
            }
        }

        let mut report = TickReport {
            sampled: samples.len(),
            hot: hot.iter().map(|(_, r)| r.clone()).collect(),
            rebalanced: Vec::new(),
        };

        if !hot.is_empty() {
            self.set_state(table, MonitorState::Rebalancing);
            for (metrics, record) in hot.iter().take(self.config.max_rebalances_per_tick) {
                let result = self
                    .rebalance_with_strategy(table, metrics, record.strategy)
                    .await;
                report.rebalanced.push(result);
            }
        }

        self.metrics.record_tick(started.elapsed(), report.hot.len());
        self.settle_state(table);
        debug!(
            table,
            sampled = report.sampled,
            hot = report.hot.len(),
            rebalanced = report.rebalanced.len(),
            "Monitoring tick complete"
        );
        Ok(report)
    }

    /// Rebalance a partition with the strategy its metrics call for.
    pub async fn rebalance_hot_partition(
        &self,
        table: &str,
        partition: &PartitionMetrics,
    ) -> RebalanceResult {
        let strategy = select_strategy(partition, &self.config.thresholds);
        self.rebalance_with_strategy(table, partition, strategy).await
    }

    /// Rebalance a partition with a specific strategy.
    ///
    /// Never panics or returns an error: failures are reported through
    /// `success` and `reason`, with all partial changes rolled back.
    #[instrument(skip(self, partition), fields(partition_key = %partition.partition_key))]
    pub async fn rebalance_with_strategy(
        &self,
        table: &str,
        partition: &PartitionMetrics,
        strategy: RebalanceStrategy,
    ) -> RebalanceResult {
        let key = partition.partition_key.as_str();

        let Some(_guard) = self.locks.try_acquire(table, key) else {
            debug!(table, partition_key = key, "Partition busy");
            self.metrics.record_rebalance(strategy.as_str(), false, 0);
            return RebalanceResult::failed(strategy, key, "partition busy");
        };

        if let Err(e) = self.enter_rebalancing(table, key) {
            self.metrics.record_rebalance(strategy.as_str(), false, 0);
            return RebalanceResult::failed(strategy, key, e.to_string());
        }

        let result = match strategy {
            RebalanceStrategy::Split => self.split(table, key).await,
            RebalanceStrategy::Redistribute => self.redistribute(table, key).await,
            RebalanceStrategy::Cache => self.request_cache(table, key),
            RebalanceStrategy::Throttle => self.request_throttle(table, partition),
        };

        if result.success && strategy == RebalanceStrategy::Split {
            self.registry.forget(table, key);
            for child in &result.new_partitions {
                self.registry.register(table, child, PartitionState::Active);
            }
        } else if let Err(e) = self.registry.transition(table, key, PartitionState::Active) {
            warn!(table, partition_key = key, error = %e, "Failed to reactivate partition");
        }

        self.metrics
            .record_rebalance(strategy.as_str(), result.success, result.items_moved);
        if result.success {
            info!(
                table,
                partition_key = key,
                strategy = %strategy,
                items_moved = result.items_moved,
                "Rebalanced partition"
            );
        } else {
            warn!(
                table,
                partition_key = key,
                strategy = %strategy,
                reason = result.reason.as_deref().unwrap_or(""),
                "Rebalance failed"
            );
        }
        result
    }

    async fn split(&self, table: &str, key: &str) -> RebalanceResult {
        let executor = RebalanceExecutor::new(self.store.as_ref(), table, self.config.batch_size);
        match executor.split(key).await {
            Ok(outcome) => {
                self.publish(RebalanceEvent::PartitionSplit {
                    table: table.to_string(),
                    original: key.to_string(),
                    new_partitions: outcome.new_partitions.clone(),
                    items_moved: outcome.items_moved,
                });
                RebalanceResult {
                    new_partitions: outcome.new_partitions,
                    items_moved: outcome.items_moved,
                    ..RebalanceResult::succeeded(RebalanceStrategy::Split, key)
                }
            }
            Err(e) => {
                error!(table, partition_key = key, error = %e, "Split rolled back");
                RebalanceResult::failed(RebalanceStrategy::Split, key, e.to_string())
            }
        }
    }

    async fn redistribute(&self, table: &str, key: &str) -> RebalanceResult {
        let strategy = RebalanceStrategy::Redistribute;
        let samples = match self.sample(table).await {
            Ok(samples) => samples,
            Err(e) => return RebalanceResult::failed(strategy, key, e.to_string()),
        };

        let ceiling = self.config.underutilized_ratio * self.config.thresholds.combined_capacity;
        let entity = entity_of(key);
        let mut candidates: Vec<&PartitionMetrics> = samples
            .iter()
            .filter(|m| m.partition_key != key && entity_of(&m.partition_key) == entity)
            .filter(|m| m.priority() < ceiling)
            .collect();
        candidates.sort_by(|a, b| a.priority().total_cmp(&b.priority()));

        // Targets are locked for the duration of the move.
        let mut guards = Vec::new();
        let mut targets = Vec::new();
        for candidate in candidates {
            if let Some(guard) = self.locks.try_acquire(table, &candidate.partition_key) {
                guards.push(guard);
                targets.push(candidate.partition_key.clone());
            }
        }
        if targets.is_empty() {
            return RebalanceResult::failed(strategy, key, "no under-utilized partitions");
        }

        let executor = RebalanceExecutor::new(self.store.as_ref(), table, self.config.batch_size);
        match executor
            .redistribute(key, &targets, self.config.redistribute_fraction)
            .await
        {
            Ok(items_moved) => {
                self.publish(RebalanceEvent::Redistributed {
                    table: table.to_string(),
                    source: key.to_string(),
                    targets,
                    items_moved,
                });
                RebalanceResult {
                    items_moved,
                    ..RebalanceResult::succeeded(strategy, key)
                }
            }
            Err(e) => RebalanceResult::failed(strategy, key, e.to_string()),
        }
    }

    fn request_cache(&self, table: &str, key: &str) -> RebalanceResult {
        self.publish(RebalanceEvent::CacheRequested {
            table: table.to_string(),
            partition_key: key.to_string(),
            ttl_hint: self.config.cache_ttl_hint,
        });
        RebalanceResult::succeeded(RebalanceStrategy::Cache, key)
    }

    fn request_throttle(&self, table: &str, partition: &PartitionMetrics) -> RebalanceResult {
        let thresholds = &self.config.thresholds;
        // The floor wins over a write threshold below one unit.
        let upper = thresholds.wcu.max(1.0);
        let limit = (thresholds.combined_capacity - partition.consumed_rcu).clamp(1.0, upper);
        self.publish(RebalanceEvent::ThrottleRequested {
            table: table.to_string(),
            partition_key: partition.partition_key.clone(),
            suggested_wcu_limit: limit,
        });
        RebalanceResult::succeeded(RebalanceStrategy::Throttle, &partition.partition_key)
    }

    async fn sample(&self, table: &str) -> Result<Vec<PartitionMetrics>> {
        let window = MetricWindow::trailing(self.config.metrics_window, SAMPLE_PERIOD_SECS);
        match tokio::time::timeout(
            self.config.metrics_timeout,
            self.metrics_source.list_partition_metrics(table, &window),
        )
        .await
        {
            Ok(Ok(samples)) => Ok(samples),
            Ok(Err(Error::MetricsUnavailable(reason))) => Err(Error::MetricsUnavailable(reason)),
            Ok(Err(e)) => Err(Error::MetricsUnavailable(e.to_string())),
            Err(_) => Err(Error::MetricsUnavailable(format!(
                "no answer within {:?}",
                self.config.metrics_timeout
            ))),
        }
    }

    fn mark_hot(&self, table: &str, key: &str) {
        // Partitions created ahead of writes become active once they run hot.
        if let Err(e) = self
            .registry
            .transition_if(table, key, PartitionState::Created, PartitionState::Active)
        {
            debug!(table, partition_key = key, error = %e, "Not activated");
        }
        if let Err(e) = self
            .registry
            .transition_if(table, key, PartitionState::Active, PartitionState::Hot)
        {
            debug!(table, partition_key = key, error = %e, "Not marked hot");
        }
    }

    fn enter_rebalancing(&self, table: &str, key: &str) -> Result<()> {
        self.mark_hot(table, key);
        self.registry
            .transition(table, key, PartitionState::Rebalancing)
            .map(|_| ())
    }

    fn publish(&self, event: RebalanceEvent) {
        if self.events.send(event).is_err() {
            debug!("No rebalance event subscribers");
        }
    }

    fn set_state(&self, table: &str, state: MonitorState) {
        self.states.insert(table.to_string(), state);
    }

    fn settle_state(&self, table: &str) {
        let state = if self.monitors.lock().contains_key(table) {
            MonitorState::Monitoring
        } else {
            MonitorState::Idle
        };
        self.set_state(table, state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HotPartitionThresholds;
    use crate::testing::{MemoryMetricsSource, MemoryTableStore};
    use crate::types::{Item, KeyCondition, WriteRequest};

    fn config() -> HotPartitionConfig {
        HotPartitionConfig::default()
            .with_thresholds(
                HotPartitionThresholds::default()
                    .with_rcu(500.0)
                    .with_wcu(500.0)
                    .with_item_count(1000)
                    .with_combined_capacity(1000.0),
            )
            .with_metrics_timeout(Duration::from_millis(200))
    }

    async fn seed(store: &MemoryTableStore, table: &str, key: &str, n: usize) {
        let puts = (0..n)
            .map(|i| WriteRequest::Put(Item::new(key, format!("sk-{:05}", i), vec![0u8; 8])))
            .collect();
        store.batch_write(table, puts).await.unwrap();
    }

    fn manager(
        source: &Arc<MemoryMetricsSource>,
        store: &Arc<MemoryTableStore>,
    ) -> HotPartitionManager {
        HotPartitionManager::new(config(), source.clone(), store.clone())
    }

    #[tokio::test]
    async fn test_split_conserves_items() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        seed(&store, "t", "USER#2024-03", 5001).await;
        let manager = manager(&source, &store);

        let metrics = PartitionMetrics::new("USER#2024-03", 2000.0, 1500.0, 5001);
        let result = manager.rebalance_hot_partition("t", &metrics).await;

        assert!(result.success, "{:?}", result.reason);
        assert_eq!(result.strategy, RebalanceStrategy::Split);
        assert_eq!(result.new_partitions, vec!["USER#2024-03#0", "USER#2024-03#1"]);
        assert_eq!(result.items_moved, 5001);

        let a = store.query("t", &KeyCondition::partition("USER#2024-03#0")).await.unwrap();
        let b = store.query("t", &KeyCondition::partition("USER#2024-03#1")).await.unwrap();
        assert_eq!(a.len() + b.len(), 5001);
        assert!(a.len().abs_diff(b.len()) <= 1);
        assert!(store
            .query("t", &KeyCondition::partition("USER#2024-03"))
            .await
            .unwrap()
            .is_empty());

        // The split partition is retired; only the children stay listed.
        let listed: Vec<String> = store
            .list_partitions("t")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.partition_key)
            .collect();
        assert_eq!(listed, vec!["USER#2024-03#0", "USER#2024-03#1"]);
    }

    #[tokio::test]
    async fn test_split_failure_rolls_back() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        seed(&store, "t", "USER#2024-03", 50).await;
        let manager = manager(&source, &store);

        store.fail_puts_matching("USER#2024-03#1");
        let metrics = PartitionMetrics::new("USER#2024-03", 0.0, 0.0, 5000);
        let result = manager.rebalance_hot_partition("t", &metrics).await;

        assert!(!result.success);
        assert!(result.reason.is_some());
        assert_eq!(result.new_partitions.len(), 2);
        assert_eq!(store.item_count("t"), 50);
        assert_eq!(
            store.query("t", &KeyCondition::partition("USER#2024-03")).await.unwrap().len(),
            50
        );
        assert_eq!(manager.registry().state("t", "USER#2024-03"), PartitionState::Active);
        // No empty children are left behind.
        assert_eq!(store.partition_count("t"), 1);
    }

    #[tokio::test]
    async fn test_split_keeps_preexisting_children_on_failure() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        seed(&store, "t", "USER#2024-03", 50).await;
        store.create_partition("t", "USER#2024-03#0").await.unwrap();
        let manager = manager(&source, &store);

        store.fail_puts_matching("USER#2024-03#1");
        let metrics = PartitionMetrics::new("USER#2024-03", 0.0, 0.0, 5000);
        let result = manager.rebalance_hot_partition("t", &metrics).await;

        assert!(!result.success);
        assert_eq!(store.partition_count("t"), 2);
        assert_eq!(store.item_count("t"), 50);
    }

    #[tokio::test]
    async fn test_busy_partition_is_refused() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        let locks = PartitionLocks::shared();
        let manager = manager(&source, &store).with_locks(locks.clone());

        let _held = locks.try_acquire("t", "USER#2024-03").unwrap();
        let metrics = PartitionMetrics::new("USER#2024-03", 2000.0, 0.0, 10);
        let result = manager.rebalance_hot_partition("t", &metrics).await;
        assert!(!result.success);
        assert_eq!(result.reason.as_deref(), Some("partition busy"));
    }

    #[tokio::test]
    async fn test_cache_and_throttle_publish_events() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        let manager = manager(&source, &store);
        let mut events = manager.subscribe();

        let reads = PartitionMetrics::new("USER#2024-03", 2000.0, 0.0, 10);
        let result = manager.rebalance_hot_partition("t", &reads).await;
        assert!(result.success);
        assert_eq!(result.strategy, RebalanceStrategy::Cache);
        assert!(matches!(
            events.recv().await.unwrap(),
            RebalanceEvent::CacheRequested { ref partition_key, .. } if partition_key == "USER#2024-03"
        ));

        let mixed = PartitionMetrics::new("USER#2024-04", 450.0, 450.0, 10);
        let result = manager.rebalance_hot_partition("t", &mixed).await;
        assert_eq!(result.strategy, RebalanceStrategy::Throttle);
        match events.recv().await.unwrap() {
            RebalanceEvent::ThrottleRequested { suggested_wcu_limit, .. } => {
                assert_eq!(suggested_wcu_limit, 500.0)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_created_partition_activated_when_hot() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        let manager = manager(&source, &store);
        manager.registry().register("t", "USER#2024-04", PartitionState::Created);

        let reads = PartitionMetrics::new("USER#2024-04", 2000.0, 0.0, 10);
        let result = manager.rebalance_hot_partition("t", &reads).await;
        assert!(result.success, "{:?}", result.reason);
        assert_eq!(manager.registry().state("t", "USER#2024-04"), PartitionState::Active);

        // A partition in a state that cannot be activated is refused cleanly.
        for state in [PartitionState::Archiving, PartitionState::Archived, PartitionState::Deleted] {
            manager.registry().transition("t", "USER#2019-01", state).unwrap();
        }
        let result = manager
            .rebalance_hot_partition("t", &PartitionMetrics::new("USER#2019-01", 2000.0, 0.0, 10))
            .await;
        assert!(!result.success);
        assert_eq!(manager.registry().state("t", "USER#2019-01"), PartitionState::Deleted);
    }

    #[tokio::test]
    async fn test_throttle_limit_with_fractional_wcu_threshold() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        let config = config().with_thresholds(
            HotPartitionThresholds::default()
                .with_wcu(0.5)
                .with_combined_capacity(1000.0),
        );
        let manager = HotPartitionManager::new(config, source, store);
        let mut events = manager.subscribe();

        let partition = PartitionMetrics::new("USER#2024-03", 10.0, 10.0, 10);
        let result = manager
            .rebalance_with_strategy("t", &partition, RebalanceStrategy::Throttle)
            .await;
        assert!(result.success);
        match events.recv().await.unwrap() {
            RebalanceEvent::ThrottleRequested { suggested_wcu_limit, .. } => {
                assert_eq!(suggested_wcu_limit, 1.0)
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_redistribute_moves_to_cool_siblings() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        seed(&store, "t", "EVENT#2024-03", 40).await;
        seed(&store, "t", "EVENT#2024-02", 5).await;
        source.set_partition_metrics(
            "t",
            vec![
                PartitionMetrics::new("EVENT#2024-03", 10.0, 900.0, 40),
                PartitionMetrics::new("EVENT#2024-02", 5.0, 5.0, 5),
                PartitionMetrics::new("USER#2024-02", 0.0, 0.0, 0),
            ],
        );
        let manager = manager(&source, &store);

        let hot = PartitionMetrics::new("EVENT#2024-03", 10.0, 900.0, 40);
        let result = manager.rebalance_hot_partition("t", &hot).await;
        assert!(result.success, "{:?}", result.reason);
        assert_eq!(result.strategy, RebalanceStrategy::Redistribute);
        assert_eq!(result.items_moved, 20);
        assert!(result.new_partitions.is_empty());

        let sibling = store.query("t", &KeyCondition::partition("EVENT#2024-02")).await.unwrap();
        assert_eq!(sibling.len(), 25);
        assert_eq!(store.item_count("t"), 45);
    }

    #[tokio::test]
    async fn test_redistribute_without_candidates_fails() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        seed(&store, "t", "EVENT#2024-03", 10).await;
        source.set_partition_metrics("t", vec![PartitionMetrics::new("EVENT#2024-03", 0.0, 900.0, 10)]);
        let manager = manager(&source, &store);

        let hot = PartitionMetrics::new("EVENT#2024-03", 0.0, 900.0, 10);
        let result = manager.rebalance_hot_partition("t", &hot).await;
        assert!(!result.success);
        assert_eq!(store.item_count("t"), 10);
    }

    #[tokio::test]
    async fn test_tick_skips_when_metrics_unavailable() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        let manager = manager(&source, &store);

        source.set_unavailable(true);
        assert!(matches!(manager.run_tick("t").await, Err(Error::MetricsUnavailable(_))));

        source.set_unavailable(false);
        source.set_delay(Duration::from_secs(5));
        assert!(matches!(manager.run_tick("t").await, Err(Error::MetricsUnavailable(_))));

        assert_eq!(manager.metrics().snapshot().ticks_skipped, 2);
        assert_eq!(manager.monitor_state("t"), MonitorState::Idle);
    }

    #[tokio::test]
    async fn test_tick_limits_rebalances() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        let samples = (0..6)
            .map(|i| PartitionMetrics::new(format!("USER#2024-0{}", i + 1), 600.0 + i as f64, 0.0, 1))
            .collect();
        source.set_partition_metrics("t", samples);
        let manager = HotPartitionManager::new(
            config().with_max_rebalances_per_tick(2),
            source.clone(),
            store.clone(),
        );

        let report = manager.run_tick("t").await.unwrap();
        assert_eq!(report.sampled, 6);
        assert_eq!(report.hot.len(), 6);
        assert_eq!(report.rebalanced.len(), 2);
        assert_eq!(report.hot[0].partition_key, "USER#2024-06");
        assert_eq!(report.rebalanced[0].original_partition, "USER#2024-06");
    }

    #[tokio::test]
    async fn test_start_twice_is_noop() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        let manager = Arc::new(HotPartitionManager::new(
            config().with_monitor_interval(Duration::from_secs(3600)),
            source.clone(),
            store.clone(),
        ));

        assert!(manager.start_monitoring("t"));
        assert!(!manager.start_monitoring("t"));
        assert!(manager.is_monitoring("t"));

        assert!(manager.stop_monitoring("t"));
        assert!(!manager.stop_monitoring("t"));
        assert_eq!(manager.monitor_state("t"), MonitorState::Idle);

        // Let the stopped monitor exit before restarting.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.start_monitoring("t"));
        manager.shutdown().await;
        assert!(!manager.is_monitoring("t"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_waits_for_in_flight_tick() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        source.set_delay(Duration::from_secs(2));
        let manager = Arc::new(HotPartitionManager::new(
            config()
                .with_monitor_interval(Duration::from_secs(3600))
                .with_metrics_timeout(Duration::from_secs(10)),
            source.clone(),
            store,
        ));

        assert!(manager.start_monitoring("t"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.call_count(), 1);

        // The first tick is still sampling, so no second monitor may start.
        assert!(manager.stop_monitoring("t"));
        assert!(!manager.start_monitoring("t"));
        assert!(!manager.is_monitoring("t"));
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.call_count(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(manager.start_monitoring("t"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(source.call_count(), 2);

        manager.shutdown().await;
        assert!(!manager.is_monitoring("t"));
        assert_eq!(manager.metrics().snapshot().ticks_skipped, 0);
    }
}
