//! Rule-driven partition lifecycle.
//!
//! The manager keeps upcoming time buckets created ahead of writes and, on
//! each evaluation, runs the winning [`LifecycleRule`] for every partition of
//! a table. Every action takes the partition's lock first, so lifecycle work
//! never overlaps a rebalance of the same partition.

use super::archive::{ArchiveSnapshot, PartitionArchiver};
use super::rules::{default_rules, select_rule, LifecycleAction, LifecycleRule, PartitionAge};
use super::state::{PartitionRegistry, PartitionState};
use crate::config::{ArchiveConfig, LifecycleConfig};
use crate::error::{Error, Result};
use crate::metrics::LayerMetrics;
use crate::monitor::PeriodicTask;
use crate::partitioning::{bucket_bounds, last_activity, partition_key};
use crate::rebalancing::{PartitionGuard, PartitionLocks};
use crate::store::{ArchiveStore, TableStore};
use crate::types::PartitionDescriptor;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};

/// Outcome of one [`PartitionLifecycleManager::execute_lifecycle_rules`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleReport {
    /// Partitions looked at.
    pub evaluated: usize,
    /// `Created` partitions whose bucket started.
    pub activated: usize,
    pub archived: usize,
    pub snapshotted: usize,
    pub deleted: usize,
    /// Partitions held by another action.
    pub skipped: usize,
    /// Actions that failed and will be retried on the next pass.
    pub pending: usize,
}

/// Creates, archives, snapshots, restores and deletes partitions.
#[derive(Debug)]
pub struct PartitionLifecycleManager {
    config: LifecycleConfig,
    store: Arc<dyn TableStore>,
    archiver: PartitionArchiver,
    registry: Arc<PartitionRegistry>,
    locks: Arc<PartitionLocks>,
    rules: RwLock<Vec<LifecycleRule>>,
    schedulers: Mutex<HashMap<String, PeriodicTask>>,
    metrics: Arc<LayerMetrics>,
}

impl PartitionLifecycleManager {
    /// Create a manager with private locks, registry and metrics.
    ///
    /// The built-in rules are installed unless disabled in `config`.
    pub fn new(
        config: LifecycleConfig,
        store: Arc<dyn TableStore>,
        archive: Arc<dyn ArchiveStore>,
        archive_config: ArchiveConfig,
    ) -> Self {
        let rules = if config.install_default_rules {
            default_rules(&config)
        } else {
            Vec::new()
        };
        let metrics = Arc::new(LayerMetrics::new());
        let archiver = PartitionArchiver::new(store.clone(), archive, archive_config)
            .with_metrics(metrics.clone());

        Self {
            config,
            store,
            archiver,
            registry: Arc::new(PartitionRegistry::new()),
            locks: PartitionLocks::shared(),
            rules: RwLock::new(rules),
            schedulers: Mutex::new(HashMap::new()),
            metrics,
        }
    }

    /// Share partition locks with the hot-partition manager.
    pub fn with_locks(mut self, locks: Arc<PartitionLocks>) -> Self {
        self.locks = locks;
        self
    }

    /// Share the partition registry with the hot-partition manager.
    pub fn with_registry(mut self, registry: Arc<PartitionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Record into a shared metrics set.
    pub fn with_metrics(mut self, metrics: Arc<LayerMetrics>) -> Self {
        self.archiver = self.archiver.with_metrics(metrics.clone());
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PartitionRegistry> {
        &self.registry
    }

    /// Archiver used for every data movement.
    pub fn archiver(&self) -> &PartitionArchiver {
        &self.archiver
    }

    pub fn metrics(&self) -> &Arc<LayerMetrics> {
        &self.metrics
    }

    /// Add a rule, replacing any rule with the same id. Returns the replaced rule.
    pub fn add_lifecycle_rule(&self, rule: LifecycleRule) -> Option<LifecycleRule> {
        let mut rules = self.rules.write();
        let previous = rules
            .iter()
            .position(|r| r.id == rule.id)
            .map(|i| rules.remove(i));
        info!(rule = %rule.id, action = %rule.action, priority = rule.priority, "Added lifecycle rule");
        rules.push(rule);
        previous
    }

    /// Remove a rule by id.
    pub fn remove_lifecycle_rule(&self, id: &str) -> Option<LifecycleRule> {
        let mut rules = self.rules.write();
        let index = rules.iter().position(|r| r.id == id)?;
        info!(rule = id, "Removed lifecycle rule");
        Some(rules.remove(index))
    }

    /// Installed rules, in insertion order.
    pub fn rules(&self) -> Vec<LifecycleRule> {
        self.rules.read().clone()
    }

    /// Create the next `create_ahead` buckets (current one included) for
    /// every configured entity type. Returns the keys created by this call.
    #[instrument(skip(self))]
    pub async fn create_upcoming_partitions(&self, table: &str) -> Result<Vec<String>> {
        self.create_upcoming_partitions_at(table, Utc::now()).await
    }

    pub(crate) async fn create_upcoming_partitions_at(
        &self,
        table: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let granularity = self.config.granularity;
        let existing: HashSet<String> = self
            .store
            .list_partitions(table)
            .await?
            .into_iter()
            .map(|p| p.partition_key)
            .collect();

        let mut created = Vec::new();
        for entity_type in &self.config.entity_types {
            let mut bucket = granularity.bucket_start(now);
            for _ in 0..self.config.create_ahead {
                let key = partition_key(entity_type, bucket, granularity);
                if !existing.contains(&key) && !self.registry.contains(table, &key) {
                    self.store.create_partition(table, &key).await?;
                    self.registry.register(table, &key, PartitionState::Created);
                    self.metrics.partitions_created.inc();
                    debug!(table, partition_key = %key, "Created partition ahead of writes");
                    created.push(key);
                }
                match granularity.next_bucket(bucket) {
                    Some(next) => bucket = next,
                    None => break,
                }
            }
        }

        if !created.is_empty() {
            info!(table, created = created.len(), "Created upcoming partitions");
        }
        Ok(created)
    }

    /// Evaluate every partition of `table` against the installed rules.
    ///
    /// Failed actions are rolled back and counted as pending; they do not
    /// stop the pass.
    #[instrument(skip(self))]
    pub async fn execute_lifecycle_rules(&self, table: &str) -> Result<LifecycleReport> {
        let now = Utc::now();
        let mut partitions = self.store.list_partitions(table).await?;

        // Archived partitions may no longer be listed by the store.
        let listed: HashSet<String> = partitions.iter().map(|p| p.partition_key.clone()).collect();
        for key in self.registry.partitions_in(table, PartitionState::Archived) {
            if !listed.contains(&key) {
                partitions.push(PartitionDescriptor::new(key));
            }
        }

        let rules = self.rules();
        let mut report = LifecycleReport::default();

        for partition in &partitions {
            let key = partition.partition_key.as_str();
            report.evaluated += 1;

            let Some(_guard) = self.locks.try_acquire(table, key) else {
                debug!(table, partition_key = key, "Partition busy, skipped");
                report.skipped += 1;
                continue;
            };

            let mut state = self.registry.state(table, key);
            if state == PartitionState::Created {
                let started = bucket_bounds(key).map_or(true, |(_, start, _)| start <= now);
                if !started {
                    continue;
                }
                self.registry.transition(table, key, PartitionState::Active)?;
                report.activated += 1;
                state = PartitionState::Active;
            }
            if state.is_terminal() {
                continue;
            }

            let age = PartitionAge {
                since_activity: last_activity(partition).map(|at| (now - at).num_days()),
                since_archived: self
                    .registry
                    .get(table, key)
                    .and_then(|record| record.archived_at)
                    .map(|at| (now - at).num_days()),
            };
            let applicable = rules.iter().filter(|r| r.action.applies_to(state));
            let Some(rule) = select_rule(applicable, partition, &age) else {
                continue;
            };

            debug!(table, partition_key = key, rule = %rule.id, action = %rule.action, "Rule matched");
            let outcome = match rule.action {
                LifecycleAction::Archive => self.archive(table, key).await.map(|_| {
                    report.archived += 1;
                }),
                LifecycleAction::Snapshot => self.archiver.export_partition(table, key).await.map(|_| {
                    report.snapshotted += 1;
                }),
                LifecycleAction::Delete => self.delete(table, key).await.map(|_| {
                    report.deleted += 1;
                }),
            };
            if let Err(e) = outcome {
                report.pending += 1;
                warn!(table, partition_key = key, rule = %rule.id, error = %e, "Lifecycle action failed");
            }
        }

        info!(
            table,
            evaluated = report.evaluated,
            activated = report.activated,
            archived = report.archived,
            snapshotted = report.snapshotted,
            deleted = report.deleted,
            skipped = report.skipped,
            pending = report.pending,
            "Lifecycle pass complete"
        );
        Ok(report)
    }

    /// Snapshot a partition without changing it.
    #[instrument(skip(self))]
    pub async fn export_partition_data(&self, table: &str, partition_key: &str) -> Result<ArchiveSnapshot> {
        let _guard = self.lock(table, partition_key)?;
        self.archiver.export_partition(table, partition_key).await
    }

    /// Bring an archived partition back from its snapshot.
    ///
    /// A partition the registry does not know is accepted when a snapshot
    /// exists for it. A failed restore leaves the partition `Archived`.
    #[instrument(skip(self))]
    pub async fn restore_partition_from_snapshot(
        &self,
        table: &str,
        partition_key: &str,
    ) -> Result<ArchiveSnapshot> {
        let _guard = self.lock(table, partition_key)?;

        if !self.registry.contains(table, partition_key) {
            if self.archiver.load_snapshot(table, partition_key).await?.is_none() {
                return Err(Error::RestoreNotFound {
                    table: table.to_string(),
                    partition_key: partition_key.to_string(),
                });
            }
            self.registry
                .register(table, partition_key, PartitionState::Archived);
        }

        self.registry
            .transition(table, partition_key, PartitionState::Restoring)?;
        match self.archiver.restore_partition(table, partition_key).await {
            Ok(snapshot) => {
                self.registry
                    .transition(table, partition_key, PartitionState::Active)?;
                Ok(snapshot)
            }
            Err(e) => {
                self.registry
                    .transition(table, partition_key, PartitionState::Archived)?;
                warn!(table, partition_key, error = %e, "Restore failed");
                Err(e)
            }
        }
    }

    /// Run creation-ahead and rule evaluation for `table` every
    /// `evaluation_interval`. Returns `false` if already scheduled.
    pub fn start_scheduler(self: &Arc<Self>, table: &str) -> bool {
        let mut schedulers = self.schedulers.lock();
        if schedulers
            .get(table)
            .is_some_and(|task| !task.is_stopping() && !task.is_finished())
        {
            return false;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let tick_table = table.to_string();
        let task = PeriodicTask::spawn(
            format!("lifecycle:{}", table),
            self.config.evaluation_interval,
            move || {
                let weak = weak.clone();
                let table = tick_table.clone();
                async move {
                    let Some(manager) = weak.upgrade() else {
                        return;
                    };
                    if let Err(e) = manager.create_upcoming_partitions(&table).await {
                        warn!(table = %table, error = %e, "Failed to create upcoming partitions");
                    }
                    if let Err(e) = manager.execute_lifecycle_rules(&table).await {
                        warn!(table = %table, error = %e, "Lifecycle pass failed");
                    }
                }
            },
        );
        schedulers.insert(table.to_string(), task);
        info!(table, "Started lifecycle scheduler");
        true
    }

    /// Stop the scheduler for `table`. Returns `false` if none was running.
    pub fn stop_scheduler(&self, table: &str) -> bool {
        match self.schedulers.lock().remove(table) {
            Some(task) => {
                task.stop();
                info!(table, "Stopped lifecycle scheduler");
                true
            }
            None => false,
        }
    }

    /// Whether a scheduler is running for `table`.
    pub fn is_scheduled(&self, table: &str) -> bool {
        self.schedulers
            .lock()
            .get(table)
            .is_some_and(|task| !task.is_stopping() && !task.is_finished())
    }

    /// Stop every scheduler and wait for in-flight passes.
    pub async fn shutdown(&self) {
        let tasks: Vec<PeriodicTask> = self.schedulers.lock().drain().map(|(_, t)| t).collect();
        for task in tasks {
            task.join().await;
        }
    }

    async fn archive(&self, table: &str, partition_key: &str) -> Result<ArchiveSnapshot> {
        self.registry
            .transition(table, partition_key, PartitionState::Archiving)?;
        match self.archiver.archive_partition(table, partition_key).await {
            Ok(snapshot) => {
                self.registry
                    .transition(table, partition_key, PartitionState::Archived)?;
                Ok(snapshot)
            }
            Err(e) => {
                self.registry
                    .transition(table, partition_key, PartitionState::Active)?;
                Err(e)
            }
        }
    }

    async fn delete(&self, table: &str, partition_key: &str) -> Result<()> {
        self.archiver.delete_snapshot(table, partition_key).await?;
        self.registry
            .transition(table, partition_key, PartitionState::Deleted)?;
        if let Err(e) = self.store.drop_partition(table, partition_key).await {
            warn!(table, partition_key, error = %e, "Failed to drop deleted partition");
        }
        Ok(())
    }

    fn lock<'a>(&'a self, table: &str, partition_key: &str) -> Result<PartitionGuard<'a>> {
        self.locks
            .try_acquire(table, partition_key)
            .ok_or_else(|| Error::PartitionBusy(partition_key.to_string()))
    }
}
