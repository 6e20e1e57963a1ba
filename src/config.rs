//! Configuration types for the coordination layer.

use crate::error::{Error, Result};
use crate::partitioning::Granularity;
use crate::retry::RetryPolicy;
use crate::sharding::HashAlgorithm;
use std::time::Duration;

/// Top-level configuration aggregating every component's settings.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Time-based partitioning and hot-partition thresholds.
    pub partitioner: PartitionerConfig,

    /// Hash ring configuration.
    pub shards: ShardConfig,

    /// Hot-partition monitoring.
    pub hot_partitions: HotPartitionConfig,

    /// Secondary index analysis.
    pub indexes: IndexConfig,

    /// Partition lifecycle rules and scheduling.
    pub lifecycle: LifecycleConfig,

    /// Archive compression and retries.
    pub archive: ArchiveConfig,
}

impl CoordinatorConfig {
    /// Create a configuration with defaults everywhere.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set partitioner configuration.
    pub fn with_partitioner(mut self, partitioner: PartitionerConfig) -> Self {
        self.partitioner = partitioner;
        self
    }

    /// Set shard configuration.
    pub fn with_shards(mut self, shards: ShardConfig) -> Self {
        self.shards = shards;
        self
    }

    /// Set hot-partition configuration.
    pub fn with_hot_partitions(mut self, hot: HotPartitionConfig) -> Self {
        self.hot_partitions = hot;
        self
    }

    /// Set index analysis configuration.
    pub fn with_indexes(mut self, indexes: IndexConfig) -> Self {
        self.indexes = indexes;
        self
    }

    /// Set lifecycle configuration.
    pub fn with_lifecycle(mut self, lifecycle: LifecycleConfig) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Set archive configuration.
    pub fn with_archive(mut self, archive: ArchiveConfig) -> Self {
        self.archive = archive;
        self
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.partitioner.thresholds.validate()?;
        self.shards.validate()?;
        self.hot_partitions.validate()?;
        self.indexes.validate()?;
        self.lifecycle.validate()?;
        self.archive.validate()
    }
}

/// Load thresholds that make a partition "hot".
///
/// These have no universal values; the defaults are starting points and every
/// deployment is expected to tune them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HotPartitionThresholds {
    /// Consumed RCU above which reads are considered hot.
    pub rcu: f64,

    /// Consumed WCU above which writes are considered hot.
    pub wcu: f64,

    /// Item count above which the partition should be split.
    pub item_count: u64,

    /// Combined RCU + WCU above which the partition is hot even if neither
    /// dimension alone crosses its threshold.
    pub combined_capacity: f64,
}

impl Default for HotPartitionThresholds {
    fn default() -> Self {
        Self {
            rcu: 500.0,
            wcu: 500.0,
            item_count: 1_000,
            combined_capacity: 800.0,
        }
    }
}

impl HotPartitionThresholds {
    /// Set the RCU threshold.
    pub fn with_rcu(mut self, rcu: f64) -> Self {
        self.rcu = rcu;
        self
    }

    /// Set the WCU threshold.
    pub fn with_wcu(mut self, wcu: f64) -> Self {
        self.wcu = wcu;
        self
    }

    /// Set the item count threshold.
    pub fn with_item_count(mut self, item_count: u64) -> Self {
        self.item_count = item_count;
        self
    }

    /// Set the combined capacity threshold.
    pub fn with_combined_capacity(mut self, combined: f64) -> Self {
        self.combined_capacity = combined;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(self.rcu > 0.0 && self.wcu > 0.0 && self.combined_capacity > 0.0) {
            return Err(Error::Config(
                "capacity thresholds must be positive".to_string(),
            ));
        }
        if self.item_count == 0 {
            return Err(Error::Config("item count threshold must be positive".to_string()));
        }
        Ok(())
    }
}

/// Time-based partitioner configuration.
#[derive(Debug, Clone)]
pub struct PartitionerConfig {
    /// Granularity used when none is given explicitly.
    pub default_granularity: Granularity,

    /// Thresholds used by hot-partition detection.
    pub thresholds: HotPartitionThresholds,
}

impl Default for PartitionerConfig {
    fn default() -> Self {
        Self {
            default_granularity: Granularity::Monthly,
            thresholds: HotPartitionThresholds::default(),
        }
    }
}

impl PartitionerConfig {
    /// Set the default granularity.
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.default_granularity = granularity;
        self
    }

    /// Set detection thresholds.
    pub fn with_thresholds(mut self, thresholds: HotPartitionThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }
}

/// Hash ring configuration.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Number of shards the ring starts with.
    pub shard_count: u32,

    /// Hash function used to place keys on the ring.
    pub hash_algorithm: HashAlgorithm,

    /// Table holding shard-qualified items.
    pub shard_table: String,

    /// Maximum items per migration batch write.
    pub batch_size: usize,

    /// Longest time a write waits for a shard cutover before failing.
    pub cutover_timeout: Duration,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            shard_count: 4,
            hash_algorithm: HashAlgorithm::Murmur3,
            shard_table: "shards".to_string(),
            batch_size: 25,
            cutover_timeout: Duration::from_secs(5),
        }
    }
}

impl ShardConfig {
    /// Create a config with the given initial shard count.
    pub fn new(shard_count: u32) -> Self {
        Self {
            shard_count,
            ..Default::default()
        }
    }

    /// Set the hash algorithm.
    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    /// Set the table holding shard-qualified items.
    pub fn with_shard_table(mut self, table: impl Into<String>) -> Self {
        self.shard_table = table.into();
        self
    }

    /// Set the migration batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the cutover timeout.
    pub fn with_cutover_timeout(mut self, timeout: Duration) -> Self {
        self.cutover_timeout = timeout;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(Error::Config("shard_count must be at least 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.shard_table.is_empty() {
            return Err(Error::Config("shard_table must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Hot-partition monitor configuration.
#[derive(Debug, Clone)]
pub struct HotPartitionConfig {
    /// Interval between monitoring ticks.
    pub monitor_interval: Duration,

    /// Upper bound on a single metrics-source call.
    pub metrics_timeout: Duration,

    /// Trailing window the metrics sample covers.
    pub metrics_window: Duration,

    /// Thresholds that make a partition hot.
    pub thresholds: HotPartitionThresholds,

    /// Maximum partitions rebalanced per tick, hottest first.
    pub max_rebalances_per_tick: usize,

    /// Fraction of a hot partition's items moved by REDISTRIBUTE.
    pub redistribute_fraction: f64,

    /// A sibling is under-utilized when its priority is below this fraction of
    /// the combined capacity threshold.
    pub underutilized_ratio: f64,

    /// TTL hint attached to CACHE directives.
    pub cache_ttl_hint: Duration,

    /// Maximum items per batch write during SPLIT/REDISTRIBUTE.
    pub batch_size: usize,

    /// Capacity of the rebalance event channel.
    pub event_channel_capacity: usize,
}

impl Default for HotPartitionConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(60),
            metrics_timeout: Duration::from_secs(10),
            metrics_window: Duration::from_secs(300),
            thresholds: HotPartitionThresholds::default(),
            max_rebalances_per_tick: 4,
            redistribute_fraction: 0.5,
            underutilized_ratio: 0.5,
            cache_ttl_hint: Duration::from_secs(300),
            batch_size: 25,
            event_channel_capacity: 256,
        }
    }
}

impl HotPartitionConfig {
    /// Set the monitoring interval.
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Set the metrics timeout.
    pub fn with_metrics_timeout(mut self, timeout: Duration) -> Self {
        self.metrics_timeout = timeout;
        self
    }

    /// Set the thresholds.
    pub fn with_thresholds(mut self, thresholds: HotPartitionThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Set the per-tick rebalance limit.
    pub fn with_max_rebalances_per_tick(mut self, max: usize) -> Self {
        self.max_rebalances_per_tick = max;
        self
    }

    /// Set the redistribution fraction.
    pub fn with_redistribute_fraction(mut self, fraction: f64) -> Self {
        self.redistribute_fraction = fraction;
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        if self.monitor_interval.is_zero() {
            return Err(Error::Config("monitor_interval must be non-zero".to_string()));
        }
        if !(self.redistribute_fraction > 0.0 && self.redistribute_fraction <= 1.0) {
            return Err(Error::Config(
                "redistribute_fraction must be in (0, 1]".to_string(),
            ));
        }
        if !(self.underutilized_ratio > 0.0 && self.underutilized_ratio <= 1.0) {
            return Err(Error::Config("underutilized_ratio must be in (0, 1]".to_string()));
        }
        if self.batch_size == 0 || self.event_channel_capacity == 0 {
            return Err(Error::Config(
                "batch_size and event_channel_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Secondary-index analysis configuration.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Utilization below which an index is a removal candidate.
    pub low_utilization: f64,

    /// Utilization above which more capacity is recommended.
    pub high_utilization: f64,

    /// Price per million read request units.
    pub read_unit_price: f64,

    /// Price per million write request units.
    pub write_unit_price: f64,

    /// Upper bound on a single metrics-source call.
    pub metrics_timeout: Duration,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            low_utilization: 0.01,
            high_utilization: 0.8,
            read_unit_price: 0.25,
            write_unit_price: 1.25,
            metrics_timeout: Duration::from_secs(10),
        }
    }
}

impl IndexConfig {
    /// Set utilization bounds.
    pub fn with_utilization_bounds(mut self, low: f64, high: f64) -> Self {
        self.low_utilization = low;
        self.high_utilization = high;
        self
    }

    /// Set request-unit prices (per million).
    pub fn with_prices(mut self, read: f64, write: f64) -> Self {
        self.read_unit_price = read;
        self.write_unit_price = write;
        self
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.low_utilization) || self.low_utilization >= self.high_utilization {
            return Err(Error::Config(
                "utilization bounds must satisfy 0 <= low < high".to_string(),
            ));
        }
        Ok(())
    }
}

/// Partition lifecycle configuration.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Entity types whose upcoming partitions are created ahead of writes.
    pub entity_types: Vec<String>,

    /// Granularity of the time buckets.
    pub granularity: Granularity,

    /// Number of buckets (current included) kept created ahead.
    pub create_ahead: u32,

    /// Inactivity age after which the default rule archives a partition.
    pub archive_after_days: u32,

    /// Age after which the default rule deletes an archived partition.
    pub delete_after_days: u32,

    /// Interval between scheduled lifecycle evaluations.
    pub evaluation_interval: Duration,

    /// Install the built-in archive/delete rules.
    pub install_default_rules: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            entity_types: Vec::new(),
            granularity: Granularity::Monthly,
            create_ahead: 2,
            archive_after_days: 90,
            delete_after_days: 365,
            evaluation_interval: Duration::from_secs(3600),
            install_default_rules: true,
        }
    }
}

impl LifecycleConfig {
    /// Set the entity types created ahead of writes.
    pub fn with_entity_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entity_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Set the bucket granularity.
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Set the number of buckets created ahead.
    pub fn with_create_ahead(mut self, buckets: u32) -> Self {
        self.create_ahead = buckets;
        self
    }

    /// Set the default archive age.
    pub fn with_archive_after_days(mut self, days: u32) -> Self {
        self.archive_after_days = days;
        self
    }

    /// Set the default delete age.
    pub fn with_delete_after_days(mut self, days: u32) -> Self {
        self.delete_after_days = days;
        self
    }

    /// Set the scheduler interval.
    pub fn with_evaluation_interval(mut self, interval: Duration) -> Self {
        self.evaluation_interval = interval;
        self
    }

    /// Enable or disable the built-in rules.
    pub fn with_default_rules(mut self, enabled: bool) -> Self {
        self.install_default_rules = enabled;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.create_ahead == 0 {
            return Err(Error::Config("create_ahead must be at least 1".to_string()));
        }
        if self.delete_after_days <= self.archive_after_days {
            return Err(Error::Config(
                "delete_after_days must exceed archive_after_days".to_string(),
            ));
        }
        if self.evaluation_interval.is_zero() {
            return Err(Error::Config("evaluation_interval must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Archive configuration.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Compress archived data with LZ4.
    pub compression: bool,

    /// Key prefix for blobs and manifests in the archive store.
    pub key_prefix: String,

    /// Retry policy for blob writes.
    pub retry: RetryPolicy,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression: true,
            key_prefix: "archive".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

impl ArchiveConfig {
    /// Enable or disable compression.
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.key_prefix.is_empty() {
            return Err(Error::Config("archive key_prefix must not be empty".to_string()));
        }
        self.retry.validate()
    }
}
