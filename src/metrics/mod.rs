//! Metrics for observing the coordination layer itself.
//!
//! These are the layer's own counters (ticks, rebalances, migrations,
//! archives), not the consumed-capacity figures it reads from the
//! [`MetricsSource`](crate::store::MetricsSource).
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        LayerMetrics                          │
//! │  ┌───────────────┐  ┌────────────────┐  ┌─────────────────┐  │
//! │  │   Counters    │  │     Gauges     │  │   Histograms    │  │
//! │  │ - ticks       │  │ - shards       │  │ - tick time     │  │
//! │  │ - rebalances  │  │ - load_balance │  │ - migration     │  │
//! │  │ - archives    │  │ - monitored    │  │ - archive       │  │
//! │  └───────────────┘  └────────────────┘  └─────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod counters;
mod gauges;
mod histograms;

pub use counters::{Counter, LabeledCounter};
pub use gauges::{FloatGauge, Gauge};
pub use histograms::{Histogram, HistogramSnapshot, HistogramTimer, OPERATION_BUCKETS};

use std::time::Duration;

/// All metrics recorded by the layer's components.
#[derive(Debug)]
pub struct LayerMetrics {
    // Monitoring
    /// Monitoring ticks that ran to completion.
    pub ticks_completed: Counter,
    /// Ticks skipped because metrics were unavailable or timed out.
    pub ticks_skipped: Counter,
    /// Duration of completed ticks.
    pub tick_duration: Histogram,
    /// Hot partitions detected across all ticks.
    pub hot_partitions_detected: Counter,
    /// Tables with an active monitor.
    pub monitored_tables: Gauge,

    // Rebalancing
    /// Rebalance attempts by strategy.
    pub rebalances: LabeledCounter,
    /// Failed rebalance attempts by strategy.
    pub rebalance_failures: LabeledCounter,
    /// Items moved by SPLIT and REDISTRIBUTE.
    pub items_rebalanced: Counter,

    // Shards
    /// Shards currently in the ring.
    pub shards: Gauge,
    /// Latest shard load dispersion score.
    pub load_balance: FloatGauge,
    /// Shard migrations completed.
    pub migrations_completed: Counter,
    /// Shard migrations rolled back.
    pub migrations_failed: Counter,
    /// Items copied between shards.
    pub items_migrated: Counter,
    /// Duration of shard migrations.
    pub migration_duration: Histogram,

    // Lifecycle
    /// Partitions created ahead of writes.
    pub partitions_created: Counter,
    /// Partitions archived.
    pub partitions_archived: Counter,
    /// Archive attempts that failed and were left pending.
    pub archive_failures: Counter,
    /// Uncompressed bytes archived.
    pub bytes_archived: Counter,
    /// Snapshots exported.
    pub snapshots_exported: Counter,
    /// Partitions restored from snapshots.
    pub partitions_restored: Counter,
    /// Archived partitions deleted.
    pub partitions_deleted: Counter,
    /// Duration of a single partition archive.
    pub archive_duration: Histogram,
}

impl LayerMetrics {
    /// Create a zeroed metrics set.
    pub fn new() -> Self {
        Self {
            ticks_completed: Counter::new("monitor_ticks_total", "Completed monitoring ticks"),
            ticks_skipped: Counter::new("monitor_ticks_skipped_total", "Skipped monitoring ticks"),
            tick_duration: Histogram::new("monitor_tick_seconds", "Monitoring tick duration"),
            hot_partitions_detected: Counter::new(
                "hot_partitions_detected_total",
                "Hot partitions detected",
            ),
            monitored_tables: Gauge::new("monitored_tables", "Tables with an active monitor"),

            rebalances: LabeledCounter::new("rebalances_total", "Rebalance attempts", "strategy"),
            rebalance_failures: LabeledCounter::new(
                "rebalance_failures_total",
                "Failed rebalance attempts",
                "strategy",
            ),
            items_rebalanced: Counter::new("items_rebalanced_total", "Items moved by rebalancing"),

            shards: Gauge::new("shards", "Shards in the ring"),
            load_balance: FloatGauge::new("shard_load_balance", "Shard load dispersion (0 = balanced)"),
            migrations_completed: Counter::new("shard_migrations_total", "Completed shard migrations"),
            migrations_failed: Counter::new(
                "shard_migrations_failed_total",
                "Rolled back shard migrations",
            ),
            items_migrated: Counter::new("shard_items_migrated_total", "Items copied between shards"),
            migration_duration: Histogram::new("shard_migration_seconds", "Shard migration duration"),

            partitions_created: Counter::new("partitions_created_total", "Partitions created ahead"),
            partitions_archived: Counter::new("partitions_archived_total", "Partitions archived"),
            archive_failures: Counter::new("archive_failures_total", "Archive attempts left pending"),
            bytes_archived: Counter::new("archived_bytes_total", "Uncompressed bytes archived"),
            snapshots_exported: Counter::new("snapshots_exported_total", "Snapshots exported"),
            partitions_restored: Counter::new("partitions_restored_total", "Partitions restored"),
            partitions_deleted: Counter::new("partitions_deleted_total", "Archived partitions deleted"),
            archive_duration: Histogram::new("archive_seconds", "Partition archive duration"),
        }
    }

    /// Record one finished tick.
    pub fn record_tick(&self, duration: Duration, hot_partitions: usize) {
        self.ticks_completed.inc();
        self.tick_duration.observe_duration(duration);
        self.hot_partitions_detected.inc_by(hot_partitions as u64);
    }

    /// Record a rebalance outcome.
    pub fn record_rebalance(&self, strategy: &str, success: bool, items_moved: u64) {
        self.rebalances.inc(strategy);
        if !success {
            self.rebalance_failures.inc(strategy);
        }
        self.items_rebalanced.inc_by(items_moved);
    }

    /// Record a shard migration outcome.
    pub fn record_migration(&self, success: bool, duration: Duration, items: u64) {
        if success {
            self.migrations_completed.inc();
            self.items_migrated.inc_by(items);
        } else {
            self.migrations_failed.inc();
        }
        self.migration_duration.observe_duration(duration);
    }

    /// Record a successful archive.
    pub fn record_archive(&self, duration: Duration, original_bytes: u64) {
        self.partitions_archived.inc();
        self.bytes_archived.inc_by(original_bytes);
        self.archive_duration.observe_duration(duration);
    }

    /// Plain copy of the headline values.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks_completed: self.ticks_completed.get(),
            ticks_skipped: self.ticks_skipped.get(),
            hot_partitions_detected: self.hot_partitions_detected.get(),
            rebalances: self.rebalances.get_all(),
            rebalance_failures: self.rebalance_failures.get_all(),
            items_rebalanced: self.items_rebalanced.get(),
            shards: self.shards.get(),
            load_balance: self.load_balance.get(),
            migrations_completed: self.migrations_completed.get(),
            migrations_failed: self.migrations_failed.get(),
            partitions_created: self.partitions_created.get(),
            partitions_archived: self.partitions_archived.get(),
            archive_failures: self.archive_failures.get(),
            bytes_archived: self.bytes_archived.get(),
            partitions_restored: self.partitions_restored.get(),
        }
    }
}

impl Default for LayerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Headline metric values at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub ticks_completed: u64,
    pub ticks_skipped: u64,
    pub hot_partitions_detected: u64,
    pub rebalances: Vec<(String, u64)>,
    pub rebalance_failures: Vec<(String, u64)>,
    pub items_rebalanced: u64,
    pub shards: i64,
    pub load_balance: f64,
    pub migrations_completed: u64,
    pub migrations_failed: u64,
    pub partitions_created: u64,
    pub partitions_archived: u64,
    pub archive_failures: u64,
    pub bytes_archived: u64,
    pub partitions_restored: u64,
}

impl MetricsSnapshot {
    /// Fraction of ticks that were skipped.
    pub fn skip_rate(&self) -> f64 {
        let total = self.ticks_completed + self.ticks_skipped;
        if total == 0 {
            0.0
        } else {
            self.ticks_skipped as f64 / total as f64
        }
    }
}
