//! Secondary-index usage and cost analysis.
//!
//! Read-only: the manager reads index definitions and consumed capacity and
//! produces recommendations. It never changes an index.

use crate::config::IndexConfig;
use crate::error::{Error, Result};
use crate::store::{MetricsSource, TableStore};
use crate::types::{CapacityMetric, CapacityStats, IndexDescriptor, MetricTarget, MetricWindow};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Prices per million request units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexCostModel {
    pub read_unit_price: f64,
    pub write_unit_price: f64,
}

impl IndexCostModel {
    /// Estimated cost of the consumed units.
    pub fn estimate(&self, read_units: f64, write_units: f64) -> f64 {
        (read_units / 1_000_000.0) * self.read_unit_price
            + (write_units / 1_000_000.0) * self.write_unit_price
    }
}

impl From<&IndexConfig> for IndexCostModel {
    fn from(config: &IndexConfig) -> Self {
        Self {
            read_unit_price: config.read_unit_price,
            write_unit_price: config.write_unit_price,
        }
    }
}

/// Usage figures for one index over the analysis period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexUsage {
    pub index_name: String,
    /// Summed consumed read units.
    pub consumed_rcu: f64,
    /// Summed consumed write units.
    pub consumed_wcu: f64,
    pub average_rcu: f64,
    pub average_wcu: f64,
    /// Average consumption over provisioned capacity, or the index's share
    /// of all index consumption when it is on-demand.
    pub utilization: f64,
    /// Datapoints reported for reads and writes together.
    pub datapoints: usize,
    pub estimated_cost: f64,
}

/// Usage of every index on a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexUsageReport {
    pub table: String,
    pub period_days: u32,
    pub indexes: Vec<IndexUsage>,
    pub recommendations: Vec<String>,
}

impl IndexUsageReport {
    /// Usage of one index.
    pub fn index(&self, name: &str) -> Option<&IndexUsage> {
        self.indexes.iter().find(|i| i.index_name == name)
    }

    /// Sum of estimated costs.
    pub fn total_cost(&self) -> f64 {
        self.indexes.iter().map(|i| i.estimated_cost).sum()
    }
}

/// An index with no recorded activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnusedIndex {
    pub index_name: String,
    pub recommendation: String,
}

/// Analyzes secondary indexes from the metrics feed.
#[derive(Debug)]
pub struct IndexManager {
    config: IndexConfig,
    metrics_source: Arc<dyn MetricsSource>,
    store: Arc<dyn TableStore>,
}

impl IndexManager {
    /// Create a manager.
    pub fn new(
        config: IndexConfig,
        metrics_source: Arc<dyn MetricsSource>,
        store: Arc<dyn TableStore>,
    ) -> Self {
        Self {
            config,
            metrics_source,
            store,
        }
    }

    /// Cost model in use.
    pub fn cost_model(&self) -> IndexCostModel {
        IndexCostModel::from(&self.config)
    }

    /// Consumption, utilization and cost of every index over the last
    /// `period_days` days, with recommendations.
    #[instrument(skip(self))]
    pub async fn analyze_index_usage(&self, table: &str, period_days: u32) -> Result<IndexUsageReport> {
        let window = window_for(period_days)?;
        let indexes = self.store.list_indexes(table).await?;
        let cost_model = self.cost_model();

        let mut raw = Vec::with_capacity(indexes.len());
        for index in &indexes {
            let (reads, writes) = self.capacity(table, &index.name, &window).await?;
            raw.push((index, reads, writes));
        }

        let total_consumed: f64 = raw.iter().map(|(_, r, w)| r.sum + w.sum).sum();
        let mut usages = Vec::with_capacity(raw.len());
        let mut recommendations = Vec::new();

        for (index, reads, writes) in raw {
            let utilization = utilization(index, &reads, &writes, total_consumed);
            let usage = IndexUsage {
                index_name: index.name.clone(),
                consumed_rcu: reads.sum,
                consumed_wcu: writes.sum,
                average_rcu: reads.average,
                average_wcu: writes.average,
                utilization,
                datapoints: reads.datapoints.len() + writes.datapoints.len(),
                estimated_cost: cost_model.estimate(reads.sum, writes.sum),
            };

            if usage.utilization < self.config.low_utilization {
                recommendations.push(format!(
                    "{}: utilization {:.2}% is near zero, consider removing the index",
                    usage.index_name,
                    usage.utilization * 100.0
                ));
            } else if usage.utilization > self.config.high_utilization {
                recommendations.push(format!(
                    "{}: utilization {:.0}% is high, consider increasing capacity",
                    usage.index_name,
                    usage.utilization * 100.0
                ));
            }
            usages.push(usage);
        }

        info!(
            table,
            period_days,
            indexes = usages.len(),
            recommendations = recommendations.len(),
            "Analyzed index usage"
        );
        Ok(IndexUsageReport {
            table: table.to_string(),
            period_days,
            indexes: usages,
            recommendations,
        })
    }

    /// Indexes with no read or write datapoints over the period.
    #[instrument(skip(self))]
    pub async fn detect_unused_indexes(&self, table: &str, period_days: u32) -> Result<Vec<UnusedIndex>> {
        let window = window_for(period_days)?;
        let indexes = self.store.list_indexes(table).await?;

        let mut unused = Vec::new();
        for index in indexes {
            let (reads, writes) = self.capacity(table, &index.name, &window).await?;
            if reads.has_activity() || writes.has_activity() {
                continue;
            }
            debug!(table, index = %index.name, "Index has no activity");
            unused.push(UnusedIndex {
                recommendation: format!(
                    "{}: no reads or writes in {} days, consider removing the index",
                    index.name, period_days
                ),
                index_name: index.name,
            });
        }
        Ok(unused)
    }

    async fn capacity(
        &self,
        table: &str,
        index: &str,
        window: &MetricWindow,
    ) -> Result<(CapacityStats, CapacityStats)> {
        let target = MetricTarget::Index(index.to_string());
        let reads = self.fetch(table, &target, CapacityMetric::Read, window).await?;
        let writes = self.fetch(table, &target, CapacityMetric::Write, window).await?;
        Ok((reads, writes))
    }

    async fn fetch(
        &self,
        table: &str,
        target: &MetricTarget,
        metric: CapacityMetric,
        window: &MetricWindow,
    ) -> Result<CapacityStats> {
        tokio::time::timeout(
            self.config.metrics_timeout,
            self.metrics_source
                .get_consumed_capacity(table, target, metric, window),
        )
        .await
        .map_err(|_| Error::MetricsUnavailable(format!("{:?} metrics timed out", target)))?
    }
}

fn window_for(period_days: u32) -> Result<MetricWindow> {
    if period_days == 0 {
        return Err(Error::Config("analysis period must be at least one day".to_string()));
    }
    Ok(MetricWindow::last_days(period_days))
}

fn utilization(
    index: &IndexDescriptor,
    reads: &CapacityStats,
    writes: &CapacityStats,
    total_consumed: f64,
) -> f64 {
    match (index.provisioned_rcu, index.provisioned_wcu) {
        (Some(rcu), Some(wcu)) if rcu + wcu > 0.0 => {
            let read = if rcu > 0.0 { reads.average / rcu } else { 0.0 };
            let write = if wcu > 0.0 { writes.average / wcu } else { 0.0 };
            read.max(write)
        }
        _ if total_consumed > 0.0 => (reads.sum + writes.sum) / total_consumed,
        _ => 0.0,
    }
}
