//! Core types shared by the partitioning, sharding and lifecycle components.

use bytes::Bytes;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time load sample for one partition, as reported by the metrics source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionMetrics {
    /// Partition key the sample belongs to.
    pub partition_key: String,
    /// Consumed read capacity units.
    pub consumed_rcu: f64,
    /// Consumed write capacity units.
    pub consumed_wcu: f64,
    /// Number of items stored in the partition.
    pub item_count: u64,
}

impl PartitionMetrics {
    /// Create a sample.
    pub fn new(
        partition_key: impl Into<String>,
        consumed_rcu: f64,
        consumed_wcu: f64,
        item_count: u64,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            consumed_rcu,
            consumed_wcu,
            item_count,
        }
    }

    /// Rebalancing priority: total consumed capacity.
    pub fn priority(&self) -> f64 {
        self.consumed_rcu + self.consumed_wcu
    }
}

/// A single stored record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Partition (or shard-qualified) key.
    pub partition_key: String,
    /// Sort key, unique within the partition.
    pub sort_key: String,
    /// Opaque record body.
    pub payload: Bytes,
}

impl Item {
    /// Create an item.
    pub fn new(
        partition_key: impl Into<String>,
        sort_key: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: sort_key.into(),
            payload: payload.into(),
        }
    }

    /// Same item re-homed under another partition key.
    pub fn with_partition(&self, partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key: self.sort_key.clone(),
            payload: self.payload.clone(),
        }
    }

    /// Approximate stored size in bytes.
    pub fn size_bytes(&self) -> u64 {
        (self.partition_key.len() + self.sort_key.len() + self.payload.len()) as u64
    }

    /// Delete request addressing this item.
    pub fn delete_request(&self) -> WriteRequest {
        WriteRequest::Delete {
            partition_key: self.partition_key.clone(),
            sort_key: self.sort_key.clone(),
        }
    }
}

/// One entry of a batch write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteRequest {
    /// Insert or overwrite an item.
    Put(Item),
    /// Delete an item; deleting a missing item is a no-op.
    Delete {
        partition_key: String,
        sort_key: String,
    },
}

impl WriteRequest {
    /// Partition key touched by this request.
    pub fn partition_key(&self) -> &str {
        match self {
            WriteRequest::Put(item) => &item.partition_key,
            WriteRequest::Delete { partition_key, .. } => partition_key,
        }
    }
}

/// Key condition for a query: exact partition key, optional sort-key prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCondition {
    pub partition_key: String,
    pub sort_key_prefix: Option<String>,
}

impl KeyCondition {
    /// All items of a partition.
    pub fn partition(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            sort_key_prefix: None,
        }
    }

    /// Items of a partition whose sort key begins with `prefix`.
    pub fn with_sort_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.sort_key_prefix = Some(prefix.into());
        self
    }

    /// Whether an item satisfies the condition.
    pub fn matches(&self, item: &Item) -> bool {
        item.partition_key == self.partition_key
            && self
                .sort_key_prefix
                .as_deref()
                .map_or(true, |p| item.sort_key.starts_with(p))
    }
}

/// Predicate for a full-table scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFilter {
    /// Every item.
    All,
    /// Items whose partition key begins with the prefix.
    PartitionPrefix(String),
}

impl ScanFilter {
    /// Whether an item satisfies the filter.
    pub fn matches(&self, item: &Item) -> bool {
        match self {
            ScanFilter::All => true,
            ScanFilter::PartitionPrefix(prefix) => item.partition_key.starts_with(prefix.as_str()),
        }
    }
}

/// Partition metadata returned by the table store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    pub partition_key: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Last time an item was written to the partition, if tracked.
    pub last_write_at: Option<DateTime<Utc>>,
    pub item_count: u64,
    pub size_bytes: u64,
}

impl PartitionDescriptor {
    /// Descriptor with no activity information.
    pub fn new(partition_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            created_at: None,
            last_write_at: None,
            item_count: 0,
            size_bytes: 0,
        }
    }
}

/// Secondary index metadata returned by the table store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    /// Provisioned read capacity; `None` for on-demand indexes.
    pub provisioned_rcu: Option<f64>,
    /// Provisioned write capacity; `None` for on-demand indexes.
    pub provisioned_wcu: Option<f64>,
}

impl IndexDescriptor {
    /// On-demand index descriptor.
    pub fn on_demand(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provisioned_rcu: None,
            provisioned_wcu: None,
        }
    }

    /// Provisioned index descriptor.
    pub fn provisioned(name: impl Into<String>, rcu: f64, wcu: f64) -> Self {
        Self {
            name: name.into(),
            provisioned_rcu: Some(rcu),
            provisioned_wcu: Some(wcu),
        }
    }
}

/// What a capacity query is about.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetricTarget {
    /// The whole table.
    Table,
    /// One partition.
    Partition(String),
    /// One secondary index.
    Index(String),
}

/// Which capacity dimension to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapacityMetric {
    Read,
    Write,
}

/// Time window for a metrics query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Aggregation period of each datapoint, in seconds.
    pub period_secs: u32,
}

impl MetricWindow {
    /// Window covering the last `days` days, aggregated hourly.
    pub fn last_days(days: u32) -> Self {
        let end = Utc::now();
        Self {
            start: end - ChronoDuration::days(i64::from(days)),
            end,
            period_secs: 3600,
        }
    }

    /// Window covering the last `duration`, aggregated at `period_secs`.
    pub fn trailing(duration: std::time::Duration, period_secs: u32) -> Self {
        let end = Utc::now();
        let span = ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::minutes(5));
        Self {
            start: end - span,
            end,
            period_secs: period_secs.max(1),
        }
    }
}

/// One aggregated metric datapoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Answer to a consumed-capacity query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacityStats {
    pub sum: f64,
    pub average: f64,
    pub datapoints: Vec<Datapoint>,
}

impl CapacityStats {
    /// Build stats from raw datapoints.
    pub fn from_datapoints(datapoints: Vec<Datapoint>) -> Self {
        let sum: f64 = datapoints.iter().map(|d| d.value).sum();
        let average = if datapoints.is_empty() {
            0.0
        } else {
            sum / datapoints.len() as f64
        };
        Self {
            sum,
            average,
            datapoints,
        }
    }

    /// Whether any datapoint was reported.
    pub fn has_activity(&self) -> bool {
        !self.datapoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_is_total_capacity() {
        let m = PartitionMetrics::new("USER#2024-03", 2000.0, 1500.0, 5000);
        assert_eq!(m.priority(), 3500.0);
    }

    #[test]
    fn test_key_condition_prefix() {
        let item = Item::new("p", "order#42", "x");
        assert!(KeyCondition::partition("p").matches(&item));
        assert!(KeyCondition::partition("p").with_sort_prefix("order#").matches(&item));
        assert!(!KeyCondition::partition("p").with_sort_prefix("user#").matches(&item));
        assert!(!KeyCondition::partition("q").matches(&item));
    }

    #[test]
    fn test_capacity_stats_average() {
        let now = Utc::now();
        let stats = CapacityStats::from_datapoints(vec![
            Datapoint { timestamp: now, value: 2.0 },
            Datapoint { timestamp: now, value: 4.0 },
        ]);
        assert_eq!(stats.sum, 6.0);
        assert_eq!(stats.average, 3.0);
        assert!(stats.has_activity());
        assert!(!CapacityStats::default().has_activity());
    }
}
