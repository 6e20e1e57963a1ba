//! Hot-partition classification and strategy selection.

use crate::config::HotPartitionThresholds;
use crate::types::PartitionMetrics;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How a hot partition is relieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RebalanceStrategy {
    /// Split the partition into two new ones.
    Split,
    /// Move part of its items to under-utilized siblings.
    Redistribute,
    /// Ask the surrounding service to cache reads.
    Cache,
    /// Ask the surrounding service to throttle writes.
    Throttle,
}

impl RebalanceStrategy {
    /// Lowercase name, used as a metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            RebalanceStrategy::Split => "split",
            RebalanceStrategy::Redistribute => "redistribute",
            RebalanceStrategy::Cache => "cache",
            RebalanceStrategy::Throttle => "throttle",
        }
    }

    /// Human-readable recommendation.
    pub fn recommendation(&self) -> &'static str {
        match self {
            RebalanceStrategy::Split => "splitting recommended",
            RebalanceStrategy::Redistribute => "redistributing writes recommended",
            RebalanceStrategy::Cache => "read-through caching recommended",
            RebalanceStrategy::Throttle => "write throttling recommended",
        }
    }

    /// Whether the strategy moves items.
    pub fn is_structural(&self) -> bool {
        matches!(self, RebalanceStrategy::Split | RebalanceStrategy::Redistribute)
    }
}

impl std::fmt::Display for RebalanceStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a sample exceeds any threshold.
pub fn is_hot(metrics: &PartitionMetrics, thresholds: &HotPartitionThresholds) -> bool {
    metrics.item_count > thresholds.item_count
        || metrics.consumed_rcu > thresholds.rcu
        || metrics.consumed_wcu > thresholds.wcu
        || metrics.priority() > thresholds.combined_capacity
}

/// Pick a strategy. Rules apply in order: too many items splits, heavy reads
/// cache, heavy writes redistribute, anything else throttles.
pub fn select_strategy(
    metrics: &PartitionMetrics,
    thresholds: &HotPartitionThresholds,
) -> RebalanceStrategy {
    if metrics.item_count > thresholds.item_count {
        RebalanceStrategy::Split
    } else if metrics.consumed_rcu > thresholds.rcu {
        RebalanceStrategy::Cache
    } else if metrics.consumed_wcu > thresholds.wcu {
        RebalanceStrategy::Redistribute
    } else {
        RebalanceStrategy::Throttle
    }
}

/// Samples ordered hottest first: priority descending, then item count
/// descending, then partition key for a stable order.
pub fn rank_by_priority(metrics: &[PartitionMetrics]) -> Vec<&PartitionMetrics> {
    let mut ranked: Vec<&PartitionMetrics> = metrics.iter().collect();
    ranked.sort_by(|a, b| compare_priority(a, b));
    ranked
}

fn compare_priority(a: &PartitionMetrics, b: &PartitionMetrics) -> Ordering {
    b.priority()
        .total_cmp(&a.priority())
        .then(b.item_count.cmp(&a.item_count))
        .then_with(|| a.partition_key.cmp(&b.partition_key))
}

/// A partition flagged as hot, with the strategy chosen for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotPartitionRecord {
    pub partition_key: String,
    pub priority: f64,
    pub item_count: u64,
    pub strategy: RebalanceStrategy,
    pub recommendation: String,
}

impl HotPartitionRecord {
    /// Record for `metrics` if it is hot.
    pub fn detect(metrics: &PartitionMetrics, thresholds: &HotPartitionThresholds) -> Option<Self> {
        if !is_hot(metrics, thresholds) {
            return None;
        }
        let strategy = select_strategy(metrics, thresholds);
        Some(Self {
            partition_key: metrics.partition_key.clone(),
            priority: metrics.priority(),
            item_count: metrics.item_count,
            strategy,
            recommendation: format!(
                "{}: {} (rcu={:.0}, wcu={:.0}, items={})",
                metrics.partition_key,
                strategy.recommendation(),
                metrics.consumed_rcu,
                metrics.consumed_wcu,
                metrics.item_count
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> HotPartitionThresholds {
        HotPartitionThresholds::default()
            .with_rcu(500.0)
            .with_wcu(500.0)
            .with_item_count(1000)
            .with_combined_capacity(800.0)
    }

    #[test]
    fn test_strategy_rules_in_order() {
        let t = thresholds();
        let split = PartitionMetrics::new("a", 2000.0, 1500.0, 5000);
        let cache = PartitionMetrics::new("b", 2000.0, 1500.0, 10);
        let redistribute = PartitionMetrics::new("c", 10.0, 900.0, 10);
        let throttle = PartitionMetrics::new("d", 450.0, 450.0, 10);

        assert_eq!(select_strategy(&split, &t), RebalanceStrategy::Split);
        assert_eq!(select_strategy(&cache, &t), RebalanceStrategy::Cache);
        assert_eq!(select_strategy(&redistribute, &t), RebalanceStrategy::Redistribute);
        assert_eq!(select_strategy(&throttle, &t), RebalanceStrategy::Throttle);

        // Only the combined threshold is crossed.
        assert!(is_hot(&throttle, &t));
        assert!(!is_hot(&PartitionMetrics::new("e", 100.0, 100.0, 10), &t));
    }

    #[test]
    fn test_rank_by_priority_ties_on_item_count() {
        let metrics = vec![
            PartitionMetrics::new("low", 10.0, 0.0, 1),
            PartitionMetrics::new("tie-small", 100.0, 0.0, 5),
            PartitionMetrics::new("tie-big", 50.0, 50.0, 50),
            PartitionMetrics::new("top", 500.0, 0.0, 1),
        ];
        let ranked: Vec<&str> = rank_by_priority(&metrics)
            .iter()
            .map(|m| m.partition_key.as_str())
            .collect();
        assert_eq!(ranked, vec!["top", "tie-big", "tie-small", "low"]);
    }

    #[test]
    fn test_detect_record_text() {
        let record =
            HotPartitionRecord::detect(&PartitionMetrics::new("USER#2024-02", 2000.0, 1500.0, 5000), &thresholds())
                .unwrap();
        assert_eq!(record.strategy, RebalanceStrategy::Split);
        assert!(record.recommendation.contains("splitting"));
        assert_eq!(record.priority, 3500.0);
    }
}
