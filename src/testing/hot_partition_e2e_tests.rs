//! Hot-partition monitoring end-to-end tests.
//!
//! A monitor runs against in-memory collaborators on paused time, so the
//! scenarios exercise the real periodic task without sleeping.
//!
//! | Scenario                   | Verification                                 |
//! |----------------------------|----------------------------------------------|
//! | Oversized partition        | Monitor splits it, children registered       |
//! | Metrics outage             | Ticks skipped, monitor keeps running         |
//! | Partition cools down       | Registry moves it back to ACTIVE             |
//! | Detection parity           | Monitor and partitioner rank the same        |
//! | Shared locks               | Busy partitions are not rebalanced           |

#[cfg(test)]
mod tests {
    use crate::config::{HotPartitionConfig, HotPartitionThresholds};
    use crate::lifecycle::{PartitionRegistry, PartitionState};
    use crate::partitioning::{partition_key, Granularity, TimeBasedPartitioner};
    use crate::rebalancing::{
        HotPartitionManager, MonitorState, PartitionLocks, RebalanceEvent, RebalanceStrategy,
    };
    use crate::store::TableStore;
    use crate::testing::{init_tracing, MemoryMetricsSource, MemoryTableStore};
    use crate::types::{Item, KeyCondition, PartitionMetrics, WriteRequest};
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;

    const TABLE: &str = "events";

    fn config() -> HotPartitionConfig {
        HotPartitionConfig::default()
            .with_monitor_interval(Duration::from_secs(30))
            .with_thresholds(
                HotPartitionThresholds::default()
                    .with_rcu(1000.0)
                    .with_wcu(1000.0)
                    .with_item_count(1000)
                    .with_combined_capacity(1500.0),
            )
    }

    async fn seed(store: &MemoryTableStore, key: &str, n: usize) {
        let puts: Vec<WriteRequest> = (0..n)
            .map(|i| WriteRequest::Put(Item::new(key, format!("evt-{:06}", i), vec![9u8; 24])))
            .collect();
        for chunk in puts.chunks(500) {
            store.batch_write(TABLE, chunk.to_vec()).await.unwrap();
        }
    }

    fn current(entity: &str) -> String {
        partition_key(entity, Utc::now(), Granularity::Monthly)
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_splits_oversized_partition() {
        init_tracing();
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        let key = current("USER");
        seed(&store, &key, 5001).await;
        source.set_partition_metrics(TABLE, vec![PartitionMetrics::new(key.clone(), 2000.0, 1500.0, 5001)]);

        let manager = Arc::new(HotPartitionManager::new(config(), source.clone(), store.clone()));
        let mut events = manager.subscribe();

        assert!(manager.start_monitoring(TABLE));
        assert!(!manager.start_monitoring(TABLE));

        match events.recv().await.unwrap() {
            RebalanceEvent::PartitionSplit {
                original,
                new_partitions,
                items_moved,
                ..
            } => {
                assert_eq!(original, key);
                assert_eq!(new_partitions, vec![format!("{}#0", key), format!("{}#1", key)]);
                assert_eq!(items_moved, 5001);
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Waits for the tick that published the event to finish.
        manager.shutdown().await;
        assert!(!manager.stop_monitoring(TABLE));
        assert_eq!(manager.monitor_state(TABLE), MonitorState::Idle);

        let left = store.query(TABLE, &KeyCondition::partition(format!("{}#0", key))).await.unwrap();
        let right = store.query(TABLE, &KeyCondition::partition(format!("{}#1", key))).await.unwrap();
        assert_eq!(left.len() + right.len(), 5001);
        assert!(left.len().abs_diff(right.len()) <= 1);
        assert_eq!(manager.registry().state(TABLE, &format!("{}#0", key)), PartitionState::Active);
        assert!(!manager.registry().contains(TABLE, &key));

        let snapshot = manager.metrics().snapshot();
        assert!(snapshot.ticks_completed >= 1);
        assert_eq!(snapshot.items_rebalanced, 5001);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_survives_metrics_outage() {
        init_tracing();
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        let manager = Arc::new(HotPartitionManager::new(config(), source.clone(), store));

        source.set_unavailable(true);
        manager.start_monitoring(TABLE);
        tokio::time::sleep(Duration::from_secs(65)).await;
        assert!(manager.metrics().snapshot().ticks_skipped >= 2);
        assert!(manager.is_monitoring(TABLE));

        source.set_unavailable(false);
        source.set_partition_metrics(TABLE, vec![PartitionMetrics::new(current("USER"), 10.0, 10.0, 5)]);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(manager.metrics().snapshot().ticks_completed >= 1);

        assert!(manager.stop_monitoring(TABLE));
        assert!(!manager.stop_monitoring(TABLE));
        assert!(!manager.is_monitoring(TABLE));
        assert_eq!(manager.monitor_state(TABLE), MonitorState::Idle);
    }

    #[tokio::test]
    async fn test_cooled_partition_returns_to_active() {
        init_tracing();
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        let registry = Arc::new(PartitionRegistry::new());
        let manager = HotPartitionManager::new(
            config().with_max_rebalances_per_tick(1),
            source.clone(),
            store,
        )
        .with_registry(registry.clone());

        let a = current("USER");
        let b = current("PROJECT");
        source.set_partition_metrics(
            TABLE,
            vec![
                PartitionMetrics::new(a.clone(), 1800.0, 0.0, 10),
                PartitionMetrics::new(b.clone(), 1200.0, 0.0, 10),
            ],
        );

        let report = manager.run_tick(TABLE).await.unwrap();
        assert_eq!(report.hot.len(), 2);
        assert_eq!(report.rebalanced.len(), 1);
        assert_eq!(report.rebalanced[0].strategy, RebalanceStrategy::Cache);
        assert_eq!(registry.state(TABLE, &a), PartitionState::Active);
        assert_eq!(registry.state(TABLE, &b), PartitionState::Hot);

        source.set_partition_metrics(TABLE, vec![PartitionMetrics::new(a.clone(), 5.0, 5.0, 10)]);
        let report = manager.run_tick(TABLE).await.unwrap();
        assert!(report.hot.is_empty());
        assert_eq!(registry.state(TABLE, &b), PartitionState::Active);
    }

    #[tokio::test]
    async fn test_detection_matches_partitioner() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        let samples = vec![
            PartitionMetrics::new("USER#2024-01", 1200.0, 0.0, 10),
            PartitionMetrics::new("USER#2024-02", 10.0, 1200.0, 10),
            PartitionMetrics::new("USER#2024-03", 10.0, 10.0, 5000),
            PartitionMetrics::new("USER#2024-04", 800.0, 800.0, 10),
            PartitionMetrics::new("USER#2024-05", 1.0, 1.0, 1),
        ];
        source.set_partition_metrics(TABLE, samples.clone());

        let manager = HotPartitionManager::new(config().with_max_rebalances_per_tick(0), source, store);
        let partitioner = TimeBasedPartitioner::new(
            crate::config::PartitionerConfig::default().with_thresholds(config().thresholds),
        );

        let report = manager.run_tick(TABLE).await.unwrap();
        let detected = partitioner.detect_hot_partitions(TABLE, &samples);
        assert_eq!(report.hot, detected);
        assert_eq!(
            detected.iter().map(|r| r.strategy).collect::<Vec<_>>(),
            vec![
                RebalanceStrategy::Throttle,
                RebalanceStrategy::Redistribute,
                RebalanceStrategy::Cache,
                RebalanceStrategy::Split,
            ]
        );
    }

    #[tokio::test]
    async fn test_shared_locks_block_concurrent_actions() {
        let source = Arc::new(MemoryMetricsSource::new());
        let store = Arc::new(MemoryTableStore::new());
        let locks = PartitionLocks::shared();
        let manager = HotPartitionManager::new(config(), source, store.clone()).with_locks(locks.clone());
        let key = current("USER");
        seed(&store, &key, 2000).await;

        let held = locks.try_acquire(TABLE, &key).unwrap();
        let result = manager
            .rebalance_hot_partition(TABLE, &PartitionMetrics::new(key.clone(), 0.0, 0.0, 2000))
            .await;
        assert!(!result.success);
        assert_eq!(result.reason.as_deref(), Some("partition busy"));
        assert_eq!(result.new_partitions.len(), 2);
        drop(held);

        let result = manager
            .rebalance_hot_partition(TABLE, &PartitionMetrics::new(key.clone(), 0.0, 0.0, 2000))
            .await;
        assert!(result.success, "{:?}", result.reason);
        assert_eq!(locks.held_count(), 0);
    }
}
