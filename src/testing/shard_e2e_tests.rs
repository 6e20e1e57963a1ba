//! Shard topology end-to-end tests.
//!
//! | Scenario                     | Verification                                   |
//! |------------------------------|------------------------------------------------|
//! | Scale out under load skew    | Hottest shard splits, every key still readable |
//! | Writes during migration      | No write lost, ring still tiles the hash space |
//! | Scale in to one shard        | Every key survives repeated merges             |
//! | Failed copy                  | Topology unchanged, stray copies cleaned up    |

#[cfg(test)]
mod tests {
    use crate::config::ShardConfig;
    use crate::error::Error;
    use crate::sharding::{HashAlgorithm, Shard, ShardManager, ShardStatus, HASH_SPACE};
    use crate::store::TableStore;
    use crate::testing::{init_tracing, MemoryTableStore};
    use crate::types::ScanFilter;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn assert_tiles(shards: &[Shard]) {
        let mut active: Vec<&Shard> = shards
            .iter()
            .filter(|s| s.status != ShardStatus::Retired)
            .collect();
        active.sort_by_key(|s| s.start);
        assert_eq!(active.first().map(|s| s.start), Some(0));
        for pair in active.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap at {}", pair[0].end);
        }
        assert_eq!(active.last().map(|s| s.end), Some(HASH_SPACE));
    }

    async fn populate(manager: &ShardManager, n: usize) {
        for i in 0..n {
            manager
                .put_item(&format!("tenant-{}:{}", i % 7, i), format!("value-{}", i))
                .await
                .unwrap();
        }
    }

    async fn assert_readable(manager: &ShardManager, n: usize) {
        for i in 0..n {
            let key = format!("tenant-{}:{}", i % 7, i);
            assert_eq!(
                manager.get_item(&key).await.unwrap(),
                Some(Bytes::from(format!("value-{}", i))),
                "lost {}",
                key
            );
        }
    }

    #[tokio::test]
    async fn test_scale_out_splits_hottest_shard() {
        init_tracing();
        let store = Arc::new(MemoryTableStore::new());
        let manager = ShardManager::new(ShardConfig::new(4), store.clone()).unwrap();
        populate(&manager, 400).await;

        let hot = manager.record_load("tenant-1:hot", 1_000.0);
        let before = manager.shard(hot).unwrap();

        let added = manager.add_shard().await.unwrap();
        let stats = manager.get_shard_statistics();
        assert_eq!(stats.total_shards, 5);
        assert!((0.0..=1.0).contains(&stats.load_balance));

        // The new shard took the upper half of the hot shard's range.
        let source = manager.shard(hot).unwrap();
        assert_eq!(source.start, before.start);
        assert_eq!(source.end, added.start);
        assert_eq!(added.end, before.end);
        // Load is split with the range.
        let share = added.width() as f64 / before.width() as f64;
        assert!((added.load - before.load * share).abs() < 1e-6);
        assert!((added.load + source.load - before.load).abs() < 1e-6);

        assert_tiles(&manager.shards());
        assert_readable(&manager, 400).await;
        assert_eq!(store.item_count("shards"), 400);
    }

    #[tokio::test]
    async fn test_writes_during_migration_are_not_lost() {
        init_tracing();
        let store = Arc::new(MemoryTableStore::new());
        let manager = Arc::new(
            ShardManager::new(
                ShardConfig::new(2)
                    .with_batch_size(5)
                    .with_cutover_timeout(Duration::from_secs(5)),
                store.clone(),
            )
            .unwrap(),
        );
        populate(&manager, 200).await;

        let writer = {
            let manager = manager.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    manager
                        .put_item(&format!("late:{}", i), format!("late-{}", i))
                        .await
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        manager.add_shard().await.unwrap();
        manager.add_shard().await.unwrap();
        writer.await.unwrap();

        assert_tiles(&manager.shards());
        assert_readable(&manager, 200).await;
        for i in 0..100 {
            assert_eq!(
                manager.get_item(&format!("late:{}", i)).await.unwrap(),
                Some(Bytes::from(format!("late-{}", i)))
            );
        }
        assert_eq!(store.item_count("shards"), 300);
    }

    #[tokio::test]
    async fn test_scale_in_to_single_shard() {
        init_tracing();
        let store = Arc::new(MemoryTableStore::new());
        let manager = ShardManager::new(
            ShardConfig::new(5).with_hash_algorithm(HashAlgorithm::XxHash64),
            store.clone(),
        )
        .unwrap();
        populate(&manager, 250).await;

        for id in [3, 0, 4, 1] {
            manager.remove_shard(id).await.unwrap();
            assert_tiles(&manager.shards());
        }

        let stats = manager.get_shard_statistics();
        assert_eq!(stats.total_shards, 1);
        assert_eq!(stats.retired_shards, 4);
        assert_eq!(stats.load_balance, 0.0);
        assert!(matches!(manager.remove_shard(2).await, Err(Error::LastShard)));

        assert_readable(&manager, 250).await;
        assert_eq!(store.item_count("shards"), 250);
    }

    #[tokio::test]
    async fn test_failed_copy_leaves_topology_untouched() {
        init_tracing();
        let store = Arc::new(MemoryTableStore::new());
        let manager = ShardManager::new(ShardConfig::new(4).with_batch_size(10), store.clone()).unwrap();
        populate(&manager, 300).await;
        let before = manager.shards();

        // First copy batch lands, the second fails.
        store.fail_write_at(1);
        assert!(matches!(manager.add_shard().await, Err(Error::MigrationFailure(_))));

        let after = manager.shards();
        assert_eq!(after.len(), before.len());
        for (a, b) in before.iter().zip(&after) {
            assert_eq!((a.id, a.start, a.end), (b.id, b.start, b.end));
        }
        assert_eq!(store.item_count("shards"), 300);

        // Nothing is left behind that a reclaim pass would need to move.
        for shard in manager.shards() {
            assert_eq!(manager.reclaim_stray_items(shard.id).await.unwrap(), 0);
        }
        assert_readable(&manager, 300).await;
        assert_eq!(store.scan("shards", &ScanFilter::All).await.unwrap().len(), 300);
    }
}
