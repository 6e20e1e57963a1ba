//! Range-partitioned hash ring.
//!
//! Unlike a vnode ring, every shard owns exactly one contiguous range and the
//! ranges tile `[0, 2^32)` with no gaps or overlaps. Lookup finds the range
//! whose start is the greatest one not above the key's position.

use super::hash::{calculate_midpoint, HashAlgorithm, HashFunction, HASH_SPACE};
use super::shard::{Shard, ShardId, ShardStatus};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};

/// Ring of active shards.
#[derive(Debug, Clone)]
pub struct ShardRing {
    /// Range start position mapped to the owning shard.
    starts: BTreeMap<u64, ShardId>,

    /// Shards in the ring, by id.
    shards: HashMap<ShardId, Shard>,

    hash: HashAlgorithm,
}

impl ShardRing {
    /// Ring of `count` equal-width shards with ids `0..count`.
    pub fn new(count: u32, hash: HashAlgorithm) -> Result<Self> {
        if count == 0 {
            return Err(Error::Config("shard count must be at least 1".to_string()));
        }

        let mut ring = Self {
            starts: BTreeMap::new(),
            shards: HashMap::new(),
            hash,
        };
        let count = u64::from(count);
        for i in 0..count {
            let start = i * HASH_SPACE / count;
            let end = (i + 1) * HASH_SPACE / count;
            ring.insert(Shard::new(i as ShardId, start, end));
        }
        Ok(ring)
    }

    /// Hash algorithm in use.
    pub fn algorithm(&self) -> HashAlgorithm {
        self.hash
    }

    /// Ring position of a key.
    pub fn position(&self, key: &[u8]) -> u32 {
        self.hash.hash(key)
    }

    /// Shard owning a key. Total: every key maps to exactly one shard.
    pub fn shard_for(&self, key: &[u8]) -> ShardId {
        self.shard_at(self.position(key))
    }

    /// Shard owning a ring position.
    pub fn shard_at(&self, position: u32) -> ShardId {
        self.starts
            .range(..=u64::from(position))
            .next_back()
            .map(|(_, id)| *id)
            // The first range always starts at 0.
            .unwrap_or(0)
    }

    /// Number of shards.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Whether the ring holds no shards.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Shard by id.
    pub fn get(&self, id: ShardId) -> Option<&Shard> {
        self.shards.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: ShardId) -> Option<&mut Shard> {
        self.shards.get_mut(&id)
    }

    /// Shards ordered by range start.
    pub fn shards(&self) -> Vec<&Shard> {
        self.starts
            .values()
            .filter_map(|id| self.shards.get(id))
            .collect()
    }

    /// Highest shard id in the ring.
    pub fn max_id(&self) -> ShardId {
        self.shards.keys().copied().max().unwrap_or(0)
    }

    /// Shard a new shard should be carved from: highest load, ties broken by
    /// widest range, then lowest id.
    pub fn split_candidate(&self) -> Option<ShardId> {
        self.shards
            .values()
            .filter(|s| s.status == ShardStatus::Active)
            .max_by(|a, b| {
                a.load
                    .total_cmp(&b.load)
                    .then(a.width().cmp(&b.width()))
                    .then(b.id.cmp(&a.id))
            })
            .map(|s| s.id)
    }

    /// Upper part of `source`'s range a split would hand to a new shard.
    ///
    /// The source keeps `[start, m + 1)` and the new shard gets `[m + 1, end)`
    /// where `m` is the midpoint of the inclusive bounds.
    pub fn split_range(&self, source: ShardId) -> Result<(u64, u64)> {
        let shard = self.get(source).ok_or(Error::ShardNotFound(source))?;
        if shard.width() < 2 {
            return Err(Error::ShardRangeExhausted(source));
        }
        let mid = calculate_midpoint(&shard.start_hex(), &shard.end_hex())?;
        let mid = u64::from_str_radix(&mid, 16)
            .map_err(|e| Error::Internal(format!("midpoint parse: {}", e)))?;
        Ok((mid + 1, shard.end))
    }

    /// Apply a split: shrink `source` and insert `new_id` over `[split_at, end)`.
    pub(crate) fn apply_split(&mut self, source: ShardId, new_id: ShardId, split_at: u64) -> Result<()> {
        let shard = self.shards.get_mut(&source).ok_or(Error::ShardNotFound(source))?;
        if split_at <= shard.start || split_at >= shard.end {
            return Err(Error::InvalidHashRange(format!(
                "split point {:08x} outside shard {}",
                split_at, source
            )));
        }
        let end = shard.end;
        shard.end = split_at;
        self.insert(Shard::new(new_id, split_at, end));
        Ok(())
    }

    /// Neighbor that absorbs `id`'s range on removal: the preceding shard, or
    /// the following one when `id` starts at 0.
    pub fn merge_target(&self, id: ShardId) -> Result<ShardId> {
        let shard = self.get(id).ok_or(Error::ShardNotFound(id))?;
        if self.shards.len() <= 1 {
            return Err(Error::LastShard);
        }
        let neighbor = if shard.start == 0 {
            self.starts.get(&shard.end)
        } else {
            self.starts.range(..shard.start).next_back().map(|(_, id)| id)
        };
        neighbor
            .copied()
            .ok_or_else(|| Error::Internal(format!("shard {} has no neighbor", id)))
    }

    /// Remove `id`, extending `target` over its range. Returns the removed shard.
    pub(crate) fn apply_merge(&mut self, id: ShardId, target: ShardId) -> Result<Shard> {
        let removed = self.shards.get(&id).cloned().ok_or(Error::ShardNotFound(id))?;
        let absorber = self.shards.get(&target).cloned().ok_or(Error::ShardNotFound(target))?;

        let (start, end) = if absorber.end == removed.start {
            (absorber.start, removed.end)
        } else if removed.end == absorber.start {
            (removed.start, absorber.end)
        } else {
            return Err(Error::InvalidHashRange(format!(
                "shards {} and {} are not adjacent",
                id, target
            )));
        };

        self.starts.remove(&removed.start);
        self.starts.remove(&absorber.start);
        self.shards.remove(&id);
        self.starts.insert(start, target);
        if let Some(shard) = self.shards.get_mut(&target) {
            shard.start = start;
            shard.end = end;
        }
        Ok(removed)
    }

    /// Check the ranges tile the hash space exactly.
    pub fn validate(&self) -> Result<()> {
        let mut expected = 0u64;
        for shard in self.shards() {
            if shard.start != expected || shard.end <= shard.start {
                return Err(Error::InvalidHashRange(format!(
                    "shard {} covers [{:08x}, {:08x}), expected start {:08x}",
                    shard.id, shard.start, shard.end, expected
                )));
            }
            expected = shard.end;
        }
        if expected != HASH_SPACE {
            return Err(Error::InvalidHashRange(format!(
                "ring ends at {:x}, expected {:x}",
                expected, HASH_SPACE
            )));
        }
        Ok(())
    }

    fn insert(&mut self, shard: Shard) {
        self.starts.insert(shard.start, shard.id);
        self.shards.insert(shard.id, shard);
    }
}
