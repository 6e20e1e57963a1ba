//! Hash-range sharding.
//!
//! Keys are hashed onto a 32-bit ring that is cut into contiguous ranges, one
//! per shard. Adding a shard splits the busiest range at its midpoint;
//! removing one merges its range into a neighbor. Either way only the keys of
//! the affected range move.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ShardManager                         │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │                      ShardRing                       │   │
//! │  │  [00000000,40000000) [40000000,80000000) ...         │   │
//! │  │       shard 0             shard 1                    │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                                                             │
//! │  "user:123" → murmur3 → 0x5a3c91e2 → shard 1                │
//! │                                                             │
//! │  add_shard(): split busiest range at its midpoint           │
//! │     quiesce → copy → verify → cutover → retire              │
//! └─────────────────────────────────────────────────────────────┘
//! ```

mod hash;
mod manager;
mod ring;
mod shard;

pub use hash::{calculate_midpoint, HashAlgorithm, HashFunction, HASH_SPACE};
pub use manager::{load_balance, ShardManager, ShardStatistics};
pub use ring::ShardRing;
pub use shard::{storage_key, Shard, ShardId, ShardStatus};
