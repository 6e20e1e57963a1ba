//! Hot-partition detection and rebalancing.
//!
//! A partition is hot when its consumed capacity or item count crosses a
//! threshold. Each hot partition gets one of four strategies:
//!
//! ```text
//!   item_count > threshold ──► SPLIT         two children, items dealt evenly
//!   rcu > threshold        ──► CACHE         event to the surrounding service
//!   wcu > threshold        ──► REDISTRIBUTE  move items to cool siblings
//!   otherwise              ──► THROTTLE      event to the surrounding service
//! ```
//!
//! Only one rebalance or lifecycle action may touch a partition at a time;
//! [`PartitionLocks`] is shared with the lifecycle manager for that purpose.

mod executor;
mod locks;
mod manager;
mod strategy;

pub use locks::{PartitionGuard, PartitionLocks};
pub use manager::{
    HotPartitionManager, MonitorState, RebalanceEvent, RebalanceResult, TickReport,
};
pub use strategy::{
    is_hot, rank_by_priority, select_strategy, HotPartitionRecord, RebalanceStrategy,
};
