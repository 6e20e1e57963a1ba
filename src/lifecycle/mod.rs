//! Partition lifecycle: state machine, rules, archival and restore.
//!
//! ```text
//!   CREATED ──► ACTIVE ──► HOT ──► REBALANCING
//!     │           ▲  ▲      │           │
//!     │           │  └──────┘◄──────────┘
//!     │           │
//!     └──────► ARCHIVING ──► ARCHIVED ──► RESTORING ──► ACTIVE
//!                                │
//!                                └──► DELETED
//! ```
//!
//! [`PartitionRegistry`] rejects any other move. The registry and
//! [`PartitionLocks`](crate::rebalancing::PartitionLocks) are shared with the
//! hot-partition manager so both components see one state per partition.

mod archive;
mod codec;
mod manager;
mod rules;
mod state;

pub use archive::{ArchiveSnapshot, PartitionArchiver};
pub use codec::{decode_items, encode_items, EncodedPayload};
pub use manager::{LifecycleReport, PartitionLifecycleManager};
pub use rules::{
    default_rules, select_rule, LifecycleAction, LifecycleRule, PartitionAge, PartitionPredicate,
    RuleTrigger, ARCHIVE_INACTIVE_RULE, DELETE_EXPIRED_RULE,
};
pub use state::{PartitionRecord, PartitionRegistry, PartitionState};
