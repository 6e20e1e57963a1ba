//! Error types for the coordination layer.

use std::io;
use thiserror::Error;

use crate::lifecycle::PartitionState;
use crate::sharding::ShardId;

/// Result type alias for coordination-layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the coordination layer.
#[derive(Error, Debug)]
pub enum Error {
    /// The metrics source could not answer (unreachable, throttled, timed out).
    ///
    /// Monitoring treats this as a skipped tick, never as fatal.
    #[error("metrics unavailable: {0}")]
    MetricsUnavailable(String),

    /// A data migration (shard move, split, redistribution) failed and was rolled back.
    #[error("migration failed: {0}")]
    MigrationFailure(String),

    /// Writing an archive blob or manifest failed after all retries.
    #[error("archive write failed for {partition_key}: {reason}")]
    ArchiveWriteFailure {
        partition_key: String,
        reason: String,
    },

    /// No snapshot exists for the requested partition.
    #[error("no snapshot found for {table}/{partition_key}")]
    RestoreNotFound {
        table: String,
        partition_key: String,
    },

    /// The table store rejected or failed an operation.
    #[error("store error: {0}")]
    Store(String),

    /// The archive store failed an operation.
    #[error("archive store error: {0}")]
    ArchiveStore(String),

    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),

    /// The operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Shard not found.
    #[error("shard not found: {0}")]
    ShardNotFound(ShardId),

    /// The shard's hash range is too narrow to split again.
    #[error("shard {0} hash range cannot be split further")]
    ShardRangeExhausted(ShardId),

    /// The last remaining shard cannot be removed.
    #[error("cannot remove the last shard")]
    LastShard,

    /// A hash range bound was not valid hex or was out of order.
    #[error("invalid hash range: {0}")]
    InvalidHashRange(String),

    /// The partition state machine does not allow this transition.
    #[error("invalid transition for {partition_key}: {from} -> {to}")]
    InvalidTransition {
        partition_key: String,
        from: PartitionState,
        to: PartitionState,
    },

    /// Another rebalance or lifecycle action holds the partition.
    #[error("partition busy: {0}")]
    PartitionBusy(String),

    /// Encoding or decoding of archived data failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// Archived data did not match its recorded checksum.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Generic internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether retrying the same operation later can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::MetricsUnavailable(_)
                | Error::Store(_)
                | Error::ArchiveStore(_)
                | Error::Timeout
                | Error::PartitionBusy(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(Error::MetricsUnavailable("down".into()).is_retryable());
        assert!(Error::Timeout.is_retryable());
        assert!(!Error::RestoreNotFound {
            table: "t".into(),
            partition_key: "USER#2024-01".into(),
        }
        .is_retryable());
        assert!(!Error::MigrationFailure("copy failed".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = Error::ChecksumMismatch {
            expected: 0xdeadbeef,
            actual: 1,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: expected 0xdeadbeef, got 0x00000001"
        );
    }
}
