//! Time-bucketed partition keys.
//!
//! A partition key is `"{entity_type}#{bucket}"` where the bucket label is the
//! timestamp truncated to a [`Granularity`] boundary. Label formats are
//! mutually distinct, so a label alone identifies its granularity:
//!
//! | Granularity | Label          |
//! |-------------|----------------|
//! | Hourly      | `2024-03-15T09` |
//! | Daily       | `2024-03-15`   |
//! | Weekly      | `2024-W11`     |
//! | Monthly     | `2024-03`      |
//! | Quarterly   | `2024-Q1`      |
//! | Yearly      | `2024`         |

use crate::config::{HotPartitionThresholds, PartitionerConfig};
use crate::error::Result;
use crate::lifecycle::PartitionArchiver;
use crate::rebalancing::{rank_by_priority, HotPartitionRecord, PartitionLocks};
use crate::types::{PartitionDescriptor, PartitionMetrics};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Months, NaiveDate, NaiveTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Separator between the entity type and the time bucket.
pub const KEY_SEPARATOR: char = '#';

/// Size of a time bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl Granularity {
    /// All granularities, finest first.
    pub const ALL: [Granularity; 6] = [
        Granularity::Hourly,
        Granularity::Daily,
        Granularity::Weekly,
        Granularity::Monthly,
        Granularity::Quarterly,
        Granularity::Yearly,
    ];

    /// Lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
            Granularity::Quarterly => "quarterly",
            Granularity::Yearly => "yearly",
        }
    }

    /// Start of the bucket containing `ts`.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let date = ts.date_naive();
        match self {
            Granularity::Hourly => midnight(date) + ChronoDuration::hours(i64::from(ts.hour())),
            Granularity::Daily => midnight(date),
            Granularity::Weekly => midnight(
                date - ChronoDuration::days(i64::from(date.weekday().num_days_from_monday())),
            ),
            Granularity::Monthly => midnight(first_of_month(date.year(), date.month())),
            Granularity::Quarterly => {
                midnight(first_of_month(date.year(), date.month0() / 3 * 3 + 1))
            }
            Granularity::Yearly => midnight(first_of_month(date.year(), 1)),
        }
    }

    /// Start of the bucket following the one starting at `bucket_start`.
    pub fn next_bucket(&self, bucket_start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Granularity::Hourly => bucket_start.checked_add_signed(ChronoDuration::hours(1)),
            Granularity::Daily => bucket_start.checked_add_signed(ChronoDuration::days(1)),
            Granularity::Weekly => bucket_start.checked_add_signed(ChronoDuration::weeks(1)),
            Granularity::Monthly => bucket_start.checked_add_months(Months::new(1)),
            Granularity::Quarterly => bucket_start.checked_add_months(Months::new(3)),
            Granularity::Yearly => bucket_start.checked_add_months(Months::new(12)),
        }
    }

    /// Bucket label for `ts`.
    pub fn label(&self, ts: DateTime<Utc>) -> String {
        match self {
            Granularity::Hourly => ts.format("%Y-%m-%dT%H").to_string(),
            Granularity::Daily => ts.format("%Y-%m-%d").to_string(),
            Granularity::Weekly => {
                let week = ts.iso_week();
                format!("{:04}-W{:02}", week.year(), week.week())
            }
            Granularity::Monthly => ts.format("%Y-%m").to_string(),
            Granularity::Quarterly => format!("{:04}-Q{}", ts.year(), ts.month0() / 3 + 1),
            Granularity::Yearly => format!("{:04}", ts.year()),
        }
    }

    /// Parse a label of this granularity back into its bucket start.
    ///
    /// Returns `None` unless the label is exactly what [`Granularity::label`]
    /// would produce.
    pub fn parse_label(&self, label: &str) -> Option<DateTime<Utc>> {
        let start = match self {
            Granularity::Hourly => {
                let (day, hour) = label.split_once('T')?;
                let date = NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()?;
                let hour: i64 = hour.parse().ok()?;
                if !(0..24).contains(&hour) {
                    return None;
                }
                midnight(date) + ChronoDuration::hours(hour)
            }
            Granularity::Daily => midnight(NaiveDate::parse_from_str(label, "%Y-%m-%d").ok()?),
            Granularity::Weekly => {
                let (year, week) = label.split_once("-W")?;
                let date =
                    NaiveDate::from_isoywd_opt(year.parse().ok()?, week.parse().ok()?, Weekday::Mon)?;
                midnight(date)
            }
            Granularity::Monthly => {
                let (year, month) = label.split_once('-')?;
                midnight(NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, 1)?)
            }
            Granularity::Quarterly => {
                let (year, quarter) = label.split_once("-Q")?;
                let quarter: u32 = quarter.parse().ok()?;
                if !(1..=4).contains(&quarter) {
                    return None;
                }
                midnight(NaiveDate::from_ymd_opt(year.parse().ok()?, (quarter - 1) * 3 + 1, 1)?)
            }
            Granularity::Yearly => midnight(NaiveDate::from_ymd_opt(label.parse().ok()?, 1, 1)?),
        };

        // Reject non-canonical spellings such as "2024-3".
        (self.label(start) == label).then_some(start)
    }

    /// Identify the granularity of a bucket label.
    pub fn infer(label: &str) -> Option<(Granularity, DateTime<Utc>)> {
        Self::ALL
            .iter()
            .find_map(|g| g.parse_label(label).map(|start| (*g, start)))
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Granularity {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|g| g.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::error::Error::Config(format!("unknown granularity: {}", s)))
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

/// Build a partition key. Pure: identical inputs always give the same key.
pub fn partition_key(entity_type: &str, timestamp: DateTime<Utc>, granularity: Granularity) -> String {
    format!("{}{}{}", entity_type, KEY_SEPARATOR, granularity.label(timestamp))
}

/// Entity type of a partition key (text before the first separator).
pub fn entity_of(partition_key: &str) -> &str {
    partition_key
        .split(KEY_SEPARATOR)
        .next()
        .unwrap_or(partition_key)
}

/// Time bucket `[start, end)` of a partition key, if it carries one.
///
/// Suffixes appended after the bucket (for example by a split) are ignored.
pub fn bucket_bounds(partition_key: &str) -> Option<(Granularity, DateTime<Utc>, DateTime<Utc>)> {
    let label = partition_key.split(KEY_SEPARATOR).nth(1)?;
    let (granularity, start) = Granularity::infer(label)?;
    let end = granularity.next_bucket(start)?;
    Some((granularity, start, end))
}

/// Outcome of [`TimeBasedPartitioner::archive_old_partitions`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Partitions older than the cutoff.
    pub total_partitions: usize,
    /// Partitions moved to cold storage.
    pub archived: usize,
    /// Partitions whose archive failed; they are left in place.
    pub failed: usize,
    /// Uncompressed bytes archived.
    pub bytes_archived: u64,
}

/// Maps (entity type, timestamp, granularity) to partition keys and finds
/// partitions that need attention.
#[derive(Debug, Clone, Default)]
pub struct TimeBasedPartitioner {
    config: PartitionerConfig,
    locks: Option<Arc<PartitionLocks>>,
}

impl TimeBasedPartitioner {
    /// Create a partitioner.
    pub fn new(config: PartitionerConfig) -> Self {
        Self { config, locks: None }
    }

    /// Share partition locks so archival never races a rebalance.
    pub fn with_locks(mut self, locks: Arc<PartitionLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Configuration.
    pub fn config(&self) -> &PartitionerConfig {
        &self.config
    }

    /// Detection thresholds.
    pub fn thresholds(&self) -> &HotPartitionThresholds {
        &self.config.thresholds
    }

    /// `"{entity_type}#{bucket}"` for the bucket containing `timestamp`.
    pub fn generate_partition_key(
        &self,
        entity_type: &str,
        timestamp: DateTime<Utc>,
        granularity: Granularity,
    ) -> String {
        partition_key(entity_type, timestamp, granularity)
    }

    /// Bucket labels intersecting `[start, end]`, ordered and duplicate-free.
    ///
    /// Both endpoint buckets are included. An inverted range yields nothing.
    pub fn get_partitions_for_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> Vec<String> {
        let mut labels = Vec::new();
        if start > end {
            return labels;
        }

        let mut cursor = granularity.bucket_start(start);
        while cursor <= end {
            labels.push(granularity.label(cursor));
            match granularity.next_bucket(cursor) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        labels
    }

    /// Like [`get_partitions_for_range`](Self::get_partitions_for_range) but
    /// returns full partition keys for one entity type.
    pub fn get_partition_keys_for_range(
        &self,
        entity_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: Granularity,
    ) -> Vec<String> {
        self.get_partitions_for_range(start, end, granularity)
            .into_iter()
            .map(|label| format!("{}{}{}", entity_type, KEY_SEPARATOR, label))
            .collect()
    }

    /// One record per sample exceeding a threshold, hottest first.
    ///
    /// Samples below every threshold never appear.
    pub fn detect_hot_partitions(
        &self,
        table: &str,
        metrics: &[PartitionMetrics],
    ) -> Vec<HotPartitionRecord> {
        let thresholds = &self.config.thresholds;
        let records: Vec<HotPartitionRecord> = rank_by_priority(metrics)
            .into_iter()
            .filter_map(|m| HotPartitionRecord::detect(m, thresholds))
            .collect();

        if !records.is_empty() {
            info!(
                table,
                sampled = metrics.len(),
                hot = records.len(),
                "Detected hot partitions"
            );
        }
        records
    }

    /// Archive every non-empty partition whose activity is older than
    /// `max_age_days`.
    ///
    /// A failure on one partition is counted and does not stop the others.
    #[instrument(skip(self, archiver))]
    pub async fn archive_old_partitions(
        &self,
        table: &str,
        max_age_days: u32,
        archiver: &PartitionArchiver,
    ) -> Result<ArchiveSummary> {
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(max_age_days));
        let partitions = archiver.store().list_partitions(table).await?;

        let old: Vec<&PartitionDescriptor> = partitions
            .iter()
            .filter(|p| p.item_count > 0)
            .filter(|p| last_activity(p).is_some_and(|at| at < cutoff))
            .collect();

        let mut summary = ArchiveSummary {
            total_partitions: old.len(),
            ..Default::default()
        };

        for partition in old {
            let key = partition.partition_key.as_str();
            let _guard = match &self.locks {
                Some(locks) => match locks.try_acquire(table, key) {
                    Some(guard) => Some(guard),
                    None => {
                        warn!(table, partition_key = key, "Partition busy, not archived");
                        summary.failed += 1;
                        continue;
                    }
                },
                None => None,
            };

            match archiver.archive_partition(table, key).await {
                Ok(snapshot) => {
                    summary.archived += 1;
                    summary.bytes_archived += snapshot.original_bytes;
                    debug!(
                        table,
                        partition_key = key,
                        bytes = snapshot.original_bytes,
                        "Archived partition"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(table, partition_key = key, error = %e, "Failed to archive partition");
                }
            }
        }

        info!(
            table,
            total = summary.total_partitions,
            archived = summary.archived,
            failed = summary.failed,
            bytes = summary.bytes_archived,
            "Archival pass complete"
        );
        Ok(summary)
    }
}

/// Most recent known activity of a partition: last write, else the end of its
/// time bucket, else its creation time.
pub(crate) fn last_activity(partition: &PartitionDescriptor) -> Option<DateTime<Utc>> {
    partition
        .last_write_at
        .or_else(|| bucket_bounds(&partition.partition_key).map(|(_, _, end)| end))
        .or(partition.created_at)
}
