//! Lifecycle rules.

use super::state::PartitionState;
use crate::config::LifecycleConfig;
use crate::types::PartitionDescriptor;
use std::fmt;
use std::sync::Arc;

/// What a rule does to a matching partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleAction {
    /// Export a snapshot and keep the partition live.
    Snapshot,
    /// Move the partition to cold storage and delete its live items.
    Archive,
    /// Delete an archived partition's snapshot.
    Delete,
}

impl LifecycleAction {
    /// Whether the action can run on a partition in `state`.
    pub fn applies_to(&self, state: PartitionState) -> bool {
        match self {
            LifecycleAction::Snapshot | LifecycleAction::Archive => state == PartitionState::Active,
            LifecycleAction::Delete => state == PartitionState::Archived,
        }
    }

    /// Tie-break rank among equal-priority rules; higher wins.
    fn severity(&self) -> u8 {
        match self {
            LifecycleAction::Snapshot => 0,
            LifecycleAction::Archive => 1,
            LifecycleAction::Delete => 2,
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleAction::Snapshot => write!(f, "snapshot"),
            LifecycleAction::Archive => write!(f, "archive"),
            LifecycleAction::Delete => write!(f, "delete"),
        }
    }
}

/// Predicate over a partition's descriptor.
pub type PartitionPredicate = Arc<dyn Fn(&PartitionDescriptor) -> bool + Send + Sync>;

/// When a rule applies.
#[derive(Clone)]
pub enum RuleTrigger {
    /// Partition age, in whole days, is at least this many.
    AgeDays(u32),
    /// Custom predicate over the partition descriptor.
    Predicate(PartitionPredicate),
}

impl fmt::Debug for RuleTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleTrigger::AgeDays(days) => f.debug_tuple("AgeDays").field(days).finish(),
            RuleTrigger::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Ages of a partition at evaluation time, in whole days.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartitionAge {
    /// Since the last write, or since the partition's time bucket ended.
    pub since_activity: Option<i64>,
    /// Since the partition was archived, when that is known.
    pub since_archived: Option<i64>,
}

impl PartitionAge {
    /// Age of a partition that has not been archived.
    pub fn active(since_activity: i64) -> Self {
        Self {
            since_activity: Some(since_activity),
            since_archived: None,
        }
    }

    /// Age of an archived partition.
    pub fn archived(since_activity: Option<i64>, since_archived: i64) -> Self {
        Self {
            since_activity,
            since_archived: Some(since_archived),
        }
    }
}

/// A lifecycle rule.
#[derive(Debug, Clone)]
pub struct LifecycleRule {
    /// Unique rule id.
    pub id: String,
    pub trigger: RuleTrigger,
    pub action: LifecycleAction,
    /// Higher runs first when several rules match.
    pub priority: i32,
    /// Days a partition must have spent archived before the rule fires.
    /// Counted from last activity when the archive time is unknown.
    pub retention_days: Option<u32>,
}

impl LifecycleRule {
    /// Rule firing once a partition is `days` old.
    pub fn after_days(id: impl Into<String>, days: u32, action: LifecycleAction) -> Self {
        Self {
            id: id.into(),
            trigger: RuleTrigger::AgeDays(days),
            action,
            priority: 0,
            retention_days: None,
        }
    }

    /// Rule firing when `predicate` holds.
    pub fn when<F>(id: impl Into<String>, action: LifecycleAction, predicate: F) -> Self
    where
        F: Fn(&PartitionDescriptor) -> bool + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            trigger: RuleTrigger::Predicate(Arc::new(predicate)),
            action,
            priority: 0,
            retention_days: None,
        }
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the retention period.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    /// Whether the rule matches a partition of the given age.
    pub fn matches(&self, partition: &PartitionDescriptor, age: &PartitionAge) -> bool {
        let triggered = match &self.trigger {
            RuleTrigger::AgeDays(days) => age
                .since_activity
                .is_some_and(|days_old| days_old >= i64::from(*days)),
            RuleTrigger::Predicate(predicate) => predicate(partition),
        };
        triggered && self.retention_elapsed(age)
    }

    fn retention_elapsed(&self, age: &PartitionAge) -> bool {
        let Some(retention) = self.retention_days else {
            return true;
        };
        age.since_archived
            .or(age.since_activity)
            .is_some_and(|days| days >= i64::from(retention))
    }
}

/// Id of the built-in archive rule.
pub const ARCHIVE_INACTIVE_RULE: &str = "archive-inactive";

/// Id of the built-in delete rule.
pub const DELETE_EXPIRED_RULE: &str = "delete-expired-archive";

/// Built-in rules derived from configuration.
pub fn default_rules(config: &LifecycleConfig) -> Vec<LifecycleRule> {
    vec![
        LifecycleRule::after_days(
            ARCHIVE_INACTIVE_RULE,
            config.archive_after_days,
            LifecycleAction::Archive,
        )
        .with_priority(10),
        LifecycleRule::after_days(
            DELETE_EXPIRED_RULE,
            config.delete_after_days,
            LifecycleAction::Delete,
        )
        .with_retention_days(config.delete_after_days)
        .with_priority(20),
    ]
}

/// Winning rule among those that match: highest priority, then most severe
/// action, then lowest id.
pub fn select_rule<'a, I>(rules: I, partition: &PartitionDescriptor, age: &PartitionAge) -> Option<&'a LifecycleRule>
where
    I: IntoIterator<Item = &'a LifecycleRule>,
{
    rules
        .into_iter()
        .filter(|rule| rule.matches(partition, age))
        .max_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.action.severity().cmp(&b.action.severity()))
                .then(b.id.cmp(&a.id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partition() -> PartitionDescriptor {
        PartitionDescriptor::new("USER#2023-01")
    }

    #[test]
    fn test_age_trigger() {
        let rule = LifecycleRule::after_days("old", 90, LifecycleAction::Archive);
        assert!(rule.matches(&partition(), &PartitionAge::active(90)));
        assert!(!rule.matches(&partition(), &PartitionAge::active(89)));
        assert!(!rule.matches(&partition(), &PartitionAge::default()));
    }

    #[test]
    fn test_select_highest_priority() {
        let rules = default_rules(&LifecycleConfig::default());
        let p = partition();

        assert!(select_rule(&rules, &p, &PartitionAge::active(30)).is_none());
        assert_eq!(select_rule(&rules, &p, &PartitionAge::active(100)).unwrap().id, ARCHIVE_INACTIVE_RULE);
        assert_eq!(select_rule(&rules, &p, &PartitionAge::active(400)).unwrap().id, DELETE_EXPIRED_RULE);
    }

    #[test]
    fn test_retention_counts_from_archive_time() {
        let rules = default_rules(&LifecycleConfig::default());
        let delete = rules.iter().find(|r| r.id == DELETE_EXPIRED_RULE).unwrap();
        let p = partition();

        // Idle for years but archived today.
        assert!(!delete.matches(&p, &PartitionAge::archived(Some(2000), 0)));
        assert!(!delete.matches(&p, &PartitionAge::archived(Some(2000), 364)));
        assert!(delete.matches(&p, &PartitionAge::archived(Some(2000), 365)));
        // Archive time unknown: last activity stands in.
        assert!(delete.matches(&p, &PartitionAge::active(2000)));

        let custom = LifecycleRule::when("purge", LifecycleAction::Delete, |_| true).with_retention_days(7);
        assert!(!custom.matches(&p, &PartitionAge::archived(None, 6)));
        assert!(custom.matches(&p, &PartitionAge::archived(None, 7)));
        assert!(!custom.matches(&p, &PartitionAge::default()));
    }

    #[test]
    fn test_tie_breaks() {
        let rules = vec![
            LifecycleRule::when("b-snapshot", LifecycleAction::Snapshot, |_| true).with_priority(5),
            LifecycleRule::when("a-archive", LifecycleAction::Archive, |_| true).with_priority(5),
            LifecycleRule::when("c-archive", LifecycleAction::Archive, |_| true).with_priority(5),
        ];
        assert_eq!(select_rule(&rules, &partition(), &PartitionAge::default()).unwrap().id, "a-archive");
    }

    #[test]
    fn test_actions_apply_to_states() {
        assert!(LifecycleAction::Archive.applies_to(PartitionState::Active));
        assert!(!LifecycleAction::Archive.applies_to(PartitionState::Archived));
        assert!(LifecycleAction::Delete.applies_to(PartitionState::Archived));
        assert!(!LifecycleAction::Delete.applies_to(PartitionState::Active));
    }

    #[test]
    fn test_predicate_trigger() {
        let big = LifecycleRule::when("big", LifecycleAction::Snapshot, |p| p.size_bytes > 1024);
        let mut p = partition();
        assert!(!big.matches(&p, &PartitionAge::default()));
        p.size_bytes = 4096;
        assert!(big.matches(&p, &PartitionAge::default()));
    }
}
