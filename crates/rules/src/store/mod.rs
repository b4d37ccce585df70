//! Rule persistence seam used by the scheduler.
//!
//! The scheduler only ever lists active rules and applies partial state
//! updates (`last_notified_at` + `status`). Updates carry the `version` the
//! scheduler read, so a row edited concurrently elsewhere is rejected with
//! [`StoreError::Conflict`] instead of being clobbered.

mod error;
mod json_file;
mod memory;
mod read_only;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use pricewatch_core::{AlertRule, RuleStatus};

pub use self::error::{Result, StoreError};
pub use self::json_file::JsonFileRuleStore;
pub use self::memory::MemoryRuleStore;
pub use self::read_only::ReadOnlyRuleStore;

/// Partial update of exactly the fields the scheduler owns.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub rule_id: String,
    /// Version the caller read; the write fails if the row moved on.
    pub expected_version: u64,
    pub last_notified_at: DateTime<Utc>,
    pub status: RuleStatus,
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All rules currently in `Active` status.
    async fn list_active_rules(&self) -> Result<Vec<AlertRule>>;

    /// Atomically apply `update`: both fields change together or neither does.
    async fn update_rule_state(&self, update: &StateUpdate) -> Result<()>;
}

/// Check `update` against the stored `rule` and apply it in place.
///
/// Shared by every store so they enforce identical invariants: archived rows
/// are terminal, versions must match, `last_notified_at` never moves backwards,
/// and an archived rule never returns to active.
pub(crate) fn apply_update(rule: &mut AlertRule, update: &StateUpdate) -> Result<()> {
    if rule.status == RuleStatus::Archived {
        return Err(StoreError::Archived(rule.id.clone()));
    }
    if rule.version != update.expected_version {
        return Err(StoreError::Conflict {
            rule_id: rule.id.clone(),
            expected: update.expected_version,
            actual: rule.version,
        });
    }
    if let Some(last) = rule.last_notified_at {
        if update.last_notified_at < last {
            return Err(StoreError::NonMonotonic {
                rule_id: rule.id.clone(),
                stored: last,
                proposed: update.last_notified_at,
            });
        }
    }

    rule.last_notified_at = Some(update.last_notified_at);
    rule.status = update.status;
    rule.version += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn update_for(rule: &AlertRule, at: DateTime<Utc>, status: RuleStatus) -> StateUpdate {
        StateUpdate {
            rule_id: rule.id.clone(),
            expected_version: rule.version,
            last_notified_at: at,
            status,
        }
    }

    #[test]
    fn apply_sets_both_fields_and_bumps_version() {
        let mut rule = AlertRule::new("r1", "o", "AAPL").with_max_price(100.0);
        let now = Utc::now();
        let update = update_for(&rule, now, RuleStatus::Archived);
        apply_update(&mut rule, &update).unwrap();
        assert_eq!(rule.last_notified_at, Some(now));
        assert_eq!(rule.status, RuleStatus::Archived);
        assert_eq!(rule.version, 1);
    }

    #[test]
    fn stale_version_is_a_conflict_and_changes_nothing() {
        let mut rule = AlertRule::new("r1", "o", "AAPL").with_max_price(100.0);
        rule.version = 4;
        let mut update = update_for(&rule, Utc::now(), RuleStatus::Active);
        update.expected_version = 3;

        let err = apply_update(&mut rule, &update).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { expected: 3, actual: 4, .. }));
        assert_eq!(rule.last_notified_at, None);
        assert_eq!(rule.version, 4);
    }

    #[test]
    fn archived_rules_reject_updates() {
        let mut rule = AlertRule::new("r1", "o", "AAPL").with_max_price(100.0);
        rule.status = RuleStatus::Archived;
        let update = update_for(&rule, Utc::now(), RuleStatus::Active);
        let err = apply_update(&mut rule, &update).unwrap_err();
        assert!(matches!(err, StoreError::Archived(_)));
        assert_eq!(rule.status, RuleStatus::Archived);
    }

    #[test]
    fn last_notified_never_moves_backwards() {
        let now = Utc::now();
        let mut rule = AlertRule::new("r1", "o", "AAPL")
            .with_max_price(100.0)
            .recurring(true)
            .with_last_notified_at(now);
        let update = update_for(&rule, now - Duration::minutes(5), RuleStatus::Active);
        let err = apply_update(&mut rule, &update).unwrap_err();
        assert!(matches!(err, StoreError::NonMonotonic { .. }));
        assert_eq!(rule.last_notified_at, Some(now));
    }
}
