//! Cooldown gate: decides whether a triggered rule may notify now and
//! which state the rule moves to if the notification goes out.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use pricewatch_core::{AlertRule, RuleStatus, TriggerResult};

use crate::store::StateUpdate;

/// Default minimum interval between two notifications of a recurring rule.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(3_600);

/// Outcome of [`CooldownGate::decide`].
///
/// When `notify` is false the `next_*` fields mirror the rule's current
/// state; nothing should be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    pub notify: bool,
    pub next_status: RuleStatus,
    pub next_last_notified: Option<DateTime<Utc>>,
}

impl GateDecision {
    fn hold(rule: &AlertRule) -> Self {
        Self {
            notify: false,
            next_status: rule.status,
            next_last_notified: rule.last_notified_at,
        }
    }

    /// The partial store update to apply once dispatch succeeded.
    /// `None` when the decision was not to notify.
    pub fn state_update(&self, rule: &AlertRule) -> Option<StateUpdate> {
        if !self.notify {
            return None;
        }
        Some(StateUpdate {
            rule_id: rule.id.clone(),
            expected_version: rule.version,
            last_notified_at: self.next_last_notified?,
            status: self.next_status,
        })
    }
}

/// Global cooldown policy shared by every rule.
#[derive(Debug, Clone, Copy)]
pub struct CooldownGate {
    cooldown: Duration,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Decide whether `rule` should notify for `trigger` at `now`.
    pub fn decide(&self, rule: &AlertRule, trigger: &TriggerResult, now: DateTime<Utc>) -> GateDecision {
        if !rule.is_active() || !trigger.is_triggered() {
            return GateDecision::hold(rule);
        }

        if let Some(last) = rule.last_notified_at {
            // A negative elapsed time (clock behind the stored timestamp)
            // counts as still cooling down.
            let elapsed = now.signed_duration_since(last).to_std().unwrap_or_default();
            if elapsed <= self.cooldown {
                debug!(
                    rule_id = %rule.id,
                    "rule still in cooldown ({:.0}s remaining)",
                    self.cooldown.saturating_sub(elapsed).as_secs_f64(),
                );
                return GateDecision::hold(rule);
            }
        }

        GateDecision {
            notify: true,
            next_status: if rule.recurring {
                RuleStatus::Active
            } else {
                RuleStatus::Archived
            },
            next_last_notified: Some(now),
        }
    }
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use pricewatch_core::Direction;

    use super::*;

    const FLOOR: TriggerResult = TriggerResult::Triggered(Direction::Floor);

    fn recurring_rule() -> AlertRule {
        AlertRule::new("r1", "o", "AAPL").with_min_price(50.0).recurring(true)
    }

    #[test]
    fn non_triggers_never_notify() {
        let gate = CooldownGate::default();
        let rule = recurring_rule();
        let now = Utc::now();
        for t in [
            TriggerResult::NoTrigger,
            TriggerResult::PriceOkVolumeLow,
            TriggerResult::Indeterminate,
        ] {
            let d = gate.decide(&rule, &t, now);
            assert!(!d.notify);
            assert_eq!(d.next_status, RuleStatus::Active);
            assert_eq!(d.next_last_notified, None);
            assert!(d.state_update(&rule).is_none());
        }
    }

    #[test]
    fn first_trigger_notifies() {
        let gate = CooldownGate::default();
        let now = Utc::now();
        let d = gate.decide(&recurring_rule(), &FLOOR, now);
        assert!(d.notify);
        assert_eq!(d.next_last_notified, Some(now));
        assert_eq!(d.next_status, RuleStatus::Active);
    }

    #[test]
    fn one_time_rule_archives() {
        let gate = CooldownGate::default();
        let rule = AlertRule::new("r1", "o", "AAPL").with_max_price(100.0);
        let now = Utc::now();
        let d = gate.decide(&rule, &TriggerResult::Triggered(Direction::Ceiling), now);
        assert!(d.notify);
        assert_eq!(d.next_status, RuleStatus::Archived);

        let update = d.state_update(&rule).unwrap();
        assert_eq!(update.rule_id, "r1");
        assert_eq!(update.expected_version, 0);
        assert_eq!(update.last_notified_at, now);
        assert_eq!(update.status, RuleStatus::Archived);
    }

    #[test]
    fn cooldown_suppresses_then_releases() {
        let gate = CooldownGate::default();
        let now = Utc::now();

        let recent = recurring_rule().with_last_notified_at(now - ChronoDuration::minutes(30));
        let d = gate.decide(&recent, &FLOOR, now);
        assert!(!d.notify);
        assert_eq!(d.next_last_notified, recent.last_notified_at);

        let stale = recurring_rule().with_last_notified_at(now - ChronoDuration::minutes(90));
        let d = gate.decide(&stale, &FLOOR, now);
        assert!(d.notify);
        assert_eq!(d.next_last_notified, Some(now));
        assert_eq!(d.next_status, RuleStatus::Active);
    }

    #[test]
    fn cooldown_boundary_is_exclusive() {
        let gate = CooldownGate::new(Duration::from_secs(3_600));
        let now = Utc::now();
        let exact = recurring_rule().with_last_notified_at(now - ChronoDuration::hours(1));
        assert!(!gate.decide(&exact, &FLOOR, now).notify);

        let past = recurring_rule()
            .with_last_notified_at(now - ChronoDuration::hours(1) - ChronoDuration::seconds(1));
        assert!(gate.decide(&past, &FLOOR, now).notify);
    }

    #[test]
    fn clock_behind_last_notification_holds() {
        let gate = CooldownGate::default();
        let now = Utc::now();
        let future = recurring_rule().with_last_notified_at(now + ChronoDuration::hours(3));
        assert!(!gate.decide(&future, &FLOOR, now).notify);
    }

    #[test]
    fn archived_rule_is_terminal() {
        let gate = CooldownGate::default();
        let mut rule = AlertRule::new("r1", "o", "AAPL").with_max_price(100.0);
        rule.status = RuleStatus::Archived;
        let d = gate.decide(&rule, &TriggerResult::Triggered(Direction::Ceiling), Utc::now());
        assert!(!d.notify);
        assert_eq!(d.next_status, RuleStatus::Archived);
    }
}
