//! Per-rule processing: fetch → evaluate → gate → dispatch → persist.
//!
//! Every failure stays inside the rule that caused it and is reported as a
//! [`RuleOutcome`]. State is persisted only after at least one channel
//! delivered, so a rule whose channels all failed is retried on the next
//! tick with no cooldown penalty.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

use pricewatch_core::{AlertRule, RuleStatus, TriggerResult};
use pricewatch_market::MarketDataProvider;
use pricewatch_notify::{ChannelOutcome, Dispatcher};
use pricewatch_rules::audit_log::{AuditLog, ExecutionPhase, LogLevel};
use pricewatch_rules::{evaluate, CooldownGate, RuleStore};

/// What happened to one rule during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleOutcome {
    /// The rule has neither a floor nor a ceiling.
    Invalid,
    /// Market data could not be fetched (error or timeout).
    MarketUnavailable(String),
    /// Evaluated without a trigger (`NoTrigger`, `PriceOkVolumeLow` or
    /// `Indeterminate`).
    Quiet(TriggerResult),
    /// Triggered, but the gate held (cooldown or not active).
    Held(TriggerResult),
    /// Triggered and allowed, but no channel delivered.
    DeliveryFailed,
    /// Delivered and the new state was stored.
    Notified { status: RuleStatus },
    /// Delivered, but storing the new state failed.
    PersistFailed(String),
    /// The rule's processing panicked.
    Panicked,
}

impl RuleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            RuleOutcome::Invalid => "invalid",
            RuleOutcome::MarketUnavailable(_) => "market_unavailable",
            RuleOutcome::Quiet(_) => "quiet",
            RuleOutcome::Held(_) => "held",
            RuleOutcome::DeliveryFailed => "delivery_failed",
            RuleOutcome::Notified { .. } => "notified",
            RuleOutcome::PersistFailed(_) => "persist_failed",
            RuleOutcome::Panicked => "panicked",
        }
    }

    /// True if a notification reached at least one channel.
    pub fn delivered(&self) -> bool {
        matches!(
            self,
            RuleOutcome::Notified { .. } | RuleOutcome::PersistFailed(_)
        )
    }
}

/// Shared collaborators for processing a single rule.
pub struct RulePipeline {
    market: Arc<dyn MarketDataProvider>,
    dispatcher: Arc<Dispatcher>,
    store: Arc<dyn RuleStore>,
    gate: CooldownGate,
    audit: AuditLog,
    market_timeout: Duration,
}

impl RulePipeline {
    pub fn new(
        market: Arc<dyn MarketDataProvider>,
        dispatcher: Arc<Dispatcher>,
        store: Arc<dyn RuleStore>,
        gate: CooldownGate,
        audit: AuditLog,
        market_timeout: Duration,
    ) -> Self {
        Self {
            market,
            dispatcher,
            store,
            gate,
            audit,
            market_timeout,
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Run one rule through the pipeline as of `now`.
    pub async fn process_rule(&self, rule: &AlertRule, now: DateTime<Utc>) -> RuleOutcome {
        if !rule.has_price_bound() {
            warn!(rule_id = %rule.id, "Rule has no price bound, skipping");
            self.audit.log(
                &rule.id,
                LogLevel::Warning,
                ExecutionPhase::Validation,
                "rule has neither min_price nor max_price",
            );
            return RuleOutcome::Invalid;
        }

        let start = Instant::now();
        let fetched =
            tokio::time::timeout(self.market_timeout, self.market.get_snapshot(&rule.symbol)).await;
        let fetch_ms = start.elapsed().as_millis() as u64;
        let snap = match fetched {
            Ok(Ok(snap)) => snap,
            Ok(Err(e)) => return self.market_unavailable(rule, e.to_string(), fetch_ms),
            Err(_) => {
                let reason = format!("timed out after {:?}", self.market_timeout);
                return self.market_unavailable(rule, reason, fetch_ms);
            }
        };

        let trigger = evaluate(rule, &snap);
        self.audit.log_with_details(
            &rule.id,
            LogLevel::Info,
            ExecutionPhase::Evaluation,
            trigger.label(),
            Some(json!({
                "symbol": snap.symbol,
                "price": snap.price,
                "volume": snap.volume,
                "min_price": rule.min_price,
                "max_price": rule.max_price,
                "min_volume": rule.min_volume,
            })),
            Some(fetch_ms),
        );
        if !trigger.is_triggered() {
            debug!(rule_id = %rule.id, price = snap.price, result = trigger.label(), "No trigger");
            return RuleOutcome::Quiet(trigger);
        }

        let decision = self.gate.decide(rule, &trigger, now);
        let Some(update) = decision.state_update(rule) else {
            self.audit.log(
                &rule.id,
                LogLevel::Debug,
                ExecutionPhase::Cooldown,
                "triggered but held by cooldown",
            );
            return RuleOutcome::Held(trigger);
        };

        let dispatch = self.dispatcher.dispatch(rule, &trigger, &snap).await;
        for channel in &dispatch.channels {
            match &channel.outcome {
                ChannelOutcome::Delivered => self.audit.log_with_details(
                    &rule.id,
                    LogLevel::Info,
                    ExecutionPhase::Notification,
                    format!("delivered via {}", channel.channel),
                    None,
                    Some(channel.duration_ms),
                ),
                ChannelOutcome::Failed(err) => self.audit.log_with_details(
                    &rule.id,
                    LogLevel::Warning,
                    ExecutionPhase::NotifyError,
                    format!("{} failed: {err}", channel.channel),
                    None,
                    Some(channel.duration_ms),
                ),
                ChannelOutcome::Skipped => {}
            }
        }

        if !dispatch.any_succeeded() {
            warn!(
                rule_id = %rule.id,
                failed = ?dispatch.failed_channels(),
                "No channel delivered, state not advanced"
            );
            self.audit.log(
                &rule.id,
                LogLevel::Error,
                ExecutionPhase::Notification,
                "no channel delivered; will retry next tick",
            );
            return RuleOutcome::DeliveryFailed;
        }

        match self.store.update_rule_state(&update).await {
            Ok(()) => {
                info!(
                    rule_id = %rule.id,
                    symbol = %rule.symbol,
                    direction = trigger.label(),
                    price = snap.price,
                    status = %update.status,
                    "Alert sent"
                );
                self.audit.log(
                    &rule.id,
                    LogLevel::Info,
                    ExecutionPhase::Persist,
                    format!("state stored: {}", update.status),
                );
                RuleOutcome::Notified {
                    status: update.status,
                }
            }
            Err(e) => {
                warn!(rule_id = %rule.id, error = %e, "Failed to store rule state after delivery");
                self.audit.log(
                    &rule.id,
                    LogLevel::Error,
                    ExecutionPhase::Persist,
                    e.to_string(),
                );
                RuleOutcome::PersistFailed(e.to_string())
            }
        }
    }

    fn market_unavailable(&self, rule: &AlertRule, reason: String, duration_ms: u64) -> RuleOutcome {
        warn!(
            rule_id = %rule.id,
            symbol = %rule.symbol,
            provider = self.market.provider_name(),
            error = %reason,
            "Market data unavailable"
        );
        self.audit.log_with_details(
            &rule.id,
            LogLevel::Warning,
            ExecutionPhase::MarketData,
            format!("{}: {reason}", rule.symbol),
            None,
            Some(duration_ms),
        );
        RuleOutcome::MarketUnavailable(reason)
    }
}
