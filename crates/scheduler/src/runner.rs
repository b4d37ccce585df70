//! Tick loop driving the rule pipeline.
//!
//! One coordinating task runs ticks back to back on a fixed interval. A tick
//! lists the active rules once, drops duplicate ids, and processes the rest on
//! a bounded worker pool. Work still running at the per-tick deadline is
//! aborted and awaited before the tick returns, so ticks never overlap.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn, Instrument};

use pricewatch_core::config::SchedulerConfig;
use pricewatch_market::MarketDataProvider;
use pricewatch_notify::Dispatcher;
use pricewatch_rules::audit_log::AuditLog;
use pricewatch_rules::{CooldownGate, RuleStore, StoreError};

use crate::pipeline::{RuleOutcome, RulePipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Ticking,
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is stopped")]
    Stopped,

    #[error("a tick is already running")]
    AlreadyTicking,

    #[error("failed to list active rules: {0}")]
    ListRules(#[from] StoreError),
}

/// Result of one tick.
#[derive(Debug, Clone)]
pub struct TickSummary {
    pub started_at: DateTime<Utc>,
    /// Rules returned by the store, duplicates included.
    pub listed: usize,
    /// Rules dropped because their id was already seen in this listing.
    pub duplicates: usize,
    /// Outcome per processed rule, sorted by rule id.
    pub outcomes: Vec<(String, RuleOutcome)>,
    /// Rules whose processing was cut off by the tick deadline.
    pub aborted: Vec<String>,
    pub elapsed: Duration,
}

impl TickSummary {
    pub fn outcome(&self, rule_id: &str) -> Option<&RuleOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == rule_id)
            .map(|(_, outcome)| outcome)
    }

    /// Number of rules whose alert reached at least one channel.
    pub fn delivered(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.delivered()).count()
    }

    pub fn count(&self, label: &str) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.label() == label).count()
    }
}

/// Drives ticks over a [`RuleStore`] until stopped.
pub struct AlertScheduler {
    store: Arc<dyn RuleStore>,
    pipeline: Arc<RulePipeline>,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
}

/// Returns the scheduler to `Idle` when a tick ends, including when the
/// tick future is dropped part way through.
struct TickGuard<'a> {
    state: &'a Mutex<SchedulerState>,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state == SchedulerState::Ticking {
            *state = SchedulerState::Idle;
        }
    }
}

impl AlertScheduler {
    pub fn new(
        store: Arc<dyn RuleStore>,
        market: Arc<dyn MarketDataProvider>,
        dispatcher: Arc<Dispatcher>,
        config: SchedulerConfig,
    ) -> Self {
        Self::with_audit_log(store, market, dispatcher, config, AuditLog::new())
    }

    pub fn with_audit_log(
        store: Arc<dyn RuleStore>,
        market: Arc<dyn MarketDataProvider>,
        dispatcher: Arc<Dispatcher>,
        config: SchedulerConfig,
        audit: AuditLog,
    ) -> Self {
        let pipeline = RulePipeline::new(
            market,
            dispatcher,
            store.clone(),
            CooldownGate::new(config.cooldown),
            audit,
            config.market_timeout,
        );
        Self {
            store,
            pipeline: Arc::new(pipeline),
            config,
            state: Mutex::new(SchedulerState::Idle),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn audit(&self) -> &AuditLog {
        self.pipeline.audit()
    }

    /// Move to `Stopped`. No tick starts afterwards.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if *state != SchedulerState::Stopped {
            info!("Alert scheduler stopped");
        }
        *state = SchedulerState::Stopped;
    }

    fn begin_tick(&self) -> Result<TickGuard<'_>, SchedulerError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match *state {
            SchedulerState::Stopped => Err(SchedulerError::Stopped),
            SchedulerState::Ticking => Err(SchedulerError::AlreadyTicking),
            SchedulerState::Idle => {
                *state = SchedulerState::Ticking;
                Ok(TickGuard { state: &self.state })
            }
        }
    }

    /// Run one tick as of the current time.
    pub async fn tick(&self) -> Result<TickSummary, SchedulerError> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick with `now` as the gate's notion of the current time.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickSummary, SchedulerError> {
        let _guard = self.begin_tick()?;
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.tick_deadline;

        let rules = self.store.list_active_rules().await?;
        let listed = rules.len();

        let mut seen = HashSet::with_capacity(listed);
        let mut duplicates = 0;
        let mut launched = Vec::with_capacity(listed);
        let semaphore = Arc::new(Semaphore::new(self.config.worker_concurrency.max(1)));
        let mut join_set = JoinSet::new();

        for rule in rules {
            if !seen.insert(rule.id.clone()) {
                warn!(rule_id = %rule.id, "Duplicate rule id in listing, dropping");
                duplicates += 1;
                continue;
            }
            launched.push(rule.id.clone());

            let pipeline = self.pipeline.clone();
            let semaphore = semaphore.clone();
            let span = tracing::info_span!("rule", rule_id = %rule.id, symbol = %rule.symbol);
            join_set.spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    let outcome = AssertUnwindSafe(pipeline.process_rule(&rule, now))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| {
                            error!("Rule processing panicked");
                            RuleOutcome::Panicked
                        });
                    (rule.id, outcome)
                }
                .instrument(span),
            );
        }

        let mut outcomes = Vec::with_capacity(launched.len());
        let drained = tokio::time::timeout_at(deadline, async {
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok(result) => outcomes.push(result),
                    Err(e) => error!(error = %e, "Rule task failed to join"),
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                in_flight = join_set.len(),
                deadline = ?self.config.tick_deadline,
                "Tick deadline reached, aborting in-flight rules"
            );
            join_set.shutdown().await;
        }

        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        let finished: HashSet<&str> = outcomes.iter().map(|(id, _)| id.as_str()).collect();
        let aborted: Vec<String> = launched
            .into_iter()
            .filter(|id| !finished.contains(id.as_str()))
            .collect();

        let summary = TickSummary {
            started_at: now,
            listed,
            duplicates,
            outcomes,
            aborted,
            elapsed: start.elapsed(),
        };

        info!(
            listed = summary.listed,
            duplicates = summary.duplicates,
            delivered = summary.delivered(),
            delivery_failed = summary.count("delivery_failed"),
            market_unavailable = summary.count("market_unavailable"),
            aborted = summary.aborted.len(),
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Tick complete"
        );

        Ok(summary)
    }

    /// Tick on the configured interval until `shutdown` is notified or
    /// [`stop`](Self::stop) is called.
    ///
    /// A shutdown arriving mid-tick gives the tick up to the shutdown grace
    /// period to finish before its remaining work is abandoned. The
    /// scheduler is `Stopped` when this returns.
    pub async fn run(&self, shutdown: Arc<Notify>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            interval = ?self.config.tick_interval,
            workers = self.config.worker_concurrency,
            "Alert scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.notified() => break,
                _ = interval.tick() => {}
            }

            let tick = self.tick();
            tokio::pin!(tick);

            tokio::select! {
                biased;
                result = &mut tick => {
                    if matches!(result, Err(SchedulerError::Stopped)) {
                        break;
                    }
                    log_tick_result(result);
                }
                _ = shutdown.notified() => {
                    info!(grace = ?self.config.shutdown_grace, "Shutdown requested mid-tick, waiting for in-flight rules");
                    match tokio::time::timeout(self.config.shutdown_grace, &mut tick).await {
                        Ok(result) => log_tick_result(result),
                        Err(_) => warn!("Grace period elapsed, abandoning in-flight rules"),
                    }
                    break;
                }
            }
        }

        self.stop();
    }
}

fn log_tick_result(result: Result<TickSummary, SchedulerError>) {
    match result {
        Ok(_) => {}
        Err(SchedulerError::ListRules(e)) => {
            error!(error = %e, "Failed to list active rules, skipping tick");
        }
        Err(e) => warn!(error = %e, "Tick did not run"),
    }
}
