use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use pricewatch_core::config::SchedulerConfig;
use pricewatch_core::{AlertRule, Direction, MarketSnapshot, RuleStatus, TriggerResult};
use pricewatch_market::{MarketDataProvider, MarketError, StaticMarketData};
use pricewatch_notify::dry_run::DryRunNotifier;
use pricewatch_notify::{ContactBook, Dispatcher, Notification, Notifier, NotifyError};
use pricewatch_rules::audit_log::{ExecutionPhase, LogQueryParams};
use pricewatch_rules::store::{MemoryRuleStore, ReadOnlyRuleStore};
use pricewatch_rules::{RuleStore, StateUpdate, StoreError};
use pricewatch_scheduler::{AlertScheduler, RuleOutcome, SchedulerError, SchedulerState};

// ── Mocks ───────────────────────────────────────────────────────────

struct MockNotifier {
    name: &'static str,
    sent: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl MockNotifier {
    fn new(name: &'static str, failing: bool) -> (Arc<Self>, Arc<AtomicUsize>, Arc<AtomicBool>) {
        let sent = Arc::new(AtomicUsize::new(0));
        let failing = Arc::new(AtomicBool::new(failing));
        let notifier = Arc::new(Self {
            name,
            sent: sent.clone(),
            failing: failing.clone(),
        });
        (notifier, sent, failing)
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, _recipient: &str, _notification: &Notification) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Rejected("mock outage".to_string()));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn channel_name(&self) -> &str {
        self.name
    }
}

/// Sleeps before answering and records peak concurrency.
struct SlowMarket {
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowMarket {
    fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MarketDataProvider for SlowMarket {
    async fn get_snapshot(&self, symbol: &str) -> Result<MarketSnapshot, MarketError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            price: 1.0,
            volume: 0.0,
            observed_at: Utc::now(),
        })
    }

    fn provider_name(&self) -> &str {
        "slow"
    }
}

/// Wraps a memory store: can fail listings, repeat every listed rule, and
/// reject state updates as if the row had been edited elsewhere.
struct QuirkyStore {
    inner: MemoryRuleStore,
    fail_list: AtomicBool,
    repeat: bool,
    conflict_updates: AtomicBool,
}

impl QuirkyStore {
    fn over(inner: MemoryRuleStore) -> Self {
        Self {
            inner,
            fail_list: AtomicBool::new(false),
            repeat: false,
            conflict_updates: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl RuleStore for QuirkyStore {
    async fn list_active_rules(&self) -> Result<Vec<AlertRule>, StoreError> {
        if self.fail_list.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Backend("connection reset".to_string()));
        }
        let rules = self.inner.list_active_rules().await?;
        if self.repeat {
            Ok(rules.iter().cloned().chain(rules.iter().cloned()).collect())
        } else {
            Ok(rules)
        }
    }

    async fn update_rule_state(&self, update: &StateUpdate) -> Result<(), StoreError> {
        if self.conflict_updates.load(Ordering::SeqCst) {
            return Err(StoreError::Conflict {
                rule_id: update.rule_id.clone(),
                expected: update.expected_version,
                actual: update.expected_version + 1,
            });
        }
        self.inner.update_rule_state(update).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

const OWNER: &str = "dana@example.com";

fn config() -> SchedulerConfig {
    SchedulerConfig {
        tick_interval: Duration::from_secs(1),
        tick_deadline: Duration::from_secs(5),
        cooldown: Duration::from_secs(3_600),
        worker_concurrency: 4,
        market_timeout: Duration::from_secs(1),
        notify_timeout: Duration::from_secs(1),
        shutdown_grace: Duration::from_secs(1),
    }
}

fn contacts() -> ContactBook {
    ContactBook::new()
        .with(OWNER, "primary", "+15550001111")
        .with(OWNER, "backup", "dana@example.com")
}

fn dispatcher(channels: Vec<Arc<dyn Notifier>>) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(channels, contacts()).with_send_timeout(Duration::from_millis(500)))
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 15, 0, 0).unwrap()
}

fn minutes(n: i64) -> chrono::Duration {
    chrono::Duration::minutes(n)
}

struct Harness {
    store: MemoryRuleStore,
    market: StaticMarketData,
    sent: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
    scheduler: AlertScheduler,
}

fn harness(rules: Vec<AlertRule>) -> Harness {
    let store = MemoryRuleStore::with_rules(rules);
    let market = StaticMarketData::new();
    let (notifier, sent, failing) = MockNotifier::new("primary", false);
    let scheduler = AlertScheduler::new(
        Arc::new(store.clone()),
        Arc::new(market.clone()),
        dispatcher(vec![notifier]),
        config(),
    );
    Harness {
        store,
        market,
        sent,
        failing,
        scheduler,
    }
}

// ── Scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn one_time_ceiling_rule_notifies_once_and_archives() {
    let h = harness(vec![AlertRule::new("r1", OWNER, "AAPL").with_max_price(100.0)]);
    h.market.set_quote("AAPL", 101.0, 0.0);

    let summary = h.scheduler.tick_at(t0()).await.unwrap();
    assert_eq!(
        summary.outcome("r1"),
        Some(&RuleOutcome::Notified {
            status: RuleStatus::Archived
        })
    );

    let stored = h.store.get("r1").unwrap();
    assert_eq!(stored.status, RuleStatus::Archived);
    assert_eq!(stored.last_notified_at, Some(t0()));
    assert_eq!(h.sent.load(Ordering::SeqCst), 1);

    // Archived rules are never evaluated again, even far past any cooldown.
    let summary = h.scheduler.tick_at(t0() + minutes(600)).await.unwrap();
    assert_eq!(summary.listed, 0);
    assert_eq!(h.sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn low_volume_inside_cooldown_changes_nothing() {
    let rule = AlertRule::new("r2", OWNER, "XYZ")
        .with_min_price(50.0)
        .with_min_volume(1_000_000.0)
        .recurring(true)
        .with_last_notified_at(t0() - minutes(30));
    let h = harness(vec![rule.clone()]);
    h.market.set_quote("XYZ", 40.0, 500_000.0);

    let summary = h.scheduler.tick_at(t0()).await.unwrap();
    assert_eq!(
        summary.outcome("r2"),
        Some(&RuleOutcome::Quiet(TriggerResult::PriceOkVolumeLow))
    );
    assert_eq!(h.store.get("r2").unwrap(), rule);
    assert_eq!(h.sent.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn recurring_floor_rule_past_cooldown_notifies_and_stays_active() {
    let h = harness(vec![AlertRule::new("r2", OWNER, "XYZ")
        .with_min_price(50.0)
        .with_min_volume(1_000_000.0)
        .recurring(true)
        .with_last_notified_at(t0() - minutes(90))]);
    h.market.set_quote("XYZ", 40.0, 2_000_000.0);

    let summary = h.scheduler.tick_at(t0()).await.unwrap();
    assert_eq!(
        summary.outcome("r2"),
        Some(&RuleOutcome::Notified {
            status: RuleStatus::Active
        })
    );

    let stored = h.store.get("r2").unwrap();
    assert_eq!(stored.status, RuleStatus::Active);
    assert_eq!(stored.last_notified_at, Some(t0()));
    assert_eq!(stored.version, 1);
}

#[tokio::test]
async fn one_failing_channel_does_not_block_the_other() {
    let store = MemoryRuleStore::with_rules([AlertRule::new("r1", OWNER, "AAPL").with_min_price(150.0)]);
    let market = StaticMarketData::new();
    market.set_quote("AAPL", 149.2, 10.0);
    let (broken, _, _) = MockNotifier::new("primary", true);
    let (working, sent, _) = MockNotifier::new("backup", false);

    let scheduler = AlertScheduler::new(
        Arc::new(store.clone()),
        Arc::new(market),
        dispatcher(vec![broken, working]),
        config(),
    );

    let summary = scheduler.tick_at(t0()).await.unwrap();
    assert!(summary.outcome("r1").unwrap().delivered());
    assert_eq!(sent.load(Ordering::SeqCst), 1);
    assert_eq!(store.get("r1").unwrap().last_notified_at, Some(t0()));

    let errors = scheduler.audit().query(
        "r1",
        &LogQueryParams {
            phase: Some(ExecutionPhase::NotifyError),
            ..Default::default()
        },
    );
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("primary"));
}

// ── Properties ──────────────────────────────────────────────────────

#[tokio::test]
async fn all_channels_failing_leaves_state_for_next_tick() {
    let h = harness(vec![AlertRule::new("r1", OWNER, "AAPL").with_max_price(100.0)]);
    h.market.set_quote("AAPL", 120.0, 0.0);
    h.failing.store(true, Ordering::SeqCst);

    let summary = h.scheduler.tick_at(t0()).await.unwrap();
    assert_eq!(summary.outcome("r1"), Some(&RuleOutcome::DeliveryFailed));
    let stored = h.store.get("r1").unwrap();
    assert_eq!(stored.last_notified_at, None);
    assert_eq!(stored.status, RuleStatus::Active);

    // Channel recovers one minute later; no cooldown penalty applies.
    h.failing.store(false, Ordering::SeqCst);
    let summary = h.scheduler.tick_at(t0() + minutes(1)).await.unwrap();
    assert!(summary.outcome("r1").unwrap().delivered());
    assert_eq!(h.sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn recurring_rule_respects_cooldown() {
    let h = harness(vec![AlertRule::new("r1", OWNER, "AAPL")
        .with_max_price(100.0)
        .recurring(true)]);
    h.market.set_quote("AAPL", 120.0, 0.0);

    h.scheduler.tick_at(t0()).await.unwrap();
    let held = h.scheduler.tick_at(t0() + minutes(30)).await.unwrap();
    assert_eq!(
        held.outcome("r1"),
        Some(&RuleOutcome::Held(TriggerResult::Triggered(Direction::Ceiling)))
    );
    assert_eq!(h.sent.load(Ordering::SeqCst), 1);

    h.scheduler.tick_at(t0() + minutes(61)).await.unwrap();
    assert_eq!(h.sent.load(Ordering::SeqCst), 2);
    assert_eq!(
        h.store.get("r1").unwrap().last_notified_at,
        Some(t0() + minutes(61))
    );
}

#[tokio::test]
async fn failures_stay_with_their_rule() {
    let h = harness(vec![
        AlertRule::new("bad", OWNER, "AAPL"),
        AlertRule::new("delisted", OWNER, "GONE").with_max_price(1.0),
        AlertRule::new("good", OWNER, "AAPL").with_max_price(100.0),
    ]);
    h.market.set_quote("AAPL", 120.0, 0.0);

    let summary = h.scheduler.tick_at(t0()).await.unwrap();
    assert_eq!(summary.outcome("bad"), Some(&RuleOutcome::Invalid));
    assert!(matches!(
        summary.outcome("delisted"),
        Some(RuleOutcome::MarketUnavailable(_))
    ));
    assert!(summary.outcome("good").unwrap().delivered());
    assert_eq!(summary.delivered(), 1);
    assert_eq!(summary.count("market_unavailable"), 1);
}

#[tokio::test]
async fn duplicate_ids_are_processed_once() {
    let inner = MemoryRuleStore::with_rules([AlertRule::new("r1", OWNER, "AAPL").with_max_price(100.0)]);
    let store = Arc::new(QuirkyStore {
        repeat: true,
        ..QuirkyStore::over(inner.clone())
    });
    let market = StaticMarketData::new();
    market.set_quote("AAPL", 120.0, 0.0);
    let (notifier, sent, _) = MockNotifier::new("primary", false);
    let scheduler = AlertScheduler::new(store, Arc::new(market), dispatcher(vec![notifier]), config());

    let summary = scheduler.tick_at(t0()).await.unwrap();
    assert_eq!(summary.listed, 2);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(sent.load(Ordering::SeqCst), 1);
    assert_eq!(inner.get("r1").unwrap().version, 1);
}

#[tokio::test]
async fn failed_listing_skips_the_tick_only() {
    let inner = MemoryRuleStore::with_rules([AlertRule::new("r1", OWNER, "AAPL").with_max_price(100.0)]);
    let store = Arc::new(QuirkyStore {
        fail_list: AtomicBool::new(true),
        ..QuirkyStore::over(inner)
    });
    let market = StaticMarketData::new();
    market.set_quote("AAPL", 120.0, 0.0);
    let (notifier, sent, _) = MockNotifier::new("primary", false);
    let scheduler = AlertScheduler::new(store, Arc::new(market), dispatcher(vec![notifier]), config());

    assert!(matches!(
        scheduler.tick_at(t0()).await,
        Err(SchedulerError::ListRules(_))
    ));
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    scheduler.tick_at(t0()).await.unwrap();
    assert_eq!(sent.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_state_write_is_renotified_next_tick() {
    let inner = MemoryRuleStore::with_rules([AlertRule::new("r1", OWNER, "AAPL").with_max_price(100.0)]);
    let store = Arc::new(QuirkyStore::over(inner.clone()));
    store.conflict_updates.store(true, Ordering::SeqCst);
    let market = StaticMarketData::new();
    market.set_quote("AAPL", 120.0, 0.0);
    let (notifier, sent, _) = MockNotifier::new("primary", false);
    let scheduler = AlertScheduler::new(
        store.clone(),
        Arc::new(market),
        dispatcher(vec![notifier]),
        config(),
    );

    let summary = scheduler.tick_at(t0()).await.unwrap();
    assert!(matches!(
        summary.outcome("r1"),
        Some(RuleOutcome::PersistFailed(reason)) if reason.contains("r1")
    ));
    assert!(summary.outcome("r1").unwrap().delivered());
    assert_eq!(sent.load(Ordering::SeqCst), 1);
    let stored = inner.get("r1").unwrap();
    assert_eq!(stored.status, RuleStatus::Active);
    assert_eq!(stored.last_notified_at, None);
    assert_eq!(scheduler.state(), SchedulerState::Idle);

    let persist_errors = scheduler.audit().query(
        "r1",
        &LogQueryParams {
            phase: Some(ExecutionPhase::Persist),
            ..Default::default()
        },
    );
    assert_eq!(persist_errors.len(), 1);

    // Nothing was stored, so the next tick notifies again and archives.
    store.conflict_updates.store(false, Ordering::SeqCst);
    let summary = scheduler.tick_at(t0() + minutes(1)).await.unwrap();
    assert_eq!(
        summary.outcome("r1"),
        Some(&RuleOutcome::Notified {
            status: RuleStatus::Archived
        })
    );
    assert_eq!(sent.load(Ordering::SeqCst), 2);
    assert_eq!(inner.get("r1").unwrap().status, RuleStatus::Archived);
}

#[tokio::test]
async fn dry_run_never_writes_rule_state() {
    let inner = MemoryRuleStore::with_rules([AlertRule::new("r1", OWNER, "AAPL").with_max_price(100.0)]);
    let store = Arc::new(ReadOnlyRuleStore::new(Arc::new(inner.clone())));
    let market = StaticMarketData::new();
    market.set_quote("AAPL", 101.0, 0.0);
    let scheduler = AlertScheduler::new(
        store,
        Arc::new(market),
        dispatcher(vec![Arc::new(DryRunNotifier::new("primary"))]),
        config(),
    );

    let summary = scheduler.tick_at(t0()).await.unwrap();
    assert!(summary.outcome("r1").unwrap().delivered());
    let stored = inner.get("r1").unwrap();
    assert_eq!(stored.status, RuleStatus::Active);
    assert_eq!(stored.last_notified_at, None);
    assert_eq!(stored.version, 0);

    // The one-time rule is still there for the real worker.
    let summary = scheduler.tick_at(t0() + minutes(1)).await.unwrap();
    assert_eq!(summary.listed, 1);
}

#[tokio::test]
async fn tick_deadline_aborts_in_flight_rules() {
    let store = MemoryRuleStore::with_rules([AlertRule::new("slow", OWNER, "AAPL").with_max_price(0.5)]);
    let market = SlowMarket::new(Duration::from_secs(30));
    let (notifier, sent, _) = MockNotifier::new("primary", false);
    let mut cfg = config();
    cfg.tick_deadline = Duration::from_millis(100);
    cfg.market_timeout = Duration::from_secs(60);

    let scheduler = AlertScheduler::new(Arc::new(store.clone()), market, dispatcher(vec![notifier]), cfg);
    let summary = scheduler.tick_at(t0()).await.unwrap();

    assert_eq!(summary.aborted, vec!["slow".to_string()]);
    assert!(summary.outcomes.is_empty());
    assert!(summary.elapsed < Duration::from_secs(5));
    assert_eq!(sent.load(Ordering::SeqCst), 0);
    assert_eq!(store.get("slow").unwrap().version, 0);
    assert_eq!(scheduler.state(), SchedulerState::Idle);
}

#[tokio::test]
async fn market_timeout_is_a_rule_failure() {
    let store = MemoryRuleStore::with_rules([AlertRule::new("r1", OWNER, "AAPL").with_max_price(0.5)]);
    let mut cfg = config();
    cfg.market_timeout = Duration::from_millis(50);

    let scheduler = AlertScheduler::new(
        Arc::new(store),
        SlowMarket::new(Duration::from_secs(30)),
        dispatcher(Vec::new()),
        cfg,
    );
    let summary = scheduler.tick_at(t0()).await.unwrap();
    assert!(matches!(
        summary.outcome("r1"),
        Some(RuleOutcome::MarketUnavailable(reason)) if reason.contains("timed out")
    ));
}

#[tokio::test]
async fn worker_pool_bounds_concurrency() {
    let rules = (0..8).map(|i| AlertRule::new(format!("r{i}"), OWNER, "AAPL").with_max_price(100.0));
    let market = SlowMarket::new(Duration::from_millis(40));
    let mut cfg = config();
    cfg.worker_concurrency = 2;

    let scheduler = AlertScheduler::new(
        Arc::new(MemoryRuleStore::with_rules(rules)),
        market.clone(),
        dispatcher(Vec::new()),
        cfg,
    );
    let summary = scheduler.tick_at(t0()).await.unwrap();

    assert_eq!(summary.count("quiet"), 8);
    assert!(market.peak.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn stopped_scheduler_never_ticks() {
    let h = harness(vec![AlertRule::new("r1", OWNER, "AAPL").with_max_price(100.0)]);
    h.market.set_quote("AAPL", 120.0, 0.0);

    h.scheduler.stop();
    assert_eq!(h.scheduler.state(), SchedulerState::Stopped);
    assert!(matches!(
        h.scheduler.tick_at(t0()).await,
        Err(SchedulerError::Stopped)
    ));
    assert_eq!(h.sent.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn run_loop_ticks_until_shutdown() {
    let store = MemoryRuleStore::with_rules([AlertRule::new("r1", OWNER, "AAPL")
        .with_max_price(100.0)
        .recurring(true)]);
    let market = StaticMarketData::new();
    market.set_quote("AAPL", 120.0, 0.0);
    let (notifier, sent, _) = MockNotifier::new("primary", false);
    let mut cfg = config();
    cfg.tick_interval = Duration::from_millis(20);

    let scheduler = Arc::new(AlertScheduler::new(
        Arc::new(store),
        Arc::new(market),
        dispatcher(vec![notifier]),
        cfg,
    ));
    let shutdown = Arc::new(Notify::new());

    let runner = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("run loop should stop after shutdown")
        .unwrap();

    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    // Several ticks ran, but the cooldown allowed only one notification.
    assert_eq!(sent.load(Ordering::SeqCst), 1);
    let evaluations = scheduler.audit().query(
        "r1",
        &LogQueryParams {
            phase: Some(ExecutionPhase::Evaluation),
            ..Default::default()
        },
    );
    assert!(evaluations.len() >= 2);
}

#[tokio::test]
async fn shutdown_mid_tick_lets_short_work_finish() {
    let store = MemoryRuleStore::with_rules([AlertRule::new("r1", OWNER, "AAPL").with_max_price(0.5)]);
    let market = SlowMarket::new(Duration::from_millis(200));
    let (notifier, sent, _) = MockNotifier::new("primary", false);
    let mut cfg = config();
    cfg.tick_interval = Duration::from_secs(60);
    cfg.shutdown_grace = Duration::from_secs(3);

    let scheduler = Arc::new(AlertScheduler::new(
        Arc::new(store.clone()),
        market,
        dispatcher(vec![notifier]),
        cfg,
    ));
    let shutdown = Arc::new(Notify::new());
    let runner = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("run loop should stop after the in-flight tick")
        .unwrap();

    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(sent.load(Ordering::SeqCst), 1);
    assert_eq!(store.get("r1").unwrap().status, RuleStatus::Archived);
}

#[tokio::test]
async fn shutdown_mid_tick_abandons_work_after_grace() {
    let store = MemoryRuleStore::with_rules([AlertRule::new("r1", OWNER, "AAPL").with_max_price(0.5)]);
    let market = SlowMarket::new(Duration::from_secs(30));
    let (notifier, sent, _) = MockNotifier::new("primary", false);
    let mut cfg = config();
    cfg.tick_interval = Duration::from_secs(60);
    cfg.tick_deadline = Duration::from_secs(60);
    cfg.market_timeout = Duration::from_secs(60);
    cfg.shutdown_grace = Duration::from_millis(100);

    let scheduler = Arc::new(AlertScheduler::new(
        Arc::new(store.clone()),
        market,
        dispatcher(vec![notifier]),
        cfg,
    ));
    let shutdown = Arc::new(Notify::new());
    let runner = {
        let scheduler = scheduler.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { scheduler.run(shutdown).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    let requested = std::time::Instant::now();
    shutdown.notify_one();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("run loop should give up after the grace period")
        .unwrap();

    assert!(requested.elapsed() < Duration::from_secs(2));
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
    assert_eq!(sent.load(Ordering::SeqCst), 0);
    assert_eq!(store.get("r1").unwrap().version, 0);
}

#[tokio::test]
async fn stop_ends_the_run_loop() {
    let h = harness(vec![AlertRule::new("r1", OWNER, "AAPL").with_max_price(100.0)]);
    let mut cfg = config();
    cfg.tick_interval = Duration::from_millis(20);
    let scheduler = Arc::new(AlertScheduler::new(
        Arc::new(h.store.clone()),
        Arc::new(h.market.clone()),
        dispatcher(Vec::new()),
        cfg,
    ));

    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(Arc::new(Notify::new())).await })
    };

    tokio::time::sleep(Duration::from_millis(60)).await;
    scheduler.stop();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("run loop should exit once stopped")
        .unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Stopped);
}
