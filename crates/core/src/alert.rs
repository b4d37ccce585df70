//! Alert rule and market snapshot types shared across the workspace.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an alert rule. `Archived` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleStatus {
    Active,
    Archived,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::Active => "Active",
            RuleStatus::Archived => "Archived",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user-defined price/volume trigger on one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Opaque, immutable identifier.
    pub id: String,
    /// Owner of the rule; notifications are routed to the owner's contacts.
    pub owner: String,
    /// Uppercase canonical market symbol (e.g. `AAPL`, `BTC-USD`).
    pub symbol: String,
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    /// Volume floor; when absent volume never gates a trigger.
    #[serde(default)]
    pub min_volume: Option<f64>,
    /// `false` means the rule is archived after its first delivered notification.
    pub recurring: bool,
    pub status: RuleStatus,
    #[serde(default)]
    pub last_notified_at: Option<DateTime<Utc>>,
    /// Row token bumped on every write, used for optimistic concurrency.
    #[serde(default)]
    pub version: u64,
    /// Per-rule addresses keyed by channel name. Used when the owner's
    /// contact book has no address for a channel.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub contacts: BTreeMap<String, String>,
}

impl AlertRule {
    /// Create an active, never-notified rule with no bounds set.
    pub fn new(id: impl Into<String>, owner: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            symbol: symbol.into(),
            min_price: None,
            max_price: None,
            min_volume: None,
            recurring: false,
            status: RuleStatus::Active,
            last_notified_at: None,
            version: 0,
            contacts: BTreeMap::new(),
        }
    }

    pub fn with_min_price(mut self, price: f64) -> Self {
        self.min_price = Some(price);
        self
    }

    pub fn with_max_price(mut self, price: f64) -> Self {
        self.max_price = Some(price);
        self
    }

    pub fn with_min_volume(mut self, volume: f64) -> Self {
        self.min_volume = Some(volume);
        self
    }

    pub fn recurring(mut self, recurring: bool) -> Self {
        self.recurring = recurring;
        self
    }

    pub fn with_last_notified_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_notified_at = Some(at);
        self
    }

    pub fn with_contact(mut self, channel: &str, address: impl Into<String>) -> Self {
        self.contacts.insert(channel.to_ascii_lowercase(), address.into());
        self
    }

    /// The rule's own address for `channel`, if it carries one.
    pub fn contact(&self, channel: &str) -> Option<&str> {
        self.contacts
            .get(&channel.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|a| !a.trim().is_empty())
    }

    /// A rule is meaningful only when at least one price bound is present.
    pub fn has_price_bound(&self) -> bool {
        self.min_price.is_some() || self.max_price.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }
}

/// Point-in-time read of a symbol's price and volume. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: f64,
    /// `NaN` when the source did not report volume.
    pub volume: f64,
    pub observed_at: DateTime<Utc>,
}

/// Which bound a triggered rule crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Price at or below `min_price`.
    Floor,
    /// Price at or above `max_price`.
    Ceiling,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Floor => "floor",
            Direction::Ceiling => "ceiling",
        }
    }
}

/// Outcome of evaluating one rule against one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerResult {
    NoTrigger,
    /// Price condition met but the volume floor was not.
    PriceOkVolumeLow,
    Triggered(Direction),
    /// The snapshot could not be judged (wrong symbol, non-finite price).
    Indeterminate,
}

impl TriggerResult {
    pub fn is_triggered(&self) -> bool {
        matches!(self, TriggerResult::Triggered(_))
    }

    pub fn direction(&self) -> Option<Direction> {
        match self {
            TriggerResult::Triggered(d) => Some(*d),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TriggerResult::NoTrigger => "no_trigger",
            TriggerResult::PriceOkVolumeLow => "price_ok_volume_low",
            TriggerResult::Triggered(Direction::Floor) => "triggered_floor",
            TriggerResult::Triggered(Direction::Ceiling) => "triggered_ceiling",
            TriggerResult::Indeterminate => "indeterminate",
        }
    }
}
