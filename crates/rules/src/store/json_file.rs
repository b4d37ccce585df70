//! [`RuleStore`] over the legacy JSON rules file.
//!
//! The file maps an owner (the account email) to that owner's rows:
//!
//! ```json
//! {
//!   "dana@example.com": [
//!     { "id": "r-1", "symbol": "AAPL", "min_price": "150", "max_price": "",
//!       "is_one_time": "TRUE", "status": "Active", "last_alert": "",
//!       "phone": "+972501234567" }
//!   ]
//! }
//! ```
//!
//! Rows written by the older dashboard use `min`/`max` instead of
//! `min_price`/`max_price` and carry no id or flags:
//!
//! ```json
//! { "symbol": "AAPL", "min": 100.0, "max": 500.0, "phone": "+972501234567" }
//! ```
//!
//! Rows are loosely typed: numbers may be strings or empty, flags are
//! `"TRUE"`/`"FALSE"`. They are converted into [`AlertRule`] here and nowhere
//! else. A row's `phone` becomes the rule's WhatsApp address. Columns the
//! scheduler does not own (`phone`, `min`, `max`, ...) are preserved verbatim
//! on write. Rows written without an `id` are given a UUID the first time they
//! are listed.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pricewatch_core::{AlertRule, RuleStatus};

use super::error::{Result, StoreError};
use super::{apply_update, RuleStore, StateUpdate};

type RulesFile = BTreeMap<String, Vec<LegacyRow>>;

const WHATSAPP_CHANNEL: &str = "whatsapp";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LegacyRow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    symbol: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    min_price: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    max_price: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    min_volume: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    is_one_time: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    status: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    last_alert: Value,
    #[serde(default)]
    version: u64,
    /// Columns owned by other parts of the product.
    #[serde(flatten)]
    extra: serde_json::Map<String, Value>,
}

impl LegacyRow {
    fn to_rule(&self, owner: &str) -> std::result::Result<AlertRule, String> {
        let id = self
            .id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or("row has no id")?;
        let symbol = self.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err("row has no symbol".into());
        }

        let mut contacts = BTreeMap::new();
        if let Some(phone) = self.extra.get("phone").and_then(Value::as_str) {
            if !phone.trim().is_empty() {
                contacts.insert(WHATSAPP_CHANNEL.to_string(), phone.trim().to_string());
            }
        }

        Ok(AlertRule {
            id,
            owner: owner.to_string(),
            symbol,
            min_price: self.bound(&self.min_price, "min")?,
            max_price: self.bound(&self.max_price, "max")?,
            min_volume: loose_number(&self.min_volume).map_err(|e| format!("min_volume: {e}"))?,
            // Rows without the flag predate one-time rules and are recurring.
            recurring: !loose_bool(&self.is_one_time).map_err(|e| format!("is_one_time: {e}"))?,
            status: loose_status(&self.status).map_err(|e| format!("status: {e}"))?,
            last_notified_at: loose_timestamp(&self.last_alert)
                .map_err(|e| format!("last_alert: {e}"))?,
            version: self.version,
            contacts,
        })
    }

    /// Read a price bound, falling back to the short column name older rows use.
    fn bound(&self, value: &Value, short: &str) -> std::result::Result<Option<f64>, String> {
        match (value, self.extra.get(short)) {
            (Value::Null, Some(legacy)) => {
                loose_number(legacy).map_err(|e| format!("{short}: {e}"))
            }
            _ => loose_number(value).map_err(|e| format!("{short}_price: {e}")),
        }
    }

    /// Write back only the scheduler-owned columns.
    fn store_state(&mut self, rule: &AlertRule) {
        self.last_alert = rule
            .last_notified_at
            .map(|t| Value::String(t.to_rfc3339()))
            .unwrap_or(Value::Null);
        self.status = Value::String(rule.status.as_str().to_string());
        self.version = rule.version;
    }
}

fn has_missing_ids(file: &RulesFile) -> bool {
    file.values()
        .flatten()
        .any(|row| row.id.as_deref().map_or(true, |id| id.trim().is_empty()))
}

/// Give every id-less row a fresh UUID. Returns how many were assigned.
fn assign_missing_ids(file: &mut RulesFile) -> usize {
    let mut assigned = 0;
    for row in file.values_mut().flatten() {
        if row.id.as_deref().map_or(true, |id| id.trim().is_empty()) {
            row.id = Some(Uuid::new_v4().to_string());
            assigned += 1;
        }
    }
    assigned
}

fn loose_number(v: &Value) -> std::result::Result<Option<f64>, String> {
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_f64().map(Some).ok_or_else(|| format!("not a number: {n}")),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("not a number: {s:?}")),
        other => Err(format!("unexpected value: {other}")),
    }
}

fn loose_bool(v: &Value) -> std::result::Result<bool, String> {
    match v {
        Value::Null => Ok(false),
        Value::Bool(b) => Ok(*b),
        Value::String(s) => match s.trim().to_ascii_uppercase().as_str() {
            "TRUE" => Ok(true),
            "FALSE" | "" => Ok(false),
            _ => Err(format!("not a flag: {s:?}")),
        },
        other => Err(format!("unexpected value: {other}")),
    }
}

fn loose_status(v: &Value) -> std::result::Result<RuleStatus, String> {
    match v {
        Value::Null => Ok(RuleStatus::Active),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" | "active" => Ok(RuleStatus::Active),
            "archived" => Ok(RuleStatus::Archived),
            _ => Err(format!("unknown status: {s:?}")),
        },
        other => Err(format!("unexpected value: {other}")),
    }
}

fn loose_timestamp(v: &Value) -> std::result::Result<Option<DateTime<Utc>>, String> {
    let s = match v {
        Value::Null => return Ok(None),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim(),
        other => return Err(format!("unexpected value: {other}")),
    };
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(Some(t.with_timezone(&Utc)));
    }
    // Older rows carry naive local timestamps like "2024-03-01 14:05:09.123456";
    // they are read as UTC.
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Some(naive.and_utc()));
        }
    }
    Err(format!("unparseable timestamp: {s:?}"))
}

/// File-backed store. All writes in this process go through one mutex, and
/// each write replaces the file atomically via a temp file and rename.
pub struct JsonFileRuleStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileRuleStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_file(&self) -> Result<RulesFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(RulesFile::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "rules file missing, treating as empty");
                Ok(RulesFile::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, file: &RulesFile) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(file)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl RuleStore for JsonFileRuleStore {
    async fn list_active_rules(&self) -> Result<Vec<AlertRule>> {
        let mut file = self.read_file().await?;
        if has_missing_ids(&file) {
            let _guard = self.write_lock.lock().await;
            file = self.read_file().await?;
            let assigned = assign_missing_ids(&mut file);
            if assigned > 0 {
                self.write_file(&file).await?;
                info!(path = %self.path.display(), assigned, "assigned ids to rule rows");
            }
        }

        let mut rules = Vec::new();
        for (owner, rows) in &file {
            for (index, row) in rows.iter().enumerate() {
                match row.to_rule(owner) {
                    Ok(rule) if rule.is_active() => rules.push(rule),
                    Ok(_) => {}
                    Err(error) => warn!(
                        path = %self.path.display(),
                        owner = %owner,
                        index,
                        error = %error,
                        "skipping unreadable rule row"
                    ),
                }
            }
        }
        Ok(rules)
    }

    async fn update_rule_state(&self, update: &StateUpdate) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;

        let (owner, row) = file
            .iter_mut()
            .find_map(|(owner, rows)| {
                rows.iter_mut()
                    .find(|r| r.id.as_deref() == Some(update.rule_id.as_str()))
                    .map(|row| (owner.clone(), row))
            })
            .ok_or_else(|| StoreError::NotFound(update.rule_id.clone()))?;

        let mut rule = row.to_rule(&owner).map_err(|e| {
            StoreError::Backend(format!("rule {} is unreadable: {e}", update.rule_id))
        })?;
        apply_update(&mut rule, update)?;
        row.store_state(&rule);

        self.write_file(&file).await
    }
}
