//! In-memory structured audit trail for alert rule processing.
//!
//! Every scheduler pass appends one entry per pipeline phase it reaches for a
//! rule (fetch, evaluation, gate, dispatch, persist). Entries are capped per
//! rule with FIFO eviction, so a host UI can show why a rule did or did not
//! fire without any extra persistence.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of entries retained per rule.
pub const DEFAULT_MAX_ENTRIES_PER_RULE: usize = 500;

/// Severity level for audit log entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// Numeric severity for comparison (higher = more severe).
    pub fn as_severity(&self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Info => 1,
            LogLevel::Warning => 2,
            LogLevel::Error => 3,
        }
    }
}

/// Pipeline phase that produced the entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Validation,
    MarketData,
    Evaluation,
    Cooldown,
    Notification,
    NotifyError,
    Persist,
}

/// A single audit log entry.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub rule_id: String,
    pub level: LogLevel,
    pub phase: ExecutionPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Filters for [`AuditLog::query`].
#[derive(Debug, Default, Deserialize)]
pub struct LogQueryParams {
    /// Minimum log level (inclusive).
    pub level: Option<LogLevel>,
    pub phase: Option<ExecutionPhase>,
    /// Maximum number of entries to return (default 100).
    pub limit: Option<u32>,
    /// Only return entries at or after this instant.
    pub since: Option<DateTime<Utc>>,
}

/// Per-rule audit trail with FIFO eviction.
///
/// Cloning is cheap and clones share the same entries.
#[derive(Clone)]
pub struct AuditLog {
    entries: Arc<RwLock<HashMap<String, VecDeque<LogEntry>>>>,
    max_entries_per_rule: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES_PER_RULE)
    }

    pub fn with_max_entries(max: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            max_entries_per_rule: max.max(1),
        }
    }

    pub fn log(
        &self,
        rule_id: &str,
        level: LogLevel,
        phase: ExecutionPhase,
        message: impl Into<String>,
    ) {
        self.log_with_details(rule_id, level, phase, message, None, None);
    }

    pub fn log_with_details(
        &self,
        rule_id: &str,
        level: LogLevel,
        phase: ExecutionPhase,
        message: impl Into<String>,
        details: Option<serde_json::Value>,
        duration_ms: Option<u64>,
    ) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            rule_id: rule_id.to_string(),
            level,
            phase,
            message: message.into(),
            details,
            duration_ms,
        };

        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let deque = guard.entry(rule_id.to_string()).or_default();
        deque.push_back(entry);
        while deque.len() > self.max_entries_per_rule {
            deque.pop_front();
        }
    }

    /// Entries for a rule, newest first, filtered by `params`.
    pub fn query(&self, rule_id: &str, params: &LogQueryParams) -> Vec<LogEntry> {
        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let Some(deque) = guard.get(rule_id) else {
            return Vec::new();
        };

        let min_severity = params.level.map(|l| l.as_severity()).unwrap_or(0);
        let limit = params.limit.unwrap_or(100) as usize;

        deque
            .iter()
            .rev()
            .filter(|e| e.level.as_severity() >= min_severity)
            .filter(|e| params.phase.map_or(true, |p| e.phase == p))
            .filter(|e| params.since.map_or(true, |s| e.timestamp >= s))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Most recent entry for a rule, if any.
    pub fn latest(&self, rule_id: &str) -> Option<LogEntry> {
        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        guard.get(rule_id).and_then(|d| d.back().cloned())
    }

    /// IDs of all rules with at least one entry, sorted.
    pub fn rule_ids(&self) -> Vec<String> {
        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = guard.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn clear(&self, rule_id: &str) {
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        guard.remove(rule_id);
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
