//! Error types for rule stores.

use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Rule not found: {0}")]
    NotFound(String),

    /// The row changed since it was read.
    #[error("Version conflict on rule {rule_id}: expected {expected}, found {actual}")]
    Conflict {
        rule_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Rule {0} is archived and can no longer be updated")]
    Archived(String),

    #[error("Rule {rule_id}: last_notified_at would move backwards ({proposed} < {stored})")]
    NonMonotonic {
        rule_id: String,
        stored: DateTime<Utc>,
        proposed: DateTime<Utc>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
