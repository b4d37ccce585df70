//! Notifier trait definition and shared result types.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Errors that can occur during notification delivery.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// The provider accepted the request but refused the message.
    #[error("Provider rejected message: {0}")]
    Rejected(String),

    #[error("Delivery timed out after {0:?}")]
    Timeout(Duration),
}

/// A rendered notification ready for delivery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Notification {
    /// The rendered subject/title.
    pub subject: String,
    /// The rendered body content.
    pub body: String,
    /// Additional metadata (rule id, symbol, direction, price).
    pub metadata: HashMap<String, String>,
}

/// Trait for notification channel implementations.
///
/// Implementations deliver to a single `recipient` address whose format is
/// channel specific (chat id, phone number, email address, webhook tag).
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver a notification through this channel.
    async fn send(&self, recipient: &str, notification: &Notification) -> Result<(), NotifyError>;

    /// Test connectivity with a sample notification.
    async fn test(&self, recipient: &str) -> Result<(), NotifyError> {
        let test_notification = Notification {
            subject: "[TEST] Price alert test".to_string(),
            body: "This is a test notification from pricewatch.".to_string(),
            metadata: HashMap::from([
                ("rule_id".to_string(), "test-rule".to_string()),
                ("symbol".to_string(), "TEST".to_string()),
            ]),
        };
        self.send(recipient, &test_notification).await
    }

    /// Human-readable name for this channel (e.g., "telegram", "email").
    fn channel_name(&self) -> &str;
}

/// What happened on a single channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
    Delivered,
    Failed(String),
    /// No address for the rule owner on this channel; nothing was sent.
    Skipped,
}

/// Result of dispatching a notification to a single channel.
#[derive(Debug, Clone)]
pub struct ChannelResult {
    pub channel: String,
    pub outcome: ChannelOutcome,
    pub duration_ms: u64,
}

/// Aggregate result of one dispatch across every configured channel.
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    pub rule_id: String,
    pub channels: Vec<ChannelResult>,
}

impl DispatchResult {
    /// True if at least one channel delivered the notification.
    pub fn any_succeeded(&self) -> bool {
        self.channels
            .iter()
            .any(|c| c.outcome == ChannelOutcome::Delivered)
    }

    /// Channel name to `None` on success or `Some(error)` on failure.
    /// Skipped channels are omitted.
    pub fn per_channel(&self) -> BTreeMap<&str, Option<&str>> {
        self.channels
            .iter()
            .filter_map(|c| match &c.outcome {
                ChannelOutcome::Delivered => Some((c.channel.as_str(), None)),
                ChannelOutcome::Failed(err) => Some((c.channel.as_str(), Some(err.as_str()))),
                ChannelOutcome::Skipped => None,
            })
            .collect()
    }

    pub fn delivered_channels(&self) -> Vec<&str> {
        self.channels
            .iter()
            .filter(|c| c.outcome == ChannelOutcome::Delivered)
            .map(|c| c.channel.as_str())
            .collect()
    }

    pub fn failed_channels(&self) -> Vec<&str> {
        self.channels
            .iter()
            .filter(|c| matches!(c.outcome, ChannelOutcome::Failed(_)))
            .map(|c| c.channel.as_str())
            .collect()
    }
}
