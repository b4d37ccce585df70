//! Routes alert notifications to every channel configured for a rule owner.
//!
//! The dispatcher renders one notification per trigger and delivers it to
//! each channel the owner has an address for. The owner's contact book is
//! consulted first; the rule's own addresses fill in channels it lacks. Channels run concurrently,
//! each bounded by the send timeout; a failure, timeout or panic on one
//! channel is recorded for that channel only.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use pricewatch_core::{AlertRule, MarketSnapshot, TriggerResult};

use crate::contacts::ContactBook;
use crate::templating::{MessageTemplates, TemplateContext};
use crate::traits::{ChannelOutcome, ChannelResult, DispatchResult, Notification, Notifier, NotifyError};

/// Default bound on a single channel send.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Dispatches alert notifications to multiple channels.
pub struct Dispatcher {
    channels: Vec<Arc<dyn Notifier>>,
    contacts: ContactBook,
    templates: MessageTemplates,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn Notifier>>, contacts: ContactBook) -> Self {
        Self {
            channels,
            contacts,
            templates: MessageTemplates::default(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Create a dispatcher with no channels; every dispatch delivers nothing.
    pub fn empty() -> Self {
        Self::new(Vec::new(), ContactBook::new())
    }

    pub fn with_templates(mut self, templates: MessageTemplates) -> Self {
        self.templates = templates;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.channel_name()).collect()
    }

    pub fn contacts(&self) -> &ContactBook {
        &self.contacts
    }

    /// Render and deliver the alert for a triggered rule.
    ///
    /// A non-triggered result delivers nothing. Never returns an error:
    /// per-channel failures are reported in the [`DispatchResult`].
    pub async fn dispatch(
        &self,
        rule: &AlertRule,
        trigger: &TriggerResult,
        snap: &MarketSnapshot,
    ) -> DispatchResult {
        let Some(direction) = trigger.direction() else {
            tracing::debug!(rule_id = %rule.id, trigger = trigger.label(), "Nothing to dispatch");
            return DispatchResult {
                rule_id: rule.id.clone(),
                channels: Vec::new(),
            };
        };

        let ctx = TemplateContext::new(rule, direction, snap, Utc::now());
        let notification = self.templates.render(&ctx);
        self.dispatch_notification(rule, &notification).await
    }

    /// Deliver an already rendered notification to every channel with an
    /// address for the rule.
    pub async fn dispatch_notification(
        &self,
        rule: &AlertRule,
        notification: &Notification,
    ) -> DispatchResult {
        if self.channels.is_empty() {
            tracing::debug!(rule_id = %rule.id, "No notification channels configured");
        }

        let sends = self
            .channels
            .iter()
            .map(|channel| self.send_one(rule, channel.as_ref(), notification));
        let channels = futures::future::join_all(sends).await;

        DispatchResult {
            rule_id: rule.id.clone(),
            channels,
        }
    }

    /// Where `channel` should deliver for `rule`, if anywhere.
    fn recipient<'a>(&'a self, rule: &'a AlertRule, channel: &str) -> Option<&'a str> {
        self.contacts
            .address(&rule.owner, channel)
            .or_else(|| rule.contact(channel))
    }

    async fn send_one(
        &self,
        rule: &AlertRule,
        channel: &dyn Notifier,
        notification: &Notification,
    ) -> ChannelResult {
        let rule_id = rule.id.as_str();
        let name = channel.channel_name().to_string();

        let Some(recipient) = self.recipient(rule, &name) else {
            tracing::debug!(rule_id, channel = %name, "No address for owner, skipping channel");
            return ChannelResult {
                channel: name,
                outcome: ChannelOutcome::Skipped,
                duration_ms: 0,
            };
        };

        let start = Instant::now();
        let send = AssertUnwindSafe(channel.send(recipient, notification)).catch_unwind();
        let result = match tokio::time::timeout(self.send_timeout, send).await {
            Ok(Ok(result)) => result,
            Ok(Err(_panic)) => Err(NotifyError::Rejected("notifier panicked".to_string())),
            Err(_) => Err(NotifyError::Timeout(self.send_timeout)),
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(()) => {
                tracing::info!(rule_id, channel = %name, duration_ms, "Notification delivered");
                ChannelOutcome::Delivered
            }
            Err(e) => {
                tracing::warn!(
                    rule_id,
                    channel = %name,
                    error = %e,
                    duration_ms,
                    "Notification delivery failed"
                );
                ChannelOutcome::Failed(e.to_string())
            }
        };

        ChannelResult {
            channel: name,
            outcome,
            duration_ms,
        }
    }

    /// Send a test notification to `owner` on the named channel.
    pub async fn test_notify(&self, owner: &str, channel_name: &str) -> Result<(), NotifyError> {
        let channel = self
            .channels
            .iter()
            .find(|c| c.channel_name() == channel_name)
            .ok_or_else(|| NotifyError::Config(format!("Channel '{channel_name}' is not enabled")))?;

        let recipient = self.contacts.address(owner, channel_name).ok_or_else(|| {
            NotifyError::Config(format!("No {channel_name} address for '{owner}'"))
        })?;

        channel.test(recipient).await
    }
}
