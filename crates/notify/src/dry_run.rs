//! Notifier that logs instead of sending, for `--dry-run`.

use crate::traits::{Notification, Notifier, NotifyError};

/// Stands in for a real channel and reports every send as delivered.
///
/// Since every send succeeds, a dry run must not persist rule state; the
/// worker runs it against a read-only rule store.
#[derive(Debug, Clone)]
pub struct DryRunNotifier {
    channel: String,
}

impl DryRunNotifier {
    /// `channel` is the name of the channel being replaced, so contact book
    /// lookups behave exactly as they would for the real notifier.
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
        }
    }
}

#[async_trait::async_trait]
impl Notifier for DryRunNotifier {
    async fn send(&self, recipient: &str, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            channel = %self.channel,
            %recipient,
            subject = %notification.subject,
            body = %notification.body,
            "[dry-run] notification not sent"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        &self.channel
    }
}
