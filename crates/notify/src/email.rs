//! SMTP email notifier via `lettre` with TLS support.
//!
//! Delivers notifications as emails through an SMTP server.
//! Supports STARTTLS and implicit TLS connections.

use crate::traits::{Notification, Notifier, NotifyError};
use lettre::{
    message::Mailbox, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};

/// SMTP connection settings for [`EmailNotifier::from_config`].
#[derive(Debug, Clone, Default)]
pub struct SmtpSettings<'a> {
    pub host: &'a str,
    /// Defaults to 587.
    pub port: Option<u16>,
    /// `None` or `Some(true)` enables STARTTLS. Port 465 always uses
    /// implicit TLS regardless of this flag.
    pub tls: Option<bool>,
    /// Sender address, e.g. `"alerts@example.com"` or `"Alerts <alerts@example.com>"`.
    pub from: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
}

/// Sends notifications as emails via SMTP.
#[derive(Debug)]
pub struct EmailNotifier {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl EmailNotifier {
    /// Build an `EmailNotifier` from SMTP settings.
    ///
    /// Credentials are attached only when both username and password are
    /// given; otherwise the connection is unauthenticated.
    pub fn from_config(settings: &SmtpSettings<'_>) -> Result<Self, NotifyError> {
        let from_mailbox: Mailbox = settings
            .from
            .parse()
            .map_err(|e: lettre::address::AddressError| NotifyError::Config(e.to_string()))?;

        let port = settings.port.unwrap_or(587);
        let use_tls = settings.tls.unwrap_or(true);

        let mut builder = if port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(settings.host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(port)
        } else if use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(settings.host)
                .map_err(|e| NotifyError::Config(e.to_string()))?
                .port(port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(settings.host).port(port)
        };

        if let (Some(username), Some(password)) = (settings.username, settings.password) {
            builder = builder.credentials(Credentials::new(username.to_string(), password.to_string()));
        }

        Ok(Self {
            transport: builder.build(),
            from: from_mailbox,
        })
    }

    fn build_message(&self, recipient: &str, notification: &Notification) -> Result<Message, NotifyError> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e: lettre::address::AddressError| {
                NotifyError::Config(format!("invalid recipient {recipient:?}: {e}"))
            })?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&notification.subject)
            .body(notification.body.clone())
            .map_err(|e| NotifyError::Smtp(e.to_string()))
    }
}

#[async_trait::async_trait]
impl Notifier for EmailNotifier {
    async fn send(&self, recipient: &str, notification: &Notification) -> Result<(), NotifyError> {
        let email = self.build_message(recipient, notification)?;

        self.transport
            .send(email)
            .await
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        tracing::debug!(
            channel = "email",
            subject = %notification.subject,
            "email accepted by relay"
        );

        Ok(())
    }

    fn channel_name(&self) -> &str {
        "email"
    }
}
