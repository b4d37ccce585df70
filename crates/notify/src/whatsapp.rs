//! WhatsApp notifier through the Twilio Messages API.
//!
//! Posts a form-encoded message to
//! `{api_base}/2010-04-01/Accounts/{sid}/Messages.json` with HTTP basic auth.
//! Recipients are phone numbers in E.164 form; the `whatsapp:` prefix is
//! added when missing.

use crate::env::resolve_env_vars;
use crate::traits::{Notification, Notifier, NotifyError};

const API_BASE: &str = "https://api.twilio.com";

/// Sends WhatsApp messages via Twilio.
#[derive(Debug)]
pub struct WhatsAppNotifier {
    account_sid: String,
    auth_token: String,
    from: String,
    api_base: String,
    client: reqwest::Client,
}

fn whatsapp_address(number: &str) -> String {
    let number = number.trim();
    if number.starts_with("whatsapp:") {
        number.to_string()
    } else {
        format!("whatsapp:{number}")
    }
}

impl WhatsAppNotifier {
    /// Build a notifier from Twilio credentials. `${VAR}` references are
    /// resolved from the environment.
    pub fn from_config(account_sid: &str, auth_token: &str, from: &str) -> Result<Self, NotifyError> {
        let account_sid = resolve_env_vars(account_sid)?;
        let auth_token = resolve_env_vars(auth_token)?;
        let from = resolve_env_vars(from)?;

        for (name, value) in [
            ("account SID", &account_sid),
            ("auth token", &auth_token),
            ("sender number", &from),
        ] {
            if value.trim().is_empty() {
                return Err(NotifyError::Config(format!(
                    "Twilio {name} must not be empty"
                )));
            }
        }

        Ok(Self {
            account_sid,
            auth_token,
            from: whatsapp_address(&from),
            api_base: API_BASE.to_string(),
            client: reqwest::Client::new(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.account_sid
        )
    }

    fn form(&self, recipient: &str, notification: &Notification) -> [(&'static str, String); 3] {
        [
            ("From", self.from.clone()),
            ("To", whatsapp_address(recipient)),
            ("Body", notification.body.clone()),
        ]
    }
}

#[async_trait::async_trait]
impl Notifier for WhatsAppNotifier {
    async fn send(&self, recipient: &str, notification: &Notification) -> Result<(), NotifyError> {
        tracing::debug!(to = %recipient, "Sending WhatsApp notification");

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&self.form(recipient, notification))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(to = %recipient, "WhatsApp notification queued");
            return Ok(());
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(NotifyError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        // Twilio errors look like {"code": 21211, "message": "...", "status": 400}.
        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let message = body
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown Twilio API error");
        let code = body.get("code").and_then(|v| v.as_u64());

        Err(NotifyError::Rejected(match code {
            Some(code) => format!("Twilio error {code} (HTTP {status}): {message}"),
            None => format!("Twilio HTTP {status}: {message}"),
        }))
    }

    fn channel_name(&self) -> &str {
        "whatsapp"
    }
}
