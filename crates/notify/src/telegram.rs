//! Telegram Bot API notifier with Markdown formatting.
//!
//! Delivers notifications via the Telegram Bot API `sendMessage` endpoint.
//! The recipient is the chat id. Supports MarkdownV2 formatting and rate
//! limit handling.

use crate::env::resolve_env_vars;
use crate::traits::{Notification, Notifier, NotifyError};

const API_BASE: &str = "https://api.telegram.org";

/// Escapes special characters for Telegram MarkdownV2 parse mode.
///
/// Telegram requires these characters to be escaped with a preceding backslash
/// when using MarkdownV2: `_`, `*`, `[`, `]`, `(`, `)`, `~`, `` ` ``, `>`,
/// `#`, `+`, `-`, `=`, `|`, `{`, `}`, `.`, `!`
pub fn escape_markdown_v2(text: &str) -> String {
    let special = ['_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!'];
    let mut result = String::with_capacity(text.len() * 2);
    for ch in text.chars() {
        if special.contains(&ch) {
            result.push('\\');
        }
        result.push(ch);
    }
    result
}

/// Sends notifications via the Telegram Bot API.
#[derive(Debug)]
pub struct TelegramNotifier {
    bot_token: String,
    parse_mode: Option<String>,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    /// Creates a new `TelegramNotifier`.
    ///
    /// `${VAR}` references in `bot_token` are resolved from the environment.
    /// Returns [`NotifyError::Config`] if the token is empty or a referenced
    /// variable is missing.
    pub fn from_config(bot_token: &str, parse_mode: Option<String>) -> Result<Self, NotifyError> {
        let resolved_token = resolve_env_vars(bot_token)?;
        if resolved_token.trim().is_empty() {
            return Err(NotifyError::Config(
                "Telegram bot token must not be empty".to_string(),
            ));
        }

        Ok(Self {
            bot_token: resolved_token,
            parse_mode,
            api_base: API_BASE.to_string(),
            client: reqwest::Client::new(),
        })
    }

    /// Point the notifier at a different Bot API host (a local Bot API server).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn message_body(&self, chat_id: &str, notification: &Notification) -> serde_json::Value {
        let text = match self.parse_mode.as_deref() {
            Some("MarkdownV2") => escape_markdown_v2(&notification.body),
            _ => notification.body.clone(),
        };

        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(ref mode) = self.parse_mode {
            body["parse_mode"] = serde_json::Value::String(mode.clone());
        }
        body
    }
}

#[async_trait::async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, recipient: &str, notification: &Notification) -> Result<(), NotifyError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let body = self.message_body(recipient, notification);

        tracing::debug!(
            chat_id = %recipient,
            parse_mode = ?self.parse_mode,
            "Sending Telegram notification"
        );

        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        let resp_body: serde_json::Value = response.json().await?;

        if resp_body.get("ok") == Some(&serde_json::Value::Bool(true)) {
            tracing::debug!(chat_id = %recipient, "Telegram notification sent");
            return Ok(());
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp_body
                .get("parameters")
                .and_then(|p| p.get("retry_after"))
                .and_then(|v| v.as_u64())
                .unwrap_or(30);
            return Err(NotifyError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        let description = resp_body
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown Telegram API error");

        Err(NotifyError::Rejected(format!(
            "Telegram API error: {description}"
        )))
    }

    fn channel_name(&self) -> &str {
        "telegram"
    }
}
