//! Generic HTTP webhook notifier.
//!
//! Delivers notifications as JSON payloads to a configured webhook URL
//! with optional custom headers.

use std::collections::HashMap;

use crate::env::resolve_env_vars;
use crate::traits::{Notification, Notifier, NotifyError};

/// JSON body posted to the webhook.
#[derive(Debug, serde::Serialize)]
struct WebhookPayload<'a> {
    recipient: &'a str,
    subject: &'a str,
    body: &'a str,
    metadata: &'a HashMap<String, String>,
}

/// Delivers notifications as JSON over HTTP to a configured endpoint.
///
/// Environment variable references (`${VAR_NAME}`) in the URL and header
/// values are resolved at construction time.
#[derive(Debug)]
pub struct WebhookNotifier {
    url: String,
    method: reqwest::Method,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    /// Create a new webhook notifier. `method` defaults to `POST`.
    pub fn new(
        url: &str,
        method: Option<reqwest::Method>,
        headers: HashMap<String, String>,
    ) -> Result<Self, NotifyError> {
        let resolved_url = resolve_env_vars(url)?;
        if resolved_url.trim().is_empty() {
            return Err(NotifyError::Config("webhook URL must not be empty".to_string()));
        }

        let mut resolved_headers = HashMap::with_capacity(headers.len());
        for (key, value) in &headers {
            resolved_headers.insert(key.clone(), resolve_env_vars(value)?);
        }

        Ok(Self {
            url: resolved_url,
            method: method.unwrap_or(reqwest::Method::POST),
            headers: resolved_headers,
            client: reqwest::Client::new(),
        })
    }

    /// Construct a [`WebhookNotifier`] with the method given as a string
    /// (e.g. `"POST"`, `"put"`).
    pub fn from_config(
        url: &str,
        method: Option<&str>,
        headers: Option<HashMap<String, String>>,
    ) -> Result<Self, NotifyError> {
        let parsed_method = match method {
            Some(m) => Some(
                m.to_uppercase()
                    .parse::<reqwest::Method>()
                    .map_err(|_| NotifyError::Config(format!("invalid HTTP method: {m}")))?,
            ),
            None => None,
        };

        Self::new(url, parsed_method, headers.unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, recipient: &str, notification: &Notification) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            recipient,
            subject: &notification.subject,
            body: &notification.body,
            metadata: &notification.metadata,
        };

        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .json(&payload);

        for (key, value) in &self.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            tracing::warn!(
                url = %self.url,
                %status,
                body = %body_text,
                "webhook returned non-2xx status"
            );
            return Err(NotifyError::Rejected(format!(
                "webhook returned {status}: {body_text}"
            )));
        }

        tracing::debug!(
            url = %self.url,
            method = %self.method,
            status = %status,
            "webhook notification delivered"
        );

        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}
