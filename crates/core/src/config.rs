use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Key lookup used to build a [`Config`]. The process environment in
/// production, a map in tests.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled key: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_opt(lookup: Lookup<'_>, profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = lookup(prefixed.as_str()).filter(|s| !s.is_empty()) {
            return Some(v);
        }
    }
    lookup(key).filter(|s| !s.is_empty())
}

fn profiled_or(lookup: Lookup<'_>, profile: &str, key: &str, default: &str) -> String {
    profiled_opt(lookup, profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_duration(
    lookup: Lookup<'_>,
    profile: &str,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match profiled_opt(lookup, profile, key) {
        Some(raw) => parse_duration(&raw).ok_or(ConfigError::InvalidDuration {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

fn profiled_number<T: std::str::FromStr>(
    lookup: Lookup<'_>,
    profile: &str,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match profiled_opt(lookup, profile, key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            key: key.to_string(),
            value: raw,
        }),
        None => Ok(default),
    }
}

fn profiled_bool(
    lookup: Lookup<'_>,
    profile: &str,
    key: &str,
) -> Result<Option<bool>, ConfigError> {
    match profiled_opt(lookup, profile, key) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidBool {
                key: key.to_string(),
                value: raw,
            }),
        },
        None => Ok(None),
    }
}

/// Parse a human-readable duration string into a [`Duration`].
///
/// Supports components: `Xd` (days), `Xh` (hours), `Xm` (minutes), `Xs` (seconds).
/// Components can be combined: "2h30m", "1d12h", "90s". A bare number is
/// read as seconds. Returns `None` if the string is empty or unparseable.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    let mut total_secs: u64 = 0;
    let mut num_buf = String::new();
    let mut found_unit = false;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            num_buf.push(ch);
        } else {
            let n: u64 = num_buf.parse().ok()?;
            num_buf.clear();
            let unit = match ch {
                'd' => 86_400,
                'h' => 3_600,
                'm' => 60,
                's' => 1,
                _ => return None,
            };
            total_secs = total_secs.checked_add(n.checked_mul(unit)?)?;
            found_unit = true;
        }
    }

    if !num_buf.is_empty() {
        if found_unit {
            // Ambiguous: "30m15".
            return None;
        }
        total_secs = num_buf.parse().ok()?;
    }

    Some(Duration::from_secs(total_secs))
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub market: MarketConfig,
    pub channels: ChannelsConfig,
    pub templates: TemplateConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `PRICEWATCH_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let profile = env_opt("PRICEWATCH_PROFILE").unwrap_or_default();
        Self::from_lookup(&profile, &env_opt)
    }

    /// Build config for a named profile from an arbitrary key lookup.
    pub fn from_lookup(profile: &str, lookup: Lookup<'_>) -> Result<Self, ConfigError> {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Ok(Self {
            profile: p.to_string(),
            scheduler: SchedulerConfig::from_lookup(lookup, p)?,
            store: StoreConfig::from_lookup(lookup, p),
            market: MarketConfig::from_lookup(lookup, p),
            channels: ChannelsConfig::from_lookup(lookup, p)?,
            templates: TemplateConfig::from_lookup(lookup, p),
        })
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        let s = &self.scheduler;
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  scheduler:   tick={:?}, deadline={:?}, cooldown={:?}, workers={}",
            s.tick_interval, s.tick_deadline, s.cooldown, s.worker_concurrency
        );
        tracing::info!(
            "  timeouts:    market={:?}, notify={:?}, shutdown_grace={:?}",
            s.market_timeout, s.notify_timeout, s.shutdown_grace
        );
        tracing::info!(
            "  store:       rules={}, contacts={}",
            self.store.rules_path.display(),
            self.store.contacts_path.display()
        );
        tracing::info!("  market:      base_url={}", self.market.base_url);
        tracing::info!("  channels:    {}", self.channels.enabled().join(", "));
    }
}

// ── Scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    /// Upper bound on one tick's rule processing.
    pub tick_deadline: Duration,
    /// Minimum gap between two notifications of the same recurring rule.
    pub cooldown: Duration,
    pub worker_concurrency: usize,
    pub market_timeout: Duration,
    pub notify_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            tick_deadline: Duration::from_secs(60),
            cooldown: Duration::from_secs(3_600),
            worker_concurrency: 8,
            market_timeout: Duration::from_secs(10),
            notify_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl SchedulerConfig {
    fn from_lookup(lookup: Lookup<'_>, p: &str) -> Result<Self, ConfigError> {
        let d = Self::default();
        let tick_interval = profiled_duration(lookup, p, "TICK_INTERVAL", d.tick_interval)?;
        if tick_interval.is_zero() {
            return Err(ConfigError::Other("TICK_INTERVAL must be greater than zero".into()));
        }
        let worker_concurrency =
            profiled_number(lookup, p, "WORKER_CONCURRENCY", d.worker_concurrency)?;
        if worker_concurrency == 0 {
            return Err(ConfigError::Other("WORKER_CONCURRENCY must be at least 1".into()));
        }
        Ok(Self {
            tick_interval,
            tick_deadline: profiled_duration(lookup, p, "TICK_DEADLINE", tick_interval)?,
            cooldown: profiled_duration(lookup, p, "ALERT_COOLDOWN", d.cooldown)?,
            worker_concurrency,
            market_timeout: profiled_duration(lookup, p, "MARKET_TIMEOUT", d.market_timeout)?,
            notify_timeout: profiled_duration(lookup, p, "NOTIFY_TIMEOUT", d.notify_timeout)?,
            shutdown_grace: profiled_duration(lookup, p, "SHUTDOWN_GRACE", d.shutdown_grace)?,
        })
    }
}

// ── Store ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub rules_path: PathBuf,
    pub contacts_path: PathBuf,
}

impl StoreConfig {
    fn from_lookup(lookup: Lookup<'_>, p: &str) -> Self {
        Self {
            rules_path: PathBuf::from(profiled_or(lookup, p, "RULES_PATH", "data/rules.json")),
            contacts_path: PathBuf::from(profiled_or(
                lookup,
                p,
                "CONTACTS_PATH",
                "data/contacts.json",
            )),
        }
    }
}

// ── Market data ───────────────────────────────────────────────

pub const DEFAULT_MARKET_BASE_URL: &str = "https://query1.finance.yahoo.com/v8/finance/chart";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    pub base_url: String,
}

impl MarketConfig {
    fn from_lookup(lookup: Lookup<'_>, p: &str) -> Self {
        Self {
            base_url: profiled_or(lookup, p, "MARKET_BASE_URL", DEFAULT_MARKET_BASE_URL),
        }
    }
}

// ── Notification channels ─────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    pub telegram: Option<TelegramConfig>,
    pub whatsapp: Option<TwilioConfig>,
    pub email: Option<SmtpConfig>,
    pub webhook: Option<WebhookConfig>,
}

impl ChannelsConfig {
    fn from_lookup(lookup: Lookup<'_>, p: &str) -> Result<Self, ConfigError> {
        let telegram = profiled_opt(lookup, p, "TELEGRAM_BOT_TOKEN")
            .map(|bot_token| TelegramConfig { bot_token });

        let whatsapp = match (
            profiled_opt(lookup, p, "TWILIO_ACCOUNT_SID"),
            profiled_opt(lookup, p, "TWILIO_AUTH_TOKEN"),
            profiled_opt(lookup, p, "TWILIO_WHATSAPP_FROM"),
        ) {
            (Some(account_sid), Some(auth_token), Some(from)) => Some(TwilioConfig {
                account_sid,
                auth_token,
                from,
            }),
            _ => None,
        };

        let email = match (
            profiled_opt(lookup, p, "SMTP_HOST"),
            profiled_opt(lookup, p, "SMTP_FROM"),
        ) {
            (Some(host), Some(from)) => Some(SmtpConfig {
                host,
                port: match profiled_opt(lookup, p, "SMTP_PORT") {
                    Some(_) => Some(profiled_number(lookup, p, "SMTP_PORT", 587u16)?),
                    None => None,
                },
                tls: profiled_bool(lookup, p, "SMTP_TLS")?,
                from,
                username: profiled_opt(lookup, p, "SMTP_USERNAME"),
                password: profiled_opt(lookup, p, "SMTP_PASSWORD"),
            }),
            _ => None,
        };

        let webhook = match profiled_opt(lookup, p, "WEBHOOK_URL") {
            Some(url) => Some(WebhookConfig {
                url,
                method: profiled_opt(lookup, p, "WEBHOOK_METHOD"),
                headers: match profiled_opt(lookup, p, "WEBHOOK_HEADERS") {
                    Some(raw) => parse_headers("WEBHOOK_HEADERS", &raw)?,
                    None => BTreeMap::new(),
                },
            }),
            None => None,
        };

        Ok(Self {
            telegram,
            whatsapp,
            email,
            webhook,
        })
    }

    /// Names of the channels that have enough configuration to be built.
    pub fn enabled(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.telegram.is_some() {
            names.push("telegram");
        }
        if self.whatsapp.is_some() {
            names.push("whatsapp");
        }
        if self.email.is_some() {
            names.push("email");
        }
        if self.webhook.is_some() {
            names.push("webhook");
        }
        names
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number in E.164 form, without the `whatsapp:` prefix.
    pub from: String,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: Option<u16>,
    pub tls: Option<bool>,
    pub from: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// HTTP method; the notifier defaults to `POST`.
    pub method: Option<String>,
    /// Extra request headers. Values may hold `${VAR}` references.
    pub headers: BTreeMap<String, String>,
}

/// Parse `Name: value, Name2: value2` into a header map.
fn parse_headers(key: &str, raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut headers = BTreeMap::new();
    for pair in raw.split(',').filter(|p| !p.trim().is_empty()) {
        let (name, value) = pair
            .split_once(':')
            .filter(|(name, _)| !name.trim().is_empty())
            .ok_or_else(|| ConfigError::Other(format!("Invalid header in {key}: {pair:?}")))?;
        headers.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(headers)
}

// Secrets stay out of Debug output so config can be logged freely.

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig").field("bot_token", &"***").finish()
    }
}

impl std::fmt::Debug for TwilioConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioConfig")
            .field("account_sid", &self.account_sid)
            .field("auth_token", &"***")
            .field("from", &self.from)
            .finish()
    }
}

impl std::fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("url", &self.url)
            .field("method", &self.method)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("tls", &self.tls)
            .field("from", &self.from)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

// ── Templates ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub subject: Option<String>,
    pub body: Option<String>,
}

impl TemplateConfig {
    fn from_lookup(lookup: Lookup<'_>, p: &str) -> Self {
        Self {
            subject: profiled_opt(lookup, p, "ALERT_SUBJECT_TEMPLATE"),
            body: profiled_opt(lookup, p, "ALERT_BODY_TEMPLATE"),
        }
    }
}
