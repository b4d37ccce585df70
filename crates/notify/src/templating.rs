//! Minijinja template rendering for alert messages.
//!
//! Renders notification subject and body templates using minijinja,
//! with access to the rule, the crossed bound and the market snapshot.
//!
//! Templates are arbitrary strings (not pre-registered), so a fresh
//! [`minijinja::Environment`] is created per render call.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use pricewatch_core::{AlertRule, Direction, MarketSnapshot};

use crate::traits::{Notification, NotifyError};

/// Default subject line.
pub const DEFAULT_SUBJECT_TEMPLATE: &str = "Price alert: {{ rule.symbol }}";

/// Default message body, e.g. `AAPL dropped below $150.00 (price: 149.20)`.
pub const DEFAULT_BODY_TEMPLATE: &str = "{{ rule.symbol }} \
{% if direction == \"floor\" %}dropped below{% else %}broke above{% endif %} \
${{ bound | round(2) }} (price: {{ quote.price | round(2) }})";

/// Context data available to notification templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TemplateContext {
    pub rule: RuleContext,
    pub quote: QuoteContext,
    /// `"floor"` or `"ceiling"`.
    pub direction: String,
    /// The bound that was crossed.
    pub bound: f64,
    /// Render time in RFC 3339.
    pub now: String,
}

/// Rule fields exposed to templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RuleContext {
    pub id: String,
    pub owner: String,
    pub symbol: String,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub min_volume: Option<f64>,
    pub recurring: bool,
}

/// Market snapshot fields exposed to templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QuoteContext {
    pub price: f64,
    pub volume: f64,
    pub observed_at: String,
}

impl TemplateContext {
    pub fn new(
        rule: &AlertRule,
        direction: Direction,
        snap: &MarketSnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        let bound = match direction {
            Direction::Floor => rule.min_price,
            Direction::Ceiling => rule.max_price,
        }
        .unwrap_or(snap.price);

        Self {
            rule: RuleContext {
                id: rule.id.clone(),
                owner: rule.owner.clone(),
                symbol: rule.symbol.clone(),
                min_price: rule.min_price,
                max_price: rule.max_price,
                min_volume: rule.min_volume,
                recurring: rule.recurring,
            },
            quote: QuoteContext {
                price: snap.price,
                volume: snap.volume,
                observed_at: snap.observed_at.to_rfc3339(),
            },
            direction: direction.as_str().to_string(),
            bound,
            now: now.to_rfc3339(),
        }
    }

    fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            ("rule_id".to_string(), self.rule.id.clone()),
            ("owner".to_string(), self.rule.owner.clone()),
            ("symbol".to_string(), self.rule.symbol.clone()),
            ("direction".to_string(), self.direction.clone()),
            ("bound".to_string(), self.bound.to_string()),
            ("price".to_string(), self.quote.price.to_string()),
        ])
    }
}

/// Renders notification templates using minijinja.
#[derive(Debug, Default)]
pub struct TemplateRenderer {
    _private: (),
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Build a configured minijinja environment with custom filters and globals.
    fn build_env() -> minijinja::Environment<'static> {
        let mut env = minijinja::Environment::new();

        env.add_filter("round", round_filter);
        env.add_filter("lower", lower_filter);
        env.add_filter("upper", upper_filter);
        env.add_function("env", env_function);

        env
    }

    /// Render a template string with the given context.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Template`] if the template is invalid or
    /// rendering fails.
    pub fn render(&self, template_str: &str, ctx: &TemplateContext) -> Result<String, NotifyError> {
        let env = Self::build_env();
        env.render_str(template_str, ctx)
            .map_err(|e| NotifyError::Template(e.to_string()))
    }

    /// Check that a template string parses, without evaluating it.
    pub fn validate(&self, template_str: &str) -> Result<(), NotifyError> {
        let env = Self::build_env();
        env.template_from_str(template_str)
            .map_err(|e| NotifyError::Template(e.to_string()))?;
        Ok(())
    }
}

/// Subject and body templates used to build a [`Notification`].
#[derive(Debug)]
pub struct MessageTemplates {
    subject: String,
    body: String,
    renderer: TemplateRenderer,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            subject: DEFAULT_SUBJECT_TEMPLATE.to_string(),
            body: DEFAULT_BODY_TEMPLATE.to_string(),
            renderer: TemplateRenderer::new(),
        }
    }
}

impl MessageTemplates {
    /// Use custom templates; `None` keeps the default. Both are validated
    /// up front so a typo fails at startup instead of on the first alert.
    pub fn new(subject: Option<&str>, body: Option<&str>) -> Result<Self, NotifyError> {
        let mut templates = Self::default();
        if let Some(subject) = subject {
            templates.renderer.validate(subject)?;
            templates.subject = subject.to_string();
        }
        if let Some(body) = body {
            templates.renderer.validate(body)?;
            templates.body = body.to_string();
        }
        Ok(templates)
    }

    /// Render a notification, falling back to the built-in wording when a
    /// custom template fails at render time.
    pub fn render(&self, ctx: &TemplateContext) -> Notification {
        let subject = self
            .renderer
            .render(&self.subject, ctx)
            .unwrap_or_else(|e| {
                tracing::warn!(rule_id = %ctx.rule.id, error = %e, "Subject template failed, using default");
                fallback_subject(ctx)
            });
        let body = self.renderer.render(&self.body, ctx).unwrap_or_else(|e| {
            tracing::warn!(rule_id = %ctx.rule.id, error = %e, "Body template failed, using default");
            fallback_body(ctx)
        });

        Notification {
            subject,
            body,
            metadata: ctx.metadata(),
        }
    }
}

fn fallback_subject(ctx: &TemplateContext) -> String {
    format!("Price alert: {}", ctx.rule.symbol)
}

fn fallback_body(ctx: &TemplateContext) -> String {
    let verb = if ctx.direction == Direction::Floor.as_str() {
        "dropped below"
    } else {
        "broke above"
    };
    format!(
        "{} {verb} ${:.2} (price: {:.2})",
        ctx.rule.symbol, ctx.bound, ctx.quote.price
    )
}

/// Custom filter: round a float to N decimal places.
fn round_filter(value: f64, decimals: Option<u32>) -> String {
    let n = decimals.unwrap_or(0);
    format!("{:.prec$}", value, prec = n as usize)
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

/// Global function: read an environment variable by name.
///
/// Returns an empty string (and logs a warning) if the variable is unset.
fn env_function(name: String) -> String {
    match std::env::var(&name) {
        Ok(val) => val,
        Err(_) => {
            tracing::warn!(var = %name, "Environment variable not found, returning empty string");
            String::new()
        }
    }
}
