//! alert-worker: evaluates price alert rules on a fixed interval and notifies
//! rule owners over the enabled channels.
//!
//! Configuration comes from the environment (and `.env`); the flags below
//! override the file locations and select one-shot or dry-run modes.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::Notify;
use tracing::{info, warn};

use pricewatch_core::config::{self, ChannelsConfig, Config};
use pricewatch_market::YahooChartProvider;
use pricewatch_notify::dry_run::DryRunNotifier;
use pricewatch_notify::email::{EmailNotifier, SmtpSettings};
use pricewatch_notify::telegram::TelegramNotifier;
use pricewatch_notify::templating::MessageTemplates;
use pricewatch_notify::webhook::WebhookNotifier;
use pricewatch_notify::whatsapp::WhatsAppNotifier;
use pricewatch_notify::{ContactBook, Dispatcher, Notifier};
use pricewatch_rules::store::{JsonFileRuleStore, ReadOnlyRuleStore};
use pricewatch_rules::RuleStore;
use pricewatch_scheduler::AlertScheduler;

// ── CLI ─────────────────────────────────────────────────────────────

/// Price alert worker.
#[derive(Parser, Debug)]
#[command(name = "alert-worker", version, about)]
struct Cli {
    /// Rules file (overrides RULES_PATH).
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Contact book file (overrides CONTACTS_PATH).
    #[arg(long)]
    contacts: Option<PathBuf>,

    /// Run a single tick and exit.
    #[arg(long)]
    once: bool,

    /// Log notifications instead of sending them. Rule state is not written.
    #[arg(long, env = "ALERT_DRY_RUN")]
    dry_run: bool,
}

// ── Channels ────────────────────────────────────────────────────────

fn build_channels(cfg: &ChannelsConfig, dry_run: bool) -> anyhow::Result<Vec<Arc<dyn Notifier>>> {
    let mut channels: Vec<Arc<dyn Notifier>> = Vec::new();

    if dry_run {
        for name in cfg.enabled() {
            channels.push(Arc::new(DryRunNotifier::new(name)));
        }
        return Ok(channels);
    }

    if let Some(tg) = &cfg.telegram {
        channels.push(Arc::new(TelegramNotifier::from_config(&tg.bot_token, None)?));
    }
    if let Some(tw) = &cfg.whatsapp {
        channels.push(Arc::new(WhatsAppNotifier::from_config(
            &tw.account_sid,
            &tw.auth_token,
            &tw.from,
        )?));
    }
    if let Some(smtp) = &cfg.email {
        channels.push(Arc::new(EmailNotifier::from_config(&SmtpSettings {
            host: &smtp.host,
            port: smtp.port,
            tls: smtp.tls,
            from: &smtp.from,
            username: smtp.username.as_deref(),
            password: smtp.password.as_deref(),
        })?));
    }
    if let Some(hook) = &cfg.webhook {
        let headers = hook
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        channels.push(Arc::new(WebhookNotifier::from_config(
            &hook.url,
            hook.method.as_deref(),
            Some(headers),
        )?));
    }

    Ok(channels)
}

// ── Signals ─────────────────────────────────────────────────────────

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C elsewhere.
async fn os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "failed to register signal handlers, falling back to ctrl_c");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl_c");
        std::future::pending::<()>().await;
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    config::load_dotenv();
    let cli = Cli::parse();
    let config = Config::from_env()?;
    config.log_summary();

    let rules_path = cli.rules.unwrap_or_else(|| config.store.rules_path.clone());
    let contacts_path = cli.contacts.unwrap_or_else(|| config.store.contacts_path.clone());

    let mut store: Arc<dyn RuleStore> = Arc::new(JsonFileRuleStore::new(rules_path.clone()));
    if cli.dry_run {
        store = Arc::new(ReadOnlyRuleStore::new(store));
    }
    let market = Arc::new(YahooChartProvider::new(&config.market.base_url)?);
    let contacts = ContactBook::load(&contacts_path).await?;

    let channels = build_channels(&config.channels, cli.dry_run)?;
    if channels.is_empty() {
        warn!("No notification channels enabled; triggered alerts cannot be delivered");
    }

    let templates = MessageTemplates::new(
        config.templates.subject.as_deref(),
        config.templates.body.as_deref(),
    )?;
    let dispatcher = Dispatcher::new(channels, contacts)
        .with_templates(templates)
        .with_send_timeout(config.scheduler.notify_timeout);

    info!(
        rules = %rules_path.display(),
        channels = ?dispatcher.channel_names(),
        dry_run = cli.dry_run,
        "alert-worker starting"
    );

    let scheduler = AlertScheduler::new(store, market, Arc::new(dispatcher), config.scheduler.clone());

    if cli.once {
        let summary = scheduler.tick().await?;
        info!(
            listed = summary.listed,
            delivered = summary.delivered(),
            aborted = summary.aborted.len(),
            "single tick finished"
        );
        return Ok(());
    }

    let shutdown = Arc::new(Notify::new());
    let signal_shutdown = shutdown.clone();
    let signal_handle = tokio::spawn(async move {
        os_signal().await;
        info!("shutdown signal received");
        signal_shutdown.notify_one();
    });

    scheduler.run(shutdown).await;
    signal_handle.abort();

    info!("alert-worker exited cleanly");
    Ok(())
}
