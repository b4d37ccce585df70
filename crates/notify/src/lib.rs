//! Notification delivery for triggered price alerts.
//!
//! This crate provides:
//! - `Notifier` trait for pluggable notification channels
//! - Telegram, WhatsApp (Twilio), email and webhook notifier implementations
//! - `ContactBook` mapping rule owners to per-channel addresses
//! - Minijinja template rendering for alert messages
//! - Dispatcher that fans a notification out to every channel configured
//!   for the rule's owner

pub mod contacts;
pub mod dispatcher;
pub mod dry_run;
pub mod email;
mod env;
pub mod telegram;
pub mod templating;
pub mod traits;
pub mod webhook;
pub mod whatsapp;

pub use contacts::ContactBook;
pub use dispatcher::Dispatcher;
pub use traits::{ChannelOutcome, ChannelResult, DispatchResult, Notification, Notifier, NotifyError};
