//! [`RuleStore`] wrapper that lists from the inner store and discards writes.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use pricewatch_core::AlertRule;

use super::error::Result;
use super::{RuleStore, StateUpdate};

/// Read-through, write-nothing view of another store, for dry runs.
///
/// Updates are logged and acknowledged without touching the inner store, so
/// rules keep their status and cooldown between dry-run ticks.
pub struct ReadOnlyRuleStore {
    inner: Arc<dyn RuleStore>,
}

impl ReadOnlyRuleStore {
    pub fn new(inner: Arc<dyn RuleStore>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl RuleStore for ReadOnlyRuleStore {
    async fn list_active_rules(&self) -> Result<Vec<AlertRule>> {
        self.inner.list_active_rules().await
    }

    async fn update_rule_state(&self, update: &StateUpdate) -> Result<()> {
        info!(
            rule_id = %update.rule_id,
            status = %update.status,
            last_notified_at = %update.last_notified_at,
            "Read-only store, state update discarded"
        );
        Ok(())
    }
}
