//! In-process [`RuleStore`] backed by a map.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use pricewatch_core::AlertRule;

use super::error::{Result, StoreError};
use super::{apply_update, RuleStore, StateUpdate};

/// Thread-safe in-memory rule store. Clones share the same rules.
#[derive(Clone, Default)]
pub struct MemoryRuleStore {
    rules: Arc<RwLock<HashMap<String, AlertRule>>>,
}

impl MemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: impl IntoIterator<Item = AlertRule>) -> Self {
        let store = Self::new();
        for rule in rules {
            store.insert(rule);
        }
        store
    }

    /// Insert or replace a rule (the CRUD side, outside the scheduler).
    pub fn insert(&self, rule: AlertRule) {
        let mut guard = self.rules.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(rule.id.clone(), rule);
    }

    pub fn get(&self, rule_id: &str) -> Option<AlertRule> {
        let guard = self.rules.read().unwrap_or_else(|e| e.into_inner());
        guard.get(rule_id).cloned()
    }

    /// Every rule regardless of status, sorted by id.
    pub fn all(&self) -> Vec<AlertRule> {
        let guard = self.rules.read().unwrap_or_else(|e| e.into_inner());
        let mut rules: Vec<AlertRule> = guard.values().cloned().collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }
}

#[async_trait]
impl RuleStore for MemoryRuleStore {
    async fn list_active_rules(&self) -> Result<Vec<AlertRule>> {
        Ok(self.all().into_iter().filter(AlertRule::is_active).collect())
    }

    async fn update_rule_state(&self, update: &StateUpdate) -> Result<()> {
        let mut guard = self.rules.write().unwrap_or_else(|e| e.into_inner());
        let stored = guard
            .get_mut(&update.rule_id)
            .ok_or_else(|| StoreError::NotFound(update.rule_id.clone()))?;

        // Apply to a copy so a rejected update leaves the row untouched.
        let mut next = stored.clone();
        apply_update(&mut next, update)?;
        *stored = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use pricewatch_core::RuleStatus;

    use super::*;

    #[tokio::test]
    async fn lists_only_active_rules() {
        let mut archived = AlertRule::new("b", "o", "TSLA").with_max_price(1.0);
        archived.status = RuleStatus::Archived;
        let store = MemoryRuleStore::with_rules([
            AlertRule::new("a", "o", "AAPL").with_max_price(1.0),
            archived,
        ]);

        let active = store.list_active_rules().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a");
    }

    #[tokio::test]
    async fn update_is_partial_and_versioned() {
        let store = MemoryRuleStore::with_rules([AlertRule::new("a", "o", "AAPL").with_max_price(1.0)]);
        let now = Utc::now();
        store
            .update_rule_state(&StateUpdate {
                rule_id: "a".into(),
                expected_version: 0,
                last_notified_at: now,
                status: RuleStatus::Archived,
            })
            .await
            .unwrap();

        let rule = store.get("a").unwrap();
        assert_eq!(rule.status, RuleStatus::Archived);
        assert_eq!(rule.last_notified_at, Some(now));
        assert_eq!(rule.max_price, Some(1.0));
        assert_eq!(rule.version, 1);
        assert!(store.list_active_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_edit_causes_conflict() {
        let store = MemoryRuleStore::with_rules([AlertRule::new("a", "o", "AAPL").with_max_price(1.0)]);
        let read = store.list_active_rules().await.unwrap().remove(0);

        // The CRUD side edits the row after the scheduler read it.
        let mut edited = read.clone().with_max_price(2.0);
        edited.version += 1;
        store.insert(edited);

        let err = store
            .update_rule_state(&StateUpdate {
                rule_id: "a".into(),
                expected_version: read.version,
                last_notified_at: Utc::now(),
                status: RuleStatus::Active,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.get("a").unwrap().max_price, Some(2.0));
    }

    #[tokio::test]
    async fn unknown_rule_is_not_found() {
        let store = MemoryRuleStore::new();
        let err = store
            .update_rule_state(&StateUpdate {
                rule_id: "ghost".into(),
                expected_version: 0,
                last_notified_at: Utc::now(),
                status: RuleStatus::Active,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(id) if id == "ghost"));
    }
}
