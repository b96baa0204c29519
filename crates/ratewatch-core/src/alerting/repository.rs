//! Alert rule storage

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{AlertRule, NewAlertRule};

/// Keyed store of alert rules
///
/// The scheduler only ever calls [`RuleStore::list`], once per tick.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Snapshot of every stored rule, in creation order
    async fn list(&self) -> Result<Vec<AlertRule>>;

    /// Store a validated rule and return it with its id
    async fn create(&self, rule: NewAlertRule) -> Result<AlertRule>;

    /// Whether a rule with the same condition and recipient already exists
    async fn exists_duplicate(&self, candidate: &NewAlertRule) -> Result<bool>;
}

/// Process-local rule store
#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: RwLock<Vec<AlertRule>>,
}

impl InMemoryRuleStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with rules
    pub fn with_rules(rules: Vec<AlertRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn list(&self) -> Result<Vec<AlertRule>> {
        Ok(self.rules.read().clone())
    }

    async fn create(&self, rule: NewAlertRule) -> Result<AlertRule> {
        let rule = AlertRule {
            id: Uuid::new_v4(),
            series_key: rule.series_key,
            threshold: rule.threshold,
            recipient: rule.recipient,
            direction: rule.direction,
            created_at: Utc::now(),
        };

        self.rules.write().push(rule.clone());
        Ok(rule)
    }

    async fn exists_duplicate(&self, candidate: &NewAlertRule) -> Result<bool> {
        Ok(self.rules.read().iter().any(|r| candidate.same_as(r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CurrencyCode, Direction};

    fn candidate(threshold: &str) -> NewAlertRule {
        NewAlertRule {
            series_key: CurrencyCode::parse("CHF").unwrap(),
            threshold: threshold.parse().unwrap(),
            recipient: "a@example.com".to_string(),
            direction: Direction::Below,
        }
    }

    #[tokio::test]
    async fn create_assigns_ids_and_preserves_order() {
        let store = InMemoryRuleStore::new();
        let first = store.create(candidate("4.4")).await.unwrap();
        let second = store.create(candidate("4.5")).await.unwrap();

        assert_ne!(first.id, second.id);
        let listed = store.list().await.unwrap();
        assert_eq!(listed, vec![first, second]);
    }

    #[tokio::test]
    async fn duplicate_detection_compares_all_fields() {
        let store = InMemoryRuleStore::new();
        store.create(candidate("4.4")).await.unwrap();

        assert!(store.exists_duplicate(&candidate("4.40")).await.unwrap());
        assert!(!store.exists_duplicate(&candidate("4.41")).await.unwrap());

        let mut other_direction = candidate("4.4");
        other_direction.direction = Direction::Above;
        assert!(!store.exists_duplicate(&other_direction).await.unwrap());
    }

    #[tokio::test]
    async fn list_is_a_snapshot() {
        let store = InMemoryRuleStore::new();
        store.create(candidate("4.4")).await.unwrap();

        let snapshot = store.list().await.unwrap();
        store.create(candidate("4.5")).await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.list().await.unwrap().len(), 2);
    }
}
