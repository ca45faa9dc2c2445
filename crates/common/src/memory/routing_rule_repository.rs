use crate::domain::{sort_rules_for_evaluation, DomainResult, RoutingRule, RoutingRuleRepository};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory implementation of `RoutingRuleRepository`.
pub struct InMemoryRoutingRuleRepository {
    rules: RwLock<HashMap<String, RoutingRule>>,
}

impl InMemoryRoutingRuleRepository {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_rules(rules: impl IntoIterator<Item = RoutingRule>) -> Self {
        Self {
            rules: RwLock::new(
                rules
                    .into_iter()
                    .map(|rule| (rule.rule_id.clone(), rule))
                    .collect(),
            ),
        }
    }
}

impl Default for InMemoryRoutingRuleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoutingRuleRepository for InMemoryRoutingRuleRepository {
    async fn list_rules(&self) -> DomainResult<Vec<RoutingRule>> {
        let mut rules: Vec<RoutingRule> = self.rules.read().await.values().cloned().collect();
        sort_rules_for_evaluation(&mut rules);
        Ok(rules)
    }

    async fn list_enabled_rules(&self) -> DomainResult<Vec<RoutingRule>> {
        let mut rules = self.list_rules().await?;
        rules.retain(|rule| rule.enabled);
        Ok(rules)
    }

    async fn upsert_rule(&self, rule: &RoutingRule) -> DomainResult<()> {
        let mut rules = self.rules.write().await;
        rules.insert(rule.rule_id.clone(), rule.clone());
        Ok(())
    }

    async fn delete_rule(&self, rule_id: &str) -> DomainResult<bool> {
        let mut rules = self.rules.write().await;
        Ok(rules.remove(rule_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, priority: i32, enabled: bool) -> RoutingRule {
        RoutingRule {
            rule_id: id.to_string(),
            priority,
            condition: "true".to_string(),
            target_chute: format!("CH-{}", id),
            enabled,
        }
    }

    #[tokio::test]
    async fn test_list_is_priority_ordered() {
        let repo = InMemoryRoutingRuleRepository::with_rules(vec![
            rule("c", 3, true),
            rule("a", 1, true),
            rule("b", 2, true),
        ]);

        let ids: Vec<_> = repo
            .list_rules()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.rule_id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_list_enabled_filters_disabled() {
        let repo =
            InMemoryRoutingRuleRepository::with_rules(vec![rule("a", 1, false), rule("b", 2, true)]);

        let enabled = repo.list_enabled_rules().await.unwrap();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].rule_id, "b");
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_delete_reports_presence() {
        let repo = InMemoryRoutingRuleRepository::new();
        repo.upsert_rule(&rule("a", 1, true)).await.unwrap();
        repo.upsert_rule(&rule("a", 5, true)).await.unwrap();

        let rules = repo.list_rules().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].priority, 5);

        assert!(repo.delete_rule("a").await.unwrap());
        assert!(!repo.delete_rule("a").await.unwrap());
    }
}
