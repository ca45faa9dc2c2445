use crate::domain::result::DomainResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Ordered routing rule. Lower `priority` wins.
///
/// `condition` is a CEL expression evaluated against parcel and scan fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoutingRule {
    pub rule_id: String,
    pub priority: i32,
    pub condition: String,
    pub target_chute: String,
    pub enabled: bool,
}

/// Repository trait for routing rules
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RoutingRuleRepository: Send + Sync {
    /// List all rules, enabled or not
    async fn list_rules(&self) -> DomainResult<Vec<RoutingRule>>;

    /// List enabled rules ordered by priority
    async fn list_enabled_rules(&self) -> DomainResult<Vec<RoutingRule>>;

    /// Insert or replace a rule
    async fn upsert_rule(&self, rule: &RoutingRule) -> DomainResult<()>;

    /// Delete a rule, returning whether it existed
    async fn delete_rule(&self, rule_id: &str) -> DomainResult<bool>;
}

/// Hash a rule set for change detection.
///
/// Order-insensitive: rules are hashed sorted by `rule_id`.
pub fn hash_routing_rules(rules: &[RoutingRule]) -> String {
    let mut sorted: Vec<&RoutingRule> = rules.iter().collect();
    sorted.sort_by(|a, b| a.rule_id.cmp(&b.rule_id));

    let mut hasher = DefaultHasher::new();
    for rule in sorted {
        rule.hash(&mut hasher);
    }
    format!("{:x}", hasher.finish())
}

/// Sort rules into evaluation order: priority ascending, ties by rule id.
pub fn sort_rules_for_evaluation(rules: &mut [RoutingRule]) {
    rules.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });
}
