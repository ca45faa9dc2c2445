use common::cel::{CompiledCondition, ConditionInput};
use common::domain::{
    hash_routing_rules, sort_rules_for_evaluation, DomainResult, Parcel, RoutingRule,
    RoutingRuleRepository, ScanRecord, WcsResponse,
};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, instrument, warn};

/// Outcome of evaluating the rule set for one parcel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleDecision {
    Matched { rule_id: String, chute_id: String },
    NoDecision,
}

struct CompiledRule {
    rule_id: String,
    target_chute: String,
    condition: CompiledCondition,
}

/// Compiled, evaluation-ordered view of the enabled rules.
struct RuleSnapshot {
    rules: Vec<CompiledRule>,
    hash: String,
}

impl RuleSnapshot {
    fn empty() -> Self {
        Self {
            rules: Vec::new(),
            hash: hash_routing_rules(&[]),
        }
    }

    fn build(mut rules: Vec<RoutingRule>) -> Self {
        rules.retain(|rule| rule.enabled);
        let hash = hash_routing_rules(&rules);
        sort_rules_for_evaluation(&mut rules);

        let compiled = rules
            .into_iter()
            .filter_map(|rule| match CompiledCondition::compile(&rule.rule_id, &rule.condition) {
                Ok(condition) => Some(CompiledRule {
                    rule_id: rule.rule_id,
                    target_chute: rule.target_chute,
                    condition,
                }),
                Err(e) => {
                    error!(rule_id = %rule.rule_id, error = %e, "skipping routing rule that failed to compile");
                    None
                }
            })
            .collect();

        Self {
            rules: compiled,
            hash,
        }
    }
}

/// Evaluates routing rules against a cached snapshot.
///
/// The snapshot is only rebuilt when [`refresh`](Self::refresh) or
/// [`install`](Self::install) is called; evaluation never touches the
/// repository.
pub struct RuleEvaluator {
    repository: Arc<dyn RoutingRuleRepository>,
    snapshot: RwLock<Arc<RuleSnapshot>>,
}

impl RuleEvaluator {
    pub fn new(repository: Arc<dyn RoutingRuleRepository>) -> Self {
        Self {
            repository,
            snapshot: RwLock::new(Arc::new(RuleSnapshot::empty())),
        }
    }

    fn current(&self) -> Arc<RuleSnapshot> {
        match self.snapshot.read() {
            Ok(snapshot) => Arc::clone(&*snapshot),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Reload enabled rules from the repository. Returns the number of usable rules.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> DomainResult<usize> {
        let rules = self.repository.list_enabled_rules().await?;
        Ok(self.install(rules))
    }

    /// Replace the snapshot with an already loaded rule set.
    pub fn install(&self, rules: Vec<RoutingRule>) -> usize {
        let snapshot = Arc::new(RuleSnapshot::build(rules));
        let count = snapshot.rules.len();
        info!(rules = count, hash = %snapshot.hash, "routing rule snapshot installed");

        match self.snapshot.write() {
            Ok(mut current) => *current = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
        count
    }

    pub fn snapshot_hash(&self) -> String {
        self.current().hash.clone()
    }

    pub fn rule_count(&self) -> usize {
        self.current().rules.len()
    }

    /// First rule, by priority, whose condition is true.
    pub fn evaluate(
        &self,
        parcel: &Parcel,
        scan: &ScanRecord,
        wcs: Option<&WcsResponse>,
    ) -> RuleDecision {
        let snapshot = self.current();
        let input = ConditionInput::new(parcel, scan, wcs);

        for rule in &snapshot.rules {
            match rule.condition.evaluate(&input) {
                Ok(true) => {
                    debug!(parcel_id = %parcel.parcel_id, rule_id = %rule.rule_id, chute_id = %rule.target_chute, "routing rule matched");
                    return RuleDecision::Matched {
                        rule_id: rule.rule_id.clone(),
                        chute_id: rule.target_chute.clone(),
                    };
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        parcel_id = %parcel.parcel_id,
                        rule_id = %rule.rule_id,
                        condition = %rule.condition.source(),
                        error = %e,
                        "routing rule evaluation failed, treating as no match"
                    );
                }
            }
        }

        RuleDecision::NoDecision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::domain::MockRoutingRuleRepository;
    use common::memory::InMemoryRoutingRuleRepository;

    fn rule(rule_id: &str, priority: i32, condition: &str, chute: &str) -> RoutingRule {
        RoutingRule {
            rule_id: rule_id.to_string(),
            priority,
            condition: condition.to_string(),
            target_chute: chute.to_string(),
            enabled: true,
        }
    }

    fn bound_parcel(barcode: &str, weight: f64) -> (Parcel, ScanRecord) {
        let mut scan = ScanRecord::new(barcode, Utc::now());
        scan.weight = Some(weight);
        let mut parcel = Parcel::detected("P1", None, Utc::now());
        parcel.bind_scan(&scan);
        (parcel, scan)
    }

    fn evaluator_with(rules: Vec<RoutingRule>) -> RuleEvaluator {
        let evaluator = RuleEvaluator::new(Arc::new(InMemoryRoutingRuleRepository::new()));
        evaluator.install(rules);
        evaluator
    }

    #[test]
    fn test_first_true_rule_by_priority_wins() {
        let evaluator = evaluator_with(vec![
            rule("R3", 3, "true", "CH3"),
            rule("R1", 1, "false", "CH1"),
            rule("R2", 2, "true", "CH2"),
        ]);
        let (parcel, scan) = bound_parcel("ABC", 1.0);

        assert_eq!(
            evaluator.evaluate(&parcel, &scan, None),
            RuleDecision::Matched {
                rule_id: "R2".to_string(),
                chute_id: "CH2".to_string()
            }
        );
    }

    #[test]
    fn test_priority_ties_break_on_rule_id() {
        let evaluator = evaluator_with(vec![
            rule("B", 1, "true", "CH-B"),
            rule("A", 1, "true", "CH-A"),
        ]);
        let (parcel, scan) = bound_parcel("ABC", 1.0);

        assert!(matches!(
            evaluator.evaluate(&parcel, &scan, None),
            RuleDecision::Matched { chute_id, .. } if chute_id == "CH-A"
        ));
    }

    #[test]
    fn test_no_match_is_no_decision() {
        let evaluator = evaluator_with(vec![rule("heavy", 1, "weight > 100.0", "CH-HEAVY")]);
        let (parcel, scan) = bound_parcel("ABC", 2.5);

        assert_eq!(evaluator.evaluate(&parcel, &scan, None), RuleDecision::NoDecision);
    }

    #[test]
    fn test_broken_rules_are_skipped() {
        let evaluator = evaluator_with(vec![
            rule("bad-syntax", 1, "weight >", "CH1"),
            rule("non-bool", 2, "weight + 1.0", "CH2"),
            rule("ok", 3, "barcode == 'ABC'", "CH3"),
        ]);
        let (parcel, scan) = bound_parcel("ABC", 2.5);

        assert_eq!(evaluator.rule_count(), 2);
        assert_eq!(
            evaluator.evaluate(&parcel, &scan, None),
            RuleDecision::Matched {
                rule_id: "ok".to_string(),
                chute_id: "CH3".to_string()
            }
        );
    }

    #[test]
    fn test_disabled_rules_are_ignored() {
        let mut disabled = rule("R1", 1, "true", "CH1");
        disabled.enabled = false;
        let evaluator = evaluator_with(vec![disabled, rule("R2", 2, "true", "CH2")]);
        let (parcel, scan) = bound_parcel("ABC", 1.0);

        assert!(matches!(
            evaluator.evaluate(&parcel, &scan, None),
            RuleDecision::Matched { rule_id, .. } if rule_id == "R2"
        ));
    }

    #[tokio::test]
    async fn test_refresh_reads_repository_once_per_call() {
        let mut repository = MockRoutingRuleRepository::new();
        repository
            .expect_list_enabled_rules()
            .times(1)
            .returning(|| Ok(vec![rule("R1", 1, "true", "CH1")]));

        let evaluator = RuleEvaluator::new(Arc::new(repository));
        assert_eq!(evaluator.refresh().await.unwrap(), 1);

        let (parcel, scan) = bound_parcel("ABC", 1.0);
        for _ in 0..3 {
            assert!(matches!(
                evaluator.evaluate(&parcel, &scan, None),
                RuleDecision::Matched { .. }
            ));
        }
    }

    #[test]
    fn test_install_changes_hash() {
        let evaluator = evaluator_with(vec![rule("R1", 1, "true", "CH1")]);
        let before = evaluator.snapshot_hash();

        evaluator.install(vec![rule("R1", 1, "true", "CH9")]);

        assert_ne!(before, evaluator.snapshot_hash());
    }
}
