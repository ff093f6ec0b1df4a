//! Policy evaluator: matches detections and scan context against a
//! policy's conditions and produces an allow/flag/block decision.

use crate::l1::executor::Detection;
use crate::model::Severity;
use std::collections::HashMap;

/// One constraint within a [`PolicyCondition`]. All constraints in a
/// condition are AND'd together.
#[derive(Debug, Clone)]
pub enum PolicyConstraint {
    /// Detection severity must be ≥ this threshold.
    SeverityAtLeast(Severity),
    /// Detection's rule id must be in this set.
    RuleIdIn(Vec<String>),
    /// Detection confidence must be within `[min, max]`, inclusive.
    ConfidenceInRange(f64, f64),
}

impl PolicyConstraint {
    fn matches(&self, detection: &Detection) -> bool {
        match self {
            Self::SeverityAtLeast(min) => detection.severity >= *min,
            Self::RuleIdIn(ids) => ids.iter().any(|id| id == &detection.rule_id),
            Self::ConfidenceInRange(min, max) => {
                detection.confidence >= *min && detection.confidence <= *max
            }
        }
    }
}

/// A condition: all its constraints AND'd. A [`Policy`] matches a detection
/// if any one of its conditions matches.
#[derive(Debug, Clone, Default)]
pub struct PolicyCondition {
    /// Constraints, AND'd together.
    pub constraints: Vec<PolicyConstraint>,
}

impl PolicyCondition {
    fn matches(&self, detection: &Detection) -> bool {
        !self.constraints.is_empty() && self.constraints.iter().all(|c| c.matches(detection))
    }
}

/// Action a matching policy takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// Record only.
    Log,
    /// Keep but mark flagged.
    Flag,
    /// Block the request.
    Block,
    /// Allow explicitly (overrides a lower-priority block/flag).
    Allow,
}

/// A policy (§3 `Policy`).
#[derive(Debug, Clone)]
pub struct Policy {
    /// Stable policy identifier.
    pub policy_id: String,
    /// Scope this policy applies within (tenant/app/customer id, or "global").
    pub scope_id: String,
    /// Human name.
    pub name: String,
    /// Conditions, OR'd.
    pub conditions: Vec<PolicyCondition>,
    /// Action taken when this policy matches and wins.
    pub action: PolicyAction,
    /// Higher priority wins ties; sorted descending.
    pub priority: i64,
    /// Optional severity override applied when this policy wins.
    pub override_severity: Option<Severity>,
    /// Disabled policies are invisible to evaluation.
    pub enabled: bool,
}

impl Policy {
    fn matches(&self, detection: &Detection) -> bool {
        self.enabled && self.conditions.iter().any(|c| c.matches(detection))
    }
}

/// Result of evaluating one detection against a policy set (§3
/// `PolicyDecision`).
#[derive(Debug, Clone)]
pub struct PolicyDecision {
    /// The action to take.
    pub action: PolicyAction,
    /// Severity before any policy override.
    pub original_severity: Severity,
    /// Severity after the winning policy's override, if any.
    pub final_severity: Severity,
    /// Every matched policy's id, in priority order (highest first).
    pub matched_policy_ids: Vec<String>,
}

impl PolicyDecision {
    /// Whether the winning policy changed the detection's severity.
    #[must_use]
    pub fn severity_changed(&self) -> bool {
        self.original_severity != self.final_severity
    }
}

/// Evaluates detections against a policy set.
#[derive(Debug, Default)]
pub struct PolicyEvaluator;

impl PolicyEvaluator {
    /// Construct an evaluator. Stateless; all inputs are passed per call.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Evaluate one detection. Default action when nothing matches is
    /// [`PolicyAction::Log`] with no severity change. Disabled policies are
    /// skipped entirely. Matched policies are sorted priority desc,
    /// policy_id asc for determinism; the first one wins the action and
    /// severity override, all matches are recorded.
    #[must_use]
    pub fn evaluate(&self, detection: &Detection, policies: &[Policy]) -> PolicyDecision {
        let mut matched: Vec<&Policy> = policies.iter().filter(|p| p.matches(detection)).collect();
        matched.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.policy_id.cmp(&b.policy_id)));

        let original_severity = detection.severity;

        match matched.first() {
            Some(winner) => PolicyDecision {
                action: winner.action,
                original_severity,
                final_severity: winner.override_severity.unwrap_or(original_severity),
                matched_policy_ids: matched.iter().map(|p| p.policy_id.clone()).collect(),
            },
            None => PolicyDecision {
                action: PolicyAction::Log,
                original_severity,
                final_severity: original_severity,
                matched_policy_ids: Vec::new(),
            },
        }
    }

    /// Evaluate every detection, keyed by `"{rule_id}@{version}"`.
    #[must_use]
    pub fn evaluate_batch(
        &self,
        detections: &[Detection],
        policies: &[Policy],
    ) -> HashMap<String, PolicyDecision> {
        detections
            .iter()
            .map(|d| {
                let key = format!("{}@{}", d.rule_id, d.version);
                (key, self.evaluate(d, policies))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::now_iso8601;

    fn detection(rule_id: &str, severity: Severity, confidence: f64) -> Detection {
        Detection {
            rule_id: rule_id.to_string(),
            version: "1.0.0".to_string(),
            severity,
            confidence,
            matches: vec![],
            timestamp: now_iso8601(),
            layer: crate::l1::executor::Layer::L1,
            layer_latency_ms: 1.0,
            category: "pi".to_string(),
            message: "m".to_string(),
            explanation: None,
            remediation: None,
            docs_url: None,
            is_flagged: false,
            suppression_reason: None,
        }
    }

    fn policy(id: &str, priority: i64, action: PolicyAction, min_severity: Severity) -> Policy {
        Policy {
            policy_id: id.to_string(),
            scope_id: "global".to_string(),
            name: id.to_string(),
            conditions: vec![PolicyCondition {
                constraints: vec![PolicyConstraint::SeverityAtLeast(min_severity)],
            }],
            action,
            priority,
            override_severity: None,
            enabled: true,
        }
    }

    #[test]
    fn default_action_is_log_when_nothing_matches() {
        let evaluator = PolicyEvaluator::new();
        let d = detection("pi-001", Severity::Info, 0.1);
        let policies = vec![policy("p1", 1, PolicyAction::Block, Severity::High)];
        let decision = evaluator.evaluate(&d, &policies);
        assert_eq!(decision.action, PolicyAction::Log);
        assert!(decision.matched_policy_ids.is_empty());
    }

    #[test]
    fn disabled_policy_is_invisible() {
        let evaluator = PolicyEvaluator::new();
        let d = detection("pi-001", Severity::Critical, 0.9);
        let mut p = policy("p1", 1, PolicyAction::Block, Severity::Low);
        p.enabled = false;
        let decision = evaluator.evaluate(&d, &[p]);
        assert_eq!(decision.action, PolicyAction::Log);
    }

    #[test]
    fn highest_priority_wins_ties_broken_by_policy_id() {
        let evaluator = PolicyEvaluator::new();
        let d = detection("pi-001", Severity::High, 0.9);
        let policies = vec![
            policy("zzz", 5, PolicyAction::Flag, Severity::Low),
            policy("aaa", 5, PolicyAction::Block, Severity::Low),
            policy("low-prio", 1, PolicyAction::Allow, Severity::Low),
        ];
        let decision = evaluator.evaluate(&d, &policies);
        assert_eq!(decision.action, PolicyAction::Block);
        assert_eq!(decision.matched_policy_ids, vec!["aaa", "zzz", "low-prio"]);
    }

    #[test]
    fn severity_override_applies_from_winner_only() {
        let evaluator = PolicyEvaluator::new();
        let d = detection("pi-001", Severity::Medium, 0.9);
        let mut winner = policy("p1", 10, PolicyAction::Flag, Severity::Low);
        winner.override_severity = Some(Severity::Critical);
        let decision = evaluator.evaluate(&d, &[winner]);
        assert_eq!(decision.final_severity, Severity::Critical);
        assert!(decision.severity_changed());
    }

    #[test]
    fn confidence_range_is_inclusive_both_ends() {
        let mut p = policy("p1", 1, PolicyAction::Block, Severity::Info);
        p.conditions = vec![PolicyCondition {
            constraints: vec![PolicyConstraint::ConfidenceInRange(0.5, 0.9)],
        }];
        let evaluator = PolicyEvaluator::new();
        assert_eq!(
            evaluator.evaluate(&detection("x", Severity::Info, 0.5), &[p.clone()]).action,
            PolicyAction::Block
        );
        assert_eq!(
            evaluator.evaluate(&detection("x", Severity::Info, 0.9), &[p.clone()]).action,
            PolicyAction::Block
        );
        assert_eq!(
            evaluator.evaluate(&detection("x", Severity::Info, 0.91), &[p]).action,
            PolicyAction::Log
        );
    }

    #[test]
    fn batch_evaluation_keys_by_versioned_rule_id() {
        let evaluator = PolicyEvaluator::new();
        let detections = vec![detection("pi-001", Severity::High, 0.9)];
        let decisions = evaluator.evaluate_batch(&detections, &[]);
        assert!(decisions.contains_key("pi-001@1.0.0"));
    }
}
