//! Scan merger: combines an L1 [`ScanResult`] with an optional L2
//! [`VotingResult`] into one [`CombinedScanResult`], applying the
//! configured fail mode when a layer degrades.

use crate::l1::executor::ScanResult;
use crate::l2::voting::{FinalClassification, VotingResult};
use crate::model::{Severity, now_iso8601};
use crate::policy::evaluator::PolicyDecision;

fn severity_implied_by_l2(classification: FinalClassification) -> Severity {
    match classification {
        FinalClassification::HighThreat => Severity::Critical,
        FinalClassification::Threat => Severity::High,
        FinalClassification::LikelyThreat => Severity::Medium,
        FinalClassification::Review => Severity::Low,
        FinalClassification::FpLikely => Severity::Info,
    }
}

/// Action decided for the whole scan (§3 user-visible contract).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanAction {
    /// No concerns.
    Allow,
    /// Keep the request, but flag for visibility.
    Flag,
    /// Record only.
    Log,
    /// Reject the request.
    Block,
}

/// L1 + L2 + merge metadata + policy verdict (§3 `CombinedScanResult`).
#[derive(Debug, Clone)]
pub struct CombinedScanResult {
    /// L1 scan result, post-suppression.
    pub l1: ScanResult,
    /// L2 voting result, if L2 ran.
    pub l2: Option<VotingResult>,
    /// `max(L1 highest, severity implied by L2 voting)`.
    pub severity: Severity,
    /// Total wall-clock duration (not the sum of L1 + L2 durations).
    pub duration_ms: f64,
    /// Per-detection policy decisions, keyed by versioned rule id.
    pub policy_decisions: Vec<PolicyDecision>,
    /// Final action for the whole scan.
    pub action: ScanAction,
}

impl CombinedScanResult {
    /// Total number of L1 detections.
    #[must_use]
    pub fn total_detections(&self) -> usize {
        self.l1.detection_count()
    }

    /// Whether the caller should treat this scan as a block.
    #[must_use]
    pub fn should_block(&self) -> bool {
        self.action == ScanAction::Block
    }

    /// An empty, allowed result for when scanning itself was bypassed
    /// (performance degradation mode skipped this request rather than
    /// running L1/L2 against it).
    #[must_use]
    pub fn bypassed() -> Self {
        Self {
            l1: ScanResult {
                detections: Vec::new(),
                scan_started_at: now_iso8601(),
                scanned_length: 0,
                rules_checked: 0,
                duration_ms: 0.0,
            },
            l2: None,
            severity: Severity::Info,
            duration_ms: 0.0,
            policy_decisions: Vec::new(),
            action: ScanAction::Allow,
        }
    }
}

/// Merge an L1 result and optional L2 voting result into one
/// [`CombinedScanResult`]. `total_duration_ms` is the wall-clock time for
/// the whole scan (parallel L1 ‖ L2), not the sum of each layer's own
/// reported duration.
#[must_use]
pub fn merge(
    l1: ScanResult,
    l2: Option<VotingResult>,
    policy_decisions: Vec<PolicyDecision>,
    total_duration_ms: f64,
) -> CombinedScanResult {
    let l1_highest = l1.highest_severity().unwrap_or(Severity::Info);
    let l2_severity = l2
        .as_ref()
        .map(|r| severity_implied_by_l2(r.classification))
        .unwrap_or(Severity::Info);
    let severity = l1_highest.max(l2_severity);

    let action = decide_action(&policy_decisions, severity, l2.as_ref());

    let mut l1 = l1;
    l1.detections.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });

    let mut l2 = l2;
    if let Some(result) = l2.as_mut() {
        result
            .head_details
            .sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));
    }

    CombinedScanResult { l1, l2, severity, duration_ms: total_duration_ms, policy_decisions, action }
}

fn decide_action(
    policy_decisions: &[PolicyDecision],
    severity: Severity,
    l2: Option<&VotingResult>,
) -> ScanAction {
    use crate::policy::evaluator::PolicyAction;

    if let Some(decision) = policy_decisions.iter().max_by_key(|d| d.final_severity) {
        match decision.action {
            PolicyAction::Block => return ScanAction::Block,
            PolicyAction::Allow => return ScanAction::Allow,
            PolicyAction::Flag => return ScanAction::Flag,
            PolicyAction::Log => {}
        }
    }

    if let Some(l2) = l2 {
        if matches!(
            l2.classification,
            FinalClassification::HighThreat | FinalClassification::Threat
        ) {
            return ScanAction::Block;
        }
    }

    if severity >= Severity::High {
        ScanAction::Block
    } else if severity >= Severity::Medium {
        ScanAction::Flag
    } else if severity == Severity::Low {
        ScanAction::Log
    } else {
        ScanAction::Allow
    }
}
