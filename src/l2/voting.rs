//! Voting engine: collapses five independently-thresholded,
//! independently-weighted classifier heads into a single decision.

use crate::l2::adapter::ClassificationResult;
use thiserror::Error;

/// Errors raised while aggregating head votes.
#[derive(Debug, Error)]
pub enum VotingError {
    /// An unknown preset name was requested.
    #[error("unknown voting preset: {0}")]
    UnknownPreset(String),
}

/// A single head's vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    /// The head considers this text a threat.
    Threat,
    /// The head considers this text safe.
    Safe,
    /// The head declines to opine (gray zone).
    Abstain,
}

/// Per-head vote detail, kept for explainability (§4.6).
#[derive(Debug, Clone)]
pub struct HeadVoteDetail {
    /// Which head cast this vote: `"binary"`, `"family"`, `"severity"`,
    /// `"technique"`, or `"harm"`.
    pub head_name: &'static str,
    /// The vote itself.
    pub vote: Vote,
    /// Confidence in `[0, 1]`.
    pub confidence: f64,
    /// This head's configured weight.
    pub weight: f64,
    /// The raw probability/confidence the head reported.
    pub raw_probability: f64,
    /// The threshold actually applied to reach this vote.
    pub threshold_used: f64,
    /// Short prediction label (e.g. `"threat"`, `"jailbreak"`, `"high"`).
    pub prediction: String,
    /// Human-readable rationale for audit/debugging.
    pub rationale: String,
}

/// Binary head thresholds (§4.6 table).
#[derive(Debug, Clone, Copy)]
pub struct BinaryThresholds {
    /// `threat_probability >= this` → THREAT.
    pub threat_threshold: f64,
    /// `threat_probability < this` → SAFE.
    pub safe_threshold: f64,
}

impl Default for BinaryThresholds {
    fn default() -> Self {
        Self { threat_threshold: 0.35, safe_threshold: 0.15 }
    }
}

/// Family/technique head thresholds share the same shape.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceThresholds {
    /// Confidence at/above which a non-benign/non-safe label votes THREAT.
    pub threat_confidence: f64,
    /// Confidence below which a label votes SAFE regardless of label.
    pub safe_confidence: f64,
}

impl Default for ConfidenceThresholds {
    fn default() -> Self {
        Self { threat_confidence: 0.25, safe_confidence: 0.15 }
    }
}

/// Severity head thresholds: a closed set of labels, no abstain (§4.6).
#[derive(Debug, Clone)]
pub struct SeverityThresholds {
    /// Labels that vote SAFE.
    pub safe_severities: Vec<String>,
    /// Labels that vote THREAT.
    pub threat_severities: Vec<String>,
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            safe_severities: vec!["none".to_string()],
            threat_severities: vec![
                "low".to_string(),
                "medium".to_string(),
                "high".to_string(),
                "critical".to_string(),
            ],
        }
    }
}

/// Technique head: labels considered intrinsically safe.
#[derive(Debug, Clone)]
pub struct TechniqueThresholds {
    /// Confidence thresholds, shared shape with the family head.
    pub confidence: ConfidenceThresholds,
    /// Technique labels that always vote SAFE.
    pub safe_techniques: Vec<String>,
}

impl Default for TechniqueThresholds {
    fn default() -> Self {
        Self {
            confidence: ConfidenceThresholds::default(),
            safe_techniques: vec!["none".to_string()],
        }
    }
}

/// Harm (multilabel) head thresholds.
#[derive(Debug, Clone, Copy)]
pub struct HarmThresholds {
    /// `max_probability >= this` → THREAT.
    pub threat_threshold: f64,
    /// `max_probability < this` → SAFE.
    pub safe_threshold: f64,
}

impl Default for HarmThresholds {
    fn default() -> Self {
        Self { threat_threshold: 0.40, safe_threshold: 0.20 }
    }
}

/// Per-head weights (§4.6 default column).
#[derive(Debug, Clone, Copy)]
pub struct HeadWeights {
    /// Binary head weight.
    pub binary: f64,
    /// Family head weight.
    pub family: f64,
    /// Severity head weight.
    pub severity: f64,
    /// Technique head weight.
    pub technique: f64,
    /// Harm head weight.
    pub harm: f64,
}

impl Default for HeadWeights {
    fn default() -> Self {
        Self { binary: 1.0, family: 1.2, severity: 1.5, technique: 1.0, harm: 0.8 }
    }
}

/// All thresholds + weights needed to run the voting engine.
#[derive(Debug, Clone)]
pub struct VotingConfig {
    /// Per-head weights.
    pub weights: HeadWeights,
    /// Binary head thresholds.
    pub binary: BinaryThresholds,
    /// Family head thresholds.
    pub family: ConfidenceThresholds,
    /// Severity head thresholds.
    pub severity: SeverityThresholds,
    /// Technique head thresholds.
    pub technique: TechniqueThresholds,
    /// Harm head thresholds.
    pub harm: HarmThresholds,
}

impl Default for VotingConfig {
    fn default() -> Self {
        Self::preset("balanced").expect("balanced preset always exists")
    }
}

impl VotingConfig {
    /// Resolve one of the four named presets (§4.6): `balanced` (default),
    /// `high_security` (lower thresholds, higher severity/technique
    /// weight), `low_fp` (higher thresholds), `harm_focused` (higher harm
    /// weight).
    ///
    /// # Errors
    ///
    /// Returns [`VotingError::UnknownPreset`] for any other name.
    pub fn preset(name: &str) -> Result<Self, VotingError> {
        match name {
            "balanced" => Ok(Self {
                weights: HeadWeights::default(),
                binary: BinaryThresholds::default(),
                family: ConfidenceThresholds::default(),
                severity: SeverityThresholds::default(),
                technique: TechniqueThresholds::default(),
                harm: HarmThresholds::default(),
            }),
            "high_security" => Ok(Self {
                weights: HeadWeights { binary: 1.0, family: 1.3, severity: 1.8, technique: 1.3, harm: 0.8 },
                binary: BinaryThresholds { threat_threshold: 0.25, safe_threshold: 0.10 },
                family: ConfidenceThresholds { threat_confidence: 0.18, safe_confidence: 0.10 },
                severity: SeverityThresholds::default(),
                technique: TechniqueThresholds {
                    confidence: ConfidenceThresholds { threat_confidence: 0.18, safe_confidence: 0.10 },
                    safe_techniques: vec!["none".to_string()],
                },
                harm: HarmThresholds { threat_threshold: 0.30, safe_threshold: 0.15 },
            }),
            "low_fp" => Ok(Self {
                weights: HeadWeights::default(),
                binary: BinaryThresholds { threat_threshold: 0.55, safe_threshold: 0.30 },
                family: ConfidenceThresholds { threat_confidence: 0.45, safe_confidence: 0.25 },
                severity: SeverityThresholds::default(),
                technique: TechniqueThresholds {
                    confidence: ConfidenceThresholds { threat_confidence: 0.45, safe_confidence: 0.25 },
                    safe_techniques: vec!["none".to_string()],
                },
                harm: HarmThresholds { threat_threshold: 0.60, safe_threshold: 0.35 },
            }),
            "harm_focused" => Ok(Self {
                weights: HeadWeights { binary: 1.0, family: 1.2, severity: 1.5, technique: 1.0, harm: 1.4 },
                binary: BinaryThresholds::default(),
                family: ConfidenceThresholds::default(),
                severity: SeverityThresholds::default(),
                technique: TechniqueThresholds::default(),
                harm: HarmThresholds { threat_threshold: 0.30, safe_threshold: 0.15 },
            }),
            other => Err(VotingError::UnknownPreset(other.to_string())),
        }
    }
}

fn vote_binary(threat_probability: f64, safe_probability: f64, t: BinaryThresholds, weight: f64) -> HeadVoteDetail {
    let (vote, confidence, threshold_used, rationale) = if threat_probability >= t.threat_threshold {
        (Vote::Threat, threat_probability, t.threat_threshold, format!(
            "threat_probability ({threat_probability:.2}) >= threat_threshold ({:.2})", t.threat_threshold))
    } else if threat_probability < t.safe_threshold {
        (Vote::Safe, safe_probability, t.safe_threshold, format!(
            "threat_probability ({threat_probability:.2}) < safe_threshold ({:.2})", t.safe_threshold))
    } else {
        let mid = (t.threat_threshold + t.safe_threshold) / 2.0;
        let half_range = (t.threat_threshold - t.safe_threshold) / 2.0;
        let confidence = (1.0 - (threat_probability - mid).abs() / half_range.max(1e-9)).clamp(0.0, 1.0);
        (Vote::Abstain, confidence, mid, format!(
            "threat_probability ({threat_probability:.2}) in gray zone [{:.2}, {:.2})", t.safe_threshold, t.threat_threshold))
    };

    HeadVoteDetail {
        head_name: "binary",
        vote,
        confidence,
        weight,
        raw_probability: threat_probability,
        threshold_used,
        prediction: if threat_probability >= 0.5 { "threat".to_string() } else { "safe".to_string() },
        rationale,
    }
}

fn vote_family(label: &str, confidence_in: f64, t: ConfidenceThresholds, weight: f64) -> HeadVoteDetail {
    let is_benign = label.eq_ignore_ascii_case("benign");

    let (vote, confidence, threshold_used, rationale) = if is_benign {
        (Vote::Safe, confidence_in, 0.0, format!("family={label} is benign"))
    } else if confidence_in >= t.threat_confidence {
        (Vote::Threat, confidence_in, t.threat_confidence, format!(
            "family={label} with confidence ({confidence_in:.2}) >= threat_confidence ({:.2})", t.threat_confidence))
    } else if confidence_in < t.safe_confidence {
        (Vote::Safe, 1.0 - confidence_in, t.safe_confidence, format!(
            "family={label} with confidence ({confidence_in:.2}) < safe_confidence ({:.2})", t.safe_confidence))
    } else {
        let mid = (t.threat_confidence + t.safe_confidence) / 2.0;
        (Vote::Abstain, 0.5, mid, format!(
            "family={label} with confidence ({confidence_in:.2}) in gray zone [{:.2}, {:.2})", t.safe_confidence, t.threat_confidence))
    };

    HeadVoteDetail {
        head_name: "family",
        vote,
        confidence,
        weight,
        raw_probability: confidence_in,
        threshold_used,
        prediction: label.to_string(),
        rationale,
    }
}

fn vote_severity(label: &str, confidence: f64, t: &SeverityThresholds, weight: f64) -> HeadVoteDetail {
    let lower = label.to_lowercase();
    let (vote, threshold_used, rationale) = if t.safe_severities.iter().any(|s| s == &lower) {
        (Vote::Safe, 0.0, format!("severity={label} in safe_severities {:?}", t.safe_severities))
    } else if t.threat_severities.iter().any(|s| s == &lower) {
        (Vote::Threat, 0.0, format!("severity={label} in threat_severities {:?}", t.threat_severities))
    } else {
        (Vote::Abstain, 0.5, format!("severity={label} not in known categories"))
    };

    HeadVoteDetail {
        head_name: "severity",
        vote,
        confidence,
        weight,
        raw_probability: confidence,
        threshold_used,
        prediction: label.to_string(),
        rationale,
    }
}

fn vote_technique(label: Option<&str>, confidence_in: f64, t: &TechniqueThresholds, weight: f64) -> HeadVoteDetail {
    let label = label.unwrap_or("none");
    let lower = label.to_lowercase();
    let is_safe = t.safe_techniques.iter().any(|s| s.to_lowercase() == lower);

    let (vote, confidence, threshold_used, rationale) = if is_safe {
        (Vote::Safe, confidence_in, 0.0, format!("technique={label} in safe_techniques"))
    } else if confidence_in >= t.confidence.threat_confidence {
        (Vote::Threat, confidence_in, t.confidence.threat_confidence, format!(
            "technique={label} with confidence ({confidence_in:.2}) >= threat_confidence ({:.2})", t.confidence.threat_confidence))
    } else if confidence_in < t.confidence.safe_confidence {
        (Vote::Safe, 1.0 - confidence_in, t.confidence.safe_confidence, format!(
            "technique={label} with confidence ({confidence_in:.2}) < safe_confidence ({:.2})", t.confidence.safe_confidence))
    } else {
        let mid = (t.confidence.threat_confidence + t.confidence.safe_confidence) / 2.0;
        (Vote::Abstain, 0.5, mid, format!(
            "technique={label} with confidence ({confidence_in:.2}) in gray zone [{:.2}, {:.2})",
            t.confidence.safe_confidence, t.confidence.threat_confidence))
    };

    HeadVoteDetail {
        head_name: "technique",
        vote,
        confidence,
        weight,
        raw_probability: confidence_in,
        threshold_used,
        prediction: label.to_string(),
        rationale,
    }
}

fn vote_harm(max_probability: f64, active_labels: &[String], t: HarmThresholds, weight: f64) -> HeadVoteDetail {
    let prediction = if active_labels.is_empty() {
        "none".to_string()
    } else {
        let mut s = active_labels.iter().take(3).cloned().collect::<Vec<_>>().join(",");
        if active_labels.len() > 3 {
            s.push_str(&format!(",+{}", active_labels.len() - 3));
        }
        s
    };

    let (vote, confidence, threshold_used, rationale) = if max_probability >= t.threat_threshold {
        (Vote::Threat, max_probability, t.threat_threshold, format!(
            "max_probability ({max_probability:.2}) >= threat_threshold ({:.2})", t.threat_threshold))
    } else if max_probability < t.safe_threshold {
        (Vote::Safe, 1.0 - max_probability, t.safe_threshold, format!(
            "max_probability ({max_probability:.2}) < safe_threshold ({:.2})", t.safe_threshold))
    } else {
        let mid = (t.threat_threshold + t.safe_threshold) / 2.0;
        (Vote::Abstain, 0.5, mid, format!(
            "max_probability ({max_probability:.2}) in gray zone [{:.2}, {:.2})", t.safe_threshold, t.threat_threshold))
    };

    HeadVoteDetail {
        head_name: "harm",
        vote,
        confidence,
        weight,
        raw_probability: max_probability,
        threshold_used,
        prediction,
        rationale,
    }
}

/// Final aggregated classification (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalClassification {
    /// Overwhelming threat signal.
    HighThreat,
    /// Clear threat signal.
    Threat,
    /// Probable threat, worth a closer look.
    LikelyThreat,
    /// Ambiguous; needs human review.
    Review,
    /// Probably a false positive.
    FpLikely,
}

/// Recommended action (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendedAction {
    /// Block and raise an alert immediately.
    BlockAlert,
    /// Block.
    Block,
    /// Block but flag for later human review.
    BlockWithReview,
    /// Don't block, but route to a human reviewer.
    ManualReview,
    /// Allow, but log.
    AllowWithLog,
}

/// Full voting result: aggregated classification, recommended action, and
/// every head's detail for explainability.
#[derive(Debug, Clone)]
pub struct VotingResult {
    /// Final classification.
    pub classification: FinalClassification,
    /// Recommended action.
    pub action: RecommendedAction,
    /// Aggregated threat score (sum of weight*confidence over THREAT votes).
    pub threat_score: f64,
    /// Aggregated safe score (sum of weight*confidence over SAFE votes).
    pub safe_score: f64,
    /// Per-head detail, in head order (binary, family, severity, technique, harm).
    pub head_details: Vec<HeadVoteDetail>,
}

/// Aggregates the five heads of a [`ClassificationResult`] into one
/// [`VotingResult`] under `config`.
#[must_use]
pub fn vote(result: &ClassificationResult, config: &VotingConfig) -> VotingResult {
    let head_details = vec![
        vote_binary(
            result.binary.threat_probability,
            result.binary.safe_probability,
            config.binary,
            config.weights.binary,
        ),
        vote_family(&result.family.label, result.family.confidence, config.family, config.weights.family),
        vote_severity(&result.severity.label, result.severity.confidence, &config.severity, config.weights.severity),
        vote_technique(
            result.technique.label.as_deref(),
            result.technique.confidence,
            &config.technique,
            config.weights.technique,
        ),
        vote_harm(result.harm.max_probability(), &result.harm.active_labels, config.harm, config.weights.harm),
    ];

    let threat_score: f64 = head_details
        .iter()
        .filter(|h| h.vote == Vote::Threat)
        .map(|h| h.weight * h.confidence)
        .sum();
    let safe_score: f64 = head_details
        .iter()
        .filter(|h| h.vote == Vote::Safe)
        .map(|h| h.weight * h.confidence)
        .sum();

    let total_weight: f64 = config.weights.binary
        + config.weights.family
        + config.weights.severity
        + config.weights.technique
        + config.weights.harm;
    let normalized = if total_weight > 0.0 { threat_score / total_weight } else { 0.0 };

    let (classification, action) = if normalized >= 0.75 && threat_score > safe_score {
        (FinalClassification::HighThreat, RecommendedAction::BlockAlert)
    } else if normalized >= 0.5 && threat_score > safe_score {
        (FinalClassification::Threat, RecommendedAction::Block)
    } else if normalized >= 0.3 && threat_score >= safe_score {
        (FinalClassification::LikelyThreat, RecommendedAction::BlockWithReview)
    } else if safe_score > threat_score * 2.0 {
        (FinalClassification::FpLikely, RecommendedAction::AllowWithLog)
    } else {
        (FinalClassification::Review, RecommendedAction::ManualReview)
    };

    VotingResult { classification, action, threat_score, safe_score, head_details }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::l2::adapter::{BinaryPrediction, FamilyPrediction, HarmPrediction, SeverityPrediction, TechniquePrediction};
    use std::collections::HashMap;

    fn benign_result() -> ClassificationResult {
        ClassificationResult {
            binary: BinaryPrediction { threat_probability: 0.02, safe_probability: 0.98, is_threat: false },
            family: FamilyPrediction { label: "benign".to_string(), confidence: 0.95, distribution: HashMap::new() },
            severity: SeverityPrediction { label: "none".to_string(), confidence: 0.9, distribution: HashMap::new() },
            technique: TechniquePrediction { label: None, confidence: 0.05, distribution: HashMap::new() },
            harm: HarmPrediction::default(),
            processing_time_ms: 1.0,
            model_version: "test".to_string(),
        }
    }

    fn threat_result() -> ClassificationResult {
        ClassificationResult {
            binary: BinaryPrediction { threat_probability: 0.9, safe_probability: 0.1, is_threat: true },
            family: FamilyPrediction { label: "jailbreak".to_string(), confidence: 0.88, distribution: HashMap::new() },
            severity: SeverityPrediction { label: "high".to_string(), confidence: 0.85, distribution: HashMap::new() },
            technique: TechniquePrediction {
                label: Some("instruction_override".to_string()),
                confidence: 0.8,
                distribution: HashMap::new(),
            },
            harm: HarmPrediction {
                label_probabilities: HashMap::from([("violence".to_string(), 0.6)]),
                label_thresholds: HashMap::from([("violence".to_string(), 0.4)]),
                active_labels: vec!["violence".to_string()],
            },
            processing_time_ms: 1.0,
            model_version: "test".to_string(),
        }
    }

    #[test]
    fn benign_text_votes_fp_likely_or_allow() {
        let config = VotingConfig::default();
        let result = vote(&benign_result(), &config);
        assert!(matches!(
            result.classification,
            FinalClassification::FpLikely | FinalClassification::Review
        ));
    }

    #[test]
    fn strong_threat_votes_high_threat() {
        let config = VotingConfig::default();
        let result = vote(&threat_result(), &config);
        assert_eq!(result.classification, FinalClassification::HighThreat);
        assert_eq!(result.action, RecommendedAction::BlockAlert);
    }

    #[test]
    fn severity_head_never_abstains() {
        let t = SeverityThresholds::default();
        let detail = vote_severity("high", 0.9, &t, 1.5);
        assert_ne!(detail.vote, Vote::Abstain);
        let detail = vote_severity("none", 0.9, &t, 1.5);
        assert_ne!(detail.vote, Vote::Abstain);
    }

    #[test]
    fn binary_gray_zone_abstains() {
        let t = BinaryThresholds::default();
        let detail = vote_binary(0.25, 0.75, t, 1.0);
        assert_eq!(detail.vote, Vote::Abstain);
    }

    #[test]
    fn preset_unknown_name_errors() {
        assert!(matches!(VotingConfig::preset("nonexistent"), Err(VotingError::UnknownPreset(_))));
    }

    #[test]
    fn all_four_presets_resolve() {
        for name in ["balanced", "high_security", "low_fp", "harm_focused"] {
            assert!(VotingConfig::preset(name).is_ok());
        }
    }

    #[test]
    fn harm_head_prediction_caps_at_three_plus_n() {
        let labels = vec!["a".to_string(), "b".to_string(), "c".to_string(), "d".to_string()];
        let detail = vote_harm(0.9, &labels, HarmThresholds::default(), 0.8);
        assert_eq!(detail.prediction, "a,b,c,+1");
    }

    #[test]
    fn technique_none_label_maps_to_literal_none() {
        let t = TechniqueThresholds::default();
        let detail = vote_technique(None, 0.1, &t, 1.0);
        assert_eq!(detail.prediction, "none");
    }
}
