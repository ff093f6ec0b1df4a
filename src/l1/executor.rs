//! Rule execution and L1 scan results. A rule fires iff any of its patterns
//! match; a rule whose pattern errors (bad regex, timeout) is skipped
//! rather than failing the whole scan.

use crate::l1::matcher::{Match, PatternMatcher};
use crate::model::{Severity, now_iso8601};
use crate::packs::model::Rule;

/// One rule firing (§3 `Detection`).
#[derive(Debug, Clone)]
pub struct Detection {
    /// The rule's stable id.
    pub rule_id: String,
    /// The rule's version at the time it fired.
    pub version: String,
    /// Severity, from the rule.
    pub severity: Severity,
    /// Confidence in `[0, 1]`, scaled from the rule's base confidence by
    /// match quality (§4.2.1).
    pub confidence: f64,
    /// At least one match (invariant).
    pub matches: Vec<Match>,
    /// ISO-8601 UTC timestamp of detection.
    pub timestamp: String,
    /// Which layer produced this detection.
    pub layer: Layer,
    /// Wall-clock time this layer spent producing the detection.
    pub layer_latency_ms: f64,
    /// Lowercased family, derived.
    pub category: String,
    /// Rule description, truncated to 100 chars.
    pub message: String,
    /// Risk explanation, if the rule has one.
    pub explanation: Option<String>,
    /// Remediation advice, if the rule has one.
    pub remediation: Option<String>,
    /// Docs URL, if the rule has one.
    pub docs_url: Option<String>,
    /// Whether a suppression/policy pass has flagged (but not dropped) this
    /// detection.
    pub is_flagged: bool,
    /// Reason a suppression rule gave for flagging, if any.
    pub suppression_reason: Option<String>,
}

/// Which layer produced a [`Detection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Rule-based, L1.
    L1,
    /// ML classifier, L2.
    L2,
    /// Third-party plugin.
    Plugin,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::L1 => "L1",
            Self::L2 => "L2",
            Self::Plugin => "PLUGIN",
        })
    }
}

/// L1 scan result (§3 `ScanResult`): every [`Detection`] produced by running
/// a rule set over one piece of text, plus scan-level metadata.
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Detections, in the order rules were attempted.
    pub detections: Vec<Detection>,
    /// ISO-8601 UTC timestamp the scan started.
    pub scan_started_at: String,
    /// Length of the scanned text, in chars.
    pub scanned_length: usize,
    /// Number of rules attempted (not necessarily fired).
    pub rules_checked: usize,
    /// Total scan duration, in milliseconds.
    pub duration_ms: f64,
}

impl ScanResult {
    /// Highest severity across all detections, or [`None`] if there are
    /// none.
    #[must_use]
    pub fn highest_severity(&self) -> Option<Severity> {
        self.detections.iter().map(|d| d.severity).max()
    }

    /// Total number of individual pattern matches across all detections.
    #[must_use]
    pub fn total_matches(&self) -> usize {
        self.detections.iter().map(|d| d.matches.len()).sum()
    }

    /// Number of detections.
    #[must_use]
    pub fn detection_count(&self) -> usize {
        self.detections.len()
    }
}

/// Runs rules against text, applying the confidence formula from §4.2.1.
#[derive(Debug, Default)]
pub struct RuleExecutor {
    matcher: PatternMatcher,
}

impl RuleExecutor {
    /// Construct an executor with a fresh, empty compile cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run one rule against `text`. Returns `None` if no pattern matched;
    /// returns `None` (not an error) if every pattern on the rule failed to
    /// match or errored — a misbehaving pattern never fails the scan.
    pub async fn execute_rule(&self, text: &str, rule: &Rule) -> Option<Detection> {
        let start = std::time::Instant::now();
        let mut matches: Vec<Match> = Vec::new();
        let mut unique_patterns_matched = 0usize;

        for (idx, pattern) in rule.patterns.iter().enumerate() {
            match self.matcher.match_text(text, pattern, idx).await {
                Ok(found) if !found.is_empty() => {
                    unique_patterns_matched += 1;
                    matches.extend(found);
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        rule_id = %rule.rule_id,
                        pattern_index = idx,
                        error = %err,
                        "pattern skipped",
                    );
                }
            }
        }

        if matches.is_empty() {
            return None;
        }

        let confidence = scaled_confidence(
            rule.base_confidence,
            matches.len(),
            unique_patterns_matched,
            rule.patterns.len(),
            &matches,
        );

        Some(Detection {
            rule_id: rule.rule_id.clone(),
            version: rule.version.clone(),
            severity: rule.severity,
            confidence,
            matches,
            timestamp: now_iso8601(),
            layer: Layer::L1,
            layer_latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            category: rule.category(),
            message: truncate(&rule.description, 100),
            explanation: rule.explanation.clone(),
            remediation: rule.remediation.clone(),
            docs_url: rule.docs_url.clone(),
            is_flagged: false,
            suppression_reason: None,
        })
    }

    /// Run every rule in `rules` against `text`, producing a [`ScanResult`].
    /// `rules_checked` counts every rule attempted, whether or not it fired.
    pub async fn execute_rules(&self, text: &str, rules: &[Rule]) -> ScanResult {
        let scan_start = std::time::Instant::now();
        let scan_started_at = now_iso8601();

        let mut detections = Vec::new();
        for rule in rules {
            if let Some(detection) = self.execute_rule(text, rule).await {
                detections.push(detection);
            }
        }

        ScanResult {
            detections,
            scan_started_at,
            scanned_length: text.chars().count(),
            rules_checked: rules.len(),
            duration_ms: scan_start.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

fn scaled_confidence(
    base: f64,
    match_count: usize,
    unique_patterns_matched: usize,
    total_patterns: usize,
    matches: &[Match],
) -> f64 {
    let avg_match_length = if matches.is_empty() {
        0.0
    } else {
        matches.iter().map(|m| m.matched_text.chars().count()).sum::<usize>() as f64
            / matches.len() as f64
    };

    let quality = 0.4 * (match_count as f64 / 3.0).min(1.0)
        + 0.4 * (unique_patterns_matched as f64 / total_patterns.max(1) as f64).min(1.0)
        + 0.2 * (avg_match_length / 20.0).min(1.0);

    (base * (0.7 + 0.3 * quality)).clamp(0.0, 1.0)
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// Re-exported so callers matching on `MatcherError` don't need to reach
/// into [`crate::l1::matcher`] directly.
pub use crate::l1::matcher::MatcherError;
