//! Parallel L1 ‖ L2 scan pipeline: L1 and L2 run on independent
//! CPU-bound paths (regex vs. tensor math) and race rather than chain,
//! each bounded by its own timeout and a shared fail-fast path.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::{GatewayConfig, ScanMode};
use crate::error::GatewayError;
use crate::l1::executor::{RuleExecutor, ScanResult};
use crate::l2::adapter::{L2Classifier, classify_with_deadline};
use crate::l2::voting::{self, VotingConfig, VotingResult};
use crate::model::{Severity, now_iso8601};
use crate::packs::model::Rule;
use crate::packs::registry::PackRegistry;
use crate::pipeline::merger::{self, CombinedScanResult};
use crate::policy::evaluator::{Policy, PolicyEvaluator};
use crate::policy::suppression::{Suppression, SuppressionManager};

/// Per-scan timing and concurrency metrics (§4.8 "Metrics recorded per
/// scan").
#[derive(Debug, Clone, Copy)]
pub struct ScanMetrics {
    /// Wall-clock time L1 spent running (or waiting out its deadline).
    pub l1_duration_ms: f64,
    /// Wall-clock time L2 spent running, if it ran to completion.
    pub l2_duration_ms: Option<f64>,
    /// Whether L2 was cancelled by the fail-fast decision.
    pub l2_cancelled: bool,
    /// Whether L2's own deadline elapsed before it produced a result.
    pub l2_timeout: bool,
    /// `(l1 + l2) / max(l1, l2)`; `1.0` when L2 didn't run.
    pub parallel_speedup: f64,
    /// Total wall-clock duration of the whole scan.
    pub total_duration_ms: f64,
}

fn mode_flags(mode: ScanMode, l2_enabled: bool) -> (bool, bool) {
    match mode {
        ScanMode::Fast => (true, false),
        ScanMode::Balanced | ScanMode::Thorough => (true, l2_enabled),
    }
}

/// Orchestrates one L1 ‖ L2 scan, applies suppression, merges the results,
/// and evaluates policy.
pub struct ScanPipeline {
    executor: RuleExecutor,
    registry: Arc<PackRegistry>,
    classifier: Arc<dyn L2Classifier>,
    policy_evaluator: PolicyEvaluator,
    suppression: Mutex<SuppressionManager>,
}

impl ScanPipeline {
    /// Construct a pipeline over a shared rule registry and L2 backend,
    /// with no suppressions active.
    #[must_use]
    pub fn new(registry: Arc<PackRegistry>, classifier: Arc<dyn L2Classifier>) -> Self {
        Self {
            executor: RuleExecutor::new(),
            registry,
            classifier,
            policy_evaluator: PolicyEvaluator::new(),
            suppression: Mutex::new(SuppressionManager::new()),
        }
    }

    /// Replace the active suppression list (already merged from config and
    /// any inline overrides — see [`SuppressionManager::merge`]).
    #[must_use]
    pub fn with_suppressions(self, suppressions: Vec<Suppression>) -> Self {
        self.suppression.lock().expect("suppression mutex poisoned").set_suppressions(suppressions);
        self
    }

    /// Run one scan end to end: validate, snapshot rules, race L1/L2,
    /// apply suppression to L1 detections, merge, evaluate policy.
    /// Telemetry emission is the caller's responsibility — this method
    /// returns what there is to report.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Validation`] for empty input.
    pub async fn scan(
        &self,
        text: &str,
        config: &GatewayConfig,
        policies: &[Policy],
    ) -> Result<(CombinedScanResult, ScanMetrics), GatewayError> {
        if text.trim().is_empty() {
            return Err(GatewayError::Validation("scan text must not be empty".to_string()));
        }

        let (l1_enabled, l2_enabled) = mode_flags(config.scan.mode, config.l2.enabled);
        let rules: Vec<Rule> = if l1_enabled { self.registry.get_all_rules() } else { Vec::new() };

        let total_start = Instant::now();
        let cancel = CancellationToken::new();

        let l2_task = if l2_enabled {
            let classifier = Arc::clone(&self.classifier);
            let text = text.to_string();
            let deadline = Duration::from_millis(config.l2.layer_timeout_ms);
            let cancel_token = cancel.clone();
            Some(tokio::spawn(async move {
                tokio::select! {
                    biased;
                    () = cancel_token.cancelled() => None,
                    result = classify_with_deadline(classifier.as_ref(), &text, deadline) => Some(result),
                }
            }))
        } else {
            None
        };

        let l1_start = Instant::now();
        let l1_timeout = Duration::from_millis(config.l1.layer_timeout_ms);
        let mut l1_result = match tokio::time::timeout(l1_timeout, self.executor.execute_rules(text, &rules)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                tracing::warn!(timeout_ms = config.l1.layer_timeout_ms, "L1 layer deadline exceeded, substituting empty result");
                ScanResult {
                    detections: Vec::new(),
                    scan_started_at: now_iso8601(),
                    scanned_length: text.chars().count(),
                    rules_checked: 0,
                    duration_ms: l1_start.elapsed().as_secs_f64() * 1000.0,
                }
            }
        };
        let l1_duration_ms = l1_start.elapsed().as_secs_f64() * 1000.0;

        l1_result.detections = {
            let mut suppression = self.suppression.lock().expect("suppression mutex poisoned");
            suppression.apply(l1_result.detections)
        };

        let max_critical_confidence = l1_result
            .detections
            .iter()
            .filter(|d| d.severity == Severity::Critical)
            .map(|d| d.confidence)
            .fold(0.0_f64, f64::max);

        let fail_fast = config.scan.fail_fast_on_critical
            && l1_result.highest_severity() == Some(Severity::Critical)
            && max_critical_confidence >= config.scan.min_confidence_for_skip;

        let mut l2_cancelled = false;
        let mut l2_timeout = false;
        let mut l2_duration_ms = None;
        let mut l2_voting: Option<VotingResult> = None;

        if let Some(handle) = l2_task {
            if fail_fast {
                cancel.cancel();
                l2_cancelled = true;
                drop(handle);
            } else {
                let l2_start = Instant::now();
                match handle.await {
                    Ok(Some(Ok(classification))) => {
                        l2_duration_ms = Some(l2_start.elapsed().as_secs_f64() * 1000.0);
                        let voting_config = VotingConfig::preset(&config.l2.voting_preset)?;
                        l2_voting = Some(voting::vote(&classification, &voting_config));
                    }
                    Ok(Some(Err(crate::l2::adapter::ClassifierError::Timeout(_)))) => {
                        l2_timeout = true;
                    }
                    Ok(Some(Err(err))) => {
                        tracing::warn!(error = %err, "L2 classifier degraded, proceeding with L1 only");
                    }
                    Ok(None) => {
                        l2_cancelled = true;
                    }
                    Err(join_err) => {
                        tracing::warn!(error = %join_err, "L2 task panicked, proceeding with L1 only");
                    }
                }
            }
        }

        let policy_decisions = self.policy_evaluator.evaluate_batch(&l1_result.detections, policies).into_values().collect();

        let total_duration_ms = total_start.elapsed().as_secs_f64() * 1000.0;
        let parallel_speedup = match l2_duration_ms {
            Some(l2) if l1_duration_ms.max(l2) > 0.0 => (l1_duration_ms + l2) / l1_duration_ms.max(l2),
            _ => 1.0,
        };

        let combined = merger::merge(l1_result, l2_voting, policy_decisions, total_duration_ms);

        let metrics = ScanMetrics {
            l1_duration_ms,
            l2_duration_ms,
            l2_cancelled,
            l2_timeout,
            parallel_speedup,
            total_duration_ms,
        };

        Ok((combined, metrics))
    }
}
