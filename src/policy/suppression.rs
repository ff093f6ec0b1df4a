//! Suppression manager: applies suppression rules to detections and
//! keeps an append-only audit log. Rule ids must start with a known
//! family prefix, matched as a family-prefixed glob.

use crate::l1::executor::Detection;
use crate::model::{Family, now_iso8601};
use thiserror::Error;

/// Errors raised while building or applying suppressions.
#[derive(Debug, Error)]
pub enum SuppressionError {
    /// A bare `*` pattern, which would suppress everything, is rejected.
    #[error("suppression pattern '*' is not allowed")]
    BareWildcard,

    /// A suffix-only wildcard (`*-suffix`) has no family prefix to anchor
    /// it, and is rejected.
    #[error("suppression pattern '{0}' must start with a known family prefix")]
    MissingFamilyPrefix(String),
}

/// What a matching suppression does to a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressionAction {
    /// Drop the detection entirely.
    Suppress,
    /// Keep the detection but mark it flagged.
    Flag,
    /// No-op on the detection; recorded for audit only.
    Log,
}

/// One suppression rule (§3 `Suppression`).
#[derive(Debug, Clone)]
pub struct Suppression {
    /// Exact rule id, family wildcard (`pi-*`), or glob (`enc-*-base64`).
    pub pattern: String,
    /// Action to take when this pattern matches a detection.
    pub action: SuppressionAction,
    /// Human-readable reason, recorded in the audit log and (for `Flag`) on
    /// the detection itself.
    pub reason: String,
    /// When this suppression was created.
    pub created_at: String,
    /// Who created it: `"cli"`, `"api"`, or `"inline"`.
    pub created_by: String,
    /// ISO-8601 expiry; suppressions past this instant are skipped.
    pub expires_at: Option<String>,
}

impl Suppression {
    /// Validate the pattern shape (§4.4): rejects a bare `*` and
    /// suffix-only wildcards that lack a known family prefix.
    ///
    /// # Errors
    ///
    /// Returns [`SuppressionError`] if the pattern is malformed.
    pub fn validate_pattern(pattern: &str) -> Result<(), SuppressionError> {
        if pattern == "*" {
            return Err(SuppressionError::BareWildcard);
        }
        if pattern.contains('*') {
            let prefix = pattern.split('-').next().unwrap_or("");
            if prefix.is_empty() || prefix == "*" || prefix.parse::<Family>().is_err() {
                return Err(SuppressionError::MissingFamilyPrefix(pattern.to_string()));
            }
        }
        Ok(())
    }
}

fn glob_match(pattern: &str, rule_id: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == rule_id;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let mut text = rule_id;

    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(part) {
                return false;
            }
            text = &text[part.len()..];
        } else if i == parts.len() - 1 {
            if !text.ends_with(part) {
                return false;
            }
        } else if let Some(pos) = text.find(part) {
            text = &text[pos + part.len()..];
        } else {
            return false;
        }
    }
    true
}

/// An audit-log entry (§4.4).
#[derive(Debug, Clone)]
pub struct AuditEntry {
    /// ISO-8601 UTC timestamp.
    pub timestamp: String,
    /// `"cli"`, `"api"`, or `"inline"`.
    pub actor: String,
    /// The pattern involved.
    pub pattern: String,
    /// The rule id the entry concerns, if any.
    pub rule_id: Option<String>,
    /// Human-readable reason/description.
    pub reason: String,
}

/// Holds an ordered list of [`Suppression`]s (config + inline, merged) and
/// an append-only audit log.
#[derive(Debug, Default)]
pub struct SuppressionManager {
    suppressions: Vec<Suppression>,
    audit_log: Vec<AuditEntry>,
}

impl SuppressionManager {
    /// Construct an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge config-file suppressions with inline (API-supplied) ones.
    /// Inline suppressions win on the same pattern (last-write-wins within
    /// the inline list); patterns that appear only in one list pass through
    /// unchanged. Pure function: calling it twice with the same inputs
    /// yields the same output.
    #[must_use]
    pub fn merge(config: &[Suppression], inline: &[Suppression]) -> Vec<Suppression> {
        let mut merged: Vec<Suppression> = config.to_vec();
        for inline_supp in inline {
            if let Some(existing) = merged.iter_mut().find(|s| s.pattern == inline_supp.pattern) {
                *existing = inline_supp.clone();
            } else {
                merged.push(inline_supp.clone());
            }
        }
        merged
    }

    /// Add a suppression, validating its pattern and recording the addition
    /// in the audit log.
    ///
    /// # Errors
    ///
    /// Returns [`SuppressionError`] if the pattern is malformed.
    pub fn add(&mut self, suppression: Suppression, actor: &str) -> Result<(), SuppressionError> {
        Suppression::validate_pattern(&suppression.pattern)?;
        self.audit_log.push(AuditEntry {
            timestamp: now_iso8601(),
            actor: actor.to_string(),
            pattern: suppression.pattern.clone(),
            rule_id: None,
            reason: suppression.reason.clone(),
        });
        self.suppressions.push(suppression);
        Ok(())
    }

    /// Remove every suppression matching `pattern`, recording the removal.
    pub fn remove(&mut self, pattern: &str, actor: &str) {
        self.suppressions.retain(|s| s.pattern != pattern);
        self.audit_log.push(AuditEntry {
            timestamp: now_iso8601(),
            actor: actor.to_string(),
            pattern: pattern.to_string(),
            rule_id: None,
            reason: "removed".to_string(),
        });
    }

    /// Apply all currently-loaded suppressions to `detections`, returning
    /// the transformed list. For each detection, the first non-expired
    /// suppression whose pattern matches the detection's `rule_id` wins.
    pub fn apply(&mut self, detections: Vec<Detection>) -> Vec<Detection> {
        let now = now_iso8601();
        let mut audit_additions = Vec::new();
        let mut out = Vec::with_capacity(detections.len());

        for mut detection in detections {
            let hit = self.suppressions.iter().find(|s| {
                !is_expired(s, &now) && glob_match(&s.pattern, &detection.rule_id)
            });

            match hit {
                Some(suppression) => {
                    audit_additions.push(AuditEntry {
                        timestamp: now_iso8601(),
                        actor: suppression.created_by.clone(),
                        pattern: suppression.pattern.clone(),
                        rule_id: Some(detection.rule_id.clone()),
                        reason: suppression.reason.clone(),
                    });
                    match suppression.action {
                        SuppressionAction::Suppress => continue,
                        SuppressionAction::Flag => {
                            detection.is_flagged = true;
                            detection.suppression_reason = Some(suppression.reason.clone());
                            out.push(detection);
                        }
                        SuppressionAction::Log => out.push(detection),
                    }
                }
                None => out.push(detection),
            }
        }

        self.audit_log.extend(audit_additions);
        out
    }

    /// Read-only view of the audit log.
    #[must_use]
    pub fn audit_log(&self) -> &[AuditEntry] {
        &self.audit_log
    }

    /// Replace the active suppression list wholesale (used when loading
    /// config + inline merged lists at startup).
    pub fn set_suppressions(&mut self, suppressions: Vec<Suppression>) {
        self.suppressions = suppressions;
    }
}

fn is_expired(suppression: &Suppression, now: &str) -> bool {
    match &suppression.expires_at {
        Some(expiry) => expiry.as_str() < now,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(rule_id: &str) -> Detection {
        Detection {
            rule_id: rule_id.to_string(),
            version: "1.0.0".to_string(),
            severity: crate::model::Severity::High,
            confidence: 0.8,
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

    fn suppression(pattern: &str, action: SuppressionAction) -> Suppression {
        Suppression {
            pattern: pattern.to_string(),
            action,
            reason: "test".to_string(),
            created_at: now_iso8601(),
            created_by: "inline".to_string(),
            expires_at: None,
        }
    }

    #[test]
    fn rejects_bare_wildcard() {
        assert!(matches!(
            Suppression::validate_pattern("*"),
            Err(SuppressionError::BareWildcard)
        ));
    }

    #[test]
    fn rejects_suffix_only_wildcard() {
        assert!(matches!(
            Suppression::validate_pattern("*-base64"),
            Err(SuppressionError::MissingFamilyPrefix(_))
        ));
    }

    #[test]
    fn accepts_family_prefixed_wildcard() {
        assert!(Suppression::validate_pattern("pi-*").is_ok());
        assert!(Suppression::validate_pattern("enc-*-base64").is_ok());
    }

    #[test]
    fn exact_pattern_suppresses() {
        let mut mgr = SuppressionManager::new();
        mgr.set_suppressions(vec![suppression("pi-001", SuppressionAction::Suppress)]);
        let out = mgr.apply(vec![detection("pi-001"), detection("pi-002")]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rule_id, "pi-002");
    }

    #[test]
    fn family_wildcard_flags() {
        let mut mgr = SuppressionManager::new();
        mgr.set_suppressions(vec![suppression("pi-*", SuppressionAction::Flag)]);
        let out = mgr.apply(vec![detection("pi-001")]);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_flagged);
        assert_eq!(out[0].suppression_reason.as_deref(), Some("test"));
    }

    #[test]
    fn log_action_keeps_detection_unflagged() {
        let mut mgr = SuppressionManager::new();
        mgr.set_suppressions(vec![suppression("pi-001", SuppressionAction::Log)]);
        let out = mgr.apply(vec![detection("pi-001")]);
        assert_eq!(out.len(), 1);
        assert!(!out[0].is_flagged);
    }

    #[test]
    fn inline_overrides_config_on_same_pattern() {
        let config = vec![suppression("pi-001", SuppressionAction::Log)];
        let inline = vec![suppression("pi-001", SuppressionAction::Suppress)];
        let merged = SuppressionManager::merge(&config, &inline);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].action, SuppressionAction::Suppress);
    }

    #[test]
    fn merge_is_pure_and_idempotent() {
        let config = vec![suppression("pi-001", SuppressionAction::Log)];
        let inline = vec![suppression("jb-001", SuppressionAction::Flag)];
        let a = SuppressionManager::merge(&config, &inline);
        let b = SuppressionManager::merge(&config, &inline);
        assert_eq!(a.len(), b.len());
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn expired_suppression_does_not_apply() {
        let mut mgr = SuppressionManager::new();
        let mut s = suppression("pi-001", SuppressionAction::Suppress);
        s.expires_at = Some("2000-01-01T00:00:00Z".to_string());
        mgr.set_suppressions(vec![s]);
        let out = mgr.apply(vec![detection("pi-001")]);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn add_records_audit_entry() {
        let mut mgr = SuppressionManager::new();
        mgr.add(suppression("pi-001", SuppressionAction::Suppress), "api")
            .unwrap();
        assert_eq!(mgr.audit_log().len(), 1);
        assert_eq!(mgr.audit_log()[0].actor, "api");
    }

    #[test]
    fn apply_records_audit_entry_per_match() {
        let mut mgr = SuppressionManager::new();
        mgr.set_suppressions(vec![suppression("pi-001", SuppressionAction::Suppress)]);
        mgr.apply(vec![detection("pi-001")]);
        assert_eq!(mgr.audit_log().len(), 1);
        assert_eq!(mgr.audit_log()[0].rule_id.as_deref(), Some("pi-001"));
    }
}
