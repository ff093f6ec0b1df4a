//! Value types for the rule/pack data model: [`Pattern`], [`Rule`],
//! [`RulePack`], carrying version, sub-family, examples, MITRE
//! technique ids, and remediation text alongside the matching patterns.

use crate::model::{Family, Severity};
use serde::{Deserialize, Serialize};

/// Regex flags a [`Pattern`] may declare. Closed set per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternFlags {
    /// Case-insensitive matching.
    CaseInsensitive,
    /// `^`/`$` match line boundaries, not just text boundaries.
    Multiline,
    /// `.` matches newlines too.
    Dotall,
}

/// A compiled regex spec owned by the [`Rule`] that declares it.
///
/// Invariant: `source` is non-empty; `timeout_seconds > 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    /// Regex source string.
    pub source: String,
    /// Declared flags (order-independent; used as part of the compile cache key).
    pub flags: Vec<PatternFlags>,
    /// Per-pattern timeout in seconds (default 5; §4.1).
    pub timeout_seconds: f64,
}

impl Pattern {
    /// Construct a pattern with the default 5-second timeout and no flags.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            flags: Vec::new(),
            timeout_seconds: 5.0,
        }
    }

    /// Builder: attach flags.
    #[must_use]
    pub fn with_flags(mut self, flags: Vec<PatternFlags>) -> Self {
        self.flags = flags;
        self
    }

    /// Builder: override the timeout.
    #[must_use]
    pub fn with_timeout_seconds(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Sorted flag list, used as part of the compile-cache key so that
    /// declaration order never produces a cache miss.
    #[must_use]
    pub fn sorted_flag_key(&self) -> Vec<&'static str> {
        let mut keys: Vec<&'static str> = self
            .flags
            .iter()
            .map(|f| match f {
                PatternFlags::CaseInsensitive => "i",
                PatternFlags::Multiline => "m",
                PatternFlags::Dotall => "s",
            })
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Validate the invariants declared in §3.
    pub fn validate(&self) -> Result<(), String> {
        if self.source.is_empty() {
            return Err("pattern source must be non-empty".to_string());
        }
        if self.timeout_seconds <= 0.0 {
            return Err("pattern timeout must be > 0".to_string());
        }
        Ok(())
    }
}

/// A positive/negative example used for a rule's self-test (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuleExamples {
    /// Inputs expected to trigger the rule.
    #[serde(default)]
    pub should_match: Vec<String>,
    /// Inputs expected NOT to trigger the rule.
    #[serde(default)]
    pub should_not_match: Vec<String>,
}

/// A detection unit (§3).
///
/// Invariant: `versioned_id()` is unique within a loaded configuration
/// (enforced by [`crate::packs::registry::PackRegistry`], not by the type
/// itself).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Stable identifier, e.g. `pi-001`. Non-empty.
    pub rule_id: String,
    /// Strict semver `MAJOR.MINOR.PATCH`.
    pub version: String,
    /// Coarse threat family.
    pub family: Family,
    /// Fine-grained sub-classification within the family. Non-empty.
    pub sub_family: String,
    /// Human-readable name.
    pub name: String,
    /// Longer description.
    pub description: String,
    /// Severity if the rule fires.
    pub severity: Severity,
    /// Base confidence in [0,1], scaled by match quality at execution time.
    pub base_confidence: f64,
    /// One or more patterns, OR-composed.
    pub patterns: Vec<Pattern>,
    /// Self-test examples.
    #[serde(default)]
    pub examples: RuleExamples,
    /// Human-facing risk explanation.
    #[serde(default)]
    pub explanation: Option<String>,
    /// Remediation advice.
    #[serde(default)]
    pub remediation: Option<String>,
    /// Docs URL.
    #[serde(default)]
    pub docs_url: Option<String>,
    /// Optional MITRE ATT&CK technique IDs; each must start with `"T"`.
    #[serde(default)]
    pub mitre_attack: Vec<String>,
}

impl Rule {
    /// `"{rule_id}@{version}"`.
    #[must_use]
    pub fn versioned_id(&self) -> String {
        format!("{}@{}", self.rule_id, self.version)
    }

    /// Validate this rule's declared invariants (§3). Does not validate
    /// cross-rule uniqueness — that is the registry's job.
    pub fn validate(&self) -> Result<(), String> {
        if self.rule_id.is_empty() {
            return Err("rule_id must be non-empty".to_string());
        }
        if !is_strict_semver(&self.version) {
            return Err(format!("version '{}' is not strict semver", self.version));
        }
        if self.sub_family.is_empty() {
            return Err("sub_family must be non-empty".to_string());
        }
        if !(0.0..=1.0).contains(&self.base_confidence) {
            return Err("base_confidence must be in [0,1]".to_string());
        }
        if self.patterns.is_empty() {
            return Err("rule must declare at least one pattern".to_string());
        }
        for pattern in &self.patterns {
            pattern.validate()?;
        }
        for technique in &self.mitre_attack {
            if !technique.starts_with('T') {
                return Err(format!(
                    "mitre_attack id '{technique}' must start with 'T'"
                ));
            }
        }
        Ok(())
    }

    /// Lowercased family string, used as the `Detection::category` derivation.
    #[must_use]
    pub fn category(&self) -> String {
        self.family.to_string().to_lowercase()
    }
}

fn is_strict_semver(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

/// Rule-pack type, part of the manifest (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RulePackType {
    /// Shipped with the gateway.
    Official,
    /// Community-contributed.
    Community,
    /// Tenant-authored.
    Custom,
}

/// One `(rule_id, version, path)` entry in a pack manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRuleEntry {
    /// Rule identifier.
    pub id: String,
    /// Rule version.
    pub version: String,
    /// Path to the rule file, relative to the pack directory.
    pub path: String,
}

/// A pack manifest (`pack.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackManifest {
    /// Pack identifier.
    pub id: String,
    /// Pack semver.
    pub version: String,
    /// Human name.
    pub name: String,
    /// Pack type.
    #[serde(rename = "type")]
    pub pack_type: RulePackType,
    /// Manifest schema version.
    pub schema_version: String,
    /// Declared rule entries.
    pub rules: Vec<ManifestRuleEntry>,
    /// Arbitrary metadata.
    #[serde(default)]
    pub metadata: std::collections::HashMap<String, serde_json::Value>,
    /// Optional manifest signature.
    #[serde(default)]
    pub signature: Option<String>,
    /// Signature algorithm, if signed.
    #[serde(default)]
    pub signature_algorithm: Option<String>,
}

/// Manifest + loaded rules (§3).
///
/// Invariant: every manifest entry has a corresponding loaded rule in
/// strict mode; lenient mode may drop entries whose file is missing.
#[derive(Debug, Clone)]
pub struct RulePack {
    /// The parsed manifest.
    pub manifest: PackManifest,
    /// Rules successfully loaded for this pack.
    pub rules: Vec<Rule>,
}

impl RulePack {
    /// Pack identifier, from the manifest.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.manifest.id
    }

    /// Pack version, from the manifest.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.manifest.version
    }

    /// Find a loaded rule by id (latest version present in this pack).
    #[must_use]
    pub fn rule(&self, rule_id: &str) -> Option<&Rule> {
        self.rules
            .iter()
            .filter(|r| r.rule_id == rule_id)
            .max_by(|a, b| a.version.cmp(&b.version))
    }
}

/// A handful of built-in rules shipped with the crate, enough to scan
/// out of the box before any external pack is loaded.
#[must_use]
pub fn builtin_rules() -> Vec<Rule> {
    macro_rules! rule {
        ($id:expr, $family:expr, $sub:expr, $name:expr, $severity:expr, $conf:expr, $pattern:expr) => {
            Rule {
                rule_id: $id.to_string(),
                version: "1.0.0".to_string(),
                family: $family,
                sub_family: $sub.to_string(),
                name: $name.to_string(),
                description: $name.to_string(),
                severity: $severity,
                base_confidence: $conf,
                patterns: vec![Pattern::new($pattern).with_flags(vec![PatternFlags::CaseInsensitive])],
                examples: RuleExamples::default(),
                explanation: None,
                remediation: None,
                docs_url: None,
                mitre_attack: Vec::new(),
            }
        };
    }

    vec![
        rule!(
            "pi-001",
            Family::Pi,
            "instruction-override",
            "Ignore previous instructions",
            Severity::High,
            0.85,
            r"ignore (all|any|the) (previous|prior|above) instructions?"
        ),
        rule!(
            "pi-002",
            Family::Pi,
            "role-confusion",
            "Fake system role injection",
            Severity::High,
            0.8,
            r"\byou are now\b.{0,40}\b(system|admin|developer)\b"
        ),
        rule!(
            "jb-001",
            Family::Jb,
            "dan-style",
            "DAN-style jailbreak framing",
            Severity::High,
            0.8,
            r"\b(do anything now|dan mode|jailbreak)\b"
        ),
        rule!(
            "sec-001",
            Family::Sec,
            "prompt-extraction",
            "System prompt extraction attempt",
            Severity::Medium,
            0.7,
            r"\b(reveal|show|print|repeat) (your|the) (system prompt|instructions)\b"
        ),
        rule!(
            "cmd-001",
            Family::Cmd,
            "shell-metachar",
            "Shell command injection metacharacters",
            Severity::Critical,
            0.75,
            r";\s*(rm|curl|wget|nc|bash|sh)\s"
        ),
        rule!(
            "enc-001",
            Family::Enc,
            "base64-blob",
            "Large base64-encoded payload",
            Severity::Low,
            0.5,
            r"[A-Za-z0-9+/]{80,}={0,2}"
        ),
        rule!(
            "pii-001",
            Family::Pii,
            "email",
            "Email address present",
            Severity::Low,
            0.6,
            r"[\w.+-]+@[\w-]+\.[a-zA-Z]{2,}"
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_semver_accepts_valid() {
        assert!(is_strict_semver("1.0.0"));
        assert!(is_strict_semver("10.20.30"));
    }

    #[test]
    fn strict_semver_rejects_invalid() {
        assert!(!is_strict_semver("1.0"));
        assert!(!is_strict_semver("1.0.0-beta"));
        assert!(!is_strict_semver("v1.0.0"));
    }

    #[test]
    fn rule_validate_rejects_empty_patterns() {
        let mut rule = builtin_rules().remove(0);
        rule.patterns.clear();
        assert!(rule.validate().is_err());
    }

    #[test]
    fn rule_validate_rejects_bad_mitre_id() {
        let mut rule = builtin_rules().remove(0);
        rule.mitre_attack.push("1190".to_string());
        assert!(rule.validate().is_err());
    }

    #[test]
    fn builtin_rules_all_valid() {
        for rule in builtin_rules() {
            rule.validate().unwrap_or_else(|e| panic!("{}: {e}", rule.rule_id));
        }
    }

    #[test]
    fn versioned_id_format() {
        let rule = builtin_rules().remove(0);
        assert_eq!(rule.versioned_id(), "pi-001@1.0.0");
    }

    #[test]
    fn pattern_flag_key_is_order_independent() {
        let a = Pattern::new("x").with_flags(vec![PatternFlags::Multiline, PatternFlags::Dotall]);
        let b = Pattern::new("x").with_flags(vec![PatternFlags::Dotall, PatternFlags::Multiline]);
        assert_eq!(a.sorted_flag_key(), b.sorted_flag_key());
    }

}
