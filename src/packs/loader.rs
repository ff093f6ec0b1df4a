//! Pack loader: reads a pack directory's manifest plus its referenced
//! rule files, cross-validating each against the manifest entry that names
//! it.

use crate::packs::model::{ManifestRuleEntry, PackManifest, Rule, RulePack};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading a single rule pack.
#[derive(Debug, Error)]
pub enum PackError {
    /// The manifest file could not be read.
    #[error("failed to read manifest at {path}: {source}")]
    ManifestRead {
        /// Manifest path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The manifest could not be parsed as YAML.
    #[error("failed to parse manifest at {path}: {source}")]
    ManifestParse {
        /// Manifest path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_yaml::Error,
    },

    /// A rule file referenced by the manifest is missing (strict mode only;
    /// lenient mode logs a warning and drops the entry instead).
    #[error("rule file missing for {rule_id}@{version} at {path}")]
    MissingRuleFile {
        /// Rule id from the manifest entry.
        rule_id: String,
        /// Rule version from the manifest entry.
        version: String,
        /// Expected path.
        path: PathBuf,
    },

    /// The loaded rule's own fields don't match its manifest entry.
    #[error("manifest entry {rule_id}@{version} does not match loaded rule {loaded_id}@{loaded_version}")]
    ManifestMismatch {
        /// Manifest-declared id.
        rule_id: String,
        /// Manifest-declared version.
        version: String,
        /// Rule file's own id.
        loaded_id: String,
        /// Rule file's own version.
        loaded_version: String,
    },

    /// The rule file failed to parse.
    #[error("failed to parse rule file at {path}: {source}")]
    RuleParse {
        /// Rule file path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_yaml::Error,
    },

    /// The loaded rule violated its own invariants.
    #[error("rule at {path} is invalid: {reason}")]
    InvalidRule {
        /// Rule file path.
        path: PathBuf,
        /// Validation failure reason.
        reason: String,
    },
}

/// Whether to fail the whole pack on the first problem, or drop broken
/// entries with a logged warning (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Any missing file or mismatch fails the entire pack load.
    Strict,
    /// Missing files are logged and dropped; mismatches still fail.
    Lenient,
}

/// Load one rule pack from `pack_dir` (containing `pack.yaml` and the rule
/// files it references).
///
/// # Errors
///
/// Returns [`PackError`] if the manifest is unreadable/unparsable, or (in
/// [`LoadMode::Strict`]) if any referenced rule file is missing or its
/// fields disagree with the manifest entry that names it.
pub fn load_pack(pack_dir: impl AsRef<Path>, mode: LoadMode) -> Result<RulePack, PackError> {
    let pack_dir = pack_dir.as_ref();
    let manifest_path = pack_dir.join("pack.yaml");

    let manifest_raw =
        std::fs::read_to_string(&manifest_path).map_err(|source| PackError::ManifestRead {
            path: manifest_path.clone(),
            source,
        })?;
    let manifest: PackManifest =
        serde_yaml::from_str(&manifest_raw).map_err(|source| PackError::ManifestParse {
            path: manifest_path.clone(),
            source,
        })?;

    let mut rules = Vec::with_capacity(manifest.rules.len());
    for entry in &manifest.rules {
        match load_rule_file(pack_dir, entry, mode)? {
            Some(rule) => rules.push(rule),
            None => continue,
        }
    }

    Ok(RulePack { manifest, rules })
}

fn load_rule_file(
    pack_dir: &Path,
    entry: &ManifestRuleEntry,
    mode: LoadMode,
) -> Result<Option<Rule>, PackError> {
    let rule_path = pack_dir.join(&entry.path);
    let raw = match std::fs::read_to_string(&rule_path) {
        Ok(raw) => raw,
        Err(_) if mode == LoadMode::Lenient => {
            tracing::warn!(
                rule_id = entry.id,
                version = entry.version,
                path = %rule_path.display(),
                "rule file missing — dropped in lenient mode",
            );
            return Ok(None);
        }
        Err(_) => {
            return Err(PackError::MissingRuleFile {
                rule_id: entry.id.clone(),
                version: entry.version.clone(),
                path: rule_path,
            });
        }
    };

    let rule: Rule = serde_yaml::from_str(&raw).map_err(|source| PackError::RuleParse {
        path: rule_path.clone(),
        source,
    })?;

    if rule.rule_id != entry.id || rule.version != entry.version {
        return Err(PackError::ManifestMismatch {
            rule_id: entry.id.clone(),
            version: entry.version.clone(),
            loaded_id: rule.rule_id,
            loaded_version: rule.version,
        });
    }

    rule.validate().map_err(|reason| PackError::InvalidRule {
        path: rule_path.clone(),
        reason,
    })?;

    Ok(Some(rule))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Family, Severity};
    use crate::packs::model::{Pattern, RuleExamples};
    use std::io::Write;

    fn write_pack(dir: &Path) {
        std::fs::create_dir_all(dir.join("rules/PI")).unwrap();
        std::fs::write(
            dir.join("pack.yaml"),
            r#"
id: core
version: 1.0.0
name: Core Rules
type: OFFICIAL
schema_version: 1.1.0
rules:
  - id: pi-001
    version: 1.0.0
    path: rules/PI/pi-001@1.0.0.yaml
metadata: {}
"#,
        )
        .unwrap();

        let rule = Rule {
            rule_id: "pi-001".to_string(),
            version: "1.0.0".to_string(),
            family: Family::Pi,
            sub_family: "instruction-override".to_string(),
            name: "Test rule".to_string(),
            description: "desc".to_string(),
            severity: Severity::High,
            base_confidence: 0.8,
            patterns: vec![Pattern::new("ignore previous")],
            examples: RuleExamples::default(),
            explanation: None,
            remediation: None,
            docs_url: None,
            mitre_attack: Vec::new(),
        };
        let mut f = std::fs::File::create(dir.join("rules/PI/pi-001@1.0.0.yaml")).unwrap();
        f.write_all(serde_yaml::to_string(&rule).unwrap().as_bytes())
            .unwrap();
    }

    #[test]
    fn loads_a_valid_pack() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path());

        let pack = load_pack(dir.path(), LoadMode::Strict).unwrap();
        assert_eq!(pack.id(), "core");
        assert_eq!(pack.rules.len(), 1);
        assert_eq!(pack.rules[0].rule_id, "pi-001");
    }

    #[test]
    fn strict_mode_fails_on_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path());
        std::fs::remove_file(dir.path().join("rules/PI/pi-001@1.0.0.yaml")).unwrap();

        let err = load_pack(dir.path(), LoadMode::Strict).unwrap_err();
        assert!(matches!(err, PackError::MissingRuleFile { .. }));
    }

    #[test]
    fn lenient_mode_drops_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path());
        std::fs::remove_file(dir.path().join("rules/PI/pi-001@1.0.0.yaml")).unwrap();

        let pack = load_pack(dir.path(), LoadMode::Lenient).unwrap();
        assert!(pack.rules.is_empty());
    }

    #[test]
    fn mismatch_between_manifest_and_rule_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_pack(dir.path());
        std::fs::write(
            dir.path().join("rules/PI/pi-001@1.0.0.yaml"),
            serde_yaml::to_string(&Rule {
                rule_id: "pi-999".to_string(),
                version: "1.0.0".to_string(),
                family: Family::Pi,
                sub_family: "x".to_string(),
                name: "x".to_string(),
                description: "x".to_string(),
                severity: Severity::Low,
                base_confidence: 0.5,
                patterns: vec![Pattern::new("x")],
                examples: RuleExamples::default(),
                explanation: None,
                remediation: None,
                docs_url: None,
                mitre_attack: Vec::new(),
            })
            .unwrap(),
        )
        .unwrap();

        let err = load_pack(dir.path(), LoadMode::Lenient).unwrap_err();
        assert!(matches!(err, PackError::ManifestMismatch { .. }));
    }
}
