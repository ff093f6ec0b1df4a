//! Rule-pack registry: keeps every loaded pack, resolves precedence
//! between `official`/`community`/`custom` packs that declare the same
//! rule id, and supports atomic hot-reload via `arc-swap`'s
//! "writers replace the pointer, readers observe a snapshot" pattern.

use crate::packs::loader::{LoadMode, PackError, load_pack};
use crate::packs::model::{Rule, RulePack, RulePackType};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Precedence order when two loaded packs declare the same `rule_id`.
/// Highest-precedence pack type wins; default is custom > community >
/// official (tenant overrides beat shared/official rules).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precedence(pub [RulePackType; 3]);

impl Default for Precedence {
    fn default() -> Self {
        Self([
            RulePackType::Custom,
            RulePackType::Community,
            RulePackType::Official,
        ])
    }
}

impl Precedence {
    fn rank(&self, pack_type: RulePackType) -> usize {
        self.0
            .iter()
            .position(|t| *t == pack_type)
            .unwrap_or(self.0.len())
    }
}

#[derive(Debug, Default)]
struct Snapshot {
    packs: HashMap<String, RulePack>,
}

/// In-memory registry of loaded rule packs, swappable atomically under
/// concurrent readers (§5: "writers replace pointer atomically; readers
/// observe snapshot").
pub struct PackRegistry {
    snapshot: ArcSwap<Snapshot>,
    root: PathBuf,
    precedence: Precedence,
}

impl PackRegistry {
    /// Create an empty registry rooted at `root` (expected layout:
    /// `<root>/<pack_type>/<pack_id>/<vX.Y.Z>/pack.yaml`).
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
            root: root.into(),
            precedence: Precedence::default(),
        }
    }

    /// Override the default custom > community > official precedence.
    #[must_use]
    pub fn with_precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }

    /// Load every pack under the registry root and install the result
    /// atomically, replacing whatever was previously loaded.
    ///
    /// # Errors
    ///
    /// Returns the first [`PackError`] encountered while loading a pack
    /// directory; partially loaded packs from earlier directories are
    /// discarded (no half-applied reload is ever published).
    pub fn reload_all(&self) -> Result<(), PackError> {
        let mut packs = HashMap::new();
        for pack_type_dir in ["custom", "community", "official"] {
            let type_root = self.root.join(pack_type_dir);
            if !type_root.is_dir() {
                continue;
            }
            for pack_dir in list_subdirs(&type_root) {
                for version_dir in latest_version_dir(&pack_dir) {
                    let pack = load_pack(&version_dir, LoadMode::Lenient)?;
                    packs.insert(pack.id().to_string(), pack);
                }
            }
        }
        self.snapshot.store(Arc::new(Snapshot { packs }));
        Ok(())
    }

    /// Install a single already-loaded pack directly (used by tests and by
    /// embedding code that constructs packs in memory rather than on disk).
    pub fn insert(&self, pack: RulePack) {
        let current = self.snapshot.load();
        let mut packs = current.packs.clone();
        packs.insert(pack.id().to_string(), pack);
        self.snapshot.store(Arc::new(Snapshot { packs }));
    }

    /// Resolve a rule by id across all loaded packs, honoring precedence
    /// when more than one pack declares it. Returns the highest-precedence
    /// pack's latest version of the rule.
    #[must_use]
    pub fn get_rule(&self, rule_id: &str) -> Option<Rule> {
        let snapshot = self.snapshot.load();
        snapshot
            .packs
            .values()
            .filter_map(|pack| pack.rule(rule_id).map(|r| (pack.manifest.pack_type, r)))
            .min_by_key(|(pack_type, _)| self.precedence.rank(*pack_type))
            .map(|(_, rule)| rule.clone())
    }

    /// Every rule, precedence-deduplicated: when two packs declare the same
    /// `rule_id`, only the highest-precedence pack's copy is returned.
    #[must_use]
    pub fn get_all_rules(&self) -> Vec<Rule> {
        let snapshot = self.snapshot.load();
        let mut best: HashMap<&str, (usize, &Rule)> = HashMap::new();
        for pack in snapshot.packs.values() {
            let rank = self.precedence.rank(pack.manifest.pack_type);
            for rule in &pack.rules {
                best.entry(rule.rule_id.as_str())
                    .and_modify(|(best_rank, best_rule)| {
                        if rank < *best_rank {
                            *best_rank = rank;
                            *best_rule = rule;
                        }
                    })
                    .or_insert((rank, rule));
            }
        }
        best.into_values().map(|(_, rule)| rule.clone()).collect()
    }

    /// Every rule from every loaded pack, including every version and every
    /// precedence-shadowed duplicate (used by admin/debug tooling).
    #[must_use]
    pub fn get_all_rules_with_versions(&self) -> Vec<Rule> {
        let snapshot = self.snapshot.load();
        snapshot
            .packs
            .values()
            .flat_map(|pack| pack.rules.iter().cloned())
            .collect()
    }

    /// Number of packs currently loaded.
    #[must_use]
    pub fn pack_count(&self) -> usize {
        self.snapshot.load().packs.len()
    }
}

fn list_subdirs(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.is_dir())
                .collect()
        })
        .unwrap_or_default()
}

/// Lexicographic semver sort over `vX.Y.Z` subdirectory names; returns the
/// highest version, if any exist.
fn latest_version_dir(pack_dir: &Path) -> Option<PathBuf> {
    let mut versions: Vec<(Vec<u32>, PathBuf)> = list_subdirs(pack_dir)
        .into_iter()
        .filter_map(|dir| {
            let name = dir.file_name()?.to_str()?.trim_start_matches('v').to_string();
            let parts: Option<Vec<u32>> = name.split('.').map(|p| p.parse().ok()).collect();
            parts.map(|parts| (parts, dir))
        })
        .collect();
    versions.sort_by(|a, b| a.0.cmp(&b.0));
    versions.pop().map(|(_, dir)| dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Family, Severity};
    use crate::packs::model::{ManifestRuleEntry, PackManifest, Pattern, RuleExamples};

    fn rule(id: &str) -> Rule {
        Rule {
            rule_id: id.to_string(),
            version: "1.0.0".to_string(),
            family: Family::Pi,
            sub_family: "x".to_string(),
            name: "x".to_string(),
            description: "x".to_string(),
            severity: Severity::Medium,
            base_confidence: 0.5,
            patterns: vec![Pattern::new("x")],
            examples: RuleExamples::default(),
            explanation: None,
            remediation: None,
            docs_url: None,
            mitre_attack: Vec::new(),
        }
    }

    fn pack(id: &str, pack_type: RulePackType, rule_ids: &[&str]) -> RulePack {
        let rules: Vec<Rule> = rule_ids.iter().map(|r| rule(r)).collect();
        RulePack {
            manifest: PackManifest {
                id: id.to_string(),
                version: "1.0.0".to_string(),
                name: id.to_string(),
                pack_type,
                schema_version: "1.1.0".to_string(),
                rules: rule_ids
                    .iter()
                    .map(|r| ManifestRuleEntry {
                        id: (*r).to_string(),
                        version: "1.0.0".to_string(),
                        path: format!("{r}.yaml"),
                    })
                    .collect(),
                metadata: Default::default(),
                signature: None,
                signature_algorithm: None,
            },
            rules,
        }
    }

    #[test]
    fn custom_pack_shadows_official_for_same_rule_id() {
        let registry = PackRegistry::new("/tmp/unused");
        registry.insert(pack("official-core", RulePackType::Official, &["pi-001"]));
        registry.insert(pack("custom-overrides", RulePackType::Custom, &["pi-001"]));

        let rules = registry.get_all_rules();
        assert_eq!(rules.len(), 1);

        let resolved = registry.get_rule("pi-001").unwrap();
        assert_eq!(resolved.rule_id, "pi-001");
    }

    #[test]
    fn get_all_rules_with_versions_keeps_every_copy() {
        let registry = PackRegistry::new("/tmp/unused");
        registry.insert(pack("official-core", RulePackType::Official, &["pi-001"]));
        registry.insert(pack("custom-overrides", RulePackType::Custom, &["pi-001"]));

        assert_eq!(registry.get_all_rules_with_versions().len(), 2);
    }

    #[test]
    fn unknown_rule_id_resolves_to_none() {
        let registry = PackRegistry::new("/tmp/unused");
        registry.insert(pack("official-core", RulePackType::Official, &["pi-001"]));
        assert!(registry.get_rule("does-not-exist").is_none());
    }

    #[test]
    fn pack_count_tracks_inserts() {
        let registry = PackRegistry::new("/tmp/unused");
        assert_eq!(registry.pack_count(), 0);
        registry.insert(pack("a", RulePackType::Official, &["pi-001"]));
        assert_eq!(registry.pack_count(), 1);
    }
}
