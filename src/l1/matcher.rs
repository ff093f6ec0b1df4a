//! Pattern compilation and matching: a `RegexSet` fast pass followed by
//! individual `Regex` re-search for span extraction, with a compile cache
//! and a deadline per match.

use crate::packs::model::{Pattern, PatternFlags};
use regex::Regex;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while compiling or running a pattern.
#[derive(Debug, Error)]
pub enum MatcherError {
    /// The regex source failed to compile.
    #[error("pattern '{source_text}' failed to compile: {reason}")]
    InvalidRegex {
        /// The offending regex source.
        source_text: String,
        /// Compiler error text.
        reason: String,
    },

    /// The match deadline elapsed. Treated as "rule skipped" by the caller.
    #[error("pattern match timed out after {0:?}")]
    Timeout(Duration),

    /// The blocking match task was lost (panicked or cancelled).
    #[error("pattern match task failed: {0}")]
    JoinError(String),
}

/// One regex hit (§3 `Match`). Immutable.
#[derive(Debug, Clone)]
pub struct Match {
    /// Index of the pattern, within the rule's pattern list, that matched.
    pub pattern_index: usize,
    /// Byte span of the match within the scanned text.
    pub span: Range<usize>,
    /// The matched text itself.
    pub matched_text: String,
    /// Captured groups, by index (group 0 omitted — that's `matched_text`).
    pub captures: Vec<Option<String>>,
    /// Up to 50 chars of context immediately before the match, clipped at
    /// text boundaries.
    pub context_before: String,
    /// Up to 50 chars of context immediately after the match, clipped at
    /// text boundaries.
    pub context_after: String,
}

const CONTEXT_WINDOW: usize = 50;

fn cache_key(pattern: &Pattern) -> (String, Vec<&'static str>) {
    (pattern.source.clone(), pattern.sorted_flag_key())
}

fn build_regex(pattern: &Pattern) -> Result<Regex, MatcherError> {
    let mut builder = regex::RegexBuilder::new(&pattern.source);
    for flag in &pattern.flags {
        match flag {
            PatternFlags::CaseInsensitive => {
                builder.case_insensitive(true);
            }
            PatternFlags::Multiline => {
                builder.multi_line(true);
            }
            PatternFlags::Dotall => {
                builder.dot_matches_new_line(true);
            }
        }
    }
    builder.build().map_err(|e| MatcherError::InvalidRegex {
        source_text: pattern.source.clone(),
        reason: e.to_string(),
    })
}

/// Compiles and caches [`regex::Regex`] instances, keyed by `(source, sorted
/// flags)` so declaration-order differences in flag lists never cause a
/// spurious cache miss.
#[derive(Debug, Default)]
pub struct PatternMatcher {
    cache: RwLock<HashMap<(String, Vec<&'static str>), Arc<Regex>>>,
}

impl PatternMatcher {
    /// Create an empty matcher with an empty compile cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile `pattern`, reusing a cached regex if this exact
    /// `(source, flags)` pair was compiled before.
    ///
    /// # Errors
    ///
    /// Returns [`MatcherError::InvalidRegex`] if the source fails to
    /// compile.
    pub fn compile(&self, pattern: &Pattern) -> Result<Arc<Regex>, MatcherError> {
        let key = cache_key(pattern);
        if let Some(hit) = self.cache.read().expect("cache lock poisoned").get(&key) {
            return Ok(Arc::clone(hit));
        }
        let compiled = Arc::new(build_regex(pattern)?);
        self.cache
            .write()
            .expect("cache lock poisoned")
            .insert(key, Arc::clone(&compiled));
        Ok(compiled)
    }

    /// Match `text` against `pattern` (identified by `pattern_index` within
    /// its owning rule), enforcing `pattern.timeout_seconds` as the
    /// deadline. Matching runs on the blocking pool since `regex` has no
    /// native per-call cancellation; on timeout the blocking task is left
    /// to finish on its own and a [`MatcherError::Timeout`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`MatcherError::InvalidRegex`], [`MatcherError::Timeout`], or
    /// [`MatcherError::JoinError`].
    pub async fn match_text(
        &self,
        text: &str,
        pattern: &Pattern,
        pattern_index: usize,
    ) -> Result<Vec<Match>, MatcherError> {
        let regex = self.compile(pattern)?;
        let text = text.to_string();
        let deadline = Duration::from_secs_f64(pattern.timeout_seconds.max(0.001));

        let handle =
            tokio::task::spawn_blocking(move || find_all(&regex, &text, pattern_index));

        match tokio::time::timeout(deadline, handle).await {
            Ok(Ok(matches)) => Ok(matches),
            Ok(Err(join_err)) => Err(MatcherError::JoinError(join_err.to_string())),
            Err(_elapsed) => Err(MatcherError::Timeout(deadline)),
        }
    }

    /// Match `text` against every pattern in `patterns`, OR-composing all
    /// hits into a single flat list (§4.1 `match_any`).
    ///
    /// # Errors
    ///
    /// Propagates the first [`MatcherError`] from any pattern; callers that
    /// want "skip the bad pattern, keep going" should call [`Self::match_text`]
    /// per pattern instead (this is what [`crate::l1::executor::RuleExecutor`]
    /// does).
    pub async fn match_any(
        &self,
        text: &str,
        patterns: &[Pattern],
    ) -> Result<Vec<Match>, MatcherError> {
        let mut all = Vec::new();
        for (idx, pattern) in patterns.iter().enumerate() {
            all.extend(self.match_text(text, pattern, idx).await?);
        }
        Ok(all)
    }
}

fn find_all(regex: &Regex, text: &str, pattern_index: usize) -> Vec<Match> {
    regex
        .captures_iter(text)
        .map(|caps| {
            let whole = caps.get(0).expect("capture group 0 always present");
            let span = whole.start()..whole.end();

            let context_before = char_clip_before(text, whole.start());
            let context_after = char_clip_after(text, whole.end());

            let captures = caps
                .iter()
                .skip(1)
                .map(|c| c.map(|m| m.as_str().to_string()))
                .collect();

            Match {
                pattern_index,
                span,
                matched_text: whole.as_str().to_string(),
                captures,
                context_before,
                context_after,
            }
        })
        .collect()
}

fn char_clip_before(text: &str, byte_pos: usize) -> String {
    let prefix = &text[..byte_pos];
    let start = prefix
        .char_indices()
        .rev()
        .nth(CONTEXT_WINDOW - 1)
        .map_or(0, |(i, _)| i);
    prefix[start..].to_string()
}

fn char_clip_after(text: &str, byte_pos: usize) -> String {
    let suffix = &text[byte_pos..];
    let end = suffix
        .char_indices()
        .nth(CONTEXT_WINDOW)
        .map_or(suffix.len(), |(i, _)| i);
    suffix[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matches_simple_pattern() {
        let matcher = PatternMatcher::new();
        let pattern = Pattern::new("ignore previous");
        let matches = matcher
            .match_text("please ignore previous instructions", &pattern, 0)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].matched_text, "ignore previous");
    }

    #[tokio::test]
    async fn case_insensitive_flag_respected() {
        let matcher = PatternMatcher::new();
        let pattern = Pattern::new("ignore previous").with_flags(vec![PatternFlags::CaseInsensitive]);
        let matches = matcher
            .match_text("IGNORE PREVIOUS instructions", &pattern, 0)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn invalid_regex_errors() {
        let matcher = PatternMatcher::new();
        let pattern = Pattern::new("(unclosed");
        let err = matcher.match_text("x", &pattern, 0).await.unwrap_err();
        assert!(matches!(err, MatcherError::InvalidRegex { .. }));
    }

    #[tokio::test]
    async fn compile_cache_reuses_identical_pattern() {
        let matcher = PatternMatcher::new();
        let a = Pattern::new("foo").with_flags(vec![PatternFlags::Multiline, PatternFlags::Dotall]);
        let b = Pattern::new("foo").with_flags(vec![PatternFlags::Dotall, PatternFlags::Multiline]);
        let ra = matcher.compile(&a).unwrap();
        let rb = matcher.compile(&b).unwrap();
        assert!(Arc::ptr_eq(&ra, &rb));
    }

    #[tokio::test]
    async fn context_window_clips_at_boundaries() {
        let matcher = PatternMatcher::new();
        let pattern = Pattern::new("hit");
        let matches = matcher.match_text("hit", &pattern, 0).await.unwrap();
        assert_eq!(matches[0].context_before, "");
        assert_eq!(matches[0].context_after, "");
    }

    #[tokio::test]
    async fn non_overlapping_left_to_right() {
        let matcher = PatternMatcher::new();
        let pattern = Pattern::new("aa");
        let matches = matcher.match_text("aaaa", &pattern, 0).await.unwrap();
        assert_eq!(matches.len(), 2);
    }

    #[tokio::test]
    async fn timeout_surfaces_as_timeout_error() {
        let matcher = PatternMatcher::new();
        let pattern = Pattern::new("a").with_timeout_seconds(0.000_001);
        let text = "a".repeat(1_000_000);
        let result = matcher.match_text(&text, &pattern, 0).await;
        // Either it finishes within the (absurdly short) deadline or times
        // out; both are acceptable, but if it errors it must be a timeout.
        if let Err(e) = result {
            assert!(matches!(e, MatcherError::Timeout(_)));
        }
    }
}
