//! L1 rule-based scanning: pattern compilation/matching and rule
//! execution.

pub mod executor;
pub mod matcher;

pub use executor::{Detection, Layer, MatcherError, RuleExecutor, ScanResult};
pub use matcher::{Match, PatternMatcher};
