//! Crate-wide error composition.
//!
//! Each component that can fail synchronously owns a narrow `thiserror`
//! enum; [`GatewayError`] composes them at the facade boundary into a
//! single caller-facing type.

use crate::l1::executor::MatcherError;
use crate::l2::voting::VotingError;
use crate::packs::loader::PackError;
use crate::pipeline::breaker::BreakerError;
use crate::policy::suppression::SuppressionError;
use crate::telemetry::webhook::WebhookError;
use thiserror::Error;

/// Top-level error returned by the public facade.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Input validation failed (e.g. empty text).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A rule pack failed to load.
    #[error(transparent)]
    Pack(#[from] PackError),

    /// A suppression pattern failed to parse or apply.
    #[error(transparent)]
    Suppression(#[from] SuppressionError),

    /// The voting engine could not aggregate head votes.
    #[error(transparent)]
    Voting(#[from] VotingError),

    /// The circuit breaker rejected the call.
    #[error(transparent)]
    Breaker(#[from] BreakerError),

    /// Webhook signing/verification failed.
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    /// The scan pipeline could not complete (layer timeout, task failure).
    #[error("scan pipeline error: {0}")]
    Pipeline(String),

    /// Config loading/validation failed.
    #[error("configuration error: {0}")]
    Config(String),

    /// The `protect` wrapper (or an agent-scanner caller) must short-circuit:
    /// carries the full combined result for the caller to inspect.
    #[error("blocked by security policy: {summary}")]
    SecurityThreat {
        /// Short human-readable summary of why the call was blocked.
        summary: String,
        /// The full combined scan result, serialised for inspection.
        result: Box<crate::pipeline::merger::CombinedScanResult>,
    },
}

impl From<MatcherError> for GatewayError {
    fn from(err: MatcherError) -> Self {
        GatewayError::Pipeline(err.to_string())
    }
}

/// Convenience alias used throughout the crate's public APIs.
pub type Result<T> = std::result::Result<T, GatewayError>;
