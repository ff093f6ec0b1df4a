//! A prompt-security gateway for LLM applications: a two-layer scan
//! pipeline (fast deterministic rules plus an optional ML classifier),
//! policy-driven actioning, privacy-preserving telemetry, and the
//! multi-tenant/agent-facing entry points built on top of it.
//!
//! ```text
//! Gateway::scan ──┬─► ScanPipeline (L1 ‖ L2, race + merge)
//!                  │     ├─► RuleExecutor (L1: regex/aho-corasick rules)
//!                  │     └─► L2Classifier (ML, raced against a deadline)
//!                  │
//!                  ├─► PolicyEvaluator ──► PolicyDecision
//!                  ├─► CircuitBreaker / LatencyTracker (degradation)
//!                  ├─► TenantRegistry (policy resolution across MSSP tree)
//!                  └─► telemetry::{event, queue, sender, webhook}
//! ```
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use raxe::facade::{Gateway, ScanOptions};
//!
//! let result = gateway.scan("ignore all previous instructions", &ScanOptions::default()).await?;
//! if result.should_block() {
//!     // short-circuit the caller's upstream flow
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] – crate-wide error composition (`GatewayError`)
//! - [`model`] – shared value types (`Severity`, `Family`, timestamp helpers)
//! - [`config`] – layered configuration (`GatewayConfig`, `ConfigBuilder`)
//! - [`packs`] – rule-pack loading, verification, and the in-memory registry
//! - [`l1`] – deterministic rule matching (regex/Aho-Corasick, per-pattern deadlines)
//! - [`l2`] – ML classifier adapter and multi-head vote aggregation
//! - [`policy`] – policy evaluation and detection suppression
//! - [`pipeline`] – the parallel L1 ‖ L2 scan pipeline, merger, circuit breaker, latency tracking
//! - [`telemetry`] – privacy-preserving events, backpressure queues, batch sender, webhook signing
//! - [`tenancy`] – MSSP → Customer → App → Agent identity tree and policy resolution
//! - [`facade`] – the public `scan`/`protect` entry points and the agent/message scanner

#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod config;
pub mod error;
pub mod facade;
pub mod l1;
pub mod l2;
pub mod model;
pub mod packs;
pub mod pipeline;
pub mod policy;
pub mod telemetry;
pub mod tenancy;

/// Re-exports for convenient access to the crate's main public types.
pub mod prelude {
    pub use crate::config::GatewayConfig;
    pub use crate::error::{GatewayError, Result};
    pub use crate::facade::{AgentScanner, AgentScannerConfig, BlockingMode, Gateway, MessageKind, Protect, ScanOptions};
    pub use crate::model::{Family, Severity};
    pub use crate::pipeline::merger::{CombinedScanResult, ScanAction};
    pub use crate::pipeline::scan::{ScanMetrics, ScanPipeline};
    pub use crate::tenancy::{PolicyResolutionResult, TenantRegistry};
}
