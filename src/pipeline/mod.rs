//! The parallel L1 ‖ L2 scan pipeline and the resilience machinery it
//! runs behind: a circuit breaker and latency tracker for graceful
//! degradation.
//!
//! ```text
//! ScanPipeline::scan
//!   ├─► L1 RuleExecutor (bounded by a per-layer timeout)
//!   ├─► L2 classifier task (cancellable, raced against fail-fast)
//!   └─► merger::merge ──► CombinedScanResult (canonical detection order)
//! ```

pub mod breaker;
pub mod latency;
pub mod merger;
pub mod scan;

pub use breaker::{BreakerConfig, BreakerError, BreakerState, CircuitBreaker};
pub use latency::{LatencyPercentiles, LatencyTracker, adaptive_sample_interval};
pub use merger::{CombinedScanResult, ScanAction, merge};
pub use scan::{ScanMetrics, ScanPipeline};
