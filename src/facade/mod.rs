//! Public entry points: the scan facade and the message-kind-aware agent
//! scanner built on top of it.

pub mod agent;
pub mod scan;

pub use agent::{AgentScanOutcome, AgentScanner, AgentScannerConfig, BlockingMode, MessageKind, ThreatCallback};
pub use scan::{Gateway, Protect, ScanOptions};
