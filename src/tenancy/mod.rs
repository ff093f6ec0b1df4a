//! Multi-tenant identity tree and policy resolution.

pub mod context;
pub mod registry;

pub use context::{App, Customer, Mssp, PolicyResolutionResult, ResolutionSource, TenancyError, TenantRegistry};
pub use registry::{AgentHeartbeat, AgentRegistry, AgentStatus, HeartbeatThresholds};
