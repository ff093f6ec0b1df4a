//! Agent heartbeat registry and liveness derivation.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Liveness status derived from an agent's last heartbeat (§4.13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// Heartbeat seen within `online_threshold`.
    Online,
    /// Heartbeat seen within `degraded_threshold` but not `online_threshold`.
    Degraded,
    /// No heartbeat within `degraded_threshold`.
    Offline,
}

/// Thresholds governing [`AgentStatus`] derivation.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatThresholds {
    /// Seconds since last heartbeat below which an agent is `online`.
    pub online_threshold_secs: u64,
    /// Seconds since last heartbeat below which an agent is `degraded`
    /// rather than `offline`.
    pub degraded_threshold_secs: u64,
}

impl Default for HeartbeatThresholds {
    fn default() -> Self {
        Self { online_threshold_secs: 120, degraded_threshold_secs: 300 }
    }
}

/// One agent's heartbeat record.
#[derive(Debug, Clone)]
pub struct AgentHeartbeat {
    /// Agent identifier.
    pub agent_id: String,
    /// Unix timestamp of the last heartbeat.
    pub last_seen_unix: u64,
    /// Agent-reported uptime, seconds.
    pub uptime_secs: u64,
    /// Agent-reported version string.
    pub version: String,
    /// Agent-reported platform string.
    pub platform: String,
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_secs()
}

/// Derive [`AgentStatus`] from a heartbeat's age given the current time.
#[must_use]
pub fn status_from_age(age_secs: u64, thresholds: &HeartbeatThresholds) -> AgentStatus {
    if age_secs <= thresholds.online_threshold_secs {
        AgentStatus::Online
    } else if age_secs <= thresholds.degraded_threshold_secs {
        AgentStatus::Degraded
    } else {
        AgentStatus::Offline
    }
}

/// Tracks agent heartbeats and derives liveness status (§4.13).
#[derive(Debug, Default)]
pub struct AgentRegistry {
    heartbeats: HashMap<String, AgentHeartbeat>,
    thresholds: HeartbeatThresholds,
}

impl AgentRegistry {
    /// Construct a registry with default thresholds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a registry with custom thresholds.
    #[must_use]
    pub fn with_thresholds(thresholds: HeartbeatThresholds) -> Self {
        Self { heartbeats: HashMap::new(), thresholds }
    }

    /// Record a heartbeat, stamped with the current time.
    pub fn record_heartbeat(&mut self, agent_id: impl Into<String>, uptime_secs: u64, version: impl Into<String>, platform: impl Into<String>) {
        let agent_id = agent_id.into();
        self.heartbeats.insert(
            agent_id.clone(),
            AgentHeartbeat { agent_id, last_seen_unix: now_unix(), uptime_secs, version: version.into(), platform: platform.into() },
        );
    }

    /// Current status for `agent_id`, or `None` if it has never
    /// heartbeated.
    #[must_use]
    pub fn status(&self, agent_id: &str) -> Option<AgentStatus> {
        let heartbeat = self.heartbeats.get(agent_id)?;
        let age = now_unix().saturating_sub(heartbeat.last_seen_unix);
        Some(status_from_age(age, &self.thresholds))
    }

    /// The stored heartbeat record for `agent_id`, if any.
    #[must_use]
    pub fn heartbeat(&self, agent_id: &str) -> Option<&AgentHeartbeat> {
        self.heartbeats.get(agent_id)
    }
}
