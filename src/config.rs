//! Gateway configuration: compiled defaults, optional file load,
//! environment overrides, validation, covering every component's knobs.
//!
//! Resolution order (later wins): compiled defaults → config file (YAML,
//! TOML, or JSON) → environment variables from the closed `RAXE_*` set.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use validator::Validate;

/// Errors raised while building a [`GatewayConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file at {path}: {source}")]
    FileRead {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file.
    #[error("failed to parse {format} config: {source}")]
    ParseError {
        /// Format that failed to parse (YAML, TOML, JSON).
        format: String,
        /// Underlying parse error.
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Unsupported or unrecognised configuration file extension.
    #[error("unsupported config file format: {message}")]
    UnsupportedFormat {
        /// Description of the problem.
        message: String,
    },

    /// Configuration validation failed.
    #[error("policy validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    /// An environment variable held a value that couldn't be parsed.
    #[error("failed to parse environment variable {key}: {message}")]
    EnvParse {
        /// Environment variable key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// Behaviour when a non-degradable stage fails entirely (distinct from the
/// per-layer timeout substitution of the scan pipeline itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailMode {
    /// Block the request and return an error.
    Closed,
    /// Allow the request but log the security event.
    Open,
    /// Log the event and continue (audit mode).
    LogOnly,
}

impl Default for FailMode {
    fn default() -> Self {
        Self::Closed
    }
}

/// Scan pipeline mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// L1 only.
    Fast,
    /// L1 + L2 concurrent.
    Balanced,
    /// L1 + L2 concurrent, strict timeout budget.
    Thorough,
}

impl Default for ScanMode {
    fn default() -> Self {
        Self::Balanced
    }
}

/// Degradation mode for the circuit breaker / performance monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationMode {
    /// Bypass scanning while the breaker is open.
    FailOpen,
    /// Always scan; errors surface to the caller.
    FailClosed,
    /// Scan every kth request.
    Sample,
    /// Double the sample interval when p95 exceeds the latency threshold.
    Adaptive,
}

impl Default for DegradationMode {
    fn default() -> Self {
        Self::FailClosed
    }
}

/// L1 pattern-matching knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct L1Config {
    /// Default per-pattern timeout in milliseconds (§4.1 default 5 s).
    #[validate(range(min = 1))]
    pub default_pattern_timeout_ms: u64,
    /// Layer timeout for the full L1 pass (§4.8 default 10 ms).
    #[validate(range(min = 1))]
    pub layer_timeout_ms: u64,
}

impl Default for L1Config {
    fn default() -> Self {
        Self {
            default_pattern_timeout_ms: 5_000,
            layer_timeout_ms: 10,
        }
    }
}

/// L2 classifier knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct L2Config {
    /// Whether the L2 layer runs at all.
    pub enabled: bool,
    /// Whether to use the production (ONNX) classifier over the stub.
    pub use_production: bool,
    /// Layer timeout in milliseconds (§4.8 default 150 ms).
    #[validate(range(min = 1))]
    pub layer_timeout_ms: u64,
    /// Named voting preset (`balanced`, `high_security`, `low_fp`, `harm_focused`).
    pub voting_preset: String,
    /// Whether the voting engine is authoritative over the legacy ensemble
    /// strategies (Open Question decision #2).
    pub voting_enabled: bool,
}

impl Default for L2Config {
    fn default() -> Self {
        Self {
            enabled: true,
            use_production: false,
            layer_timeout_ms: 150,
            voting_preset: "balanced".to_string(),
            voting_enabled: true,
        }
    }
}

/// Scan pipeline orchestration knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ScanConfig {
    /// Pipeline mode.
    pub mode: ScanMode,
    /// Cancel L2 when L1 already found a high-confidence CRITICAL.
    pub fail_fast_on_critical: bool,
    /// Minimum confidence among CRITICAL detections to trigger fail-fast.
    #[validate(range(min = 0.0, max = 1.0))]
    pub min_confidence_for_skip: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            mode: ScanMode::default(),
            fail_fast_on_critical: true,
            min_confidence_for_skip: 0.7,
        }
    }
}

/// Circuit breaker / latency tracker knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PerformanceConfig {
    /// Consecutive failures before the breaker opens.
    #[validate(range(min = 1))]
    pub failure_threshold: u32,
    /// Seconds before an OPEN breaker transitions to HALF_OPEN.
    #[validate(range(min = 1))]
    pub reset_timeout_secs: u64,
    /// Probes admitted while HALF_OPEN.
    #[validate(range(min = 1))]
    pub half_open_requests: u32,
    /// Consecutive HALF_OPEN successes required to close the breaker.
    #[validate(range(min = 1))]
    pub success_threshold: u32,
    /// Degradation mode applied while the breaker is open.
    pub degradation_mode: DegradationMode,
    /// Rolling window size for the latency tracker.
    #[validate(range(min = 1))]
    pub latency_window: usize,
    /// p95 threshold (ms) above which `adaptive` mode doubles the sample interval.
    #[validate(range(min = 1))]
    pub latency_threshold_ms: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_secs: 30,
            half_open_requests: 3,
            success_threshold: 2,
            degradation_mode: DegradationMode::default(),
            latency_window: 1_000,
            latency_threshold_ms: 200,
        }
    }
}

/// Telemetry subsystem knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TelemetryConfig {
    /// Master enable switch.
    pub enabled: bool,
    /// Critical-queue bound.
    #[validate(range(min = 1))]
    pub critical_queue_max: usize,
    /// Standard-queue bound.
    #[validate(range(min = 1))]
    pub standard_queue_max: usize,
    /// Clean-queue batch size cap.
    #[validate(range(min = 1))]
    pub batch_size: usize,
    /// Clean-queue batch window, seconds.
    #[validate(range(min = 1))]
    pub batch_window_secs: u64,
    /// Retry attempts for remote sends.
    #[validate(range(min = 0))]
    pub retries: u32,
    /// Initial backoff, milliseconds.
    #[validate(range(min = 1))]
    pub initial_backoff_ms: u64,
    /// Backoff multiplier.
    pub backoff_multiplier: f64,
    /// Backoff cap, milliseconds.
    #[validate(range(min = 1))]
    pub backoff_cap_ms: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            critical_queue_max: 10_000,
            standard_queue_max: 50_000,
            batch_size: 50,
            batch_window_secs: 300,
            retries: 3,
            initial_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            backoff_cap_ms: 30_000,
        }
    }
}

/// Webhook signer knobs.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WebhookConfig {
    /// Maximum allowed clock skew for replay protection, seconds.
    #[validate(range(min = 1))]
    pub max_age_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self { max_age_secs: 300 }
    }
}

/// The top-level, validated gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GatewayConfig {
    /// Config schema version for compatibility tracking.
    #[validate(length(min = 1))]
    pub version: String,
    /// Global enable/disable flag.
    pub enabled: bool,
    /// Failure behaviour for non-degradable stage errors.
    pub fail_mode: FailMode,
    /// L1 knobs.
    #[validate(nested)]
    pub l1: L1Config,
    /// L2 knobs.
    #[validate(nested)]
    pub l2: L2Config,
    /// Scan orchestration knobs.
    #[validate(nested)]
    pub scan: ScanConfig,
    /// Circuit breaker / latency knobs.
    #[validate(nested)]
    pub performance: PerformanceConfig,
    /// Telemetry knobs.
    #[validate(nested)]
    pub telemetry: TelemetryConfig,
    /// Webhook knobs.
    #[validate(nested)]
    pub webhook: WebhookConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            enabled: true,
            fail_mode: FailMode::default(),
            l1: L1Config::default(),
            l2: L2Config::default(),
            scan: ScanConfig::default(),
            performance: PerformanceConfig::default(),
            telemetry: TelemetryConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

/// Builder for constructing a [`GatewayConfig`] from multiple sources.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    base: GatewayConfig,
    use_env: bool,
}

impl ConfigBuilder {
    /// Start from compiled, secure defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: GatewayConfig::default(),
            use_env: false,
        }
    }

    /// Load configuration from a file (YAML, TOML, or JSON), replacing the
    /// base entirely.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let config: GatewayConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => {
                serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError {
                    format: "YAML".to_string(),
                    source: Box::new(e),
                })?
            }
            Some("toml") => toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                format: "TOML".to_string(),
                source: Box::new(e),
            })?,
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| ConfigError::ParseError {
                    format: "JSON".to_string(),
                    source: Box::new(e),
                })?
            }
            _ => {
                return Err(ConfigError::UnsupportedFormat {
                    message: "file extension must be .yaml, .yml, .toml, or .json".to_string(),
                });
            }
        };

        self.base = config;
        Ok(self)
    }

    /// Enable loading overrides from `RAXE_*` environment variables.
    #[must_use]
    pub fn with_env(mut self) -> Self {
        self.use_env = true;
        self
    }

    /// Build and validate the final configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if validation fails or an environment
    /// variable holds an unparsable value.
    pub fn build(mut self) -> Result<GatewayConfig, ConfigError> {
        if self.use_env {
            dotenvy::dotenv().ok();
            self.apply_env()?;
        }
        self.base.validate()?;
        Ok(self.base)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("RAXE_ENABLE_L2") {
            self.base.l2.enabled = parse_bool("RAXE_ENABLE_L2", &v)?;
        }
        if let Ok(v) = std::env::var("RAXE_USE_PRODUCTION_L2") {
            self.base.l2.use_production = parse_bool("RAXE_USE_PRODUCTION_L2", &v)?;
        }
        if let Ok(v) = std::env::var("RAXE_FAIL_FAST_ON_CRITICAL") {
            self.base.scan.fail_fast_on_critical = parse_bool("RAXE_FAIL_FAST_ON_CRITICAL", &v)?;
        }
        if let Ok(v) = std::env::var("RAXE_MIN_CONFIDENCE_FOR_SKIP") {
            self.base.scan.min_confidence_for_skip =
                v.parse().map_err(|_| ConfigError::EnvParse {
                    key: "RAXE_MIN_CONFIDENCE_FOR_SKIP".to_string(),
                    message: "must be a float in [0,1]".to_string(),
                })?;
        }
        if let Ok(v) = std::env::var("RAXE_TELEMETRY_ENABLED") {
            self.base.telemetry.enabled = parse_bool("RAXE_TELEMETRY_ENABLED", &v)?;
        }
        if let Ok(v) = std::env::var("RAXE_L2_VOTING_ENABLED") {
            self.base.l2.voting_enabled = parse_bool("RAXE_L2_VOTING_ENABLED", &v)?;
        }
        if let Ok(v) = std::env::var("RAXE_L2_VOTING_PRESET") {
            self.base.l2.voting_preset = v;
        }
        if let Ok(v) = std::env::var("RAXE_PERFORMANCE_MODE") {
            self.base.performance.degradation_mode = match v.to_ascii_lowercase().as_str() {
                "fail_open" => DegradationMode::FailOpen,
                "fail_closed" => DegradationMode::FailClosed,
                "sample" => DegradationMode::Sample,
                "adaptive" => DegradationMode::Adaptive,
                _ => {
                    return Err(ConfigError::EnvParse {
                        key: "RAXE_PERFORMANCE_MODE".to_string(),
                        message: "must be fail_open, fail_closed, sample, or adaptive".to_string(),
                    });
                }
            };
        }
        Ok(())
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    raw.parse().map_err(|_| ConfigError::EnvParse {
        key: key.to_string(),
        message: "must be 'true' or 'false'".to_string(),
    })
}
