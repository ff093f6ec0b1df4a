//! Circuit breaker: a mutex-protected state struct with `thiserror`
//! errors and O(1) critical sections, guarding calls to a degradable
//! downstream (an L2 classifier, a telemetry sink).

use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors raised by the circuit breaker.
#[derive(Debug, Error)]
pub enum BreakerError {
    /// The breaker is open; the call was rejected without being attempted.
    #[error("circuit breaker is open")]
    Open,
}

/// Circuit breaker state (§3, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through normally.
    Closed,
    /// Calls are rejected immediately.
    Open,
    /// A limited number of probe calls are admitted.
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure: Option<Instant>,
    half_open_admitted: u32,
}

/// Thresholds governing state transitions (§4.10).
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures before CLOSED → OPEN.
    pub failure_threshold: u32,
    /// Time after the last failure before OPEN lazily becomes eligible for
    /// HALF_OPEN.
    pub reset_timeout: Duration,
    /// Max probe calls admitted while HALF_OPEN.
    pub half_open_requests: u32,
    /// Consecutive successes in HALF_OPEN before HALF_OPEN → CLOSED.
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_requests: 3,
            success_threshold: 2,
        }
    }
}

impl From<&crate::config::PerformanceConfig> for BreakerConfig {
    fn from(config: &crate::config::PerformanceConfig) -> Self {
        Self {
            failure_threshold: config.failure_threshold,
            reset_timeout: Duration::from_secs(config.reset_timeout_secs),
            half_open_requests: config.half_open_requests,
            success_threshold: config.success_threshold,
        }
    }
}

/// A concurrency-safe circuit breaker. State transitions are checked lazily
/// on each call — there is no background timer.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Construct a new breaker, starting CLOSED.
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure: None,
                half_open_admitted: 0,
            }),
        }
    }

    /// Current state, lazily advancing OPEN → HALF_OPEN if `reset_timeout`
    /// has elapsed since the last failure.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        let mut guard = self.inner.lock().expect("breaker mutex poisoned");
        self.advance_if_due(&mut guard);
        guard.state
    }

    fn advance_if_due(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            if let Some(last_failure) = inner.last_failure {
                if last_failure.elapsed() >= self.config.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_admitted = 0;
                    inner.consecutive_successes = 0;
                }
            }
        }
    }

    /// Ask permission to attempt a call. Returns [`BreakerError::Open`] if
    /// the breaker is OPEN, or if it's HALF_OPEN and the probe budget is
    /// already spent.
    ///
    /// # Errors
    ///
    /// Returns [`BreakerError::Open`] when the call should not proceed.
    pub fn try_acquire(&self) -> Result<(), BreakerError> {
        let mut guard = self.inner.lock().expect("breaker mutex poisoned");
        self.advance_if_due(&mut guard);

        match guard.state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => Err(BreakerError::Open),
            BreakerState::HalfOpen => {
                if guard.half_open_admitted < self.config.half_open_requests {
                    guard.half_open_admitted += 1;
                    Ok(())
                } else {
                    Err(BreakerError::Open)
                }
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut guard = self.inner.lock().expect("breaker mutex poisoned");
        match guard.state {
            BreakerState::Closed => {
                guard.consecutive_failures = 0;
            }
            BreakerState::HalfOpen => {
                guard.consecutive_successes += 1;
                if guard.consecutive_successes >= self.config.success_threshold {
                    guard.state = BreakerState::Closed;
                    guard.consecutive_failures = 0;
                    guard.consecutive_successes = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut guard = self.inner.lock().expect("breaker mutex poisoned");
        guard.last_failure = Some(Instant::now());
        match guard.state {
            BreakerState::Closed => {
                guard.consecutive_failures += 1;
                if guard.consecutive_failures >= self.config.failure_threshold {
                    guard.state = BreakerState::Open;
                }
            }
            BreakerState::HalfOpen => {
                guard.state = BreakerState::Open;
                guard.consecutive_successes = 0;
            }
            BreakerState::Open => {}
        }
    }
}
