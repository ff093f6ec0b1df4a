//! Batch sender, retry/backoff, and sink dispatcher: a bounded-queue
//! fan-out dispatcher over per-sink channels, plus a retry policy with
//! exponential backoff, jitter, and a closed retryable-status set.

use rand::Rng;
use std::time::Duration;
use thiserror::Error;

use crate::pipeline::breaker::{BreakerConfig, CircuitBreaker};
use crate::telemetry::event::TelemetryEvent;

/// HTTP statuses that are safe to retry (§4.11).
const RETRYABLE_STATUSES: &[u16] = &[429, 500, 502, 503, 504];

/// Errors raised while sending telemetry.
#[derive(Debug, Error)]
pub enum SenderError {
    /// The circuit breaker is open; the send was not attempted.
    #[error("telemetry circuit breaker is open")]
    BreakerOpen,
    /// All retries were exhausted.
    #[error("telemetry send failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last error message.
        message: String,
    },
    /// The endpoint URL scheme is not allowed (must be HTTPS, or HTTP to
    /// localhost).
    #[error("telemetry endpoint must be https, or http to localhost: {0}")]
    InsecureEndpoint(String),
}

/// Retry/backoff configuration (§4.11).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum retry attempts after the first try.
    pub retries: u32,
    /// Initial backoff.
    pub initial_backoff: Duration,
    /// Multiplier applied to the backoff after each attempt.
    pub multiplier: f64,
    /// Jitter fraction applied symmetrically (`±fraction`).
    pub jitter_fraction: f64,
    /// Backoff ceiling.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { retries: 3, initial_backoff: Duration::from_secs(1), multiplier: 2.0, jitter_fraction: 0.10, cap: Duration::from_secs(30) }
    }
}

impl RetryPolicy {
    /// Backoff duration before retry attempt `attempt` (1-indexed), with
    /// jitter applied.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_secs_f64() * self.multiplier.powi(attempt as i32 - 1);
        let capped = base.min(self.cap.as_secs_f64());
        let jitter = capped * self.jitter_fraction;
        let jittered = rand::thread_rng().gen_range((capped - jitter).max(0.0)..=(capped + jitter));
        Duration::from_secs_f64(jittered)
    }
}

/// Validate that an endpoint is HTTPS, or HTTP only when targeting
/// localhost (§4.11 "Outbound HTTPS only (localhost http allowed)").
///
/// # Errors
///
/// Returns [`SenderError::InsecureEndpoint`] for any other scheme/host
/// combination.
pub fn validate_endpoint(url: &str) -> Result<(), SenderError> {
    if url.starts_with("https://") {
        return Ok(());
    }
    if let Some(rest) = url.strip_prefix("http://") {
        let host = rest.split(['/', ':']).next().unwrap_or("");
        if host == "localhost" || host == "127.0.0.1" || host == "::1" {
            return Ok(());
        }
    }
    Err(SenderError::InsecureEndpoint(url.to_string()))
}

/// Result of one outbound attempt, abstracted so the retry loop can be
/// tested without a real HTTP client.
pub enum AttemptOutcome {
    /// The send succeeded.
    Success,
    /// The send failed with an HTTP status, possibly retryable.
    HttpStatus(u16),
    /// A network-level failure (always retryable).
    NetworkError(String),
}

fn is_retryable(outcome: &AttemptOutcome) -> bool {
    match outcome {
        AttemptOutcome::Success => false,
        AttemptOutcome::HttpStatus(status) => RETRYABLE_STATUSES.contains(status),
        AttemptOutcome::NetworkError(_) => true,
    }
}

/// Drive `send_once` under the circuit breaker and retry policy. `send_once`
/// performs one physical attempt and reports its [`AttemptOutcome`].
///
/// # Errors
///
/// Returns [`SenderError::BreakerOpen`] if the breaker rejects the call, or
/// [`SenderError::RetriesExhausted`] once `policy.retries` retries have all
/// failed.
pub async fn send_with_retry<F, Fut>(breaker: &CircuitBreaker, policy: &RetryPolicy, mut send_once: F) -> Result<(), SenderError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = AttemptOutcome>,
{
    breaker.try_acquire().map_err(|_| SenderError::BreakerOpen)?;

    let mut last_message = String::new();
    for attempt in 0..=policy.retries {
        if attempt > 0 {
            tokio::time::sleep(policy.backoff_for_attempt(attempt)).await;
        }

        let outcome = send_once().await;
        match &outcome {
            AttemptOutcome::Success => {
                breaker.record_success();
                return Ok(());
            }
            AttemptOutcome::HttpStatus(status) => last_message = format!("HTTP {status}"),
            AttemptOutcome::NetworkError(msg) => last_message.clone_from(msg),
        }

        if !is_retryable(&outcome) {
            breaker.record_failure();
            return Err(SenderError::RetriesExhausted { attempts: attempt + 1, message: last_message });
        }
    }

    breaker.record_failure();
    Err(SenderError::RetriesExhausted { attempts: policy.retries + 1, message: last_message })
}

/// Construct a breaker tuned for telemetry sends from the shared
/// performance config.
#[must_use]
pub fn telemetry_breaker(config: &crate::config::PerformanceConfig) -> CircuitBreaker {
    CircuitBreaker::new(BreakerConfig::from(config))
}

/// A registered telemetry sink: global sinks receive every event, scoped
/// sinks only events whose `_mssp_context.customer_id` matches.
pub struct Sink {
    /// Sink name, for logging/metrics.
    pub name: String,
    /// If set, only events for this customer are delivered here.
    pub customer_scope: Option<String>,
    /// Bounded delivery queue; full queue drops and counts (§4.11).
    queue: tokio::sync::mpsc::Sender<TelemetryEvent>,
}

impl Sink {
    /// Construct a sink backed by a bounded mpsc channel of `capacity`.
    #[must_use]
    pub fn new(name: impl Into<String>, customer_scope: Option<String>, capacity: usize) -> (Self, tokio::sync::mpsc::Receiver<TelemetryEvent>) {
        let (tx, rx) = tokio::sync::mpsc::channel(capacity);
        (Self { name: name.into(), customer_scope, queue: tx }, rx)
    }

    fn accepts(&self, event: &TelemetryEvent) -> bool {
        match (&self.customer_scope, &event.mssp_context) {
            (None, _) => true,
            (Some(scope), Some(ctx)) => scope == &ctx.customer_id,
            (Some(_), None) => false,
        }
    }
}

/// Fans an event out to every registered sink that accepts it. Delivery is
/// fire-and-forget via each sink's bounded channel; a full channel drops
/// the event for that sink and increments `dropped`.
#[derive(Default)]
pub struct Dispatcher {
    sinks: Vec<Sink>,
    dropped: std::sync::atomic::AtomicU64,
}

impl Dispatcher {
    /// Construct an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink.
    pub fn register(&mut self, sink: Sink) {
        self.sinks.push(sink);
    }

    /// Fan `event` out to every accepting sink. Returns the number of
    /// sinks the event was delivered to.
    pub fn dispatch(&self, event: &TelemetryEvent) -> usize {
        let mut delivered = 0;
        for sink in &self.sinks {
            if !sink.accepts(event) {
                continue;
            }
            match sink.queue.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    self.dropped.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }
        }
        delivered
    }

    /// Total events dropped across all sinks due to a full queue.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::l2::voting::VotingResult;
    use crate::telemetry::event::{MsspContext, Priority};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn event_with_customer(customer_id: Option<&str>) -> TelemetryEvent {
        crate::telemetry::event::build_event(
            "scan.completed",
            "hello",
            &[],
            None::<&VotingResult>,
            1.0,
            crate::pipeline::merger::ScanAction::Log,
            "facade",
            customer_id.map(|id| MsspContext {
                mssp_id: "mssp-1".to_string(),
                customer_id: id.to_string(),
                app_id: "app-1".to_string(),
                agent_id: None,
                data_mode: crate::telemetry::event::DataMode::PrivacySafe,
                allow_list: vec![],
            }),
        )
    }

    #[test]
    fn https_endpoint_is_valid() {
        assert!(validate_endpoint("https://telemetry.example.com/v1/events").is_ok());
    }

    #[test]
    fn http_localhost_is_valid() {
        assert!(validate_endpoint("http://localhost:8080/events").is_ok());
    }

    #[test]
    fn http_remote_host_is_rejected() {
        assert!(validate_endpoint("http://telemetry.example.com/events").is_err());
    }

    #[test]
    fn backoff_grows_and_respects_cap() {
        let policy = RetryPolicy::default();
        let first = policy.backoff_for_attempt(1).as_secs_f64();
        let third = policy.backoff_for_attempt(3).as_secs_f64();
        assert!(third > first);
        assert!(third <= policy.cap.as_secs_f64() * 1.1);
    }

    #[tokio::test]
    async fn success_on_first_attempt_records_breaker_success() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        let result = send_with_retry(&breaker, &RetryPolicy { retries: 0, initial_backoff: Duration::from_millis(1), ..RetryPolicy::default() }, || async {
            AttemptOutcome::Success
        })
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn retryable_failures_exhaust_and_record_breaker_failure() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        let policy = RetryPolicy { retries: 2, initial_backoff: Duration::from_millis(1), cap: Duration::from_millis(5), ..RetryPolicy::default() };
        let attempts = AtomicU32::new(0);
        let result = send_with_retry(&breaker, &policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { AttemptOutcome::HttpStatus(503) }
        })
        .await;
        assert!(matches!(result, Err(SenderError::RetriesExhausted { attempts: 3, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_status_fails_fast() {
        let breaker = CircuitBreaker::new(BreakerConfig::default());
        let policy = RetryPolicy { retries: 3, initial_backoff: Duration::from_millis(1), ..RetryPolicy::default() };
        let attempts = AtomicU32::new(0);
        let result = send_with_retry(&breaker, &policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { AttemptOutcome::HttpStatus(400) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatcher_delivers_only_to_matching_customer_scope() {
        let mut dispatcher = Dispatcher::new();
        let (global_sink, mut global_rx) = Sink::new("global", None, 8);
        let (scoped_sink, mut scoped_rx) = Sink::new("scoped", Some("cust-1".to_string()), 8);
        dispatcher.register(global_sink);
        dispatcher.register(scoped_sink);

        let event = event_with_customer(Some("cust-2"));
        let delivered = dispatcher.dispatch(&event);

        assert_eq!(delivered, 1);
        assert!(global_rx.try_recv().is_ok());
        assert!(scoped_rx.try_recv().is_err());
    }

    #[test]
    fn dispatcher_counts_drops_on_full_queue() {
        let mut dispatcher = Dispatcher::new();
        let (sink, _rx) = Sink::new("tiny", None, 1);
        dispatcher.register(sink);

        let event = event_with_customer(None);
        dispatcher.dispatch(&event);
        dispatcher.dispatch(&event);

        assert_eq!(dispatcher.dropped_count(), 1);
    }
}
