//! Telemetry: privacy-preserving event construction, backpressure-aware
//! queuing, batch/retry delivery, and outbound webhook signing.

pub mod event;
pub mod queue;
pub mod sender;
pub mod webhook;

pub use event::{build_event, hash_prompt, validate_privacy, DataMode, EventPayload, MsspContext, Priority, TelemetryEvent};
pub use queue::{calculate_backpressure, should_sample_event, BackpressureThresholds, EventQueues, PressureLevel, QueueMetrics};
pub use sender::{send_with_retry, telemetry_breaker, Dispatcher, RetryPolicy, SenderError, Sink};
pub use webhook::{generate_webhook_signature, verify_webhook_signature, WebhookError, WebhookSigner};
