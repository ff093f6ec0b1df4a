//! Backpressure calculation and the dual-priority event queues: fixed
//! fill-level thresholds drive a pressure level, which in turn drives
//! sampling of low-priority events under load.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::telemetry::event::{Priority, TelemetryEvent};

/// Immutable snapshot of queue fill state (§9.5).
#[derive(Debug, Clone, Copy)]
pub struct QueueMetrics {
    /// Current critical-queue occupancy.
    pub critical_queue_size: usize,
    /// Current standard-queue occupancy.
    pub standard_queue_size: usize,
    /// Critical-queue capacity.
    pub critical_queue_max: usize,
    /// Standard-queue capacity.
    pub standard_queue_max: usize,
}

impl QueueMetrics {
    /// Fill ratio of the critical queue, `0.0..=1.0+`.
    #[must_use]
    pub fn critical_fill_ratio(&self) -> f64 {
        self.critical_queue_size as f64 / self.critical_queue_max as f64
    }

    /// Fill ratio of the standard queue, `0.0..=1.0+`.
    #[must_use]
    pub fn standard_fill_ratio(&self) -> f64 {
        self.standard_queue_size as f64 / self.standard_queue_max as f64
    }
}

/// Thresholds governing when standard-event sampling kicks in (§9.5).
#[derive(Debug, Clone, Copy)]
pub struct BackpressureThresholds {
    /// Fill ratio at which moderate sampling begins.
    pub elevated_threshold: f64,
    /// Fill ratio at which aggressive sampling begins.
    pub critical_threshold: f64,
    /// Sample rate applied once `elevated_threshold` is crossed.
    pub elevated_sample_rate: f64,
    /// Sample rate applied once `critical_threshold` is crossed.
    pub critical_sample_rate: f64,
}

impl Default for BackpressureThresholds {
    fn default() -> Self {
        Self { elevated_threshold: 0.8, critical_threshold: 0.9, elevated_sample_rate: 0.5, critical_sample_rate: 0.2 }
    }
}

/// Current pressure level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureLevel {
    /// Below `elevated_threshold`.
    Normal,
    /// Between `elevated_threshold` and `critical_threshold`.
    Elevated,
    /// At or above `critical_threshold`.
    Critical,
}

/// The outcome of a backpressure calculation for one event.
#[derive(Debug, Clone, Copy)]
pub struct BackpressureDecision {
    /// Whether the event should be admitted to the queue at all.
    pub should_queue: bool,
    /// Sampling rate to apply (`1.0` = keep every event).
    pub sample_rate: f64,
    /// Current pressure level, for monitoring.
    pub pressure_level: PressureLevel,
}

fn pressure_level(fill_ratio: f64, thresholds: &BackpressureThresholds) -> PressureLevel {
    if fill_ratio >= thresholds.critical_threshold {
        PressureLevel::Critical
    } else if fill_ratio >= thresholds.elevated_threshold {
        PressureLevel::Elevated
    } else {
        PressureLevel::Normal
    }
}

/// Calculate whether to queue an event given current fill state. Critical
/// events are always queued (rule 1); standard events are sampled per
/// `thresholds` once the standard queue crosses `elevated_threshold` /
/// `critical_threshold`.
#[must_use]
pub fn calculate_backpressure(metrics: &QueueMetrics, is_critical_event: bool, thresholds: &BackpressureThresholds) -> BackpressureDecision {
    if is_critical_event {
        let fill_ratio = metrics.critical_fill_ratio();
        return BackpressureDecision { should_queue: true, sample_rate: 1.0, pressure_level: pressure_level(fill_ratio, thresholds) };
    }

    let fill_ratio = metrics.standard_fill_ratio();
    if fill_ratio >= 1.0 {
        return BackpressureDecision { should_queue: false, sample_rate: 0.0, pressure_level: PressureLevel::Critical };
    }
    if fill_ratio >= thresholds.critical_threshold {
        return BackpressureDecision { should_queue: true, sample_rate: thresholds.critical_sample_rate, pressure_level: PressureLevel::Critical };
    }
    if fill_ratio >= thresholds.elevated_threshold {
        return BackpressureDecision { should_queue: true, sample_rate: thresholds.elevated_sample_rate, pressure_level: PressureLevel::Elevated };
    }
    BackpressureDecision { should_queue: true, sample_rate: 1.0, pressure_level: PressureLevel::Normal }
}

/// Deterministically decide whether to keep an event given `sample_rate`
/// and a stable `event_hash` — the same hash always yields the same
/// decision (important for retry consistency).
#[must_use]
pub fn should_sample_event(sample_rate: f64, event_hash: &str) -> bool {
    if sample_rate >= 1.0 {
        return true;
    }
    if sample_rate <= 0.0 {
        return false;
    }

    let suffix = if event_hash.len() >= 8 { &event_hash[event_hash.len() - 8..] } else { event_hash };
    let hash_value = u32::from_str_radix(suffix, 16).unwrap_or_else(|_| suffix.bytes().map(u32::from).sum());

    let bucket = hash_value % 1000;
    let threshold = (sample_rate * 1000.0) as u32;
    bucket < threshold
}

/// Convenience: the sample rate alone, given current queue state.
#[must_use]
pub fn calculate_effective_sample_rate(metrics: &QueueMetrics, is_critical_event: bool, thresholds: &BackpressureThresholds) -> f64 {
    calculate_backpressure(metrics, is_critical_event, thresholds).sample_rate
}

/// A bounded FIFO. The critical queue never evicts; the standard queue
/// evicts its oldest element to admit a new one when full (§4.11).
#[derive(Debug)]
struct BoundedQueue {
    items: VecDeque<TelemetryEvent>,
    capacity: usize,
    evicted: u64,
}

impl BoundedQueue {
    fn new(capacity: usize) -> Self {
        Self { items: VecDeque::with_capacity(capacity.min(1024)), capacity, evicted: 0 }
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Dual-priority telemetry queue: a never-dropped critical queue and a
/// best-effort standard queue subject to backpressure.
#[derive(Debug)]
pub struct EventQueues {
    critical: Mutex<BoundedQueue>,
    standard: Mutex<BoundedQueue>,
    thresholds: BackpressureThresholds,
}

impl EventQueues {
    /// Construct empty queues with the given capacities.
    #[must_use]
    pub fn new(critical_max: usize, standard_max: usize) -> Self {
        Self {
            critical: Mutex::new(BoundedQueue::new(critical_max)),
            standard: Mutex::new(BoundedQueue::new(standard_max)),
            thresholds: BackpressureThresholds::default(),
        }
    }

    /// Current fill-state snapshot.
    #[must_use]
    pub fn metrics(&self) -> QueueMetrics {
        let critical = self.critical.lock().expect("critical queue mutex poisoned");
        let standard = self.standard.lock().expect("standard queue mutex poisoned");
        QueueMetrics {
            critical_queue_size: critical.len(),
            standard_queue_size: standard.len(),
            critical_queue_max: critical.capacity,
            standard_queue_max: standard.capacity,
        }
    }

    /// Enqueue an event, applying backpressure if it's a standard-priority
    /// event. Returns `true` if the event was admitted (before sampling).
    pub fn enqueue(&self, event: TelemetryEvent, event_hash: &str) -> bool {
        let is_critical = event.priority == Priority::Critical;
        let metrics = self.metrics();
        let decision = calculate_backpressure(&metrics, is_critical, &self.thresholds);

        if !decision.should_queue {
            return false;
        }
        if !should_sample_event(decision.sample_rate, event_hash) {
            return false;
        }

        if is_critical {
            let mut queue = self.critical.lock().expect("critical queue mutex poisoned");
            queue.items.push_back(event);
        } else {
            let mut queue = self.standard.lock().expect("standard queue mutex poisoned");
            if queue.items.len() >= queue.capacity {
                queue.items.pop_front();
                queue.evicted += 1;
            }
            queue.items.push_back(event);
        }
        true
    }

    /// Drain up to `max` critical events (FIFO), for immediate shipping.
    pub fn drain_critical(&self, max: usize) -> Vec<TelemetryEvent> {
        let mut queue = self.critical.lock().expect("critical queue mutex poisoned");
        (0..max.min(queue.items.len())).filter_map(|_| queue.items.pop_front()).collect()
    }

    /// Drain up to `max` standard events (FIFO), for batch shipping.
    pub fn drain_standard(&self, max: usize) -> Vec<TelemetryEvent> {
        let mut queue = self.standard.lock().expect("standard queue mutex poisoned");
        (0..max.min(queue.items.len())).filter_map(|_| queue.items.pop_front()).collect()
    }

    /// Number of standard events evicted due to a full queue.
    #[must_use]
    pub fn standard_evicted_count(&self) -> u64 {
        self.standard.lock().expect("standard queue mutex poisoned").evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(critical: usize, standard: usize) -> QueueMetrics {
        QueueMetrics { critical_queue_size: critical, standard_queue_size: standard, critical_queue_max: 10_000, standard_queue_max: 50_000 }
    }

    #[test]
    fn critical_events_always_queue_at_full_sample_rate() {
        let decision = calculate_backpressure(&metrics(9_999, 49_999), true, &BackpressureThresholds::default());
        assert!(decision.should_queue);
        assert_eq!(decision.sample_rate, 1.0);
    }

    #[test]
    fn standard_events_sampled_at_elevated_threshold() {
        let m = QueueMetrics { critical_queue_size: 0, standard_queue_size: 41_000, critical_queue_max: 10_000, standard_queue_max: 50_000 };
        let decision = calculate_backpressure(&m, false, &BackpressureThresholds::default());
        assert_eq!(decision.sample_rate, 0.5);
    }

    #[test]
    fn standard_events_sampled_aggressively_near_capacity() {
        let m = QueueMetrics { critical_queue_size: 0, standard_queue_size: 46_000, critical_queue_max: 10_000, standard_queue_max: 50_000 };
        let decision = calculate_backpressure(&m, false, &BackpressureThresholds::default());
        assert_eq!(decision.sample_rate, 0.2);
    }

    #[test]
    fn standard_events_dropped_at_full_capacity() {
        let m = QueueMetrics { critical_queue_size: 0, standard_queue_size: 50_000, critical_queue_max: 10_000, standard_queue_max: 50_000 };
        let decision = calculate_backpressure(&m, false, &BackpressureThresholds::default());
        assert!(!decision.should_queue);
    }

    #[test]
    fn sampling_is_deterministic_for_same_hash() {
        assert_eq!(should_sample_event(0.5, "deadbeef"), should_sample_event(0.5, "deadbeef"));
    }

    #[test]
    fn full_sample_rate_always_keeps() {
        assert!(should_sample_event(1.0, "anything"));
    }

    #[test]
    fn zero_sample_rate_always_drops() {
        assert!(!should_sample_event(0.0, "anything"));
    }
}
