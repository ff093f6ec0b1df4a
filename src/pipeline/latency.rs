//! Rolling latency tracker and degradation-mode selection: a bounded
//! ring buffer of recent durations with percentile reporting.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Latency percentiles computed from the current window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyPercentiles {
    /// 50th percentile, in milliseconds.
    pub p50_ms: f64,
    /// 95th percentile, in milliseconds.
    pub p95_ms: f64,
    /// 99th percentile, in milliseconds.
    pub p99_ms: f64,
    /// Arithmetic mean, in milliseconds.
    pub mean_ms: f64,
}

/// Rolling-window latency tracker. Not lock-free — sample recording is
/// not on the hot per-match path.
#[derive(Debug)]
pub struct LatencyTracker {
    window: Mutex<VecDeque<Duration>>,
    capacity: usize,
}

impl LatencyTracker {
    /// Construct a tracker holding up to `capacity` most recent samples.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self { window: Mutex::new(VecDeque::with_capacity(capacity)), capacity: capacity.max(1) }
    }

    /// Record one latency sample, evicting the oldest once at capacity.
    pub fn record(&self, sample: Duration) {
        let mut window = self.window.lock().expect("latency tracker mutex poisoned");
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(sample);
    }

    /// Compute percentiles over the current window. Returns all zeros if
    /// no samples have been recorded yet.
    #[must_use]
    pub fn percentiles(&self) -> LatencyPercentiles {
        let window = self.window.lock().expect("latency tracker mutex poisoned");
        if window.is_empty() {
            return LatencyPercentiles { p50_ms: 0.0, p95_ms: 0.0, p99_ms: 0.0, mean_ms: 0.0 };
        }

        let mut sorted: Vec<f64> = window.iter().map(Duration::as_secs_f64).map(|s| s * 1000.0).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let percentile = |p: f64| -> f64 {
            let idx = ((sorted.len() as f64 - 1.0) * p).round() as usize;
            sorted[idx.min(sorted.len() - 1)]
        };

        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;

        LatencyPercentiles {
            p50_ms: percentile(0.50),
            p95_ms: percentile(0.95),
            p99_ms: percentile(0.99),
            mean_ms: mean,
        }
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.lock().expect("latency tracker mutex poisoned").len()
    }

    /// Whether the tracker holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Decide the next sampling interval under [`DegradationMode::Adaptive`]:
/// doubles the interval once p95 exceeds `latency_threshold_ms`, halves it
/// (floor 1) once healthy again.
#[must_use]
pub fn adaptive_sample_interval(current_interval: u32, p95_ms: f64, latency_threshold_ms: f64) -> u32 {
    if p95_ms > latency_threshold_ms {
        (current_interval * 2).max(1)
    } else {
        (current_interval / 2).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tracker_reports_zeros() {
        let tracker = LatencyTracker::new(10);
        let p = tracker.percentiles();
        assert_eq!(p.p50_ms, 0.0);
        assert_eq!(p.p99_ms, 0.0);
    }

    #[test]
    fn percentiles_reflect_recorded_samples() {
        let tracker = LatencyTracker::new(100);
        for ms in 1..=100u64 {
            tracker.record(Duration::from_millis(ms));
        }
        let p = tracker.percentiles();
        assert!((p.p50_ms - 50.0).abs() <= 1.0);
        assert!((p.p99_ms - 99.0).abs() <= 1.0);
        assert!(p.p95_ms > p.p50_ms);
    }

    #[test]
    fn window_evicts_oldest_beyond_capacity() {
        let tracker = LatencyTracker::new(3);
        tracker.record(Duration::from_millis(1));
        tracker.record(Duration::from_millis(2));
        tracker.record(Duration::from_millis(3));
        tracker.record(Duration::from_millis(1000));
        assert_eq!(tracker.len(), 3);
        let p = tracker.percentiles();
        assert!(p.p99_ms >= 1000.0 - 1.0);
    }

    #[test]
    fn adaptive_interval_doubles_when_unhealthy() {
        assert_eq!(adaptive_sample_interval(10, 200.0, 100.0), 20);
    }

    #[test]
    fn adaptive_interval_halves_when_healthy() {
        assert_eq!(adaptive_sample_interval(10, 50.0, 100.0), 5);
    }

    #[test]
    fn adaptive_interval_never_drops_below_one() {
        assert_eq!(adaptive_sample_interval(1, 50.0, 100.0), 1);
    }
}
