//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting swaps the interval
//! counters to get a consistent snapshot.
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Lock-free metrics collector
pub struct Metrics {
    /// Total samples ever accepted (monotonic)
    samples_accepted_total: AtomicU64,
    /// Samples accepted since last report (reset on report)
    samples_accepted_since_report: AtomicU64,
    /// Samples rejected for poor accuracy (monotonic)
    rejected_accuracy: AtomicU64,
    /// Samples rejected for stale/out-of-order timestamps (monotonic)
    rejected_stale: AtomicU64,
    /// Samples rejected as malformed (monotonic)
    rejected_malformed: AtomicU64,
    /// Transitions emitted by kind (monotonic)
    enters_emitted: AtomicU64,
    exits_emitted: AtomicU64,
    dwells_emitted: AtomicU64,
    /// Delivery attempts and failures (monotonic)
    dispatch_attempts: AtomicU64,
    dispatch_failures: AtomicU64,
    /// Report interval start
    interval_started: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            samples_accepted_total: AtomicU64::new(0),
            samples_accepted_since_report: AtomicU64::new(0),
            rejected_accuracy: AtomicU64::new(0),
            rejected_stale: AtomicU64::new(0),
            rejected_malformed: AtomicU64::new(0),
            enters_emitted: AtomicU64::new(0),
            exits_emitted: AtomicU64::new(0),
            dwells_emitted: AtomicU64::new(0),
            dispatch_attempts: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            interval_started: parking_lot::Mutex::new(Instant::now()),
        }
    }

    pub fn record_sample_accepted(&self) {
        self.samples_accepted_total.fetch_add(1, Ordering::Relaxed);
        self.samples_accepted_since_report.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_accuracy(&self) {
        self.rejected_accuracy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_stale(&self) {
        self.rejected_stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_malformed(&self) {
        self.rejected_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enter(&self) {
        self.enters_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exit(&self) {
        self.exits_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dwell(&self) {
        self.dwells_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_attempt(&self) {
        self.dispatch_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_failure(&self) {
        self.dispatch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot counters for periodic reporting.
    /// Interval-scoped counters are swapped to zero.
    pub fn report(&self, active_regions: usize) -> MetricsSummary {
        let mut started = self.interval_started.lock();
        let elapsed = started.elapsed().as_secs_f64();
        *started = Instant::now();
        drop(started);

        let samples_interval = self.samples_accepted_since_report.swap(0, Ordering::Relaxed);
        let samples_per_sec =
            if elapsed > 0.0 { samples_interval as f64 / elapsed } else { 0.0 };

        MetricsSummary {
            samples_total: self.samples_accepted_total.load(Ordering::Relaxed),
            samples_per_sec,
            rejected_accuracy: self.rejected_accuracy.load(Ordering::Relaxed),
            rejected_stale: self.rejected_stale.load(Ordering::Relaxed),
            rejected_malformed: self.rejected_malformed.load(Ordering::Relaxed),
            enters: self.enters_emitted.load(Ordering::Relaxed),
            exits: self.exits_emitted.load(Ordering::Relaxed),
            dwells: self.dwells_emitted.load(Ordering::Relaxed),
            dispatch_attempts: self.dispatch_attempts.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            active_regions,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of engine counters
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub samples_total: u64,
    pub samples_per_sec: f64,
    pub rejected_accuracy: u64,
    pub rejected_stale: u64,
    pub rejected_malformed: u64,
    pub enters: u64,
    pub exits: u64,
    pub dwells: u64,
    pub dispatch_attempts: u64,
    pub dispatch_failures: u64,
    pub active_regions: usize,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            samples_total = %self.samples_total,
            samples_per_sec = %format!("{:.1}", self.samples_per_sec),
            rejected_accuracy = %self.rejected_accuracy,
            rejected_stale = %self.rejected_stale,
            rejected_malformed = %self.rejected_malformed,
            enters = %self.enters,
            exits = %self.exits,
            dwells = %self.dwells,
            dispatch_attempts = %self.dispatch_attempts,
            dispatch_failures = %self.dispatch_failures,
            active_regions = %self.active_regions,
            "metrics_report"
        );
    }
}
