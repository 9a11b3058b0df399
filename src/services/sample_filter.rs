//! Location-quality gate and position smoothing
//!
//! Rejects low-quality and out-of-order fixes before they reach the
//! evaluators, and applies exponential smoothing to consecutive fixes
//! arriving within a short window to damp jitter at region boundaries.
//! Maintains no region knowledge.

use crate::domain::types::{FilteredSample, RawSample};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use std::sync::Arc;
use tracing::debug;

/// Ingests raw fixes, emits quality-gated (possibly smoothed) samples
pub struct SampleFilter {
    max_accuracy_m: f64,
    smoothing_window_ms: u64,
    alpha: f64,
    last_accepted: Option<FilteredSample>,
    metrics: Arc<Metrics>,
}

impl SampleFilter {
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Self {
        Self {
            max_accuracy_m: config.max_accuracy_m(),
            smoothing_window_ms: config.smoothing_window_ms(),
            alpha: config.smoothing_alpha(),
            last_accepted: None,
            metrics,
        }
    }

    /// Gate a raw fix. Returns None for rejected samples (not an error).
    pub fn ingest(&mut self, raw: &RawSample) -> Option<FilteredSample> {
        if !raw.lat.is_finite()
            || !raw.lon.is_finite()
            || !raw.accuracy_m.is_finite()
            || raw.accuracy_m < 0.0
        {
            self.metrics.record_rejected_malformed();
            debug!(ts = %raw.ts_ms, "sample_rejected_malformed");
            return None;
        }

        if raw.accuracy_m > self.max_accuracy_m {
            self.metrics.record_rejected_accuracy();
            debug!(
                ts = %raw.ts_ms,
                accuracy_m = %raw.accuracy_m,
                max_accuracy_m = %self.max_accuracy_m,
                "sample_rejected_accuracy"
            );
            return None;
        }

        // Timestamps must be strictly increasing once accepted
        if let Some(last) = &self.last_accepted {
            if raw.ts_ms <= last.ts_ms {
                self.metrics.record_rejected_stale();
                debug!(ts = %raw.ts_ms, last_ts = %last.ts_ms, "sample_rejected_stale");
                return None;
            }
        }

        let sample = match &self.last_accepted {
            Some(last) if raw.ts_ms - last.ts_ms <= self.smoothing_window_ms => FilteredSample {
                ts_ms: raw.ts_ms,
                lat: self.alpha * raw.lat + (1.0 - self.alpha) * last.lat,
                lon: self.alpha * raw.lon + (1.0 - self.alpha) * last.lon,
                accuracy_m: raw.accuracy_m,
            },
            // Gap too large (or first fix): pass through and reseed the smoother
            _ => FilteredSample {
                ts_ms: raw.ts_ms,
                lat: raw.lat,
                lon: raw.lon,
                accuracy_m: raw.accuracy_m,
            },
        };

        self.last_accepted = Some(sample);
        self.metrics.record_sample_accepted();
        Some(sample)
    }

    /// Timestamp of the last accepted sample, if any
    pub fn last_accepted_ts(&self) -> Option<u64> {
        self.last_accepted.map(|s| s.ts_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> SampleFilter {
        SampleFilter::new(&Config::default(), Arc::new(Metrics::new()))
    }

    fn raw(ts_ms: u64, lat: f64, lon: f64, accuracy_m: f64) -> RawSample {
        RawSample { ts_ms, lat, lon, accuracy_m, altitude_m: None, speed_mps: None }
    }

    #[test]
    fn test_accepts_first_sample_unsmoothed() {
        let mut f = filter();

        let out = f.ingest(&raw(1000, 10.0, 20.0, 5.0)).unwrap();
        assert_eq!(out.lat, 10.0);
        assert_eq!(out.lon, 20.0);
        assert_eq!(out.ts_ms, 1000);
    }

    #[test]
    fn test_rejects_poor_accuracy() {
        let mut f = filter();

        assert!(f.ingest(&raw(1000, 10.0, 20.0, 150.0)).is_none());
        assert!(f.last_accepted_ts().is_none());
    }

    #[test]
    fn test_rejects_malformed() {
        let mut f = filter();

        assert!(f.ingest(&raw(1000, f64::NAN, 20.0, 5.0)).is_none());
        assert!(f.ingest(&raw(1000, 10.0, 20.0, -1.0)).is_none());
    }

    #[test]
    fn test_rejects_out_of_order_timestamps() {
        let mut f = filter();

        assert!(f.ingest(&raw(2000, 10.0, 20.0, 5.0)).is_some());
        // Equal and earlier timestamps are both stale
        assert!(f.ingest(&raw(2000, 10.1, 20.0, 5.0)).is_none());
        assert!(f.ingest(&raw(1500, 10.1, 20.0, 5.0)).is_none());
        // Strictly later is accepted again
        assert!(f.ingest(&raw(2001, 10.1, 20.0, 5.0)).is_some());
    }

    #[test]
    fn test_smooths_within_window() {
        let mut f = filter();

        f.ingest(&raw(1000, 10.0, 20.0, 5.0)).unwrap();
        let out = f.ingest(&raw(2000, 11.0, 20.0, 5.0)).unwrap();

        // alpha 0.4: 0.4 * 11.0 + 0.6 * 10.0 = 10.4
        assert!((out.lat - 10.4).abs() < 1e-9);
        assert_eq!(out.lon, 20.0);
    }

    #[test]
    fn test_smoothing_compounds_on_smoothed_position() {
        let mut f = filter();

        f.ingest(&raw(1000, 10.0, 20.0, 5.0)).unwrap();
        f.ingest(&raw(2000, 11.0, 20.0, 5.0)).unwrap(); // -> 10.4
        let out = f.ingest(&raw(3000, 11.0, 20.0, 5.0)).unwrap();

        // 0.4 * 11.0 + 0.6 * 10.4 = 10.64
        assert!((out.lat - 10.64).abs() < 1e-9);
    }

    #[test]
    fn test_gap_reseeds_smoother() {
        let mut f = filter();

        f.ingest(&raw(1000, 10.0, 20.0, 5.0)).unwrap();
        // 10s later, outside the 5s smoothing window: raw position passes through
        let out = f.ingest(&raw(11_000, 11.0, 20.0, 5.0)).unwrap();
        assert_eq!(out.lat, 11.0);
    }

    #[test]
    fn test_rejected_sample_does_not_advance_clock() {
        let mut f = filter();

        f.ingest(&raw(1000, 10.0, 20.0, 5.0)).unwrap();
        // Rejected for accuracy; must not update last-accepted timestamp
        assert!(f.ingest(&raw(2000, 10.0, 20.0, 500.0)).is_none());
        assert_eq!(f.last_accepted_ts(), Some(1000));

        // A fix at 1500 is still strictly later than the last accepted one
        assert!(f.ingest(&raw(1500, 10.0, 20.0, 5.0)).is_some());
    }
}
