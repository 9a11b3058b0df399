//! Per-region containment evaluation
//!
//! Produces one of three verdicts per (sample, region) pair. A sample whose
//! accuracy envelope straddles the region boundary yields Indeterminate,
//! and the detector retains the previous state instead of toggling —
//! this is what keeps noisy fixes from flapping membership at the edge.

use crate::domain::geo;
use crate::domain::types::{Containment, FilteredSample, Region, RegionShape};
use crate::infra::config::Config;

/// Stateless containment evaluator with a configurable accuracy margin
pub struct MembershipEvaluator {
    accuracy_margin_factor: f64,
    min_margin_m: f64,
    max_margin_m: f64,
}

impl MembershipEvaluator {
    pub fn new(config: &Config) -> Self {
        Self {
            accuracy_margin_factor: config.accuracy_margin_factor(),
            min_margin_m: config.min_margin_m(),
            max_margin_m: config.max_margin_m(),
        }
    }

    /// Distance buffer around the boundary that reads as Indeterminate.
    /// Scales with the sample's reported accuracy, clamped to a sane range.
    pub fn margin_m(&self, accuracy_m: f64) -> f64 {
        (self.accuracy_margin_factor * accuracy_m).clamp(self.min_margin_m, self.max_margin_m)
    }

    /// Evaluate containment of one sample in one region
    pub fn evaluate(&self, sample: &FilteredSample, region: &Region) -> Containment {
        let margin = self.margin_m(sample.accuracy_m);
        let position = sample.position();

        match &region.shape {
            RegionShape::Circle { center, radius_m } => {
                let d = geo::haversine_m(position, *center);
                if d < radius_m - margin {
                    Containment::Inside
                } else if d > radius_m + margin {
                    Containment::Outside
                } else {
                    Containment::Indeterminate
                }
            }
            RegionShape::Polygon { vertices } => {
                if geo::distance_to_ring_m(position, vertices) < margin {
                    Containment::Indeterminate
                } else if geo::point_in_ring(position, vertices) {
                    Containment::Inside
                } else {
                    Containment::Outside
                }
            }
        }
    }
}
