//! Shared types for the geofence engine

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for region IDs to provide type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(pub String);

impl RegionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RegionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RegionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Geographic coordinate in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lon: f64,
}

impl LatLng {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Finite and inside the valid coordinate ranges
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

/// Geometry of a monitored region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RegionShape {
    Circle {
        center: LatLng,
        radius_m: f64,
    },
    /// Ordered vertex ring, implicitly closed
    Polygon {
        vertices: SmallVec<[LatLng; 8]>,
    },
}

/// A user-defined geofence region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub shape: RegionShape,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Continuous containment required before a Dwell event fires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dwell_secs: Option<u64>,
}

fn default_active() -> bool {
    true
}

impl Region {
    pub fn circle(id: impl Into<String>, center: LatLng, radius_m: f64) -> Self {
        Self {
            id: RegionId::new(id),
            shape: RegionShape::Circle { center, radius_m },
            active: true,
            dwell_secs: None,
        }
    }

    pub fn polygon(id: impl Into<String>, vertices: impl IntoIterator<Item = LatLng>) -> Self {
        Self {
            id: RegionId::new(id),
            shape: RegionShape::Polygon { vertices: vertices.into_iter().collect() },
            active: true,
            dwell_secs: None,
        }
    }

    pub fn with_dwell_secs(mut self, secs: u64) -> Self {
        self.dwell_secs = Some(secs);
        self
    }

    pub fn dwell_ms(&self) -> Option<u64> {
        self.dwell_secs.map(|s| s * 1000)
    }
}

/// Raw location fix from the provider, before the quality gate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSample {
    /// Fix timestamp (epoch ms)
    pub ts_ms: u64,
    pub lat: f64,
    pub lon: f64,
    /// Reported 1-sigma horizontal accuracy in meters
    pub accuracy_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_mps: Option<f64>,
}

/// Location fix accepted by the filter, position possibly smoothed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilteredSample {
    pub ts_ms: u64,
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: f64,
}

impl FilteredSample {
    pub fn position(&self) -> LatLng {
        LatLng::new(self.lat, self.lon)
    }
}

/// Per-region evaluator verdict for one filtered sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    Inside,
    Outside,
    /// Sample lies within the accuracy band around the boundary;
    /// the previous state must be retained, never toggled.
    Indeterminate,
}

impl Containment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Containment::Inside => "inside",
            Containment::Outside => "outside",
            Containment::Indeterminate => "indeterminate",
        }
    }
}

/// Persisted per-region containment state (membership snapshot record)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipState {
    pub region_id: RegionId,
    pub contained: bool,
    /// Timestamp of the sample that established the current state (epoch ms)
    pub since_ms: u64,
    /// Set while contained; cleared on exit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entered_at_ms: Option<u64>,
    /// Dwell already fired for the current containment episode
    #[serde(default)]
    pub dwell_emitted: bool,
}

/// Kind of boundary transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Enter,
    Exit,
    Dwell,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Enter => "enter",
            TransitionKind::Exit => "exit",
            TransitionKind::Dwell => "dwell",
        }
    }
}

/// A detected boundary transition, serialized as a flat record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    #[serde(rename = "region")]
    pub region_id: RegionId,
    pub kind: TransitionKind,
    #[serde(rename = "ts")]
    pub ts_ms: u64,
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "acc")]
    pub accuracy_m: f64,
}

impl TransitionEvent {
    pub fn new(region_id: RegionId, kind: TransitionKind, ts_ms: u64, sample: &FilteredSample) -> Self {
        Self {
            region_id,
            kind,
            ts_ms,
            lat: sample.lat,
            lon: sample.lon,
            accuracy_m: sample.accuracy_m,
        }
    }
}
