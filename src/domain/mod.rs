//! Domain models - core geofencing types and geometry
//!
//! This module contains the canonical data types used throughout the engine:
//! - `Region` - a monitored geographic region (circle or polygon)
//! - `RawSample` / `FilteredSample` - location fixes before/after the quality gate
//! - `Containment` - per-region evaluator verdict
//! - `MembershipState` - persisted per-region containment state
//! - `TransitionEvent` - the engine's sole output
//! - `geo` - spherical distance and point-in-polygon primitives

pub mod geo;
pub mod types;
