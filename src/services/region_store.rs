//! Durable registry of geofence definitions
//!
//! Mutations are single-writer (write lock held across validate, persist,
//! commit) and become visible to evaluation snapshots only after the
//! durable write succeeds, so a crash immediately after an upsert never
//! loses the definition and an in-flight evaluation never sees a
//! partially-updated region set.

use crate::domain::types::{Region, RegionId, RegionShape};
use crate::infra::storage::{StateStore, StorageError};
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

const REGIONS_FILE: &str = "regions.json";

/// Rejected region configuration. The only error surfaced to the
/// hosting layer; a failed mutation is never partially applied.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("region id must not be empty")]
    EmptyId,
    #[error("degenerate shape for region {id}: {reason}")]
    DegenerateShape { id: String, reason: String },
    #[error("region {id} is already registered with a different shape")]
    ConflictingDefinition { id: String },
    #[error("unknown region {id}")]
    UnknownRegion { id: String },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Registry of geofence definitions, persisted through the state store
pub struct RegionStore {
    regions: RwLock<HashMap<RegionId, Region>>,
    store: StateStore,
}

impl RegionStore {
    /// Open the store, loading any persisted definitions
    pub fn open(store: StateStore) -> Result<Self, ConfigError> {
        let persisted: Vec<Region> = store.load(REGIONS_FILE)?.unwrap_or_default();
        let count = persisted.len();
        let regions = persisted.into_iter().map(|r| (r.id.clone(), r)).collect();

        if count > 0 {
            info!(regions = %count, "region_store_loaded");
        }
        Ok(Self { regions: RwLock::new(regions), store })
    }

    /// Register or update a region.
    ///
    /// Identical definitions are idempotent. `active` and `dwell_secs` may
    /// change in place; a different shape under an existing id is rejected
    /// (remove and re-add to change geometry).
    pub fn upsert(&self, region: Region) -> Result<(), ConfigError> {
        validate(&region)?;

        let mut regions = self.regions.write();
        if let Some(existing) = regions.get(&region.id) {
            if existing.shape != region.shape {
                return Err(ConfigError::ConflictingDefinition { id: region.id.0.clone() });
            }
            if *existing == region {
                debug!(region = %region.id, "region_upsert_idempotent");
                return Ok(());
            }
        }

        let mut next = regions.clone();
        next.insert(region.id.clone(), region.clone());
        self.persist(&next)?;
        *regions = next;

        info!(
            region = %region.id,
            active = %region.active,
            dwell_secs = ?region.dwell_secs,
            "region_upserted"
        );
        Ok(())
    }

    /// Remove a region, returning its definition
    pub fn remove(&self, id: &RegionId) -> Result<Region, ConfigError> {
        let mut regions = self.regions.write();
        if !regions.contains_key(id) {
            return Err(ConfigError::UnknownRegion { id: id.0.clone() });
        }

        let mut next = regions.clone();
        let removed = next.remove(id).expect("checked above");
        self.persist(&next)?;
        *regions = next;

        info!(region = %id, "region_removed");
        Ok(removed)
    }

    /// Remove every region. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, ConfigError> {
        let mut regions = self.regions.write();
        let count = regions.len();
        if count == 0 {
            return Ok(0);
        }

        self.persist(&HashMap::new())?;
        regions.clear();

        info!(removed = %count, "region_store_cleared");
        Ok(count)
    }

    /// All registered regions, ordered by id
    pub fn list(&self) -> Vec<Region> {
        let mut all: Vec<Region> = self.regions.read().values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Registered region ids, ordered
    pub fn region_ids(&self) -> Vec<RegionId> {
        let mut ids: Vec<RegionId> = self.regions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Consistent snapshot of active regions for one evaluation pass
    pub fn active_snapshot(&self) -> Vec<Region> {
        let mut active: Vec<Region> =
            self.regions.read().values().filter(|r| r.active).cloned().collect();
        active.sort_by(|a, b| a.id.cmp(&b.id));
        active
    }

    pub fn contains(&self, id: &RegionId) -> bool {
        self.regions.read().contains_key(id)
    }

    fn persist(&self, regions: &HashMap<RegionId, Region>) -> Result<(), StorageError> {
        let mut all: Vec<&Region> = regions.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        self.store.save(REGIONS_FILE, &all)
    }
}

fn validate(region: &Region) -> Result<(), ConfigError> {
    if region.id.0.is_empty() {
        return Err(ConfigError::EmptyId);
    }

    match &region.shape {
        RegionShape::Circle { center, radius_m } => {
            if !center.is_valid() {
                return Err(ConfigError::DegenerateShape {
                    id: region.id.0.clone(),
                    reason: "center out of range".to_string(),
                });
            }
            if !radius_m.is_finite() || *radius_m <= 0.0 {
                return Err(ConfigError::DegenerateShape {
                    id: region.id.0.clone(),
                    reason: format!("radius {radius_m} must be positive"),
                });
            }
        }
        RegionShape::Polygon { vertices } => {
            if vertices.len() < 3 {
                return Err(ConfigError::DegenerateShape {
                    id: region.id.0.clone(),
                    reason: format!("polygon needs >= 3 vertices, got {}", vertices.len()),
                });
            }
            if let Some(bad) = vertices.iter().find(|v| !v.is_valid()) {
                return Err(ConfigError::DegenerateShape {
                    id: region.id.0.clone(),
                    reason: format!("vertex ({}, {}) out of range", bad.lat, bad.lon),
                });
            }
        }
    }
    Ok(())
}
