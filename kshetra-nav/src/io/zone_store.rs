//! Zone file: `{ "zones": [ ... ] }`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::persist::write_atomic;
use crate::error::{NavError, Result};
use crate::navigation::{Zone, ZoneSet};

#[derive(Debug, Clone)]
pub struct ZoneStore {
    path: PathBuf,
}

impl ZoneStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and validate every zone. A missing file is an empty set.
    pub fn load(&self) -> Result<ZoneSet> {
        if !self.path.exists() {
            log::info!("No zone file at {}, starting empty", self.path.display());
            return Ok(ZoneSet::default());
        }
        let bytes = fs::read(&self.path)?;
        let zones: ZoneSet = serde_json::from_slice(&bytes)?;
        validate(&zones)?;
        log::info!(
            "Loaded {} zones ({} active) from {}",
            zones.zones.len(),
            zones.zones.iter().filter(|z| z.active).count(),
            self.path.display()
        );
        Ok(zones)
    }

    /// Validate, then write.
    pub fn save(&self, zones: &ZoneSet) -> Result<()> {
        validate(zones)?;
        let json = serde_json::to_vec_pretty(zones)?;
        write_atomic(&self.path, &json)?;
        log::debug!("Saved {} zones to {}", zones.zones.len(), self.path.display());
        Ok(())
    }

    /// Add or replace one zone and persist the set.
    pub fn upsert(&self, zone: Zone) -> Result<ZoneSet> {
        let mut zones = self.load()?;
        zones.upsert(zone);
        self.save(&zones)?;
        Ok(zones)
    }
}

fn validate(zones: &ZoneSet) -> Result<()> {
    for zone in &zones.zones {
        zone.validate()
            .map_err(|e| NavError::planning(zone.id.to_string(), e))?;
    }
    zones
        .validate()
        .map_err(|e| NavError::planning("zone set", e))
}
