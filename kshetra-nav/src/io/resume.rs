//! Resume state file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::persist::write_atomic;
use crate::error::Result;
use crate::navigation::{ResumeState, ResumeUpdate};

#[derive(Debug, Clone)]
pub struct ResumeStore {
    path: PathBuf,
}

impl ResumeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored progress. A missing or unreadable file means start fresh.
    pub fn load(&self) -> Option<ResumeState> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                log::warn!("Cannot read resume state {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => Some(state),
            Err(e) => {
                log::warn!("Ignoring malformed resume state {}: {}", self.path.display(), e);
                None
            }
        }
    }

    pub fn save(&self, state: &ResumeState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path, &json)?;
        log::debug!(
            "Saved resume state: zone {} waypoint {}",
            state.zone_id,
            state.waypoint_index
        );
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    pub fn apply(&self, update: &ResumeUpdate) -> Result<()> {
        match update {
            ResumeUpdate::Save(state) => self.save(state),
            ResumeUpdate::Clear => self.clear(),
        }
    }
}
