//! Occupancy grid configuration.

use serde::{Deserialize, Serialize};

/// Cell state for display and planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    /// Unknown (never observed)
    Unknown,
    /// Free space (definitely empty)
    Free,
    /// Occupied (definitely contains obstacle)
    Occupied,
}

/// Configuration for the lawn occupancy grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OccupancyGridConfig {
    /// Cell size in meters.
    pub resolution: f32,

    /// Map extent in meters, centered on the local origin.
    pub width_m: f32,
    pub height_m: f32,

    /// Log-odds value for occupied observation.
    pub log_odds_occupied: f32,

    /// Log-odds value for free observation (negative).
    pub log_odds_free: f32,

    /// Clamp range for cell log-odds.
    ///
    /// Keeps cells able to change their mind when a temporary obstacle
    /// leaves.
    pub log_odds_max: f32,
    pub log_odds_min: f32,

    /// Probability above which a cell is an obstacle.
    pub obstacle_threshold: f32,

    /// Probability below which a cell is free.
    pub free_threshold: f32,

    /// Detections with lower confidence are ignored.
    pub min_confidence: f32,

    /// Maximum ray length in cells.
    pub max_ray_cells: usize,
}

impl Default for OccupancyGridConfig {
    fn default() -> Self {
        Self {
            resolution: 0.1, // 10cm cells
            width_m: 60.0,
            height_m: 60.0,
            log_odds_occupied: 0.85,
            log_odds_free: -0.4,
            log_odds_max: 3.5,
            log_odds_min: -2.0,
            obstacle_threshold: 0.65,
            free_threshold: 0.35,
            min_confidence: 0.5,
            max_ray_cells: 500,
        }
    }
}
