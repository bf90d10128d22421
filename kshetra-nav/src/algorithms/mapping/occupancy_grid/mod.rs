//! Occupancy grid map with log-odds probabilities.
//!
//! # Log-Odds Representation
//!
//! ```text
//! P(occupied) = 1 / (1 + exp(-log_odds))
//!
//! log_odds = log(P(occupied) / P(free))
//!
//! Update: log_odds_new = clamp(log_odds_old + log_odds_observation)
//! ```
//!
//! Cells are only changed through [`OccupancyGrid::update_cell`]; the
//! clamp keeps every cell within `[log_odds_min, log_odds_max]`.

mod config;
mod serialization;

pub use config::{CellState, OccupancyGridConfig};

use std::path::Path;

use crate::core::types::Point2D;
use crate::error::Result;

/// 2D occupancy grid map over a fixed lawn extent.
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyGrid {
    config: OccupancyGridConfig,

    /// Grid cells (log-odds values).
    ///
    /// Row-major storage: index = y * width + x
    cells: Vec<f32>,

    width: usize,
    height: usize,

    /// World X coordinate of cell (0, 0).
    origin_x: f32,

    /// World Y coordinate of cell (0, 0).
    origin_y: f32,
}

impl OccupancyGrid {
    /// Create an empty grid centered on the local origin.
    pub fn new(config: OccupancyGridConfig) -> Self {
        let resolution = config.resolution.max(1e-3);
        let width = (config.width_m / resolution).ceil().max(1.0) as usize;
        let height = (config.height_m / resolution).ceil().max(1.0) as usize;
        let origin_x = -config.width_m / 2.0;
        let origin_y = -config.height_m / 2.0;

        Self {
            config,
            cells: vec![0.0; width * height], // 0.0 = unknown
            width,
            height,
            origin_x,
            origin_y,
        }
    }

    /// Create from raw data (used by serialization).
    pub(crate) fn from_raw(
        config: OccupancyGridConfig,
        cells: Vec<f32>,
        width: usize,
        height: usize,
        origin_x: f32,
        origin_y: f32,
    ) -> Self {
        Self {
            config,
            cells,
            width,
            height,
            origin_x,
            origin_y,
        }
    }

    pub fn config(&self) -> &OccupancyGridConfig {
        &self.config
    }

    pub(crate) fn cells(&self) -> &[f32] {
        &self.cells
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Meters per cell.
    pub fn resolution(&self) -> f32 {
        self.config.resolution
    }

    /// World coordinates of the corner of cell (0, 0).
    pub fn origin(&self) -> (f32, f32) {
        (self.origin_x, self.origin_y)
    }

    /// Convert world coordinates to cell indices.
    ///
    /// Returns `None` if outside grid bounds.
    #[inline]
    pub fn world_to_cell(&self, x: f32, y: f32) -> Option<(usize, usize)> {
        let (cx, cy) = self.world_to_cell_signed(x, y);
        self.is_valid_cell(cx, cy).then_some((cx as usize, cy as usize))
    }

    /// Signed cell indices; may lie outside the grid.
    #[inline]
    pub fn world_to_cell_signed(&self, x: f32, y: f32) -> (i32, i32) {
        let cx = ((x - self.origin_x) / self.config.resolution).floor() as i32;
        let cy = ((y - self.origin_y) / self.config.resolution).floor() as i32;
        (cx, cy)
    }

    /// World coordinates of a cell center.
    #[inline]
    pub fn cell_to_world(&self, cx: usize, cy: usize) -> Point2D {
        Point2D::new(
            self.origin_x + (cx as f32 + 0.5) * self.config.resolution,
            self.origin_y + (cy as f32 + 0.5) * self.config.resolution,
        )
    }

    #[inline]
    pub fn is_valid_cell(&self, cx: i32, cy: i32) -> bool {
        cx >= 0 && cy >= 0 && (cx as usize) < self.width && (cy as usize) < self.height
    }

    #[inline]
    fn cell_index(&self, cx: usize, cy: usize) -> usize {
        cy * self.width + cx
    }

    /// Log-odds at a cell; 0.0 (unknown) outside the grid.
    #[inline]
    pub fn get_log_odds(&self, cx: usize, cy: usize) -> f32 {
        if cx < self.width && cy < self.height {
            self.cells[self.cell_index(cx, cy)]
        } else {
            0.0
        }
    }

    /// Occupancy probability (0.0 to 1.0).
    #[inline]
    pub fn get_probability(&self, cx: usize, cy: usize) -> f32 {
        logistic(self.get_log_odds(cx, cy))
    }

    pub fn get_state(&self, cx: usize, cy: usize) -> CellState {
        let p = self.get_probability(cx, cy);
        if p > self.config.obstacle_threshold {
            CellState::Occupied
        } else if p < self.config.free_threshold {
            CellState::Free
        } else {
            CellState::Unknown
        }
    }

    /// Update a cell with an observation.
    ///
    /// If `occupied` is true, adds `log_odds_occupied`, otherwise
    /// `log_odds_free`; the result is clamped.
    #[inline]
    pub fn update_cell(&mut self, cx: usize, cy: usize, occupied: bool) {
        if cx >= self.width || cy >= self.height {
            return;
        }

        let idx = self.cell_index(cx, cy);
        let delta = if occupied {
            self.config.log_odds_occupied
        } else {
            self.config.log_odds_free
        };

        self.cells[idx] =
            (self.cells[idx] + delta).clamp(self.config.log_odds_min, self.config.log_odds_max);
    }

    #[inline]
    pub fn update_cell_signed(&mut self, cx: i32, cy: i32, occupied: bool) {
        if self.is_valid_cell(cx, cy) {
            self.update_cell(cx as usize, cy as usize, occupied);
        }
    }

    /// Number of cells above the obstacle threshold.
    pub fn count_obstacles(&self) -> usize {
        let threshold = self.config.obstacle_threshold;
        self.cells.iter().filter(|&&l| logistic(l) > threshold).count()
    }

    /// Reset all cells to unknown.
    pub fn clear(&mut self) {
        self.cells.fill(0.0);
    }

    /// Save to the binary map format (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        serialization::save(self, path)
    }

    /// Load from the binary map format; any mismatch is
    /// [`NavError::MapCorruption`](crate::error::NavError::MapCorruption).
    pub fn load(path: &Path, config: OccupancyGridConfig) -> Result<Self> {
        serialization::load(path, config)
    }
}

#[inline]
pub(crate) fn logistic(log_odds: f32) -> f32 {
    1.0 / (1.0 + (-log_odds).exp())
}
