//! Versioned map ownership.
//!
//! One writer integrates detections into a private copy of the grid and
//! publishes it as a new immutable [`MapView`]. Readers take an
//! `Arc<MapView>` and keep a complete version for as long as they need it.
//!
//! ```text
//!  detections ──► integrate (writer lock) ──► clone grid ──► update
//!                                                   │
//!                               swap Arc ◄──────────┘
//!                                  │
//!          planner / avoidance ◄── snapshot()
//! ```

use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::{Detection, MapIntegrator, OccupancyGrid, OccupancyGridConfig, logistic};
use crate::core::geometry::{Bounds, Polygon};
use crate::core::types::Point2D;
use crate::error::{NavError, Result};

/// Immutable map version.
#[derive(Debug, Clone)]
pub struct MapView {
    grid: OccupancyGrid,
    version: u64,
}

impl MapView {
    pub fn new(grid: OccupancyGrid, version: u64) -> Self {
        Self { grid, version }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn grid(&self) -> &OccupancyGrid {
        &self.grid
    }

    /// Occupancy probability at a world point; 0.5 outside the map.
    pub fn probability_at(&self, p: &Point2D) -> f32 {
        match self.grid.world_to_cell(p.x, p.y) {
            Some((cx, cy)) => self.grid.get_probability(cx, cy),
            None => 0.5,
        }
    }

    pub fn is_obstacle(&self, p: &Point2D) -> bool {
        self.probability_at(p) > self.grid.config().obstacle_threshold
    }

    /// Distance to the nearest obstacle cell center, capped at `radius`.
    pub fn clearance(&self, p: &Point2D, radius: f32) -> f32 {
        self.obstacle_cells_within(p, radius)
            .iter()
            .map(|c| c.distance(p))
            .fold(radius, f32::min)
    }

    /// Centers of obstacle cells within `radius` of `p`.
    pub fn obstacle_cells_within(&self, p: &Point2D, radius: f32) -> Vec<Point2D> {
        let grid = &self.grid;
        let threshold = grid.config().obstacle_threshold;
        let (x0, y0) = grid.world_to_cell_signed(p.x - radius, p.y - radius);
        let (x1, y1) = grid.world_to_cell_signed(p.x + radius, p.y + radius);
        let r_sq = radius * radius;

        let mut out = Vec::new();
        for cy in y0.max(0)..=y1.min(grid.height() as i32 - 1) {
            for cx in x0.max(0)..=x1.min(grid.width() as i32 - 1) {
                let (cx, cy) = (cx as usize, cy as usize);
                if logistic(grid.get_log_odds(cx, cy)) <= threshold {
                    continue;
                }
                let center = grid.cell_to_world(cx, cy);
                if center.distance_squared(p) <= r_sq {
                    out.push(center);
                }
            }
        }
        out
    }

    /// Obstacle cells overlapping `area`, merged along each grid row into
    /// rectangles that cover the full cell extents.
    pub fn occupied_runs(&self, area: &Bounds) -> Vec<Polygon> {
        let grid = &self.grid;
        let threshold = grid.config().obstacle_threshold;
        let res = grid.resolution();
        let (ox, oy) = grid.origin();
        let (x0, y0) = grid.world_to_cell_signed(area.min_x, area.min_y);
        let (x1, y1) = grid.world_to_cell_signed(area.max_x, area.max_y);
        let (x0, x1) = (x0.max(0), x1.min(grid.width() as i32 - 1));
        let (y0, y1) = (y0.max(0), y1.min(grid.height() as i32 - 1));

        let mut runs = Vec::new();
        for cy in y0..=y1 {
            let mut start: Option<i32> = None;
            for cx in x0..=x1 + 1 {
                let occupied = cx <= x1 && logistic(grid.get_log_odds(cx as usize, cy as usize)) > threshold;
                match (occupied, start) {
                    (true, None) => start = Some(cx),
                    (false, Some(first)) => {
                        runs.push(Polygon::rectangle(
                            ox + first as f32 * res,
                            oy + cy as f32 * res,
                            ox + cx as f32 * res,
                            oy + (cy + 1) as f32 * res,
                        ));
                        start = None;
                    }
                    _ => {}
                }
            }
        }
        runs
    }
}

/// Outcome of [`MapManager::load_or_empty`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapLoadStatus {
    Loaded,
    /// No map file yet; starting fresh.
    Missing,
    /// The stored map was unusable and was replaced by an empty one.
    Corrupted,
}

impl MapLoadStatus {
    /// An empty map after corruption means the robot must relocalize.
    pub fn requires_relocalization(&self) -> bool {
        matches!(self, MapLoadStatus::Corrupted)
    }
}

/// Single-writer owner of the occupancy map.
pub struct MapManager {
    current: RwLock<Arc<MapView>>,
    writer: Mutex<()>,
    integrator: MapIntegrator,
}

impl MapManager {
    pub fn new(config: OccupancyGridConfig) -> Self {
        Self::from_grid(OccupancyGrid::new(config))
    }

    pub fn from_grid(grid: OccupancyGrid) -> Self {
        let integrator =
            MapIntegrator::new(grid.config().max_ray_cells, grid.config().min_confidence);
        Self {
            current: RwLock::new(Arc::new(MapView::new(grid, 0))),
            writer: Mutex::new(()),
            integrator,
        }
    }

    /// Latest complete map version.
    pub fn snapshot(&self) -> Arc<MapView> {
        Arc::clone(&self.current.read())
    }

    /// Apply detections and publish a new version. Returns the version
    /// readers will see.
    pub fn integrate(&self, detections: &[Detection]) -> u64 {
        let _writer = self.writer.lock();
        let base = self.snapshot();

        let mut grid = base.grid.clone();
        let used = self.integrator.integrate(&mut grid, detections);
        if used == 0 {
            return base.version;
        }

        let version = base.version + 1;
        *self.current.write() = Arc::new(MapView::new(grid, version));
        version
    }

    /// Persist the current version.
    pub fn save(&self, path: &Path) -> Result<()> {
        let view = self.snapshot();
        view.grid.save(path)?;
        log::debug!(
            "Saved map version {} to {}",
            view.version,
            path.display()
        );
        Ok(())
    }

    /// Load a map strictly; corruption is an error.
    pub fn load(path: &Path, config: OccupancyGridConfig) -> Result<Self> {
        Ok(Self::from_grid(OccupancyGrid::load(path, config)?))
    }

    /// Load a map, falling back to an empty one.
    pub fn load_or_empty(path: &Path, config: OccupancyGridConfig) -> (Self, MapLoadStatus) {
        match OccupancyGrid::load(path, config.clone()) {
            Ok(grid) => {
                log::info!(
                    "Loaded map {}x{} from {}",
                    grid.width(),
                    grid.height(),
                    path.display()
                );
                (Self::from_grid(grid), MapLoadStatus::Loaded)
            }
            Err(NavError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No map at {}, starting empty", path.display());
                (Self::new(config), MapLoadStatus::Missing)
            }
            Err(e) => {
                log::error!("Map {} unusable ({}), starting empty", path.display(), e);
                (Self::new(config), MapLoadStatus::Corrupted)
            }
        }
    }
}
