//! Detection integration into the occupancy grid.

use super::{OccupancyGrid, RayTracer};
use crate::core::geometry::Polygon;
use crate::core::types::Point2D;

/// Obstacle evidence in the local world frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// Range reading with a return: free along the ray, occupied at `hit`.
    RangeHit {
        origin: Point2D,
        hit: Point2D,
        confidence: f32,
    },
    /// Range reading without a return: free up to `end`.
    RangeMiss {
        origin: Point2D,
        end: Point2D,
        confidence: f32,
    },
    /// Obstacle region from the vision pipeline, marked occupied.
    Region { area: Polygon, confidence: f32 },
}

impl Detection {
    pub fn confidence(&self) -> f32 {
        match self {
            Detection::RangeHit { confidence, .. }
            | Detection::RangeMiss { confidence, .. }
            | Detection::Region { confidence, .. } => *confidence,
        }
    }
}

/// Applies detections to a grid.
#[derive(Debug, Clone)]
pub struct MapIntegrator {
    tracer: RayTracer,
    min_confidence: f32,
}

impl MapIntegrator {
    pub fn new(max_ray_cells: usize, min_confidence: f32) -> Self {
        Self {
            tracer: RayTracer::new(max_ray_cells),
            min_confidence,
        }
    }

    /// Apply every detection above the confidence floor. Returns how many
    /// were used.
    pub fn integrate(&self, grid: &mut OccupancyGrid, detections: &[Detection]) -> usize {
        let mut used = 0;
        for detection in detections {
            let confidence = detection.confidence();
            if !(confidence >= self.min_confidence) {
                continue;
            }
            match detection {
                Detection::RangeHit { origin, hit, .. } => {
                    if !origin.is_finite() || !hit.is_finite() {
                        continue;
                    }
                    self.tracer.trace_ray(grid, origin, hit, true);
                }
                Detection::RangeMiss { origin, end, .. } => {
                    if !origin.is_finite() || !end.is_finite() {
                        continue;
                    }
                    self.tracer.trace_ray(grid, origin, end, false);
                }
                Detection::Region { area, .. } => {
                    if !mark_region(grid, area) {
                        continue;
                    }
                }
            }
            used += 1;
        }
        used
    }
}

/// Mark every cell whose center lies inside `area` as occupied.
fn mark_region(grid: &mut OccupancyGrid, area: &Polygon) -> bool {
    let Some(bounds) = area.bounds() else {
        return false;
    };
    let (x0, y0) = grid.world_to_cell_signed(bounds.min_x, bounds.min_y);
    let (x1, y1) = grid.world_to_cell_signed(bounds.max_x, bounds.max_y);

    let mut marked = false;
    for cy in y0.max(0)..=y1.min(grid.height() as i32 - 1) {
        for cx in x0.max(0)..=x1.min(grid.width() as i32 - 1) {
            let center = grid.cell_to_world(cx as usize, cy as usize);
            if area.contains(&center) {
                grid.update_cell(cx as usize, cy as usize, true);
                marked = true;
            }
        }
    }
    marked
}
