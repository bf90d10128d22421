//! Bresenham ray tracing for marking free space in occupancy grids.
//!
//! A range reading that hits at distance D proves every cell between the
//! sensor and D is free; the cell at D is occupied. A reading at maximum
//! range without a return only clears cells.

use super::OccupancyGrid;
use crate::core::types::Point2D;

/// Ray tracer for marking free space in occupancy grids.
#[derive(Debug, Clone)]
pub struct RayTracer {
    /// Maximum ray length in cells (for safety).
    max_ray_length: usize,
}

impl Default for RayTracer {
    fn default() -> Self {
        Self {
            max_ray_length: 500, // 50m at 10cm resolution
        }
    }
}

impl RayTracer {
    pub fn new(max_ray_length: usize) -> Self {
        Self { max_ray_length }
    }

    /// Trace a ray from `start` to `end`, marking cells free along the way.
    ///
    /// If `mark_endpoint` is true, the endpoint cell is marked occupied,
    /// otherwise it is marked free as well.
    pub fn trace_ray(
        &self,
        grid: &mut OccupancyGrid,
        start: &Point2D,
        end: &Point2D,
        mark_endpoint: bool,
    ) {
        let (sx, sy) = grid.world_to_cell_signed(start.x, start.y);
        let (ex, ey) = grid.world_to_cell_signed(end.x, end.y);

        for (x, y, is_endpoint) in self.cells(sx, sy, ex, ey) {
            grid.update_cell_signed(x, y, is_endpoint && mark_endpoint);
        }
    }

    /// Cells visited by Bresenham's line from (x0, y0) to (x1, y1).
    ///
    /// The flag is set on the endpoint. Rays longer than the limit are cut
    /// short and have no endpoint.
    pub fn cells(&self, x0: i32, y0: i32, x1: i32, y1: i32) -> Vec<(i32, i32, bool)> {
        let dx = (x1 - x0).abs();
        let dy = (y1 - y0).abs();

        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };

        let mut x = x0;
        let mut y = y0;
        let mut err = dx - dy;
        let mut out = Vec::with_capacity((dx.max(dy) + 1) as usize);

        loop {
            if x == x1 && y == y1 {
                out.push((x, y, true));
                break;
            }
            out.push((x, y, false));
            if out.len() >= self.max_ray_length {
                break;
            }

            let e2 = 2 * err;
            if e2 > -dy {
                err -= dy;
                x += sx;
            }
            if e2 < dx {
                err += dx;
                y += sy;
            }
        }
        out
    }
}
