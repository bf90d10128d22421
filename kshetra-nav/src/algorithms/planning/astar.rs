//! A* path planning on an inflated grid.
//!
//! - **Inflated grid**: obstacles grown by the required clearance, or a
//!   predicate evaluated at every cell center (polygon obstacles)
//! - **8-connected grid**: diagonals only when both adjacent cells are free
//!   (no corner cutting)
//! - **Line-of-sight simplification**: keeps only the waypoints needed to
//!   stay on free cells
//! - **Nearest free cell**: blocked start or goal snap to the closest free cell

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::algorithms::mapping::MapView;
use crate::core::geometry::Bounds;
use crate::core::types::Point2D;

/// Configuration for the A* path planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AStarConfig {
    /// Allow diagonal movement (8-connected vs 4-connected grid).
    pub allow_diagonal: bool,

    /// Maximum number of node expansions before giving up.
    pub max_iterations: usize,

    /// Remove waypoints that have a free straight line past them.
    pub simplify: bool,

    /// Search radius (cells) for a free cell near a blocked start.
    pub start_search_radius: usize,

    /// Search radius (cells) for a free cell near a blocked goal.
    pub goal_search_radius: usize,
}

impl Default for AStarConfig {
    fn default() -> Self {
        Self {
            allow_diagonal: true,
            max_iterations: 200_000,
            simplify: true,
            start_search_radius: 10,
            goal_search_radius: 20,
        }
    }
}

/// Error types for path planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlanningError {
    #[error("no path found to target")]
    NoPathFound,
    #[error("start position is outside the grid")]
    StartOutOfBounds,
    #[error("goal position is outside the grid")]
    GoalOutOfBounds,
    #[error("start position is inside an obstacle")]
    StartInObstacle,
    #[error("goal is unreachable (blocked)")]
    GoalInObstacle,
    #[error("planning exceeded its iteration budget")]
    MaxIterationsExceeded,
    #[error("empty grid")]
    InvalidMap,
}

/// Free/blocked cells after inflation.
#[derive(Debug, Clone)]
pub struct InflatedGrid {
    /// true = free
    free: Vec<bool>,
    width: usize,
    height: usize,
    resolution: f32,
    origin_x: f32,
    origin_y: f32,
}

impl InflatedGrid {
    /// Obstacle cells of a map view plus live obstacle points, grown by
    /// `inflation_m`.
    pub fn from_map(view: &MapView, inflation_m: f32, live_points: &[Point2D]) -> Self {
        let grid = view.grid();
        let (origin_x, origin_y) = grid.origin();
        let mut inflated = Self {
            free: vec![true; grid.width() * grid.height()],
            width: grid.width(),
            height: grid.height(),
            resolution: grid.resolution(),
            origin_x,
            origin_y,
        };

        let threshold = grid.config().obstacle_threshold;
        let radius = (inflation_m / grid.resolution()).ceil() as i32;
        for cy in 0..grid.height() {
            for cx in 0..grid.width() {
                if grid.get_probability(cx, cy) > threshold {
                    inflated.stamp(cx as i32, cy as i32, radius);
                }
            }
        }
        for p in live_points {
            let (cx, cy) = inflated.world_to_cell_signed(p);
            inflated.stamp(cx, cy, radius);
        }
        inflated
    }

    /// Grid over `bounds` where a cell is free when `is_free` holds at its
    /// center.
    pub fn from_predicate(
        bounds: &Bounds,
        resolution: f32,
        is_free: impl Fn(&Point2D) -> bool,
    ) -> Self {
        let resolution = resolution.max(1e-3);
        let width = (bounds.width() / resolution).ceil().max(1.0) as usize;
        let height = (bounds.height() / resolution).ceil().max(1.0) as usize;
        let mut grid = Self {
            free: vec![false; width * height],
            width,
            height,
            resolution,
            origin_x: bounds.min_x,
            origin_y: bounds.min_y,
        };
        for cy in 0..height {
            for cx in 0..width {
                let center = grid.cell_to_world((cx, cy));
                grid.free[cy * width + cx] = is_free(&center);
            }
        }
        grid
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn resolution(&self) -> f32 {
        self.resolution
    }

    fn stamp(&mut self, cx: i32, cy: i32, r: i32) {
        for dy in -r..=r {
            for dx in -r..=r {
                // Circular inflation
                if dx * dx + dy * dy > r * r {
                    continue;
                }
                let (nx, ny) = (cx + dx, cy + dy);
                if self.in_bounds(nx, ny) {
                    self.free[ny as usize * self.width + nx as usize] = false;
                }
            }
        }
    }

    #[inline]
    fn in_bounds(&self, cx: i32, cy: i32) -> bool {
        cx >= 0 && cy >= 0 && (cx as usize) < self.width && (cy as usize) < self.height
    }

    #[inline]
    fn world_to_cell_signed(&self, p: &Point2D) -> (i32, i32) {
        (
            ((p.x - self.origin_x) / self.resolution).floor() as i32,
            ((p.y - self.origin_y) / self.resolution).floor() as i32,
        )
    }

    pub fn world_to_cell(&self, p: &Point2D) -> Option<(usize, usize)> {
        let (cx, cy) = self.world_to_cell_signed(p);
        self.in_bounds(cx, cy).then_some((cx as usize, cy as usize))
    }

    /// Center of a cell in world coordinates.
    pub fn cell_to_world(&self, cell: (usize, usize)) -> Point2D {
        Point2D::new(
            self.origin_x + (cell.0 as f32 + 0.5) * self.resolution,
            self.origin_y + (cell.1 as f32 + 0.5) * self.resolution,
        )
    }

    #[inline]
    pub fn is_cell_free(&self, cell: (usize, usize)) -> bool {
        cell.0 < self.width && cell.1 < self.height && self.free[cell.1 * self.width + cell.0]
    }

    /// Whether the cell containing `p` is free; false outside the grid.
    pub fn is_free(&self, p: &Point2D) -> bool {
        self.world_to_cell(p).is_some_and(|c| self.is_cell_free(c))
    }

    /// Every cell on the straight line from `a` to `b` is free.
    pub fn line_of_sight(&self, a: &Point2D, b: &Point2D) -> bool {
        let (x0, y0) = self.world_to_cell_signed(a);
        let (x1, y1) = self.world_to_cell_signed(b);

        let dx = (x1 - x0).abs();
        let dy = (y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let (mut x, mut y) = (x0, y0);
        let mut err = dx - dy;

        loop {
            if !self.in_bounds(x, y) || !self.free[y as usize * self.width + x as usize] {
                return false;
            }
            if x == x1 && y == y1 {
                return true;
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
    }

    /// Nearest free cell by breadth-first search.
    pub fn find_nearest_free(&self, start: (usize, usize), max_radius: usize) -> Option<(usize, usize)> {
        if !self.in_bounds(start.0 as i32, start.1 as i32) {
            return None;
        }
        let mut visited = vec![false; self.width * self.height];
        let mut queue = VecDeque::new();
        queue.push_back((start, 0usize));
        visited[start.1 * self.width + start.0] = true;

        while let Some((cell, dist)) = queue.pop_front() {
            if dist > max_radius {
                break;
            }
            if self.is_cell_free(cell) {
                return Some(cell);
            }
            let (cx, cy) = (cell.0 as i32, cell.1 as i32);
            for (dx, dy) in [(0, 1), (1, 0), (0, -1), (-1, 0)] {
                let (nx, ny) = (cx + dx, cy + dy);
                if self.in_bounds(nx, ny) {
                    let idx = ny as usize * self.width + nx as usize;
                    if !visited[idx] {
                        visited[idx] = true;
                        queue.push_back(((nx as usize, ny as usize), dist + 1));
                    }
                }
            }
        }
        None
    }
}

/// A* planner.
#[derive(Debug, Clone, Default)]
pub struct AStarPlanner {
    config: AStarConfig,
}

impl AStarPlanner {
    pub fn new(config: AStarConfig) -> Self {
        Self { config }
    }

    /// Plan from `start` to `goal`. The returned polyline starts at `start`
    /// and ends at `goal`, or at the nearest free cell center when the goal
    /// itself is blocked.
    pub fn plan(
        &self,
        grid: &InflatedGrid,
        start: &Point2D,
        goal: &Point2D,
    ) -> Result<Vec<Point2D>, PlanningError> {
        if grid.width == 0 || grid.height == 0 {
            return Err(PlanningError::InvalidMap);
        }

        let start_cell = grid
            .world_to_cell(start)
            .ok_or(PlanningError::StartOutOfBounds)?;
        let goal_cell = grid
            .world_to_cell(goal)
            .ok_or(PlanningError::GoalOutOfBounds)?;

        let start_free = grid.is_cell_free(start_cell);
        let search_start = if start_free {
            start_cell
        } else {
            grid.find_nearest_free(start_cell, self.config.start_search_radius)
                .ok_or(PlanningError::StartInObstacle)?
        };
        let goal_free = grid.is_cell_free(goal_cell);
        let search_goal = if goal_free {
            goal_cell
        } else {
            grid.find_nearest_free(goal_cell, self.config.goal_search_radius)
                .ok_or(PlanningError::GoalInObstacle)?
        };

        let cells = self.search(grid, search_start, search_goal)?;

        let mut points: Vec<Point2D> = cells.iter().map(|&c| grid.cell_to_world(c)).collect();
        // Exact endpoints where they are free
        if start_free {
            points[0] = *start;
        } else {
            points.insert(0, *start);
        }
        if goal_free {
            if cells.len() == 1 && start_free {
                points.push(*goal);
            } else if let Some(last) = points.last_mut() {
                *last = *goal;
            }
        }

        if self.config.simplify {
            points = simplify_line_of_sight(grid, &points);
        }
        Ok(points)
    }

    fn search(
        &self,
        grid: &InflatedGrid,
        start: (usize, usize),
        goal: (usize, usize),
    ) -> Result<Vec<(usize, usize)>, PlanningError> {
        if start == goal {
            return Ok(vec![start]);
        }

        let n = grid.width * grid.height;
        let index = |c: (usize, usize)| c.1 * grid.width + c.0;
        let mut g_score = vec![f32::INFINITY; n];
        let mut came_from = vec![usize::MAX; n];
        let mut closed = vec![false; n];
        let mut open_set = BinaryHeap::new();

        g_score[index(start)] = 0.0;
        open_set.push(AStarNode {
            cell: start,
            f_score: heuristic(start, goal),
        });

        let mut iterations = 0;
        while let Some(current) = open_set.pop() {
            let ci = index(current.cell);
            if closed[ci] {
                continue;
            }
            closed[ci] = true;

            iterations += 1;
            if iterations > self.config.max_iterations {
                return Err(PlanningError::MaxIterationsExceeded);
            }

            if current.cell == goal {
                let mut cells = vec![goal];
                let mut idx = ci;
                while came_from[idx] != usize::MAX {
                    idx = came_from[idx];
                    cells.push((idx % grid.width, idx / grid.width));
                }
                cells.reverse();
                return Ok(cells);
            }

            for (neighbor, cost) in self.neighbors(grid, current.cell) {
                let ni = index(neighbor);
                if closed[ni] {
                    continue;
                }
                let tentative = g_score[ci] + cost;
                if tentative < g_score[ni] {
                    g_score[ni] = tentative;
                    came_from[ni] = ci;
                    open_set.push(AStarNode {
                        cell: neighbor,
                        f_score: tentative + heuristic(neighbor, goal),
                    });
                }
            }
        }

        Err(PlanningError::NoPathFound)
    }

    fn neighbors(&self, grid: &InflatedGrid, cell: (usize, usize)) -> Vec<((usize, usize), f32)> {
        let mut result = Vec::with_capacity(8);
        let (cx, cy) = (cell.0 as i32, cell.1 as i32);
        let free = |x: i32, y: i32| grid.in_bounds(x, y) && grid.is_cell_free((x as usize, y as usize));

        for (dx, dy) in [(0, 1), (1, 0), (0, -1), (-1, 0)] {
            if free(cx + dx, cy + dy) {
                result.push((((cx + dx) as usize, (cy + dy) as usize), 1.0));
            }
        }

        if self.config.allow_diagonal {
            for (dx, dy) in [(1, 1), (1, -1), (-1, 1), (-1, -1)] {
                // Both adjacent cells must be free (no corner cutting)
                if free(cx + dx, cy + dy) && free(cx + dx, cy) && free(cx, cy + dy) {
                    result.push((
                        ((cx + dx) as usize, (cy + dy) as usize),
                        std::f32::consts::SQRT_2,
                    ));
                }
            }
        }
        result
    }
}

fn heuristic(a: (usize, usize), b: (usize, usize)) -> f32 {
    let dx = b.0 as f32 - a.0 as f32;
    let dy = b.1 as f32 - a.1 as f32;
    (dx * dx + dy * dy).sqrt()
}

/// Greedy string pulling: from each kept point jump to the farthest point
/// still in line of sight.
fn simplify_line_of_sight(grid: &InflatedGrid, points: &[Point2D]) -> Vec<Point2D> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let mut out = vec![points[0]];
    let mut i = 0;
    while i < points.len() - 1 {
        let mut j = points.len() - 1;
        while j > i + 1 && !grid.line_of_sight(&points[i], &points[j]) {
            j -= 1;
        }
        out.push(points[j]);
        i = j;
    }
    out
}

/// Node in the A* open set.
#[derive(Debug, Clone, Copy)]
struct AStarNode {
    cell: (usize, usize),
    f_score: f32,
}

impl Eq for AStarNode {}

impl PartialEq for AStarNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Ord for AStarNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap; cell breaks ties deterministically
        other
            .f_score
            .total_cmp(&self.f_score)
            .then_with(|| other.cell.cmp(&self.cell))
    }
}

impl PartialOrd for AStarNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
