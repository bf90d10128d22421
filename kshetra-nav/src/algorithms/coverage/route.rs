//! Sub-path ordering and blade-off transits.
//!
//! ```text
//! runs ──► nearest_next ──► Router::assemble ──► waypoints
//!                              │
//!                              └─ transit blocked? ─► A* on a grid of
//!                                                     the mowable region
//! ```

use crate::algorithms::planning::{AStarPlanner, InflatedGrid};
use crate::core::types::Point2D;
use crate::error::PlanningFailure;
use crate::navigation::path::{SpeedClass, Waypoint};

use super::planner::PlanBudget;
use super::sweep::{Region, smooth};

/// Tolerance for points sitting on the region or hole outline.
const EDGE_TOL_M: f32 = 1e-3;

/// Order runs greedily: each next run is the one with an endpoint closest
/// to the current position, entered from that endpoint.
///
/// Without a start position the first run is taken as generated. Equal
/// distances go to the run generated first, and to its front end.
pub fn nearest_next(runs: Vec<Vec<Point2D>>, start: Option<Point2D>) -> Vec<Vec<Point2D>> {
    let mut remaining: Vec<Option<Vec<Point2D>>> = runs.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(remaining.len());

    let mut cursor = match start {
        Some(p) => p,
        None => match remaining.first_mut().and_then(Option::take) {
            Some(first) => {
                let end = first[first.len() - 1];
                ordered.push(first);
                end
            }
            None => return ordered,
        },
    };

    loop {
        let mut best: Option<(f32, usize, bool)> = None;
        for (i, run) in remaining.iter().enumerate() {
            let Some(run) = run else { continue };
            let (Some(front), Some(back)) = (run.first(), run.last()) else {
                continue;
            };
            let df = front.distance_squared(&cursor);
            let db = back.distance_squared(&cursor);
            let (d, reverse) = if db < df { (db, true) } else { (df, false) };
            if best.is_none_or(|(bd, _, _)| d < bd) {
                best = Some((d, i, reverse));
            }
        }
        let Some((_, i, reverse)) = best else { break };
        let Some(mut run) = remaining[i].take() else { break };
        if reverse {
            run.reverse();
        }
        cursor = run[run.len() - 1];
        ordered.push(run);
    }
    ordered
}

/// Joins ordered runs into waypoints, routing transits around holes.
pub struct Router<'a> {
    region: &'a Region,
    planner: &'a AStarPlanner,
    resolution: f32,
    slow_clearance: f32,
    min_spacing: f32,
    collinear_tol: f32,
    grid: Option<InflatedGrid>,
}

impl<'a> Router<'a> {
    pub fn new(
        region: &'a Region,
        planner: &'a AStarPlanner,
        resolution: f32,
        slow_clearance: f32,
        min_spacing: f32,
        collinear_tol: f32,
    ) -> Self {
        Self {
            region,
            planner,
            resolution,
            slow_clearance,
            min_spacing,
            collinear_tol,
            grid: None,
        }
    }

    /// True when the straight move `a`-`b` leaves the zone or enters a
    /// buffered obstacle. Endpoints on an outline do not count.
    pub fn needs_routing(&self, a: &Point2D, b: &Point2D) -> bool {
        let len = a.distance(b);
        let steps = ((len / (self.resolution * 0.5)).ceil() as usize).max(2);
        (1..steps).any(|i| {
            let p = a.lerp(b, i as f32 / steps as f32);
            let outside = !self.region.boundary.contains(&p)
                && self.region.boundary.distance_to_boundary(&p) > EDGE_TOL_M;
            outside
                || self
                    .region
                    .holes
                    .iter()
                    .any(|h| h.contains(&p) && h.distance_to_boundary(&p) > EDGE_TOL_M)
        })
    }

    /// Intermediate and final points of a blade-off move from `a` to `b`.
    ///
    /// `None` when `b` cannot be reached inside the region.
    pub fn transit(&mut self, a: &Point2D, b: &Point2D) -> Option<Vec<Point2D>> {
        if !self.needs_routing(a, b) {
            return Some(vec![*b]);
        }

        let region = self.region;
        let resolution = self.resolution;
        let grid = self.grid.get_or_insert_with(|| {
            let bounds = region
                .boundary
                .bounds()
                .map(|b| b.expanded(resolution))
                .unwrap_or(crate::core::geometry::Bounds::new(0.0, 0.0, resolution, resolution));
            InflatedGrid::from_predicate(&bounds, resolution, |p| region.contains(p))
        });

        match self.planner.plan(grid, a, b) {
            Ok(route) => {
                let mut points: Vec<Point2D> = route.into_iter().skip(1).collect();
                if points.last().is_none_or(|p| p.distance_squared(b) > 1e-10) {
                    points.push(*b);
                }
                Some(points)
            }
            Err(e) => {
                log::debug!(
                    "Transit ({:.2}, {:.2}) -> ({:.2}, {:.2}) unroutable: {}",
                    a.x,
                    a.y,
                    b.x,
                    b.y,
                    e
                );
                None
            }
        }
    }

    /// Smooth each run, connect runs with transits and assign speed
    /// classes and headings.
    pub fn assemble(
        &mut self,
        runs: &[Vec<Point2D>],
        budget: &PlanBudget,
    ) -> Result<Vec<Waypoint>, PlanningFailure> {
        let mut waypoints: Vec<Waypoint> = Vec::new();
        let mut skipped = 0usize;

        for run in runs {
            budget.check()?;
            let run = smooth(run, self.min_spacing, self.collinear_tol);
            let Some(&entry) = run.first() else { continue };

            match waypoints.last().map(|w| w.position) {
                None => waypoints.push(Waypoint::new(entry, 0.0, SpeedClass::Transit, false)),
                Some(from) if from.distance_squared(&entry) < 1e-10 => {}
                Some(from) => match self.transit(&from, &entry) {
                    Some(points) => waypoints.extend(
                        points
                            .into_iter()
                            .map(|p| Waypoint::new(p, 0.0, SpeedClass::Transit, false)),
                    ),
                    None => {
                        skipped += 1;
                        continue;
                    }
                },
            }

            for p in &run[1..] {
                let speed = if self.region.hole_clearance(p) < self.slow_clearance {
                    SpeedClass::Slow
                } else {
                    SpeedClass::Mowing
                };
                waypoints.push(Waypoint::new(*p, 0.0, speed, true));
            }
        }

        if skipped > 0 {
            log::warn!("{} coverage runs unreachable inside the zone, skipped", skipped);
        }
        assign_headings(&mut waypoints);
        Ok(waypoints)
    }
}

/// Heading of the leg leaving each waypoint; the last keeps its arrival
/// heading.
fn assign_headings(waypoints: &mut [Waypoint]) {
    let mut heading = 0.0;
    for i in (0..waypoints.len()).rev() {
        if let Some(next) = waypoints.get(i + 1).map(|w| w.position)
            && waypoints[i].position.distance_squared(&next) > 1e-10
        {
            heading = waypoints[i].position.heading_to(&next);
        } else if i > 0 && waypoints[i - 1].position.distance_squared(&waypoints[i].position) > 1e-10 {
            heading = waypoints[i - 1].position.heading_to(&waypoints[i].position);
        }
        waypoints[i].heading = heading;
    }
}
