//! Coverage planner: zone + obstacles → ordered waypoints.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::config::CoverageConfig;
use super::obstacle::Obstacle;
use super::pattern::{CoveragePattern, ResolvedPattern, resolve};
use super::route::{Router, nearest_next};
use super::sweep::{Region, center_line, contour_rings, ring_runs, sweep_lines};
use crate::algorithms::planning::AStarPlanner;
use crate::core::geometry::Polygon;
use crate::core::types::Point2D;
use crate::error::PlanningFailure;
use crate::navigation::path::Path;
use crate::navigation::zone::Zone;

/// Random tours with fewer accepted points fall back to parallel lines.
const MIN_RANDOM_POINTS: usize = 10;

/// Time and cancellation limits for one planning run.
#[derive(Debug, Clone, Default)]
pub struct PlanBudget {
    deadline: Option<Instant>,
    budget_ms: u64,
    cancel: Option<Arc<AtomicBool>>,
}

impl PlanBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            budget_ms: timeout.as_millis() as u64,
            cancel: None,
        }
    }

    /// Abandon the run once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Cancellation wins over timeout.
    pub fn check(&self) -> Result<(), PlanningFailure> {
        if self.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed)) {
            return Err(PlanningFailure::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(PlanningFailure::Timeout {
                budget_ms: self.budget_ms,
            });
        }
        Ok(())
    }
}

/// Plans bounded-overlap coverage paths over zones.
pub struct CoveragePlanner {
    config: CoverageConfig,
    working_width: f32,
    astar: AStarPlanner,
}

impl CoveragePlanner {
    pub fn new(config: CoverageConfig, working_width: f32) -> Self {
        let astar = AStarPlanner::new(config.astar.clone());
        Self {
            config,
            working_width,
            astar,
        }
    }

    pub fn config(&self) -> &CoverageConfig {
        &self.config
    }

    pub fn working_width(&self) -> f32 {
        self.working_width
    }

    pub fn plan(
        &self,
        zone: &Zone,
        obstacles: &[Obstacle],
        pattern: CoveragePattern,
    ) -> Result<Path, PlanningFailure> {
        self.plan_with_budget(zone, obstacles, pattern, &PlanBudget::unlimited())
    }

    pub fn plan_with_budget(
        &self,
        zone: &Zone,
        obstacles: &[Obstacle],
        pattern: CoveragePattern,
        budget: &PlanBudget,
    ) -> Result<Path, PlanningFailure> {
        budget.check()?;
        zone.validate()?;

        let width = self.working_width;
        let overlap = zone.overlap_percent.unwrap_or(self.config.default_overlap_percent);
        let spacing = width * (1.0 - overlap / 100.0);
        if !(width > 0.0 && spacing > 0.0) {
            return Err(PlanningFailure::InvalidZone(format!(
                "line spacing {:.3}m from width {:.3}m and overlap {}%",
                spacing, width, overlap
            )));
        }

        let region = self.build_region(zone, obstacles);
        let resolved = resolve(pattern, &region.boundary, zone.direction_rad());
        let mut router = Router::new(
            &region,
            &self.astar,
            self.config.transit_resolution,
            self.config.slow_clearance_m,
            width * self.config.min_spacing_fraction,
            self.config.collinear_tolerance_deg.to_radians(),
        );

        let (used, runs) = match resolved.pattern {
            CoveragePattern::Random => self.random_runs(zone, &region, &router, resolved, width, spacing, budget)?,
            _ => (resolved.pattern, self.pattern_runs(&region, resolved, width, spacing, budget)?),
        };
        if runs.is_empty() {
            return Err(PlanningFailure::NoUsableArea);
        }

        let waypoints = router.assemble(&runs, budget)?;
        if !waypoints.iter().any(|w| w.blade) {
            return Err(PlanningFailure::NoUsableArea);
        }

        let path = Path::new(zone.id, used, waypoints);
        log::info!(
            "Zone {} ({}): {} waypoints, pattern {}, mowing {:.1}m, transit {:.1}m",
            zone.id,
            zone.name,
            path.len(),
            used.as_str(),
            path.mowing_length(),
            path.transit_length()
        );
        Ok(path)
    }

    /// Zone outline minus every relevant obstacle grown by the buffer plus
    /// half the working width.
    fn build_region(&self, zone: &Zone, obstacles: &[Obstacle]) -> Region {
        let margin = zone.obstacle_buffer_m + self.working_width / 2.0;
        let segments = self.config.circle_segments;
        let zone_bounds = zone.boundary.bounds().map(|b| b.expanded(margin));

        let no_mow = zone
            .no_mow_areas
            .iter()
            .map(|area| Obstacle::restricted(0, area.clone()).buffered(margin, segments));
        let others = obstacles
            .iter()
            .filter(|o| o.is_relevant(self.config.obstacle_confidence_floor))
            .filter(|o| match (o.bounds(), zone_bounds) {
                (Some(ob), Some(zb)) => ob.intersects(&zb),
                _ => false,
            })
            .map(|o| o.buffered(margin, segments));

        let holes: Vec<_> = no_mow.chain(others).collect();
        log::debug!("Zone {}: {} obstacle areas after filtering", zone.id, holes.len());
        Region::new(zone.boundary.clone(), holes)
    }

    fn pattern_runs(
        &self,
        region: &Region,
        resolved: ResolvedPattern,
        width: f32,
        spacing: f32,
        budget: &PlanBudget,
    ) -> Result<Vec<Vec<Point2D>>, PlanningFailure> {
        let direction = resolved.direction;
        let runs = match resolved.pattern {
            CoveragePattern::Grid => {
                let first = nearest_next(sweep_lines(region, direction, width, spacing, budget)?, None);
                let start = first.last().and_then(|r| r.last().copied());
                let across = sweep_lines(
                    region,
                    direction + std::f32::consts::FRAC_PI_2,
                    width,
                    spacing,
                    budget,
                )?;
                let mut runs = first;
                runs.extend(nearest_next(across, start));
                runs
            }
            CoveragePattern::Spiral => {
                let rings = contour_rings(&region.boundary, width / 2.0, spacing, self.config.max_rings, budget)?;
                let mut runs = self.ring_pieces(&rings, region, budget)?;
                // Fill whatever the innermost ring leaves
                if let Some(inner) = rings.last() {
                    let core = region.with_boundary(inner.clone());
                    let mut fill = sweep_lines(&core, direction, width, spacing, budget)?;
                    if fill.is_empty() {
                        fill.extend(center_line(&core, direction));
                    }
                    let start = runs.last().and_then(|r| r.last().copied());
                    runs.extend(nearest_next(fill, start));
                }
                runs
            }
            CoveragePattern::PerimeterFirst => {
                let passes = self.config.perimeter_passes;
                let rings = contour_rings(&region.boundary, width / 2.0, spacing, passes, budget)?;
                let mut runs = self.ring_pieces(&rings, region, budget)?;
                // Fill lines continue the ring spacing inward
                if let Some(inner) = region.boundary.offset_inward(passes as f32 * spacing) {
                    let fill = sweep_lines(&region.with_boundary(inner), direction, width, spacing, budget)?;
                    let start = runs.last().and_then(|r| r.last().copied());
                    runs.extend(nearest_next(fill, start));
                }
                runs
            }
            _ => nearest_next(sweep_lines(region, direction, width, spacing, budget)?, None),
        };
        Ok(runs)
    }

    fn ring_pieces(
        &self,
        rings: &[Polygon],
        region: &Region,
        budget: &PlanBudget,
    ) -> Result<Vec<Vec<Point2D>>, PlanningFailure> {
        let mut pieces = Vec::new();
        for ring in rings {
            budget.check()?;
            pieces.extend(ring_runs(ring, &region.holes));
        }
        Ok(nearest_next(pieces, None))
    }

    /// Seeded random points visited in nearest-neighbour order. Legs that
    /// would cross an obstacle split the tour into separate runs.
    #[allow(clippy::too_many_arguments)]
    fn random_runs(
        &self,
        zone: &Zone,
        region: &Region,
        router: &Router<'_>,
        resolved: ResolvedPattern,
        width: f32,
        spacing: f32,
        budget: &PlanBudget,
    ) -> Result<(CoveragePattern, Vec<Vec<Point2D>>), PlanningFailure> {
        let Some(bounds) = region.boundary.bounds() else {
            return Ok((CoveragePattern::Random, Vec::new()));
        };

        let wanted = ((zone.area() / (width * width) * 2.0) as usize)
            .max(50)
            .min(self.config.max_random_points);
        let seed = self.config.random_seed ^ (zone.id as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut points = Vec::with_capacity(wanted);
        let mut attempts = 0usize;
        while points.len() < wanted && attempts < wanted * 20 {
            attempts += 1;
            if attempts % 256 == 0 {
                budget.check()?;
            }
            let p = Point2D::new(
                rng.random_range(bounds.min_x..bounds.max_x),
                rng.random_range(bounds.min_y..bounds.max_y),
            );
            if region.contains(&p) && region.boundary.distance_to_boundary(&p) >= width / 2.0 {
                points.push(p);
            }
        }

        if points.len() < MIN_RANDOM_POINTS {
            log::warn!(
                "Zone {}: only {} random points fit, using parallel lines",
                zone.id,
                points.len()
            );
            let fallback = ResolvedPattern {
                pattern: CoveragePattern::Parallel,
                direction: resolved.direction,
            };
            return Ok((
                CoveragePattern::Parallel,
                self.pattern_runs(region, fallback, width, spacing, budget)?,
            ));
        }

        let tour = nearest_neighbour_tour(points);
        let mut runs: Vec<Vec<Point2D>> = Vec::new();
        let mut current: Vec<Point2D> = Vec::new();
        for p in tour {
            if let Some(last) = current.last()
                && router.needs_routing(last, &p)
            {
                runs.push(std::mem::take(&mut current));
            }
            current.push(p);
        }
        runs.push(current);
        // Isolated points still get visited with the blade on
        for run in runs.iter_mut().filter(|r| r.len() == 1) {
            let p = run[0];
            run.push(p);
        }
        runs.retain(|r| r.len() >= 2);
        Ok((CoveragePattern::Random, runs))
    }
}

fn nearest_neighbour_tour(mut points: Vec<Point2D>) -> Vec<Point2D> {
    if points.is_empty() {
        return points;
    }
    let mut tour = Vec::with_capacity(points.len());
    let mut current = points.swap_remove(0);
    tour.push(current);
    while !points.is_empty() {
        let (idx, _) = points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, p.distance_squared(&current)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .unwrap_or((0, 0.0));
        current = points.swap_remove(idx);
        tour.push(current);
    }
    tour
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::coverage::ObstacleKind;
    use approx::assert_relative_eq;

    fn planner(width: f32) -> CoveragePlanner {
        CoveragePlanner::new(CoverageConfig::default(), width)
    }

    fn square_zone(size: f32) -> Zone {
        Zone {
            overlap_percent: Some(10.0),
            ..Zone::new(1, "lawn", Polygon::rectangle(0.0, 0.0, size, size))
        }
    }

    /// Mowing runs (blade-on stretches) of a path.
    fn mowing_runs(path: &Path) -> Vec<(Point2D, Point2D)> {
        path.waypoints
            .windows(2)
            .filter(|w| w[1].blade)
            .map(|w| (w[0].position, w[1].position))
            .collect()
    }

    #[test]
    fn test_ten_meter_square_has_eleven_lines() {
        let path = planner(1.0).plan(&square_zone(10.0), &[], CoveragePattern::Parallel).unwrap();
        let runs = mowing_runs(&path);
        assert_eq!(runs.len(), 11);

        let mut ys: Vec<f32> = runs.iter().map(|(a, _)| a.y).collect();
        ys.sort_by(f32::total_cmp);
        assert_relative_eq!(ys[0], 0.5, epsilon = 1e-4);
        assert_relative_eq!(ys[10], 9.5, epsilon = 1e-3);
        for w in ys.windows(2) {
            assert_relative_eq!(w[1] - w[0], 0.9, epsilon = 1e-3);
        }
        for (a, b) in &runs {
            assert_relative_eq!(a.y, b.y, epsilon = 1e-4);
            assert_relative_eq!((a.x - b.x).abs(), 9.0, epsilon = 1e-3);
        }
        // Alternating direction
        assert!(runs[0].1.x > runs[0].0.x);
        assert!(runs[1].1.x < runs[1].0.x);
        assert_eq!(path.pattern, CoveragePattern::Parallel);
        assert!(path.verify());
    }

    #[test]
    fn test_invalid_zone() {
        let zone = Zone::new(
            3,
            "sliver",
            Polygon::new(vec![Point2D::new(0.0, 0.0), Point2D::new(1.0, 1.0)]),
        );
        assert!(matches!(
            planner(0.32).plan(&zone, &[], CoveragePattern::Parallel),
            Err(PlanningFailure::InvalidZone(_))
        ));
    }

    #[test]
    fn test_obstacle_covering_zone_leaves_nothing() {
        let zone = square_zone(4.0);
        let rock = Obstacle::polygon(9, ObstacleKind::Static, Polygon::rectangle(-1.0, -1.0, 5.0, 5.0), 0.9);
        assert_eq!(
            planner(0.32).plan(&zone, &[rock], CoveragePattern::Parallel),
            Err(PlanningFailure::NoUsableArea)
        );
    }

    #[test]
    fn test_mowing_keeps_buffer_from_obstacle() {
        let zone = square_zone(10.0);
        let tree = Obstacle::circle(5, ObstacleKind::Static, Point2D::new(5.0, 5.0), 0.5, 0.9);
        let width = 0.32;
        let path = planner(width).plan(&zone, &[tree], CoveragePattern::Parallel).unwrap();

        // Blade-on legs stay `buffer + width/2` from the trunk surface
        let keep_out = 0.5 + zone.obstacle_buffer_m + width / 2.0 - 1e-3;
        for (a, b) in mowing_runs(&path) {
            for i in 0..=50 {
                let p = a.lerp(&b, i as f32 / 50.0);
                assert!(p.distance(&Point2D::new(5.0, 5.0)) >= keep_out);
            }
        }
    }

    #[test]
    fn test_low_confidence_and_dynamic_obstacles_ignored() {
        let zone = square_zone(6.0);
        let clean = planner(0.5).plan(&zone, &[], CoveragePattern::Parallel).unwrap();
        let noise = [
            Obstacle::circle(1, ObstacleKind::Unknown, Point2D::new(3.0, 3.0), 0.4, 0.2),
            Obstacle::circle(2, ObstacleKind::Dynamic, Point2D::new(2.0, 2.0), 0.4, 1.0),
        ];
        let noisy = planner(0.5).plan(&zone, &noise, CoveragePattern::Parallel).unwrap();
        assert_eq!(clean.checksum, noisy.checksum);
    }

    #[test]
    fn test_cancel_and_timeout() {
        let zone = square_zone(10.0);
        let flag = Arc::new(AtomicBool::new(true));
        let budget = PlanBudget::unlimited().with_cancel(flag);
        assert_eq!(
            planner(0.32).plan_with_budget(&zone, &[], CoveragePattern::Parallel, &budget),
            Err(PlanningFailure::Cancelled)
        );

        let budget = PlanBudget::with_timeout(Duration::ZERO);
        assert_eq!(
            planner(0.32).plan_with_budget(&zone, &[], CoveragePattern::Parallel, &budget),
            Err(PlanningFailure::Timeout { budget_ms: 0 })
        );
    }

    #[test]
    fn test_every_pattern_plans_a_square() {
        let zone = square_zone(8.0);
        for pattern in [
            CoveragePattern::Parallel,
            CoveragePattern::Zigzag,
            CoveragePattern::Spiral,
            CoveragePattern::PerimeterFirst,
            CoveragePattern::Grid,
            CoveragePattern::Random,
            CoveragePattern::Adaptive,
        ] {
            let path = planner(0.5).plan(&zone, &[], pattern).unwrap();
            assert!(path.mowing_length() > 0.0, "{:?}", pattern);
            for wp in &path.waypoints {
                assert!(zone.boundary.contains(&wp.position) || zone.boundary.distance_to_boundary(&wp.position) < 1e-3);
            }
        }
    }

    #[test]
    fn test_random_pattern_is_seeded_per_zone() {
        let a = square_zone(6.0);
        let b = Zone { id: 2, ..square_zone(6.0) };
        let p = planner(0.5);
        let first = p.plan(&a, &[], CoveragePattern::Random).unwrap();
        let again = p.plan(&a, &[], CoveragePattern::Random).unwrap();
        let other = p.plan(&b, &[], CoveragePattern::Random).unwrap();
        assert_eq!(first, again);
        assert_ne!(first.checksum, other.checksum);
    }

    #[test]
    fn test_perimeter_first_starts_with_rings() {
        let path = planner(1.0).plan(&square_zone(10.0), &[], CoveragePattern::PerimeterFirst).unwrap();
        // First mowing leg runs along the outer ring, 0.5 m inside
        let (a, b) = mowing_runs(&path)[0];
        let on_ring = |p: &Point2D| {
            (p.x - 0.5).abs() < 1e-3 || (p.x - 9.5).abs() < 1e-3 || (p.y - 0.5).abs() < 1e-3 || (p.y - 9.5).abs() < 1e-3
        };
        assert!(on_ring(&a) && on_ring(&b));
    }
}
