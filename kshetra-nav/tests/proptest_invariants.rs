//! Property-based tests for estimator and planner invariants.
//!
//! Run with: cargo test -p kshetra-nav -- proptest

use kshetra_nav::algorithms::coverage::{CoverageConfig, CoveragePattern, CoveragePlanner, Obstacle, ObstacleKind};
use kshetra_nav::core::geometry::{Polygon, point_segment_distance};
use kshetra_nav::core::math::normalize_angle;
use kshetra_nav::core::types::Point2D;
use kshetra_nav::navigation::Zone;
use kshetra_nav::sensors::fusion::LocalFrame;
use kshetra_nav::sensors::{FusionConfig, FusionEstimator, SensorSample};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

#[derive(Debug, Clone)]
enum Input {
    Odometry(f32, f32),
    Gyro(f32),
    Fix(f32, f32),
}

fn arb_input() -> impl Strategy<Value = Input> {
    prop_oneof![
        4 => (-0.04f32..0.04, -0.04f32..0.04).prop_map(|(l, r)| Input::Odometry(l, r)),
        2 => (-1.0f32..1.0).prop_map(Input::Gyro),
        1 => (-0.5f32..0.5, -0.5f32..0.5).prop_map(|(dx, dy)| Input::Fix(dx, dy)),
    ]
}

/// Rectangle as (min_x, min_y, width, height).
fn arb_rectangle() -> impl Strategy<Value = (f32, f32, f32, f32)> {
    (-5.0f32..5.0, -5.0f32..5.0, 2.0f32..12.0, 2.0f32..12.0)
}

/// Convex lawn: vertices on a rotated ellipse with jittered angles.
fn arb_convex_lawn() -> impl Strategy<Value = Polygon> {
    (6usize..=10)
        .prop_flat_map(|n| {
            (
                3.5f32..5.0,
                0.75f32..1.0,
                0.0f32..std::f32::consts::PI,
                prop::collection::vec(-0.2f32..0.2, n),
            )
        })
        .prop_map(|(a, ratio, rotation, jitter)| {
            let n = jitter.len();
            let step = std::f32::consts::TAU / n as f32;
            let b = a * ratio;
            let points = jitter
                .iter()
                .enumerate()
                .map(|(i, j)| {
                    let t = (i as f32 + j) * step;
                    Point2D::new(a * t.cos(), b * t.sin()).rotate(rotation)
                })
                .collect();
            Polygon::new(points)
        })
}

/// Optional tree near the middle of the lawn as (x, y, radius).
fn arb_tree() -> impl Strategy<Value = Option<(f32, f32, f32)>> {
    prop::option::of((-0.5f32..0.5, -0.5f32..0.5, 0.3f32..0.5))
}

fn arb_fill_pattern() -> impl Strategy<Value = CoveragePattern> {
    prop::sample::select(vec![
        CoveragePattern::Parallel,
        CoveragePattern::Zigzag,
        CoveragePattern::Spiral,
        CoveragePattern::PerimeterFirst,
    ])
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn proptest_normalize_angle_in_range(angle in -100.0f32..100.0) {
        let a = normalize_angle(angle);
        prop_assert!(a >= -std::f32::consts::PI - 1e-5);
        prop_assert!(a <= std::f32::consts::PI + 1e-5);
        prop_assert!((a.sin() - angle.sin()).abs() < 1e-3);
        prop_assert!((a.cos() - angle.cos()).abs() < 1e-3);
    }

    #[test]
    fn proptest_covariance_stays_psd(inputs in prop::collection::vec(arb_input(), 1..120)) {
        let mut est = FusionEstimator::new(FusionConfig::default());
        let frame = LocalFrame::new(12.9716, 77.5946, Point2D::new(0.0, 0.0));
        let mut t = 0u64;

        for input in inputs {
            t += 50_000;
            let sample = match input {
                Input::Odometry(l, r) => SensorSample::odometry(t, l, r),
                Input::Gyro(rate) => SensorSample::inertial(t, rate),
                Input::Fix(dx, dy) => {
                    let p = est.estimate().pose.position();
                    let (lat, lon) = frame.to_geodetic(&Point2D::new(p.x + dx, p.y + dy));
                    SensorSample::satellite(t, lat, lon, 0.3)
                }
            };
            // Rejected samples leave the state as it was
            let _ = est.ingest(&sample);

            let estimate = est.estimate();
            prop_assert!(estimate.covariance.is_positive_semidefinite());
            prop_assert!(estimate.pose.is_finite());
            prop_assert!(estimate.position_sigma().is_finite());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn proptest_parallel_plan_stays_in_zone(
        (x, y, w, h) in arb_rectangle(),
        direction in 0.0f32..180.0,
    ) {
        let zone = Zone {
            direction_deg: direction,
            ..Zone::new(1, "lawn", Polygon::rectangle(x, y, x + w, y + h))
        };
        let planner = CoveragePlanner::new(CoverageConfig::default(), 0.32);

        let path = planner.plan(&zone, &[], CoveragePattern::Parallel).unwrap();
        prop_assert!(path.verify());
        prop_assert!(path.waypoints.iter().any(|wp| wp.blade));
        for wp in path.waypoints.iter().filter(|wp| wp.blade) {
            let p = wp.position;
            prop_assert!(
                p.x >= x - 1e-3 && p.x <= x + w + 1e-3 && p.y >= y - 1e-3 && p.y <= y + h + 1e-3,
                "mowing waypoint {:?} outside the zone", p
            );
        }

        let again = planner.plan(&zone, &[], CoveragePattern::Parallel).unwrap();
        prop_assert_eq!(path, again);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn proptest_plan_leaves_no_gap_wider_than_a_pass(
        boundary in arb_convex_lawn(),
        tree in arb_tree(),
        pattern in arb_fill_pattern(),
        direction in 0.0f32..180.0,
    ) {
        let width = 0.5;
        let config = CoverageConfig { min_spacing_fraction: 0.02, ..CoverageConfig::default() };
        let spacing = width * (1.0 - config.default_overlap_percent / 100.0);
        let segments = config.circle_segments;
        let zone = Zone {
            direction_deg: direction,
            ..Zone::new(1, "lawn", boundary.clone())
        };
        let obstacles: Vec<Obstacle> = tree
            .map(|(x, y, r)| Obstacle::circle(1, ObstacleKind::Static, Point2D::new(x, y), r, 1.0))
            .into_iter()
            .collect();
        let holes: Vec<Polygon> = obstacles
            .iter()
            .map(|o| o.buffered(zone.obstacle_buffer_m + width / 2.0, segments))
            .collect();

        let planner = CoveragePlanner::new(config, width);
        let path = planner.plan(&zone, &obstacles, pattern).unwrap();
        let mown: Vec<(Point2D, Point2D)> = path
            .legs()
            .filter(|(_, to)| to.blade)
            .map(|(from, to)| (from.position, to.position))
            .collect();
        prop_assert!(!mown.is_empty());

        // Mowing lines may sit up to half a spacing from any interior point
        let bound = width / 2.0 + spacing / 2.0 + 0.02;
        let b = boundary.bounds().unwrap();
        let mut y = b.min_y;
        while y <= b.max_y {
            let mut x = b.min_x;
            while x <= b.max_x {
                let p = Point2D::new(x, y);
                let interior = boundary.contains(&p)
                    && boundary.distance_to_boundary(&p) >= width
                    && holes.iter().all(|h| !h.contains(&p) && h.distance_to_boundary(&p) >= width);
                if interior {
                    let gap = mown
                        .iter()
                        .map(|(a, c)| point_segment_distance(&p, a, c))
                        .fold(f32::INFINITY, f32::min);
                    prop_assert!(
                        gap <= bound,
                        "{:?}: point {:?} is {:.3} m from the nearest mown leg (bound {:.3})",
                        pattern, p, gap, bound
                    );
                }
                x += 0.2;
            }
            y += 0.2;
        }
    }
}
