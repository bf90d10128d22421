//! Range evidence into the map, map persistence, and detours over it.

use kshetra_nav::algorithms::mapping::{MapLoadStatus, MapManager, OccupancyGridConfig};
use kshetra_nav::algorithms::planning::{AStarConfig, AStarPlanner, InflatedGrid};
use kshetra_nav::core::types::{Point2D, Twist2D};
use kshetra_nav::navigation::{AvoidanceConfig, AvoidanceController};
use kshetra_nav::sensors::{RangeReading, SensorPayload};
use kshetra_nav::sim::{SimConfig, SimObstacle, Simulator};

const ROCK: Point2D = Point2D { x: 1.5, y: 0.0 };

fn small_map() -> OccupancyGridConfig {
    OccupancyGridConfig {
        width_m: 10.0,
        height_m: 10.0,
        ..Default::default()
    }
}

/// Park in front of a rock and feed every range scan into the map.
fn observe_rock(map: &MapManager, scans: usize) {
    let avoidance = AvoidanceController::new(AvoidanceConfig::default());
    let mut sim = Simulator::new(
        SimConfig {
            obstacles: vec![SimObstacle {
                center: ROCK,
                radius: 0.3,
            }],
            satellite: None,
            ..Default::default()
        },
        avoidance.config().sensors.clone(),
    );

    for _ in 0..scans {
        let readings: Vec<RangeReading> = sim
            .step(0.05, Twist2D::zero(), false)
            .into_iter()
            .filter_map(|s| match s.payload {
                SensorPayload::Range(r) => Some(r),
                _ => None,
            })
            .collect();
        map.integrate(&avoidance.detections(&sim.pose(), &readings, 0.9));
    }
}

#[test]
fn test_range_hits_mark_the_rock() {
    let map = MapManager::new(small_map());
    observe_rock(&map, 10);

    let view = map.snapshot();
    assert!(view.version() > 0);
    assert!(!view.obstacle_cells_within(&Point2D::new(1.2, 0.0), 0.15).is_empty());
    // Free space along the beam
    assert!(!view.is_obstacle(&Point2D::new(0.7, 0.0)));
    assert!(view.probability_at(&Point2D::new(0.7, 0.0)) < 0.5);
}

#[test]
fn test_detour_over_saved_map() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lawn.ksmp");

    let map = MapManager::new(small_map());
    observe_rock(&map, 10);
    map.save(&path).unwrap();

    let (loaded, status) = MapManager::load_or_empty(&path, small_map());
    assert_eq!(status, MapLoadStatus::Loaded);
    let view = loaded.snapshot();
    assert_eq!(
        view.grid().count_obstacles(),
        map.snapshot().grid().count_obstacles()
    );

    let grid = InflatedGrid::from_map(&view, 0.3, &[]);
    let start = Point2D::new(0.0, 0.0);
    let goal = Point2D::new(3.0, 0.0);
    assert!(!grid.line_of_sight(&start, &goal));

    let route = AStarPlanner::new(AStarConfig::default())
        .plan(&grid, &start, &goal)
        .unwrap();
    assert_eq!(route.first(), Some(&start));
    assert_eq!(route.last(), Some(&goal));
    for pair in route.windows(2) {
        assert!(grid.line_of_sight(&pair[0], &pair[1]));
    }
    let length: f32 = route.windows(2).map(|w| w[0].distance(&w[1])).sum();
    assert!(length > 3.0);
}

#[test]
fn test_corrupted_map_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lawn.ksmp");

    let map = MapManager::new(small_map());
    observe_rock(&map, 5);
    map.save(&path).unwrap();

    let mut bytes = std::fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x5a;
    std::fs::write(&path, bytes).unwrap();

    assert!(MapManager::load(&path, small_map()).is_err());
    let (fresh, status) = MapManager::load_or_empty(&path, small_map());
    assert_eq!(status, MapLoadStatus::Corrupted);
    assert!(status.requires_relocalization());
    assert_eq!(fresh.snapshot().grid().count_obstacles(), 0);
}
