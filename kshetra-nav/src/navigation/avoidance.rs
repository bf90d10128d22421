//! Reactive obstacle avoidance.
//!
//! ```text
//!            nearest ≤ detection_range        nearest ≤ stop_distance
//!   Clear ───────────────────────────► Caution ───────────────────► Blocked
//!     ▲                                                               │
//!     │ Deviate                                  blocked ≥ grace      │
//!     └─────────────────────────── Replanning ◄───────────────────────┘
//!                                      │ A* fails: attempt counted, Blocked
//! ```
//!
//! A reading at or under `collision_distance` stops immediately and is
//! reported as imminent collision. Detours are planned on the current map
//! snapshot plus the live obstacle points, then checked against
//! `safety_margin` before they are handed out.

use serde::{Deserialize, Serialize};

use super::path::Path;
use crate::algorithms::mapping::{Detection, MapView};
use crate::algorithms::planning::{AStarConfig, AStarPlanner, InflatedGrid};
use crate::core::geometry::point_segment_distance;
use crate::core::types::{Point2D, Pose2D};
use crate::sensors::RangeReading;

/// Where a range sensor sits on the robot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeSensorMount {
    pub sensor_id: u8,
    /// Beam direction relative to the robot heading (radians)
    pub bearing_rad: f32,
    /// Sensor position in the robot frame (meters)
    pub offset: Point2D,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvoidanceConfig {
    /// Readings beyond this are ignored (meters).
    pub detection_range: f32,
    /// Readings at or below this block the robot (meters).
    pub stop_distance: f32,
    /// Readings at or below this are an imminent collision (meters).
    pub collision_distance: f32,
    /// Speed factor while an obstacle is in detection range.
    pub caution_speed_scale: f32,
    /// Time blocked before a detour is planned.
    pub replan_grace_ms: u64,
    /// Clearance every detour point keeps from obstacles (meters).
    pub safety_margin: f32,
    /// Minimum distance ahead at which the detour rejoins the path (meters).
    pub rejoin_distance: f32,
    /// Failed detour attempts before the blockage is reported as exhausted.
    pub max_attempts: u32,
    /// A range reading counts until it is this old; sensors slower than the
    /// control tick keep their last distance in between (milliseconds).
    pub reading_max_age_ms: u64,
    pub sensors: Vec<RangeSensorMount>,
    pub astar: AStarConfig,
}

impl Default for AvoidanceConfig {
    fn default() -> Self {
        Self {
            detection_range: 2.0,
            stop_distance: 0.5,
            collision_distance: 0.15,
            caution_speed_scale: 0.5,
            replan_grace_ms: 1500,
            safety_margin: 0.2,
            rejoin_distance: 1.5,
            max_attempts: 3,
            reading_max_age_ms: 300,
            sensors: vec![
                RangeSensorMount {
                    sensor_id: 0,
                    bearing_rad: 0.0,
                    offset: Point2D::new(0.30, 0.0),
                },
                RangeSensorMount {
                    sensor_id: 1,
                    bearing_rad: 0.6,
                    offset: Point2D::new(0.28, 0.12),
                },
                RangeSensorMount {
                    sensor_id: 2,
                    bearing_rad: -0.6,
                    offset: Point2D::new(0.28, -0.12),
                },
            ],
            astar: AStarConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AvoidanceState {
    Clear,
    Caution,
    Blocked,
    Replanning,
}

impl AvoidanceState {
    pub fn as_str(self) -> &'static str {
        match self {
            AvoidanceState::Clear => "clear",
            AvoidanceState::Caution => "caution",
            AvoidanceState::Blocked => "blocked",
            AvoidanceState::Replanning => "replanning",
        }
    }
}

/// Detour around a blockage, rejoining the main path at `rejoin_index`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPath {
    /// Detour points after the robot position; the last one is the rejoin
    /// waypoint.
    pub waypoints: Vec<Point2D>,
    pub rejoin_index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AvoidanceDecision {
    Continue { speed_scale: f32 },
    Deviate(LocalPath),
    Stop { collision_imminent: bool },
}

/// What the robot is currently following.
#[derive(Debug, Clone, Copy)]
pub struct ActivePath<'a> {
    pub path: &'a Path,
    /// Index of the next main-path waypoint.
    pub index: usize,
    /// Remaining points of a detour being driven, if any.
    pub detour: Option<&'a [Point2D]>,
}

impl<'a> ActivePath<'a> {
    pub fn new(path: &'a Path, index: usize) -> Self {
        Self {
            path,
            index,
            detour: None,
        }
    }

    pub fn with_detour(mut self, detour: &'a [Point2D]) -> Self {
        self.detour = Some(detour);
        self
    }
}

/// Latest reading per range sensor with the time it was taken.
#[derive(Debug, Clone, Default)]
pub struct ReadingWindow {
    held: Vec<(RangeReading, u64)>,
    current: Vec<RangeReading>,
}

impl ReadingWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the held reading of the same sensor unless that one is newer.
    pub fn insert(&mut self, reading: RangeReading, timestamp_us: u64) {
        match self.held.iter_mut().find(|(r, _)| r.sensor_id == reading.sensor_id) {
            Some(slot) if slot.1 <= timestamp_us => *slot = (reading, timestamp_us),
            Some(_) => {}
            None => self.held.push((reading, timestamp_us)),
        }
    }

    /// Drop readings older than `max_age_ms` at `now_us` and return the rest.
    pub fn refresh(&mut self, now_us: u64, max_age_ms: u64) -> &[RangeReading] {
        let max_age_us = max_age_ms * 1000;
        self.held
            .retain(|(_, t)| now_us.saturating_sub(*t) <= max_age_us);
        self.current.clear();
        self.current.extend(self.held.iter().map(|(r, _)| *r));
        &self.current
    }

    /// Readings kept by the last [`refresh`](Self::refresh).
    pub fn current(&self) -> &[RangeReading] {
        &self.current
    }

    pub fn clear(&mut self) {
        self.held.clear();
        self.current.clear();
    }
}

pub struct AvoidanceController {
    config: AvoidanceConfig,
    planner: AStarPlanner,
    state: AvoidanceState,
    blocked_since_us: Option<u64>,
    attempts: u32,
}

impl AvoidanceController {
    pub fn new(config: AvoidanceConfig) -> Self {
        let planner = AStarPlanner::new(config.astar.clone());
        Self {
            config,
            planner,
            state: AvoidanceState::Clear,
            blocked_since_us: None,
            attempts: 0,
        }
    }

    pub fn config(&self) -> &AvoidanceConfig {
        &self.config
    }

    pub fn state(&self) -> AvoidanceState {
        self.state
    }

    /// Failed detour attempts for the current blockage.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The current blockage has used up its detour attempts.
    pub fn exhausted(&self) -> bool {
        self.attempts >= self.config.max_attempts
    }

    pub fn reset(&mut self) {
        self.state = AvoidanceState::Clear;
        self.blocked_since_us = None;
        self.attempts = 0;
    }

    /// World-frame obstacle points from the readings within detection range.
    pub fn live_points(&self, pose: &Pose2D, readings: &[RangeReading]) -> Vec<Point2D> {
        readings
            .iter()
            .filter(|r| r.distance_m.is_finite() && r.distance_m <= self.config.detection_range)
            .filter_map(|r| self.beam_end(pose, r.sensor_id, r.distance_m))
            .collect()
    }

    /// Map evidence for the readings: a hit for returns in detection range,
    /// a miss out to the range limit otherwise.
    pub fn detections(&self, pose: &Pose2D, readings: &[RangeReading], confidence: f32) -> Vec<Detection> {
        let mut out = Vec::with_capacity(readings.len());
        for r in readings {
            let Some(mount) = self.mount(r.sensor_id) else {
                continue;
            };
            let origin = pose.transform_point(&mount.offset);
            if r.distance_m.is_finite() && r.distance_m <= self.config.detection_range {
                if let Some(hit) = self.beam_end(pose, r.sensor_id, r.distance_m) {
                    out.push(Detection::RangeHit {
                        origin,
                        hit,
                        confidence,
                    });
                }
            } else if let Some(end) = self.beam_end(pose, r.sensor_id, self.config.detection_range) {
                out.push(Detection::RangeMiss {
                    origin,
                    end,
                    confidence,
                });
            }
        }
        out
    }

    fn mount(&self, sensor_id: u8) -> Option<&RangeSensorMount> {
        self.config.sensors.iter().find(|m| m.sensor_id == sensor_id)
    }

    fn beam_end(&self, pose: &Pose2D, sensor_id: u8, distance: f32) -> Option<Point2D> {
        let mount = self.mount(sensor_id)?;
        let origin = pose.transform_point(&mount.offset);
        let bearing = pose.theta + mount.bearing_rad;
        Some(Point2D::new(
            origin.x + distance * bearing.cos(),
            origin.y + distance * bearing.sin(),
        ))
    }

    /// Decide how to proceed given the latest range readings.
    pub fn evaluate(
        &mut self,
        pose: &Pose2D,
        readings: &[RangeReading],
        active: &ActivePath,
        map: &MapView,
        now_us: u64,
    ) -> AvoidanceDecision {
        let nearest = readings
            .iter()
            .map(|r| r.distance_m)
            .filter(|d| d.is_finite())
            .fold(f32::INFINITY, f32::min);

        if nearest <= self.config.collision_distance {
            if self.state != AvoidanceState::Blocked {
                log::warn!("Collision imminent: obstacle at {:.2}m", nearest);
            }
            self.enter_blocked(now_us);
            return AvoidanceDecision::Stop {
                collision_imminent: true,
            };
        }

        let live = self.live_points(pose, readings);
        let blocking = nearest <= self.config.stop_distance
            && active
                .detour
                .is_none_or(|detour| self.detour_obstructed(pose, detour, &live));

        if blocking {
            if self.state != AvoidanceState::Blocked {
                log::info!("Path blocked at {:.2}m", nearest);
                self.enter_blocked(now_us);
                return AvoidanceDecision::Stop {
                    collision_imminent: false,
                };
            }
            let since = self.blocked_since_us.unwrap_or(now_us);
            if now_us.saturating_sub(since) < self.config.replan_grace_ms * 1000 {
                return AvoidanceDecision::Stop {
                    collision_imminent: false,
                };
            }

            self.state = AvoidanceState::Replanning;
            return match self.plan_detour(pose, active, map, &live) {
                Some(local) => {
                    log::info!(
                        "Detour of {} points rejoins at waypoint {}",
                        local.waypoints.len(),
                        local.rejoin_index
                    );
                    self.reset();
                    AvoidanceDecision::Deviate(local)
                }
                None => {
                    self.attempts += 1;
                    log::warn!(
                        "Detour planning failed (attempt {}/{})",
                        self.attempts,
                        self.config.max_attempts
                    );
                    self.state = AvoidanceState::Blocked;
                    self.blocked_since_us = Some(now_us);
                    AvoidanceDecision::Stop {
                        collision_imminent: false,
                    }
                }
            };
        }

        self.blocked_since_us = None;
        if nearest <= self.config.detection_range {
            self.state = AvoidanceState::Caution;
            AvoidanceDecision::Continue {
                speed_scale: self.config.caution_speed_scale,
            }
        } else {
            self.state = AvoidanceState::Clear;
            self.attempts = 0;
            AvoidanceDecision::Continue { speed_scale: 1.0 }
        }
    }

    fn enter_blocked(&mut self, now_us: u64) {
        if self.state != AvoidanceState::Blocked {
            self.blocked_since_us = Some(now_us);
        }
        self.state = AvoidanceState::Blocked;
    }

    /// A live point sits within the safety margin of the remaining detour.
    fn detour_obstructed(&self, pose: &Pose2D, detour: &[Point2D], live: &[Point2D]) -> bool {
        let mut prev = pose.position();
        for next in detour {
            if live
                .iter()
                .any(|p| point_segment_distance(p, &prev, next) < self.config.safety_margin)
            {
                return true;
            }
            prev = *next;
        }
        false
    }

    fn plan_detour(
        &self,
        pose: &Pose2D,
        active: &ActivePath,
        map: &MapView,
        live: &[Point2D],
    ) -> Option<LocalPath> {
        let resolution = map.grid().resolution();
        // Two cells of slack cover cell quantization on both ends
        let inflation = self.config.safety_margin + 2.0 * resolution;
        let here = pose.position();

        let rejoin_index = (active.index..active.path.len()).find(|&i| {
            active.path.get(i).is_some_and(|wp| {
                let p = wp.position;
                p.distance(&here) >= self.config.rejoin_distance
                    && map.obstacle_cells_within(&p, inflation).is_empty()
                    && live.iter().all(|o| o.distance(&p) > inflation)
            })
        })?;
        let goal = active.path.get(rejoin_index)?.position;

        let grid = InflatedGrid::from_map(map, inflation, live);
        let route = match self.planner.plan(&grid, &here, &goal) {
            Ok(route) => route,
            Err(e) => {
                log::debug!("Detour search failed: {}", e);
                return None;
            }
        };

        let waypoints: Vec<Point2D> = route.into_iter().skip(1).collect();
        if waypoints.is_empty() || !self.keeps_margin(&here, &waypoints, map, live, resolution) {
            return None;
        }
        Some(LocalPath {
            waypoints,
            rejoin_index,
        })
    }

    /// Every detour point and the legs between them keep `safety_margin`
    /// from obstacle cells and live points.
    fn keeps_margin(
        &self,
        start: &Point2D,
        waypoints: &[Point2D],
        map: &MapView,
        live: &[Point2D],
        resolution: f32,
    ) -> bool {
        let margin = self.config.safety_margin;
        let step = (resolution / 2.0).max(0.01);
        let clear = |p: &Point2D| {
            map.obstacle_cells_within(p, margin).is_empty() && live.iter().all(|o| o.distance(p) >= margin)
        };

        let mut prev = *start;
        for next in waypoints {
            let samples = (prev.distance(next) / step).ceil().max(1.0) as usize;
            for k in 1..=samples {
                if !clear(&prev.lerp(next, k as f32 / samples as f32)) {
                    return false;
                }
            }
            prev = *next;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::coverage::CoveragePattern;
    use crate::algorithms::mapping::{MapManager, OccupancyGridConfig};
    use crate::core::geometry::Polygon;
    use crate::navigation::path::{SpeedClass, Waypoint};

    fn map_config() -> OccupancyGridConfig {
        OccupancyGridConfig {
            width_m: 10.0,
            height_m: 10.0,
            ..Default::default()
        }
    }

    fn straight_path() -> Path {
        let waypoints = (0..=8)
            .map(|i| Waypoint::new(Point2D::new(i as f32 * 0.5, 0.0), 0.0, SpeedClass::Mowing, true))
            .collect();
        Path::new(1, CoveragePattern::Parallel, waypoints)
    }

    fn front(distance_m: f32) -> Vec<RangeReading> {
        vec![RangeReading {
            sensor_id: 0,
            distance_m,
        }]
    }

    #[test]
    fn test_clear_and_caution() {
        let mut avoid = AvoidanceController::new(AvoidanceConfig::default());
        let map = MapManager::new(map_config()).snapshot();
        let path = straight_path();
        let active = ActivePath::new(&path, 1);
        let pose = Pose2D::identity();

        let d = avoid.evaluate(&pose, &front(f32::INFINITY), &active, &map, 0);
        assert_eq!(d, AvoidanceDecision::Continue { speed_scale: 1.0 });
        assert_eq!(avoid.state(), AvoidanceState::Clear);

        let d = avoid.evaluate(&pose, &front(1.2), &active, &map, 50_000);
        assert_eq!(d, AvoidanceDecision::Continue { speed_scale: 0.5 });
        assert_eq!(avoid.state(), AvoidanceState::Caution);
    }

    #[test]
    fn test_collision_distance_is_imminent() {
        let mut avoid = AvoidanceController::new(AvoidanceConfig::default());
        let map = MapManager::new(map_config()).snapshot();
        let path = straight_path();
        let d = avoid.evaluate(&Pose2D::identity(), &front(0.1), &ActivePath::new(&path, 1), &map, 0);
        assert_eq!(
            d,
            AvoidanceDecision::Stop {
                collision_imminent: true
            }
        );
    }

    #[test]
    fn test_blocked_then_detour_keeps_margin() {
        let config = AvoidanceConfig::default();
        let margin = config.safety_margin;
        let grace_us = config.replan_grace_ms * 1000;
        let mut avoid = AvoidanceController::new(config);
        let map = MapManager::new(map_config()).snapshot();
        let path = straight_path();
        let active = ActivePath::new(&path, 1);
        let pose = Pose2D::identity();
        let readings = front(0.4);

        let d = avoid.evaluate(&pose, &readings, &active, &map, 0);
        assert_eq!(
            d,
            AvoidanceDecision::Stop {
                collision_imminent: false
            }
        );
        assert_eq!(avoid.state(), AvoidanceState::Blocked);

        // Still inside the grace period
        let d = avoid.evaluate(&pose, &readings, &active, &map, grace_us / 2);
        assert!(matches!(d, AvoidanceDecision::Stop { .. }));

        let d = avoid.evaluate(&pose, &readings, &active, &map, grace_us);
        let AvoidanceDecision::Deviate(local) = d else {
            panic!("expected a detour, got {:?}", d);
        };
        assert_eq!(avoid.state(), AvoidanceState::Clear);
        assert_eq!(local.rejoin_index, 3);
        let obstacle = Point2D::new(0.7, 0.0);
        for p in &local.waypoints {
            assert!(p.distance(&obstacle) >= margin);
        }
        let last = local.waypoints.last().unwrap();
        assert!(last.distance(&Point2D::new(1.5, 0.0)) < 1e-4);
    }

    #[test]
    fn test_slow_sensor_stays_blocked_until_detour() {
        let config = AvoidanceConfig::default();
        let max_age_ms = config.reading_max_age_ms;
        let tick_us = 50_000u64;
        let ticks = config.replan_grace_ms * 1000 / tick_us + 4;
        let mut avoid = AvoidanceController::new(config);
        let map = MapManager::new(map_config()).snapshot();
        let path = straight_path();
        let active = ActivePath::new(&path, 1);
        let mut window = ReadingWindow::new();

        let mut detour = None;
        for tick in 0..ticks {
            let now_us = tick * tick_us;
            // Sensor reports on every other control tick
            if tick % 2 == 0 {
                window.insert(front(0.4)[0], now_us);
            }
            let readings = window.refresh(now_us, max_age_ms).to_vec();
            assert_eq!(readings.len(), 1, "tick {} lost the held reading", tick);

            match avoid.evaluate(&Pose2D::identity(), &readings, &active, &map, now_us) {
                AvoidanceDecision::Deviate(local) => {
                    detour = Some(local);
                    break;
                }
                AvoidanceDecision::Continue { speed_scale } => {
                    panic!("tick {}: drove on at {} toward the obstacle", tick, speed_scale)
                }
                AvoidanceDecision::Stop { collision_imminent } => {
                    assert!(!collision_imminent);
                    assert_eq!(avoid.state(), AvoidanceState::Blocked);
                }
            }
        }
        assert!(detour.is_some(), "no detour after the grace period");
    }

    #[test]
    fn test_reading_window_expires_old_readings() {
        let mut window = ReadingWindow::new();
        window.insert(RangeReading { sensor_id: 0, distance_m: 0.4 }, 1_000_000);
        window.insert(RangeReading { sensor_id: 1, distance_m: 1.2 }, 1_100_000);
        // Older report of sensor 0 arriving late keeps the newer one
        window.insert(RangeReading { sensor_id: 0, distance_m: 0.9 }, 900_000);

        let current = window.refresh(1_250_000, 300);
        assert_eq!(current.len(), 2);
        assert!(current.iter().any(|r| r.sensor_id == 0 && r.distance_m == 0.4));

        let current = window.refresh(1_350_000, 300);
        assert_eq!(current, &[RangeReading { sensor_id: 1, distance_m: 1.2 }]);

        assert!(window.refresh(2_000_000, 300).is_empty());
        assert!(window.current().is_empty());
    }

    #[test]
    fn test_walled_off_path_counts_attempts() {
        let manager = MapManager::new(map_config());
        manager.integrate(&[Detection::Region {
            area: Polygon::rectangle(1.0, -6.0, 1.4, 6.0),
            confidence: 1.0,
        }]);
        let map = manager.snapshot();

        let config = AvoidanceConfig {
            max_attempts: 2,
            ..Default::default()
        };
        let grace_us = config.replan_grace_ms * 1000;
        let mut avoid = AvoidanceController::new(config);
        let path = straight_path();
        let active = ActivePath::new(&path, 1);
        let readings = front(0.4);

        avoid.evaluate(&Pose2D::identity(), &readings, &active, &map, 0);
        let d = avoid.evaluate(&Pose2D::identity(), &readings, &active, &map, grace_us);
        assert!(matches!(d, AvoidanceDecision::Stop { .. }));
        assert_eq!(avoid.attempts(), 1);
        assert_eq!(avoid.state(), AvoidanceState::Blocked);

        avoid.evaluate(&Pose2D::identity(), &readings, &active, &map, 2 * grace_us);
        assert!(avoid.exhausted());
    }

    #[test]
    fn test_detour_ignores_obstacle_it_avoids() {
        let mut avoid = AvoidanceController::new(AvoidanceConfig::default());
        let map = MapManager::new(map_config()).snapshot();
        let path = straight_path();
        let detour = [
            Point2D::new(-0.6, 0.3),
            Point2D::new(-0.6, 1.6),
            Point2D::new(1.5, 1.6),
            Point2D::new(1.5, 0.0),
        ];
        let active = ActivePath::new(&path, 3).with_detour(&detour);

        // Robot turned onto the detour, obstacle off to its right
        let pose = Pose2D::new(0.0, 0.0, std::f32::consts::FRAC_PI_2);
        let readings = vec![RangeReading {
            sensor_id: 2,
            distance_m: 0.45,
        }];
        let d = avoid.evaluate(&pose, &readings, &active, &map, 0);
        assert!(matches!(d, AvoidanceDecision::Continue { .. }));
    }

    #[test]
    fn test_detections_from_readings() {
        let avoid = AvoidanceController::new(AvoidanceConfig::default());
        let readings = vec![
            RangeReading {
                sensor_id: 0,
                distance_m: 1.0,
            },
            RangeReading {
                sensor_id: 1,
                distance_m: f32::INFINITY,
            },
            RangeReading {
                sensor_id: 9,
                distance_m: 1.0,
            },
        ];
        let detections = avoid.detections(&Pose2D::identity(), &readings, 0.9);
        assert_eq!(detections.len(), 2);
        assert!(matches!(detections[0], Detection::RangeHit { hit, .. } if (hit.x - 1.3).abs() < 1e-5));
        assert!(matches!(detections[1], Detection::RangeMiss { .. }));
    }
}
