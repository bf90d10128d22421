//! Path follower using pure pursuit.
//!
//! Steers toward a lookahead point on the leg ending at the current target
//! waypoint. Large heading errors are removed by rotating in place first.

use serde::{Deserialize, Serialize};

use super::path::{Path, SpeedClass};
use crate::core::math::{angle_diff, clamp_abs};
use crate::core::types::{Point2D, Pose2D, Twist2D};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PursuitConfig {
    /// Lookahead distance along the current leg (meters).
    pub lookahead_m: f32,
    /// A waypoint counts as reached within this distance (meters).
    pub arrival_tolerance_m: f32,
    /// Heading errors above this rotate in place (radians).
    pub rotate_in_place_rad: f32,
    pub max_linear_vel: f32,
    pub max_angular_vel: f32,
    /// Proportional gain for in-place rotation.
    pub kp_angular: f32,
    /// Fractions of `max_linear_vel` per speed class.
    pub transit_speed: f32,
    pub slow_speed: f32,
}

impl Default for PursuitConfig {
    fn default() -> Self {
        Self {
            lookahead_m: 0.5,
            arrival_tolerance_m: 0.15,
            rotate_in_place_rad: 0.6,
            max_linear_vel: 0.5,
            max_angular_vel: 1.0,
            kp_angular: 2.0,
            transit_speed: 0.8,
            slow_speed: 0.3,
        }
    }
}

/// One control step of the follower.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PursuitCommand {
    pub twist: Twist2D,
    pub blade: bool,
    /// Waypoint currently driven to.
    pub target_index: usize,
    /// Waypoints reached during this step.
    pub reached: usize,
    pub complete: bool,
}

/// Tracks progress along a path.
#[derive(Debug, Clone)]
pub struct PurePursuit {
    config: PursuitConfig,
    index: usize,
}

impl PurePursuit {
    pub fn new(config: PursuitConfig) -> Self {
        Self { config, index: 0 }
    }

    pub fn config(&self) -> &PursuitConfig {
        &self.config
    }

    /// Index of the waypoint currently driven to.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Continue from `index` (resume or after a replan).
    pub fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    /// Velocity command toward the path at `pose`.
    ///
    /// `mowing_speed` is the zone's fraction of the maximum linear speed.
    pub fn command(&mut self, pose: &Pose2D, path: &Path, mowing_speed: f32) -> PursuitCommand {
        let here = pose.position();
        let mut reached = 0;
        while let Some(wp) = path.get(self.index)
            && wp.position.distance(&here) < self.config.arrival_tolerance_m
        {
            self.index += 1;
            reached += 1;
        }

        let Some(target) = path.get(self.index) else {
            return PursuitCommand {
                twist: Twist2D::zero(),
                blade: false,
                target_index: self.index,
                reached,
                complete: true,
            };
        };

        let leg_start = self
            .index
            .checked_sub(1)
            .and_then(|i| path.get(i))
            .map(|w| w.position)
            .unwrap_or(here);
        let lookahead = lookahead_point(&here, &leg_start, &target.position, self.config.lookahead_m);

        let speed_fraction = match target.speed {
            SpeedClass::Mowing => mowing_speed,
            SpeedClass::Transit => self.config.transit_speed,
            SpeedClass::Slow => self.config.slow_speed,
        };
        let twist = self.steer(pose, &lookahead, speed_fraction.clamp(0.0, 1.0) * self.config.max_linear_vel);

        PursuitCommand {
            twist,
            blade: target.blade,
            target_index: self.index,
            reached,
            complete: false,
        }
    }

    fn steer(&self, pose: &Pose2D, lookahead: &Point2D, speed: f32) -> Twist2D {
        let here = pose.position();
        let error = angle_diff(pose.theta, here.heading_to(lookahead));
        if error.abs() > self.config.rotate_in_place_rad {
            return Twist2D::new(0.0, clamp_abs(self.config.kp_angular * error, self.config.max_angular_vel));
        }

        // Curvature of the arc through the lookahead point
        let ld = here.distance(lookahead).max(1e-3);
        let curvature = 2.0 * error.sin() / ld;
        let mut linear = speed;
        let mut angular = curvature * linear;
        if angular.abs() > self.config.max_angular_vel {
            linear *= self.config.max_angular_vel / angular.abs();
            angular = clamp_abs(angular, self.config.max_angular_vel);
        }
        Twist2D::new(linear, angular)
    }
}

/// Point `lookahead` meters past the projection of `p` onto `a`-`b`,
/// clamped to `b`.
fn lookahead_point(p: &Point2D, a: &Point2D, b: &Point2D, lookahead: f32) -> Point2D {
    let ab = b.sub(a);
    let len = ab.norm();
    if len < 1e-6 {
        return *b;
    }
    let t = (p.sub(a).dot(&ab) / (len * len)).clamp(0.0, 1.0);
    let s = (t * len + lookahead).min(len);
    a.add(&ab.scale(s / len))
}

/// Drive to a single point: rotate in place above the threshold, then
/// straight with proportional heading correction.
pub fn drive_to(pose: &Pose2D, goal: &Point2D, speed: f32, config: &PursuitConfig) -> Twist2D {
    let error = angle_diff(pose.theta, pose.position().heading_to(goal));
    let angular = clamp_abs(config.kp_angular * error, config.max_angular_vel);
    if error.abs() > config.rotate_in_place_rad {
        Twist2D::new(0.0, angular)
    } else {
        Twist2D::new(speed * error.cos().max(0.0), angular)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::coverage::CoveragePattern;
    use crate::navigation::path::Waypoint;
    use approx::assert_relative_eq;

    fn straight_path() -> Path {
        Path::new(
            1,
            CoveragePattern::Parallel,
            vec![
                Waypoint::new(Point2D::new(0.0, 0.0), 0.0, SpeedClass::Transit, false),
                Waypoint::new(Point2D::new(5.0, 0.0), 0.0, SpeedClass::Mowing, true),
            ],
        )
    }

    #[test]
    fn test_aligned_robot_drives_straight() {
        let mut follower = PurePursuit::new(PursuitConfig::default());
        let cmd = follower.command(&Pose2D::new(0.0, 0.0, 0.0), &straight_path(), 0.6);
        assert_eq!(cmd.reached, 1);
        assert_eq!(cmd.target_index, 1);
        assert!(cmd.blade);
        assert_relative_eq!(cmd.twist.linear, 0.3, epsilon = 1e-5);
        assert_relative_eq!(cmd.twist.angular, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_large_heading_error_rotates_in_place() {
        let mut follower = PurePursuit::new(PursuitConfig::default());
        let cmd = follower.command(&Pose2D::new(0.0, 0.0, std::f32::consts::PI), &straight_path(), 0.6);
        assert_eq!(cmd.twist.linear, 0.0);
        assert!(cmd.twist.angular.abs() > 0.0);
    }

    #[test]
    fn test_offset_robot_steers_back() {
        let mut follower = PurePursuit::new(PursuitConfig::default());
        follower.set_index(1);
        let cmd = follower.command(&Pose2D::new(1.0, 0.3, 0.0), &straight_path(), 0.6);
        // Left of the line: turn right
        assert!(cmd.twist.angular < 0.0);
        assert!(cmd.twist.linear > 0.0);
    }

    #[test]
    fn test_completion() {
        let mut follower = PurePursuit::new(PursuitConfig::default());
        follower.set_index(1);
        let cmd = follower.command(&Pose2D::new(4.95, 0.0, 0.0), &straight_path(), 0.6);
        assert!(cmd.complete);
        assert_eq!(cmd.twist, Twist2D::zero());
    }
}
