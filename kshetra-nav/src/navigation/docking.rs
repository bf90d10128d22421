//! Return-to-dock along an approach corridor.
//!
//! ```text
//!   entry ●━━━━━━━━━━━━━━━━━━━━━━━▶ ■ dock
//!         |<── corridor_length ──>|
//!          corridor_width wide, centered on the dock heading
//! ```
//!
//! The robot drives to the corridor entry, aligns with the dock heading and
//! creeps along the corridor axis. Leaving the corridor sends it back to
//! the entry for another attempt.

use serde::{Deserialize, Serialize};

use super::pursuit::{PursuitConfig, drive_to};
use crate::core::math::{angle_diff, clamp_abs};
use crate::core::types::{Point2D, Pose2D, Twist2D};

/// Charging dock and its approach corridor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DockingTarget {
    /// Pose of the robot when docked.
    pub dock_pose: Pose2D,
    pub corridor_length_m: f32,
    pub corridor_width_m: f32,
}

impl Default for DockingTarget {
    fn default() -> Self {
        Self {
            dock_pose: Pose2D::identity(),
            corridor_length_m: 1.5,
            corridor_width_m: 0.4,
        }
    }
}

impl DockingTarget {
    /// Start of the corridor, `corridor_length_m` behind the dock.
    pub fn entry(&self) -> Point2D {
        let (s, c) = self.dock_pose.theta.sin_cos();
        Point2D::new(
            self.dock_pose.x - c * self.corridor_length_m,
            self.dock_pose.y - s * self.corridor_length_m,
        )
    }

    /// Position in the dock frame: x along the corridor (negative before the
    /// dock), y lateral.
    fn to_dock_frame(&self, p: &Point2D) -> Point2D {
        self.dock_pose.inverse_transform_point(p)
    }

    pub fn in_corridor(&self, p: &Point2D) -> bool {
        let local = self.to_dock_frame(p);
        local.x >= -self.corridor_length_m - 0.1 && local.x <= 0.05 && local.y.abs() <= self.corridor_width_m / 2.0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockingConfig {
    pub target: DockingTarget,
    /// Distance at which the robot counts as docked (meters).
    pub dock_tolerance_m: f32,
    /// Heading error allowed before entering the corridor (radians).
    pub align_tolerance_rad: f32,
    /// Corridor creep speed (m/s).
    pub corridor_speed: f32,
    /// Approach speed to the entry (m/s).
    pub approach_speed: f32,
    /// Lateral correction gain inside the corridor.
    pub kp_lateral: f32,
    pub max_attempts: u32,
}

impl Default for DockingConfig {
    fn default() -> Self {
        Self {
            target: DockingTarget::default(),
            dock_tolerance_m: 0.05,
            align_tolerance_rad: 0.05,
            corridor_speed: 0.1,
            approach_speed: 0.3,
            kp_lateral: 2.0,
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DockingPhase {
    /// Driving to the corridor entry.
    Approach,
    /// Rotating onto the dock heading at the entry.
    Align,
    /// Creeping along the corridor.
    Corridor,
    Docked,
    Failed,
}

/// Corridor docking controller.
#[derive(Debug, Clone)]
pub struct DockingController {
    config: DockingConfig,
    phase: DockingPhase,
    attempts: u32,
}

impl DockingController {
    pub fn new(config: DockingConfig) -> Self {
        Self {
            config,
            phase: DockingPhase::Approach,
            attempts: 0,
        }
    }

    pub fn phase(&self) -> DockingPhase {
        self.phase
    }

    pub fn target(&self) -> &DockingTarget {
        &self.config.target
    }

    /// Start a fresh docking run.
    pub fn reset(&mut self) {
        self.phase = DockingPhase::Approach;
        self.attempts = 0;
    }

    /// True when `pose` is already past the approach phase.
    pub fn at_entry(&self, pose: &Pose2D) -> bool {
        pose.position().distance(&self.config.target.entry()) < self.config.dock_tolerance_m * 3.0
    }

    /// Reverse out of the corridor. `None` once the robot is back at the
    /// entry or not in the corridor at all.
    pub fn undock_step(&self, pose: &Pose2D) -> Option<Twist2D> {
        let target = &self.config.target;
        let here = pose.position();
        if !target.in_corridor(&here) {
            return None;
        }
        let local = target.to_dock_frame(&here);
        if local.x <= -target.corridor_length_m + self.config.dock_tolerance_m {
            return None;
        }
        Some(Twist2D::new(-self.config.corridor_speed, 0.0))
    }

    /// One control step.
    pub fn step(&mut self, pose: &Pose2D, pursuit: &PursuitConfig) -> Twist2D {
        let target = self.config.target;
        match self.phase {
            DockingPhase::Approach => {
                let entry = target.entry();
                if self.at_entry(pose) {
                    self.phase = DockingPhase::Align;
                    return Twist2D::zero();
                }
                drive_to(pose, &entry, self.config.approach_speed, pursuit)
            }
            DockingPhase::Align => {
                let error = angle_diff(pose.theta, target.dock_pose.theta);
                if error.abs() < self.config.align_tolerance_rad {
                    log::debug!("Aligned at corridor entry, entering corridor");
                    self.phase = DockingPhase::Corridor;
                    return Twist2D::zero();
                }
                Twist2D::new(0.0, clamp_abs(pursuit.kp_angular * error, pursuit.max_angular_vel * 0.5))
            }
            DockingPhase::Corridor => {
                let here = pose.position();
                let local = target.to_dock_frame(&here);
                if local.x.abs() < self.config.dock_tolerance_m && local.y.abs() < self.config.dock_tolerance_m
                    || local.x >= 0.0 && local.y.abs() < target.corridor_width_m / 2.0
                {
                    log::info!("Docked (attempt {})", self.attempts + 1);
                    self.phase = DockingPhase::Docked;
                    return Twist2D::zero();
                }
                if !target.in_corridor(&here) {
                    self.attempts += 1;
                    if self.attempts >= self.config.max_attempts {
                        log::warn!("Docking failed after {} attempts", self.attempts);
                        self.phase = DockingPhase::Failed;
                    } else {
                        log::warn!("Left docking corridor, retrying (attempt {})", self.attempts + 1);
                        self.phase = DockingPhase::Approach;
                    }
                    return Twist2D::zero();
                }
                // Steer back onto the corridor axis
                let heading_error = angle_diff(pose.theta, target.dock_pose.theta);
                let angular = clamp_abs(
                    pursuit.kp_angular * heading_error - self.config.kp_lateral * local.y,
                    pursuit.max_angular_vel * 0.5,
                );
                Twist2D::new(self.config.corridor_speed, angular)
            }
            DockingPhase::Docked | DockingPhase::Failed => Twist2D::zero(),
        }
    }
}
