//! Differential-drive kinematics.
//!
//! Converts left/right wheel travel into a pose delta in the robot frame
//! at the start of the motion (x forward, y left, θ CCW).

use crate::core::types::Pose2D;

#[derive(Debug, Clone, Copy)]
pub struct DifferentialDrive {
    /// Distance between wheel centers in meters
    pub wheel_base: f32,
}

impl DifferentialDrive {
    pub fn new(wheel_base: f32) -> Self {
        Self { wheel_base }
    }

    /// Pose delta for the given wheel displacements.
    ///
    /// Uses the midpoint heading approximation:
    /// ```text
    /// d  = (l + r) / 2
    /// dθ = (r - l) / wheel_base
    /// Δ  = (d·cos(dθ/2), d·sin(dθ/2), dθ)
    /// ```
    pub fn delta(&self, left_m: f32, right_m: f32) -> Pose2D {
        let d = 0.5 * (left_m + right_m);
        let dtheta = (right_m - left_m) / self.wheel_base;
        let (s, c) = (0.5 * dtheta).sin_cos();
        Pose2D::new(d * c, d * s, dtheta)
    }

    /// Wheel displacements that produce the given body motion.
    pub fn inverse(&self, distance_m: f32, dtheta: f32) -> (f32, f32) {
        let half = 0.5 * dtheta * self.wheel_base;
        (distance_m - half, distance_m + half)
    }
}
