//! Fused pose as published by the estimator.

use serde::{Deserialize, Serialize};

use super::{Covariance2D, Pose2D, Twist2D};

/// Filtered robot state: pose, velocity and uncertainty at a timestamp.
///
/// Only the fusion estimator produces these. Planning and execution read
/// copies and never write back.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub pose: Pose2D,
    pub velocity: Twist2D,
    /// Microseconds on the caller's monotonic clock
    pub timestamp_us: u64,
    pub covariance: Covariance2D,
}

impl Pose {
    pub fn new(pose: Pose2D, velocity: Twist2D, timestamp_us: u64, covariance: Covariance2D) -> Self {
        Self {
            pose,
            velocity,
            timestamp_us,
            covariance,
        }
    }

    /// Stationary pose at `pose` with the given covariance.
    pub fn at_rest(pose: Pose2D, timestamp_us: u64, covariance: Covariance2D) -> Self {
        Self::new(pose, Twist2D::zero(), timestamp_us, covariance)
    }

    #[inline]
    pub fn position_sigma(&self) -> f32 {
        self.covariance.position_sigma()
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::at_rest(Pose2D::identity(), 0, Covariance2D::zero())
    }
}
