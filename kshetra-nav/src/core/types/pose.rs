//! Planar point, pose and velocity types.

use serde::{Deserialize, Serialize};

use crate::core::math::normalize_angle;

/// A 2D point in meters, local east/north frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    /// X coordinate in meters
    pub x: f32,
    /// Y coordinate in meters
    pub y: f32,
}

impl Point2D {
    /// Create a new point.
    #[inline]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Squared distance to another point (avoids sqrt).
    #[inline]
    pub fn distance_squared(&self, other: &Point2D) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }

    /// Distance to another point.
    #[inline]
    pub fn distance(&self, other: &Point2D) -> f32 {
        self.distance_squared(other).sqrt()
    }

    /// Vector length.
    #[inline]
    pub fn norm(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    #[inline]
    pub fn add(&self, other: &Point2D) -> Point2D {
        Point2D::new(self.x + other.x, self.y + other.y)
    }

    #[inline]
    pub fn sub(&self, other: &Point2D) -> Point2D {
        Point2D::new(self.x - other.x, self.y - other.y)
    }

    #[inline]
    pub fn scale(&self, k: f32) -> Point2D {
        Point2D::new(self.x * k, self.y * k)
    }

    #[inline]
    pub fn dot(&self, other: &Point2D) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Z component of the 3D cross product.
    #[inline]
    pub fn cross(&self, other: &Point2D) -> f32 {
        self.x * other.y - self.y * other.x
    }

    /// Rotate about the origin by `angle` radians.
    #[inline]
    pub fn rotate(&self, angle: f32) -> Point2D {
        let (s, c) = angle.sin_cos();
        Point2D::new(self.x * c - self.y * s, self.x * s + self.y * c)
    }

    /// Linear interpolation, `t` in [0, 1].
    #[inline]
    pub fn lerp(&self, other: &Point2D, t: f32) -> Point2D {
        Point2D::new(
            self.x + (other.x - self.x) * t,
            self.y + (other.y - self.y) * t,
        )
    }

    /// Heading of the vector from `self` to `other`.
    #[inline]
    pub fn heading_to(&self, other: &Point2D) -> f32 {
        (other.y - self.y).atan2(other.x - self.x)
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Robot pose in 2D space.
///
/// Represents position (x, y) in meters and heading (theta) in radians.
/// Theta is normalized to [-π, π].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose2D {
    /// X position in meters
    pub x: f32,
    /// Y position in meters
    pub y: f32,
    /// Heading in radians, normalized to [-π, π]
    pub theta: f32,
}

impl Pose2D {
    /// Create a new pose with theta normalized to [-π, π].
    #[inline]
    pub fn new(x: f32, y: f32, theta: f32) -> Self {
        Self {
            x,
            y,
            theta: normalize_angle(theta),
        }
    }

    /// Identity pose at origin with zero heading.
    #[inline]
    pub const fn identity() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            theta: 0.0,
        }
    }

    /// Position part of the pose.
    #[inline]
    pub fn position(&self) -> Point2D {
        Point2D::new(self.x, self.y)
    }

    /// Compose two poses: self ⊕ other
    ///
    /// Applies `other` relative to the `self` frame.
    /// ```text
    /// C = A ⊕ B:
    ///   C.x = A.x + B.x * cos(A.θ) - B.y * sin(A.θ)
    ///   C.y = A.y + B.x * sin(A.θ) + B.y * cos(A.θ)
    ///   C.θ = normalize(A.θ + B.θ)
    /// ```
    #[inline]
    pub fn compose(&self, other: &Pose2D) -> Pose2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Pose2D::new(
            self.x + other.x * cos_t - other.y * sin_t,
            self.y + other.x * sin_t + other.y * cos_t,
            self.theta + other.theta,
        )
    }

    /// Inverse transform, so that `p.compose(&p.inverse())` is identity.
    #[inline]
    pub fn inverse(&self) -> Pose2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Pose2D::new(
            -self.x * cos_t - self.y * sin_t,
            self.x * sin_t - self.y * cos_t,
            -self.theta,
        )
    }

    /// Relative pose of `other` expressed in the `self` frame.
    #[inline]
    pub fn between(&self, other: &Pose2D) -> Pose2D {
        self.inverse().compose(other)
    }

    /// Transform a point from local frame to global frame.
    #[inline]
    pub fn transform_point(&self, point: &Point2D) -> Point2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        Point2D::new(
            self.x + point.x * cos_t - point.y * sin_t,
            self.y + point.x * sin_t + point.y * cos_t,
        )
    }

    /// Transform a point from global frame to local frame.
    #[inline]
    pub fn inverse_transform_point(&self, point: &Point2D) -> Point2D {
        let (sin_t, cos_t) = self.theta.sin_cos();
        let dx = point.x - self.x;
        let dy = point.y - self.y;
        Point2D::new(dx * cos_t + dy * sin_t, -dx * sin_t + dy * cos_t)
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.theta.is_finite()
    }
}

impl Default for Pose2D {
    fn default() -> Self {
        Self::identity()
    }
}

/// Planar velocity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Twist2D {
    /// Forward velocity in m/s
    pub linear: f32,
    /// Yaw rate in rad/s (CCW positive)
    pub angular: f32,
}

impl Twist2D {
    #[inline]
    pub const fn new(linear: f32, angular: f32) -> Self {
        Self { linear, angular }
    }

    #[inline]
    pub const fn zero() -> Self {
        Self {
            linear: 0.0,
            angular: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_point_distance() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(3.0, 4.0);
        assert_relative_eq!(a.distance(&b), 5.0);
        assert_relative_eq!(a.distance_squared(&b), 25.0);
    }

    #[test]
    fn test_point_rotate_and_cross() {
        let p = Point2D::new(1.0, 0.0).rotate(FRAC_PI_2);
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(Point2D::new(1.0, 0.0).cross(&Point2D::new(0.0, 1.0)), 1.0);
    }

    #[test]
    fn test_pose_inverse_roundtrip() {
        let p = Pose2D::new(1.0, 2.0, 0.5);
        let result = p.compose(&p.inverse());
        assert_relative_eq!(result.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(result.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(result.theta, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_pose_between() {
        let a = Pose2D::new(1.0, 1.0, FRAC_PI_2);
        let b = Pose2D::new(1.0, 3.0, FRAC_PI_2);
        let rel = a.between(&b);
        assert_relative_eq!(rel.x, 2.0, epsilon = 1e-6);
        assert_relative_eq!(rel.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(rel.theta, 0.0, epsilon = 1e-6);

        let back = a.compose(&rel);
        assert_relative_eq!(back.x, b.x, epsilon = 1e-6);
        assert_relative_eq!(back.y, b.y, epsilon = 1e-6);
    }

    #[test]
    fn test_transform_point_roundtrip() {
        let pose = Pose2D::new(1.0, 0.0, FRAC_PI_2);
        let global = pose.transform_point(&Point2D::new(1.0, 0.0));
        assert_relative_eq!(global.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(global.y, 1.0, epsilon = 1e-6);

        let local = pose.inverse_transform_point(&global);
        assert_relative_eq!(local.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(local.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_pose_composition_order() {
        let forward = Pose2D::new(1.0, 0.0, 0.0);
        let rotate = Pose2D::new(0.0, 0.0, FRAC_PI_2);

        let a = forward.compose(&rotate);
        assert_relative_eq!(a.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(a.theta, FRAC_PI_2, epsilon = 1e-6);

        let b = rotate.compose(&forward);
        assert_relative_eq!(b.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(b.y, 1.0, epsilon = 1e-6);
    }
}
