//! Angle arithmetic shared by the estimator, optimizer and controllers.

use std::f32::consts::PI;

/// Normalize angle to [-π, π].
///
/// # Example
/// ```
/// use kshetra_nav::core::math::normalize_angle;
/// use std::f32::consts::PI;
///
/// assert!((normalize_angle(3.0 * PI) - PI).abs() < 1e-6);
/// assert!((normalize_angle(-3.0 * PI) - (-PI)).abs() < 1e-6);
/// ```
#[inline]
pub fn normalize_angle(angle: f32) -> f32 {
    let mut a = angle % (2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    } else if a < -PI {
        a += 2.0 * PI;
    }
    a
}

/// f64 variant used inside the graph optimizer.
#[inline]
pub fn normalize_angle_f64(angle: f64) -> f64 {
    use std::f64::consts::PI as PI64;
    let mut a = angle % (2.0 * PI64);
    if a > PI64 {
        a -= 2.0 * PI64;
    } else if a < -PI64 {
        a += 2.0 * PI64;
    }
    a
}

/// Signed shortest rotation that takes `a` to `b`.
#[inline]
pub fn angle_diff(a: f32, b: f32) -> f32 {
    normalize_angle(b - a)
}

/// Interpolate between two headings along the short arc. `t` in [0, 1].
#[inline]
pub fn angle_lerp(a: f32, b: f32, t: f32) -> f32 {
    normalize_angle(a + angle_diff(a, b) * t)
}

/// Clamp `value` to `[-limit, limit]`.
#[inline]
pub fn clamp_abs(value: f32, limit: f32) -> f32 {
    value.clamp(-limit, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_normalize_angle_wraps() {
        assert_relative_eq!(normalize_angle(0.0), 0.0);
        assert_relative_eq!(normalize_angle(2.0 * PI), 0.0, epsilon = 1e-6);
        assert_relative_eq!(normalize_angle(3.0 * PI), PI, epsilon = 1e-6);
        assert_relative_eq!(normalize_angle(-3.0 * PI), -PI, epsilon = 1e-6);
        assert_relative_eq!(normalize_angle(100.0 * PI), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_normalize_angle_f64_matches_f32() {
        for a in [-7.0f32, -3.2, -0.5, 0.0, 1.0, 3.3, 9.0] {
            assert_relative_eq!(
                normalize_angle_f64(a as f64) as f32,
                normalize_angle(a),
                epsilon = 1e-5
            );
        }
    }

    #[test]
    fn test_angle_diff_crossing_pi() {
        assert_relative_eq!(angle_diff(PI - 0.1, -PI + 0.1), 0.2, epsilon = 1e-6);
        assert_relative_eq!(angle_diff(-PI + 0.1, PI - 0.1), -0.2, epsilon = 1e-6);
    }

    #[test]
    fn test_angle_lerp_short_arc() {
        assert_relative_eq!(angle_lerp(0.0, PI / 2.0, 0.5), PI / 4.0);
        assert_relative_eq!(angle_lerp(PI - 0.1, -PI + 0.1, 0.5).abs(), PI, epsilon = 1e-6);
    }

    #[test]
    fn test_clamp_abs() {
        assert_eq!(clamp_abs(2.0, 0.5), 0.5);
        assert_eq!(clamp_abs(-2.0, 0.5), -0.5);
        assert_eq!(clamp_abs(0.1, 0.5), 0.1);
    }
}
