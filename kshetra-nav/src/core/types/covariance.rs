//! 3x3 pose covariance over (x, y, θ) and the small dense helpers the
//! filter needs.

use serde::{Deserialize, Serialize};

/// Row-major 3x3 matrix.
pub type Mat3 = [f32; 9];

/// Pose covariance matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Covariance2D {
    /// Row-major 3x3 matrix data
    data: Mat3,
}

impl Covariance2D {
    /// Create a zero covariance matrix.
    #[inline]
    pub fn zero() -> Self {
        Self { data: [0.0; 9] }
    }

    /// Create a diagonal covariance matrix.
    ///
    /// Parameters are variances: xx = σ²_x, yy = σ²_y, tt = σ²_θ
    #[inline]
    pub fn diagonal(xx: f32, yy: f32, tt: f32) -> Self {
        Self {
            data: [xx, 0.0, 0.0, 0.0, yy, 0.0, 0.0, 0.0, tt],
        }
    }

    /// Create from row-major array.
    #[inline]
    pub fn from_array(data: Mat3) -> Self {
        Self { data }
    }

    /// Get raw data as slice.
    #[inline]
    pub fn as_slice(&self) -> &Mat3 {
        &self.data
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * 3 + col]
    }

    #[inline]
    pub fn var_x(&self) -> f32 {
        self.data[0]
    }

    #[inline]
    pub fn var_y(&self) -> f32 {
        self.data[4]
    }

    /// Get variance of theta (element [2,2]).
    #[inline]
    pub fn var_theta(&self) -> f32 {
        self.data[8]
    }

    #[inline]
    pub fn trace(&self) -> f32 {
        self.data[0] + self.data[4] + self.data[8]
    }

    /// Combined horizontal standard deviation, sqrt(σ²_x + σ²_y).
    #[inline]
    pub fn position_sigma(&self) -> f32 {
        (self.var_x() + self.var_y()).max(0.0).sqrt()
    }

    /// Average with the transpose to remove round-off asymmetry.
    pub fn symmetrized(&self) -> Self {
        let d = &self.data;
        let xy = 0.5 * (d[1] + d[3]);
        let xt = 0.5 * (d[2] + d[6]);
        let yt = 0.5 * (d[5] + d[7]);
        Self {
            data: [d[0], xy, xt, xy, d[4], yt, xt, yt, d[8]],
        }
    }

    /// Positive semi-definite check on every principal minor.
    ///
    /// The tolerance scales with the trace so that large covariances are
    /// not rejected for f32 round-off.
    pub fn is_positive_semidefinite(&self) -> bool {
        if self.data.iter().any(|v| !v.is_finite()) {
            return false;
        }
        let d = &self.data;
        let scale = self.trace().abs().max(1.0);
        let tol = 1e-5 * scale;
        let tol2 = 1e-5 * scale * scale;
        let tol3 = 1e-5 * scale * scale * scale;

        // Asymmetry beyond tolerance means the update went wrong
        if (d[1] - d[3]).abs() > tol || (d[2] - d[6]).abs() > tol || (d[5] - d[7]).abs() > tol {
            return false;
        }

        if d[0] < -tol || d[4] < -tol || d[8] < -tol {
            return false;
        }

        let m_xy = d[0] * d[4] - d[1] * d[3];
        let m_xt = d[0] * d[8] - d[2] * d[6];
        let m_yt = d[4] * d[8] - d[5] * d[7];
        if m_xy < -tol2 || m_xt < -tol2 || m_yt < -tol2 {
            return false;
        }

        mat3_det(d) >= -tol3
    }
}

impl Default for Covariance2D {
    fn default() -> Self {
        Self::zero()
    }
}

/// C = A * B
pub fn mat3_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut c = [0.0; 9];
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                c[i * 3 + j] += a[i * 3 + k] * b[k * 3 + j];
            }
        }
    }
    c
}

/// Aᵀ
pub fn mat3_transpose(a: &Mat3) -> Mat3 {
    [a[0], a[3], a[6], a[1], a[4], a[7], a[2], a[5], a[8]]
}

pub fn mat3_add(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut c = [0.0; 9];
    for i in 0..9 {
        c[i] = a[i] + b[i];
    }
    c
}

pub fn mat3_identity() -> Mat3 {
    [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
}

pub fn mat3_det(a: &Mat3) -> f32 {
    a[0] * (a[4] * a[8] - a[5] * a[7]) - a[1] * (a[3] * a[8] - a[5] * a[6])
        + a[2] * (a[3] * a[7] - a[4] * a[6])
}

/// Inverse of a 3x3 matrix, `None` when singular.
pub fn mat3_inverse(a: &Mat3) -> Option<Mat3> {
    let det = mat3_det(a);
    if det.abs() < 1e-12 || !det.is_finite() {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        (a[4] * a[8] - a[5] * a[7]) * inv_det,
        (a[2] * a[7] - a[1] * a[8]) * inv_det,
        (a[1] * a[5] - a[2] * a[4]) * inv_det,
        (a[5] * a[6] - a[3] * a[8]) * inv_det,
        (a[0] * a[8] - a[2] * a[6]) * inv_det,
        (a[2] * a[3] - a[0] * a[5]) * inv_det,
        (a[3] * a[7] - a[4] * a[6]) * inv_det,
        (a[1] * a[6] - a[0] * a[7]) * inv_det,
        (a[0] * a[4] - a[1] * a[3]) * inv_det,
    ])
}
