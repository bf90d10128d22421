//! Three-state error-state Kalman filter over (x, y, θ).
//!
//! The nominal state carries the best pose estimate; the error state
//! (δx, δy, δθ) is estimated by each correction, injected into the nominal
//! pose and reset to zero.
//!
//! # Algorithm
//!
//! 1. **Prediction**: compose the nominal pose with the odometry delta,
//!    propagate `P' = F P Fᵀ + Q`
//! 2. **Correction**: any subset of the state is observed directly
//!    (H is rows of the identity); Joseph-form covariance update
//! 3. **Guard**: the innovation covariance must be positive definite and the
//!    posterior positive semi-definite, otherwise nothing is changed

use crate::core::types::{Covariance2D, Mat3, Pose2D, mat3_add, mat3_mul, mat3_transpose};
use crate::error::DropReason;

#[derive(Debug, Clone)]
pub struct ErrorStateFilter {
    /// Nominal state (best estimate)
    nominal: Pose2D,
    /// Error-state covariance P over [δx, δy, δθ]
    covariance: Covariance2D,
    /// Encoder heading change since the last inertial correction
    pending_encoder_dtheta: f32,
}

/// Observation of a subset of the state.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    /// Observed state indices (0 = x, 1 = y, 2 = θ)
    pub rows: &'a [usize],
    /// z - h(x), heading entries already normalized
    pub innovation: &'a [f32],
    /// Diagonal of R
    pub noise: &'a [f32],
    /// Optional χ² gate on the Mahalanobis distance
    pub gate: Option<f32>,
}

impl ErrorStateFilter {
    pub fn new(pose: Pose2D, covariance: Covariance2D) -> Self {
        Self {
            nominal: pose,
            covariance,
            pending_encoder_dtheta: 0.0,
        }
    }

    #[inline]
    pub fn pose(&self) -> Pose2D {
        self.nominal
    }

    #[inline]
    pub fn covariance(&self) -> Covariance2D {
        self.covariance
    }

    /// Overwrite the state, for relocalization.
    pub fn reset(&mut self, pose: Pose2D, covariance: Covariance2D) {
        self.nominal = pose;
        self.covariance = covariance;
        self.pending_encoder_dtheta = 0.0;
    }

    /// Prediction step with a robot-frame odometry delta.
    ///
    /// `q` is the diagonal of the process noise for this step.
    pub fn predict(&mut self, delta: Pose2D, q: [f32; 3]) {
        // Jacobian of x' = x ⊕ δ with respect to x, at the prior heading:
        // | 1  0  -δx·sinθ - δy·cosθ |
        // | 0  1   δx·cosθ - δy·sinθ |
        // | 0  0   1                  |
        let (sin_t, cos_t) = self.nominal.theta.sin_cos();
        let f02 = -delta.x * sin_t - delta.y * cos_t;
        let f12 = delta.x * cos_t - delta.y * sin_t;

        self.nominal = self.nominal.compose(&delta);
        self.pending_encoder_dtheta += delta.theta;

        let p = self.covariance.as_slice();

        // P·Fᵀ, exploiting F = I except for the last column
        let pft00 = p[0] + p[2] * f02;
        let pft01 = p[1] + p[2] * f12;
        let pft02 = p[2];
        let pft10 = p[3] + p[5] * f02;
        let pft11 = p[4] + p[5] * f12;
        let pft12 = p[5];
        let pft20 = p[6] + p[8] * f02;
        let pft21 = p[7] + p[8] * f12;
        let pft22 = p[8];

        let new_p = [
            pft00 + f02 * pft20 + q[0],
            pft01 + f02 * pft21,
            pft02 + f02 * pft22,
            pft10 + f12 * pft20,
            pft11 + f12 * pft21 + q[1],
            pft12 + f12 * pft22,
            pft20,
            pft21,
            pft22 + q[2],
        ];

        self.covariance = Covariance2D::from_array(new_p).symmetrized();
    }

    /// Encoder heading change since the last inertial correction.
    #[inline]
    pub fn pending_heading(&self) -> f32 {
        self.pending_encoder_dtheta
    }

    pub fn take_pending_heading(&mut self) -> f32 {
        std::mem::take(&mut self.pending_encoder_dtheta)
    }

    /// Correction step. Returns the Mahalanobis distance of the innovation.
    ///
    /// On error the state is left untouched.
    pub fn correct(&mut self, obs: Observation<'_>) -> Result<f32, DropReason> {
        let m = obs.rows.len();
        if m == 0 || m > 3 || obs.innovation.len() != m || obs.noise.len() != m {
            return Err(DropReason::NumericalFault);
        }
        if obs.innovation.iter().chain(obs.noise).any(|v| !v.is_finite()) {
            return Err(DropReason::NumericalFault);
        }

        let p = *self.covariance.as_slice();

        // S = H P Hᵀ + R
        let mut s = [[0.0f32; 3]; 3];
        for a in 0..m {
            for b in 0..m {
                s[a][b] = p[obs.rows[a] * 3 + obs.rows[b]];
            }
            s[a][a] += obs.noise[a];
        }
        let s_inv = invert_spd(&s, m).ok_or(DropReason::NumericalFault)?;

        let mut mahalanobis = 0.0;
        for a in 0..m {
            for b in 0..m {
                mahalanobis += obs.innovation[a] * s_inv[a][b] * obs.innovation[b];
            }
        }
        if let Some(gate) = obs.gate
            && mahalanobis > gate
        {
            return Err(DropReason::OutlierRejected);
        }

        // K = P Hᵀ S⁻¹ (3 x m)
        let mut k = [[0.0f32; 3]; 3];
        for i in 0..3 {
            for a in 0..m {
                k[i][a] = (0..m).map(|b| p[i * 3 + obs.rows[b]] * s_inv[b][a]).sum();
            }
        }

        let mut dx = [0.0f32; 3];
        for (i, d) in dx.iter_mut().enumerate() {
            *d = (0..m).map(|a| k[i][a] * obs.innovation[a]).sum();
        }

        // Joseph form: P' = (I - KH) P (I - KH)ᵀ + K R Kᵀ
        let mut ikh: Mat3 = [0.0; 9];
        let mut krk: Mat3 = [0.0; 9];
        for i in 0..3 {
            for j in 0..3 {
                let kh: f32 = (0..m).filter(|&a| obs.rows[a] == j).map(|a| k[i][a]).sum();
                let identity = if i == j { 1.0 } else { 0.0 };
                ikh[i * 3 + j] = identity - kh;
                krk[i * 3 + j] = (0..m).map(|a| k[i][a] * obs.noise[a] * k[j][a]).sum();
            }
        }
        let joseph = mat3_mul(&mat3_mul(&ikh, &p), &mat3_transpose(&ikh));
        let posterior = Covariance2D::from_array(mat3_add(&joseph, &krk)).symmetrized();

        if !posterior.is_positive_semidefinite() || dx.iter().any(|v| !v.is_finite()) {
            return Err(DropReason::NumericalFault);
        }

        self.nominal = Pose2D::new(
            self.nominal.x + dx[0],
            self.nominal.y + dx[1],
            self.nominal.theta + dx[2],
        );
        self.covariance = posterior;
        Ok(mahalanobis)
    }

    /// Shift the nominal state by a world-frame correction.
    pub fn inject(&mut self, delta: Pose2D) {
        self.nominal = Pose2D::new(
            self.nominal.x + delta.x,
            self.nominal.y + delta.y,
            self.nominal.theta + delta.theta,
        );
    }
}

/// Inverse of the leading m x m block through Cholesky; `None` unless
/// positive definite.
fn invert_spd(s: &[[f32; 3]; 3], m: usize) -> Option<[[f32; 3]; 3]> {
    let mut l = [[0.0f32; 3]; 3];
    for i in 0..m {
        for j in 0..=i {
            let sum: f32 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let d = s[i][i] - sum;
                if d <= 1e-12 || !d.is_finite() {
                    return None;
                }
                l[i][j] = d.sqrt();
            } else {
                l[i][j] = (s[i][j] - sum) / l[j][j];
            }
        }
    }

    // Solve L Lᵀ X = I column by column
    let mut inv = [[0.0f32; 3]; 3];
    for col in 0..m {
        let mut y = [0.0f32; 3];
        for i in 0..m {
            let rhs = if i == col { 1.0 } else { 0.0 };
            let sum: f32 = (0..i).map(|k| l[i][k] * y[k]).sum();
            y[i] = (rhs - sum) / l[i][i];
        }
        for i in (0..m).rev() {
            let sum: f32 = ((i + 1)..m).map(|k| l[k][i] * inv[k][col]).sum();
            inv[i][col] = (y[i] - sum) / l[i][i];
        }
    }
    Some(inv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn filter() -> ErrorStateFilter {
        ErrorStateFilter::new(Pose2D::identity(), Covariance2D::diagonal(0.01, 0.01, 0.01))
    }

    #[test]
    fn test_predict_grows_covariance() {
        let mut f = filter();
        f.predict(Pose2D::new(1.0, 0.0, 0.0), [0.01, 0.01, 0.0]);
        assert_relative_eq!(f.pose().x, 1.0);
        let p = f.covariance();
        assert!(p.var_x() > 0.01);
        // Heading uncertainty leaks into lateral position
        assert!(p.var_y() > 0.02);
        assert!(p.get(1, 2) > 0.0);
        assert!(p.is_positive_semidefinite());
    }

    #[test]
    fn test_position_correction_pulls_toward_measurement() {
        let mut f = filter();
        let d = f
            .correct(Observation {
                rows: &[0, 1],
                innovation: &[1.0, 0.0],
                noise: &[0.01, 0.01],
                gate: None,
            })
            .unwrap();
        assert!(d > 0.0);
        assert_relative_eq!(f.pose().x, 0.5, epsilon = 1e-5);
        assert_relative_eq!(f.covariance().var_x(), 0.005, epsilon = 1e-6);
    }

    #[test]
    fn test_gate_rejects_without_change() {
        let mut f = filter();
        let before = f.pose();
        let err = f
            .correct(Observation {
                rows: &[0, 1],
                innovation: &[10.0, 0.0],
                noise: &[0.01, 0.01],
                gate: Some(13.8),
            })
            .unwrap_err();
        assert_eq!(err, DropReason::OutlierRejected);
        assert_eq!(f.pose(), before);
    }

    #[test]
    fn test_indefinite_covariance_rejected() {
        let mut f = filter();
        f.reset(Pose2D::identity(), Covariance2D::diagonal(-1.0, 1.0, 1.0));
        let err = f
            .correct(Observation {
                rows: &[0, 1],
                innovation: &[0.1, 0.1],
                noise: &[0.01, 0.01],
                gate: None,
            })
            .unwrap_err();
        assert_eq!(err, DropReason::NumericalFault);
        assert_eq!(f.covariance().var_x(), -1.0);
    }

    #[test]
    fn test_heading_correction() {
        let mut f = filter();
        f.correct(Observation {
            rows: &[2],
            innovation: &[0.2],
            noise: &[0.01],
            gate: None,
        })
        .unwrap();
        assert_relative_eq!(f.pose().theta, 0.1, epsilon = 1e-5);
    }

    #[test]
    fn test_invert_spd() {
        let s = [[4.0, 1.0, 0.0], [1.0, 3.0, 0.0], [0.0, 0.0, 2.0]];
        let inv = invert_spd(&s, 3).unwrap();
        for i in 0..3 {
            for j in 0..3 {
                let v: f32 = (0..3).map(|k| s[i][k] * inv[k][j]).sum();
                assert_relative_eq!(v, if i == j { 1.0 } else { 0.0 }, epsilon = 1e-5);
            }
        }
        assert!(invert_spd(&[[-1.0, 0.0, 0.0], [0.0; 3], [0.0; 3]], 1).is_none());
    }
}
