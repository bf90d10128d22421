//! Core geometric types.
//!
//! - [`Point2D`], [`Pose2D`]: positions and rigid transforms
//! - [`Twist2D`]: planar velocity
//! - [`Covariance2D`]: 3x3 pose uncertainty
//! - [`Pose`]: fused estimate (pose + velocity + covariance + time)

mod covariance;
mod fused;
mod pose;

pub use covariance::{
    Covariance2D, Mat3, mat3_add, mat3_det, mat3_identity, mat3_inverse, mat3_mul, mat3_transpose,
};
pub use fused::Pose;
pub use pose::{Point2D, Pose2D, Twist2D};
