//! Foundation layer: geometric types, angle math, polygon helpers,
//! checksums and atomic file writes.
//!
//! Nothing in here depends on other crate modules.

pub mod checksum;
pub mod geometry;
pub mod math;
pub mod persist;
pub mod types;

pub use geometry::{Bounds, Polygon};
pub use types::{Covariance2D, Point2D, Pose, Pose2D, Twist2D};
