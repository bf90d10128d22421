//! Sensor processing layer.
//!
//! # Contents
//!
//! - [`sample`]: Timestamped sensor samples and payloads
//! - [`odometry`]: Differential-drive kinematics
//! - [`fusion`]: Error-state Kalman fusion of every pose sensor

pub mod fusion;
pub mod odometry;
pub mod sample;

pub use fusion::{FusionConfig, FusionEstimator, FusionEvent, FusionHealth, IngestOutcome};
pub use odometry::DifferentialDrive;
pub use sample::{
    InertialSample, OdometryDelta, RangeReading, SatelliteFix, SensorKind, SensorPayload,
    SensorSample, VisualDelta,
};
