//! Timestamped sensor samples.
//!
//! Every sensor driver produces a [`SensorSample`]; the payload is a closed
//! enum so the estimator matches exhaustively on what it can fuse.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which sensor produced a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Odometry,
    Inertial,
    Satellite,
    VisualOdometry,
    Range,
}

impl SensorKind {
    pub const ALL: [SensorKind; 5] = [
        SensorKind::Odometry,
        SensorKind::Inertial,
        SensorKind::Satellite,
        SensorKind::VisualOdometry,
        SensorKind::Range,
    ];

    /// Dense index for per-sensor tables.
    #[inline]
    pub fn index(self) -> usize {
        match self {
            SensorKind::Odometry => 0,
            SensorKind::Inertial => 1,
            SensorKind::Satellite => 2,
            SensorKind::VisualOdometry => 3,
            SensorKind::Range => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SensorKind::Odometry => "odometry",
            SensorKind::Inertial => "inertial",
            SensorKind::Satellite => "satellite",
            SensorKind::VisualOdometry => "visual_odometry",
            SensorKind::Range => "range",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wheel travel since the previous odometry sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OdometryDelta {
    /// Left wheel distance in meters
    pub left_m: f32,
    /// Right wheel distance in meters
    pub right_m: f32,
}

/// IMU reading in the body frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InertialSample {
    /// Forward acceleration (m/s²)
    pub accel_x: f32,
    /// Lateral acceleration (m/s²)
    pub accel_y: f32,
    /// Yaw rate (rad/s, CCW positive)
    pub yaw_rate: f32,
}

/// GNSS position fix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SatelliteFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported horizontal 1σ error in meters
    pub horizontal_error_m: f32,
}

/// Visual odometry motion since the previous visual sample, robot frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisualDelta {
    pub dx: f32,
    pub dy: f32,
    pub dtheta: f32,
}

/// Single range sensor reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeReading {
    pub sensor_id: u8,
    /// Measured distance; `f32::INFINITY` when nothing is in range
    pub distance_m: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SensorPayload {
    Odometry(OdometryDelta),
    Inertial(InertialSample),
    Satellite(SatelliteFix),
    VisualOdometry(VisualDelta),
    Range(RangeReading),
}

/// Timestamped, confidence-weighted sensor sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    /// Sensor clock in microseconds
    pub timestamp_us: u64,
    /// Driver-reported confidence in [0, 1]
    pub confidence: f32,
    pub payload: SensorPayload,
}

impl SensorSample {
    pub fn new(timestamp_us: u64, confidence: f32, payload: SensorPayload) -> Self {
        Self {
            timestamp_us,
            confidence,
            payload,
        }
    }

    pub fn odometry(timestamp_us: u64, left_m: f32, right_m: f32) -> Self {
        Self::new(
            timestamp_us,
            1.0,
            SensorPayload::Odometry(OdometryDelta { left_m, right_m }),
        )
    }

    pub fn inertial(timestamp_us: u64, yaw_rate: f32) -> Self {
        Self::new(
            timestamp_us,
            1.0,
            SensorPayload::Inertial(InertialSample {
                accel_x: 0.0,
                accel_y: 0.0,
                yaw_rate,
            }),
        )
    }

    pub fn satellite(timestamp_us: u64, latitude: f64, longitude: f64, error_m: f32) -> Self {
        Self::new(
            timestamp_us,
            1.0,
            SensorPayload::Satellite(SatelliteFix {
                latitude,
                longitude,
                horizontal_error_m: error_m,
            }),
        )
    }

    pub fn range(timestamp_us: u64, sensor_id: u8, distance_m: f32) -> Self {
        Self::new(
            timestamp_us,
            1.0,
            SensorPayload::Range(RangeReading {
                sensor_id,
                distance_m,
            }),
        )
    }

    #[inline]
    pub fn kind(&self) -> SensorKind {
        match self.payload {
            SensorPayload::Odometry(_) => SensorKind::Odometry,
            SensorPayload::Inertial(_) => SensorKind::Inertial,
            SensorPayload::Satellite(_) => SensorKind::Satellite,
            SensorPayload::VisualOdometry(_) => SensorKind::VisualOdometry,
            SensorPayload::Range(_) => SensorKind::Range,
        }
    }
}
