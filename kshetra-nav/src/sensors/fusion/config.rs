//! Fusion estimator configuration.

use serde::{Deserialize, Serialize};

use crate::sensors::SensorKind;

/// Static per-sensor trust weights in (0, 1].
///
/// Trust divides measurement (or process) noise, so a lower weight makes
/// the filter lean less on that sensor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustWeights {
    pub odometry: f32,
    pub inertial: f32,
    pub satellite: f32,
    pub visual: f32,
}

impl Default for TrustWeights {
    fn default() -> Self {
        Self {
            odometry: 0.5,
            inertial: 0.8,
            satellite: 0.7,
            visual: 0.6,
        }
    }
}

impl TrustWeights {
    pub fn get(&self, kind: SensorKind) -> f32 {
        match kind {
            SensorKind::Odometry => self.odometry,
            SensorKind::Inertial => self.inertial,
            SensorKind::Satellite => self.satellite,
            SensorKind::VisualOdometry => self.visual,
            SensorKind::Range => 1.0,
        }
    }
}

/// Process noise growth for the odometry prediction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessNoise {
    /// Position noise variance per meter traveled (m²/m)
    pub position_var_per_meter: f32,
    /// Heading noise variance per radian turned (rad²/rad)
    pub heading_var_per_radian: f32,
}

impl Default for ProcessNoise {
    fn default() -> Self {
        Self {
            position_var_per_meter: 0.01,
            heading_var_per_radian: 0.01,
        }
    }
}

/// Measurement noise for the correcting sensors.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct MeasurementNoise {
    /// Gyroscope variance (rad/s)²
    pub gyro_variance: f32,
    /// Visual odometry position variance per meter of step (m²/m)
    pub visual_position_var_per_meter: f32,
    /// Visual odometry heading variance (rad²)
    pub visual_heading_variance: f32,
    /// Lower bound on satellite σ in meters
    pub satellite_min_sigma_m: f32,
}

impl Default for MeasurementNoise {
    fn default() -> Self {
        Self {
            gyro_variance: 0.001,
            visual_position_var_per_meter: 0.004,
            visual_heading_variance: 0.002,
            satellite_min_sigma_m: 0.02,
        }
    }
}

/// Physical plausibility bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PlausibilityLimits {
    /// Satellite fixes with larger reported error are dropped
    pub satellite_error_ceiling_m: f32,
    /// |accel| above this (m/s²) is implausible, 4 g
    pub max_acceleration: f32,
    /// |yaw rate| above this (rad/s) is implausible
    pub max_yaw_rate: f32,
    /// Maximum wheel travel in one odometry sample
    pub max_wheel_step_m: f32,
    /// Maximum translation in one visual odometry sample
    pub max_visual_step_m: f32,
    /// Maximum rotation in one visual odometry sample
    pub max_visual_rotation_rad: f32,
}

impl Default for PlausibilityLimits {
    fn default() -> Self {
        Self {
            satellite_error_ceiling_m: 5.0,
            max_acceleration: 39.2,
            max_yaw_rate: 10.0,
            max_wheel_step_m: 0.5,
            max_visual_step_m: 1.0,
            max_visual_rotation_rad: std::f32::consts::FRAC_PI_2,
        }
    }
}

/// Sliding-window drop tracking per sensor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Number of recent samples considered
    pub window_size: usize,
    /// Minimum samples in the window before judging
    pub min_samples: usize,
    /// Drop rate that marks a sensor degraded; recovery below half
    pub degraded_drop_rate: f32,
    /// Multiplier applied to a degraded sensor's trust
    pub degraded_trust_scale: f32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_size: 50,
            min_samples: 10,
            degraded_drop_rate: 0.3,
            degraded_trust_scale: 0.5,
        }
    }
}

/// Localization divergence monitoring.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DivergenceConfig {
    /// Position σ ceiling in meters
    pub ceiling_m: f32,
    /// How long σ must stay above the ceiling
    pub grace_ms: u64,
    /// Recovered once σ < recovery_ratio × ceiling
    pub recovery_ratio: f32,
    /// Diverged longer than this becomes fatal
    pub recovery_timeout_ms: u64,
}

impl Default for DivergenceConfig {
    fn default() -> Self {
        Self {
            ceiling_m: 2.0,
            grace_ms: 10_000,
            recovery_ratio: 0.8,
            recovery_timeout_ms: 30_000,
        }
    }
}

/// Geodetic datum for the local east/north frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeodeticDatum {
    pub latitude: f64,
    pub longitude: f64,
    /// Local position of the datum, usually the origin
    #[serde(default)]
    pub local_x: f32,
    #[serde(default)]
    pub local_y: f32,
}

/// Configuration for [`FusionEstimator`](super::FusionEstimator).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Distance between wheels in meters
    pub wheel_base: f32,
    pub trust: TrustWeights,
    pub process_noise: ProcessNoise,
    pub measurement_noise: MeasurementNoise,
    pub limits: PlausibilityLimits,
    pub health: HealthConfig,
    pub divergence: DivergenceConfig,
    /// Samples below this confidence are dropped
    pub confidence_floor: f32,
    /// Samples older than the newest seen by more than this are dropped
    pub staleness_ms: u64,
    /// χ² gate on satellite innovations (2 dof, 99.9%)
    pub chi2_gate: f32,
    /// Inertial samples further apart than this restart heading fusion
    pub max_inertial_gap_ms: u64,
    pub initial_position_variance: f32,
    pub initial_heading_variance: f32,
    /// Fixed datum; `None` anchors on the first accepted fix
    pub datum: Option<GeodeticDatum>,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            wheel_base: 0.42,
            trust: TrustWeights::default(),
            process_noise: ProcessNoise::default(),
            measurement_noise: MeasurementNoise::default(),
            limits: PlausibilityLimits::default(),
            health: HealthConfig::default(),
            divergence: DivergenceConfig::default(),
            confidence_floor: 0.2,
            staleness_ms: 500,
            chi2_gate: 13.8,
            max_inertial_gap_ms: 500,
            initial_position_variance: 0.01,
            initial_heading_variance: 0.01,
            datum: None,
        }
    }
}
