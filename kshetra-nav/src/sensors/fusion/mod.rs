//! Sensor fusion estimator.
//!
//! Consumes asynchronous [`SensorSample`]s and maintains the fused pose.
//!
//! ```text
//!  sample ──► validate ──► drop? ──► SensorHealth (window) ──► degraded?
//!               │
//!               ▼
//!   Odometry ─► predict (P' = F P Fᵀ + Q/trust)
//!   Inertial ─► heading correction vs encoder Δθ
//!   Satellite ► position correction (χ² gated)
//!   Visual ───► 3-DOF correction vs pose at previous visual sample
//!               │
//!               ▼
//!        DivergenceMonitor (σ vs ceiling) ──► FusionHealth
//! ```
//!
//! The estimator is owned by the control loop; the latest completed state
//! is always available through [`FusionEstimator::estimate`].

pub mod config;
pub mod filter;
pub mod geodetic;
pub mod health;

pub use config::{
    DivergenceConfig, FusionConfig, GeodeticDatum, HealthConfig, MeasurementNoise,
    PlausibilityLimits, ProcessNoise, TrustWeights,
};
pub use filter::{ErrorStateFilter, Observation};
pub use geodetic::LocalFrame;
pub use health::{DivergenceMonitor, FusionHealth, SensorHealth, SensorStats};

use crate::core::math::normalize_angle;
use crate::core::types::{Covariance2D, Point2D, Pose, Pose2D, Twist2D};
use crate::error::{DropReason, NavError, SensorFault};
use crate::sensors::odometry::DifferentialDrive;
use crate::sensors::sample::{
    InertialSample, OdometryDelta, SatelliteFix, SensorKind, SensorPayload, SensorSample,
    VisualDelta,
};

use health::{DegradedTransition, DivergenceTransition};

/// What happened to an accepted sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Odometry propagated the state
    Predicted,
    /// A correction was applied
    Corrected,
    /// First sample of a relative sensor, or the satellite datum was set
    Anchored,
    /// Not a pose sensor (range readings)
    Ignored,
}

/// Notable estimator transitions, drained by the executor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionEvent {
    SensorDegraded(SensorKind),
    SensorRecovered(SensorKind),
    LocalizationLost { sigma_m: f32 },
    LocalizationRecovered,
    LocalizationFailed,
}

/// Satellite position accepted by the filter, for pose-graph priors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptedFix {
    pub timestamp_us: u64,
    pub position: Point2D,
    pub std_dev_m: f32,
}

/// Multi-sensor pose estimator.
pub struct FusionEstimator {
    config: FusionConfig,
    filter: ErrorStateFilter,
    drive: DifferentialDrive,
    health: [SensorHealth; 5],
    last_timestamp_us: [Option<u64>; 5],
    newest_us: Option<u64>,
    divergence: DivergenceMonitor,
    frame: Option<LocalFrame>,
    last_inertial_us: Option<u64>,
    visual_anchor: Option<Pose2D>,
    velocity: Twist2D,
    /// Odometry composed since the last `take_odometry_delta`
    pending_odometry: Pose2D,
    pending_fix: Option<AcceptedFix>,
    events: Vec<FusionEvent>,
    estimate: Pose,
}

impl FusionEstimator {
    pub fn new(config: FusionConfig) -> Self {
        Self::with_pose(config, Pose2D::identity())
    }

    /// Start at a known pose, e.g. the dock.
    pub fn with_pose(config: FusionConfig, pose: Pose2D) -> Self {
        let covariance = Covariance2D::diagonal(
            config.initial_position_variance,
            config.initial_position_variance,
            config.initial_heading_variance,
        );
        let frame = config
            .datum
            .map(|d| LocalFrame::new(d.latitude, d.longitude, Point2D::new(d.local_x, d.local_y)));
        let health = std::array::from_fn(|_| SensorHealth::new(config.health));

        Self {
            filter: ErrorStateFilter::new(pose, covariance),
            drive: DifferentialDrive::new(config.wheel_base),
            health,
            last_timestamp_us: [None; 5],
            newest_us: None,
            divergence: DivergenceMonitor::new(config.divergence),
            frame,
            last_inertial_us: None,
            visual_anchor: None,
            velocity: Twist2D::zero(),
            pending_odometry: Pose2D::identity(),
            pending_fix: None,
            events: Vec::new(),
            estimate: Pose::new(pose, Twist2D::zero(), 0, covariance),
            config,
        }
    }

    /// Validate and fuse one sample.
    ///
    /// A rejected sample is counted against its sensor and leaves the
    /// state untouched.
    pub fn ingest(&mut self, sample: &SensorSample) -> Result<IngestOutcome, SensorFault> {
        let kind = sample.kind();
        if kind == SensorKind::Range {
            return Ok(IngestOutcome::Ignored);
        }

        let result = self
            .validate(sample)
            .and_then(|()| self.fuse(sample));

        match result {
            Ok(outcome) => {
                self.last_timestamp_us[kind.index()] = Some(sample.timestamp_us);
                let newest = self.newest_us.unwrap_or(0).max(sample.timestamp_us);
                self.newest_us = Some(newest);
                let transition = self.health[kind.index()].record_accepted();
                self.note_health(kind, transition);
                self.refresh(sample.timestamp_us);
                Ok(outcome)
            }
            Err(reason) => {
                log::debug!("Dropped {} sample: {}", kind, reason);
                let transition = self.health[kind.index()].record_drop(&reason);
                self.note_health(kind, transition);
                Err(SensorFault::new(kind, reason))
            }
        }
    }

    /// Latest completed fusion state.
    #[inline]
    pub fn estimate(&self) -> Pose {
        self.estimate
    }

    /// The estimate, unless localization has diverged.
    pub fn localized_estimate(&self) -> Result<Pose, NavError> {
        if self.divergence.is_lost() || self.divergence.diverged_since().is_some() {
            return Err(NavError::LocalizationDivergence {
                sigma_m: self.estimate.position_sigma(),
                duration_s: self.divergence.diverged_for_s(self.estimate.timestamp_us),
                fatal: self.divergence.is_lost(),
            });
        }
        Ok(self.estimate)
    }

    /// Advance divergence bookkeeping without a sample.
    pub fn tick(&mut self, now_us: u64) {
        let sigma = self.filter.covariance().position_sigma();
        if let Some(t) = self.divergence.update(sigma, now_us) {
            self.note_divergence(t, sigma);
        }
    }

    /// Apply a world-frame correction from the pose graph.
    pub fn apply_correction(&mut self, delta: Pose2D) {
        if !delta.is_finite() {
            log::warn!("Ignoring non-finite graph correction");
            return;
        }
        self.filter.inject(delta);
        if let Some(anchor) = self.visual_anchor.as_mut() {
            *anchor = Pose2D::new(anchor.x + delta.x, anchor.y + delta.y, anchor.theta + delta.theta);
        }
        self.estimate.pose = self.filter.pose();
    }

    /// Overwrite pose and covariance (relocalization or dock reset).
    pub fn reset(&mut self, pose: Pose2D, covariance: Covariance2D) {
        self.filter.reset(pose, covariance);
        self.divergence.reset();
        self.visual_anchor = None;
        self.last_inertial_us = None;
        self.pending_odometry = Pose2D::identity();
        self.estimate.pose = pose;
        self.estimate.covariance = covariance;
    }

    /// Wheel odometry composed since the previous call.
    pub fn take_odometry_delta(&mut self) -> Pose2D {
        std::mem::replace(&mut self.pending_odometry, Pose2D::identity())
    }

    /// Most recent satellite fix the filter accepted, once.
    pub fn take_accepted_fix(&mut self) -> Option<AcceptedFix> {
        self.pending_fix.take()
    }

    pub fn drain_events(&mut self) -> Vec<FusionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn health(&self) -> FusionHealth {
        if self.divergence.is_lost() {
            FusionHealth::Lost
        } else if let Some(since_us) = self.divergence.diverged_since() {
            FusionHealth::Diverged { since_us }
        } else if self.health.iter().any(|h| h.is_degraded()) {
            FusionHealth::Degraded
        } else {
            FusionHealth::Nominal
        }
    }

    pub fn sensor_stats(&self, kind: SensorKind) -> SensorStats {
        self.health[kind.index()].stats().clone()
    }

    pub fn local_frame(&self) -> Option<&LocalFrame> {
        self.frame.as_ref()
    }

    /// Trust for a sensor after the degraded scale.
    pub fn effective_trust(&self, kind: SensorKind) -> f32 {
        let base = self.config.trust.get(kind).clamp(1e-3, 1.0);
        if self.health[kind.index()].is_degraded() {
            base * self.config.health.degraded_trust_scale
        } else {
            base
        }
    }

    fn validate(&self, sample: &SensorSample) -> Result<(), DropReason> {
        let kind = sample.kind();

        if let Some(last) = self.last_timestamp_us[kind.index()]
            && sample.timestamp_us <= last
        {
            return Err(DropReason::OutOfOrder);
        }

        let staleness_us = self.config.staleness_ms * 1000;
        if let Some(newest) = self.newest_us
            && newest.saturating_sub(sample.timestamp_us) > staleness_us
        {
            return Err(DropReason::Stale);
        }

        if !sample.confidence.is_finite() || sample.confidence > 1.0 {
            return Err(DropReason::Implausible(format!(
                "confidence {}",
                sample.confidence
            )));
        }
        if sample.confidence < self.config.confidence_floor {
            return Err(DropReason::LowConfidence);
        }

        let limits = &self.config.limits;
        match &sample.payload {
            SensorPayload::Odometry(OdometryDelta { left_m, right_m }) => {
                if !left_m.is_finite() || !right_m.is_finite() {
                    return Err(DropReason::Implausible("non-finite wheel travel".into()));
                }
                if left_m.abs() > limits.max_wheel_step_m || right_m.abs() > limits.max_wheel_step_m {
                    return Err(DropReason::Implausible(format!(
                        "wheel step {:.3}/{:.3}m",
                        left_m, right_m
                    )));
                }
            }
            SensorPayload::Inertial(InertialSample {
                accel_x,
                accel_y,
                yaw_rate,
            }) => {
                if !accel_x.is_finite() || !accel_y.is_finite() || !yaw_rate.is_finite() {
                    return Err(DropReason::Implausible("non-finite inertial value".into()));
                }
                if accel_x.hypot(*accel_y) > limits.max_acceleration {
                    return Err(DropReason::Implausible("acceleration".into()));
                }
                if yaw_rate.abs() > limits.max_yaw_rate {
                    return Err(DropReason::Implausible(format!("yaw rate {:.2}", yaw_rate)));
                }
            }
            SensorPayload::Satellite(SatelliteFix {
                latitude,
                longitude,
                horizontal_error_m,
            }) => {
                if !geodetic::is_valid_coordinate(*latitude, *longitude) {
                    return Err(DropReason::Implausible("coordinates".into()));
                }
                if !horizontal_error_m.is_finite()
                    || *horizontal_error_m <= 0.0
                    || *horizontal_error_m > limits.satellite_error_ceiling_m
                {
                    return Err(DropReason::Implausible(format!(
                        "horizontal error {:.2}m",
                        horizontal_error_m
                    )));
                }
            }
            SensorPayload::VisualOdometry(VisualDelta { dx, dy, dtheta }) => {
                if !dx.is_finite() || !dy.is_finite() || !dtheta.is_finite() {
                    return Err(DropReason::Implausible("non-finite visual delta".into()));
                }
                if dx.hypot(*dy) > limits.max_visual_step_m
                    || dtheta.abs() > limits.max_visual_rotation_rad
                {
                    return Err(DropReason::Implausible("visual step".into()));
                }
            }
            SensorPayload::Range(_) => {}
        }
        Ok(())
    }

    fn fuse(&mut self, sample: &SensorSample) -> Result<IngestOutcome, DropReason> {
        let kind = sample.kind();
        let weight = self.effective_trust(kind) * sample.confidence.max(1e-3);

        match sample.payload {
            SensorPayload::Odometry(OdometryDelta { left_m, right_m }) => {
                let delta = self.drive.delta(left_m, right_m);
                let distance = delta.x.hypot(delta.y);
                let noise = &self.config.process_noise;
                let q = [
                    noise.position_var_per_meter * distance / weight,
                    noise.position_var_per_meter * distance / weight,
                    noise.heading_var_per_radian * delta.theta.abs() / weight,
                ];
                self.filter.predict(delta, q);
                self.pending_odometry = self.pending_odometry.compose(&delta);

                if let Some(last) = self.last_timestamp_us[kind.index()] {
                    let dt = (sample.timestamp_us - last) as f32 / 1e6;
                    if dt > 0.0 {
                        let sign = if delta.x < 0.0 { -1.0 } else { 1.0 };
                        self.velocity = Twist2D::new(sign * distance / dt, delta.theta / dt);
                    }
                }
                Ok(IngestOutcome::Predicted)
            }
            SensorPayload::Inertial(InertialSample { yaw_rate, .. }) => {
                let max_gap_us = self.config.max_inertial_gap_ms * 1000;
                let gap_us = match self.last_inertial_us {
                    Some(prev) => sample.timestamp_us.saturating_sub(prev),
                    None => u64::MAX,
                };
                if gap_us == 0 || gap_us > max_gap_us {
                    // Restart the heading comparison from this sample
                    self.last_inertial_us = Some(sample.timestamp_us);
                    self.filter.take_pending_heading();
                    return Ok(IngestOutcome::Anchored);
                }

                let dt = gap_us as f32 / 1e6;
                let innovation = normalize_angle(yaw_rate * dt - self.filter.pending_heading());
                if innovation.abs() > 1e-6 {
                    let r = self.config.measurement_noise.gyro_variance * dt * dt / weight;
                    self.filter.correct(Observation {
                        rows: &[2],
                        innovation: &[innovation],
                        noise: &[r],
                        gate: None,
                    })?;
                }
                self.last_inertial_us = Some(sample.timestamp_us);
                self.filter.take_pending_heading();
                Ok(IngestOutcome::Corrected)
            }
            SensorPayload::Satellite(fix) => {
                let nominal = self.filter.pose();
                let Some(frame) = self.frame else {
                    self.frame = Some(LocalFrame::new(
                        fix.latitude,
                        fix.longitude,
                        nominal.position(),
                    ));
                    log::info!(
                        "Satellite datum set at ({:.7}, {:.7}) -> ({:.2}, {:.2})",
                        fix.latitude,
                        fix.longitude,
                        nominal.x,
                        nominal.y
                    );
                    return Ok(IngestOutcome::Anchored);
                };

                let z = frame.to_local(fix.latitude, fix.longitude);
                let sigma = fix
                    .horizontal_error_m
                    .max(self.config.measurement_noise.satellite_min_sigma_m);
                let r = sigma * sigma / weight;
                self.filter.correct(Observation {
                    rows: &[0, 1],
                    innovation: &[z.x - nominal.x, z.y - nominal.y],
                    noise: &[r, r],
                    gate: Some(self.config.chi2_gate),
                })?;
                self.pending_fix = Some(AcceptedFix {
                    timestamp_us: sample.timestamp_us,
                    position: z,
                    std_dev_m: sigma,
                });
                Ok(IngestOutcome::Corrected)
            }
            SensorPayload::VisualOdometry(VisualDelta { dx, dy, dtheta }) => {
                let Some(anchor) = self.visual_anchor else {
                    self.visual_anchor = Some(self.filter.pose());
                    return Ok(IngestOutcome::Anchored);
                };
                let measured = anchor.compose(&Pose2D::new(dx, dy, dtheta));
                let nominal = self.filter.pose();
                let noise = &self.config.measurement_noise;
                let step = dx.hypot(dy);
                let r_xy = (noise.visual_position_var_per_meter * step).max(1e-4) / weight;
                let r_t = noise.visual_heading_variance / weight;
                self.filter.correct(Observation {
                    rows: &[0, 1, 2],
                    innovation: &[
                        measured.x - nominal.x,
                        measured.y - nominal.y,
                        normalize_angle(measured.theta - nominal.theta),
                    ],
                    noise: &[r_xy, r_xy, r_t],
                    gate: Some(self.config.chi2_gate),
                })?;
                self.visual_anchor = Some(self.filter.pose());
                Ok(IngestOutcome::Corrected)
            }
            SensorPayload::Range(_) => Ok(IngestOutcome::Ignored),
        }
    }

    fn refresh(&mut self, timestamp_us: u64) {
        let covariance = self.filter.covariance();
        let ts = timestamp_us.max(self.estimate.timestamp_us);
        self.estimate = Pose::new(self.filter.pose(), self.velocity, ts, covariance);
        if let Some(t) = self.divergence.update(covariance.position_sigma(), ts) {
            self.note_divergence(t, covariance.position_sigma());
        }
    }

    fn note_health(&mut self, kind: SensorKind, transition: Option<DegradedTransition>) {
        match transition {
            Some(DegradedTransition::Degraded) => {
                log::warn!(
                    "Sensor {} degraded (drop rate {:.0}%)",
                    kind,
                    self.health[kind.index()].stats().recent_drop_rate * 100.0
                );
                self.events.push(FusionEvent::SensorDegraded(kind));
            }
            Some(DegradedTransition::Recovered) => {
                log::info!("Sensor {} recovered", kind);
                self.events.push(FusionEvent::SensorRecovered(kind));
            }
            None => {}
        }
    }

    fn note_divergence(&mut self, transition: DivergenceTransition, sigma: f32) {
        match transition {
            DivergenceTransition::Diverged => {
                log::warn!("Localization diverged (sigma {:.2}m)", sigma);
                self.events.push(FusionEvent::LocalizationLost { sigma_m: sigma });
            }
            DivergenceTransition::Recovered => {
                log::info!("Localization recovered (sigma {:.2}m)", sigma);
                self.events.push(FusionEvent::LocalizationRecovered);
            }
            DivergenceTransition::Lost => {
                log::error!("Localization lost beyond recovery timeout");
                self.events.push(FusionEvent::LocalizationFailed);
            }
        }
    }
}
