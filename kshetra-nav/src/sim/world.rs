//! Simulated mower: kinematics, sensors and battery.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::core::math::normalize_angle;
use crate::core::types::{Point2D, Pose2D, Twist2D};
use crate::navigation::RangeSensorMount;
use crate::sensors::fusion::LocalFrame;
use crate::sensors::{DifferentialDrive, SensorSample};

/// Round obstacle in the simulated lawn (tree, bed, toy).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimObstacle {
    pub center: Point2D,
    pub radius: f32,
}

/// Satellite receiver model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SatelliteSim {
    /// Geodetic position of the world origin
    pub latitude: f64,
    pub longitude: f64,
    /// Reported and simulated 1σ error
    pub error_m: f32,
    pub period_ms: u64,
}

impl Default for SatelliteSim {
    fn default() -> Self {
        Self {
            latitude: 12.9716,
            longitude: 77.5946,
            error_m: 0.05,
            period_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub wheel_base: f32,
    pub robot_radius: f32,
    pub max_linear_vel: f32,
    pub max_angular_vel: f32,
    pub start_pose: Pose2D,
    /// Relative wheel slip 1σ
    pub slip_stddev: f32,
    pub gyro_stddev: f32,
    pub range_stddev: f32,
    pub max_range_m: f32,
    /// `None` simulates a receiver without sky view
    pub satellite: Option<SatelliteSim>,
    pub obstacles: Vec<SimObstacle>,
    pub initial_battery: f32,
    /// Percent per second while powered on
    pub idle_drain: f32,
    /// Percent per meter driven
    pub drive_drain: f32,
    /// Percent per second with the blade spinning
    pub blade_drain: f32,
    /// Percent per second on the dock
    pub charge_rate: f32,
    /// Within this distance of the dock pose the contacts close
    pub dock_contact_m: f32,
    pub dock_pose: Pose2D,
    /// Non-zero seeds make runs reproducible
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            wheel_base: 0.42,
            robot_radius: 0.25,
            max_linear_vel: 0.8,
            max_angular_vel: 1.5,
            start_pose: Pose2D::identity(),
            slip_stddev: 0.01,
            gyro_stddev: 0.005,
            range_stddev: 0.01,
            max_range_m: 4.0,
            satellite: Some(SatelliteSim::default()),
            obstacles: Vec::new(),
            initial_battery: 100.0,
            idle_drain: 0.002,
            drive_drain: 0.05,
            blade_drain: 0.01,
            charge_rate: 0.5,
            dock_contact_m: 0.08,
            dock_pose: Pose2D::identity(),
            seed: 42,
        }
    }
}

/// Gaussian noise from a seeded generator.
#[derive(Debug, Clone)]
struct Noise {
    rng: StdRng,
}

impl Noise {
    fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            StdRng::from_os_rng()
        } else {
            StdRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    fn gaussian(&mut self, stddev: f32) -> f32 {
        if stddev == 0.0 {
            return 0.0;
        }
        let n: f32 = self.rng.sample(StandardNormal);
        n * stddev
    }
}

/// Ground-truth simulated robot.
pub struct Simulator {
    config: SimConfig,
    mounts: Vec<RangeSensorMount>,
    drive: DifferentialDrive,
    frame: Option<LocalFrame>,
    noise: Noise,
    pose: Pose2D,
    battery: f32,
    now_us: u64,
    last_fix_us: Option<u64>,
    collisions: u64,
    distance_m: f32,
    mowed_m: f32,
}

impl Simulator {
    pub fn new(config: SimConfig, mounts: Vec<RangeSensorMount>) -> Self {
        let frame = config
            .satellite
            .map(|s| LocalFrame::new(s.latitude, s.longitude, Point2D::new(0.0, 0.0)));
        Self {
            drive: DifferentialDrive::new(config.wheel_base),
            noise: Noise::new(config.seed),
            pose: config.start_pose,
            battery: config.initial_battery,
            mounts,
            frame,
            now_us: 0,
            last_fix_us: None,
            collisions: 0,
            distance_m: 0.0,
            mowed_m: 0.0,
            config,
        }
    }

    pub fn pose(&self) -> Pose2D {
        self.pose
    }

    pub fn battery(&self) -> f32 {
        self.battery
    }

    pub fn set_battery(&mut self, percent: f32) {
        self.battery = percent.clamp(0.0, 100.0);
    }

    pub fn now_us(&self) -> u64 {
        self.now_us
    }

    pub fn collisions(&self) -> u64 {
        self.collisions
    }

    pub fn distance_m(&self) -> f32 {
        self.distance_m
    }

    /// Distance driven with the blade on.
    pub fn mowed_m(&self) -> f32 {
        self.mowed_m
    }

    pub fn on_dock(&self) -> bool {
        self.pose.position().distance(&self.config.dock_pose.position()) < self.config.dock_contact_m
    }

    /// Drop an obstacle into the world while running.
    pub fn add_obstacle(&mut self, obstacle: SimObstacle) {
        self.config.obstacles.push(obstacle);
    }

    /// Advance by `dt` seconds under `command` and return the samples the
    /// robot's sensors produced.
    pub fn step(&mut self, dt: f32, command: Twist2D, blade: bool) -> Vec<SensorSample> {
        self.now_us += (dt * 1e6) as u64;
        let linear = command.linear.clamp(-self.config.max_linear_vel, self.config.max_linear_vel);
        let angular = command.angular.clamp(-self.config.max_angular_vel, self.config.max_angular_vel);

        let before = self.pose;
        let target = integrate(&self.pose, linear, angular, dt);
        if self.collides(&target.position()) && !self.collides(&before.position()) {
            // Stop mode: heading still changes
            self.pose.theta = target.theta;
            self.collisions += 1;
        } else {
            self.pose = target;
        }

        let travelled = before.position().distance(&self.pose.position());
        self.distance_m += travelled;
        if blade {
            self.mowed_m += travelled;
        }
        self.update_battery(dt, travelled, blade, command);

        let mut samples = Vec::with_capacity(2 + self.mounts.len());

        // Wheel travel from the realised motion plus slip
        let dtheta = normalize_angle(self.pose.theta - before.theta);
        let signed = if linear < 0.0 { -travelled } else { travelled };
        let (left, right) = self.drive.inverse(signed, dtheta);
        let left = left * (1.0 + self.noise.gaussian(self.config.slip_stddev));
        let right = right * (1.0 + self.noise.gaussian(self.config.slip_stddev));
        samples.push(SensorSample::odometry(self.now_us, left, right));

        let yaw_rate = if dt > 0.0 { dtheta / dt } else { 0.0 };
        samples.push(SensorSample::inertial(
            self.now_us,
            yaw_rate + self.noise.gaussian(self.config.gyro_stddev),
        ));

        if let (Some(sat), Some(frame)) = (self.config.satellite, self.frame)
            && self
                .last_fix_us
                .is_none_or(|t| self.now_us - t >= sat.period_ms * 1000)
        {
            self.last_fix_us = Some(self.now_us);
            let measured = Point2D::new(
                self.pose.x + self.noise.gaussian(sat.error_m),
                self.pose.y + self.noise.gaussian(sat.error_m),
            );
            let (lat, lon) = frame.to_geodetic(&measured);
            samples.push(SensorSample::satellite(self.now_us, lat, lon, sat.error_m));
        }

        for i in 0..self.mounts.len() {
            let mount = self.mounts[i];
            let distance = self.raycast(&mount);
            let reading = if distance.is_finite() {
                (distance + self.noise.gaussian(self.config.range_stddev)).max(0.0)
            } else {
                f32::INFINITY
            };
            samples.push(SensorSample::range(self.now_us, mount.sensor_id, reading));
        }

        samples
    }

    fn update_battery(&mut self, dt: f32, travelled: f32, blade: bool, command: Twist2D) {
        let stationary = command.linear == 0.0 && command.angular == 0.0;
        if self.on_dock() && stationary {
            self.battery += self.config.charge_rate * dt;
        } else {
            self.battery -= self.config.idle_drain * dt + self.config.drive_drain * travelled;
            if blade {
                self.battery -= self.config.blade_drain * dt;
            }
        }
        self.battery = self.battery.clamp(0.0, 100.0);
    }

    fn collides(&self, p: &Point2D) -> bool {
        self.config
            .obstacles
            .iter()
            .any(|o| o.center.distance(p) < o.radius + self.config.robot_radius)
    }

    /// Distance along the beam to the nearest obstacle surface.
    fn raycast(&self, mount: &RangeSensorMount) -> f32 {
        let origin = self.pose.transform_point(&mount.offset);
        let heading = self.pose.theta + mount.bearing_rad;
        let dir = Point2D::new(heading.cos(), heading.sin());

        let mut nearest = f32::INFINITY;
        for obstacle in &self.config.obstacles {
            // |origin + t·dir - c|² = r²
            let oc = origin.sub(&obstacle.center);
            let b = oc.dot(&dir);
            let c = oc.dot(&oc) - obstacle.radius * obstacle.radius;
            let disc = b * b - c;
            if disc < 0.0 {
                continue;
            }
            let sqrt = disc.sqrt();
            let t = if -b - sqrt >= 0.0 { -b - sqrt } else { -b + sqrt };
            if t >= 0.0 && t < nearest {
                nearest = t;
            }
        }
        if nearest <= self.config.max_range_m {
            nearest
        } else {
            f32::INFINITY
        }
    }
}

/// Exact unicycle integration over `dt`.
fn integrate(pose: &Pose2D, linear: f32, angular: f32, dt: f32) -> Pose2D {
    if angular.abs() < 1e-6 {
        let (s, c) = pose.theta.sin_cos();
        return Pose2D::new(pose.x + linear * c * dt, pose.y + linear * s * dt, pose.theta);
    }
    let r = linear / angular;
    let theta = pose.theta + angular * dt;
    Pose2D::new(
        pose.x + r * (theta.sin() - pose.theta.sin()),
        pose.y + r * (pose.theta.cos() - theta.cos()),
        normalize_angle(theta),
    )
}
