//! Configuration loading for KshetraNav
//!
//! One TOML file with a section per component. Every section is optional
//! and falls back to its `Default`.
//!
//! ```toml
//! [robot]
//! wheel_base = 0.42
//! working_width = 0.32
//!
//! [fusion]
//! staleness_ms = 500
//!
//! [executor]
//! low_battery = 20.0
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::algorithms::coverage::CoverageConfig;
use crate::algorithms::mapping::OccupancyGridConfig;
use crate::engine::graph::GraphBackendConfig;
use crate::error::{NavError, Result};
use crate::navigation::{AvoidanceConfig, ExecutorConfig};
use crate::sensors::fusion::FusionConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KshetraConfig {
    pub robot: RobotConfig,
    pub fusion: FusionConfig,
    pub graph: GraphBackendConfig,
    pub map: OccupancyGridConfig,
    pub coverage: CoverageConfig,
    pub avoidance: AvoidanceConfig,
    pub executor: ExecutorConfig,
    pub threads: ThreadConfig,
    pub paths: PathsConfig,
}

impl KshetraConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| NavError::Config(format!("{}: {}", path.display(), e)))?;
        let config: KshetraConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Cross-section sanity checks.
    pub fn validate(&self) -> Result<()> {
        if self.robot.wheel_base <= 0.0 {
            return Err(NavError::Config("robot.wheel_base must be positive".into()));
        }
        if self.robot.working_width <= 0.0 {
            return Err(NavError::Config("robot.working_width must be positive".into()));
        }
        if !(0.0..100.0).contains(&self.coverage.default_overlap_percent) {
            return Err(NavError::Config(
                "coverage.default_overlap_percent must be in [0, 100)".into(),
            ));
        }
        if self.executor.resume_battery <= self.executor.low_battery {
            return Err(NavError::Config(
                "executor.resume_battery must exceed executor.low_battery".into(),
            ));
        }
        if self.avoidance.collision_distance >= self.avoidance.stop_distance {
            return Err(NavError::Config(
                "avoidance.collision_distance must be below stop_distance".into(),
            ));
        }
        Ok(())
    }
}

/// Robot physical parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Distance between wheels in meters
    pub wheel_base: f32,
    /// Cutting width in meters
    pub working_width: f32,
    /// Maximum linear velocity in m/s
    pub max_linear_vel: f32,
    /// Maximum angular velocity in rad/s
    pub max_angular_vel: f32,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            wheel_base: 0.42,
            working_width: 0.32,
            max_linear_vel: 0.5,
            max_angular_vel: 1.0,
        }
    }
}

/// Thread cadence and channel sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    /// Control loop period in milliseconds
    pub control_period_ms: u64,
    /// Background optimizer time budget per run
    pub optimization_budget_ms: u64,
    /// Planner time budget per zone
    pub planning_budget_ms: u64,
    /// Interval between map saves
    pub map_save_interval_ms: u64,
    /// Bounded channel capacity between threads
    pub channel_capacity: usize,
    /// Interval between dropped-sample reports
    pub drop_report_interval_ms: u64,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            control_period_ms: 50,
            optimization_budget_ms: 200,
            planning_budget_ms: 2000,
            map_save_interval_ms: 60_000,
            channel_capacity: 256,
            drop_report_interval_ms: 5000,
        }
    }
}

/// On-disk locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub zones_file: PathBuf,
    pub map_file: PathBuf,
    pub resume_file: PathBuf,
    pub graph_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            zones_file: PathBuf::from("zones.json"),
            map_file: PathBuf::from("lawn.ksmp"),
            resume_file: PathBuf::from("resume.json"),
            graph_file: PathBuf::from("pose_graph.json"),
        }
    }
}
