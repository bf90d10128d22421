//! KshetraNav - Navigation core for a robotic lawn mower
//!
//! Fuses wheel, inertial, satellite and visual odometry into one pose,
//! refines the trajectory with a pose graph, keeps an occupancy map of the
//! lawn, plans coverage paths over operator-defined zones and drives them
//! with obstacle avoidance and return-to-dock.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │               threads/  ·  sim/                     │  ← Runtime
//! │    (control loop, graph worker, planner, harness)   │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │          io/  ·  state/  ·  config                  │  ← Infrastructure
//! │   (zone + resume stores, shared flags, snapshots)   │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  navigation/                        │  ← Execution
//! │    (zones, executor, pursuit, avoidance, docking)   │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    engine/                          │  ← Orchestration
//! │        (pose graph, loop closure, corrections)      │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  algorithms/                        │  ← Core algorithms
//! │          (mapping, A*, coverage planning)           │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                   sensors/                          │  ← Sensor processing
//! │          (samples, kinematics, fusion)              │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │       (types, math, geometry, checksum, persist)    │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use kshetra_nav::{KshetraConfig, sim::{SimConfig, SimHarness}, threads::ControlCommand};
//!
//! let config = KshetraConfig::default();
//! let mut harness = SimHarness::new(&config, SimConfig::default());
//! harness.command(ControlCommand::Start(zones));
//! harness.run_until(600.0, |h| h.state() == ExecutorState::Charging);
//! println!("{:?}", harness.finish());
//! ```

pub mod algorithms;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod io;
pub mod navigation;
pub mod sensors;
pub mod sim;
pub mod state;
pub mod threads;

pub use config::KshetraConfig;
pub use core::{Point2D, Polygon, Pose, Pose2D, Twist2D};
pub use error::{NavError, Result};
pub use navigation::{ExecutorState, NavEvent, NavigationExecutor, Path, Zone, ZoneSet};
pub use sensors::{FusionEstimator, SensorSample};
