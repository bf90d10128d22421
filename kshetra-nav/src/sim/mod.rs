//! Differential-drive lawn simulator and closed-loop harness.
//!
//! Used by the `simulate` command and the integration tests.

pub mod harness;
pub mod world;

pub use harness::{SimHarness, SimMotors, SimReport};
pub use world::{SatelliteSim, SimConfig, SimObstacle, Simulator};
