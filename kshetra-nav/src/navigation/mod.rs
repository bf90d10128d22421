//! Navigation layer: zones, paths and their execution.
//!
//! ```text
//!   ZoneSet ──► NavigationExecutor ──plan request──► CoveragePlanner
//!                  │    ▲                               │
//!                  │    └────────────── Path ◄──────────┘
//!                  ├─► PurePursuit ──────────► velocity + blade
//!                  ├─► AvoidanceController ──► Continue / Deviate / Stop
//!                  └─► DockingController ────► corridor approach
//! ```

pub mod avoidance;
pub mod docking;
pub mod executor;
pub mod path;
pub mod pursuit;
pub mod state;
pub mod zone;

pub use avoidance::{
    ActivePath, AvoidanceConfig, AvoidanceController, AvoidanceDecision, AvoidanceState, LocalPath,
    RangeSensorMount, ReadingWindow,
};
pub use docking::{DockingConfig, DockingController, DockingPhase, DockingTarget};
pub use executor::{
    ExecutorConfig, NavigationExecutor, PlanOutcome, PlanRequest, ResumeUpdate, TickInput, TickOutput,
};
pub use path::{Path, SpeedClass, Waypoint};
pub use pursuit::{PurePursuit, PursuitCommand, PursuitConfig};
pub use state::{ExecutorState, NavEvent, ResumeState};
pub use zone::{Zone, ZoneSet};
