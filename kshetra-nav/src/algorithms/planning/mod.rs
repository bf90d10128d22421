//! Path planning algorithms.
//!
//! Grid A* used for coverage transits and avoidance detours. The planner
//! runs on an [`InflatedGrid`] built either from a map snapshot (cells above
//! the obstacle threshold, grown by the clearance) or from a predicate over
//! cell centers (zone boundary and buffered obstacle polygons).

mod astar;

pub use astar::{AStarConfig, AStarPlanner, InflatedGrid, PlanningError};
