//! Occupancy mapping.
//!
//! # Components
//!
//! - [`OccupancyGrid`]: 2D grid map with log-odds probabilities
//! - [`RayTracer`]: Bresenham ray tracing for free space
//! - [`MapIntegrator`]: applies range and vision detections
//! - [`MapManager`]: single writer, versioned immutable [`MapView`]s

mod integrator;
mod manager;
mod occupancy_grid;
mod ray_tracer;

pub use integrator::{Detection, MapIntegrator};
pub use manager::{MapLoadStatus, MapManager, MapView};
pub use occupancy_grid::{CellState, OccupancyGrid, OccupancyGridConfig};
pub use ray_tracer::RayTracer;

pub(crate) use occupancy_grid::logistic;
