//! Algorithm layer: mapping, grid search and coverage planning.
//!
//! # Contents
//!
//! - [`mapping`]: Log-odds occupancy grid, ray tracing, versioned map manager
//! - [`planning`]: A* over inflated grids
//! - [`coverage`]: Coverage path generation for zones

pub mod coverage;
pub mod mapping;
pub mod planning;
