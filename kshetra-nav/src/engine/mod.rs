//! Orchestration layer.
//!
//! # Contents
//!
//! - [`graph`]: pose graph optimization, loop closure and correction merge

pub mod graph;
