//! Pose graph optimization.
//!
//! Background backend for drift correction: fused poses become nodes,
//! wheel odometry and loop closures become edges, accepted satellite fixes
//! become position priors.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      POSE GRAPH                              │
//! │                                                              │
//! │    Nodes: fused poses at keyframe spacing                    │
//! │                                                              │
//! │    [P0] ──odom──▶ [P1] ──odom──▶ [P2] ──odom──▶ [P3]        │
//! │     │               │              ▲              │          │
//! │     └───── loop closure (proximity)┘           prior (GPS)   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     OPTIMIZATION                             │
//! │                                                              │
//! │    Levenberg-Marquardt, block-sparse PCG, bounded deadline   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!        TrajectorySnapshot ──► CorrectionMerger ──► fusion
//! ```
//!
//! # Components
//!
//! - [`PoseGraph`]: nodes, edges, priors and landmarks
//! - [`LoopDetector`]: proximity-based loop closure candidates
//! - [`GraphOptimizer`]: minimizes the weighted residuals
//! - [`GraphBackend`]: owns the three above, decides when to optimize
//! - [`CorrectionMerger`]: turns corrections into bounded per-tick steps

mod background;
mod correction;
mod loop_detector;
mod optimizer;
mod pose_graph;

pub use background::{
    GraphBackend, GraphBackendConfig, GraphMessage, TrajectoryPoint, TrajectorySnapshot,
};
pub use correction::{CorrectionConfig, CorrectionMerger, PoseCorrection};
pub use loop_detector::{LoopClosureCandidate, LoopDetector, LoopDetectorConfig};
pub use optimizer::{
    GraphOptimizer, GraphOptimizerConfig, OptimizationResult, TerminationReason,
    compute_chi_squared,
};
pub use pose_graph::{
    Constraint, EdgeType, Information2D, Landmark, LandmarkId, LandmarkObservation, NodeId,
    PoseEdge, PoseGraph, PoseNode, PositionPrior, PriorEdge,
};
