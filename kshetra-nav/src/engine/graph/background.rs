//! Background pose-graph maintenance.
//!
//! [`GraphBackend`] owns the graph, the optimizer and the loop detector.
//! The control loop feeds it [`GraphMessage`]s; after each accepted
//! optimization it exposes an immutable [`TrajectorySnapshot`] whose
//! latest correction is merged into the live estimate by
//! [`CorrectionMerger`](super::CorrectionMerger).

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::correction::{CorrectionConfig, PoseCorrection};
use super::loop_detector::{LoopDetector, LoopDetectorConfig};
use super::optimizer::{GraphOptimizer, GraphOptimizerConfig, OptimizationResult};
use super::pose_graph::{Constraint, Information2D, LandmarkId, NodeId, PoseGraph, PositionPrior};
use crate::core::types::{Point2D, Pose, Pose2D};
use crate::error::Result;
use crate::sensors::fusion::AcceptedFix;

/// Work sent to the graph backend.
#[derive(Debug, Clone)]
pub enum GraphMessage {
    /// New node at a fused pose, with the wheel odometry since the previous node.
    Node {
        pose: Pose,
        odometry: Pose2D,
        fix: Option<AcceptedFix>,
    },
    /// Landmark seen from the latest node, in the robot frame.
    Landmark {
        id: LandmarkId,
        local: Point2D,
        std_dev_m: f32,
    },
    /// Surveyed landmark (e.g. the dock).
    FixedLandmark { id: LandmarkId, position: Point2D },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphBackendConfig {
    pub optimizer: GraphOptimizerConfig,
    pub loop_detector: LoopDetectorConfig,
    pub correction: CorrectionConfig,
    /// Optimize after this many new nodes.
    pub optimize_every_n_nodes: usize,
    /// Optimize at least this often while nodes arrive.
    pub optimize_interval_ms: u64,
    /// Nodes beyond this window are marked stale.
    pub max_active_nodes: usize,
    /// Keyframe spacing used by the control loop.
    pub node_distance_m: f32,
    pub node_rotation_rad: f32,
    /// Odometry edge std dev: base plus per meter travelled.
    pub odometry_std_m: f32,
    pub odometry_std_per_m: f32,
    pub odometry_heading_std_rad: f32,
    pub odometry_heading_std_per_rad: f32,
    /// Fixes older than this relative to the node are not used as priors.
    pub max_prior_age_ms: u64,
}

impl Default for GraphBackendConfig {
    fn default() -> Self {
        Self {
            optimizer: GraphOptimizerConfig::default(),
            loop_detector: LoopDetectorConfig::default(),
            correction: CorrectionConfig::default(),
            optimize_every_n_nodes: 10,
            optimize_interval_ms: 5000,
            max_active_nodes: 500,
            node_distance_m: 0.5,
            node_rotation_rad: 0.35,
            odometry_std_m: 0.01,
            odometry_std_per_m: 0.05,
            odometry_heading_std_rad: 0.005,
            odometry_heading_std_per_rad: 0.05,
            max_prior_age_ms: 500,
        }
    }
}

/// Optimized node pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryPoint {
    pub id: NodeId,
    pub timestamp_us: u64,
    pub pose: Pose2D,
}

/// Immutable result of one accepted optimization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrajectorySnapshot {
    /// Increments with every accepted optimization.
    pub version: u64,
    pub poses: Vec<TrajectoryPoint>,
    /// How far the newest node moved.
    pub latest_correction: Option<PoseCorrection>,
}

pub struct GraphBackend {
    config: GraphBackendConfig,
    graph: PoseGraph,
    optimizer: GraphOptimizer,
    detector: LoopDetector,
    nodes_since_optimization: usize,
    loop_pending: bool,
    last_optimization: Instant,
    version: u64,
    latest: Option<PoseCorrection>,
}

impl GraphBackend {
    pub fn new(config: GraphBackendConfig) -> Self {
        Self::with_graph(config, PoseGraph::new())
    }

    /// Continue from a loaded graph.
    pub fn with_graph(config: GraphBackendConfig, graph: PoseGraph) -> Self {
        Self {
            optimizer: GraphOptimizer::new(config.optimizer.clone()),
            detector: LoopDetector::new(config.loop_detector.clone()),
            graph,
            nodes_since_optimization: 0,
            loop_pending: false,
            last_optimization: Instant::now(),
            version: 0,
            latest: None,
            config,
        }
    }

    pub fn graph(&self) -> &PoseGraph {
        &self.graph
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn handle(&mut self, msg: GraphMessage) -> Result<()> {
        match msg {
            GraphMessage::Node {
                pose,
                odometry,
                fix,
            } => self.add_node(&pose, odometry, fix),
            GraphMessage::Landmark {
                id,
                local,
                std_dev_m,
            } => {
                let Some((node, world)) = self
                    .graph
                    .latest_node()
                    .map(|n| (n.id, n.pose.transform_point(&local)))
                else {
                    return Ok(());
                };
                if !self.graph.landmarks().contains_key(&id) {
                    self.graph.add_landmark(id, world);
                }
                self.graph.observe_landmark(node, id, local, std_dev_m)
            }
            GraphMessage::FixedLandmark { id, position } => {
                self.graph.add_fixed_landmark(id, position);
                Ok(())
            }
        }
    }

    fn add_node(&mut self, pose: &Pose, odometry: Pose2D, fix: Option<AcceptedFix>) -> Result<()> {
        let previous = self.graph.latest_node().map(|n| n.id);
        let id = self.graph.add_node(pose)?;

        if let Some(prev) = previous {
            let info = self.odometry_information(&odometry);
            self.graph.add_edge(
                prev,
                id,
                Constraint::Odometry {
                    measurement: odometry,
                    information: info,
                },
            )?;
        }

        if let Some(fix) = fix {
            let age_us = pose.timestamp_us.abs_diff(fix.timestamp_us);
            if age_us <= self.config.max_prior_age_ms * 1000 {
                self.graph
                    .add_prior(id, PositionPrior::new(fix.position, fix.std_dev_m))?;
            }
        }

        if let Some(candidate) = self.detector.detect(&self.graph, id) {
            self.graph.add_edge(
                candidate.match_id,
                candidate.query_id,
                Constraint::LoopClosure {
                    measurement: candidate.relative_pose,
                    information: candidate.information,
                    confidence: candidate.confidence,
                },
            )?;
            self.loop_pending = true;
            log::info!(
                "Loop closure {} -> {} (confidence {:.2})",
                candidate.match_id,
                candidate.query_id,
                candidate.confidence
            );
        }

        self.nodes_since_optimization += 1;
        Ok(())
    }

    fn odometry_information(&self, odometry: &Pose2D) -> Information2D {
        let dist = (odometry.x * odometry.x + odometry.y * odometry.y).sqrt();
        let sigma_xy = self.config.odometry_std_m + self.config.odometry_std_per_m * dist;
        let sigma_t = self.config.odometry_heading_std_rad
            + self.config.odometry_heading_std_per_rad * odometry.theta.abs();
        Information2D::from_std_dev(sigma_xy, sigma_xy, sigma_t)
    }

    /// Whether enough has changed to run the optimizer.
    pub fn optimization_due(&self, now: Instant) -> bool {
        if self.nodes_since_optimization == 0 && !self.loop_pending {
            return false;
        }
        self.loop_pending
            || self.nodes_since_optimization >= self.config.optimize_every_n_nodes
            || now.duration_since(self.last_optimization)
                >= Duration::from_millis(self.config.optimize_interval_ms)
    }

    /// Run the optimizer and, when its result is kept, publish a new
    /// snapshot version.
    pub fn optimize(&mut self, deadline: Option<Instant>, cancel: &AtomicBool) -> OptimizationResult {
        let before = self
            .graph
            .latest_node()
            .map(|n| (n.id, n.timestamp_us, n.measured));

        let result = self
            .optimizer
            .optimize_cancellable(&mut self.graph, deadline, cancel);
        self.last_optimization = Instant::now();

        if result.applied {
            self.nodes_since_optimization = 0;
            self.loop_pending = false;
            self.version += 1;
            self.graph.mark_stale_before(self.config.max_active_nodes);
            log::debug!(
                "Graph optimized: {:?} after {} iterations, error {:.4} -> {:.4}",
                result.termination_reason,
                result.iterations,
                result.initial_error,
                result.final_error
            );
        } else {
            log::warn!(
                "Graph optimization discarded: {:?} after {} iterations",
                result.termination_reason,
                result.iterations
            );
        }

        self.latest = before.and_then(|(id, timestamp_us, original)| {
            let node = self.graph.get_node(id)?;
            Some(PoseCorrection {
                node_id: id,
                timestamp_us,
                original,
                optimized: node.pose,
            })
        });
        result
    }

    /// Current trajectory with the latest correction.
    pub fn snapshot(&self) -> TrajectorySnapshot {
        TrajectorySnapshot {
            version: self.version,
            poses: self
                .graph
                .nodes()
                .iter()
                .map(|n| TrajectoryPoint {
                    id: n.id,
                    timestamp_us: n.timestamp_us,
                    pose: n.pose,
                })
                .collect(),
            latest_correction: self.latest,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.graph.save(path)
    }
}
