//! Loop closure detection by position proximity.
//!
//! When the robot returns near an older part of its trajectory, the
//! nearest old node within the search radius becomes a loop-closure
//! candidate. The measurement is the relative pose between the two
//! nodes' measured (fused) poses, so absolute corrections folded into the
//! fused estimate reach the rest of the trajectory.

use serde::{Deserialize, Serialize};

use super::pose_graph::{Information2D, NodeId, PoseGraph};
use crate::core::types::Pose2D;

/// A potential loop closure between two poses.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopClosureCandidate {
    /// ID of the query node (current).
    pub query_id: NodeId,
    /// ID of the matching node (historical).
    pub match_id: NodeId,
    /// Relative pose from match to query.
    pub relative_pose: Pose2D,
    pub information: Information2D,
    /// Confidence score (0-1).
    pub confidence: f32,
}

/// Configuration for loop detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopDetectorConfig {
    /// Minimum id gap before two nodes may close a loop.
    pub min_node_distance: u64,
    /// Maximum Euclidean distance (meters) to search for candidates.
    pub max_search_distance: f32,
    /// Query nodes between two accepted closures.
    pub min_nodes_between_closures: u64,
    /// Standard deviations of a full-confidence closure (x, y, θ).
    pub closure_std_dev: [f32; 3],
    /// Candidates below this confidence are discarded.
    pub min_confidence: f32,
}

impl Default for LoopDetectorConfig {
    fn default() -> Self {
        Self {
            min_node_distance: 30,
            max_search_distance: 1.0,
            min_nodes_between_closures: 5,
            closure_std_dev: [0.25, 0.25, 0.1],
            min_confidence: 0.1,
        }
    }
}

pub struct LoopDetector {
    config: LoopDetectorConfig,
    last_closure_query: Option<NodeId>,
}

impl LoopDetector {
    pub fn new(config: LoopDetectorConfig) -> Self {
        Self {
            config,
            last_closure_query: None,
        }
    }

    /// Look for a loop closure ending at `query`.
    pub fn detect(&mut self, graph: &PoseGraph, query: NodeId) -> Option<LoopClosureCandidate> {
        let current = graph.get_node(query)?;

        if let Some(last) = self.last_closure_query
            && query < last + self.config.min_nodes_between_closures
        {
            return None;
        }

        let radius = self.config.max_search_distance;
        let radius_sq = radius * radius;
        let here = current.pose.position();

        // Nearest wins; ties go to the older node
        let best = graph
            .nodes()
            .iter()
            .filter(|n| n.id + self.config.min_node_distance <= query)
            .map(|n| (n, n.pose.position().distance_squared(&here)))
            .filter(|(_, d)| *d <= radius_sq)
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.id.cmp(&b.0.id)))?;

        let (matched, dist_sq) = best;
        let confidence = (1.0 - dist_sq.sqrt() / radius.max(1e-6)).clamp(0.0, 1.0);
        if confidence < self.config.min_confidence {
            return None;
        }

        let [sx, sy, st] = self.config.closure_std_dev;
        let candidate = LoopClosureCandidate {
            query_id: query,
            match_id: matched.id,
            relative_pose: matched.measured.between(&current.measured),
            information: Information2D::from_std_dev(sx, sy, st).scaled(confidence),
            confidence,
        };
        self.last_closure_query = Some(query);

        log::debug!(
            "Loop closure candidate {} -> {} (confidence {:.2})",
            candidate.match_id,
            candidate.query_id,
            confidence
        );
        Some(candidate)
    }
}
