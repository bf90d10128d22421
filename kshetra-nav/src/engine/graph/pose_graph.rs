//! Pose graph data structure for the optimization backend.
//!
//! A pose graph represents the robot trajectory as a graph where:
//! - Nodes are fused poses at insertion times
//! - Edges are relative pose constraints between nodes
//! - Priors pin a node to an absolute position (satellite fixes)
//! - Landmark observations tie a node to a landmark kept by id
//!
//! Nodes are append-only. Old nodes beyond the active window are marked
//! stale and held fixed; they only disappear from the saved file.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::persist::write_atomic;
use crate::core::types::{Point2D, Pose, Pose2D};
use crate::error::{NavError, Result};

pub type NodeId = u64;
pub type LandmarkId = u64;

const GRAPH_FILE_VERSION: u32 = 1;

/// Information matrix (inverse covariance) for 2D pose.
///
/// Stored as the upper triangle of a 3x3 symmetric matrix:
/// ```text
/// | xx  xy  xt |
/// | xy  yy  yt |
/// | xt  yt  tt |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Information2D {
    pub xx: f32,
    pub xy: f32,
    pub xt: f32,
    pub yy: f32,
    pub yt: f32,
    pub tt: f32,
}

impl Information2D {
    /// Create a diagonal information matrix.
    pub fn diagonal(xx: f32, yy: f32, tt: f32) -> Self {
        Self {
            xx,
            xy: 0.0,
            xt: 0.0,
            yy,
            yt: 0.0,
            tt,
        }
    }

    /// Create from standard deviations.
    pub fn from_std_dev(sigma_x: f32, sigma_y: f32, sigma_t: f32) -> Self {
        Self::diagonal(
            1.0 / (sigma_x * sigma_x),
            1.0 / (sigma_y * sigma_y),
            1.0 / (sigma_t * sigma_t),
        )
    }

    /// Multiply every entry by `k`.
    pub fn scaled(&self, k: f32) -> Self {
        Self {
            xx: self.xx * k,
            xy: self.xy * k,
            xt: self.xt * k,
            yy: self.yy * k,
            yt: self.yt * k,
            tt: self.tt * k,
        }
    }

    /// Full row-major matrix in f64.
    pub fn to_matrix(&self) -> [f64; 9] {
        [
            self.xx as f64,
            self.xy as f64,
            self.xt as f64,
            self.xy as f64,
            self.yy as f64,
            self.yt as f64,
            self.xt as f64,
            self.yt as f64,
            self.tt as f64,
        ]
    }

    pub fn is_valid(&self) -> bool {
        let v = [self.xx, self.xy, self.xt, self.yy, self.yt, self.tt];
        v.iter().all(|x| x.is_finite()) && self.xx >= 0.0 && self.yy >= 0.0 && self.tt >= 0.0
    }
}

impl Default for Information2D {
    fn default() -> Self {
        // 10cm position std dev, ~5 degree heading std dev
        Self::from_std_dev(0.1, 0.1, 0.087)
    }
}

/// Type of edge in the pose graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeType {
    /// Sequential odometry constraint.
    Odometry,
    /// Loop closure constraint.
    LoopClosure,
    /// Any other relative constraint.
    Relative,
}

/// Relative constraint to add between two nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constraint {
    Odometry {
        measurement: Pose2D,
        information: Information2D,
    },
    LoopClosure {
        measurement: Pose2D,
        information: Information2D,
        confidence: f32,
    },
    Relative {
        measurement: Pose2D,
        information: Information2D,
    },
}

/// A node in the pose graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseNode {
    /// Unique, strictly increasing identifier.
    pub id: NodeId,
    /// Current (optimized) pose estimate.
    pub pose: Pose2D,
    /// Fused pose at insertion time, never optimized.
    pub measured: Pose2D,
    /// Timestamp in microseconds.
    pub timestamp_us: u64,
    /// Whether this node's pose is held fixed.
    pub fixed: bool,
    /// Outside the active window.
    pub stale: bool,
}

impl PoseNode {
    pub fn new(id: NodeId, pose: Pose2D, timestamp_us: u64) -> Self {
        Self {
            id,
            pose,
            measured: pose,
            timestamp_us,
            fixed: false,
            stale: false,
        }
    }

    /// Fixed or stale nodes are not optimized.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.fixed || self.stale
    }
}

/// An edge in the pose graph representing a constraint between poses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseEdge {
    pub from: NodeId,
    pub to: NodeId,
    /// Relative pose measurement: T_from⁻¹ ⊕ T_to
    pub measurement: Pose2D,
    pub information: Information2D,
    pub edge_type: EdgeType,
    /// Confidence score for this edge (0-1).
    pub confidence: f32,
}

impl PoseEdge {
    pub fn new(from: NodeId, to: NodeId, constraint: Constraint) -> Self {
        let (measurement, information, edge_type, confidence) = match constraint {
            Constraint::Odometry {
                measurement,
                information,
            } => (measurement, information, EdgeType::Odometry, 1.0),
            Constraint::LoopClosure {
                measurement,
                information,
                confidence,
            } => (measurement, information, EdgeType::LoopClosure, confidence),
            Constraint::Relative {
                measurement,
                information,
            } => (measurement, information, EdgeType::Relative, 1.0),
        };
        Self {
            from,
            to,
            measurement,
            information,
            edge_type,
            confidence,
        }
    }
}

/// Absolute position constraint for one node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionPrior {
    pub position: Point2D,
    /// Information over (x, y): xx, xy, yy
    pub information: [f32; 3],
}

impl PositionPrior {
    /// Isotropic prior with the given standard deviation.
    pub fn new(position: Point2D, std_dev_m: f32) -> Self {
        let info = 1.0 / (std_dev_m * std_dev_m).max(1e-6);
        Self {
            position,
            information: [info, 0.0, info],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriorEdge {
    pub node: NodeId,
    pub prior: PositionPrior,
}

/// Landmark position, owned by the graph and referenced by id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub id: LandmarkId,
    pub position: Point2D,
    pub fixed: bool,
}

/// Landmark seen from a node, in the robot frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkObservation {
    pub node: NodeId,
    pub landmark: LandmarkId,
    pub local: Point2D,
    /// Information over the local (x, y): xx, xy, yy
    pub information: [f32; 3],
}

/// On-disk layout.
#[derive(Debug, Serialize, Deserialize)]
struct GraphFile {
    version: u32,
    nodes: Vec<PoseNode>,
    edges: Vec<PoseEdge>,
    priors: Vec<PriorEdge>,
    landmarks: Vec<Landmark>,
    observations: Vec<LandmarkObservation>,
}

/// Pose graph for trajectory optimization.
#[derive(Debug, Default, Clone)]
pub struct PoseGraph {
    nodes: Vec<PoseNode>,
    edges: Vec<PoseEdge>,
    priors: Vec<PriorEdge>,
    landmarks: BTreeMap<LandmarkId, Landmark>,
    observations: Vec<LandmarkObservation>,
    next_node_id: NodeId,
    /// Node id to position in `nodes`.
    node_index: HashMap<NodeId, usize>,
}

impl PoseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node for a fused pose.
    ///
    /// Ids are assigned strictly increasing; timestamps must not go back.
    pub fn add_node(&mut self, pose: &Pose) -> Result<NodeId> {
        if !pose.pose.is_finite() {
            return Err(NavError::Graph("non-finite node pose".into()));
        }
        if let Some(last) = self.nodes.last()
            && pose.timestamp_us < last.timestamp_us
        {
            return Err(NavError::Graph(format!(
                "node timestamp {} before previous {}",
                pose.timestamp_us, last.timestamp_us
            )));
        }

        let id = self.next_node_id;
        self.next_node_id += 1;
        self.node_index.insert(id, self.nodes.len());
        self.nodes.push(PoseNode::new(id, pose.pose, pose.timestamp_us));
        Ok(id)
    }

    /// Add a relative constraint between two existing nodes.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, constraint: Constraint) -> Result<()> {
        if from == to {
            return Err(NavError::Graph(format!("self edge on node {}", from)));
        }
        for id in [from, to] {
            if !self.node_index.contains_key(&id) {
                return Err(NavError::Graph(format!("unknown node {}", id)));
            }
        }
        let edge = PoseEdge::new(from, to, constraint);
        if !edge.measurement.is_finite() || !edge.information.is_valid() {
            return Err(NavError::Graph("invalid edge measurement".into()));
        }
        self.edges.push(edge);
        Ok(())
    }

    pub fn add_prior(&mut self, node: NodeId, prior: PositionPrior) -> Result<()> {
        if !self.node_index.contains_key(&node) {
            return Err(NavError::Graph(format!("unknown node {}", node)));
        }
        if !prior.position.is_finite() {
            return Err(NavError::Graph("non-finite prior".into()));
        }
        self.priors.push(PriorEdge { node, prior });
        Ok(())
    }

    /// Insert or move a landmark.
    pub fn add_landmark(&mut self, id: LandmarkId, position: Point2D) {
        self.landmarks.insert(
            id,
            Landmark {
                id,
                position,
                fixed: false,
            },
        );
    }

    /// Landmark with a surveyed position that optimization must not move.
    pub fn add_fixed_landmark(&mut self, id: LandmarkId, position: Point2D) {
        self.landmarks.insert(
            id,
            Landmark {
                id,
                position,
                fixed: true,
            },
        );
    }

    pub fn observe_landmark(
        &mut self,
        node: NodeId,
        landmark: LandmarkId,
        local: Point2D,
        std_dev_m: f32,
    ) -> Result<()> {
        if !self.node_index.contains_key(&node) {
            return Err(NavError::Graph(format!("unknown node {}", node)));
        }
        if !self.landmarks.contains_key(&landmark) {
            return Err(NavError::Graph(format!("unknown landmark {}", landmark)));
        }
        let info = 1.0 / (std_dev_m * std_dev_m).max(1e-6);
        self.observations.push(LandmarkObservation {
            node,
            landmark,
            local,
            information: [info, 0.0, info],
        });
        Ok(())
    }

    /// Mark the oldest nodes beyond `max_active` stale. Returns how many
    /// nodes changed.
    pub fn mark_stale_before(&mut self, max_active: usize) -> usize {
        let excess = self.nodes.len().saturating_sub(max_active);
        let mut marked = 0;
        for node in self.nodes.iter_mut().take(excess) {
            if !node.stale {
                node.stale = true;
                marked += 1;
            }
        }
        if marked > 0 {
            log::debug!("Marked {} pose nodes stale", marked);
        }
        marked
    }

    /// Copy without stale nodes and anything touching them.
    pub fn compacted(&self) -> PoseGraph {
        let keep = |id: &NodeId| self.get_node(*id).is_some_and(|n| !n.stale);

        let mut graph = PoseGraph {
            nodes: self.nodes.iter().filter(|n| !n.stale).cloned().collect(),
            edges: self
                .edges
                .iter()
                .filter(|e| keep(&e.from) && keep(&e.to))
                .cloned()
                .collect(),
            priors: self.priors.iter().filter(|p| keep(&p.node)).copied().collect(),
            landmarks: self.landmarks.clone(),
            observations: self
                .observations
                .iter()
                .filter(|o| keep(&o.node))
                .copied()
                .collect(),
            next_node_id: self.next_node_id,
            node_index: HashMap::new(),
        };
        graph.rebuild_index();
        graph
    }

    /// Write the compacted graph as JSON (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        let compact = self.compacted();
        let file = GraphFile {
            version: GRAPH_FILE_VERSION,
            nodes: compact.nodes,
            edges: compact.edges,
            priors: compact.priors,
            landmarks: compact.landmarks.into_values().collect(),
            observations: compact.observations,
        };
        let json = serde_json::to_vec_pretty(&file)?;

        write_atomic(path, &json)?;
        log::info!(
            "Saved pose graph ({} nodes, {} edges) to {}",
            file.nodes.len(),
            file.edges.len(),
            path.display()
        );
        Ok(())
    }

    pub fn load(path: &Path) -> Result<PoseGraph> {
        let bytes = fs::read(path)?;
        let file: GraphFile = serde_json::from_slice(&bytes)?;
        if file.version != GRAPH_FILE_VERSION {
            return Err(NavError::Graph(format!(
                "unsupported graph version {}",
                file.version
            )));
        }

        let mut graph = PoseGraph {
            nodes: file.nodes,
            edges: file.edges,
            priors: file.priors,
            landmarks: file.landmarks.into_iter().map(|l| (l.id, l)).collect(),
            observations: file.observations,
            next_node_id: 0,
            node_index: HashMap::new(),
        };

        for pair in graph.nodes.windows(2) {
            if pair[1].id <= pair[0].id || pair[1].timestamp_us < pair[0].timestamp_us {
                return Err(NavError::Graph("nodes out of order in file".into()));
            }
        }
        graph.rebuild_index();
        graph.next_node_id = graph.nodes.last().map_or(0, |n| n.id + 1);

        let dangling = graph
            .edges
            .iter()
            .any(|e| !graph.node_index.contains_key(&e.from) || !graph.node_index.contains_key(&e.to))
            || graph
                .observations
                .iter()
                .any(|o| !graph.node_index.contains_key(&o.node) || !graph.landmarks.contains_key(&o.landmark))
            || graph.priors.iter().any(|p| !graph.node_index.contains_key(&p.node));
        if dangling {
            return Err(NavError::Graph("constraint references missing node".into()));
        }
        Ok(graph)
    }

    fn rebuild_index(&mut self) {
        self.node_index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id, i))
            .collect();
    }

    pub fn get_node(&self, id: NodeId) -> Option<&PoseNode> {
        self.node_index.get(&id).map(|&idx| &self.nodes[idx])
    }

    pub fn get_node_index(&self, id: NodeId) -> Option<usize> {
        self.node_index.get(&id).copied()
    }

    pub fn nodes(&self) -> &[PoseNode] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [PoseNode] {
        &mut self.nodes
    }

    pub fn edges(&self) -> &[PoseEdge] {
        &self.edges
    }

    pub fn priors(&self) -> &[PriorEdge] {
        &self.priors
    }

    pub fn landmarks(&self) -> &BTreeMap<LandmarkId, Landmark> {
        &self.landmarks
    }

    pub fn landmarks_mut(&mut self) -> &mut BTreeMap<LandmarkId, Landmark> {
        &mut self.landmarks
    }

    pub fn observations(&self) -> &[LandmarkObservation] {
        &self.observations
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of residual terms the optimizer will see.
    pub fn num_constraints(&self) -> usize {
        self.edges.len() + self.priors.len() + self.observations.len()
    }

    pub fn num_loop_closures(&self) -> usize {
        self.edges
            .iter()
            .filter(|e| e.edge_type == EdgeType::LoopClosure)
            .count()
    }

    pub fn latest_node(&self) -> Option<&PoseNode> {
        self.nodes.last()
    }

    /// Fix the first node (anchor for optimization).
    pub fn fix_first_node(&mut self) {
        if let Some(node) = self.nodes.first_mut() {
            node.fixed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Covariance2D, Twist2D};
    use approx::assert_relative_eq;

    fn pose_at(x: f32, ts: u64) -> Pose {
        Pose::new(Pose2D::new(x, 0.0, 0.0), Twist2D::zero(), ts, Covariance2D::zero())
    }

    fn odom(dx: f32) -> Constraint {
        Constraint::Odometry {
            measurement: Pose2D::new(dx, 0.0, 0.0),
            information: Information2D::default(),
        }
    }

    #[test]
    fn test_information_from_std_dev() {
        let info = Information2D::from_std_dev(0.1, 0.1, 0.1);
        assert_relative_eq!(info.xx, 100.0, epsilon = 0.1);
        assert_relative_eq!(info.tt, 100.0, epsilon = 0.1);
        assert_relative_eq!(info.scaled(0.5).yy, 50.0, epsilon = 0.1);
    }

    #[test]
    fn test_ids_increase_and_time_ordered() {
        let mut graph = PoseGraph::new();
        let a = graph.add_node(&pose_at(0.0, 100)).unwrap();
        let b = graph.add_node(&pose_at(1.0, 100)).unwrap();
        assert!(b > a);
        assert!(matches!(
            graph.add_node(&pose_at(2.0, 50)),
            Err(NavError::Graph(_))
        ));
        assert_eq!(graph.num_nodes(), 2);
    }

    #[test]
    fn test_edge_requires_existing_nodes() {
        let mut graph = PoseGraph::new();
        let a = graph.add_node(&pose_at(0.0, 0)).unwrap();
        let b = graph.add_node(&pose_at(1.0, 1)).unwrap();
        graph.add_edge(a, b, odom(1.0)).unwrap();
        assert!(graph.add_edge(a, 99, odom(1.0)).is_err());
        assert!(graph.add_edge(a, a, odom(0.0)).is_err());
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.edges()[0].edge_type, EdgeType::Odometry);
    }

    #[test]
    fn test_stale_nodes_kept_in_memory_dropped_on_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.json");

        let mut graph = PoseGraph::new();
        let mut prev = None;
        for i in 0..6 {
            let id = graph.add_node(&pose_at(i as f32, i)).unwrap();
            if let Some(p) = prev {
                graph.add_edge(p, id, odom(1.0)).unwrap();
            }
            prev = Some(id);
        }
        assert_eq!(graph.mark_stale_before(4), 2);
        assert_eq!(graph.num_nodes(), 6);
        assert!(graph.nodes()[1].is_held());

        graph.save(&path).unwrap();
        let loaded = PoseGraph::load(&path).unwrap();
        assert_eq!(loaded.num_nodes(), 4);
        // Edge 1->2 touches a stale node
        assert_eq!(loaded.edges().len(), 3);
        assert_eq!(loaded.nodes()[0].id, 2);

        let mut loaded = loaded;
        let next = loaded.add_node(&pose_at(6.0, 6)).unwrap();
        assert_eq!(next, 6);
    }

    #[test]
    fn test_landmark_observation_validation() {
        let mut graph = PoseGraph::new();
        let a = graph.add_node(&pose_at(0.0, 0)).unwrap();
        assert!(graph.observe_landmark(a, 7, Point2D::new(1.0, 0.0), 0.1).is_err());
        graph.add_landmark(7, Point2D::new(1.0, 0.0));
        graph.observe_landmark(a, 7, Point2D::new(1.0, 0.0), 0.1).unwrap();
        assert_eq!(graph.num_constraints(), 1);
    }
}
