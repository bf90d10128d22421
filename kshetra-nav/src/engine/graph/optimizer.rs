//! Graph optimization using Levenberg-Marquardt.
//!
//! Minimizes
//!
//! ```text
//! F(x) = Σ eᵢⱼᵀ Ωᵢⱼ eᵢⱼ   relative edges
//!      + Σ eₚᵀ Ωₚ eₚ       position priors
//!      + Σ eₗᵀ Ωₗ eₗ       landmark observations
//! ```
//!
//! Each iteration builds the block-sparse normal equations `H Δx = -b`
//! (3x3 blocks, one per free node or landmark), damps the diagonal and
//! solves with Jacobi-preconditioned conjugate gradients.
//!
//! Nodes that are fixed or stale are held; when nothing else anchors the
//! graph the first node is held to remove the gauge freedom.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::pose_graph::{Information2D, PoseGraph};
use crate::core::math::normalize_angle_f64;
use crate::core::types::{Point2D, Pose2D};

/// Result of graph optimization.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationResult {
    pub iterations: u32,
    /// Initial chi-squared error.
    pub initial_error: f64,
    /// Final chi-squared error.
    pub final_error: f64,
    pub converged: bool,
    pub termination_reason: TerminationReason,
    /// Whether the optimized poses were kept in the graph.
    pub applied: bool,
}

/// Reason for optimization termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Converged (error change below threshold).
    Converged,
    /// Maximum iterations reached.
    MaxIterations,
    /// Deadline passed.
    TimedOut,
    /// Abandoned on request.
    Cancelled,
    /// Error kept increasing.
    Diverged,
    /// Linear system solve failed.
    SolveFailed,
    /// No constraints to optimize.
    NoEdges,
}

/// Configuration for graph optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphOptimizerConfig {
    /// Maximum number of LM iterations.
    pub max_iterations: u32,
    /// Convergence threshold for relative error change.
    pub convergence_threshold: f64,
    /// Initial Levenberg-Marquardt damping.
    pub damping_factor: f64,
    /// Conjugate-gradient iteration cap per solve.
    pub cg_max_iterations: usize,
    /// Conjugate-gradient relative residual tolerance.
    pub cg_tolerance: f64,
}

impl Default for GraphOptimizerConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            convergence_threshold: 1e-6,
            damping_factor: 1e-3,
            cg_max_iterations: 1000,
            cg_tolerance: 1e-10,
        }
    }
}

type Block = [f64; 9];

/// Maps graph entities to optimization variables.
struct VariableLayout {
    /// Node position in graph → variable index
    node_vars: Vec<Option<usize>>,
    /// Landmark id → variable index
    landmark_vars: BTreeMap<u64, usize>,
    count: usize,
}

impl VariableLayout {
    fn new(graph: &PoseGraph) -> Self {
        let anchored = !graph.priors().is_empty() || graph.nodes().iter().any(|n| n.is_held());

        let mut count = 0;
        let node_vars = graph
            .nodes()
            .iter()
            .enumerate()
            .map(|(i, n)| {
                if n.is_held() || (!anchored && i == 0) {
                    None
                } else {
                    count += 1;
                    Some(count - 1)
                }
            })
            .collect();

        let mut landmark_vars = BTreeMap::new();
        for (id, lm) in graph.landmarks() {
            if !lm.fixed {
                landmark_vars.insert(*id, count);
                count += 1;
            }
        }

        Self {
            node_vars,
            landmark_vars,
            count,
        }
    }

    fn node(&self, graph: &PoseGraph, id: u64) -> Option<usize> {
        graph.get_node_index(id).and_then(|i| self.node_vars[i])
    }
}

/// Block-sparse symmetric system.
struct SparseSystem {
    diag: Vec<Block>,
    /// Upper off-diagonal blocks keyed by (row, col), row < col
    off: BTreeMap<(usize, usize), Block>,
    b: Vec<f64>,
}

impl SparseSystem {
    fn new(n: usize) -> Self {
        Self {
            diag: vec![[0.0; 9]; n],
            off: BTreeMap::new(),
            b: vec![0.0; n * 3],
        }
    }

    /// y = H x
    fn mul(&self, x: &[f64], y: &mut [f64]) {
        for (i, block) in self.diag.iter().enumerate() {
            let out = mat3_vec(block, &x[i * 3..i * 3 + 3]);
            y[i * 3..i * 3 + 3].copy_from_slice(&out);
        }
        for (&(i, j), block) in &self.off {
            let a = mat3_vec(block, &x[j * 3..j * 3 + 3]);
            let bt = mat3_transpose_vec(block, &x[i * 3..i * 3 + 3]);
            for k in 0..3 {
                y[i * 3 + k] += a[k];
                y[j * 3 + k] += bt[k];
            }
        }
    }
}

/// Graph optimizer using Levenberg-Marquardt.
pub struct GraphOptimizer {
    config: GraphOptimizerConfig,
}

impl GraphOptimizer {
    pub fn new(config: GraphOptimizerConfig) -> Self {
        Self { config }
    }

    /// Optimize in place; on failure the previous poses are restored.
    pub fn optimize(&self, graph: &mut PoseGraph, deadline: Option<Instant>) -> OptimizationResult {
        self.run(graph, deadline, None)
    }

    /// Like [`optimize`](Self::optimize) but abandons work once `cancel` is set.
    pub fn optimize_cancellable(
        &self,
        graph: &mut PoseGraph,
        deadline: Option<Instant>,
        cancel: &AtomicBool,
    ) -> OptimizationResult {
        self.run(graph, deadline, Some(cancel))
    }

    fn run(
        &self,
        graph: &mut PoseGraph,
        deadline: Option<Instant>,
        cancel: Option<&AtomicBool>,
    ) -> OptimizationResult {
        let layout = VariableLayout::new(graph);

        if graph.num_constraints() == 0 || layout.count == 0 {
            return OptimizationResult {
                iterations: 0,
                initial_error: 0.0,
                final_error: 0.0,
                converged: true,
                termination_reason: TerminationReason::NoEdges,
                applied: true,
            };
        }

        let saved_poses: Vec<Pose2D> = graph.nodes().iter().map(|n| n.pose).collect();
        let saved_landmarks: Vec<(u64, Point2D)> = graph
            .landmarks()
            .iter()
            .map(|(id, l)| (*id, l.position))
            .collect();

        let initial_error = compute_chi_squared(graph);
        let mut current_error = initial_error;
        let mut lambda = self.config.damping_factor;
        let mut iterations = 0;
        let mut reason = TerminationReason::MaxIterations;

        for iter in 0..self.config.max_iterations {
            if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                reason = TerminationReason::Cancelled;
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                reason = TerminationReason::TimedOut;
                break;
            }
            iterations = iter + 1;

            let mut system = build_linear_system(graph, &layout);
            for block in system.diag.iter_mut() {
                for d in [0, 4, 8] {
                    block[d] += lambda * block[d].max(1.0);
                }
            }

            let Some(dx) = self.solve(&system) else {
                reason = TerminationReason::SolveFailed;
                break;
            };

            // Step below f32 pose resolution
            if dx.iter().all(|v| v.abs() < 1e-7) {
                reason = TerminationReason::Converged;
                break;
            }

            apply_update(graph, &layout, &dx, 1.0);
            let new_error = compute_chi_squared(graph);

            if !new_error.is_finite() || new_error > current_error * (1.0 + 1e-9) {
                apply_update(graph, &layout, &dx, -1.0);
                lambda *= 10.0;
                if lambda > 1e10 {
                    // No step reduces the error any further
                    reason = if current_error < initial_error {
                        TerminationReason::Converged
                    } else {
                        TerminationReason::Diverged
                    };
                    break;
                }
                continue;
            }

            lambda = (lambda * 0.1).max(1e-10);

            let relative_change = (current_error - new_error).abs() / current_error.max(1e-10);
            current_error = new_error;

            if relative_change < self.config.convergence_threshold || current_error < 1e-12 {
                reason = TerminationReason::Converged;
                break;
            }
        }

        let converged = reason == TerminationReason::Converged;
        if !converged {
            for (node, pose) in graph.nodes_mut().iter_mut().zip(&saved_poses) {
                node.pose = *pose;
            }
            for (id, pos) in saved_landmarks {
                if let Some(l) = graph.landmarks_mut().get_mut(&id) {
                    l.position = pos;
                }
            }
            log::warn!(
                "Pose graph optimization abandoned after {} iterations: {:?}",
                iterations,
                reason
            );
        } else {
            log::debug!(
                "Pose graph optimized in {} iterations: chi2 {:.4} -> {:.4}",
                iterations,
                initial_error,
                current_error
            );
        }

        OptimizationResult {
            iterations,
            initial_error,
            final_error: if converged { current_error } else { initial_error },
            converged,
            termination_reason: reason,
            applied: converged,
        }
    }

    /// Solve H Δx = -b with block-Jacobi preconditioned conjugate gradients.
    fn solve(&self, system: &SparseSystem) -> Option<Vec<f64>> {
        let n = system.b.len();
        let precond: Vec<Block> = system
            .diag
            .iter()
            .map(mat3_inverse_f64)
            .collect::<Option<Vec<_>>>()?;
        let apply_precond = |r: &[f64], z: &mut [f64]| {
            for (i, m) in precond.iter().enumerate() {
                let out = mat3_vec(m, &r[i * 3..i * 3 + 3]);
                z[i * 3..i * 3 + 3].copy_from_slice(&out);
            }
        };

        let mut x = vec![0.0; n];
        let mut r: Vec<f64> = system.b.iter().map(|v| -v).collect();
        let rhs_norm = dot(&r, &r).sqrt();
        if rhs_norm < 1e-15 {
            return Some(x);
        }

        let mut z = vec![0.0; n];
        apply_precond(&r, &mut z);
        let mut p = z.clone();
        let mut rz = dot(&r, &z);
        let mut hp = vec![0.0; n];

        for _ in 0..self.config.cg_max_iterations.max(1) {
            system.mul(&p, &mut hp);
            let php = dot(&p, &hp);
            if php <= 0.0 || !php.is_finite() {
                return None;
            }
            let alpha = rz / php;
            for i in 0..n {
                x[i] += alpha * p[i];
                r[i] -= alpha * hp[i];
            }
            if dot(&r, &r).sqrt() <= self.config.cg_tolerance * rhs_norm {
                break;
            }
            apply_precond(&r, &mut z);
            let rz_new = dot(&r, &z);
            let beta = rz_new / rz;
            rz = rz_new;
            for i in 0..n {
                p[i] = z[i] + beta * p[i];
            }
        }

        x.iter().all(|v| v.is_finite()).then_some(x)
    }
}

/// Total chi-squared error over every residual.
pub fn compute_chi_squared(graph: &PoseGraph) -> f64 {
    let mut chi2 = 0.0;

    for edge in graph.edges() {
        let (Some(ni), Some(nj)) = (graph.get_node(edge.from), graph.get_node(edge.to)) else {
            continue;
        };
        let e = compute_edge_error(&ni.pose, &nj.pose, &edge.measurement);
        chi2 += quadratic(&e, &edge.information.to_matrix());
    }

    for prior in graph.priors() {
        let Some(node) = graph.get_node(prior.node) else {
            continue;
        };
        let e = [
            (node.pose.x - prior.prior.position.x) as f64,
            (node.pose.y - prior.prior.position.y) as f64,
            0.0,
        ];
        chi2 += quadratic(&e, &info2_matrix(&prior.prior.information));
    }

    for obs in graph.observations() {
        let (Some(node), Some(lm)) = (graph.get_node(obs.node), graph.landmarks().get(&obs.landmark))
        else {
            continue;
        };
        let e = compute_landmark_error(&node.pose, &lm.position, &obs.local);
        chi2 += quadratic(&e, &info2_matrix(&obs.information));
    }

    chi2
}

/// Error = inv(xi) ⊕ xj - zij
fn compute_edge_error(xi: &Pose2D, xj: &Pose2D, measurement: &Pose2D) -> [f64; 3] {
    let predicted = xi.between(xj);
    [
        (predicted.x - measurement.x) as f64,
        (predicted.y - measurement.y) as f64,
        normalize_angle_f64((predicted.theta - measurement.theta) as f64),
    ]
}

/// Error = R(θᵢ)ᵀ (l - tᵢ) - z
fn compute_landmark_error(xi: &Pose2D, landmark: &Point2D, local: &Point2D) -> [f64; 3] {
    let predicted = xi.inverse_transform_point(landmark);
    [
        (predicted.x - local.x) as f64,
        (predicted.y - local.y) as f64,
        0.0,
    ]
}

fn build_linear_system(graph: &PoseGraph, layout: &VariableLayout) -> SparseSystem {
    let mut system = SparseSystem::new(layout.count);

    for edge in graph.edges() {
        let (Some(ni), Some(nj)) = (graph.get_node(edge.from), graph.get_node(edge.to)) else {
            continue;
        };
        let error = compute_edge_error(&ni.pose, &nj.pose, &edge.measurement);
        let (ji, jj) = compute_jacobians(&ni.pose, &nj.pose);
        add_contribution(
            &mut system,
            layout.node(graph, edge.from),
            layout.node(graph, edge.to),
            &ji,
            &jj,
            &error,
            &edge.information.to_matrix(),
        );
    }

    const IDENTITY: Block = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    for prior in graph.priors() {
        let Some(node) = graph.get_node(prior.node) else {
            continue;
        };
        let error = [
            (node.pose.x - prior.prior.position.x) as f64,
            (node.pose.y - prior.prior.position.y) as f64,
            0.0,
        ];
        add_contribution(
            &mut system,
            layout.node(graph, prior.node),
            None,
            &IDENTITY,
            &IDENTITY,
            &error,
            &info2_matrix(&prior.prior.information),
        );
    }

    for obs in graph.observations() {
        let (Some(node), Some(lm)) = (graph.get_node(obs.node), graph.landmarks().get(&obs.landmark))
        else {
            continue;
        };
        let error = compute_landmark_error(&node.pose, &lm.position, &obs.local);
        let (ji, jl) = compute_landmark_jacobians(&node.pose, &lm.position);
        add_contribution(
            &mut system,
            layout.node(graph, obs.node),
            layout.landmark_vars.get(&obs.landmark).copied(),
            &ji,
            &jl,
            &error,
            &info2_matrix(&obs.information),
        );
    }

    // Landmark variables have no heading; keep their block invertible
    for &var in layout.landmark_vars.values() {
        system.diag[var][8] += 1.0;
    }

    system
}

/// Jacobians of the relative-pose error.
///
/// Returns (Ji, Jj) as row-major 3x3 matrices.
fn compute_jacobians(xi: &Pose2D, xj: &Pose2D) -> (Block, Block) {
    let (sin_i, cos_i) = (xi.theta as f64).sin_cos();
    let dx = (xj.x - xi.x) as f64;
    let dy = (xj.y - xi.y) as f64;

    let ji = [
        -cos_i,
        -sin_i,
        -sin_i * dx + cos_i * dy,
        sin_i,
        -cos_i,
        -cos_i * dx - sin_i * dy,
        0.0,
        0.0,
        -1.0,
    ];
    let jj = [
        cos_i, sin_i, 0.0, //
        -sin_i, cos_i, 0.0, //
        0.0, 0.0, 1.0,
    ];
    (ji, jj)
}

/// Jacobians of the landmark error w.r.t. the node and the landmark.
fn compute_landmark_jacobians(xi: &Pose2D, landmark: &Point2D) -> (Block, Block) {
    let (sin_i, cos_i) = (xi.theta as f64).sin_cos();
    let dx = (landmark.x - xi.x) as f64;
    let dy = (landmark.y - xi.y) as f64;

    let ji = [
        -cos_i,
        -sin_i,
        -sin_i * dx + cos_i * dy,
        sin_i,
        -cos_i,
        -cos_i * dx - sin_i * dy,
        0.0,
        0.0,
        0.0,
    ];
    let jl = [
        cos_i, sin_i, 0.0, //
        -sin_i, cos_i, 0.0, //
        0.0, 0.0, 0.0,
    ];
    (ji, jl)
}

/// Accumulate JᵀΩJ and JᵀΩe for one residual. `None` variables are held.
fn add_contribution(
    system: &mut SparseSystem,
    var_i: Option<usize>,
    var_j: Option<usize>,
    ji: &Block,
    jj: &Block,
    error: &[f64; 3],
    omega: &Block,
) {
    let omega_ji = mat3_mul(omega, ji);
    let omega_jj = mat3_mul(omega, jj);
    let omega_e = mat3_vec(omega, error);

    if let Some(i) = var_i {
        let h_ii = mat3_transpose_mul(ji, &omega_ji);
        add_block(&mut system.diag[i], &h_ii);
        let b_i = mat3_transpose_vec(ji, &omega_e);
        for r in 0..3 {
            system.b[i * 3 + r] += b_i[r];
        }
    }
    if let Some(j) = var_j {
        let h_jj = mat3_transpose_mul(jj, &omega_jj);
        add_block(&mut system.diag[j], &h_jj);
        let b_j = mat3_transpose_vec(jj, &omega_e);
        for r in 0..3 {
            system.b[j * 3 + r] += b_j[r];
        }
    }
    if let (Some(i), Some(j)) = (var_i, var_j) {
        // H_ij = Jiᵀ Ω Jj, stored once in the upper triangle
        let (key, block) = if i < j {
            ((i, j), mat3_transpose_mul(ji, &omega_jj))
        } else {
            ((j, i), mat3_transpose_mul(jj, &omega_ji))
        };
        add_block(system.off.entry(key).or_insert([0.0; 9]), &block);
    }
}

fn apply_update(graph: &mut PoseGraph, layout: &VariableLayout, dx: &[f64], sign: f64) {
    for (idx, node) in graph.nodes_mut().iter_mut().enumerate() {
        let Some(var) = layout.node_vars[idx] else {
            continue;
        };
        let base = var * 3;
        node.pose = Pose2D::new(
            node.pose.x + (sign * dx[base]) as f32,
            node.pose.y + (sign * dx[base + 1]) as f32,
            node.pose.theta + (sign * dx[base + 2]) as f32,
        );
    }
    for (id, &var) in &layout.landmark_vars {
        if let Some(lm) = graph.landmarks_mut().get_mut(id) {
            lm.position.x += (sign * dx[var * 3]) as f32;
            lm.position.y += (sign * dx[var * 3 + 1]) as f32;
        }
    }
}

fn info2_matrix(info: &[f32; 3]) -> Block {
    Information2D {
        xx: info[0],
        xy: info[1],
        xt: 0.0,
        yy: info[2],
        yt: 0.0,
        tt: 0.0,
    }
    .to_matrix()
}

fn quadratic(e: &[f64; 3], omega: &Block) -> f64 {
    let w = mat3_vec(omega, e);
    e[0] * w[0] + e[1] * w[1] + e[2] * w[2]
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn add_block(dst: &mut Block, src: &Block) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}

/// Multiply two 3x3 matrices (row-major).
fn mat3_mul(a: &Block, b: &Block) -> Block {
    let mut c = [0.0; 9];
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                c[i * 3 + j] += a[i * 3 + k] * b[k * 3 + j];
            }
        }
    }
    c
}

/// Aᵀ · B
fn mat3_transpose_mul(a: &Block, b: &Block) -> Block {
    let mut c = [0.0; 9];
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                c[i * 3 + j] += a[k * 3 + i] * b[k * 3 + j];
            }
        }
    }
    c
}

fn mat3_vec(a: &Block, v: &[f64]) -> [f64; 3] {
    [
        a[0] * v[0] + a[1] * v[1] + a[2] * v[2],
        a[3] * v[0] + a[4] * v[1] + a[5] * v[2],
        a[6] * v[0] + a[7] * v[1] + a[8] * v[2],
    ]
}

fn mat3_transpose_vec(a: &Block, v: &[f64]) -> [f64; 3] {
    [
        a[0] * v[0] + a[3] * v[1] + a[6] * v[2],
        a[1] * v[0] + a[4] * v[1] + a[7] * v[2],
        a[2] * v[0] + a[5] * v[1] + a[8] * v[2],
    ]
}

fn mat3_inverse_f64(a: &Block) -> Option<Block> {
    let det = a[0] * (a[4] * a[8] - a[5] * a[7]) - a[1] * (a[3] * a[8] - a[5] * a[6])
        + a[2] * (a[3] * a[7] - a[4] * a[6]);
    if det.abs() < 1e-300 || !det.is_finite() {
        return None;
    }
    let inv = 1.0 / det;
    Some([
        (a[4] * a[8] - a[5] * a[7]) * inv,
        (a[2] * a[7] - a[1] * a[8]) * inv,
        (a[1] * a[5] - a[2] * a[4]) * inv,
        (a[5] * a[6] - a[3] * a[8]) * inv,
        (a[0] * a[8] - a[2] * a[6]) * inv,
        (a[2] * a[3] - a[0] * a[5]) * inv,
        (a[3] * a[7] - a[4] * a[6]) * inv,
        (a[1] * a[6] - a[0] * a[7]) * inv,
        (a[0] * a[4] - a[1] * a[3]) * inv,
    ])
}
