//! Gradual application of pose-graph corrections to the live estimate.
//!
//! The optimizer reports how far the newest node moved. The fused pose is
//! never jumped: the remaining correction is released in per-tick steps
//! bounded in translation and rotation. Corrections applied after a node
//! was inserted are already reflected in the live estimate and are
//! subtracted from that node's target.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::core::math::{clamp_abs, normalize_angle};
use crate::core::types::Pose2D;

/// World-frame correction of one node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseCorrection {
    pub node_id: u64,
    pub timestamp_us: u64,
    /// Pose the node was inserted with
    pub original: Pose2D,
    pub optimized: Pose2D,
}

impl PoseCorrection {
    /// Offset from original to optimized (x, y and heading differences).
    pub fn delta(&self) -> Pose2D {
        Pose2D::new(
            self.optimized.x - self.original.x,
            self.optimized.y - self.original.y,
            normalize_angle(self.optimized.theta - self.original.theta),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionConfig {
    pub max_translation_step_m: f32,
    pub max_rotation_step_rad: f32,
    /// Remaining corrections smaller than this are dropped.
    pub deadband_m: f32,
    pub deadband_rad: f32,
    /// Insertion marks kept for pending nodes.
    pub history_len: usize,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            max_translation_step_m: 0.05,
            max_rotation_step_rad: 0.02,
            deadband_m: 0.001,
            deadband_rad: 0.0005,
            history_len: 1024,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct InsertMark {
    timestamp_us: u64,
    applied: Pose2D,
}

/// Turns graph corrections into bounded per-tick steps.
#[derive(Debug)]
pub struct CorrectionMerger {
    config: CorrectionConfig,
    /// Sum of every step handed out so far
    applied_total: Pose2D,
    pending: Pose2D,
    marks: VecDeque<InsertMark>,
}

impl CorrectionMerger {
    pub fn new(config: CorrectionConfig) -> Self {
        Self {
            config,
            applied_total: Pose2D::identity(),
            pending: Pose2D::identity(),
            marks: VecDeque::new(),
        }
    }

    /// Record that a node with this timestamp was sent to the graph.
    pub fn on_node_inserted(&mut self, timestamp_us: u64) {
        if self.marks.len() >= self.config.history_len {
            self.marks.pop_front();
        }
        self.marks.push_back(InsertMark {
            timestamp_us,
            applied: self.applied_total,
        });
    }

    /// Replace the pending correction with the remainder of `correction`.
    ///
    /// Returns false when the node is unknown: never inserted, fell out of
    /// the history, or older than an already merged node.
    pub fn merge(&mut self, correction: &PoseCorrection) -> bool {
        let Some(mark) = self
            .marks
            .iter()
            .rev()
            .find(|m| m.timestamp_us == correction.timestamp_us)
            .copied()
        else {
            log::debug!(
                "No insertion mark for node {}, correction ignored",
                correction.node_id
            );
            return false;
        };

        // Drop marks older than the corrected node
        while self
            .marks
            .front()
            .is_some_and(|m| m.timestamp_us < correction.timestamp_us)
        {
            self.marks.pop_front();
        }

        let target = correction.delta();
        let since = Pose2D::new(
            self.applied_total.x - mark.applied.x,
            self.applied_total.y - mark.applied.y,
            self.applied_total.theta - mark.applied.theta,
        );
        self.pending = Pose2D::new(
            target.x - since.x,
            target.y - since.y,
            normalize_angle(target.theta - since.theta),
        );
        log::debug!(
            "Merging correction for node {}: remaining ({:.3}, {:.3}, {:.4})",
            correction.node_id,
            self.pending.x,
            self.pending.y,
            self.pending.theta
        );
        true
    }

    /// Next bounded step, or `None` when nothing is pending.
    pub fn step(&mut self) -> Option<Pose2D> {
        let dist = (self.pending.x * self.pending.x + self.pending.y * self.pending.y).sqrt();
        if dist < self.config.deadband_m && self.pending.theta.abs() < self.config.deadband_rad {
            self.pending = Pose2D::identity();
            return None;
        }

        let scale = if dist > self.config.max_translation_step_m {
            self.config.max_translation_step_m / dist
        } else {
            1.0
        };
        let step = Pose2D::new(
            self.pending.x * scale,
            self.pending.y * scale,
            clamp_abs(self.pending.theta, self.config.max_rotation_step_rad),
        );

        self.pending = Pose2D::new(
            self.pending.x - step.x,
            self.pending.y - step.y,
            self.pending.theta - step.theta,
        );
        self.applied_total = Pose2D::new(
            self.applied_total.x + step.x,
            self.applied_total.y + step.y,
            self.applied_total.theta + step.theta,
        );
        Some(step)
    }

    pub fn pending(&self) -> Pose2D {
        self.pending
    }

    /// Forget everything, after a relocalization.
    pub fn reset(&mut self) {
        self.pending = Pose2D::identity();
        self.marks.clear();
    }
}
