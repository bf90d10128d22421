//! Lock-free state shared by the control, graph and planner threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};

use crate::core::types::Pose2D;
use crate::navigation::ExecutorState;

/// Atomic wrapper for f32 values.
/// Uses AtomicU32 with bit reinterpretation.
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(val: f32) -> Self {
        Self(AtomicU32::new(val.to_bits()))
    }

    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.0.load(order))
    }

    pub fn store(&self, val: f32, order: Ordering) {
        self.0.store(val.to_bits(), order);
    }
}

/// Pose packed into atomics: x and y as millimetres in one u64, heading as
/// the f32 bit pattern.
///
/// A reader racing a writer may pair a new position with the previous
/// heading; status readers tolerate that.
#[derive(Debug)]
pub struct AtomicPose {
    xy: AtomicU64,
    theta: AtomicF32,
}

impl AtomicPose {
    pub fn new(pose: Pose2D) -> Self {
        Self {
            xy: AtomicU64::new(pack_xy(&pose)),
            theta: AtomicF32::new(pose.theta),
        }
    }

    pub fn load(&self, order: Ordering) -> Pose2D {
        let xy = self.xy.load(order);
        let x_mm = (xy >> 32) as i32;
        let y_mm = xy as i32;
        Pose2D::new(
            x_mm as f32 / 1000.0,
            y_mm as f32 / 1000.0,
            self.theta.load(order),
        )
    }

    pub fn store(&self, pose: Pose2D, order: Ordering) {
        self.xy.store(pack_xy(&pose), order);
        self.theta.store(pose.theta, order);
    }
}

fn pack_xy(pose: &Pose2D) -> u64 {
    let x_mm = (pose.x * 1000.0).round() as i32;
    let y_mm = (pose.y * 1000.0).round() as i32;
    ((x_mm as u32 as u64) << 32) | (y_mm as u32 as u64)
}

/// Flags and status shared between all threads.
#[derive(Debug)]
pub struct SharedState {
    /// Latest fused pose (written by the control loop)
    pose: AtomicPose,
    /// Position σ of the latest pose
    pub position_sigma: AtomicF32,
    executor_state: AtomicU8,
    emergency_stop: Arc<AtomicBool>,
    running: AtomicBool,
    /// Control ticks executed
    pub tick_count: AtomicU64,
    /// Battery percentage last reported
    pub battery_percent: AtomicF32,
}

impl SharedState {
    pub fn new(initial_pose: Pose2D) -> Self {
        Self {
            pose: AtomicPose::new(initial_pose),
            position_sigma: AtomicF32::new(0.0),
            executor_state: AtomicU8::new(ExecutorState::Idle as u8),
            emergency_stop: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(true),
            tick_count: AtomicU64::new(0),
            battery_percent: AtomicF32::new(100.0),
        }
    }

    pub fn pose(&self) -> Pose2D {
        self.pose.load(Ordering::Acquire)
    }

    pub fn set_pose(&self, pose: Pose2D) {
        self.pose.store(pose, Ordering::Release);
    }

    pub fn executor_state(&self) -> ExecutorState {
        ExecutorState::from_u8(self.executor_state.load(Ordering::Acquire)).unwrap_or(ExecutorState::Error)
    }

    pub fn set_executor_state(&self, state: ExecutorState) {
        self.executor_state.store(state as u8, Ordering::Release);
    }

    /// Latch the emergency stop. Every thread polls it.
    pub fn trigger_emergency_stop(&self) {
        self.emergency_stop.store(true, Ordering::Release);
    }

    /// The emergency flag itself, for workers that poll it as a cancel token.
    pub fn emergency_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.emergency_stop)
    }

    pub fn is_emergency_stop(&self) -> bool {
        self.emergency_stop.load(Ordering::Acquire)
    }

    /// Cleared by the operator reset.
    pub fn clear_emergency_stop(&self) {
        self.emergency_stop.store(false, Ordering::Release);
    }

    pub fn signal_shutdown(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new(Pose2D::identity())
    }
}
