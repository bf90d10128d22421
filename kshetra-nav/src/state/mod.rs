//! State shared between threads.
//!
//! - [`SharedState`]: lock-free flags and the latest pose for status readers
//! - [`SnapshotCell`]: single-assignment publication of immutable snapshots

mod shared;
mod snapshot;

pub use shared::{AtomicF32, AtomicPose, SharedState};
pub use snapshot::SnapshotCell;
