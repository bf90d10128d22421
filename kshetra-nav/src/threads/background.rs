//! Background thread for slow work: pose graph, map writes and persistence.
//!
//! ```text
//!   graph_rx ───► GraphBackend ──optimize (budgeted)──► SnapshotCell<TrajectorySnapshot>
//!   map_rx ─────► MapManager::integrate ──periodic──► map file
//!   resume_rx ──► ResumeStore
//! ```
//!
//! The control loop only ever `try_send`s into these channels; every disk
//! write happens here.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::algorithms::mapping::{Detection, MapManager};
use crate::engine::graph::{GraphBackend, GraphMessage, TrajectorySnapshot};
use crate::error::{NavError, Result};
use crate::io::ResumeStore;
use crate::navigation::ResumeUpdate;
use crate::state::{SharedState, SnapshotCell};

/// Timing and file locations for the background worker.
#[derive(Debug, Clone)]
pub struct BackgroundConfig {
    pub optimization_budget: Duration,
    pub map_save_interval: Duration,
    pub map_file: PathBuf,
    pub graph_file: PathBuf,
}

/// Receiving ends of the control loop's work channels.
pub struct BackgroundLinks {
    pub graph: Receiver<GraphMessage>,
    pub map: Receiver<Vec<Detection>>,
    pub resume: Receiver<ResumeUpdate>,
}

/// State owned by the background thread.
pub struct BackgroundState {
    config: BackgroundConfig,
    backend: GraphBackend,
    map: Arc<MapManager>,
    resume: ResumeStore,
    trajectory: Arc<SnapshotCell<TrajectorySnapshot>>,
    shared: Arc<SharedState>,
    last_map_save: Instant,
    saved_map_version: u64,
}

impl BackgroundState {
    pub fn new(
        config: BackgroundConfig,
        backend: GraphBackend,
        map: Arc<MapManager>,
        resume: ResumeStore,
        trajectory: Arc<SnapshotCell<TrajectorySnapshot>>,
        shared: Arc<SharedState>,
    ) -> Self {
        let saved_map_version = map.snapshot().version();
        Self {
            config,
            backend,
            map,
            resume,
            trajectory,
            shared,
            last_map_save: Instant::now(),
            saved_map_version,
        }
    }

    pub fn backend(&self) -> &GraphBackend {
        &self.backend
    }

    pub fn on_graph(&mut self, msg: GraphMessage) {
        if let Err(e) = self.backend.handle(msg) {
            log::warn!("Graph update rejected: {}", e);
        }
    }

    pub fn on_detections(&mut self, detections: &[Detection]) {
        self.map.integrate(detections);
    }

    pub fn on_resume(&mut self, update: &ResumeUpdate) {
        if let Err(e) = self.resume.apply(update) {
            log::error!("Failed to persist resume state: {}", e);
        }
    }

    /// Optimize when due and save the map on its interval.
    pub fn maintain(&mut self, now: Instant) {
        if self.backend.optimization_due(now) && !self.shared.is_emergency_stop() {
            let flag = self.shared.emergency_flag();
            let result = self
                .backend
                .optimize(Some(now + self.config.optimization_budget), &flag);
            if result.applied {
                self.trajectory.store(self.backend.snapshot());
            }
        }

        if now.duration_since(self.last_map_save) >= self.config.map_save_interval {
            self.save_map();
            self.last_map_save = now;
        }
    }

    /// Final writes before the thread exits.
    pub fn shutdown(&mut self) {
        self.save_map();
        if self.backend.graph().num_nodes() > 0 {
            match self.backend.save(&self.config.graph_file) {
                Ok(()) => log::info!(
                    "Saved pose graph ({} nodes) to {}",
                    self.backend.graph().num_nodes(),
                    self.config.graph_file.display()
                ),
                Err(e) => log::error!("Failed to save pose graph: {}", e),
            }
        }
    }

    fn save_map(&mut self) {
        let version = self.map.snapshot().version();
        if version == self.saved_map_version {
            return;
        }
        match self.map.save(&self.config.map_file) {
            Ok(()) => self.saved_map_version = version,
            Err(e) => log::error!("Failed to save map: {}", e),
        }
    }
}

/// Background thread handle.
pub struct BackgroundWorker {
    handle: JoinHandle<()>,
}

impl BackgroundWorker {
    pub fn spawn(state: BackgroundState, links: BackgroundLinks) -> Result<Self> {
        let handle = thread::Builder::new()
            .name("graph".into())
            .spawn(move || run_background(state, links))
            .map_err(|e| NavError::Io(std::io::Error::other(format!("spawn graph thread: {}", e))))?;
        Ok(Self { handle })
    }

    /// Wait for thread to finish.
    pub fn join(self) -> thread::Result<()> {
        self.handle.join()
    }
}

fn run_background(mut state: BackgroundState, links: BackgroundLinks) {
    log::info!("Graph thread started");

    while state.shared.is_running() {
        crossbeam_channel::select! {
            recv(links.graph) -> msg => match msg {
                Ok(msg) => state.on_graph(msg),
                Err(_) => break,
            },
            recv(links.map) -> msg => match msg {
                Ok(detections) => state.on_detections(&detections),
                Err(_) => break,
            },
            recv(links.resume) -> msg => match msg {
                Ok(update) => state.on_resume(&update),
                Err(_) => break,
            },
            default(Duration::from_millis(20)) => {}
        }
        state.maintain(Instant::now());
    }

    // Progress queued before shutdown still reaches disk
    for update in links.resume.try_iter() {
        state.on_resume(&update);
    }
    state.shutdown();
    log::info!("Graph thread shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::mapping::OccupancyGridConfig;
    use crate::core::types::{Covariance2D, Point2D, Pose, Pose2D};
    use crate::engine::graph::{GraphBackendConfig, PoseGraph};
    use crate::navigation::ResumeState;
    use tempfile::tempdir;

    fn state(dir: &std::path::Path) -> BackgroundState {
        let map = Arc::new(MapManager::new(OccupancyGridConfig {
            width_m: 10.0,
            height_m: 10.0,
            ..Default::default()
        }));
        BackgroundState::new(
            BackgroundConfig {
                optimization_budget: Duration::from_millis(200),
                map_save_interval: Duration::from_millis(0),
                map_file: dir.join("lawn.ksmp"),
                graph_file: dir.join("graph.json"),
            },
            GraphBackend::new(GraphBackendConfig {
                optimize_every_n_nodes: 3,
                ..Default::default()
            }),
            map,
            ResumeStore::new(dir.join("resume.json")),
            Arc::new(SnapshotCell::default()),
            Arc::new(SharedState::default()),
        )
    }

    fn node(x: f32, t: u64) -> GraphMessage {
        GraphMessage::Node {
            pose: Pose::at_rest(Pose2D::new(x, 0.0, 0.0), t, Covariance2D::diagonal(0.01, 0.01, 0.001)),
            odometry: Pose2D::new(0.5, 0.0, 0.0),
            fix: None,
        }
    }

    #[test]
    fn test_optimization_publishes_snapshot() {
        let dir = tempdir().unwrap();
        let mut state = state(dir.path());
        for i in 0..4 {
            state.on_graph(node(i as f32 * 0.5, i * 100_000));
        }
        state.maintain(Instant::now());

        let snapshot = state.trajectory.load();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.poses.len(), 4);
    }

    #[test]
    fn test_emergency_stop_skips_optimization() {
        let dir = tempdir().unwrap();
        let mut state = state(dir.path());
        for i in 0..4 {
            state.on_graph(node(i as f32 * 0.5, i * 100_000));
        }
        state.shared.trigger_emergency_stop();
        state.maintain(Instant::now());
        assert_eq!(state.trajectory.load().version, 0);
    }

    #[test]
    fn test_map_saved_only_when_changed() {
        let dir = tempdir().unwrap();
        let mut state = state(dir.path());
        state.maintain(Instant::now());
        assert!(!dir.path().join("lawn.ksmp").exists());

        state.on_detections(&[Detection::RangeHit {
            origin: Point2D::new(0.0, 0.0),
            hit: Point2D::new(1.0, 0.0),
            confidence: 0.9,
        }]);
        state.maintain(Instant::now());
        assert!(dir.path().join("lawn.ksmp").exists());
    }

    #[test]
    fn test_worker_persists_on_shutdown() {
        let dir = tempdir().unwrap();
        let state = state(dir.path());
        let shared = Arc::clone(&state.shared);
        let (graph_tx, graph_rx) = crossbeam_channel::bounded(8);
        let (_map_tx, map_rx) = crossbeam_channel::bounded(8);
        let (resume_tx, resume_rx) = crossbeam_channel::bounded(8);
        let worker = BackgroundWorker::spawn(
            state,
            BackgroundLinks {
                graph: graph_rx,
                map: map_rx,
                resume: resume_rx,
            },
        )
        .unwrap();

        graph_tx.send(node(0.0, 0)).unwrap();
        graph_tx.send(node(0.5, 100_000)).unwrap();
        let saved = ResumeState {
            zone_id: 2,
            waypoint_index: 5,
            pose: Pose2D::new(1.0, 2.0, 0.0),
            path_checksum: 42,
            completed_zones: vec![1],
            saved_at_us: 0,
        };
        resume_tx.send(ResumeUpdate::Save(saved.clone())).unwrap();
        // Let the worker take the queued nodes before stopping it
        std::thread::sleep(Duration::from_millis(200));
        shared.signal_shutdown();
        worker.join().unwrap();

        assert_eq!(ResumeStore::new(dir.path().join("resume.json")).load(), Some(saved));
        let graph = PoseGraph::load(&dir.path().join("graph.json")).unwrap();
        assert_eq!(graph.num_nodes(), 2);
    }
}
