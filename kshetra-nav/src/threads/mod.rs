//! Thread layout of the navigation stack.
//!
//! - `control`: fixed-rate fusion, executor and motor output
//! - `graph`: pose-graph optimization, map writes, persistence
//! - `planner`: coverage planning on demand
//!
//! Threads talk through bounded `crossbeam_channel`s and publish immutable
//! snapshots through [`SnapshotCell`](crate::state::SnapshotCell).

pub mod background;
pub mod control;
pub mod planner;

pub use background::{BackgroundConfig, BackgroundLinks, BackgroundState, BackgroundWorker};
pub use control::{ControlCommand, ControlLinks, ControlLoop, MonotonicClock, MotorSink, NullMotors};
pub use planner::{PlannerWorker, plan_request};

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::algorithms::coverage::CoveragePlanner;
use crate::algorithms::mapping::MapManager;
use crate::config::KshetraConfig;
use crate::engine::graph::{GraphBackend, TrajectorySnapshot};
use crate::error::{NavError, Result};
use crate::io::ResumeStore;
use crate::navigation::{NavEvent, NavigationExecutor};
use crate::sensors::{FusionEstimator, SensorSample};
use crate::state::{SharedState, SnapshotCell};

/// Everything the threads start from.
pub struct NavigationParts<M: MotorSink> {
    pub config: KshetraConfig,
    pub fusion: FusionEstimator,
    pub executor: NavigationExecutor,
    pub backend: GraphBackend,
    pub map: Arc<MapManager>,
    pub motors: M,
}

/// Handles of a running stack.
pub struct NavigationThreads {
    pub shared: Arc<SharedState>,
    pub clock: MonotonicClock,
    pub samples: Sender<SensorSample>,
    pub commands: Sender<ControlCommand>,
    pub events: Receiver<NavEvent>,
    pub trajectory: Arc<SnapshotCell<TrajectorySnapshot>>,
    pub map: Arc<MapManager>,
    control: JoinHandle<()>,
    background: BackgroundWorker,
    planner: PlannerWorker,
}

/// Spawn the control, graph and planner threads.
pub fn spawn_threads<M: MotorSink + 'static>(parts: NavigationParts<M>) -> Result<NavigationThreads> {
    let NavigationParts {
        config,
        fusion,
        executor,
        backend,
        map,
        motors,
    } = parts;
    let capacity = config.threads.channel_capacity.max(1);

    let shared = Arc::new(SharedState::new(fusion.estimate().pose));
    let trajectory = Arc::new(SnapshotCell::new(backend.snapshot()));
    let clock = MonotonicClock::new();

    let (samples_tx, samples_rx) = bounded(capacity);
    let (commands_tx, commands_rx) = bounded(16);
    let (events_tx, events_rx) = bounded(capacity);
    // One plan in flight at a time
    let (plan_tx, plan_rx) = bounded(1);
    let (outcome_tx, outcome_rx) = bounded(1);
    let (graph_tx, graph_rx) = bounded(capacity);
    let (map_tx, map_rx) = bounded(capacity);
    let (resume_tx, resume_rx) = bounded(capacity);

    let planner = PlannerWorker::spawn(
        CoveragePlanner::new(config.coverage.clone(), config.robot.working_width),
        Duration::from_millis(config.threads.planning_budget_ms),
        Arc::clone(&shared),
        plan_rx,
        outcome_tx,
    )?;

    let background = BackgroundWorker::spawn(
        BackgroundState::new(
            BackgroundConfig {
                optimization_budget: Duration::from_millis(config.threads.optimization_budget_ms),
                map_save_interval: Duration::from_millis(config.threads.map_save_interval_ms),
                map_file: config.paths.map_file.clone(),
                graph_file: config.paths.graph_file.clone(),
            },
            backend,
            Arc::clone(&map),
            ResumeStore::new(config.paths.resume_file.clone()),
            Arc::clone(&trajectory),
            Arc::clone(&shared),
        ),
        BackgroundLinks {
            graph: graph_rx,
            map: map_rx,
            resume: resume_rx,
        },
    )?;

    let mut control = ControlLoop::new(
        Duration::from_millis(config.threads.control_period_ms),
        &config.graph,
        fusion,
        executor,
        motors,
        Arc::clone(&shared),
        Arc::clone(&map),
        Arc::clone(&trajectory),
        ControlLinks {
            samples: samples_rx,
            commands: commands_rx,
            plan_requests: plan_tx,
            plan_outcomes: outcome_rx,
            graph: graph_tx,
            map: map_tx,
            resume: resume_tx,
            events: events_tx,
        },
    )
    .with_drop_report_interval(Duration::from_millis(config.threads.drop_report_interval_ms));
    let control = thread::Builder::new()
        .name("control".into())
        .spawn(move || control.run(clock))
        .map_err(|e| NavError::Io(std::io::Error::other(format!("spawn control thread: {}", e))))?;

    log::info!("Navigation threads started");
    Ok(NavigationThreads {
        shared,
        clock,
        samples: samples_tx,
        commands: commands_tx,
        events: events_rx,
        trajectory,
        map,
        control,
        background,
        planner,
    })
}

impl NavigationThreads {
    /// Signal shutdown and wait for every thread.
    pub fn shutdown(self) -> Result<()> {
        self.shared.signal_shutdown();
        let mut failed = Vec::new();
        if self.control.join().is_err() {
            failed.push("control");
        }
        if self.planner.join().is_err() {
            failed.push("planner");
        }
        if self.background.join().is_err() {
            failed.push("graph");
        }
        if failed.is_empty() {
            log::info!("Navigation threads stopped");
            Ok(())
        } else {
            Err(NavError::Io(std::io::Error::other(format!(
                "threads panicked: {}",
                failed.join(", ")
            ))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::{ExecutorState, Zone, ZoneSet};
    use crate::core::geometry::Polygon;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_stack_starts_plans_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = KshetraConfig::default();
        config.paths.map_file = dir.path().join("lawn.ksmp");
        config.paths.graph_file = dir.path().join("pose_graph.json");
        config.paths.resume_file = dir.path().join("resume.json");
        config.map.width_m = 10.0;
        config.map.height_m = 10.0;

        let parts = NavigationParts {
            fusion: FusionEstimator::new(config.fusion.clone()),
            executor: NavigationExecutor::new(config.executor.clone(), config.avoidance.clone()),
            backend: GraphBackend::new(config.graph.clone()),
            map: Arc::new(MapManager::new(config.map.clone())),
            motors: NullMotors,
            config,
        };
        let threads = spawn_threads(parts).unwrap();

        let zones = ZoneSet::new(vec![Zone::new(1, "front", Polygon::rectangle(1.0, -1.0, 3.0, 1.0))]);
        threads.commands.send(ControlCommand::Start(zones)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while threads.shared.executor_state() != ExecutorState::Mowing && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(threads.shared.executor_state(), ExecutorState::Mowing);
        assert!(threads.shared.tick_count.load(Ordering::Relaxed) > 0);

        threads.shutdown().unwrap();
        assert!(dir.path().join("lawn.ksmp").exists());
    }
}
