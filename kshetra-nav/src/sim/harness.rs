//! Synchronous closed-loop simulation.
//!
//! Runs the real [`ControlLoop`] against the [`Simulator`] on one thread.
//! The planner and the background work are serviced between ticks, so a
//! run is reproducible for a fixed seed.
//!
//! ```text
//!   Simulator ──samples──► ControlLoop ──(v, ω, blade)──► Simulator
//!                              │ plan request     ▲ plan outcome
//!                              └──► planner ──────┘   (next tick)
//!                              │ keyframes / detections / resume
//!                              └──► BackgroundState
//! ```

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded};
use serde::Serialize;

use super::world::{SimConfig, Simulator};
use crate::algorithms::coverage::CoveragePlanner;
use crate::algorithms::mapping::{Detection, MapManager};
use crate::config::KshetraConfig;
use crate::core::types::{Pose2D, Twist2D};
use crate::engine::graph::{GraphBackend, GraphMessage, TrajectorySnapshot};
use crate::io::ResumeStore;
use crate::navigation::{
    ExecutorState, NavEvent, NavigationExecutor, PlanOutcome, PlanRequest, ResumeState,
    ResumeUpdate, TickOutput,
};
use crate::sensors::{FusionEstimator, SensorSample};
use crate::state::{SharedState, SnapshotCell};
use crate::threads::{
    BackgroundConfig, BackgroundState, ControlCommand, ControlLinks, ControlLoop, MotorSink,
    plan_request,
};

/// Latest command, read back by the harness.
#[derive(Debug, Default)]
pub struct SimMotors {
    pub velocity: Twist2D,
    pub blade: bool,
}

impl MotorSink for SimMotors {
    fn send(&mut self, velocity: Twist2D, blade: bool) {
        self.velocity = velocity;
        self.blade = blade;
    }
}

/// Summary of a run.
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub ticks: u64,
    pub sim_time_s: f32,
    pub final_state: ExecutorState,
    pub distance_m: f32,
    pub mowed_m: f32,
    pub collisions: u64,
    pub battery_percent: f32,
    /// Distance between the fused and the true final position
    pub position_error_m: f32,
    pub completed_zones: Vec<u32>,
    pub events: Vec<NavEvent>,
}

pub struct SimHarness {
    sim: Simulator,
    control: ControlLoop<SimMotors>,
    background: BackgroundState,
    planner: CoveragePlanner,
    planning_budget: Duration,
    shared: Arc<SharedState>,
    samples: Sender<SensorSample>,
    commands: Sender<ControlCommand>,
    plan_rx: Receiver<PlanRequest>,
    outcome_tx: Sender<PlanOutcome>,
    graph_rx: Receiver<GraphMessage>,
    map_rx: Receiver<Vec<Detection>>,
    resume_rx: Receiver<ResumeUpdate>,
    events_rx: Receiver<NavEvent>,
    period_s: f32,
    ticks: u64,
    events: Vec<NavEvent>,
}

impl SimHarness {
    /// Build a harness. Files go where `config.paths` points.
    pub fn new(config: &KshetraConfig, sim: SimConfig) -> Self {
        let resume_store = ResumeStore::new(config.paths.resume_file.clone());
        Self::with_resume(config, sim, resume_store.load())
    }

    /// Build a harness that continues from `resume`.
    pub fn with_resume(config: &KshetraConfig, sim_config: SimConfig, resume: Option<ResumeState>) -> Self {
        let capacity = config.threads.channel_capacity.max(1);
        let sim = Simulator::new(sim_config, config.avoidance.sensors.clone());

        let shared = Arc::new(SharedState::new(sim.pose()));
        shared.battery_percent.store(sim.battery(), Ordering::Relaxed);
        let map = Arc::new(MapManager::new(config.map.clone()));
        let backend = GraphBackend::new(config.graph.clone());
        let trajectory = Arc::new(SnapshotCell::new(TrajectorySnapshot::default()));

        let (samples_tx, samples_rx) = bounded(capacity);
        let (commands_tx, commands_rx) = bounded(16);
        let (plan_tx, plan_rx) = bounded(1);
        let (outcome_tx, outcome_rx) = bounded(1);
        let (graph_tx, graph_rx) = bounded(capacity);
        let (map_tx, map_rx) = bounded(capacity);
        let (resume_tx, resume_rx) = bounded(capacity);
        let (events_tx, events_rx) = bounded(capacity);

        let fusion = FusionEstimator::with_pose(config.fusion.clone(), sim.pose());
        let executor = NavigationExecutor::new(config.executor.clone(), config.avoidance.clone()).with_resume(resume);

        let control = ControlLoop::new(
            Duration::from_millis(config.threads.control_period_ms),
            &config.graph,
            fusion,
            executor,
            SimMotors::default(),
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
        let background = BackgroundState::new(
            BackgroundConfig {
                optimization_budget: Duration::from_millis(config.threads.optimization_budget_ms),
                map_save_interval: Duration::from_millis(config.threads.map_save_interval_ms),
                map_file: config.paths.map_file.clone(),
                graph_file: config.paths.graph_file.clone(),
            },
            backend,
            map,
            ResumeStore::new(config.paths.resume_file.clone()),
            trajectory,
            Arc::clone(&shared),
        );

        Self {
            sim,
            control,
            background,
            planner: CoveragePlanner::new(config.coverage.clone(), config.robot.working_width),
            planning_budget: Duration::from_millis(config.threads.planning_budget_ms),
            shared,
            samples: samples_tx,
            commands: commands_tx,
            plan_rx,
            outcome_tx,
            graph_rx,
            map_rx,
            resume_rx,
            events_rx,
            period_s: config.threads.control_period_ms as f32 / 1000.0,
            ticks: 0,
            events: Vec::new(),
        }
    }

    pub fn simulator(&self) -> &Simulator {
        &self.sim
    }

    pub fn simulator_mut(&mut self) -> &mut Simulator {
        &mut self.sim
    }

    pub fn control(&self) -> &ControlLoop<SimMotors> {
        &self.control
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn state(&self) -> ExecutorState {
        self.control.executor().state()
    }

    pub fn events(&self) -> &[NavEvent] {
        &self.events
    }

    /// Queue a command for the next tick.
    pub fn command(&self, command: ControlCommand) {
        if self.commands.try_send(command).is_err() {
            log::warn!("Simulation command queue full");
        }
    }

    /// One control period.
    pub fn step(&mut self) -> TickOutput {
        let motors = self.control.motors();
        let (velocity, blade) = (motors.velocity, motors.blade);
        for sample in self.sim.step(self.period_s, velocity, blade) {
            if self.samples.try_send(sample).is_err() {
                log::warn!("Sample queue full, dropping sample");
            }
        }
        self.shared.battery_percent.store(self.sim.battery(), Ordering::Relaxed);

        let out = self.control.step(self.sim.now_us());
        self.ticks += 1;

        if let Ok(request) = self.plan_rx.try_recv() {
            let outcome = plan_request(&self.planner, &request, self.planning_budget, &self.shared);
            if self.outcome_tx.try_send(outcome).is_err() {
                log::warn!("Plan outcome dropped");
            }
        }

        for msg in self.graph_rx.try_iter() {
            self.background.on_graph(msg);
        }
        for detections in self.map_rx.try_iter() {
            self.background.on_detections(&detections);
        }
        for update in self.resume_rx.try_iter() {
            self.background.on_resume(&update);
        }
        self.background.maintain(Instant::now());

        self.events.extend(self.events_rx.try_iter());
        out
    }

    /// Step until `done` holds or `max_time_s` of simulated time passed.
    /// Returns whether `done` was reached.
    pub fn run_until(&mut self, max_time_s: f32, mut done: impl FnMut(&SimHarness) -> bool) -> bool {
        let max_ticks = (max_time_s / self.period_s).ceil() as u64;
        for _ in 0..max_ticks {
            self.step();
            if done(self) {
                return true;
            }
        }
        false
    }

    /// Flush persistence and summarize the run.
    pub fn finish(mut self) -> SimReport {
        for update in self.resume_rx.try_iter() {
            self.background.on_resume(&update);
        }
        self.background.shutdown();

        let truth = self.sim.pose();
        let fused: Pose2D = self.control.fusion().estimate().pose;
        SimReport {
            ticks: self.ticks,
            sim_time_s: self.sim.now_us() as f32 / 1e6,
            final_state: self.state(),
            distance_m: self.sim.distance_m(),
            mowed_m: self.sim.mowed_m(),
            collisions: self.sim.collisions(),
            battery_percent: self.sim.battery(),
            position_error_m: truth.position().distance(&fused.position()),
            completed_zones: self.control.executor().completed_zones().to_vec(),
            events: self.events,
        }
    }
}
