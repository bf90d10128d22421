//! Fixed-rate control loop.
//!
//! Each tick:
//!
//! ```text
//!   commands ─► executor
//!   samples ──► FusionEstimator ──► CorrectionMerger step
//!                    │                      ▲
//!                    │              SnapshotCell<TrajectorySnapshot>
//!                    ├─ keyframe ──try_send──► graph thread
//!                    ├─ range hits ─try_send─► graph thread (map)
//!                    ▼
//!   NavigationExecutor::tick ──► MotorSink
//!                    ├─ plan request ─try_send─► planner thread
//!                    └─ resume update ─try_send─► graph thread
//! ```
//!
//! Nothing in here blocks or touches the disk.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError};

use crate::algorithms::coverage::Obstacle;
use crate::algorithms::mapping::{Detection, MapManager};
use crate::core::math::angle_diff;
use crate::core::types::{Pose, Pose2D, Twist2D};
use crate::engine::graph::{CorrectionMerger, GraphBackendConfig, GraphMessage, TrajectorySnapshot};
use crate::navigation::{
    NavEvent, NavigationExecutor, PlanOutcome, PlanRequest, ReadingWindow, ResumeUpdate, TickInput,
    TickOutput, ZoneSet,
};
use crate::sensors::{FusionEstimator, FusionEvent, RangeReading, SensorKind, SensorPayload, SensorSample};
use crate::state::{SharedState, SnapshotCell};

/// Wheel and blade outputs.
pub trait MotorSink: Send {
    fn send(&mut self, velocity: Twist2D, blade: bool);
}

/// Motor sink that drops every command.
#[derive(Debug, Default)]
pub struct NullMotors;

impl MotorSink for NullMotors {
    fn send(&mut self, _velocity: Twist2D, _blade: bool) {}
}

/// Operator requests handled at the start of a tick.
#[derive(Debug, Clone)]
pub enum ControlCommand {
    Start(ZoneSet),
    ReturnHome,
    Replan,
    SetObstacles(Vec<Obstacle>),
    HardwareFault(String),
    /// Clears the emergency stop and leaves the Error state
    Reset,
}

/// Microsecond clock shared by sensor drivers and the control loop.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    pub fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel ends owned by the control loop.
pub struct ControlLinks {
    pub samples: Receiver<SensorSample>,
    pub commands: Receiver<ControlCommand>,
    pub plan_requests: Sender<PlanRequest>,
    pub plan_outcomes: Receiver<PlanOutcome>,
    pub graph: Sender<GraphMessage>,
    pub map: Sender<Vec<Detection>>,
    pub resume: Sender<ResumeUpdate>,
    pub events: Sender<NavEvent>,
}

pub struct ControlLoop<M: MotorSink> {
    period: Duration,
    fusion: FusionEstimator,
    merger: CorrectionMerger,
    executor: NavigationExecutor,
    motors: M,
    shared: Arc<SharedState>,
    map: Arc<MapManager>,
    trajectory: Arc<SnapshotCell<TrajectorySnapshot>>,
    links: ControlLinks,
    node_distance_m: f32,
    node_rotation_rad: f32,
    last_node: Option<Pose2D>,
    /// Odometry of keyframes the graph channel refused
    carried_odometry: Pose2D,
    merged_version: u64,
    /// Latest reading per range sensor, for avoidance
    readings: ReadingWindow,
    /// Readings received this tick, for the map
    fresh_readings: Vec<RangeReading>,
    range_confidence: f32,
    /// Drops per sensor since the last report
    pending_drops: [u64; SensorKind::ALL.len()],
    drop_report_interval_us: u64,
    last_drop_report_us: u64,
    estopped: bool,
}

impl<M: MotorSink> ControlLoop<M> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        period: Duration,
        graph: &GraphBackendConfig,
        fusion: FusionEstimator,
        executor: NavigationExecutor,
        motors: M,
        shared: Arc<SharedState>,
        map: Arc<MapManager>,
        trajectory: Arc<SnapshotCell<TrajectorySnapshot>>,
        links: ControlLinks,
    ) -> Self {
        let merged_version = trajectory.load().version;
        Self {
            period,
            fusion,
            merger: CorrectionMerger::new(graph.correction.clone()),
            executor,
            motors,
            shared,
            map,
            trajectory,
            links,
            node_distance_m: graph.node_distance_m,
            node_rotation_rad: graph.node_rotation_rad,
            last_node: None,
            carried_odometry: Pose2D::identity(),
            merged_version,
            readings: ReadingWindow::new(),
            fresh_readings: Vec::new(),
            range_confidence: 1.0,
            pending_drops: [0; SensorKind::ALL.len()],
            drop_report_interval_us: 5_000_000,
            last_drop_report_us: 0,
            estopped: false,
        }
    }

    /// How often per-sensor drop counts are published as events.
    pub fn with_drop_report_interval(mut self, interval: Duration) -> Self {
        self.drop_report_interval_us = interval.as_micros() as u64;
        self
    }

    pub fn executor(&self) -> &NavigationExecutor {
        &self.executor
    }

    pub fn fusion(&self) -> &FusionEstimator {
        &self.fusion
    }

    pub fn motors(&self) -> &M {
        &self.motors
    }

    /// Run at the configured period until shutdown.
    pub fn run(&mut self, clock: MonotonicClock) {
        log::info!("Control loop started ({}ms period)", self.period.as_millis());
        let mut overruns = 0u64;

        while self.shared.is_running() {
            let started = Instant::now();
            self.step(clock.now_us());

            let elapsed = started.elapsed();
            if elapsed < self.period {
                std::thread::sleep(self.period - elapsed);
            } else {
                overruns += 1;
                if overruns.is_power_of_two() {
                    log::warn!("Control tick took {:?} (> {:?}), {} overruns", elapsed, self.period, overruns);
                }
            }
        }

        self.motors.send(Twist2D::zero(), false);
        log::info!("Control loop shutting down");
    }

    /// One control tick at `now_us`.
    pub fn step(&mut self, now_us: u64) -> TickOutput {
        self.handle_commands();

        if self.shared.is_emergency_stop() {
            return self.hold_emergency();
        }

        self.ingest_samples();
        self.fusion.tick(now_us);
        self.apply_graph_correction();

        let pose = self.fusion.estimate();
        let health = self.fusion.health();
        if health.is_localized() {
            self.send_keyframe(&pose);
            self.send_detections(&pose);
        }

        for outcome in self.links.plan_outcomes.try_iter() {
            self.executor.on_plan(outcome);
        }

        let map = self.map.snapshot();
        let battery = self.shared.battery_percent.load(Ordering::Relaxed);
        let max_age_ms = self.executor.avoidance().config().reading_max_age_ms;
        self.readings.refresh(now_us, max_age_ms);
        let out = self.executor.tick(&TickInput {
            now_us,
            pose,
            health,
            battery_percent: battery,
            readings: self.readings.current(),
            map: &map,
        });

        // Emergency stop raised while the tick ran wins over its output
        if self.shared.is_emergency_stop() {
            return self.hold_emergency();
        }
        self.motors.send(out.velocity, out.blade);

        if let Some(request) = out.plan_request.clone() {
            let request_id = request.request_id;
            if let Err(e) = self.links.plan_requests.try_send(request) {
                log::warn!("Planner busy, plan request {} not sent: {}", request_id, e);
                self.executor.plan_request_rejected(request_id);
            }
        }
        if let Some(update) = out.resume.clone()
            && self.links.resume.try_send(update).is_err()
        {
            log::warn!("Resume update dropped, graph thread busy");
        }

        let mut events = out.events.clone();
        events.extend(self.fusion.drain_events().into_iter().filter_map(sensor_event));
        if now_us.saturating_sub(self.last_drop_report_us) >= self.drop_report_interval_us {
            self.last_drop_report_us = now_us;
            events.extend(self.take_drop_report());
        }
        self.publish_events(events);

        self.shared.set_pose(pose.pose);
        self.shared.position_sigma.store(pose.position_sigma(), Ordering::Relaxed);
        self.shared.set_executor_state(out.state);
        self.shared.tick_count.fetch_add(1, Ordering::Relaxed);
        self.fresh_readings.clear();
        out
    }

    fn handle_commands(&mut self) {
        for command in self.links.commands.try_iter() {
            log::debug!("Control command: {:?}", command);
            match command {
                ControlCommand::Start(zones) => {
                    self.executor.start(&zones);
                }
                ControlCommand::ReturnHome => {
                    self.executor.return_home();
                }
                ControlCommand::Replan => self.executor.request_replan(),
                ControlCommand::SetObstacles(obstacles) => self.executor.set_obstacles(obstacles),
                ControlCommand::HardwareFault(reason) => self.executor.report_hardware_fault(&reason),
                ControlCommand::Reset => {
                    self.shared.clear_emergency_stop();
                    self.estopped = false;
                    self.executor.operator_reset();
                }
            }
        }
    }

    fn hold_emergency(&mut self) -> TickOutput {
        self.motors.send(Twist2D::zero(), false);
        let out = if self.estopped {
            TickOutput::stopped(self.executor.state())
        } else {
            self.estopped = true;
            self.executor.emergency_stop()
        };
        self.publish_events(out.events.clone());
        self.shared.set_executor_state(out.state);
        // Samples keep arriving; drop them so the queue does not back up
        for _ in self.links.samples.try_iter() {}
        self.fresh_readings.clear();
        out
    }

    fn ingest_samples(&mut self) {
        while let Ok(sample) = self.links.samples.try_recv() {
            if let SensorPayload::Range(reading) = sample.payload {
                self.readings.insert(reading, sample.timestamp_us);
                self.fresh_readings.retain(|r| r.sensor_id != reading.sensor_id);
                self.fresh_readings.push(reading);
                self.range_confidence = sample.confidence;
            }
            if let Err(fault) = self.fusion.ingest(&sample) {
                log::debug!("{}", fault);
                self.pending_drops[fault.sensor.index()] += 1;
            }
        }
    }

    fn apply_graph_correction(&mut self) {
        let snapshot = self.trajectory.load();
        if snapshot.version > self.merged_version {
            self.merged_version = snapshot.version;
            if let Some(correction) = &snapshot.latest_correction {
                self.merger.merge(correction);
            }
        }
        if let Some(step) = self.merger.step() {
            self.fusion.apply_correction(step);
        }
    }

    fn send_keyframe(&mut self, pose: &Pose) {
        let due = self.last_node.is_none_or(|last| {
            last.position().distance(&pose.pose.position()) >= self.node_distance_m
                || angle_diff(pose.pose.theta, last.theta).abs() >= self.node_rotation_rad
        });
        if !due {
            return;
        }

        let delta = self.fusion.take_odometry_delta();
        let odometry = self.carried_odometry.compose(&delta);
        let msg = GraphMessage::Node {
            pose: *pose,
            odometry,
            fix: self.fusion.take_accepted_fix(),
        };
        match self.links.graph.try_send(msg) {
            Ok(()) => {
                self.carried_odometry = Pose2D::identity();
                self.last_node = Some(pose.pose);
                self.merger.on_node_inserted(pose.timestamp_us);
            }
            Err(TrySendError::Full(GraphMessage::Node { odometry, .. })) => {
                log::warn!("Graph queue full, keyframe deferred");
                self.carried_odometry = odometry;
            }
            Err(e) => {
                log::debug!("Graph thread gone: {}", e);
                self.carried_odometry = Pose2D::identity();
            }
        }
    }

    fn send_detections(&mut self, pose: &Pose) {
        if self.fresh_readings.is_empty() {
            return;
        }
        let detections = self
            .executor
            .avoidance()
            .detections(&pose.pose, &self.fresh_readings, self.range_confidence);
        if !detections.is_empty() && self.links.map.try_send(detections).is_err() {
            log::debug!("Map queue full, detections dropped");
        }
    }

    fn take_drop_report(&mut self) -> Vec<NavEvent> {
        SensorKind::ALL
            .iter()
            .filter_map(|&sensor| {
                let count = std::mem::take(&mut self.pending_drops[sensor.index()]);
                (count > 0).then_some(NavEvent::SamplesDropped { sensor, count })
            })
            .collect()
    }

    fn publish_events(&self, events: Vec<NavEvent>) {
        for event in events {
            log::info!("Event: {}", event.name());
            if self.links.events.try_send(event).is_err() {
                log::debug!("Event queue full");
            }
        }
    }
}

/// Estimator events the operator layer hears about directly. Localization
/// transitions reach it through the executor instead.
fn sensor_event(event: FusionEvent) -> Option<NavEvent> {
    match event {
        FusionEvent::SensorDegraded(sensor) => Some(NavEvent::SensorDegraded { sensor }),
        FusionEvent::SensorRecovered(sensor) => Some(NavEvent::SensorRecovered { sensor }),
        FusionEvent::LocalizationLost { .. }
        | FusionEvent::LocalizationRecovered
        | FusionEvent::LocalizationFailed => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::mapping::OccupancyGridConfig;
    use crate::core::geometry::Polygon;
    use crate::engine::graph::PoseCorrection;
    use crate::navigation::{AvoidanceConfig, ExecutorConfig, ExecutorState, Zone};
    use crate::sensors::FusionConfig;
    use crossbeam_channel::bounded;

    #[derive(Default)]
    struct RecordingMotors {
        sent: Vec<(Twist2D, bool)>,
    }

    impl MotorSink for RecordingMotors {
        fn send(&mut self, velocity: Twist2D, blade: bool) {
            self.sent.push((velocity, blade));
        }
    }

    struct Harness {
        control: ControlLoop<RecordingMotors>,
        samples: Sender<SensorSample>,
        commands: Sender<ControlCommand>,
        plan_rx: Receiver<PlanRequest>,
        graph_rx: Receiver<GraphMessage>,
        map_rx: Receiver<Vec<Detection>>,
        events_rx: Receiver<NavEvent>,
        shared: Arc<SharedState>,
        trajectory: Arc<SnapshotCell<TrajectorySnapshot>>,
        _keep: (Sender<PlanOutcome>, Receiver<ResumeUpdate>),
    }

    fn harness(graph_capacity: usize) -> Harness {
        let (samples_tx, samples_rx) = bounded(64);
        let (cmd_tx, cmd_rx) = bounded(8);
        let (plan_tx, plan_rx) = bounded(1);
        let (outcome_tx, outcome_rx) = bounded(1);
        let (graph_tx, graph_rx) = bounded(graph_capacity);
        let (map_tx, map_rx) = bounded(8);
        let (resume_tx, resume_rx) = bounded(8);
        let (events_tx, events_rx) = bounded(64);
        let shared = Arc::new(SharedState::default());
        let trajectory = Arc::new(SnapshotCell::default());
        let map = Arc::new(MapManager::new(OccupancyGridConfig {
            width_m: 20.0,
            height_m: 20.0,
            ..Default::default()
        }));
        let control = ControlLoop::new(
            Duration::from_millis(50),
            &GraphBackendConfig::default(),
            FusionEstimator::new(FusionConfig::default()),
            NavigationExecutor::new(ExecutorConfig::default(), AvoidanceConfig::default()),
            RecordingMotors::default(),
            Arc::clone(&shared),
            map,
            Arc::clone(&trajectory),
            ControlLinks {
                samples: samples_rx,
                commands: cmd_rx,
                plan_requests: plan_tx,
                plan_outcomes: outcome_rx,
                graph: graph_tx,
                map: map_tx,
                resume: resume_tx,
                events: events_tx,
            },
        );
        Harness {
            control,
            samples: samples_tx,
            commands: cmd_tx,
            plan_rx,
            graph_rx,
            map_rx,
            events_rx,
            shared,
            trajectory,
            _keep: (outcome_tx, resume_rx),
        }
    }

    fn zones() -> ZoneSet {
        ZoneSet::new(vec![Zone::new(1, "front", Polygon::rectangle(0.0, 0.0, 4.0, 3.0))])
    }

    #[test]
    fn test_first_tick_sends_keyframe_and_updates_shared() {
        let mut h = harness(8);
        h.control.step(50_000);
        assert!(matches!(h.graph_rx.try_recv(), Ok(GraphMessage::Node { .. })));
        assert_eq!(h.shared.tick_count.load(Ordering::Relaxed), 1);
        assert_eq!(h.shared.executor_state(), ExecutorState::Idle);

        // No motion, no second keyframe
        h.control.step(100_000);
        assert!(h.graph_rx.try_recv().is_err());
    }

    #[test]
    fn test_keyframe_after_travel() {
        let mut h = harness(8);
        h.control.step(0);
        let _ = h.graph_rx.try_recv();

        for i in 1..=12u64 {
            h.samples.send(SensorSample::odometry(i * 50_000, 0.05, 0.05)).unwrap();
            h.control.step(i * 50_000);
        }
        match h.graph_rx.try_recv() {
            Ok(GraphMessage::Node { odometry, .. }) => assert!(odometry.x >= 0.45),
            other => panic!("expected keyframe, got {:?}", other),
        }
    }

    #[test]
    fn test_full_graph_queue_carries_odometry() {
        let mut h = harness(1);
        h.control.step(0);
        // Queue now holds the first node; the next keyframe is refused
        for i in 1..=12u64 {
            h.samples.send(SensorSample::odometry(i * 50_000, 0.05, 0.05)).unwrap();
            h.control.step(i * 50_000);
        }
        let _ = h.graph_rx.try_recv();
        h.control.step(13 * 50_000);
        match h.graph_rx.try_recv() {
            Ok(GraphMessage::Node { odometry, .. }) => assert!(odometry.x >= 0.55),
            other => panic!("expected keyframe, got {:?}", other),
        }
    }

    #[test]
    fn test_start_command_requests_plan() {
        let mut h = harness(8);
        h.commands.send(ControlCommand::Start(zones())).unwrap();
        let out = h.control.step(50_000);
        assert_eq!(out.state, ExecutorState::Planning);
        let request = h.plan_rx.try_recv().unwrap();
        assert_eq!(request.zone.id, 1);
    }

    #[test]
    fn test_rejected_plan_request_is_reissued() {
        let mut h = harness(8);
        h.commands.send(ControlCommand::Start(zones())).unwrap();
        h.control.step(50_000);

        // Leave the first request queued so the next one finds the channel full
        h.commands.send(ControlCommand::HardwareFault("bumper".into())).unwrap();
        h.commands.send(ControlCommand::Reset).unwrap();
        h.commands.send(ControlCommand::Start(zones())).unwrap();
        h.control.step(100_000);
        assert_eq!(h.plan_rx.try_recv().unwrap().request_id, 1);

        h.control.step(150_000);
        let retry = h.plan_rx.try_recv().unwrap();
        assert_eq!(retry.request_id, 3);
        assert_eq!(h.control.executor().state(), ExecutorState::Planning);
    }

    #[test]
    fn test_emergency_stop_zeroes_motors_and_latches() {
        let mut h = harness(8);
        h.commands.send(ControlCommand::Start(zones())).unwrap();
        h.control.step(50_000);

        h.shared.trigger_emergency_stop();
        let out = h.control.step(100_000);
        assert_eq!(out.state, ExecutorState::Error);
        let (velocity, blade) = *h.control.motors().sent.last().unwrap();
        assert_eq!(velocity, Twist2D::zero());
        assert!(!blade);
        assert!(h.events_rx.try_iter().any(|e| e == NavEvent::EmergencyStop));

        h.control.step(150_000);
        assert_eq!(h.shared.executor_state(), ExecutorState::Error);

        h.commands.send(ControlCommand::Reset).unwrap();
        let out = h.control.step(200_000);
        assert_eq!(out.state, ExecutorState::Idle);
        assert!(!h.shared.is_emergency_stop());
    }

    #[test]
    fn test_range_hits_reach_map_channel() {
        let mut h = harness(8);
        h.samples.send(SensorSample::range(10_000, 0, 1.2)).unwrap();
        h.control.step(50_000);
        let detections = h.map_rx.try_recv().unwrap();
        assert!(matches!(detections[0], Detection::RangeHit { .. }));
    }

    #[test]
    fn test_dropped_samples_reported_periodically() {
        let mut h = harness(8);
        h.control = h.control.with_drop_report_interval(Duration::from_millis(200));
        h.samples.send(SensorSample::odometry(100_000, 0.0, 0.0)).unwrap();
        h.samples.send(SensorSample::odometry(90_000, 0.0, 0.0)).unwrap();
        h.samples.send(SensorSample::odometry(80_000, 0.0, 0.0)).unwrap();
        h.control.step(100_000);
        assert!(!h.events_rx.try_iter().any(|e| e.name() == "samples-dropped"));

        h.control.step(250_000);
        let reports: Vec<_> = h
            .events_rx
            .try_iter()
            .filter(|e| matches!(e, NavEvent::SamplesDropped { .. }))
            .collect();
        assert_eq!(
            reports,
            vec![NavEvent::SamplesDropped {
                sensor: SensorKind::Odometry,
                count: 2
            }]
        );

        // Counts restart after a report
        h.control.step(500_000);
        assert!(!h.events_rx.try_iter().any(|e| e.name() == "samples-dropped"));
    }

    #[test]
    fn test_held_reading_is_mapped_once() {
        let mut h = harness(8);
        h.samples.send(SensorSample::range(40_000, 0, 1.2)).unwrap();
        h.control.step(50_000);
        assert!(h.map_rx.try_recv().is_ok());

        // Still held for avoidance, but the map already has it
        h.control.step(100_000);
        assert!(h.map_rx.try_recv().is_err());
    }

    #[test]
    fn test_graph_correction_applied_gradually() {
        let mut h = harness(8);
        h.control.step(0);
        let node_ts = match h.graph_rx.try_recv() {
            Ok(GraphMessage::Node { pose, .. }) => pose.timestamp_us,
            other => panic!("expected keyframe, got {:?}", other),
        };

        h.trajectory.store(TrajectorySnapshot {
            version: 1,
            poses: Vec::new(),
            latest_correction: Some(PoseCorrection {
                node_id: 0,
                timestamp_us: node_ts,
                original: Pose2D::identity(),
                optimized: Pose2D::new(0.2, 0.0, 0.0),
            }),
        });
        h.control.step(50_000);
        let x1 = h.control.fusion().estimate().pose.x;
        assert!(x1 > 0.0 && x1 < 0.2);

        for i in 2..10u64 {
            h.control.step(i * 50_000);
        }
        assert!((h.control.fusion().estimate().pose.x - 0.2).abs() < 1e-3);
    }
}
