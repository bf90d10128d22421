//! Mission execution state machine.
//!
//! ```text
//!   Idle ─start─► Planning ─plan─► Mowing ◄──► Avoiding
//!                   ▲   │plan-failed │ zone-complete / low battery
//!                   │   └─► next     ▼
//!                Charging ◄─ Docking ◄─ Returning
//!
//!   any ── collision / lost localization / hardware fault / e-stop ──► Error
//!   Error ── operator_reset ──► Idle
//! ```
//!
//! The executor never blocks: plans are requested through
//! [`TickOutput::plan_request`] and delivered later with
//! [`NavigationExecutor::on_plan`]. Progress leaves through
//! [`TickOutput::resume`] for the caller to persist.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::avoidance::{
    ActivePath, AvoidanceConfig, AvoidanceController, AvoidanceDecision, AvoidanceState, LocalPath,
};
use super::docking::{DockingConfig, DockingController, DockingPhase};
use super::path::{Path, SpeedClass, Waypoint};
use super::pursuit::{PurePursuit, PursuitConfig, drive_to};
use super::state::{ExecutorState, NavEvent, ResumeState};
use super::zone::{Zone, ZoneSet};
use crate::algorithms::coverage::{CoveragePattern, Obstacle, mapped_obstacles};
use crate::algorithms::mapping::MapView;
use crate::core::types::{Point2D, Pose, Pose2D, Twist2D};
use crate::error::{NavError, PlanningFailure};
use crate::sensors::{FusionHealth, RangeReading};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Battery percentage that sends the robot home.
    pub low_battery: f32,
    /// Battery percentage at which mowing resumes after charging.
    pub resume_battery: f32,
    /// Persist progress every this many reached waypoints.
    pub resume_every_waypoints: usize,
    /// Drive back to the dock once every zone is done.
    pub return_when_done: bool,
    pub pursuit: PursuitConfig,
    pub docking: DockingConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            low_battery: 20.0,
            resume_battery: 95.0,
            resume_every_waypoints: 20,
            return_when_done: true,
            pursuit: PursuitConfig::default(),
            docking: DockingConfig::default(),
        }
    }
}

/// Plan needed for a zone.
#[derive(Debug, Clone)]
pub struct PlanRequest {
    pub request_id: u64,
    pub zone: Zone,
    /// Known obstacles, occupied map cells and restricted overlaps with
    /// higher-priority zones.
    pub obstacles: Vec<Obstacle>,
}

/// Completed planning attempt.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub request_id: u64,
    pub zone_id: u32,
    pub result: Result<Path, PlanningFailure>,
}

/// Change to the persisted resume state.
#[derive(Debug, Clone, PartialEq)]
pub enum ResumeUpdate {
    Save(ResumeState),
    /// Every zone is done; nothing left to resume.
    Clear,
}

/// Inputs for one control tick.
#[derive(Debug, Clone, Copy)]
pub struct TickInput<'a> {
    pub now_us: u64,
    pub pose: Pose,
    pub health: FusionHealth,
    pub battery_percent: f32,
    pub readings: &'a [RangeReading],
    pub map: &'a MapView,
}

#[derive(Debug, Clone)]
pub struct TickOutput {
    pub velocity: Twist2D,
    pub blade: bool,
    pub plan_request: Option<PlanRequest>,
    pub resume: Option<ResumeUpdate>,
    pub events: Vec<NavEvent>,
    pub state: ExecutorState,
}

impl TickOutput {
    pub fn stopped(state: ExecutorState) -> Self {
        Self {
            velocity: Twist2D::zero(),
            blade: false,
            plan_request: None,
            resume: None,
            events: Vec::new(),
            state,
        }
    }
}

/// Whether two obstacle sets differ in membership, kind or shape.
/// Confidence updates alone keep the current plan.
fn obstacles_changed(old: &[Obstacle], new: &[Obstacle]) -> bool {
    old.len() != new.len()
        || new.iter().any(|n| {
            old.iter()
                .find(|o| o.id == n.id)
                .is_none_or(|o| o.kind != n.kind || o.shape != n.shape)
        })
}

#[derive(Debug, Clone)]
struct QueuedZone {
    zone: Zone,
    restricted: Vec<Obstacle>,
}

/// What the loaded path leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Zone,
    Home,
}

#[derive(Debug, Clone)]
struct Detour {
    points: Vec<Point2D>,
    next: usize,
    rejoin_index: usize,
}

impl From<LocalPath> for Detour {
    fn from(local: LocalPath) -> Self {
        Self {
            points: local.waypoints,
            next: 0,
            rejoin_index: local.rejoin_index,
        }
    }
}

pub struct NavigationExecutor {
    config: ExecutorConfig,
    state: ExecutorState,
    queue: VecDeque<QueuedZone>,
    current: Option<QueuedZone>,
    completed: Vec<u32>,
    obstacles: Vec<Obstacle>,
    path: Option<Path>,
    route: Route,
    detour: Option<Detour>,
    pursuit: PurePursuit,
    avoidance: AvoidanceController,
    docking: DockingController,
    /// Latest progress snapshot, applied when the zone is planned again
    resume: Option<ResumeState>,
    next_request_id: u64,
    outstanding_request: Option<u64>,
    request_needed: bool,
    localization_hold: bool,
    resume_after_charge: bool,
    undocking: bool,
    last_saved_index: usize,
    last_pose: Pose2D,
    last_now_us: u64,
    error_reason: Option<String>,
    events: Vec<NavEvent>,
    resume_update: Option<ResumeUpdate>,
}

impl NavigationExecutor {
    pub fn new(config: ExecutorConfig, avoidance: AvoidanceConfig) -> Self {
        let pursuit = PurePursuit::new(config.pursuit.clone());
        let docking = DockingController::new(config.docking.clone());
        Self {
            config,
            state: ExecutorState::Idle,
            queue: VecDeque::new(),
            current: None,
            completed: Vec::new(),
            obstacles: Vec::new(),
            path: None,
            route: Route::Zone,
            detour: None,
            pursuit,
            avoidance: AvoidanceController::new(avoidance),
            docking,
            resume: None,
            next_request_id: 1,
            outstanding_request: None,
            request_needed: false,
            localization_hold: false,
            resume_after_charge: false,
            undocking: false,
            last_saved_index: 0,
            last_pose: Pose2D::identity(),
            last_now_us: 0,
            error_reason: None,
            events: Vec::new(),
            resume_update: None,
        }
    }

    /// Resume state loaded from disk, used by the next [`start`](Self::start).
    pub fn with_resume(mut self, resume: Option<ResumeState>) -> Self {
        self.resume = resume;
        self
    }

    pub fn state(&self) -> ExecutorState {
        self.state
    }

    pub fn avoidance_state(&self) -> AvoidanceState {
        self.avoidance.state()
    }

    pub fn avoidance(&self) -> &AvoidanceController {
        &self.avoidance
    }

    pub fn error_reason(&self) -> Option<&str> {
        self.error_reason.as_deref()
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.path.as_ref().filter(|_| self.route == Route::Zone)
    }

    pub fn completed_zones(&self) -> &[u32] {
        &self.completed
    }

    /// Active zone id, next waypoint index and waypoint count.
    pub fn progress(&self) -> Option<(u32, usize, usize)> {
        let zone = self.current.as_ref()?;
        let len = self.current_path().map_or(0, Path::len);
        Some((zone.zone.id, self.progress_index(), len))
    }

    /// Perception obstacles for subsequent plans. A material change while
    /// mowing replaces the active path.
    pub fn set_obstacles(&mut self, obstacles: Vec<Obstacle>) {
        let changed = obstacles_changed(&self.obstacles, &obstacles);
        self.obstacles = obstacles;
        if changed && matches!(self.state, ExecutorState::Mowing | ExecutorState::Avoiding) {
            log::info!("Obstacle set changed, replanning");
            self.request_replan();
        }
    }

    /// Queue the active zones and begin with the highest priority one.
    ///
    /// A stored resume state puts its zone first and skips zones it lists as
    /// completed. Refused unless idle or charging.
    pub fn start(&mut self, zones: &ZoneSet) -> bool {
        if !matches!(self.state, ExecutorState::Idle | ExecutorState::Charging) {
            log::warn!("Start ignored in state {}", self.state.as_str());
            return false;
        }

        self.completed = self
            .resume
            .as_ref()
            .map(|r| r.completed_zones.clone())
            .unwrap_or_default();
        let mut queue: VecDeque<QueuedZone> = zones
            .execution_order()
            .into_iter()
            .filter(|z| !self.completed.contains(&z.id))
            .map(|z| QueuedZone {
                zone: z.clone(),
                restricted: zones.restricted_overlaps(z),
            })
            .collect();
        if let Some(resume) = &self.resume
            && let Some(pos) = queue.iter().position(|q| q.zone.id == resume.zone_id)
            && let Some(resumed) = queue.remove(pos)
        {
            log::info!("Resuming zone {} at waypoint {}", resume.zone_id, resume.waypoint_index);
            queue.push_front(resumed);
        }

        log::info!("Starting mission over {} zones", queue.len());
        self.queue = queue;
        self.current = None;
        self.resume_after_charge = false;
        self.undocking = self.state == ExecutorState::Charging;
        self.advance_zone();
        true
    }

    /// Drop the current path and plan the zone again from the current
    /// progress (obstacles or zone changed).
    pub fn request_replan(&mut self) {
        if !matches!(self.state, ExecutorState::Mowing | ExecutorState::Avoiding) || self.route != Route::Zone {
            return;
        }
        self.resume = self.snapshot();
        self.path = None;
        self.detour = None;
        self.avoidance.reset();
        self.enter_planning();
    }

    /// Operator request to go back to the dock; progress is kept for the
    /// next start.
    pub fn return_home(&mut self) -> bool {
        if !matches!(
            self.state,
            ExecutorState::Idle | ExecutorState::Planning | ExecutorState::Mowing | ExecutorState::Avoiding
        ) {
            return false;
        }
        let pose = self.last_pose;
        self.begin_return(&pose, false);
        true
    }

    /// Stop now. The returned output carries zero velocity and must be sent
    /// to the motors immediately.
    pub fn emergency_stop(&mut self) -> TickOutput {
        log::error!("Emergency stop");
        self.events.push(NavEvent::EmergencyStop);
        self.fail("emergency stop".into());
        let mut out = TickOutput::stopped(self.state);
        self.flush(&mut out);
        out
    }

    pub fn report_hardware_fault(&mut self, reason: &str) {
        log::error!("Hardware fault: {}", reason);
        self.fail(format!("hardware fault: {}", reason));
    }

    /// Leave the Error state. Queued zones are dropped; the last progress
    /// snapshot is kept for the next start.
    pub fn operator_reset(&mut self) -> bool {
        if self.state != ExecutorState::Error {
            return false;
        }
        log::info!("Operator reset (was: {})", self.error_reason.as_deref().unwrap_or("unknown"));
        self.error_reason = None;
        self.queue.clear();
        self.current = None;
        self.path = None;
        self.route = Route::Zone;
        self.detour = None;
        self.outstanding_request = None;
        self.request_needed = false;
        self.localization_hold = false;
        self.undocking = false;
        self.avoidance.reset();
        self.set_state(ExecutorState::Idle);
        true
    }

    /// Deliver a finished plan. Results for anything but the outstanding
    /// request are dropped.
    pub fn on_plan(&mut self, outcome: PlanOutcome) {
        if self.state != ExecutorState::Planning || self.outstanding_request != Some(outcome.request_id) {
            log::debug!("Dropping stale plan {} for zone {}", outcome.request_id, outcome.zone_id);
            return;
        }
        self.outstanding_request = None;

        match outcome.result {
            Ok(path) => self.begin_zone(path),
            Err(failure) => {
                let err = NavError::planning(outcome.zone_id.to_string(), failure.clone());
                log::warn!("{}", err);
                self.events.push(NavEvent::PlanFailed {
                    zone_id: outcome.zone_id,
                    reason: failure.to_string(),
                });
                self.advance_zone();
            }
        }
    }

    /// The request never reached the planner; it is issued again on the
    /// next planning tick.
    pub fn plan_request_rejected(&mut self, request_id: u64) {
        if self.outstanding_request == Some(request_id) {
            self.outstanding_request = None;
            self.request_needed = true;
        }
    }

    /// One control step.
    pub fn tick(&mut self, input: &TickInput) -> TickOutput {
        let pose = input.pose.pose;
        self.last_pose = pose;
        self.last_now_us = input.now_us;
        let mut out = TickOutput::stopped(self.state);

        if self.state != ExecutorState::Error && self.check_localization(input) {
            if self.undocking {
                if let Some(twist) = self.docking.undock_step(&pose) {
                    if self.state == ExecutorState::Planning {
                        self.tick_planning(input, &mut out);
                    }
                    out.velocity = twist;
                    self.flush(&mut out);
                    return out;
                }
                self.undocking = false;
            }

            match self.state {
                ExecutorState::Idle | ExecutorState::Error => {}
                ExecutorState::Planning => self.tick_planning(input, &mut out),
                ExecutorState::Mowing | ExecutorState::Avoiding | ExecutorState::Returning => {
                    self.tick_driving(input, &mut out)
                }
                ExecutorState::Docking => self.tick_docking(input, &mut out),
                ExecutorState::Charging => self.tick_charging(input),
            }
        }

        self.flush(&mut out);
        out
    }

    /// Returns false when motion must be held this tick.
    fn check_localization(&mut self, input: &TickInput) -> bool {
        match input.health {
            FusionHealth::Lost => {
                let sigma = input.pose.position_sigma();
                log::error!("Localization lost (σ {:.2}m)", sigma);
                self.fail(format!("localization lost (sigma {:.2}m)", sigma));
                false
            }
            FusionHealth::Diverged { .. } => {
                if !self.localization_hold {
                    let sigma = input.pose.position_sigma();
                    log::warn!("Localization diverged (σ {:.2}m), holding position", sigma);
                    self.localization_hold = true;
                    self.events.push(NavEvent::LocalizationLost { sigma_m: sigma });
                    if let Some(snapshot) = self.snapshot() {
                        self.resume_update = Some(ResumeUpdate::Save(snapshot));
                    }
                }
                !self.state.is_driving() && !self.undocking
            }
            FusionHealth::Nominal | FusionHealth::Degraded => {
                if self.localization_hold {
                    log::info!("Localization recovered, continuing");
                    self.localization_hold = false;
                    self.events.push(NavEvent::LocalizationRecovered);
                }
                true
            }
        }
    }

    fn tick_planning(&mut self, input: &TickInput, out: &mut TickOutput) {
        if input.battery_percent < self.config.low_battery {
            self.low_battery(input);
            return;
        }
        if !self.request_needed {
            return;
        }
        let Some(current) = &self.current else {
            return;
        };

        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let mut obstacles = self.obstacles.clone();
        obstacles.extend(mapped_obstacles(input.map, &current.zone, self.avoidance.config().safety_margin));
        obstacles.extend(current.restricted.iter().cloned());
        log::info!("Requesting plan {} for zone {}", request_id, current.zone.id);
        out.plan_request = Some(PlanRequest {
            request_id,
            zone: current.zone.clone(),
            obstacles,
        });
        self.outstanding_request = Some(request_id);
        self.request_needed = false;
    }

    fn tick_driving(&mut self, input: &TickInput, out: &mut TickOutput) {
        let pose = input.pose.pose;
        if self.route == Route::Zone && input.battery_percent < self.config.low_battery {
            self.low_battery(input);
            return;
        }
        let Some(path) = self.path.as_ref() else {
            self.fail("driving without a path".into());
            return;
        };

        let was_clear = self.avoidance.state() == AvoidanceState::Clear;
        let decision = {
            let index = self.detour.as_ref().map_or(self.pursuit.index(), |d| d.rejoin_index);
            let mut active = ActivePath::new(path, index);
            active.detour = self.detour.as_ref().map(|d| &d.points[d.next..]);
            self.avoidance
                .evaluate(&pose, input.readings, &active, input.map, input.now_us)
        };
        if was_clear && self.avoidance.state() != AvoidanceState::Clear {
            let nearest = input
                .readings
                .iter()
                .map(|r| r.distance_m)
                .fold(f32::INFINITY, f32::min);
            self.events.push(NavEvent::ObstacleDetected { distance_m: nearest });
        }

        let speed_scale = match decision {
            AvoidanceDecision::Stop {
                collision_imminent: true,
            } => {
                let nearest = input
                    .readings
                    .iter()
                    .map(|r| r.distance_m)
                    .fold(f32::INFINITY, f32::min);
                let err = NavError::CollisionImminent { distance_m: nearest };
                log::error!("{}", err);
                self.fail(err.to_string());
                return;
            }
            AvoidanceDecision::Stop { .. } => {
                if self.route == Route::Zone {
                    self.set_state(ExecutorState::Avoiding);
                }
                if self.avoidance.exhausted() {
                    self.abandon_blocked_route();
                }
                return;
            }
            AvoidanceDecision::Deviate(local) => {
                self.detour = Some(Detour::from(local));
                if self.route == Route::Zone {
                    self.set_state(ExecutorState::Avoiding);
                }
                self.avoidance.config().caution_speed_scale
            }
            AvoidanceDecision::Continue { speed_scale } => speed_scale,
        };

        self.follow(&pose, speed_scale, out);
    }

    fn follow(&mut self, pose: &Pose2D, speed_scale: f32, out: &mut TickOutput) {
        let here = pose.position();
        let pursuit_config = self.pursuit.config().clone();

        if let Some(detour) = &mut self.detour {
            while detour.next < detour.points.len()
                && detour.points[detour.next].distance(&here) < pursuit_config.arrival_tolerance_m
            {
                detour.next += 1;
            }
            if let Some(target) = detour.points.get(detour.next) {
                let speed = pursuit_config.transit_speed * pursuit_config.max_linear_vel * speed_scale;
                out.velocity = drive_to(pose, target, speed, &pursuit_config);
                out.blade = false;
                return;
            }
            log::debug!("Detour finished, rejoining at waypoint {}", detour.rejoin_index);
            self.pursuit.set_index(detour.rejoin_index);
            self.detour = None;
        }
        if self.state == ExecutorState::Avoiding {
            self.set_state(ExecutorState::Mowing);
        }

        let Some(path) = self.path.as_ref() else {
            return;
        };
        let mowing_speed = self.current.as_ref().map_or(0.5, |q| q.zone.mowing_speed);
        let cmd = self.pursuit.command(pose, path, mowing_speed);

        out.velocity = Twist2D::new(cmd.twist.linear * speed_scale, cmd.twist.angular * speed_scale);
        out.blade = cmd.blade && self.route == Route::Zone;

        if cmd.complete {
            out.velocity = Twist2D::zero();
            out.blade = false;
            match self.route {
                Route::Zone => self.finish_zone(),
                Route::Home => {
                    log::info!("At corridor entry, docking");
                    self.docking.reset();
                    self.set_state(ExecutorState::Docking);
                }
            }
        } else if self.route == Route::Zone
            && cmd.target_index >= self.last_saved_index + self.config.resume_every_waypoints
        {
            self.last_saved_index = cmd.target_index;
            if let Some(snapshot) = self.snapshot() {
                self.resume_update = Some(ResumeUpdate::Save(snapshot));
            }
        }
    }

    fn tick_docking(&mut self, input: &TickInput, out: &mut TickOutput) {
        let twist = self.docking.step(&input.pose.pose, self.pursuit.config());
        match self.docking.phase() {
            DockingPhase::Docked => {
                self.events.push(NavEvent::Docked);
                self.path = None;
                self.set_state(ExecutorState::Charging);
            }
            DockingPhase::Failed => self.fail("docking failed".into()),
            _ => out.velocity = twist,
        }
    }

    fn tick_charging(&mut self, input: &TickInput) {
        if input.battery_percent < self.config.resume_battery {
            return;
        }
        if !self.resume_after_charge {
            if !self.queue.is_empty() || self.current.is_some() {
                return;
            }
            self.set_state(ExecutorState::Idle);
            return;
        }

        log::info!("Charged to {:.0}%, resuming", input.battery_percent);
        self.events.push(NavEvent::ChargingComplete);
        self.resume_after_charge = false;
        self.undocking = true;
        if self.current.is_some() {
            self.enter_planning();
        } else {
            self.advance_zone();
        }
    }

    fn low_battery(&mut self, input: &TickInput) {
        log::warn!("Battery at {:.0}%, returning to dock", input.battery_percent);
        self.events.push(NavEvent::LowBattery {
            percent: input.battery_percent,
        });
        let pose = input.pose.pose;
        self.begin_return(&pose, true);
    }

    /// Persist progress and head for the corridor entry.
    fn begin_return(&mut self, pose: &Pose2D, resume_after_charge: bool) {
        if let Some(snapshot) = self.snapshot() {
            self.resume_update = Some(ResumeUpdate::Save(snapshot.clone()));
            self.resume = Some(snapshot);
        }
        self.resume_after_charge = resume_after_charge;
        self.outstanding_request = None;
        self.request_needed = false;

        let target = self.docking.target();
        let home = Path::new(
            0,
            CoveragePattern::Parallel,
            vec![
                Waypoint::new(pose.position(), pose.theta, SpeedClass::Transit, false),
                Waypoint::new(target.entry(), target.dock_pose.theta, SpeedClass::Transit, false),
            ],
        );
        self.path = Some(home);
        self.route = Route::Home;
        self.detour = None;
        self.pursuit.set_index(0);
        self.avoidance.reset();
        self.set_state(ExecutorState::Returning);
    }

    fn begin_zone(&mut self, path: Path) {
        let Some(current) = &self.current else {
            return;
        };
        let zone_id = current.zone.id;
        let mut index = 0;

        if let Some(resume) = self.resume.take_if(|r| r.zone_id == zone_id) {
            index = if resume.path_checksum == path.checksum {
                resume.waypoint_index.min(path.len())
            } else if resume.waypoint_index == 0 {
                0
            } else {
                path.nearest_index(&resume.pose.position()).unwrap_or(0)
            };
            log::info!(
                "Zone {}: resuming at waypoint {} ({})",
                zone_id,
                index,
                if resume.path_checksum == path.checksum {
                    "same path"
                } else {
                    "nearest waypoint"
                }
            );
        }

        self.events.push(NavEvent::ZoneStarted {
            zone_id,
            waypoints: path.len(),
        });
        // Blade-off transit back to the start of the interrupted leg
        self.detour = index
            .checked_sub(1)
            .and_then(|i| path.get(i))
            .map(|wp| Detour {
                points: vec![wp.position],
                next: 0,
                rejoin_index: index,
            });
        self.pursuit.set_index(index);
        self.last_saved_index = index;
        self.path = Some(path);
        self.route = Route::Zone;
        self.avoidance.reset();
        self.set_state(ExecutorState::Mowing);
    }

    fn finish_zone(&mut self) {
        let Some(done) = self.current.take() else {
            return;
        };
        log::info!("Zone {} complete", done.zone.id);
        self.completed.push(done.zone.id);
        self.events.push(NavEvent::ZoneComplete { zone_id: done.zone.id });
        self.resume_update = Some(ResumeUpdate::Save(ResumeState {
            zone_id: done.zone.id,
            waypoint_index: self.path.as_ref().map_or(0, Path::len),
            pose: self.last_pose,
            path_checksum: self.path.as_ref().map_or(0, |p| p.checksum),
            completed_zones: self.completed.clone(),
            saved_at_us: self.last_now_us,
        }));
        self.path = None;
        self.detour = None;
        self.advance_zone();
    }

    /// Detour attempts used up: give up on the zone, or on the way home.
    fn abandon_blocked_route(&mut self) {
        match self.route {
            Route::Zone => {
                let Some(skipped) = self.current.take() else {
                    return;
                };
                log::warn!("Zone {} blocked, skipping", skipped.zone.id);
                self.events.push(NavEvent::ZoneSkipped {
                    zone_id: skipped.zone.id,
                    reason: "blockage could not be bypassed".into(),
                });
                self.path = None;
                self.detour = None;
                self.avoidance.reset();
                self.advance_zone();
            }
            Route::Home => self.fail("route to dock blocked".into()),
        }
    }

    fn advance_zone(&mut self) {
        match self.queue.pop_front() {
            Some(next) => {
                self.current = Some(next);
                self.enter_planning();
            }
            None => {
                log::info!("All zones complete");
                self.current = None;
                self.events.push(NavEvent::AllZonesComplete);
                self.resume = None;
                self.resume_update = Some(ResumeUpdate::Clear);
                self.completed.clear();
                if self.config.return_when_done && self.state != ExecutorState::Charging {
                    let pose = self.last_pose;
                    self.begin_return(&pose, false);
                } else if self.state != ExecutorState::Charging {
                    self.set_state(ExecutorState::Idle);
                }
            }
        }
    }

    fn enter_planning(&mut self) {
        self.request_needed = true;
        self.outstanding_request = None;
        self.set_state(ExecutorState::Planning);
    }

    fn fail(&mut self, reason: String) {
        if self.state == ExecutorState::Error {
            return;
        }
        if let Some(snapshot) = self.snapshot() {
            self.resume_update = Some(ResumeUpdate::Save(snapshot.clone()));
            self.resume = Some(snapshot);
        }
        self.events.push(NavEvent::Fault { reason: reason.clone() });
        self.error_reason = Some(reason);
        self.outstanding_request = None;
        self.undocking = false;
        self.set_state(ExecutorState::Error);
    }

    fn progress_index(&self) -> usize {
        self.detour
            .as_ref()
            .map_or(self.pursuit.index(), |d| d.rejoin_index)
    }

    /// Progress within the current zone.
    fn snapshot(&self) -> Option<ResumeState> {
        if self.route != Route::Zone {
            return self.resume.clone();
        }
        let zone = &self.current.as_ref()?.zone;
        let (waypoint_index, path_checksum) = match &self.path {
            Some(path) => (self.progress_index(), path.checksum),
            None => match &self.resume {
                Some(r) if r.zone_id == zone.id => (r.waypoint_index, r.path_checksum),
                _ => (0, 0),
            },
        };
        Some(ResumeState {
            zone_id: zone.id,
            waypoint_index,
            pose: self.last_pose,
            path_checksum,
            completed_zones: self.completed.clone(),
            saved_at_us: self.last_now_us,
        })
    }

    fn set_state(&mut self, state: ExecutorState) {
        if self.state != state {
            log::info!("Executor: {} -> {}", self.state.as_str(), state.as_str());
            self.state = state;
        }
    }

    fn flush(&mut self, out: &mut TickOutput) {
        out.events.append(&mut self.events);
        if let Some(update) = self.resume_update.take() {
            out.resume = Some(update);
        }
        out.state = self.state;
        if !self.state.is_driving() && !self.undocking {
            out.velocity = Twist2D::zero();
            out.blade = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::coverage::{CoverageConfig, CoveragePlanner, MAP_OBSTACLE_ID_BASE, ObstacleKind};
    use crate::core::geometry::Polygon;
    use crate::algorithms::mapping::{Detection, MapManager, OccupancyGridConfig};
    use crate::core::types::Covariance2D;
    use std::sync::Arc;

    fn map() -> Arc<MapView> {
        MapManager::new(OccupancyGridConfig {
            width_m: 20.0,
            height_m: 20.0,
            ..Default::default()
        })
        .snapshot()
    }

    fn zones() -> ZoneSet {
        ZoneSet::new(vec![
            Zone {
                priority: 1,
                ..Zone::new(1, "back", Polygon::rectangle(0.0, 0.0, 4.0, 4.0))
            },
            Zone {
                priority: 5,
                ..Zone::new(2, "front", Polygon::rectangle(-5.0, 0.0, -1.0, 4.0))
            },
        ])
    }

    fn line_path(zone_id: u32) -> Path {
        let waypoints = (0..=4)
            .map(|i| Waypoint::new(Point2D::new(i as f32, 1.0), 0.0, SpeedClass::Mowing, true))
            .collect();
        Path::new(zone_id, CoveragePattern::Parallel, waypoints)
    }

    fn input<'a>(pose: Pose2D, battery: f32, readings: &'a [RangeReading], map: &'a MapView) -> TickInput<'a> {
        TickInput {
            now_us: 1_000_000,
            pose: Pose::at_rest(pose, 1_000_000, Covariance2D::diagonal(0.01, 0.01, 0.001)),
            health: FusionHealth::Nominal,
            battery_percent: battery,
            readings,
            map,
        }
    }

    fn planned(exec: &mut NavigationExecutor, map: &MapView) -> PlanRequest {
        let out = exec.tick(&input(Pose2D::new(0.0, 1.0, 0.0), 80.0, &[], map));
        out.plan_request.expect("plan request")
    }

    #[test]
    fn test_start_plans_highest_priority_first() {
        let map = map();
        let mut exec = NavigationExecutor::new(ExecutorConfig::default(), AvoidanceConfig::default());
        assert!(exec.start(&zones()));
        assert_eq!(exec.state(), ExecutorState::Planning);

        let request = planned(&mut exec, &map);
        assert_eq!(request.zone.id, 2);

        // Only one request per planning attempt
        let out = exec.tick(&input(Pose2D::identity(), 80.0, &[], &map));
        assert!(out.plan_request.is_none());
    }

    #[test]
    fn test_plan_failure_moves_to_next_zone() {
        let map = map();
        let mut exec = NavigationExecutor::new(ExecutorConfig::default(), AvoidanceConfig::default());
        exec.start(&zones());
        let request = planned(&mut exec, &map);

        exec.on_plan(PlanOutcome {
            request_id: request.request_id,
            zone_id: 2,
            result: Err(PlanningFailure::NoUsableArea),
        });
        let out = exec.tick(&input(Pose2D::identity(), 80.0, &[], &map));
        assert!(out
            .events
            .iter()
            .any(|e| matches!(e, NavEvent::PlanFailed { zone_id: 2, .. })));
        assert_eq!(out.plan_request.map(|r| r.zone.id), Some(1));
    }

    #[test]
    fn test_stale_plan_is_dropped() {
        let map = map();
        let mut exec = NavigationExecutor::new(ExecutorConfig::default(), AvoidanceConfig::default());
        exec.start(&zones());
        let request = planned(&mut exec, &map);
        exec.on_plan(PlanOutcome {
            request_id: request.request_id + 7,
            zone_id: 2,
            result: Ok(line_path(2)),
        });
        assert_eq!(exec.state(), ExecutorState::Planning);
    }

    #[test]
    fn test_mowing_drives_with_blade_and_completes_zone() {
        let map = map();
        let config = ExecutorConfig {
            return_when_done: false,
            ..Default::default()
        };
        let mut exec = NavigationExecutor::new(config, AvoidanceConfig::default());
        exec.start(&ZoneSet::new(vec![Zone::new(1, "back", Polygon::rectangle(0.0, 0.0, 4.0, 4.0))]));
        let request = planned(&mut exec, &map);
        exec.on_plan(PlanOutcome {
            request_id: request.request_id,
            zone_id: 1,
            result: Ok(line_path(1)),
        });
        assert_eq!(exec.state(), ExecutorState::Mowing);

        let out = exec.tick(&input(Pose2D::new(0.0, 1.0, 0.0), 80.0, &[], &map));
        assert!(out.blade);
        assert!(out.velocity.linear > 0.0);

        let mut out = out;
        for x in 1..=4 {
            out = exec.tick(&input(Pose2D::new(x as f32, 1.0, 0.0), 80.0, &[], &map));
        }
        assert!(out.events.contains(&NavEvent::ZoneComplete { zone_id: 1 }));
        assert!(out.events.contains(&NavEvent::AllZonesComplete));
        assert_eq!(out.resume, Some(ResumeUpdate::Clear));
        assert_eq!(exec.state(), ExecutorState::Idle);
        assert_eq!(out.velocity, Twist2D::zero());
    }

    #[test]
    fn test_plan_keeps_safety_margin_from_mapped_obstacles() {
        let manager = MapManager::new(OccupancyGridConfig {
            width_m: 20.0,
            height_m: 20.0,
            ..Default::default()
        });
        manager.integrate(&[Detection::Region {
            area: Polygon::rectangle(1.5, 1.5, 2.5, 2.5),
            confidence: 1.0,
        }]);
        let map = manager.snapshot();
        let avoidance = AvoidanceConfig::default();
        let margin = avoidance.safety_margin;

        let mut exec = NavigationExecutor::new(ExecutorConfig::default(), avoidance);
        exec.start(&ZoneSet::new(vec![Zone::new(1, "back", Polygon::rectangle(0.0, 0.0, 4.0, 4.0))]));
        let request = planned(&mut exec, &map);
        assert!(!request.obstacles.is_empty());
        assert!(request.obstacles.iter().all(|o| o.id >= MAP_OBSTACLE_ID_BASE));

        let path = CoveragePlanner::new(CoverageConfig::default(), 0.32)
            .plan(&request.zone, &request.obstacles, request.zone.pattern)
            .unwrap();
        let mut samples = 0;
        for (a, b) in path.legs().filter(|(_, to)| to.blade) {
            for k in 0..=20 {
                let t = k as f32 / 20.0;
                let p = Point2D::new(
                    a.position.x + (b.position.x - a.position.x) * t,
                    a.position.y + (b.position.y - a.position.y) * t,
                );
                assert!(map.obstacle_cells_within(&p, margin).is_empty(), "blade on at {:?}", p);
                samples += 1;
            }
        }
        assert!(samples > 0);
    }

    #[test]
    fn test_obstacle_change_replans_active_zone() {
        let map = map();
        let mut exec = NavigationExecutor::new(ExecutorConfig::default(), AvoidanceConfig::default());
        exec.start(&ZoneSet::new(vec![Zone::new(1, "back", Polygon::rectangle(0.0, 0.0, 4.0, 4.0))]));
        let request = planned(&mut exec, &map);
        exec.on_plan(PlanOutcome {
            request_id: request.request_id,
            zone_id: 1,
            result: Ok(line_path(1)),
        });
        exec.tick(&input(Pose2D::new(0.0, 1.0, 0.0), 80.0, &[], &map));
        assert_eq!(exec.state(), ExecutorState::Mowing);

        let rock = Obstacle::circle(7, ObstacleKind::Static, Point2D::new(2.0, 1.0), 0.5, 0.9);
        exec.set_obstacles(vec![rock.clone()]);
        assert_eq!(exec.state(), ExecutorState::Planning);
        assert!(exec.current_path().is_none());

        let out = exec.tick(&input(Pose2D::new(0.5, 1.0, 0.0), 80.0, &[], &map));
        assert_eq!(out.velocity, Twist2D::zero());
        let request = out.plan_request.expect("replan request");
        assert!(request.obstacles.contains(&rock));
        exec.on_plan(PlanOutcome {
            request_id: request.request_id,
            zone_id: 1,
            result: Ok(line_path(1)),
        });
        assert_eq!(exec.state(), ExecutorState::Mowing);

        // A confidence update alone keeps the path
        exec.set_obstacles(vec![Obstacle { confidence: 0.95, ..rock }]);
        assert_eq!(exec.state(), ExecutorState::Mowing);
        assert!(exec.current_path().is_some());
    }

    #[test]
    fn test_low_battery_persists_and_returns() {
        let map = map();
        let mut exec = NavigationExecutor::new(ExecutorConfig::default(), AvoidanceConfig::default());
        exec.start(&ZoneSet::new(vec![Zone::new(1, "back", Polygon::rectangle(0.0, 0.0, 4.0, 4.0))]));
        let request = planned(&mut exec, &map);
        exec.on_plan(PlanOutcome {
            request_id: request.request_id,
            zone_id: 1,
            result: Ok(line_path(1)),
        });
        exec.tick(&input(Pose2D::new(0.0, 1.0, 0.0), 80.0, &[], &map));
        exec.tick(&input(Pose2D::new(1.0, 1.0, 0.0), 80.0, &[], &map));

        let out = exec.tick(&input(Pose2D::new(1.5, 1.0, 0.0), 15.0, &[], &map));
        assert_eq!(exec.state(), ExecutorState::Returning);
        assert!(out
            .events
            .iter()
            .any(|e| matches!(e, NavEvent::LowBattery { .. })));
        let Some(ResumeUpdate::Save(resume)) = out.resume else {
            panic!("expected a resume snapshot");
        };
        assert_eq!(resume.zone_id, 1);
        assert_eq!(resume.waypoint_index, 2);
        assert_eq!(resume.path_checksum, line_path(1).checksum);
        assert!(!out.blade);
    }

    #[test]
    fn test_resume_exact_and_nearest() {
        let map = map();
        let path = line_path(1);
        let resume = ResumeState {
            zone_id: 1,
            waypoint_index: 3,
            pose: Pose2D::new(2.9, 1.0, 0.0),
            path_checksum: path.checksum,
            completed_zones: vec![],
            saved_at_us: 0,
        };

        let mut exec = NavigationExecutor::new(ExecutorConfig::default(), AvoidanceConfig::default())
            .with_resume(Some(resume.clone()));
        exec.start(&zones());
        let request = planned(&mut exec, &map);
        assert_eq!(request.zone.id, 1);
        exec.on_plan(PlanOutcome {
            request_id: request.request_id,
            zone_id: 1,
            result: Ok(path.clone()),
        });
        assert_eq!(exec.progress(), Some((1, 3, 5)));

        // Different path: continue from the waypoint nearest the saved pose
        let mut exec = NavigationExecutor::new(ExecutorConfig::default(), AvoidanceConfig::default())
            .with_resume(Some(ResumeState {
                path_checksum: path.checksum ^ 1,
                pose: Pose2D::new(1.1, 1.0, 0.0),
                ..resume
            }));
        exec.start(&zones());
        let request = planned(&mut exec, &map);
        exec.on_plan(PlanOutcome {
            request_id: request.request_id,
            zone_id: 1,
            result: Ok(path),
        });
        assert_eq!(exec.progress(), Some((1, 1, 5)));
    }

    #[test]
    fn test_completed_zones_are_skipped_on_resume() {
        let map = map();
        let resume = ResumeState {
            zone_id: 2,
            waypoint_index: 5,
            pose: Pose2D::identity(),
            path_checksum: 0,
            completed_zones: vec![2],
            saved_at_us: 0,
        };
        let mut exec = NavigationExecutor::new(ExecutorConfig::default(), AvoidanceConfig::default())
            .with_resume(Some(resume));
        exec.start(&zones());
        assert_eq!(planned(&mut exec, &map).zone.id, 1);
    }

    #[test]
    fn test_divergence_holds_then_lost_is_error() {
        let map = map();
        let mut exec = NavigationExecutor::new(ExecutorConfig::default(), AvoidanceConfig::default());
        exec.start(&ZoneSet::new(vec![Zone::new(1, "back", Polygon::rectangle(0.0, 0.0, 4.0, 4.0))]));
        let request = planned(&mut exec, &map);
        exec.on_plan(PlanOutcome {
            request_id: request.request_id,
            zone_id: 1,
            result: Ok(line_path(1)),
        });

        let mut tick = input(Pose2D::new(0.5, 1.0, 0.0), 80.0, &[], &map);
        tick.health = FusionHealth::Diverged { since_us: 0 };
        let out = exec.tick(&tick);
        assert_eq!(out.velocity, Twist2D::zero());
        assert!(!out.blade);
        assert!(out
            .events
            .iter()
            .any(|e| matches!(e, NavEvent::LocalizationLost { .. })));
        assert_eq!(exec.state(), ExecutorState::Mowing);

        tick.health = FusionHealth::Lost;
        exec.tick(&tick);
        assert_eq!(exec.state(), ExecutorState::Error);

        // Error is sticky until the operator resets
        tick.health = FusionHealth::Nominal;
        exec.tick(&tick);
        assert_eq!(exec.state(), ExecutorState::Error);
        assert!(!exec.start(&zones()));
        assert!(exec.operator_reset());
        assert_eq!(exec.state(), ExecutorState::Idle);
    }

    #[test]
    fn test_collision_reading_forces_error() {
        let map = map();
        let mut exec = NavigationExecutor::new(ExecutorConfig::default(), AvoidanceConfig::default());
        exec.start(&ZoneSet::new(vec![Zone::new(1, "back", Polygon::rectangle(0.0, 0.0, 4.0, 4.0))]));
        let request = planned(&mut exec, &map);
        exec.on_plan(PlanOutcome {
            request_id: request.request_id,
            zone_id: 1,
            result: Ok(line_path(1)),
        });

        let readings = [RangeReading {
            sensor_id: 0,
            distance_m: 0.1,
        }];
        let out = exec.tick(&input(Pose2D::new(0.5, 1.0, 0.0), 80.0, &readings, &map));
        assert_eq!(exec.state(), ExecutorState::Error);
        assert_eq!(out.velocity, Twist2D::zero());
        assert!(out.events.iter().any(|e| e.name() == "obstacle-detected"));
        assert!(out.events.iter().any(|e| matches!(e, NavEvent::Fault { .. })));
    }

    #[test]
    fn test_emergency_stop_is_immediate() {
        let map = map();
        let mut exec = NavigationExecutor::new(ExecutorConfig::default(), AvoidanceConfig::default());
        exec.start(&zones());
        planned(&mut exec, &map);

        let out = exec.emergency_stop();
        assert_eq!(out.velocity, Twist2D::zero());
        assert_eq!(out.state, ExecutorState::Error);
        assert!(out.events.contains(&NavEvent::EmergencyStop));
        assert!(matches!(out.resume, Some(ResumeUpdate::Save(_))));
    }
}
