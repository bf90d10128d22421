//! Full missions through the closed-loop harness.

use std::f32::consts::PI;

use kshetra_nav::core::types::Pose2D;
use kshetra_nav::io::ResumeStore;
use kshetra_nav::navigation::{ExecutorState, NavEvent, ZoneSet};
use kshetra_nav::sim::{SatelliteSim, SimConfig, SimHarness};
use kshetra_nav::threads::ControlCommand;

use super::{rectangle_zone, test_config};

fn lawn() -> ZoneSet {
    ZoneSet::new(vec![rectangle_zone(1, 1.0, -1.0, 3.0, 1.0)])
}

fn has_event(harness: &SimHarness, want: impl Fn(&NavEvent) -> bool) -> bool {
    harness.events().iter().any(want)
}

/// Sensors without noise so truth and estimate agree.
fn quiet_sim() -> SimConfig {
    SimConfig {
        slip_stddev: 0.0,
        gyro_stddev: 0.0,
        range_stddev: 0.0,
        satellite: None,
        ..Default::default()
    }
}

#[test]
fn test_mows_zone_and_goes_idle() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.executor.return_when_done = false;

    let mut harness = SimHarness::new(&config, SimConfig::default());
    harness.command(ControlCommand::Start(lawn()));

    let finished = harness.run_until(900.0, |h| {
        h.state() == ExecutorState::Idle
            && has_event(h, |e| matches!(e, NavEvent::AllZonesComplete))
    });
    assert!(finished, "mission did not finish, state {:?}", harness.state());
    assert!(has_event(&harness, |e| matches!(e, NavEvent::ZoneStarted { zone_id: 1, .. })));
    assert!(has_event(&harness, |e| matches!(e, NavEvent::ZoneComplete { zone_id: 1 })));

    let report = harness.finish();
    assert_eq!(report.completed_zones, vec![1]);
    assert_eq!(report.collisions, 0);
    assert!(report.mowed_m > 4.0, "mowed only {:.1}m", report.mowed_m);
    assert!(report.position_error_m < 0.5);
    assert!(report.battery_percent < 100.0);

    // Persistence flushed on shutdown; nothing left to resume
    assert!(config.paths.map_file.exists());
    assert!(config.paths.graph_file.exists());
    assert!(!config.paths.resume_file.exists());
}

#[test]
fn test_return_home_docks() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let sim = SimConfig {
        start_pose: Pose2D::new(2.0, 0.5, PI),
        ..quiet_sim()
    };

    let mut harness = SimHarness::new(&config, sim);
    harness.command(ControlCommand::ReturnHome);
    harness.step();
    assert_eq!(harness.state(), ExecutorState::Returning);

    let docked = harness.run_until(180.0, |h| has_event(h, |e| matches!(e, NavEvent::Docked)));
    assert!(docked, "not docked, state {:?}", harness.state());
    assert!(harness.simulator().on_dock());
    assert_eq!(harness.simulator().collisions(), 0);
}

#[test]
fn test_interrupted_mission_resumes_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let sim = SimConfig {
        satellite: Some(SatelliteSim {
            error_m: 0.02,
            ..Default::default()
        }),
        ..quiet_sim()
    };

    let mut first = SimHarness::new(&config, sim.clone());
    first.command(ControlCommand::Start(lawn()));
    assert!(first.run_until(60.0, |h| h.state() == ExecutorState::Mowing));
    first.run_until(25.0, |_| false);
    assert_eq!(first.state(), ExecutorState::Mowing);

    first.command(ControlCommand::ReturnHome);
    let docked = first.run_until(300.0, |h| has_event(h, |e| matches!(e, NavEvent::Docked)));
    assert!(docked);
    first.finish();

    let saved = ResumeStore::new(config.paths.resume_file.clone())
        .load()
        .expect("resume state saved on return");
    assert_eq!(saved.zone_id, 1);
    assert!(saved.waypoint_index > 0);
    assert!(saved.completed_zones.is_empty());

    let mut second = SimHarness::new(&config, sim);
    second.command(ControlCommand::Start(lawn()));
    assert!(second.run_until(60.0, |h| h.state() == ExecutorState::Mowing));

    let (zone_id, index, _) = second.control().executor().progress().unwrap();
    assert_eq!(zone_id, 1);
    assert!(index >= saved.waypoint_index);
}
