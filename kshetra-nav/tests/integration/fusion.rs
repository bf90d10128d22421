//! Fusion fed by the simulated sensor suite.

use kshetra_nav::core::types::{Point2D, Pose2D, Twist2D};
use kshetra_nav::error::DropReason;
use kshetra_nav::sensors::fusion::LocalFrame;
use kshetra_nav::sensors::{FusionConfig, FusionEstimator, FusionHealth, IngestOutcome, SensorSample};
use kshetra_nav::sim::{SimConfig, Simulator};

const DT: f32 = 0.05;

fn drive(sim: &mut Simulator, est: &mut FusionEstimator, command: Twist2D, seconds: f32) {
    let steps = (seconds / DT).round() as usize;
    for _ in 0..steps {
        for sample in sim.step(DT, command, false) {
            // Rejections are counted by the estimator
            let _ = est.ingest(&sample);
        }
        est.tick(sim.now_us());
    }
}

#[test]
fn test_fused_pose_follows_noisy_drive() {
    let mut sim = Simulator::new(SimConfig::default(), Vec::new());
    let mut est = FusionEstimator::with_pose(FusionConfig::default(), sim.pose());

    drive(&mut sim, &mut est, Twist2D::new(0.4, 0.0), 10.0);
    drive(&mut sim, &mut est, Twist2D::new(0.3, 0.4), 8.0);
    drive(&mut sim, &mut est, Twist2D::new(0.4, 0.0), 10.0);

    let truth = sim.pose();
    let fused = est.estimate();
    assert!(sim.distance_m() > 8.0);
    assert!(
        truth.position().distance(&fused.pose.position()) < 0.5,
        "truth {:?} fused {:?}",
        truth,
        fused.pose
    );
    assert!(fused.covariance.is_positive_semidefinite());
    assert!(fused.covariance.position_sigma() < 0.5);
    assert_eq!(est.health(), FusionHealth::Nominal);
    assert!(est.local_frame().is_some());
}

#[test]
fn test_satellite_jump_is_gated() {
    let config = FusionConfig::default();
    let mut est = FusionEstimator::with_pose(config, Pose2D::identity());
    let frame = LocalFrame::new(12.9716, 77.5946, Point2D::new(0.0, 0.0));

    let (lat, lon) = frame.to_geodetic(&Point2D::new(0.0, 0.0));
    assert_eq!(
        est.ingest(&SensorSample::satellite(100_000, lat, lon, 0.05)).unwrap(),
        IngestOutcome::Anchored
    );

    let before = est.estimate().pose;
    let (lat, lon) = frame.to_geodetic(&Point2D::new(30.0, 0.0));
    let fault = est
        .ingest(&SensorSample::satellite(200_000, lat, lon, 0.05))
        .unwrap_err();
    assert_eq!(fault.reason, DropReason::OutlierRejected);
    assert_eq!(est.estimate().pose, before);
    assert_eq!(est.sensor_stats(fault.sensor).dropped(), 1);
}

#[test]
fn test_out_of_order_and_stale_samples_dropped() {
    let mut est = FusionEstimator::new(FusionConfig::default());
    est.ingest(&SensorSample::odometry(1_000_000, 0.01, 0.01)).unwrap();
    let pose = est.estimate().pose;

    let fault = est.ingest(&SensorSample::odometry(900_000, 0.01, 0.01)).unwrap_err();
    assert_eq!(fault.reason, DropReason::OutOfOrder);

    // Inertial sample 600ms behind the newest odometry
    let fault = est.ingest(&SensorSample::inertial(400_000, 0.0)).unwrap_err();
    assert_eq!(fault.reason, DropReason::Stale);

    assert_eq!(est.estimate().pose, pose);
}
