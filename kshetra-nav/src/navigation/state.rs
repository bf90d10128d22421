//! Executor states, operator-facing events and the resume snapshot.

use serde::{Deserialize, Serialize};

use crate::core::types::Pose2D;
use crate::sensors::SensorKind;

/// Top-level executor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ExecutorState {
    Idle = 0,
    Planning = 1,
    Mowing = 2,
    /// Blocked or driving a detour; substate in the avoidance controller
    Avoiding = 3,
    Returning = 4,
    Docking = 5,
    Charging = 6,
    /// Left only through an operator reset
    Error = 7,
}

impl ExecutorState {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutorState::Idle => "idle",
            ExecutorState::Planning => "planning",
            ExecutorState::Mowing => "mowing",
            ExecutorState::Avoiding => "avoiding",
            ExecutorState::Returning => "returning",
            ExecutorState::Docking => "docking",
            ExecutorState::Charging => "charging",
            ExecutorState::Error => "error",
        }
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => ExecutorState::Idle,
            1 => ExecutorState::Planning,
            2 => ExecutorState::Mowing,
            3 => ExecutorState::Avoiding,
            4 => ExecutorState::Returning,
            5 => ExecutorState::Docking,
            6 => ExecutorState::Charging,
            7 => ExecutorState::Error,
            _ => return None,
        })
    }

    /// States in which the robot drives a path.
    pub fn is_driving(self) -> bool {
        matches!(
            self,
            ExecutorState::Mowing | ExecutorState::Avoiding | ExecutorState::Returning | ExecutorState::Docking
        )
    }
}

/// Discrete event for the operator-facing layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum NavEvent {
    ObstacleDetected { distance_m: f32 },
    ZoneStarted { zone_id: u32, waypoints: usize },
    ZoneComplete { zone_id: u32 },
    /// Zone abandoned after a blockage could not be bypassed.
    ZoneSkipped { zone_id: u32, reason: String },
    PlanFailed { zone_id: u32, reason: String },
    AllZonesComplete,
    LocalizationLost { sigma_m: f32 },
    LocalizationRecovered,
    SensorDegraded { sensor: SensorKind },
    SensorRecovered { sensor: SensorKind },
    /// Samples of one sensor dropped since the previous report.
    SamplesDropped { sensor: SensorKind, count: u64 },
    LowBattery { percent: f32 },
    Docked,
    ChargingComplete,
    EmergencyStop,
    Fault { reason: String },
}

impl NavEvent {
    /// Event name as shown to operators.
    pub fn name(&self) -> &'static str {
        match self {
            NavEvent::ObstacleDetected { .. } => "obstacle-detected",
            NavEvent::ZoneStarted { .. } => "zone-started",
            NavEvent::ZoneComplete { .. } => "zone-complete",
            NavEvent::ZoneSkipped { .. } => "zone-skipped",
            NavEvent::PlanFailed { .. } => "plan-failed",
            NavEvent::AllZonesComplete => "all-zones-complete",
            NavEvent::LocalizationLost { .. } => "localization-lost",
            NavEvent::LocalizationRecovered => "localization-recovered",
            NavEvent::SensorDegraded { .. } => "sensor-degraded",
            NavEvent::SensorRecovered { .. } => "sensor-recovered",
            NavEvent::SamplesDropped { .. } => "samples-dropped",
            NavEvent::LowBattery { .. } => "low-battery",
            NavEvent::Docked => "docked",
            NavEvent::ChargingComplete => "charging-complete",
            NavEvent::EmergencyStop => "emergency-stop",
            NavEvent::Fault { .. } => "fault",
        }
    }
}

/// Enough progress to continue coverage after a stop or power loss.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeState {
    pub zone_id: u32,
    /// Next waypoint to drive to
    pub waypoint_index: usize,
    pub pose: Pose2D,
    pub path_checksum: u32,
    #[serde(default)]
    pub completed_zones: Vec<u32>,
    #[serde(default)]
    pub saved_at_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_u8() {
        for value in 0..8u8 {
            let state = ExecutorState::from_u8(value).unwrap();
            assert_eq!(state as u8, value);
        }
        assert!(ExecutorState::from_u8(8).is_none());
    }

    #[test]
    fn test_event_wire_names() {
        let json = serde_json::to_string(&NavEvent::ZoneComplete { zone_id: 4 }).unwrap();
        assert_eq!(json, r#"{"event":"zone-complete","zone_id":4}"#);
        assert_eq!(
            NavEvent::PlanFailed {
                zone_id: 1,
                reason: "x".into()
            }
            .name(),
            "plan-failed"
        );
    }
}
