//! Error types for KshetraNav

use thiserror::Error;

use crate::sensors::SensorKind;

/// Why a sensor sample was dropped before it reached the filter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DropReason {
    #[error("timestamp not after previous sample")]
    OutOfOrder,

    #[error("older than staleness window")]
    Stale,

    #[error("confidence below floor")]
    LowConfidence,

    #[error("implausible value: {0}")]
    Implausible(String),

    #[error("innovation outside gate")]
    OutlierRejected,

    #[error("correction would break covariance")]
    NumericalFault,
}

/// A rejected sample; the estimator state is untouched.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{sensor} sample dropped: {reason}")]
pub struct SensorFault {
    pub sensor: SensorKind,
    pub reason: DropReason,
}

impl SensorFault {
    pub fn new(sensor: SensorKind, reason: DropReason) -> Self {
        Self { sensor, reason }
    }
}

/// Reasons the coverage planner gives up on a zone.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanningFailure {
    #[error("invalid zone: {0}")]
    InvalidZone(String),

    #[error("no usable area after obstacle removal")]
    NoUsableArea,

    #[error("planning exceeded {budget_ms}ms budget")]
    Timeout { budget_ms: u64 },

    #[error("planning cancelled")]
    Cancelled,
}

/// KshetraNav error type
#[derive(Error, Debug)]
pub enum NavError {
    #[error("Sensor fault: {0}")]
    SensorFault(#[from] SensorFault),

    #[error("Localization divergence: sigma {sigma_m:.2}m for {duration_s:.1}s")]
    LocalizationDivergence {
        sigma_m: f32,
        duration_s: f32,
        /// Divergence outlasted the recovery timeout
        fatal: bool,
    },

    #[error("Planning failed for zone {zone_id}: {source}")]
    Planning {
        zone_id: String,
        #[source]
        source: PlanningFailure,
    },

    #[error("Collision imminent: obstacle at {distance_m:.2}m")]
    CollisionImminent { distance_m: f32 },

    #[error("Map corruption: {0}")]
    MapCorruption(String),

    #[error("Pose graph error: {0}")]
    Graph(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl NavError {
    /// Errors that must drive the executor into its Error state.
    pub fn is_fatal(&self) -> bool {
        match self {
            NavError::CollisionImminent { .. } => true,
            NavError::LocalizationDivergence { fatal, .. } => *fatal,
            _ => false,
        }
    }

    pub fn planning(zone_id: impl Into<String>, source: PlanningFailure) -> Self {
        NavError::Planning {
            zone_id: zone_id.into(),
            source,
        }
    }
}

impl From<toml::de::Error> for NavError {
    fn from(e: toml::de::Error) -> Self {
        NavError::Config(e.to_string())
    }
}

impl From<serde_json::Error> for NavError {
    fn from(e: serde_json::Error) -> Self {
        NavError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, NavError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(NavError::CollisionImminent { distance_m: 0.1 }.is_fatal());
        assert!(
            NavError::LocalizationDivergence {
                sigma_m: 3.0,
                duration_s: 40.0,
                fatal: true
            }
            .is_fatal()
        );
        assert!(
            !NavError::LocalizationDivergence {
                sigma_m: 3.0,
                duration_s: 12.0,
                fatal: false
            }
            .is_fatal()
        );
        assert!(!NavError::MapCorruption("bad magic".into()).is_fatal());
        assert!(!NavError::planning("front", PlanningFailure::NoUsableArea).is_fatal());
    }

    #[test]
    fn test_sensor_fault_display() {
        let fault = SensorFault::new(SensorKind::Satellite, DropReason::Stale);
        let err: NavError = fault.into();
        assert!(err.to_string().contains("satellite"));
        assert!(err.to_string().contains("staleness"));
    }
}
