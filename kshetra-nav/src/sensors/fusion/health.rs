//! Per-sensor drop accounting and localization divergence tracking.

use std::collections::VecDeque;

use serde::Serialize;

use super::config::{DivergenceConfig, HealthConfig};
use crate::error::DropReason;

/// Counters for one sensor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SensorStats {
    pub accepted: u64,
    pub out_of_order: u64,
    pub stale: u64,
    pub low_confidence: u64,
    pub implausible: u64,
    pub outlier: u64,
    pub numerical: u64,
    /// Drop rate over the sliding window
    pub recent_drop_rate: f32,
    pub degraded: bool,
}

impl SensorStats {
    pub fn dropped(&self) -> u64 {
        self.out_of_order
            + self.stale
            + self.low_confidence
            + self.implausible
            + self.outlier
            + self.numerical
    }
}

/// Degraded-state change for one sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedTransition {
    Degraded,
    Recovered,
}

/// Sliding window of accept/drop outcomes.
#[derive(Debug, Clone)]
pub struct SensorHealth {
    config: HealthConfig,
    window: VecDeque<bool>,
    drops_in_window: usize,
    stats: SensorStats,
}

impl SensorHealth {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            window: VecDeque::with_capacity(config.window_size),
            drops_in_window: 0,
            stats: SensorStats::default(),
        }
    }

    pub fn record_accepted(&mut self) -> Option<DegradedTransition> {
        self.stats.accepted += 1;
        self.push(false)
    }

    pub fn record_drop(&mut self, reason: &DropReason) -> Option<DegradedTransition> {
        match reason {
            DropReason::OutOfOrder => self.stats.out_of_order += 1,
            DropReason::Stale => self.stats.stale += 1,
            DropReason::LowConfidence => self.stats.low_confidence += 1,
            DropReason::Implausible(_) => self.stats.implausible += 1,
            DropReason::OutlierRejected => self.stats.outlier += 1,
            DropReason::NumericalFault => self.stats.numerical += 1,
        }
        self.push(true)
    }

    #[inline]
    pub fn is_degraded(&self) -> bool {
        self.stats.degraded
    }

    pub fn stats(&self) -> &SensorStats {
        &self.stats
    }

    fn push(&mut self, dropped: bool) -> Option<DegradedTransition> {
        if self.window.len() >= self.config.window_size.max(1)
            && let Some(old) = self.window.pop_front()
            && old
        {
            self.drops_in_window -= 1;
        }
        self.window.push_back(dropped);
        if dropped {
            self.drops_in_window += 1;
        }

        let rate = self.drops_in_window as f32 / self.window.len() as f32;
        self.stats.recent_drop_rate = rate;

        if self.window.len() < self.config.min_samples {
            return None;
        }

        if !self.stats.degraded && rate > self.config.degraded_drop_rate {
            self.stats.degraded = true;
            Some(DegradedTransition::Degraded)
        } else if self.stats.degraded && rate < 0.5 * self.config.degraded_drop_rate {
            self.stats.degraded = false;
            Some(DegradedTransition::Recovered)
        } else {
            None
        }
    }
}

/// Overall localization health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FusionHealth {
    /// All sensors healthy, σ within bounds
    Nominal,
    /// At least one sensor degraded, σ within bounds
    Degraded,
    /// σ above ceiling for longer than the grace period
    Diverged { since_us: u64 },
    /// Divergence outlasted the recovery timeout
    Lost,
}

impl FusionHealth {
    pub fn is_localized(&self) -> bool {
        matches!(self, FusionHealth::Nominal | FusionHealth::Degraded)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FusionHealth::Nominal => "Nominal",
            FusionHealth::Degraded => "Degraded",
            FusionHealth::Diverged { .. } => "Diverged",
            FusionHealth::Lost => "Lost",
        }
    }
}

/// Divergence state change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DivergenceTransition {
    Diverged,
    Recovered,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DivergenceState {
    Tracking { above_since_us: Option<u64> },
    Diverged { since_us: u64 },
    Lost,
}

/// Tracks how long the position σ has exceeded its ceiling.
#[derive(Debug, Clone)]
pub struct DivergenceMonitor {
    config: DivergenceConfig,
    state: DivergenceState,
    last_sigma: f32,
}

impl DivergenceMonitor {
    pub fn new(config: DivergenceConfig) -> Self {
        Self {
            config,
            state: DivergenceState::Tracking {
                above_since_us: None,
            },
            last_sigma: 0.0,
        }
    }

    pub fn update(&mut self, sigma: f32, now_us: u64) -> Option<DivergenceTransition> {
        self.last_sigma = sigma;
        let grace_us = self.config.grace_ms * 1000;
        let timeout_us = self.config.recovery_timeout_ms * 1000;

        match self.state {
            DivergenceState::Tracking { above_since_us } => {
                if sigma > self.config.ceiling_m || sigma.is_nan() {
                    let since = above_since_us.unwrap_or(now_us);
                    if now_us.saturating_sub(since) >= grace_us {
                        self.state = DivergenceState::Diverged { since_us: now_us };
                        return Some(DivergenceTransition::Diverged);
                    }
                    self.state = DivergenceState::Tracking {
                        above_since_us: Some(since),
                    };
                } else {
                    self.state = DivergenceState::Tracking {
                        above_since_us: None,
                    };
                }
                None
            }
            DivergenceState::Diverged { since_us } => {
                if sigma < self.config.recovery_ratio * self.config.ceiling_m {
                    self.state = DivergenceState::Tracking {
                        above_since_us: None,
                    };
                    Some(DivergenceTransition::Recovered)
                } else if now_us.saturating_sub(since_us) >= timeout_us {
                    self.state = DivergenceState::Lost;
                    Some(DivergenceTransition::Lost)
                } else {
                    None
                }
            }
            DivergenceState::Lost => None,
        }
    }

    /// Time spent diverged, in seconds.
    pub fn diverged_for_s(&self, now_us: u64) -> f32 {
        match self.state {
            DivergenceState::Diverged { since_us } => {
                now_us.saturating_sub(since_us) as f32 / 1e6
            }
            DivergenceState::Lost => self.config.recovery_timeout_ms as f32 / 1000.0,
            DivergenceState::Tracking { .. } => 0.0,
        }
    }

    pub fn diverged_since(&self) -> Option<u64> {
        match self.state {
            DivergenceState::Diverged { since_us } => Some(since_us),
            _ => None,
        }
    }

    pub fn is_lost(&self) -> bool {
        matches!(self.state, DivergenceState::Lost)
    }

    pub fn last_sigma(&self) -> f32 {
        self.last_sigma
    }

    pub fn reset(&mut self) {
        self.state = DivergenceState::Tracking {
            above_since_us: None,
        };
    }
}
