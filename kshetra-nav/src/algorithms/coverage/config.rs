//! Coverage planner configuration.

use serde::{Deserialize, Serialize};

use crate::algorithms::planning::AStarConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Overlap used when a zone does not set its own (percent).
    pub default_overlap_percent: f32,
    /// Contour rings mown before the fill of a perimeter-first zone.
    pub perimeter_passes: usize,
    /// Non-restricted obstacles below this confidence are ignored.
    pub obstacle_confidence_floor: f32,
    /// Cell size of the transit routing grid (meters).
    pub transit_resolution: f32,
    /// Turns smaller than this are merged during smoothing (degrees).
    pub collinear_tolerance_deg: f32,
    /// Minimum waypoint spacing inside a sub-path, as a fraction of the
    /// working width.
    pub min_spacing_fraction: f32,
    /// Mowing waypoints closer than this to a buffered obstacle are slow.
    pub slow_clearance_m: f32,
    /// Vertices used to approximate circular obstacles.
    pub circle_segments: usize,
    /// Safety cap on contour rings for spiral patterns.
    pub max_rings: usize,
    /// Upper bound on sampled points for the random pattern.
    pub max_random_points: usize,
    /// Mixed with the zone id to seed the random pattern.
    pub random_seed: u64,
    /// Routing used for blocked transits.
    pub astar: AStarConfig,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            default_overlap_percent: 10.0,
            perimeter_passes: 2,
            obstacle_confidence_floor: 0.5,
            transit_resolution: 0.1,
            collinear_tolerance_deg: 5.0,
            min_spacing_fraction: 0.1,
            slow_clearance_m: 0.3,
            circle_segments: 16,
            max_rings: 500,
            max_random_points: 2000,
            random_seed: 0x4b53_4554,
            astar: AStarConfig::default(),
        }
    }
}
