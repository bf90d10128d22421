//! Integration tests for kshetra-nav.
//!
//! These exercise the public API across module boundaries: fusion fed by
//! the simulator, planning over stored zones, map persistence, and full
//! missions through the closed-loop harness.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p kshetra-nav --test integration -- --nocapture
//! ```

mod coverage;
mod fusion;
mod mapping;
mod mission;

use std::path::Path;

use kshetra_nav::KshetraConfig;
use kshetra_nav::core::geometry::Polygon;
use kshetra_nav::navigation::Zone;

/// Axis-aligned zone with default mowing settings.
pub fn rectangle_zone(id: u32, min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Zone {
    Zone::new(id, format!("zone-{}", id), Polygon::rectangle(min_x, min_y, max_x, max_y))
}

/// Default configuration with every file under `dir` and a map sized for
/// small test lawns.
pub fn test_config(dir: &Path) -> KshetraConfig {
    let mut config = KshetraConfig::default();
    config.paths.zones_file = dir.join("zones.json");
    config.paths.map_file = dir.join("lawn.ksmp");
    config.paths.resume_file = dir.join("resume.json");
    config.paths.graph_file = dir.join("pose_graph.json");
    config.map.width_m = 16.0;
    config.map.height_m = 16.0;
    config
}
