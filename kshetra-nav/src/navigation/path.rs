//! Coverage path types.
//!
//! A [`Path`] is the output of the coverage planner: every waypoint the
//! robot drives to for one zone, in order, with the speed class and blade
//! state of the leg that ends at it.

use serde::{Deserialize, Serialize};

use crate::algorithms::coverage::CoveragePattern;
use crate::core::checksum::crc32;
use crate::core::types::Point2D;

/// Speed class of the leg ending at a waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedClass {
    /// Cutting speed from the zone's mowing speed.
    Mowing,
    /// Blade-off repositioning.
    Transit,
    /// Near obstacles and on tight turns.
    Slow,
}

impl SpeedClass {
    fn code(self) -> u8 {
        match self {
            SpeedClass::Mowing => 0,
            SpeedClass::Transit => 1,
            SpeedClass::Slow => 2,
        }
    }
}

/// A waypoint along a coverage path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub position: Point2D,
    /// Desired heading when leaving this waypoint (radians).
    pub heading: f32,
    pub speed: SpeedClass,
    /// Blade state while driving to this waypoint.
    pub blade: bool,
}

impl Waypoint {
    pub fn new(position: Point2D, heading: f32, speed: SpeedClass, blade: bool) -> Self {
        Self {
            position,
            heading,
            speed,
            blade,
        }
    }

    #[inline]
    pub fn is_mowing(&self) -> bool {
        self.blade
    }
}

/// Ordered waypoints covering one zone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub zone_id: u32,
    /// Pattern actually used (adaptive resolved to a concrete one).
    pub pattern: CoveragePattern,
    pub waypoints: Vec<Waypoint>,
    /// CRC-32 over the waypoint contents.
    pub checksum: u32,
}

impl Path {
    /// Create a path and compute its checksum.
    pub fn new(zone_id: u32, pattern: CoveragePattern, waypoints: Vec<Waypoint>) -> Self {
        let checksum = Self::compute_checksum(&waypoints);
        Self {
            zone_id,
            pattern,
            waypoints,
            checksum,
        }
    }

    /// CRC-32 over the little-endian bytes of every waypoint.
    pub fn compute_checksum(waypoints: &[Waypoint]) -> u32 {
        let mut bytes = Vec::with_capacity(waypoints.len() * 14);
        for wp in waypoints {
            bytes.extend_from_slice(&wp.position.x.to_le_bytes());
            bytes.extend_from_slice(&wp.position.y.to_le_bytes());
            bytes.extend_from_slice(&wp.heading.to_le_bytes());
            bytes.push(wp.speed.code());
            bytes.push(u8::from(wp.blade));
        }
        crc32(&bytes)
    }

    /// True when the stored checksum matches the waypoints.
    pub fn verify(&self) -> bool {
        Self::compute_checksum(&self.waypoints) == self.checksum
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Waypoint> {
        self.waypoints.get(index)
    }

    /// Index of the waypoint closest to `point`; ties go to the earlier one.
    pub fn nearest_index(&self, point: &Point2D) -> Option<usize> {
        self.waypoints
            .iter()
            .enumerate()
            .map(|(i, wp)| (i, wp.position.distance_squared(point)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(i, _)| i)
    }

    /// Length of blade-on legs in meters.
    pub fn mowing_length(&self) -> f32 {
        self.legs().filter(|(_, to)| to.blade).map(|(a, b)| a.position.distance(&b.position)).sum()
    }

    /// Length of blade-off legs in meters.
    pub fn transit_length(&self) -> f32 {
        self.legs().filter(|(_, to)| !to.blade).map(|(a, b)| a.position.distance(&b.position)).sum()
    }

    pub fn total_length(&self) -> f32 {
        self.legs().map(|(a, b)| a.position.distance(&b.position)).sum()
    }

    /// Consecutive waypoint pairs. A leg mows when its end waypoint does.
    pub fn legs(&self) -> impl Iterator<Item = (&Waypoint, &Waypoint)> + '_ {
        self.waypoints.iter().zip(self.waypoints.iter().skip(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_path() -> Path {
        Path::new(
            7,
            CoveragePattern::Parallel,
            vec![
                Waypoint::new(Point2D::new(0.0, 0.0), 0.0, SpeedClass::Transit, false),
                Waypoint::new(Point2D::new(4.0, 0.0), 0.0, SpeedClass::Mowing, true),
                Waypoint::new(Point2D::new(4.0, 1.0), 3.14, SpeedClass::Transit, false),
                Waypoint::new(Point2D::new(0.0, 1.0), 3.14, SpeedClass::Mowing, true),
            ],
        )
    }

    #[test]
    fn test_lengths() {
        let path = sample_path();
        assert_relative_eq!(path.mowing_length(), 8.0);
        assert_relative_eq!(path.transit_length(), 1.0);
        assert_relative_eq!(path.total_length(), 9.0);
    }

    #[test]
    fn test_checksum_detects_changes() {
        let path = sample_path();
        assert!(path.verify());
        assert_eq!(path.checksum, sample_path().checksum);

        let mut changed = path.clone();
        changed.waypoints[1].blade = false;
        assert!(!changed.verify());
    }

    #[test]
    fn test_nearest_index() {
        let path = sample_path();
        assert_eq!(path.nearest_index(&Point2D::new(3.6, 0.9)), Some(2));
        assert_eq!(Path::new(1, CoveragePattern::Parallel, vec![]).nearest_index(&Point2D::new(0.0, 0.0)), None);
    }
}
