//! Operator-defined mowing zones.
//!
//! A zone is a simple polygon plus its mowing settings. Zones are loaded
//! from JSON and validated before anything plans over them.

use serde::{Deserialize, Serialize};

use crate::algorithms::coverage::{CoveragePattern, Obstacle};
use crate::core::geometry::Polygon;
use crate::core::types::Point2D;
use crate::error::PlanningFailure;

/// Obstacle ids above this mark restricted areas derived from zones.
const ZONE_OBSTACLE_ID_BASE: u64 = 1 << 32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Zone {
    pub id: u32,
    pub name: String,
    pub boundary: Polygon,
    /// Areas inside the zone that are never mown.
    pub no_mow_areas: Vec<Polygon>,
    /// Clearance kept from obstacles (meters).
    pub obstacle_buffer_m: f32,
    pub pattern: CoveragePattern,
    /// Sweep direction in degrees (0 = +x, 90 = +y).
    pub direction_deg: f32,
    /// Falls back to the planner default when unset.
    pub overlap_percent: Option<f32>,
    pub cutting_height_mm: u16,
    /// Higher runs first and wins overlaps.
    pub priority: i32,
    #[serde(alias = "enabled")]
    pub active: bool,
    /// Fraction of the maximum linear speed while cutting.
    pub mowing_speed: f32,
}

impl Default for Zone {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            boundary: Polygon::default(),
            no_mow_areas: Vec::new(),
            obstacle_buffer_m: 0.2,
            pattern: CoveragePattern::Parallel,
            direction_deg: 0.0,
            overlap_percent: None,
            cutting_height_mm: 35,
            priority: 1,
            active: true,
            mowing_speed: 0.5,
        }
    }
}

impl Zone {
    pub fn new(id: u32, name: impl Into<String>, boundary: Polygon) -> Self {
        Self {
            id,
            name: name.into(),
            boundary,
            ..Default::default()
        }
    }

    #[inline]
    pub fn direction_rad(&self) -> f32 {
        self.direction_deg.to_radians()
    }

    pub fn area(&self) -> f32 {
        self.boundary.area()
    }

    /// Reject outlines the planner cannot sweep.
    pub fn validate(&self) -> Result<(), PlanningFailure> {
        let invalid = |msg: String| Err(PlanningFailure::InvalidZone(msg));

        if self.boundary.len() < 3 {
            return invalid(format!("boundary has {} vertices", self.boundary.len()));
        }
        if !self.boundary.points().iter().all(Point2D::is_finite) {
            return invalid("boundary has non-finite vertices".into());
        }
        if self.boundary.area() < 1e-6 {
            return invalid("boundary has zero area".into());
        }
        if !self.boundary.is_simple() {
            return invalid("boundary is self-intersecting".into());
        }
        if let Some(overlap) = self.overlap_percent
            && !(0.0..100.0).contains(&overlap)
        {
            return invalid(format!("overlap {}% outside [0, 100)", overlap));
        }
        if self.obstacle_buffer_m.is_nan() || self.obstacle_buffer_m < 0.0 {
            return invalid("negative obstacle buffer".into());
        }
        if !self.direction_deg.is_finite() {
            return invalid("non-finite direction".into());
        }
        for (i, area) in self.no_mow_areas.iter().enumerate() {
            if area.len() < 3 || !area.points().iter().all(Point2D::is_finite) {
                return invalid(format!("no-mow area {} is not a polygon", i));
            }
        }
        Ok(())
    }

    /// Whether this zone takes precedence over `other` where they overlap.
    pub fn outranks(&self, other: &Zone) -> bool {
        self.priority > other.priority || (self.priority == other.priority && self.id < other.id)
    }

    /// True when the interiors intersect; shared edges do not count.
    pub fn overlaps(&self, other: &Zone) -> bool {
        let (Some(a), Some(b)) = (self.boundary.bounds(), other.boundary.bounds()) else {
            return false;
        };
        if !a.intersects(&b) {
            return false;
        }
        strictly_enters(&self.boundary, &other.boundary) || strictly_enters(&other.boundary, &self.boundary)
    }
}

/// Some point along `a`'s edges lies strictly inside `b`.
fn strictly_enters(a: &Polygon, b: &Polygon) -> bool {
    const SAMPLES: usize = 20;
    a.edges().any(|(p, q)| {
        (0..SAMPLES).any(|i| {
            let s = p.lerp(&q, i as f32 / SAMPLES as f32);
            b.contains(&s) && b.distance_to_boundary(&s) > 1e-3
        })
    })
}

/// All zones known to the robot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoneSet {
    pub zones: Vec<Zone>,
    /// Zone being mown when the set was last saved.
    #[serde(default)]
    pub current_zone_id: Option<u32>,
}

impl ZoneSet {
    pub fn new(zones: Vec<Zone>) -> Self {
        Self {
            zones,
            current_zone_id: None,
        }
    }

    pub fn get(&self, id: u32) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id == id)
    }

    /// Insert or replace by id.
    pub fn upsert(&mut self, zone: Zone) {
        match self.zones.iter_mut().find(|z| z.id == zone.id) {
            Some(existing) => *existing = zone,
            None => self.zones.push(zone),
        }
    }

    pub fn remove(&mut self, id: u32) -> Option<Zone> {
        let idx = self.zones.iter().position(|z| z.id == id)?;
        if self.current_zone_id == Some(id) {
            self.current_zone_id = None;
        }
        Some(self.zones.remove(idx))
    }

    pub fn next_id(&self) -> u32 {
        self.zones.iter().map(|z| z.id + 1).max().unwrap_or(1)
    }

    /// Every zone validated; duplicate ids are rejected too.
    pub fn validate(&self) -> Result<(), PlanningFailure> {
        for (i, zone) in self.zones.iter().enumerate() {
            if self.zones[..i].iter().any(|z| z.id == zone.id) {
                return Err(PlanningFailure::InvalidZone(format!("duplicate zone id {}", zone.id)));
            }
            zone.validate()
                .map_err(|e| PlanningFailure::InvalidZone(format!("zone {}: {}", zone.id, e)))?;
        }
        Ok(())
    }

    /// Active zones, highest priority first, then by id.
    pub fn execution_order(&self) -> Vec<&Zone> {
        let mut zones: Vec<&Zone> = self.zones.iter().filter(|z| z.active).collect();
        zones.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        zones
    }

    /// Overlapping active zones that outrank `zone`, as restricted
    /// obstacles for its plan.
    pub fn restricted_overlaps(&self, zone: &Zone) -> Vec<Obstacle> {
        self.zones
            .iter()
            .filter(|z| z.active && z.id != zone.id && z.outranks(zone) && z.overlaps(zone))
            .map(|z| Obstacle::restricted(ZONE_OBSTACLE_ID_BASE + z.id as u64, z.boundary.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(id: u32, x: f32, priority: i32) -> Zone {
        Zone {
            priority,
            ..Zone::new(id, format!("zone-{}", id), Polygon::rectangle(x, 0.0, x + 10.0, 10.0))
        }
    }

    #[test]
    fn test_validation() {
        assert!(square(1, 0.0, 1).validate().is_ok());

        let triangle_less = Zone::new(2, "line", Polygon::new(vec![Point2D::new(0.0, 0.0), Point2D::new(1.0, 0.0)]));
        assert!(matches!(triangle_less.validate(), Err(PlanningFailure::InvalidZone(_))));

        let bowtie = Zone::new(
            3,
            "bowtie",
            Polygon::new(vec![
                Point2D::new(0.0, 0.0),
                Point2D::new(4.0, 4.0),
                Point2D::new(4.0, 0.0),
                Point2D::new(0.0, 4.0),
            ]),
        );
        assert!(bowtie.validate().is_err());

        let flat = Zone::new(
            4,
            "flat",
            Polygon::new(vec![Point2D::new(0.0, 0.0), Point2D::new(1.0, 0.0), Point2D::new(2.0, 0.0)]),
        );
        assert!(flat.validate().is_err());
    }

    #[test]
    fn test_execution_order() {
        let low = square(1, 0.0, 1);
        let high = square(2, 20.0, 5);
        let tie = square(3, 40.0, 5);
        let mut off = square(4, 60.0, 9);
        off.active = false;

        let set = ZoneSet::new(vec![low, tie, off, high]);
        let order: Vec<u32> = set.execution_order().iter().map(|z| z.id).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn test_restricted_overlaps() {
        let low = square(1, 0.0, 1);
        let high = square(2, 5.0, 3);
        let adjacent = square(3, 10.0, 9);
        let set = ZoneSet::new(vec![low.clone(), high.clone(), adjacent]);

        let restricted = set.restricted_overlaps(&low);
        assert_eq!(restricted.len(), 1);
        assert_eq!(restricted[0].id, ZONE_OBSTACLE_ID_BASE + 2);

        // The higher-priority zone keeps the overlap
        assert!(set.restricted_overlaps(&high).iter().all(|o| o.id != ZONE_OBSTACLE_ID_BASE + 1));
    }

    #[test]
    fn test_json_accepts_enabled_alias() {
        let json = r#"{"id": 7, "name": "back", "enabled": false,
            "boundary": [{"x": 0, "y": 0}, {"x": 5, "y": 0}, {"x": 5, "y": 5}]}"#;
        let zone: Zone = serde_json::from_str(json).unwrap();
        assert_eq!(zone.id, 7);
        assert!(!zone.active);
        assert_eq!(zone.cutting_height_mm, 35);
        assert_eq!(zone.overlap_percent, None);
    }
}
