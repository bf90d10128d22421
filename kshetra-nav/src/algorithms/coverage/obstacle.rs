//! Obstacles handed to the coverage planner.

use serde::{Deserialize, Serialize};

use crate::algorithms::mapping::MapView;
use crate::core::geometry::{Bounds, Polygon};
use crate::core::types::Point2D;
use crate::navigation::zone::Zone;

/// Ids of obstacles built from occupied map cells.
pub const MAP_OBSTACLE_ID_BASE: u64 = 1 << 48;

/// Obstacle category as reported by perception or the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleKind {
    #[default]
    Unknown,
    Static,
    /// Moving objects; handled by avoidance, not planning.
    Dynamic,
    Temporary,
    /// Operator no-go areas; never filtered by confidence.
    Restricted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObstacleShape {
    Circle { center: Point2D, radius: f32 },
    Polygon { boundary: Polygon },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: u64,
    pub kind: ObstacleKind,
    pub shape: ObstacleShape,
    /// Detection confidence (0-1).
    #[serde(default = "full_confidence")]
    pub confidence: f32,
}

fn full_confidence() -> f32 {
    1.0
}

impl Obstacle {
    pub fn circle(id: u64, kind: ObstacleKind, center: Point2D, radius: f32, confidence: f32) -> Self {
        Self {
            id,
            kind,
            shape: ObstacleShape::Circle { center, radius },
            confidence,
        }
    }

    pub fn polygon(id: u64, kind: ObstacleKind, boundary: Polygon, confidence: f32) -> Self {
        Self {
            id,
            kind,
            shape: ObstacleShape::Polygon { boundary },
            confidence,
        }
    }

    /// Restricted area with full confidence.
    pub fn restricted(id: u64, boundary: Polygon) -> Self {
        Self::polygon(id, ObstacleKind::Restricted, boundary, 1.0)
    }

    /// Whether the planner must keep clear of this obstacle.
    pub fn is_relevant(&self, confidence_floor: f32) -> bool {
        match self.kind {
            ObstacleKind::Restricted => true,
            ObstacleKind::Dynamic => false,
            _ => self.confidence >= confidence_floor && self.shape_is_valid(),
        }
    }

    fn shape_is_valid(&self) -> bool {
        match &self.shape {
            ObstacleShape::Circle { center, radius } => center.is_finite() && radius.is_finite() && *radius >= 0.0,
            ObstacleShape::Polygon { boundary } => {
                !boundary.is_empty() && boundary.points().iter().all(Point2D::is_finite)
            }
        }
    }

    pub fn bounds(&self) -> Option<Bounds> {
        match &self.shape {
            ObstacleShape::Circle { center, radius } => Some(Bounds::new(
                center.x - radius,
                center.y - radius,
                center.x + radius,
                center.y + radius,
            )),
            ObstacleShape::Polygon { boundary } => boundary.bounds(),
        }
    }

    /// Convex polygon containing every point within `margin` of the
    /// obstacle.
    ///
    /// Each vertex (or the circle center) is surrounded by a polygon
    /// circumscribing a circle of the grown radius, and the hull of those
    /// points is taken. Concave obstacles are over-approximated.
    pub fn buffered(&self, margin: f32, segments: usize) -> Polygon {
        let n = segments.max(6);
        // Circumscribed, so the true disc stays inside every chord
        let grow = |r: f32| r / (std::f32::consts::PI / n as f32).cos();

        let mut points = Vec::new();
        match &self.shape {
            ObstacleShape::Circle { center, radius } => {
                points.extend(Polygon::circle(*center, grow(radius + margin), n).points().iter().copied());
            }
            ObstacleShape::Polygon { boundary } => {
                let r = grow(margin.max(1e-3));
                for v in boundary.points() {
                    points.extend(Polygon::circle(*v, r, n).points().iter().copied());
                }
            }
        }
        Polygon::new(points).convex_hull()
    }
}

/// Occupied map cells around `zone` as static obstacles, each row run
/// grown by `margin` so mowing keeps at least that much from every cell.
pub fn mapped_obstacles(map: &MapView, zone: &Zone, margin: f32) -> Vec<Obstacle> {
    let reach = zone.obstacle_buffer_m + margin + map.grid().resolution();
    let Some(area) = zone.boundary.bounds().map(|b| b.expanded(reach)) else {
        return Vec::new();
    };
    let obstacles: Vec<Obstacle> = map
        .occupied_runs(&area)
        .iter()
        .filter_map(Polygon::bounds)
        .enumerate()
        .map(|(i, b)| {
            let cells = Polygon::rectangle(b.min_x - margin, b.min_y - margin, b.max_x + margin, b.max_y + margin);
            Obstacle::polygon(MAP_OBSTACLE_ID_BASE + i as u64, ObstacleKind::Static, cells, 1.0)
        })
        .collect();
    if !obstacles.is_empty() {
        log::debug!("Zone {}: {} mapped obstacle runs", zone.id, obstacles.len());
    }
    obstacles
}
