//! Coverage pattern selection.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::core::geometry::Polygon;

/// How a zone's interior is swept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum CoveragePattern {
    /// Boustrophedon lines along the zone direction.
    #[default]
    Parallel,
    /// Boustrophedon perpendicular to the longest bounding-box side.
    Zigzag,
    /// Inward contour rings, innermost area filled.
    Spiral,
    /// Perimeter rings, then a parallel fill of the inner polygon.
    PerimeterFirst,
    /// Parallel pass followed by a perpendicular pass.
    Grid,
    /// Seeded random points in nearest-neighbour order.
    Random,
    /// Chosen from the zone shape.
    Adaptive,
}

impl CoveragePattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoveragePattern::Parallel => "parallel",
            CoveragePattern::Zigzag => "zigzag",
            CoveragePattern::Spiral => "spiral",
            CoveragePattern::PerimeterFirst => "perimeter_first",
            CoveragePattern::Grid => "grid",
            CoveragePattern::Random => "random",
            CoveragePattern::Adaptive => "adaptive",
        }
    }
}

/// A concrete pattern with its sweep direction (radians).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedPattern {
    pub pattern: CoveragePattern,
    pub direction: f32,
}

const CONVEX_THRESHOLD: f32 = 0.9;
const CIRCULAR_VARIATION: f32 = 0.2;
/// Isoperimetric quotient above which a ring counts as round (square 0.785).
const CIRCULAR_COMPACTNESS: f32 = 0.85;
const ELONGATED_ASPECT: f32 = 2.0;

/// Replace `Zigzag` and `Adaptive` by what they mean for this boundary.
pub fn resolve(pattern: CoveragePattern, boundary: &Polygon, direction: f32) -> ResolvedPattern {
    match pattern {
        CoveragePattern::Zigzag => ResolvedPattern {
            pattern,
            direction: zigzag_direction(boundary),
        },
        CoveragePattern::Adaptive => adaptive(boundary, direction),
        _ => ResolvedPattern { pattern, direction },
    }
}

/// Lines perpendicular to the longest bounding-box side.
fn zigzag_direction(boundary: &Polygon) -> f32 {
    match boundary.bounds() {
        Some(b) if b.width() < b.height() => 0.0,
        Some(_) => std::f32::consts::FRAC_PI_2,
        None => 0.0,
    }
}

fn adaptive(boundary: &Polygon, direction: f32) -> ResolvedPattern {
    if boundary.convexity() < CONVEX_THRESHOLD {
        return ResolvedPattern {
            pattern: CoveragePattern::PerimeterFirst,
            direction,
        };
    }
    if is_roughly_circular(boundary) {
        return ResolvedPattern {
            pattern: CoveragePattern::Spiral,
            direction,
        };
    }

    let (aspect, long_axis) = aspect_along_longest_edge(boundary);
    let direction = if aspect > ELONGATED_ASPECT { long_axis } else { direction };
    ResolvedPattern {
        pattern: CoveragePattern::Parallel,
        direction,
    }
}

/// Vertices evenly spread around the centroid and a compact outline.
///
/// Regular polygons pass the radial test alone, so compactness rules out
/// squares and rectangles.
fn is_roughly_circular(boundary: &Polygon) -> bool {
    let perimeter = boundary.perimeter();
    if perimeter < 1e-6 {
        return false;
    }
    let compactness = 4.0 * std::f32::consts::PI * boundary.area() / (perimeter * perimeter);
    boundary.radial_variation() < CIRCULAR_VARIATION && compactness > CIRCULAR_COMPACTNESS
}

/// Extent ratio in the frame of the longest edge, and the long axis angle.
fn aspect_along_longest_edge(boundary: &Polygon) -> (f32, f32) {
    let angle = boundary.longest_edge_angle();
    let Some(b) = boundary.rotated(-angle).bounds() else {
        return (1.0, angle);
    };
    let (along, across) = (b.width(), b.height());
    if along.min(across) < 1e-6 {
        return (f32::INFINITY, angle);
    }
    if along >= across {
        (along / across, angle)
    } else {
        (across / along, angle + std::f32::consts::FRAC_PI_2)
    }
}
