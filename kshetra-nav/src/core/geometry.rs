//! Polygon and segment helpers for zones, obstacles and coverage planning.
//!
//! Polygons are stored as an open vertex ring (the closing edge from the
//! last vertex back to the first is implicit).

use serde::{Deserialize, Serialize};

use super::types::Point2D;

const EPS: f32 = 1e-6;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl Bounds {
    pub const fn new(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Bounding box of a point set, `None` when empty.
    pub fn from_points(points: &[Point2D]) -> Option<Self> {
        let first = points.first()?;
        let mut b = Bounds {
            min_x: first.x,
            min_y: first.y,
            max_x: first.x,
            max_y: first.y,
        };
        for p in &points[1..] {
            b.min_x = b.min_x.min(p.x);
            b.min_y = b.min_y.min(p.y);
            b.max_x = b.max_x.max(p.x);
            b.max_y = b.max_y.max(p.y);
        }
        Some(b)
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }

    #[inline]
    pub fn contains(&self, p: &Point2D) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }

    /// Grow by `margin` on every side.
    pub fn expanded(&self, margin: f32) -> Self {
        Bounds {
            min_x: self.min_x - margin,
            min_y: self.min_y - margin,
            max_x: self.max_x + margin,
            max_y: self.max_y + margin,
        }
    }

    pub fn union(&self, other: &Bounds) -> Self {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn intersects(&self, other: &Bounds) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }
}

/// Simple polygon in the local metric frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Polygon {
    points: Vec<Point2D>,
}

impl Polygon {
    /// Create a polygon; a duplicated closing vertex is dropped.
    pub fn new(mut points: Vec<Point2D>) -> Self {
        if points.len() > 1 {
            let first = points[0];
            if let Some(last) = points.last()
                && last.distance_squared(&first) < EPS * EPS
            {
                points.pop();
            }
        }
        Self { points }
    }

    /// Axis-aligned rectangle, counter-clockwise.
    pub fn rectangle(min_x: f32, min_y: f32, max_x: f32, max_y: f32) -> Self {
        Self::new(vec![
            Point2D::new(min_x, min_y),
            Point2D::new(max_x, min_y),
            Point2D::new(max_x, max_y),
            Point2D::new(min_x, max_y),
        ])
    }

    /// Regular polygon approximating a circle.
    pub fn circle(center: Point2D, radius: f32, segments: usize) -> Self {
        let n = segments.max(3);
        let points = (0..n)
            .map(|i| {
                let a = i as f32 / n as f32 * std::f32::consts::TAU;
                Point2D::new(center.x + radius * a.cos(), center.y + radius * a.sin())
            })
            .collect();
        Self::new(points)
    }

    #[inline]
    pub fn points(&self) -> &[Point2D] {
        &self.points
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Iterate edges (a, b) including the closing edge.
    pub fn edges(&self) -> impl Iterator<Item = (Point2D, Point2D)> + '_ {
        let n = self.points.len();
        (0..n).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }

    /// Shoelace area, positive for counter-clockwise rings.
    pub fn signed_area(&self) -> f32 {
        if self.points.len() < 3 {
            return 0.0;
        }
        0.5 * self.edges().map(|(a, b)| a.cross(&b)).sum::<f32>()
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.signed_area().abs()
    }

    pub fn perimeter(&self) -> f32 {
        self.edges().map(|(a, b)| a.distance(&b)).sum()
    }

    /// Same polygon with counter-clockwise winding.
    pub fn to_ccw(&self) -> Polygon {
        if self.signed_area() < 0.0 {
            let mut pts = self.points.clone();
            pts.reverse();
            Polygon { points: pts }
        } else {
            self.clone()
        }
    }

    /// Area centroid; falls back to the vertex mean for degenerate rings.
    pub fn centroid(&self) -> Point2D {
        let a = self.signed_area();
        if a.abs() < EPS {
            let n = self.points.len().max(1) as f32;
            let sx: f32 = self.points.iter().map(|p| p.x).sum();
            let sy: f32 = self.points.iter().map(|p| p.y).sum();
            return Point2D::new(sx / n, sy / n);
        }
        let (mut cx, mut cy) = (0.0, 0.0);
        for (p, q) in self.edges() {
            let c = p.cross(&q);
            cx += (p.x + q.x) * c;
            cy += (p.y + q.y) * c;
        }
        Point2D::new(cx / (6.0 * a), cy / (6.0 * a))
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(&self.points)
    }

    /// Even-odd point containment.
    pub fn contains(&self, p: &Point2D) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = n - 1;
        for i in 0..n {
            let pi = self.points[i];
            let pj = self.points[j];
            if (pi.y > p.y) != (pj.y > p.y) {
                let x_cross = (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x;
                if p.x < x_cross {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }

    /// Distance from `p` to the nearest boundary edge.
    pub fn distance_to_boundary(&self, p: &Point2D) -> f32 {
        self.edges()
            .map(|(a, b)| point_segment_distance(p, &a, &b))
            .fold(f32::INFINITY, f32::min)
    }

    /// True when no two non-adjacent edges intersect.
    pub fn is_simple(&self) -> bool {
        let n = self.points.len();
        if n < 3 {
            return false;
        }
        let edges: Vec<(Point2D, Point2D)> = self.edges().collect();
        for i in 0..n {
            for j in (i + 1)..n {
                let adjacent = j == i + 1 || (i == 0 && j == n - 1);
                if adjacent {
                    continue;
                }
                if segments_intersect(&edges[i].0, &edges[i].1, &edges[j].0, &edges[j].1) {
                    return false;
                }
            }
        }
        true
    }

    /// Convex hull (Andrew's monotone chain), counter-clockwise.
    pub fn convex_hull(&self) -> Polygon {
        let mut pts = self.points.clone();
        if pts.len() < 3 {
            return Polygon { points: pts };
        }
        pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));

        let mut lower: Vec<Point2D> = Vec::new();
        for p in &pts {
            while lower.len() >= 2 {
                let l = lower.len();
                if lower[l - 1].sub(&lower[l - 2]).cross(&p.sub(&lower[l - 2])) <= 0.0 {
                    lower.pop();
                } else {
                    break;
                }
            }
            lower.push(*p);
        }
        let mut upper: Vec<Point2D> = Vec::new();
        for p in pts.iter().rev() {
            while upper.len() >= 2 {
                let l = upper.len();
                if upper[l - 1].sub(&upper[l - 2]).cross(&p.sub(&upper[l - 2])) <= 0.0 {
                    upper.pop();
                } else {
                    break;
                }
            }
            upper.push(*p);
        }
        lower.pop();
        upper.pop();
        lower.extend(upper);
        Polygon { points: lower }
    }

    /// Area / hull area; 1.0 for convex rings.
    pub fn convexity(&self) -> f32 {
        let hull = self.convex_hull().area();
        if hull < EPS { 0.0 } else { self.area() / hull }
    }

    /// Coefficient of variation of vertex distances from the centroid.
    ///
    /// Small values mean the ring is close to a circle.
    pub fn radial_variation(&self) -> f32 {
        let c = self.centroid();
        let d: Vec<f32> = self.points.iter().map(|p| p.distance(&c)).collect();
        let n = d.len().max(1) as f32;
        let mean = d.iter().sum::<f32>() / n;
        if mean < EPS {
            return f32::INFINITY;
        }
        let var = d.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
        var.sqrt() / mean
    }

    /// Direction (radians) of the longest edge.
    pub fn longest_edge_angle(&self) -> f32 {
        self.edges()
            .max_by(|(a1, b1), (a2, b2)| a1.distance_squared(b1).total_cmp(&a2.distance_squared(b2)))
            .map(|(a, b)| a.heading_to(&b))
            .unwrap_or(0.0)
    }

    /// Rotate every vertex about the origin.
    pub fn rotated(&self, angle: f32) -> Polygon {
        Polygon {
            points: self.points.iter().map(|p| p.rotate(angle)).collect(),
        }
    }

    /// Inward offset by `distance` with mitred corners.
    ///
    /// Edges that shrink away are dropped and their neighbours extended.
    /// Returns `None` once the ring collapses or self-intersects.
    pub fn offset_inward(&self, distance: f32) -> Option<Polygon> {
        let ring = self.to_ccw();
        let n = ring.points.len();
        if n < 3 {
            return None;
        }
        if distance <= 0.0 {
            return Some(ring);
        }

        // Offset line for each edge i (from vertex i to i+1): point + direction
        let mut lines = Vec::with_capacity(n);
        for (a, b) in ring.edges() {
            let d = b.sub(&a);
            let len = d.norm();
            if len < EPS {
                return None;
            }
            let dir = d.scale(1.0 / len);
            let normal = Point2D::new(-dir.y, dir.x);
            lines.push((a.add(&normal.scale(distance)), dir));
        }

        let mut active: Vec<usize> = (0..n).collect();
        let mut dropped: Vec<usize> = Vec::new();
        let result = loop {
            let m = active.len();
            if m < 3 {
                return None;
            }
            let out: Vec<Point2D> = (0..m)
                .map(|k| {
                    let (p0, d0) = lines[active[(k + m - 1) % m]];
                    let (p1, d1) = lines[active[k]];
                    let denom = d0.cross(&d1);
                    if denom.abs() < 1e-6 {
                        p1
                    } else {
                        let t = p1.sub(&p0).cross(&d1) / denom;
                        p0.add(&d0.scale(t))
                    }
                })
                .collect();

            // A flipped edge has vanished at this offset
            let flipped = (0..m).find(|&k| out[(k + 1) % m].sub(&out[k]).dot(&lines[active[k]].1) <= EPS);
            match flipped {
                Some(k) => dropped.push(active.remove(k)),
                None => break Polygon { points: out },
            }
        };

        // Dropped edges still bound the interior; a vertex past one means collapse
        for &i in &dropped {
            let (p, dir) = lines[i];
            if result.points.iter().any(|v| dir.cross(&v.sub(&p)) < -1e-3) {
                return None;
            }
        }
        if result.signed_area() <= EPS || result.area() >= ring.area() || !result.is_simple() {
            return None;
        }
        Some(result)
    }

    /// Sorted x-intervals where the horizontal line at `y` is inside.
    pub fn scanline_intervals(&self, y: f32) -> Vec<(f32, f32)> {
        let mut xs: Vec<f32> = Vec::new();
        for (a, b) in self.edges() {
            // Half-open rule avoids double counting shared vertices
            if (a.y <= y && b.y > y) || (b.y <= y && a.y > y) {
                let t = (y - a.y) / (b.y - a.y);
                xs.push(a.x + t * (b.x - a.x));
            }
        }
        xs.sort_by(f32::total_cmp);
        xs.chunks_exact(2)
            .filter(|c| c[1] - c[0] > EPS)
            .map(|c| (c[0], c[1]))
            .collect()
    }

    /// True when segment `a`-`b` touches or crosses any boundary edge.
    pub fn segment_crosses_boundary(&self, a: &Point2D, b: &Point2D) -> bool {
        self.edges()
            .any(|(p, q)| segments_intersect(a, b, &p, &q))
    }
}

/// Closed-segment intersection test (touching counts).
pub fn segments_intersect(p1: &Point2D, p2: &Point2D, q1: &Point2D, q2: &Point2D) -> bool {
    let d1 = orientation(q1, q2, p1);
    let d2 = orientation(q1, q2, p2);
    let d3 = orientation(p1, p2, q1);
    let d4 = orientation(p1, p2, q2);

    if ((d1 > EPS && d2 < -EPS) || (d1 < -EPS && d2 > EPS))
        && ((d3 > EPS && d4 < -EPS) || (d3 < -EPS && d4 > EPS))
    {
        return true;
    }

    (d1.abs() <= EPS && on_segment(q1, q2, p1))
        || (d2.abs() <= EPS && on_segment(q1, q2, p2))
        || (d3.abs() <= EPS && on_segment(p1, p2, q1))
        || (d4.abs() <= EPS && on_segment(p1, p2, q2))
}

#[inline]
fn orientation(a: &Point2D, b: &Point2D, c: &Point2D) -> f32 {
    b.sub(a).cross(&c.sub(a))
}

#[inline]
fn on_segment(a: &Point2D, b: &Point2D, p: &Point2D) -> bool {
    p.x >= a.x.min(b.x) - EPS
        && p.x <= a.x.max(b.x) + EPS
        && p.y >= a.y.min(b.y) - EPS
        && p.y <= a.y.max(b.y) + EPS
}

/// Euclidean distance from `p` to segment `a`-`b`.
pub fn point_segment_distance(p: &Point2D, a: &Point2D, b: &Point2D) -> f32 {
    let ab = b.sub(a);
    let len_sq = ab.dot(&ab);
    if len_sq < EPS * EPS {
        return p.distance(a);
    }
    let t = (p.sub(a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    p.distance(&a.add(&ab.scale(t)))
}

/// Sort and merge overlapping intervals.
pub fn merge_intervals(mut intervals: Vec<(f32, f32)>) -> Vec<(f32, f32)> {
    intervals.retain(|(a, b)| b > a);
    intervals.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut merged: Vec<(f32, f32)> = Vec::with_capacity(intervals.len());
    for (a, b) in intervals {
        match merged.last_mut() {
            Some(last) if a <= last.1 => last.1 = last.1.max(b),
            _ => merged.push((a, b)),
        }
    }
    merged
}

/// `base` minus the union of `holes`; both sorted and merged.
pub fn subtract_intervals(base: (f32, f32), holes: &[(f32, f32)]) -> Vec<(f32, f32)> {
    let mut out = Vec::new();
    let mut start = base.0;
    for &(a, b) in holes {
        if b <= start || a >= base.1 {
            continue;
        }
        if a > start {
            out.push((start, a.min(base.1)));
        }
        start = start.max(b);
        if start >= base.1 {
            break;
        }
    }
    if start < base.1 {
        out.push((start, base.1));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn square() -> Polygon {
        Polygon::rectangle(0.0, 0.0, 10.0, 10.0)
    }

    #[test]
    fn test_area_and_orientation() {
        let sq = square();
        assert_relative_eq!(sq.signed_area(), 100.0);
        let mut cw = sq.points().to_vec();
        cw.reverse();
        let cw = Polygon::new(cw);
        assert_relative_eq!(cw.signed_area(), -100.0);
        assert_relative_eq!(cw.to_ccw().signed_area(), 100.0);
    }

    #[test]
    fn test_closing_vertex_dropped() {
        let p = Polygon::new(vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(1.0, 0.0),
            Point2D::new(1.0, 1.0),
            Point2D::new(0.0, 0.0),
        ]);
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn test_contains_and_centroid() {
        let sq = square();
        assert!(sq.contains(&Point2D::new(5.0, 5.0)));
        assert!(!sq.contains(&Point2D::new(-1.0, 5.0)));
        let c = sq.centroid();
        assert_relative_eq!(c.x, 5.0, epsilon = 1e-5);
        assert_relative_eq!(c.y, 5.0, epsilon = 1e-5);
    }

    #[test]
    fn test_is_simple_detects_bowtie() {
        assert!(square().is_simple());
        let bowtie = Polygon::new(vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(2.0, 2.0),
            Point2D::new(2.0, 0.0),
            Point2D::new(0.0, 2.0),
        ]);
        assert!(!bowtie.is_simple());
    }

    #[test]
    fn test_convexity_of_l_shape() {
        let l = Polygon::new(vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(4.0, 0.0),
            Point2D::new(4.0, 1.0),
            Point2D::new(1.0, 1.0),
            Point2D::new(1.0, 4.0),
            Point2D::new(0.0, 4.0),
        ]);
        assert_relative_eq!(square().convexity(), 1.0, epsilon = 1e-5);
        assert!(l.convexity() < 0.7);
    }

    #[test]
    fn test_offset_inward_square() {
        let inner = square().offset_inward(1.0).unwrap();
        assert_relative_eq!(inner.area(), 64.0, epsilon = 1e-3);
        let b = inner.bounds().unwrap();
        assert_relative_eq!(b.min_x, 1.0, epsilon = 1e-4);
        assert_relative_eq!(b.max_y, 9.0, epsilon = 1e-4);
    }

    #[test]
    fn test_offset_inward_drops_vanished_edge() {
        // Square with a short chamfer at the top right corner
        let chamfered = Polygon::new(vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(10.0, 0.0),
            Point2D::new(10.0, 9.0),
            Point2D::new(9.0, 10.0),
            Point2D::new(0.0, 10.0),
        ]);
        let inner = chamfered.offset_inward(2.0).unwrap();
        assert_eq!(inner.points.len(), 4);
        let b = inner.bounds().unwrap();
        assert_relative_eq!(b.max_x, 8.0, epsilon = 1e-3);
        assert_relative_eq!(b.max_y, 8.0, epsilon = 1e-3);
        assert_relative_eq!(inner.area(), 36.0, epsilon = 1e-2);
    }

    #[test]
    fn test_offset_inward_collapses() {
        assert!(square().offset_inward(5.5).is_none());
    }

    #[test]
    fn test_scanline_intervals_concave() {
        let u = Polygon::new(vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(3.0, 0.0),
            Point2D::new(3.0, 3.0),
            Point2D::new(2.0, 3.0),
            Point2D::new(2.0, 1.0),
            Point2D::new(1.0, 1.0),
            Point2D::new(1.0, 3.0),
            Point2D::new(0.0, 3.0),
        ]);
        let spans = u.scanline_intervals(2.0);
        assert_eq!(spans.len(), 2);
        assert_relative_eq!(spans[0].0, 0.0);
        assert_relative_eq!(spans[0].1, 1.0);
        assert_relative_eq!(spans[1].0, 2.0);
        assert_relative_eq!(spans[1].1, 3.0);
    }

    #[test]
    fn test_interval_merge_and_subtract() {
        let merged = merge_intervals(vec![(3.0, 4.0), (0.0, 1.0), (0.5, 2.0)]);
        assert_eq!(merged, vec![(0.0, 2.0), (3.0, 4.0)]);

        let free = subtract_intervals((0.0, 10.0), &merged);
        assert_eq!(free, vec![(2.0, 3.0), (4.0, 10.0)]);
    }

    #[test]
    fn test_point_segment_distance() {
        let a = Point2D::new(0.0, 0.0);
        let b = Point2D::new(10.0, 0.0);
        assert_relative_eq!(point_segment_distance(&Point2D::new(5.0, 3.0), &a, &b), 3.0);
        assert_relative_eq!(point_segment_distance(&Point2D::new(-3.0, 4.0), &a, &b), 5.0);
    }
}
