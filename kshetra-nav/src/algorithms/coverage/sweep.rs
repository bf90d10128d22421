//! Geometry generators: boustrophedon lines, contour rings and smoothing.
//!
//! Every generator returns sub-paths as open polylines in the world frame.
//! Lines are produced in a frame rotated so the sweep direction is +x,
//! then rotated back.

use crate::core::geometry::{Polygon, merge_intervals, subtract_intervals};
use crate::core::types::Point2D;
use crate::error::PlanningFailure;

use super::planner::PlanBudget;

/// Runs shorter than this are dropped.
const MIN_RUN_M: f32 = 1e-3;
const LINE_EPS: f32 = 1e-4;

/// Mowable area: the zone boundary minus buffered obstacles.
#[derive(Debug, Clone)]
pub struct Region {
    pub boundary: Polygon,
    pub holes: Vec<Polygon>,
}

impl Region {
    pub fn new(boundary: Polygon, holes: Vec<Polygon>) -> Self {
        Self {
            boundary: boundary.to_ccw(),
            holes,
        }
    }

    pub fn contains(&self, p: &Point2D) -> bool {
        self.boundary.contains(p) && !self.in_hole(p)
    }

    pub fn in_hole(&self, p: &Point2D) -> bool {
        self.holes.iter().any(|h| h.contains(p))
    }

    /// Distance to the nearest buffered obstacle edge.
    pub fn hole_clearance(&self, p: &Point2D) -> f32 {
        self.holes
            .iter()
            .map(|h| h.distance_to_boundary(p))
            .fold(f32::INFINITY, f32::min)
    }

    fn rotated(&self, angle: f32) -> Region {
        Region {
            boundary: self.boundary.rotated(angle),
            holes: self.holes.iter().map(|h| h.rotated(angle)).collect(),
        }
    }

    /// Same obstacles inside a different outline.
    pub fn with_boundary(&self, boundary: Polygon) -> Region {
        Region::new(boundary, self.holes.clone())
    }
}

/// Offsets of the sweep lines across `[min, max]`.
///
/// The first line sits `width / 2` inside `min`, lines follow every
/// `spacing`, and a final line at `max - width / 2` is added when the
/// regular spacing stops short of it. A strip narrower than the width gets
/// one centered line.
pub fn line_offsets(min: f32, max: f32, width: f32, spacing: f32) -> Vec<f32> {
    let half = width / 2.0;
    let first = min + half;
    let last = max - half;
    if last <= first {
        return vec![(min + max) / 2.0];
    }

    let mut offsets = Vec::new();
    let mut k = 0usize;
    loop {
        let y = first + k as f32 * spacing;
        if y > last + LINE_EPS {
            break;
        }
        offsets.push(y);
        k += 1;
    }
    if let Some(&y) = offsets.last()
        && y < last - LINE_EPS
    {
        offsets.push(last);
    }
    offsets
}

/// Boustrophedon runs parallel to `direction` (radians), in generation
/// order: line by line, left to right within a line.
pub fn sweep_lines(
    region: &Region,
    direction: f32,
    width: f32,
    spacing: f32,
    budget: &PlanBudget,
) -> Result<Vec<Vec<Point2D>>, PlanningFailure> {
    let local = region.rotated(-direction);
    let Some(bounds) = local.boundary.bounds() else {
        return Ok(Vec::new());
    };
    let half = width / 2.0;

    let mut runs = Vec::new();
    for y in line_offsets(bounds.min_y, bounds.max_y, width, spacing) {
        budget.check()?;

        let blocked = merge_intervals(
            local
                .holes
                .iter()
                .flat_map(|h| h.scanline_intervals(y))
                .collect(),
        );
        for (a, b) in local.boundary.scanline_intervals(y) {
            let (a, b) = (a + half, b - half);
            if b - a < MIN_RUN_M {
                continue;
            }
            for (s, e) in subtract_intervals((a, b), &blocked) {
                if e - s >= MIN_RUN_M {
                    runs.push(vec![
                        Point2D::new(s, y).rotate(direction),
                        Point2D::new(e, y).rotate(direction),
                    ]);
                }
            }
        }
    }
    Ok(runs)
}

/// Untrimmed run through the centroid, for outlines thinner than the
/// working width.
pub fn center_line(region: &Region, direction: f32) -> Option<Vec<Point2D>> {
    let local = region.rotated(-direction);
    let c = local.boundary.centroid();
    let blocked = merge_intervals(local.holes.iter().flat_map(|h| h.scanline_intervals(c.y)).collect());
    local
        .boundary
        .scanline_intervals(c.y)
        .into_iter()
        .flat_map(|iv| subtract_intervals(iv, &blocked))
        .filter(|(a, b)| b - a >= MIN_RUN_M)
        .max_by(|x, y| (x.1 - x.0).total_cmp(&(y.1 - y.0)))
        .map(|(a, b)| {
            vec![
                Point2D::new(a, c.y).rotate(direction),
                Point2D::new(b, c.y).rotate(direction),
            ]
        })
}

/// Inward contour rings at `first`, `first + spacing`, ... until the
/// outline collapses or `max_rings` is reached.
pub fn contour_rings(
    boundary: &Polygon,
    first: f32,
    spacing: f32,
    max_rings: usize,
    budget: &PlanBudget,
) -> Result<Vec<Polygon>, PlanningFailure> {
    let mut rings = Vec::new();
    while rings.len() < max_rings {
        budget.check()?;
        let offset = first + rings.len() as f32 * spacing;
        match boundary.offset_inward(offset) {
            Some(ring) => rings.push(ring),
            None => break,
        }
    }
    Ok(rings)
}

/// Closed ring as polylines with the parts inside holes cut out.
pub fn ring_runs(ring: &Polygon, holes: &[Polygon]) -> Vec<Vec<Point2D>> {
    let mut runs: Vec<Vec<Point2D>> = Vec::new();
    let mut current: Vec<Point2D> = Vec::new();
    let mut broken = false;

    for (a, b) in ring.edges() {
        let pieces = clip_outside(&a, &b, holes);
        if pieces.is_empty() {
            broken = true;
            if current.len() >= 2 {
                runs.push(std::mem::take(&mut current));
            }
            current.clear();
            continue;
        }
        for (t0, t1) in pieces {
            let p0 = a.lerp(&b, t0);
            let p1 = a.lerp(&b, t1);
            if t0 > 1e-6 || current.is_empty() {
                if t0 > 1e-6 {
                    broken = true;
                }
                if current.len() >= 2 {
                    runs.push(std::mem::take(&mut current));
                }
                current.clear();
                current.push(p0);
            }
            current.push(p1);
            if t1 < 1.0 - 1e-6 {
                broken = true;
                if current.len() >= 2 {
                    runs.push(std::mem::take(&mut current));
                }
                current.clear();
            }
        }
    }
    if current.len() >= 2 {
        runs.push(current);
    }

    // A ring cut once wraps around: join the tail run onto the head
    if broken && runs.len() >= 2 {
        let first_start = runs[0][0];
        let tail_end = runs[runs.len() - 1][runs[runs.len() - 1].len() - 1];
        if first_start.distance_squared(&tail_end) < 1e-10
            && let Some(mut tail) = runs.pop()
        {
            tail.extend(runs[0].iter().skip(1).copied());
            runs[0] = tail;
        }
    }
    runs.retain(|r| polyline_length(r) >= MIN_RUN_M);
    runs
}

/// Parameter ranges of segment `a`-`b` lying outside every hole.
pub fn clip_outside(a: &Point2D, b: &Point2D, holes: &[Polygon]) -> Vec<(f32, f32)> {
    let mut ts = vec![0.0f32, 1.0];
    let d = b.sub(a);
    for hole in holes {
        for (p, q) in hole.edges() {
            let e = q.sub(&p);
            let denom = d.cross(&e);
            if denom.abs() < 1e-9 {
                continue;
            }
            let ap = p.sub(a);
            let t = ap.cross(&e) / denom;
            let u = ap.cross(&d) / denom;
            if (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u) {
                ts.push(t);
            }
        }
    }
    ts.sort_by(f32::total_cmp);
    ts.dedup_by(|x, y| (*x - *y).abs() < 1e-6);

    let mut out: Vec<(f32, f32)> = Vec::new();
    for w in ts.windows(2) {
        let (t0, t1) = (w[0], w[1]);
        if t1 - t0 < 1e-6 {
            continue;
        }
        let mid = a.lerp(b, (t0 + t1) / 2.0);
        if holes.iter().any(|h| h.contains(&mid)) {
            continue;
        }
        match out.last_mut() {
            Some(last) if (last.1 - t0).abs() < 1e-6 => last.1 = t1,
            _ => out.push((t0, t1)),
        }
    }
    out
}

pub fn polyline_length(points: &[Point2D]) -> f32 {
    points.windows(2).map(|w| w[0].distance(&w[1])).sum()
}

/// Drop points closer than `min_spacing` to the previous kept point, then
/// points where the polyline turns by less than `collinear_tol` radians.
/// Endpoints are always kept.
pub fn smooth(points: &[Point2D], min_spacing: f32, collinear_tol: f32) -> Vec<Point2D> {
    if points.len() <= 2 {
        return points.to_vec();
    }

    let mut spaced: Vec<Point2D> = vec![points[0]];
    for p in &points[1..points.len() - 1] {
        if let Some(last) = spaced.last()
            && last.distance(p) >= min_spacing
        {
            spaced.push(*p);
        }
    }
    let end = points[points.len() - 1];
    if spaced.len() > 1
        && let Some(last) = spaced.last()
        && last.distance(&end) < min_spacing
    {
        spaced.pop();
    }
    spaced.push(end);

    let mut out: Vec<Point2D> = vec![spaced[0]];
    for i in 1..spaced.len() - 1 {
        let Some(prev) = out.last().copied() else {
            continue;
        };
        let here = spaced[i];
        let next = spaced[i + 1];
        let turn = crate::core::math::angle_diff(prev.heading_to(&here), here.heading_to(&next)).abs();
        if turn >= collinear_tol {
            out.push(here);
        }
    }
    out.push(end);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_line_offsets_ten_meter_square() {
        let ys = line_offsets(0.0, 10.0, 1.0, 0.9);
        assert_eq!(ys.len(), 11);
        assert_relative_eq!(ys[0], 0.5, epsilon = 1e-5);
        assert_relative_eq!(ys[10], 9.5, epsilon = 1e-4);
        for w in ys.windows(2) {
            assert!(w[1] - w[0] <= 0.9 + 1e-4);
        }
    }

    #[test]
    fn test_line_offsets_adds_final_line() {
        let ys = line_offsets(0.0, 5.0, 1.0, 0.9);
        // 0.5, 1.4, 2.3, 3.2, 4.1, then 4.5
        assert_eq!(ys.len(), 6);
        assert_relative_eq!(ys[5], 4.5, epsilon = 1e-5);
    }

    #[test]
    fn test_line_offsets_narrow_strip() {
        assert_eq!(line_offsets(0.0, 0.6, 1.0, 0.9), vec![0.3]);
    }

    #[test]
    fn test_sweep_avoids_hole() {
        let region = Region::new(
            Polygon::rectangle(0.0, 0.0, 10.0, 4.0),
            vec![Polygon::rectangle(4.0, -1.0, 6.0, 5.0)],
        );
        let runs = sweep_lines(&region, 0.0, 1.0, 0.9, &PlanBudget::unlimited()).unwrap();
        assert!(!runs.is_empty());
        for run in &runs {
            for p in run {
                assert!(!(p.x > 4.0 + 1e-4 && p.x < 6.0 - 1e-4));
            }
        }
        // Every line is split in two
        assert_eq!(runs.len() % 2, 0);
    }

    #[test]
    fn test_contour_rings_stop_at_collapse() {
        let rings = contour_rings(&Polygon::rectangle(0.0, 0.0, 10.0, 10.0), 0.5, 0.9, 100, &PlanBudget::unlimited())
            .unwrap();
        // Offsets 0.5, 1.4, 2.3, 3.2, 4.1
        assert_eq!(rings.len(), 5);
    }

    #[test]
    fn test_ring_cut_by_hole() {
        let ring = Polygon::rectangle(0.0, 0.0, 10.0, 10.0);
        let hole = Polygon::rectangle(4.0, -1.0, 6.0, 1.0);
        let runs = ring_runs(&ring, &[hole.clone()]);
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_relative_eq!(polyline_length(run), 38.0, epsilon = 1e-3);
        for w in run.windows(2) {
            assert!(!hole.contains(&w[0].lerp(&w[1], 0.5)));
        }
    }

    #[test]
    fn test_uncut_ring_is_closed() {
        let runs = ring_runs(&Polygon::rectangle(0.0, 0.0, 2.0, 2.0), &[]);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].len(), 5);
        assert_relative_eq!(polyline_length(&runs[0]), 8.0, epsilon = 1e-5);
    }

    #[test]
    fn test_smooth_removes_collinear_and_close_points() {
        let pts = vec![
            Point2D::new(0.0, 0.0),
            Point2D::new(1.0, 0.0),
            Point2D::new(1.01, 0.0),
            Point2D::new(2.0, 0.01),
            Point2D::new(2.0, 2.0),
        ];
        let out = smooth(&pts, 0.1, 5f32.to_radians());
        assert_eq!(out.len(), 3);
        assert_eq!(out[0], pts[0]);
        assert_eq!(out[2], pts[4]);
    }
}
