//! Planar geometry for SAM-aware route planning.
//!
//! All operations work in dimensionless world units (canonical range
//! [0,100] per axis) and share a single comparison tolerance [`EPS`].

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Comparison tolerance in world units.
pub const EPS: f64 = 1e-3;

/// A point in the planning plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn dist(&self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// Equality within [`EPS`].
    pub fn approx_eq(&self, other: Point) -> bool {
        self.dist(other) <= EPS
    }
}

impl From<[f64; 2]> for Point {
    fn from(v: [f64; 2]) -> Self {
        Self { x: v[0], y: v[1] }
    }
}

impl From<Point> for [f64; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// Signed area of the triangle (a, b, c). Positive = counter-clockwise.
pub fn orient(a: Point, b: Point, c: Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Clamped projection parameter of `p` onto segment `a`..`b`, in [0,1].
pub fn project_onto_segment(p: Point, a: Point, b: Point) -> f64 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len2 = dx * dx + dy * dy;
    if len2 <= EPS * EPS {
        return 0.0;
    }
    (((p.x - a.x) * dx + (p.y - a.y) * dy) / len2).clamp(0.0, 1.0)
}

/// Distance from `p` to the closed segment `a`..`b`.
pub fn point_segment_distance(p: Point, a: Point, b: Point) -> f64 {
    let t = project_onto_segment(p, a, b);
    let closest = Point::new(a.x + t * (b.x - a.x), a.y + t * (b.y - a.y));
    p.dist(closest)
}

/// True iff the closed segment `a`..`b` enters the open disk of radius `r`
/// around `center`. Boundary touches are not intersections.
pub fn segment_intersects_disk(a: Point, b: Point, center: Point, r: f64) -> bool {
    point_segment_distance(center, a, b) < r - EPS
}

/// Tangent points from an external point to a circle.
///
/// Returns the counter-clockwise tangent point first, then the clockwise
/// one, or `None` if the point lies inside (or on) the circle. The fixed
/// ordering keeps path construction stable across calls.
pub fn tangent_points(p: Point, center: Point, r: f64) -> Option<(Point, Point)> {
    let d = p.dist(center);
    if d <= r + EPS {
        return None;
    }
    let theta = (p.y - center.y).atan2(p.x - center.x);
    let alpha = (r / d).acos();
    let at = |angle: f64| Point::new(center.x + r * angle.cos(), center.y + r * angle.sin());
    Some((at(theta + alpha), at(theta - alpha)))
}

/// Monotone-chain convex hull.
///
/// Duplicate points (within [`EPS`]) are removed and colinear points are
/// dropped. The result is counter-clockwise; fewer than 3 distinct input
/// points yield the degenerate set unchanged.
pub fn convex_hull(points: &[Point]) -> Vec<Point> {
    let mut pts: Vec<Point> = Vec::new();
    for &p in points {
        if !pts.iter().any(|q| q.approx_eq(p)) {
            pts.push(p);
        }
    }
    if pts.len() < 3 {
        return pts;
    }
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));

    let mut lower: Vec<Point> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && orient(lower[lower.len() - 2], lower[lower.len() - 1], p) <= EPS
        {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<Point> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && orient(upper[upper.len() - 2], upper[upper.len() - 1], p) <= EPS
        {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Ray-casting point-in-polygon test (boundary not included reliably;
/// callers needing a strict interior answer combine this with
/// [`polygon_boundary_distance`]).
pub fn point_in_polygon(p: Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let pi = polygon[i];
        let pj = polygon[j];
        if ((pi.y > p.y) != (pj.y > p.y))
            && (p.x < (pj.x - pi.x) * (p.y - pi.y) / (pj.y - pi.y) + pi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Minimum distance from `p` to the polygon boundary.
pub fn polygon_boundary_distance(p: Point, polygon: &[Point]) -> f64 {
    let n = polygon.len();
    let mut best = f64::INFINITY;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        best = best.min(point_segment_distance(p, a, b));
    }
    best
}

/// True iff `p` lies strictly inside the polygon, more than [`EPS`] from
/// its boundary.
pub fn point_strictly_inside(p: Point, polygon: &[Point]) -> bool {
    point_in_polygon(p, polygon) && polygon_boundary_distance(p, polygon) > EPS
}

fn side(v: f64) -> i8 {
    if v > EPS {
        1
    } else if v < -EPS {
        -1
    } else {
        0
    }
}

/// True iff segments `a`..`b` and `c`..`d` cross at a single interior
/// point. Shared endpoints and colinear overlaps do not count.
pub fn segments_properly_cross(a: Point, b: Point, c: Point, d: Point) -> bool {
    let o1 = side(orient(a, b, c));
    let o2 = side(orient(a, b, d));
    let o3 = side(orient(c, d, a));
    let o4 = side(orient(c, d, b));
    o1 * o2 < 0 && o3 * o4 < 0
}

// ==== POLYLINES ====

/// Total length of a polyline.
pub fn polyline_length(poly: &[Point]) -> f64 {
    poly.windows(2).map(|w| w[0].dist(w[1])).sum()
}

/// Result of splitting a polyline at a given arc distance.
#[derive(Debug, Clone)]
pub struct PolylineSplit {
    /// Points up to and including the split point.
    pub prefix: Vec<Point>,
    /// Points from the split point to the end.
    pub suffix: Vec<Point>,
    pub split_point: Point,
    /// Total length of the input polyline.
    pub total: f64,
    /// Index of the segment containing the split.
    pub split_index: usize,
    /// Fraction along that segment, in [0,1].
    pub t: f64,
}

/// Split a polyline at arc distance `d` from its start.
///
/// `d` is clamped to `[0, total]`. Neither output half carries duplicate
/// endpoints within [`EPS`].
pub fn split_polyline_at_distance(poly: &[Point], d: f64) -> PolylineSplit {
    assert!(poly.len() >= 2, "cannot split a polyline with < 2 points");
    let total = polyline_length(poly);
    let d = d.clamp(0.0, total);

    let mut acc = 0.0;
    for i in 0..poly.len() - 1 {
        let seg_len = poly[i].dist(poly[i + 1]);
        if acc + seg_len >= d - EPS || i == poly.len() - 2 {
            let t = if seg_len <= EPS {
                0.0
            } else {
                ((d - acc) / seg_len).clamp(0.0, 1.0)
            };
            let split_point = Point::new(
                poly[i].x + t * (poly[i + 1].x - poly[i].x),
                poly[i].y + t * (poly[i + 1].y - poly[i].y),
            );

            let mut prefix: Vec<Point> = poly[..=i].to_vec();
            if !prefix.last().map(|p| p.approx_eq(split_point)).unwrap_or(false) {
                prefix.push(split_point);
            }

            let mut suffix: Vec<Point> = Vec::with_capacity(poly.len() - i);
            suffix.push(split_point);
            for &p in &poly[i + 1..] {
                if !suffix.last().map(|q| q.approx_eq(p)).unwrap_or(false) {
                    suffix.push(p);
                }
            }

            return PolylineSplit {
                prefix,
                suffix,
                split_point,
                total,
                split_index: i,
                t,
            };
        }
        acc += seg_len;
    }
    unreachable!("split distance exceeded clamped polyline length");
}

/// Interpolated point at arc distance `d` along the polyline.
pub fn point_along_polyline(poly: &[Point], d: f64) -> Point {
    split_polyline_at_distance(poly, d).split_point
}

/// Counter-clockwise polygonal approximation of a circle.
///
/// The angular step is derived from `min_seg_len` and clamped to
/// [pi/36, pi/6], bounding the vertex count to [12, 72].
pub fn sample_circle(center: Point, r: f64, min_seg_len: f64) -> Vec<Point> {
    let step = (min_seg_len / r.max(EPS)).clamp(PI / 36.0, PI / 6.0);
    let n = (2.0 * PI / step).ceil() as usize;
    (0..n)
        .map(|i| {
            let angle = 2.0 * PI * i as f64 / n as f64;
            Point::new(center.x + r * angle.cos(), center.y + r * angle.sin())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_disk_miss_and_hit() {
        let c = Point::new(50.0, 50.0);
        // Passes straight through the center
        assert!(segment_intersects_disk(
            Point::new(0.0, 50.0),
            Point::new(100.0, 50.0),
            c,
            15.0
        ));
        // Clears the disk entirely
        assert!(!segment_intersects_disk(
            Point::new(0.0, 0.0),
            Point::new(100.0, 0.0),
            c,
            15.0
        ));
    }

    #[test]
    fn test_segment_disk_boundary_touch_is_not_intersection() {
        let c = Point::new(50.0, 50.0);
        // Tangent line at exactly r from the center
        assert!(!segment_intersects_disk(
            Point::new(0.0, 35.0),
            Point::new(100.0, 35.0),
            c,
            15.0
        ));
    }

    #[test]
    fn test_tangent_points_on_circle() {
        let c = Point::new(0.0, 0.0);
        let (t1, t2) = tangent_points(Point::new(10.0, 0.0), c, 5.0).unwrap();
        assert!((t1.dist(c) - 5.0).abs() < 1e-9);
        assert!((t2.dist(c) - 5.0).abs() < 1e-9);
        // CCW tangent has positive y for a point on the +x axis
        assert!(t1.y > 0.0);
        assert!(t2.y < 0.0);
    }

    #[test]
    fn test_tangent_points_inside_is_none() {
        assert!(tangent_points(Point::new(1.0, 0.0), Point::new(0.0, 0.0), 5.0).is_none());
    }

    #[test]
    fn test_convex_hull_drops_interior_and_colinear() {
        let pts = vec![
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(2.0, 0.0), // colinear
            Point::new(4.0, 4.0),
            Point::new(0.0, 4.0),
            Point::new(2.0, 2.0), // interior
            Point::new(0.0, 0.0), // duplicate
        ];
        let hull = convex_hull(&pts);
        assert_eq!(hull.len(), 4);
        // CCW orientation: positive signed area
        let mut area = 0.0;
        for i in 0..hull.len() {
            let a = hull[i];
            let b = hull[(i + 1) % hull.len()];
            area += a.x * b.y - b.x * a.y;
        }
        assert!(area > 0.0);
    }

    #[test]
    fn test_point_in_polygon() {
        let square = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
            Point::new(0.0, 10.0),
        ];
        assert!(point_in_polygon(Point::new(5.0, 5.0), &square));
        assert!(!point_in_polygon(Point::new(15.0, 5.0), &square));
        assert!(point_strictly_inside(Point::new(5.0, 5.0), &square));
        // On the boundary: not strictly inside
        assert!(!point_strictly_inside(Point::new(10.0, 5.0), &square));
    }

    #[test]
    fn test_proper_crossing() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(10.0, 10.0);
        let c = Point::new(0.0, 10.0);
        let d = Point::new(10.0, 0.0);
        assert!(segments_properly_cross(a, b, c, d));
        // Shared endpoint does not count
        assert!(!segments_properly_cross(a, b, b, c));
        // Parallel segments do not cross
        assert!(!segments_properly_cross(
            a,
            Point::new(10.0, 0.0),
            Point::new(0.0, 1.0),
            Point::new(10.0, 1.0)
        ));
    }

    #[test]
    fn test_split_polyline_midpoint() {
        let poly = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(10.0, 10.0),
        ];
        let split = split_polyline_at_distance(&poly, 15.0);
        assert!((split.total - 20.0).abs() < 1e-9);
        assert_eq!(split.split_index, 1);
        assert!((split.t - 0.5).abs() < 1e-9);
        assert!(split.split_point.approx_eq(Point::new(10.0, 5.0)));
        assert!((polyline_length(&split.prefix) - 15.0).abs() < 1e-9);
        assert!((polyline_length(&split.suffix) - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_split_polyline_clamps() {
        let poly = vec![Point::new(0.0, 0.0), Point::new(10.0, 0.0)];
        let low = split_polyline_at_distance(&poly, -5.0);
        assert!(low.split_point.approx_eq(Point::new(0.0, 0.0)));
        assert_eq!(low.prefix.len(), 1);
        let high = split_polyline_at_distance(&poly, 50.0);
        assert!(high.split_point.approx_eq(Point::new(10.0, 0.0)));
        assert_eq!(high.suffix.len(), 1);
    }

    #[test]
    fn test_split_at_existing_vertex_no_duplicates() {
        let poly = vec![
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
            Point::new(20.0, 0.0),
        ];
        let split = split_polyline_at_distance(&poly, 10.0);
        assert_eq!(split.prefix.len(), 2);
        assert_eq!(split.suffix.len(), 2);
    }

    #[test]
    fn test_sample_circle_bounds() {
        let pts = sample_circle(Point::new(0.0, 0.0), 10.0, 2.0);
        assert!(pts.len() >= 12 && pts.len() <= 72);
        for p in &pts {
            assert!((p.dist(Point::new(0.0, 0.0)) - 10.0).abs() < 1e-9);
        }
        // CCW: signed area positive
        let mut area = 0.0;
        for i in 0..pts.len() {
            let a = pts[i];
            let b = pts[(i + 1) % pts.len()];
            area += a.x * b.y - b.x * a.y;
        }
        assert!(area > 0.0);
    }
}
