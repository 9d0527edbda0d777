//! SAM cluster wrapping.
//!
//! Overlapping SAM disks are merged into clusters and each cluster is
//! replaced by the convex hull of its sampled boundaries. The resulting
//! "wrapped polygons" are the canonical obstacle set for pathfinding,
//! inside-SAM target detection, and display.

use crate::geometry::{
    convex_hull, point_in_polygon, point_strictly_inside, polygon_boundary_distance,
    sample_circle, segments_properly_cross, Point, EPS,
};
use crate::models::Sam;
use serde::{Deserialize, Serialize};

/// Boundary sampling resolution in world units. The angular step is still
/// clamped to [pi/36, pi/6] by the sampler.
const SAMPLE_SEG_LEN: f64 = 2.0;

/// Convex hull of one cluster of overlapping SAM disks, counter-clockwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedPolygon {
    pub vertices: Vec<Point>,
}

impl WrappedPolygon {
    /// Strict interior test: boundary points do not count.
    pub fn contains_strict(&self, p: Point) -> bool {
        point_strictly_inside(p, &self.vertices)
    }

    /// True iff the segment `a`..`b` passes through the polygon interior.
    ///
    /// Edges that run along the hull boundary (tangent chains) are
    /// allowed; chords and through-crossings are not.
    pub fn blocks_segment(&self, a: Point, b: Point) -> bool {
        if self.contains_strict(a) || self.contains_strict(b) {
            return true;
        }
        let n = self.vertices.len();
        for i in 0..n {
            let c = self.vertices[i];
            let d = self.vertices[(i + 1) % n];
            if segments_properly_cross(a, b, c, d) {
                return true;
            }
        }
        // Chord case: both endpoints on (or outside) the boundary with the
        // midpoint inside.
        let mid = Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0);
        point_in_polygon(mid, &self.vertices) && polygon_boundary_distance(mid, &self.vertices) > EPS
    }
}

/// Union-find over disk indices.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[rb] = ra;
        }
    }
}

/// Cluster overlapping SAM disks and wrap each cluster in a convex hull.
///
/// Disks are merged when their center distance is at most the sum of
/// their ranges. Degenerate hulls (fewer than 3 vertices) are dropped.
pub fn wrap_sams(sams: &[Sam]) -> Vec<WrappedPolygon> {
    if sams.is_empty() {
        return Vec::new();
    }

    let mut sets = DisjointSet::new(sams.len());
    for i in 0..sams.len() {
        for j in i + 1..sams.len() {
            let gap = sams[i].center().dist(sams[j].center());
            if gap <= sams[i].range + sams[j].range + EPS {
                sets.union(i, j);
            }
        }
    }

    let mut clusters: std::collections::BTreeMap<usize, Vec<usize>> =
        std::collections::BTreeMap::new();
    for i in 0..sams.len() {
        let root = sets.find(i);
        clusters.entry(root).or_default().push(i);
    }

    let mut polygons = Vec::new();
    for members in clusters.values() {
        let mut boundary: Vec<Point> = Vec::new();
        for &i in members {
            boundary.extend(sample_circle(sams[i].center(), sams[i].range, SAMPLE_SEG_LEN));
        }
        let hull = convex_hull(&boundary);
        if hull.len() >= 3 {
            polygons.push(WrappedPolygon { vertices: hull });
        }
    }
    polygons
}
