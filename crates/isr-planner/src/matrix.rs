//! SAM-aware distance matrix with an environment-hash-keyed cache.
//!
//! Distances between waypoints are shortest-path lengths around the
//! wrapped SAM polygons. When the straight segment is clear it is used
//! directly; otherwise the path is found by Dijkstra over the visibility
//! graph of the two endpoints and all polygon vertices, which yields the
//! tangent-chain detour for convex obstacles and handles multiple
//! obstacles between a pair uniformly.

use dashmap::DashMap;
use isr_core::geometry::{Point, EPS};
use isr_core::models::{Environment, WaypointId};
use isr_core::sam::{wrap_sams, WrappedPolygon};
use std::cmp::{Ordering, Reverse};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct FloatOrd(f64);

impl PartialEq for FloatOrd {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// All-pairs SAM-aware distances between the environment's waypoints.
///
/// The matrix is symmetric with a zero diagonal; unreachable pairs carry
/// `+INFINITY`. Per-pair polylines are retained for trajectory expansion.
#[derive(Debug)]
pub struct DistanceMatrix {
    labels: Vec<WaypointId>,
    positions: Vec<Point>,
    index: HashMap<String, usize>,
    dist: Vec<Vec<f64>>,
    /// Forward polylines, keyed by (i, j) with i < j.
    paths: HashMap<(usize, usize), Vec<Point>>,
    /// Targets lying strictly inside a SAM polygon; ignored by the
    /// allocator and solver.
    pub excluded_targets: BTreeSet<String>,
    pub polygons: Vec<WrappedPolygon>,
    /// Canonical environment hash this matrix was computed for.
    pub key: u64,
}

impl DistanceMatrix {
    /// Waypoint labels in stable order: airports, targets, synthetic
    /// starts.
    pub fn labels(&self) -> &[WaypointId] {
        &self.labels
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Position of a waypoint id, if known to this matrix.
    pub fn position_of(&self, id: &str) -> Option<Point> {
        self.index_of(id).map(|i| self.positions[i])
    }

    pub fn distance(&self, i: usize, j: usize) -> f64 {
        self.dist[i][j]
    }

    /// Distance between two waypoint ids; `+INFINITY` when either id is
    /// unknown or the pair is unreachable.
    pub fn distance_between(&self, a: &str, b: &str) -> f64 {
        match (self.index_of(a), self.index_of(b)) {
            (Some(i), Some(j)) => self.dist[i][j],
            _ => f64::INFINITY,
        }
    }

    /// The polyline achieving `distance_between(a, b)`, oriented a -> b.
    pub fn path_between(&self, a: &str, b: &str) -> Option<Vec<Point>> {
        let i = self.index_of(a)?;
        let j = self.index_of(b)?;
        if i == j {
            return None;
        }
        if i < j {
            self.paths.get(&(i, j)).cloned()
        } else {
            self.paths.get(&(j, i)).map(|p| {
                let mut rev = p.clone();
                rev.reverse();
                rev
            })
        }
    }
}

// ==== ENVIRONMENT HASH ====

fn round_coord(v: f64) -> i64 {
    (v / EPS).round() as i64
}

/// Canonical hash of ids and epsilon-rounded positions. Two environments
/// with the same hash share a distance matrix.
pub fn env_hash(env: &Environment) -> u64 {
    let mut hasher = DefaultHasher::new();
    for a in &env.airports {
        "A".hash(&mut hasher);
        a.id.hash(&mut hasher);
        round_coord(a.x).hash(&mut hasher);
        round_coord(a.y).hash(&mut hasher);
    }
    for t in &env.targets {
        "T".hash(&mut hasher);
        t.id.hash(&mut hasher);
        round_coord(t.x).hash(&mut hasher);
        round_coord(t.y).hash(&mut hasher);
    }
    for s in &env.sams {
        "S".hash(&mut hasher);
        round_coord(s.pos[0]).hash(&mut hasher);
        round_coord(s.pos[1]).hash(&mut hasher);
        round_coord(s.range).hash(&mut hasher);
    }
    for (id, pos) in &env.synthetic_starts {
        "Y".hash(&mut hasher);
        id.hash(&mut hasher);
        round_coord(pos[0]).hash(&mut hasher);
        round_coord(pos[1]).hash(&mut hasher);
    }
    hasher.finish()
}

// ==== SHORTEST PATHS ====

fn segment_blocked(a: Point, b: Point, polygons: &[WrappedPolygon]) -> bool {
    polygons.iter().any(|p| p.blocks_segment(a, b))
}

/// Shortest SAM-avoiding path between two free points.
///
/// Returns the path polyline and its length, or `None` when no path
/// exists (an endpoint engulfed by an obstacle).
pub fn shortest_path(a: Point, b: Point, polygons: &[WrappedPolygon]) -> Option<(f64, Vec<Point>)> {
    if polygons.iter().any(|p| p.contains_strict(a) || p.contains_strict(b)) {
        return None;
    }
    if !segment_blocked(a, b, polygons) {
        return Some((a.dist(b), vec![a, b]));
    }

    // Via nodes come from the polygons the straight segment actually
    // hits; edges are still validated against every polygon. If a
    // detour would have to swing around an unintersected polygon the
    // narrow graph has no path and the full vertex set is used instead.
    let intersected: Vec<&WrappedPolygon> =
        polygons.iter().filter(|p| p.blocks_segment(a, b)).collect();
    search_via(a, b, &intersected, polygons)
        .or_else(|| search_via(a, b, &polygons.iter().collect::<Vec<_>>(), polygons))
}

fn search_via(
    a: Point,
    b: Point,
    via: &[&WrappedPolygon],
    polygons: &[WrappedPolygon],
) -> Option<(f64, Vec<Point>)> {
    let mut nodes = vec![a, b];
    for poly in via {
        nodes.extend(poly.vertices.iter().copied());
    }
    let n = nodes.len();

    let mut dist = vec![f64::INFINITY; n];
    let mut prev = vec![usize::MAX; n];
    let mut heap: BinaryHeap<Reverse<(FloatOrd, usize)>> = BinaryHeap::new();
    dist[0] = 0.0;
    heap.push(Reverse((FloatOrd(0.0), 0)));

    while let Some(Reverse((FloatOrd(d), u))) = heap.pop() {
        if d > dist[u] + 1e-12 {
            continue;
        }
        if u == 1 {
            break;
        }
        for v in 0..n {
            if v == u {
                continue;
            }
            let step = nodes[u].dist(nodes[v]);
            let nd = d + step;
            if nd + 1e-12 >= dist[v] {
                continue;
            }
            if segment_blocked(nodes[u], nodes[v], polygons) {
                continue;
            }
            dist[v] = nd;
            prev[v] = u;
            heap.push(Reverse((FloatOrd(nd), v)));
        }
    }

    if !dist[1].is_finite() {
        return None;
    }

    let mut path = Vec::new();
    let mut cur = 1;
    while cur != usize::MAX {
        path.push(nodes[cur]);
        cur = prev[cur];
    }
    path.reverse();
    Some((dist[1], path))
}

// ==== MATRIX COMPUTATION ====

/// Compute the full SAM-aware distance matrix for an environment.
pub fn compute_matrix(env: &Environment) -> DistanceMatrix {
    let polygons = wrap_sams(&env.sams);

    let mut labels: Vec<WaypointId> = Vec::new();
    let mut positions: Vec<Point> = Vec::new();
    for a in &env.airports {
        labels.push(WaypointId::Airport(a.id.clone()));
        positions.push(a.pos());
    }
    for t in &env.targets {
        labels.push(WaypointId::Target(t.id.clone()));
        positions.push(t.pos());
    }
    for (id, pos) in &env.synthetic_starts {
        labels.push(WaypointId::SyntheticStart(id.clone()));
        positions.push(Point::from(*pos));
    }

    let mut excluded_targets = BTreeSet::new();
    for t in &env.targets {
        if polygons.iter().any(|p| p.contains_strict(t.pos())) {
            excluded_targets.insert(t.id.clone());
        }
    }

    let n = labels.len();
    let index: HashMap<String, usize> = labels
        .iter()
        .enumerate()
        .map(|(i, l)| (l.as_str().to_string(), i))
        .collect();

    let mut dist = vec![vec![f64::INFINITY; n]; n];
    let mut paths = HashMap::new();
    for (i, row) in dist.iter_mut().enumerate() {
        row[i] = 0.0;
    }

    let is_excluded =
        |label: &WaypointId| label.is_target() && excluded_targets.contains(label.as_str());

    for i in 0..n {
        if is_excluded(&labels[i]) {
            continue;
        }
        for j in i + 1..n {
            if is_excluded(&labels[j]) {
                continue;
            }
            if let Some((d, path)) = shortest_path(positions[i], positions[j], &polygons) {
                dist[i][j] = d;
                dist[j][i] = d;
                paths.insert((i, j), path);
            }
        }
    }

    let key = env_hash(env);
    debug!(
        waypoints = n,
        polygons = polygons.len(),
        excluded = excluded_targets.len(),
        key,
        "distance matrix computed"
    );

    DistanceMatrix {
        labels,
        positions,
        index,
        dist,
        paths,
        excluded_targets,
        polygons,
        key,
    }
}

// ==== CACHE ====

/// Process-wide distance-matrix cache, keyed by the canonical environment
/// hash. Reads are concurrent; a recompute replaces the entry atomically.
/// This is the only shared mutable state in the engine.
#[derive(Debug, Default)]
pub struct MatrixCache {
    entries: DashMap<u64, Arc<DistanceMatrix>>,
}

impl MatrixCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the matrix for `env`, computing it on a hash miss. A miss
    /// means the environment changed, so stale entries are dropped.
    pub fn get_or_compute(&self, env: &Environment) -> Arc<DistanceMatrix> {
        let key = env_hash(env);
        if let Some(hit) = self.entries.get(&key) {
            debug!(key, "distance matrix cache hit");
            return hit.clone();
        }
        let matrix = Arc::new(compute_matrix(env));
        self.entries.retain(|k, _| *k == key);
        self.entries.insert(key, matrix.clone());
        matrix
    }

    /// Drop a specific entry (environment edited in place).
    pub fn invalidate(&self, key: u64) {
        self.entries.remove(&key);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isr_core::geometry::polyline_length;
    use isr_core::models::{Airport, Sam, Target, TargetType};

    fn env_two_airports(sams: Vec<Sam>) -> Environment {
        Environment {
            airports: vec![
                Airport { id: "A1".into(), x: 10.0, y: 50.0 },
                Airport { id: "A2".into(), x: 90.0, y: 50.0 },
            ],
            targets: vec![
                Target {
                    id: "T1".into(),
                    x: 50.0,
                    y: 60.0,
                    target_type: TargetType::A,
                    priority: 5,
                },
                Target {
                    id: "T2".into(),
                    x: 50.0,
                    y: 40.0,
                    target_type: TargetType::A,
                    priority: 3,
                },
            ],
            sams,
            synthetic_starts: Default::default(),
        }
    }

    #[test]
    fn test_clear_segment_is_straight() {
        let matrix = compute_matrix(&env_two_airports(vec![]));
        let d = matrix.distance_between("A1", "A2");
        assert!((d - 80.0).abs() < 1e-9);
        let path = matrix.path_between("A1", "A2").unwrap();
        assert_eq!(path.len(), 2);
    }

    #[test]
    fn test_matrix_symmetry_and_diagonal() {
        let matrix = compute_matrix(&env_two_airports(vec![Sam {
            pos: [50.0, 50.0],
            range: 15.0,
        }]));
        let n = matrix.labels().len();
        for i in 0..n {
            assert_eq!(matrix.distance(i, i), 0.0);
            for j in 0..n {
                assert!((matrix.distance(i, j) - matrix.distance(j, i)).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn test_sam_detour_is_longer_and_avoids_disk() {
        let sam = Sam { pos: [50.0, 50.0], range: 15.0 };
        let matrix = compute_matrix(&env_two_airports(vec![sam]));
        let d = matrix.distance_between("A1", "A2");
        assert!(d > 80.0 + EPS);
        // The detour stays out of the wrapped polygon
        let path = matrix.path_between("A1", "A2").unwrap();
        for w in path.windows(2) {
            for poly in &matrix.polygons {
                assert!(!poly.blocks_segment(w[0], w[1]));
            }
        }
        assert!((polyline_length(&path) - d).abs() < 1e-6);
    }

    #[test]
    fn test_triangle_inequality_within_eps() {
        let matrix = compute_matrix(&env_two_airports(vec![Sam {
            pos: [50.0, 50.0],
            range: 15.0,
        }]));
        let n = matrix.labels().len();
        for i in 0..n {
            for j in 0..n {
                for k in 0..n {
                    assert!(
                        matrix.distance(i, j)
                            <= matrix.distance(i, k) + matrix.distance(k, j) + EPS
                    );
                }
            }
        }
    }

    #[test]
    fn test_engulfed_target_excluded() {
        let mut env = env_two_airports(vec![Sam { pos: [50.0, 58.0], range: 6.0 }]);
        // T1 at (50,60) sits deep inside this SAM
        let matrix = compute_matrix(&env);
        assert!(matrix.excluded_targets.contains("T1"));
        assert!(matrix.distance_between("A1", "T1").is_infinite());
        // But T2 remains reachable
        assert!(matrix.distance_between("A1", "T2").is_finite());
        env.sams.clear();
        let matrix = compute_matrix(&env);
        assert!(matrix.excluded_targets.is_empty());
    }

    #[test]
    fn test_cache_hit_and_invalidation() {
        let cache = MatrixCache::new();
        let env = env_two_airports(vec![]);
        let first = cache.get_or_compute(&env);
        let second = cache.get_or_compute(&env);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        // A moved target changes the hash; stale entries are dropped
        let mut moved = env.clone();
        moved.targets[0].x += 1.0;
        let third = cache.get_or_compute(&moved);
        assert!(!Arc::ptr_eq(&second, &third));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hash_insensitive_to_sub_epsilon_jitter() {
        let env = env_two_airports(vec![]);
        let mut jittered = env.clone();
        jittered.targets[0].x += 1e-7;
        assert_eq!(env_hash(&env), env_hash(&jittered));
    }
}
