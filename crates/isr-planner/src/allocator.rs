//! Target allocation: partitioning admissible targets across the fleet.
//!
//! Allocation is a pre-pass over the distance matrix only; the exact
//! per-drone solver enforces the real fuel budget afterwards. All
//! strategies iterate drones and targets in sorted order so a replan on
//! the same inputs produces the same partition.

use crate::matrix::DistanceMatrix;
use isr_core::geometry::EPS;
use isr_core::models::{DroneConfig, EndSpec, Environment, Target};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Allocation strategy selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Cheapest marginal insertion cost (default).
    #[default]
    Efficient,
    /// Highest priority first, nearest drone.
    Greedy,
    /// Keep per-drone target counts level.
    Balanced,
    /// K-means clustering, one cluster per drone.
    Geographic,
    /// One-pass auction on a preference score.
    Exclusive,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s.trim().to_ascii_lowercase().as_str() {
            "efficient" => Ok(Strategy::Efficient),
            "greedy" => Ok(Strategy::Greedy),
            "balanced" => Ok(Strategy::Balanced),
            "geographic" => Ok(Strategy::Geographic),
            "exclusive" => Ok(Strategy::Exclusive),
            other => Err(format!("unknown strategy `{other}`")),
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Efficient => "efficient",
            Strategy::Greedy => "greedy",
            Strategy::Balanced => "balanced",
            Strategy::Geographic => "geographic",
            Strategy::Exclusive => "exclusive",
        };
        f.write_str(name)
    }
}

/// Fixed seed: clustering must be reproducible across replans.
const KMEANS_SEED: u64 = 0x1512_ab0c;
const KMEANS_MAX_ROUNDS: usize = 25;

/// Partition admissible targets among enabled drones.
///
/// Returns an ordered target-id list per drone; drones that receive no
/// targets are omitted. Targets no drone can carry are left out.
pub fn allocate(
    strategy: Strategy,
    env: &Environment,
    configs: &BTreeMap<String, DroneConfig>,
    matrix: &DistanceMatrix,
) -> BTreeMap<String, Vec<String>> {
    let drones: Vec<(&String, &DroneConfig)> =
        configs.iter().filter(|(_, c)| c.enabled).collect();
    let admissible: Vec<&Target> = env
        .targets
        .iter()
        .filter(|t| !matrix.excluded_targets.contains(&t.id))
        .filter(|t| drones.iter().any(|(_, c)| c.can_access(t.target_type)))
        .collect();

    let allocations = if drones.is_empty() || admissible.is_empty() {
        BTreeMap::new()
    } else {
        match strategy {
            Strategy::Efficient => allocate_efficient(&drones, &admissible, matrix),
            Strategy::Greedy => allocate_greedy(&drones, &admissible, matrix),
            Strategy::Balanced => allocate_balanced(&drones, &admissible, matrix),
            Strategy::Geographic => allocate_geographic(&drones, &admissible, matrix),
            Strategy::Exclusive => allocate_exclusive(&drones, &admissible, matrix),
        }
    };

    debug!(
        %strategy,
        assigned = allocations.values().map(Vec::len).sum::<usize>(),
        admissible = admissible.len(),
        "targets allocated"
    );
    allocations
}

// ==== SHARED HELPERS ====

/// Length of start -> order... -> end through the matrix, resolving
/// `EndSpec::Any` to the best airport for the current tail.
fn order_length(cfg: &DroneConfig, order: &[String], matrix: &DistanceMatrix) -> f64 {
    let mut total = 0.0;
    let mut prev: &str = &cfg.start_airport;
    for tid in order {
        total += matrix.distance_between(prev, tid);
        prev = tid;
    }
    total + end_leg(cfg, prev, matrix)
}

fn end_leg(cfg: &DroneConfig, from: &str, matrix: &DistanceMatrix) -> f64 {
    match &cfg.end_airport {
        EndSpec::Airport(id) => matrix.distance_between(from, id),
        EndSpec::Any => matrix
            .labels()
            .iter()
            .filter(|l| matches!(l, isr_core::models::WaypointId::Airport(_)))
            .map(|l| matrix.distance_between(from, l.as_str()))
            .fold(f64::INFINITY, f64::min),
    }
}

/// Cheapest position to insert `tid` into `order`, with the resulting
/// total length. Returns `None` when every position busts the budget.
fn cheapest_insertion(
    cfg: &DroneConfig,
    order: &[String],
    tid: &str,
    matrix: &DistanceMatrix,
) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for pos in 0..=order.len() {
        let mut candidate = order.to_vec();
        candidate.insert(pos, tid.to_string());
        let len = order_length(cfg, &candidate, matrix);
        if len <= cfg.fuel_budget + EPS && best.map(|(_, l)| len < l).unwrap_or(true) {
            best = Some((pos, len));
        }
    }
    best
}

fn start_distance(cfg: &DroneConfig, tid: &str, matrix: &DistanceMatrix) -> f64 {
    matrix.distance_between(&cfg.start_airport, tid)
}

/// Targets sorted by descending priority, then id, for deterministic
/// processing order.
fn by_priority<'a>(targets: &'a [&'a Target]) -> Vec<&'a Target> {
    let mut sorted = targets.to_vec();
    sorted.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
    sorted
}

fn commit(
    allocations: &mut BTreeMap<String, Vec<String>>,
    drone_id: &str,
    tid: &str,
    pos: usize,
) {
    allocations
        .entry(drone_id.to_string())
        .or_default()
        .insert(pos, tid.to_string());
}

// ==== STRATEGIES ====

/// Global rounds of cheapest marginal insertion: each round commits the
/// (target, drone) pair with the lowest cost increase, ties broken by
/// higher priority-per-unit-cost, then target id.
fn allocate_efficient(
    drones: &[(&String, &DroneConfig)],
    targets: &[&Target],
    matrix: &DistanceMatrix,
) -> BTreeMap<String, Vec<String>> {
    let mut allocations: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut remaining = by_priority(targets);

    loop {
        struct Candidate {
            cost: f64,
            value: f64,
            target_idx: usize,
            drone: String,
            pos: usize,
        }
        let mut best: Option<Candidate> = None;
        for (ti, t) in remaining.iter().enumerate() {
            for &(did, cfg) in drones {
                if !cfg.can_access(t.target_type) {
                    continue;
                }
                let order = allocations.get(did).map(Vec::as_slice).unwrap_or(&[]);
                let base = order_length(cfg, order, matrix);
                let Some((pos, len)) = cheapest_insertion(cfg, order, &t.id, matrix) else {
                    continue;
                };
                let cost = (len - base).max(0.0);
                let value = f64::from(t.priority) / (cost + EPS);
                let better = match &best {
                    None => true,
                    Some(b) => {
                        cost < b.cost - EPS
                            || ((cost - b.cost).abs() <= EPS
                                && (value > b.value + EPS
                                    || ((value - b.value).abs() <= EPS
                                        && (t.id.as_str(), did.as_str())
                                            < (remaining[b.target_idx].id.as_str(), b.drone.as_str()))))
                    }
                };
                if better {
                    best = Some(Candidate {
                        cost,
                        value,
                        target_idx: ti,
                        drone: did.clone(),
                        pos,
                    });
                }
            }
        }
        let Some(chosen) = best else {
            break;
        };
        let tid = remaining.remove(chosen.target_idx).id.clone();
        commit(&mut allocations, &chosen.drone, &tid, chosen.pos);
        if remaining.is_empty() {
            break;
        }
    }
    allocations
}

/// Descending priority; each target goes to the fuel-feasible drone whose
/// start/end airports are geographically closest.
fn allocate_greedy(
    drones: &[(&String, &DroneConfig)],
    targets: &[&Target],
    matrix: &DistanceMatrix,
) -> BTreeMap<String, Vec<String>> {
    let mut allocations: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for t in by_priority(targets) {
        let mut ranked: Vec<(f64, &String, &DroneConfig)> = drones
            .iter()
            .filter(|(_, c)| c.can_access(t.target_type))
            .map(|&(did, cfg)| {
                let d_start = start_distance(cfg, &t.id, matrix);
                let d_end = end_leg(cfg, &t.id, matrix);
                ((d_start + d_end) / 2.0, did, cfg)
            })
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(b.1)));
        for (_, did, cfg) in ranked {
            let order = allocations.get(did).map(Vec::as_slice).unwrap_or(&[]);
            if let Some((pos, _)) = cheapest_insertion(cfg, order, &t.id, matrix) {
                commit(&mut allocations, did, &t.id, pos);
                break;
            }
        }
    }
    allocations
}

/// Descending priority packed into the least-loaded feasible drone,
/// keeping visited counts within one of each other.
fn allocate_balanced(
    drones: &[(&String, &DroneConfig)],
    targets: &[&Target],
    matrix: &DistanceMatrix,
) -> BTreeMap<String, Vec<String>> {
    let mut allocations: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for t in by_priority(targets) {
        let mut ranked: Vec<(usize, &String, &DroneConfig)> = drones
            .iter()
            .filter(|(_, c)| c.can_access(t.target_type))
            .map(|&(did, cfg)| {
                let count = allocations.get(did).map(Vec::len).unwrap_or(0);
                (count, did, cfg)
            })
            .collect();
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(b.1)));
        for (_, did, cfg) in ranked {
            let order = allocations.get(did).map(Vec::as_slice).unwrap_or(&[]);
            if let Some((pos, _)) = cheapest_insertion(cfg, order, &t.id, matrix) {
                commit(&mut allocations, did, &t.id, pos);
                break;
            }
        }
    }
    allocations
}

// `balanced` keeps counts level modulo 1 by always offering the target to
// the least-loaded capable drone first.

/// K-means over target positions (K = enabled drones), each cluster
/// matched to the drone whose start is nearest its centroid.
fn allocate_geographic(
    drones: &[(&String, &DroneConfig)],
    targets: &[&Target],
    matrix: &DistanceMatrix,
) -> BTreeMap<String, Vec<String>> {
    let k = drones.len().min(targets.len());
    let mut rng = StdRng::seed_from_u64(KMEANS_SEED);

    let mut seed_order: Vec<usize> = (0..targets.len()).collect();
    seed_order.shuffle(&mut rng);
    let mut centroids: Vec<(f64, f64)> = seed_order[..k]
        .iter()
        .map(|&i| (targets[i].x, targets[i].y))
        .collect();

    let mut assignment = vec![0usize; targets.len()];
    for _ in 0..KMEANS_MAX_ROUNDS {
        let mut changed = false;
        for (i, t) in targets.iter().enumerate() {
            let nearest = (0..k)
                .min_by(|&a, &b| {
                    let da = (t.x - centroids[a].0).hypot(t.y - centroids[a].1);
                    let db = (t.x - centroids[b].0).hypot(t.y - centroids[b].1);
                    da.total_cmp(&db)
                })
                .unwrap_or(0);
            if assignment[i] != nearest {
                assignment[i] = nearest;
                changed = true;
            }
        }
        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<&&Target> =
                targets.iter().enumerate().filter(|(i, _)| assignment[*i] == c).map(|(_, t)| t).collect();
            if !members.is_empty() {
                let m = members.len() as f64;
                *centroid = (
                    members.iter().map(|t| t.x).sum::<f64>() / m,
                    members.iter().map(|t| t.y).sum::<f64>() / m,
                );
            }
        }
        if !changed {
            break;
        }
    }

    // Match clusters to drones, nearest start-to-centroid pairs first.
    let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
    for (c, centroid) in centroids.iter().enumerate() {
        for (d, (_, cfg)) in drones.iter().enumerate() {
            let dist = match matrix.position_of(&cfg.start_airport) {
                Some(start) => (centroid.0 - start.x).hypot(centroid.1 - start.y),
                None => f64::INFINITY,
            };
            pairs.push((dist, c, d));
        }
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
    let mut cluster_drone = vec![usize::MAX; k];
    let mut drone_used = vec![false; drones.len()];
    for (_, c, d) in pairs {
        if cluster_drone[c] == usize::MAX && !drone_used[d] {
            cluster_drone[c] = d;
            drone_used[d] = true;
        }
    }

    let mut allocations: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (c, &d) in cluster_drone.iter().enumerate() {
        if d == usize::MAX {
            continue;
        }
        let (did, cfg) = drones[d];
        let members: Vec<&Target> = targets
            .iter()
            .enumerate()
            .filter(|(i, _)| assignment[*i] == c)
            .map(|(_, t)| *t)
            .collect();
        for t in by_priority(&members) {
            if !cfg.can_access(t.target_type) {
                continue;
            }
            let order = allocations.get(did).map(Vec::as_slice).unwrap_or(&[]);
            if let Some((pos, _)) = cheapest_insertion(cfg, order, &t.id, matrix) {
                commit(&mut allocations, did, &t.id, pos);
            }
        }
    }
    allocations
}

/// One-pass auction: each target goes to the drone with the best
/// preference score (priority x capability x inverse start distance).
fn allocate_exclusive(
    drones: &[(&String, &DroneConfig)],
    targets: &[&Target],
    matrix: &DistanceMatrix,
) -> BTreeMap<String, Vec<String>> {
    let mut allocations: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for t in by_priority(targets) {
        let mut ranked: Vec<(f64, &String, &DroneConfig)> = drones
            .iter()
            .filter(|(_, c)| c.can_access(t.target_type))
            .map(|&(did, cfg)| {
                let d_start = start_distance(cfg, &t.id, matrix);
                let score = f64::from(t.priority) / (1.0 + d_start);
                (score, did, cfg)
            })
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(b.1)));
        for (_, did, cfg) in ranked {
            let order = allocations.get(did).map(Vec::as_slice).unwrap_or(&[]);
            if let Some((pos, _)) = cheapest_insertion(cfg, order, &t.id, matrix) {
                commit(&mut allocations, did, &t.id, pos);
                break;
            }
        }
    }
    allocations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::compute_matrix;
    use isr_core::models::{Airport, Target, TargetType};
    use std::collections::BTreeSet;

    fn env() -> Environment {
        Environment {
            airports: vec![
                Airport { id: "A1".into(), x: 10.0, y: 50.0 },
                Airport { id: "A2".into(), x: 90.0, y: 50.0 },
            ],
            targets: vec![
                Target { id: "T1".into(), x: 20.0, y: 55.0, target_type: TargetType::A, priority: 5 },
                Target { id: "T2".into(), x: 25.0, y: 45.0, target_type: TargetType::A, priority: 3 },
                Target { id: "T3".into(), x: 80.0, y: 55.0, target_type: TargetType::B, priority: 8 },
                Target { id: "T4".into(), x: 85.0, y: 45.0, target_type: TargetType::B, priority: 2 },
            ],
            sams: vec![],
            synthetic_starts: Default::default(),
        }
    }

    fn config(start: &str, access: &[TargetType]) -> DroneConfig {
        DroneConfig {
            enabled: true,
            fuel_budget: 300.0,
            start_airport: start.to_string(),
            end_airport: EndSpec::Airport(start.to_string()),
            target_access: access.iter().copied().collect::<BTreeSet<_>>(),
        }
    }

    fn fleet() -> BTreeMap<String, DroneConfig> {
        let mut configs = BTreeMap::new();
        configs.insert("D1".to_string(), config("A1", &[TargetType::A]));
        configs.insert("D2".to_string(), config("A2", &[TargetType::B]));
        configs
    }

    #[test]
    fn test_capability_filter_is_respected() {
        let env = env();
        let matrix = compute_matrix(&env);
        for strategy in [
            Strategy::Efficient,
            Strategy::Greedy,
            Strategy::Balanced,
            Strategy::Geographic,
            Strategy::Exclusive,
        ] {
            let allocations = allocate(strategy, &env, &fleet(), &matrix);
            for tid in allocations.get("D1").map(Vec::as_slice).unwrap_or(&[]) {
                assert_eq!(env.target(tid).unwrap().target_type, TargetType::A);
            }
            for tid in allocations.get("D2").map(Vec::as_slice).unwrap_or(&[]) {
                assert_eq!(env.target(tid).unwrap().target_type, TargetType::B);
            }
        }
    }

    #[test]
    fn test_each_target_assigned_at_most_once() {
        let env = env();
        let matrix = compute_matrix(&env);
        for strategy in [
            Strategy::Efficient,
            Strategy::Greedy,
            Strategy::Balanced,
            Strategy::Geographic,
            Strategy::Exclusive,
        ] {
            let allocations = allocate(strategy, &env, &fleet(), &matrix);
            let mut seen = BTreeSet::new();
            for tid in allocations.values().flatten() {
                assert!(seen.insert(tid.clone()), "{tid} assigned twice under {strategy}");
            }
        }
    }

    #[test]
    fn test_no_capable_drone_means_empty_allocations() {
        let env = env();
        let matrix = compute_matrix(&env);
        let mut configs = BTreeMap::new();
        configs.insert("D1".to_string(), config("A1", &[TargetType::E]));
        let allocations = allocate(Strategy::Efficient, &env, &configs, &matrix);
        assert!(allocations.is_empty());
    }

    #[test]
    fn test_allocation_is_deterministic() {
        let env = env();
        let matrix = compute_matrix(&env);
        let a = allocate(Strategy::Geographic, &env, &fleet(), &matrix);
        let b = allocate(Strategy::Geographic, &env, &fleet(), &matrix);
        assert_eq!(a, b);
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("Efficient".parse::<Strategy>().unwrap(), Strategy::Efficient);
        assert!("magic".parse::<Strategy>().is_err());
    }
}
