//! Exact per-drone orienteering.
//!
//! Given one drone's allocation, select and order the subset of targets
//! maximizing total priority subject to the fuel budget, using a
//! Held-Karp dynamic program over (subset, last-visited). Beyond
//! [`MAX_EXACT_CANDIDATES`] the solver falls back to a greedy
//! value-per-fuel heuristic.

use crate::errors::PlanError;
use crate::matrix::DistanceMatrix;
use isr_core::geometry::EPS;
use isr_core::models::{DroneConfig, EndSpec, Environment, WaypointId};
use tracing::{debug, warn};

/// Largest candidate set handled exactly. 2^15 subsets is the practical
/// ceiling for the DP table.
pub const MAX_EXACT_CANDIDATES: usize = 15;

/// Ordered visit plan for one drone, before trajectory expansion.
///
/// An empty waypoint list means no fuel-feasible route exists; the
/// mission continues without this drone.
#[derive(Debug, Clone)]
pub struct PlannedOrder {
    pub waypoints: Vec<WaypointId>,
    pub points: u32,
    pub distance: f64,
}

impl PlannedOrder {
    fn empty() -> Self {
        Self {
            waypoints: Vec::new(),
            points: 0,
            distance: 0.0,
        }
    }
}

/// Solve one drone's orienteering problem over its allocation.
///
/// With `EndSpec::Any` the DP runs once per airport and the best result
/// wins (priority descending, then distance ascending).
pub fn plan_drone_route(
    drone_id: &str,
    cfg: &DroneConfig,
    allocation: &[String],
    env: &Environment,
    matrix: &DistanceMatrix,
) -> Result<PlannedOrder, PlanError> {
    let start = cfg.start_airport.as_str();
    let si = matrix
        .index_of(start)
        .ok_or_else(|| PlanError::InvalidInput(format!("unknown start airport `{start}`")))?;

    let ends: Vec<&str> = match &cfg.end_airport {
        EndSpec::Airport(id) => {
            matrix
                .index_of(id)
                .ok_or_else(|| PlanError::InvalidInput(format!("unknown end airport `{id}`")))?;
            vec![id.as_str()]
        }
        EndSpec::Any => env.airports.iter().map(|a| a.id.as_str()).collect(),
    };
    if ends.is_empty() {
        return Err(PlanError::InvalidInput(
            "any-airport endpoint requires at least one airport".into(),
        ));
    }

    // Candidates must be reachable from the start at all.
    let candidates: Vec<(usize, u32, &str)> = allocation
        .iter()
        .filter_map(|tid| {
            let ci = matrix.index_of(tid)?;
            let priority = env.target(tid)?.priority;
            if matrix.distance(si, ci).is_finite() {
                Some((ci, priority, tid.as_str()))
            } else {
                None
            }
        })
        .collect();

    let mut best: Option<(u32, f64, &str, Vec<usize>)> = None;
    for &end in &ends {
        let ei = matrix
            .index_of(end)
            .ok_or_else(|| PlanError::InvalidInput(format!("unknown end airport `{end}`")))?;
        let result = if candidates.len() > MAX_EXACT_CANDIDATES {
            warn!(
                drone_id,
                candidates = candidates.len(),
                "candidate cap exceeded, using greedy fallback"
            );
            greedy_fallback(si, ei, &candidates, cfg.fuel_budget, matrix)
        } else {
            held_karp(si, ei, &candidates, cfg.fuel_budget, matrix)
        };
        if let Some((points, distance, order)) = result {
            let better = match &best {
                None => true,
                Some((bp, bd, _, _)) => {
                    points > *bp || (points == *bp && distance < *bd - EPS)
                }
            };
            if better {
                best = Some((points, distance, end, order));
            }
        }
    }

    let Some((points, distance, end, order)) = best else {
        debug!(drone_id, "no fuel-feasible route, returning empty route");
        return Ok(PlannedOrder::empty());
    };

    let mut waypoints = Vec::with_capacity(order.len() + 2);
    waypoints.push(WaypointId::parse(start)?);
    for idx in order {
        waypoints.push(WaypointId::Target(candidates[idx].2.to_string()));
    }
    waypoints.push(WaypointId::Airport(end.to_string()));

    Ok(PlannedOrder {
        waypoints,
        points,
        distance,
    })
}

/// Held-Karp DP: `dp[S][l]` = minimum distance from the start through
/// subset `S` ending at `l`. The winner is the largest total priority
/// meeting the budget, ties broken by smaller distance.
fn held_karp(
    si: usize,
    ei: usize,
    candidates: &[(usize, u32, &str)],
    budget: f64,
    matrix: &DistanceMatrix,
) -> Option<(u32, f64, Vec<usize>)> {
    let n = candidates.len();
    let full = 1usize << n;
    let mut dp = vec![f64::INFINITY; full * n.max(1)];
    let mut parent = vec![usize::MAX; full * n.max(1)];

    for (l, &(ci, _, _)) in candidates.iter().enumerate() {
        let d = matrix.distance(si, ci);
        if d.is_finite() {
            dp[(1 << l) * n + l] = d;
        }
    }

    for mask in 1..full {
        for last in 0..n {
            if mask & (1 << last) == 0 {
                continue;
            }
            let cur = dp[mask * n + last];
            if !cur.is_finite() || cur > budget + EPS {
                continue;
            }
            for next in 0..n {
                if mask & (1 << next) != 0 {
                    continue;
                }
                let step = matrix.distance(candidates[last].0, candidates[next].0);
                if !step.is_finite() {
                    continue;
                }
                let nd = cur + step;
                let idx = (mask | 1 << next) * n + next;
                if nd < dp[idx] {
                    dp[idx] = nd;
                    parent[idx] = last;
                }
            }
        }
    }

    // The empty selection (start straight to end) is always a candidate.
    let mut best: Option<(u32, f64, usize, usize)> = None;
    let direct = matrix.distance(si, ei);
    if direct <= budget + EPS {
        best = Some((0, direct, 0, usize::MAX));
    }

    for mask in 1..full {
        let points: u32 = (0..n)
            .filter(|l| mask & (1 << l) != 0)
            .map(|l| candidates[l].1)
            .sum();
        for last in 0..n {
            if mask & (1 << last) == 0 {
                continue;
            }
            let through = dp[mask * n + last];
            if !through.is_finite() {
                continue;
            }
            let home = matrix.distance(candidates[last].0, ei);
            if !home.is_finite() {
                continue;
            }
            let total = through + home;
            if total > budget + EPS {
                continue;
            }
            let better = match best {
                None => true,
                Some((bp, bd, _, _)) => points > bp || (points == bp && total < bd - EPS),
            };
            if better {
                best = Some((points, total, mask, last));
            }
        }
    }

    let (points, distance, mask, last) = best?;
    let mut order = Vec::new();
    if last != usize::MAX {
        let mut mask = mask;
        let mut last = last;
        loop {
            order.push(last);
            let prev = parent[mask * n + last];
            mask &= !(1 << last);
            if prev == usize::MAX {
                break;
            }
            last = prev;
        }
        order.reverse();
    }
    Some((points, distance, order))
}

/// Greedy backstop above the exact cap: repeatedly take the unvisited
/// candidate with the best priority-per-fuel ratio that still allows a
/// return to the end airport.
fn greedy_fallback(
    si: usize,
    ei: usize,
    candidates: &[(usize, u32, &str)],
    budget: f64,
    matrix: &DistanceMatrix,
) -> Option<(u32, f64, Vec<usize>)> {
    if matrix.distance(si, ei) > budget + EPS {
        return None;
    }

    let n = candidates.len();
    let mut used = vec![false; n];
    let mut order = Vec::new();
    let mut cur = si;
    let mut traveled = 0.0;
    let mut points = 0;

    loop {
        let mut best: Option<(f64, usize, f64)> = None; // (score, index, leg)
        for (i, &(ci, priority, _)) in candidates.iter().enumerate() {
            if used[i] {
                continue;
            }
            let leg = matrix.distance(cur, ci);
            let home = matrix.distance(ci, ei);
            if !leg.is_finite() || !home.is_finite() {
                continue;
            }
            if traveled + leg + home > budget + EPS {
                continue;
            }
            let score = f64::from(priority) / (leg + EPS);
            if best.map(|(s, _, _)| score > s).unwrap_or(true) {
                best = Some((score, i, leg));
            }
        }
        let Some((_, i, leg)) = best else {
            break;
        };
        used[i] = true;
        traveled += leg;
        cur = candidates[i].0;
        points += candidates[i].1;
        order.push(i);
    }

    Some((points, traveled + matrix.distance(cur, ei), order))
}
