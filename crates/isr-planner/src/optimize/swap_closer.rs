//! Swap-Closer: move targets to another drone's route when that route
//! passes closer to them than their own.
//!
//! For a target t sitting between (prev, next) on its route, the
//! Self-Segment-Distance (SSD) is the perpendicular distance from t to
//! that segment; the Other-Segment-Distance (OSD) is the same measure
//! against a segment of another drone's route. A move is considered only
//! when OSD < SSD and the receiving drone stays within fuel ("no SSD, no
//! movement" when SSD is ~0). Ties on equal OSD break to the lower target
//! id, then the lower destination drone id.

use super::{allocations_from_routes, hash_orders, order_length, order_points, orders_of};
use crate::matrix::DistanceMatrix;
use crate::trajectory::rebuild_route;
use isr_core::geometry::{point_segment_distance, Point, EPS};
use isr_core::models::{DroneConfig, Environment, Solution, WaypointId};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

/// Passes per iteration before re-hashing for cycle detection.
const MAX_PASSES_PER_ITERATION: u32 = 4;
/// Bounded auto-iteration.
const MAX_ITERATIONS: u32 = 12;

/// Outcome bookkeeping for one Swap-Closer run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SwapCloserReport {
    pub iterations: u32,
    pub swaps: u32,
    pub converged: bool,
    pub cycle_detected: bool,
}

type Orders = BTreeMap<String, Vec<WaypointId>>;

/// Run Swap-Closer to convergence, a cycle, or the iteration bound.
/// The best-scoring snapshot seen is what is returned.
pub fn swap_closer(
    solution: &Solution,
    env: &Environment,
    configs: &BTreeMap<String, DroneConfig>,
    matrix: &DistanceMatrix,
) -> (Solution, SwapCloserReport) {
    let mut orders = orders_of(solution);
    let mut report = SwapCloserReport::default();

    let mut seen: HashSet<u64> = HashSet::new();
    seen.insert(hash_orders(&orders));

    let mut best_orders = orders.clone();
    let mut best_score = score(&orders, env, matrix);

    while report.iterations < MAX_ITERATIONS {
        report.iterations += 1;

        let mut iteration_swaps = 0;
        for _ in 0..MAX_PASSES_PER_ITERATION {
            let pass_swaps = run_pass(&mut orders, env, configs, matrix);
            iteration_swaps += pass_swaps;
            report.swaps += pass_swaps;
            if pass_swaps == 0 {
                break;
            }
        }

        if iteration_swaps == 0 {
            report.converged = true;
            break;
        }

        let snapshot_score = score(&orders, env, matrix);
        if snapshot_score > best_score {
            best_score = snapshot_score;
            best_orders = orders.clone();
        }

        if !seen.insert(hash_orders(&orders)) {
            report.cycle_detected = true;
            debug!(
                iterations = report.iterations,
                "swap-closer cycle detected, retaining best iteration"
            );
            break;
        }
    }

    let mut improved = solution.clone();
    for (drone_id, order) in &best_orders {
        match rebuild_route(drone_id, order, env, matrix) {
            Ok(route) => {
                improved.routes.insert(drone_id.clone(), route);
            }
            Err(e) => {
                warn!(drone_id, error = %e, "swap-closer rebuild failed, keeping input");
                return (solution.clone(), report);
            }
        }
    }
    allocations_from_routes(&mut improved);
    (improved, report)
}

/// Score by total priority first, then shorter fleet distance.
fn score(orders: &Orders, env: &Environment, matrix: &DistanceMatrix) -> (u32, i64) {
    let points: u32 = orders.values().map(|o| order_points(o, env)).sum();
    let distance: f64 = orders.values().map(|o| order_length(o, matrix)).sum();
    // Negated micro-unit distance so larger tuples are better.
    (points, -(distance / EPS).round() as i64)
}

fn position_of(matrix: &DistanceMatrix, w: &WaypointId) -> Option<Point> {
    matrix.position_of(w.as_str())
}

/// One pass over every target of every route; each target's best move is
/// committed immediately. Returns the number of committed moves.
fn run_pass(
    orders: &mut Orders,
    env: &Environment,
    configs: &BTreeMap<String, DroneConfig>,
    matrix: &DistanceMatrix,
) -> u32 {
    let mut swaps = 0;
    let drone_ids: Vec<String> = orders.keys().cloned().collect();

    for drone_id in &drone_ids {
        let mut i = 1;
        loop {
            let order = &orders[drone_id];
            if order.len() < 3 || i >= order.len() - 1 {
                break;
            }
            if !order[i].is_target() {
                i += 1;
                continue;
            }

            let target_id = order[i].as_str().to_string();
            let Some(target) = env.target(&target_id) else {
                i += 1;
                continue;
            };
            let (Some(prev), Some(next)) = (
                position_of(matrix, &order[i - 1]),
                position_of(matrix, &order[i + 1]),
            ) else {
                i += 1;
                continue;
            };

            let ssd = point_segment_distance(target.pos(), prev, next);
            if ssd <= EPS {
                // No SSD, no movement.
                i += 1;
                continue;
            }

            struct Move {
                osd: f64,
                dest_drone: String,
                dest_pos: usize,
            }
            let mut best: Option<Move> = None;

            for (other_id, other_order) in orders.iter() {
                if other_id == drone_id || other_order.len() < 2 {
                    continue;
                }
                let Some(cfg) = configs.get(other_id) else {
                    continue;
                };
                if !cfg.enabled || !cfg.can_access(target.target_type) {
                    continue;
                }
                for j in 0..other_order.len() - 1 {
                    let (Some(p), Some(q)) = (
                        position_of(matrix, &other_order[j]),
                        position_of(matrix, &other_order[j + 1]),
                    ) else {
                        continue;
                    };
                    let osd = point_segment_distance(target.pos(), p, q);
                    if osd + EPS >= ssd {
                        continue;
                    }
                    let mut candidate = other_order.clone();
                    candidate.insert(j + 1, WaypointId::Target(target_id.clone()));
                    let len = order_length(&candidate, matrix);
                    if !len.is_finite() || len > cfg.fuel_budget + EPS {
                        continue;
                    }
                    let better = match &best {
                        None => true,
                        Some(b) => {
                            osd < b.osd - EPS
                                || ((osd - b.osd).abs() <= EPS
                                    && other_id.as_str() < b.dest_drone.as_str())
                        }
                    };
                    if better {
                        best = Some(Move {
                            osd,
                            dest_drone: other_id.clone(),
                            dest_pos: j + 1,
                        });
                    }
                }
            }

            if let Some(m) = best {
                orders.get_mut(drone_id).expect("source drone exists").remove(i);
                orders
                    .get_mut(&m.dest_drone)
                    .expect("destination drone exists")
                    .insert(m.dest_pos, WaypointId::Target(target_id));
                swaps += 1;
                // The removed slot is refilled by the next waypoint; do
                // not advance i.
            } else {
                i += 1;
            }
        }
    }
    swaps
}
