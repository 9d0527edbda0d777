//! Crossing-Removal: per-drone 2-opt on self-intersecting routes.
//!
//! When two straight-line route segments cross, the intermediate
//! sub-route is reversed. The reversal is kept only if the total length
//! recomputed through the distance matrix strictly decreases and the
//! fuel budget still holds.

use super::{allocations_from_routes, order_length, orders_of};
use crate::matrix::DistanceMatrix;
use crate::trajectory::rebuild_route;
use isr_core::geometry::{segments_properly_cross, Point, EPS};
use isr_core::models::{DroneConfig, Environment, Solution};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Remove route self-crossings with 2-opt reversals. Returns the
/// improved solution and the number of reversals applied.
pub fn crossing_removal(
    solution: &Solution,
    env: &Environment,
    configs: &BTreeMap<String, DroneConfig>,
    matrix: &DistanceMatrix,
) -> (Solution, u32) {
    let mut orders = orders_of(solution);
    let mut fixes = 0u32;

    for (drone_id, order) in orders.iter_mut() {
        let Some(cfg) = configs.get(drone_id) else {
            continue;
        };
        // Bounded rescans: each accepted reversal strictly shortens the
        // route, so this terminates well before the bound.
        let rescan_limit = order.len() * order.len() + 1;
        let mut rescans = 0;
        'rescan: while rescans < rescan_limit {
            rescans += 1;
            let positions: Option<Vec<Point>> = order
                .iter()
                .map(|w| matrix.position_of(w.as_str()))
                .collect();
            let Some(positions) = positions else {
                break;
            };
            let current_len = order_length(order, matrix);

            for i in 0..order.len().saturating_sub(3) {
                for j in i + 2..order.len() - 1 {
                    if !segments_properly_cross(
                        positions[i],
                        positions[i + 1],
                        positions[j],
                        positions[j + 1],
                    ) {
                        continue;
                    }
                    let mut candidate = order.clone();
                    candidate[i + 1..=j].reverse();
                    let len = order_length(&candidate, matrix);
                    if len < current_len - EPS && len <= cfg.fuel_budget + EPS {
                        *order = candidate;
                        fixes += 1;
                        continue 'rescan;
                    }
                }
            }
            break;
        }
    }

    if fixes == 0 {
        return (solution.clone(), 0);
    }

    let mut improved = solution.clone();
    for (drone_id, order) in &orders {
        match rebuild_route(drone_id, order, env, matrix) {
            Ok(route) => {
                improved.routes.insert(drone_id.clone(), route);
            }
            Err(e) => {
                warn!(drone_id, error = %e, "crossing-removal rebuild failed, keeping input");
                return (solution.clone(), 0);
            }
        }
    }
    allocations_from_routes(&mut improved);
    debug!(fixes, "crossing-removal committed");
    (improved, fixes)
}
