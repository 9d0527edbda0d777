//! Insert-Missed: greedy insertion of unrouted targets.

use super::{allocations_from_routes, order_length, orders_of};
use crate::matrix::DistanceMatrix;
use crate::trajectory::rebuild_route;
use isr_core::geometry::EPS;
use isr_core::models::{DroneConfig, Environment, Solution, WaypointId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Insert targets missing from every route at their cheapest fuel-feasible
/// position, highest priority-per-cost first, until no insertion fits.
pub fn insert_missed(
    solution: &Solution,
    env: &Environment,
    configs: &BTreeMap<String, DroneConfig>,
    matrix: &DistanceMatrix,
) -> Solution {
    let mut orders = orders_of(solution);
    let mut inserted = 0u32;

    loop {
        let routed: BTreeSet<&str> = orders
            .values()
            .flatten()
            .filter(|w| w.is_target())
            .map(|w| w.as_str())
            .collect();

        struct Move {
            value: f64,
            target_id: String,
            drone_id: String,
            pos: usize,
        }
        let mut best: Option<Move> = None;

        for target in &env.targets {
            if routed.contains(target.id.as_str())
                || matrix.excluded_targets.contains(&target.id)
            {
                continue;
            }
            for (drone_id, order) in &orders {
                let Some(cfg) = configs.get(drone_id) else {
                    continue;
                };
                if !cfg.enabled || !cfg.can_access(target.target_type) || order.len() < 2 {
                    continue;
                }
                let base = order_length(order, matrix);
                for pos in 1..order.len() {
                    let mut candidate = order.clone();
                    candidate.insert(pos, WaypointId::Target(target.id.clone()));
                    let len = order_length(&candidate, matrix);
                    if !len.is_finite() || len > cfg.fuel_budget + EPS {
                        continue;
                    }
                    let cost = (len - base).max(0.0);
                    let value = f64::from(target.priority) / (cost + EPS);
                    let better = match &best {
                        None => true,
                        Some(b) => {
                            value > b.value + EPS
                                || ((value - b.value).abs() <= EPS
                                    && (target.id.as_str(), drone_id.as_str())
                                        < (b.target_id.as_str(), b.drone_id.as_str()))
                        }
                    };
                    if better {
                        best = Some(Move {
                            value,
                            target_id: target.id.clone(),
                            drone_id: drone_id.clone(),
                            pos,
                        });
                    }
                }
            }
        }

        let Some(m) = best else {
            break;
        };
        orders
            .get_mut(&m.drone_id)
            .expect("move references a known drone")
            .insert(m.pos, WaypointId::Target(m.target_id.clone()));
        inserted += 1;
    }

    if inserted == 0 {
        return solution.clone();
    }

    let mut improved = solution.clone();
    for (drone_id, order) in &orders {
        match rebuild_route(drone_id, order, env, matrix) {
            Ok(route) => {
                improved.routes.insert(drone_id.clone(), route);
            }
            Err(e) => {
                warn!(drone_id, error = %e, "insert-missed rebuild failed, keeping input");
                return solution.clone();
            }
        }
    }
    allocations_from_routes(&mut improved);
    debug!(inserted, "insert-missed committed");
    improved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::compute_matrix;
    use crate::solver::plan_drone_route;
    use isr_core::models::{Airport, EndSpec, Target, TargetType};

    fn env() -> Environment {
        Environment {
            airports: vec![
                Airport { id: "A1".into(), x: 10.0, y: 50.0 },
                Airport { id: "A2".into(), x: 90.0, y: 50.0 },
            ],
            targets: vec![
                Target { id: "T1".into(), x: 40.0, y: 52.0, target_type: TargetType::A, priority: 5 },
                Target { id: "T2".into(), x: 60.0, y: 48.0, target_type: TargetType::A, priority: 3 },
            ],
            sams: vec![],
            synthetic_starts: Default::default(),
        }
    }

    fn fleet(fuel: f64) -> BTreeMap<String, DroneConfig> {
        let mut configs = BTreeMap::new();
        configs.insert(
            "D1".to_string(),
            DroneConfig {
                enabled: true,
                fuel_budget: fuel,
                start_airport: "A1".into(),
                end_airport: EndSpec::Airport("A2".into()),
                target_access: TargetType::ALL.iter().copied().collect(),
            },
        );
        configs
    }

    fn base_solution(env: &Environment, configs: &BTreeMap<String, DroneConfig>) -> Solution {
        let matrix = compute_matrix(env);
        let plan = plan_drone_route("D1", &configs["D1"], &[], env, &matrix).unwrap();
        let route = rebuild_route("D1", &plan.waypoints, env, &matrix).unwrap();
        let mut routes = BTreeMap::new();
        routes.insert("D1".to_string(), route);
        Solution {
            routes,
            allocations: BTreeMap::new(),
            wrapped_polygons: vec![],
            matrix_key: matrix.key,
        }
    }

    #[test]
    fn test_missed_targets_inserted_when_fuel_allows() {
        let env = env();
        let configs = fleet(200.0);
        let matrix = compute_matrix(&env);
        let solution = base_solution(&env, &configs);
        assert_eq!(solution.routes["D1"].points, 0);

        let improved = insert_missed(&solution, &env, &configs, &matrix);
        assert_eq!(improved.routes["D1"].points, 8);
        assert_eq!(improved.allocations["D1"].len(), 2);
        assert!(improved.routes["D1"].distance <= 200.0 + EPS);
    }

    #[test]
    fn test_no_insertion_beyond_budget() {
        let env = env();
        // Just enough for the direct leg, no detours
        let configs = fleet(81.0);
        let matrix = compute_matrix(&env);
        let solution = base_solution(&env, &configs);

        let unchanged = insert_missed(&solution, &env, &configs, &matrix);
        assert_eq!(unchanged.routes["D1"].points, 0);
        assert!(unchanged.allocations.is_empty());
    }
}
