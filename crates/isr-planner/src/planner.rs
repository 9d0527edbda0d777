//! In-process planning API.
//!
//! One `Planner` value owns the distance-matrix cache and exposes the
//! whole pipeline: solve, the three post-optimizers, manual sequence
//! application, and cache control. One planning request runs at a time
//! from the consumer's perspective; a pending cancellation is honored at
//! each suspension point.

use crate::allocator::{allocate, Strategy};
use crate::cancel::CancelToken;
use crate::errors::PlanError;
use crate::matrix::MatrixCache;
use crate::optimize::{
    crossing_removal, insert_missed, swap_closer, SwapCloserReport,
};
use crate::solver::plan_drone_route;
use crate::trajectory::rebuild_route;
use isr_core::geometry::EPS;
use isr_core::models::{DroneConfig, EndSpec, Environment, Route, Solution, WaypointId};
use isr_core::sam::wrap_sams;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

/// Largest supported fleet.
pub const MAX_FLEET_SIZE: usize = 5;

/// Knobs for one solve request.
#[derive(Debug, Clone)]
pub struct SolveOptions {
    pub strategy: Strategy,
    /// When false, distances ignore SAM zones (straight lines).
    pub use_sam_aware: bool,
    pub post_optimize: bool,
    pub is_checkpoint_replan: bool,
    /// Targets already visited; excluded from allocation.
    pub visited_targets: BTreeSet<String>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            use_sam_aware: true,
            post_optimize: true,
            is_checkpoint_replan: false,
            visited_targets: BTreeSet::new(),
        }
    }
}

/// The planning engine. Owns the process-wide matrix cache; everything
/// else is per-request.
#[derive(Debug, Default)]
pub struct Planner {
    cache: MatrixCache,
}

impl Planner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the full pipeline: validate, distance matrix, allocation,
    /// per-drone orienteering, trajectories, optional post-optimizers.
    pub fn solve(
        &self,
        env: &Environment,
        configs: &BTreeMap<String, DroneConfig>,
        options: &SolveOptions,
        cancel: &CancelToken,
    ) -> Result<Solution, PlanError> {
        env.validate()?;
        validate_configs(env, configs)?;

        // Suspension point: before the distance matrix.
        cancel.check()?;

        let matrix_env = if options.use_sam_aware {
            env.clone()
        } else {
            let mut flat = env.clone();
            flat.sams.clear();
            flat
        };
        let matrix = self.cache.get_or_compute(&matrix_env);

        let mut alloc_env = env.clone();
        if !options.visited_targets.is_empty() {
            alloc_env.remove_targets(&options.visited_targets);
        }
        let allocations = allocate(options.strategy, &alloc_env, configs, &matrix);

        let mut routes: BTreeMap<String, Route> = BTreeMap::new();
        for (drone_id, cfg) in configs {
            if !cfg.enabled {
                continue;
            }
            // Suspension point: between drones.
            cancel.check()?;
            let allocation = allocations
                .get(drone_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let plan = plan_drone_route(drone_id, cfg, allocation, &alloc_env, &matrix)?;
            let route = rebuild_route(drone_id, &plan.waypoints, &alloc_env, &matrix)?;
            debug_assert!((route.distance - plan.distance).abs() < EPS);
            routes.insert(drone_id.clone(), route);
        }

        let mut solution = Solution {
            routes,
            allocations,
            wrapped_polygons: wrap_sams(&env.sams),
            matrix_key: matrix.key,
        };
        crate::optimize::allocations_from_routes(&mut solution);

        if options.post_optimize {
            // Suspension points: between optimizer passes. Visited
            // targets stay out of the optimizers' sight.
            cancel.check()?;
            solution = insert_missed(&solution, &alloc_env, configs, &matrix);
            cancel.check()?;
            let (swapped, report) = swap_closer(&solution, &alloc_env, configs, &matrix);
            solution = swapped;
            if report.cycle_detected {
                warn!("swap-closer oscillated, retained best iteration");
            }
            cancel.check()?;
            let (fixed, _) = crossing_removal(&solution, &alloc_env, configs, &matrix);
            solution = fixed;
        }

        for (drone_id, route) in &solution.routes {
            let cfg = &configs[drone_id];
            if route.distance > cfg.fuel_budget + EPS {
                return Err(PlanError::InvariantViolation(format!(
                    "route for {drone_id} exceeds fuel budget"
                )));
            }
        }

        info!(
            checkpoint_replan = options.is_checkpoint_replan,
            drones = solution.routes.len(),
            points = solution.total_points(),
            distance = solution.total_distance(),
            "solve complete"
        );
        Ok(solution)
    }

    /// Insert-Missed as a standalone operation.
    pub fn insert_missed(
        &self,
        solution: &Solution,
        env: &Environment,
        configs: &BTreeMap<String, DroneConfig>,
    ) -> Result<Solution, PlanError> {
        env.validate()?;
        let matrix = self.cache.get_or_compute(env);
        Ok(insert_missed(solution, env, configs, &matrix))
    }

    /// Swap-Closer as a standalone operation, with its run report.
    pub fn swap_closer(
        &self,
        solution: &Solution,
        env: &Environment,
        configs: &BTreeMap<String, DroneConfig>,
    ) -> Result<(Solution, SwapCloserReport), PlanError> {
        env.validate()?;
        let matrix = self.cache.get_or_compute(env);
        Ok(swap_closer(solution, env, configs, &matrix))
    }

    /// Crossing-Removal as a standalone operation; returns the fix count.
    pub fn crossing_removal(
        &self,
        solution: &Solution,
        env: &Environment,
        configs: &BTreeMap<String, DroneConfig>,
    ) -> Result<(Solution, u32), PlanError> {
        env.validate()?;
        let matrix = self.cache.get_or_compute(env);
        Ok(crossing_removal(solution, env, configs, &matrix))
    }

    /// Build a route from an explicit waypoint sequence, enforcing the
    /// fuel budget.
    pub fn apply_sequence(
        &self,
        drone_id: &str,
        sequence: &[String],
        env: &Environment,
        fuel_budget: f64,
    ) -> Result<Route, PlanError> {
        env.validate()?;
        let order: Vec<WaypointId> = sequence
            .iter()
            .map(|id| WaypointId::parse(id))
            .collect::<Result<_, _>>()?;
        for w in &order {
            if env.waypoint_position(w).is_none() {
                return Err(PlanError::InvalidInput(format!(
                    "waypoint `{}` not in environment",
                    w.as_str()
                )));
            }
        }
        let matrix = self.cache.get_or_compute(env);
        let route = rebuild_route(drone_id, &order, env, &matrix)?;
        if route.distance > fuel_budget + EPS {
            return Err(PlanError::Infeasible(format!(
                "sequence length {:.3} exceeds fuel budget {:.3}",
                route.distance, fuel_budget
            )));
        }
        Ok(route)
    }

    /// Drop every cached distance matrix.
    pub fn clear_matrix_cache(&self) {
        self.cache.clear();
    }

    /// Shared cache handle, for callers that invalidate on edits.
    pub fn cache(&self) -> &MatrixCache {
        &self.cache
    }
}

fn validate_configs(
    env: &Environment,
    configs: &BTreeMap<String, DroneConfig>,
) -> Result<(), PlanError> {
    if configs.len() > MAX_FLEET_SIZE {
        return Err(PlanError::InvalidInput(format!(
            "fleet size {} exceeds maximum {MAX_FLEET_SIZE}",
            configs.len()
        )));
    }
    for (drone_id, cfg) in configs {
        if cfg.fuel_budget < 0.0 {
            return Err(PlanError::InvalidInput(format!(
                "negative fuel budget for {drone_id}"
            )));
        }
        if !cfg.enabled {
            continue;
        }
        let start = WaypointId::parse(&cfg.start_airport)?;
        if matches!(start, WaypointId::Target(_)) || env.waypoint_position(&start).is_none() {
            return Err(PlanError::InvalidInput(format!(
                "start `{}` of {drone_id} is not an airport or synthetic start",
                cfg.start_airport
            )));
        }
        if let EndSpec::Airport(id) = &cfg.end_airport {
            if env.airport(id).is_none() {
                return Err(PlanError::InvalidInput(format!(
                    "end airport `{id}` of {drone_id} not in environment"
                )));
            }
        }
    }
    Ok(())
}
