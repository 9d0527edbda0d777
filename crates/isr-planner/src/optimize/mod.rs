//! Post-optimizers: Insert-Missed, Swap-Closer, Crossing-Removal.
//!
//! Every optimizer takes a complete solution and returns a possibly
//! improved one. They are strictly non-worsening: any internal failure
//! returns the input unchanged, and Swap-Closer retains its best-scoring
//! iteration when it detects an oscillation.

mod crossing_removal;
mod insert_missed;
mod swap_closer;

pub use crossing_removal::crossing_removal;
pub use insert_missed::insert_missed;
pub use swap_closer::{swap_closer, SwapCloserReport};

use crate::matrix::DistanceMatrix;
use isr_core::models::{Environment, Solution, WaypointId};
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Total length of an ordered waypoint list through the matrix.
pub(crate) fn order_length(order: &[WaypointId], matrix: &DistanceMatrix) -> f64 {
    order
        .windows(2)
        .map(|w| matrix.distance_between(w[0].as_str(), w[1].as_str()))
        .sum()
}

/// Priority sum of the targets in an order.
pub(crate) fn order_points(order: &[WaypointId], env: &Environment) -> u32 {
    order
        .iter()
        .filter(|w| w.is_target())
        .filter_map(|w| env.target(w.as_str()))
        .map(|t| t.priority)
        .sum()
}

/// Per-drone waypoint orders of a solution, for in-place manipulation.
pub(crate) fn orders_of(solution: &Solution) -> BTreeMap<String, Vec<WaypointId>> {
    solution
        .routes
        .iter()
        .map(|(id, route)| (id.clone(), route.waypoints.clone()))
        .collect()
}

/// Stable hash of a set of orders, used for cycle detection.
pub(crate) fn hash_orders(orders: &BTreeMap<String, Vec<WaypointId>>) -> u64 {
    let mut hasher = DefaultHasher::new();
    for (drone_id, order) in orders {
        drone_id.hash(&mut hasher);
        for w in order {
            w.as_str().hash(&mut hasher);
        }
    }
    hasher.finish()
}

/// Regenerate `allocations` from route waypoints so the two stay in
/// lockstep after edits. Empty allocations are omitted.
pub(crate) fn allocations_from_routes(solution: &mut Solution) {
    let mut allocations: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (drone_id, route) in &solution.routes {
        let visited = route.visited_targets();
        if !visited.is_empty() {
            allocations.insert(drone_id.clone(), visited);
        }
    }
    solution.allocations = allocations;
}
