//! Trajectory expansion: ordered waypoints to the flown polyline.
//!
//! Each route edge reuses the shortest-path polyline cached in the
//! distance matrix; junction points are de-duplicated within epsilon.
//! The assembled polyline is re-validated against the SAM polygons -- a
//! violation here means the matrix is inconsistent and the route is
//! rejected as an internal invariant error.

use crate::errors::PlanError;
use crate::matrix::DistanceMatrix;
use isr_core::geometry::{polyline_length, Point};
use isr_core::models::{Environment, Route, WaypointId};
use tracing::error;

/// Expand an ordered waypoint list into the flown polyline.
pub fn build_trajectory(
    order: &[WaypointId],
    matrix: &DistanceMatrix,
) -> Result<Vec<Point>, PlanError> {
    if order.len() < 2 {
        return Ok(Vec::new());
    }

    let mut trajectory: Vec<Point> = Vec::new();
    for pair in order.windows(2) {
        let (a, b) = (&pair[0], &pair[1]);
        let path = matrix.path_between(a.as_str(), b.as_str()).ok_or_else(|| {
            PlanError::InvariantViolation(format!(
                "no cached path for edge {} -> {}",
                a.as_str(),
                b.as_str()
            ))
        })?;
        for p in path {
            if !trajectory.last().map(|q| q.approx_eq(p)).unwrap_or(false) {
                trajectory.push(p);
            }
        }
    }

    // The matrix only hands out SAM-clear polylines; verify anyway.
    for w in trajectory.windows(2) {
        for poly in &matrix.polygons {
            if poly.blocks_segment(w[0], w[1]) {
                error!("trajectory crosses a SAM polygon, marking route invalid");
                return Err(PlanError::InvariantViolation(
                    "trajectory enters a SAM polygon".into(),
                ));
            }
        }
    }

    Ok(trajectory)
}

/// Assemble a full [`Route`] from an ordered waypoint list.
///
/// `distance` is the polyline length of the trajectory, which equals the
/// fuel consumed; `points` is the priority sum of visited targets.
pub fn rebuild_route(
    drone_id: &str,
    order: &[WaypointId],
    env: &Environment,
    matrix: &DistanceMatrix,
) -> Result<Route, PlanError> {
    if order.is_empty() {
        return Ok(Route::empty(drone_id));
    }

    let trajectory = build_trajectory(order, matrix)?;
    let distance = polyline_length(&trajectory);
    let points = order
        .iter()
        .filter(|w| w.is_target())
        .filter_map(|w| env.target(w.as_str()))
        .map(|t| t.priority)
        .sum();

    Ok(Route {
        drone_id: drone_id.to_string(),
        waypoints: order.to_vec(),
        trajectory,
        points,
        distance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::compute_matrix;
    use isr_core::geometry::EPS;
    use isr_core::models::{Airport, Sam, Target, TargetType};

    fn env() -> Environment {
        Environment {
            airports: vec![
                Airport { id: "A1".into(), x: 10.0, y: 50.0 },
                Airport { id: "A2".into(), x: 90.0, y: 50.0 },
            ],
            targets: vec![Target {
                id: "T1".into(),
                x: 50.0,
                y: 60.0,
                target_type: TargetType::A,
                priority: 5,
            }],
            sams: vec![Sam { pos: [50.0, 45.0], range: 10.0 }],
            synthetic_starts: Default::default(),
        }
    }

    fn wp(id: &str) -> WaypointId {
        WaypointId::parse(id).unwrap()
    }

    #[test]
    fn test_trajectory_concatenates_without_duplicate_junctions() {
        let env = env();
        let matrix = compute_matrix(&env);
        let order = [wp("A1"), wp("T1"), wp("A2")];
        let trajectory = build_trajectory(&order, &matrix).unwrap();
        for w in trajectory.windows(2) {
            assert!(w[0].dist(w[1]) > EPS);
        }
    }

    #[test]
    fn test_route_distance_equals_trajectory_length() {
        let env = env();
        let matrix = compute_matrix(&env);
        let order = [wp("A1"), wp("T1"), wp("A2")];
        let route = rebuild_route("D1", &order, &env, &matrix).unwrap();
        assert!((polyline_length(&route.trajectory) - route.distance).abs() < 1e-9);
        assert_eq!(route.points, 5);
    }

    #[test]
    fn test_empty_order_is_empty_route() {
        let env = env();
        let matrix = compute_matrix(&env);
        let route = rebuild_route("D1", &[], &env, &matrix).unwrap();
        assert!(route.trajectory.is_empty());
        assert_eq!(route.distance, 0.0);
    }

    #[test]
    fn test_trajectory_avoids_sam_interior() {
        let env = env();
        let matrix = compute_matrix(&env);
        let order = [wp("A1"), wp("A2")];
        let trajectory = build_trajectory(&order, &matrix).unwrap();
        let center = Point::new(50.0, 45.0);
        for p in &trajectory {
            assert!(p.dist(center) >= 10.0 - EPS);
        }
    }
}
