//! End-to-end mission flow tests.
//!
//! Each case builds a fresh engine, runs the full pipeline through the
//! state machine, and checks the committed segments and playback
//! geometry.

use isr_core::geometry::{point_along_polyline, polyline_length, Point, EPS};
use isr_core::models::{
    Airport, DroneConfig, EndSpec, Environment, Sam, Target, TargetType,
};
use isr_mission::io::{export_mission, import, ImportedMission};
use isr_mission::{MissionEngine, Mode};
use isr_planner::{CancelToken, Planner, Strategy};
use std::collections::BTreeMap;
use std::sync::Arc;

fn scenario_env(sams: Vec<Sam>) -> Environment {
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
        synthetic_starts: BTreeMap::new(),
    }
}

fn single_drone(end: EndSpec, fuel: f64) -> BTreeMap<String, DroneConfig> {
    let mut configs = BTreeMap::new();
    configs.insert(
        "D1".to_string(),
        DroneConfig {
            enabled: true,
            fuel_budget: fuel,
            start_airport: "A1".into(),
            end_airport: end,
            target_access: TargetType::ALL.iter().copied().collect(),
        },
    );
    configs
}

/// Scenario: simple plan. Both targets fit the budget; the route runs
/// airport to airport through them.
#[test]
fn test_simple_plan_end_to_end() {
    let mut engine = MissionEngine::new(
        scenario_env(vec![]),
        single_drone(EndSpec::Airport("A2".into()), 120.0),
    )
    .unwrap();

    let solution = engine.solve(Strategy::Efficient, &CancelToken::new()).unwrap();
    let route = &solution.routes["D1"];
    assert_eq!(route.points, 8);
    let ids: Vec<&str> = route.waypoints.iter().map(|w| w.as_str()).collect();
    assert!(ids == ["A1", "T1", "T2", "A2"] || ids == ["A1", "T2", "T1", "A2"]);
    // 2 * sqrt(40^2 + 10^2) + 20, and within fuel
    let expected = 2.0 * 1700.0_f64.sqrt() + 20.0;
    assert!((route.distance - expected).abs() < 1e-6);

    // Invariant: committed segment deep-equals the accepted draft
    let draft = solution.clone();
    engine.accept_solution().unwrap();
    let committed = &engine.store().get(0).unwrap().solution;
    assert_eq!(
        serde_json::to_value(&committed.routes).unwrap(),
        serde_json::to_value(&draft.routes).unwrap()
    );
}

/// Scenario: SAM detour. The leg between the targets must route around
/// the SAM and the mission gets strictly longer.
#[test]
fn test_sam_detour_end_to_end() {
    let cancel = CancelToken::new();
    let mut flat_engine = MissionEngine::new(
        scenario_env(vec![]),
        single_drone(EndSpec::Airport("A2".into()), 200.0),
    )
    .unwrap();
    let flat_distance = flat_engine
        .solve(Strategy::Efficient, &cancel)
        .unwrap()
        .routes["D1"]
        .distance;

    let sam = Sam { pos: [50.0, 50.0], range: 8.0 };
    let mut engine = MissionEngine::new(
        scenario_env(vec![sam]),
        single_drone(EndSpec::Airport("A2".into()), 200.0),
    )
    .unwrap();
    let solution = engine.solve(Strategy::Efficient, &cancel).unwrap();
    let route = &solution.routes["D1"];

    assert_eq!(route.points, 8);
    assert!(route.distance > flat_distance + EPS);
    let center = Point::new(50.0, 50.0);
    for p in &route.trajectory {
        assert!(p.dist(center) >= 8.0 - EPS);
    }
    // Fuel invariant holds through the detour
    assert!(route.distance <= 200.0 + EPS);
    assert!((polyline_length(&route.trajectory) - route.distance).abs() < EPS);
}

/// Scenario: cut and replan. Freeze at mission distance 40, replan from
/// the synthetic start, and check the combined playback length.
#[test]
fn test_cut_and_replan_end_to_end() {
    let cancel = CancelToken::new();
    let mut engine = MissionEngine::new(
        scenario_env(vec![]),
        single_drone(EndSpec::Airport("A2".into()), 120.0),
    )
    .unwrap();

    engine.solve(Strategy::Efficient, &cancel).unwrap();
    engine.accept_solution().unwrap();
    let original = engine.store().get(0).unwrap().solution.routes["D1"].clone();

    engine.animate().unwrap();
    engine.cut(40.0).unwrap();
    assert_eq!(engine.mode(), Mode::Checkpoint);

    // Synthetic start at the polyline-40 point
    let frozen = Point::from(engine.env().synthetic_starts["D1_START"]);
    let expected = point_along_polyline(&original.trajectory, 40.0);
    assert!(frozen.approx_eq(expected));

    engine.solve(Strategy::Efficient, &cancel).unwrap();
    engine.accept_solution().unwrap();

    let segment = engine.store().get(1).unwrap();
    assert_eq!(segment.cut_distance, Some(40.0));
    assert!(segment.is_checkpoint_replan);

    // The synthetic-start prefix is preserved verbatim: combined length
    // equals 40 plus the replanned suffix, within epsilon
    let suffix = segment.solution.routes["D1"].distance;
    let combined = engine.build_combined_routes();
    let total = polyline_length(&combined["D1"]);
    assert!((total - (40.0 + suffix)).abs() < 2.0 * EPS);
    assert!(combined["D1"].first().unwrap().approx_eq(Point::new(10.0, 50.0)));
}

/// Cutting past both targets marks them visited and the replan flies
/// straight home.
#[test]
fn test_cut_past_targets_marks_visited() {
    let cancel = CancelToken::new();
    let mut engine = MissionEngine::new(
        scenario_env(vec![]),
        single_drone(EndSpec::Airport("A2".into()), 120.0),
    )
    .unwrap();
    engine.solve(Strategy::Efficient, &cancel).unwrap();
    engine.accept_solution().unwrap();
    engine.animate().unwrap();

    // Both visit points lie before 65 (41.23 and 61.23)
    engine.cut(65.0).unwrap();
    assert!(engine.visited_targets().contains("T1"));
    assert!(engine.visited_targets().contains("T2"));
    assert_eq!(engine.env().targets.len(), 0);

    engine.solve(Strategy::Efficient, &cancel).unwrap();
    engine.accept_solution().unwrap();
    let replan = &engine.store().get(1).unwrap().solution.routes["D1"];
    assert_eq!(replan.points, 0);
    let ids: Vec<&str> = replan.waypoints.iter().map(|w| w.as_str()).collect();
    assert_eq!(ids, ["D1_START", "A2"]);
}

/// Scenario: any-airport endpoint. Targets clustered near A2 pull the
/// route to end there.
#[test]
fn test_any_airport_end_to_end() {
    let mut env = scenario_env(vec![]);
    env.targets[0].x = 78.0;
    env.targets[1].x = 82.0;
    let mut engine =
        MissionEngine::new(env, single_drone(EndSpec::Any, 200.0)).unwrap();
    let solution = engine.solve(Strategy::Efficient, &CancelToken::new()).unwrap();
    assert_eq!(
        solution.routes["D1"].waypoints.last().unwrap().as_str(),
        "A2"
    );
    assert_eq!(solution.routes["D1"].points, 8);
}

/// Mission export/import round trip: segments are re-derived by solving
/// in order, and playback geometry survives.
#[test]
fn test_mission_export_import_round_trip() {
    let cancel = CancelToken::new();
    let mut engine = MissionEngine::new(
        scenario_env(vec![]),
        single_drone(EndSpec::Airport("A2".into()), 120.0),
    )
    .unwrap();
    engine.solve(Strategy::Efficient, &cancel).unwrap();
    engine.accept_solution().unwrap();
    engine.animate().unwrap();
    engine.cut(40.0).unwrap();
    engine.solve(Strategy::Efficient, &cancel).unwrap();
    engine.accept_solution().unwrap();

    let exported = export_mission(engine.store());
    let imported = import(&exported, "mission_N2_.json").unwrap();
    assert!(matches!(imported, ImportedMission::Segmented { .. }));

    let restored =
        MissionEngine::restore(imported, Arc::new(Planner::new()), &cancel).unwrap();
    assert_eq!(restored.store().len(), 2);
    assert_eq!(restored.mode(), Mode::ReadyToAnimate);

    let original_len = polyline_length(&engine.build_combined_routes()["D1"]);
    let restored_len = polyline_length(&restored.build_combined_routes()["D1"]);
    assert!((original_len - restored_len).abs() < 2.0 * EPS);
}

/// Swap-Closer run bookkeeping stays bounded and never worsens the
/// solution, even on adversarial layouts.
#[test]
fn test_swap_closer_bounded_and_non_worsening() {
    let mut env = scenario_env(vec![]);
    // A tight mid-field cluster reachable by both drones
    env.targets = vec![
        Target { id: "T1".into(), x: 48.0, y: 49.0, target_type: TargetType::A, priority: 5 },
        Target { id: "T2".into(), x: 52.0, y: 51.0, target_type: TargetType::A, priority: 5 },
        Target { id: "T3".into(), x: 50.0, y: 50.0, target_type: TargetType::A, priority: 5 },
        Target { id: "T4".into(), x: 49.0, y: 51.0, target_type: TargetType::A, priority: 5 },
    ];
    let mut configs = single_drone(EndSpec::Airport("A1".into()), 300.0);
    configs.insert(
        "D2".to_string(),
        DroneConfig {
            enabled: true,
            fuel_budget: 300.0,
            start_airport: "A2".into(),
            end_airport: EndSpec::Airport("A2".into()),
            target_access: TargetType::ALL.iter().copied().collect(),
        },
    );

    let planner = Planner::new();
    let cancel = CancelToken::new();
    let solution = planner
        .solve(&env, &configs, &isr_planner::SolveOptions::default(), &cancel)
        .unwrap();
    let before_points = solution.total_points();
    let before_distance = solution.total_distance();

    let (after, report) = planner.swap_closer(&solution, &env, &configs).unwrap();
    assert!(report.iterations <= 12);
    assert_eq!(after.total_points(), before_points);
    assert!(after.total_distance() <= before_distance + EPS);
    if report.cycle_detected {
        // Cycle handling retains the best-scoring iteration
        assert!(after.total_distance() <= before_distance + EPS);
    } else {
        assert!(report.converged || report.iterations == 12);
    }
}

/// Permissions reflect the mode at every step of the flow.
#[test]
fn test_permissions_follow_modes() {
    use isr_mission::MissionAction;
    let mut engine = MissionEngine::new(
        scenario_env(vec![]),
        single_drone(EndSpec::Airport("A2".into()), 120.0),
    )
    .unwrap();
    assert!(engine.permissions().contains(&MissionAction::Solve));
    engine.solve(Strategy::Efficient, &CancelToken::new()).unwrap();
    assert!(engine.permissions().contains(&MissionAction::AcceptSolution));
    assert!(!engine.permissions().contains(&MissionAction::Animate));
    engine.accept_solution().unwrap();
    assert!(engine.permissions().contains(&MissionAction::Animate));
}
