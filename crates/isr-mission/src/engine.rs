//! The mission engine.
//!
//! One `MissionEngine` value owns the state machine, the segment store,
//! the working environment and fleet configuration, the draft solution,
//! and a handle to the planner (and through it the distance-matrix
//! cache). Committed state is written only by `accept_solution`,
//! `reset`, and segment truncation; everything else works on drafts.

use crate::errors::MissionError;
use crate::io::ImportedMission;
use crate::machine::{permissions, CheckpointSource, MissionAction, Mode, StateMachine};
use crate::segments::{SegmentIndex, SegmentedStore};
use isr_core::geometry::{point_along_polyline, polyline_length, Point};
use isr_core::models::{DroneConfig, Environment, Solution};
use isr_planner::{CancelToken, Planner, SolveOptions, Strategy};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Tunables with historically contested defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// A target counts as visited at a cut when the trajectory passes
    /// within this many world units of it.
    pub visit_radius: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { visit_radius: 5.0 }
    }
}

/// Snapshot taken when animation pauses.
#[derive(Debug, Clone)]
pub struct PauseContext {
    pub mission_distance: f64,
    /// Distance actually traveled per drone (clamped to its own route).
    pub per_drone: BTreeMap<String, f64>,
}

/// A cut waiting for its replan to be accepted. Keeps the pre-cut
/// environment and fleet so a discarded draft can restore them.
#[derive(Debug, Clone)]
struct PendingCut {
    mission_distance: f64,
    cut_positions: BTreeMap<String, [f64; 2]>,
    prev_env: Environment,
    prev_configs: BTreeMap<String, DroneConfig>,
}

/// Post-optimizer selector for [`MissionEngine::optimize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizePass {
    InsertMissed,
    SwapCloser,
    CrossingRemoval,
}

pub struct MissionEngine {
    machine: StateMachine,
    store: SegmentedStore,
    planner: Arc<Planner>,
    config: EngineConfig,
    /// Committed working environment (rewritten by cuts and edits).
    env: Environment,
    drone_configs: BTreeMap<String, DroneConfig>,
    draft_solution: Option<Solution>,
    draft_env: Option<Environment>,
    /// Pre-edit snapshot restored by `cancel_edits`.
    edit_backup: Option<(Environment, BTreeMap<String, DroneConfig>)>,
    visited_targets: BTreeSet<String>,
    pause_context: Option<PauseContext>,
    pending_cut: Option<PendingCut>,
    current_segment_index: SegmentIndex,
}

impl MissionEngine {
    pub fn new(
        env: Environment,
        drone_configs: BTreeMap<String, DroneConfig>,
    ) -> Result<Self, MissionError> {
        Self::with_planner(env, drone_configs, Arc::new(Planner::new()))
    }

    /// Engines sharing a planner share its matrix cache.
    pub fn with_planner(
        mut env: Environment,
        drone_configs: BTreeMap<String, DroneConfig>,
        planner: Arc<Planner>,
    ) -> Result<Self, MissionError> {
        env.normalize();
        env.validate()?;
        Ok(Self {
            machine: StateMachine::new(),
            store: SegmentedStore::new(),
            planner,
            config: EngineConfig::default(),
            env,
            drone_configs,
            draft_solution: None,
            draft_env: None,
            edit_backup: None,
            visited_targets: BTreeSet::new(),
            pause_context: None,
            pending_cut: None,
            current_segment_index: 0,
        })
    }

    pub fn set_config(&mut self, config: EngineConfig) {
        self.config = config;
    }

    /// Rebuild a mission from an import. Solutions are never stored in
    /// exports, so each segment is re-solved in order.
    pub fn restore(
        imported: ImportedMission,
        planner: Arc<Planner>,
        cancel: &CancelToken,
    ) -> Result<Self, MissionError> {
        let specs = match imported {
            ImportedMission::Environment { env, drone_configs } => {
                return Self::with_planner(env, drone_configs, planner);
            }
            ImportedMission::Segmented { segments } => segments,
        };
        if specs.is_empty() {
            return Err(MissionError::Import("mission carries no segments".into()));
        }

        let mut store = SegmentedStore::new();
        for spec in &specs {
            let options = SolveOptions {
                is_checkpoint_replan: spec.index > 0,
                visited_targets: spec.visited_targets.clone(),
                ..SolveOptions::default()
            };
            let solution = planner.solve(&spec.env, &spec.drone_configs, &options, cancel)?;
            store.add_segment(
                spec.env.clone(),
                solution,
                spec.drone_configs.clone(),
                spec.cut_distance,
                spec.cut_positions.clone(),
                spec.visited_targets.clone(),
                spec.index > 0,
            )?;
        }

        let last = specs.last().expect("at least one segment");
        info!(segments = specs.len(), "mission restored from import");
        Ok(Self {
            machine: StateMachine::restored(),
            store,
            planner,
            config: EngineConfig::default(),
            env: last.env.clone(),
            drone_configs: last.drone_configs.clone(),
            draft_solution: None,
            draft_env: None,
            edit_backup: None,
            visited_targets: last.visited_targets.clone(),
            pause_context: None,
            pending_cut: None,
            current_segment_index: specs.len() - 1,
        })
    }

    // ==== READ SIDE ====

    pub fn mode(&self) -> Mode {
        self.machine.mode()
    }

    pub fn checkpoint_source(&self) -> CheckpointSource {
        self.machine.checkpoint_source()
    }

    pub fn permissions(&self) -> &'static [MissionAction] {
        permissions(self.machine.mode())
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn drone_configs(&self) -> &BTreeMap<String, DroneConfig> {
        &self.drone_configs
    }

    pub fn store(&self) -> &SegmentedStore {
        &self.store
    }

    pub fn draft_solution(&self) -> Option<&Solution> {
        self.draft_solution.as_ref()
    }

    pub fn visited_targets(&self) -> &BTreeSet<String> {
        &self.visited_targets
    }

    pub fn pause_context(&self) -> Option<&PauseContext> {
        self.pause_context.as_ref()
    }

    pub fn current_segment_index(&self) -> SegmentIndex {
        self.current_segment_index
    }

    /// Combined per-drone playback polylines up to the current segment.
    pub fn build_combined_routes(&self) -> BTreeMap<String, Vec<Point>> {
        self.store.build_combined_routes(self.current_segment_index)
    }

    // ==== EDITING ====

    pub fn enter_edit(&mut self) -> Result<(), MissionError> {
        self.machine.apply(MissionAction::EnterEdit)?;
        self.edit_backup = Some((self.env.clone(), self.drone_configs.clone()));
        Ok(())
    }

    /// Commit an edited environment and fleet. Invalidates the matrix
    /// cache and merges the edits into later segments.
    pub fn accept_edits(
        &mut self,
        mut env: Environment,
        drone_configs: BTreeMap<String, DroneConfig>,
    ) -> Result<(), MissionError> {
        env.normalize();
        env.validate()?;
        self.machine.apply(MissionAction::AcceptEdits)?;
        self.planner.clear_matrix_cache();
        self.store
            .merge_env_forward_from_current(self.current_segment_index, &env);
        self.env = env;
        self.drone_configs = drone_configs;
        self.edit_backup = None;
        Ok(())
    }

    pub fn cancel_edits(&mut self) -> Result<(), MissionError> {
        self.machine.apply(MissionAction::CancelEdits)?;
        if let Some((env, configs)) = self.edit_backup.take() {
            self.env = env;
            self.drone_configs = configs;
        }
        Ok(())
    }

    // ==== PLANNING ====

    /// Run the planning pipeline and hold the result as a draft.
    pub fn solve(
        &mut self,
        strategy: Strategy,
        cancel: &CancelToken,
    ) -> Result<&Solution, MissionError> {
        // Validate the transition up front; the solve itself can take a
        // while and must not run from a forbidden mode.
        self.machine.check(MissionAction::Solve)?;

        let options = SolveOptions {
            strategy,
            is_checkpoint_replan: self.machine.mode() == Mode::Checkpoint,
            visited_targets: self.visited_targets.clone(),
            ..SolveOptions::default()
        };
        let solution = self
            .planner
            .solve(&self.env, &self.drone_configs, &options, cancel)?;

        self.machine
            .apply(MissionAction::Solve)
            .expect("transition validated before solving");
        self.draft_env = Some(self.env.clone());
        self.draft_solution = Some(solution);
        Ok(self.draft_solution.as_ref().expect("draft just stored"))
    }

    /// Run one post-optimizer over the draft.
    pub fn optimize(&mut self, pass: OptimizePass) -> Result<&Solution, MissionError> {
        self.machine.check(MissionAction::Optimize)?;
        let draft = self
            .draft_solution
            .as_ref()
            .ok_or_else(|| MissionError::Store("no draft to optimize".into()))?;
        let draft_env = self.draft_env.as_ref().expect("draft env accompanies draft");

        let improved = match pass {
            OptimizePass::InsertMissed => {
                self.planner
                    .insert_missed(draft, draft_env, &self.drone_configs)?
            }
            OptimizePass::SwapCloser => {
                self.planner
                    .swap_closer(draft, draft_env, &self.drone_configs)?
                    .0
            }
            OptimizePass::CrossingRemoval => {
                self.planner
                    .crossing_removal(draft, draft_env, &self.drone_configs)?
                    .0
            }
        };

        self.machine
            .apply(MissionAction::Optimize)
            .expect("transition validated before optimizing");
        self.draft_solution = Some(improved);
        Ok(self.draft_solution.as_ref().expect("draft just stored"))
    }

    /// Commit the draft: append (or replace) a segment. Splicing of a
    /// checkpoint replan happens exactly here, once.
    pub fn accept_solution(&mut self) -> Result<SegmentIndex, MissionError> {
        self.machine.check(MissionAction::AcceptSolution)?;
        let solution = self
            .draft_solution
            .clone()
            .ok_or_else(|| MissionError::Store("no draft to accept".into()))?;
        let env = self.draft_env.clone().expect("draft env accompanies draft");

        let index = if let Some(cut) = self.pending_cut.take() {
            // Mid-replay cuts discard the stale suffix before appending.
            self.store.truncate_after(self.current_segment_index);
            self.store.add_segment(
                env,
                solution,
                self.drone_configs.clone(),
                Some(cut.mission_distance),
                cut.cut_positions,
                self.visited_targets.clone(),
                true,
            )?
        } else if self.store.is_empty() {
            let cut_positions = self.start_positions();
            self.store.add_segment(
                env,
                solution,
                self.drone_configs.clone(),
                None,
                cut_positions,
                self.visited_targets.clone(),
                false,
            )?
        } else {
            // Re-solve before animation replaces the first segment.
            self.store
                .replace_segment(0, env, solution, self.drone_configs.clone())?;
            0
        };

        self.machine
            .apply(MissionAction::AcceptSolution)
            .expect("transition validated before committing");
        self.machine.set_has_committed(true);
        self.current_segment_index = index;
        self.draft_solution = None;
        self.draft_env = None;
        info!(segment = index, "solution accepted");
        Ok(index)
    }

    /// Drop the draft and restore the committed state, including the
    /// pre-cut environment when a cut was pending.
    pub fn discard_draft(&mut self) -> Result<(), MissionError> {
        self.machine.apply(MissionAction::DiscardDraft)?;
        if let Some(cut) = self.pending_cut.take() {
            self.env = cut.prev_env;
            self.drone_configs = cut.prev_configs;
        }
        self.draft_solution = None;
        self.draft_env = None;
        Ok(())
    }

    // ==== ANIMATION & CHECKPOINTS ====

    pub fn animate(&mut self) -> Result<(), MissionError> {
        self.machine.apply(MissionAction::Animate)?;
        Ok(())
    }

    pub fn pause(&mut self, mission_distance: f64) -> Result<(), MissionError> {
        self.machine.apply(MissionAction::Pause)?;
        let combined = self.build_combined_routes();
        let per_drone = combined
            .iter()
            .map(|(drone_id, poly)| {
                (drone_id.clone(), mission_distance.min(polyline_length(poly)))
            })
            .collect();
        self.pause_context = Some(PauseContext {
            mission_distance,
            per_drone,
        });
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), MissionError> {
        self.machine.apply(MissionAction::Resume)?;
        self.pause_context = None;
        Ok(())
    }

    pub fn complete_animation(&mut self) -> Result<(), MissionError> {
        self.machine.apply(MissionAction::Complete)?;
        Ok(())
    }

    /// Freeze the fleet at `mission_distance` and prepare a replan
    /// problem from the frozen positions.
    pub fn cut(&mut self, mission_distance: f64) -> Result<(), MissionError> {
        self.machine.check(MissionAction::Cut)?;
        if mission_distance < 0.0 {
            return Err(MissionError::InvalidInput(format!(
                "negative mission distance {mission_distance}"
            )));
        }
        if let Some(last) = self.store.get(self.current_segment_index) {
            if mission_distance <= last.start_distance() {
                return Err(MissionError::InvalidInput(format!(
                    "cut at {mission_distance} not beyond segment start {}",
                    last.start_distance()
                )));
            }
        }

        let combined = self.build_combined_routes();

        // Frozen positions: the point each drone has reached.
        let mut cut_positions: BTreeMap<String, [f64; 2]> = BTreeMap::new();
        for (drone_id, poly) in &combined {
            if poly.len() >= 2 {
                let p = point_along_polyline(poly, mission_distance);
                cut_positions.insert(drone_id.clone(), [p.x, p.y]);
            } else if let Some(p) = poly.first() {
                cut_positions.insert(drone_id.clone(), [p.x, p.y]);
            }
        }

        // Visited targets: passed along the flown prefix, within radius.
        let newly_visited = self.detect_visited(mission_distance);
        self.visited_targets.extend(newly_visited.iter().cloned());
        debug!(
            mission_distance,
            newly_visited = newly_visited.len(),
            "cut freezing fleet"
        );

        // Synthesize the replan environment.
        let prev_env = self.env.clone();
        let prev_configs = self.drone_configs.clone();

        let mut new_env = self.env.clone();
        new_env.remove_targets(&self.visited_targets);
        new_env.synthetic_starts.clear();
        for (drone_id, pos) in &cut_positions {
            let start_id = synthetic_start_id(drone_id, &cut_positions);
            new_env.synthetic_starts.insert(start_id.clone(), *pos);
            if let Some(cfg) = self.drone_configs.get_mut(drone_id) {
                cfg.start_airport = start_id;
            }
        }
        new_env.validate()?;
        self.env = new_env;
        self.planner.clear_matrix_cache();

        self.pending_cut = Some(PendingCut {
            mission_distance,
            cut_positions,
            prev_env,
            prev_configs,
        });
        self.pause_context = None;
        self.machine
            .apply(MissionAction::Cut)
            .expect("transition validated before cutting");
        Ok(())
    }

    /// Back to IDLE. Later segments are garbage-collected; segment 0, if
    /// any, is kept as the mission baseline and its environment restored.
    pub fn reset(&mut self) -> Result<(), MissionError> {
        self.machine.apply(MissionAction::Reset)?;
        self.store.truncate_after(0);
        if let Some(first) = self.store.get(0) {
            self.env = first.env.clone();
            self.drone_configs = first.drone_configs.clone();
        } else if let Some(cut) = &self.pending_cut {
            self.env = cut.prev_env.clone();
            self.drone_configs = cut.prev_configs.clone();
        }
        self.env.synthetic_starts.clear();
        self.current_segment_index = 0;
        self.draft_solution = None;
        self.draft_env = None;
        self.edit_backup = None;
        self.visited_targets.clear();
        self.pause_context = None;
        self.pending_cut = None;
        self.machine.set_has_committed(!self.store.is_empty());
        info!("mission reset");
        Ok(())
    }

    // ==== INTERNALS ====

    /// Start-of-mission marker positions (segment 0 has no cut).
    fn start_positions(&self) -> BTreeMap<String, [f64; 2]> {
        let mut positions = BTreeMap::new();
        for (drone_id, cfg) in &self.drone_configs {
            if !cfg.enabled {
                continue;
            }
            if let Some(airport) = self.env.airport(&cfg.start_airport) {
                positions.insert(drone_id.clone(), [airport.x, airport.y]);
            } else if let Some(pos) = self.env.synthetic_starts.get(&cfg.start_airport) {
                positions.insert(drone_id.clone(), *pos);
            }
        }
        positions
    }

    /// Targets whose visit point lies on the flown prefix: cumulative
    /// mission distance at the closest trajectory vertex is within the
    /// cut, and the vertex passes within the visit radius.
    fn detect_visited(&self, mission_distance: f64) -> BTreeSet<String> {
        let mut visited = BTreeSet::new();
        let Some(segment) = self.store.get(self.current_segment_index) else {
            return visited;
        };
        let base = segment.start_distance();

        for route in segment.solution.routes.values() {
            if route.trajectory.len() < 2 {
                continue;
            }
            for waypoint in &route.waypoints {
                if !waypoint.is_target() {
                    continue;
                }
                let Some(target) = segment.env.target(waypoint.as_str()) else {
                    continue;
                };
                let pos = target.pos();

                let mut cumulative = 0.0;
                let mut best_dist = f64::INFINITY;
                let mut best_cumulative = 0.0;
                let mut prev: Option<Point> = None;
                for point in &route.trajectory {
                    if let Some(prev) = prev {
                        cumulative += prev.dist(*point);
                    }
                    let d = pos.dist(*point);
                    if d < best_dist {
                        best_dist = d;
                        best_cumulative = cumulative;
                    }
                    prev = Some(*point);
                }

                if best_dist <= self.config.visit_radius
                    && base + best_cumulative <= mission_distance
                {
                    visited.insert(target.id.clone());
                }
            }
        }
        visited
    }
}

/// `D{n}_START` id for a drone. Drone ids of the form `D<n>` reuse their
/// own number; anything else falls back to its rank in the fleet.
fn synthetic_start_id(drone_id: &str, fleet: &BTreeMap<String, [f64; 2]>) -> String {
    let digits: String = drone_id.chars().filter(|c| c.is_ascii_digit()).collect();
    if !digits.is_empty() {
        return format!("D{digits}_START");
    }
    let rank = fleet.keys().position(|k| k == drone_id).unwrap_or(0) + 1;
    format!("D{rank}_START")
}
