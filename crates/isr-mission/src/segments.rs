//! The segmented mission store.
//!
//! A mission is an ordered sequence of immutable segments, one per
//! accepted solve. Segments are owned by the store and referenced by
//! index everywhere else. Combined playback truncates each segment's
//! trajectories at its successor's cut distance (segment-relative) and
//! de-duplicates the junctions.

use crate::errors::MissionError;
use chrono::{DateTime, Utc};
use isr_core::geometry::{polyline_length, split_polyline_at_distance, Point, EPS};
use isr_core::models::{DroneConfig, Environment, Solution};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub type SegmentIndex = usize;

/// One accepted solve. Never mutated after creation; a later cut may
/// discard it wholesale via [`SegmentedStore::truncate_after`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub index: SegmentIndex,
    pub env: Environment,
    pub solution: Solution,
    /// Fleet configuration the segment was solved with.
    pub drone_configs: BTreeMap<String, DroneConfig>,
    /// Cumulative mission distance at which this segment begins;
    /// `None` for segment 0.
    pub cut_distance: Option<f64>,
    /// Per-drone position at the start of this segment (marker display).
    pub cut_positions: BTreeMap<String, [f64; 2]>,
    /// Targets visited up to and including this segment.
    pub visited_targets: BTreeSet<String>,
    pub is_checkpoint_replan: bool,
    pub created_at: DateTime<Utc>,
}

impl Segment {
    /// Mission distance at which this segment begins.
    pub fn start_distance(&self) -> f64 {
        self.cut_distance.unwrap_or(0.0)
    }
}

/// Owns the committed mission history.
#[derive(Debug, Clone, Default)]
pub struct SegmentedStore {
    segments: Vec<Segment>,
}

impl SegmentedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn get(&self, index: SegmentIndex) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn last(&self) -> Option<&Segment> {
        self.segments.last()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Append an immutable segment. The first segment must carry no cut
    /// distance; every later one must begin strictly after its
    /// predecessor.
    #[allow(clippy::too_many_arguments)]
    pub fn add_segment(
        &mut self,
        env: Environment,
        solution: Solution,
        drone_configs: BTreeMap<String, DroneConfig>,
        cut_distance: Option<f64>,
        cut_positions: BTreeMap<String, [f64; 2]>,
        visited_targets: BTreeSet<String>,
        is_checkpoint_replan: bool,
    ) -> Result<SegmentIndex, MissionError> {
        match (self.segments.last(), cut_distance) {
            (None, Some(d)) => {
                return Err(MissionError::Store(format!(
                    "segment 0 cannot carry a cut distance ({d})"
                )));
            }
            (Some(prev), None) => {
                return Err(MissionError::Store(format!(
                    "segment {} requires a cut distance",
                    prev.index + 1
                )));
            }
            (Some(prev), Some(d)) => {
                let floor = prev.start_distance();
                if d <= floor || d < 0.0 {
                    return Err(MissionError::Store(format!(
                        "segment cut distance {d} not after predecessor {floor}"
                    )));
                }
            }
            (None, None) => {}
        }

        let index = self.segments.len();
        self.segments.push(Segment {
            index,
            env,
            solution,
            drone_configs,
            cut_distance,
            cut_positions,
            visited_targets,
            is_checkpoint_replan,
            created_at: Utc::now(),
        });
        debug!(index, "segment committed");
        Ok(index)
    }

    /// Drop every segment after `index` (a cut happened mid-replay).
    pub fn truncate_after(&mut self, index: SegmentIndex) {
        if index + 1 < self.segments.len() {
            debug!(
                kept = index + 1,
                dropped = self.segments.len() - index - 1,
                "segments truncated"
            );
            self.segments.truncate(index + 1);
        }
    }

    /// Replace the solution of the first segment (a re-solve before any
    /// animation). Later segments are immutable.
    pub fn replace_segment(
        &mut self,
        index: SegmentIndex,
        env: Environment,
        solution: Solution,
        drone_configs: BTreeMap<String, DroneConfig>,
    ) -> Result<(), MissionError> {
        if index != 0 {
            return Err(MissionError::Store(format!(
                "only segment 0 may be replaced, not {index}"
            )));
        }
        if self.segments.len() > 1 {
            return Err(MissionError::Store(
                "cannot replace segment 0 once later segments exist".into(),
            ));
        }
        let Some(first) = self.segments.first_mut() else {
            return Err(MissionError::Store("no segment to replace".into()));
        };
        first.env = env;
        first.solution = solution;
        first.drone_configs = drone_configs;
        first.created_at = Utc::now();
        Ok(())
    }

    /// Per-drone playback polylines, concatenated across segments
    /// `0..=up_to`. Every segment but the last is truncated at its
    /// successor's cut distance, measured in segment-relative units.
    pub fn build_combined_routes(&self, up_to: SegmentIndex) -> BTreeMap<String, Vec<Point>> {
        let mut combined: BTreeMap<String, Vec<Point>> = BTreeMap::new();
        let up_to = up_to.min(self.segments.len().saturating_sub(1));

        for i in 0..=up_to {
            let Some(segment) = self.segments.get(i) else {
                break;
            };
            for (drone_id, route) in &segment.solution.routes {
                if route.trajectory.len() < 2 {
                    continue;
                }
                let piece: Vec<Point> = if i < up_to {
                    let next_start = self.segments[i + 1].start_distance();
                    let local_cut = next_start - segment.start_distance();
                    split_polyline_at_distance(&route.trajectory, local_cut).prefix
                } else {
                    route.trajectory.clone()
                };

                let slot = combined.entry(drone_id.clone()).or_default();
                for p in piece {
                    if !slot.last().map(|q| q.approx_eq(p)).unwrap_or(false) {
                        slot.push(p);
                    }
                }
            }
        }
        combined
    }

    /// Combined playback length for one drone up to `up_to`.
    pub fn combined_route_length(&self, drone_id: &str, up_to: SegmentIndex) -> f64 {
        self.build_combined_routes(up_to)
            .get(drone_id)
            .map(|poly| polyline_length(poly))
            .unwrap_or(0.0)
    }

    /// Merge environment edits (by id) into every segment after `idx`,
    /// preserving segment-local targets. SAM entries carry no id, so the
    /// edited SAM list replaces later lists wholesale. Idempotent.
    pub fn merge_env_forward_from_current(&mut self, idx: SegmentIndex, edited: &Environment) {
        for segment in self.segments.iter_mut().skip(idx + 1) {
            for airport in &mut segment.env.airports {
                if let Some(src) = edited.airport(&airport.id) {
                    airport.x = src.x;
                    airport.y = src.y;
                }
            }
            for target in &mut segment.env.targets {
                if let Some(src) = edited.target(&target.id) {
                    target.x = src.x;
                    target.y = src.y;
                    target.target_type = src.target_type;
                    target.priority = src.priority;
                }
            }
            for src in &edited.targets {
                if segment.env.target(&src.id).is_none() {
                    segment.env.targets.push(src.clone());
                }
            }
            segment.env.sams = edited.sams.clone();
        }
    }

    /// Sanity check used by tests and the engine: cut distances strictly
    /// increase along the mission.
    pub fn cut_distances_are_ordered(&self) -> bool {
        self.segments.windows(2).all(|w| {
            w[1].start_distance() > w[0].start_distance() - EPS
                && w[1].cut_distance.is_some()
        })
    }
}
