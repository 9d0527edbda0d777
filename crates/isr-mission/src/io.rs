//! Segmented mission import/export.
//!
//! Two export shapes share the `isr_env_v1` schema: a plain environment
//! (k = 1) and a segmented mission (k > 1). Solutions are never
//! exported; they are re-derived by solving each segment in order. The
//! filename carries the segment count as `_N{k}_`, and a legacy
//! `segmentInfo.segmentCuts` shape is still accepted on import.

use crate::errors::MissionError;
use crate::segments::SegmentedStore;
use isr_core::models::{DroneConfig, Environment};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const SCHEMA: &str = "isr_env_v1";

// ==== EXPORT SHAPES ====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentBundle {
    pub airports: Vec<isr_core::models::Airport>,
    pub targets: Vec<isr_core::models::Target>,
    pub sams: Vec<isr_core::models::Sam>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub synthetic_starts: BTreeMap<String, [f64; 2]>,
    pub drone_configs: BTreeMap<String, DroneConfig>,
}

impl EnvironmentBundle {
    fn from_parts(env: &Environment, configs: &BTreeMap<String, DroneConfig>) -> Self {
        Self {
            airports: env.airports.clone(),
            targets: env.targets.clone(),
            sams: env.sams.clone(),
            synthetic_starts: env.synthetic_starts.clone(),
            drone_configs: configs.clone(),
        }
    }

    fn split(self) -> (Environment, BTreeMap<String, DroneConfig>) {
        (
            Environment {
                airports: self.airports,
                targets: self.targets,
                sams: self.sams,
                synthetic_starts: self.synthetic_starts,
            },
            self.drone_configs,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentExport {
    pub schema: String,
    pub is_segmented: bool,
    pub env: EnvironmentBundle,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentExport {
    pub index: usize,
    pub env: EnvironmentBundle,
    #[serde(rename = "cutDistance")]
    pub cut_distance: Option<f64>,
    #[serde(rename = "cutPositions")]
    pub cut_positions: BTreeMap<String, [f64; 2]>,
    #[serde(default)]
    pub visited_targets: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionExport {
    pub schema: String,
    pub is_segmented: bool,
    pub segment_count: usize,
    pub segments: Vec<SegmentExport>,
}

/// What an import produced.
#[derive(Debug, Clone)]
pub enum ImportedMission {
    /// Plain environment (k = 1).
    Environment {
        env: Environment,
        drone_configs: BTreeMap<String, DroneConfig>,
    },
    /// Segmented mission: solve each spec in order to reconstruct.
    Segmented { segments: Vec<ImportedSegment> },
}

#[derive(Debug, Clone)]
pub struct ImportedSegment {
    pub index: usize,
    pub env: Environment,
    pub drone_configs: BTreeMap<String, DroneConfig>,
    pub cut_distance: Option<f64>,
    pub cut_positions: BTreeMap<String, [f64; 2]>,
    pub visited_targets: BTreeSet<String>,
}

// ==== EXPORT ====

/// Export a plain environment (filename suffix `_N1_`).
pub fn export_environment(
    env: &Environment,
    configs: &BTreeMap<String, DroneConfig>,
) -> serde_json::Value {
    serde_json::to_value(EnvironmentExport {
        schema: SCHEMA.to_string(),
        is_segmented: false,
        env: EnvironmentBundle::from_parts(env, configs),
    })
    .expect("environment export is serializable")
}

/// Export a segmented mission. Solutions are omitted by design.
pub fn export_mission(store: &SegmentedStore) -> serde_json::Value {
    let segments: Vec<SegmentExport> = store
        .segments()
        .iter()
        .map(|s| SegmentExport {
            index: s.index,
            env: EnvironmentBundle::from_parts(&s.env, &s.drone_configs),
            cut_distance: s.cut_distance,
            cut_positions: s.cut_positions.clone(),
            visited_targets: s.visited_targets.clone(),
        })
        .collect();
    serde_json::to_value(MissionExport {
        schema: SCHEMA.to_string(),
        is_segmented: true,
        segment_count: segments.len(),
        segments,
    })
    .expect("mission export is serializable")
}

/// Suggested export filename carrying the `_N{k}_` segment marker.
pub fn export_filename(base: &str, segment_count: usize) -> String {
    format!("{base}_N{segment_count}_.json")
}

// ==== IMPORT ====

/// Segment count from the `_N{k}_` filename marker, if present.
pub fn detect_segment_count(filename: &str) -> Option<usize> {
    let re = Regex::new(r"_N(\d+)_").expect("static pattern compiles");
    re.captures(filename)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Import either export shape, or the legacy segmented shape.
///
/// When the filename carries `_N{k}_` with k > 1, it must agree with the
/// payload's segment count.
pub fn import(value: &serde_json::Value, filename: &str) -> Result<ImportedMission, MissionError> {
    let filename_count = detect_segment_count(filename);

    if value.get("type").and_then(|t| t.as_str()) == Some("segmented") {
        return import_legacy(value, filename_count);
    }

    let schema = value
        .get("schema")
        .and_then(|s| s.as_str())
        .ok_or_else(|| MissionError::Import("missing schema field".into()))?;
    if schema != SCHEMA {
        return Err(MissionError::Import(format!("unsupported schema `{schema}`")));
    }

    let segmented = value
        .get("is_segmented")
        .and_then(|b| b.as_bool())
        .unwrap_or(false);

    if !segmented {
        let export: EnvironmentExport = serde_json::from_value(value.clone())
            .map_err(|e| MissionError::Import(e.to_string()))?;
        let (mut env, drone_configs) = export.env.split();
        env.normalize();
        env.validate()?;
        return Ok(ImportedMission::Environment { env, drone_configs });
    }

    let export: MissionExport = serde_json::from_value(value.clone())
        .map_err(|e| MissionError::Import(e.to_string()))?;
    if export.segment_count != export.segments.len() {
        return Err(MissionError::Import(format!(
            "segment_count {} does not match {} segments",
            export.segment_count,
            export.segments.len()
        )));
    }
    if export.segment_count > 1 {
        match filename_count {
            Some(k) if k == export.segment_count => {}
            Some(k) => {
                return Err(MissionError::Import(format!(
                    "filename marker _N{k}_ does not match {} segments",
                    export.segment_count
                )));
            }
            None => {
                return Err(MissionError::Import(
                    "segmented mission filename must carry an _N{k}_ marker".into(),
                ));
            }
        }
    }

    let mut segments = Vec::with_capacity(export.segments.len());
    for s in export.segments {
        let (mut env, drone_configs) = s.env.split();
        env.normalize();
        env.validate()?;
        segments.push(ImportedSegment {
            index: s.index,
            env,
            drone_configs,
            cut_distance: s.cut_distance,
            cut_positions: s.cut_positions,
            visited_targets: s.visited_targets,
        });
    }
    debug!(segments = segments.len(), "segmented mission imported");
    Ok(ImportedMission::Segmented { segments })
}

// ==== LEGACY IMPORT ====

#[derive(Debug, Deserialize)]
struct LegacyDronePosition {
    x: f64,
    y: f64,
    #[serde(rename = "totalDistance")]
    total_distance: Option<f64>,
    #[serde(rename = "distanceTraveled")]
    distance_traveled: Option<f64>,
}

impl LegacyDronePosition {
    /// Both spellings occur in the wild; prefer the smaller when both
    /// are present.
    fn distance(&self) -> Option<f64> {
        match (self.total_distance, self.distance_traveled) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Some(a),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LegacySegmentCut {
    #[serde(rename = "dronePositions")]
    drone_positions: BTreeMap<String, LegacyDronePosition>,
    #[serde(rename = "visitedTargets", default)]
    visited_targets: BTreeSet<String>,
}

#[derive(Debug, Deserialize)]
struct LegacySegmentInfo {
    #[serde(rename = "segmentCuts")]
    segment_cuts: Vec<LegacySegmentCut>,
}

#[derive(Debug, Deserialize)]
struct LegacyMission {
    airports: Vec<isr_core::models::Airport>,
    targets: Vec<isr_core::models::Target>,
    #[serde(default)]
    sams: Vec<isr_core::models::Sam>,
    #[serde(default)]
    drone_configs: BTreeMap<String, DroneConfig>,
    #[serde(rename = "segmentInfo")]
    segment_info: LegacySegmentInfo,
}

/// Legacy shape: a flat environment plus cut records. Each cut becomes a
/// segment spec whose env removes the visited targets and whose starts
/// are the recorded drone positions.
fn import_legacy(
    value: &serde_json::Value,
    filename_count: Option<usize>,
) -> Result<ImportedMission, MissionError> {
    let legacy: LegacyMission = serde_json::from_value(value.clone())
        .map_err(|e| MissionError::Import(e.to_string()))?;

    let segment_count = legacy.segment_info.segment_cuts.len() + 1;
    match filename_count {
        Some(k) if k > 1 && k == segment_count => {}
        _ => {
            return Err(MissionError::Import(format!(
                "legacy segmented import requires a matching _N{segment_count}_ filename marker"
            )));
        }
    }

    let mut base_env = Environment {
        airports: legacy.airports,
        targets: legacy.targets,
        sams: legacy.sams,
        synthetic_starts: BTreeMap::new(),
    };
    base_env.normalize();
    base_env.validate()?;

    let mut segments = Vec::with_capacity(segment_count);
    segments.push(ImportedSegment {
        index: 0,
        env: base_env.clone(),
        drone_configs: legacy.drone_configs.clone(),
        cut_distance: None,
        cut_positions: BTreeMap::new(),
        visited_targets: BTreeSet::new(),
    });

    let mut visited_so_far: BTreeSet<String> = BTreeSet::new();
    for (i, cut) in legacy.segment_info.segment_cuts.iter().enumerate() {
        visited_so_far.extend(cut.visited_targets.iter().cloned());

        // Mission-wide distance is one scalar; take the smallest recorded
        // per-drone figure as the defensive choice.
        let cut_distance = cut
            .drone_positions
            .values()
            .filter_map(LegacyDronePosition::distance)
            .fold(f64::INFINITY, f64::min);
        if !cut_distance.is_finite() {
            return Err(MissionError::Import(format!(
                "legacy cut {i} carries no usable distance"
            )));
        }

        let mut env = base_env.clone();
        env.remove_targets(&visited_so_far);
        let mut configs = legacy.drone_configs.clone();
        let mut cut_positions = BTreeMap::new();
        for (drone_id, pos) in &cut.drone_positions {
            let digits: String = drone_id.chars().filter(|c| c.is_ascii_digit()).collect();
            let start_id = format!("D{digits}_START");
            env.synthetic_starts.insert(start_id.clone(), [pos.x, pos.y]);
            cut_positions.insert(drone_id.clone(), [pos.x, pos.y]);
            if let Some(cfg) = configs.get_mut(drone_id) {
                cfg.start_airport = start_id;
            }
        }
        env.validate()?;

        segments.push(ImportedSegment {
            index: i + 1,
            env,
            drone_configs: configs,
            cut_distance: Some(cut_distance),
            cut_positions,
            visited_targets: visited_so_far.clone(),
        });
    }

    Ok(ImportedMission::Segmented { segments })
}
