//! Core data models for ISR mission planning.
//!
//! The environment and drone configuration are the typed boundary of the
//! engine: raw JSON is parsed, normalized (priorities clamped, target
//! types uppercased), and validated here before any planning code sees it.

use crate::geometry::Point;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Validation failure for an environment or waypoint reference.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("duplicate id `{0}`")]
    DuplicateId(String),
    #[error("airport id `{0}` must start with 'A'")]
    BadAirportId(String),
    #[error("target id `{0}` must start with 'T'")]
    BadTargetId(String),
    #[error("synthetic start id `{0}` must match D<n>_START")]
    BadSyntheticStartId(String),
    #[error("SAM range must be positive, got {0}")]
    NonPositiveSamRange(f64),
    #[error("unknown target type `{0}`")]
    UnknownTargetType(String),
    #[error("unknown waypoint id `{0}`")]
    UnknownWaypoint(String),
    #[error("malformed environment: {0}")]
    Malformed(String),
}

// ========== TARGETS ==========

/// Reconnaissance target category. Drones carry a per-type access filter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum TargetType {
    A,
    B,
    C,
    D,
    E,
}

impl TargetType {
    pub const ALL: [TargetType; 5] = [
        TargetType::A,
        TargetType::B,
        TargetType::C,
        TargetType::D,
        TargetType::E,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::A => "A",
            TargetType::B => "B",
            TargetType::C => "C",
            TargetType::D => "D",
            TargetType::E => "E",
        }
    }
}

impl FromStr for TargetType {
    type Err = EnvError;

    /// Case-insensitive on input; uppercased internally.
    fn from_str(s: &str) -> Result<Self, EnvError> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(TargetType::A),
            "B" => Ok(TargetType::B),
            "C" => Ok(TargetType::C),
            "D" => Ok(TargetType::D),
            "E" => Ok(TargetType::E),
            other => Err(EnvError::UnknownTargetType(other.to_string())),
        }
    }
}

impl TryFrom<String> for TargetType {
    type Error = EnvError;

    fn try_from(s: String) -> Result<Self, EnvError> {
        s.parse()
    }
}

impl From<TargetType> for String {
    fn from(t: TargetType) -> String {
        t.as_str().to_string()
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All five target types; the serde default for `target_access`.
fn all_target_types() -> BTreeSet<TargetType> {
    TargetType::ALL.iter().copied().collect()
}

// ========== ENVIRONMENT ==========

/// A launch/recovery airport. Positions are immutable once committed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Airport {
    pub id: String,
    pub x: f64,
    pub y: f64,
}

impl Airport {
    pub fn pos(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A prioritized reconnaissance target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    pub x: f64,
    pub y: f64,
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub priority: u32,
}

impl Target {
    pub fn pos(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A circular no-fly zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sam {
    pub pos: [f64; 2],
    pub range: f64,
}

impl Sam {
    pub fn center(&self) -> Point {
        Point::from(self.pos)
    }
}

/// The planning environment: airports, targets, SAM zones and (for
/// checkpoint replans only) synthetic start positions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Environment {
    pub airports: Vec<Airport>,
    pub targets: Vec<Target>,
    #[serde(default)]
    pub sams: Vec<Sam>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub synthetic_starts: BTreeMap<String, [f64; 2]>,
}

impl Environment {
    /// Parse an environment from a JSON value, normalize and validate it.
    pub fn parse(value: &serde_json::Value) -> Result<Environment, EnvError> {
        let mut env: Environment = serde_json::from_value(value.clone())
            .map_err(|e| EnvError::Malformed(e.to_string()))?;
        env.normalize();
        env.validate()?;
        Ok(env)
    }

    /// Clamp priorities into [1,10]. Target types are uppercased by their
    /// own deserializer.
    pub fn normalize(&mut self) {
        for target in &mut self.targets {
            target.priority = target.priority.clamp(1, 10);
        }
    }

    /// Enforce the boundary invariants: id prefixes, global uniqueness,
    /// positive SAM ranges.
    pub fn validate(&self) -> Result<(), EnvError> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        for airport in &self.airports {
            if !airport.id.starts_with('A') {
                return Err(EnvError::BadAirportId(airport.id.clone()));
            }
            if !seen.insert(&airport.id) {
                return Err(EnvError::DuplicateId(airport.id.clone()));
            }
        }
        for target in &self.targets {
            if !target.id.starts_with('T') {
                return Err(EnvError::BadTargetId(target.id.clone()));
            }
            if !seen.insert(&target.id) {
                return Err(EnvError::DuplicateId(target.id.clone()));
            }
        }
        for id in self.synthetic_starts.keys() {
            if !is_synthetic_start_id(id) {
                return Err(EnvError::BadSyntheticStartId(id.clone()));
            }
            if !seen.insert(id) {
                return Err(EnvError::DuplicateId(id.clone()));
            }
        }
        for sam in &self.sams {
            if sam.range <= 0.0 {
                return Err(EnvError::NonPositiveSamRange(sam.range));
            }
        }
        Ok(())
    }

    pub fn airport(&self, id: &str) -> Option<&Airport> {
        self.airports.iter().find(|a| a.id == id)
    }

    pub fn target(&self, id: &str) -> Option<&Target> {
        self.targets.iter().find(|t| t.id == id)
    }

    /// Resolve any waypoint id to its position.
    pub fn waypoint_position(&self, id: &WaypointId) -> Option<Point> {
        match id {
            WaypointId::Airport(a) => self.airport(a).map(Airport::pos),
            WaypointId::Target(t) => self.target(t).map(Target::pos),
            WaypointId::SyntheticStart(s) => {
                self.synthetic_starts.get(s).map(|p| Point::from(*p))
            }
        }
    }

    /// Remove the given targets (used when rewriting the environment at a
    /// checkpoint cut).
    pub fn remove_targets(&mut self, ids: &BTreeSet<String>) {
        self.targets.retain(|t| !ids.contains(&t.id));
    }
}

/// `D{n}_START` check without pulling a regex into the core crate.
pub fn is_synthetic_start_id(id: &str) -> bool {
    id.strip_prefix('D')
        .and_then(|rest| rest.strip_suffix("_START"))
        .map(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

// ========== WAYPOINTS ==========

/// A typed waypoint reference.
///
/// Synthetic starts remain bit-identical to their string form
/// (`D{n}_START`) at every API boundary but are statically
/// distinguishable inside the engine.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WaypointId {
    Airport(String),
    Target(String),
    SyntheticStart(String),
}

impl WaypointId {
    /// Classify a raw id string by its prefix.
    pub fn parse(id: &str) -> Result<WaypointId, EnvError> {
        if is_synthetic_start_id(id) {
            Ok(WaypointId::SyntheticStart(id.to_string()))
        } else if id.starts_with('A') {
            Ok(WaypointId::Airport(id.to_string()))
        } else if id.starts_with('T') {
            Ok(WaypointId::Target(id.to_string()))
        } else {
            Err(EnvError::UnknownWaypoint(id.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            WaypointId::Airport(s) | WaypointId::Target(s) | WaypointId::SyntheticStart(s) => s,
        }
    }

    pub fn is_target(&self) -> bool {
        matches!(self, WaypointId::Target(_))
    }
}

impl fmt::Display for WaypointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for WaypointId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for WaypointId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        WaypointId::parse(&s).map_err(serde::de::Error::custom)
    }
}

// ========== DRONE CONFIGURATION ==========

/// End-airport selection: a fixed airport, or "pick the best one"
/// (serialized as `"-"`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndSpec {
    Airport(String),
    Any,
}

impl EndSpec {
    pub fn as_str(&self) -> &str {
        match self {
            EndSpec::Airport(id) => id,
            EndSpec::Any => "-",
        }
    }
}

impl Serialize for EndSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EndSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s == "-" {
            Ok(EndSpec::Any)
        } else {
            Ok(EndSpec::Airport(s))
        }
    }
}

/// Per-drone mission parameters. Fleet size is at most 5.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroneConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub fuel_budget: f64,
    pub start_airport: String,
    pub end_airport: EndSpec,
    #[serde(default = "all_target_types")]
    pub target_access: BTreeSet<TargetType>,
}

fn default_enabled() -> bool {
    true
}

impl DroneConfig {
    /// Whether this drone may visit a target of the given type.
    pub fn can_access(&self, target_type: TargetType) -> bool {
        self.target_access.contains(&target_type)
    }
}

// ========== ROUTES & SOLUTIONS ==========

/// One drone's planned route. `distance` is the polyline length of the
/// flown trajectory and equals the fuel consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    pub drone_id: String,
    pub waypoints: Vec<WaypointId>,
    pub trajectory: Vec<Point>,
    pub points: u32,
    pub distance: f64,
}

impl Route {
    /// The empty (infeasible) route for a drone.
    pub fn empty(drone_id: impl Into<String>) -> Self {
        Self {
            drone_id: drone_id.into(),
            waypoints: Vec::new(),
            trajectory: Vec::new(),
            points: 0,
            distance: 0.0,
        }
    }

    /// Target ids visited by this route, in visit order.
    pub fn visited_targets(&self) -> Vec<String> {
        self.waypoints
            .iter()
            .filter(|w| w.is_target())
            .map(|w| w.as_str().to_string())
            .collect()
    }
}

/// A complete fleet plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub routes: BTreeMap<String, Route>,
    pub allocations: BTreeMap<String, Vec<String>>,
    pub wrapped_polygons: Vec<crate::sam::WrappedPolygon>,
    /// Hash key of the distance-matrix cache entry this plan was built
    /// against.
    pub matrix_key: u64,
}

impl Solution {
    pub fn total_points(&self) -> u32 {
        self.routes.values().map(|r| r.points).sum()
    }

    pub fn total_distance(&self) -> f64 {
        self.routes.values().map(|r| r.distance).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_env() -> Environment {
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
            sams: vec![Sam { pos: [50.0, 50.0], range: 15.0 }],
            synthetic_starts: BTreeMap::new(),
        }
    }

    #[test]
    fn test_valid_environment_passes() {
        assert!(sample_env().validate().is_ok());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut env = sample_env();
        env.targets.push(Target {
            id: "T1".into(),
            x: 1.0,
            y: 1.0,
            target_type: TargetType::B,
            priority: 3,
        });
        assert!(matches!(env.validate(), Err(EnvError::DuplicateId(_))));
    }

    #[test]
    fn test_bad_prefix_rejected() {
        let mut env = sample_env();
        env.airports[0].id = "X1".into();
        assert!(matches!(env.validate(), Err(EnvError::BadAirportId(_))));
    }

    #[test]
    fn test_nonpositive_sam_range_rejected() {
        let mut env = sample_env();
        env.sams[0].range = 0.0;
        assert!(matches!(env.validate(), Err(EnvError::NonPositiveSamRange(_))));
    }

    #[test]
    fn test_priority_clamped_on_normalize() {
        let mut env = sample_env();
        env.targets[0].priority = 99;
        env.normalize();
        assert_eq!(env.targets[0].priority, 10);
    }

    #[test]
    fn test_target_type_case_insensitive() {
        assert_eq!("c".parse::<TargetType>().unwrap(), TargetType::C);
        assert!("F".parse::<TargetType>().is_err());
    }

    #[test]
    fn test_waypoint_id_classification() {
        assert!(matches!(WaypointId::parse("A1"), Ok(WaypointId::Airport(_))));
        assert!(matches!(WaypointId::parse("T42"), Ok(WaypointId::Target(_))));
        assert!(matches!(
            WaypointId::parse("D3_START"),
            Ok(WaypointId::SyntheticStart(_))
        ));
        assert!(WaypointId::parse("Q7").is_err());
        // D-prefixed but malformed synthetic ids are not waypoints
        assert!(WaypointId::parse("D_START").is_err());
    }

    #[test]
    fn test_end_spec_round_trip() {
        let any: EndSpec = serde_json::from_str("\"-\"").unwrap();
        assert_eq!(any, EndSpec::Any);
        let fixed: EndSpec = serde_json::from_str("\"A2\"").unwrap();
        assert_eq!(fixed, EndSpec::Airport("A2".into()));
        assert_eq!(serde_json::to_string(&EndSpec::Any).unwrap(), "\"-\"");
    }
}
