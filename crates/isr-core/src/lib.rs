//! ISR Core - Geometry kernel and data model for mission planning
//!
//! This crate contains the planar geometry primitives, the typed
//! environment model, and the SAM-cluster wrapper, with NO I/O or
//! threading dependencies.

pub mod geometry;
pub mod models;
pub mod sam;

pub use geometry::{Point, EPS};
pub use models::{
    Airport, DroneConfig, EndSpec, EnvError, Environment, Route, Sam, Solution, Target,
    TargetType, WaypointId,
};
pub use sam::{wrap_sams, WrappedPolygon};
