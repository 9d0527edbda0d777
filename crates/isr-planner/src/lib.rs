//! ISR Planner - The mission planning and replanning engine.
//!
//! Pipeline: environment -> SAM-aware distance matrix -> target
//! allocation -> per-drone exact orienteering -> trajectory expansion ->
//! optional post-optimizers. The [`Planner`] value owns the only shared
//! mutable state (the distance-matrix cache) and is the in-process API
//! consumed by the mission layer.

pub mod allocator;
pub mod cancel;
pub mod errors;
pub mod matrix;
pub mod optimize;
pub mod planner;
pub mod solver;
pub mod trajectory;

pub use allocator::Strategy;
pub use cancel::CancelToken;
pub use errors::PlanError;
pub use matrix::{DistanceMatrix, MatrixCache};
pub use optimize::SwapCloserReport;
pub use planner::{Planner, SolveOptions};
