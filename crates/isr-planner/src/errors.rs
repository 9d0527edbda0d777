//! Error kinds surfaced by the planning API.

use isr_core::EnvError;
use thiserror::Error;

/// Tagged planning failure. Recoverable kinds never mutate committed
/// state; `InvariantViolation` discards the plan in progress.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Malformed environment or drone configuration.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// No fuel-feasible route exists for the requested operation.
    #[error("infeasible: {0}")]
    Infeasible(String),
    /// The operation was cancelled at a suspension point.
    #[error("cancelled")]
    Cancelled,
    /// A post-condition the engine guarantees was violated.
    #[error("internal invariant violation: {0}")]
    InvariantViolation(String),
}

impl From<EnvError> for PlanError {
    fn from(e: EnvError) -> Self {
        PlanError::InvalidInput(e.to_string())
    }
}
