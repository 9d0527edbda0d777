//! Mission-layer errors.

use crate::machine::TransitionRejected;
use isr_core::EnvError;
use isr_planner::PlanError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MissionError {
    /// A state-machine transition was not permitted. The engine state is
    /// unchanged.
    #[error("transition rejected: {0}")]
    Rejected(TransitionRejected),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("segment store: {0}")]
    Store(String),
    #[error("import: {0}")]
    Import(String),
}

impl From<TransitionRejected> for MissionError {
    fn from(r: TransitionRejected) -> Self {
        MissionError::Rejected(r)
    }
}

impl From<EnvError> for MissionError {
    fn from(e: EnvError) -> Self {
        MissionError::InvalidInput(e.to_string())
    }
}
