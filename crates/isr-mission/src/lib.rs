//! ISR Mission - State machine, segmented mission store, and I/O.
//!
//! The [`MissionEngine`] value is the single owner of mission state:
//! mode transitions, committed segments, drafts, and the cut/replan
//! workflow. Callers construct one engine per mission; tests construct
//! fresh engines per case.

pub mod engine;
pub mod errors;
pub mod io;
pub mod machine;
pub mod segments;

pub use engine::{EngineConfig, MissionEngine, OptimizePass, PauseContext};
pub use errors::MissionError;
pub use machine::{
    permissions, CheckpointSource, MissionAction, Mode, StateMachine, TransitionRejected,
};
pub use segments::{Segment, SegmentIndex, SegmentedStore};
