//! The mission state machine.
//!
//! The machine is the single source of truth for which user actions are
//! offered: the UI consults the pure [`permissions`] function, and every
//! engine operation goes through [`StateMachine::apply`]. Transitions
//! not in the table are rejected no-ops; the rejection reason is
//! returned to the caller and logged at debug.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Mission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Idle,
    EditingEnv,
    DraftReady,
    ReadyToAnimate,
    Animating,
    Paused,
    Checkpoint,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Idle => "IDLE",
            Mode::EditingEnv => "EDITING_ENV",
            Mode::DraftReady => "DRAFT_READY",
            Mode::ReadyToAnimate => "READY_TO_ANIMATE",
            Mode::Animating => "ANIMATING",
            Mode::Paused => "PAUSED",
            Mode::Checkpoint => "CHECKPOINT",
        };
        f.write_str(name)
    }
}

/// User-visible actions driving the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionAction {
    EnterEdit,
    AcceptEdits,
    CancelEdits,
    Solve,
    AcceptSolution,
    DiscardDraft,
    Optimize,
    Animate,
    Pause,
    Resume,
    Cut,
    Complete,
    Reset,
}

impl fmt::Display for MissionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MissionAction::EnterEdit => "enter_edit",
            MissionAction::AcceptEdits => "accept_edits",
            MissionAction::CancelEdits => "cancel_edits",
            MissionAction::Solve => "solve",
            MissionAction::AcceptSolution => "accept_solution",
            MissionAction::DiscardDraft => "discard_draft",
            MissionAction::Optimize => "optimize",
            MissionAction::Animate => "animate",
            MissionAction::Pause => "pause",
            MissionAction::Resume => "resume",
            MissionAction::Cut => "cut",
            MissionAction::Complete => "complete",
            MissionAction::Reset => "reset",
        };
        f.write_str(name)
    }
}

/// Why a checkpoint exists; gates whether a solve is permitted straight
/// from CHECKPOINT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointSource {
    #[default]
    None,
    ReplayCut,
}

/// A transition the table forbids. Carries enough context to log and to
/// show the user.
#[derive(Debug, Clone)]
pub struct TransitionRejected {
    pub from: Mode,
    pub action: MissionAction,
    pub reason: &'static str,
}

impl fmt::Display for TransitionRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} not permitted in {}: {}", self.action, self.from, self.reason)
    }
}

/// Actions permitted in a mode, guards aside. Pure function of the mode.
pub fn permissions(mode: Mode) -> &'static [MissionAction] {
    use MissionAction::*;
    match mode {
        Mode::Idle => &[EnterEdit, Solve, Reset],
        Mode::EditingEnv => &[AcceptEdits, CancelEdits, Reset],
        Mode::DraftReady => &[AcceptSolution, DiscardDraft, Optimize, Reset],
        Mode::ReadyToAnimate => &[Animate, Reset],
        Mode::Animating => &[Pause, Cut, Complete, Reset],
        Mode::Paused => &[Resume, Cut, Reset],
        Mode::Checkpoint => &[Solve, EnterEdit, Reset],
    }
}

/// The transition machine. Mutated only through [`apply`]; guards and
/// bookkeeping flags live here so the engine cannot drive it into an
/// inconsistent state.
///
/// [`apply`]: StateMachine::apply
#[derive(Debug, Clone)]
pub struct StateMachine {
    mode: Mode,
    /// Mode that was active when editing began; `cancel_edits` returns
    /// there, `accept_edits` decides IDLE vs CHECKPOINT with it.
    edit_origin: Mode,
    checkpoint_source: CheckpointSource,
    /// Set when the environment was edited after the checkpoint was
    /// created; unlocks solve-from-CHECKPOINT after a replay cut.
    edits_since_checkpoint: bool,
    /// A cut leaves exactly one replan authorized from CHECKPOINT; any
    /// further solve there requires edits first.
    pending_replan: bool,
    /// Whether any segment has been committed (drives discard_draft).
    has_committed: bool,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            mode: Mode::Idle,
            edit_origin: Mode::Idle,
            checkpoint_source: CheckpointSource::None,
            edits_since_checkpoint: false,
            pending_replan: false,
            has_committed: false,
        }
    }

    /// Machine state for a mission reloaded from disk: committed and
    /// ready to animate.
    pub(crate) fn restored() -> Self {
        Self {
            mode: Mode::ReadyToAnimate,
            edit_origin: Mode::Idle,
            checkpoint_source: CheckpointSource::None,
            edits_since_checkpoint: false,
            pending_replan: false,
            has_committed: true,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn checkpoint_source(&self) -> CheckpointSource {
        self.checkpoint_source
    }

    pub fn set_has_committed(&mut self, has_committed: bool) {
        self.has_committed = has_committed;
    }

    /// Validate `action` in the current mode without transitioning.
    pub fn check(&self, action: MissionAction) -> Result<Mode, TransitionRejected> {
        self.next_mode(action)
    }

    /// Apply an action, returning the new mode. Rejected transitions
    /// leave the machine untouched.
    pub fn apply(&mut self, action: MissionAction) -> Result<Mode, TransitionRejected> {
        let next = match self.next_mode(action) {
            Ok(next) => next,
            Err(rejected) => {
                debug!(%rejected, "state machine rejected transition");
                return Err(rejected);
            }
        };

        match action {
            MissionAction::EnterEdit => {
                self.edit_origin = self.mode;
                // Editing from a checkpoint clears its replay-cut gate.
                if self.mode == Mode::Checkpoint {
                    self.checkpoint_source = CheckpointSource::None;
                }
            }
            MissionAction::AcceptEdits => {
                self.edits_since_checkpoint = true;
            }
            MissionAction::Solve => {
                if self.mode == Mode::Checkpoint {
                    self.pending_replan = false;
                }
            }
            MissionAction::Cut => {
                self.checkpoint_source = CheckpointSource::ReplayCut;
                self.edits_since_checkpoint = false;
                self.pending_replan = true;
            }
            MissionAction::Reset => {
                self.checkpoint_source = CheckpointSource::None;
                self.edits_since_checkpoint = false;
                self.pending_replan = false;
            }
            _ => {}
        }

        self.mode = next;
        Ok(next)
    }

    fn next_mode(&self, action: MissionAction) -> Result<Mode, TransitionRejected> {
        use MissionAction::*;
        use Mode::*;

        let reject = |reason: &'static str| TransitionRejected {
            from: self.mode,
            action,
            reason,
        };

        if action == Reset {
            return Ok(Idle);
        }

        match (self.mode, action) {
            (Idle, EnterEdit) => Ok(EditingEnv),
            (Idle, Solve) => Ok(DraftReady),

            (EditingEnv, AcceptEdits) => Ok(if self.edit_origin == Checkpoint {
                Checkpoint
            } else {
                Idle
            }),
            (EditingEnv, CancelEdits) => Ok(self.edit_origin),

            (DraftReady, AcceptSolution) => Ok(ReadyToAnimate),
            (DraftReady, DiscardDraft) => Ok(if self.has_committed {
                ReadyToAnimate
            } else {
                Idle
            }),
            (DraftReady, Optimize) => Ok(DraftReady),

            (ReadyToAnimate, Animate) => Ok(Animating),

            (Animating, Pause) => Ok(Paused),
            (Animating, Cut) => Ok(Checkpoint),
            (Animating, Complete) => Ok(ReadyToAnimate),

            (Paused, Resume) => Ok(Animating),
            (Paused, Cut) => Ok(Checkpoint),

            (Checkpoint, Solve) => {
                // A fresh cut authorizes exactly one replan; after that a
                // replay-cut checkpoint demands edits first.
                if self.checkpoint_source != CheckpointSource::ReplayCut
                    || self.edits_since_checkpoint
                    || self.pending_replan
                {
                    Ok(DraftReady)
                } else {
                    Err(reject("replay-cut checkpoint requires edits before re-solving"))
                }
            }
            (Checkpoint, EnterEdit) => Ok(EditingEnv),

            _ => Err(reject("transition not in table")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_to_animation() {
        let mut sm = StateMachine::new();
        assert_eq!(sm.apply(MissionAction::Solve).unwrap(), Mode::DraftReady);
        assert_eq!(sm.apply(MissionAction::AcceptSolution).unwrap(), Mode::ReadyToAnimate);
        sm.set_has_committed(true);
        assert_eq!(sm.apply(MissionAction::Animate).unwrap(), Mode::Animating);
        assert_eq!(sm.apply(MissionAction::Pause).unwrap(), Mode::Paused);
        assert_eq!(sm.apply(MissionAction::Resume).unwrap(), Mode::Animating);
        assert_eq!(sm.apply(MissionAction::Complete).unwrap(), Mode::ReadyToAnimate);
    }

    #[test]
    fn test_unlisted_transition_is_rejected_and_state_unchanged() {
        let mut sm = StateMachine::new();
        let err = sm.apply(MissionAction::Animate).unwrap_err();
        assert_eq!(err.from, Mode::Idle);
        assert_eq!(sm.mode(), Mode::Idle);
    }

    #[test]
    fn test_cancel_edits_returns_to_origin() {
        let mut sm = StateMachine::new();
        sm.apply(MissionAction::EnterEdit).unwrap();
        assert_eq!(sm.apply(MissionAction::CancelEdits).unwrap(), Mode::Idle);
    }

    #[test]
    fn test_cut_gates_solve_until_edits() {
        let mut sm = StateMachine::new();
        sm.apply(MissionAction::Solve).unwrap();
        sm.apply(MissionAction::AcceptSolution).unwrap();
        sm.set_has_committed(true);
        sm.apply(MissionAction::Animate).unwrap();
        assert_eq!(sm.apply(MissionAction::Cut).unwrap(), Mode::Checkpoint);
        assert_eq!(sm.checkpoint_source(), CheckpointSource::ReplayCut);

        // Replay cut allows an immediate re-solve
        assert_eq!(sm.apply(MissionAction::Solve).unwrap(), Mode::DraftReady);
    }

    #[test]
    fn test_edit_from_checkpoint_clears_source_and_returns_there() {
        let mut sm = StateMachine::new();
        sm.apply(MissionAction::Solve).unwrap();
        sm.apply(MissionAction::AcceptSolution).unwrap();
        sm.set_has_committed(true);
        sm.apply(MissionAction::Animate).unwrap();
        sm.apply(MissionAction::Cut).unwrap();

        assert_eq!(sm.apply(MissionAction::EnterEdit).unwrap(), Mode::EditingEnv);
        assert_eq!(sm.checkpoint_source(), CheckpointSource::None);
        assert_eq!(sm.apply(MissionAction::AcceptEdits).unwrap(), Mode::Checkpoint);
        assert_eq!(sm.apply(MissionAction::Solve).unwrap(), Mode::DraftReady);
    }

    #[test]
    fn test_discard_draft_depends_on_committed_state() {
        let mut sm = StateMachine::new();
        sm.apply(MissionAction::Solve).unwrap();
        assert_eq!(sm.apply(MissionAction::DiscardDraft).unwrap(), Mode::Idle);

        sm.apply(MissionAction::Solve).unwrap();
        sm.apply(MissionAction::AcceptSolution).unwrap();
        sm.set_has_committed(true);
        // A later draft discarded falls back to READY_TO_ANIMATE
        sm.apply(MissionAction::Animate).unwrap();
        sm.apply(MissionAction::Cut).unwrap();
        sm.apply(MissionAction::Solve).unwrap();
        assert_eq!(sm.apply(MissionAction::DiscardDraft).unwrap(), Mode::ReadyToAnimate);
    }

    #[test]
    fn test_reset_from_anywhere() {
        let mut sm = StateMachine::new();
        sm.apply(MissionAction::Solve).unwrap();
        sm.apply(MissionAction::AcceptSolution).unwrap();
        sm.apply(MissionAction::Animate).unwrap();
        assert_eq!(sm.apply(MissionAction::Reset).unwrap(), Mode::Idle);
        assert_eq!(sm.checkpoint_source(), CheckpointSource::None);
    }

    #[test]
    fn test_permissions_match_table() {
        assert!(permissions(Mode::Idle).contains(&MissionAction::Solve));
        assert!(!permissions(Mode::Idle).contains(&MissionAction::Pause));
        assert!(permissions(Mode::Animating).contains(&MissionAction::Cut));
        assert!(permissions(Mode::Checkpoint).contains(&MissionAction::EnterEdit));
        for mode in [
            Mode::Idle,
            Mode::EditingEnv,
            Mode::DraftReady,
            Mode::ReadyToAnimate,
            Mode::Animating,
            Mode::Paused,
            Mode::Checkpoint,
        ] {
            assert!(permissions(mode).contains(&MissionAction::Reset));
        }
    }
}
