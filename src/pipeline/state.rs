//! Per-run state machine and progress record.

use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Lifecycle of one run. Transitions only move forward; `Failed` is reachable from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Document accepted, nothing processed yet.
    Uploading,
    /// Splitting the document.
    Chunking,
    /// Map stage and index population.
    Summarizing,
    /// Tree reduction.
    Reducing,
    /// Concept mining and grounding retrieval.
    Retrieving,
    /// Question generation.
    Generating,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
}

impl RunState {
    fn rank(self) -> u8 {
        match self {
            Self::Uploading => 0,
            Self::Chunking => 1,
            Self::Summarizing => 2,
            Self::Reducing => 3,
            Self::Retrieving => 4,
            Self::Generating => 5,
            Self::Completed | Self::Failed => 6,
        }
    }

    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether moving to `next` is a legal transition.
    pub fn can_advance_to(self, next: RunState) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || next.rank() > self.rank()
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uploading => "uploading",
            Self::Chunking => "chunking",
            Self::Summarizing => "summarizing",
            Self::Reducing => "reducing",
            Self::Retrieving => "retrieving",
            Self::Generating => "generating",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Explicit per-run progress record, owned by the orchestrator and lent to each stage.
#[derive(Debug)]
pub struct RunProgress {
    run_id: Uuid,
    state: RunState,
    last_active: RunState,
}

impl RunProgress {
    /// Fresh record in [`RunState::Uploading`].
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            state: RunState::Uploading,
            last_active: RunState::Uploading,
        }
    }

    /// Run identifier.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Last non-terminal state reached.
    pub fn last_active(&self) -> RunState {
        self.last_active
    }

    /// Move to `next`; returns `false` and leaves the state unchanged when the transition
    /// would go backwards or leave a terminal state.
    pub fn advance(&mut self, next: RunState) -> bool {
        if !self.state.can_advance_to(next) {
            tracing::warn!(
                run_id = %self.run_id,
                from = %self.state,
                to = %next,
                "Rejected backward run state transition"
            );
            return false;
        }
        tracing::debug!(run_id = %self.run_id, from = %self.state, to = %next, "Run state transition");
        if !next.is_terminal() {
            self.last_active = next;
        }
        self.state = next;
        true
    }
}
