//! Events streamed to the caller while a run progresses.

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use super::state::RunState;
use super::types::Question;

/// One item of a run's event stream. The stream always ends with `Completed` or `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// The run entered a new state.
    Progress {
        /// State just entered.
        state: RunState,
    },
    /// The map stage gave up on a chunk; the run continues without it.
    ChunkSkipped {
        /// Index of the skipped chunk.
        index: usize,
        /// Last error observed.
        reason: String,
    },
    /// A validated question, streamed as soon as it is accepted.
    Question(Question),
    /// Terminal success.
    Completed {
        /// Questions emitted by the run.
        question_count: usize,
        /// Chunks excluded from the summary.
        skipped_chunks: Vec<usize>,
        /// Chunks missing from the vector index.
        unindexed_chunks: Vec<usize>,
        /// Whether any chunk was skipped or left unindexed.
        degraded: bool,
    },
    /// Terminal failure. Questions already streamed remain valid.
    Failed {
        /// Human readable failure reason.
        reason: String,
        /// Last state reached before the failure.
        last_state: RunState,
        /// Questions streamed before the failure.
        questions_emitted: usize,
    },
}

impl PipelineEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }

    /// JSON form of the event, optionally withholding the correct answer of questions.
    pub fn to_json(&self, reveal_answers: bool) -> Result<Value, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if !reveal_answers && matches!(self, Self::Question(_)) {
            if let Value::Object(map) = &mut value {
                map.remove("answer");
            }
        }
        Ok(value)
    }
}

/// Delivery side of a run's event stream.
///
/// A detached sink discards events and never reports cancellation. A channel sink reports
/// cancellation once the receiving side has been dropped.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<mpsc::Sender<PipelineEvent>>,
}

impl EventSink {
    /// Sink that drops every event.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Sink feeding `sender`.
    pub fn channel(sender: mpsc::Sender<PipelineEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Deliver `event`, waiting for capacity. Events sent after cancellation are discarded.
    pub async fn emit(&self, event: PipelineEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(event).await.is_err() {
                tracing::debug!("Event receiver dropped; discarding event");
            }
        }
    }

    /// Whether the caller abandoned the run.
    pub fn is_cancelled(&self) -> bool {
        self.sender.as_ref().is_some_and(|sender| sender.is_closed())
    }
}
