//! Error taxonomy for the question-generation pipeline.

use crate::completion::CompletionClientError;
use crate::config::ConfigError;
use crate::embedding::EmbeddingClientError;
use crate::processing::TokenizerError;
use std::time::Duration;
use thiserror::Error;

use super::state::RunState;
use super::types::Question;

/// Failure of a single external model or embedding call.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Embedding backend failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Completion backend failed.
    #[error(transparent)]
    Completion(#[from] CompletionClientError),
    /// The call did not finish within the configured timeout.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },
    /// The backend answered with nothing usable.
    #[error("{operation} returned an empty response")]
    EmptyResponse {
        /// Operation that produced the empty response.
        operation: String,
    },
}

impl ServiceError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Embedding(error) => error.is_retryable(),
            Self::Completion(error) => error.is_retryable(),
            Self::Timeout { .. } | Self::EmptyResponse { .. } => true,
        }
    }
}

/// A model-produced object that violates the question invariants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Output did not contain a parsable JSON array of questions.
    #[error("model output is not a question array: {0}")]
    Malformed(String),
    /// Stem is missing or blank.
    #[error("question stem is empty")]
    EmptyStem,
    /// No choices were supplied.
    #[error("question has no choices")]
    NoChoices,
    /// A choice label is blank.
    #[error("choice label is empty")]
    EmptyLabel,
    /// A choice has no text.
    #[error("choice '{0}' has empty text")]
    EmptyChoice(String),
    /// The same label appears more than once.
    #[error("duplicate choice label '{0}'")]
    DuplicateLabel(String),
    /// The correct-answer label is missing or not among the choices.
    #[error("answer label '{0}' is not one of the choices")]
    UnknownAnswer(String),
    /// An equivalent stem has already been emitted in this run.
    #[error("duplicate question stem '{0}'")]
    DuplicateStem(String),
}

/// Run-level failure after component recovery is exhausted.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid pipeline parameters; raised before any work starts.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Token estimator could not be initialised.
    #[error(transparent)]
    Tokenizer(#[from] TokenizerError),
    /// Document contained no text.
    #[error("document contains no text")]
    EmptyDocument,
    /// Too many chunks failed to summarize.
    #[error("summarization failed for {skipped} of {total} chunks")]
    SummarizationFailed {
        /// Chunks skipped after retries.
        skipped: usize,
        /// Chunks in the document.
        total: usize,
    },
    /// Too many chunks failed to embed.
    #[error("embedding failed for {unindexed} of {total} chunks")]
    IndexingFailed {
        /// Chunks missing from the index.
        unindexed: usize,
        /// Chunks in the document.
        total: usize,
    },
    /// A reduce group could not be merged.
    #[error("reduce level {level} failed: {source}")]
    Reduce {
        /// Tree level (1-based) being built.
        level: usize,
        /// Underlying call failure.
        #[source]
        source: ServiceError,
    },
    /// The reduce tree did not fit the context budget within the level cap.
    #[error("summary still exceeds the context budget after {levels} reduce levels")]
    ReduceDidNotConverge {
        /// Levels attempted.
        levels: usize,
    },
    /// Question generation produced nothing valid.
    #[error("no valid questions were generated ({requested} requested)")]
    NoValidQuestions {
        /// Questions requested for the run.
        requested: usize,
    },
    /// The caller abandoned the run.
    #[error("run cancelled by caller")]
    Cancelled,
}

/// Pipeline failure annotated with the state the run had reached.
#[derive(Debug, Error)]
#[error("run failed while {last_state}: {source}")]
pub struct RunFailure {
    /// Last non-terminal state reached.
    pub last_state: RunState,
    /// Questions streamed before the failure; they remain valid.
    pub partial_questions: Vec<Question>,
    /// Underlying failure.
    #[source]
    pub source: PipelineError,
}
