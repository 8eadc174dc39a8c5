//! Map-reduce summarization and grounded question generation.
//!
//! A run moves through [`RunState`]s: the document is chunked, chunks are summarized on a
//! bounded worker pool while they are embedded into a [`crate::vector::VectorIndex`], the
//! summaries are tree-reduced into one [`DocumentSummary`], concept seeds are mined from it and
//! grounded through the index, and validated [`Question`]s are streamed as they are produced.

pub mod concepts;
pub mod embed;
pub mod error;
pub mod events;
pub mod generate;
pub mod map;
pub mod orchestrator;
pub mod parse;
mod prompts;
pub mod reduce;
pub mod report;
pub mod retrieve;
pub mod services;
pub mod state;
pub mod types;

pub use concepts::{ConceptExtractor, distribute_questions};
pub use embed::{IndexBuilder, IndexingOutcome};
pub use error::{PipelineError, RunFailure, ServiceError, ValidationError};
pub use events::{EventSink, PipelineEvent};
pub use generate::{GenerationRequest, QuestionGenerator};
pub use map::{MapOutcome, MapSummarizer};
pub use orchestrator::{PipelineOrchestrator, RunHandle, RunStream};
pub use reduce::ReduceMerger;
pub use report::RunReport;
pub use retrieve::ConceptRetriever;
pub use services::{Completer, Embedder};
pub use state::{RunProgress, RunState};
pub use types::{ChunkGap, ChunkSummary, ConceptSeed, DocumentSummary, Question};
