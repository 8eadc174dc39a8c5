//! Map stage: independent per-chunk summarization on a bounded worker pool.

use crate::completion::CompletionPurpose;
use crate::metrics::RunMetrics;
use crate::processing::{Chunk, TokenEstimator};
use futures_util::{StreamExt, stream};
use std::sync::Arc;

use super::error::{PipelineError, ServiceError};
use super::events::{EventSink, PipelineEvent};
use super::prompts::build_chunk_summary_prompt;
use super::services::Completer;
use super::types::{ChunkGap, ChunkSummary};

/// Summaries and gaps of one map pass, both in ascending chunk order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapOutcome {
    /// Successful summaries.
    pub summaries: Vec<ChunkSummary>,
    /// Chunks skipped after exhausting retries.
    pub gaps: Vec<ChunkGap>,
}

impl MapOutcome {
    /// Indices of skipped chunks.
    pub fn skipped_indices(&self) -> Vec<usize> {
        self.gaps.iter().map(|gap| gap.index).collect()
    }
}

/// Condenses chunks through the completion backend.
pub struct MapSummarizer {
    completer: Completer,
    tokens: TokenEstimator,
    metrics: Arc<RunMetrics>,
    max_in_flight: usize,
}

impl MapSummarizer {
    /// Build a summarizer running at most `max_in_flight` calls concurrently.
    pub fn new(
        completer: Completer,
        tokens: TokenEstimator,
        metrics: Arc<RunMetrics>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            completer,
            tokens,
            metrics,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Summarize one chunk, retrying per the run policy.
    pub async fn summarize_chunk(&self, chunk: &Chunk) -> Result<ChunkSummary, ServiceError> {
        let text = self
            .completer
            .complete(
                CompletionPurpose::ChunkSummary,
                build_chunk_summary_prompt(chunk),
            )
            .await?;
        Ok(ChunkSummary {
            index: chunk.index,
            token_estimate: self.tokens.estimate(&text),
            text,
        })
    }

    /// Summarize every chunk. Failed chunks become gaps and are announced on `events`.
    ///
    /// Only cancellation aborts the pass; completion order does not affect the result order.
    pub async fn summarize_all(
        &self,
        chunks: &[Arc<Chunk>],
        events: &EventSink,
    ) -> Result<MapOutcome, PipelineError> {
        let mut outcome = MapOutcome::default();
        let mut pending = stream::iter(chunks.iter().cloned())
            .map(|chunk| async move {
                let result = self.summarize_chunk(&chunk).await;
                (chunk.index, result)
            })
            .buffer_unordered(self.max_in_flight);

        while let Some((index, result)) = pending.next().await {
            if events.is_cancelled() {
                tracing::info!(chunk = index, "Map stage cancelled; discarding in-flight work");
                return Err(PipelineError::Cancelled);
            }
            match result {
                Ok(summary) => {
                    self.metrics.record_chunk_summary(true);
                    tracing::debug!(chunk = index, tokens = summary.token_estimate, "Chunk summarized");
                    outcome.summaries.push(summary);
                }
                Err(error) => {
                    self.metrics.record_chunk_summary(false);
                    tracing::warn!(chunk = index, error = %error, "Skipping chunk after failed summarization");
                    let gap = ChunkGap {
                        index,
                        reason: error.to_string(),
                    };
                    events
                        .emit(PipelineEvent::ChunkSkipped {
                            index,
                            reason: gap.reason.clone(),
                        })
                        .await;
                    outcome.gaps.push(gap);
                }
            }
        }

        outcome.summaries.sort_by_key(|summary| summary.index);
        outcome.gaps.sort_by_key(|gap| gap.index);
        tracing::info!(
            summarized = outcome.summaries.len(),
            skipped = outcome.gaps.len(),
            "Map stage finished"
        );
        Ok(outcome)
    }
}
