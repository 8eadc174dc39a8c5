//! Vector index population, run alongside the map stage.

use crate::metrics::RunMetrics;
use crate::processing::Chunk;
use crate::vector::VectorIndex;
use futures_util::{StreamExt, stream};
use std::sync::Arc;

use super::events::EventSink;
use super::services::Embedder;

/// Result of indexing a run's chunks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexingOutcome {
    /// Chunks inserted into the index.
    pub indexed: usize,
    /// Ascending indices of chunks left out of the index.
    pub unindexed: Vec<usize>,
}

/// Embeds chunks and inserts them into a shared [`VectorIndex`].
pub struct IndexBuilder {
    embedder: Embedder,
    metrics: Arc<RunMetrics>,
    max_in_flight: usize,
}

impl IndexBuilder {
    /// Build an index populator running at most `max_in_flight` embedding calls at once.
    pub fn new(embedder: Embedder, metrics: Arc<RunMetrics>, max_in_flight: usize) -> Self {
        Self {
            embedder,
            metrics,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Embed every chunk and insert it. Failures leave the chunk out of the index; they never
    /// abort the pass. Stops scheduling work once the run is cancelled.
    pub async fn populate(
        &self,
        chunks: &[Arc<Chunk>],
        index: &VectorIndex,
        events: &EventSink,
    ) -> IndexingOutcome {
        let mut outcome = IndexingOutcome::default();
        let mut pending = stream::iter(chunks.iter().cloned())
            .map(|chunk| async move {
                let result = self.embedder.embed(&chunk.text).await;
                (chunk, result)
            })
            .buffer_unordered(self.max_in_flight);

        while let Some((chunk, result)) = pending.next().await {
            if events.is_cancelled() {
                tracing::debug!("Index population cancelled");
                break;
            }
            let inserted = match result {
                Ok(vector) => {
                    let embedded = Arc::new(chunk.with_embedding(vector.clone()));
                    index.insert(vector, embedded).map_err(|error| error.to_string())
                }
                Err(error) => Err(error.to_string()),
            };
            match inserted {
                Ok(()) => {
                    self.metrics.record_chunk_indexed();
                    outcome.indexed += 1;
                }
                Err(reason) => {
                    tracing::warn!(chunk = chunk.index, error = %reason, "Chunk left out of vector index");
                    outcome.unindexed.push(chunk.index);
                }
            }
        }

        outcome.unindexed.sort_unstable();
        tracing::info!(
            indexed = outcome.indexed,
            unindexed = outcome.unindexed.len(),
            "Index population finished"
        );
        outcome
    }
}
