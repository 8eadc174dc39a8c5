use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing the activity of a single pipeline run.
#[derive(Debug, Default)]
pub struct RunMetrics {
    model_calls: AtomicU64,
    embedding_calls: AtomicU64,
    retries: AtomicU64,
    chunks_summarized: AtomicU64,
    chunks_skipped: AtomicU64,
    chunks_indexed: AtomicU64,
    questions_emitted: AtomicU64,
    questions_rejected: AtomicU64,
}

impl RunMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt against the completion backend.
    pub fn record_model_call(&self) {
        self.model_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one attempt against the embedding backend.
    pub fn record_embedding_call(&self) {
        self.embedding_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry scheduled after a failed attempt.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of a map-stage chunk.
    pub fn record_chunk_summary(&self, succeeded: bool) {
        if succeeded {
            self.chunks_summarized.fetch_add(1, Ordering::Relaxed);
        } else {
            self.chunks_skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a chunk inserted into the vector index.
    pub fn record_chunk_indexed(&self) {
        self.chunks_indexed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a validated question handed to the caller.
    pub fn record_question_emitted(&self) {
        self.questions_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a model-produced question dropped by validation.
    pub fn record_question_rejected(&self) {
        self.questions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            model_calls: self.model_calls.load(Ordering::Relaxed),
            embedding_calls: self.embedding_calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            chunks_summarized: self.chunks_summarized.load(Ordering::Relaxed),
            chunks_skipped: self.chunks_skipped.load(Ordering::Relaxed),
            chunks_indexed: self.chunks_indexed.load(Ordering::Relaxed),
            questions_emitted: self.questions_emitted.load(Ordering::Relaxed),
            questions_rejected: self.questions_rejected.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of run counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Completion attempts, retries included.
    pub model_calls: u64,
    /// Embedding attempts, retries included.
    pub embedding_calls: u64,
    /// Retries scheduled after failed attempts.
    pub retries: u64,
    /// Chunks condensed by the map stage.
    pub chunks_summarized: u64,
    /// Chunks skipped by the map stage after exhausting retries.
    pub chunks_skipped: u64,
    /// Chunks inserted into the vector index.
    pub chunks_indexed: u64,
    /// Questions streamed to the caller.
    pub questions_emitted: u64,
    /// Questions dropped by validation.
    pub questions_rejected: u64,
}
