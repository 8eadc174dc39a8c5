//! Append-only in-memory vector index with exact cosine search.

use std::cmp::Ordering;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

use super::similarity::{cosine_similarity, magnitude};
use crate::processing::Chunk;

/// Errors raised when inserting into the index.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// Vector length differs from the dimension fixed by the first insert.
    #[error("embedding dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension established by the first insert.
        expected: usize,
        /// Dimension of the rejected vector.
        actual: usize,
    },
    /// Zero-length vectors cannot be compared.
    #[error("cannot index an empty embedding vector")]
    EmptyVector,
}

struct IndexEntry {
    vector: Vec<f32>,
    magnitude: f32,
    chunk: Arc<Chunk>,
}

#[derive(Default)]
struct IndexState {
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
}

/// One query result.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// Matched chunk.
    pub chunk: Arc<Chunk>,
    /// Cosine similarity with the query vector.
    pub score: f32,
}

/// Stores `(vector, chunk)` pairs and answers top-k cosine queries.
///
/// Writers are serialized by an `RwLock`; queries share the read lock and only see
/// completed inserts. No lock is held across an await point.
#[derive(Default)]
pub struct VectorIndex {
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// Create an empty index; the dimension is fixed by the first insert.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn insert(&self, vector: Vec<f32>, chunk: Arc<Chunk>) -> Result<(), IndexError> {
        if vector.is_empty() {
            return Err(IndexError::EmptyVector);
        }
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.dimension {
            Some(expected) if expected != vector.len() => {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            Some(_) => {}
            None => state.dimension = Some(vector.len()),
        }
        let magnitude = magnitude(&vector);
        state.entries.push(IndexEntry {
            vector,
            magnitude,
            chunk,
        });
        Ok(())
    }

    /// Return at most `k` chunks ordered by descending similarity, ties by ascending chunk
    /// index. A query whose dimension differs from the index returns nothing.
    pub fn query(&self, vector: &[f32], k: usize) -> Vec<ScoredChunk> {
        if k == 0 {
            return Vec::new();
        }
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        if state.dimension != Some(vector.len()) {
            if state.dimension.is_some() {
                tracing::warn!(
                    expected = state.dimension,
                    actual = vector.len(),
                    "Ignoring query with mismatched dimension"
                );
            }
            return Vec::new();
        }

        let query_magnitude = magnitude(vector);
        let mut scored: Vec<ScoredChunk> = state
            .entries
            .iter()
            .map(|entry| ScoredChunk {
                chunk: Arc::clone(&entry.chunk),
                score: cosine_similarity(
                    vector,
                    &entry.vector,
                    Some(query_magnitude),
                    Some(entry.magnitude),
                ),
            })
            .collect();
        drop(state);

        scored.sort_by(compare_scored);
        scored.truncate(k);
        scored
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Whether nothing has been indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Dimension fixed by the first insert.
    pub fn dimension(&self) -> Option<usize> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .dimension
    }
}

fn compare_scored(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk.index.cmp(&b.chunk.index))
}
