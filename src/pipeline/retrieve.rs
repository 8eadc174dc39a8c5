//! Grounding retrieval: re-embed a seed and fetch the closest source chunks.

use crate::processing::Chunk;
use crate::vector::{ScoredChunk, VectorIndex};
use std::collections::HashMap;
use std::sync::Arc;

use super::error::ServiceError;
use super::services::Embedder;
use super::types::ConceptSeed;

/// Rank constant for reciprocal rank fusion.
pub const RRF_K: f32 = 60.0;

/// Looks up source chunks relevant to a concept seed.
pub struct ConceptRetriever {
    embedder: Embedder,
    index: Arc<VectorIndex>,
    top_k: usize,
}

impl ConceptRetriever {
    /// Build a retriever returning at most `top_k` chunks per seed.
    pub fn new(embedder: Embedder, index: Arc<VectorIndex>, top_k: usize) -> Self {
        Self {
            embedder,
            index,
            top_k,
        }
    }

    /// Chunks grounding `seed`, most relevant first.
    ///
    /// Named seeds with a description are queried twice (name alone, then name plus
    /// description) and the two rankings are fused.
    pub async fn retrieve(&self, seed: &ConceptSeed) -> Result<Vec<Arc<Chunk>>, ServiceError> {
        if self.index.is_empty() {
            return Ok(Vec::new());
        }

        let mut queries = Vec::with_capacity(2);
        if !seed.name.is_empty() && !seed.description.is_empty() {
            queries.push(seed.name.clone());
        }
        queries.push(seed.query_text());

        let mut rankings = Vec::with_capacity(queries.len());
        for query in &queries {
            let vector = self.embedder.embed(query).await?;
            rankings.push(self.index.query(&vector, self.top_k));
        }

        let chunks = if rankings.len() == 1 {
            rankings
                .remove(0)
                .into_iter()
                .map(|hit| hit.chunk)
                .collect()
        } else {
            reciprocal_rank_fusion(&rankings, self.top_k)
        };
        tracing::debug!(
            concept = %seed.name,
            grounding = ?chunks.iter().map(|chunk| chunk.index).collect::<Vec<_>>(),
            "Retrieved grounding chunks"
        );
        Ok(chunks)
    }
}

/// Fuse rankings by summing `1 / (RRF_K + rank)`; ties go to the lower chunk index.
pub fn reciprocal_rank_fusion(rankings: &[Vec<ScoredChunk>], top_k: usize) -> Vec<Arc<Chunk>> {
    let mut fused: HashMap<usize, (f32, Arc<Chunk>)> = HashMap::new();
    for ranking in rankings {
        for (rank, hit) in ranking.iter().enumerate() {
            let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
            fused
                .entry(hit.chunk.index)
                .and_modify(|(score, _)| *score += contribution)
                .or_insert_with(|| (contribution, Arc::clone(&hit.chunk)));
        }
    }

    let mut ordered: Vec<(f32, Arc<Chunk>)> = fused.into_values().collect();
    ordered.sort_by(|(a_score, a), (b_score, b)| {
        b_score
            .total_cmp(a_score)
            .then_with(|| a.index.cmp(&b.index))
    });
    ordered
        .into_iter()
        .take(top_k)
        .map(|(_, chunk)| chunk)
        .collect()
}
