//! Deterministic overlapping chunker.
//!
//! Chunk geometry, measured in the configured [`ChunkUnit`]:
//!
//! - Every chunk owns a fresh span of `chunk_size` units (the last one may be shorter).
//! - Chunk `i > 0` additionally starts with the last `chunk_overlap` units of chunk `i - 1`,
//!   so concepts straddling a boundary are visible to both sides.
//! - A chunk therefore never holds more than `chunk_size + chunk_overlap` units, and a document
//!   of `n` units yields `ceil(n / chunk_size)` chunks.
//!
//! Boundaries depend only on the text and the configuration.

use crate::config::{ChunkUnit, ChunkingConfig, ConfigError};
use std::iter;

use super::types::{Chunk, Document};

/// Splits documents into overlapping, index-ordered chunks.
#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    /// Build a chunker, rejecting geometries where the overlap swallows the chunk.
    pub fn new(config: ChunkingConfig) -> Result<Self, ConfigError> {
        if config.chunk_size == 0 {
            return Err(ConfigError::InvalidParameter {
                field: "chunk_size",
                reason: "must be greater than zero".into(),
            });
        }
        if config.chunk_size <= config.chunk_overlap {
            return Err(ConfigError::InvalidParameter {
                field: "chunk_overlap",
                reason: format!(
                    "must be smaller than chunk_size ({} <= {})",
                    config.chunk_size, config.chunk_overlap
                ),
            });
        }
        Ok(Self { config })
    }

    /// Geometry this chunker applies.
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Split the document into chunks. Returns an empty vector for an empty document.
    pub fn split(&self, document: &Document) -> Vec<Chunk> {
        let text = document.text();
        let boundaries = unit_boundaries(text, self.config.unit);
        let units = boundaries.len().saturating_sub(1);
        if units == 0 {
            return Vec::new();
        }

        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let source_id = document.source_handle();
        let count = units.div_ceil(size);
        let mut chunks = Vec::with_capacity(count);

        for index in 0..count {
            let fresh_start = index * size;
            let fresh_end = (fresh_start + size).min(units);
            let start = if index == 0 {
                fresh_start
            } else {
                fresh_start - overlap
            };

            let span = boundaries[start]..boundaries[fresh_end];
            let overlap_len = boundaries[fresh_start] - boundaries[start];
            chunks.push(Chunk {
                index,
                text: text[span.clone()].to_string(),
                span,
                overlap_len,
                source_id: source_id.clone(),
                embedding: None,
            });
        }

        tracing::debug!(
            source = document.source_id(),
            units,
            chunks = chunks.len(),
            chunk_size = size,
            chunk_overlap = overlap,
            unit = ?self.config.unit,
            "Split document"
        );
        chunks
    }
}

/// Byte offsets at which each unit starts, followed by the text length.
///
/// For [`ChunkUnit::Tokens`] a unit is a run of non-whitespace plus the whitespace that follows
/// it; leading whitespace belongs to the first unit.
fn unit_boundaries(text: &str, unit: ChunkUnit) -> Vec<usize> {
    if text.is_empty() {
        return Vec::new();
    }

    match unit {
        ChunkUnit::Chars => text
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(iter::once(text.len()))
            .collect(),
        ChunkUnit::Tokens => {
            let mut boundaries = vec![0];
            let mut previous_is_whitespace = false;
            for (offset, ch) in text.char_indices() {
                let is_whitespace = ch.is_whitespace();
                if offset > 0 && previous_is_whitespace && !is_whitespace {
                    boundaries.push(offset);
                }
                previous_is_whitespace = is_whitespace;
            }
            boundaries.push(text.len());
            boundaries
        }
    }
}

/// Rebuild the document text from its chunks by dropping every overlap prefix.
pub fn reassemble(chunks: &[Chunk]) -> String {
    chunks.iter().map(Chunk::fresh_text).collect()
}
