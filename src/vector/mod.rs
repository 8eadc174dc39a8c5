//! In-memory vector index used to ground question generation in source chunks.

mod index;
pub mod similarity;

pub use index::{IndexError, ScoredChunk, VectorIndex};
