//! Document ingest: text extraction, chunking, and token estimation.

pub mod chunking;
pub mod extract;
pub mod tokens;
pub mod types;

pub use chunking::{Chunker, reassemble};
pub use extract::{PlainTextExtractor, TextExtractor, load_directory, load_document};
pub use tokens::TokenEstimator;
pub use types::{Chunk, Document, ExtractionError, TokenizerError};
