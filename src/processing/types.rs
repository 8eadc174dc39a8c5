//! Core ingest-side data types and error definitions.

use anyhow::Error as TokenizerSourceError;
use sha2::{Digest, Sha256};
use std::ops::Range;
use std::sync::Arc;
use thiserror::Error;

use super::extract::TextExtractor;

/// Errors raised at the text-extraction boundary.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The declared format is not handled by the extractor.
    #[error("unsupported document format '{0}'")]
    UnsupportedFormat(String),
    /// Bytes were not valid text in the declared encoding.
    #[error("document is not valid UTF-8: {0}")]
    InvalidEncoding(#[from] std::str::Utf8Error),
    /// Reading the source failed.
    #[error("failed to read document source '{path}': {source}")]
    Io {
        /// Path that could not be read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Tokenizer resources were unavailable for the configured encoding.
#[derive(Debug, Error)]
#[error("failed to initialize tokenizer '{encoding}': {source}")]
pub struct TokenizerError {
    /// Encoding or model we attempted to load.
    pub encoding: String,
    /// Underlying error raised by the tokenizer library.
    #[source]
    pub source: TokenizerSourceError,
}

/// A loaded source document. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Document {
    source_id: Arc<str>,
    text: Arc<str>,
    char_len: usize,
}

impl Document {
    /// Wrap already-extracted text.
    pub fn new(source_id: impl Into<String>, text: impl Into<String>) -> Self {
        let text: String = text.into();
        let char_len = text.chars().count();
        Self {
            source_id: Arc::from(source_id.into()),
            text: Arc::from(text),
            char_len,
        }
    }

    /// Extract text from raw bytes through the extraction boundary.
    pub fn from_bytes(
        source_id: impl Into<String>,
        bytes: &[u8],
        declared_format: &str,
        extractor: &dyn TextExtractor,
    ) -> Result<Self, ExtractionError> {
        let text = extractor.extract(bytes, declared_format)?;
        Ok(Self::new(source_id, text))
    }

    /// Identifier of the source (file name, upload id, ...).
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Shared handle to the source identifier.
    pub fn source_handle(&self) -> Arc<str> {
        Arc::clone(&self.source_id)
    }

    /// Full document text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Total length in Unicode scalar values.
    pub fn len(&self) -> usize {
        self.char_len
    }

    /// Whether the document has no characters at all.
    pub fn is_empty(&self) -> bool {
        self.char_len == 0
    }

    /// Whether the document contains nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// SHA-256 hex digest of the text, stable across runs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.text.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A bounded contiguous span of document text.
///
/// Chunks are created by the chunker and never mutated; attaching an embedding produces a new
/// value.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    /// Position in the document, contiguous from zero.
    pub index: usize,
    /// Literal text of the span, overlap prefix included.
    pub text: String,
    /// Byte range of `text` within the source document.
    pub span: Range<usize>,
    /// Byte length of the prefix repeated from the previous chunk.
    pub overlap_len: usize,
    /// Identifier of the source document (back-reference only).
    pub source_id: Arc<str>,
    /// Embedding vector once the chunk has been indexed.
    pub embedding: Option<Arc<[f32]>>,
}

impl Chunk {
    /// The part of the chunk not shared with its predecessor.
    pub fn fresh_text(&self) -> &str {
        &self.text[self.overlap_len..]
    }

    /// The prefix shared with the previous chunk.
    pub fn overlap_text(&self) -> &str {
        &self.text[..self.overlap_len]
    }

    /// Return a copy of this chunk carrying `embedding`.
    pub fn with_embedding(&self, embedding: Vec<f32>) -> Self {
        Self {
            embedding: Some(Arc::from(embedding)),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_length_counts_characters_not_bytes() {
        let document = Document::new("doc", "héllo");
        assert_eq!(document.len(), 5);
        assert!(!document.is_blank());
    }

    #[test]
    fn fingerprint_is_stable() {
        let a = Document::new("a", "same text");
        let b = Document::new("b", "same text");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }

    #[test]
    fn whitespace_document_is_blank() {
        assert!(Document::new("doc", " \n\t ").is_blank());
    }
}
