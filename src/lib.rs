#![deny(missing_docs)]

//! Core library for MCQ Forge: map-reduce summarization of long documents and grounded
//! multiple-choice question generation.

/// Completion client abstraction and adapters.
pub mod completion;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Structured logging and tracing setup.
pub mod logging;
/// Per-run metrics counters.
pub mod metrics;
/// Map-reduce summarization and question generation pipeline.
pub mod pipeline;
/// Document ingest: extraction, chunking, and token estimation.
pub mod processing;
/// In-memory vector index.
pub mod vector;
