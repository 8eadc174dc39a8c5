//! Final run report and the question artifact.

use crate::metrics::MetricsSnapshot;
use serde::Serialize;
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

use super::state::RunState;
use super::types::{ChunkGap, Question};

/// Aggregated outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Identifier attached to the run's log events.
    pub run_id: Uuid,
    /// Source document identifier.
    pub source_id: String,
    /// SHA-256 hex digest of the document text.
    pub fingerprint: String,
    /// Terminal state.
    pub state: RunState,
    /// Chunks produced by the chunker.
    pub chunk_count: usize,
    /// Chunks excluded by the map stage, with reasons.
    pub skipped_chunks: Vec<ChunkGap>,
    /// Chunks missing from the vector index.
    pub unindexed_chunks: Vec<usize>,
    /// Chunk indices contributing to the document summary.
    pub provenance: Vec<usize>,
    /// Node count of each reduce tree level, leaves first.
    pub tree_shape: Vec<usize>,
    /// Questions in generation order.
    pub questions: Vec<Question>,
    /// Counters captured when the run finished.
    pub metrics: MetricsSnapshot,
    /// RFC 3339 start time.
    pub started_at: String,
    /// RFC 3339 finish time.
    pub finished_at: String,
}

impl RunReport {
    /// Whether any chunk was skipped or left unindexed.
    pub fn is_degraded(&self) -> bool {
        !self.skipped_chunks.is_empty() || !self.unindexed_chunks.is_empty()
    }

    /// The output artifact: a JSON array of questions in generation order.
    pub fn artifact_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.questions)
    }

    /// Write the artifact to `path`.
    pub fn write_artifact(&self, path: &Path) -> std::io::Result<()> {
        let json = self.artifact_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

pub(crate) fn timestamp(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.unix_timestamp().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_is_a_question_array() {
        let question = Question::new(
            "What is osmosis?",
            vec![("A".into(), "Diffusion of water".into()), ("B".into(), "Cell division".into())],
            "A",
        )
        .expect("valid");
        let report = RunReport {
            run_id: Uuid::nil(),
            source_id: "doc".into(),
            fingerprint: String::new(),
            state: RunState::Completed,
            chunk_count: 1,
            skipped_chunks: Vec::new(),
            unindexed_chunks: vec![0],
            provenance: vec![0],
            tree_shape: vec![1],
            questions: vec![question],
            metrics: MetricsSnapshot::default(),
            started_at: timestamp(OffsetDateTime::UNIX_EPOCH),
            finished_at: timestamp(OffsetDateTime::UNIX_EPOCH),
        };

        let value: serde_json::Value =
            serde_json::from_str(&report.artifact_json().expect("json")).expect("parse");
        assert_eq!(value[0]["question"], "What is osmosis?");
        assert_eq!(value[0]["answer"], "A");
        assert!(report.is_degraded());
        assert_eq!(report.started_at, "1970-01-01T00:00:00Z");
    }
}
