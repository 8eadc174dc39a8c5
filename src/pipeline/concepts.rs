//! Concept mining: turns the document summary into importance-ranked generation seeds.

use crate::completion::CompletionPurpose;

use super::parse::parse_concepts;
use super::prompts::build_concept_prompt;
use super::services::Completer;
use super::types::{ConceptSeed, DocumentSummary};

/// Asks the model for the most important concepts of a summary.
pub struct ConceptExtractor {
    completer: Completer,
    max_concepts: usize,
}

impl ConceptExtractor {
    /// Build an extractor returning at most `max_concepts` seeds.
    pub fn new(completer: Completer, max_concepts: usize) -> Self {
        Self {
            completer,
            max_concepts,
        }
    }

    /// Seeds in importance order. Falls back to a single whole-summary seed when concept mining
    /// is disabled, fails, or yields nothing.
    pub async fn extract(&self, summary: &DocumentSummary) -> Vec<ConceptSeed> {
        if self.max_concepts == 0 {
            return vec![ConceptSeed::from_summary(summary)];
        }

        let prompt = build_concept_prompt(&summary.text, self.max_concepts);
        let mut seeds = match self.completer.complete(CompletionPurpose::Concepts, prompt).await {
            Ok(raw) => parse_concepts(&raw).unwrap_or_else(|error| {
                tracing::warn!(error = %error, "Concept list unreadable; using the whole summary");
                Vec::new()
            }),
            Err(error) => {
                tracing::warn!(error = %error, "Concept extraction failed; using the whole summary");
                Vec::new()
            }
        };
        seeds.truncate(self.max_concepts);

        if seeds.is_empty() {
            return vec![ConceptSeed::from_summary(summary)];
        }
        tracing::info!(
            concepts = seeds.len(),
            first = %seeds[0].name,
            "Concepts extracted"
        );
        seeds
    }
}

/// Split `total` questions across `seeds` in order: every seed gets `total / seeds`, the
/// first `total % seeds` get one more.
pub fn distribute_questions(total: usize, seeds: usize) -> Vec<usize> {
    if seeds == 0 {
        return Vec::new();
    }
    let base = total / seeds;
    let remainder = total % seeds;
    (0..seeds)
        .map(|position| base + usize::from(position < remainder))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::{CompletionClient, CompletionClientError, CompletionRequest};
    use crate::config::RetryPolicy;
    use crate::metrics::RunMetrics;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct Fixed(&'static str);

    #[async_trait]
    impl CompletionClient for Fixed {
        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<String, CompletionClientError> {
            Ok(self.0.to_string())
        }
    }

    fn extractor(reply: &'static str, max_concepts: usize) -> ConceptExtractor {
        let policy = RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(1),
            call_timeout: Duration::from_secs(5),
        };
        ConceptExtractor::new(
            Completer::new(Arc::new(Fixed(reply)), policy, Arc::new(RunMetrics::new())),
            max_concepts,
        )
    }

    fn summary() -> DocumentSummary {
        DocumentSummary {
            text: "Cells make energy.".into(),
            provenance: vec![0],
            tree_shape: vec![1],
            token_estimate: 3,
        }
    }

    #[tokio::test]
    async fn caps_concepts_in_importance_order() {
        let seeds = extractor(
            r#"[{"concept":"A","summary":"a"},{"concept":"B","summary":"b"},{"concept":"C","summary":"c"}]"#,
            2,
        )
        .extract(&summary())
        .await;
        let names: Vec<_> = seeds.iter().map(|seed| seed.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }

    #[tokio::test]
    async fn unreadable_reply_falls_back_to_summary() {
        let seeds = extractor("no json here", 3).extract(&summary()).await;
        assert_eq!(seeds, vec![ConceptSeed::from_summary(&summary())]);
    }

    #[tokio::test]
    async fn zero_concepts_skips_the_model() {
        let seeds = extractor("unused", 0).extract(&summary()).await;
        assert_eq!(seeds.len(), 1);
        assert!(seeds[0].label().is_none());
    }

    #[test]
    fn distributes_remainder_to_first_seeds() {
        assert_eq!(distribute_questions(10, 4), vec![3, 3, 2, 2]);
        assert_eq!(distribute_questions(2, 5), vec![1, 1, 0, 0, 0]);
        assert!(distribute_questions(3, 0).is_empty());
    }
}
