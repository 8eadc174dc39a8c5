//! Question generation: a lazy, finite stream of validated questions per concept seed.

use crate::completion::CompletionPurpose;
use crate::metrics::RunMetrics;
use crate::processing::Chunk;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use super::error::ValidationError;
use super::parse::parse_questions;
use super::prompts::build_question_prompt;
use super::services::Completer;
use super::types::{ConceptSeed, Question};

/// Everything needed to generate questions for one seed.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Concept the questions target.
    pub seed: ConceptSeed,
    /// Merged document summary, shared by every seed of a run.
    pub summary: Arc<str>,
    /// Retrieved source chunks used as grounding.
    pub passages: Vec<Arc<Chunk>>,
    /// Questions wanted from this seed.
    pub count: usize,
}

/// Produces validated questions from the completion backend.
///
/// Clones share one set of accepted stems, so a stem is emitted at most once across every
/// seed generated through the same generator.
#[derive(Clone)]
pub struct QuestionGenerator {
    completer: Completer,
    metrics: Arc<RunMetrics>,
    regeneration_attempts: usize,
    accepted_stems: Arc<Mutex<HashSet<String>>>,
}

impl QuestionGenerator {
    /// Build a generator allowed `regeneration_attempts` extra calls per seed when validation
    /// leaves it short of the requested count.
    pub fn new(
        completer: Completer,
        metrics: Arc<RunMetrics>,
        regeneration_attempts: usize,
    ) -> Self {
        Self {
            completer,
            metrics,
            regeneration_attempts,
            accepted_stems: Arc::default(),
        }
    }

    /// Lazily generate up to `request.count` questions.
    ///
    /// Nothing is requested from the model until the stream is polled. Each accepted question
    /// is yielded immediately; the stream ends once the count is met or attempts run out, and
    /// cannot be restarted. Stems already accepted for any seed are rejected as
    /// [`ValidationError::DuplicateStem`] and leave room for a regeneration attempt.
    pub fn generate(&self, request: GenerationRequest) -> BoxStream<'static, Question> {
        let completer = self.completer.clone();
        let metrics = Arc::clone(&self.metrics);
        let accepted_stems = Arc::clone(&self.accepted_stems);
        let max_attempts = 1 + self.regeneration_attempts;

        async_stream::stream! {
            let GenerationRequest { seed, summary, passages, count } = request;
            let grounding: Vec<usize> = passages.iter().map(|chunk| chunk.index).collect();
            let mut accepted = 0usize;
            let mut attempt = 0usize;

            while accepted < count && attempt < max_attempts {
                attempt += 1;
                let passage_refs: Vec<&Chunk> = passages.iter().map(Arc::as_ref).collect();
                let prompt = build_question_prompt(&seed, &summary, &passage_refs, count - accepted, attempt);
                let raw = match completer.complete(CompletionPurpose::Questions, prompt).await {
                    Ok(raw) => raw,
                    Err(error) => {
                        tracing::warn!(concept = %seed.name, attempt, error = %error, "Question generation call failed");
                        continue;
                    }
                };

                let items = match parse_questions(&raw) {
                    Ok(items) => items,
                    Err(error) => {
                        metrics.record_question_rejected();
                        tracing::warn!(concept = %seed.name, attempt, error = %error, "Discarding unreadable question batch");
                        continue;
                    }
                };

                for item in items {
                    if accepted >= count {
                        break;
                    }
                    match item.and_then(|question| claim_stem(&accepted_stems, question)) {
                        Ok(question) => {
                            accepted += 1;
                            yield question.grounded(seed.label(), grounding.clone());
                        }
                        Err(error) => {
                            metrics.record_question_rejected();
                            tracing::warn!(concept = %seed.name, attempt, error = %error, "Dropping invalid question");
                        }
                    }
                }
            }

            if accepted < count {
                tracing::info!(concept = %seed.name, accepted, requested = count, attempts = attempt, "Seed finished short of requested questions");
            }
        }
        .boxed()
    }
}

/// Record the question's stem as taken, rejecting stems some seed already produced.
fn claim_stem(
    accepted_stems: &Mutex<HashSet<String>>,
    question: Question,
) -> Result<Question, ValidationError> {
    let mut stems = accepted_stems
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if stems.insert(question.stem_key()) {
        Ok(question)
    } else {
        Err(ValidationError::DuplicateStem(question.stem().to_string()))
    }
}
