//! Values handed between pipeline stages. All of them are immutable once produced.

use serde::Serialize;
use std::collections::BTreeMap;

use super::error::ValidationError;

/// Condensed text of one chunk produced by the map stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkSummary {
    /// Index of the summarized chunk.
    pub index: usize,
    /// Condensed text.
    pub text: String,
    /// Estimated token count of `text`.
    pub token_estimate: usize,
}

/// A chunk the map stage gave up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkGap {
    /// Index of the skipped chunk.
    pub index: usize,
    /// Last error observed for the chunk.
    pub reason: String,
}

/// Result of the reduce stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    /// Merged text.
    pub text: String,
    /// Ascending indices of every chunk that contributed.
    pub provenance: Vec<usize>,
    /// Node count of every tree level, leaves first. `[n]` means no merge call was needed.
    pub tree_shape: Vec<usize>,
    /// Estimated token count of `text`.
    pub token_estimate: usize,
}

impl DocumentSummary {
    /// Number of merge levels built above the leaves.
    pub fn merge_levels(&self) -> usize {
        self.tree_shape.len().saturating_sub(1)
    }
}

/// An importance-ranked concept mined from the document summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConceptSeed {
    /// Short concept name; empty when the seed is the whole summary.
    pub name: String,
    /// Description used as the generation focus.
    pub description: String,
}

impl ConceptSeed {
    /// Seed that focuses generation on the whole summary.
    pub fn from_summary(summary: &DocumentSummary) -> Self {
        Self {
            name: String::new(),
            description: summary.text.clone(),
        }
    }

    /// Phrase used to query the index.
    pub fn query_text(&self) -> String {
        match (self.name.is_empty(), self.description.is_empty()) {
            (true, _) => self.description.clone(),
            (false, true) => self.name.clone(),
            (false, false) => format!("{}: {}", self.name, self.description),
        }
    }

    /// Concept label recorded on generated questions.
    pub fn label(&self) -> Option<&str> {
        (!self.name.is_empty()).then_some(self.name.as_str())
    }
}

/// A validated multiple-choice question.
///
/// Construction goes through [`Question::new`], so every value satisfies: non-empty stem,
/// non-empty unique choice labels, and an answer label present among the choices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Question {
    question: String,
    choices: BTreeMap<String, String>,
    answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    concept: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    grounding_chunks: Vec<usize>,
}

impl Question {
    /// Validate and build a question from `(label, text)` pairs.
    pub fn new(
        stem: &str,
        choices: Vec<(String, String)>,
        answer: &str,
    ) -> Result<Self, ValidationError> {
        let stem = stem.trim();
        if stem.is_empty() {
            return Err(ValidationError::EmptyStem);
        }
        if choices.is_empty() {
            return Err(ValidationError::NoChoices);
        }

        let mut mapping = BTreeMap::new();
        for (label, text) in choices {
            let label = label.trim().to_string();
            let text = text.trim().to_string();
            if label.is_empty() {
                return Err(ValidationError::EmptyLabel);
            }
            if text.is_empty() {
                return Err(ValidationError::EmptyChoice(label));
            }
            if mapping.contains_key(&label) {
                return Err(ValidationError::DuplicateLabel(label));
            }
            mapping.insert(label, text);
        }

        let answer = answer.trim();
        if !mapping.contains_key(answer) {
            return Err(ValidationError::UnknownAnswer(answer.to_string()));
        }

        Ok(Self {
            question: stem.to_string(),
            choices: mapping,
            answer: answer.to_string(),
            concept: None,
            grounding_chunks: Vec::new(),
        })
    }

    /// Attach the concept and grounding chunk indices the question was generated from.
    pub fn grounded(mut self, concept: Option<&str>, grounding_chunks: Vec<usize>) -> Self {
        self.concept = concept.map(str::to_string);
        self.grounding_chunks = grounding_chunks;
        self
    }

    /// Question stem.
    pub fn stem(&self) -> &str {
        &self.question
    }

    /// Label to choice text, ordered by label.
    pub fn choices(&self) -> &BTreeMap<String, String> {
        &self.choices
    }

    /// Correct choice label.
    pub fn answer(&self) -> &str {
        &self.answer
    }

    /// Concept the question targets, when generated from a named seed.
    pub fn concept(&self) -> Option<&str> {
        self.concept.as_deref()
    }

    /// Indices of the chunks supplied as grounding context.
    pub fn grounding_chunks(&self) -> &[usize] {
        &self.grounding_chunks
    }

    /// Normalised stem used for duplicate detection.
    pub(crate) fn stem_key(&self) -> String {
        self.question
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}
