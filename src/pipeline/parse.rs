//! Strict parsing of model output into validated values.
//!
//! The model is asked for a bare JSON array, but replies often arrive wrapped in code fences or
//! prose. The array is located, each element is decoded on its own, and every element is run
//! through [`Question::new`] so malformed items are rejected individually.

use regex::Regex;
use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::fmt;
use std::sync::OnceLock;

use super::error::ValidationError;
use super::types::{ConceptSeed, Question};

fn fenced_block_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z]*[ \t]*\n?(.*?)```").expect("valid fence pattern")
    })
}

fn label_prefix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\s*\(?([A-Za-z0-9])[\.\):]\s+(.+)$").expect("valid label pattern")
    })
}

/// Locate the JSON array in `raw` and split it into undecoded elements.
///
/// Fenced code blocks are searched before the reply as a whole.
fn array_items(raw: &str) -> Result<Vec<Box<RawValue>>, ValidationError> {
    let fenced = fenced_block_pattern()
        .captures_iter(raw)
        .filter_map(|captures| captures.get(1))
        .map(|block| block.as_str());
    fenced
        .chain(std::iter::once(raw))
        .find_map(first_array)
        .ok_or_else(|| ValidationError::Malformed("no JSON array found".into()))
}

/// The first `[` in `text` that opens a complete JSON array, preferring arrays of objects so
/// bracketed prose such as `[1]` is skipped.
fn first_array(text: &str) -> Option<Vec<Box<RawValue>>> {
    let mut fallback = None;
    for (offset, _) in text.match_indices('[') {
        let mut deserializer = serde_json::Deserializer::from_str(&text[offset..]);
        let Ok(items) = Vec::<Box<RawValue>>::deserialize(&mut deserializer) else {
            continue;
        };
        if items
            .iter()
            .any(|item| item.get().trim_start().starts_with('{'))
        {
            return Some(items);
        }
        fallback.get_or_insert(items);
    }
    fallback
}

/// Parse a question array. The outer error means nothing usable was found; inner errors
/// describe individual rejected items.
pub fn parse_questions(
    raw: &str,
) -> Result<Vec<Result<Question, ValidationError>>, ValidationError> {
    let items = array_items(raw)?;
    Ok(items
        .iter()
        .map(|item| {
            serde_json::from_str::<RawQuestion>(item.get())
                .map_err(|error| ValidationError::Malformed(error.to_string()))
                .and_then(RawQuestion::into_question)
        })
        .collect())
}

/// Parse an importance-ordered concept array, dropping unnamed and repeated concepts.
pub fn parse_concepts(raw: &str) -> Result<Vec<ConceptSeed>, ValidationError> {
    let items = array_items(raw)?;
    let mut seeds: Vec<ConceptSeed> = Vec::new();
    for item in &items {
        let Ok(concept) = serde_json::from_str::<RawConcept>(item.get()) else {
            continue;
        };
        let name = concept.concept.trim();
        if name.is_empty()
            || seeds
                .iter()
                .any(|seed| seed.name.eq_ignore_ascii_case(name))
        {
            continue;
        }
        seeds.push(ConceptSeed {
            name: name.to_string(),
            description: concept.summary.trim().to_string(),
        });
    }
    Ok(seeds)
}

#[derive(Deserialize)]
struct RawConcept {
    #[serde(alias = "name")]
    concept: String,
    #[serde(default, alias = "description")]
    summary: String,
}

#[derive(Deserialize)]
struct RawQuestion {
    #[serde(default, alias = "stem")]
    question: String,
    #[serde(default, alias = "options")]
    choices: RawChoices,
    #[serde(default, alias = "correct_answer")]
    answer: String,
}

impl RawQuestion {
    fn into_question(self) -> Result<Question, ValidationError> {
        let answer = resolve_answer(&self.answer, &self.choices.0);
        Question::new(&self.question, self.choices.0, &answer)
    }
}

/// Map answers such as `"B."`, `"B) text"`, or the full choice text onto a label.
fn resolve_answer(answer: &str, choices: &[(String, String)]) -> String {
    let answer = answer.trim();
    if choices.iter().any(|(label, _)| label.trim() == answer) {
        return answer.to_string();
    }
    if let Some(captures) = label_prefix_pattern().captures(answer) {
        return captures[1].to_string();
    }
    let stripped = answer.trim_end_matches(['.', ')', ':']);
    if choices.iter().any(|(label, _)| label.trim() == stripped) {
        return stripped.to_string();
    }
    choices
        .iter()
        .find(|(_, text)| text.trim().eq_ignore_ascii_case(answer))
        .map(|(label, _)| label.trim().to_string())
        .unwrap_or_else(|| answer.to_string())
}

/// Choices as ordered `(label, text)` pairs, duplicates preserved for validation.
#[derive(Default)]
struct RawChoices(Vec<(String, String)>);

#[derive(Deserialize)]
#[serde(untagged)]
enum RawChoice {
    Labeled { label: String, text: String },
    Text(String),
}

impl RawChoice {
    fn into_pair(self, position: usize) -> (String, String) {
        match self {
            Self::Labeled { label, text } => (label, text),
            Self::Text(text) => match label_prefix_pattern().captures(&text) {
                Some(captures) => (captures[1].to_string(), captures[2].to_string()),
                None => (positional_label(position), text),
            },
        }
    }
}

fn positional_label(position: usize) -> String {
    u8::try_from(position)
        .ok()
        .filter(|offset| *offset < 26)
        .map(|offset| char::from(b'A' + offset).to_string())
        .unwrap_or_else(|| (position + 1).to_string())
}

impl<'de> Deserialize<'de> for RawChoices {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ChoicesVisitor)
    }
}

struct ChoicesVisitor;

impl<'de> Visitor<'de> for ChoicesVisitor {
    type Value = RawChoices;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map of label to choice text or an array of choices")
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut pairs = Vec::new();
        while let Some((label, text)) = map.next_entry::<String, String>()? {
            pairs.push((label, text));
        }
        Ok(RawChoices(pairs))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut pairs = Vec::new();
        while let Some(choice) = seq.next_element::<RawChoice>()? {
            pairs.push(choice.into_pair(pairs.len()));
        }
        Ok(RawChoices(pairs))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(RawChoices::default())
    }
}
