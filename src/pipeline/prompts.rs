//! Prompt builders for every model-backed stage.

use schemars::JsonSchema;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::types::ConceptSeed;
use crate::processing::Chunk;

/// Shape the question prompt asks the model to return.
#[derive(Debug, Serialize, JsonSchema)]
struct QuestionSchema {
    /// Question stem, starting directly with the inquiry.
    question: String,
    /// Choice label (`A`..`D`) to choice text.
    choices: BTreeMap<String, String>,
    /// Label of the single correct choice.
    answer: String,
}

#[derive(Debug, Serialize, JsonSchema)]
struct ConceptSchema {
    /// Short name of the concept.
    concept: String,
    /// One or two sentences describing it.
    summary: String,
}

fn question_schema() -> &'static str {
    static SCHEMA: OnceLock<String> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        serde_json::to_string_pretty(&schemars::schema_for!(Vec<QuestionSchema>))
            .unwrap_or_default()
    })
}

fn concept_schema() -> &'static str {
    static SCHEMA: OnceLock<String> = OnceLock::new();
    SCHEMA.get_or_init(|| {
        serde_json::to_string_pretty(&schemars::schema_for!(Vec<ConceptSchema>))
            .unwrap_or_default()
    })
}

pub(crate) fn build_chunk_summary_prompt(chunk: &Chunk) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "System: You are an expert educator building detailed concept maps from study material.\n\n",
    );
    prompt.push_str(
        "From the excerpt below, extract the key concepts and terms, their definitions, the relationships between them, and any examples or applications. Keep every fact that a test question could be written about. Respond with a structured list.\n\n",
    );
    prompt.push_str(&format!("Excerpt {}:\n", chunk.index + 1));
    prompt.push_str(chunk.text.trim());
    prompt.push('\n');
    prompt
}

pub(crate) fn build_merge_prompt(parts: &[&str]) -> String {
    let mut prompt = String::new();
    prompt.push_str(
        "System: You merge concept maps extracted from consecutive parts of one document.\n\n",
    );
    prompt.push_str(
        "Combine the lists below into a single organized list. Remove redundancy but keep every unique idea, relationship, and example. Preserve the order in which topics first appear.\n\n",
    );
    for (position, part) in parts.iter().enumerate() {
        prompt.push_str(&format!("Part {}:\n{}\n\n", position + 1, part.trim()));
    }
    prompt.push_str("Respond with the consolidated list only.\n");
    prompt
}

pub(crate) fn build_concept_prompt(summary: &str, max_concepts: usize) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "System: You rank the concepts of a document by how important they are for understanding it. Return at most {max_concepts} concepts, most important first.\n\n"
    ));
    prompt.push_str("Return only a JSON array matching this schema:\n");
    prompt.push_str(concept_schema());
    prompt.push_str("\n\nDocument summary:\n");
    prompt.push_str(summary.trim());
    prompt.push('\n');
    prompt
}

pub(crate) fn build_question_prompt(
    seed: &ConceptSeed,
    summary: &str,
    passages: &[&Chunk],
    count: usize,
    attempt: usize,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(&format!(
        "System: You write {count} multiple-choice questions that test analysis and understanding rather than recall.\n\n"
    ));
    prompt.push_str(
        "Rules:\n- Start each question directly with the inquiry; no lead-in phrases and no mention of 'passages' or 'main idea'.\n- Give exactly four choices labelled A, B, C and D with one correct answer and three plausible distractors.\n- Return only a JSON array matching the schema below, with no prose or code fences.\n\n",
    );
    if attempt > 1 {
        prompt.push_str(
            "Your previous answer contained invalid questions. Every question needs a new stem, unique labels and an answer that is one of the labels.\n\n",
        );
    }
    prompt.push_str("Schema:\n");
    prompt.push_str(question_schema());
    let focus = seed.query_text();
    let summary = summary.trim();
    if !summary.is_empty() && summary != focus.trim() {
        prompt.push_str("\n\nDocument summary:\n");
        prompt.push_str(summary);
    }
    prompt.push_str("\n\nFocus:\n");
    prompt.push_str(focus.trim());
    prompt.push_str("\n\nSource passages:\n");
    for chunk in passages {
        prompt.push_str(&format!("[{}] {}\n", chunk.index, chunk.text.trim()));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn question_prompt_embeds_schema_and_passages() {
        let chunk = Chunk {
            index: 3,
            text: "Enzymes lower activation energy.".into(),
            span: 0..32,
            overlap_len: 0,
            source_id: Arc::from("doc"),
            embedding: None,
        };
        let seed = ConceptSeed {
            name: "Enzymes".into(),
            description: "Biological catalysts".into(),
        };
        let prompt = build_question_prompt(
            &seed,
            "Cells rely on enzymes to speed up reactions.",
            &[&chunk],
            2,
            1,
        );
        assert!(prompt.contains("write 2 multiple-choice questions"));
        assert!(prompt.contains("Document summary:\nCells rely on enzymes to speed up reactions."));
        assert!(prompt.contains("\"answer\""));
        assert!(prompt.contains("[3] Enzymes lower activation energy."));
        assert!(prompt.contains("Enzymes: Biological catalysts"));
        assert!(!prompt.contains("previous answer"));
    }

    #[test]
    fn whole_summary_focus_is_not_repeated() {
        let seed = ConceptSeed {
            name: String::new(),
            description: "Photosynthesis stores light as sugar.".into(),
        };
        let prompt = build_question_prompt(&seed, "Photosynthesis stores light as sugar.", &[], 1, 1);
        assert!(!prompt.contains("Document summary:"));
        assert_eq!(prompt.matches("Photosynthesis stores light as sugar.").count(), 1);
    }

    #[test]
    fn merge_prompt_numbers_parts_in_order() {
        let prompt = build_merge_prompt(&["first", "second"]);
        let first = prompt.find("Part 1:\nfirst").expect("part 1");
        let second = prompt.find("Part 2:\nsecond").expect("part 2");
        assert!(first < second);
    }
}
