use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use httpmock::{Method::POST, MockServer};
use mcqforge::completion::{
    CompletionClient, CompletionClientError, CompletionPurpose, CompletionRequest,
    OllamaCompletionClient,
};
use mcqforge::config::{
    ChunkUnit, ChunkingConfig, ConfigError, FailureThresholds, GenerationConfig, PipelineConfig,
    ReduceConfig, RetryPolicy,
};
use mcqforge::embedding::HashingEmbeddingClient;
use mcqforge::pipeline::{
    PipelineError, PipelineEvent, PipelineOrchestrator, RunHandle, RunState,
};
use mcqforge::processing::Document;
use serde_json::json;

/// Completion double that answers by stage and records every call.
struct StageModel {
    failing_excerpts: HashSet<usize>,
    merge_reply: String,
    question_replies: Mutex<VecDeque<String>>,
    calls: Mutex<Vec<(CompletionPurpose, String)>>,
}

impl StageModel {
    fn new() -> Self {
        Self {
            failing_excerpts: HashSet::new(),
            merge_reply: "Merged notes on photosynthesis.".into(),
            question_replies: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing_chunks(mut self, indices: impl IntoIterator<Item = usize>) -> Self {
        self.failing_excerpts
            .extend(indices.into_iter().map(|index| index + 1));
        self
    }

    fn with_merge_reply(mut self, reply: &str) -> Self {
        self.merge_reply = reply.into();
        self
    }

    fn with_question_replies(self, replies: Vec<String>) -> Self {
        *self.question_replies.lock().unwrap() = replies.into();
        self
    }

    fn calls_for(&self, purpose: CompletionPurpose) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| *called == purpose)
            .count()
    }

    fn prompts_for(&self, purpose: CompletionPurpose) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| *called == purpose)
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }
}

#[async_trait]
impl CompletionClient for StageModel {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionClientError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.purpose, request.prompt.clone()));
        match request.purpose {
            CompletionPurpose::ChunkSummary => {
                let excerpt = excerpt_number(&request.prompt);
                if excerpt.is_some_and(|n| self.failing_excerpts.contains(&n)) {
                    return Err(CompletionClientError::GenerationFailed(
                        "content filter".into(),
                    ));
                }
                Ok(format!(
                    "Excerpt {} covers chlorophyll and light reactions.",
                    excerpt.unwrap_or_default()
                ))
            }
            CompletionPurpose::Merge => Ok(self.merge_reply.clone()),
            CompletionPurpose::Concepts => Ok(json!([
                { "concept": "Light reactions", "summary": "How chlorophyll captures light" }
            ])
            .to_string()),
            CompletionPurpose::Questions => {
                if let Some(reply) = self.question_replies.lock().unwrap().pop_front() {
                    return Ok(reply);
                }
                let count = requested_count(&request.prompt);
                Ok(question_batch((1..=count).map(|n| (format!("Stock question {n}?"), "A"))))
            }
        }
    }
}

fn excerpt_number(prompt: &str) -> Option<usize> {
    let rest = prompt.split("Excerpt ").nth(1)?;
    rest.split(':').next()?.trim().parse().ok()
}

fn requested_count(prompt: &str) -> usize {
    prompt
        .split("You write ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|count| count.parse().ok())
        .unwrap_or(1)
}

fn question_batch<'a>(items: impl Iterator<Item = (String, &'a str)>) -> String {
    let questions: Vec<_> = items
        .map(|(stem, answer)| {
            json!({
                "question": stem,
                "choices": {
                    "A": "Chlorophyll absorbs light",
                    "B": "Roots absorb light",
                    "C": "Oxygen absorbs light",
                    "D": "Glucose absorbs light"
                },
                "answer": answer
            })
        })
        .collect();
    serde_json::Value::Array(questions).to_string()
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        chunking: ChunkingConfig {
            chunk_size: 200,
            chunk_overlap: 20,
            unit: ChunkUnit::Chars,
        },
        reduce: ReduceConfig {
            context_budget: 10_000,
            group_size: 4,
            max_levels: 4,
        },
        retry: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            call_timeout: Duration::from_secs(5),
        },
        thresholds: FailureThresholds::default(),
        generation: GenerationConfig {
            question_count: 5,
            max_concepts: 1,
            top_k: 2,
            regeneration_attempts: 1,
            reveal_answers: true,
        },
        max_in_flight: 3,
        token_encoding: "whitespace".into(),
    }
}

/// 1000 ASCII characters: five chunks at size 200.
fn study_document() -> Document {
    let sentence = "Chlorophyll in the thylakoid captures light to split water. ";
    let mut text = sentence.repeat(1000 / sentence.len() + 1);
    text.truncate(1000);
    Document::new("photosynthesis.txt", text)
}

fn orchestrator(model: Arc<StageModel>, config: PipelineConfig) -> PipelineOrchestrator {
    PipelineOrchestrator::new(config, model, Arc::new(HashingEmbeddingClient::new(128)))
}

#[tokio::test]
async fn failing_chunk_is_skipped_and_the_run_completes() {
    let model = Arc::new(StageModel::new().failing_chunks([2]));
    let report = orchestrator(model.clone(), test_config())
        .run_to_completion(study_document())
        .await
        .expect("run completes");

    assert_eq!(report.chunk_count, 5);
    assert_eq!(report.provenance, vec![0, 1, 3, 4]);
    assert_eq!(report.skipped_chunks.len(), 1);
    assert_eq!(report.skipped_chunks[0].index, 2);
    assert!(report.is_degraded());
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.questions.len(), 5);
    // Non-retryable failure: one attempt per chunk.
    assert_eq!(model.calls_for(CompletionPurpose::ChunkSummary), 5);
    // The concatenated summaries fit the budget, so no merge call is made.
    assert_eq!(model.calls_for(CompletionPurpose::Merge), 0);
}

#[tokio::test]
async fn invalid_question_is_dropped_after_regeneration() {
    let mut first: Vec<(String, &str)> = (1..=4)
        .map(|n| (format!("Which structure performs step {n}?"), "A"))
        .collect();
    first.push(("Which pigment is green?".into(), "E"));
    let retry = vec![("Which pigment is green?".to_string(), "E")];
    let model = Arc::new(StageModel::new().with_question_replies(vec![
        question_batch(first.into_iter()),
        question_batch(retry.into_iter()),
    ]));

    let report = orchestrator(model.clone(), test_config())
        .run_to_completion(study_document())
        .await
        .expect("run completes");

    assert_eq!(report.questions.len(), 4);
    assert_eq!(model.calls_for(CompletionPurpose::Questions), 2);
    assert!(report.questions.iter().all(|q| q.answer() == "A"));
    assert!(report.questions.iter().all(|q| !q.grounding_chunks().is_empty()));
    assert_eq!(report.metrics.questions_rejected, 2);
}

#[tokio::test]
async fn repeated_runs_share_structure() {
    let config = test_config();
    let first = orchestrator(Arc::new(StageModel::new()), config.clone())
        .run_to_completion(study_document())
        .await
        .expect("first run");
    let second = orchestrator(Arc::new(StageModel::new()), config)
        .run_to_completion(study_document())
        .await
        .expect("second run");

    assert_eq!(first.chunk_count, second.chunk_count);
    assert_eq!(first.provenance, second.provenance);
    assert_eq!(first.tree_shape, second.tree_shape);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_ne!(first.run_id, second.run_id);
}

#[tokio::test]
async fn invalid_geometry_fails_before_any_call() {
    let mut config = test_config();
    config.chunking.chunk_overlap = config.chunking.chunk_size;
    let model = Arc::new(StageModel::new());

    let failure = orchestrator(model.clone(), config)
        .run_to_completion(study_document())
        .await
        .expect_err("config rejected");

    assert!(matches!(
        failure.source,
        PipelineError::Config(ConfigError::InvalidParameter {
            field: "chunk_overlap",
            ..
        })
    ));
    assert_eq!(failure.last_state, RunState::Uploading);
    assert!(model.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn blank_document_is_rejected() {
    let failure = orchestrator(Arc::new(StageModel::new()), test_config())
        .run_to_completion(Document::new("blank.txt", " \n\t "))
        .await
        .expect_err("blank document");

    assert!(matches!(failure.source, PipelineError::EmptyDocument));
    assert!(failure.partial_questions.is_empty());
}

#[tokio::test]
async fn event_stream_reports_progress_questions_and_completion() {
    let model = Arc::new(StageModel::new().failing_chunks([2]));
    let RunHandle { events, outcome } =
        orchestrator(model, test_config()).start(study_document());
    let events: Vec<PipelineEvent> = events.collect().await;
    let report = outcome.await.expect("task joined").expect("run completes");

    let states: Vec<RunState> = events
        .iter()
        .filter_map(|event| match event {
            PipelineEvent::Progress { state } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            RunState::Uploading,
            RunState::Chunking,
            RunState::Summarizing,
            RunState::Reducing,
            RunState::Retrieving,
            RunState::Generating,
        ]
    );
    assert!(events.iter().any(|event| matches!(
        event,
        PipelineEvent::ChunkSkipped { index: 2, .. }
    )));

    let streamed = events
        .iter()
        .filter(|event| matches!(event, PipelineEvent::Question(_)))
        .count();
    assert_eq!(streamed, report.questions.len());

    let last = events.last().expect("terminal event");
    assert!(last.is_terminal());
    match last {
        PipelineEvent::Completed {
            question_count,
            skipped_chunks,
            degraded,
            ..
        } => {
            assert_eq!(*question_count, 5);
            assert_eq!(skipped_chunks, &vec![2]);
            assert!(*degraded);
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }
}

#[tokio::test]
async fn hidden_answers_are_withheld_from_question_events() {
    let RunHandle { events, outcome } =
        orchestrator(Arc::new(StageModel::new()), test_config()).start(study_document());
    let events: Vec<PipelineEvent> = events.collect().await;
    outcome.await.expect("task joined").expect("run completes");

    let question = events
        .iter()
        .find(|event| matches!(event, PipelineEvent::Question(_)))
        .expect("question event");
    let hidden = question.to_json(false).expect("json");
    let shown = question.to_json(true).expect("json");
    assert_eq!(hidden["event"], "question");
    assert!(hidden.get("answer").is_none());
    assert_eq!(shown["answer"], "A");
}

#[tokio::test]
async fn dropping_the_event_stream_cancels_the_run() {
    let model = Arc::new(StageModel::new());
    let RunHandle { events, outcome } =
        orchestrator(model.clone(), test_config()).start(study_document());
    drop(events);

    let failure = outcome
        .await
        .expect("task joined")
        .expect_err("run cancelled");
    assert!(matches!(failure.source, PipelineError::Cancelled));
    assert_eq!(model.calls_for(CompletionPurpose::Questions), 0);
}

#[tokio::test]
async fn ollama_backend_drives_a_full_run() {
    let server = MockServer::start_async().await;
    let summaries = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .body_contains("Excerpt");
            then.status(200).json_body(json!({
                "response": "Chlorophyll captures light energy.",
                "done": true
            }));
        })
        .await;
    let concepts = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .body_contains("You rank the concepts");
            then.status(200).json_body(json!({
                "response": json!([{ "concept": "Chlorophyll", "summary": "Green pigment" }]).to_string(),
                "done": true
            }));
        })
        .await;
    let questions = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .body_contains("multiple-choice questions");
            then.status(200).json_body(json!({
                "response": question_batch(
                    [("What does chlorophyll absorb?".to_string(), "A"), ("Where is chlorophyll found?".to_string(), "A")].into_iter()
                ),
                "done": true
            }));
        })
        .await;

    let client = OllamaCompletionClient::new(server.base_url(), "llama3.1".into())
        .expect("client builds");
    let mut config = test_config();
    config.generation.question_count = 2;
    let report = PipelineOrchestrator::new(
        config,
        Arc::new(client),
        Arc::new(HashingEmbeddingClient::new(64)),
    )
    .run_to_completion(study_document())
    .await
    .expect("run completes");

    summaries.assert_hits_async(5).await;
    concepts.assert_hits_async(1).await;
    questions.assert_hits_async(1).await;
    assert_eq!(report.questions.len(), 2);
    assert_eq!(report.questions[0].concept(), Some("Chlorophyll"));
    assert!(!report.is_degraded());
}

#[tokio::test]
async fn every_chunk_failing_ends_the_stream_with_a_summarizing_failure() {
    let model = Arc::new(StageModel::new().failing_chunks(0..5));
    let RunHandle { events, outcome } =
        orchestrator(model.clone(), test_config()).start(study_document());
    let events: Vec<PipelineEvent> = events.collect().await;
    let failure = outcome
        .await
        .expect("task joined")
        .expect_err("run fails");

    assert!(matches!(
        failure.source,
        PipelineError::SummarizationFailed {
            skipped: 5,
            total: 5
        }
    ));
    assert_eq!(failure.last_state, RunState::Summarizing);
    assert!(failure.partial_questions.is_empty());
    let skipped = events
        .iter()
        .filter(|event| matches!(event, PipelineEvent::ChunkSkipped { .. }))
        .count();
    assert_eq!(skipped, 5);
    match events.last().expect("terminal event") {
        PipelineEvent::Failed {
            last_state,
            questions_emitted,
            ..
        } => {
            assert_eq!(*last_state, RunState::Summarizing);
            assert_eq!(*questions_emitted, 0);
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }
    assert_eq!(model.calls_for(CompletionPurpose::Merge), 0);
    assert_eq!(model.calls_for(CompletionPurpose::Questions), 0);
}

#[tokio::test]
async fn only_invalid_questions_fail_the_run_while_generating() {
    let invalid = |prefix: &str| {
        question_batch((1..=5).map(|n| (format!("{prefix} question {n}?"), "E")))
    };
    let model = Arc::new(
        StageModel::new().with_question_replies(vec![invalid("First"), invalid("Second")]),
    );
    let RunHandle { events, outcome } =
        orchestrator(model.clone(), test_config()).start(study_document());
    let events: Vec<PipelineEvent> = events.collect().await;
    let failure = outcome
        .await
        .expect("task joined")
        .expect_err("run fails");

    assert!(matches!(
        failure.source,
        PipelineError::NoValidQuestions { requested: 5 }
    ));
    assert_eq!(failure.last_state, RunState::Generating);
    assert_eq!(model.calls_for(CompletionPurpose::Questions), 2);
    assert!(
        !events
            .iter()
            .any(|event| matches!(event, PipelineEvent::Question(_)))
    );
    match events.last().expect("terminal event") {
        PipelineEvent::Failed {
            last_state,
            questions_emitted,
            ..
        } => {
            assert_eq!(*last_state, RunState::Generating);
            assert_eq!(*questions_emitted, failure.partial_questions.len());
        }
        other => panic!("unexpected terminal event: {other:?}"),
    }
}

#[tokio::test]
async fn tight_context_budget_builds_a_merge_level() {
    let mut config = test_config();
    // Five seven-word summaries against a twenty-token budget.
    config.reduce.context_budget = 20;
    config.reduce.group_size = 2;
    let model = Arc::new(StageModel::new());

    let report = orchestrator(model.clone(), config)
        .run_to_completion(study_document())
        .await
        .expect("run completes");

    assert_eq!(report.tree_shape, vec![5, 3]);
    assert_eq!(report.provenance, vec![0, 1, 2, 3, 4]);
    assert_eq!(model.calls_for(CompletionPurpose::Merge), 3);
    let question_prompts = model.prompts_for(CompletionPurpose::Questions);
    assert!(!question_prompts.is_empty());
    assert!(
        question_prompts
            .iter()
            .all(|prompt| prompt.contains("Merged notes on photosynthesis."))
    );
}

#[tokio::test]
async fn summary_that_never_fits_fails_while_reducing() {
    let mut config = test_config();
    config.reduce.context_budget = 20;
    config.reduce.group_size = 2;
    config.reduce.max_levels = 1;
    let model = Arc::new(StageModel::new().with_merge_reply(
        "Merged notes that stay far too long to ever fit the budget.",
    ));

    let failure = orchestrator(model.clone(), config)
        .run_to_completion(study_document())
        .await
        .expect_err("reduce does not converge");

    assert!(matches!(
        failure.source,
        PipelineError::ReduceDidNotConverge { levels: 1 }
    ));
    assert_eq!(failure.last_state, RunState::Reducing);
    assert_eq!(model.calls_for(CompletionPurpose::Merge), 3);
    assert_eq!(model.calls_for(CompletionPurpose::Questions), 0);
}
