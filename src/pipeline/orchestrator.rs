//! Run sequencing: chunk, map and index, reduce, retrieve, generate, and stream.

use crate::completion::CompletionClient;
use crate::config::PipelineConfig;
use crate::embedding::EmbeddingClient;
use crate::metrics::RunMetrics;
use crate::processing::{Chunk, Chunker, Document, TokenEstimator};
use crate::vector::VectorIndex;
use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use super::concepts::{ConceptExtractor, distribute_questions};
use super::embed::IndexBuilder;
use super::error::{PipelineError, RunFailure};
use super::events::{EventSink, PipelineEvent};
use super::generate::{GenerationRequest, QuestionGenerator};
use super::map::MapSummarizer;
use super::reduce::ReduceMerger;
use super::report::{RunReport, timestamp};
use super::retrieve::ConceptRetriever;
use super::services::{Completer, Embedder};
use super::state::{RunProgress, RunState};
use super::types::{ChunkGap, DocumentSummary, Question};

const EVENT_BUFFER: usize = 64;

/// Finite, producer-driven stream of run events. Dropping it cancels the run.
pub struct RunStream {
    run_id: Uuid,
    inner: BoxStream<'static, PipelineEvent>,
}

impl RunStream {
    /// Identifier of the run feeding this stream.
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

impl Stream for RunStream {
    type Item = PipelineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// A started run: its event stream and the task producing the final outcome.
pub struct RunHandle {
    /// Incremental events; ends with `Completed` or `Failed`.
    pub events: RunStream,
    /// Resolves to the report once the run finishes.
    pub outcome: JoinHandle<Result<RunReport, RunFailure>>,
}

/// Everything a run accumulates besides its progress state.
#[derive(Default)]
struct RunRecord {
    chunk_count: usize,
    gaps: Vec<ChunkGap>,
    unindexed: Vec<usize>,
    summary: Option<DocumentSummary>,
    questions: Vec<Question>,
}

/// Drives documents through the pipeline. Cheap to clone; runs never share mutable state
/// besides the backends themselves.
#[derive(Clone)]
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    completion: Arc<dyn CompletionClient>,
    embedding: Arc<dyn EmbeddingClient>,
}

impl PipelineOrchestrator {
    /// Build an orchestrator over the given backends.
    ///
    /// Configuration is validated again at the start of every run, before any work.
    pub fn new(
        config: PipelineConfig,
        completion: Arc<dyn CompletionClient>,
        embedding: Arc<dyn EmbeddingClient>,
    ) -> Self {
        Self {
            config,
            completion,
            embedding,
        }
    }

    /// Parameters applied to every run.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Start a run in the background and stream its events.
    pub fn start(&self, document: Document) -> RunHandle {
        let run_id = Uuid::new_v4();
        let (sender, mut receiver) = mpsc::channel(EVENT_BUFFER);
        let orchestrator = self.clone();
        let outcome = tokio::spawn(async move {
            orchestrator
                .execute(run_id, document, EventSink::channel(sender))
                .await
        });
        let inner = async_stream::stream! {
            while let Some(event) = receiver.recv().await {
                yield event;
            }
        }
        .boxed();
        RunHandle {
            events: RunStream { run_id, inner },
            outcome,
        }
    }

    /// Run to completion without streaming.
    pub async fn run_to_completion(&self, document: Document) -> Result<RunReport, RunFailure> {
        self.execute(Uuid::new_v4(), document, EventSink::detached())
            .await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        document: Document,
        events: EventSink,
    ) -> Result<RunReport, RunFailure> {
        let span = tracing::info_span!("run", %run_id, source = document.source_id());
        async move {
            let started_at = OffsetDateTime::now_utc();
            let metrics = Arc::new(RunMetrics::new());
            let mut progress = RunProgress::new(run_id);
            let mut record = RunRecord::default();
            tracing::info!(chars = document.len(), "Run started");

            let result = self
                .drive(&document, &mut progress, &mut record, &events, &metrics)
                .await;

            match result {
                Ok(()) => {
                    progress.advance(RunState::Completed);
                    let skipped: Vec<usize> = record.gaps.iter().map(|gap| gap.index).collect();
                    let degraded = !skipped.is_empty() || !record.unindexed.is_empty();
                    events
                        .emit(PipelineEvent::Completed {
                            question_count: record.questions.len(),
                            skipped_chunks: skipped,
                            unindexed_chunks: record.unindexed.clone(),
                            degraded,
                        })
                        .await;
                    let summary = record.summary.unwrap_or_else(|| DocumentSummary {
                        text: String::new(),
                        provenance: Vec::new(),
                        tree_shape: Vec::new(),
                        token_estimate: 0,
                    });
                    tracing::info!(
                        questions = record.questions.len(),
                        degraded,
                        "Run completed"
                    );
                    Ok(RunReport {
                        run_id,
                        source_id: document.source_id().to_string(),
                        fingerprint: document.fingerprint(),
                        state: progress.state(),
                        chunk_count: record.chunk_count,
                        skipped_chunks: record.gaps,
                        unindexed_chunks: record.unindexed,
                        provenance: summary.provenance,
                        tree_shape: summary.tree_shape,
                        questions: record.questions,
                        metrics: metrics.snapshot(),
                        started_at: timestamp(started_at),
                        finished_at: timestamp(OffsetDateTime::now_utc()),
                    })
                }
                Err(source) => {
                    let last_state = progress.last_active();
                    progress.advance(RunState::Failed);
                    tracing::error!(state = %last_state, error = %source, "Run failed");
                    events
                        .emit(PipelineEvent::Failed {
                            reason: source.to_string(),
                            last_state,
                            questions_emitted: record.questions.len(),
                        })
                        .await;
                    Err(RunFailure {
                        last_state,
                        partial_questions: record.questions,
                        source,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        document: &Document,
        progress: &mut RunProgress,
        record: &mut RunRecord,
        events: &EventSink,
        metrics: &Arc<RunMetrics>,
    ) -> Result<(), PipelineError> {
        let config = &self.config;
        config.validate()?;
        let chunker = Chunker::new(config.chunking.clone())?;
        let tokens = TokenEstimator::for_encoding(&config.token_encoding)?;
        let completer = Completer::new(
            Arc::clone(&self.completion),
            config.retry.clone(),
            Arc::clone(metrics),
        );
        let embedder = Embedder::new(
            Arc::clone(&self.embedding),
            config.retry.clone(),
            Arc::clone(metrics),
        );
        events
            .emit(PipelineEvent::Progress {
                state: progress.state(),
            })
            .await;

        if document.is_blank() {
            return Err(PipelineError::EmptyDocument);
        }

        enter(progress, events, RunState::Chunking).await?;
        let chunks: Vec<Arc<Chunk>> = chunker
            .split(document)
            .into_iter()
            .map(Arc::new)
            .collect();
        record.chunk_count = chunks.len();
        tracing::info!(chunks = chunks.len(), "Document chunked");

        enter(progress, events, RunState::Summarizing).await?;
        let index = Arc::new(VectorIndex::new());
        let summarizer = MapSummarizer::new(
            completer.clone(),
            tokens.clone(),
            Arc::clone(metrics),
            config.max_in_flight,
        );
        let indexer = IndexBuilder::new(embedder.clone(), Arc::clone(metrics), config.max_in_flight);
        let (mapped, indexed) = tokio::join!(
            summarizer.summarize_all(&chunks, events),
            indexer.populate(&chunks, &index, events),
        );
        let mapped = mapped?;
        check_cancelled(events)?;

        let total = chunks.len();
        record.gaps = mapped.gaps.clone();
        record.unindexed = indexed.unindexed;
        let skipped = mapped.gaps.len();
        if mapped.summaries.is_empty()
            || exceeds(skipped, total, config.thresholds.max_map_failure_ratio)
        {
            return Err(PipelineError::SummarizationFailed { skipped, total });
        }
        if exceeds(
            record.unindexed.len(),
            total,
            config.thresholds.max_embedding_failure_ratio,
        ) {
            return Err(PipelineError::IndexingFailed {
                unindexed: record.unindexed.len(),
                total,
            });
        }

        enter(progress, events, RunState::Reducing).await?;
        let merger = ReduceMerger::new(
            completer.clone(),
            tokens,
            config.reduce.clone(),
            config.max_in_flight,
        );
        let summary = merger.reduce(&mapped.summaries, events).await?;
        record.summary = Some(summary.clone());

        enter(progress, events, RunState::Retrieving).await?;
        let seeds = ConceptExtractor::new(completer.clone(), config.generation.max_concepts)
            .extract(&summary)
            .await;
        check_cancelled(events)?;
        let retriever = ConceptRetriever::new(embedder, Arc::clone(&index), config.generation.top_k);
        let allocation = distribute_questions(config.generation.question_count, seeds.len());
        let summary_text: Arc<str> = Arc::from(summary.text.as_str());
        let mut requests = Vec::new();
        for (seed, count) in seeds.into_iter().zip(allocation) {
            if count == 0 {
                continue;
            }
            let passages = retriever.retrieve(&seed).await.unwrap_or_else(|error| {
                tracing::warn!(concept = %seed.name, error = %error, "Grounding retrieval failed; generating from the summary only");
                Vec::new()
            });
            requests.push(GenerationRequest {
                seed,
                summary: Arc::clone(&summary_text),
                passages,
                count,
            });
        }

        enter(progress, events, RunState::Generating).await?;
        let generator = QuestionGenerator::new(
            completer,
            Arc::clone(metrics),
            config.generation.regeneration_attempts,
        );
        let streams: Vec<BoxStream<'static, Question>> = requests
            .into_iter()
            .map(|request| generator.generate(request))
            .collect();
        let mut questions = stream::iter(streams).flatten_unordered(config.max_in_flight);

        while let Some(question) = questions.next().await {
            check_cancelled(events)?;
            metrics.record_question_emitted();
            events.emit(PipelineEvent::Question(question.clone())).await;
            record.questions.push(question);
        }

        if record.questions.is_empty() {
            return Err(PipelineError::NoValidQuestions {
                requested: config.generation.question_count,
            });
        }
        Ok(())
    }
}

async fn enter(
    progress: &mut RunProgress,
    events: &EventSink,
    state: RunState,
) -> Result<(), PipelineError> {
    check_cancelled(events)?;
    if progress.advance(state) {
        events.emit(PipelineEvent::Progress { state }).await;
    }
    Ok(())
}

fn check_cancelled(events: &EventSink) -> Result<(), PipelineError> {
    if events.is_cancelled() {
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

fn exceeds(failed: usize, total: usize, max_ratio: f64) -> bool {
    total > 0 && failed as f64 / total as f64 > max_ratio
}
