//! `mcq-forge` command line entrypoint.
//!
//! Loads a document (or every supported file under a directory), runs the pipeline, and prints
//! each run event as one JSON line on stdout. Logs go to stderr and the log file.
use anyhow::{Context, Result};
use clap::Parser;
use futures_util::StreamExt;
use mcqforge::pipeline::{PipelineEvent, PipelineOrchestrator, RunHandle};
use mcqforge::processing::{PlainTextExtractor, load_directory, load_document};
use mcqforge::logging::{self, LogSettings};
use mcqforge::{completion, config, embedding};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "mcq-forge",
    about = "Generate grounded multiple-choice questions from a document"
)]
struct Cli {
    /// Document file, or a directory whose supported files are merged in path order.
    path: PathBuf,
    /// Declared format of a single file (extension or MIME type); defaults to the extension.
    #[arg(long)]
    format: Option<String>,
    /// Number of questions to request; overrides `QUESTION_COUNT`.
    #[arg(long)]
    questions: Option<usize>,
    /// Write the question array to this file once the run completes.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Withhold the correct answer from streamed question events.
    #[arg(long)]
    hide_answers: bool,
    /// Only print question and terminal events; only warnings reach stderr.
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing_with(LogSettings {
        quiet: cli.quiet,
        ..LogSettings::from_env()
    });
    let config = config::get_config();

    let mut pipeline_config = config.pipeline.clone();
    if let Some(count) = cli.questions {
        pipeline_config.generation.question_count = count;
    }
    let reveal_answers = pipeline_config.generation.reveal_answers && !cli.hide_answers;

    let completion =
        completion::get_completion_client(config).context("failed to build completion client")?;
    let embedding =
        embedding::get_embedding_client(config).context("failed to build embedding client")?;

    let extractor = PlainTextExtractor;
    let document = if cli.path.is_dir() {
        load_directory(&cli.path, &extractor)
    } else {
        load_document(&cli.path, cli.format.as_deref(), &extractor)
    }
    .with_context(|| format!("failed to load {}", cli.path.display()))?;

    let orchestrator = PipelineOrchestrator::new(pipeline_config, completion, embedding);
    let RunHandle {
        mut events,
        outcome,
    } = orchestrator.start(document);
    tracing::info!(run_id = %events.run_id(), "Streaming run events");

    while let Some(event) = events.next().await {
        if cli.quiet && matches!(event, PipelineEvent::Progress { .. }) {
            continue;
        }
        let line = event
            .to_json(reveal_answers)
            .context("failed to encode event")?;
        println!("{line}");
    }

    let report = outcome.await.context("pipeline task aborted")??;
    if let Some(path) = cli.output {
        report
            .write_artifact(&path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), questions = report.questions.len(), "Wrote question artifact");
    }
    Ok(())
}
