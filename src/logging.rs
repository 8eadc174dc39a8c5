//! Tracing configuration and log routing.
//!
//! stdout carries the JSON event stream, so human-readable logs go to stderr. A second,
//! ANSI-free layer writes to a log file: `MCQ_FORGE_LOG_FILE` names the file (`off` disables
//! it), otherwise `logs/mcq-forge.log` is used.
use std::path::PathBuf;
use std::sync::OnceLock;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{EnvFilter, Layer, fmt, prelude::*};

const LOG_FILE_VAR: &str = "MCQ_FORGE_LOG_FILE";
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_LOG_NAME: &str = "mcq-forge.log";

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Where file logs are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFile {
    /// `logs/mcq-forge.log` under the working directory.
    Default,
    /// Append to the given path.
    Path(PathBuf),
    /// No file logging.
    Disabled,
}

/// Log routing for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// File destination.
    pub file: LogFile,
    /// Only warnings and errors reach stderr.
    pub quiet: bool,
}

impl LogSettings {
    /// Settings derived from `MCQ_FORGE_LOG_FILE`.
    pub fn from_env() -> Self {
        let file = match std::env::var(LOG_FILE_VAR) {
            Ok(value) if value.trim().eq_ignore_ascii_case("off") => LogFile::Disabled,
            Ok(value) if !value.trim().is_empty() => LogFile::Path(PathBuf::from(value.trim())),
            _ => LogFile::Default,
        };
        Self { file, quiet: false }
    }
}

/// Install the global subscriber using [`LogSettings::from_env`].
pub fn init_tracing() {
    init_tracing_with(LogSettings::from_env());
}

/// Install the global subscriber.
///
/// `RUST_LOG` filters every layer (default `info`). Later calls are ignored, so tests may call
/// this freely.
pub fn init_tracing_with(settings: LogSettings) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_level = if settings.quiet {
        LevelFilter::WARN
    } else {
        LevelFilter::TRACE
    };
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .with_filter(stderr_level);

    let file_layer = file_writer(&settings.file).map(|writer| {
        fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .compact()
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Non-blocking writer for `target`, or `None` when file logging is off or unavailable.
fn file_writer(target: &LogFile) -> Option<NonBlocking> {
    let (writer, guard) = match target {
        LogFile::Disabled => return None,
        LogFile::Path(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| eprintln!("Failed to open log file {}: {err}", path.display()))
                .ok()?;
            tracing_appender::non_blocking(file)
        }
        LogFile::Default => {
            if let Err(err) = std::fs::create_dir_all(DEFAULT_LOG_DIR) {
                eprintln!("Failed to create {DEFAULT_LOG_DIR} directory: {err}");
                return None;
            }
            tracing_appender::non_blocking(tracing_appender::rolling::never(
                DEFAULT_LOG_DIR,
                DEFAULT_LOG_NAME,
            ))
        }
    };
    // A second initialisation keeps the first guard; its writer simply goes unused.
    let _ = LOG_GUARD.set(guard);
    Some(writer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_file_logging_yields_no_writer() {
        assert!(file_writer(&LogFile::Disabled).is_none());
    }

    #[test]
    fn explicit_log_path_is_opened_for_append() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("run.log");
        assert!(file_writer(&LogFile::Path(path.clone())).is_some());
        assert!(path.exists());
    }
}
