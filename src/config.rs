use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration or validating pipeline parameters.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// A pipeline parameter combination cannot produce a terminating run.
    #[error("Invalid pipeline parameter `{field}`: {reason}")]
    InvalidParameter {
        /// Name of the offending parameter.
        field: &'static str,
        /// Human readable constraint that was violated.
        reason: String,
    },
}

/// Runtime configuration for the question generation service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Completion backend used for map, reduce, concept, and question prompts.
    pub llm_provider: LlmProvider,
    /// Completion model identifier passed to the provider.
    pub llm_model: String,
    /// Optional endpoint override for the completion backend.
    pub llm_base_url: Option<String>,
    /// Optional bearer key for OpenAI-compatible backends.
    pub llm_api_key: Option<String>,
    /// Embedding provider used to populate the vector index.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime.
    pub ollama_url: Option<String>,
    /// Parameters that shape a single pipeline run.
    pub pipeline: PipelineConfig,
}

/// Supported completion backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Local Ollama runtime (`/api/generate`).
    Ollama,
    /// Any OpenAI-compatible chat completions endpoint.
    OpenAI,
}

/// Supported embedding backends for the vector index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Deterministic local hashing embedder; no network access.
    Hashing,
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI embeddings API.
    OpenAI,
}

/// Unit in which chunk sizes and overlaps are measured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    /// Unicode scalar values.
    #[default]
    Chars,
    /// Whitespace-delimited tokens (each token carries its trailing whitespace).
    Tokens,
}

/// Chunk geometry for the chunker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChunkingConfig {
    /// Length of each chunk's fresh span, in `unit`s.
    pub chunk_size: usize,
    /// Units of the previous chunk repeated at the start of the next one.
    pub chunk_overlap: usize,
    /// Measurement unit for `chunk_size` and `chunk_overlap`.
    pub unit: ChunkUnit,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 12_000,
            chunk_overlap: 1_200,
            unit: ChunkUnit::Chars,
        }
    }
}

/// Tree-reduction parameters for the reduce stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReduceConfig {
    /// Token budget a merge buffer may occupy in a single model call.
    pub context_budget: usize,
    /// Maximum number of summaries merged by one model call.
    pub group_size: usize,
    /// Cap on tree levels before the run is failed.
    pub max_levels: usize,
}

impl Default for ReduceConfig {
    fn default() -> Self {
        Self {
            context_budget: 100_000,
            group_size: 4,
            max_levels: 8,
        }
    }
}

/// Retry, backoff, and timeout policy applied to every external call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first one.
    pub max_attempts: usize,
    /// Backoff before the second attempt; doubled for each further attempt.
    pub initial_backoff: Duration,
    /// Upper bound on a single backoff.
    pub max_backoff: Duration,
    /// Timeout applied to each attempt.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_millis(8_000),
            call_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after `attempt` (1-based) failed.
    pub fn backoff_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.initial_backoff
            .saturating_mul(1_u32 << exponent)
            .min(self.max_backoff)
    }
}

/// Stage failure tolerances before a run escalates to a pipeline error.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FailureThresholds {
    /// Tolerated fraction of chunks skipped by the map stage.
    pub max_map_failure_ratio: f64,
    /// Tolerated fraction of chunks missing from the vector index.
    pub max_embedding_failure_ratio: f64,
}

impl Default for FailureThresholds {
    fn default() -> Self {
        Self {
            max_map_failure_ratio: 0.5,
            max_embedding_failure_ratio: 1.0,
        }
    }
}

/// Question generation parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GenerationConfig {
    /// Questions requested for the whole run.
    pub question_count: usize,
    /// Concept seeds mined from the summary; zero uses the summary as the only seed.
    pub max_concepts: usize,
    /// Grounding chunks retrieved per seed.
    pub top_k: usize,
    /// Extra generation calls allowed per seed when validation drops questions.
    pub regeneration_attempts: usize,
    /// Whether streamed question events include the correct answer.
    pub reveal_answers: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            question_count: 10,
            max_concepts: 5,
            top_k: 5,
            regeneration_attempts: 1,
            reveal_answers: true,
        }
    }
}

/// Every parameter that shapes one pipeline run.
///
/// Passed by value into the orchestrator so that concurrent runs never share mutable state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PipelineConfig {
    /// Chunk geometry.
    pub chunking: ChunkingConfig,
    /// Reduce stage parameters.
    pub reduce: ReduceConfig,
    /// External call policy.
    pub retry: RetryPolicy,
    /// Failure tolerances.
    pub thresholds: FailureThresholds,
    /// Question generation parameters.
    pub generation: GenerationConfig,
    /// Worker pool bound for concurrent model and embedding calls.
    pub max_in_flight: usize,
    /// tiktoken model/encoding name, or `whitespace`.
    pub token_encoding: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            reduce: ReduceConfig::default(),
            retry: RetryPolicy::default(),
            thresholds: FailureThresholds::default(),
            generation: GenerationConfig::default(),
            max_in_flight: 8,
            token_encoding: "cl100k_base".into(),
        }
    }
}

impl PipelineConfig {
    /// Reject parameter combinations that cannot terminate or make no sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let chunking = &self.chunking;
        if chunking.chunk_size == 0 {
            return Err(invalid("chunk_size", "must be greater than zero"));
        }
        if chunking.chunk_size <= chunking.chunk_overlap {
            return Err(invalid(
                "chunk_overlap",
                format!(
                    "must be smaller than chunk_size ({} <= {})",
                    chunking.chunk_size, chunking.chunk_overlap
                ),
            ));
        }
        if self.reduce.context_budget == 0 {
            return Err(invalid("context_budget", "must be greater than zero"));
        }
        if self.reduce.group_size < 2 {
            return Err(invalid("group_size", "must be at least 2"));
        }
        if self.reduce.max_levels == 0 {
            return Err(invalid("max_levels", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        if self.retry.call_timeout.is_zero() {
            return Err(invalid("call_timeout", "must be greater than zero"));
        }
        if self.max_in_flight == 0 {
            return Err(invalid("max_in_flight", "must be at least 1"));
        }
        for (field, ratio) in [
            (
                "max_map_failure_ratio",
                self.thresholds.max_map_failure_ratio,
            ),
            (
                "max_embedding_failure_ratio",
                self.thresholds.max_embedding_failure_ratio,
            ),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(invalid(field, format!("must be within [0, 1], got {ratio}")));
            }
        }
        if self.generation.question_count == 0 {
            return Err(invalid("question_count", "must be at least 1"));
        }
        if self.generation.top_k == 0 {
            return Err(invalid("top_k", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidParameter {
        field,
        reason: reason.into(),
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = PipelineConfig::default();
        let pipeline = PipelineConfig {
            chunking: ChunkingConfig {
                chunk_size: parse_or("CHUNK_SIZE", defaults.chunking.chunk_size)?,
                chunk_overlap: parse_or("CHUNK_OVERLAP", defaults.chunking.chunk_overlap)?,
                unit: parse_or("CHUNK_UNIT", defaults.chunking.unit)?,
            },
            reduce: ReduceConfig {
                context_budget: parse_or("CONTEXT_TOKEN_BUDGET", defaults.reduce.context_budget)?,
                group_size: parse_or("REDUCE_GROUP_SIZE", defaults.reduce.group_size)?,
                max_levels: parse_or("REDUCE_MAX_LEVELS", defaults.reduce.max_levels)?,
            },
            retry: RetryPolicy {
                max_attempts: parse_or("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
                initial_backoff: Duration::from_millis(parse_or(
                    "RETRY_INITIAL_BACKOFF_MS",
                    defaults.retry.initial_backoff.as_millis() as u64,
                )?),
                max_backoff: Duration::from_millis(parse_or(
                    "RETRY_MAX_BACKOFF_MS",
                    defaults.retry.max_backoff.as_millis() as u64,
                )?),
                call_timeout: Duration::from_secs(parse_or(
                    "CALL_TIMEOUT_SECS",
                    defaults.retry.call_timeout.as_secs(),
                )?),
            },
            thresholds: FailureThresholds {
                max_map_failure_ratio: parse_or(
                    "MAP_MAX_FAILURE_RATIO",
                    defaults.thresholds.max_map_failure_ratio,
                )?,
                max_embedding_failure_ratio: parse_or(
                    "EMBEDDING_MAX_FAILURE_RATIO",
                    defaults.thresholds.max_embedding_failure_ratio,
                )?,
            },
            generation: GenerationConfig {
                question_count: parse_or("QUESTION_COUNT", defaults.generation.question_count)?,
                max_concepts: parse_or("MAX_CONCEPTS", defaults.generation.max_concepts)?,
                top_k: parse_or("RETRIEVAL_TOP_K", defaults.generation.top_k)?,
                regeneration_attempts: defaults.generation.regeneration_attempts,
                reveal_answers: parse_or("REVEAL_ANSWERS", defaults.generation.reveal_answers)?,
            },
            max_in_flight: parse_or("MAX_IN_FLIGHT", defaults.max_in_flight)?,
            token_encoding: load_env_optional("TOKEN_ENCODING").unwrap_or(defaults.token_encoding),
        };

        Ok(Self {
            llm_provider: parse_or("LLM_PROVIDER", LlmProvider::Ollama)?,
            llm_model: load_env_optional("LLM_MODEL").unwrap_or_else(|| "llama3.1".into()),
            llm_base_url: load_env_optional("LLM_BASE_URL"),
            llm_api_key: load_env_optional("LLM_API_KEY"),
            embedding_provider: parse_or("EMBEDDING_PROVIDER", EmbeddingProvider::Hashing)?,
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "nomic-embed-text".into()),
            embedding_dimension: parse_or("EMBEDDING_DIMENSION", 768)?,
            ollama_url: load_env_optional("OLLAMA_URL"),
            pipeline,
        })
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
        .map(|value| value.unwrap_or(default))
}

impl FromStr for LlmProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hashing" => Ok(Self::Hashing),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl FromStr for ChunkUnit {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "chars" | "characters" => Ok(Self::Chars),
            "tokens" => Ok(Self::Tokens),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        llm_provider = ?config.llm_provider,
        llm_model = %config.llm_model,
        embedding_provider = ?config.embedding_provider,
        chunk_size = config.pipeline.chunking.chunk_size,
        chunk_overlap = config.pipeline.chunking.chunk_overlap,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_pipeline_config_is_valid() {
        PipelineConfig::default().validate().expect("defaults valid");
    }

    #[test]
    fn overlap_not_smaller_than_chunk_size_is_rejected() {
        let mut config = PipelineConfig::default();
        config.chunking.chunk_size = 200;
        config.chunking.chunk_overlap = 200;
        let error = config.validate().unwrap_err();
        assert!(matches!(
            error,
            ConfigError::InvalidParameter {
                field: "chunk_overlap",
                ..
            }
        ));
    }

    #[test]
    fn group_size_below_two_is_rejected() {
        let mut config = PipelineConfig::default();
        config.reduce.group_size = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn failure_ratio_outside_unit_interval_is_rejected() {
        let mut config = PipelineConfig::default();
        config.thresholds.max_map_failure_ratio = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            call_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff_for(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_for(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_for(3), Duration::from_millis(350));
    }

    #[test]
    fn providers_parse_case_insensitively() {
        assert_eq!("OpenAI".parse::<LlmProvider>(), Ok(LlmProvider::OpenAI));
        assert_eq!(
            "HASHING".parse::<EmbeddingProvider>(),
            Ok(EmbeddingProvider::Hashing)
        );
        assert_eq!("tokens".parse::<ChunkUnit>(), Ok(ChunkUnit::Tokens));
        assert!("nope".parse::<ChunkUnit>().is_err());
    }
}
