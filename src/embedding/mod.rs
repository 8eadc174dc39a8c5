//! Embedding client abstraction and backends.
//!
//! Backends are selected by `EMBEDDING_PROVIDER`. The hashing backend is deterministic and
//! offline, which makes it suitable for tests and for environments without a model runtime.

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use ollama_rs::Ollama;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider could not be reached or throttled the request.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed or had the wrong shape.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
}

impl EmbeddingClientError {
    /// Whether a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_) | Self::InvalidResponse(_))
    }
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Deterministic feature-hashing embedder.
///
/// Each lowercase alphanumeric term is hashed into a signed bucket; the vector is then
/// L2-normalized. Texts sharing vocabulary land close together under cosine similarity.
pub struct HashingEmbeddingClient {
    dimension: usize,
}

impl HashingEmbeddingClient {
    /// Construct a hashing embedder producing vectors of `dimension` components.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];

        for term in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|term| !term.is_empty())
        {
            let hash = fnv1a(term.to_lowercase().as_bytes());
            let position = (hash % self.dimension as u64) as usize;
            let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
            embedding[position] += sign;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

#[async_trait]
impl EmbeddingClient for HashingEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }
}

/// Ollama embeddings through `ollama-rs`.
pub struct OllamaEmbeddingClient {
    inner: Ollama,
    model: String,
}

impl OllamaEmbeddingClient {
    /// Build a client for the runtime at `base_url`.
    pub fn new(base_url: &str, model: String) -> Result<Self, EmbeddingClientError> {
        let inner = Ollama::try_new(base_url).map_err(|error| {
            EmbeddingClientError::GenerationFailed(format!("invalid Ollama URL {base_url}: {error}"))
        })?;
        Ok(Self { inner, model })
    }
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let request =
            GenerateEmbeddingsRequest::new(self.model.clone(), EmbeddingsInput::Multiple(texts));
        let response = self
            .inner
            .generate_embeddings(request)
            .await
            .map_err(|error| EmbeddingClientError::ProviderUnavailable(error.to_string()))?;
        if response.embeddings.len() != expected {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "Ollama returned {} embeddings for {expected} inputs",
                response.embeddings.len()
            )));
        }
        Ok(response.embeddings)
    }
}

/// OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbeddingClient {
    http: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiEmbeddingClient {
    /// Build a client targeting `{base_url}/embeddings`.
    pub fn new(
        base_url: &str,
        model: String,
        api_key: Option<String>,
    ) -> Result<Self, EmbeddingClientError> {
        let http = Client::builder()
            .user_agent("mcq-forge/embeddings")
            .build()
            .map_err(|error| EmbeddingClientError::GenerationFailed(error.to_string()))?;
        Ok(Self {
            http,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            api_key,
        })
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self.http.post(&self.endpoint).json(&EmbeddingRequest {
            model: &self.model,
            input: &texts,
        });
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|error| {
            EmbeddingClientError::ProviderUnavailable(format!(
                "failed to reach {}: {error}",
                self.endpoint
            ))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("embeddings endpoint returned {status}: {body}");
            return Err(if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                EmbeddingClientError::ProviderUnavailable(message)
            } else {
                EmbeddingClientError::GenerationFailed(message)
            });
        }

        let mut parsed: EmbeddingResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!("failed to decode response: {error}"))
        })?;
        parsed.data.sort_by_key(|entry| entry.index);
        if parsed.data.len() != texts.len() {
            return Err(EmbeddingClientError::InvalidResponse(format!(
                "received {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }
        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }
}

/// Build an embedding client suitable for the supplied configuration.
pub fn get_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Building embedding client"
    );
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Hashing => {
            Arc::new(HashingEmbeddingClient::new(config.embedding_dimension))
        }
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            config.ollama_url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL),
            config.embedding_model.clone(),
        )?),
        EmbeddingProvider::OpenAI => Arc::new(OpenAiEmbeddingClient::new(
            config.llm_base_url.as_deref().unwrap_or(DEFAULT_OPENAI_URL),
            config.embedding_model.clone(),
            config.llm_api_key.clone(),
        )?),
    };
    Ok(client)
}
