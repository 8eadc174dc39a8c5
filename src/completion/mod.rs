//! Prompt-to-text completion backends used by every model-driven pipeline stage.
//!
//! The pipeline only depends on [`CompletionClient`]; the Ollama and OpenAI-compatible clients
//! issue HTTP requests directly with `reqwest`.

use crate::config::{Config, LlmProvider};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Errors surfaced by completion providers.
#[derive(Debug, Error)]
pub enum CompletionClientError {
    /// Provider was unreachable, throttled, or temporarily failing.
    #[error("Completion provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider rejected the request.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

impl CompletionClientError {
    /// Whether a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ProviderUnavailable(_) | Self::InvalidResponse(_))
    }
}

/// Pipeline stage a prompt belongs to; used for logging and by test doubles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPurpose {
    /// Map stage: condense one chunk.
    ChunkSummary,
    /// Reduce stage: merge a group of summaries.
    Merge,
    /// Retrieving stage: mine concept seeds from the merged summary.
    Concepts,
    /// Generating stage: produce multiple-choice questions.
    Questions,
}

impl fmt::Display for CompletionPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ChunkSummary => "chunk_summary",
            Self::Merge => "merge",
            Self::Concepts => "concepts",
            Self::Questions => "questions",
        };
        f.write_str(label)
    }
}

/// Request payload passed to the completion provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Stage issuing the prompt.
    pub purpose: CompletionPurpose,
    /// Prompt assembled by the pipeline.
    pub prompt: String,
}

/// Interface implemented by completion providers.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Generate a completion for the prompt.
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionClientError>;
}

/// Build a completion client based on configuration.
pub fn get_completion_client(
    config: &Config,
) -> Result<Arc<dyn CompletionClient>, CompletionClientError> {
    let client: Arc<dyn CompletionClient> = match config.llm_provider {
        LlmProvider::Ollama => {
            let base_url = config
                .llm_base_url
                .clone()
                .or_else(|| config.ollama_url.clone())
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());
            Arc::new(OllamaCompletionClient::new(
                base_url,
                config.llm_model.clone(),
            )?)
        }
        LlmProvider::OpenAI => {
            let base_url = config
                .llm_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());
            Arc::new(OpenAiCompletionClient::new(
                base_url,
                config.llm_model.clone(),
                config.llm_api_key.clone(),
            )?)
        }
    };
    tracing::debug!(provider = ?config.llm_provider, model = %config.llm_model, "Completion client ready");
    Ok(client)
}

fn build_http(user_agent: &str) -> Result<Client, CompletionClientError> {
    Client::builder()
        .user_agent(user_agent)
        .build()
        .map_err(|error| CompletionClientError::GenerationFailed(error.to_string()))
}

fn status_error(status: StatusCode, body: String) -> CompletionClientError {
    let message = format!("provider returned {status}: {body}");
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CompletionClientError::ProviderUnavailable(message)
    } else {
        CompletionClientError::GenerationFailed(message)
    }
}

/// Ollama `/api/generate` client.
pub struct OllamaCompletionClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaCompletionClient {
    /// Build a client for the runtime at `base_url`.
    pub fn new(base_url: String, model: String) -> Result<Self, CompletionClientError> {
        Ok(Self {
            http: build_http("mcq-forge/completion")?,
            base_url,
            model,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl CompletionClient for OllamaCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionClientError> {
        let payload = json!({
            "model": self.model,
            "prompt": request.prompt,
            "stream": false,
            "options": {
                "temperature": temperature_for(request.purpose),
            }
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                CompletionClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CompletionClientError::GenerationFailed(format!(
                "Ollama endpoint {} returned 404 (is model '{}' pulled?)",
                self.endpoint(),
                self.model
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, body));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            CompletionClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;

        if !body.done {
            return Err(CompletionClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiCompletionClient {
    http: Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiCompletionClient {
    /// Build a client targeting `{base_url}/chat/completions`.
    pub fn new(
        base_url: String,
        model: String,
        api_key: Option<String>,
    ) -> Result<Self, CompletionClientError> {
        Ok(Self {
            http: build_http("mcq-forge/chat")?,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            api_key,
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionClientError> {
        let body = ChatRequest {
            model: &self.model,
            temperature: temperature_for(request.purpose),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "You are an expert educator. Follow the output format exactly.",
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
        };

        let mut builder = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|error| {
            CompletionClientError::ProviderUnavailable(format!(
                "failed to reach {}: {error}",
                self.endpoint
            ))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(status_error(status, text));
        }

        let parsed: ChatResponse = response.json().await.map_err(|error| {
            CompletionClientError::InvalidResponse(format!("failed to decode chat response: {error}"))
        })?;

        parsed
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| CompletionClientError::InvalidResponse("response had no content".into()))
    }
}

fn temperature_for(purpose: CompletionPurpose) -> f32 {
    match purpose {
        // Lower temperature for deterministic condensation.
        CompletionPurpose::ChunkSummary | CompletionPurpose::Merge => 0.1,
        CompletionPurpose::Concepts => 0.2,
        CompletionPurpose::Questions => 0.7,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    fn request(prompt: &str) -> CompletionRequest {
        CompletionRequest {
            purpose: CompletionPurpose::ChunkSummary,
            prompt: prompt.into(),
        }
    }

    #[tokio::test]
    async fn ollama_client_handles_successful_response() {
        let server = MockServer::start_async().await;
        let client =
            OllamaCompletionClient::new(server.base_url(), "llama".into()).expect("client");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/generate")
                    .body_contains("\"stream\":false");
                then.status(200).json_body(json!({
                    "response": "  Summary text\n",
                    "done": true
                }));
            })
            .await;

        let summary = client.complete(request("Summarize")).await.expect("summary");

        mock.assert();
        assert_eq!(summary, "Summary text");
    }

    #[tokio::test]
    async fn ollama_client_maps_server_error_to_retryable() {
        let server = MockServer::start_async().await;
        let client =
            OllamaCompletionClient::new(server.base_url(), "llama".into()).expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(500).body("boom");
            })
            .await;

        let error = client
            .complete(request("Summarize"))
            .await
            .expect_err("error response");

        assert!(error.is_retryable());
        assert!(matches!(error, CompletionClientError::ProviderUnavailable(message) if message.contains("500")));
    }

    #[tokio::test]
    async fn ollama_client_rejects_incomplete_response() {
        let server = MockServer::start_async().await;
        let client =
            OllamaCompletionClient::new(server.base_url(), "llama".into()).expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/generate");
                then.status(200)
                    .json_body(json!({ "response": "partial", "done": false }));
            })
            .await;

        let error = client.complete(request("Summarize")).await.unwrap_err();
        assert!(matches!(error, CompletionClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn openai_client_returns_first_message_content() {
        let server = MockServer::start_async().await;
        let client = OpenAiCompletionClient::new(
            server.base_url(),
            "gpt-4o-mini".into(),
            Some("secret".into()),
        )
        .expect("client");

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .header("authorization", "Bearer secret");
                then.status(200).json_body(json!({
                    "choices": [
                        { "message": { "role": "assistant", "content": "[1, 2]" } }
                    ]
                }));
            })
            .await;

        let text = client.complete(request("Rank")).await.expect("completion");
        mock.assert();
        assert_eq!(text, "[1, 2]");
    }

    #[tokio::test]
    async fn openai_client_treats_bad_request_as_fatal() {
        let server = MockServer::start_async().await;
        let client =
            OpenAiCompletionClient::new(server.base_url(), "m".into(), None).expect("client");

        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(400).body("bad prompt");
            })
            .await;

        let error = client.complete(request("x")).await.unwrap_err();
        assert!(!error.is_retryable());
    }
}
