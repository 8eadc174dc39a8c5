//! Retry, timeout, and accounting wrappers around the model backends.

use crate::completion::{CompletionClient, CompletionPurpose, CompletionRequest};
use crate::config::RetryPolicy;
use crate::embedding::EmbeddingClient;
use crate::metrics::RunMetrics;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, timeout};

use super::error::ServiceError;

/// Run `call` until it succeeds, fails with a non-retryable error, or exhausts the policy.
///
/// Each attempt is bounded by the policy timeout; an elapsed timeout counts as a retryable
/// failure.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    metrics: &RunMetrics,
    operation: &str,
    mut call: F,
) -> Result<T, ServiceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let mut attempt = 1;
    loop {
        let error = match timeout(policy.call_timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => error,
            Err(_) => ServiceError::Timeout {
                operation: operation.to_string(),
                timeout: policy.call_timeout,
            },
        };

        if !error.is_retryable() || attempt >= policy.max_attempts {
            tracing::debug!(operation, attempt, error = %error, "Giving up on external call");
            return Err(error);
        }

        let backoff = policy.backoff_for(attempt);
        metrics.record_retry();
        tracing::warn!(
            operation,
            attempt,
            backoff_ms = backoff.as_millis() as u64,
            error = %error,
            "External call failed; retrying"
        );
        sleep(backoff).await;
        attempt += 1;
    }
}

/// Completion backend with retries, timeouts, and empty-response detection.
#[derive(Clone)]
pub struct Completer {
    client: Arc<dyn CompletionClient>,
    policy: RetryPolicy,
    metrics: Arc<RunMetrics>,
}

impl Completer {
    /// Wrap `client` with the run's retry policy and metrics.
    pub fn new(
        client: Arc<dyn CompletionClient>,
        policy: RetryPolicy,
        metrics: Arc<RunMetrics>,
    ) -> Self {
        Self {
            client,
            policy,
            metrics,
        }
    }

    /// Complete `prompt`, returning trimmed non-empty text.
    pub async fn complete(
        &self,
        purpose: CompletionPurpose,
        prompt: String,
    ) -> Result<String, ServiceError> {
        let operation = purpose.to_string();
        with_retry(&self.policy, &self.metrics, &operation, || {
            let request = CompletionRequest {
                purpose,
                prompt: prompt.clone(),
            };
            let operation = operation.clone();
            async move {
                self.metrics.record_model_call();
                let text = self.client.complete(request).await?;
                let text = text.trim();
                if text.is_empty() {
                    return Err(ServiceError::EmptyResponse { operation });
                }
                Ok(text.to_string())
            }
        })
        .await
    }
}

/// Embedding backend with retries, timeouts, and shape checks.
#[derive(Clone)]
pub struct Embedder {
    client: Arc<dyn EmbeddingClient>,
    policy: RetryPolicy,
    metrics: Arc<RunMetrics>,
}

impl Embedder {
    /// Wrap `client` with the run's retry policy and metrics.
    pub fn new(
        client: Arc<dyn EmbeddingClient>,
        policy: RetryPolicy,
        metrics: Arc<RunMetrics>,
    ) -> Self {
        Self {
            client,
            policy,
            metrics,
        }
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        with_retry(&self.policy, &self.metrics, "embedding", || async move {
            self.metrics.record_embedding_call();
            let mut vectors = self
                .client
                .generate_embeddings(vec![text.to_string()])
                .await?;
            match vectors.pop() {
                Some(vector) if !vector.is_empty() && vectors.is_empty() => Ok(vector),
                _ => Err(ServiceError::EmptyResponse {
                    operation: "embedding".to_string(),
                }),
            }
        })
        .await
    }
}
