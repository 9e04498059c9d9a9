//! Batched remote invocation against the embeddings API, with exponential
//! backoff retry (§4.6) and cooperative cancellation (§5).

use std::time::Duration;

use common::error::{ColonyError, Result};
use rand::Rng;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const RETRY_BASE: Duration = Duration::from_millis(500);
const RETRY_FACTOR: u32 = 2;
const RETRY_CAP: Duration = Duration::from_secs(30);
const MAX_ATTEMPTS: u32 = 5;

/// Abstraction over "call the embeddings API for a batch of strings",
/// mockable in tests without a network dependency.
#[async_trait::async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// `text-embedding-3-small` over the OpenAI REST endpoint (§6 configuration:
/// `embeddingModel` is fixed to this).
pub struct OpenAiEmbeddingClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            model,
            base_url: "https://api.openai.com/v1".to_string(),
        }
    }

    #[cfg(test)]
    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self { http: reqwest::Client::new(), api_key, model, base_url }
    }

    async fn call_once(&self, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, CallError> {
        let body = serde_json::json!({ "model": self.model, "input": inputs });
        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    CallError::Retryable(e.to_string())
                } else {
                    CallError::Terminal(e.to_string())
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.as_u16() >= 500 {
            let text = response.text().await.unwrap_or_default();
            return Err(CallError::Retryable(format!("status {status}: {text}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CallError::Terminal(format!("status {status}: {text}")));
        }

        let parsed: OpenAiEmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CallError::Terminal(format!("malformed response: {e}")))?;

        let mut ordered: Vec<(usize, Vec<f32>)> =
            parsed.data.into_iter().map(|d| (d.index, d.embedding)).collect();
        ordered.sort_by_key(|(idx, _)| *idx);
        Ok(ordered.into_iter().map(|(_, v)| v).collect())
    }
}

#[derive(Debug)]
enum CallError {
    Retryable(String),
    Terminal(String),
}

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::Retryable(s) | CallError::Terminal(s) => write!(f, "{s}"),
        }
    }
}

impl std::error::Error for CallError {}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

#[async_trait::async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        embed_batch_with_retry(inputs, &CancellationToken::new(), |batch| self.call_once(batch)).await
    }
}

/// Runs `attempt` with exponential backoff retry (§4.6: base 500ms, factor 2,
/// cap 30s, ±25% jitter, up to 5 attempts) on [`CallError::Retryable`].
/// Respects `cancel` at every backoff sleep (§5).
async fn embed_batch_with_retry<F, Fut>(
    inputs: &[String],
    cancel: &CancellationToken,
    attempt: F,
) -> Result<Vec<Vec<f32>>>
where
    F: Fn(&[String]) -> Fut,
    Fut: std::future::Future<Output = std::result::Result<Vec<Vec<f32>>, CallError>>,
{
    let mut delay = RETRY_BASE;
    for attempt_no in 1..=MAX_ATTEMPTS {
        if cancel.is_cancelled() {
            return Err(ColonyError::fatal_msg("embedding", "cancelled"));
        }
        match attempt(inputs).await {
            Ok(vectors) => return Ok(vectors),
            Err(CallError::Terminal(msg)) => {
                return Err(ColonyError::permanent("embedding", SimpleCause(msg)));
            }
            Err(CallError::Retryable(msg)) => {
                if attempt_no == MAX_ATTEMPTS {
                    return Err(ColonyError::transient("embedding", SimpleCause(msg)));
                }
                warn!(attempt = attempt_no, error = %msg, "embedding call failed, retrying");
                let jittered = jittered_delay(delay);
                tokio::select! {
                    _ = tokio::time::sleep(jittered) => {}
                    _ = cancel.cancelled() => {
                        return Err(ColonyError::fatal_msg("embedding", "cancelled"));
                    }
                }
                delay = (delay * RETRY_FACTOR).min(RETRY_CAP);
            }
        }
    }
    unreachable!("loop always returns by the last attempt")
}

fn jittered_delay(base: Duration) -> Duration {
    let jitter_frac = rand::rng().random_range(-0.25..=0.25);
    let millis = base.as_millis() as f64 * (1.0 + jitter_frac);
    Duration::from_millis(millis.max(0.0) as u64)
}

#[derive(Debug)]
struct SimpleCause(String);

impl std::fmt::Display for SimpleCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for SimpleCause {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = embed_batch_with_retry(&["a".to_string()], &cancel, |batch| {
            calls.fetch_add(1, Ordering::SeqCst);
            let len = batch.len();
            async move { Ok(vec![vec![0.0; len]]) }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = embed_batch_with_retry(&["a".to_string()], &cancel, |_batch| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CallError::Retryable("429".to_string()))
                } else {
                    Ok(vec![vec![1.0]])
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = embed_batch_with_retry(&["a".to_string()], &cancel, |_batch| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(CallError::Terminal("bad request".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(ColonyError::Permanent { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_retries_on_persistent_failure() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = embed_batch_with_retry(&["a".to_string()], &cancel, |_batch| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(CallError::Retryable("503".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(ColonyError::Transient { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }
}
