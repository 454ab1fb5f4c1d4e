//! Embedding backends.
//!
//! Concrete [`Embedder`] implementations selected by `[embedding].provider`:
//! - **[`DisabledEmbedder`]**: every call fails; the default until a
//!   provider is configured.
//! - **[`OpenAIEmbedder`]**: `POST /v1/embeddings`.
//! - **[`OllamaEmbedder`]**: `POST /api/embed` on a local Ollama.
//!
//! # Retry Strategy
//!
//! Both HTTP backends (and the generators in [`crate::generation`]) share
//! [`post_json_with_retry`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use docchat_core::embedding::Embedder;
use docchat_core::RagError;

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Build the embedder named by the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> docchat_core::Result<Vec<f32>> {
        Err(RagError::embedding(
            "disabled",
            "embedding provider is disabled; set [embedding].provider",
        ))
    }
}

// ============ OpenAI ============

pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            dims,
            url: config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/v1/embeddings", self.url.trim_end_matches('/'));
        let json = post_json_with_retry("OpenAI", self.max_retries, || {
            self.client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
        })
        .await?;
        parse_openai_response(&json)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> docchat_core::Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::embedding(&self.model, "empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> docchat_core::Result<Vec<Vec<f32>>> {
        let vectors = self
            .request(texts)
            .await
            .map_err(|e| RagError::embedding(&self.model, format!("{e:#}")))?;
        check_vectors(&self.model, self.dims, texts.len(), vectors)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(position, |i| i as usize);
        indexed.push((index, parse_vector(item.get("embedding"))?));
    }

    // Order must match the input order
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow!("embedding.dims required for Ollama provider"))?;

        Ok(Self {
            model,
            dims,
            url: config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let json = post_json_with_retry("Ollama", self.max_retries, || {
            self.client.post(&url).json(&body)
        })
        .await
        .map_err(|e| anyhow!("{e:#} (is Ollama running at {}?)", self.url))?;
        parse_ollama_response(&json)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> docchat_core::Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::embedding(&self.model, "empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> docchat_core::Result<Vec<Vec<f32>>> {
        let vectors = self
            .request(texts)
            .await
            .map_err(|e| RagError::embedding(&self.model, format!("{e:#}")))?;
        check_vectors(&self.model, self.dims, texts.len(), vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|v| parse_vector(Some(v)))
        .collect()
}

// ============ Shared ============

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Exponential backoff before retry `attempt` (1-based): 1s, 2s, 4s, ...
/// capped at 32s.
pub(crate) fn retry_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

/// POST a JSON request built by `build`, retrying transient failures with
/// exponential backoff. Returns the parsed JSON body of the first success.
pub(crate) async fn post_json_with_retry<F>(
    service: &str,
    max_retries: u32,
    build: F,
) -> Result<serde_json::Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(retry_delay(attempt)).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(service, %status, attempt, "transient API error");
                    last_err = Some(anyhow!("{} API error {}: {}", service, status, body_text));
                    continue;
                }

                bail!("{} API error {}: {}", service, status, body_text);
            }
            Err(e) => {
                warn!(service, attempt, error = %e, "request failed");
                last_err = Some(anyhow!("{} connection error: {}", service, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow!("{} request failed after retries", service)))
}

fn parse_vector(value: Option<&serde_json::Value>) -> Result<Vec<f32>> {
    let values = value
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid embedding response: missing embedding"))?;
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| anyhow!("Invalid embedding response: non-numeric value"))
        })
        .collect()
}

fn check_vectors(
    model: &str,
    dims: usize,
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> docchat_core::Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(RagError::embedding(
            model,
            format!("expected {expected} embeddings, got {}", vectors.len()),
        ));
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
        return Err(RagError::embedding(
            model,
            format!("expected {dims}-dim embeddings, got {}", bad.len()),
        ));
    }
    Ok(vectors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_delay_doubles_and_caps() {
        let secs: Vec<u64> = (1..=8).map(|a| retry_delay(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 32, 32]);
    }

    #[test]
    fn test_default_ask_budget_outlasts_a_timed_out_attempt() {
        // One attempt hitting the HTTP timeout must still leave room for the
        // backoff and a second full attempt.
        let embedding = crate::config::EmbeddingConfig::default();
        let generation = crate::config::GenerationConfig::default();
        for (attempt, budget) in [
            (embedding.timeout_secs, embedding.ask_timeout_secs),
            (generation.timeout_secs, generation.ask_timeout_secs),
        ] {
            let needed = Duration::from_secs(2 * attempt) + retry_delay(1);
            assert!(Duration::from_secs(budget) >= needed);
        }
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]},
            ]
        });
        assert_eq!(
            parse_openai_response(&json).unwrap(),
            vec![vec![1.0, 0.0], vec![0.0, 1.0]]
        );
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.25]]});
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.5, 0.25]]);
        let bad = serde_json::json!({"embeddings": [["x"]]});
        assert!(parse_ollama_response(&bad).is_err());
    }

    #[test]
    fn test_check_vectors() {
        assert!(check_vectors("m", 2, 1, vec![vec![1.0, 2.0]]).is_ok());
        assert!(check_vectors("m", 2, 2, vec![vec![1.0, 2.0]]).is_err());
        assert!(matches!(
            check_vectors("m", 3, 1, vec![vec![1.0, 2.0]]),
            Err(RagError::EmbeddingFailure { .. })
        ));
    }

    #[tokio::test]
    async fn test_disabled_embedder_fails() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.model_name(), "disabled");
        assert!(matches!(
            embedder.embed("hello").await,
            Err(RagError::EmbeddingFailure { .. })
        ));
    }

    #[test]
    fn test_ollama_needs_model() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            dims: Some(8),
            ..EmbeddingConfig::default()
        };
        assert!(create_embedder(&config).is_err());
    }
}
