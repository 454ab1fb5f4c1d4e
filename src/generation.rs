//! Generation backends.
//!
//! Concrete [`Generator`] implementations selected by
//! `[generation].provider`:
//! - **[`DisabledGenerator`]**: every call fails.
//! - **[`OpenAIGenerator`]**: `POST /v1/chat/completions`, single user message.
//! - **[`OllamaGenerator`]**: `POST /api/generate`, non-streaming.
//!
//! Retries follow the same policy as the embedders.

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use docchat_core::generation::{GenerationParams, Generator};
use docchat_core::RagError;

use crate::config::GenerationConfig;
use crate::embedding::{http_client, post_json_with_retry};

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _params: &GenerationParams,
    ) -> docchat_core::Result<String> {
        Err(RagError::generation(
            "disabled",
            "generation provider is disabled; set [generation].provider",
        ))
    }
}

pub struct OpenAIGenerator {
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            url: config.url.clone().unwrap_or_else(|| OPENAI_URL.to_string()),
            api_key,
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }

    async fn request(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });
        let url = format!("{}/v1/chat/completions", self.url.trim_end_matches('/'));
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
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> docchat_core::Result<String> {
        self.request(prompt, params)
            .await
            .map_err(|e| RagError::generation(&self.model, format!("{e:#}")))
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing choices[0].message.content"))
}

pub struct OllamaGenerator {
    model: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("generation.model required for Ollama provider"))?;

        Ok(Self {
            model,
            url: config.url.clone().unwrap_or_else(|| OLLAMA_URL.to_string()),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }

    async fn request(&self, prompt: &str, params: &GenerationParams) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "num_predict": params.max_tokens,
                "temperature": params.temperature,
            },
        });
        let url = format!("{}/api/generate", self.url.trim_end_matches('/'));
        let json = post_json_with_retry("Ollama", self.max_retries, || {
            self.client.post(&url).json(&body)
        })
        .await
        .map_err(|e| anyhow!("{e:#} (is Ollama running at {}?)", self.url))?;
        parse_ollama_response(&json)
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> docchat_core::Result<String> {
        self.request(prompt, params)
            .await
            .map_err(|e| RagError::generation(&self.model, format!("{e:#}")))
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<String> {
    json.get("response")
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing response field"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openai_response() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "Paris [chunk:a]."}}]
        });
        assert_eq!(parse_openai_response(&json).unwrap(), "Paris [chunk:a].");
        assert!(parse_openai_response(&serde_json::json!({"choices": []})).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({"model": "m", "response": "Hello", "done": true});
        assert_eq!(parse_ollama_response(&json).unwrap(), "Hello");
        assert!(parse_ollama_response(&serde_json::json!({"done": true})).is_err());
    }

    #[tokio::test]
    async fn test_disabled_generator_fails() {
        let generator = create_generator(&GenerationConfig::default()).unwrap();
        let err = generator
            .generate("hi", &GenerationParams::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::GenerationFailure { .. }));
    }
}
