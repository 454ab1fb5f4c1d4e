//! Generator collaborator trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Sampling parameters for a single generation call.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.7,
        }
    }
}

impl GenerationParams {
    /// Settings for rewriting tasks: short, near-deterministic output.
    pub fn rewriting() -> Self {
        Self {
            max_tokens: 96,
            temperature: 0.0,
        }
    }
}

/// A language model: prompt in, text out.
///
/// Implementations report failures as
/// [`RagError::GenerationFailure`](crate::error::RagError::GenerationFailure).
/// Timeouts are applied by the caller.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Returns the model identifier.
    fn model_name(&self) -> &str;

    async fn generate(&self, prompt: &str, params: &GenerationParams) -> Result<String>;
}
