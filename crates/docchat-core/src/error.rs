//! Error taxonomy for the retrieval and conversation pipeline.
//!
//! Setup-time problems (bad chunking or retrieval parameters) surface as
//! [`RagError::InvalidConfiguration`] and are meant to fail fast. Collaborator
//! problems ([`RagError::EmbeddingFailure`], [`RagError::GenerationFailure`])
//! are reported per request; the retrieval chain guarantees that neither
//! leaves a session's memory or the index partially modified.
//!
//! An empty retrieval result is *not* an error. The chain handles it as a
//! degraded mode and still produces an answer.

use thiserror::Error;

/// Errors produced by the core pipeline.
#[derive(Debug, Error)]
pub enum RagError {
    /// Chunking, retrieval, memory or prompt parameters are invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The caller supplied unusable input (e.g. a blank question).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The embedding collaborator failed or timed out.
    #[error("embedding failed ({model}): {message}")]
    EmbeddingFailure {
        /// Model identifier reported by the embedder.
        model: String,
        /// A description of the failure.
        message: String,
    },

    /// The generation collaborator failed, timed out, or returned malformed output.
    #[error("generation failed ({model}): {message}")]
    GenerationFailure {
        /// Model identifier reported by the generator.
        model: String,
        /// A description of the failure.
        message: String,
    },

    /// A vector's length does not match the index dimension.
    #[error("dimension mismatch: index expects {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension fixed for the index.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },

    /// A vector store backend failed.
    #[error("vector store error: {0}")]
    Store(String),
}

impl RagError {
    /// Shorthand for an [`RagError::EmbeddingFailure`].
    pub fn embedding(model: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::EmbeddingFailure {
            model: model.into(),
            message: message.into(),
        }
    }

    /// Shorthand for a [`RagError::GenerationFailure`].
    pub fn generation(model: impl Into<String>, message: impl Into<String>) -> Self {
        RagError::GenerationFailure {
            model: model.into(),
            message: message.into(),
        }
    }

    /// True for errors raised by an external collaborator.
    pub fn is_collaborator_failure(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingFailure { .. } | RagError::GenerationFailure { .. }
        )
    }
}

/// Result alias used across the core crate.
pub type Result<T> = std::result::Result<T, RagError>;
