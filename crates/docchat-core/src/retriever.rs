//! Typed query contract over a [`VectorStore`].

use std::sync::Arc;

use tracing::debug;

use crate::error::{RagError, Result};
use crate::models::RetrievalResult;
use crate::store::VectorStore;

/// Retrieval tuning parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrievalParams {
    top_k: usize,
    score_threshold: Option<f32>,
}

impl RetrievalParams {
    /// # Errors
    ///
    /// [`RagError::InvalidConfiguration`] if `top_k` is 0 or the threshold
    /// is not a finite value in `[-1, 1]`.
    pub fn new(top_k: usize, score_threshold: Option<f32>) -> Result<Self> {
        if top_k == 0 {
            return Err(RagError::InvalidConfiguration(
                "retrieval top_k must be >= 1".to_string(),
            ));
        }
        if let Some(t) = score_threshold {
            if !t.is_finite() || !(-1.0..=1.0).contains(&t) {
                return Err(RagError::InvalidConfiguration(format!(
                    "retrieval score_threshold must be in [-1.0, 1.0], got {t}"
                )));
            }
        }
        Ok(Self {
            top_k,
            score_threshold,
        })
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn score_threshold(&self) -> Option<f32> {
        self.score_threshold
    }
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            top_k: 3,
            score_threshold: None,
        }
    }
}

/// Wraps a shared index with fixed retrieval parameters.
#[derive(Clone)]
pub struct Retriever {
    store: Arc<dyn VectorStore>,
    params: RetrievalParams,
}

impl Retriever {
    pub fn new(store: Arc<dyn VectorStore>, params: RetrievalParams) -> Self {
        Self { store, params }
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Top-k chunks for an already embedded query.
    pub async fn retrieve(&self, query_vec: &[f32]) -> Result<RetrievalResult> {
        let result = self
            .store
            .query(query_vec, self.params.top_k, self.params.score_threshold)
            .await?;
        debug!(
            top_k = self.params.top_k,
            returned = result.len(),
            best_score = result.chunks.first().map(|c| c.score),
            "retrieved chunks"
        );
        Ok(result)
    }
}
