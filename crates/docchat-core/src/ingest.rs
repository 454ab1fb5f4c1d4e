//! Document ingestion into a [`VectorStore`].
//!
//! chunk → drop blank chunks → skip chunks whose content hash is already
//! indexed → embed the rest in batches → upsert → remove chunks of the
//! document that no longer exist.
//!
//! Re-ingesting an unchanged document issues no embedder calls.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::chunk::{chunk_with, ChunkingParams};
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::models::{Chunk, Document, IndexEntry};
use crate::store::VectorStore;

const DEFAULT_BATCH_SIZE: usize = 64;

/// Totals over one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub unchanged: usize,
    pub skipped_empty: usize,
    pub removed: usize,
}

impl IngestReport {
    /// Add one document's outcome to the totals.
    pub fn absorb(&mut self, outcome: &DocumentOutcome) {
        self.documents += 1;
        self.chunks += outcome.chunk_ids.len();
        self.embedded += outcome.embedded.len();
        self.unchanged += outcome.unchanged;
        self.skipped_empty += outcome.skipped_empty;
        self.removed += outcome.removed;
    }
}

/// What happened to a single document.
#[derive(Debug, Clone, Default)]
pub struct DocumentOutcome {
    pub document_id: String,
    /// Ids of every indexable chunk of the document, in order.
    pub chunk_ids: Vec<String>,
    /// Entries that were (re-)embedded and upserted.
    pub embedded: Vec<IndexEntry>,
    pub unchanged: usize,
    pub skipped_empty: usize,
    pub removed: usize,
}

pub struct Ingestor {
    chunking: ChunkingParams,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    batch_size: usize,
}

impl Ingestor {
    pub fn new(
        chunking: ChunkingParams,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            chunking,
            embedder,
            store,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// # Errors
    ///
    /// [`RagError::InvalidConfiguration`] when `batch_size` is 0.
    pub fn with_batch_size(mut self, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(RagError::InvalidConfiguration(
                "embedding batch size must be >= 1".to_string(),
            ));
        }
        self.batch_size = batch_size;
        Ok(self)
    }

    pub fn chunking(&self) -> &ChunkingParams {
        &self.chunking
    }

    /// Ingest every document, stopping at the first failure.
    pub async fn ingest(&self, documents: &[Document]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for document in documents {
            let outcome = self.ingest_document(document).await?;
            report.absorb(&outcome);
        }
        info!(
            documents = report.documents,
            chunks = report.chunks,
            embedded = report.embedded,
            unchanged = report.unchanged,
            removed = report.removed,
            "ingestion complete"
        );
        Ok(report)
    }

    pub async fn ingest_document(&self, document: &Document) -> Result<DocumentOutcome> {
        let mut outcome = DocumentOutcome {
            document_id: document.id.clone(),
            ..DocumentOutcome::default()
        };

        let mut pending: Vec<Chunk> = Vec::new();
        for chunk in chunk_with(document, &self.chunking) {
            if chunk.text.trim().is_empty() {
                outcome.skipped_empty += 1;
                continue;
            }
            outcome.chunk_ids.push(chunk.id.clone());
            if self.store.content_hash(&chunk.id).await?.as_deref() == Some(chunk.hash.as_str()) {
                outcome.unchanged += 1;
            } else {
                pending.push(chunk);
            }
        }

        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(RagError::embedding(
                    self.embedder.model_name(),
                    format!("expected {} vectors, got {}", batch.len(), vectors.len()),
                ));
            }
            let entries: Vec<IndexEntry> = batch
                .iter()
                .cloned()
                .zip(vectors)
                .map(|(c, v)| IndexEntry::new(c, v))
                .collect();
            self.store.upsert_batch(entries.clone()).await?;
            outcome.embedded.extend(entries);
        }

        outcome.removed = self
            .store
            .remove_stale(&document.id, &outcome.chunk_ids)
            .await?;

        debug!(
            document = %document.id,
            chunks = outcome.chunk_ids.len(),
            embedded = outcome.embedded.len(),
            unchanged = outcome.unchanged,
            removed = outcome.removed,
            "ingested document"
        );
        Ok(outcome)
    }
}
