//! Vector index abstraction.
//!
//! The [`VectorStore`] trait is the query/upsert contract the retriever and
//! the ingestion pipeline rely on. Durability is a separate concern handled
//! by the application (see `docchat::sqlite_store`), which rebuilds an
//! in-memory index from persisted entries at startup.
//!
//! Implementations must be `Send + Sync`; queries are expected to run
//! concurrently from many sessions while ingestion upserts.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`upsert`](VectorStore::upsert) | Insert or replace one entry by chunk id |
//! | [`upsert_batch`](VectorStore::upsert_batch) | Insert or replace many entries at once |
//! | [`query`](VectorStore::query) | Top-k cosine similarity search |
//! | [`get`](VectorStore::get) | Look up a stored chunk |
//! | [`content_hash`](VectorStore::content_hash) | Hash of the text behind a stored embedding |
//! | [`remove_stale`](VectorStore::remove_stale) | Drop a document's chunks that no longer exist |

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Chunk, IndexEntry, RetrievalResult};

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Dimension of stored vectors, once known.
    fn dims(&self) -> Option<usize>;

    /// Insert an entry, replacing any entry with the same chunk id.
    async fn upsert(&self, entry: IndexEntry) -> Result<()> {
        self.upsert_batch(vec![entry]).await
    }

    /// Insert or replace several entries as one visible change.
    async fn upsert_batch(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Return up to `k` entries ranked by descending cosine similarity.
    ///
    /// Ties keep insertion order. `score_threshold` is applied after ranking
    /// and only ever removes entries.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        score_threshold: Option<f32>,
    ) -> Result<RetrievalResult>;

    async fn get(&self, chunk_id: &str) -> Result<Option<Chunk>>;

    /// SHA-256 of the chunk text the stored embedding was computed from.
    async fn content_hash(&self, chunk_id: &str) -> Result<Option<String>>;

    /// Remove every chunk of `document_id` whose id is not in `keep`.
    ///
    /// Returns the number of entries removed.
    async fn remove_stale(&self, document_id: &str, keep: &[String]) -> Result<usize>;

    async fn len(&self) -> Result<usize>;

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
