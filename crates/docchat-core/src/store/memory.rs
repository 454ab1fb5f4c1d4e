//! In-memory [`VectorStore`] implementation.
//!
//! Brute-force cosine similarity over a copy-on-write snapshot. A query
//! clones the `Arc` of the current snapshot under a short read lock and
//! scores without holding any lock, so ingestion never stalls readers.
//! Writers are serialized by a separate mutex, build the next snapshot from
//! the current one, and swap it in. A query racing an upsert sees either
//! the old or the new snapshot, never a half-applied batch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::{Chunk, IndexEntry, RetrievalResult, ScoredChunk};

use super::VectorStore;

#[derive(Debug, Clone, Default)]
struct Snapshot {
    dims: Option<usize>,
    /// Entries in insertion order; the position is the tie-breaker.
    entries: Vec<IndexEntry>,
    positions: HashMap<String, usize>,
}

impl Snapshot {
    fn check_dims(&self, actual: usize) -> Result<()> {
        match self.dims {
            Some(expected) if expected != actual => {
                Err(RagError::DimensionMismatch { expected, actual })
            }
            _ => Ok(()),
        }
    }

    fn reindex(&mut self) {
        self.positions = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.chunk.id.clone(), i))
            .collect();
    }
}

/// In-memory vector index.
pub struct InMemoryIndex {
    current: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
}

impl InMemoryIndex {
    /// Create an index whose dimension is fixed by the first entry.
    pub fn new() -> Self {
        Self::from_snapshot(Snapshot::default())
    }

    /// Create an index that only accepts vectors of length `dims`.
    pub fn with_dims(dims: usize) -> Self {
        Self::from_snapshot(Snapshot {
            dims: Some(dims),
            ..Snapshot::default()
        })
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `edit` to a copy of the current snapshot and publish it.
    fn write<T>(&self, edit: impl FnOnce(&mut Snapshot) -> Result<T>) -> Result<T> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = (*self.snapshot()).clone();
        let out = edit(&mut next)?;
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(out)
    }

    fn apply_upserts(&self, entries: Vec<IndexEntry>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        self.write(|snap| {
            let dims = snap.dims.unwrap_or(entries[0].embedding.len());
            for entry in &entries {
                if entry.embedding.len() != dims {
                    return Err(RagError::DimensionMismatch {
                        expected: dims,
                        actual: entry.embedding.len(),
                    });
                }
            }
            snap.dims = Some(dims);
            for entry in entries {
                match snap.positions.get(entry.chunk_id()) {
                    Some(&pos) => snap.entries[pos] = entry,
                    None => {
                        snap.positions
                            .insert(entry.chunk.id.clone(), snap.entries.len());
                        snap.entries.push(entry);
                    }
                }
            }
            Ok(())
        })
    }

    fn apply_removal(&self, document_id: &str, keep: &[String]) -> Result<usize> {
        self.write(|snap| {
            let before = snap.entries.len();
            snap.entries
                .retain(|e| e.chunk.document_id != document_id || keep.contains(&e.chunk.id));
            let removed = before - snap.entries.len();
            if removed > 0 {
                snap.reindex();
            }
            Ok(removed)
        })
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> Vec<IndexEntry> {
        self.snapshot().entries.clone()
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryIndex {
    fn dims(&self) -> Option<usize> {
        self.snapshot().dims
    }

    async fn upsert_batch(&self, entries: Vec<IndexEntry>) -> Result<()> {
        self.apply_upserts(entries)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        score_threshold: Option<f32>,
    ) -> Result<RetrievalResult> {
        let snap = self.snapshot();
        if k == 0 || snap.entries.is_empty() {
            return Ok(RetrievalResult::default());
        }
        snap.check_dims(vector.len())?;

        let mut scored: Vec<(usize, f32)> = snap
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(vector, &e.embedding)))
            .collect();
        // Stable sort: equal scores stay in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        if let Some(threshold) = score_threshold {
            scored.retain(|(_, score)| *score >= threshold);
        }

        Ok(RetrievalResult::new(
            scored
                .into_iter()
                .map(|(i, score)| ScoredChunk {
                    chunk: snap.entries[i].chunk.clone(),
                    score,
                })
                .collect(),
        ))
    }

    async fn get(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let snap = self.snapshot();
        Ok(snap
            .positions
            .get(chunk_id)
            .map(|&pos| snap.entries[pos].chunk.clone()))
    }

    async fn content_hash(&self, chunk_id: &str) -> Result<Option<String>> {
        let snap = self.snapshot();
        Ok(snap
            .positions
            .get(chunk_id)
            .map(|&pos| snap.entries[pos].chunk.hash.clone()))
    }

    async fn remove_stale(&self, document_id: &str, keep: &[String]) -> Result<usize> {
        self.apply_removal(document_id, keep)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.snapshot().entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_id, content_hash};
    use proptest::prelude::*;

    fn entry(doc: &str, index: usize, text: &str, embedding: Vec<f32>) -> IndexEntry {
        IndexEntry::new(
            Chunk {
                id: chunk_id(doc, index),
                document_id: doc.to_string(),
                chunk_index: index,
                start: 0,
                end: text.chars().count(),
                text: text.to_string(),
                hash: content_hash(text),
            },
            embedding,
        )
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let index = InMemoryIndex::new();
        index
            .upsert_batch(vec![
                entry("d", 0, "east", vec![1.0, 0.0]),
                entry("d", 1, "north", vec![0.0, 1.0]),
                entry("d", 2, "northeast", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();

        let result = index.query(&[1.0, 0.1], 3, None).await.unwrap();
        let texts: Vec<&str> = result.chunks.iter().map(|c| c.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["east", "northeast", "north"]);
    }

    #[tokio::test]
    async fn test_fewer_entries_than_k() {
        let index = InMemoryIndex::new();
        index.upsert(entry("d", 0, "only", vec![1.0, 0.0])).await.unwrap();
        let result = index.query(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_index_and_zero_k() {
        let index = InMemoryIndex::new();
        assert!(index.query(&[1.0], 5, None).await.unwrap().is_empty());
        index.upsert(entry("d", 0, "x", vec![1.0])).await.unwrap();
        assert!(index.query(&[1.0], 0, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let index = InMemoryIndex::new();
        for i in 0..5 {
            index
                .upsert(entry("d", i, &format!("t{i}"), vec![1.0, 0.0]))
                .await
                .unwrap();
        }
        // Replacing an entry keeps its original position.
        index.upsert(entry("d", 1, "t1-new", vec![2.0, 0.0])).await.unwrap();

        let result = index.query(&[1.0, 0.0], 5, None).await.unwrap();
        let texts: Vec<&str> = result.chunks.iter().map(|c| c.chunk.text.as_str()).collect();
        assert_eq!(texts, vec!["t0", "t1-new", "t2", "t3", "t4"]);
    }

    #[tokio::test]
    async fn test_threshold_filters_after_ranking() {
        let index = InMemoryIndex::new();
        index
            .upsert_batch(vec![
                entry("d", 0, "close", vec![1.0, 0.0]),
                entry("d", 1, "far", vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        let result = index.query(&[1.0, 0.0], 2, Some(0.5)).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.chunks[0].chunk.text, "close");

        let none = index.query(&[1.0, 0.0], 2, Some(1.5)).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_chunk_id() {
        let index = InMemoryIndex::new();
        index.upsert(entry("d", 0, "v1", vec![1.0, 0.0])).await.unwrap();
        index.upsert(entry("d", 0, "v2", vec![0.0, 1.0])).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 1);
        let chunk = index.get(&chunk_id("d", 0)).await.unwrap().unwrap();
        assert_eq!(chunk.text, "v2");
        assert_eq!(
            index.content_hash(&chunk_id("d", 0)).await.unwrap(),
            Some(content_hash("v2"))
        );
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let index = InMemoryIndex::with_dims(2);
        let err = index.upsert(entry("d", 0, "x", vec![1.0])).await.unwrap_err();
        assert!(matches!(
            err,
            RagError::DimensionMismatch { expected: 2, actual: 1 }
        ));

        index.upsert(entry("d", 0, "x", vec![1.0, 0.0])).await.unwrap();
        assert!(index.query(&[1.0, 0.0, 0.0], 1, None).await.is_err());
    }

    #[tokio::test]
    async fn test_mismatched_batch_is_rejected_whole() {
        let index = InMemoryIndex::new();
        let err = index
            .upsert_batch(vec![
                entry("d", 0, "a", vec![1.0, 0.0]),
                entry("d", 1, "b", vec![1.0, 0.0, 0.0]),
            ])
            .await;
        assert!(err.is_err());
        assert_eq!(index.len().await.unwrap(), 0);
        assert_eq!(index.dims(), None);
    }

    #[tokio::test]
    async fn test_remove_stale() {
        let index = InMemoryIndex::new();
        index
            .upsert_batch(vec![
                entry("a", 0, "a0", vec![1.0]),
                entry("a", 1, "a1", vec![1.0]),
                entry("b", 0, "b0", vec![1.0]),
            ])
            .await
            .unwrap();
        let removed = index.remove_stale("a", &[chunk_id("a", 0)]).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.len().await.unwrap(), 2);
        assert!(index.get(&chunk_id("a", 1)).await.unwrap().is_none());
        assert!(index.get(&chunk_id("b", 0)).await.unwrap().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_queries_during_upserts() {
        let index = Arc::new(InMemoryIndex::new());
        index.upsert(entry("seed", 0, "seed", vec![1.0, 0.0])).await.unwrap();

        let writer = {
            let index = index.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    index
                        .upsert(entry("w", i, "w", vec![1.0, i as f32]))
                        .await
                        .unwrap();
                }
            })
        };
        let mut readers = Vec::new();
        for _ in 0..4 {
            let index = index.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let r = index.query(&[1.0, 0.0], 5, None).await.unwrap();
                    assert!(!r.is_empty());
                    assert!(r.chunks.windows(2).all(|w| w[0].score >= w[1].score));
                }
            }));
        }
        writer.await.unwrap();
        for r in readers {
            r.await.unwrap();
        }
        assert_eq!(index.len().await.unwrap(), 201);
    }

    proptest! {
        #[test]
        fn prop_query_sorted_and_bounded(
            vectors in prop::collection::vec(prop::collection::vec(-1.0f32..1.0, 3), 0..30),
            query in prop::collection::vec(-1.0f32..1.0, 3),
            k in 0usize..40,
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let index = InMemoryIndex::with_dims(3);
            let total = vectors.len();
            let entries = vectors
                .into_iter()
                .enumerate()
                .map(|(i, v)| entry("p", i, "p", v))
                .collect();
            rt.block_on(index.upsert_batch(entries)).unwrap();
            let result = rt.block_on(index.query(&query, k, None)).unwrap();
            prop_assert!(result.len() <= k);
            prop_assert!(result.len() <= total);
            prop_assert_eq!(result.len(), k.min(total));
            for w in result.chunks.windows(2) {
                prop_assert!(w[0].score >= w[1].score);
            }
        }
    }
}
