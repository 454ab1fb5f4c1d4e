//! SQLite persistence for the vector index.
//!
//! The in-memory index is the query path; SQLite is its durable backing.
//! On startup [`SqliteIndexStore::load_into`] replays every persisted entry
//! into a fresh [`InMemoryIndex`] in original insertion order, and ingestion
//! writes each document's changes back through
//! [`SqliteIndexStore::save_document`].
//!
//! Embeddings are stored as little-endian `f32` BLOBs.

use std::collections::HashSet;

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use docchat_core::chunk::content_hash;
use docchat_core::ingest::DocumentOutcome;
use docchat_core::models::{Chunk, Document, IndexEntry};
use docchat_core::store::memory::InMemoryIndex;
use docchat_core::store::VectorStore;

pub struct SqliteIndexStore {
    pool: SqlitePool,
}

/// Row counts for `docchat stats`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexCoverage {
    pub documents: i64,
    pub chunks: i64,
    pub embedded: i64,
    /// `(model, embedded chunks)` pairs.
    pub models: Vec<(String, i64)>,
}

impl SqliteIndexStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Replay persisted entries embedded with `model` into `index`.
    /// Returns the number of entries loaded.
    pub async fn load_into(&self, index: &InMemoryIndex, model: &str) -> Result<usize> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.start_offset, c.end_offset,
                   c.text, c.hash, e.embedding
            FROM chunks c
            JOIN embeddings e ON e.chunk_id = c.id
            WHERE e.model = ? AND e.hash = c.hash
            ORDER BY c.rowid
            "#,
        )
        .bind(model)
        .fetch_all(&self.pool)
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in &rows {
            let chunk = Chunk {
                id: row.get("id"),
                document_id: row.get("document_id"),
                chunk_index: row.get::<i64, _>("chunk_index") as usize,
                start: row.get::<i64, _>("start_offset") as usize,
                end: row.get::<i64, _>("end_offset") as usize,
                text: row.get("text"),
                hash: row.get("hash"),
            };
            let blob: Vec<u8> = row.get("embedding");
            entries.push(IndexEntry::new(chunk, blob_to_vec(&blob)));
        }

        let loaded = entries.len();
        index
            .upsert_batch(entries)
            .await
            .context("Persisted embeddings do not match the configured model")?;
        debug!(loaded, model, "loaded index from database");
        Ok(loaded)
    }

    /// Persist one ingested document: the document row, every re-embedded
    /// entry, and removal of chunks that no longer exist. One transaction.
    pub async fn save_document(
        &self,
        document: &Document,
        outcome: &DocumentOutcome,
        model: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let metadata_json = serde_json::to_string(&document.metadata)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, title, body_hash, metadata_json, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                body_hash = excluded.body_hash,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&document.id)
        .bind(document.title())
        .bind(content_hash(&document.text))
        .bind(&metadata_json)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for entry in &outcome.embedded {
            let chunk = &entry.chunk;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, start_offset, end_offset, text, hash)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    chunk_index = excluded.chunk_index,
                    start_offset = excluded.start_offset,
                    end_offset = excluded.end_offset,
                    text = excluded.text,
                    hash = excluded.hash
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.chunk_index as i64)
            .bind(chunk.start as i64)
            .bind(chunk.end as i64)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO embeddings (chunk_id, model, dims, hash, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    model = excluded.model,
                    dims = excluded.dims,
                    hash = excluded.hash,
                    embedding = excluded.embedding,
                    created_at = excluded.created_at
                "#,
            )
            .bind(&chunk.id)
            .bind(model)
            .bind(entry.embedding.len() as i64)
            .bind(&chunk.hash)
            .bind(vec_to_blob(&entry.embedding))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        let existing: Vec<String> = sqlx::query_scalar("SELECT id FROM chunks WHERE document_id = ?")
            .bind(&document.id)
            .fetch_all(&mut *tx)
            .await?;
        let keep: HashSet<&str> = outcome.chunk_ids.iter().map(String::as_str).collect();
        for stale in existing.iter().filter(|id| !keep.contains(id.as_str())) {
            delete_chunk(&mut tx, stale).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Remove a document and everything derived from it.
    pub async fn forget_document(&self, document_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(document_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn document_ids(&self) -> Result<Vec<String>> {
        Ok(sqlx::query_scalar("SELECT id FROM documents ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }

    pub async fn coverage(&self) -> Result<IndexCoverage> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await?;
        let models = sqlx::query(
            "SELECT model, COUNT(*) AS n FROM embeddings GROUP BY model ORDER BY n DESC, model",
        )
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| (row.get::<String, _>("model"), row.get::<i64, _>("n")))
        .collect();

        Ok(IndexCoverage {
            documents,
            chunks,
            embedded,
            models,
        })
    }
}

async fn delete_chunk(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, chunk_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM embeddings WHERE chunk_id = ?")
        .bind(chunk_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE id = ?")
        .bind(chunk_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Encode a vector as a BLOB of little-endian `f32`s.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Inverse of [`vec_to_blob`]. Trailing bytes that do not form a whole
/// `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use docchat_core::chunk::chunk;

    async fn memory_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        pool
    }

    fn outcome(document: &Document, vectors: &[Vec<f32>]) -> DocumentOutcome {
        let chunks = chunk(document, 4, 0).unwrap();
        DocumentOutcome {
            document_id: document.id.clone(),
            chunk_ids: chunks.iter().map(|c| c.id.clone()).collect(),
            embedded: chunks
                .into_iter()
                .zip(vectors.iter().cloned())
                .map(|(c, v)| IndexEntry::new(c, v))
                .collect(),
            ..DocumentOutcome::default()
        }
    }

    #[test]
    fn test_blob_round_trip() {
        let v = vec![0.5, -1.25, 3.0];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
        assert!(blob_to_vec(&[1, 2, 3]).is_empty());
    }

    #[tokio::test]
    async fn test_save_then_load_preserves_order() {
        let store = SqliteIndexStore::new(memory_pool().await);
        let doc = Document::new("a.txt", "aaaabbbbcccc").with_metadata("title", "A");
        let out = outcome(&doc, &[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]]);
        store.save_document(&doc, &out, "m").await.unwrap();

        let index = InMemoryIndex::new();
        assert_eq!(store.load_into(&index, "m").await.unwrap(), 3);
        let texts: Vec<String> = index.entries().into_iter().map(|e| e.chunk.text).collect();
        assert_eq!(texts, vec!["aaaa", "bbbb", "cccc"]);

        // A different model loads nothing.
        assert_eq!(store.load_into(&InMemoryIndex::new(), "other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_save_removes_stale_chunks() {
        let store = SqliteIndexStore::new(memory_pool().await);
        let doc = Document::new("a.txt", "aaaabbbbcccc");
        store
            .save_document(&doc, &outcome(&doc, &[vec![1.0], vec![2.0], vec![3.0]]), "m")
            .await
            .unwrap();

        let shorter = Document::new("a.txt", "aaaa");
        store
            .save_document(&shorter, &outcome(&shorter, &[vec![1.0]]), "m")
            .await
            .unwrap();

        let coverage = store.coverage().await.unwrap();
        assert_eq!(coverage.documents, 1);
        assert_eq!(coverage.chunks, 1);
        assert_eq!(coverage.embedded, 1);
        assert_eq!(coverage.models, vec![("m".to_string(), 1)]);
    }

    #[tokio::test]
    async fn test_forget_document() {
        let store = SqliteIndexStore::new(memory_pool().await);
        let doc = Document::new("a.txt", "aaaa");
        store
            .save_document(&doc, &outcome(&doc, &[vec![1.0]]), "m")
            .await
            .unwrap();
        assert_eq!(store.document_ids().await.unwrap(), vec!["a.txt"]);

        store.forget_document("a.txt").await.unwrap();
        assert!(store.document_ids().await.unwrap().is_empty());
        assert_eq!(store.coverage().await.unwrap().chunks, 0);
    }
}
