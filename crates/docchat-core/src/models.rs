//! Core data models that flow through ingestion and the conversation pipeline.
//!
//! Everything here is immutable once constructed: documents are created at
//! ingestion, chunks are derived deterministically from documents, and
//! conversation turns are never edited after they are appended.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A source document loaded by the ingestion pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Source path or URI. Also the document's identity.
    pub id: String,
    /// Raw document text.
    pub text: String,
    /// Free-form metadata such as `title`.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry, builder style.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").map(String::as_str)
    }
}

/// A contiguous span of a document's text; the unit of retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic identifier derived from the document id and index.
    pub id: String,
    /// Id of the parent [`Document`].
    pub document_id: String,
    /// Position of this chunk within its document, starting at 0.
    pub chunk_index: usize,
    /// Char offset of the first character (inclusive).
    pub start: usize,
    /// Char offset one past the last character (exclusive).
    pub end: usize,
    pub text: String,
    /// SHA-256 of `text`, used to detect stale embeddings.
    pub hash: String,
}

impl Chunk {
    /// Length of the chunk in chars.
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// An embedded chunk as stored in the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

impl IndexEntry {
    pub fn new(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self { chunk, embedding }
    }

    pub fn chunk_id(&self) -> &str {
        &self.chunk.id
    }
}

/// A chunk paired with its similarity to a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Ranked output of a similarity query.
///
/// Scores are non-increasing and the length never exceeds the requested `k`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub chunks: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn new(chunks: Vec<ScoredChunk>) -> Self {
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Chunk ids in ranked order.
    pub fn chunk_ids(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.chunk.id.clone()).collect()
    }

    pub fn find(&self, chunk_id: &str) -> Option<&ScoredChunk> {
        self.chunks.iter().find(|c| c.chunk.id == chunk_id)
    }
}

/// One question/answer exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    /// Ids of the chunks the answer cites, in citation order.
    pub cited_chunk_ids: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    /// Create a turn stamped with the current time.
    pub fn new(
        question: impl Into<String>,
        answer: impl Into<String>,
        cited_chunk_ids: Vec<String>,
    ) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            cited_chunk_ids,
            timestamp: Utc::now(),
        }
    }
}
