//! Sliding-window text chunker.
//!
//! Splits a [`Document`] into overlapping fixed-size [`Chunk`]s. The unit of
//! measure is the Unicode scalar value (`char`), so multi-byte text never
//! splits inside a character and offsets are char offsets.
//!
//! # Algorithm
//!
//! 1. Validate `0 <= overlap < size`.
//! 2. Emit the window `[start, min(start + size, len))`.
//! 3. Stop once a window reaches the end of the text; otherwise advance
//!    `start` by `size - overlap` and repeat.
//!
//! The final window is truncated rather than padded. Consecutive chunks share
//! exactly `overlap` chars, and the same input always yields the same chunks
//! (ids included), which keeps re-indexing reproducible.
//!
//! # Example
//!
//! ```rust
//! use docchat_core::chunk::chunk;
//! use docchat_core::models::Document;
//!
//! let doc = Document::new("letters.txt", "ABCDEFGHIJKLMNO");
//! let chunks = chunk(&doc, 10, 3).unwrap();
//! assert_eq!(chunks[0].text, "ABCDEFGHIJ");
//! assert_eq!(chunks[1].text, "HIJKLMNO");
//! ```

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document};

/// Validated window parameters, measured in chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingParams {
    size: usize,
    overlap: usize,
}

impl ChunkingParams {
    /// # Errors
    ///
    /// [`RagError::InvalidConfiguration`] unless `size > 0` and `overlap < size`.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(RagError::InvalidConfiguration(
                "chunk size must be > 0".to_string(),
            ));
        }
        if overlap >= size {
            return Err(RagError::InvalidConfiguration(format!(
                "chunk overlap ({overlap}) must be smaller than chunk size ({size})"
            )));
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Distance between the starts of consecutive windows.
    pub fn step(&self) -> usize {
        self.size - self.overlap
    }
}

/// Split `document` into chunks of `size` chars overlapping by `overlap`.
///
/// # Errors
///
/// [`RagError::InvalidConfiguration`] for invalid parameters.
pub fn chunk(document: &Document, size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    let params = ChunkingParams::new(size, overlap)?;
    Ok(chunk_with(document, &params))
}

/// Split `document` using already validated parameters.
///
/// A document shorter than the window (including the empty document) yields
/// exactly one chunk equal to the whole text.
pub fn chunk_with(document: &Document, params: &ChunkingParams) -> Vec<Chunk> {
    let text = document.text.as_str();
    // Byte offset of every char boundary, including the end of the text.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = bounds.len() - 1;

    let mut chunks = Vec::with_capacity(len / params.step() + 1);
    let mut start = 0;
    loop {
        let end = (start + params.size).min(len);
        let piece = &text[bounds[start]..bounds[end]];
        chunks.push(make_chunk(&document.id, chunks.len(), start, end, piece));
        if end == len {
            break;
        }
        start += params.step();
    }
    chunks
}

/// Rebuild the source text from an ordered chunk sequence by dropping the
/// leading `overlap` chars of every chunk after the first.
pub fn reconstruct(chunks: &[Chunk], overlap: usize) -> String {
    let mut out = String::new();
    for (i, c) in chunks.iter().enumerate() {
        if i == 0 {
            out.push_str(&c.text);
        } else {
            out.extend(c.text.chars().skip(overlap));
        }
    }
    out
}

/// Deterministic chunk id: a UUIDv5 over `"{document_id}#{index}"`.
pub fn chunk_id(document_id: &str, index: usize) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("{document_id}#{index}").as_bytes(),
    )
    .to_string()
}

/// Hex SHA-256 of a chunk's text.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn make_chunk(document_id: &str, index: usize, start: usize, end: usize, text: &str) -> Chunk {
    Chunk {
        id: chunk_id(document_id, index),
        document_id: document_id.to_string(),
        chunk_index: index,
        start,
        end,
        text: text.to_string(),
        hash: content_hash(text),
    }
}
