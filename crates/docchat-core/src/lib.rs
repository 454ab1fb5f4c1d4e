//! # docchat core
//!
//! Retrieval and conversation logic for docchat: chunking, the vector index,
//! bounded conversation memory, question condensation, prompt assembly,
//! citation handling and the retrieval chain that ties them together.
//!
//! This crate performs no filesystem, database or network I/O. Embedding
//! and generation backends are supplied through the [`embedding::Embedder`]
//! and [`generation::Generator`] traits.

pub mod chain;
pub mod chunk;
pub mod citation;
pub mod condense;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod ingest;
pub mod memory;
pub mod models;
pub mod prompt;
pub mod retriever;
pub mod session;
pub mod store;

pub use error::{RagError, Result};
