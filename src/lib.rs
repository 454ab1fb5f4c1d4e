//! # docchat
//!
//! Conversational question answering over a private document collection.
//!
//! Documents are chunked, embedded and indexed; each question is condensed
//! against the session's recent turns, answered from the most similar
//! chunks, and returned with citations to the passages it relied on.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────┐
//! │  Documents  │──▶│   Ingest     │──▶│  SQLite  │
//! │  (loader)   │   │ Chunk+Embed  │   │ persisted│
//! └─────────────┘   └──────────────┘   └────┬─────┘
//!                                           │ load
//!                                           ▼
//!                   ┌──────────────┐   ┌──────────┐
//!                   │ Retrieval    │◀──│ In-memory│
//!                   │ chain        │   │ index    │
//!                   └──────┬───────┘   └──────────┘
//!                ┌─────────┴──────────┐
//!                ▼                    ▼
//!           ┌──────────┐        ┌──────────┐
//!           │   CLI    │        │   HTTP   │
//!           │ ask/chat │        │  (axum)  │
//!           └──────────┘        └──────────┘
//! ```
//!
//! The retrieval logic itself lives in `docchat-core`; this crate supplies
//! configuration, concrete embedding and generation backends, persistence
//! and the front ends.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | Tracing subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Durable backing for the vector index |
//! | [`loader`] | Document loading from a directory |
//! | [`embedding`] | OpenAI / Ollama embedders |
//! | [`generation`] | OpenAI / Ollama generators |
//! | [`ingest`] | `docchat ingest` |
//! | [`engine`] | Config → chain, index, sessions, monitor |
//! | [`ask`] | `docchat ask` / `docchat chat` |
//! | [`export`] | Session transcript export |
//! | [`monitor`] | Per-query usage monitoring |
//! | [`stats`] | `docchat stats` |
//! | [`profiles`] | `docchat profiles` |
//! | [`server`] | HTTP API |

pub mod ask;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod export;
pub mod generation;
pub mod ingest;
pub mod loader;
pub mod logging;
pub mod migrate;
pub mod monitor;
pub mod profiles;
pub mod server;
pub mod sqlite_store;
pub mod stats;
