//! Wiring from configuration to a ready-to-ask [`Engine`].
//!
//! The engine owns the shared in-memory index, the retrieval chain, the
//! session registry and the query monitor. The CLI and the HTTP server both
//! go through [`Engine::ask`], which is where latency and outcome of every
//! question get recorded.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

use docchat_core::chain::{Answer, RetrievalChain};
use docchat_core::chunk::ChunkingParams;
use docchat_core::condense::QuestionCondenser;
use docchat_core::embedding::Embedder;
use docchat_core::generation::{GenerationParams, Generator};
use docchat_core::prompt::{DomainProfiles, PromptAssembler};
use docchat_core::retriever::RetrievalParams;
use docchat_core::session::SessionRegistry;
use docchat_core::store::memory::InMemoryIndex;
use docchat_core::store::VectorStore;

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::migrate;
use crate::monitor::{estimate_tokens, QueryMonitor, QueryRecord};
use crate::sqlite_store::SqliteIndexStore;

pub struct Engine {
    config: Config,
    index: Arc<InMemoryIndex>,
    chain: RetrievalChain,
    sessions: SessionRegistry,
    monitor: QueryMonitor,
}

impl Engine {
    /// Open the database, load the persisted index and build the configured
    /// collaborators.
    pub async fn open(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::apply(&pool).await?;

        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let index = Arc::new(new_index(&config));

        if config.embedding.is_enabled() {
            let store = SqliteIndexStore::new(pool.clone());
            let loaded = store.load_into(&index, embedder.model_name()).await?;
            info!(loaded, model = embedder.model_name(), "index ready");
        }

        Self::new(config, embedder, generator, index, QueryMonitor::with_pool(pool))
    }

    /// Assemble an engine from explicit collaborators.
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        index: Arc<InMemoryIndex>,
        monitor: QueryMonitor,
    ) -> Result<Self> {
        let chain = build_chain(&config, embedder, generator, index.clone())?;
        let sessions = SessionRegistry::new(config.memory.capacity)?;
        Ok(Self {
            config,
            index,
            chain,
            sessions,
            monitor,
        })
    }

    /// Apply the `[server]` session limits. Sessions used by the CLI live as
    /// long as the process, HTTP sessions are bounded by these.
    pub fn with_session_limits(mut self) -> Result<Self> {
        let server = &self.config.server;
        self.sessions = SessionRegistry::new(self.config.memory.capacity)?
            .with_idle_ttl(Duration::from_secs(server.session_idle_secs))?
            .with_max_sessions(server.max_sessions)?;
        Ok(self)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &Arc<InMemoryIndex> {
        &self.index
    }

    pub fn chain(&self) -> &RetrievalChain {
        &self.chain
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn monitor(&self) -> &QueryMonitor {
        &self.monitor
    }

    pub fn profiles(&self) -> &DomainProfiles {
        self.chain.profiles()
    }

    /// Ask within the session `session_id`, creating it on first use.
    /// `profile`, when given, becomes the session's profile from now on.
    pub async fn ask(
        &self,
        session_id: &str,
        question: &str,
        profile: Option<&str>,
    ) -> docchat_core::Result<Answer> {
        let handle = self.sessions.get_or_create(session_id)?;

        let started = Instant::now();
        let result = self.chain.ask_with_profile(&handle, question, profile).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        self.monitor
            .record(QueryRecord {
                session_id: session_id.to_string(),
                question: question.to_string(),
                latency_ms,
                success: result.is_ok(),
                error: result.as_ref().err().map(|e| e.to_string()),
                citations: result.as_ref().map_or(0, |a| a.cited_chunk_ids.len()),
                tokens: result.as_ref().map_or(0, |a| estimate_tokens(&a.text)),
                timestamp: Utc::now(),
            })
            .await;
        result
    }
}

/// A fresh index sized for the configured embedder.
pub fn new_index(config: &Config) -> InMemoryIndex {
    match config.embedding.dims {
        Some(dims) if config.embedding.is_enabled() => InMemoryIndex::with_dims(dims),
        _ => InMemoryIndex::new(),
    }
}

pub fn chunking_params(config: &Config) -> Result<ChunkingParams> {
    ChunkingParams::new(config.chunking.size, config.chunking.overlap)
        .context("Invalid [chunking] configuration")
}

/// Built-in profiles plus `[profiles.templates]`, with `[profiles].default`.
pub fn build_profiles(config: &Config) -> Result<DomainProfiles> {
    let mut profiles = DomainProfiles::builtin();
    for (name, template) in &config.profiles.templates {
        profiles.insert(name.clone(), template.clone());
    }
    match &config.profiles.default {
        Some(name) => Ok(profiles.with_default(name)?),
        None => Ok(profiles),
    }
}

fn build_chain(
    config: &Config,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    index: Arc<dyn VectorStore>,
) -> Result<RetrievalChain> {
    let generation = &config.generation;

    let mut condenser = match &generation.condense_template {
        Some(template) => QuestionCondenser::with_template(template.clone())?,
        None => QuestionCondenser::default(),
    };
    condenser = condenser.with_params(GenerationParams {
        max_tokens: generation.condense_max_tokens,
        temperature: 0.0,
    });

    let chain = RetrievalChain::builder()
        .embedder(embedder)
        .generator(generator)
        .store(index)
        .assembler(PromptAssembler::new(
            build_profiles(config)?,
            config.retrieval.max_context_chars,
        )?)
        .condenser(condenser)
        .retrieval(RetrievalParams::new(
            config.retrieval.top_k,
            config.retrieval.score_threshold,
        )?)
        .generation(GenerationParams {
            max_tokens: generation.max_tokens,
            temperature: generation.temperature,
        })
        .embed_timeout(Duration::from_secs(config.embedding.ask_timeout_secs))
        .generate_timeout(Duration::from_secs(generation.ask_timeout_secs))
        .build()?;
    Ok(chain)
}
