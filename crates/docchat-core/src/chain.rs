//! The retrieval chain: one conversational turn end to end.
//!
//! ```text
//! question ─▶ condense (history) ─▶ embed ─▶ retrieve top-k
//!          ─▶ assemble prompt ─▶ generate ─▶ resolve citations ─▶ append turn
//! ```
//!
//! The session mutex is held for the whole of [`RetrievalChain::ask`], so two
//! questions on the same session never interleave their history reads and
//! writes. Different sessions only share the read-mostly index.
//!
//! A turn is appended only when every step succeeds; a failed `ask` leaves
//! the session's memory exactly as it was.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::citation::resolve_citations;
use crate::condense::QuestionCondenser;
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::generation::{GenerationParams, Generator};
use crate::models::{ConversationTurn, RetrievalResult};
use crate::prompt::{DomainProfiles, PromptAssembler, PromptSpec};
use crate::retriever::{RetrievalParams, Retriever};
use crate::session::SessionHandle;
use crate::store::VectorStore;

const DEFAULT_EMBED_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_GENERATE_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_MAX_CONTEXT_CHARS: usize = 6000;

/// The outcome of a successful [`RetrievalChain::ask`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub text: String,
    /// Cited chunk ids, in citation order.
    pub cited_chunk_ids: Vec<String>,
    /// The question actually used for retrieval.
    pub standalone_question: String,
    /// Distinct document ids of the cited chunks, in citation order.
    pub sources: Vec<String>,
    /// Domain profile used after fallback.
    pub profile: String,
}

pub struct RetrievalChain {
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    retriever: Retriever,
    assembler: PromptAssembler,
    condenser: QuestionCondenser,
    generation: GenerationParams,
    embed_timeout: Duration,
    generate_timeout: Duration,
}

impl RetrievalChain {
    pub fn builder() -> RetrievalChainBuilder {
        RetrievalChainBuilder::default()
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn profiles(&self) -> &DomainProfiles {
        self.assembler.profiles()
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn generator(&self) -> &Arc<dyn Generator> {
        &self.generator
    }

    /// Answer `question` within `session`.
    ///
    /// # Errors
    ///
    /// - [`RagError::InvalidInput`] for a blank question, before any
    ///   collaborator is called.
    /// - [`RagError::EmbeddingFailure`] when embedding fails or times out.
    /// - [`RagError::GenerationFailure`] when condensing or generating fails,
    ///   times out, or the model returns nothing.
    pub async fn ask(&self, session: &SessionHandle, question: &str) -> Result<Answer> {
        self.ask_with_profile(session, question, None).await
    }

    /// Like [`ask`](Self::ask), but first switches the session to `profile`.
    ///
    /// The switch happens under the same session lock as the turn itself, so
    /// a concurrent ask on the session cannot change the profile this answer
    /// is generated with. The new profile stays in effect for later asks.
    pub async fn ask_with_profile(
        &self,
        session: &SessionHandle,
        question: &str,
        profile: Option<&str>,
    ) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidInput("question must not be empty".to_string()));
        }

        let mut session = session.lock().await;
        if let Some(profile) = profile {
            session.set_profile(Some(profile.to_string()));
        }
        let turns = session.memory().turns();

        let standalone = self
            .generate_within(self.condenser.condense(self.generator.as_ref(), question, &turns))
            .await?;

        let query_vec = timed(
            self.embed_timeout,
            self.embedder.embed(&standalone),
            || RagError::embedding(self.embedder.model_name(), "embedding timed out"),
        )
        .await?;

        let retrieval = self.retriever.retrieve(&query_vec).await?;
        if retrieval.is_empty() {
            info!(
                session = session.id(),
                "no chunks retrieved; answering without context"
            );
        }

        let assembled = self
            .assembler
            .assemble(session.profile(), &retrieval, &standalone, &turns);
        if !assembled.dropped_chunk_ids.is_empty() {
            debug!(
                dropped = assembled.dropped_chunk_ids.len(),
                "context budget exceeded"
            );
        }

        let raw = self
            .generate_within(self.generator.generate(&assembled.text(), &self.generation))
            .await?;
        let text = raw.trim();
        if text.is_empty() {
            return Err(RagError::generation(
                self.generator.model_name(),
                "model returned an empty answer",
            ));
        }

        let shown = shown_chunks(&retrieval, &assembled);
        let cited_chunk_ids = resolve_citations(text, &shown);
        let sources = sources_of(&shown, &cited_chunk_ids);

        session.memory_mut().append(ConversationTurn::new(
            question,
            text,
            cited_chunk_ids.clone(),
        ));
        debug!(
            session = session.id(),
            citations = cited_chunk_ids.len(),
            "turn recorded"
        );

        Ok(Answer {
            text: text.to_string(),
            cited_chunk_ids,
            standalone_question: standalone,
            sources,
            profile: assembled.profile,
        })
    }

    async fn generate_within(
        &self,
        fut: impl Future<Output = Result<String>>,
    ) -> Result<String> {
        timed(self.generate_timeout, fut, || {
            RagError::generation(self.generator.model_name(), "generation timed out")
        })
        .await
    }
}

async fn timed<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
    on_elapsed: impl FnOnce() -> RagError,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(out) => out,
        Err(_) => Err(on_elapsed()),
    }
}

/// The retrieved chunks that made it into the prompt, in rank order.
fn shown_chunks(retrieval: &RetrievalResult, assembled: &PromptSpec) -> RetrievalResult {
    RetrievalResult::new(
        retrieval
            .chunks
            .iter()
            .filter(|c| assembled.included_chunk_ids.contains(&c.chunk.id))
            .cloned()
            .collect(),
    )
}

fn sources_of(retrieval: &RetrievalResult, cited: &[String]) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for id in cited {
        if let Some(scored) = retrieval.find(id) {
            if !sources.contains(&scored.chunk.document_id) {
                sources.push(scored.chunk.document_id.clone());
            }
        }
    }
    sources
}

/// Builder for [`RetrievalChain`].
#[derive(Default)]
pub struct RetrievalChainBuilder {
    embedder: Option<Arc<dyn Embedder>>,
    generator: Option<Arc<dyn Generator>>,
    store: Option<Arc<dyn VectorStore>>,
    profiles: Option<DomainProfiles>,
    assembler: Option<PromptAssembler>,
    condenser: Option<QuestionCondenser>,
    retrieval: Option<RetrievalParams>,
    generation: Option<GenerationParams>,
    embed_timeout: Option<Duration>,
    generate_timeout: Option<Duration>,
}

impl RetrievalChainBuilder {
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Profiles for the default assembler. Ignored when
    /// [`assembler`](Self::assembler) is set.
    pub fn profiles(mut self, profiles: DomainProfiles) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn assembler(mut self, assembler: PromptAssembler) -> Self {
        self.assembler = Some(assembler);
        self
    }

    pub fn condenser(mut self, condenser: QuestionCondenser) -> Self {
        self.condenser = Some(condenser);
        self
    }

    pub fn retrieval(mut self, params: RetrievalParams) -> Self {
        self.retrieval = Some(params);
        self
    }

    pub fn generation(mut self, params: GenerationParams) -> Self {
        self.generation = Some(params);
        self
    }

    pub fn embed_timeout(mut self, limit: Duration) -> Self {
        self.embed_timeout = Some(limit);
        self
    }

    pub fn generate_timeout(mut self, limit: Duration) -> Self {
        self.generate_timeout = Some(limit);
        self
    }

    /// # Errors
    ///
    /// [`RagError::InvalidConfiguration`] when the embedder, generator or
    /// store is missing, a timeout is zero, or the store's dimension differs
    /// from the embedder's.
    pub fn build(self) -> Result<RetrievalChain> {
        let missing = |what: &str| RagError::InvalidConfiguration(format!("retrieval chain needs {what}"));
        let embedder = self.embedder.ok_or_else(|| missing("an embedder"))?;
        let generator = self.generator.ok_or_else(|| missing("a generator"))?;
        let store = self.store.ok_or_else(|| missing("a vector store"))?;

        if let Some(dims) = store.dims() {
            if dims != embedder.dims() {
                return Err(RagError::InvalidConfiguration(format!(
                    "index holds {dims}-dim vectors but embedder '{}' produces {}",
                    embedder.model_name(),
                    embedder.dims()
                )));
            }
        }

        let embed_timeout = self.embed_timeout.unwrap_or(DEFAULT_EMBED_TIMEOUT);
        let generate_timeout = self.generate_timeout.unwrap_or(DEFAULT_GENERATE_TIMEOUT);
        if embed_timeout.is_zero() || generate_timeout.is_zero() {
            return Err(RagError::InvalidConfiguration(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        let assembler = match self.assembler {
            Some(a) => a,
            None => PromptAssembler::new(
                self.profiles.unwrap_or_default(),
                DEFAULT_MAX_CONTEXT_CHARS,
            )?,
        };

        Ok(RetrievalChain {
            embedder,
            generator,
            retriever: Retriever::new(store, self.retrieval.unwrap_or_default()),
            assembler,
            condenser: self.condenser.unwrap_or_default(),
            generation: self.generation.unwrap_or_default(),
            embed_timeout,
            generate_timeout,
        })
    }
}
