//! Configuration loading.
//!
//! docchat reads a single TOML file (default `./config/docchat.toml`). Every
//! section is optional and falls back to the defaults below, so a minimal
//! file only needs the providers it actually uses:
//!
//! ```toml
//! [documents]
//! root = "./docs"
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//! dims = 768
//!
//! [generation]
//! provider = "ollama"
//! model = "llama3.1"
//! ```
//!
//! API keys are never read from the file: the OpenAI backends look up
//! `OPENAI_API_KEY` in the environment.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub documents: DocumentsConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub profiles: ProfilesConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/docchat.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DocumentsConfig {
    #[serde(default = "default_documents_root")]
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            root: default_documents_root(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_documents_root() -> PathBuf {
    PathBuf::from("./documents")
}
fn default_include_globs() -> Vec<String> {
    vec!["**/*.txt".to_string(), "**/*.md".to_string()]
}
fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: default_chunk_size(),
            overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub score_threshold: Option<f32>,
    #[serde(default = "default_max_context_chars")]
    pub max_context_chars: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: None,
            max_context_chars: default_max_context_chars(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_max_context_chars() -> usize {
    6000
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    /// Turns retained per session.
    #[serde(default = "default_memory_capacity")]
    pub capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: default_memory_capacity(),
        }
    }
}

fn default_memory_capacity() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override, e.g. `http://localhost:11434` for Ollama.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-attempt HTTP timeout.
    #[serde(default = "default_embed_timeout_secs")]
    pub timeout_secs: u64,
    /// Limit for one embedding call during `ask`, retries and backoff
    /// included.
    #[serde(default = "default_embed_ask_timeout_secs")]
    pub ask_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embed_timeout_secs(),
            ask_timeout_secs: default_embed_ask_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Token budget for rewriting follow-up questions.
    #[serde(default = "default_condense_max_tokens")]
    pub condense_max_tokens: u32,
    #[serde(default)]
    pub condense_template: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-attempt HTTP timeout.
    #[serde(default = "default_generate_timeout_secs")]
    pub timeout_secs: u64,
    /// Limit for one generation call (condensing or answering) during `ask`,
    /// retries and backoff included.
    #[serde(default = "default_generate_ask_timeout_secs")]
    pub ask_timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            condense_max_tokens: default_condense_max_tokens(),
            condense_template: None,
            max_retries: default_max_retries(),
            timeout_secs: default_generate_timeout_secs(),
            ask_timeout_secs: default_generate_ask_timeout_secs(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embed_timeout_secs() -> u64 {
    10
}
fn default_embed_ask_timeout_secs() -> u64 {
    60
}
fn default_generate_timeout_secs() -> u64 {
    60
}
fn default_generate_ask_timeout_secs() -> u64 {
    300
}
fn default_max_tokens() -> u32 {
    512
}
fn default_temperature() -> f32 {
    0.7
}
fn default_condense_max_tokens() -> u32 {
    96
}

/// Domain profiles on top of the built-in set.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProfilesConfig {
    /// Profile used when none is requested or the requested one is unknown.
    #[serde(default)]
    pub default: Option<String>,
    /// Extra or overriding profiles: name → system prompt.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// HTTP sessions unused for this long are discarded.
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    /// Upper bound on live HTTP sessions; the least recently used is evicted.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_idle_secs: default_session_idle_secs(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}
fn default_session_idle_secs() -> u64 {
    1800
}
fn default_max_sessions() -> usize {
    10_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `text` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.size == 0 {
        bail!("chunking.size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.size {
        bail!("chunking.overlap must be < chunking.size");
    }

    // Retrieval
    if config.retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if let Some(t) = config.retrieval.score_threshold {
        if !(-1.0..=1.0).contains(&t) {
            bail!("retrieval.score_threshold must be in [-1.0, 1.0]");
        }
    }
    if config.retrieval.max_context_chars == 0 {
        bail!("retrieval.max_context_chars must be > 0");
    }

    if config.memory.capacity == 0 {
        bail!("memory.capacity must be >= 1");
    }

    if config.server.session_idle_secs == 0 {
        bail!("server.session_idle_secs must be > 0");
    }
    if config.server.max_sessions == 0 {
        bail!("server.max_sessions must be >= 1");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be >= 1");
    }
    if config.embedding.timeout_secs == 0 {
        bail!("embedding.timeout_secs must be > 0");
    }
    if config.embedding.ask_timeout_secs < config.embedding.timeout_secs {
        bail!("embedding.ask_timeout_secs must be >= embedding.timeout_secs");
    }

    // Generation
    match config.generation.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if config.generation.is_enabled() && config.generation.model.is_none() {
        bail!(
            "generation.model must be specified when provider is '{}'",
            config.generation.provider
        );
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        bail!("generation.temperature must be in [0.0, 2.0]");
    }
    if config.generation.max_tokens == 0 || config.generation.condense_max_tokens == 0 {
        bail!("generation.max_tokens and generation.condense_max_tokens must be > 0");
    }
    if config.generation.timeout_secs == 0 {
        bail!("generation.timeout_secs must be > 0");
    }
    if config.generation.ask_timeout_secs < config.generation.timeout_secs {
        bail!("generation.ask_timeout_secs must be >= generation.timeout_secs");
    }
    if let Some(template) = &config.generation.condense_template {
        for placeholder in ["{history}", "{question}"] {
            if !template.contains(placeholder) {
                bail!("generation.condense_template must contain {placeholder}");
            }
        }
    }

    // Profiles
    if let Some(name) = &config.profiles.default {
        let builtin = docchat_core::prompt::DomainProfiles::builtin();
        if !builtin.contains(name) && !config.profiles.templates.contains_key(name) {
            bail!("profiles.default '{}' is not a known profile", name);
        }
    }

    // Logging
    match config.logging.format.as_str() {
        "text" | "json" => {}
        other => bail!("logging.format must be text or json, got '{}'", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.chunking.size, 1000);
        assert_eq!(config.chunking.overlap, 100);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.memory.capacity, 5);
        assert_eq!(config.generation.max_tokens, 512);
        assert!((config.generation.temperature - 0.7).abs() < f32::EPSILON);
        assert!(!config.embedding.is_enabled());
        assert_eq!(config.documents.include_globs, vec!["**/*.txt", "**/*.md"]);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        let err = parse_config("[chunking]\nsize = 10\noverlap = 10\n").unwrap_err();
        assert!(err.to_string().contains("chunking.overlap"));
    }

    #[test]
    fn test_enabled_embedding_needs_model_and_dims() {
        let err = parse_config("[embedding]\nprovider = \"ollama\"\nmodel = \"m\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
        let err = parse_config("[embedding]\nprovider = \"openai\"\ndims = 8\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
        assert!(parse_config("[embedding]\nprovider = \"ollama\"\nmodel = \"m\"\ndims = 8\n").is_ok());
    }

    #[test]
    fn test_ask_timeout_must_cover_one_attempt() {
        let err = parse_config("[embedding]\ntimeout_secs = 10\nask_timeout_secs = 5\n").unwrap_err();
        assert!(err.to_string().contains("embedding.ask_timeout_secs"));

        let err = parse_config("[generation]\ntimeout_secs = 400\n").unwrap_err();
        assert!(err.to_string().contains("generation.ask_timeout_secs"));

        let config = parse_config("[generation]\ntimeout_secs = 90\nask_timeout_secs = 400\n").unwrap();
        assert_eq!(config.generation.ask_timeout_secs, 400);
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse_config("[generation]\nprovider = \"magic\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown generation provider"));
    }

    #[test]
    fn test_profiles_section() {
        let config = parse_config(
            "[profiles]\ndefault = \"legal\"\n\n[profiles.templates]\nlegal = \"You are a legal assistant.\"\n",
        )
        .unwrap();
        assert_eq!(config.profiles.default.as_deref(), Some("legal"));
        assert!(parse_config("[profiles]\ndefault = \"nope\"\n").is_err());
        assert!(parse_config("[profiles]\ndefault = \"faq\"\n").is_ok());
    }

    #[test]
    fn test_condense_template_placeholders() {
        assert!(parse_config("[generation]\ncondense_template = \"{question}\"\n").is_err());
    }
}
