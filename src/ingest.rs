//! The `docchat ingest` command.
//!
//! Loads documents from `[documents].root`, embeds new or changed chunks,
//! and persists the result. By default the persisted index is loaded first
//! so unchanged chunks are not re-embedded; `--full` starts from an empty
//! index and re-embeds everything. Documents that disappeared from disk are
//! removed from the database.

use std::collections::HashSet;

use anyhow::{bail, Result};
use tracing::info;

use docchat_core::chunk::chunk_with;
use docchat_core::ingest::{IngestReport, Ingestor};

use crate::config::Config;
use crate::db;
use crate::embedding::create_embedder;
use crate::engine::{chunking_params, new_index};
use crate::loader::load_documents;
use crate::migrate;
use crate::sqlite_store::SqliteIndexStore;

pub async fn run_ingest(config: &Config, full: bool, dry_run: bool) -> Result<IngestReport> {
    let documents = load_documents(&config.documents)?;
    let params = chunking_params(config)?;

    if dry_run {
        let total_chunks: usize = documents
            .iter()
            .map(|d| {
                chunk_with(d, &params)
                    .iter()
                    .filter(|c| !c.text.trim().is_empty())
                    .count()
            })
            .sum();
        println!("ingest {} (dry-run)", config.documents.root.display());
        println!("  documents found: {}", documents.len());
        println!("  estimated chunks: {}", total_chunks);
        return Ok(IngestReport {
            documents: documents.len(),
            chunks: total_chunks,
            ..IngestReport::default()
        });
    }

    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding].provider to openai or ollama before ingesting.");
    }

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = SqliteIndexStore::new(pool.clone());

    let embedder = create_embedder(&config.embedding)?;
    let model = embedder.model_name().to_string();
    let index = std::sync::Arc::new(new_index(config));
    if !full {
        store.load_into(&index, &model).await?;
    }

    let ingestor = Ingestor::new(params, embedder, index.clone())
        .with_batch_size(config.embedding.batch_size)?;

    let mut report = IngestReport::default();
    for document in &documents {
        let outcome = ingestor.ingest_document(document).await?;
        store.save_document(document, &outcome, &model).await?;

        report.absorb(&outcome);
    }

    let present: HashSet<&str> = documents.iter().map(|d| d.id.as_str()).collect();
    let mut forgotten = 0usize;
    for id in store.document_ids().await? {
        if !present.contains(id.as_str()) {
            store.forget_document(&id).await?;
            forgotten += 1;
        }
    }

    info!(
        documents = report.documents,
        embedded = report.embedded,
        unchanged = report.unchanged,
        forgotten,
        "ingest finished"
    );

    println!("ingest {}", config.documents.root.display());
    println!("  documents: {}", report.documents);
    println!("  chunks: {}", report.chunks);
    println!("  embedded: {}", report.embedded);
    println!("  unchanged: {}", report.unchanged);
    println!("  removed chunks: {}", report.removed);
    println!("  removed documents: {}", forgotten);
    println!("ok");

    pool.close().await;
    Ok(report)
}
