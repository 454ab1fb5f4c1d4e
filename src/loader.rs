//! Document loading from a directory tree.
//!
//! Walks `[documents].root`, keeps files matching the include globs and not
//! matching the exclude globs (plus a few always-excluded directories), and
//! turns each into a [`Document`] whose id is the path relative to the root.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::Path;
use tracing::warn;
use walkdir::WalkDir;

use docchat_core::models::Document;

use crate::config::DocumentsConfig;

pub fn load_documents(config: &DocumentsConfig) -> Result<Vec<Document>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Document root does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.include_globs)?;

    let mut excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut documents = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        let size = entry.metadata()?.len();
        if size > config.max_file_bytes {
            warn!(path = %rel_str, size, "skipping file larger than max_file_bytes");
            continue;
        }

        match file_to_document(path, &rel_str) {
            Ok(doc) => documents.push(doc),
            Err(e) => warn!(path = %rel_str, error = %e, "skipping unreadable file"),
        }
    }

    // Deterministic ingestion order
    documents.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(documents)
}

fn file_to_document(path: &Path, relative_path: &str) -> Result<Document> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let modified: DateTime<Utc> = std::fs::metadata(path)?
        .modified()
        .map(DateTime::from)
        .unwrap_or_default();
    let title = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    Ok(Document::new(relative_path, text)
        .with_metadata("title", title)
        .with_metadata("source_url", format!("file://{}", path.display()))
        .with_metadata("modified", modified.to_rfc3339()))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {pattern}"))?);
    }
    Ok(builder.build()?)
}
