//! Index coverage and query statistics.
//!
//! `docchat stats` prints what is indexed (documents, chunks, embedding
//! coverage per model) and how questions have fared (count, error rate,
//! mean latency, most recent queries) from the `query_log` table.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::monitor::persisted_stats;
use crate::sqlite_store::SqliteIndexStore;

const RECENT_QUERIES: i64 = 5;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let coverage = SqliteIndexStore::new(pool.clone()).coverage().await?;
    let queries = persisted_stats(&pool).await?;
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("docchat stats");
    println!("=============");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", coverage.documents);
    println!("  Chunks:      {}", coverage.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        coverage.embedded,
        coverage.chunks,
        percent(coverage.embedded, coverage.chunks)
    );
    for (model, count) in &coverage.models {
        println!("    {:<28} {:>8}", model, count);
    }

    println!();
    println!("  Queries:     {}", queries.query_count);
    println!(
        "  Errors:      {} ({:.1}%)",
        queries.error_count,
        queries.error_rate * 100.0
    );
    println!("  Mean latency: {:.0} ms", queries.mean_latency_ms);
    println!(
        "  Tokens:      {} (mean {:.1})",
        queries.total_tokens, queries.mean_tokens
    );

    let recent = sqlx::query(
        "SELECT session_id, question, latency_ms, success, created_at \
         FROM query_log ORDER BY id DESC LIMIT ?",
    )
    .bind(RECENT_QUERIES)
    .fetch_all(&pool)
    .await?;

    if !recent.is_empty() {
        println!();
        println!("  Recent queries:");
        println!(
            "  {:<16} {:<8} {:>8}   {}",
            "WHEN", "STATUS", "MS", "QUESTION"
        );
        println!("  {}", "-".repeat(76));
        for row in &recent {
            let status = if row.get::<bool, _>("success") { "ok" } else { "error" };
            println!(
                "  {:<16} {:<8} {:>8}   {}",
                format_ts(row.get("created_at")),
                status,
                row.get::<i64, _>("latency_ms"),
                truncate(&row.get::<String, _>("question"), 44)
            );
        }
    }

    println!();
    pool.close().await;
    Ok(())
}

fn percent(part: i64, whole: i64) -> i64 {
    if whole > 0 {
        (part * 100) / whole
    } else {
        0
    }
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}
