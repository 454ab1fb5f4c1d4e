//! Per-query usage monitoring.
//!
//! Every answered (or failed) question becomes a [`QueryRecord`]. The
//! monitor keeps running totals plus a bounded window of recent records in
//! memory, and appends each record to the `query_log` table when a pool is
//! attached. [`QueryMonitor::reset`] starts a fresh measurement window
//! without touching `query_log`.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

const RECENT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRecord {
    pub session_id: String,
    pub question: String,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub citations: usize,
    /// Estimated tokens in the answer; 0 for failed questions.
    pub tokens: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct QueryStats {
    pub query_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub mean_latency_ms: f64,
    pub total_tokens: u64,
    pub mean_tokens: f64,
    /// Seconds since the monitor started or was last reset. `None` for
    /// totals read back from `query_log`.
    pub uptime_seconds: Option<f64>,
}

impl QueryStats {
    fn from_totals(totals: &Totals) -> Self {
        if totals.queries == 0 {
            return Self::default();
        }
        let n = totals.queries as f64;
        Self {
            query_count: totals.queries,
            error_count: totals.errors,
            error_rate: totals.errors as f64 / n,
            mean_latency_ms: totals.latency_ms as f64 / n,
            total_tokens: totals.tokens,
            mean_tokens: totals.tokens as f64 / n,
            uptime_seconds: None,
        }
    }
}

#[derive(Default)]
struct Totals {
    queries: u64,
    errors: u64,
    latency_ms: u64,
    tokens: u64,
    recent: VecDeque<QueryRecord>,
}

pub struct QueryMonitor {
    totals: Mutex<Totals>,
    started: Mutex<Instant>,
    pool: Option<SqlitePool>,
}

impl Default for QueryMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryMonitor {
    /// In-memory only.
    pub fn new() -> Self {
        Self {
            totals: Mutex::new(Totals::default()),
            started: Mutex::new(Instant::now()),
            pool: None,
        }
    }

    /// Also append records to `query_log`.
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self {
            pool: Some(pool),
            ..Self::new()
        }
    }

    pub async fn record(&self, record: QueryRecord) {
        info!(
            session = %record.session_id,
            latency_ms = record.latency_ms,
            success = record.success,
            citations = record.citations,
            "query"
        );

        if let Some(pool) = &self.pool {
            // A logging failure must not fail the question itself.
            if let Err(e) = insert_record(pool, &record).await {
                warn!(error = %e, "failed to write query_log");
            }
        }

        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        totals.queries += 1;
        totals.latency_ms += record.latency_ms;
        totals.tokens += record.tokens;
        if !record.success {
            totals.errors += 1;
        }
        if totals.recent.len() == RECENT_CAPACITY {
            totals.recent.pop_front();
        }
        totals.recent.push_back(record);
    }

    /// Totals since this monitor was created or last reset.
    pub fn stats(&self) -> QueryStats {
        let totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        let started = *self.started.lock().unwrap_or_else(PoisonError::into_inner);
        QueryStats {
            uptime_seconds: Some(started.elapsed().as_secs_f64()),
            ..QueryStats::from_totals(&totals)
        }
    }

    /// Clear totals and recent records and restart the uptime clock.
    pub fn reset(&self) {
        let mut totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        *totals = Totals::default();
        *self.started.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        info!("query statistics reset");
    }

    /// The last `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<QueryRecord> {
        let totals = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = totals.recent.len().saturating_sub(n);
        totals.recent.iter().skip(skip).cloned().collect()
    }
}

async fn insert_record(pool: &SqlitePool, record: &QueryRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO query_log (session_id, question, latency_ms, success, error, citations, tokens, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&record.session_id)
    .bind(&record.question)
    .bind(record.latency_ms as i64)
    .bind(record.success)
    .bind(&record.error)
    .bind(record.citations as i64)
    .bind(record.tokens as i64)
    .bind(record.timestamp.timestamp())
    .execute(pool)
    .await?;
    Ok(())
}

/// Totals over everything in `query_log`.
pub async fn persisted_stats(pool: &SqlitePool) -> Result<QueryStats> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS n,
               COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0) AS errors,
               COALESCE(SUM(latency_ms), 0) AS latency,
               COALESCE(SUM(tokens), 0) AS tokens
        FROM query_log
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(QueryStats::from_totals(&Totals {
        queries: row.get::<i64, _>("n") as u64,
        errors: row.get::<i64, _>("errors") as u64,
        latency_ms: row.get::<i64, _>("latency") as u64,
        tokens: row.get::<i64, _>("tokens") as u64,
        recent: VecDeque::new(),
    }))
}

/// Rough token count of generated text: 1.3 tokens per whitespace word.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.split_whitespace().count() as f64 * 1.3).round() as u64
}
