//! HTTP API.
//!
//! Exposes the conversational endpoint and session management as JSON over
//! HTTP. Sessions are created on the first question and live in memory until
//! deleted or the server stops.
//!
//! # Endpoints
//!
//! | Method   | Path                  | Description |
//! |----------|-----------------------|-------------|
//! | `GET`    | `/health`             | Health check (version, indexed chunks) |
//! | `GET`    | `/profiles`           | Domain profiles and the default |
//! | `POST`   | `/sessions/{id}/ask`  | Ask a question within a session |
//! | `GET`    | `/sessions/{id}`      | Session transcript |
//! | `DELETE` | `/sessions/{id}`      | End a session |
//! | `GET`    | `/stats`              | Query statistics since startup or reset |
//! | `DELETE` | `/stats`              | Reset query statistics |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid input: question must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `embedding_failed` (502), `generation_failed` (502), `internal` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use docchat_core::chain::Answer;
use docchat_core::session::SessionTranscript;
use docchat_core::store::VectorStore;
use docchat_core::RagError;

use crate::engine::Engine;
use crate::monitor::QueryStats;

/// Serve the API on `[server].bind` until the process is terminated.
pub async fn run_server(engine: Arc<Engine>) -> anyhow::Result<()> {
    let bind_addr = engine.config().server.bind.clone();
    tokio::spawn(sweep_sessions(engine.clone()));
    let app = router(engine);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "docchat server listening");
    println!("docchat server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically drop sessions that outlived `[server].session_idle_secs`.
async fn sweep_sessions(engine: Arc<Engine>) {
    let period = Duration::from_secs(engine.config().server.session_idle_secs.clamp(1, 60));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let swept = engine.sessions().sweep_idle();
        if swept > 0 {
            info!(swept, active = engine.sessions().len(), "discarded idle sessions");
        }
    }
}

pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/profiles", get(handle_profiles))
        .route("/sessions/{id}/ask", post(handle_ask))
        .route("/sessions/{id}", get(handle_get_session).delete(handle_end_session))
        .route("/stats", get(handle_stats).delete(handle_reset_stats))
        .layer(cors)
        .with_state(engine)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let (status, code) = match &err {
            RagError::InvalidInput(_) | RagError::InvalidConfiguration(_) => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            RagError::EmbeddingFailure { .. } => (StatusCode::BAD_GATEWAY, "embedding_failed"),
            RagError::GenerationFailure { .. } => (StatusCode::BAD_GATEWAY, "generation_failed"),
            RagError::DimensionMismatch { .. } | RagError::Store(_) => {
                error!(error = %err, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    indexed_chunks: usize,
}

async fn handle_health(State(engine): State<Arc<Engine>>) -> Result<Json<HealthResponse>, AppError> {
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        indexed_chunks: engine.index().len().await?,
    }))
}

// ============ GET /profiles ============

#[derive(Serialize)]
struct ProfileInfo {
    name: String,
    system_prompt: String,
}

#[derive(Serialize)]
struct ProfilesResponse {
    default: String,
    profiles: Vec<ProfileInfo>,
}

async fn handle_profiles(State(engine): State<Arc<Engine>>) -> Json<ProfilesResponse> {
    let profiles = engine.profiles();
    Json(ProfilesResponse {
        default: profiles.default_name().to_string(),
        profiles: profiles
            .names()
            .into_iter()
            .map(|name| ProfileInfo {
                name: name.to_string(),
                system_prompt: profiles.template(name).unwrap_or_default().to_string(),
            })
            .collect(),
    })
}

// ============ POST /sessions/{id}/ask ============

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    profile: Option<String>,
}

#[derive(Serialize)]
struct AskResponse {
    session_id: String,
    #[serde(flatten)]
    answer: Answer,
}

async fn handle_ask(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let answer = engine
        .ask(&id, &req.question, req.profile.as_deref())
        .await?;
    Ok(Json(AskResponse {
        session_id: id,
        answer,
    }))
}

// ============ GET / DELETE /sessions/{id} ============

async fn handle_get_session(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> Result<Json<SessionTranscript>, AppError> {
    let handle = engine
        .sessions()
        .get(&id)
        .ok_or_else(|| not_found(format!("session not found: {id}")))?;
    let transcript = handle.lock().await.transcript();
    Ok(Json(transcript))
}

async fn handle_end_session(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if engine.sessions().end(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("session not found: {id}")))
    }
}

// ============ GET /stats ============

#[derive(Serialize)]
struct StatsResponse {
    queries: QueryStats,
    active_sessions: usize,
    indexed_chunks: usize,
}

async fn handle_stats(State(engine): State<Arc<Engine>>) -> Result<Json<StatsResponse>, AppError> {
    Ok(Json(StatsResponse {
        queries: engine.monitor().stats(),
        active_sessions: engine.sessions().len(),
        indexed_chunks: engine.index().len().await?,
    }))
}

async fn handle_reset_stats(State(engine): State<Arc<Engine>>) -> StatusCode {
    engine.monitor().reset();
    StatusCode::NO_CONTENT
}
