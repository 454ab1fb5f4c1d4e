//! HTTP API tests driven through the router in-process.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use docchat::config::Config;
use docchat::engine::Engine;
use docchat::monitor::{estimate_tokens, QueryMonitor};
use docchat::server::router;
use docchat_core::chunk::ChunkingParams;
use docchat_core::embedding::Embedder;
use docchat_core::generation::{GenerationParams, Generator};
use docchat_core::ingest::Ingestor;
use docchat_core::models::Document;
use docchat_core::store::memory::InMemoryIndex;
use docchat_core::{RagError, Result};

const VOCAB: &[&str] = &[
    "refund", "refunds", "days", "return", "shipping", "express", "standard", "business",
];

struct Keywords;

#[async_trait]
impl Embedder for Keywords {
    fn model_name(&self) -> &str {
        "keywords"
    }

    fn dims(&self) -> usize {
        VOCAB.len()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let lower = text.to_lowercase();
        Ok(VOCAB
            .iter()
            .map(|w| lower.matches(w).count() as f32)
            .collect())
    }
}

/// Answers by citing the first passage in the prompt's context section,
/// not the marker example in the grounding instructions.
struct Citing {
    fail: bool,
}

#[async_trait]
impl Generator for Citing {
    fn model_name(&self) -> &str {
        "citing"
    }

    async fn generate(&self, prompt: &str, _params: &GenerationParams) -> Result<String> {
        if self.fail {
            return Err(RagError::generation("citing", "upstream returned 503"));
        }
        if !prompt.starts_with("### System") {
            // Condensing request: keep the follow-up as it is.
            let question = prompt
                .lines()
                .find_map(|l| l.strip_prefix("Follow-up question:"))
                .unwrap_or_default();
            return Ok(question.trim().to_string());
        }
        let context = prompt.find("### Context").map_or("", |i| &prompt[i..]);
        let marker = context
            .split("[chunk:")
            .nth(1)
            .and_then(|rest| rest.split(']').next())
            .map(|id| format!(" [chunk:{id}]"))
            .unwrap_or_default();
        Ok(format!("Refunds take 30 days.{marker}"))
    }
}

async fn test_app(fail: bool) -> (Router, Arc<Engine>) {
    test_engine(Config::default(), fail).await
}

async fn test_engine(config: Config, fail: bool) -> (Router, Arc<Engine>) {
    let embedder: Arc<dyn Embedder> = Arc::new(Keywords);
    let index = Arc::new(InMemoryIndex::with_dims(VOCAB.len()));

    let ingestor = Ingestor::new(
        ChunkingParams::new(200, 0).unwrap(),
        embedder.clone(),
        index.clone(),
    );
    ingestor
        .ingest(&[
            Document::new("returns.txt", "Refunds are issued within 30 days of a return.")
                .with_metadata("source_url", "docs/returns.txt"),
            Document::new("shipping.md", "Standard shipping takes 3-5 business days. Express shipping is faster."),
        ])
        .await
        .unwrap();

    let engine = Arc::new(
        Engine::new(
            config,
            embedder,
            Arc::new(Citing { fail }),
            index,
            QueryMonitor::new(),
        )
        .unwrap(),
    );
    (router(engine.clone()), engine)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn ask(session: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/sessions/{session}/ask"))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_indexed_chunks() {
    let (app, _) = test_app(false).await;
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["indexed_chunks"], 2);
}

#[tokio::test]
async fn test_profiles_lists_default() {
    let (app, _) = test_app(false).await;
    let (status, body) = send(&app, get("/profiles")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default"], "customer_service");
    let names: Vec<&str> = body["profiles"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"customer_service"));
    assert!(names.contains(&"technical_support"));
}

#[tokio::test]
async fn test_ask_returns_cited_answer() {
    let (app, engine) = test_app(false).await;
    let (status, body) = send(
        &app,
        ask("s1", json!({ "question": "How many days for a refund?" })),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["session_id"], "s1");
    assert!(body["text"].as_str().unwrap().starts_with("Refunds take 30 days."));
    let cited = body["cited_chunk_ids"].as_array().unwrap();
    assert_eq!(cited.len(), 1);

    let top = engine.index().entries();
    let returns_chunk = top
        .iter()
        .find(|e| e.chunk.document_id == "returns.txt")
        .unwrap();
    assert_eq!(cited[0], returns_chunk.chunk.id.as_str());
    assert_eq!(engine.monitor().stats().query_count, 1);
}

#[tokio::test]
async fn test_blank_question_is_bad_request() {
    let (app, engine) = test_app(false).await;
    let (status, body) = send(&app, ask("s1", json!({ "question": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(engine.monitor().stats().error_count, 1);
}

#[tokio::test]
async fn test_generation_failure_is_bad_gateway() {
    let (app, engine) = test_app(true).await;
    let (status, body) = send(&app, ask("s1", json!({ "question": "refund?" }))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["code"], "generation_failed");

    // The failed exchange is not remembered.
    let (status, transcript) = send(&app, get("/sessions/s1")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(transcript["turns"].as_array().unwrap().is_empty());
    assert!(engine.monitor().stats().error_rate > 0.99);
}

#[tokio::test]
async fn test_session_transcript_and_profile() {
    let (app, _) = test_app(false).await;
    send(
        &app,
        ask("s2", json!({ "question": "refund days?", "profile": "faq" })),
    )
    .await;
    send(&app, ask("s2", json!({ "question": "and for a return?" }))).await;

    let (status, body) = send(&app, get("/sessions/s2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "s2");
    assert_eq!(body["profile"], "faq");
    let turns = body["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0]["question"], "refund days?");
    assert_eq!(turns[1]["question"], "and for a return?");
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let (app, _) = test_app(false).await;
    let (status, body) = send(&app, get("/sessions/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_delete_session() {
    let (app, engine) = test_app(false).await;
    send(&app, ask("s3", json!({ "question": "shipping days?" }))).await;
    assert_eq!(engine.sessions().len(), 1);

    let (status, _) = send(&app, delete("/sessions/s3")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(engine.sessions().is_empty());

    let (status, _) = send(&app, delete("/sessions/s3")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stats_counts_queries_and_sessions() {
    let (app, _) = test_app(false).await;
    let mut tokens = 0;
    for (id, question) in [("a", "refund?"), ("b", "shipping?")] {
        let (_, answer) = send(&app, ask(id, json!({ "question": question }))).await;
        tokens += estimate_tokens(answer["text"].as_str().unwrap());
    }

    let (status, body) = send(&app, get("/stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queries"]["query_count"], 2);
    assert_eq!(body["queries"]["error_count"], 0);
    assert_eq!(body["active_sessions"], 2);
    assert_eq!(body["indexed_chunks"], 2);
    assert!(tokens > 0);
    assert_eq!(body["queries"]["total_tokens"], tokens);
    assert!(body["queries"]["uptime_seconds"].as_f64().unwrap() >= 0.0);

    let (status, _) = send(&app, delete("/stats")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, body) = send(&app, get("/stats")).await;
    assert_eq!(body["queries"]["query_count"], 0);
    assert_eq!(body["active_sessions"], 2);
}

#[tokio::test]
async fn test_session_cap_bounds_http_sessions() {
    let mut config = Config::default();
    config.server.max_sessions = 2;
    let engine = Engine::new(
        config,
        Arc::new(Keywords),
        Arc::new(Citing { fail: false }),
        Arc::new(InMemoryIndex::with_dims(VOCAB.len())),
        QueryMonitor::new(),
    )
    .unwrap()
    .with_session_limits()
    .unwrap();
    let engine = Arc::new(engine);
    let app = router(engine.clone());

    for id in ["a", "b", "c", "d"] {
        let (status, _) = send(&app, ask(id, json!({ "question": "refund?" }))).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(engine.sessions().len(), 2);
    assert_eq!(engine.sessions().ids(), vec!["c", "d"]);

    let (status, _) = send(&app, get("/sessions/a")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
