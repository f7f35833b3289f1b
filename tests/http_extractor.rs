mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use common::{call, config};
use gradegate::extractor::http::HttpExtractorDefinition;
use gradegate::extractor::{
    ExtractError, ExtractRequest, Extractor, ExtractorChain, HttpExtractor, Intent,
};
use gradegate::guardrails::DEFAULT_ORDER;
use gradegate::model::Role;
use gradegate::{app, build_state};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

type Seen = Arc<Mutex<Vec<Value>>>;

// Mock extraction service. `/ok` wants the bearer token and answers with a
// summary intent for student 2; the other routes misbehave in one way each.
async fn start_mock_service() -> (String, Seen, JoinHandle<()>) {
    async fn ok(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Result<Json<Value>, StatusCode> {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if auth != "Bearer s3cret" {
            return Err(StatusCode::UNAUTHORIZED);
        }
        seen.lock().unwrap().push(body);
        Ok(Json(json!({
            "intent": "summary",
            "entities": {"student_id": "2", "disciplina_id": 1}
        })))
    }
    async fn garbage() -> &'static str {
        "<html>upstream exploded</html>"
    }
    async fn blocked_label() -> Json<Value> {
        Json(json!({"intent": "blocked", "entities": {}}))
    }
    async fn slow() -> Json<Value> {
        tokio::time::sleep(Duration::from_secs(3)).await;
        Json(json!({"intent": "class_report", "entities": {}}))
    }
    async fn unavailable() -> StatusCode {
        StatusCode::SERVICE_UNAVAILABLE
    }

    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/ok", post(ok))
        .route("/garbage", post(garbage))
        .route("/blocked", post(blocked_label))
        .route("/slow", post(slow))
        .route("/unavailable", post(unavailable))
        .with_state(seen.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), seen, handle)
}

fn definition(base: &str, path: &str, token: Option<&str>, timeout_ms: u64) -> HttpExtractorDefinition {
    HttpExtractorDefinition {
        url: format!("{}{}", base, path),
        bearer_token: token.map(str::to_string),
        timeout_ms,
        request_template: None,
    }
}

fn chain(def: HttpExtractorDefinition, budget_ms: u64) -> ExtractorChain {
    let extractor = HttpExtractor::new(def).unwrap();
    ExtractorChain::new(Some(Arc::new(extractor)), budget_ms)
}

fn student(message: &str) -> ExtractRequest<'_> {
    ExtractRequest {
        message,
        actor_id: 2,
        role: Role::Student,
        name: "João Silva",
    }
}

#[tokio::test]
async fn structured_reply_is_used_and_request_is_rendered() {
    let (base, seen, handle) = start_mock_service().await;
    let chain = chain(definition(&base, "/ok", Some("s3cret"), 1000), 1000);
    assert_eq!(chain.primary_name(), Some("http"));

    // The keyword extractor would call this a grade listing.
    let out = chain.extract(&student("Quero ver as minhas notas")).await;
    assert_eq!(out.intent, Intent::Summary);
    assert_eq!(out.entities.student_id, Some(2));
    assert_eq!(out.entities.disciplina_id, Some(1));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0]["message"], "Quero ver as minhas notas");
    assert_eq!(seen[0]["role"], "student");
    assert_eq!(seen[0]["actorId"], 2);
    assert_eq!(seen[0]["name"], "João Silva");
    handle.abort();
}

#[tokio::test]
async fn extractor_errors_are_typed() {
    let (base, _seen, handle) = start_mock_service().await;
    let req = student("Qual é a minha média?");

    let no_token = HttpExtractor::new(definition(&base, "/ok", None, 1000)).unwrap();
    assert!(matches!(no_token.extract(&req).await, Err(ExtractError::Status(401))));

    let down = HttpExtractor::new(definition(&base, "/unavailable", None, 1000)).unwrap();
    assert!(matches!(down.extract(&req).await, Err(ExtractError::Status(503))));

    let garbage = HttpExtractor::new(definition(&base, "/garbage", None, 1000)).unwrap();
    assert!(matches!(garbage.extract(&req).await, Err(ExtractError::Parse(_))));

    let slow = HttpExtractor::new(definition(&base, "/slow", None, 100)).unwrap();
    assert!(matches!(slow.extract(&req).await, Err(ExtractError::Network(_))));
    handle.abort();
}

#[tokio::test]
async fn malformed_reply_falls_back_to_keywords() {
    let (base, _seen, handle) = start_mock_service().await;
    for path in ["/garbage", "/unavailable"] {
        let chain = chain(definition(&base, path, None, 1000), 1000);
        let out = chain.extract(&student("Qual é a minha média?")).await;
        assert_eq!(out.intent, Intent::Summary, "{path}");
    }
    handle.abort();
}

#[tokio::test]
async fn late_reply_falls_back_to_keywords() {
    let (base, _seen, handle) = start_mock_service().await;
    // Client timeout well above the budget, so only the budget can cut it off.
    let chain = chain(definition(&base, "/slow", None, 10_000), 150);
    let started = std::time::Instant::now();
    let out = chain.extract(&student("Quero ver as minhas notas")).await;
    assert_eq!(out.intent, Intent::QueryGrades);
    assert!(started.elapsed() < Duration::from_secs(2));
    handle.abort();
}

#[tokio::test]
async fn remote_blocked_label_is_not_trusted() {
    let (base, _seen, handle) = start_mock_service().await;
    let chain = chain(definition(&base, "/blocked", None, 1000), 1000);
    let out = chain.extract(&student("Quero ver as minhas notas")).await;
    assert_eq!(out.intent, Intent::Fallback);
    handle.abort();
}

#[tokio::test]
async fn chat_uses_configured_remote_extractor() {
    let (base, seen, handle) = start_mock_service().await;
    let mut cfg = config(&DEFAULT_ORDER, true);
    cfg.guardrail_config.extractor = Some(definition(&base, "/ok", Some("s3cret"), 1000));
    let app = app(build_state(cfg).unwrap());

    let (status, v) = call(
        &app,
        "POST",
        "/agent/chat",
        Some(json!({"user_id": 1, "message": "olá, tudo bem?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{v}");
    assert_eq!(v["blocked"], false);
    assert_eq!(v["intent"], "summary");
    assert_eq!(seen.lock().unwrap()[0]["role"], "teacher");

    // The pre-check still runs before the remote extractor is consulted.
    let (_, v) = call(
        &app,
        "POST",
        "/agent/chat",
        Some(json!({"user_id": 1, "message": "quero apagar a nota 3"})),
    )
    .await;
    assert_eq!(v["blocked"], true);
    assert_eq!(seen.lock().unwrap().len(), 1);
    handle.abort();
}
