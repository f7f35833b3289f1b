//! Shared helpers; not every test binary uses all of them.
#![allow(dead_code)]

use std::collections::HashMap;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use gradegate::guardrails::{GuardrailConfig, DEFAULT_ORDER};
use gradegate::store::GradebookSnapshot;
use gradegate::{app, build_state, AppConfig, AppState, RotationConfig};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

pub const TOKEN: &str = "test";

/// Tracks environment variable mutations and restores originals on drop.
pub struct EnvGuard {
    originals: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            originals: HashMap::new(),
        }
    }

    pub fn set(&mut self, key: &str, value: &str) {
        self.capture(key);
        std::env::set_var(key, value);
    }

    pub fn set_many(&mut self, entries: &[(&str, &str)]) {
        for (key, value) in entries {
            self.set(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.capture(key);
        std::env::remove_var(key);
    }

    fn capture(&mut self, key: &str) {
        if self.originals.contains_key(key) {
            return;
        }
        let original = std::env::var(key).ok();
        self.originals.insert(key.to_string(), original);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, original) in self.originals.drain() {
            match original {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
}

/// Teacher 1 (Ana); students 2 (João), 3 (Maria), 4 (Pedro, no grades).
/// 10A holds João and Maria, 11B holds Pedro. João has 10 and 20, Maria 15.
pub fn school_json() -> Value {
    json!({
        "users": [
            {"id": 1, "name": "Ana Professora", "role": "teacher"},
            {"id": 2, "name": "João Silva", "role": "student"},
            {"id": 3, "name": "Maria Santos", "role": "student"},
            {"id": 4, "name": "Pedro Costa", "role": "student"}
        ],
        "disciplinas": [{"id": 1, "name": "Matemática"}, {"id": 2, "name": "Português"}],
        "turmas": [{"id": 1, "name": "10A"}, {"id": 2, "name": "11B"}],
        "enrollments": [
            {"student_id": 2, "turma_id": 1},
            {"student_id": 3, "turma_id": 1},
            {"student_id": 4, "turma_id": 2}
        ],
        "avaliacoes": [
            {"id": 1, "user_id": 2, "disciplina_id": 1, "turma_id": 1,
             "modulo": "Módulo 1", "descricao": "Teste 1", "valor": 10,
             "date": "2024-01-10T10:00:00Z"},
            {"id": 2, "user_id": 2, "disciplina_id": 1, "turma_id": 1,
             "modulo": "Módulo 2", "descricao": "Teste 2", "valor": 20,
             "date": "2024-02-10T10:00:00Z"},
            {"id": 3, "user_id": 3, "disciplina_id": 1, "turma_id": 1,
             "modulo": "Módulo 1", "descricao": "Teste 1", "valor": 15,
             "date": "2024-01-11T10:00:00Z"}
        ]
    })
}

pub fn school_snapshot() -> GradebookSnapshot {
    serde_json::from_value(school_json()).unwrap()
}

pub fn config(guardrails: &[&str], sanitize_output: bool) -> AppConfig {
    AppConfig {
        seed: Some(school_snapshot()),
        guardrail_config: GuardrailConfig::default(),
        guardrail_order: guardrails.iter().map(|s| s.to_string()).collect(),
        sanitize_output,
        extract_budget_ms: 900,
        stage_warn_ms: 120,
        max_request_bytes: None,
        allowed_tokens: Some([TOKEN.to_string()].into_iter().collect()),
        log_file: None,
        rotation: RotationConfig {
            max_bytes: None,
            keep: 1,
            compress: false,
        },
        log_stdout: false,
        log_sample_n: None,
    }
}

pub fn school_state() -> AppState {
    build_state(config(&DEFAULT_ORDER, true)).unwrap()
}

pub fn school_app() -> Router {
    app(school_state())
}

/// Send one authorized request through the router and decode the JSON reply.
pub async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("Authorization", format!("Bearer {}", TOKEN));
    let req = match body {
        Some(v) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(serde_json::to_vec(&v).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

pub async fn chat(app: &Router, user_id: i64, message: &str) -> Value {
    let (status, body) = call(
        app,
        "POST",
        "/agent/chat",
        Some(json!({"user_id": user_id, "message": message})),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body
}
