//! Intent and entity extraction.
//!
//! An optional remote extractor is tried first within a time budget; any
//! failure falls back to the deterministic keyword extractor, so extraction
//! as a whole never fails.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::model::{ActorId, ClassId, GradeId, Role, SubjectId};

pub mod http;
pub mod keyword;

pub use self::http::HttpExtractor;
pub use self::keyword::KeywordExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    AddGrade,
    UpdateGrade,
    QueryGrades,
    Summary,
    ClassReport,
    /// Always refused by the executor.
    DeleteGrade,
    Fallback,
    /// Set by the pipeline only. Extractors can never produce it.
    Blocked,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::AddGrade => "add_grade",
            Intent::UpdateGrade => "update_grade",
            Intent::QueryGrades => "query_grades",
            Intent::Summary => "summary",
            Intent::ClassReport => "class_report",
            Intent::DeleteGrade => "delete_grade",
            Intent::Fallback => "fallback",
            Intent::Blocked => "blocked",
        }
    }

    /// Map an extractor label to an intent. `blocked` and anything unknown
    /// become `Fallback`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "add_grade" => Intent::AddGrade,
            "update_grade" => Intent::UpdateGrade,
            "query_grades" => Intent::QueryGrades,
            "summary" => Intent::Summary,
            "class_report" => Intent::ClassReport,
            "delete_grade" => Intent::DeleteGrade,
            _ => Intent::Fallback,
        }
    }
}

/// Entities recognised in a request. `*_name` fields are alternates for the
/// matching id and are consumed by name resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Entities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<ActorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grade_id: Option<GradeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disciplina_id: Option<SubjectId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disciplina_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turma_id: Option<ClassId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turma_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modulo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descricao: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

fn lenient_id(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_f64(v: &Value) -> Option<f64> {
    let parsed: Option<f64> = match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn lenient_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Entities {
    /// Decode an entity object from an untrusted source. Numeric strings are
    /// accepted for ids and `valor`; empty strings, nulls and unknown keys are
    /// dropped.
    pub fn from_json(v: &Value) -> Self {
        let Some(map) = v.as_object() else {
            return Self::default();
        };
        let id = |k: &str| map.get(k).and_then(lenient_id);
        let text = |k: &str| map.get(k).and_then(lenient_string);
        Self {
            student_id: id("student_id"),
            student_name: text("student_name"),
            grade_id: id("grade_id"),
            valor: map.get("valor").and_then(lenient_f64),
            disciplina_id: id("disciplina_id"),
            disciplina_name: text("disciplina_name"),
            turma_id: id("turma_id"),
            turma_name: text("turma_name"),
            modulo: text("modulo"),
            descricao: text("descricao"),
            date: text("date"),
        }
    }

    pub fn has_names(&self) -> bool {
        self.student_name.is_some() || self.disciplina_name.is_some() || self.turma_name.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub intent: Intent,
    pub entities: Entities,
}

/// Who is asking, as resolved from the store.
#[derive(Debug, Clone, Copy)]
pub struct ExtractRequest<'a> {
    pub message: &'a str,
    pub actor_id: ActorId,
    pub role: Role,
    pub name: &'a str,
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("failed to read response body: {0}")]
    Read(String),
    #[error("unparseable extractor response: {0}")]
    Parse(String),
    #[error("extraction budget exhausted")]
    Timeout,
}

#[async_trait::async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;
    async fn extract(&self, req: &ExtractRequest<'_>) -> Result<Extraction, ExtractError>;
}

/// Primary extractor (if any) with the keyword extractor as backstop.
#[derive(Clone)]
pub struct ExtractorChain {
    primary: Option<Arc<dyn Extractor>>,
    fallback: KeywordExtractor,
    budget_ms: u64,
}

impl ExtractorChain {
    pub fn new(primary: Option<Arc<dyn Extractor>>, budget_ms: u64) -> Self {
        Self {
            primary,
            fallback: KeywordExtractor,
            budget_ms,
        }
    }

    pub fn keyword_only() -> Self {
        Self::new(None, 0)
    }

    pub fn primary_name(&self) -> Option<&str> {
        self.primary.as_ref().map(|p| p.name())
    }

    pub async fn extract(&self, req: &ExtractRequest<'_>) -> Extraction {
        if let Some(primary) = &self.primary {
            let started = Instant::now();
            let budget = Duration::from_millis(self.budget_ms);
            let outcome = match tokio::time::timeout(budget, primary.extract(req)).await {
                Ok(res) => res,
                Err(_) => Err(ExtractError::Timeout),
            };
            match outcome {
                Ok(extraction) => {
                    tracing::debug!(
                        extractor = %primary.name(),
                        intent = extraction.intent.as_str(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "primary extraction succeeded"
                    );
                    return sanitize_intent(extraction);
                }
                Err(err) => {
                    tracing::warn!(
                        extractor = %primary.name(),
                        error = %err,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "primary extraction failed, using keyword fallback"
                    );
                }
            }
        }
        self.fallback.extract_sync(req)
    }
}

fn sanitize_intent(mut e: Extraction) -> Extraction {
    if e.intent == Intent::Blocked {
        e.intent = Intent::Fallback;
    }
    e
}
