//! Core library for gradegate. Wires the gradebook store, the request
//! pipeline and the direct tool endpoints into an axum router.
//!
//! Every request is checked twice: a cheap text pre-check in front of the
//! executor, and authorization inside each operation. Results are filtered
//! by ownership on the way out for students.

mod config;
pub mod authz;
pub mod error;
pub mod extractor;
pub mod guardrails;
pub mod identity;
pub mod model;
pub mod ops;
pub mod pipeline;
pub mod sanitize;
pub mod store;
pub mod telemetry;
pub mod util;

pub use config::{AppConfig, RotationConfig};

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::extract::rejection::{
    BytesRejection, FailedToBufferBody, JsonRejection, PathRejection, QueryRejection,
};
use axum::extract::{DefaultBodyLimit, Path, Query, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::GradebookError;
use crate::extractor::{Extractor, ExtractorChain, HttpExtractor, Intent};
use crate::guardrails::GuardrailChain;
use crate::identity::NewUser;
use crate::model::{ActorId, ClassId, GradeId, Role, SubjectId};
use crate::ops::{
    AddGrade, ClassReportQuery, DisciplineReportQuery, GradeQuery, ModuleReportQuery, Operation,
    SubjectQuery, SummaryQuery, ToolResult, UpdateGrade,
};
use crate::pipeline::{BlockLayer, Pipeline};
use crate::store::Gradebook;
use crate::telemetry::{DecisionRecord, RotatingWriter, TelemetrySink};

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: i32,
    pub message: String,
    pub http_status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ErrorResponse {
    fn new(error_code: i32, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: message.into(),
            http_status: status.as_u16(),
            kind: None,
        }
    }
}

impl From<GradebookError> for ErrorResponse {
    fn from(err: GradebookError) -> Self {
        let kind = err.kind();
        let code = match kind {
            error::ErrorKind::Validation => 4002,
            error::ErrorKind::ValueOutOfRange => 4003,
            error::ErrorKind::NotFound => 4004,
            error::ErrorKind::RoleViolation => 4030,
            error::ErrorKind::OwnershipViolation => 4031,
            error::ErrorKind::UnknownActor => 4040,
            error::ErrorKind::FeatureNotAvailable => 4050,
            error::ErrorKind::Internal => 5000,
        };
        let message = match &err {
            GradebookError::Internal(detail) => {
                tracing::error!(error = %detail, "internal error");
                "Internal error".to_string()
            }
            other => other.to_string(),
        };
        Self {
            kind: Some(kind.as_str().to_string()),
            ..Self::new(code, kind.http_status(), message)
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.http_status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Request counters and the latency histogram exposed on `/metrics`.
pub struct Metrics {
    requests_total: AtomicU64,
    blocks_total: AtomicU64,
    blocks_identity: AtomicU64,
    blocks_pre_check: AtomicU64,
    blocks_executor: AtomicU64,
    errors_total: AtomicU64,
    hist_buckets: Vec<u64>,
    hist_counts: Vec<AtomicU64>,
    hist_sum_ms: AtomicU64,
    hist_count: AtomicU64,
    process_start_epoch: f64,
    process_start_instant: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        let buckets: Vec<u64> = vec![1, 2, 5, 10, 20, 50, 100, 200, 500, 1000, 2000];
        let start = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            requests_total: AtomicU64::new(0),
            blocks_total: AtomicU64::new(0),
            blocks_identity: AtomicU64::new(0),
            blocks_pre_check: AtomicU64::new(0),
            blocks_executor: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            hist_counts: buckets.iter().map(|_| AtomicU64::new(0)).collect(),
            hist_buckets: buckets,
            hist_sum_ms: AtomicU64::new(0),
            hist_count: AtomicU64::new(0),
            process_start_epoch: start.as_secs_f64(),
            process_start_instant: Instant::now(),
        }
    }

    fn observe(&self, blocked_by: Option<BlockLayer>, errored: bool, latency_ms: u64) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if let Some(layer) = blocked_by {
            self.blocks_total.fetch_add(1, Ordering::Relaxed);
            let counter = match layer {
                BlockLayer::Identity => &self.blocks_identity,
                BlockLayer::PreCheck => &self.blocks_pre_check,
                BlockLayer::Executor => &self.blocks_executor,
            };
            counter.fetch_add(1, Ordering::Relaxed);
        }
        if errored {
            self.errors_total.fetch_add(1, Ordering::Relaxed);
        }
        self.hist_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.hist_count.fetch_add(1, Ordering::Relaxed);
        if let Some(idx) = self.hist_buckets.iter().position(|ub| latency_ms <= *ub) {
            self.hist_counts[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn blocks_total(&self) -> u64 {
        self.blocks_total.load(Ordering::Relaxed)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared across handlers. Cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub book: Arc<Gradebook>,
    pub pipeline: Pipeline,
    pub sanitize_output: bool,
    pub allowed_tokens: Option<HashSet<String>>,
    pub max_request_bytes: Option<usize>,
    pub telemetry: TelemetrySink,
    pub metrics: Arc<Metrics>,
}

/// Build state from an explicit configuration.
pub fn build_state(config: AppConfig) -> anyhow::Result<AppState> {
    let AppConfig {
        seed,
        guardrail_config,
        guardrail_order,
        sanitize_output,
        extract_budget_ms,
        stage_warn_ms,
        max_request_bytes,
        allowed_tokens,
        log_file,
        rotation,
        log_stdout,
        log_sample_n,
    } = config;

    let book = match seed {
        Some(snapshot) => {
            Gradebook::from_snapshot(snapshot).context("invalid GRADEGATE_SEED_FILE contents")?
        }
        None => {
            tracing::warn!("GRADEGATE_SEED_FILE not set; starting with an empty gradebook");
            Gradebook::new()
        }
    };
    let book = Arc::new(book);

    let guardrails = GuardrailChain::new(&guardrail_order, &guardrail_config, stage_warn_ms);
    let primary: Option<Arc<dyn Extractor>> = match guardrail_config.extractor.clone() {
        Some(def) => {
            let http = HttpExtractor::new(def).context("failed to build HTTP extractor client")?;
            Some(Arc::new(http))
        }
        None => None,
    };
    let extractor = ExtractorChain::new(primary, extract_budget_ms);
    let pipeline = Pipeline::new(
        book.clone(),
        guardrails,
        extractor,
        sanitize_output,
        stage_warn_ms,
    );

    let writer = match log_file.as_deref() {
        Some(path) => {
            match RotatingWriter::open(path, rotation.max_bytes, rotation.keep, rotation.compress) {
                Ok(w) => Some(w),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "failed to open LOG_FILE; decision log disabled");
                    None
                }
            }
        }
        None => {
            tracing::warn!("decision log disabled: LOG_FILE not set");
            None
        }
    };
    let telemetry = TelemetrySink::new(writer, log_stdout, log_sample_n);

    Ok(AppState {
        book,
        pipeline,
        sanitize_output,
        allowed_tokens,
        max_request_bytes,
        telemetry,
        metrics: Arc::new(Metrics::new()),
    })
}

/// Build state from environment variables (see `AppConfig::from_env`).
pub fn build_state_from_env() -> anyhow::Result<AppState> {
    build_state(AppConfig::from_env()?)
}

pub fn app(state: AppState) -> Router {
    let max_request_bytes = state.max_request_bytes;

    let api = Router::new()
        .route("/agent/chat", post(chat_handler))
        .route("/tools/grades/add", post(add_grade_handler))
        .route("/tools/grades/update", post(update_grade_handler))
        .route("/tools/grades/query", post(query_grades_handler))
        .route("/tools/grades/by-subject", post(grades_by_subject_handler))
        .route("/tools/grades/summary/:student_id", get(summary_handler))
        .route("/tools/grades/:grade_id", delete(delete_grade_handler))
        .route("/tools/reports/class", post(class_report_handler))
        .route("/tools/reports/discipline", post(discipline_report_handler))
        .route("/tools/reports/module", post(module_report_handler))
        .route("/tools/turmas", get(list_classes_handler))
        .route("/tools/turmas/:class_id/students", get(class_students_handler))
        .route("/tools/students/search", get(search_students_handler))
        .route("/users", post(create_user_handler).get(list_users_handler))
        .route("/users/:id", get(get_user_handler))
        .route("/users/:id/details", get(user_details_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), guard_request));

    let router = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .merge(api);

    let router = if let Some(limit) = max_request_bytes {
        router.layer(DefaultBodyLimit::max(limit))
    } else {
        router
    };

    router.with_state(state)
}

fn authorization_error() -> ErrorResponse {
    ErrorResponse::new(2001, StatusCode::UNAUTHORIZED, "Unauthorized")
}

fn extract_bearer_token(headers: &HeaderMap) -> Result<String, ErrorResponse> {
    let raw = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(authorization_error)?;

    if raw.len() < 7 || !raw[..6].eq_ignore_ascii_case("bearer") {
        return Err(authorization_error());
    }
    let token = raw[6..].trim();
    if token.is_empty() {
        return Err(authorization_error());
    }
    Ok(token.to_string())
}

fn ensure_authorized(
    headers: &HeaderMap,
    allowed_tokens: Option<&HashSet<String>>,
) -> Result<(), ErrorResponse> {
    let token = extract_bearer_token(headers)?;
    if let Some(tokens) = allowed_tokens {
        if !tokens.contains(&token) {
            return Err(authorization_error());
        }
    }
    Ok(())
}

fn too_large(message: String) -> ErrorResponse {
    ErrorResponse::new(4001, StatusCode::PAYLOAD_TOO_LARGE, message)
}

/// Size guard on the declared Content-Length, then bearer auth.
async fn guard_request(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(limit) = state.max_request_bytes {
        let declared = request
            .headers()
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if let Some(clen) = declared.filter(|clen| *clen > limit) {
            return too_large(format!(
                "Request too large ({} bytes > limit {} bytes)",
                clen, limit
            ))
            .into_response();
        }
    }
    if let Err(err) = ensure_authorized(request.headers(), state.allowed_tokens.as_ref()) {
        return err.into_response();
    }
    next.run(request).await
}

fn json_body<T>(
    state: &AppState,
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, ErrorResponse> {
    match payload {
        Ok(Json(inner)) => Ok(inner),
        Err(JsonRejection::BytesRejection(BytesRejection::FailedToBufferBody(
            FailedToBufferBody::LengthLimitError(_),
        ))) => {
            tracing::warn!(limit = ?state.max_request_bytes, "request body exceeded configured limit");
            Err(too_large(match state.max_request_bytes {
                Some(limit) => format!("Request too large (body exceeded limit {} bytes)", limit),
                None => "Request too large".to_string(),
            }))
        }
        Err(rejection) => Err(malformed_input(rejection.status(), rejection.body_text())),
    }
}

fn malformed_input(status: StatusCode, message: String) -> ErrorResponse {
    ErrorResponse {
        kind: Some(error::ErrorKind::Validation.as_str().to_string()),
        ..ErrorResponse::new(4000, status, message)
    }
}

fn path_param<T>(param: Result<Path<T>, PathRejection>) -> Result<T, ErrorResponse> {
    param
        .map(|Path(inner)| inner)
        .map_err(|rejection| malformed_input(rejection.status(), rejection.body_text()))
}

fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, ErrorResponse> {
    params
        .map(|Query(inner)| inner)
        .map_err(|rejection| malformed_input(rejection.status(), rejection.body_text()))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(alias = "actor_id")]
    pub user_id: ActorId,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub blocked: bool,
    pub intent: Intent,
    pub tool_result: Option<ToolResult>,
    pub error: Option<String>,
}

async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ErrorResponse> {
    let req = json_body(&state, payload)?;
    if req.message.trim().is_empty() {
        return Err(GradebookError::validation("message must not be empty").into());
    }
    let start = Instant::now();
    let run = state.pipeline.run(req.user_id, &req.message).await;
    let latency_ms = start.elapsed().as_millis() as u64;

    state
        .metrics
        .observe(run.blocked_by, run.error.is_some(), latency_ms);
    state
        .telemetry
        .emit(&DecisionRecord::from_run(&run, "/agent/chat", latency_ms));

    Ok(Json(ChatResponse {
        response: run.response.unwrap_or_default(),
        blocked: run.blocked,
        intent: run.intent,
        tool_result: run.tool_result,
        error: run.error,
    }))
}

/// Run one operation for the direct API: same executor, same output filter,
/// same decision log as the conversational path.
fn run_direct(
    state: &AppState,
    path: &str,
    requester: ActorId,
    op: Operation,
) -> Result<Json<ToolResult>, ErrorResponse> {
    let start = Instant::now();
    let outcome = ops::execute(&state.book, requester, &op).and_then(|result| {
        if !state.sanitize_output {
            return Ok(result);
        }
        let role = identity::resolve_identity(&state.book, requester)?.role;
        sanitize::sanitize(role, requester, result).ok_or(GradebookError::OwnershipViolation {
            requester_id: requester,
            target_id: requester,
        })
    });
    let latency_ms = start.elapsed().as_millis() as u64;

    let blocked_by = match &outcome {
        Err(GradebookError::UnknownActor(_)) => Some(BlockLayer::Identity),
        Err(err) if err.is_blocking() => Some(BlockLayer::Executor),
        _ => None,
    };
    let error_kind = outcome.as_ref().err().map(|e| e.kind());
    if let Err(err @ GradebookError::Internal(_)) = &outcome {
        tracing::warn!(actor_id = requester, op = op.name(), error = %err, "direct operation failed");
    }
    state.metrics.observe(
        blocked_by,
        error_kind.is_some() && blocked_by.is_none(),
        latency_ms,
    );
    state.telemetry.emit(&DecisionRecord {
        intent: Some(op.name().to_string()),
        blocked: blocked_by.is_some(),
        blocked_by: blocked_by.map(|l| l.as_str().to_string()),
        error: error_kind.map(|k| k.as_str().to_string()),
        ..DecisionRecord::new(requester, path, latency_ms)
    });
    outcome.map(Json).map_err(ErrorResponse::from)
}

#[derive(Debug, Deserialize)]
struct AddGradeBody {
    #[serde(alias = "requester_id")]
    teacher_id: ActorId,
    #[serde(flatten)]
    grade: AddGrade,
}

#[derive(Debug, Deserialize)]
struct UpdateGradeBody {
    #[serde(alias = "requester_id")]
    teacher_id: ActorId,
    #[serde(flatten)]
    update: UpdateGrade,
}

#[derive(Debug, Deserialize)]
struct QueryGradesBody {
    requester_id: ActorId,
    #[serde(flatten)]
    query: GradeQuery,
}

#[derive(Debug, Deserialize)]
struct SubjectGradesBody {
    requester_id: ActorId,
    #[serde(flatten)]
    query: SubjectQuery,
}

#[derive(Debug, Deserialize)]
struct ClassReportBody {
    #[serde(alias = "requester_id")]
    teacher_id: ActorId,
    #[serde(flatten)]
    query: ClassReportQuery,
}

#[derive(Debug, Deserialize)]
struct DisciplineReportBody {
    #[serde(alias = "requester_id")]
    teacher_id: ActorId,
    #[serde(flatten)]
    query: DisciplineReportQuery,
}

#[derive(Debug, Deserialize)]
struct ModuleReportBody {
    #[serde(alias = "requester_id")]
    teacher_id: ActorId,
    #[serde(flatten)]
    query: ModuleReportQuery,
}

#[derive(Debug, Deserialize)]
struct SummaryParams {
    requester_id: ActorId,
    #[serde(default, alias = "subject_id")]
    disciplina_id: Option<SubjectId>,
}

#[derive(Debug, Deserialize)]
struct RequesterParams {
    #[serde(default, alias = "teacher_id")]
    requester_id: Option<ActorId>,
}

#[derive(Debug, Deserialize)]
struct RequiredRequester {
    requester_id: ActorId,
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    requester_id: ActorId,
    name: String,
}

#[derive(Debug, Deserialize)]
struct RoleParams {
    #[serde(default)]
    role: Option<Role>,
}

async fn add_grade_handler(
    State(state): State<AppState>,
    payload: Result<Json<AddGradeBody>, JsonRejection>,
) -> Result<Json<ToolResult>, ErrorResponse> {
    let body = json_body(&state, payload)?;
    run_direct(
        &state,
        "/tools/grades/add",
        body.teacher_id,
        Operation::AddGrade(body.grade),
    )
}

async fn update_grade_handler(
    State(state): State<AppState>,
    payload: Result<Json<UpdateGradeBody>, JsonRejection>,
) -> Result<Json<ToolResult>, ErrorResponse> {
    let body = json_body(&state, payload)?;
    run_direct(
        &state,
        "/tools/grades/update",
        body.teacher_id,
        Operation::UpdateGrade(body.update),
    )
}

async fn query_grades_handler(
    State(state): State<AppState>,
    payload: Result<Json<QueryGradesBody>, JsonRejection>,
) -> Result<Json<ToolResult>, ErrorResponse> {
    let body = json_body(&state, payload)?;
    run_direct(
        &state,
        "/tools/grades/query",
        body.requester_id,
        Operation::QueryGrades(body.query),
    )
}

async fn grades_by_subject_handler(
    State(state): State<AppState>,
    payload: Result<Json<SubjectGradesBody>, JsonRejection>,
) -> Result<Json<ToolResult>, ErrorResponse> {
    let body = json_body(&state, payload)?;
    run_direct(
        &state,
        "/tools/grades/by-subject",
        body.requester_id,
        Operation::GradesBySubject(body.query),
    )
}

async fn summary_handler(
    State(state): State<AppState>,
    student_id: Result<Path<ActorId>, PathRejection>,
    params: Result<Query<SummaryParams>, QueryRejection>,
) -> Result<Json<ToolResult>, ErrorResponse> {
    let student_id = path_param(student_id)?;
    let params = query_params(params)?;
    run_direct(
        &state,
        "/tools/grades/summary",
        params.requester_id,
        Operation::Summary(SummaryQuery {
            student_id,
            subject_id: params.disciplina_id,
        }),
    )
}

async fn class_report_handler(
    State(state): State<AppState>,
    payload: Result<Json<ClassReportBody>, JsonRejection>,
) -> Result<Json<ToolResult>, ErrorResponse> {
    let body = json_body(&state, payload)?;
    run_direct(
        &state,
        "/tools/reports/class",
        body.teacher_id,
        Operation::ClassReport(body.query),
    )
}

async fn discipline_report_handler(
    State(state): State<AppState>,
    payload: Result<Json<DisciplineReportBody>, JsonRejection>,
) -> Result<Json<ToolResult>, ErrorResponse> {
    let body = json_body(&state, payload)?;
    run_direct(
        &state,
        "/tools/reports/discipline",
        body.teacher_id,
        Operation::DisciplineReport(body.query),
    )
}

async fn module_report_handler(
    State(state): State<AppState>,
    payload: Result<Json<ModuleReportBody>, JsonRejection>,
) -> Result<Json<ToolResult>, ErrorResponse> {
    let body = json_body(&state, payload)?;
    run_direct(
        &state,
        "/tools/reports/module",
        body.teacher_id,
        Operation::ModuleReport(body.query),
    )
}

/// Always refused. Malformed ids or parameters are read leniently so that
/// every call gets the same refusal.
async fn delete_grade_handler(
    State(state): State<AppState>,
    grade_id: Result<Path<String>, PathRejection>,
    params: Result<Query<RequesterParams>, QueryRejection>,
) -> Result<Json<ToolResult>, ErrorResponse> {
    let grade_id = grade_id
        .ok()
        .and_then(|Path(raw)| raw.trim().parse::<GradeId>().ok());
    let requester = params
        .ok()
        .and_then(|Query(p)| p.requester_id)
        .unwrap_or_default();
    run_direct(
        &state,
        "/tools/grades/delete",
        requester,
        Operation::DeleteGrade { grade_id },
    )
}

async fn create_user_handler(
    State(state): State<AppState>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<Response, ErrorResponse> {
    let new = json_body(&state, payload)?;
    let created = identity::create_user(&state.book, &new)?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

async fn list_users_handler(
    State(state): State<AppState>,
    params: Result<Query<RoleParams>, QueryRejection>,
) -> Result<Json<Vec<model::Actor>>, ErrorResponse> {
    let params = query_params(params)?;
    Ok(Json(identity::list_users(&state.book, params.role)?))
}

async fn get_user_handler(
    State(state): State<AppState>,
    id: Result<Path<ActorId>, PathRejection>,
) -> Result<Json<model::Actor>, ErrorResponse> {
    let id = path_param(id)?;
    Ok(Json(identity::get_user(&state.book, id)?))
}

async fn user_details_handler(
    State(state): State<AppState>,
    id: Result<Path<ActorId>, PathRejection>,
) -> Result<Json<identity::UserDetails>, ErrorResponse> {
    let id = path_param(id)?;
    Ok(Json(identity::user_with_classes(&state.book, id)?))
}

async fn list_classes_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<model::Class>>, ErrorResponse> {
    Ok(Json(identity::list_classes(&state.book)?))
}

async fn class_students_handler(
    State(state): State<AppState>,
    class_id: Result<Path<ClassId>, PathRejection>,
    params: Result<Query<RequiredRequester>, QueryRejection>,
) -> Result<Json<Vec<model::Actor>>, ErrorResponse> {
    let class_id = path_param(class_id)?;
    let params = query_params(params)?;
    Ok(Json(identity::students_in_class(
        &state.book,
        params.requester_id,
        class_id,
    )?))
}

async fn search_students_handler(
    State(state): State<AppState>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> Result<Json<Vec<model::Actor>>, ErrorResponse> {
    let params = query_params(params)?;
    Ok(Json(identity::find_student_by_name(
        &state.book,
        params.requester_id,
        &params.name,
    )?))
}

/// Readiness / liveness. Unauthenticated.
async fn healthz_handler(State(state): State<AppState>) -> Response {
    let json = serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "guardrails": state.pipeline.guardrail_names(),
        "extractor": state.pipeline.extractor_name(),
        "sanitize": state.sanitize_output,
    });
    (StatusCode::OK, Json(json)).into_response()
}

/// Prometheus text exposition.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    use std::fmt::Write as _;
    let m = &state.metrics;
    let mut buf = String::new();

    let counters: [(&str, &str, u64); 5] = [
        (
            "gradegate_requests_total",
            "Requests handled (chat and direct)",
            m.requests_total.load(Ordering::Relaxed),
        ),
        (
            "gradegate_blocks_total",
            "Requests refused by any layer",
            m.blocks_total.load(Ordering::Relaxed),
        ),
        (
            "gradegate_errors_total",
            "Requests that ended in a non-blocking error",
            m.errors_total.load(Ordering::Relaxed),
        ),
        (
            "gradegate_decision_lines_total",
            "Decision log lines written",
            state.telemetry.lines_total(),
        ),
        (
            "gradegate_decision_write_errors_total",
            "Decision log write failures",
            state.telemetry.write_errors_total(),
        ),
    ];
    for (name, help, value) in counters {
        writeln!(buf, "# HELP {} {}", name, help).ok();
        writeln!(buf, "# TYPE {} counter", name).ok();
        writeln!(buf, "{} {}", name, value).ok();
    }

    writeln!(
        buf,
        "# HELP gradegate_layer_blocks_total Refusals per defence layer\n# TYPE gradegate_layer_blocks_total counter"
    )
    .ok();
    for (layer, counter) in [
        (BlockLayer::Identity, &m.blocks_identity),
        (BlockLayer::PreCheck, &m.blocks_pre_check),
        (BlockLayer::Executor, &m.blocks_executor),
    ] {
        writeln!(
            buf,
            "gradegate_layer_blocks_total{{layer=\"{}\"}} {}",
            layer.as_str(),
            counter.load(Ordering::Relaxed)
        )
        .ok();
    }

    writeln!(
        buf,
        "# HELP gradegate_request_latency_ms Request latency histogram milliseconds\n# TYPE gradegate_request_latency_ms histogram"
    )
    .ok();
    let mut cumulative: u64 = 0;
    for (ub, count) in m.hist_buckets.iter().zip(m.hist_counts.iter()) {
        cumulative += count.load(Ordering::Relaxed);
        writeln!(
            buf,
            "gradegate_request_latency_ms_bucket{{le=\"{}\"}} {}",
            ub, cumulative
        )
        .ok();
    }
    let count = m.hist_count.load(Ordering::Relaxed);
    writeln!(
        buf,
        "gradegate_request_latency_ms_bucket{{le=\"+Inf\"}} {}",
        count
    )
    .ok();
    writeln!(
        buf,
        "gradegate_request_latency_ms_sum {}",
        m.hist_sum_ms.load(Ordering::Relaxed)
    )
    .ok();
    writeln!(buf, "gradegate_request_latency_ms_count {}", count).ok();

    writeln!(
        buf,
        "# HELP gradegate_build_info Build information\n# TYPE gradegate_build_info gauge"
    )
    .ok();
    writeln!(
        buf,
        "gradegate_build_info{{version=\"{}\",schemaVersion=\"{}\"}} 1",
        env!("CARGO_PKG_VERSION"),
        telemetry::SCHEMA_VERSION
    )
    .ok();
    writeln!(
        buf,
        "# HELP gradegate_log_file_size_bytes Size of the active decision log (0 if disabled)\n# TYPE gradegate_log_file_size_bytes gauge"
    )
    .ok();
    writeln!(
        buf,
        "gradegate_log_file_size_bytes {}",
        state.telemetry.file_size_bytes()
    )
    .ok();
    writeln!(
        buf,
        "# HELP gradegate_process_start_time_seconds Process start time (Unix epoch seconds)\n# TYPE gradegate_process_start_time_seconds gauge"
    )
    .ok();
    writeln!(
        buf,
        "gradegate_process_start_time_seconds {}",
        m.process_start_epoch
    )
    .ok();
    writeln!(
        buf,
        "# HELP gradegate_process_uptime_seconds Process uptime seconds\n# TYPE gradegate_process_uptime_seconds gauge"
    )
    .ok();
    writeln!(
        buf,
        "gradegate_process_uptime_seconds {}",
        m.process_start_instant.elapsed().as_secs_f64()
    )
    .ok();

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buf,
    )
        .into_response()
}
