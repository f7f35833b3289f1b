//! Request pipeline.
//!
//! A run is a fixed sequence of stage functions. Each returns the tag of the
//! state it reached and the driver loop dispatches on that tag:
//!
//! ```text
//! start -> context_loaded -> pre_checked -> intent_parsed -> fields_checked
//!       -> { blocked | awaiting_fields | executed -> sanitized } -> responded
//! ```
//!
//! `blocked` can be reached from context loading, the pre-check and
//! execution. Once blocked, nothing else touches the store or the result.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::GradebookError;
use crate::extractor::{Entities, ExtractRequest, ExtractorChain, Intent};
use crate::guardrails::{GuardrailChain, PreCheck, PreContext};
use crate::identity;
use crate::model::{ActorId, Role};
use crate::ops::{
    self, AddGrade, ClassReportQuery, GradeQuery, Operation, SummaryQuery, UpdateGrade,
};
use crate::sanitize;
use crate::store::Gradebook;

pub mod fields;
pub mod resolve;
pub mod respond;
pub mod state;

pub use self::fields::Field;
pub use self::state::{BlockLayer, PipelineState, RequestContext, Stage, StageTiming};

#[derive(Clone)]
pub struct Pipeline {
    book: Arc<Gradebook>,
    guardrails: GuardrailChain,
    extractor: ExtractorChain,
    sanitize_output: bool,
    stage_warn_ms: u64,
}

impl Pipeline {
    pub fn new(
        book: Arc<Gradebook>,
        guardrails: GuardrailChain,
        extractor: ExtractorChain,
        sanitize_output: bool,
        stage_warn_ms: u64,
    ) -> Self {
        Self {
            book,
            guardrails,
            extractor,
            sanitize_output,
            stage_warn_ms,
        }
    }

    pub fn book(&self) -> &Arc<Gradebook> {
        &self.book
    }

    pub fn guardrail_names(&self) -> Vec<String> {
        self.guardrails.names()
    }

    pub fn extractor_name(&self) -> &str {
        self.extractor.primary_name().unwrap_or("keyword")
    }

    pub async fn run(&self, actor_id: ActorId, message: &str) -> PipelineState {
        let mut state = PipelineState::new(actor_id, message);
        let mut stage = Stage::Start;
        while stage != Stage::Responded {
            let started = Instant::now();
            let next = match stage {
                Stage::Start => self.load_context(&mut state),
                Stage::ContextLoaded => self.pre_check(&mut state),
                Stage::PreChecked => self.parse_intent(&mut state).await,
                Stage::IntentParsed => self.check_fields(&mut state),
                Stage::FieldsChecked => self.execute(&mut state),
                Stage::Executed => self.sanitize(&mut state),
                Stage::Blocked | Stage::AwaitingFields | Stage::Sanitized => {
                    self.respond(&mut state)
                }
                Stage::Responded => Stage::Responded,
            };
            let elapsed = started.elapsed();
            if elapsed.as_millis() as u64 > self.stage_warn_ms {
                tracing::warn!(
                    actor_id,
                    stage = next.as_str(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    warn_ms = self.stage_warn_ms,
                    "pipeline stage exceeded warn threshold"
                );
            }
            state.timings.push(StageTiming {
                stage: next,
                micros: elapsed.as_micros() as u64,
            });
            state.stages.push(next);
            stage = next;
        }
        tracing::info!(
            actor_id,
            intent = state.intent.as_str(),
            blocked = state.blocked,
            blocked_by = state.blocked_by.map(|l| l.as_str()),
            "request handled"
        );
        state
    }

    fn load_context(&self, state: &mut PipelineState) -> Stage {
        match identity::resolve_identity(&self.book, state.context.actor_id) {
            Ok(actor) => {
                state.context.role = Some(actor.role);
                state.context.name = Some(actor.name);
                Stage::ContextLoaded
            }
            Err(err) => {
                tracing::info!(actor_id = state.context.actor_id, error = %err, "unknown actor");
                state.error_kind = Some(err.kind());
                state.block(BlockLayer::Identity, respond::describe_error(&err));
                Stage::Blocked
            }
        }
    }

    fn pre_check(&self, state: &mut PipelineState) -> Stage {
        let Some(role) = state.context.role else {
            state.block(BlockLayer::Identity, respond::UNKNOWN_USER);
            return Stage::Blocked;
        };
        let ctx = PreContext::new(state.context.actor_id, role, &state.context.raw_message);
        let (verdict, _timings) = self.guardrails.check(&ctx);
        match verdict {
            PreCheck::Allow => Stage::PreChecked,
            PreCheck::Block(block) => {
                state.blocked_rule = Some(block.rule);
                state.block(BlockLayer::PreCheck, block.reason);
                Stage::Blocked
            }
        }
    }

    async fn parse_intent(&self, state: &mut PipelineState) -> Stage {
        let role = state.context.role.unwrap_or(Role::Student);
        let name = state.context.name.clone().unwrap_or_default();
        let req = ExtractRequest {
            message: &state.context.raw_message,
            actor_id: state.context.actor_id,
            role,
            name: &name,
        };
        let extraction = self.extractor.extract(&req).await;
        state.intent = extraction.intent;
        state.entities = extraction.entities;
        if role == Role::Student && matches!(state.intent, Intent::QueryGrades | Intent::Summary) {
            state.entities.student_id = Some(state.context.actor_id);
            state.entities.student_name = None;
        }
        tracing::debug!(
            actor_id = state.context.actor_id,
            intent = state.intent.as_str(),
            "intent parsed"
        );
        Stage::IntentParsed
    }

    fn check_fields(&self, state: &mut PipelineState) -> Stage {
        state.missing_fields = fields::missing(state.intent, &state.entities);
        state.ask_missing_fields = !state.missing_fields.is_empty();
        Stage::FieldsChecked
    }

    fn execute(&self, state: &mut PipelineState) -> Stage {
        if state.ask_missing_fields {
            return Stage::AwaitingFields;
        }
        if state.intent == Intent::Fallback {
            return Stage::Executed;
        }
        let actor_id = state.context.actor_id;
        let role = state.context.role.unwrap_or(Role::Student);
        let intent = state.intent;
        let entities = state.entities.clone();
        let outcome = if intent == Intent::DeleteGrade {
            // Refused without opening a transaction.
            build_operation(intent, &entities, actor_id)
                .and_then(|op| ops::execute(&self.book, actor_id, &op))
        } else {
            self.book.transaction(|tx| {
                let resolved = resolve::resolve(tx, entities, role, actor_id);
                let op = build_operation(intent, &resolved, actor_id)?;
                ops::execute_in(tx, actor_id, &op)
            })
        };
        match outcome {
            Ok(result) => {
                state.tool_result = Some(result);
                Stage::Executed
            }
            Err(err) => {
                state.error_kind = Some(err.kind());
                if err.is_blocking() {
                    tracing::info!(actor_id, kind = err.kind().as_str(), "executor refused request");
                    let reason = respond::describe_error(&err);
                    state.error = Some(reason.clone());
                    state.block(BlockLayer::Executor, reason);
                    Stage::Blocked
                } else {
                    if matches!(err, GradebookError::Internal(_)) {
                        tracing::warn!(actor_id, error = %err, "operation failed");
                    }
                    state.error = Some(respond::describe_error(&err));
                    Stage::Executed
                }
            }
        }
    }

    fn sanitize(&self, state: &mut PipelineState) -> Stage {
        if !self.sanitize_output || state.blocked {
            return Stage::Sanitized;
        }
        if let (Some(result), Some(role)) = (state.tool_result.take(), state.context.role) {
            state.tool_result = sanitize::sanitize(role, state.context.actor_id, result);
        }
        Stage::Sanitized
    }

    fn respond(&self, state: &mut PipelineState) -> Stage {
        state.response = Some(respond::render(state));
        Stage::Responded
    }
}

fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
        })
}

fn required<T>(value: Option<T>, label: &str) -> Result<T, GradebookError> {
    value.ok_or_else(|| GradebookError::validation(format!("não foi possível identificar: {}", label)))
}

/// Turn resolved entities into an operation. Reads default to the requester
/// as the student.
fn build_operation(
    intent: Intent,
    e: &Entities,
    actor_id: ActorId,
) -> Result<Operation, GradebookError> {
    let op = match intent {
        Intent::AddGrade => Operation::AddGrade(AddGrade {
            student_id: required(e.student_id, Field::StudentId.label())?,
            subject_id: required(e.disciplina_id, Field::DisciplinaId.label())?,
            class_id: required(e.turma_id, Field::TurmaId.label())?,
            module: required(e.modulo.clone(), Field::Modulo.label())?,
            description: required(e.descricao.clone(), Field::Descricao.label())?,
            value: required(e.valor, Field::Valor.label())?,
            date: e.date.as_deref().and_then(parse_date),
        }),
        Intent::UpdateGrade => Operation::UpdateGrade(UpdateGrade {
            grade_id: required(e.grade_id, Field::GradeId.label())?,
            value: e.valor,
            module: e.modulo.clone(),
            description: e.descricao.clone(),
        }),
        Intent::QueryGrades => Operation::QueryGrades(GradeQuery {
            student_id: e.student_id.unwrap_or(actor_id),
            subject_id: e.disciplina_id,
            module: e.modulo.clone(),
            class_id: e.turma_id,
        }),
        Intent::Summary => Operation::Summary(SummaryQuery {
            student_id: e.student_id.unwrap_or(actor_id),
            subject_id: e.disciplina_id,
        }),
        Intent::ClassReport => Operation::ClassReport(ClassReportQuery {
            class_id: required(e.turma_id, Field::TurmaId.label())?,
            subject_id: e.disciplina_id,
            module: e.modulo.clone(),
        }),
        Intent::DeleteGrade => Operation::DeleteGrade {
            grade_id: e.grade_id,
        },
        Intent::Fallback | Intent::Blocked => {
            return Err(GradebookError::Internal(format!(
                "no operation for intent {}",
                intent.as_str()
            )))
        }
    };
    Ok(op)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guardrails::{GuardrailConfig, DEFAULT_ORDER};
    use crate::ops::fixtures;

    fn pipeline(guardrails: &[&str], sanitize_output: bool) -> Pipeline {
        let order: Vec<String> = guardrails.iter().map(|s| s.to_string()).collect();
        Pipeline::new(
            Arc::new(fixtures::school()),
            GuardrailChain::new(&order, &GuardrailConfig::default(), 120),
            ExtractorChain::keyword_only(),
            sanitize_output,
            120,
        )
    }

    fn full() -> Pipeline {
        pipeline(&DEFAULT_ORDER, true)
    }

    #[tokio::test]
    async fn unknown_actor_is_blocked_at_context_load() {
        let s = full().run(99, "Quero ver as minhas notas").await;
        assert!(s.blocked);
        assert_eq!(s.blocked_by, Some(BlockLayer::Identity));
        assert_eq!(s.response.as_deref(), Some(respond::UNKNOWN_USER));
        assert_eq!(
            s.stages,
            vec![Stage::Start, Stage::Blocked, Stage::Responded]
        );
    }

    #[tokio::test]
    async fn student_asking_for_another_student_is_blocked_by_pre_check() {
        let s = full().run(2, "Mostra as notas do João").await;
        assert!(s.blocked);
        assert_eq!(s.intent, Intent::Blocked);
        assert_eq!(s.blocked_by, Some(BlockLayer::PreCheck));
        assert_eq!(s.blocked_rule.as_deref(), Some("third_party"));
        assert!(s.tool_result.is_none());
    }

    #[tokio::test]
    async fn student_reads_own_grades() {
        let s = full().run(2, "Quero ver as minhas notas").await;
        assert!(!s.blocked);
        assert_eq!(s.intent, Intent::QueryGrades);
        assert!(s.response.unwrap().starts_with("Notas de João Silva:"));
        assert_eq!(
            s.stages,
            vec![
                Stage::Start,
                Stage::ContextLoaded,
                Stage::PreChecked,
                Stage::IntentParsed,
                Stage::FieldsChecked,
                Stage::Executed,
                Stage::Sanitized,
                Stage::Responded
            ]
        );
    }

    #[tokio::test]
    async fn teacher_adds_grade_through_chat() {
        let s = full()
            .run(
                1,
                "Adicionar nota 18,5 ao Pedro em Matemática, turma 11B, módulo 1, teste 2",
            )
            .await;
        assert!(!s.blocked, "{:?}", s.response);
        assert_eq!(s.error, None);
        let Some(ops::ToolResult::Write(w)) = &s.tool_result else {
            panic!("expected write result");
        };
        assert_eq!(w.evaluation.owner_student_id, 4);
        assert_eq!(w.evaluation.last_modified_by, Some(1));
        assert!(s.response.unwrap().starts_with("✓ Nota adicionada com sucesso!"));
    }

    #[tokio::test]
    async fn missing_value_asks_instead_of_executing() {
        let p = full();
        let before = p.book().snapshot().unwrap();
        let s = p
            .run(1, "Adicionar nota ao Pedro em Matemática, turma 11B, módulo 1, teste 2")
            .await;
        assert!(s.ask_missing_fields);
        assert_eq!(s.missing_fields, vec![Field::Valor]);
        assert!(s.stages.contains(&Stage::AwaitingFields));
        assert!(!s.stages.contains(&Stage::Executed));
        assert_eq!(p.book().snapshot().unwrap(), before);
    }

    #[tokio::test]
    async fn executor_backstops_a_disabled_pre_check() {
        let p = pipeline(&[], true);
        let s = p.run(2, "Adicionar nota 20 ao aluno 2 em Matemática, turma 10A, módulo 1, teste 9").await;
        assert!(s.blocked);
        assert_eq!(s.blocked_by, Some(BlockLayer::Executor));
        assert_eq!(
            s.response.as_deref(),
            Some("Esta operação só pode ser realizada por um professor.")
        );
        assert_eq!(p.book().snapshot().unwrap().grades.len(), 3);
    }

    #[tokio::test]
    async fn deletion_is_blocked_for_everyone() {
        for actor in [1, 2] {
            let s = full().run(actor, "Apagar a nota do Miguel").await;
            assert!(s.blocked);
            assert_eq!(s.blocked_rule.as_deref(), Some("deletion"));
        }
    }

    #[tokio::test]
    async fn deletion_phrasing_is_refused_even_without_pre_check() {
        let p = pipeline(&[], true);
        let before = p.book().snapshot().unwrap();
        for msg in [
            "Please remove João's last grade",
            "Remove the last two grades of Maria",
            "elimina o registo da avaliação 3",
        ] {
            for actor in [1, 2] {
                let s = p.run(actor, msg).await;
                assert!(s.blocked, "{msg}");
                assert_eq!(s.blocked_by, Some(BlockLayer::Executor));
                assert_eq!(s.error_kind, Some(crate::error::ErrorKind::FeatureNotAvailable));
                assert!(s.tool_result.is_none());
            }
        }
        assert_eq!(p.book().snapshot().unwrap(), before);
    }

    #[tokio::test]
    async fn wider_deletion_phrasing_stops_at_pre_check() {
        for msg in [
            "Please remove João's last grade",
            "Remove the last two grades of Maria",
            "elimina o registo da avaliação 3",
        ] {
            let s = full().run(1, msg).await;
            assert!(s.blocked, "{msg}");
            assert_eq!(s.blocked_rule.as_deref(), Some("deletion"));
        }
    }

    #[tokio::test]
    async fn validation_errors_do_not_block() {
        let s = full().run(1, "Atualizar nota 404 para 12").await;
        assert!(!s.blocked);
        assert_eq!(
            s.response.as_deref(),
            Some("Erro de validação: Nota 404 não encontrado(a).")
        );
    }

    #[tokio::test]
    async fn fallback_gets_help_text() {
        let s = full().run(2, "Olá!").await;
        assert_eq!(s.intent, Intent::Fallback);
        assert_eq!(s.response.as_deref(), Some(respond::HELP));
    }
}
