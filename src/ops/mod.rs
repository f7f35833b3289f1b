//! Domain operations. Each one runs inside a single gradebook transaction and
//! re-checks authorization itself; callers cannot skip that step.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::GradebookError;
use crate::model::{ActorId, ClassId, GradeId, GradeRecord, SubjectId};
use crate::store::{Gradebook, Tx};

pub mod read;
pub mod report;
pub mod write;

pub use report::Statistics;

/// New evaluation. Wire names follow the school vocabulary.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddGrade {
    pub student_id: ActorId,
    #[serde(rename = "disciplina_id")]
    pub subject_id: SubjectId,
    #[serde(rename = "turma_id")]
    pub class_id: ClassId,
    #[serde(rename = "modulo")]
    pub module: String,
    #[serde(rename = "descricao")]
    pub description: String,
    #[serde(rename = "valor")]
    pub value: f64,
    #[serde(default)]
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UpdateGrade {
    pub grade_id: GradeId,
    #[serde(default, rename = "valor")]
    pub value: Option<f64>,
    #[serde(default, rename = "modulo")]
    pub module: Option<String>,
    #[serde(default, rename = "descricao")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GradeQuery {
    pub student_id: ActorId,
    #[serde(default, rename = "disciplina_id")]
    pub subject_id: Option<SubjectId>,
    #[serde(default, rename = "modulo")]
    pub module: Option<String>,
    #[serde(default, rename = "turma_id")]
    pub class_id: Option<ClassId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SummaryQuery {
    pub student_id: ActorId,
    #[serde(default, rename = "disciplina_id")]
    pub subject_id: Option<SubjectId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassReportQuery {
    #[serde(rename = "turma_id")]
    pub class_id: ClassId,
    #[serde(default, rename = "disciplina_id")]
    pub subject_id: Option<SubjectId>,
    #[serde(default, rename = "modulo")]
    pub module: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubjectQuery {
    #[serde(rename = "disciplina_id")]
    pub subject_id: SubjectId,
    #[serde(default, rename = "turma_id")]
    pub class_id: Option<ClassId>,
    #[serde(default, rename = "modulo")]
    pub module: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DisciplineReportQuery {
    #[serde(rename = "disciplina_id")]
    pub subject_id: SubjectId,
    #[serde(default, rename = "turma_id")]
    pub class_id: Option<ClassId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModuleReportQuery {
    #[serde(rename = "modulo")]
    pub module: String,
    #[serde(default, rename = "disciplina_id")]
    pub subject_id: Option<SubjectId>,
    #[serde(default, rename = "turma_id")]
    pub class_id: Option<ClassId>,
}

/// Closed set of operations the executor knows how to run.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    AddGrade(AddGrade),
    UpdateGrade(UpdateGrade),
    QueryGrades(GradeQuery),
    Summary(SummaryQuery),
    ClassReport(ClassReportQuery),
    GradesBySubject(SubjectQuery),
    DisciplineReport(DisciplineReportQuery),
    ModuleReport(ModuleReportQuery),
    DeleteGrade { grade_id: Option<GradeId> },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::AddGrade(_) => "add_grade",
            Operation::UpdateGrade(_) => "update_grade",
            Operation::QueryGrades(_) => "query_grades",
            Operation::Summary(_) => "summary",
            Operation::ClassReport(_) => "class_report",
            Operation::GradesBySubject(_) => "grades_by_subject",
            Operation::DisciplineReport(_) => "discipline_report",
            Operation::ModuleReport(_) => "module_report",
            Operation::DeleteGrade { .. } => "delete_grade",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentRef {
    pub id: ActorId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NamedRef {
    pub id: i64,
    pub name: String,
}

/// A grade as returned to callers, with catalog names resolved.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeView {
    pub id: GradeId,
    pub owner_student_id: ActorId,
    pub student_name: String,
    pub subject_id: SubjectId,
    pub subject_name: String,
    pub class_id: ClassId,
    pub class_name: String,
    pub module: String,
    pub description: String,
    pub value: f64,
    pub date: DateTime<Utc>,
    pub last_modified_by: Option<ActorId>,
    pub last_modified_at: DateTime<Utc>,
}

impl GradeView {
    pub fn from_record(tx: &Tx<'_>, g: &GradeRecord) -> Self {
        Self {
            id: g.id,
            owner_student_id: g.owner_student_id,
            student_name: tx
                .actor(g.owner_student_id)
                .map(|a| a.name.clone())
                .unwrap_or_default(),
            subject_id: g.subject_id,
            subject_name: tx
                .subject(g.subject_id)
                .map(|s| s.name.clone())
                .unwrap_or_default(),
            class_id: g.class_id,
            class_name: tx
                .class(g.class_id)
                .map(|c| c.name.clone())
                .unwrap_or_default(),
            module: g.module.clone(),
            description: g.description.clone(),
            value: g.value,
            date: g.date,
            last_modified_by: g.last_modified_by,
            last_modified_at: g.last_modified_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeWrite {
    pub success: bool,
    pub message: String,
    pub evaluation: GradeView,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppliedFilters {
    pub subject_id: Option<SubjectId>,
    pub module: Option<String>,
    pub class_id: Option<ClassId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeList {
    pub student: StudentRef,
    pub filters_applied: AppliedFilters,
    pub total_grades: usize,
    pub grades: Vec<GradeView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectBreakdown {
    pub subject_id: SubjectId,
    pub subject_name: String,
    pub average: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradeSummary {
    pub student: StudentRef,
    pub subject_id: Option<SubjectId>,
    pub total_evaluations: usize,
    pub average: Option<f64>,
    pub min_grade: Option<f64>,
    pub max_grade: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub averages_by_subject: Option<Vec<SubjectBreakdown>>,
    pub recent_evaluations: Vec<GradeView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentReport {
    pub student_id: ActorId,
    pub student_name: String,
    pub total_evaluations: usize,
    pub average: Option<f64>,
    pub min_grade: Option<f64>,
    pub max_grade: Option<f64>,
    pub grades: Vec<GradeView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassReport {
    pub class: NamedRef,
    pub subject_id: Option<SubjectId>,
    pub module: Option<String>,
    pub total_students: usize,
    pub students: Vec<StudentReport>,
    pub class_statistics: Statistics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectGrades {
    pub subject: NamedRef,
    pub filters_applied: AppliedFilters,
    pub total_grades: usize,
    pub grades: Vec<GradeView>,
}

/// One student's standing in a subject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudentStanding {
    pub student_id: ActorId,
    pub student_name: String,
    pub total_evaluations: usize,
    pub average: Option<f64>,
    pub min_grade: Option<f64>,
    pub max_grade: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisciplineReport {
    pub subject: NamedRef,
    pub class_id: Option<ClassId>,
    pub total_students: usize,
    /// Mean of the per-student averages.
    pub class_average: Option<f64>,
    pub students: Vec<StudentStanding>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleRow {
    pub student_id: ActorId,
    pub student_name: String,
    pub subject_id: SubjectId,
    pub subject_name: String,
    pub total_evaluations: usize,
    pub average: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleReport {
    pub module: String,
    pub filters_applied: AppliedFilters,
    pub total_records: usize,
    pub results: Vec<ModuleRow>,
}

/// Result of any operation. Serialized without a tag so each variant keeps
/// its own shape on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolResult {
    Write(GradeWrite),
    Grades(GradeList),
    Summary(GradeSummary),
    ClassReport(ClassReport),
    SubjectGrades(SubjectGrades),
    DisciplineReport(DisciplineReport),
    ModuleReport(ModuleReport),
}

pub const DELETION_REFUSED: &str = "grade deletion is not available";

/// Run `op` for `requester` in its own transaction. Deletion is refused
/// before the store is touched.
pub fn execute(
    book: &Gradebook,
    requester: ActorId,
    op: &Operation,
) -> Result<ToolResult, GradebookError> {
    if let Operation::DeleteGrade { grade_id } = op {
        tracing::info!(actor_id = requester, ?grade_id, "deletion refused");
        return Err(GradebookError::FeatureNotAvailable(DELETION_REFUSED.into()));
    }
    book.transaction(|tx| execute_in(tx, requester, op))
}

/// Run `op` inside a transaction the caller already holds, so name
/// resolution and execution see the same state.
pub fn execute_in(
    tx: &mut Tx<'_>,
    requester: ActorId,
    op: &Operation,
) -> Result<ToolResult, GradebookError> {
    match op {
        Operation::AddGrade(req) => write::add_grade(tx, requester, req).map(ToolResult::Write),
        Operation::UpdateGrade(req) => {
            write::update_grade(tx, requester, req).map(ToolResult::Write)
        }
        Operation::QueryGrades(req) => read::query_grades(tx, requester, req).map(ToolResult::Grades),
        Operation::Summary(req) => read::summary(tx, requester, req).map(ToolResult::Summary),
        Operation::ClassReport(req) => {
            report::class_report(tx, requester, req).map(ToolResult::ClassReport)
        }
        Operation::GradesBySubject(req) => {
            read::grades_by_subject(tx, requester, req).map(ToolResult::SubjectGrades)
        }
        Operation::DisciplineReport(req) => {
            report::discipline_report(tx, requester, req).map(ToolResult::DisciplineReport)
        }
        Operation::ModuleReport(req) => {
            report::module_report(tx, requester, req).map(ToolResult::ModuleReport)
        }
        Operation::DeleteGrade { grade_id } => {
            tracing::info!(actor_id = requester, ?grade_id, "deletion refused");
            Err(GradebookError::FeatureNotAvailable(DELETION_REFUSED.into()))
        }
    }
}
