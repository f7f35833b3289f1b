use std::collections::BTreeMap;

use serde::Serialize;

use crate::authz::AuthorizationService;
use crate::error::GradebookError;
use crate::model::ActorId;
use crate::ops::{
    AppliedFilters, ClassReport, ClassReportQuery, DisciplineReport, DisciplineReportQuery,
    GradeView, ModuleReport, ModuleReportQuery, ModuleRow, NamedRef, StudentReport,
    StudentStanding,
};
use crate::store::{GradeFilter, Tx};
use crate::util::round2;

/// Descriptive statistics over a set of grade values, rounded to two
/// decimals. All fields except the count are `null` for an empty set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub mean: Option<f64>,
    pub median: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub total_grades: usize,
}

impl Statistics {
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut v: Vec<f64> = values.into_iter().collect();
        if v.is_empty() {
            return Self::default();
        }
        v.sort_by(|a, b| a.total_cmp(b));
        let n = v.len();
        let median = if n % 2 == 1 {
            v[n / 2]
        } else {
            (v[n / 2 - 1] + v[n / 2]) / 2.0
        };
        Self {
            mean: Some(round2(v.iter().sum::<f64>() / n as f64)),
            median: Some(round2(median)),
            min: Some(round2(v[0])),
            max: Some(round2(v[n - 1])),
            total_grades: n,
        }
    }
}

pub(crate) fn student_report(id: ActorId, name: String, grades: Vec<GradeView>) -> StudentReport {
    let stats = Statistics::from_values(grades.iter().map(|g| g.value));
    StudentReport {
        student_id: id,
        student_name: name,
        total_evaluations: grades.len(),
        average: stats.mean,
        min_grade: stats.min,
        max_grade: stats.max,
        grades,
    }
}

/// Class aggregate over every grade of the listed students.
pub(crate) fn class_statistics(students: &[StudentReport]) -> Statistics {
    Statistics::from_values(
        students
            .iter()
            .flat_map(|s| s.grades.iter().map(|g| g.value)),
    )
}

pub fn class_report(
    tx: &Tx<'_>,
    requester_id: ActorId,
    req: &ClassReportQuery,
) -> Result<ClassReport, GradebookError> {
    AuthorizationService::new(tx).require_teacher(requester_id, "view class reports")?;
    let class = tx
        .class(req.class_id)
        .ok_or_else(|| GradebookError::not_found("class", req.class_id))?;
    if let Some(subject_id) = req.subject_id {
        if tx.subject(subject_id).is_none() {
            return Err(GradebookError::not_found("subject", subject_id));
        }
    }

    let students: Vec<StudentReport> = tx
        .students_in_class(class.id)
        .into_iter()
        .map(|s| {
            let grades = tx
                .grades(&GradeFilter {
                    student_id: Some(s.id),
                    subject_id: req.subject_id,
                    class_id: Some(class.id),
                    module: req.module.clone(),
                })
                .iter()
                .map(|g| GradeView::from_record(tx, g))
                .collect();
            student_report(s.id, s.name, grades)
        })
        .collect();

    Ok(ClassReport {
        class: NamedRef {
            id: class.id,
            name: class.name.clone(),
        },
        subject_id: req.subject_id,
        module: req.module.clone(),
        total_students: students.len(),
        class_statistics: class_statistics(&students),
        students,
    })
}

fn student_name(tx: &Tx<'_>, id: ActorId) -> String {
    tx.actor(id).map(|a| a.name.clone()).unwrap_or_default()
}

/// Per-student standing in one subject, optionally within one class.
/// Students without grades in the subject are not listed.
pub fn discipline_report(
    tx: &Tx<'_>,
    requester_id: ActorId,
    req: &DisciplineReportQuery,
) -> Result<DisciplineReport, GradebookError> {
    AuthorizationService::new(tx).require_teacher(requester_id, "view subject reports")?;
    let subject = tx
        .subject(req.subject_id)
        .ok_or_else(|| GradebookError::not_found("subject", req.subject_id))?;

    let mut by_student: BTreeMap<ActorId, Vec<f64>> = BTreeMap::new();
    for g in tx.grades(&GradeFilter {
        subject_id: Some(subject.id),
        class_id: req.class_id,
        ..GradeFilter::default()
    }) {
        by_student.entry(g.owner_student_id).or_default().push(g.value);
    }

    let mut students: Vec<StudentStanding> = by_student
        .into_iter()
        .map(|(id, values)| {
            let stats = Statistics::from_values(values);
            StudentStanding {
                student_id: id,
                student_name: student_name(tx, id),
                total_evaluations: stats.total_grades,
                average: stats.mean,
                min_grade: stats.min,
                max_grade: stats.max,
            }
        })
        .collect();
    students.sort_by(|a, b| a.student_name.cmp(&b.student_name));

    Ok(DisciplineReport {
        subject: NamedRef {
            id: subject.id,
            name: subject.name.clone(),
        },
        class_id: req.class_id,
        total_students: students.len(),
        class_average: Statistics::from_values(students.iter().filter_map(|s| s.average)).mean,
        students,
    })
}

/// Averages per student and subject for one module.
pub fn module_report(
    tx: &Tx<'_>,
    requester_id: ActorId,
    req: &ModuleReportQuery,
) -> Result<ModuleReport, GradebookError> {
    AuthorizationService::new(tx).require_teacher(requester_id, "view module reports")?;
    if req.module.trim().is_empty() {
        return Err(GradebookError::validation("modulo must not be empty"));
    }

    let mut groups: BTreeMap<(ActorId, i64), Vec<f64>> = BTreeMap::new();
    for g in tx.grades(&GradeFilter {
        subject_id: req.subject_id,
        class_id: req.class_id,
        module: Some(req.module.clone()),
        ..GradeFilter::default()
    }) {
        groups
            .entry((g.owner_student_id, g.subject_id))
            .or_default()
            .push(g.value);
    }

    let mut results: Vec<ModuleRow> = groups
        .into_iter()
        .map(|((student_id, subject_id), values)| {
            let stats = Statistics::from_values(values);
            ModuleRow {
                student_id,
                student_name: student_name(tx, student_id),
                subject_id,
                subject_name: tx
                    .subject(subject_id)
                    .map(|s| s.name.clone())
                    .unwrap_or_default(),
                total_evaluations: stats.total_grades,
                average: stats.mean,
            }
        })
        .collect();
    results.sort_by(|a, b| {
        a.student_name
            .cmp(&b.student_name)
            .then_with(|| a.subject_name.cmp(&b.subject_name))
    });

    Ok(ModuleReport {
        module: req.module.trim().to_string(),
        filters_applied: AppliedFilters {
            subject_id: req.subject_id,
            module: None,
            class_id: req.class_id,
        },
        total_records: results.len(),
        results,
    })
}
