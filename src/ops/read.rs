use std::collections::BTreeMap;

use crate::authz::AuthorizationService;
use crate::error::GradebookError;
use crate::model::{Actor, ActorId, Role};
use crate::ops::report::Statistics;
use crate::ops::{
    AppliedFilters, GradeList, GradeQuery, GradeSummary, GradeView, NamedRef, StudentRef,
    SubjectBreakdown, SubjectGrades, SubjectQuery, SummaryQuery,
};
use crate::store::{GradeFilter, Tx};
use crate::util::round2;

/// Number of evaluations listed under "recent" in a summary.
const RECENT_EVALUATIONS: usize = 5;

fn student<'t>(tx: &'t Tx<'_>, student_id: ActorId) -> Result<&'t Actor, GradebookError> {
    match tx.actor(student_id) {
        Some(a) if a.role == Role::Student => Ok(a),
        _ => Err(GradebookError::not_found("student", student_id)),
    }
}

pub fn query_grades(
    tx: &Tx<'_>,
    requester_id: ActorId,
    req: &GradeQuery,
) -> Result<GradeList, GradebookError> {
    AuthorizationService::new(tx).require_same_or_teacher(requester_id, req.student_id)?;
    let s = student(tx, req.student_id)?;
    let filter = GradeFilter {
        student_id: Some(s.id),
        subject_id: req.subject_id,
        class_id: req.class_id,
        module: req.module.clone(),
    };
    let grades: Vec<GradeView> = tx
        .grades(&filter)
        .iter()
        .map(|g| GradeView::from_record(tx, g))
        .collect();
    Ok(GradeList {
        student: StudentRef {
            id: s.id,
            name: s.name.clone(),
        },
        filters_applied: AppliedFilters {
            subject_id: req.subject_id,
            module: req.module.clone(),
            class_id: req.class_id,
        },
        total_grades: grades.len(),
        grades,
    })
}

pub fn summary(
    tx: &Tx<'_>,
    requester_id: ActorId,
    req: &SummaryQuery,
) -> Result<GradeSummary, GradebookError> {
    AuthorizationService::new(tx).require_same_or_teacher(requester_id, req.student_id)?;
    let s = student(tx, req.student_id)?;
    let records = tx.grades(&GradeFilter {
        student_id: Some(s.id),
        subject_id: req.subject_id,
        ..GradeFilter::default()
    });
    let stats = Statistics::from_values(records.iter().map(|g| g.value));

    let averages_by_subject = if req.subject_id.is_none() && !records.is_empty() {
        let mut by_subject: BTreeMap<i64, Vec<f64>> = BTreeMap::new();
        for g in &records {
            by_subject.entry(g.subject_id).or_default().push(g.value);
        }
        Some(
            by_subject
                .into_iter()
                .map(|(subject_id, values)| SubjectBreakdown {
                    subject_id,
                    subject_name: tx
                        .subject(subject_id)
                        .map(|x| x.name.clone())
                        .unwrap_or_default(),
                    average: round2(values.iter().sum::<f64>() / values.len() as f64),
                    count: values.len(),
                })
                .collect(),
        )
    } else {
        None
    };

    Ok(GradeSummary {
        student: StudentRef {
            id: s.id,
            name: s.name.clone(),
        },
        subject_id: req.subject_id,
        total_evaluations: stats.total_grades,
        average: stats.mean,
        min_grade: stats.min,
        max_grade: stats.max,
        averages_by_subject,
        recent_evaluations: records
            .iter()
            .take(RECENT_EVALUATIONS)
            .map(|g| GradeView::from_record(tx, g))
            .collect(),
    })
}

/// Grades of one subject. Students only ever get their own rows; the
/// restriction is part of the scan, not a later filter.
pub fn grades_by_subject(
    tx: &Tx<'_>,
    requester_id: ActorId,
    req: &SubjectQuery,
) -> Result<SubjectGrades, GradebookError> {
    let requester = AuthorizationService::new(tx).actor(requester_id)?;
    let subject = tx
        .subject(req.subject_id)
        .ok_or_else(|| GradebookError::not_found("subject", req.subject_id))?;
    let filter = GradeFilter {
        student_id: (requester.role == Role::Student).then_some(requester.id),
        subject_id: Some(subject.id),
        class_id: req.class_id,
        module: req.module.clone(),
    };
    let grades: Vec<GradeView> = tx
        .grades(&filter)
        .iter()
        .map(|g| GradeView::from_record(tx, g))
        .collect();
    Ok(SubjectGrades {
        subject: NamedRef {
            id: subject.id,
            name: subject.name.clone(),
        },
        filters_applied: AppliedFilters {
            subject_id: Some(subject.id),
            module: req.module.clone(),
            class_id: req.class_id,
        },
        total_grades: grades.len(),
        grades,
    })
}
