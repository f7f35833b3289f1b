use crate::authz::AuthorizationService;
use crate::error::GradebookError;
use crate::model::{value_in_range, ActorId, NewGrade, Role};
use crate::ops::{AddGrade, GradeView, GradeWrite, UpdateGrade};
use crate::store::{GradeChanges, Tx};

fn check_value(value: f64) -> Result<(), GradebookError> {
    if value_in_range(value) {
        Ok(())
    } else {
        Err(GradebookError::ValueOutOfRange(value))
    }
}

fn non_empty(field: &str, value: &str) -> Result<String, GradebookError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GradebookError::validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

pub fn add_grade(
    tx: &mut Tx<'_>,
    teacher_id: ActorId,
    req: &AddGrade,
) -> Result<GradeWrite, GradebookError> {
    let new = {
        let auth = AuthorizationService::new(tx);
        auth.require_teacher(teacher_id, "add grades")?;

        match tx.actor(req.student_id) {
            Some(s) if s.role == Role::Student => {}
            Some(_) => {
                return Err(GradebookError::validation(format!(
                    "user {} is not a student",
                    req.student_id
                )))
            }
            None => return Err(GradebookError::not_found("student", req.student_id)),
        }
        if tx.subject(req.subject_id).is_none() {
            return Err(GradebookError::not_found("subject", req.subject_id));
        }
        if tx.class(req.class_id).is_none() {
            return Err(GradebookError::not_found("class", req.class_id));
        }
        check_value(req.value)?;
        NewGrade {
            student_id: req.student_id,
            subject_id: req.subject_id,
            class_id: req.class_id,
            module: non_empty("modulo", &req.module)?,
            description: non_empty("descricao", &req.description)?,
            value: req.value,
            date: req.date,
        }
    };

    let record = tx.insert_grade(new, teacher_id);
    tracing::info!(
        actor_id = teacher_id,
        grade_id = record.id,
        student_id = record.owner_student_id,
        "grade added"
    );
    Ok(GradeWrite {
        success: true,
        message: "Nota adicionada com sucesso".into(),
        evaluation: GradeView::from_record(tx, &record),
    })
}

pub fn update_grade(
    tx: &mut Tx<'_>,
    teacher_id: ActorId,
    req: &UpdateGrade,
) -> Result<GradeWrite, GradebookError> {
    AuthorizationService::new(tx).require_teacher(teacher_id, "update grades")?;
    if tx.grade(req.grade_id).is_none() {
        return Err(GradebookError::not_found("grade", req.grade_id));
    }
    if let Some(v) = req.value {
        check_value(v)?;
    }
    let changes = GradeChanges {
        value: req.value,
        module: req
            .module
            .as_deref()
            .map(|m| non_empty("modulo", m))
            .transpose()?,
        description: req
            .description
            .as_deref()
            .map(|d| non_empty("descricao", d))
            .transpose()?,
    };
    let record = tx.update_grade(req.grade_id, &changes, teacher_id)?;
    tracing::info!(actor_id = teacher_id, grade_id = record.id, "grade updated");
    Ok(GradeWrite {
        success: true,
        message: "Nota atualizada com sucesso".into(),
        evaluation: GradeView::from_record(tx, &record),
    })
}
