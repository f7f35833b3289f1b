use crate::extractor::Entities;
use crate::model::{ActorId, Role};
use crate::store::Tx;

/// Replace `*_name` entities with ids. Student names are only resolved for
/// teachers; names that match nothing are dropped. An explicit id always
/// wins over a name. Running this on already-resolved entities is a no-op.
pub fn resolve(tx: &Tx<'_>, mut e: Entities, role: Role, actor_id: ActorId) -> Entities {
    if let Some(name) = e.student_name.take() {
        if role == Role::Teacher && e.student_id.is_none() {
            e.student_id = tx.find_students_by_name(&name).first().map(|s| s.id);
            if e.student_id.is_none() {
                tracing::debug!(actor_id, "student name did not resolve");
            }
        }
    }
    if let Some(name) = e.disciplina_name.take() {
        if e.disciplina_id.is_none() {
            e.disciplina_id = tx.find_subject_by_name(&name).map(|s| s.id);
        }
    }
    if let Some(name) = e.turma_name.take() {
        if e.turma_id.is_none() {
            e.turma_id = tx.find_class_by_name(&name).map(|c| c.id);
        }
    }
    e
}
