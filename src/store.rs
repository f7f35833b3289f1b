//! In-memory transactional gradebook.
//!
//! All access goes through [`Gradebook::transaction`]. A transaction reads the
//! committed tables directly and copies them on the first write; the copy
//! replaces the committed tables only when the closure returns `Ok`, so any
//! error (authorization failures included) leaves the store untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::GradebookError;
use crate::model::{
    value_in_range, Actor, ActorId, Class, ClassId, Enrollment, GradeId, GradeRecord, NewGrade,
    Role, Subject, SubjectId,
};
use crate::util::fold_text;

/// Serializable image of the whole store, used for seeding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GradebookSnapshot {
    #[serde(default)]
    pub users: Vec<Actor>,
    #[serde(default, alias = "disciplinas")]
    pub subjects: Vec<Subject>,
    #[serde(default, alias = "turmas")]
    pub classes: Vec<Class>,
    #[serde(default)]
    pub enrollments: Vec<Enrollment>,
    #[serde(default, alias = "avaliacoes")]
    pub grades: Vec<GradeRecord>,
}

/// Filters for a grade scan. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradeFilter {
    pub student_id: Option<ActorId>,
    pub subject_id: Option<SubjectId>,
    pub class_id: Option<ClassId>,
    pub module: Option<String>,
}

impl GradeFilter {
    pub fn for_student(student_id: ActorId) -> Self {
        Self {
            student_id: Some(student_id),
            ..Self::default()
        }
    }

    fn matches(&self, g: &GradeRecord) -> bool {
        self.student_id.map_or(true, |id| g.owner_student_id == id)
            && self.subject_id.map_or(true, |id| g.subject_id == id)
            && self.class_id.map_or(true, |id| g.class_id == id)
            && self
                .module
                .as_deref()
                .map_or(true, |m| g.module.trim().eq_ignore_ascii_case(m.trim()))
    }
}

/// Mutable fields of a grade. Absent fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradeChanges {
    pub value: Option<f64>,
    pub module: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
struct Tables {
    users: BTreeMap<ActorId, Actor>,
    subjects: BTreeMap<SubjectId, Subject>,
    classes: BTreeMap<ClassId, Class>,
    enrollments: BTreeSet<Enrollment>,
    grades: BTreeMap<GradeId, GradeRecord>,
    next_user_id: ActorId,
    next_grade_id: GradeId,
}

impl Default for Tables {
    fn default() -> Self {
        Self {
            users: BTreeMap::new(),
            subjects: BTreeMap::new(),
            classes: BTreeMap::new(),
            enrollments: BTreeSet::new(),
            grades: BTreeMap::new(),
            next_user_id: 1,
            next_grade_id: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct Gradebook {
    inner: Mutex<Tables>,
}

impl Gradebook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot, rejecting dangling references, duplicate
    /// ids and out-of-range grade values.
    pub fn from_snapshot(snapshot: GradebookSnapshot) -> Result<Self, GradebookError> {
        let mut t = Tables::default();
        for user in snapshot.users {
            if user.name.trim().is_empty() {
                return Err(GradebookError::validation(format!(
                    "user {} has an empty name",
                    user.id
                )));
            }
            if t.users.insert(user.id, user.clone()).is_some() {
                return Err(GradebookError::validation(format!(
                    "duplicate user id {}",
                    user.id
                )));
            }
        }
        for subject in snapshot.subjects {
            if t.subjects.values().any(|s| s.name.eq_ignore_ascii_case(&subject.name)) {
                return Err(GradebookError::validation(format!(
                    "duplicate subject name '{}'",
                    subject.name
                )));
            }
            if t.subjects.insert(subject.id, subject.clone()).is_some() {
                return Err(GradebookError::validation(format!(
                    "duplicate subject id {}",
                    subject.id
                )));
            }
        }
        for class in snapshot.classes {
            if t.classes.values().any(|c| c.name.eq_ignore_ascii_case(&class.name)) {
                return Err(GradebookError::validation(format!(
                    "duplicate class name '{}'",
                    class.name
                )));
            }
            if t.classes.insert(class.id, class.clone()).is_some() {
                return Err(GradebookError::validation(format!(
                    "duplicate class id {}",
                    class.id
                )));
            }
        }
        for e in snapshot.enrollments {
            match t.users.get(&e.student_id) {
                Some(u) if u.role == Role::Student => {}
                Some(_) => {
                    return Err(GradebookError::validation(format!(
                        "enrollment references non-student {}",
                        e.student_id
                    )))
                }
                None => return Err(GradebookError::not_found("student", e.student_id)),
            }
            if !t.classes.contains_key(&e.class_id) {
                return Err(GradebookError::not_found("class", e.class_id));
            }
            t.enrollments.insert(e);
        }
        for g in snapshot.grades {
            match t.users.get(&g.owner_student_id) {
                Some(u) if u.role == Role::Student => {}
                _ => return Err(GradebookError::not_found("student", g.owner_student_id)),
            }
            if !t.subjects.contains_key(&g.subject_id) {
                return Err(GradebookError::not_found("subject", g.subject_id));
            }
            if !t.classes.contains_key(&g.class_id) {
                return Err(GradebookError::not_found("class", g.class_id));
            }
            if !value_in_range(g.value) {
                return Err(GradebookError::ValueOutOfRange(g.value));
            }
            if t.grades.insert(g.id, g.clone()).is_some() {
                return Err(GradebookError::validation(format!(
                    "duplicate grade id {}",
                    g.id
                )));
            }
        }
        t.next_user_id = t.users.keys().max().copied().unwrap_or(0) + 1;
        t.next_grade_id = t.grades.keys().max().copied().unwrap_or(0) + 1;
        Ok(Self {
            inner: Mutex::new(t),
        })
    }

    pub fn snapshot(&self) -> Result<GradebookSnapshot, GradebookError> {
        let t = self.lock()?;
        Ok(GradebookSnapshot {
            users: t.users.values().cloned().collect(),
            subjects: t.subjects.values().cloned().collect(),
            classes: t.classes.values().cloned().collect(),
            enrollments: t.enrollments.iter().copied().collect(),
            grades: t.grades.values().cloned().collect(),
        })
    }

    /// Run `f` as one unit of work. Writes made through the transaction are
    /// committed only when `f` returns `Ok`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, GradebookError>
    where
        F: FnOnce(&mut Tx<'_>) -> Result<T, GradebookError>,
    {
        let mut guard = self.lock()?;
        let mut tx = Tx {
            base: &*guard,
            working: None,
        };
        let outcome = f(&mut tx);
        let working = tx.working.take();
        match outcome {
            Ok(value) => {
                if let Some(tables) = working {
                    *guard = tables;
                }
                Ok(value)
            }
            Err(err) => {
                if working.is_some() {
                    tracing::debug!(kind = err.kind().as_str(), "transaction rolled back");
                }
                Err(err)
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, GradebookError> {
        self.inner
            .lock()
            .map_err(|_| GradebookError::Internal("gradebook lock poisoned".into()))
    }
}

/// Handle passed to a transaction closure.
pub struct Tx<'a> {
    base: &'a Tables,
    working: Option<Tables>,
}

impl<'a> Tx<'a> {
    fn tables(&self) -> &Tables {
        self.working.as_ref().unwrap_or(self.base)
    }

    fn tables_mut(&mut self) -> &mut Tables {
        let base = self.base;
        self.working.get_or_insert_with(|| base.clone())
    }

    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.tables().users.get(&id)
    }

    pub fn users(&self, role: Option<Role>) -> Vec<Actor> {
        self.tables()
            .users
            .values()
            .filter(|u| role.map_or(true, |r| u.role == r))
            .cloned()
            .collect()
    }

    pub fn insert_user(&mut self, name: &str, role: Role) -> Actor {
        let t = self.tables_mut();
        let actor = Actor {
            id: t.next_user_id,
            name: name.trim().to_string(),
            role,
        };
        t.next_user_id += 1;
        t.users.insert(actor.id, actor.clone());
        actor
    }

    pub fn subject(&self, id: SubjectId) -> Option<&Subject> {
        self.tables().subjects.get(&id)
    }

    pub fn class(&self, id: ClassId) -> Option<&Class> {
        self.tables().classes.get(&id)
    }

    pub fn classes(&self) -> Vec<Class> {
        self.tables().classes.values().cloned().collect()
    }

    /// First subject (lowest id) whose name contains `needle`, ignoring case
    /// and accents.
    pub fn find_subject_by_name(&self, needle: &str) -> Option<&Subject> {
        let needle = fold_text(needle.trim());
        if needle.is_empty() {
            return None;
        }
        self.tables()
            .subjects
            .values()
            .find(|s| fold_text(&s.name).contains(&needle))
    }

    pub fn find_class_by_name(&self, needle: &str) -> Option<&Class> {
        let needle = fold_text(needle.trim());
        if needle.is_empty() {
            return None;
        }
        self.tables()
            .classes
            .values()
            .find(|c| fold_text(&c.name).contains(&needle))
    }

    /// Students whose name contains `needle`, ordered by id.
    pub fn find_students_by_name(&self, needle: &str) -> Vec<Actor> {
        let needle = fold_text(needle.trim());
        if needle.is_empty() {
            return Vec::new();
        }
        self.tables()
            .users
            .values()
            .filter(|u| u.role == Role::Student && fold_text(&u.name).contains(&needle))
            .cloned()
            .collect()
    }

    pub fn enroll(&mut self, student_id: ActorId, class_id: ClassId) {
        self.tables_mut().enrollments.insert(Enrollment {
            student_id,
            class_id,
        });
    }

    pub fn is_enrolled(&self, student_id: ActorId, class_id: ClassId) -> bool {
        self.tables().enrollments.contains(&Enrollment {
            student_id,
            class_id,
        })
    }

    pub fn classes_of(&self, student_id: ActorId) -> Vec<Class> {
        let t = self.tables();
        t.enrollments
            .iter()
            .filter(|e| e.student_id == student_id)
            .filter_map(|e| t.classes.get(&e.class_id).cloned())
            .collect()
    }

    pub fn students_in_class(&self, class_id: ClassId) -> Vec<Actor> {
        let t = self.tables();
        let mut students: Vec<Actor> = t
            .enrollments
            .iter()
            .filter(|e| e.class_id == class_id)
            .filter_map(|e| t.users.get(&e.student_id).cloned())
            .collect();
        students.sort_by_key(|s| s.id);
        students
    }

    /// Matching grades, most recent first (ties broken by id, newest first).
    pub fn grades(&self, filter: &GradeFilter) -> Vec<GradeRecord> {
        let mut out: Vec<GradeRecord> = self
            .tables()
            .grades
            .values()
            .filter(|g| filter.matches(g))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        out
    }

    pub fn grade(&self, id: GradeId) -> Option<&GradeRecord> {
        self.tables().grades.get(&id)
    }

    pub fn grade_count(&self) -> usize {
        self.tables().grades.len()
    }

    pub fn insert_grade(&mut self, new: NewGrade, modified_by: ActorId) -> GradeRecord {
        let now = Utc::now();
        let t = self.tables_mut();
        let record = GradeRecord {
            id: t.next_grade_id,
            owner_student_id: new.student_id,
            subject_id: new.subject_id,
            class_id: new.class_id,
            module: new.module,
            description: new.description,
            value: new.value,
            date: new.date.unwrap_or(now),
            last_modified_by: Some(modified_by),
            last_modified_at: now,
        };
        t.next_grade_id += 1;
        t.grades.insert(record.id, record.clone());
        record
    }

    /// Apply `changes` to grade `id`. Ownership is never touched.
    pub fn update_grade(
        &mut self,
        id: GradeId,
        changes: &GradeChanges,
        modified_by: ActorId,
    ) -> Result<GradeRecord, GradebookError> {
        if self.grade(id).is_none() {
            return Err(GradebookError::not_found("grade", id));
        }
        let t = self.tables_mut();
        let record = t
            .grades
            .get_mut(&id)
            .ok_or_else(|| GradebookError::not_found("grade", id))?;
        if let Some(v) = changes.value {
            record.value = v;
        }
        if let Some(m) = &changes.module {
            record.module = m.clone();
        }
        if let Some(d) = &changes.description {
            record.description = d.clone();
        }
        record.last_modified_by = Some(modified_by);
        record.last_modified_at = Utc::now();
        Ok(record.clone())
    }
}
