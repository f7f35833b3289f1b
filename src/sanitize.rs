//! Output filter for student requests. Any node carrying an owner other than
//! the requesting student is dropped whole; containers are rebuilt from the
//! surviving children and their counters and aggregates recomputed.

use crate::model::{ActorId, Role};
use crate::ops::report::{class_statistics, student_report, Statistics};
use crate::ops::{
    ClassReport, DisciplineReport, GradeList, GradeSummary, GradeView, GradeWrite, ModuleReport,
    ModuleRow, StudentReport, StudentStanding, SubjectGrades, ToolResult,
};

/// A result node that may belong to a single student.
pub trait Owned {
    /// Owning student, or `None` for containers that span several students.
    fn owner_id(&self) -> Option<ActorId>;

    /// Rebuild the node with only the children `actor` may see.
    fn filter_children(self, _actor: ActorId) -> Self
    where
        Self: Sized,
    {
        self
    }
}

/// Keep `node` only if `actor` owns it (or it has no owner), then recurse.
pub fn retain_owned<T: Owned>(node: T, actor: ActorId) -> Option<T> {
    match node.owner_id() {
        Some(owner) if owner != actor => None,
        _ => Some(node.filter_children(actor)),
    }
}

pub fn retain_all<T: Owned>(nodes: Vec<T>, actor: ActorId) -> Vec<T> {
    nodes
        .into_iter()
        .filter_map(|n| retain_owned(n, actor))
        .collect()
}

impl Owned for GradeView {
    fn owner_id(&self) -> Option<ActorId> {
        Some(self.owner_student_id)
    }
}

impl Owned for GradeWrite {
    fn owner_id(&self) -> Option<ActorId> {
        Some(self.evaluation.owner_student_id)
    }
}

impl Owned for GradeList {
    fn owner_id(&self) -> Option<ActorId> {
        Some(self.student.id)
    }

    fn filter_children(mut self, actor: ActorId) -> Self {
        self.grades = retain_all(self.grades, actor);
        self.total_grades = self.grades.len();
        self
    }
}

impl Owned for GradeSummary {
    fn owner_id(&self) -> Option<ActorId> {
        Some(self.student.id)
    }

    fn filter_children(mut self, actor: ActorId) -> Self {
        self.recent_evaluations = retain_all(self.recent_evaluations, actor);
        self
    }
}

impl Owned for StudentReport {
    fn owner_id(&self) -> Option<ActorId> {
        Some(self.student_id)
    }

    fn filter_children(self, actor: ActorId) -> Self {
        student_report(self.student_id, self.student_name, retain_all(self.grades, actor))
    }
}

impl Owned for ClassReport {
    fn owner_id(&self) -> Option<ActorId> {
        None
    }

    fn filter_children(mut self, actor: ActorId) -> Self {
        self.students = retain_all(self.students, actor);
        self.total_students = self.students.len();
        self.class_statistics = class_statistics(&self.students);
        self
    }
}

impl Owned for SubjectGrades {
    fn owner_id(&self) -> Option<ActorId> {
        None
    }

    fn filter_children(mut self, actor: ActorId) -> Self {
        self.grades = retain_all(self.grades, actor);
        self.total_grades = self.grades.len();
        self
    }
}

impl Owned for StudentStanding {
    fn owner_id(&self) -> Option<ActorId> {
        Some(self.student_id)
    }
}

impl Owned for DisciplineReport {
    fn owner_id(&self) -> Option<ActorId> {
        None
    }

    fn filter_children(mut self, actor: ActorId) -> Self {
        self.students = retain_all(self.students, actor);
        self.total_students = self.students.len();
        self.class_average =
            Statistics::from_values(self.students.iter().filter_map(|s| s.average)).mean;
        self
    }
}

impl Owned for ModuleRow {
    fn owner_id(&self) -> Option<ActorId> {
        Some(self.student_id)
    }
}

impl Owned for ModuleReport {
    fn owner_id(&self) -> Option<ActorId> {
        None
    }

    fn filter_children(mut self, actor: ActorId) -> Self {
        self.results = retain_all(self.results, actor);
        self.total_records = self.results.len();
        self
    }
}

/// Apply the ownership filter for `actor`. Teachers see results unchanged;
/// `None` means nothing in the result belongs to the student.
pub fn sanitize(role: Role, actor: ActorId, result: ToolResult) -> Option<ToolResult> {
    if role == Role::Teacher {
        return Some(result);
    }
    match result {
        ToolResult::Write(w) => retain_owned(w, actor).map(ToolResult::Write),
        ToolResult::Grades(g) => retain_owned(g, actor).map(ToolResult::Grades),
        ToolResult::Summary(s) => retain_owned(s, actor).map(ToolResult::Summary),
        ToolResult::ClassReport(r) => retain_owned(r, actor).map(ToolResult::ClassReport),
        ToolResult::SubjectGrades(s) => retain_owned(s, actor).map(ToolResult::SubjectGrades),
        ToolResult::DisciplineReport(r) => {
            retain_owned(r, actor).map(ToolResult::DisciplineReport)
        }
        ToolResult::ModuleReport(r) => retain_owned(r, actor).map(ToolResult::ModuleReport),
    }
}
