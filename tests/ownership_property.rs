use chrono::{DateTime, Utc};
use gradegate::model::{ActorId, Role};
use gradegate::ops::{
    AppliedFilters, ClassReport, DisciplineReport, GradeList, GradeSummary, GradeView,
    ModuleReport, ModuleRow, NamedRef, Statistics, StudentRef, StudentReport, StudentStanding,
    SubjectGrades, ToolResult,
};
use gradegate::sanitize::sanitize;
use proptest::prelude::*;

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(0, 0).unwrap()
}

fn view(id: i64, owner: ActorId, value: f64) -> GradeView {
    GradeView {
        id,
        owner_student_id: owner,
        student_name: format!("Aluno {}", owner),
        subject_id: 1,
        subject_name: "Matemática".into(),
        class_id: 1,
        class_name: "10A".into(),
        module: "Módulo 1".into(),
        description: "Teste".into(),
        value,
        date: epoch(),
        last_modified_by: None,
        last_modified_at: epoch(),
    }
}

fn views() -> impl Strategy<Value = Vec<GradeView>> {
    prop::collection::vec((1i64..6, 0u8..=20), 0..12).prop_map(|items| {
        items
            .into_iter()
            .enumerate()
            .map(|(i, (owner, v))| view(i as i64 + 1, owner, v as f64))
            .collect()
    })
}

fn result_tree() -> impl Strategy<Value = ToolResult> {
    prop_oneof![
        (1i64..6, views()).prop_map(|(student, grades)| ToolResult::Grades(GradeList {
            student: StudentRef {
                id: student,
                name: "x".into()
            },
            filters_applied: AppliedFilters::default(),
            total_grades: grades.len(),
            grades,
        })),
        views().prop_map(|grades| ToolResult::SubjectGrades(SubjectGrades {
            subject: NamedRef {
                id: 1,
                name: "Matemática".into()
            },
            filters_applied: AppliedFilters::default(),
            total_grades: grades.len(),
            grades,
        })),
        (1i64..6, views()).prop_map(|(student, recent)| ToolResult::Summary(GradeSummary {
            student: StudentRef {
                id: student,
                name: "x".into()
            },
            subject_id: None,
            total_evaluations: recent.len(),
            average: None,
            min_grade: None,
            max_grade: None,
            averages_by_subject: None,
            recent_evaluations: recent,
        })),
        prop::collection::vec((1i64..6, views()), 0..5).prop_map(|rows| {
            let students: Vec<StudentReport> = rows
                .into_iter()
                .map(|(id, grades)| StudentReport {
                    student_id: id,
                    student_name: format!("Aluno {}", id),
                    total_evaluations: grades.len(),
                    average: None,
                    min_grade: None,
                    max_grade: None,
                    grades,
                })
                .collect();
            ToolResult::ClassReport(ClassReport {
                class: NamedRef {
                    id: 1,
                    name: "10A".into(),
                },
                subject_id: None,
                module: None,
                total_students: students.len(),
                students,
                class_statistics: Statistics::from_values(Vec::new()),
            })
        }),
        prop::collection::vec((1i64..6, 0u8..=20), 0..6).prop_map(|rows| {
            let students: Vec<StudentStanding> = rows
                .into_iter()
                .map(|(id, v)| StudentStanding {
                    student_id: id,
                    student_name: format!("Aluno {}", id),
                    total_evaluations: 1,
                    average: Some(v as f64),
                    min_grade: Some(v as f64),
                    max_grade: Some(v as f64),
                })
                .collect();
            ToolResult::DisciplineReport(DisciplineReport {
                subject: NamedRef {
                    id: 1,
                    name: "Matemática".into(),
                },
                class_id: None,
                total_students: students.len(),
                class_average: None,
                students,
            })
        }),
        prop::collection::vec((1i64..6, 1i64..3), 0..8).prop_map(|rows| {
            let results: Vec<ModuleRow> = rows
                .into_iter()
                .map(|(id, subject)| ModuleRow {
                    student_id: id,
                    student_name: format!("Aluno {}", id),
                    subject_id: subject,
                    subject_name: format!("Disciplina {}", subject),
                    total_evaluations: 1,
                    average: Some(12.0),
                })
                .collect();
            ToolResult::ModuleReport(ModuleReport {
                module: "Módulo 1".into(),
                filters_applied: AppliedFilters::default(),
                total_records: results.len(),
                results,
            })
        }),
    ]
}

/// Every owner id reachable in the tree, containers included.
fn owners(result: &ToolResult) -> Vec<ActorId> {
    let of = |grades: &[GradeView]| grades.iter().map(|g| g.owner_student_id).collect::<Vec<_>>();
    match result {
        ToolResult::Write(w) => vec![w.evaluation.owner_student_id],
        ToolResult::Grades(g) => {
            let mut ids = vec![g.student.id];
            ids.extend(of(&g.grades));
            ids
        }
        ToolResult::Summary(s) => {
            let mut ids = vec![s.student.id];
            ids.extend(of(&s.recent_evaluations));
            ids
        }
        ToolResult::ClassReport(r) => r
            .students
            .iter()
            .flat_map(|s| std::iter::once(s.student_id).chain(of(&s.grades)))
            .collect(),
        ToolResult::SubjectGrades(s) => of(&s.grades),
        ToolResult::DisciplineReport(r) => r.students.iter().map(|s| s.student_id).collect(),
        ToolResult::ModuleReport(r) => r.results.iter().map(|row| row.student_id).collect(),
    }
}

proptest! {
    #[test]
    fn students_only_ever_see_their_own_data(tree in result_tree(), actor in 1i64..6) {
        if let Some(filtered) = sanitize(Role::Student, actor, tree) {
            prop_assert!(owners(&filtered).iter().all(|id| *id == actor));
            if let ToolResult::ClassReport(r) = &filtered {
                prop_assert_eq!(r.total_students, r.students.len());
                for s in &r.students {
                    prop_assert_eq!(s.total_evaluations, s.grades.len());
                }
            }
        }
    }

    #[test]
    fn sanitizing_twice_changes_nothing(tree in result_tree(), actor in 1i64..6) {
        let once = sanitize(Role::Student, actor, tree);
        let twice = once.clone().and_then(|r| sanitize(Role::Student, actor, r));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn teachers_see_results_unchanged(tree in result_tree(), actor in 1i64..6) {
        prop_assert_eq!(sanitize(Role::Teacher, actor, tree.clone()), Some(tree));
    }
}
