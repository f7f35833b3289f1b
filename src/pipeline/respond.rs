//! User-facing text (pt-PT).

use std::fmt::Write as _;

use crate::error::GradebookError;
use crate::extractor::Intent;
use crate::ops::{
    ClassReport, DisciplineReport, GradeList, GradeSummary, GradeView, ModuleReport,
    SubjectGrades, ToolResult,
};

use super::state::PipelineState;

pub const DEFAULT_BLOCKED: &str = "Pedido bloqueado.";
pub const UNKNOWN_USER: &str = "Utilizador não encontrado no sistema.";
pub const DONE: &str = "Operação concluída.";
pub const INTERNAL: &str = "Ocorreu um erro interno ao processar o pedido. Tente novamente.";
pub const HELP: &str = "Posso ajudá-lo com:\n\
- Consultar notas\n\
- Ver médias e resumos\n\
- Adicionar notas (apenas professores)\n\
- Atualizar notas (apenas professores)\n\
- Relatórios de turma (apenas professores)";

const LIST_LIMIT: usize = 10;

/// Refusal or error text for an executor error.
pub fn describe_error(err: &GradebookError) -> String {
    match err {
        GradebookError::UnknownActor(_) => UNKNOWN_USER.to_string(),
        GradebookError::OwnershipViolation { .. } => {
            "Não é possível aceder às notas de outros alunos.".to_string()
        }
        GradebookError::RoleViolation { .. } => {
            "Esta operação só pode ser realizada por um professor.".to_string()
        }
        GradebookError::FeatureNotAvailable(_) => {
            "A eliminação de notas não é permitida no sistema.".to_string()
        }
        GradebookError::NotFound { entity, id } => {
            let what = match *entity {
                "student" => "Aluno",
                "subject" => "Disciplina",
                "class" => "Turma",
                "grade" => "Nota",
                other => other,
            };
            format!("Erro de validação: {} {} não encontrado(a).", what, id)
        }
        GradebookError::ValueOutOfRange(v) => format!(
            "Erro de validação: o valor da nota deve estar entre 0 e 20 (recebido {}).",
            fmt_num(*v)
        ),
        GradebookError::Validation(msg) => format!("Erro de validação: {}", msg),
        GradebookError::Internal(_) => INTERNAL.to_string(),
    }
}

/// Render a number the way the gradebook always has: whole numbers keep one
/// decimal ("15.0").
pub fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(fmt_num).unwrap_or_else(|| "N/A".to_string())
}

pub fn render(state: &PipelineState) -> String {
    if state.blocked {
        return state
            .blocked_reason
            .clone()
            .unwrap_or_else(|| DEFAULT_BLOCKED.to_string());
    }
    if let Some(err) = &state.error {
        return err.clone();
    }
    if state.ask_missing_fields {
        let labels: Vec<&str> = state.missing_fields.iter().map(|f| f.label()).collect();
        return format!("Por favor, especifique: {}", labels.join(", "));
    }
    if state.intent == Intent::Fallback {
        return HELP.to_string();
    }
    match &state.tool_result {
        Some(result) => format_result(state.intent, result),
        None => DONE.to_string(),
    }
}

fn format_result(intent: Intent, result: &ToolResult) -> String {
    let text = match result {
        ToolResult::Write(w) if intent == Intent::AddGrade => format!(
            "✓ Nota adicionada com sucesso!\nAluno: {}\nDisciplina: {}\nNota: {}",
            w.evaluation.student_name,
            w.evaluation.subject_name,
            fmt_num(w.evaluation.value)
        ),
        ToolResult::Write(_) => "✓ Nota atualizada com sucesso!".to_string(),
        ToolResult::Grades(list) => format_grades(list),
        ToolResult::Summary(s) => format_summary(s),
        ToolResult::ClassReport(r) => format_class_report(r),
        ToolResult::SubjectGrades(s) => format_subject(s),
        ToolResult::DisciplineReport(r) => format_discipline_report(r),
        ToolResult::ModuleReport(r) => format_module_report(r),
    };
    text.trim_end().to_string()
}

fn push_grade_lines(out: &mut String, grades: &[GradeView]) {
    for g in grades.iter().take(LIST_LIMIT) {
        writeln!(
            out,
            "• {} - {}: {} ({})",
            g.subject_name,
            g.description,
            fmt_num(g.value),
            g.module
        )
        .ok();
    }
    if grades.len() > LIST_LIMIT {
        write!(out, "\n... e mais {} notas.", grades.len() - LIST_LIMIT).ok();
    }
}

fn format_grades(list: &GradeList) -> String {
    if list.grades.is_empty() {
        return "Nenhuma nota encontrada.".to_string();
    }
    let mut out = format!("Notas de {}:\n", list.student.name);
    push_grade_lines(&mut out, &list.grades);
    out
}

fn format_subject(s: &SubjectGrades) -> String {
    if s.grades.is_empty() {
        return "Nenhuma nota encontrada.".to_string();
    }
    let mut out = format!("Notas de {}:\n", s.subject.name);
    push_grade_lines(&mut out, &s.grades);
    out
}

fn format_summary(s: &GradeSummary) -> String {
    let mut out = format!(
        "Resumo de {}:\nTotal de avaliações: {}\nMédia geral: {}\n",
        s.student.name,
        s.total_evaluations,
        fmt_opt(s.average)
    );
    if let Some(by_subject) = s.averages_by_subject.as_ref().filter(|b| !b.is_empty()) {
        out.push_str("\nMédias por disciplina:\n");
        for b in by_subject {
            writeln!(out, "• {}: {}", b.subject_name, fmt_num(b.average)).ok();
        }
    }
    out
}

fn format_class_report(r: &ClassReport) -> String {
    let mut out = format!(
        "Relatório da turma {}:\nTotal de alunos: {}\nMédia da turma: {}\n\nAlunos:\n",
        r.class.name,
        r.students.len(),
        fmt_opt(r.class_statistics.mean)
    );
    let mut students: Vec<_> = r.students.iter().collect();
    students.sort_by(|a, b| {
        b.average
            .unwrap_or(0.0)
            .total_cmp(&a.average.unwrap_or(0.0))
    });
    for s in students {
        writeln!(out, "• {}: {}", s.student_name, fmt_opt(s.average)).ok();
    }
    out
}

fn format_discipline_report(r: &DisciplineReport) -> String {
    let mut out = format!(
        "Relatório de {}:\nTotal de alunos: {}\nMédia geral: {}\n",
        r.subject.name,
        r.total_students,
        fmt_opt(r.class_average)
    );
    if r.students.is_empty() {
        out.push_str("\nNenhuma nota encontrada.");
        return out;
    }
    out.push_str("\nAlunos:\n");
    for s in &r.students {
        writeln!(
            out,
            "• {}: {} (mín. {}, máx. {}, {} avaliações)",
            s.student_name,
            fmt_opt(s.average),
            fmt_opt(s.min_grade),
            fmt_opt(s.max_grade),
            s.total_evaluations
        )
        .ok();
    }
    out
}

fn format_module_report(r: &ModuleReport) -> String {
    if r.results.is_empty() {
        return format!("Nenhuma nota encontrada para o {}.", r.module);
    }
    let mut out = format!("Relatório do {}:\n", r.module);
    for row in &r.results {
        writeln!(
            out,
            "• {} - {}: {}",
            row.student_name,
            row.subject_name,
            fmt_opt(row.average)
        )
        .ok();
    }
    out
}
