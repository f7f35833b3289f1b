use serde::Serialize;

use crate::extractor::{Entities, Intent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    StudentId,
    DisciplinaId,
    TurmaId,
    Modulo,
    Descricao,
    Valor,
    GradeId,
}

impl Field {
    pub fn key(&self) -> &'static str {
        match self {
            Field::StudentId => "student_id",
            Field::DisciplinaId => "disciplina_id",
            Field::TurmaId => "turma_id",
            Field::Modulo => "modulo",
            Field::Descricao => "descricao",
            Field::Valor => "valor",
            Field::GradeId => "grade_id",
        }
    }

    /// Label used when asking the user for the field.
    pub fn label(&self) -> &'static str {
        match self {
            Field::StudentId => "aluno",
            Field::DisciplinaId => "disciplina",
            Field::TurmaId => "turma",
            Field::Modulo => "módulo",
            Field::Descricao => "descrição da avaliação",
            Field::Valor => "valor da nota",
            Field::GradeId => "ID da nota",
        }
    }

    /// Present if the id or its `*_name` alternate is set.
    fn present(&self, e: &Entities) -> bool {
        match self {
            Field::StudentId => e.student_id.is_some() || e.student_name.is_some(),
            Field::DisciplinaId => e.disciplina_id.is_some() || e.disciplina_name.is_some(),
            Field::TurmaId => e.turma_id.is_some() || e.turma_name.is_some(),
            Field::Modulo => e.modulo.is_some(),
            Field::Descricao => e.descricao.is_some(),
            Field::Valor => e.valor.is_some(),
            Field::GradeId => e.grade_id.is_some(),
        }
    }
}

pub fn required_fields(intent: Intent) -> &'static [Field] {
    match intent {
        Intent::AddGrade => &[
            Field::StudentId,
            Field::DisciplinaId,
            Field::TurmaId,
            Field::Modulo,
            Field::Descricao,
            Field::Valor,
        ],
        Intent::UpdateGrade => &[Field::GradeId],
        Intent::ClassReport => &[Field::TurmaId],
        Intent::QueryGrades
        | Intent::Summary
        | Intent::DeleteGrade
        | Intent::Fallback
        | Intent::Blocked => &[],
    }
}

pub fn missing(intent: Intent, entities: &Entities) -> Vec<Field> {
    required_fields(intent)
        .iter()
        .copied()
        .filter(|f| !f.present(entities))
        .collect()
}
