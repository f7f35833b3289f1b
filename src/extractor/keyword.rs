//! Deterministic keyword extractor. Always available; used alone or as the
//! fallback for a remote extractor.

use std::ops::Range;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Entities, ExtractError, ExtractRequest, Extraction, Extractor, Intent};
use crate::guardrails::deletion::is_deletion_request;
use crate::guardrails::third_party::is_school_term;
use crate::model::Role;
use crate::util::{contains_word, fold_text};

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

static ADD_WORDS: Lazy<Vec<String>> = Lazy::new(|| {
    words(&[
        "adicionar", "adiciona", "adicione", "inserir", "insere", "insira", "nova nota", "lancar",
        "lanca", "add",
    ])
});
static UPDATE_WORDS: Lazy<Vec<String>> = Lazy::new(|| {
    words(&[
        "atualizar", "atualiza", "atualize", "modificar", "modifica", "alterar", "altera", "mudar",
        "muda", "corrigir", "corrige", "update", "change",
    ])
});
static SUMMARY_WORDS: Lazy<Vec<String>> =
    Lazy::new(|| words(&["media", "medias", "resumo", "summary", "average"]));
static REPORT_WORDS: Lazy<Vec<String>> =
    Lazy::new(|| words(&["relatorio", "report", "turma"]));
static QUERY_WORDS: Lazy<Vec<String>> = Lazy::new(|| {
    words(&[
        "nota", "notas", "grade", "grades", "avaliacao", "avaliacoes", "marks",
    ])
});

static MODULE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:modulo|capitulo|module)\s*(\d+|[ivx]+)\b").unwrap());
static CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:turma|class)\s+(\d+[a-z]?)\b").unwrap());
static STUDENT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:aluno|aluna|student)\s+(?:id\s*)?#?(\d+)\b").unwrap());
static GRADE_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:nota|avaliacao|grade|evaluation)\s*(?:#\s*|id\s*#?\s*)(\d+)\b|\bid\s+(?:da\s+)?(?:nota|avaliacao)\s*#?(\d+)\b",
    )
    .unwrap()
});
// "atualizar nota 3 para 15": the number right before "para" names the grade.
static UPDATE_TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:nota|avaliacao|grade|evaluation)\s+(\d+)\s+(?:para|to)\b").unwrap()
});
static DELETE_TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:nota|avaliacao|grade|evaluation)\s+(\d+)\b").unwrap()
});
static DESCRIPTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(teste|trabalho|projeto|ficha|exame|test|exam|project)\b(?:\s+(\d+)\b)?")
        .unwrap()
});
static SUBJECT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:disciplina|subject)\s+(?:de\s+)?(\w+)").unwrap());
static VALUE_AFTER_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:nota|valor|value|grade|para|to|com|with|de)\s+(\d{1,2}(?:[.,]\d+)?)\b")
        .unwrap()
});
static VALUE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,2}(?:[.,]\d+)?)\b").unwrap());
// Capitalised word after a preposition, on the raw text.
static STUDENT_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:ao|à|a|do|da|de|para|aluno|aluna|for|of|student)\s+(\p{Lu}\p{L}+)").unwrap()
});

const SUBJECT_VOCABULARY: &[(&str, &str)] = &[
    ("matematica", "Matemática"),
    ("math", "Matemática"),
    ("maths", "Matemática"),
    ("portugues", "Português"),
    ("ingles", "Inglês"),
    ("english", "Inglês"),
    ("historia", "História"),
    ("history", "História"),
    ("ciencias", "Ciências"),
    ("science", "Ciências"),
    ("fisica", "Física"),
    ("physics", "Física"),
    ("quimica", "Química"),
    ("chemistry", "Química"),
    ("biologia", "Biologia"),
    ("geografia", "Geografia"),
    ("filosofia", "Filosofia"),
    ("informatica", "Informática"),
    ("frances", "Francês"),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordExtractor;

impl KeywordExtractor {
    pub fn extract_sync(&self, req: &ExtractRequest<'_>) -> Extraction {
        let folded = fold_text(req.message);
        let intent = classify(&folded, req.role);
        let entities = extract_entities(req.message, &folded, intent);
        Extraction { intent, entities }
    }
}

#[async_trait::async_trait]
impl Extractor for KeywordExtractor {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn extract(&self, req: &ExtractRequest<'_>) -> Result<Extraction, ExtractError> {
        Ok(self.extract_sync(req))
    }
}

/// Keyword groups are tried in a fixed order; class reports are only
/// recognised for teachers. Deletion phrasing wins over everything else.
pub fn classify(folded: &str, role: Role) -> Intent {
    if is_deletion_request(folded) {
        Intent::DeleteGrade
    } else if contains_word(&ADD_WORDS, folded) {
        Intent::AddGrade
    } else if contains_word(&UPDATE_WORDS, folded) {
        Intent::UpdateGrade
    } else if contains_word(&SUMMARY_WORDS, folded) {
        Intent::Summary
    } else if role == Role::Teacher && contains_word(&REPORT_WORDS, folded) {
        Intent::ClassReport
    } else if contains_word(&QUERY_WORDS, folded) {
        Intent::QueryGrades
    } else {
        Intent::Fallback
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn to_roman_or_digits(raw: &str) -> String {
    if raw.chars().all(|c| c.is_ascii_digit()) {
        raw.to_string()
    } else {
        raw.to_ascii_uppercase()
    }
}

/// Blank out byte ranges so later number scans skip them. Spaces keep every
/// other offset valid.
fn scrub(text: &str, spans: &[Range<usize>]) -> String {
    let mut out = text.to_string();
    for span in spans {
        out.replace_range(span.clone(), &" ".repeat(span.len()));
    }
    out
}

fn parse_value(raw: &str) -> Option<f64> {
    raw.replace(',', ".").parse().ok()
}

fn extract_entities(raw: &str, folded: &str, intent: Intent) -> Entities {
    let mut e = Entities::default();
    let mut consumed: Vec<Range<usize>> = Vec::new();

    if let Some(c) = MODULE_RE.captures(folded) {
        e.modulo = Some(format!("Módulo {}", to_roman_or_digits(&c[1])));
        consumed.push(c.get(0).map_or(0..0, |m| m.range()));
    }
    if let Some(c) = CLASS_RE.captures(folded) {
        e.turma_name = Some(c[1].to_uppercase());
        consumed.push(c.get(0).map_or(0..0, |m| m.range()));
    }
    if let Some(c) = STUDENT_ID_RE.captures(folded) {
        e.student_id = c[1].parse().ok();
        consumed.push(c.get(0).map_or(0..0, |m| m.range()));
    }
    if let Some(c) = GRADE_ID_RE.captures(folded) {
        e.grade_id = c.get(1).or_else(|| c.get(2)).and_then(|m| m.as_str().parse().ok());
        consumed.push(c.get(0).map_or(0..0, |m| m.range()));
    } else if intent == Intent::DeleteGrade {
        if let Some(c) = DELETE_TARGET_RE.captures(folded) {
            e.grade_id = c[1].parse().ok();
            consumed.push(c.get(1).map_or(0..0, |m| m.range()));
        }
    } else if intent == Intent::UpdateGrade {
        if let Some(c) = UPDATE_TARGET_RE.captures(folded) {
            e.grade_id = c[1].parse().ok();
            consumed.push(c.get(1).map_or(0..0, |m| m.range()));
        }
    }
    if let Some(c) = DESCRIPTION_RE.captures(folded) {
        let mut desc = capitalize(&c[1]);
        if let Some(n) = c.get(2) {
            desc.push(' ');
            desc.push_str(n.as_str());
        }
        e.descricao = Some(desc);
        consumed.push(c.get(0).map_or(0..0, |m| m.range()));
    }

    e.disciplina_name = SUBJECT_RE
        .captures(folded)
        .map(|c| c[1].to_string())
        .or_else(|| {
            folded
                .split(|c: char| !c.is_alphanumeric())
                .find_map(|w| {
                    SUBJECT_VOCABULARY
                        .iter()
                        .find(|(k, _)| *k == w)
                        .map(|(_, canonical)| canonical.to_string())
                })
        });

    e.student_name = STUDENT_NAME_RE
        .captures_iter(raw)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|w| !is_school_term(&fold_text(w)))
        .map(str::to_string);

    if matches!(intent, Intent::AddGrade | Intent::UpdateGrade) {
        let remaining = scrub(folded, &consumed);
        e.valor = VALUE_AFTER_KEYWORD_RE
            .captures(&remaining)
            .or_else(|| VALUE_RE.captures(&remaining))
            .and_then(|c| parse_value(&c[1]));
    }
    e
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(role: Role, msg: &str) -> Extraction {
        KeywordExtractor.extract_sync(&ExtractRequest {
            message: msg,
            actor_id: 1,
            role,
            name: "Ana",
        })
    }

    #[test]
    fn intents_follow_keyword_priority() {
        assert_eq!(run(Role::Teacher, "Adicionar nota 18 ao Miguel").intent, Intent::AddGrade);
        assert_eq!(run(Role::Teacher, "Atualizar nota 3 para 15").intent, Intent::UpdateGrade);
        assert_eq!(run(Role::Student, "Qual é a minha média?").intent, Intent::Summary);
        assert_eq!(run(Role::Teacher, "Relatório da turma 10A").intent, Intent::ClassReport);
        assert_eq!(run(Role::Student, "Relatório da turma 10A").intent, Intent::Fallback);
        assert_eq!(run(Role::Student, "Quero ver as minhas notas").intent, Intent::QueryGrades);
        assert_eq!(run(Role::Student, "Olá, bom dia").intent, Intent::Fallback);
    }

    #[test]
    fn deletion_phrasing_is_its_own_intent() {
        for msg in [
            "Please remove João's last grade",
            "Remove the last two grades of Maria",
            "elimina o registo da avaliação 3",
            "Apagar a nota do Miguel",
        ] {
            assert_eq!(run(Role::Teacher, msg).intent, Intent::DeleteGrade, "{msg}");
            assert_eq!(run(Role::Student, msg).intent, Intent::DeleteGrade, "{msg}");
        }
        assert_eq!(run(Role::Teacher, "apagar a avaliação 3").entities.grade_id, Some(3));
    }

    #[test]
    fn add_grade_entities() {
        let e = run(
            Role::Teacher,
            "Adicionar nota 18,5 ao João em Matemática, turma 10A, módulo 2, teste 1",
        )
        .entities;
        assert_eq!(e.valor, Some(18.5));
        assert_eq!(e.student_name.as_deref(), Some("João"));
        assert_eq!(e.disciplina_name.as_deref(), Some("Matemática"));
        assert_eq!(e.turma_name.as_deref(), Some("10A"));
        assert_eq!(e.modulo.as_deref(), Some("Módulo 2"));
        assert_eq!(e.descricao.as_deref(), Some("Teste 1"));
    }

    #[test]
    fn update_picks_grade_id_and_new_value() {
        let e = run(Role::Teacher, "Atualizar nota 3 para 15").entities;
        assert_eq!(e.grade_id, Some(3));
        assert_eq!(e.valor, Some(15.0));

        let e = run(Role::Teacher, "alterar a nota #12 para 9,5").entities;
        assert_eq!(e.grade_id, Some(12));
        assert_eq!(e.valor, Some(9.5));
    }

    #[test]
    fn roman_modules_and_student_ids() {
        let e = run(Role::Teacher, "notas do aluno 3 no capítulo iv").entities;
        assert_eq!(e.student_id, Some(3));
        assert_eq!(e.modulo.as_deref(), Some("Módulo IV"));
        assert_eq!(e.valor, None);
    }

    #[test]
    fn subjects_are_not_names() {
        let e = run(Role::Student, "Quero ver as minhas notas de Matemática").entities;
        assert_eq!(e.student_name, None);
        assert_eq!(e.disciplina_name.as_deref(), Some("Matemática"));
    }
}
