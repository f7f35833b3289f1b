//! Student asking for someone else's grades, averages or report.
//!
//! The patterns capture the word after "notas do/da/de", "grades of" and
//! similar, then decide in code whether that word names a person. Words that
//! refer to the speaker or to school vocabulary (subjects, modules, the
//! class) are not people, so "as minhas notas de Matemática" is allowed.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::{Block, Guardrail, PreContext};
use crate::model::ActorId;

pub const REASON: &str = "Não é possível aceder às notas de outros alunos. \
Apenas pode consultar as suas próprias notas.";

static PT_TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:notas?|medias?|resumo|avaliac(?:ao|oes)|resultados?|relatorio|boletim)\s+(?:d[oa]s?|de)\s+(\w+)",
    )
    .unwrap()
});

static EN_TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:grades?|marks?|scores?|average|summary|report)\s+(?:of|for)\s+(?:the\s+)?(\w+)",
    )
    .unwrap()
});

static EN_POSSESSIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(\w+)'s\s+(?:grades?|marks?|scores?|average|report|summary)\b").unwrap()
});

static EXPLICIT_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:student_id|aluno_id|user_id)\s*[:=]\s*(\d+)|\b(?:aluno|student)\s+(?:id\s+|#)?(\d+)\b",
    )
    .unwrap()
});

static FIRST_PERSON: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "minha", "minhas", "meu", "meus", "mim", "eu", "my", "mine", "me", "myself", "i",
    ]
    .into_iter()
    .collect()
});

// Accent-folded school vocabulary that can follow "notas de" without naming
// a person.
static NON_PERSON: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "nota", "notas", "media", "medias", "modulo", "modulos", "capitulo", "teste", "testes",
        "trabalho", "trabalhos", "projeto", "projetos", "ficha", "fichas", "exame", "exames",
        "disciplina", "disciplinas", "turma", "turmas", "classe", "avaliacao", "avaliacoes",
        "periodo", "semestre", "ano", "hoje", "ontem", "semana", "mes", "este", "esta",
        "ultimo", "ultima", "todas", "todos",
        "matematica", "portugues", "ingles", "frances", "espanhol", "alemao", "historia",
        "ciencias", "fisica", "quimica", "biologia", "geografia", "filosofia", "educacao",
        "artes", "musica", "informatica", "economia", "psicologia", "sociologia", "latim",
        "math", "maths", "mathematics", "english", "french", "spanish", "german", "science",
        "history", "physics", "chemistry", "biology", "geography", "philosophy", "art",
        "music", "module", "test", "exam", "subject", "class", "this", "last", "all",
        "semester", "term", "year", "today", "grades", "marks",
    ]
    .into_iter()
    .collect()
});

/// True for accent-folded words that refer to the speaker or to school
/// vocabulary rather than to a person.
pub fn is_school_term(folded_word: &str) -> bool {
    FIRST_PERSON.contains(folded_word) || NON_PERSON.contains(folded_word)
}

fn names_a_person(word: &str) -> bool {
    !(word.chars().all(|c| c.is_ascii_digit()) || is_school_term(word))
}

fn targets_other_student(text: &str, actor_id: ActorId) -> bool {
    for re in [&*PT_TARGET_RE, &*EN_TARGET_RE, &*EN_POSSESSIVE_RE] {
        if re
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .any(|m| names_a_person(m.as_str()))
        {
            return true;
        }
    }
    EXPLICIT_ID_RE.captures_iter(text).any(|c| {
        c.get(1)
            .or_else(|| c.get(2))
            .map(|m| m.as_str().parse::<ActorId>().map_or(true, |id| id != actor_id))
            .unwrap_or(false)
    })
}

pub struct ThirdPartyGuardrail;

impl Guardrail for ThirdPartyGuardrail {
    fn name(&self) -> &str {
        "third_party"
    }

    fn check(&self, ctx: &PreContext) -> Option<Block> {
        if ctx.is_student() && targets_other_student(&ctx.folded, ctx.actor_id) {
            return Some(Block {
                rule: self.name().to_string(),
                reason: REASON.to_string(),
            });
        }
        None
    }
}
