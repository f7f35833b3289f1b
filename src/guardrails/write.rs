use once_cell::sync::Lazy;
use regex::Regex;

use super::{Block, Guardrail, PreContext};

pub const REASON: &str = "Apenas professores podem adicionar ou modificar notas.";

static WRITE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:adicionar?|adicione|inserir|insere|insira|criar?|crie|atualizar?|atualize|modificar?|modifique|alterar?|altere|mudar?|mude|lancar?|lance|add|insert|create|update|modify|change|alter)\b(?:\s+\w+){0,2}?\s+(?:notas?|avaliac(?:ao|oes)|grades?|evaluations?|marks?)\b",
    )
    .unwrap()
});

/// Blocks students asking to create or modify a grade.
pub struct WriteGuardrail;

impl Guardrail for WriteGuardrail {
    fn name(&self) -> &str {
        "write"
    }

    fn check(&self, ctx: &PreContext) -> Option<Block> {
        if ctx.is_student() && WRITE_RE.is_match(&ctx.folded) {
            return Some(Block {
                rule: self.name().to_string(),
                reason: REASON.to_string(),
            });
        }
        None
    }
}
