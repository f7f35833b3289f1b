use once_cell::sync::Lazy;
use regex::Regex;

use super::{Block, Guardrail, PreContext};

pub const REASON: &str = "A eliminação de notas não é permitida no sistema. \
Se precisar corrigir uma nota, utilize a funcionalidade de atualização.";

// Verb, up to four filler tokens ("o registo da", "joao's last"), then the
// object. Runs on accent-folded text.
static DELETE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:apag\w*|delet\w*|remov\w*|exclu\w*|elimin\w*|erase|drop|wipe)\b(?:\s+[\w']+){0,4}?\s+(?:notas?|avaliac(?:ao|oes)|grades?|evaluations?|marks?|scores?)\b",
    )
    .unwrap()
});

// Passive or object-first phrasing: "a nota 3 tem de ser apagada",
// "João's grade should be deleted".
static DELETED_OBJECT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:notas?|avaliac(?:ao|oes)|grades?|evaluations?|marks?|scores?)\b(?:\s+[\w'#]+){0,4}?\s+(?:apagad[ao]s?|eliminad[ao]s?|removid[ao]s?|excluid[ao]s?|deleted|removed|erased)\b",
    )
    .unwrap()
});

/// True when accent-folded `text` asks for a grade to be deleted or removed.
pub fn is_deletion_request(folded: &str) -> bool {
    DELETE_RE.is_match(folded) || DELETED_OBJECT_RE.is_match(folded)
}

/// Blocks any request to delete or remove a grade, for every role.
pub struct DeletionGuardrail;

impl Guardrail for DeletionGuardrail {
    fn name(&self) -> &str {
        "deletion"
    }

    fn check(&self, ctx: &PreContext) -> Option<Block> {
        if is_deletion_request(&ctx.folded) {
            return Some(Block {
                rule: self.name().to_string(),
                reason: REASON.to_string(),
            });
        }
        None
    }
}
