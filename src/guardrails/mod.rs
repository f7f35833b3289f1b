//! Heuristic pre-check over the raw request text.
//!
//! Each rule looks only at the text and the actor's stored role; none of
//! them touch the gradebook. The `GuardrailChain` runs the configured rules
//! in order and stops at the first block. A wrong answer here is tolerated:
//! every operation enforces authorization again on its own.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;

use crate::extractor::http::HttpExtractorDefinition;
use crate::model::{ActorId, Role};
use crate::util::fold_text;

pub mod deletion;
pub mod policy_pack;
pub mod third_party;
pub mod write;

use self::deletion::DeletionGuardrail;
use self::policy_pack::PolicyPackGuardrail;
use self::third_party::ThirdPartyGuardrail;
use self::write::WriteGuardrail;

/// Contents of `GRADEGATE_POLICY_FILE`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardrailConfig {
    /// Extra rules for the `policy_pack` guardrail.
    #[serde(default)]
    pub policies: Vec<policy_pack::PolicyRule>,
    /// Optional remote intent extractor.
    #[serde(default)]
    pub extractor: Option<HttpExtractorDefinition>,
}

/// What a rule gets to see.
#[derive(Clone, Debug)]
pub struct PreContext {
    pub actor_id: ActorId,
    pub role: Role,
    /// Lower-cased message.
    pub text: String,
    /// Lower-cased message with accents removed.
    pub folded: String,
}

impl PreContext {
    pub fn new(actor_id: ActorId, role: Role, message: &str) -> Self {
        Self {
            actor_id,
            role,
            text: message.to_lowercase(),
            folded: fold_text(message),
        }
    }

    pub fn is_student(&self) -> bool {
        self.role == Role::Student
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Name of the rule that fired.
    pub rule: String,
    /// User-facing refusal.
    pub reason: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PreCheck {
    Allow,
    Block(Block),
}

impl PreCheck {
    pub fn is_blocked(&self) -> bool {
        matches!(self, PreCheck::Block(_))
    }
}

pub trait Guardrail: Send + Sync {
    fn name(&self) -> &str;
    fn check(&self, ctx: &PreContext) -> Option<Block>;
}

#[derive(Clone)]
pub struct GuardrailChain {
    rules: Vec<Arc<dyn Guardrail>>,
    warn_ms: u64,
}

impl GuardrailChain {
    /// Build the chain from rule names. Unknown names are skipped with a
    /// warning; `policy_pack` is only added when rules are configured.
    pub fn new(order: &[String], cfg: &GuardrailConfig, warn_ms: u64) -> Self {
        let mut rules: Vec<Arc<dyn Guardrail>> = Vec::new();
        for name in order {
            match name.as_str() {
                "deletion" => rules.push(Arc::new(DeletionGuardrail)),
                "third_party" => rules.push(Arc::new(ThirdPartyGuardrail)),
                "write" => rules.push(Arc::new(WriteGuardrail)),
                "policy_pack" => {
                    if !cfg.policies.is_empty() {
                        rules.push(Arc::new(PolicyPackGuardrail::new(cfg.policies.clone())));
                    }
                }
                _ => {
                    tracing::warn!(rule = %name, "unknown guardrail name, skipping");
                }
            }
        }
        Self { rules, warn_ms }
    }

    /// Run the rules in order. Returns the verdict and per-rule timings in
    /// microseconds for the rules that actually ran.
    pub fn check(&self, ctx: &PreContext) -> (PreCheck, Vec<(String, u64)>) {
        let mut timings = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let start = Instant::now();
            let outcome = rule.check(ctx);
            let elapsed = start.elapsed();
            if elapsed.as_millis() as u64 > self.warn_ms {
                tracing::warn!(
                    rule = %rule.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    warn_ms = self.warn_ms,
                    "guardrail exceeded warn threshold"
                );
            }
            timings.push((rule.name().to_string(), elapsed.as_micros() as u64));
            if let Some(block) = outcome {
                tracing::info!(rule = %block.rule, actor_id = ctx.actor_id, "pre-check blocked request");
                return (PreCheck::Block(block), timings);
            }
        }
        (PreCheck::Allow, timings)
    }

    pub fn names(&self) -> Vec<String> {
        self.rules.iter().map(|r| r.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

pub const DEFAULT_ORDER: [&str; 4] = ["deletion", "third_party", "write", "policy_pack"];

/// Rule order from `GRADEGATE_GUARDRAILS`. Unset means the default order;
/// an empty value disables the pre-check entirely.
pub fn parse_guardrail_order() -> Vec<String> {
    match std::env::var("GRADEGATE_GUARDRAILS") {
        Ok(var) => var
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => DEFAULT_ORDER.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_chain() -> GuardrailChain {
        let order: Vec<String> = DEFAULT_ORDER.iter().map(|s| s.to_string()).collect();
        GuardrailChain::new(&order, &GuardrailConfig::default(), 120)
    }

    fn verdict(role: Role, actor: ActorId, msg: &str) -> PreCheck {
        default_chain().check(&PreContext::new(actor, role, msg)).0
    }

    fn blocked_by(role: Role, actor: ActorId, msg: &str) -> Option<String> {
        match verdict(role, actor, msg) {
            PreCheck::Block(b) => Some(b.rule),
            PreCheck::Allow => None,
        }
    }

    #[test]
    fn policy_pack_needs_rules() {
        let chain = default_chain();
        assert_eq!(chain.names(), vec!["deletion", "third_party", "write"]);
    }

    #[test]
    fn unknown_names_are_skipped() {
        let order = vec!["write".to_string(), "bogus".to_string()];
        let chain = GuardrailChain::new(&order, &GuardrailConfig::default(), 120);
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn canonical_messages() {
        let s = Role::Student;
        let t = Role::Teacher;
        assert_eq!(
            blocked_by(s, 2, "Mostra as notas do João").as_deref(),
            Some("third_party")
        );
        assert_eq!(blocked_by(t, 1, "Mostra as notas do João"), None);
        assert_eq!(blocked_by(s, 2, "Quero ver as minhas notas de Matemática"), None);
        assert_eq!(blocked_by(s, 2, "Qual é a minha média?"), None);
        assert_eq!(
            blocked_by(s, 2, "Apagar a nota do Miguel").as_deref(),
            Some("deletion")
        );
        assert_eq!(
            blocked_by(t, 1, "Deletar avaliação 5").as_deref(),
            Some("deletion")
        );
        assert_eq!(
            blocked_by(s, 2, "Adicionar nota 15 ao Pedro").as_deref(),
            Some("write")
        );
        assert_eq!(blocked_by(t, 1, "Adicionar nota 18 ao Miguel"), None);
        assert_eq!(
            blocked_by(s, 2, "ver notas da Maria").as_deref(),
            Some("third_party")
        );
    }

    #[test]
    fn first_block_wins_and_later_rules_do_not_run() {
        let (v, timings) =
            default_chain().check(&PreContext::new(2, Role::Student, "apagar nota do João"));
        assert!(v.is_blocked());
        assert_eq!(timings.len(), 1);
        assert_eq!(timings[0].0, "deletion");
    }

    #[test]
    fn empty_chain_allows_everything() {
        let chain = GuardrailChain::new(&[], &GuardrailConfig::default(), 120);
        let (v, timings) = chain.check(&PreContext::new(2, Role::Student, "apagar nota"));
        assert_eq!(v, PreCheck::Allow);
        assert!(timings.is_empty());
    }
}
