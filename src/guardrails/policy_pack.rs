use regex::Regex;
use serde::Deserialize;

use super::{Block, Guardrail, PreContext};
use crate::model::Role;

/// An operator-defined rule. Fires when any `contains` substring or any
/// `regex` matches the lower-cased message. Regexes are case-insensitive.
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    /// Roles the rule applies to. Empty means every role.
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub contains: Vec<String>,
    #[serde(default, rename = "regex")]
    pub patterns: Vec<String>,
    pub reason: Option<String>,
}

const MAX_PATTERNS: usize = 50;
const MAX_PATTERN_LEN: usize = 500;
const DEFAULT_REASON: &str = "Pedido bloqueado pela política da escola.";

#[derive(Clone)]
struct CompiledRule {
    roles: Vec<Role>,
    contains: Vec<String>,
    regexes: Vec<Regex>,
    reason: String,
}

impl CompiledRule {
    fn compile(rule: &PolicyRule) -> Self {
        let mut patterns = rule.patterns.clone();
        if patterns.len() > MAX_PATTERNS {
            tracing::warn!(
                pattern_count = patterns.len(),
                limit = MAX_PATTERNS,
                "policy rule regex list truncated"
            );
            patterns.truncate(MAX_PATTERNS);
        }
        let regexes = patterns
            .iter()
            .filter(|p| {
                if p.len() > MAX_PATTERN_LEN {
                    tracing::warn!(
                        len = p.len(),
                        limit = MAX_PATTERN_LEN,
                        "dropping oversized policy regex pattern"
                    );
                    return false;
                }
                true
            })
            .filter_map(|p| match Regex::new(&format!("(?i){}", p)) {
                Ok(re) => Some(re),
                Err(err) => {
                    tracing::warn!(pattern = %p, error = ?err, "failed to compile policy regex, ignoring");
                    None
                }
            })
            .collect();
        Self {
            roles: rule.roles.clone(),
            contains: rule
                .contains
                .iter()
                .map(|s| s.to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            regexes,
            reason: rule
                .reason
                .clone()
                .unwrap_or_else(|| DEFAULT_REASON.to_string()),
        }
    }

    fn matches(&self, ctx: &PreContext) -> bool {
        if !self.roles.is_empty() && !self.roles.contains(&ctx.role) {
            return false;
        }
        self.contains.iter().any(|c| ctx.text.contains(c.as_str()))
            || self.regexes.iter().any(|re| re.is_match(&ctx.text))
    }
}

/// Evaluates operator rules from the policy file.
pub struct PolicyPackGuardrail {
    rules: Vec<CompiledRule>,
}

impl PolicyPackGuardrail {
    pub fn new(rules: Vec<PolicyRule>) -> Self {
        Self {
            rules: rules.iter().map(CompiledRule::compile).collect(),
        }
    }
}

impl Guardrail for PolicyPackGuardrail {
    fn name(&self) -> &str {
        "policy_pack"
    }

    fn check(&self, ctx: &PreContext) -> Option<Block> {
        self.rules.iter().find(|r| r.matches(ctx)).map(|r| Block {
            rule: self.name().to_string(),
            reason: r.reason.clone(),
        })
    }
}
