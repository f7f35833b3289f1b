use std::collections::HashSet;
use std::env;
use std::fs;

use anyhow::{anyhow, Context, Result};

use crate::guardrails::{parse_guardrail_order, GuardrailConfig};
use crate::store::GradebookSnapshot;

#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Initial gradebook contents. `None` starts with an empty store.
    pub seed: Option<GradebookSnapshot>,
    pub guardrail_config: GuardrailConfig,
    pub guardrail_order: Vec<String>,
    pub sanitize_output: bool,
    pub extract_budget_ms: u64,
    pub stage_warn_ms: u64,
    pub max_request_bytes: Option<usize>,
    pub allowed_tokens: Option<HashSet<String>>,
    pub log_file: Option<String>,
    pub rotation: RotationConfig,
    pub log_stdout: bool,
    pub log_sample_n: Option<u64>,
}

fn read_json_file<T: serde::de::DeserializeOwned>(var: &str, path: &str) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {} '{}': file unreadable", var, path))?;
    serde_json::from_str::<T>(&content)
        .with_context(|| format!("Failed to parse {} '{}': invalid JSON", var, path))
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let seed = match env::var("GRADEGATE_SEED_FILE") {
            Ok(path) => Some(read_json_file::<GradebookSnapshot>("GRADEGATE_SEED_FILE", &path)?),
            Err(_) => None,
        };
        let guardrail_config = match env::var("GRADEGATE_POLICY_FILE") {
            Ok(path) => read_json_file::<GuardrailConfig>("GRADEGATE_POLICY_FILE", &path)?,
            Err(_) => GuardrailConfig::default(),
        };
        let guardrail_order = parse_guardrail_order();

        let allowed_tokens = env::var("STRICT_AUTH_ALLOWED_TOKENS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string())
                    .collect::<HashSet<_>>()
            })
            .filter(|set: &HashSet<String>| !set.is_empty());

        let rotation = RotationConfig {
            max_bytes: parse_optional_u64("LOG_MAX_BYTES")?,
            keep: parse_optional_u64("LOG_ROTATE_KEEP")?.unwrap_or(1) as usize,
            compress: parse_bool_env("LOG_ROTATE_COMPRESS")?.unwrap_or(false),
        };

        Ok(Self {
            seed,
            guardrail_config,
            guardrail_order,
            sanitize_output: parse_bool_env("GRADEGATE_SANITIZE")?.unwrap_or(true),
            extract_budget_ms: parse_optional_u64("GRADEGATE_EXTRACT_BUDGET_MS")?.unwrap_or(900),
            stage_warn_ms: parse_optional_u64("GRADEGATE_STAGE_WARN_MS")?.unwrap_or(120),
            max_request_bytes: parse_optional_u64("GRADEGATE_MAX_REQUEST_BYTES")?
                .map(|v| v as usize),
            allowed_tokens,
            log_file: env::var("LOG_FILE").ok(),
            rotation,
            log_stdout: parse_bool_env("GRADEGATE_LOG_STDOUT")?.unwrap_or(false),
            log_sample_n: parse_optional_u64("GRADEGATE_LOG_SAMPLE_N")?.filter(|n| *n > 1),
        })
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool_env(var: &str) -> Result<Option<bool>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a boolean (true/false/1/0)", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "sim" => Some(true),
        "0" | "false" | "no" | "off" | "nao" => Some(false),
        _ => None,
    }
}
