use serde::Serialize;

use crate::error::ErrorKind;
use crate::extractor::{Entities, Intent};
use crate::model::{ActorId, Role};
use crate::ops::ToolResult;

use super::fields::Field;

/// Per-request context. Role and name come from the store, never from the
/// caller.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub actor_id: ActorId,
    pub raw_message: String,
    pub role: Option<Role>,
    pub name: Option<String>,
}

/// States a run passes through, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    ContextLoaded,
    PreChecked,
    IntentParsed,
    FieldsChecked,
    Blocked,
    AwaitingFields,
    Executed,
    Sanitized,
    Responded,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::ContextLoaded => "context_loaded",
            Stage::PreChecked => "pre_checked",
            Stage::IntentParsed => "intent_parsed",
            Stage::FieldsChecked => "fields_checked",
            Stage::Blocked => "blocked",
            Stage::AwaitingFields => "awaiting_fields",
            Stage::Executed => "executed",
            Stage::Sanitized => "sanitized",
            Stage::Responded => "responded",
        }
    }
}

/// Which defence layer stopped the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockLayer {
    Identity,
    PreCheck,
    Executor,
}

impl BlockLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockLayer::Identity => "identity",
            BlockLayer::PreCheck => "pre_check",
            BlockLayer::Executor => "executor",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageTiming {
    pub stage: Stage,
    pub micros: u64,
}

#[derive(Debug, Clone)]
pub struct PipelineState {
    pub context: RequestContext,
    pub intent: Intent,
    pub entities: Entities,
    pub missing_fields: Vec<Field>,
    pub ask_missing_fields: bool,
    pub tool_result: Option<ToolResult>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub blocked: bool,
    pub blocked_reason: Option<String>,
    pub blocked_by: Option<BlockLayer>,
    /// Pre-check rule that fired, when `blocked_by` is the pre-check.
    pub blocked_rule: Option<String>,
    pub response: Option<String>,
    pub stages: Vec<Stage>,
    pub timings: Vec<StageTiming>,
}

impl PipelineState {
    pub fn new(actor_id: ActorId, message: &str) -> Self {
        Self {
            context: RequestContext {
                actor_id,
                raw_message: message.to_string(),
                role: None,
                name: None,
            },
            intent: Intent::Fallback,
            entities: Entities::default(),
            missing_fields: Vec::new(),
            ask_missing_fields: false,
            tool_result: None,
            error: None,
            error_kind: None,
            blocked: false,
            blocked_reason: None,
            blocked_by: None,
            blocked_rule: None,
            response: None,
            stages: vec![Stage::Start],
            timings: Vec::new(),
        }
    }

    /// Mark the run blocked. Later stages only format the refusal.
    pub fn block(&mut self, layer: BlockLayer, reason: impl Into<String>) {
        self.blocked = true;
        self.intent = Intent::Blocked;
        self.blocked_by = Some(layer);
        self.blocked_reason = Some(reason.into());
        self.tool_result = None;
    }
}
