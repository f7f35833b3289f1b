use serde::Deserialize;
use serde_json::Value;

use super::{Entities, ExtractError, ExtractRequest, Extraction, Extractor, Intent};

/// Remote intent extractor, configured under `extractor` in the policy file.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpExtractorDefinition {
    pub url: String,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Body template. Placeholders: `${message}`, `${messageJson}`, `${role}`,
    /// `${actorId}`, `${name}`.
    #[serde(default)]
    pub request_template: Option<String>,
}

fn default_timeout_ms() -> u64 {
    500
}

const DEFAULT_TEMPLATE: &str = r#"{
  "message": ${messageJson},
  "role": "${role}",
  "actorId": ${actorId},
  "name": "${name}"
}"#;

/// POSTs the rendered template and expects `{intent, entities}` back.
pub struct HttpExtractor {
    def: HttpExtractorDefinition,
    client: reqwest::Client,
}

impl HttpExtractor {
    pub fn new(def: HttpExtractorDefinition) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(def.timeout_ms))
            .build()?;
        Ok(Self { def, client })
    }

    fn render_body(&self, req: &ExtractRequest<'_>) -> String {
        let template = self
            .def
            .request_template
            .as_deref()
            .unwrap_or(DEFAULT_TEMPLATE);
        let message_json =
            serde_json::to_string(req.message).unwrap_or_else(|_| "\"\"".to_string());
        template
            .replace("${messageJson}", &message_json)
            .replace("${message}", &escape_json_string(req.message))
            .replace("${role}", req.role.as_str())
            .replace("${actorId}", &req.actor_id.to_string())
            .replace("${name}", &escape_json_string(req.name))
    }
}

/// Escape `value` for embedding inside an existing JSON string literal.
fn escape_json_string(value: &str) -> String {
    match serde_json::to_string(value) {
        Ok(mut json) => {
            if json.len() >= 2 {
                json.remove(0);
                json.pop();
            }
            json
        }
        Err(_) => String::new(),
    }
}

fn decode(body: &str) -> Result<Extraction, ExtractError> {
    let json: Value =
        serde_json::from_str(body).map_err(|e| ExtractError::Parse(e.to_string()))?;
    let intent = json
        .get("intent")
        .and_then(Value::as_str)
        .map(Intent::from_label)
        .ok_or_else(|| ExtractError::Parse("missing intent".into()))?;
    let entities = json
        .get("entities")
        .map(Entities::from_json)
        .unwrap_or_default();
    Ok(Extraction { intent, entities })
}

#[async_trait::async_trait]
impl Extractor for HttpExtractor {
    fn name(&self) -> &str {
        "http"
    }

    async fn extract(&self, req: &ExtractRequest<'_>) -> Result<Extraction, ExtractError> {
        let mut rb = self
            .client
            .post(&self.def.url)
            .header("content-type", "application/json");
        if let Some(tok) = &self.def.bearer_token {
            rb = rb.bearer_auth(tok);
        }
        let resp = rb
            .body(self.render_body(req))
            .send()
            .await
            .map_err(|e| ExtractError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ExtractError::Status(status.as_u16()));
        }
        let text = resp
            .text()
            .await
            .map_err(|e| ExtractError::Read(e.to_string()))?;
        decode(&text)
    }
}
