// relay-core/src/infrastructure/llm.rs
//
// Optional Anthropic client. Both callers (ontology proposals, natural-
// language semantic queries) treat any failure here as "fall back to the
// deterministic path", so nothing in this module is load-bearing.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Value, json};

use crate::error::RelayError;
use crate::infrastructure::error::InfrastructureError;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5";

static FENCED_JSON_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"(?s)```(?:json)?\s*([\[{].*?[\]}])\s*```").unwrap()
});

pub struct AnthropicClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(client: reqwest::Client, api_key: String) -> Self {
        Self {
            client,
            api_key,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    /// One user-turn completion, returning the text of the first content
    /// block.
    pub async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, RelayError> {
        let body = json!({
            "model": self.model,
            "max_tokens": max_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });
        let response = self
            .client
            .post(API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        let payload: Value = response.json().await?;
        payload["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                InfrastructureError::Source("Model response carried no text content".to_string())
                    .into()
            })
    }
}

/// Parse a JSON value from raw model text, accepting either bare JSON or
/// a fenced ```json block.
pub fn parse_json_response(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return Some(value);
    }
    let captured = FENCED_JSON_RE.captures(text)?;
    serde_json::from_str(captured.get(1)?.as_str()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_json() {
        let value = parse_json_response(r#"{"metrics": ["revenue"]}"#);
        assert_eq!(value, Some(json!({"metrics": ["revenue"]})));
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = "Here you go:\n```json\n[{\"type\": \"entity\"}]\n```\nDone.";
        let value = parse_json_response(text);
        assert_eq!(value, Some(json!([{"type": "entity"}])));
    }

    #[test]
    fn test_parse_garbage_is_none() {
        assert_eq!(parse_json_response("no json here"), None);
    }
}
