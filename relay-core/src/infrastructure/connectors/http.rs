// relay-core/src/infrastructure/connectors/http.rs
//
// URL-backed sources: csv_url, json_url, rest_api. CSV bodies are staged
// to a temp file and read through DataFusion's CSV reader; JSON payloads
// go through the shared rows bridge.

use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::prelude::{CsvReadOptions, SessionContext};
use serde_json::Value;

use super::SourceConnector;
use crate::domain::pipeline::{RestAuth, SourceConfig};
use crate::error::RelayError;
use crate::infrastructure::error::InfrastructureError;
use crate::infrastructure::tabular::{self, JsonRow};

fn require_url(url: &Option<String>, source_type: &str) -> Result<String, RelayError> {
    url.clone().ok_or_else(|| {
        InfrastructureError::Source(format!("{source_type} source requires a 'url'")).into()
    })
}

// ── csv_url ──────────────────────────────────────────────────────────

pub struct CsvUrlConnector {
    client: reqwest::Client,
}

impl CsvUrlConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceConnector for CsvUrlConnector {
    fn source_type(&self) -> &'static str {
        "csv_url"
    }

    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<RecordBatch>, RelayError> {
        let SourceConfig::CsvUrl { url, .. } = source else {
            return Err(RelayError::Internal("csv_url connector got wrong config".into()));
        };
        let url = require_url(url, "csv_url")?;
        let body = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        read_csv_text(&body).await
    }
}

/// Stage CSV text to a temp file and let DataFusion infer the schema.
pub(crate) async fn read_csv_text(body: &str) -> Result<Vec<RecordBatch>, RelayError> {
    let mut staged = tempfile::Builder::new().suffix(".csv").tempfile()?;
    staged.write_all(body.as_bytes())?;
    staged.flush()?;

    let path = staged
        .path()
        .to_str()
        .ok_or_else(|| RelayError::Internal("Non-UTF8 temp path".into()))?
        .to_string();
    let ctx = SessionContext::new();
    let df = ctx.read_csv(&path, CsvReadOptions::default()).await?;
    let batches = df.collect().await?;
    Ok(batches)
}

// ── json_url ─────────────────────────────────────────────────────────

pub struct JsonUrlConnector {
    client: reqwest::Client,
}

impl JsonUrlConnector {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceConnector for JsonUrlConnector {
    fn source_type(&self) -> &'static str {
        "json_url"
    }

    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<RecordBatch>, RelayError> {
        let SourceConfig::JsonUrl { url, .. } = source else {
            return Err(RelayError::Internal("json_url connector got wrong config".into()));
        };
        let url = require_url(url, "json_url")?;
        let payload: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let rows = unwrap_rest_payload(payload)?;
        Ok(vec![tabular::rows_to_batch(&rows)?])
    }
}

// ── rest_api ─────────────────────────────────────────────────────────

pub struct RestApiConnector {
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl RestApiConnector {
    pub fn new(client: reqwest::Client, probe_timeout: Duration) -> Self {
        Self {
            client,
            probe_timeout,
        }
    }
}

#[async_trait]
impl SourceConnector for RestApiConnector {
    fn source_type(&self) -> &'static str {
        "rest_api"
    }

    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<RecordBatch>, RelayError> {
        let SourceConfig::RestApi {
            url,
            method,
            headers,
            params,
            auth,
            ..
        } = source
        else {
            return Err(RelayError::Internal("rest_api connector got wrong config".into()));
        };
        let url = require_url(url, "rest_api")?;

        let method: reqwest::Method = method.parse().map_err(|_| {
            InfrastructureError::Source(format!("Unsupported HTTP method: {method}"))
        })?;
        let mut request = self.client.request(method, &url).query(params);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        request = match auth {
            Some(RestAuth::Bearer { token }) => request.bearer_auth(token),
            Some(RestAuth::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            None => request,
        };

        let payload: Value = request.send().await?.error_for_status()?.json().await?;
        let rows = unwrap_rest_payload(payload)?;
        Ok(vec![tabular::rows_to_batch(&rows)?])
    }

    async fn probe(&self, credentials: &BTreeMap<String, Value>) -> Result<String, RelayError> {
        let url = super::cred_str(credentials, "base_url")
            .or_else(|| super::cred_str(credentials, "url"));
        match url {
            Some(url) => {
                let response = self
                    .client
                    .get(&url)
                    .timeout(self.probe_timeout)
                    .send()
                    .await?;
                Ok(format!("Reachable (HTTP {})", response.status().as_u16()))
            }
            None => Ok("Credentials stored (no base_url to ping)".to_string()),
        }
    }
}

/// Shape a REST payload into rows: a list is used directly; a map is
/// searched for a list under the usual envelope keys; anything else is
/// wrapped as a single row.
pub fn unwrap_rest_payload(payload: Value) -> Result<Vec<JsonRow>, RelayError> {
    match payload {
        Value::Array(items) => Ok(items.into_iter().map(value_to_row).collect()),
        Value::Object(map) => {
            for key in ["data", "results", "items", "records"] {
                if let Some(Value::Array(items)) = map.get(key) {
                    return Ok(items.iter().cloned().map(value_to_row).collect());
                }
            }
            Ok(vec![map])
        }
        other => Err(InfrastructureError::Source(format!(
            "Unsupported response type: {}",
            type_name(&other)
        ))
        .into()),
    }
}

fn value_to_row(value: Value) -> JsonRow {
    match value {
        Value::Object(map) => map,
        other => {
            let mut row = JsonRow::new();
            row.insert("value".to_string(), other);
            row
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_list_payload() -> anyhow::Result<()> {
        let rows = unwrap_rest_payload(json!([{"id": 1}, {"id": 2}]))?;
        assert_eq!(rows.len(), 2);
        Ok(())
    }

    #[test]
    fn test_unwrap_envelope_keys() -> anyhow::Result<()> {
        for key in ["data", "results", "items", "records"] {
            let rows = unwrap_rest_payload(json!({key: [{"id": 1}], "meta": {"page": 1}}))?;
            assert_eq!(rows.len(), 1, "envelope key {key}");
        }
        Ok(())
    }

    #[test]
    fn test_unwrap_single_object_becomes_one_row() -> anyhow::Result<()> {
        let rows = unwrap_rest_payload(json!({"id": 7, "name": "solo"}))?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&json!(7)));
        Ok(())
    }

    #[test]
    fn test_unwrap_scalar_payload_fails() {
        assert!(unwrap_rest_payload(json!(42)).is_err());
    }

    #[tokio::test]
    async fn test_read_csv_text_infers_schema() -> anyhow::Result<()> {
        let batches = read_csv_text("id,name\n1,alpha\n2,beta\n").await?;
        assert_eq!(tabular::total_rows(&batches), 2);
        let schema = batches[0].schema();
        assert_eq!(schema.field(0).name(), "id");
        Ok(())
    }
}
