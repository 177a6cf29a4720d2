// relay-core/src/infrastructure/connectors/salesforce.rs
//
// Salesforce SOQL through the REST query endpoint: bearer token against
// an instance URL, with automatic `nextRecordsUrl` pagination. The
// `attributes` envelope on each record is stripped before the rows reach
// the bridge.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use datafusion::arrow::record_batch::RecordBatch;
use serde_json::Value;
use tracing::debug;

use super::{SourceConnector, cred_str};
use crate::domain::pipeline::SourceConfig;
use crate::error::RelayError;
use crate::infrastructure::error::InfrastructureError;
use crate::infrastructure::tabular::{self, JsonRow};

const API_VERSION: &str = "v59.0";

pub struct SalesforceConnector {
    client: reqwest::Client,
    probe_timeout: Duration,
}

impl SalesforceConnector {
    pub fn new(client: reqwest::Client, probe_timeout: Duration) -> Self {
        Self {
            client,
            probe_timeout,
        }
    }

    async fn query_all(
        &self,
        instance_url: &str,
        access_token: &str,
        soql: &str,
    ) -> Result<Vec<JsonRow>, RelayError> {
        let base = instance_url.trim_end_matches('/');
        let mut rows = Vec::new();
        let mut next: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let request = match &next {
                Some(path) => self.client.get(format!("{base}{path}")),
                None => self
                    .client
                    .get(format!("{base}/services/data/{API_VERSION}/query"))
                    .query(&[("q", soql)]),
            };
            let payload: Value = request
                .bearer_auth(access_token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            if let Some(records) = payload["records"].as_array() {
                for record in records {
                    if let Value::Object(map) = record {
                        let mut row = map.clone();
                        row.remove("attributes");
                        rows.push(row);
                    }
                }
            }
            pages += 1;

            let done = payload["done"].as_bool().unwrap_or(true);
            next = payload["nextRecordsUrl"].as_str().map(str::to_string);
            if done || next.is_none() {
                break;
            }
        }

        debug!(pages, rows = rows.len(), "salesforce query complete");
        Ok(rows)
    }
}

#[async_trait]
impl SourceConnector for SalesforceConnector {
    fn source_type(&self) -> &'static str {
        "salesforce"
    }

    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<RecordBatch>, RelayError> {
        let SourceConfig::Salesforce {
            query,
            instance_url,
            access_token,
            ..
        } = source
        else {
            return Err(RelayError::Internal("salesforce connector got wrong config".into()));
        };
        let missing = |field: &str| {
            RelayError::from(InfrastructureError::Source(format!(
                "salesforce source requires '{field}'"
            )))
        };
        let soql = query.as_deref().ok_or_else(|| missing("query"))?;
        let instance_url = instance_url.as_deref().ok_or_else(|| missing("instance_url"))?;
        let access_token = access_token.as_deref().ok_or_else(|| missing("access_token"))?;

        let rows = self.query_all(instance_url, access_token, soql).await?;
        Ok(vec![tabular::rows_to_batch(&rows)?])
    }

    async fn probe(&self, credentials: &BTreeMap<String, Value>) -> Result<String, RelayError> {
        let instance_url = cred_str(credentials, "instance_url").ok_or_else(|| {
            RelayError::from(InfrastructureError::Source(
                "salesforce credentials require 'instance_url'".to_string(),
            ))
        })?;
        let access_token = cred_str(credentials, "access_token").ok_or_else(|| {
            RelayError::from(InfrastructureError::Source(
                "salesforce credentials require 'access_token'".to_string(),
            ))
        })?;

        self.client
            .get(format!(
                "{}/services/data",
                instance_url.trim_end_matches('/')
            ))
            .bearer_auth(&access_token)
            .timeout(self.probe_timeout)
            .send()
            .await?
            .error_for_status()?;
        Ok("Authenticated with Salesforce successfully".to_string())
    }
}
