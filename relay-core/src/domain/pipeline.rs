// relay-core/src/domain/pipeline.rs
//
// The pipeline aggregate: a durable recipe for moving one dataset from a
// source to a destination, plus the run records produced each time it
// executes. Nested configs are stored as JSON blobs, so everything here
// derives Serialize/Deserialize.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::naming::derive_table_name;

// ── Pipeline ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    #[default]
    Regular,
    Transformation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub kind: PipelineKind,
    pub status: String,
    /// Present on regular pipelines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Destination>,
    #[serde(default)]
    pub options: PipelineOptions,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Present on transformation pipelines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation: Option<TransformationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scheduled_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Pipeline {
    /// The SQL identifier this pipeline's artifacts are registered under.
    pub fn table_name(&self) -> String {
        derive_table_name(&self.name)
    }

    pub fn source_type(&self) -> Option<&'static str> {
        self.source.as_ref().map(SourceConfig::source_type)
    }
}

// ── Source configuration ─────────────────────────────────────────────

/// Parameters shared by the SQL database sources. Every field is optional
/// so a named connection can supply whatever the source itself omits.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RestAuth {
    Bearer {
        token: String,
    },
    Basic {
        username: String,
        password: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    CsvUrl {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connection: Option<String>,
    },
    JsonUrl {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connection: Option<String>,
    },
    RestApi {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default = "default_http_method")]
        method: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        headers: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        params: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        auth: Option<RestAuth>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connection: Option<String>,
    },
    Mysql {
        #[serde(flatten)]
        db: DbParams,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connection: Option<String>,
    },
    Postgres {
        #[serde(flatten)]
        db: DbParams,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connection: Option<String>,
    },
    Salesforce {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instance_url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        access_token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        connection: Option<String>,
    },
    Synthetic {
        /// Column name -> generator spec (`uuid`, `email`, `integer:1:100`, ...).
        schema: BTreeMap<String, String>,
        #[serde(default = "default_row_count")]
        row_count: usize,
    },
}

fn default_http_method() -> String {
    "GET".to_string()
}

fn default_row_count() -> usize {
    1000
}

impl SourceConfig {
    pub fn source_type(&self) -> &'static str {
        match self {
            SourceConfig::CsvUrl { .. } => "csv_url",
            SourceConfig::JsonUrl { .. } => "json_url",
            SourceConfig::RestApi { .. } => "rest_api",
            SourceConfig::Mysql { .. } => "mysql",
            SourceConfig::Postgres { .. } => "postgres",
            SourceConfig::Salesforce { .. } => "salesforce",
            SourceConfig::Synthetic { .. } => "synthetic",
        }
    }

    /// Named connection this source wants resolved at fetch time.
    pub fn connection_name(&self) -> Option<&str> {
        match self {
            SourceConfig::CsvUrl { connection, .. }
            | SourceConfig::JsonUrl { connection, .. }
            | SourceConfig::RestApi { connection, .. }
            | SourceConfig::Mysql { connection, .. }
            | SourceConfig::Postgres { connection, .. }
            | SourceConfig::Salesforce { connection, .. } => connection.as_deref(),
            SourceConfig::Synthetic { .. } => None,
        }
    }

    /// Fill missing fields from decrypted connection credentials. Source
    /// fields always win over connection fields.
    pub fn merge_credentials(&mut self, credentials: &BTreeMap<String, Value>) {
        let str_cred = |key: &str| -> Option<String> {
            credentials.get(key).and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            })
        };

        match self {
            SourceConfig::CsvUrl { url, .. } | SourceConfig::JsonUrl { url, .. } => {
                if url.is_none() {
                    *url = str_cred("url");
                }
            }
            SourceConfig::RestApi {
                url,
                headers,
                auth,
                ..
            } => {
                if url.is_none() {
                    *url = str_cred("url").or_else(|| str_cred("base_url"));
                }
                if auth.is_none() {
                    if let Some(token) = str_cred("token") {
                        *auth = Some(RestAuth::Bearer { token });
                    } else if let (Some(username), Some(password)) =
                        (str_cred("username"), str_cred("password"))
                    {
                        *auth = Some(RestAuth::Basic { username, password });
                    }
                }
                if let Some(Value::Object(map)) = credentials.get("headers") {
                    for (k, v) in map {
                        if !headers.contains_key(k) {
                            if let Value::String(s) = v {
                                headers.insert(k.clone(), s.clone());
                            }
                        }
                    }
                }
            }
            SourceConfig::Mysql { db, .. } | SourceConfig::Postgres { db, .. } => {
                if db.host.is_none() {
                    db.host = str_cred("host");
                }
                if db.port.is_none() {
                    db.port = credentials
                        .get("port")
                        .and_then(Value::as_u64)
                        .map(|p| p as u16);
                }
                if db.username.is_none() {
                    db.username = str_cred("username");
                }
                if db.password.is_none() {
                    db.password = str_cred("password");
                }
                if db.database.is_none() {
                    db.database = str_cred("database");
                }
            }
            SourceConfig::Salesforce {
                instance_url,
                access_token,
                ..
            } => {
                if instance_url.is_none() {
                    *instance_url = str_cred("instance_url");
                }
                if access_token.is_none() {
                    *access_token = str_cred("access_token");
                }
            }
            SourceConfig::Synthetic { .. } => {}
        }
    }
}

// ── Destination & options ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Destination {
    pub bucket: String,
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Parquet,
    Csv,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    Snappy,
    Gzip,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// Streaming for database-backed and generated sources, whole-table
    /// otherwise.
    #[default]
    Auto,
    On,
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default)]
    pub streaming: StreamingMode,
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default)]
    pub combine_chunks: bool,
    #[serde(default = "default_true")]
    pub generate_metadata: bool,
}

fn default_true() -> bool {
    true
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            compression: Compression::default(),
            streaming: StreamingMode::default(),
            parallel: true,
            combine_chunks: false,
            generate_metadata: true,
        }
    }
}

// ── Schedule ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleInterval {
    Hourly,
    #[default]
    Daily,
    Weekly,
    /// Accepted but executed as daily; the expression is preserved for a
    /// future cron parser.
    Custom,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub interval: ScheduleInterval,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

// ── Transformation pipelines ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationConfig {
    pub sources: Vec<TransformationSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join: Option<JoinSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate: Option<AggregateSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformationSource {
    pub alias: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSpec {
    pub left: String,
    pub right: String,
    /// `left.col = right.col`
    pub on: String,
    #[serde(default = "default_join_how")]
    pub how: String,
}

fn default_join_how() -> String {
    "left".to_string()
}

impl JoinSpec {
    pub fn sql_join_kind(&self) -> &'static str {
        match self.how.to_lowercase().as_str() {
            "right" => "RIGHT",
            "inner" => "INNER",
            "outer" | "full" => "FULL OUTER",
            _ => "LEFT",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateSpec {
    pub group_by: Vec<String>,
    /// metric name -> SQL aggregate expression
    pub metrics: BTreeMap<String, String>,
}

// ── Runs ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub pipeline_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: String,
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks_processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_written: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(default)]
    pub metadata_generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns_needing_review: Option<u64>,
}

impl PipelineRun {
    pub fn started(run_id: &str, pipeline_id: &str, streaming: bool) -> Self {
        Self {
            run_id: run_id.to_string(),
            pipeline_id: pipeline_id.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            progress: "Starting...".to_string(),
            streaming,
            rows_processed: None,
            chunks_processed: None,
            output_file: None,
            files_written: Vec::new(),
            duration_seconds: None,
            error: None,
            trace: None,
            metadata_generated: false,
            columns_needing_review: None,
        }
    }
}

/// Partial update applied to a run row at a phase boundary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows_processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks_processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_written: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata_generated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns_needing_review: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_config_round_trip() -> anyhow::Result<()> {
        let json = serde_json::json!({
            "type": "synthetic",
            "schema": {"id": "integer:1:1000", "amount": "currency"},
            "row_count": 200
        });
        let source: SourceConfig = serde_json::from_value(json)?;
        assert_eq!(source.source_type(), "synthetic");
        match &source {
            SourceConfig::Synthetic { schema, row_count } => {
                assert_eq!(*row_count, 200);
                assert_eq!(schema.get("amount").map(String::as_str), Some("currency"));
            }
            _ => anyhow::bail!("expected synthetic source"),
        }
        Ok(())
    }

    #[test]
    fn test_unknown_source_type_is_rejected() {
        let json = serde_json::json!({"type": "ftp", "url": "ftp://x"});
        assert!(serde_json::from_value::<SourceConfig>(json).is_err());
    }

    #[test]
    fn test_merge_credentials_source_wins() -> anyhow::Result<()> {
        let mut source: SourceConfig = serde_json::from_value(serde_json::json!({
            "type": "postgres",
            "host": "pinned-host",
            "query": "SELECT * FROM orders"
        }))?;
        let creds: BTreeMap<String, Value> = serde_json::from_value(serde_json::json!({
            "host": "conn-host",
            "port": 5433,
            "username": "svc",
            "password": "secret",
            "database": "crm"
        }))?;
        source.merge_credentials(&creds);
        match source {
            SourceConfig::Postgres { db, .. } => {
                assert_eq!(db.host.as_deref(), Some("pinned-host"));
                assert_eq!(db.port, Some(5433));
                assert_eq!(db.username.as_deref(), Some("svc"));
                assert_eq!(db.database.as_deref(), Some("crm"));
            }
            _ => anyhow::bail!("expected postgres source"),
        }
        Ok(())
    }

    #[test]
    fn test_pipeline_table_name() {
        let pipeline = Pipeline {
            id: "pipe-1".into(),
            name: "Demo Orders".into(),
            description: String::new(),
            kind: PipelineKind::Regular,
            status: "active".into(),
            source: None,
            destination: None,
            options: PipelineOptions::default(),
            schedule: ScheduleConfig::default(),
            transformation: None,
            last_scheduled_run: None,
            created_at: Utc::now(),
        };
        assert_eq!(pipeline.table_name(), "demo_orders");
    }
}
