// relay-core/src/infrastructure/connectors/database.rs
//
// MySQL and Postgres sources through sqlx. Whole-table fetches pull all
// rows; streaming fetches use the driver's server-side row stream and
// hand back batches of `chunk_size` through a channel, so the scheduler
// loop and the writer never hold the full table in memory.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use datafusion::arrow::record_batch::RecordBatch;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, Row};
use tracing::warn;

use super::{ChunkStream, SourceConnector, cred_str};
use crate::domain::pipeline::{DbParams, SourceConfig};
use crate::error::RelayError;
use crate::infrastructure::error::InfrastructureError;
use crate::infrastructure::tabular::{self, JsonRow};

fn select_statement(db: &DbParams) -> Result<String, RelayError> {
    if let Some(query) = &db.query {
        return Ok(query.clone());
    }
    let table = db.table.as_deref().ok_or_else(|| {
        InfrastructureError::Source("database source requires 'query' or 'table'".to_string())
    })?;
    Ok(format!("SELECT * FROM {table}"))
}

fn connection_url(db: &DbParams, scheme: &str, default_port: u16) -> Result<String, RelayError> {
    let missing = |field: &str| {
        RelayError::from(InfrastructureError::Source(format!(
            "database source requires '{field}'"
        )))
    };
    let host = db.host.as_deref().ok_or_else(|| missing("host"))?;
    let username = db.username.as_deref().ok_or_else(|| missing("username"))?;
    let password = db.password.as_deref().ok_or_else(|| missing("password"))?;
    let database = db.database.as_deref().ok_or_else(|| missing("database"))?;
    let port = db.port.unwrap_or(default_port);
    Ok(format!(
        "{scheme}://{username}:{password}@{host}:{port}/{database}"
    ))
}

fn params_from_credentials(credentials: &BTreeMap<String, Value>) -> DbParams {
    DbParams {
        host: cred_str(credentials, "host"),
        port: credentials
            .get("port")
            .and_then(Value::as_u64)
            .map(|p| p as u16),
        username: cred_str(credentials, "username"),
        password: cred_str(credentials, "password"),
        database: cred_str(credentials, "database"),
        table: None,
        query: None,
    }
}

// Decode cascade: relational drivers disagree on type names, so instead
// of matching on them we try progressively wider Rust types and fall
// back to NULL (with a warning) for anything undecodable.
macro_rules! decode_cascade {
    ($row:expr, $idx:expr, [$($ty:ty => $to:expr),+ $(,)?]) => {{
        $(
            if let Ok(v) = $row.try_get::<Option<$ty>, _>($idx) {
                #[allow(clippy::redundant_closure_call)]
                return match v {
                    Some(v) => ($to)(v),
                    None => Value::Null,
                };
            }
        )+
        warn!(column = $idx, "undecodable column type, emitting NULL");
        Value::Null
    }};
}

fn pg_value(row: &PgRow, idx: usize) -> Value {
    decode_cascade!(row, idx, [
        i64 => |v: i64| Value::from(v),
        i32 => |v: i32| Value::from(v),
        i16 => |v: i16| Value::from(v),
        f64 => |v: f64| Value::from(v),
        f32 => |v: f32| Value::from(v as f64),
        bool => |v: bool| Value::Bool(v),
        String => Value::String,
        DateTime<Utc> => |v: DateTime<Utc>| Value::String(v.to_rfc3339()),
        NaiveDateTime => |v: NaiveDateTime| Value::String(v.to_string()),
        NaiveDate => |v: NaiveDate| Value::String(v.to_string()),
        Value => |v: Value| v,
    ])
}

fn mysql_value(row: &MySqlRow, idx: usize) -> Value {
    decode_cascade!(row, idx, [
        i64 => |v: i64| Value::from(v),
        u64 => |v: u64| Value::from(v),
        f64 => |v: f64| Value::from(v),
        f32 => |v: f32| Value::from(v as f64),
        bool => |v: bool| Value::Bool(v),
        String => Value::String,
        DateTime<Utc> => |v: DateTime<Utc>| Value::String(v.to_rfc3339()),
        NaiveDateTime => |v: NaiveDateTime| Value::String(v.to_string()),
        NaiveDate => |v: NaiveDate| Value::String(v.to_string()),
        Value => |v: Value| v,
    ])
}

fn pg_row_to_json(row: &PgRow) -> JsonRow {
    let mut out = JsonRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), pg_value(row, idx));
    }
    out
}

fn mysql_row_to_json(row: &MySqlRow) -> JsonRow {
    let mut out = JsonRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        out.insert(column.name().to_string(), mysql_value(row, idx));
    }
    out
}

// ── Postgres ─────────────────────────────────────────────────────────

pub struct PostgresConnector {
    probe_timeout: Duration,
}

impl PostgresConnector {
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }
}

#[async_trait]
impl SourceConnector for PostgresConnector {
    fn source_type(&self) -> &'static str {
        "postgres"
    }

    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<RecordBatch>, RelayError> {
        let SourceConfig::Postgres { db, .. } = source else {
            return Err(RelayError::Internal("postgres connector got wrong config".into()));
        };
        let url = connection_url(db, "postgres", 5432)?;
        let sql = select_statement(db)?;

        let pool = PgPoolOptions::new().max_connections(1).connect(&url).await?;
        let rows = sqlx::query(&sql).fetch_all(&pool).await?;
        let json_rows: Vec<JsonRow> = rows.iter().map(pg_row_to_json).collect();
        pool.close().await;
        Ok(vec![tabular::rows_to_batch(&json_rows)?])
    }

    async fn fetch_streaming(
        &self,
        source: &SourceConfig,
        chunk_size: usize,
    ) -> Result<ChunkStream, RelayError> {
        let SourceConfig::Postgres { db, .. } = source else {
            return Err(RelayError::Internal("postgres connector got wrong config".into()));
        };
        let url = connection_url(db, "postgres", 5432)?;
        let sql = select_statement(db)?;
        let pool = PgPoolOptions::new().max_connections(1).connect(&url).await?;

        let (mut tx, rx) = futures::channel::mpsc::channel::<Result<RecordBatch, RelayError>>(2);
        tokio::spawn(async move {
            let mut rows = sqlx::query(&sql).fetch(&pool);
            let mut buffer: Vec<JsonRow> = Vec::with_capacity(chunk_size);
            while let Some(item) = rows.next().await {
                match item {
                    Ok(row) => {
                        buffer.push(pg_row_to_json(&row));
                        if buffer.len() >= chunk_size
                            && tx
                                .send(tabular::rows_to_batch(&std::mem::take(&mut buffer)))
                                .await
                                .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }
            if !buffer.is_empty() {
                let _ = tx.send(tabular::rows_to_batch(&buffer)).await;
            }
        });
        Ok(Box::pin(rx))
    }

    async fn probe(&self, credentials: &BTreeMap<String, Value>) -> Result<String, RelayError> {
        let db = params_from_credentials(credentials);
        let url = connection_url(&db, "postgres", 5432)?;
        let pool = tokio::time::timeout(
            self.probe_timeout,
            PgPoolOptions::new().max_connections(1).connect(&url),
        )
        .await
        .map_err(|_| InfrastructureError::Source("Connection test timed out".to_string()))??;
        sqlx::query("SELECT 1").fetch_one(&pool).await?;
        pool.close().await;
        Ok("Connected to PostgreSQL successfully".to_string())
    }
}

// ── MySQL ────────────────────────────────────────────────────────────

pub struct MysqlConnector {
    probe_timeout: Duration,
}

impl MysqlConnector {
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }
}

#[async_trait]
impl SourceConnector for MysqlConnector {
    fn source_type(&self) -> &'static str {
        "mysql"
    }

    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<RecordBatch>, RelayError> {
        let SourceConfig::Mysql { db, .. } = source else {
            return Err(RelayError::Internal("mysql connector got wrong config".into()));
        };
        let url = connection_url(db, "mysql", 3306)?;
        let sql = select_statement(db)?;

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await?;
        let rows = sqlx::query(&sql).fetch_all(&pool).await?;
        let json_rows: Vec<JsonRow> = rows.iter().map(mysql_row_to_json).collect();
        pool.close().await;
        Ok(vec![tabular::rows_to_batch(&json_rows)?])
    }

    async fn fetch_streaming(
        &self,
        source: &SourceConfig,
        chunk_size: usize,
    ) -> Result<ChunkStream, RelayError> {
        let SourceConfig::Mysql { db, .. } = source else {
            return Err(RelayError::Internal("mysql connector got wrong config".into()));
        };
        let url = connection_url(db, "mysql", 3306)?;
        let sql = select_statement(db)?;
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await?;

        let (mut tx, rx) = futures::channel::mpsc::channel::<Result<RecordBatch, RelayError>>(2);
        tokio::spawn(async move {
            let mut rows = sqlx::query(&sql).fetch(&pool);
            let mut buffer: Vec<JsonRow> = Vec::with_capacity(chunk_size);
            while let Some(item) = rows.next().await {
                match item {
                    Ok(row) => {
                        buffer.push(mysql_row_to_json(&row));
                        if buffer.len() >= chunk_size
                            && tx
                                .send(tabular::rows_to_batch(&std::mem::take(&mut buffer)))
                                .await
                                .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e.into())).await;
                        return;
                    }
                }
            }
            if !buffer.is_empty() {
                let _ = tx.send(tabular::rows_to_batch(&buffer)).await;
            }
        });
        Ok(Box::pin(rx))
    }

    async fn probe(&self, credentials: &BTreeMap<String, Value>) -> Result<String, RelayError> {
        let db = params_from_credentials(credentials);
        let url = connection_url(&db, "mysql", 3306)?;
        let pool = tokio::time::timeout(
            self.probe_timeout,
            MySqlPoolOptions::new().max_connections(1).connect(&url),
        )
        .await
        .map_err(|_| InfrastructureError::Source("Connection test timed out".to_string()))??;
        sqlx::query("SELECT 1").fetch_one(&pool).await?;
        pool.close().await;
        Ok("Connected to MySQL successfully".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_statement_prefers_query() -> anyhow::Result<()> {
        let db = DbParams {
            query: Some("SELECT id FROM t WHERE x > 1".into()),
            table: Some("ignored".into()),
            ..DbParams::default()
        };
        assert_eq!(select_statement(&db)?, "SELECT id FROM t WHERE x > 1");
        Ok(())
    }

    #[test]
    fn test_select_statement_defaults_to_table_scan() -> anyhow::Result<()> {
        let db = DbParams {
            table: Some("orders".into()),
            ..DbParams::default()
        };
        assert_eq!(select_statement(&db)?, "SELECT * FROM orders");
        Ok(())
    }

    #[test]
    fn test_connection_url_defaults_port() -> anyhow::Result<()> {
        let db = DbParams {
            host: Some("db.example.com".into()),
            username: Some("svc".into()),
            password: Some("pw".into()),
            database: Some("crm".into()),
            ..DbParams::default()
        };
        assert_eq!(
            connection_url(&db, "postgres", 5432)?,
            "postgres://svc:pw@db.example.com:5432/crm"
        );
        Ok(())
    }

    #[test]
    fn test_connection_url_missing_field_errors() {
        let db = DbParams::default();
        assert!(connection_url(&db, "mysql", 3306).is_err());
    }
}
