// relay-core/src/infrastructure/store/mod.rs
//
// The process-wide metadata store: SQLite through sqlx, nested configs as
// JSON blobs in text columns. Every externally callable method acquires
// its own connection or transaction; multi-statement writes (cascading
// deletes, guarded transitions) run inside transactions.

mod admin;
mod connections;
mod metadata;
mod ontology;
mod pipelines;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::error::RelayError;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS pipelines (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        kind TEXT NOT NULL DEFAULT 'regular',
        status TEXT NOT NULL DEFAULT 'active',
        source_json TEXT,
        destination_json TEXT,
        options_json TEXT NOT NULL DEFAULT '{}',
        schedule_json TEXT NOT NULL DEFAULT '{}',
        transformation_json TEXT,
        last_scheduled_run TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS pipeline_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        run_id TEXT NOT NULL UNIQUE,
        pipeline_id TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'running',
        started_at TEXT NOT NULL,
        completed_at TEXT,
        progress TEXT NOT NULL DEFAULT 'Starting...',
        streaming INTEGER NOT NULL DEFAULT 0,
        rows_processed INTEGER,
        chunks_processed INTEGER,
        output_file TEXT,
        files_written_json TEXT NOT NULL DEFAULT '[]',
        duration_seconds REAL,
        error TEXT,
        trace TEXT,
        metadata_generated INTEGER NOT NULL DEFAULT 0,
        columns_needing_review INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_runs_pipeline ON pipeline_runs (pipeline_id)",
    "CREATE TABLE IF NOT EXISTS dataset_metadata (
        pipeline_id TEXT PRIMARY KEY,
        metadata_json TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS column_knowledge (
        column_key TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        business_meaning TEXT,
        verified_by TEXT NOT NULL DEFAULT 'user',
        verified_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS connections (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        connection_type TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        credentials_encrypted TEXT NOT NULL,
        last_tested_at TEXT,
        last_test_status TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS api_keys (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        key_hash TEXT NOT NULL UNIQUE,
        key_prefix TEXT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        role TEXT NOT NULL DEFAULT 'writer',
        active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ontology_entities (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        pipeline_id TEXT NOT NULL,
        column_annotations_json TEXT NOT NULL DEFAULT '{}',
        status TEXT NOT NULL DEFAULT 'active',
        proposed_by TEXT NOT NULL DEFAULT 'user',
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ontology_relationships (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        from_entity TEXT NOT NULL,
        to_entity TEXT NOT NULL,
        from_column TEXT NOT NULL,
        to_column TEXT NOT NULL,
        relationship_type TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'active',
        proposed_by TEXT NOT NULL DEFAULT 'user',
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ontology_metrics (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        entity_name TEXT NOT NULL,
        expression TEXT NOT NULL,
        format_type TEXT NOT NULL DEFAULT 'number',
        status TEXT NOT NULL DEFAULT 'active',
        proposed_by TEXT NOT NULL DEFAULT 'user',
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ontology_dimensions (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        display_name TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        entity_name TEXT NOT NULL,
        expression TEXT NOT NULL,
        dimension_type TEXT NOT NULL DEFAULT 'direct',
        status TEXT NOT NULL DEFAULT 'active',
        proposed_by TEXT NOT NULL DEFAULT 'user',
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS ontology_proposals (
        id TEXT PRIMARY KEY,
        proposal_type TEXT NOT NULL,
        payload_json TEXT NOT NULL,
        source_pipeline_id TEXT,
        proposed_by TEXT NOT NULL DEFAULT 'ai',
        status TEXT NOT NULL DEFAULT 'pending',
        reviewed_by TEXT,
        reviewed_at TEXT,
        review_notes TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS platform_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_type TEXT NOT NULL,
        pipeline_id TEXT,
        details_json TEXT NOT NULL DEFAULT '{}',
        created_at TEXT NOT NULL
    )",
];

pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Connect to the configured database and make sure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, RelayError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Single-connection in-memory store. One connection keeps every
    /// caller on the same memory database.
    pub async fn in_memory() -> Result<Self, RelayError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), RelayError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// ── Row helpers shared by the submodules ─────────────────────────────

pub(crate) fn get_ts(row: &sqlx::sqlite::SqliteRow, col: &str) -> Result<DateTime<Utc>, RelayError> {
    let raw: String = row.try_get(col)?;
    parse_ts(&raw)
}

pub(crate) fn get_opt_ts(
    row: &sqlx::sqlite::SqliteRow,
    col: &str,
) -> Result<Option<DateTime<Utc>>, RelayError> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|s| parse_ts(&s)).transpose()
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>, RelayError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RelayError::Internal(format!("Bad timestamp '{raw}' in store: {e}")))
}

pub(crate) fn get_json<T: DeserializeOwned>(
    row: &sqlx::sqlite::SqliteRow,
    col: &str,
) -> Result<T, RelayError> {
    let raw: String = row.try_get(col)?;
    Ok(serde_json::from_str(&raw)?)
}

pub(crate) fn get_opt_json<T: DeserializeOwned>(
    row: &sqlx::sqlite::SqliteRow,
    col: &str,
) -> Result<Option<T>, RelayError> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|s| serde_json::from_str(&s).map_err(RelayError::from))
        .transpose()
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<String, RelayError> {
    Ok(serde_json::to_string(value)?)
}

/// Decode the serde string form of a unit enum (e.g. "many_to_one").
pub(crate) fn enum_from_str<T: DeserializeOwned>(raw: &str) -> Result<T, RelayError> {
    Ok(serde_json::from_value(serde_json::Value::String(
        raw.to_string(),
    ))?)
}

/// Encode a unit enum to its serde string form.
pub(crate) fn enum_to_str<T: Serialize>(value: &T) -> Result<String, RelayError> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(RelayError::Internal(format!(
            "Expected string-serialized enum, got {other}"
        ))),
    }
}

/// Map sqlx unique-constraint violations to a domain Conflict.
pub(crate) fn map_unique(err: sqlx::Error, what: &str) -> RelayError {
    if let sqlx::Error::Database(db) = &err {
        if db.message().contains("UNIQUE") {
            return crate::domain::error::DomainError::Conflict(format!(
                "{what} already exists"
            ))
            .into();
        }
    }
    err.into()
}
