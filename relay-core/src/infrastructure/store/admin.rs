// relay-core/src/infrastructure/store/admin.rs
//
// API keys and the append-only analytics log.

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::{Store, enum_from_str, enum_to_str, get_json, get_ts, map_unique, to_json};
use crate::domain::api_key::ApiKey;
use crate::domain::event::{AnalyticsSummary, PlatformEvent};
use crate::error::RelayError;

fn api_key_from_row(row: &SqliteRow) -> Result<ApiKey, RelayError> {
    Ok(ApiKey {
        id: row.try_get("id")?,
        key_hash: row.try_get("key_hash")?,
        key_prefix: row.try_get("key_prefix")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        role: enum_from_str(&row.try_get::<String, _>("role")?)?,
        active: row.try_get("active")?,
        created_at: get_ts(row, "created_at")?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<PlatformEvent, RelayError> {
    Ok(PlatformEvent {
        id: row.try_get("id")?,
        event_type: row.try_get("event_type")?,
        pipeline_id: row.try_get("pipeline_id")?,
        details: get_json(row, "details_json")?,
        created_at: get_ts(row, "created_at")?,
    })
}

impl Store {
    // ── API keys ─────────────────────────────────────────────────────

    pub async fn insert_api_key(&self, key: &ApiKey) -> Result<ApiKey, RelayError> {
        let result = sqlx::query(
            "INSERT INTO api_keys (key_hash, key_prefix, name, description, role, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(&key.name)
        .bind(&key.description)
        .bind(enum_to_str(&key.role)?)
        .bind(key.active)
        .bind(key.created_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| map_unique(e, "API key"))?;

        let mut inserted = key.clone();
        inserted.id = result.last_insert_rowid();
        Ok(inserted)
    }

    pub async fn get_api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>, RelayError> {
        let row = sqlx::query("SELECT * FROM api_keys WHERE key_hash = ? AND active = 1")
            .bind(key_hash)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(api_key_from_row).transpose()
    }

    pub async fn list_api_keys(&self) -> Result<Vec<ApiKey>, RelayError> {
        let rows = sqlx::query("SELECT * FROM api_keys ORDER BY id")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(api_key_from_row).collect()
    }

    pub async fn deactivate_api_key(&self, id: i64) -> Result<bool, RelayError> {
        let result = sqlx::query("UPDATE api_keys SET active = 0 WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Analytics events ─────────────────────────────────────────────

    pub async fn record_event(
        &self,
        event_type: &str,
        pipeline_id: Option<&str>,
        details: serde_json::Value,
    ) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO platform_events (event_type, pipeline_id, details_json, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(event_type)
        .bind(pipeline_id)
        .bind(to_json(&details)?)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn list_events(
        &self,
        event_type: Option<&str>,
        pipeline_id: Option<&str>,
        limit: i64,
    ) -> Result<Vec<PlatformEvent>, RelayError> {
        let rows = sqlx::query(
            "SELECT * FROM platform_events
             WHERE (?1 IS NULL OR event_type = ?1)
               AND (?2 IS NULL OR pipeline_id = ?2)
             ORDER BY id DESC LIMIT ?3",
        )
        .bind(event_type)
        .bind(pipeline_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    pub async fn analytics_summary(&self) -> Result<AnalyticsSummary, RelayError> {
        let rows = sqlx::query(
            "SELECT event_type, COUNT(*) AS n FROM platform_events GROUP BY event_type",
        )
        .fetch_all(self.pool())
        .await?;
        let mut counts_by_type = BTreeMap::new();
        let mut total = 0u64;
        for row in &rows {
            let event_type: String = row.try_get("event_type")?;
            let n: i64 = row.try_get("n")?;
            total += n as u64;
            counts_by_type.insert(event_type, n as u64);
        }
        let recent_events = self.list_events(None, None, 50).await?;
        Ok(AnalyticsSummary {
            counts_by_type,
            total_events: total,
            recent_events,
        })
    }
}
