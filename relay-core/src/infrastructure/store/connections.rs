// relay-core/src/infrastructure/store/connections.rs

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::{Store, get_opt_ts, get_ts, map_unique};
use crate::domain::connection::Connection;
use crate::domain::error::DomainError;
use crate::domain::pipeline::SourceConfig;
use crate::error::RelayError;

fn connection_from_row(row: &SqliteRow) -> Result<Connection, RelayError> {
    Ok(Connection {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        connection_type: row.try_get("connection_type")?,
        description: row.try_get("description")?,
        last_tested_at: get_opt_ts(row, "last_tested_at")?,
        last_test_status: row.try_get("last_test_status")?,
        created_at: get_ts(row, "created_at")?,
    })
}

impl Store {
    /// Insert a connection with its already-encrypted credentials.
    /// Duplicate names surface as Conflict.
    pub async fn save_connection(
        &self,
        connection: &Connection,
        credentials_encrypted: &str,
    ) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO connections
             (id, name, connection_type, description, credentials_encrypted, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&connection.id)
        .bind(&connection.name)
        .bind(&connection.connection_type)
        .bind(&connection.description)
        .bind(credentials_encrypted)
        .bind(connection.created_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| map_unique(e, &format!("Connection '{}'", connection.name)))?;
        Ok(())
    }

    pub async fn get_connection(&self, id: &str) -> Result<Option<Connection>, RelayError> {
        let row = sqlx::query("SELECT * FROM connections WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(connection_from_row).transpose()
    }

    pub async fn get_connection_by_name(
        &self,
        name: &str,
    ) -> Result<Option<(Connection, String)>, RelayError> {
        let row = sqlx::query("SELECT * FROM connections WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        match row {
            Some(row) => {
                let ciphertext: String = row.try_get("credentials_encrypted")?;
                Ok(Some((connection_from_row(&row)?, ciphertext)))
            }
            None => Ok(None),
        }
    }

    pub async fn list_connections(&self) -> Result<Vec<Connection>, RelayError> {
        let rows = sqlx::query("SELECT * FROM connections ORDER BY name")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(connection_from_row).collect()
    }

    pub async fn record_connection_test(
        &self,
        id: &str,
        status: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), RelayError> {
        sqlx::query(
            "UPDATE connections SET last_tested_at = ?, last_test_status = ? WHERE id = ?",
        )
        .bind(at.to_rfc3339())
        .bind(status)
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Delete a connection, refusing while any pipeline's source still
    /// references it by name. The check and delete share a transaction so
    /// the store is left unchanged on refusal.
    pub async fn delete_connection(&self, id: &str) -> Result<bool, RelayError> {
        let mut tx = self.pool().begin().await?;

        let Some(name) = sqlx::query_scalar::<_, String>("SELECT name FROM connections WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(false);
        };

        let sources = sqlx::query("SELECT id, source_json FROM pipelines WHERE source_json IS NOT NULL")
            .fetch_all(&mut *tx)
            .await?;
        for row in &sources {
            let raw: String = row.try_get("source_json")?;
            let Ok(source) = serde_json::from_str::<SourceConfig>(&raw) else {
                continue;
            };
            if source.connection_name() == Some(name.as_str()) {
                let pipeline_id: String = row.try_get("id")?;
                return Err(DomainError::Conflict(format!(
                    "Connection '{name}' is in use by pipeline '{pipeline_id}'"
                ))
                .into());
            }
        }

        let result = sqlx::query("DELETE FROM connections WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}
