// relay-core/src/infrastructure/store/metadata.rs

use std::collections::BTreeMap;

use chrono::Utc;
use sqlx::Row;

use super::{Store, get_ts, to_json};
use crate::domain::metadata::{ColumnKnowledge, DatasetMetadata};
use crate::error::RelayError;

impl Store {
    /// Metadata writes are upsert-by-pipeline: one document per pipeline,
    /// overwritten on re-run.
    pub async fn upsert_metadata(&self, metadata: &DatasetMetadata) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO dataset_metadata (pipeline_id, metadata_json, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT(pipeline_id) DO UPDATE SET
               metadata_json = excluded.metadata_json,
               updated_at = excluded.updated_at",
        )
        .bind(&metadata.pipeline_id)
        .bind(to_json(metadata)?)
        .bind(Utc::now().to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_metadata(
        &self,
        pipeline_id: &str,
    ) -> Result<Option<DatasetMetadata>, RelayError> {
        let row = sqlx::query("SELECT metadata_json FROM dataset_metadata WHERE pipeline_id = ?")
            .bind(pipeline_id)
            .fetch_optional(self.pool())
            .await?;
        match row {
            Some(row) => {
                let raw: String = row.try_get("metadata_json")?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list_metadata(&self) -> Result<Vec<DatasetMetadata>, RelayError> {
        let rows = sqlx::query("SELECT metadata_json FROM dataset_metadata")
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|row| {
                let raw: String = row.try_get("metadata_json")?;
                serde_json::from_str(&raw).map_err(RelayError::from)
            })
            .collect()
    }

    // ── Column knowledge base ────────────────────────────────────────

    pub async fn upsert_column_knowledge(
        &self,
        knowledge: &ColumnKnowledge,
    ) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO column_knowledge
             (column_key, description, business_meaning, verified_by, verified_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(column_key) DO UPDATE SET
               description = excluded.description,
               business_meaning = excluded.business_meaning,
               verified_by = excluded.verified_by,
               verified_at = excluded.verified_at",
        )
        .bind(&knowledge.column_key)
        .bind(&knowledge.description)
        .bind(&knowledge.business_meaning)
        .bind(&knowledge.verified_by)
        .bind(knowledge.verified_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// The full knowledge base keyed by normalized column name, merged
    /// into metadata at generation time.
    pub async fn column_knowledge(&self) -> Result<BTreeMap<String, ColumnKnowledge>, RelayError> {
        let rows = sqlx::query("SELECT * FROM column_knowledge")
            .fetch_all(self.pool())
            .await?;
        let mut map = BTreeMap::new();
        for row in &rows {
            let knowledge = ColumnKnowledge {
                column_key: row.try_get("column_key")?,
                description: row.try_get("description")?,
                business_meaning: row.try_get("business_meaning")?,
                verified_by: row.try_get("verified_by")?,
                verified_at: get_ts(row, "verified_at")?,
            };
            map.insert(knowledge.column_key.clone(), knowledge);
        }
        Ok(map)
    }
}
