// relay-core/src/infrastructure/store/ontology.rs
//
// Ontology rows store names, not pointers; the snapshot rebuilt here is
// the only view the semantic engine ever sees.

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::{Store, enum_from_str, enum_to_str, get_json, get_opt_ts, get_ts, map_unique, to_json};
use crate::domain::error::DomainError;
use crate::domain::ontology::{
    Dimension, EdgeSummary, Entity, Metric, ObjectStatus, OntologySnapshot, Proposal,
    ProposalStatus, Relationship,
};
use crate::error::RelayError;

fn entity_from_row(row: &SqliteRow) -> Result<Entity, RelayError> {
    Ok(Entity {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        description: row.try_get("description")?,
        pipeline_id: row.try_get("pipeline_id")?,
        column_annotations: get_json(row, "column_annotations_json")?,
        status: enum_from_str(&row.try_get::<String, _>("status")?)?,
        proposed_by: enum_from_str(&row.try_get::<String, _>("proposed_by")?)?,
        created_at: get_ts(row, "created_at")?,
    })
}

fn relationship_from_row(row: &SqliteRow) -> Result<Relationship, RelayError> {
    Ok(Relationship {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        from_entity: row.try_get("from_entity")?,
        to_entity: row.try_get("to_entity")?,
        from_column: row.try_get("from_column")?,
        to_column: row.try_get("to_column")?,
        relationship_type: enum_from_str(&row.try_get::<String, _>("relationship_type")?)?,
        description: row.try_get("description")?,
        status: enum_from_str(&row.try_get::<String, _>("status")?)?,
        proposed_by: enum_from_str(&row.try_get::<String, _>("proposed_by")?)?,
        created_at: get_ts(row, "created_at")?,
    })
}

fn metric_from_row(row: &SqliteRow) -> Result<Metric, RelayError> {
    Ok(Metric {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        description: row.try_get("description")?,
        entity_name: row.try_get("entity_name")?,
        expression: row.try_get("expression")?,
        format_type: enum_from_str(&row.try_get::<String, _>("format_type")?)?,
        status: enum_from_str(&row.try_get::<String, _>("status")?)?,
        proposed_by: enum_from_str(&row.try_get::<String, _>("proposed_by")?)?,
        created_at: get_ts(row, "created_at")?,
    })
}

fn dimension_from_row(row: &SqliteRow) -> Result<Dimension, RelayError> {
    Ok(Dimension {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        description: row.try_get("description")?,
        entity_name: row.try_get("entity_name")?,
        expression: row.try_get("expression")?,
        dimension_type: enum_from_str(&row.try_get::<String, _>("dimension_type")?)?,
        status: enum_from_str(&row.try_get::<String, _>("status")?)?,
        proposed_by: enum_from_str(&row.try_get::<String, _>("proposed_by")?)?,
        created_at: get_ts(row, "created_at")?,
    })
}

fn proposal_from_row(row: &SqliteRow) -> Result<Proposal, RelayError> {
    Ok(Proposal {
        id: row.try_get("id")?,
        proposal_type: enum_from_str(&row.try_get::<String, _>("proposal_type")?)?,
        payload: get_json(row, "payload_json")?,
        source_pipeline_id: row.try_get("source_pipeline_id")?,
        proposed_by: enum_from_str(&row.try_get::<String, _>("proposed_by")?)?,
        status: enum_from_str(&row.try_get::<String, _>("status")?)?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: get_opt_ts(row, "reviewed_at")?,
        review_notes: row.try_get("review_notes")?,
        created_at: get_ts(row, "created_at")?,
    })
}

impl Store {
    // ── Entities ─────────────────────────────────────────────────────

    pub async fn save_entity(&self, entity: &Entity) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO ontology_entities
             (id, name, display_name, description, pipeline_id, column_annotations_json,
              status, proposed_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entity.id)
        .bind(&entity.name)
        .bind(&entity.display_name)
        .bind(&entity.description)
        .bind(&entity.pipeline_id)
        .bind(to_json(&entity.column_annotations)?)
        .bind(entity.status.as_str())
        .bind(enum_to_str(&entity.proposed_by)?)
        .bind(entity.created_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| map_unique(e, &format!("Entity '{}'", entity.name)))?;
        Ok(())
    }

    pub async fn get_entity_by_name(&self, name: &str) -> Result<Option<Entity>, RelayError> {
        let row = sqlx::query("SELECT * FROM ontology_entities WHERE name = ?")
            .bind(name)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(entity_from_row).transpose()
    }

    pub async fn list_entities(
        &self,
        status: Option<ObjectStatus>,
    ) -> Result<Vec<Entity>, RelayError> {
        let rows = match status {
            Some(s) => {
                sqlx::query("SELECT * FROM ontology_entities WHERE status = ? ORDER BY name")
                    .bind(s.as_str())
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM ontology_entities ORDER BY name")
                    .fetch_all(self.pool())
                    .await?
            }
        };
        rows.iter().map(entity_from_row).collect()
    }

    pub async fn delete_entity(&self, id: &str) -> Result<bool, RelayError> {
        let result = sqlx::query("DELETE FROM ontology_entities WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Relationships ────────────────────────────────────────────────

    pub async fn save_relationship(&self, rel: &Relationship) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO ontology_relationships
             (id, name, from_entity, to_entity, from_column, to_column,
              relationship_type, description, status, proposed_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&rel.id)
        .bind(&rel.name)
        .bind(&rel.from_entity)
        .bind(&rel.to_entity)
        .bind(&rel.from_column)
        .bind(&rel.to_column)
        .bind(enum_to_str(&rel.relationship_type)?)
        .bind(&rel.description)
        .bind(rel.status.as_str())
        .bind(enum_to_str(&rel.proposed_by)?)
        .bind(rel.created_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| map_unique(e, &format!("Relationship '{}'", rel.name)))?;
        Ok(())
    }

    /// Active relationships touching an entity (either endpoint) or all
    /// of them when no entity filter is given.
    pub async fn list_relationships(
        &self,
        entity_name: Option<&str>,
    ) -> Result<Vec<Relationship>, RelayError> {
        let rows = match entity_name {
            Some(name) => {
                sqlx::query(
                    "SELECT * FROM ontology_relationships
                     WHERE status = 'active' AND (from_entity = ? OR to_entity = ?)
                     ORDER BY name",
                )
                .bind(name)
                .bind(name)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM ontology_relationships ORDER BY name")
                    .fetch_all(self.pool())
                    .await?
            }
        };
        rows.iter().map(relationship_from_row).collect()
    }

    pub async fn delete_relationship(&self, id: &str) -> Result<bool, RelayError> {
        let result = sqlx::query("DELETE FROM ontology_relationships WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Metrics ──────────────────────────────────────────────────────

    pub async fn save_metric(&self, metric: &Metric) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO ontology_metrics
             (id, name, display_name, description, entity_name, expression,
              format_type, status, proposed_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&metric.id)
        .bind(&metric.name)
        .bind(&metric.display_name)
        .bind(&metric.description)
        .bind(&metric.entity_name)
        .bind(&metric.expression)
        .bind(enum_to_str(&metric.format_type)?)
        .bind(metric.status.as_str())
        .bind(enum_to_str(&metric.proposed_by)?)
        .bind(metric.created_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| map_unique(e, &format!("Metric '{}'", metric.name)))?;
        Ok(())
    }

    pub async fn list_metrics(
        &self,
        entity_name: Option<&str>,
    ) -> Result<Vec<Metric>, RelayError> {
        let rows = match entity_name {
            Some(name) => {
                sqlx::query(
                    "SELECT * FROM ontology_metrics
                     WHERE status = 'active' AND entity_name = ? ORDER BY name",
                )
                .bind(name)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM ontology_metrics ORDER BY name")
                    .fetch_all(self.pool())
                    .await?
            }
        };
        rows.iter().map(metric_from_row).collect()
    }

    pub async fn delete_metric(&self, id: &str) -> Result<bool, RelayError> {
        let result = sqlx::query("DELETE FROM ontology_metrics WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Dimensions ───────────────────────────────────────────────────

    pub async fn save_dimension(&self, dimension: &Dimension) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO ontology_dimensions
             (id, name, display_name, description, entity_name, expression,
              dimension_type, status, proposed_by, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&dimension.id)
        .bind(&dimension.name)
        .bind(&dimension.display_name)
        .bind(&dimension.description)
        .bind(&dimension.entity_name)
        .bind(&dimension.expression)
        .bind(enum_to_str(&dimension.dimension_type)?)
        .bind(dimension.status.as_str())
        .bind(enum_to_str(&dimension.proposed_by)?)
        .bind(dimension.created_at.to_rfc3339())
        .execute(self.pool())
        .await
        .map_err(|e| map_unique(e, &format!("Dimension '{}'", dimension.name)))?;
        Ok(())
    }

    pub async fn list_dimensions(
        &self,
        entity_name: Option<&str>,
    ) -> Result<Vec<Dimension>, RelayError> {
        let rows = match entity_name {
            Some(name) => {
                sqlx::query(
                    "SELECT * FROM ontology_dimensions
                     WHERE status = 'active' AND entity_name = ? ORDER BY name",
                )
                .bind(name)
                .fetch_all(self.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM ontology_dimensions ORDER BY name")
                    .fetch_all(self.pool())
                    .await?
            }
        };
        rows.iter().map(dimension_from_row).collect()
    }

    pub async fn delete_dimension(&self, id: &str) -> Result<bool, RelayError> {
        let result = sqlx::query("DELETE FROM ontology_dimensions WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Proposals ────────────────────────────────────────────────────

    pub async fn save_proposal(&self, proposal: &Proposal) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO ontology_proposals
             (id, proposal_type, payload_json, source_pipeline_id, proposed_by,
              status, reviewed_by, reviewed_at, review_notes, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&proposal.id)
        .bind(proposal.proposal_type.as_str())
        .bind(to_json(&proposal.payload)?)
        .bind(&proposal.source_pipeline_id)
        .bind(enum_to_str(&proposal.proposed_by)?)
        .bind(proposal.status.as_str())
        .bind(&proposal.reviewed_by)
        .bind(proposal.reviewed_at.map(|t| t.to_rfc3339()))
        .bind(&proposal.review_notes)
        .bind(proposal.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_proposal(&self, id: &str) -> Result<Option<Proposal>, RelayError> {
        let row = sqlx::query("SELECT * FROM ontology_proposals WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(proposal_from_row).transpose()
    }

    pub async fn list_proposals(
        &self,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<Proposal>, RelayError> {
        let rows = match status {
            Some(s) => {
                sqlx::query("SELECT * FROM ontology_proposals WHERE status = ? ORDER BY created_at")
                    .bind(s.as_str())
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM ontology_proposals ORDER BY created_at")
                    .fetch_all(self.pool())
                    .await?
            }
        };
        rows.iter().map(proposal_from_row).collect()
    }

    /// Move a pending proposal to approved/rejected. Guarded so the only
    /// legal transitions are pending -> approved and pending -> rejected.
    pub async fn review_proposal(
        &self,
        id: &str,
        status: ProposalStatus,
        reviewed_by: &str,
        notes: Option<&str>,
    ) -> Result<Proposal, RelayError> {
        let result = sqlx::query(
            "UPDATE ontology_proposals
             SET status = ?, reviewed_by = ?, reviewed_at = ?, review_notes = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(reviewed_by)
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(notes)
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_proposal(id).await? {
                Some(existing) => Err(DomainError::InvalidTransition(format!(
                    "proposal '{id}' is not pending: {}",
                    existing.status.as_str()
                ))
                .into()),
                None => Err(DomainError::NotFound {
                    kind: "Proposal",
                    id: id.to_string(),
                }
                .into()),
            };
        }
        self.get_proposal(id).await?.ok_or_else(|| {
            RelayError::Internal(format!("proposal '{id}' vanished during review"))
        })
    }

    // ── Snapshot ─────────────────────────────────────────────────────

    /// Read-consistent bundle of all active ontology rows plus the
    /// lineage summary. Runs inside one transaction so the semantic
    /// engine never sees a half-updated graph.
    pub async fn ontology_snapshot(&self) -> Result<OntologySnapshot, RelayError> {
        let mut tx = self.pool().begin().await?;

        let entities = sqlx::query("SELECT * FROM ontology_entities WHERE status = 'active' ORDER BY name")
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(entity_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let relationships = sqlx::query(
            "SELECT * FROM ontology_relationships WHERE status = 'active' ORDER BY name",
        )
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(relationship_from_row)
        .collect::<Result<Vec<_>, _>>()?;
        let metrics = sqlx::query("SELECT * FROM ontology_metrics WHERE status = 'active' ORDER BY name")
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(metric_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let dimensions = sqlx::query(
            "SELECT * FROM ontology_dimensions WHERE status = 'active' ORDER BY name",
        )
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(dimension_from_row)
        .collect::<Result<Vec<_>, _>>()?;

        tx.commit().await?;

        let entity_pipeline_map = entities
            .iter()
            .map(|e| (e.name.clone(), e.pipeline_id.clone()))
            .collect();
        let edges = relationships
            .iter()
            .map(|r| EdgeSummary {
                from: r.from_entity.clone(),
                to: r.to_entity.clone(),
                relationship_type: r.relationship_type,
                name: r.name.clone(),
            })
            .collect();

        Ok(OntologySnapshot {
            entities,
            relationships,
            metrics,
            dimensions,
            entity_pipeline_map,
            edges,
        })
    }
}
