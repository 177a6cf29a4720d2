// relay-core/src/application/lineage.rs
//
// Entity -> pipeline -> source traceability, computed from existing rows
// on demand. Reads only; the output is a deterministic function of store
// state.

use serde::{Deserialize, Serialize};

use crate::domain::ontology::{Dimension, Entity, Metric, Relationship};
use crate::domain::pipeline::SourceConfig;
use crate::error::RelayError;
use crate::infrastructure::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSummary {
    pub id: String,
    pub name: String,
    pub kind: crate::domain::pipeline::PipelineKind,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricLineage {
    #[serde(flatten)]
    pub metric: Metric,
    pub column_references: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionLineage {
    #[serde(flatten)]
    pub dimension: Dimension,
    pub column_references: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipNeighborhood {
    pub outgoing: Vec<Relationship>,
    pub incoming: Vec<Relationship>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineageReport {
    pub entity: Entity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceConfig>,
    pub metrics: Vec<MetricLineage>,
    pub dimensions: Vec<DimensionLineage>,
    pub relationships: RelationshipNeighborhood,
    pub downstream_entities: Vec<String>,
    pub upstream_entities: Vec<String>,
}

/// Full lineage for one entity, or None when the entity does not exist.
pub async fn compute_lineage(
    store: &Store,
    entity_name: &str,
) -> Result<Option<LineageReport>, RelayError> {
    let Some(entity) = store.get_entity_by_name(entity_name).await? else {
        return Ok(None);
    };

    let pipeline = store.get_pipeline(&entity.pipeline_id).await?;
    let (pipeline_summary, source) = match pipeline {
        Some(p) => (
            Some(PipelineSummary {
                id: p.id.clone(),
                name: p.name.clone(),
                kind: p.kind,
                status: p.status.clone(),
            }),
            p.source,
        ),
        None => (None, None),
    };

    let metrics = store
        .list_metrics(Some(entity_name))
        .await?
        .into_iter()
        .map(|metric| MetricLineage {
            column_references: crate::domain::naming::extract_column_references(
                &metric.expression,
            ),
            metric,
        })
        .collect();
    let dimensions = store
        .list_dimensions(Some(entity_name))
        .await?
        .into_iter()
        .map(|dimension| DimensionLineage {
            column_references: crate::domain::naming::extract_column_references(
                &dimension.expression,
            ),
            dimension,
        })
        .collect();

    let relationships = store.list_relationships(Some(entity_name)).await?;
    let (outgoing, incoming): (Vec<_>, Vec<_>) = relationships
        .into_iter()
        .partition(|r| r.from_entity == entity_name);

    let downstream_entities = dedupe(outgoing.iter().map(|r| r.to_entity.clone()));
    let upstream_entities = dedupe(incoming.iter().map(|r| r.from_entity.clone()));

    Ok(Some(LineageReport {
        entity,
        pipeline: pipeline_summary,
        source,
        metrics,
        dimensions,
        relationships: RelationshipNeighborhood { outgoing, incoming },
        downstream_entities,
        upstream_entities,
    }))
}

fn dedupe(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.contains(&name) {
            out.push(name);
        }
    }
    out
}
