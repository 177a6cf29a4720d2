// relay-core/src/domain/ontology.rs
//
// The named-object graph layered over pipelines: entities, relationships,
// metrics, dimensions, and the proposal workflow that feeds them. Storage
// stores names, not pointers; resolution happens lazily at query time
// against an OntologySnapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ── Shared enums ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStatus {
    #[default]
    Active,
    Proposed,
    Rejected,
}

impl ObjectStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectStatus::Active => "active",
            ObjectStatus::Proposed => "proposed",
            ObjectStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProposedBy {
    Ai,
    Heuristic,
    #[default]
    User,
}

// ── Entity ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    PrimaryKey,
    ForeignKey,
    Measure,
    Dimension,
    Attribute,
    Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnAnnotation {
    pub role: ColumnRole,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub pipeline_id: String,
    #[serde(default)]
    pub column_annotations: BTreeMap<String, ColumnAnnotation>,
    #[serde(default)]
    pub status: ObjectStatus,
    #[serde(default)]
    pub proposed_by: ProposedBy,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

// ── Relationship ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    OneToOne,
    OneToMany,
    ManyToOne,
    ManyToMany,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub from_entity: String,
    pub to_entity: String,
    pub from_column: String,
    pub to_column: String,
    pub relationship_type: RelationshipType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: ObjectStatus,
    #[serde(default)]
    pub proposed_by: ProposedBy,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

// ── Metric & Dimension ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FormatType {
    #[default]
    Number,
    Currency,
    Percentage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub entity_name: String,
    /// SQL fragment; may reference `entity.column` and `${other_metric}`.
    pub expression: String,
    #[serde(default)]
    pub format_type: FormatType,
    #[serde(default)]
    pub status: ObjectStatus,
    #[serde(default)]
    pub proposed_by: ProposedBy,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DimensionType {
    #[default]
    Direct,
    Derived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dimension {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub entity_name: String,
    pub expression: String,
    #[serde(default)]
    pub dimension_type: DimensionType,
    #[serde(default)]
    pub status: ObjectStatus,
    #[serde(default)]
    pub proposed_by: ProposedBy,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

// ── Proposals ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalKind {
    Entity,
    Relationship,
    Metric,
    Dimension,
}

impl ProposalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProposalKind::Entity => "entity",
            ProposalKind::Relationship => "relationship",
            ProposalKind::Metric => "metric",
            ProposalKind::Dimension => "dimension",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProposalStatus::Pending => "pending",
            ProposalStatus::Approved => "approved",
            ProposalStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub proposal_type: ProposalKind,
    /// The would-be object, deserialized per kind at materialization.
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_pipeline_id: Option<String>,
    pub proposed_by: ProposedBy,
    #[serde(default)]
    pub status: ProposalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_notes: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

// ── Snapshot ─────────────────────────────────────────────────────────

/// Directed edge summary included in the lineage view of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSummary {
    pub from: String,
    pub to: String,
    pub relationship_type: RelationshipType,
    pub name: String,
}

/// Read-consistent view of all active ontology rows, the input to the
/// semantic query engine. `entity_pipeline_map` covers exactly the
/// entities returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OntologySnapshot {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
    pub metrics: Vec<Metric>,
    pub dimensions: Vec<Dimension>,
    pub entity_pipeline_map: BTreeMap<String, String>,
    pub edges: Vec<EdgeSummary>,
}

impl OntologySnapshot {
    pub fn entity(&self, name: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn metric(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }
}
