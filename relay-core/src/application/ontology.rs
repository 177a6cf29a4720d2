// relay-core/src/application/ontology.rs
//
// Ontology building: heuristic proposals from a pipeline's column
// profile, an optional AI proposer layered on top (any failure falls
// back silently), and the approve/reject workflow that materializes
// payloads into the live tables.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::domain::error::DomainError;
use crate::domain::metadata::{DatasetMetadata, SemanticType};
use crate::domain::naming::{normalize_entity_name, short_id};
use crate::domain::ontology::{
    ColumnAnnotation, ColumnRole, Dimension, DimensionType, Entity, FormatType, Metric,
    ObjectStatus, Proposal, ProposalKind, ProposalStatus, ProposedBy, Relationship,
    RelationshipType,
};
use crate::domain::pipeline::Pipeline;
use crate::error::RelayError;
use crate::infrastructure::llm::{AnthropicClient, parse_json_response};
use crate::infrastructure::store::Store;

/// A would-be ontology object, before persistence.
#[derive(Debug, Clone)]
pub struct Draft {
    pub kind: ProposalKind,
    pub payload: Value,
}

pub struct OntologyManager {
    store: Arc<Store>,
    llm: Option<Arc<AnthropicClient>>,
    /// Dev mode (auth disabled) materializes proposals immediately.
    auto_approve: bool,
}

impl OntologyManager {
    pub fn new(store: Arc<Store>, llm: Option<Arc<AnthropicClient>>, auto_approve: bool) -> Self {
        Self {
            store,
            llm,
            auto_approve,
        }
    }

    /// Analyze a pipeline and persist ontology proposals. In dev mode
    /// each proposal is materialized immediately; a materialization
    /// conflict records the proposal as rejected instead of clobbering
    /// the existing object.
    pub async fn propose_for_pipeline(
        &self,
        pipeline_id: &str,
        include_relationships: bool,
        include_metrics: bool,
    ) -> Result<Vec<Proposal>, RelayError> {
        let pipeline = self.store.require_pipeline(pipeline_id).await?;
        let metadata = self.store.get_metadata(pipeline_id).await?;
        let existing = self.store.list_entities(Some(ObjectStatus::Active)).await?;

        let (drafts, proposed_by) = match &self.llm {
            Some(llm) => {
                match self
                    .ai_propose(
                        llm,
                        &pipeline,
                        metadata.as_ref(),
                        &existing,
                        include_relationships,
                        include_metrics,
                    )
                    .await
                {
                    Ok(drafts) if !drafts.is_empty() => (drafts, ProposedBy::Ai),
                    Ok(_) | Err(_) => (
                        heuristic_propose(
                            &pipeline,
                            metadata.as_ref(),
                            &existing,
                            include_relationships,
                            include_metrics,
                        ),
                        ProposedBy::Heuristic,
                    ),
                }
            }
            None => (
                heuristic_propose(
                    &pipeline,
                    metadata.as_ref(),
                    &existing,
                    include_relationships,
                    include_metrics,
                ),
                ProposedBy::Heuristic,
            ),
        };

        let mut saved = Vec::with_capacity(drafts.len());
        for draft in drafts {
            let mut proposal = Proposal {
                id: short_id("prop"),
                proposal_type: draft.kind,
                payload: draft.payload.clone(),
                source_pipeline_id: Some(pipeline_id.to_string()),
                proposed_by,
                status: ProposalStatus::Pending,
                reviewed_by: None,
                reviewed_at: None,
                review_notes: None,
                created_at: Utc::now(),
            };

            if self.auto_approve {
                match self.materialize(draft.kind, draft.payload).await {
                    Ok(_) => {
                        proposal.status = ProposalStatus::Approved;
                        proposal.reviewed_by = Some("auto".to_string());
                        proposal.reviewed_at = Some(Utc::now());
                    }
                    Err(e) => {
                        proposal.status = ProposalStatus::Rejected;
                        proposal.reviewed_by = Some("auto".to_string());
                        proposal.reviewed_at = Some(Utc::now());
                        proposal.review_notes = Some(e.to_string());
                        warn!(error = %e, "auto-approval skipped conflicting proposal");
                    }
                }
            }

            self.store.save_proposal(&proposal).await?;
            saved.push(proposal);
        }

        info!(
            pipeline_id,
            count = saved.len(),
            auto_approved = self.auto_approve,
            "ontology proposals recorded"
        );
        Ok(saved)
    }

    /// pending -> approved, materializing the payload. A conflicting
    /// payload leaves the proposal pending and surfaces the error.
    pub async fn approve_proposal(
        &self,
        proposal_id: &str,
        reviewed_by: &str,
    ) -> Result<(Proposal, Value), RelayError> {
        let proposal = self.store.get_proposal(proposal_id).await?.ok_or_else(|| {
            DomainError::NotFound {
                kind: "Proposal",
                id: proposal_id.to_string(),
            }
        })?;
        if proposal.status != ProposalStatus::Pending {
            return Err(DomainError::InvalidTransition(format!(
                "proposal '{proposal_id}' is not pending: {}",
                proposal.status.as_str()
            ))
            .into());
        }

        let created = self
            .materialize(proposal.proposal_type, proposal.payload.clone())
            .await?;
        let reviewed = self
            .store
            .review_proposal(proposal_id, ProposalStatus::Approved, reviewed_by, None)
            .await?;
        Ok((reviewed, created))
    }

    /// pending -> rejected. Terminal.
    pub async fn reject_proposal(
        &self,
        proposal_id: &str,
        reviewed_by: &str,
        notes: Option<&str>,
    ) -> Result<Proposal, RelayError> {
        self.store
            .review_proposal(proposal_id, ProposalStatus::Rejected, reviewed_by, notes)
            .await
    }

    /// Parse a payload per kind, assign a fresh id, insert. Also the
    /// write path for user-created ontology objects.
    pub async fn materialize(&self, kind: ProposalKind, payload: Value) -> Result<Value, RelayError> {
        match kind {
            ProposalKind::Entity => {
                let mut entity: Entity = serde_json::from_value(payload)
                    .map_err(|e| DomainError::Validation(format!("Bad entity payload: {e}")))?;
                entity.id = short_id("ent");
                self.create_entity(entity).await.map(|e| json!(e))
            }
            ProposalKind::Relationship => {
                let mut rel: Relationship = serde_json::from_value(payload).map_err(|e| {
                    DomainError::Validation(format!("Bad relationship payload: {e}"))
                })?;
                rel.id = short_id("rel");
                self.create_relationship(rel).await.map(|r| json!(r))
            }
            ProposalKind::Metric => {
                let mut metric: Metric = serde_json::from_value(payload)
                    .map_err(|e| DomainError::Validation(format!("Bad metric payload: {e}")))?;
                metric.id = short_id("met");
                self.create_metric(metric).await.map(|m| json!(m))
            }
            ProposalKind::Dimension => {
                let mut dimension: Dimension = serde_json::from_value(payload)
                    .map_err(|e| DomainError::Validation(format!("Bad dimension payload: {e}")))?;
                dimension.id = short_id("dim");
                self.create_dimension(dimension).await.map(|d| json!(d))
            }
        }
    }

    // ── Validated writes ─────────────────────────────────────────────

    pub async fn create_entity(&self, mut entity: Entity) -> Result<Entity, RelayError> {
        if entity.id.is_empty() {
            entity.id = short_id("ent");
        }
        entity.name = normalize_entity_name(&entity.name);
        if entity.name.is_empty() {
            return Err(DomainError::Validation("Entity name cannot be empty".into()).into());
        }
        self.store.require_pipeline(&entity.pipeline_id).await?;
        self.store.save_entity(&entity).await?;
        Ok(entity)
    }

    /// Both endpoints must exist and be active at creation time.
    pub async fn create_relationship(
        &self,
        mut rel: Relationship,
    ) -> Result<Relationship, RelayError> {
        if rel.id.is_empty() {
            rel.id = short_id("rel");
        }
        for endpoint in [&rel.from_entity, &rel.to_entity] {
            let entity = self.store.get_entity_by_name(endpoint).await?.ok_or_else(|| {
                DomainError::Validation(format!("Relationship endpoint '{endpoint}' does not exist"))
            })?;
            if entity.status != ObjectStatus::Active {
                return Err(DomainError::Validation(format!(
                    "Relationship endpoint '{endpoint}' is not active"
                ))
                .into());
            }
        }
        self.store.save_relationship(&rel).await?;
        Ok(rel)
    }

    pub async fn create_metric(&self, mut metric: Metric) -> Result<Metric, RelayError> {
        if metric.id.is_empty() {
            metric.id = short_id("met");
        }
        if metric.expression.trim().is_empty() {
            return Err(DomainError::Validation("Metric expression cannot be empty".into()).into());
        }
        self.store.save_metric(&metric).await?;
        Ok(metric)
    }

    pub async fn create_dimension(&self, mut dimension: Dimension) -> Result<Dimension, RelayError> {
        if dimension.id.is_empty() {
            dimension.id = short_id("dim");
        }
        if dimension.expression.trim().is_empty() {
            return Err(
                DomainError::Validation("Dimension expression cannot be empty".into()).into(),
            );
        }
        self.store.save_dimension(&dimension).await?;
        Ok(dimension)
    }

    // ── AI path ──────────────────────────────────────────────────────

    async fn ai_propose(
        &self,
        llm: &AnthropicClient,
        pipeline: &Pipeline,
        metadata: Option<&DatasetMetadata>,
        existing: &[Entity],
        include_relationships: bool,
        include_metrics: bool,
    ) -> Result<Vec<Draft>, RelayError> {
        let prompt = build_ai_prompt(
            pipeline,
            metadata,
            existing,
            include_relationships,
            include_metrics,
        );
        let response = llm.complete(&prompt, 2048).await?;
        let Some(Value::Array(items)) = parse_json_response(&response) else {
            return Ok(Vec::new());
        };

        let mut drafts = Vec::new();
        for item in items {
            let Some(kind) = item
                .get("type")
                .and_then(Value::as_str)
                .and_then(|s| serde_json::from_value(Value::String(s.to_string())).ok())
            else {
                continue;
            };
            let Some(payload) = item.get("payload").cloned() else {
                continue;
            };
            drafts.push(Draft { kind, payload });
        }
        Ok(drafts)
    }
}

fn build_ai_prompt(
    pipeline: &Pipeline,
    metadata: Option<&DatasetMetadata>,
    existing: &[Entity],
    include_relationships: bool,
    include_metrics: bool,
) -> String {
    let columns: Vec<Value> = metadata
        .map(|m| {
            m.columns
                .iter()
                .map(|c| {
                    json!({
                        "name": c.name,
                        "type": c.data_type,
                        "semantic_type": c.semantic_type,
                        "sample_values": c.sample_values,
                        "null_percentage": c.null_percentage,
                        "unique_values": c.unique_values,
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    let existing: Vec<Value> = existing
        .iter()
        .map(|e| json!({"name": e.name, "pipeline_id": e.pipeline_id}))
        .collect();

    let mut requested = vec!["entity (name, display_name, description, column_annotations)"];
    if include_relationships {
        requested
            .push("relationships (name, from_entity, to_entity, from_column, to_column, relationship_type)");
    }
    if include_metrics {
        requested.push("metrics (name, display_name, expression using entity_name.column, format_type)");
        requested.push(
            "dimensions (name, display_name, expression using entity_name.column, dimension_type: direct|derived)",
        );
    }

    format!(
        "Analyze this pipeline data and propose ontology elements.\n\n\
         Pipeline: {} (id: {})\n\
         Columns: {}\n\
         Existing entities: {}\n\n\
         Propose: {}\n\n\
         Respond ONLY with a JSON array of objects, each with 'type' \
         (entity/relationship/metric/dimension) and 'payload' containing the fields for that \
         type. Use the pipeline name (normalized to lowercase/underscores) as the entity name. \
         Metric/dimension expressions should use entity_name.column_name format.",
        pipeline.name,
        pipeline.id,
        json!(columns),
        json!(existing),
        requested.join(", ")
    )
}

// ── Heuristics (the authoritative contract) ──────────────────────────

pub fn heuristic_propose(
    pipeline: &Pipeline,
    metadata: Option<&DatasetMetadata>,
    existing: &[Entity],
    include_relationships: bool,
    include_metrics: bool,
) -> Vec<Draft> {
    let entity_name = normalize_entity_name(&pipeline.name);
    let columns = metadata.map(|m| m.columns.as_slice()).unwrap_or_default();
    let mut drafts = Vec::new();

    // Entity: annotate the primary key when an `id` column or an
    // identifier-typed column exists.
    let mut annotations: BTreeMap<String, ColumnAnnotation> = BTreeMap::new();
    for col in columns {
        if col.name == "id" || col.semantic_type == SemanticType::Identifier {
            annotations.insert(
                col.name.clone(),
                ColumnAnnotation {
                    role: ColumnRole::PrimaryKey,
                    description: col.description.clone().unwrap_or_default(),
                },
            );
        }
    }
    drafts.push(Draft {
        kind: ProposalKind::Entity,
        payload: json!(Entity {
            id: String::new(),
            name: entity_name.clone(),
            display_name: pipeline.name.clone(),
            description: if pipeline.description.is_empty() {
                format!("Entity from pipeline '{}'", pipeline.name)
            } else {
                pipeline.description.clone()
            },
            pipeline_id: pipeline.id.clone(),
            column_annotations: annotations,
            status: ObjectStatus::Active,
            proposed_by: ProposedBy::Heuristic,
            created_at: Utc::now(),
        }),
    });

    // Relationships: every `<ref>_id` column pointing at an existing
    // active entity named `ref` or `ref + "s"`.
    if include_relationships {
        let existing_names: Vec<&str> = existing.iter().map(|e| e.name.as_str()).collect();
        for col in columns {
            let Some(reference) = col.name.strip_suffix("_id") else {
                continue;
            };
            if reference.is_empty() {
                continue;
            }
            let plural = format!("{reference}s");
            let Some(target) = [reference, plural.as_str()]
                .into_iter()
                .find(|candidate| existing_names.contains(candidate))
            else {
                continue;
            };
            drafts.push(Draft {
                kind: ProposalKind::Relationship,
                payload: json!(Relationship {
                    id: String::new(),
                    name: format!("{entity_name}_to_{target}"),
                    from_entity: entity_name.clone(),
                    to_entity: target.to_string(),
                    from_column: col.name.clone(),
                    to_column: "id".to_string(),
                    relationship_type: RelationshipType::ManyToOne,
                    description: format!("{entity_name}.{} -> {target}.id", col.name),
                    status: ObjectStatus::Active,
                    proposed_by: ProposedBy::Heuristic,
                    created_at: Utc::now(),
                }),
            });
        }
    }

    if include_metrics {
        // Metrics: SUM and AVG per numeric non-id column, plus one COUNT(*).
        for col in columns {
            if !is_measure_column(col.semantic_type, &col.data_type)
                || col.name == "id"
                || col.name.ends_with("_id")
            {
                continue;
            }
            let format_type = if col.semantic_type == SemanticType::Currency {
                FormatType::Currency
            } else {
                FormatType::Number
            };
            drafts.push(metric_draft(
                &entity_name,
                &format!("total_{}", col.name),
                &format!("Total {}", titleize(&col.name)),
                &format!("Sum of {entity_name}.{}", col.name),
                &format!("SUM({entity_name}.{})", col.name),
                format_type,
            ));
            drafts.push(metric_draft(
                &entity_name,
                &format!("avg_{}", col.name),
                &format!("Average {}", titleize(&col.name)),
                &format!("Average of {entity_name}.{}", col.name),
                &format!("AVG({entity_name}.{})", col.name),
                FormatType::Number,
            ));
        }
        drafts.push(metric_draft(
            &entity_name,
            &format!("{entity_name}_count"),
            &format!("{} Count", pipeline.name),
            &format!("Count of {entity_name} records"),
            "COUNT(*)",
            FormatType::Number,
        ));

        // Dimensions: monthly truncation per datetime column, direct
        // grouping per low-cardinality text column.
        for col in columns {
            if is_datetime_column(col.semantic_type, &col.data_type) {
                drafts.push(Draft {
                    kind: ProposalKind::Dimension,
                    payload: json!(Dimension {
                        id: String::new(),
                        name: format!("{}_month", col.name),
                        display_name: format!("{} (Month)", titleize(&col.name)),
                        description: format!("Monthly grouping of {entity_name}.{}", col.name),
                        entity_name: entity_name.clone(),
                        expression: format!("DATE_TRUNC('month', {entity_name}.{})", col.name),
                        dimension_type: DimensionType::Derived,
                        status: ObjectStatus::Active,
                        proposed_by: ProposedBy::Heuristic,
                        created_at: Utc::now(),
                    }),
                });
            } else if is_text_column(&col.data_type)
                && (1..=50).contains(&col.unique_values)
                && col.name != "id"
                && !col.name.ends_with("_id")
            {
                drafts.push(Draft {
                    kind: ProposalKind::Dimension,
                    payload: json!(Dimension {
                        id: String::new(),
                        name: col.name.clone(),
                        display_name: titleize(&col.name),
                        description: format!("Group by {entity_name}.{}", col.name),
                        entity_name: entity_name.clone(),
                        expression: format!("{entity_name}.{}", col.name),
                        dimension_type: DimensionType::Direct,
                        status: ObjectStatus::Active,
                        proposed_by: ProposedBy::Heuristic,
                        created_at: Utc::now(),
                    }),
                });
            }
        }
    }

    drafts
}

fn metric_draft(
    entity_name: &str,
    name: &str,
    display_name: &str,
    description: &str,
    expression: &str,
    format_type: FormatType,
) -> Draft {
    Draft {
        kind: ProposalKind::Metric,
        payload: json!(Metric {
            id: String::new(),
            name: name.to_string(),
            display_name: display_name.to_string(),
            description: description.to_string(),
            entity_name: entity_name.to_string(),
            expression: expression.to_string(),
            format_type,
            status: ObjectStatus::Active,
            proposed_by: ProposedBy::Heuristic,
            created_at: Utc::now(),
        }),
    }
}

fn is_measure_column(semantic: SemanticType, data_type: &str) -> bool {
    matches!(semantic, SemanticType::Currency | SemanticType::Numeric)
        || data_type.starts_with("Int")
        || data_type.starts_with("UInt")
        || data_type.starts_with("Float")
}

fn is_datetime_column(semantic: SemanticType, data_type: &str) -> bool {
    semantic == SemanticType::Datetime
        || data_type.contains("Date")
        || data_type.contains("Timestamp")
}

fn is_text_column(data_type: &str) -> bool {
    data_type.contains("Utf8")
}

fn titleize(name: &str) -> String {
    name.replace('_', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::domain::metadata::ColumnProfile;
    use crate::domain::pipeline::{PipelineOptions, ScheduleConfig};

    fn column(name: &str, data_type: &str, semantic: SemanticType, unique: u64) -> ColumnProfile {
        ColumnProfile {
            name: name.into(),
            data_type: data_type.into(),
            semantic_type: semantic,
            null_count: 0,
            null_percentage: 0.0,
            unique_values: unique,
            sample_values: vec![],
            min: None,
            max: None,
            mean: None,
            auto_description: String::new(),
            description: None,
            business_meaning: None,
            needs_review: true,
            human_verified: false,
            verified_at: None,
            ai_description: None,
            ai_business_meaning: None,
            ai_use_cases: Vec::new(),
            ai_quality_notes: None,
            ai_confidence: None,
        }
    }

    fn orders_pipeline() -> Pipeline {
        Pipeline {
            id: "pipe-orders".into(),
            name: "Orders".into(),
            description: String::new(),
            kind: crate::domain::pipeline::PipelineKind::Regular,
            status: "active".into(),
            source: None,
            destination: None,
            options: PipelineOptions::default(),
            schedule: ScheduleConfig::default(),
            transformation: None,
            last_scheduled_run: None,
            created_at: Utc::now(),
        }
    }

    fn orders_metadata() -> DatasetMetadata {
        DatasetMetadata {
            pipeline_id: "pipe-orders".into(),
            pipeline_name: "Orders".into(),
            generated_at: Utc::now(),
            row_count: 100,
            column_count: 5,
            source_type: Some("synthetic".into()),
            columns: vec![
                column("id", "Int64", SemanticType::Identifier, 100),
                column("customer_id", "Int64", SemanticType::Identifier, 40),
                column("amount", "Float64", SemanticType::Currency, 90),
                column("segment", "Utf8", SemanticType::Text, 4),
                column("created_date", "Date32", SemanticType::Datetime, 60),
            ],
            columns_needing_review: 5,
        }
    }

    fn customer_entity() -> Entity {
        Entity {
            id: "ent-1".into(),
            name: "customers".into(),
            display_name: "Customers".into(),
            description: String::new(),
            pipeline_id: "pipe-customers".into(),
            column_annotations: BTreeMap::new(),
            status: ObjectStatus::Active,
            proposed_by: ProposedBy::User,
            created_at: Utc::now(),
        }
    }

    fn names_of(drafts: &[Draft], kind: ProposalKind) -> Vec<String> {
        drafts
            .iter()
            .filter(|d| d.kind == kind)
            .map(|d| d.payload["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_heuristics_propose_entity_with_primary_key() {
        let drafts = heuristic_propose(
            &orders_pipeline(),
            Some(&orders_metadata()),
            &[],
            true,
            true,
        );
        let entity = drafts.iter().find(|d| d.kind == ProposalKind::Entity).unwrap();
        assert_eq!(entity.payload["name"], "orders");
        assert_eq!(
            entity.payload["column_annotations"]["id"]["role"],
            "primary_key"
        );
    }

    #[test]
    fn test_heuristics_propose_relationship_to_plural_entity() {
        let drafts = heuristic_propose(
            &orders_pipeline(),
            Some(&orders_metadata()),
            &[customer_entity()],
            true,
            false,
        );
        let rels = names_of(&drafts, ProposalKind::Relationship);
        assert_eq!(rels, vec!["orders_to_customers"]);
        let rel = drafts
            .iter()
            .find(|d| d.kind == ProposalKind::Relationship)
            .unwrap();
        assert_eq!(rel.payload["from_column"], "customer_id");
        assert_eq!(rel.payload["to_column"], "id");
        assert_eq!(rel.payload["relationship_type"], "many_to_one");
    }

    #[test]
    fn test_heuristics_metrics_skip_id_columns() {
        let drafts = heuristic_propose(
            &orders_pipeline(),
            Some(&orders_metadata()),
            &[],
            false,
            true,
        );
        let metrics = names_of(&drafts, ProposalKind::Metric);
        assert!(metrics.contains(&"total_amount".to_string()));
        assert!(metrics.contains(&"avg_amount".to_string()));
        assert!(metrics.contains(&"orders_count".to_string()));
        assert!(!metrics.iter().any(|m| m.contains("customer_id")));

        let total = drafts
            .iter()
            .find(|d| d.payload["name"] == "total_amount")
            .unwrap();
        assert_eq!(total.payload["expression"], "SUM(orders.amount)");
        assert_eq!(total.payload["format_type"], "currency");
    }

    #[test]
    fn test_heuristics_dimensions() {
        let drafts = heuristic_propose(
            &orders_pipeline(),
            Some(&orders_metadata()),
            &[],
            false,
            true,
        );
        let dims = names_of(&drafts, ProposalKind::Dimension);
        assert!(dims.contains(&"segment".to_string()));
        assert!(dims.contains(&"created_date_month".to_string()));

        let monthly = drafts
            .iter()
            .find(|d| d.payload["name"] == "created_date_month")
            .unwrap();
        assert_eq!(
            monthly.payload["expression"],
            "DATE_TRUNC('month', orders.created_date)"
        );
        assert_eq!(monthly.payload["dimension_type"], "derived");
    }

    #[test]
    fn test_heuristics_without_metadata_still_propose_entity_and_count() {
        let drafts = heuristic_propose(&orders_pipeline(), None, &[], true, true);
        assert_eq!(names_of(&drafts, ProposalKind::Entity), vec!["orders"]);
        assert_eq!(names_of(&drafts, ProposalKind::Metric), vec!["orders_count"]);
    }
}
