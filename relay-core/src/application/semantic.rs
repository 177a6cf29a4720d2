// relay-core/src/application/semantic.rs
//
// The semantic query resolver: metric/dimension names in, executable SQL
// out. Metric `${ref}` interpolation expands recursively with a path set
// guarding against cycles; the join graph is a BFS over active
// relationships (treated as undirected) between the touched entities.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};

use crate::application::query::{DEFAULT_ROW_LIMIT, QueryEngine, QueryResult};
use crate::domain::error::DomainError;
use crate::domain::naming::{derive_table_name, extract_metric_references};
use crate::domain::ontology::OntologySnapshot;
use crate::error::RelayError;
use crate::infrastructure::llm::{AnthropicClient, parse_json_response};
use crate::infrastructure::store::Store;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticRequest {
    #[serde(default)]
    pub metrics: Vec<String>,
    #[serde(default)]
    pub dimensions: Vec<String>,
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub order_by: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedQuery {
    pub sql: String,
    pub pipeline_ids: Vec<String>,
    pub entities_used: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticQueryResult {
    #[serde(flatten)]
    pub result: QueryResult,
    pub generated_sql: String,
    pub entities_used: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_language_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

pub struct SemanticQueryEngine {
    store: Arc<Store>,
    query: Arc<QueryEngine>,
    llm: Option<Arc<AnthropicClient>>,
}

impl SemanticQueryEngine {
    pub fn new(
        store: Arc<Store>,
        query: Arc<QueryEngine>,
        llm: Option<Arc<AnthropicClient>>,
    ) -> Self {
        Self { store, query, llm }
    }

    /// Main entry: routes to the structured or natural-language path.
    pub async fn execute(&self, request: &SemanticRequest) -> Result<SemanticQueryResult, RelayError> {
        if let Some(question) = &request.natural_language {
            return self.execute_natural_language(question).await;
        }
        self.execute_structured(request, None, None).await
    }

    #[instrument(skip(self, request))]
    async fn execute_structured(
        &self,
        request: &SemanticRequest,
        natural_language_query: Option<String>,
        explanation: Option<String>,
    ) -> Result<SemanticQueryResult, RelayError> {
        let snapshot = self.store.ontology_snapshot().await?;
        let pipeline_names = self.pipeline_names(&snapshot).await?;
        let resolved = resolve_structured(&snapshot, &pipeline_names, request)?;
        info!(sql = %resolved.sql, "semantic query compiled");

        let result = self
            .query
            .execute(
                &resolved.pipeline_ids,
                &resolved.sql,
                request.limit.unwrap_or(DEFAULT_ROW_LIMIT),
            )
            .await?;

        Ok(SemanticQueryResult {
            result,
            generated_sql: resolved.sql,
            entities_used: resolved.entities_used,
            natural_language_query,
            explanation,
        })
    }

    /// Ask the model for the structured form of a question, then reuse
    /// the structured path. Requires a configured key.
    async fn execute_natural_language(
        &self,
        question: &str,
    ) -> Result<SemanticQueryResult, RelayError> {
        let llm = self.llm.as_ref().ok_or(DomainError::NlUnavailable)?;
        let snapshot = self.store.ontology_snapshot().await?;
        let prompt = build_nl_prompt(question, &snapshot);
        let response = llm.complete(&prompt, 1024).await?;
        let parsed = parse_json_response(&response).ok_or_else(|| {
            DomainError::QueryFailed("Could not parse structured query from AI response".into())
        })?;

        let request: SemanticRequest = serde_json::from_value(parsed.clone())
            .map_err(|e| DomainError::QueryFailed(format!("Bad structured query from AI: {e}")))?;
        let explanation = parsed
            .get("explanation")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        self.execute_structured(&request, Some(question.to_string()), explanation)
            .await
    }

    /// pipeline_id -> display name, for every pipeline an active entity
    /// points at.
    async fn pipeline_names(
        &self,
        snapshot: &OntologySnapshot,
    ) -> Result<BTreeMap<String, String>, RelayError> {
        let mut names = BTreeMap::new();
        for pipeline_id in snapshot.entity_pipeline_map.values() {
            if names.contains_key(pipeline_id) {
                continue;
            }
            if let Some(pipeline) = self.store.get_pipeline(pipeline_id).await? {
                names.insert(pipeline_id.clone(), pipeline.name);
            }
        }
        Ok(names)
    }
}

/// Pure resolution: snapshot + pipeline names + request -> SQL. This is
/// the whole semantic contract, kept free of I/O so it can be tested
/// against hand-built snapshots.
pub fn resolve_structured(
    snapshot: &OntologySnapshot,
    pipeline_names: &BTreeMap<String, String>,
    request: &SemanticRequest,
) -> Result<ResolvedQuery, RelayError> {
    if request.metrics.is_empty() && request.dimensions.is_empty() {
        return Err(DomainError::EmptyQuery.into());
    }

    // first-touched order drives the BFS root and output determinism
    let mut entities_used: Vec<String> = Vec::new();
    let mut touch = |entity: &str, list: &mut Vec<String>| {
        if !list.contains(&entity.to_string()) {
            list.push(entity.to_string());
        }
    };

    let mut select_parts = Vec::new();
    let mut group_by_parts = Vec::new();

    for name in &request.metrics {
        let mut path = Vec::new();
        let (expression, entity) = resolve_metric(name, snapshot, &mut path)?;
        touch(&entity, &mut entities_used);
        select_parts.push(format!("{expression} AS {name}"));
    }

    for name in &request.dimensions {
        let dimension = snapshot
            .dimension(name)
            .ok_or_else(|| DomainError::UnknownDimension(name.clone()))?;
        touch(&dimension.entity_name, &mut entities_used);
        select_parts.push(format!("{} AS {name}", dimension.expression));
        group_by_parts.push(dimension.expression.clone());
    }

    // entity -> derived table name, via the owning pipeline
    let mut table_map: BTreeMap<String, String> = BTreeMap::new();
    let mut pipeline_ids: Vec<String> = Vec::new();
    for entity_name in &entities_used {
        let entity = snapshot
            .entity(entity_name)
            .ok_or_else(|| DomainError::Validation(format!("Unknown entity: {entity_name}")))?;
        let pipeline_name = pipeline_names.get(&entity.pipeline_id).ok_or_else(|| {
            DomainError::NotFound {
                kind: "Pipeline",
                id: entity.pipeline_id.clone(),
            }
        })?;
        table_map.insert(entity_name.clone(), derive_table_name(pipeline_name));
        if !pipeline_ids.contains(&entity.pipeline_id) {
            pipeline_ids.push(entity.pipeline_id.clone());
        }
    }

    let from_clause = build_join_graph(snapshot, &entities_used, &table_map)?;

    let substitute = |expr: &str| substitute_aliases(expr, &table_map);
    let select_resolved: Vec<String> = select_parts.iter().map(|s| substitute(s)).collect();
    let group_by_resolved: Vec<String> = group_by_parts.iter().map(|s| substitute(s)).collect();
    let filters_resolved: Vec<String> = request.filters.iter().map(|s| substitute(s)).collect();
    let order_by_resolved: Vec<String> = request.order_by.iter().map(|s| substitute(s)).collect();

    let mut sql = format!("SELECT {} FROM {from_clause}", select_resolved.join(", "));
    if !filters_resolved.is_empty() {
        sql.push_str(&format!(" WHERE {}", filters_resolved.join(" AND ")));
    }
    if !group_by_resolved.is_empty() {
        sql.push_str(&format!(" GROUP BY {}", group_by_resolved.join(", ")));
    }
    if !order_by_resolved.is_empty() {
        sql.push_str(&format!(" ORDER BY {}", order_by_resolved.join(", ")));
    }
    if let Some(limit) = request.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    Ok(ResolvedQuery {
        sql,
        pipeline_ids,
        entities_used,
    })
}

/// Expand a metric, following `${ref}` references. The path set detects
/// cycles; it is unwound after each branch so diamond-shaped reuse of a
/// shared sub-metric stays legal.
fn resolve_metric(
    name: &str,
    snapshot: &OntologySnapshot,
    path: &mut Vec<String>,
) -> Result<(String, String), RelayError> {
    if path.iter().any(|seen| seen == name) {
        return Err(DomainError::CircularMetric(name.to_string()).into());
    }
    let metric = snapshot
        .metric(name)
        .ok_or_else(|| DomainError::UnknownMetric(name.to_string()))?;

    path.push(name.to_string());
    let mut expression = metric.expression.clone();
    for reference in extract_metric_references(&metric.expression) {
        let (ref_expression, _) = resolve_metric(&reference, snapshot, path)?;
        expression = expression.replace(&format!("${{{reference}}}"), &format!("({ref_expression})"));
    }
    path.pop();

    Ok((expression, metric.entity_name.clone()))
}

/// BFS from the first touched entity over relationships whose both
/// endpoints are touched. Each edge taken joins the newly reached
/// entity's table; an unreachable touched entity is an error.
fn build_join_graph(
    snapshot: &OntologySnapshot,
    entities: &[String],
    table_map: &BTreeMap<String, String>,
) -> Result<String, RelayError> {
    let root = entities
        .first()
        .ok_or_else(|| RelayError::from(DomainError::EmptyQuery))?;
    let root_table = table_map
        .get(root)
        .ok_or_else(|| RelayError::Internal(format!("No table for entity '{root}'")))?;
    if entities.len() == 1 {
        return Ok(root_table.clone());
    }

    let mut adjacency: BTreeMap<&str, Vec<&crate::domain::ontology::Relationship>> =
        entities.iter().map(|e| (e.as_str(), Vec::new())).collect();
    for relationship in &snapshot.relationships {
        let from_touched = adjacency.contains_key(relationship.from_entity.as_str());
        let to_touched = adjacency.contains_key(relationship.to_entity.as_str());
        if from_touched && to_touched {
            if let Some(edges) = adjacency.get_mut(relationship.from_entity.as_str()) {
                edges.push(relationship);
            }
            if let Some(edges) = adjacency.get_mut(relationship.to_entity.as_str()) {
                edges.push(relationship);
            }
        }
    }

    let mut visited: Vec<&str> = vec![root.as_str()];
    let mut queue: VecDeque<&str> = VecDeque::from([root.as_str()]);
    let mut join_clauses: Vec<String> = Vec::new();

    while let Some(current) = queue.pop_front() {
        let Some(edges) = adjacency.get(current) else {
            continue;
        };
        for relationship in edges {
            let next = if relationship.from_entity == current {
                relationship.to_entity.as_str()
            } else {
                relationship.from_entity.as_str()
            };
            if visited.contains(&next) {
                continue;
            }
            let next_table = table_map
                .get(next)
                .ok_or_else(|| RelayError::Internal(format!("No table for entity '{next}'")))?;
            let from_table = table_map
                .get(relationship.from_entity.as_str())
                .ok_or_else(|| RelayError::Internal("join endpoint missing table".into()))?;
            let to_table = table_map
                .get(relationship.to_entity.as_str())
                .ok_or_else(|| RelayError::Internal("join endpoint missing table".into()))?;
            join_clauses.push(format!(
                "LEFT JOIN {next_table} ON {from_table}.{} = {to_table}.{}",
                relationship.from_column, relationship.to_column
            ));
            visited.push(next);
            queue.push_back(next);
        }
    }

    if let Some(unreachable) = entities.iter().find(|e| !visited.contains(&e.as_str())) {
        return Err(DomainError::DisconnectedOntology(unreachable.clone()).into());
    }

    Ok(format!("{root_table} {}", join_clauses.join(" ")))
}

/// Replace `entity_name.column` tokens with `table_alias.column`.
fn substitute_aliases(expression: &str, table_map: &BTreeMap<String, String>) -> String {
    let mut out = expression.to_string();
    for (entity, table) in table_map {
        // escaped literal + fixed suffix, always a valid pattern
        let Ok(regex) = Regex::new(&format!(r"\b{}\.", regex::escape(entity))) else {
            continue;
        };
        out = regex.replace_all(&out, format!("{table}.")).into_owned();
    }
    out
}

fn build_nl_prompt(question: &str, snapshot: &OntologySnapshot) -> String {
    let entities: Vec<_> = snapshot
        .entities
        .iter()
        .map(|e| json!({"name": e.name, "description": e.description}))
        .collect();
    let metrics: Vec<_> = snapshot
        .metrics
        .iter()
        .map(|m| json!({"name": m.name, "expression": m.expression, "entity": m.entity_name}))
        .collect();
    let dimensions: Vec<_> = snapshot
        .dimensions
        .iter()
        .map(|d| json!({"name": d.name, "expression": d.expression, "entity": d.entity_name}))
        .collect();
    let relationships: Vec<_> = snapshot
        .relationships
        .iter()
        .map(|r| {
            json!({
                "from": r.from_entity,
                "to": r.to_entity,
                "on": format!("{}.{} = {}.{}", r.from_entity, r.from_column, r.to_entity, r.to_column),
            })
        })
        .collect();

    format!(
        "Convert this question into a structured semantic query.\n\n\
         Question: {question}\n\n\
         Available entities: {}\n\
         Available metrics: {}\n\
         Available dimensions: {}\n\
         Available relationships: {}\n\n\
         Respond ONLY with valid JSON:\n\
         {{\"metrics\": [...], \"dimensions\": [...], \"filters\": [...], \
         \"order_by\": [...], \"limit\": N, \"explanation\": \"...\"}}\n\
         Use only metric/dimension names from the lists above.",
        json!(entities),
        json!(metrics),
        json!(dimensions),
        json!(relationships)
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::domain::ontology::{
        Dimension, DimensionType, Entity, FormatType, Metric, ObjectStatus, ProposedBy,
        Relationship, RelationshipType,
    };
    use chrono::Utc;

    fn entity(name: &str, pipeline_id: &str) -> Entity {
        Entity {
            id: format!("ent-{name}"),
            name: name.into(),
            display_name: name.into(),
            description: String::new(),
            pipeline_id: pipeline_id.into(),
            column_annotations: BTreeMap::new(),
            status: ObjectStatus::Active,
            proposed_by: ProposedBy::User,
            created_at: Utc::now(),
        }
    }

    fn metric(name: &str, entity: &str, expression: &str) -> Metric {
        Metric {
            id: format!("met-{name}"),
            name: name.into(),
            display_name: name.into(),
            description: String::new(),
            entity_name: entity.into(),
            expression: expression.into(),
            format_type: FormatType::Number,
            status: ObjectStatus::Active,
            proposed_by: ProposedBy::User,
            created_at: Utc::now(),
        }
    }

    fn dimension(name: &str, entity: &str, expression: &str) -> Dimension {
        Dimension {
            id: format!("dim-{name}"),
            name: name.into(),
            display_name: name.into(),
            description: String::new(),
            entity_name: entity.into(),
            expression: expression.into(),
            dimension_type: DimensionType::Direct,
            status: ObjectStatus::Active,
            proposed_by: ProposedBy::User,
            created_at: Utc::now(),
        }
    }

    fn relationship(from: &str, to: &str, from_col: &str, to_col: &str) -> Relationship {
        Relationship {
            id: format!("rel-{from}-{to}"),
            name: format!("{from}_to_{to}"),
            from_entity: from.into(),
            to_entity: to.into(),
            from_column: from_col.into(),
            to_column: to_col.into(),
            relationship_type: RelationshipType::ManyToOne,
            description: String::new(),
            status: ObjectStatus::Active,
            proposed_by: ProposedBy::User,
            created_at: Utc::now(),
        }
    }

    fn snapshot(
        entities: Vec<Entity>,
        relationships: Vec<Relationship>,
        metrics: Vec<Metric>,
        dimensions: Vec<Dimension>,
    ) -> OntologySnapshot {
        let entity_pipeline_map = entities
            .iter()
            .map(|e| (e.name.clone(), e.pipeline_id.clone()))
            .collect();
        OntologySnapshot {
            entities,
            relationships,
            metrics,
            dimensions,
            entity_pipeline_map,
            edges: Vec::new(),
        }
    }

    fn two_entity_snapshot() -> (OntologySnapshot, BTreeMap<String, String>) {
        let snap = snapshot(
            vec![entity("orders", "pipe-orders"), entity("customers", "pipe-customers")],
            vec![relationship("orders", "customers", "customer_id", "id")],
            vec![metric("revenue", "orders", "SUM(orders.total)")],
            vec![dimension("segment", "customers", "customers.segment")],
        );
        let names: BTreeMap<String, String> = [
            ("pipe-orders".to_string(), "Orders Table".to_string()),
            ("pipe-customers".to_string(), "Customers Table".to_string()),
        ]
        .into_iter()
        .collect();
        (snap, names)
    }

    #[test]
    fn test_join_compilation_matches_contract() -> anyhow::Result<()> {
        let (snap, names) = two_entity_snapshot();
        let request = SemanticRequest {
            metrics: vec!["revenue".into()],
            dimensions: vec!["segment".into()],
            ..SemanticRequest::default()
        };
        let resolved = resolve_structured(&snap, &names, &request)?;
        assert_eq!(
            resolved.sql,
            "SELECT SUM(orders_table.total) AS revenue, customers_table.segment AS segment \
             FROM orders_table \
             LEFT JOIN customers_table ON orders_table.customer_id = customers_table.id \
             GROUP BY customers_table.segment"
        );
        assert_eq!(resolved.entities_used, vec!["orders", "customers"]);
        assert_eq!(resolved.pipeline_ids, vec!["pipe-orders", "pipe-customers"]);
        Ok(())
    }

    #[test]
    fn test_metric_only_query_has_no_group_by() -> anyhow::Result<()> {
        let (snap, names) = two_entity_snapshot();
        let request = SemanticRequest {
            metrics: vec!["revenue".into()],
            limit: Some(10),
            ..SemanticRequest::default()
        };
        let resolved = resolve_structured(&snap, &names, &request)?;
        assert_eq!(
            resolved.sql,
            "SELECT SUM(orders_table.total) AS revenue FROM orders_table LIMIT 10"
        );
        Ok(())
    }

    #[test]
    fn test_composable_metric_expansion() -> anyhow::Result<()> {
        let snap = snapshot(
            vec![entity("orders", "pipe-orders")],
            vec![],
            vec![
                metric("revenue", "orders", "SUM(orders.total)"),
                metric("order_count", "orders", "COUNT(*)"),
                metric("aov", "orders", "${revenue} / NULLIF(${order_count},0)"),
            ],
            vec![],
        );
        let names = [("pipe-orders".to_string(), "orders".to_string())]
            .into_iter()
            .collect();
        let request = SemanticRequest {
            metrics: vec!["aov".into()],
            ..SemanticRequest::default()
        };
        let resolved = resolve_structured(&snap, &names, &request)?;
        assert!(resolved.sql.contains("SUM(orders.total)"));
        assert!(resolved.sql.contains("COUNT(*)"));
        assert!(resolved.sql.contains("NULLIF"));
        Ok(())
    }

    #[test]
    fn test_circular_metric_fails_fast() {
        let snap = snapshot(
            vec![entity("orders", "pipe-orders")],
            vec![],
            vec![
                metric("a", "orders", "${b} + 1"),
                metric("b", "orders", "${a} + 1"),
            ],
            vec![],
        );
        let names = [("pipe-orders".to_string(), "orders".to_string())]
            .into_iter()
            .collect();
        let request = SemanticRequest {
            metrics: vec!["a".into()],
            ..SemanticRequest::default()
        };
        let err = resolve_structured(&snap, &names, &request).unwrap_err();
        assert!(matches!(
            err,
            RelayError::Domain(DomainError::CircularMetric(_))
        ));
    }

    #[test]
    fn test_diamond_metric_reuse_is_legal() -> anyhow::Result<()> {
        let snap = snapshot(
            vec![entity("orders", "pipe-orders")],
            vec![],
            vec![
                metric("base", "orders", "SUM(orders.total)"),
                metric("left", "orders", "${base} * 2"),
                metric("right", "orders", "${base} * 3"),
                metric("top", "orders", "${left} + ${right}"),
            ],
            vec![],
        );
        let names = [("pipe-orders".to_string(), "orders".to_string())]
            .into_iter()
            .collect();
        let request = SemanticRequest {
            metrics: vec!["top".into()],
            ..SemanticRequest::default()
        };
        let resolved = resolve_structured(&snap, &names, &request)?;
        assert_eq!(resolved.sql.matches("SUM(orders.total)").count(), 2);
        Ok(())
    }

    #[test]
    fn test_unknown_names_fail() {
        let (snap, names) = two_entity_snapshot();
        let request = SemanticRequest {
            metrics: vec!["nope".into()],
            ..SemanticRequest::default()
        };
        assert!(matches!(
            resolve_structured(&snap, &names, &request).unwrap_err(),
            RelayError::Domain(DomainError::UnknownMetric(_))
        ));

        let request = SemanticRequest {
            dimensions: vec!["nope".into()],
            ..SemanticRequest::default()
        };
        assert!(matches!(
            resolve_structured(&snap, &names, &request).unwrap_err(),
            RelayError::Domain(DomainError::UnknownDimension(_))
        ));
    }

    #[test]
    fn test_disconnected_entities_fail() {
        let snap = snapshot(
            vec![entity("orders", "pipe-orders"), entity("customers", "pipe-customers")],
            vec![], // no relationship between them
            vec![metric("revenue", "orders", "SUM(orders.total)")],
            vec![dimension("segment", "customers", "customers.segment")],
        );
        let names: BTreeMap<String, String> = [
            ("pipe-orders".to_string(), "orders".to_string()),
            ("pipe-customers".to_string(), "customers".to_string()),
        ]
        .into_iter()
        .collect();
        let request = SemanticRequest {
            metrics: vec!["revenue".into()],
            dimensions: vec!["segment".into()],
            ..SemanticRequest::default()
        };
        assert!(matches!(
            resolve_structured(&snap, &names, &request).unwrap_err(),
            RelayError::Domain(DomainError::DisconnectedOntology(_))
        ));
    }

    #[test]
    fn test_empty_request_fails() {
        let (snap, names) = two_entity_snapshot();
        assert!(matches!(
            resolve_structured(&snap, &names, &SemanticRequest::default()).unwrap_err(),
            RelayError::Domain(DomainError::EmptyQuery)
        ));
    }
}
