// relay-core/src/application/transform.rs
//
// Transformation pipelines: combine several sources (pipeline artifacts
// or live fetches) in one DataFusion session, join and aggregate them
// with generated SQL, and hand the result batches to the writer like any
// regular run.

use std::sync::Arc;

use datafusion::arrow::record_batch::RecordBatch;
use datafusion::prelude::SessionContext;
use tracing::{debug, info};

use crate::application::query::QueryEngine;
use crate::domain::error::DomainError;
use crate::domain::pipeline::TransformationConfig;
use crate::error::RelayError;
use crate::infrastructure::connectors::ConnectorRegistry;

pub struct TransformationEngine {
    registry: Arc<ConnectorRegistry>,
    query: Arc<QueryEngine>,
}

impl TransformationEngine {
    pub fn new(registry: Arc<ConnectorRegistry>, query: Arc<QueryEngine>) -> Self {
        Self { registry, query }
    }

    pub async fn execute(
        &self,
        config: &TransformationConfig,
    ) -> Result<Vec<RecordBatch>, RelayError> {
        if config.sources.is_empty() {
            return Err(
                DomainError::Validation("Transformation requires at least one source".into()).into(),
            );
        }

        let ctx = SessionContext::new();
        for source in &config.sources {
            if let Some(pipeline_id) = &source.pipeline_id {
                self.query
                    .register_pipeline(&ctx, pipeline_id, &source.alias)
                    .await?;
                debug!(alias = %source.alias, pipeline_id, "registered pipeline source");
            } else if let Some(live) = &source.source {
                let batches = self.registry.fetch(live).await?;
                let df = ctx.read_batches(batches)?;
                ctx.register_table(source.alias.as_str(), df.into_view())?;
                debug!(alias = %source.alias, "registered live source");
            } else {
                return Err(DomainError::Validation(format!(
                    "Transformation source '{}' needs a pipeline_id or a source config",
                    source.alias
                ))
                .into());
            }
        }

        let sql = build_sql(config);
        info!(sql = %sql, "executing transformation");
        let batches = ctx
            .sql(&sql)
            .await
            .map_err(|e| DomainError::QueryFailed(e.to_string()))?
            .collect()
            .await
            .map_err(|e| DomainError::QueryFailed(e.to_string()))?;
        Ok(batches)
    }
}

/// Compose the SELECT for a transformation config.
pub fn build_sql(config: &TransformationConfig) -> String {
    let from_clause = match &config.join {
        Some(join) => format!(
            "{} {} JOIN {} ON {}",
            join.left,
            join.sql_join_kind(),
            join.right,
            join.on
        ),
        None => config.sources[0].alias.clone(),
    };

    match &config.aggregate {
        Some(agg) => {
            let mut select_parts = agg.group_by.clone();
            for (name, expression) in &agg.metrics {
                select_parts.push(format!("{expression} AS {name}"));
            }
            format!(
                "SELECT {} FROM {from_clause} GROUP BY {}",
                select_parts.join(", "),
                agg.group_by.join(", ")
            )
        }
        None => format!("SELECT * FROM {from_clause}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::{AggregateSpec, JoinSpec, TransformationSource};

    fn source(alias: &str) -> TransformationSource {
        TransformationSource {
            alias: alias.to_string(),
            pipeline_id: Some(format!("pipe-{alias}")),
            source: None,
        }
    }

    #[test]
    fn test_build_sql_passthrough() {
        let config = TransformationConfig {
            sources: vec![source("users")],
            join: None,
            aggregate: None,
        };
        assert_eq!(build_sql(&config), "SELECT * FROM users");
    }

    #[test]
    fn test_build_sql_join_and_aggregate() {
        let config = TransformationConfig {
            sources: vec![source("users"), source("orders")],
            join: Some(JoinSpec {
                left: "users".into(),
                right: "orders".into(),
                on: "users.id = orders.user_id".into(),
                how: "inner".into(),
            }),
            aggregate: Some(AggregateSpec {
                group_by: vec!["users.segment".into()],
                metrics: [("revenue".to_string(), "SUM(orders.amount)".to_string())]
                    .into_iter()
                    .collect(),
            }),
        };
        assert_eq!(
            build_sql(&config),
            "SELECT users.segment, SUM(orders.amount) AS revenue \
             FROM users INNER JOIN orders ON users.id = orders.user_id \
             GROUP BY users.segment"
        );
    }

    #[test]
    fn test_build_sql_outer_join_spelling() {
        let config = TransformationConfig {
            sources: vec![source("a"), source("b")],
            join: Some(JoinSpec {
                left: "a".into(),
                right: "b".into(),
                on: "a.k = b.k".into(),
                how: "outer".into(),
            }),
            aggregate: None,
        };
        assert_eq!(build_sql(&config), "SELECT * FROM a FULL OUTER JOIN b ON a.k = b.k");
    }
}
