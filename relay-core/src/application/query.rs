// relay-core/src/application/query.rs
//
// SQL over pipeline artifacts. Each query gets a fresh in-memory
// DataFusion session: the latest successful run's parquet files are
// registered as a view per pipeline under the derived table name, the
// user SQL runs against them, rows come back JSON-shaped.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use datafusion::prelude::{ParquetReadOptions, SessionContext};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::domain::error::DomainError;
use crate::domain::metadata::SemanticType;
use crate::error::RelayError;
use crate::infrastructure::blob::BlobStore;
use crate::infrastructure::store::Store;
use crate::infrastructure::tabular::{self, JsonRow};

pub const DEFAULT_ROW_LIMIT: usize = 1000;

/// Budget for one SQL execution over the registered views.
const SQL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<JsonRow>,
    pub columns: Vec<String>,
    pub row_count: usize,
    pub execution_time_ms: f64,
    /// pipeline id -> registered table name
    pub pipelines_used: BTreeMap<String, String>,
    pub query_executed: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSchema {
    pub pipeline_id: String,
    pub name: String,
    pub table_name: String,
    pub source_type: String,
    pub columns: Vec<SchemaColumn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    pub data_type: String,
    pub semantic_type: SemanticType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub sample_values: Vec<String>,
    pub null_percentage: f64,
}

pub struct QueryEngine {
    store: Arc<Store>,
    blob: Arc<BlobStore>,
}

impl QueryEngine {
    pub fn new(store: Arc<Store>, blob: Arc<BlobStore>) -> Self {
        Self { store, blob }
    }

    /// The parquet files behind a pipeline's latest successful run.
    pub async fn artifact_paths(&self, pipeline_id: &str) -> Result<Vec<String>, RelayError> {
        let run = self
            .store
            .latest_successful_run(pipeline_id)
            .await?
            .ok_or_else(|| DomainError::NoData(pipeline_id.to_string()))?;
        let paths = if run.files_written.is_empty() {
            run.output_file.into_iter().collect::<Vec<_>>()
        } else {
            run.files_written
        };
        if paths.is_empty() {
            return Err(DomainError::NoData(pipeline_id.to_string()).into());
        }
        Ok(paths)
    }

    /// Register a pipeline's artifacts in a session under `table_name`.
    pub async fn register_pipeline(
        &self,
        ctx: &SessionContext,
        pipeline_id: &str,
        table_name: &str,
    ) -> Result<(), RelayError> {
        let paths = self.artifact_paths(pipeline_id).await?;
        for path in &paths {
            self.blob.register_for_uri(ctx, path)?;
        }
        let df = ctx.read_parquet(paths, ParquetReadOptions::default()).await?;
        ctx.register_table(table_name, df.into_view())?;
        Ok(())
    }

    #[instrument(skip(self, sql), fields(sql.preview = %preview_sql(sql)))]
    pub async fn execute(
        &self,
        pipeline_ids: &[String],
        sql: &str,
        row_limit: usize,
    ) -> Result<QueryResult, RelayError> {
        let start = Instant::now();
        let ctx = SessionContext::new();

        let mut pipelines_used = BTreeMap::new();
        let mut registered: BTreeMap<String, String> = BTreeMap::new();
        for pipeline_id in pipeline_ids {
            let pipeline = self.store.require_pipeline(pipeline_id).await?;
            let table_name = pipeline.table_name();
            if let Some(other) = registered.get(&table_name) {
                // Two display names collapsing to one identifier cannot be
                // queried together; fail fast instead of shadowing a view.
                return Err(DomainError::Validation(format!(
                    "Pipelines '{other}' and '{pipeline_id}' both map to table '{table_name}'"
                ))
                .into());
            }
            self.register_pipeline(&ctx, pipeline_id, &table_name).await?;
            registered.insert(table_name.clone(), pipeline_id.clone());
            pipelines_used.insert(pipeline_id.clone(), table_name);
        }

        let executed = apply_row_limit(sql, row_limit);
        let df = ctx
            .sql(&executed)
            .await
            .map_err(|e| DomainError::QueryFailed(e.to_string()))?;
        let columns: Vec<String> = df
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();
        let batches = tokio::time::timeout(SQL_TIMEOUT, df.collect())
            .await
            .map_err(|_| {
                DomainError::QueryFailed(format!(
                    "query exceeded the {}s execution budget",
                    SQL_TIMEOUT.as_secs()
                ))
            })?
            .map_err(|e| DomainError::QueryFailed(e.to_string()))?;

        let rows = tabular::batches_to_json_rows(&batches)?;
        let execution_time_ms =
            (start.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0;
        debug!(rows = rows.len(), execution_time_ms, "query finished");

        Ok(QueryResult {
            row_count: rows.len(),
            rows,
            columns,
            execution_time_ms,
            pipelines_used,
            query_executed: executed,
        })
    }

    /// Table names, source types, and column profiles for a set of
    /// pipelines, so an agent can see what is queryable before writing SQL.
    pub async fn list_pipeline_schemas(
        &self,
        pipeline_ids: &[String],
    ) -> Result<Vec<PipelineSchema>, RelayError> {
        let mut schemas = Vec::new();
        for pipeline_id in pipeline_ids {
            let Some(pipeline) = self.store.get_pipeline(pipeline_id).await? else {
                continue;
            };
            let mut schema = PipelineSchema {
                pipeline_id: pipeline_id.clone(),
                name: pipeline.name.clone(),
                table_name: pipeline.table_name(),
                source_type: pipeline
                    .source_type()
                    .unwrap_or("transformation")
                    .to_string(),
                columns: Vec::new(),
            };
            if let Some(metadata) = self.store.get_metadata(pipeline_id).await? {
                for col in metadata.columns {
                    schema.columns.push(SchemaColumn {
                        name: col.name,
                        data_type: col.data_type,
                        semantic_type: col.semantic_type,
                        description: col.description.or(Some(col.auto_description)),
                        sample_values: col.sample_values,
                        null_percentage: col.null_percentage,
                    });
                }
            }
            schemas.push(schema);
        }
        Ok(schemas)
    }
}

/// Append `LIMIT n` unless the statement already carries one.
pub fn apply_row_limit(sql: &str, row_limit: usize) -> String {
    let trimmed = sql.trim().trim_end_matches(';');
    if trimmed.to_uppercase().contains("LIMIT") {
        trimmed.to_string()
    } else {
        format!("{trimmed} LIMIT {row_limit}")
    }
}

fn preview_sql(sql: &str) -> String {
    let flat = sql.replace('\n', " ");
    if flat.len() > 200 {
        format!("{}...", &flat[..200])
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_appended_when_absent() {
        assert_eq!(
            apply_row_limit("SELECT * FROM t", 50),
            "SELECT * FROM t LIMIT 50"
        );
    }

    #[test]
    fn test_existing_limit_is_kept() {
        assert_eq!(
            apply_row_limit("SELECT * FROM t LIMIT 5", 50),
            "SELECT * FROM t LIMIT 5"
        );
        assert_eq!(
            apply_row_limit("select * from t limit 5;", 50),
            "select * from t limit 5"
        );
    }
}
