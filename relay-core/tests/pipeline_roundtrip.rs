// Synthetic pipeline round trip: create, run, query back through the
// engine, with metadata generated along the way.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use relay_core::application::service::{CreatePipelineRequest, QueryRequest, RelayService};
use relay_core::domain::pipeline::RunStatus;
use relay_core::domain::role::AuthContext;
use relay_core::infrastructure::config::Settings;
use relay_core::infrastructure::store::Store;
use tempfile::TempDir;

struct RelayTestEnv {
    _storage: TempDir,
    service: RelayService,
    auth: AuthContext,
}

impl RelayTestEnv {
    async fn new() -> Result<Self> {
        let storage = tempfile::tempdir()?;
        let settings = Settings {
            local_storage_path: storage.path().to_path_buf(),
            ..Settings::default()
        };
        let store = Arc::new(Store::in_memory().await?);
        let service = RelayService::with_store(settings, store).await?;
        // auth disabled: every caller is dev mode
        let auth = service.authenticate(None).await?;
        Ok(Self {
            _storage: storage,
            service,
            auth,
        })
    }

    /// Trigger a run and poll until it reaches a terminal state.
    async fn run_to_completion(
        &self,
        pipeline_id: &str,
    ) -> Result<relay_core::domain::pipeline::PipelineRun> {
        let started = self.service.run_pipeline(pipeline_id, &self.auth).await?;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let run = self
                .service
                .run_status(pipeline_id, &started.run_id, &self.auth)
                .await?;
            if run.status.is_terminal() {
                return Ok(run);
            }
        }
        anyhow::bail!("run {} did not finish in time", started.run_id)
    }
}

fn demo_orders_request() -> Result<CreatePipelineRequest> {
    Ok(serde_json::from_value(serde_json::json!({
        "name": "Demo Orders",
        "source": {
            "type": "synthetic",
            "schema": {"id": "integer:1:1000", "amount": "currency"},
            "row_count": 200
        },
        "destination": {"bucket": "demo", "path": "orders"}
    }))?)
}

#[tokio::test]
async fn test_synthetic_round_trip() -> Result<()> {
    let env = RelayTestEnv::new().await?;

    let created = env
        .service
        .create_pipeline(demo_orders_request()?, &env.auth)
        .await?;
    assert_eq!(created.table_name, "demo_orders");

    let run = env.run_to_completion(&created.pipeline_id).await?;
    assert_eq!(run.status, RunStatus::Success, "error: {:?}", run.error);
    assert_eq!(run.rows_processed, Some(200));
    assert!(run.completed_at.is_some());
    assert!(run.duration_seconds.is_some());

    let output = run.output_file.context("run has no output file")?;
    assert!(output.ends_with(".parquet"));
    assert!(std::path::Path::new(&output).exists());

    // and the artifact answers SQL
    let result = env
        .service
        .query(
            QueryRequest {
                pipelines: vec![created.pipeline_id.clone()],
                sql: "SELECT COUNT(*) FROM demo_orders".into(),
                limit: 1000,
            },
            &env.auth,
        )
        .await?;
    assert_eq!(result.row_count, 1);
    let count = result.rows[0]
        .values()
        .next()
        .and_then(|v| v.as_i64())
        .context("count column missing")?;
    assert_eq!(count, 200);
    Ok(())
}

#[tokio::test]
async fn test_run_generates_metadata() -> Result<()> {
    let env = RelayTestEnv::new().await?;
    let created = env
        .service
        .create_pipeline(demo_orders_request()?, &env.auth)
        .await?;
    let run = env.run_to_completion(&created.pipeline_id).await?;
    assert_eq!(run.status, RunStatus::Success, "error: {:?}", run.error);

    let metadata = env.service.metadata(&created.pipeline_id, &env.auth).await?;
    assert_eq!(metadata.row_count, 200);
    let names: Vec<&str> = metadata.columns.iter().map(|c| c.name.as_str()).collect();
    assert!(names.contains(&"id"));
    assert!(names.contains(&"amount"));
    // nothing verified yet, everything flagged
    assert_eq!(metadata.columns_needing_review, metadata.column_count);
    Ok(())
}

#[tokio::test]
async fn test_query_without_successful_run_is_no_data() -> Result<()> {
    let env = RelayTestEnv::new().await?;
    let created = env
        .service
        .create_pipeline(demo_orders_request()?, &env.auth)
        .await?;

    let err = env
        .service
        .query(
            QueryRequest {
                pipelines: vec![created.pipeline_id],
                sql: "SELECT 1".into(),
                limit: 10,
            },
            &env.auth,
        )
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 400);
    assert!(err.to_string().contains("No queryable data"));
    Ok(())
}

#[tokio::test]
async fn test_sequential_streaming_writes_chunked_files() -> Result<()> {
    let env = RelayTestEnv::new().await?;
    let request: CreatePipelineRequest = serde_json::from_value(serde_json::json!({
        "name": "Chunked Demo",
        "source": {
            "type": "synthetic",
            "schema": {"id": "integer:1:100"},
            "row_count": 200
        },
        "destination": {"bucket": "demo", "path": "chunked"},
        "options": {"streaming": "on", "parallel": false}
    }))?;
    let created = env.service.create_pipeline(request, &env.auth).await?;
    let run = env.run_to_completion(&created.pipeline_id).await?;
    assert_eq!(run.status, RunStatus::Success, "error: {:?}", run.error);
    // 200 rows fit one 10k-row chunk
    assert_eq!(run.chunks_processed, Some(1));
    assert_eq!(run.files_written.len(), 1);
    assert!(run.files_written[0].contains("_chunk_000000"));
    Ok(())
}
