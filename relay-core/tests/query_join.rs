// Cross-pipeline joins and the semantic layer, over deterministic
// parquet fixtures written straight through DataFusion.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::prelude::SessionContext;
use relay_core::application::semantic::SemanticRequest;
use relay_core::application::service::{QueryRequest, RelayService};
use relay_core::domain::naming::short_id;
use relay_core::domain::pipeline::{
    Pipeline, PipelineKind, PipelineOptions, PipelineRun, RunStatus, RunUpdate, ScheduleConfig,
};
use relay_core::domain::role::AuthContext;
use relay_core::infrastructure::config::Settings;
use relay_core::infrastructure::store::Store;
use relay_core::infrastructure::tabular;
use tempfile::TempDir;

struct JoinTestEnv {
    _storage: TempDir,
    service: RelayService,
    store: Arc<Store>,
    auth: AuthContext,
    customers_id: String,
    orders_id: String,
}

impl JoinTestEnv {
    /// Two pipelines with fabricated successful runs: 50 customers with
    /// sequential ids, 200 orders spread evenly across them.
    async fn new() -> Result<Self> {
        let storage = tempfile::tempdir()?;
        let settings = Settings {
            local_storage_path: storage.path().to_path_buf(),
            ..Settings::default()
        };
        let store = Arc::new(Store::in_memory().await?);
        let service = RelayService::with_store(settings, store.clone()).await?;
        let auth = service.authenticate(None).await?;

        let segments = ["basic", "pro", "enterprise"];
        let customers: Vec<tabular::JsonRow> = (1..=50)
            .map(|i| {
                serde_json::json!({"id": i, "segment": segments[i as usize % 3]})
                    .as_object()
                    .cloned()
                    .unwrap_or_default()
            })
            .collect();
        let orders: Vec<tabular::JsonRow> = (1..=200)
            .map(|i| {
                serde_json::json!({
                    "id": i,
                    "customer_id": (i - 1) % 50 + 1,
                    "total": (i as f64) * 2.0,
                })
                .as_object()
                .cloned()
                .unwrap_or_default()
            })
            .collect();

        let customers_id =
            seed_pipeline(&store, storage.path(), "Customers", &customers).await?;
        let orders_id = seed_pipeline(&store, storage.path(), "Orders", &orders).await?;

        Ok(Self {
            _storage: storage,
            service,
            store,
            auth,
            customers_id,
            orders_id,
        })
    }
}

/// Insert a pipeline plus one successful run whose artifact is a parquet
/// file written directly from the given rows.
async fn seed_pipeline(
    store: &Store,
    root: &std::path::Path,
    name: &str,
    rows: &[tabular::JsonRow],
) -> Result<String> {
    let pipeline_id = short_id("pipe");
    let parquet_path = root
        .join(format!("{pipeline_id}.parquet"))
        .to_string_lossy()
        .into_owned();

    let ctx = SessionContext::new();
    let batch = tabular::rows_to_batch(rows)?;
    ctx.read_batches(vec![batch])?
        .write_parquet(&parquet_path, DataFrameWriteOptions::new(), None)
        .await?;

    let pipeline = Pipeline {
        id: pipeline_id.clone(),
        name: name.to_string(),
        description: String::new(),
        kind: PipelineKind::Regular,
        status: "active".to_string(),
        source: Some(serde_json::from_value(serde_json::json!({
            "type": "synthetic",
            "schema": {},
            "row_count": rows.len(),
        }))?),
        destination: None,
        options: PipelineOptions::default(),
        schedule: ScheduleConfig::default(),
        transformation: None,
        last_scheduled_run: None,
        created_at: Utc::now(),
    };
    store.save_pipeline(&pipeline).await?;

    let run_id = short_id("run");
    store
        .insert_run(&PipelineRun::started(&run_id, &pipeline_id, false))
        .await?;
    store
        .update_run(
            &run_id,
            RunUpdate {
                status: Some(RunStatus::Success),
                completed_at: Some(Utc::now()),
                rows_processed: Some(rows.len() as u64),
                output_file: Some(parquet_path),
                ..RunUpdate::default()
            },
        )
        .await?;
    Ok(pipeline_id)
}

#[tokio::test]
async fn test_cross_pipeline_join() -> Result<()> {
    let env = JoinTestEnv::new().await?;

    let result = env
        .service
        .query(
            QueryRequest {
                pipelines: vec![env.customers_id.clone(), env.orders_id.clone()],
                sql: "SELECT c.segment, COUNT(o.id) AS n \
                      FROM customers c JOIN orders o ON c.id = o.customer_id \
                      GROUP BY c.segment"
                    .into(),
                limit: 1000,
            },
            &env.auth,
        )
        .await?;

    // one row per distinct segment, counts covering every order
    assert_eq!(result.row_count, 3);
    let total: i64 = result
        .rows
        .iter()
        .map(|row| row.get("n").and_then(|v| v.as_i64()).unwrap_or(0))
        .sum();
    assert_eq!(total, 200);
    Ok(())
}

#[tokio::test]
async fn test_semantic_query_compiles_and_executes() -> Result<()> {
    let env = JoinTestEnv::new().await?;

    // ontology: entities over both pipelines, a join edge, revenue and
    // segment by name
    let orders_entity: relay_core::domain::ontology::Entity =
        serde_json::from_value(serde_json::json!({
            "name": "orders",
            "display_name": "Orders",
            "pipeline_id": env.orders_id,
        }))?;
    let customers_entity: relay_core::domain::ontology::Entity =
        serde_json::from_value(serde_json::json!({
            "name": "customers",
            "display_name": "Customers",
            "pipeline_id": env.customers_id,
        }))?;
    env.service.create_entity(orders_entity, &env.auth).await?;
    env.service
        .create_entity(customers_entity, &env.auth)
        .await?;
    env.service
        .create_relationship(
            serde_json::from_value(serde_json::json!({
                "name": "orders_to_customers",
                "from_entity": "orders",
                "to_entity": "customers",
                "from_column": "customer_id",
                "to_column": "id",
                "relationship_type": "many_to_one",
            }))?,
            &env.auth,
        )
        .await?;
    env.service
        .create_metric(
            serde_json::from_value(serde_json::json!({
                "name": "revenue",
                "display_name": "Revenue",
                "entity_name": "orders",
                "expression": "SUM(orders.total)",
                "format_type": "currency",
            }))?,
            &env.auth,
        )
        .await?;
    env.service
        .create_dimension(
            serde_json::from_value(serde_json::json!({
                "name": "segment",
                "display_name": "Segment",
                "entity_name": "customers",
                "expression": "customers.segment",
            }))?,
            &env.auth,
        )
        .await?;

    let result = env
        .service
        .semantic_query(
            &SemanticRequest {
                metrics: vec!["revenue".into()],
                dimensions: vec!["segment".into()],
                ..SemanticRequest::default()
            },
            &env.auth,
        )
        .await?;

    assert!(result.generated_sql.contains("SUM(orders.total) AS revenue"));
    assert!(result.generated_sql.contains(
        "LEFT JOIN customers ON orders.customer_id = customers.id"
    ));
    assert!(result.generated_sql.contains("GROUP BY customers.segment"));
    assert_eq!(result.entities_used, vec!["orders", "customers"]);

    // three segments, revenue summing to the grand total of 2+4+...+400
    assert_eq!(result.result.row_count, 3);
    let revenue: f64 = result
        .result
        .rows
        .iter()
        .map(|row| row.get("revenue").and_then(|v| v.as_f64()).unwrap_or(0.0))
        .sum();
    assert!((revenue - 40_200.0).abs() < 1e-6);
    Ok(())
}

#[tokio::test]
async fn test_lineage_is_a_pure_read() -> Result<()> {
    let env = JoinTestEnv::new().await?;
    env.service
        .create_entity(
            serde_json::from_value(serde_json::json!({
                "name": "orders",
                "display_name": "Orders",
                "pipeline_id": env.orders_id,
            }))?,
            &env.auth,
        )
        .await?;
    env.service
        .create_metric(
            serde_json::from_value(serde_json::json!({
                "name": "revenue",
                "display_name": "Revenue",
                "entity_name": "orders",
                "expression": "SUM(orders.total)",
            }))?,
            &env.auth,
        )
        .await?;

    let before = env.store.ontology_snapshot().await?;
    let first = env.service.lineage("orders", &env.auth).await?;
    let second = env.service.lineage("orders", &env.auth).await?;
    let after = env.store.ontology_snapshot().await?;

    // deterministic output, no writes
    assert_eq!(serde_json::json!(first), serde_json::json!(second));
    assert_eq!(serde_json::json!(before), serde_json::json!(after));
    assert_eq!(first.metrics.len(), 1);
    assert_eq!(
        first.metrics[0].column_references,
        vec!["orders.total".to_string()]
    );
    assert_eq!(
        first.pipeline.as_ref().map(|p| p.id.clone()),
        Some(env.orders_id.clone())
    );
    Ok(())
}

#[tokio::test]
async fn test_colliding_table_names_fail_fast() -> Result<()> {
    let env = JoinTestEnv::new().await?;
    // a second pipeline whose display name collapses to "customers"
    let rows: Vec<tabular::JsonRow> = vec![
        serde_json::json!({"id": 1})
            .as_object()
            .cloned()
            .context("row")?,
    ];
    let clone_id = seed_pipeline(&env.store, env._storage.path(), "CUSTOMERS", &rows).await?;

    let err = env
        .service
        .query(
            QueryRequest {
                pipelines: vec![env.customers_id.clone(), clone_id],
                sql: "SELECT 1".into(),
                limit: 10,
            },
            &env.auth,
        )
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 400);
    assert!(err.to_string().contains("customers"));
    Ok(())
}
