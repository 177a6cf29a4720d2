// Store-level contracts: run immutability, cascade deletes, connection
// safety, snapshot consistency.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::Utc;
use relay_core::domain::connection::Connection;
use relay_core::domain::error::DomainError;
use relay_core::domain::naming::short_id;
use relay_core::domain::ontology::{Entity, ObjectStatus, ProposedBy};
use relay_core::domain::pipeline::{
    Pipeline, PipelineKind, PipelineOptions, PipelineRun, RunStatus, RunUpdate, ScheduleConfig,
};
use relay_core::error::RelayError;
use relay_core::infrastructure::store::Store;

fn pipeline(name: &str, connection: Option<&str>) -> Pipeline {
    let source = match connection {
        Some(conn) => serde_json::json!({
            "type": "postgres",
            "table": "orders",
            "connection": conn,
        }),
        None => serde_json::json!({
            "type": "synthetic",
            "schema": {"id": "integer:1:10"},
            "row_count": 10,
        }),
    };
    Pipeline {
        id: short_id("pipe"),
        name: name.to_string(),
        description: String::new(),
        kind: PipelineKind::Regular,
        status: "active".to_string(),
        source: serde_json::from_value(source).ok(),
        destination: None,
        options: PipelineOptions::default(),
        schedule: ScheduleConfig::default(),
        transformation: None,
        last_scheduled_run: None,
        created_at: Utc::now(),
    }
}

fn entity(name: &str, pipeline_id: &str, status: ObjectStatus) -> Entity {
    Entity {
        id: short_id("ent"),
        name: name.to_string(),
        display_name: name.to_string(),
        description: String::new(),
        pipeline_id: pipeline_id.to_string(),
        column_annotations: BTreeMap::new(),
        status,
        proposed_by: ProposedBy::User,
        created_at: Utc::now(),
    }
}

#[tokio::test]
async fn test_terminal_runs_are_immutable() -> Result<()> {
    let store = Store::in_memory().await?;
    let p = pipeline("Immutable", None);
    store.save_pipeline(&p).await?;

    let run = PipelineRun::started("run-1", &p.id, false);
    store.insert_run(&run).await?;

    store
        .update_run(
            "run-1",
            RunUpdate {
                status: Some(RunStatus::Success),
                completed_at: Some(Utc::now()),
                ..RunUpdate::default()
            },
        )
        .await?;

    // no further mutation succeeds, not even a progress note
    let err = store
        .update_run(
            "run-1",
            RunUpdate {
                progress: Some("late edit".into()),
                ..RunUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RelayError::Domain(DomainError::InvalidTransition(_))
    ));

    let stored = store.get_run("run-1").await?.expect("run exists");
    assert_eq!(stored.progress, "Starting...");
    assert_eq!(stored.status, RunStatus::Success);
    Ok(())
}

#[tokio::test]
async fn test_failed_runs_cannot_resurrect() -> Result<()> {
    let store = Store::in_memory().await?;
    let p = pipeline("Failing", None);
    store.save_pipeline(&p).await?;
    store
        .insert_run(&PipelineRun::started("run-f", &p.id, false))
        .await?;
    store
        .update_run(
            "run-f",
            RunUpdate {
                status: Some(RunStatus::Failed),
                completed_at: Some(Utc::now()),
                error: Some("boom".into()),
                ..RunUpdate::default()
            },
        )
        .await?;

    let err = store
        .update_run(
            "run-f",
            RunUpdate {
                status: Some(RunStatus::Success),
                ..RunUpdate::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RelayError::Domain(DomainError::InvalidTransition(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_pipeline_delete_cascades_to_runs_and_metadata() -> Result<()> {
    let store = Store::in_memory().await?;
    let p = pipeline("Cascade", None);
    store.save_pipeline(&p).await?;
    store
        .insert_run(&PipelineRun::started("run-c", &p.id, false))
        .await?;

    assert!(store.delete_pipeline(&p.id).await?);
    assert!(store.get_pipeline(&p.id).await?.is_none());
    assert!(store.get_run("run-c").await?.is_none());
    assert!(store.list_runs(&p.id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_connection_delete_blocked_while_referenced() -> Result<()> {
    let store = Store::in_memory().await?;
    let connection = Connection {
        id: short_id("conn"),
        name: "prod_pg".to_string(),
        connection_type: "postgres".to_string(),
        description: String::new(),
        last_tested_at: None,
        last_test_status: None,
        created_at: Utc::now(),
    };
    store.save_connection(&connection, "sealed").await?;

    let p = pipeline("Uses Connection", Some("prod_pg"));
    store.save_pipeline(&p).await?;

    let err = store.delete_connection(&connection.id).await.unwrap_err();
    assert!(matches!(err, RelayError::Domain(DomainError::Conflict(_))));
    // the store is unchanged
    assert!(store.get_connection(&connection.id).await?.is_some());

    // once the referencing pipeline is gone, deletion goes through
    store.delete_pipeline(&p.id).await?;
    assert!(store.delete_connection(&connection.id).await?);
    assert!(store.get_connection(&connection.id).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_duplicate_connection_name_is_conflict() -> Result<()> {
    let store = Store::in_memory().await?;
    let make = |id: &str| Connection {
        id: id.to_string(),
        name: "shared_name".to_string(),
        connection_type: "mysql".to_string(),
        description: String::new(),
        last_tested_at: None,
        last_test_status: None,
        created_at: Utc::now(),
    };
    store.save_connection(&make("conn-1"), "sealed").await?;
    let err = store
        .save_connection(&make("conn-2"), "sealed")
        .await
        .unwrap_err();
    assert!(matches!(err, RelayError::Domain(DomainError::Conflict(_))));
    Ok(())
}

#[tokio::test]
async fn test_snapshot_contains_only_active_rows() -> Result<()> {
    let store = Store::in_memory().await?;
    let p1 = pipeline("Orders", None);
    let p2 = pipeline("Drafts", None);
    store.save_pipeline(&p1).await?;
    store.save_pipeline(&p2).await?;

    store
        .save_entity(&entity("orders", &p1.id, ObjectStatus::Active))
        .await?;
    store
        .save_entity(&entity("drafts", &p2.id, ObjectStatus::Proposed))
        .await?;

    let snapshot = store.ontology_snapshot().await?;
    assert_eq!(snapshot.entities.len(), 1);
    assert_eq!(snapshot.entities[0].name, "orders");
    // the pipeline map covers exactly the returned entities
    assert_eq!(snapshot.entity_pipeline_map.len(), 1);
    assert_eq!(
        snapshot.entity_pipeline_map.get("orders"),
        Some(&p1.id)
    );
    Ok(())
}

#[tokio::test]
async fn test_metadata_is_upsert_by_pipeline() -> Result<()> {
    let store = Store::in_memory().await?;
    let p = pipeline("Meta", None);
    store.save_pipeline(&p).await?;

    let mut doc: relay_core::domain::metadata::DatasetMetadata =
        serde_json::from_value(serde_json::json!({
            "pipeline_id": p.id,
            "pipeline_name": p.name,
            "generated_at": Utc::now(),
            "row_count": 10,
            "column_count": 0,
            "columns": [],
            "columns_needing_review": 0,
        }))?;
    store.upsert_metadata(&doc).await?;

    doc.row_count = 99;
    store.upsert_metadata(&doc).await?;

    let stored = store.get_metadata(&p.id).await?.expect("metadata exists");
    assert_eq!(stored.row_count, 99);
    assert_eq!(store.list_metadata().await?.len(), 1);
    Ok(())
}
