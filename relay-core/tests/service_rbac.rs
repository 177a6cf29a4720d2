// Role enforcement at the service edge, the connection lifecycle with
// real encryption, and the proposal review workflow under required auth.

use std::sync::Arc;

use anyhow::Result;
use base64::Engine;
use relay_core::application::service::{
    CreateApiKeyRequest, CreateConnectionRequest, CreatePipelineRequest, RelayService,
};
use relay_core::domain::error::DomainError;
use relay_core::domain::ontology::ProposalStatus;
use relay_core::domain::role::{AuthContext, Role};
use relay_core::error::RelayError;
use relay_core::infrastructure::config::Settings;
use relay_core::infrastructure::store::Store;

fn secured_settings(storage: &std::path::Path) -> Settings {
    Settings {
        local_storage_path: storage.to_path_buf(),
        require_auth: true,
        encryption_key: Some(
            base64::engine::general_purpose::STANDARD.encode([7u8; 32]),
        ),
        ..Settings::default()
    }
}

fn root() -> AuthContext {
    AuthContext {
        principal: "root".to_string(),
        role: Role::Admin,
    }
}

async fn secured_service() -> Result<(tempfile::TempDir, RelayService)> {
    let storage = tempfile::tempdir()?;
    let settings = secured_settings(storage.path());
    let store = Arc::new(Store::in_memory().await?);
    let service = RelayService::with_store(settings, store).await?;
    Ok((storage, service))
}

fn pipeline_request(name: &str) -> Result<CreatePipelineRequest> {
    Ok(serde_json::from_value(serde_json::json!({
        "name": name,
        "source": {
            "type": "synthetic",
            "schema": {"id": "integer:1:10"},
            "row_count": 10
        },
        "destination": {"bucket": "demo", "path": "data"}
    }))?)
}

async fn key_for(service: &RelayService, role: Role) -> Result<AuthContext> {
    let created = service
        .create_api_key(
            CreateApiKeyRequest {
                name: format!("{role}-key"),
                description: String::new(),
                role,
            },
            &root(),
        )
        .await?;
    Ok(service.authenticate(Some(&created.key)).await?)
}

fn assert_status(err: RelayError, status: u16) {
    assert_eq!(err.http_status(), status, "unexpected error: {err}");
}

#[tokio::test]
async fn test_role_hierarchy_on_pipeline_lifecycle() -> Result<()> {
    let (_storage, service) = secured_service().await?;
    let reader = key_for(&service, Role::Reader).await?;
    let writer = key_for(&service, Role::Writer).await?;
    let admin = key_for(&service, Role::Admin).await?;

    // reader cannot create
    let err = service
        .create_pipeline(pipeline_request("Blocked")?, &reader)
        .await
        .unwrap_err();
    assert_status(err, 403);

    // writer can create but not delete
    let created = service
        .create_pipeline(pipeline_request("Allowed")?, &writer)
        .await?;
    let err = service
        .delete_pipeline(&created.pipeline_id, &writer)
        .await
        .unwrap_err();
    assert_status(err, 403);

    // reader can still read
    assert_eq!(service.list_pipelines(&reader).await?.len(), 1);

    // admin deletes
    service.delete_pipeline(&created.pipeline_id, &admin).await?;
    assert!(service.list_pipelines(&reader).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_and_invalid_keys() -> Result<()> {
    let (_storage, service) = secured_service().await?;

    let err = service.authenticate(None).await.unwrap_err();
    assert!(matches!(
        err,
        RelayError::Domain(DomainError::Unauthorized)
    ));
    assert_status(err, 401);

    let err = service.authenticate(Some("relay_not_a_key")).await.unwrap_err();
    assert_status(err, 403);
    Ok(())
}

#[tokio::test]
async fn test_admin_gate_on_key_management() -> Result<()> {
    let (_storage, service) = secured_service().await?;
    let writer = key_for(&service, Role::Writer).await?;

    let err = service
        .create_api_key(
            CreateApiKeyRequest {
                name: "escalation".into(),
                description: String::new(),
                role: Role::Admin,
            },
            &writer,
        )
        .await
        .unwrap_err();
    assert_status(err, 403);

    let err = service.list_api_keys(&writer).await.unwrap_err();
    assert_status(err, 403);
    Ok(())
}

#[tokio::test]
async fn test_connection_lifecycle_with_encryption() -> Result<()> {
    let (_storage, service) = secured_service().await?;
    let writer = key_for(&service, Role::Writer).await?;

    let connection = service
        .create_connection(
            serde_json::from_value::<CreateConnectionRequest>(serde_json::json!({
                "name": "warehouse_pg",
                "type": "postgres",
                "credentials": {
                    "host": "db.internal",
                    "username": "svc",
                    "password": "hunter2",
                    "database": "crm"
                }
            }))?,
            &writer,
        )
        .await?;

    // listed without credentials
    let listed = service.list_connections(&writer).await?;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "warehouse_pg");

    // duplicate name is a conflict
    let err = service
        .create_connection(
            serde_json::from_value(serde_json::json!({
                "name": "warehouse_pg",
                "type": "postgres",
                "credentials": {}
            }))?,
            &writer,
        )
        .await
        .unwrap_err();
    assert_status(err, 409);

    // bad names never reach the store
    let err = service
        .create_connection(
            serde_json::from_value(serde_json::json!({
                "name": "9starts-with-digit",
                "type": "postgres",
                "credentials": {}
            }))?,
            &writer,
        )
        .await
        .unwrap_err();
    assert_status(err, 400);

    // unknown connection types are rejected
    let err = service
        .create_connection(
            serde_json::from_value(serde_json::json!({
                "name": "mystery",
                "type": "carrier_pigeon",
                "credentials": {}
            }))?,
            &writer,
        )
        .await
        .unwrap_err();
    assert_status(err, 400);

    service.delete_connection(&connection.id, &writer).await?;
    assert!(service.list_connections(&writer).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_proposal_workflow_under_required_auth() -> Result<()> {
    let (_storage, service) = secured_service().await?;
    let writer = key_for(&service, Role::Writer).await?;

    let created = service
        .create_pipeline(pipeline_request("Proposals Demo")?, &writer)
        .await?;

    // with auth required there is no auto-approval
    let proposals = service
        .propose_ontology(&created.pipeline_id, true, true, &writer)
        .await?;
    assert!(!proposals.is_empty());
    assert!(
        proposals
            .iter()
            .all(|p| p.status == ProposalStatus::Pending)
    );
    assert!(service.ontology_overview(&writer).await?.entities.is_empty());

    // approving the entity proposal materializes it
    let entity_proposal = proposals
        .iter()
        .find(|p| p.proposal_type == relay_core::domain::ontology::ProposalKind::Entity)
        .expect("entity proposal");
    let review = service
        .review_proposal(&entity_proposal.id, true, None, &writer)
        .await?;
    assert_eq!(review.status, "approved");
    let snapshot = service.ontology_overview(&writer).await?;
    assert_eq!(snapshot.entities.len(), 1);
    assert_eq!(snapshot.entities[0].name, "proposals_demo");

    // a second review of the same proposal is an invalid transition
    let err = service
        .review_proposal(&entity_proposal.id, false, Some("changed my mind"), &writer)
        .await
        .unwrap_err();
    assert_status(err, 409);
    Ok(())
}

#[tokio::test]
async fn test_dev_mode_auto_approves_proposals() -> Result<()> {
    let storage = tempfile::tempdir()?;
    let settings = Settings {
        local_storage_path: storage.path().to_path_buf(),
        ..Settings::default()
    };
    let store = Arc::new(Store::in_memory().await?);
    let service = RelayService::with_store(settings, store).await?;
    let auth = service.authenticate(None).await?;

    let created = service
        .create_pipeline(pipeline_request("Dev Orders")?, &auth)
        .await?;
    let proposals = service
        .propose_ontology(&created.pipeline_id, true, true, &auth)
        .await?;
    assert!(
        proposals
            .iter()
            .all(|p| p.status == ProposalStatus::Approved)
    );
    let snapshot = service.ontology_overview(&auth).await?;
    assert_eq!(snapshot.entities.len(), 1);
    assert_eq!(snapshot.entities[0].name, "dev_orders");
    Ok(())
}
