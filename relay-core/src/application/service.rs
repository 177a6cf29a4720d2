// relay-core/src/application/service.rs
//
// The service facade: validated request contracts, role-gated
// operations, analytics hooks, and the self-describing capabilities
// document. This is the surface external collaborators (the CLI today,
// an HTTP shell tomorrow) call into; every response carries `status`
// and, on success, `next_steps`.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;
use validator::Validate;

use crate::application::auth::ApiKeyService;
use crate::application::engine::{PipelineEngine, SourcePreview};
use crate::application::lineage::{LineageReport, compute_lineage};
use crate::application::metadata::MetadataGenerator;
use crate::application::ontology::OntologyManager;
use crate::application::query::{DEFAULT_ROW_LIMIT, PipelineSchema, QueryEngine, QueryResult};
use crate::application::scheduler::{PipelineScheduler, next_run_time};
use crate::application::search::{DatasetMatch, DatasetSearch, JoinSuggestion};
use crate::application::semantic::{SemanticQueryEngine, SemanticQueryResult, SemanticRequest};
use crate::application::transform::TransformationEngine;
use crate::application::writer::DestinationWriter;
use crate::domain::api_key::ApiKey;
use crate::domain::connection::{Connection, ConnectionTestResult};
use crate::domain::error::DomainError;
use crate::domain::event::{AnalyticsSummary, PlatformEvent};
use crate::domain::metadata::{ColumnKnowledge, DatasetMetadata, PendingReview};
use crate::domain::naming::{CONNECTION_NAME_RE, short_id};
use crate::domain::ontology::{
    Dimension, Entity, Metric, OntologySnapshot, Proposal, ProposalStatus, Relationship,
};
use crate::domain::pipeline::{
    Destination, Pipeline, PipelineKind, PipelineOptions, PipelineRun, ScheduleConfig,
    SourceConfig, TransformationConfig,
};
use crate::domain::role::{AuthContext, Role};
use crate::error::RelayError;
use crate::infrastructure::blob::BlobStore;
use crate::infrastructure::config::Settings;
use crate::infrastructure::connectors::ConnectorRegistry;
use crate::infrastructure::crypto::CredentialCipher;
use crate::infrastructure::llm::AnthropicClient;
use crate::infrastructure::store::Store;

// ── Requests ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePipelineRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub source: SourceConfig,
    pub destination: Destination,
    #[serde(default)]
    pub options: Option<PipelineOptions>,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTransformationRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub config: TransformationConfig,
    pub destination: Destination,
    #[serde(default)]
    pub options: Option<PipelineOptions>,
    #[serde(default)]
    pub schedule: Option<ScheduleConfig>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1))]
    pub pipelines: Vec<String>,
    #[validate(length(min = 1))]
    pub sql: String,
    #[serde(default = "default_row_limit")]
    pub limit: usize,
}

fn default_row_limit() -> usize {
    DEFAULT_ROW_LIMIT
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateConnectionRequest {
    #[validate(regex(
        path = *CONNECTION_NAME_RE,
        message = "must start with a letter and contain only letters, digits, '_' or '-' (2-63 chars)"
    ))]
    pub name: String,
    #[serde(rename = "type")]
    pub connection_type: String,
    #[serde(default)]
    pub description: String,
    pub credentials: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApiKeyRequest {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub role: Role,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ApproveColumnRequest {
    #[validate(length(min = 1))]
    pub column_name: String,
    #[validate(length(min = 1))]
    pub description: String,
    #[serde(default)]
    pub business_meaning: Option<String>,
    #[serde(default = "default_verified_by")]
    pub verified_by: String,
}

fn default_verified_by() -> String {
    "user".to_string()
}

// ── Responses ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PipelineCreated {
    pub status: String,
    pub pipeline_id: String,
    pub name: String,
    pub table_name: String,
    pub query_example: String,
    pub created_at: DateTime<Utc>,
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineOverview {
    pub id: String,
    pub name: String,
    pub kind: PipelineKind,
    pub source_type: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub total_runs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run: Option<PipelineRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_scheduled_run: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineDetail {
    pub pipeline: Pipeline,
    pub runs: Vec<PipelineRun>,
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunStarted {
    pub status: String,
    pub pipeline_id: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub next_steps: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Deleted {
    pub status: String,
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyCreated {
    pub status: String,
    /// The raw secret. Shown exactly once.
    pub key: String,
    pub key_prefix: String,
    pub name: String,
    pub role: Role,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProposalReview {
    pub status: String,
    pub proposal: Proposal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<Value>,
}

// ── The service ──────────────────────────────────────────────────────

pub struct RelayService {
    settings: Settings,
    store: Arc<Store>,
    cipher: Arc<CredentialCipher>,
    registry: Arc<ConnectorRegistry>,
    engine: Arc<PipelineEngine>,
    query: Arc<QueryEngine>,
    semantic: SemanticQueryEngine,
    ontology: OntologyManager,
    metadata: Arc<MetadataGenerator>,
    search: DatasetSearch,
    auth: ApiKeyService,
}

impl RelayService {
    /// Wire the whole core together. Everything is dependency-injected
    /// from here; no process globals.
    pub async fn new(settings: Settings) -> Result<Self, RelayError> {
        let store = Arc::new(Store::connect(&settings.database_url).await?);
        Self::with_store(settings, store).await
    }

    /// Same wiring over an existing store (tests use the in-memory one).
    pub async fn with_store(settings: Settings, store: Arc<Store>) -> Result<Self, RelayError> {
        let cipher = Arc::new(CredentialCipher::new(settings.encryption_key.clone()));
        let blob = Arc::new(BlobStore::from_settings(&settings));
        let registry = Arc::new(ConnectorRegistry::new(
            store.clone(),
            cipher.clone(),
            &settings,
        )?);

        let llm = match &settings.anthropic_api_key {
            Some(key) => {
                let client = reqwest::Client::builder()
                    .timeout(std::time::Duration::from_secs(60))
                    .build()
                    .map_err(|e| RelayError::Internal(format!("HTTP client init failed: {e}")))?;
                Some(Arc::new(AnthropicClient::new(client, key.clone())))
            }
            None => None,
        };

        let writer = Arc::new(DestinationWriter::new(blob.clone()));
        let metadata = Arc::new(MetadataGenerator::new(store.clone(), llm.clone()));
        let query = Arc::new(QueryEngine::new(store.clone(), blob.clone()));
        let transformer = Arc::new(TransformationEngine::new(registry.clone(), query.clone()));
        let engine = Arc::new(PipelineEngine::new(
            store.clone(),
            registry.clone(),
            writer,
            transformer,
            metadata.clone(),
        ));

        let semantic = SemanticQueryEngine::new(store.clone(), query.clone(), llm.clone());
        let ontology = OntologyManager::new(store.clone(), llm, !settings.require_auth);
        let search = DatasetSearch::new(store.clone());
        let auth = ApiKeyService::new(store.clone(), settings.require_auth);

        Ok(Self {
            settings,
            store,
            cipher,
            registry,
            engine,
            query,
            semantic,
            ontology,
            metadata,
            search,
            auth,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn scheduler(&self) -> PipelineScheduler {
        PipelineScheduler::new(self.store.clone(), self.engine.clone())
    }

    pub async fn authenticate(&self, raw_key: Option<&str>) -> Result<AuthContext, RelayError> {
        self.auth.authenticate(raw_key).await
    }

    // ── Discovery ────────────────────────────────────────────────────

    pub fn health(&self) -> Value {
        json!({
            "status": "healthy",
            "service": "relay",
            "version": env!("CARGO_PKG_VERSION"),
        })
    }

    /// The self-describing document agents read once.
    pub fn capabilities(&self) -> Value {
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "name": "Relay - Agent-Native Data Movement",
            "description": "Data pipeline platform designed for AI agent interaction",
            "design_principle": "Agent reads once, understands forever",
            "query_engine": {
                "engine": "DataFusion",
                "description": "In-memory SQL execution over parquet artifacts",
                "supported_features": [
                    "Multi-table JOINs (INNER, LEFT, RIGHT, FULL OUTER)",
                    "Common Table Expressions (CTEs/WITH clauses)",
                    "Window functions (ROW_NUMBER, RANK, LAG, LEAD)",
                    "Aggregations (SUM, AVG, COUNT, MIN, MAX)",
                    "Subqueries and nested queries",
                    "CASE statements and conditional logic",
                    "String functions (SUBSTRING, CONCAT, UPPER, LOWER, TRIM)",
                    "Date functions (EXTRACT, DATE_TRUNC, TO_TIMESTAMP)",
                    "Math functions (ROUND, CEIL, FLOOR, ABS)",
                    "Type casting (CAST, TRY_CAST)",
                ],
                "best_practices": [
                    "Use the schema operation to see column types and sample values before querying",
                    "Filter early in WHERE clauses",
                    "Use LIMIT for exploratory queries",
                    "Table names are pipeline names lowercased with spaces replaced by underscores",
                ],
            },
            "operations": {
                "discovery": "GET /api/v1/capabilities",
                "test": "POST /api/v1/test/source",
                "create": "POST /api/v1/pipeline/create",
                "create_transformation": "POST /api/v1/pipeline/create-transformation",
                "list": "GET /api/v1/pipeline/list",
                "get": "GET /api/v1/pipeline/{id}",
                "run": "POST /api/v1/pipeline/{id}/run",
                "status": "GET /api/v1/pipeline/{id}/run/{run_id}",
                "delete": "DELETE /api/v1/pipeline/{id}",
                "query": "POST /api/v1/query",
                "schema": "POST /api/v1/schema",
                "metadata": "GET /api/v1/metadata/{id}",
                "search_datasets": "GET /api/v1/datasets/search?q=query",
                "join_suggestions": "GET /api/v1/datasets/join-suggestions?dataset1=id1&dataset2=id2",
                "connections": "POST/GET/DELETE /api/v1/connection",
                "ontology": "GET /api/v1/ontology",
                "ontology_propose": "POST /api/v1/ontology/propose",
                "ontology_query": "POST /api/v1/ontology/query",
                "lineage": "GET /api/v1/ontology/lineage/{entity}",
            },
            "sources": self.registry.supported_types(),
            "destinations": [
                {
                    "type": "object_store",
                    "description": "S3 bucket or local path, selected by STORAGE_MODE",
                    "parameters": {"bucket": "bucket name", "path": "path within bucket"},
                }
            ],
            "scheduling": {
                "intervals": ["hourly", "daily", "weekly", "custom"],
                "example": {"schedule": {"enabled": true, "interval": "daily"}},
            },
            "security": {
                "auth_required": self.settings.require_auth,
                "header": "X-API-Key",
                "roles": ["reader", "writer", "admin"],
                "connections": "credentials are AEAD-encrypted at rest and resolved at fetch time",
            },
            "ontology_workflow": [
                "1. Run a pipeline so metadata exists",
                "2. Propose: POST /ontology/propose",
                "3. Review proposals (auto-approved when auth is disabled)",
                "4. Query by name: POST /ontology/query with metrics + dimensions",
            ],
            "example_query": {
                "request": {"pipelines": ["pipe-1234"], "sql": "SELECT COUNT(*) FROM my_table"},
                "response": {"status": "success", "rows": [{"count(*)": 200}], "row_count": 1},
            },
            "getting_started": [
                "1. Test source: POST /test/source",
                "2. Create pipeline: POST /pipeline/create",
                "3. Run pipeline: POST /pipeline/{id}/run",
                "4. Query data: POST /query",
            ],
        })
    }

    // ── Pipelines ────────────────────────────────────────────────────

    pub async fn create_pipeline(
        &self,
        request: CreatePipelineRequest,
        auth: &AuthContext,
    ) -> Result<PipelineCreated, RelayError> {
        auth.require(Role::Writer)?;
        validate(&request)?;

        let pipeline = Pipeline {
            id: short_id("pipe"),
            name: request.name.clone(),
            description: request.description,
            kind: PipelineKind::Regular,
            status: "active".to_string(),
            source: Some(request.source),
            destination: Some(request.destination),
            options: request.options.unwrap_or_default(),
            schedule: request.schedule.unwrap_or_default(),
            transformation: None,
            last_scheduled_run: None,
            created_at: Utc::now(),
        };
        self.store.save_pipeline(&pipeline).await?;
        self.record_event("pipeline_created", Some(&pipeline.id), json!({"name": pipeline.name}))
            .await;

        Ok(self.created_response(pipeline))
    }

    pub async fn create_transformation(
        &self,
        request: CreateTransformationRequest,
        auth: &AuthContext,
    ) -> Result<PipelineCreated, RelayError> {
        auth.require(Role::Writer)?;
        validate(&request)?;
        if request.config.sources.is_empty() {
            return Err(
                DomainError::Validation("Transformation requires at least one source".into()).into(),
            );
        }

        let pipeline = Pipeline {
            id: short_id("pipe"),
            name: request.name.clone(),
            description: request.description,
            kind: PipelineKind::Transformation,
            status: "active".to_string(),
            source: None,
            destination: Some(request.destination),
            options: request.options.unwrap_or_default(),
            schedule: request.schedule.unwrap_or_default(),
            transformation: Some(request.config),
            last_scheduled_run: None,
            created_at: Utc::now(),
        };
        self.store.save_pipeline(&pipeline).await?;
        self.record_event(
            "transformation_created",
            Some(&pipeline.id),
            json!({"name": pipeline.name}),
        )
        .await;

        Ok(self.created_response(pipeline))
    }

    fn created_response(&self, pipeline: Pipeline) -> PipelineCreated {
        let table_name = pipeline.table_name();
        PipelineCreated {
            status: "created".to_string(),
            query_example: format!("SELECT * FROM {table_name} LIMIT 10"),
            next_steps: vec![
                format!("Run pipeline: POST /pipeline/{}/run", pipeline.id),
                format!("View details: GET /pipeline/{}", pipeline.id),
                "List all: GET /pipeline/list".to_string(),
            ],
            pipeline_id: pipeline.id,
            name: pipeline.name,
            table_name,
            created_at: pipeline.created_at,
        }
    }

    pub async fn list_pipelines(
        &self,
        auth: &AuthContext,
    ) -> Result<Vec<PipelineOverview>, RelayError> {
        auth.require(Role::Reader)?;
        let mut overviews = Vec::new();
        for pipeline in self.store.list_pipelines().await? {
            let runs = self.store.list_runs(&pipeline.id).await?;
            overviews.push(PipelineOverview {
                id: pipeline.id.clone(),
                name: pipeline.name.clone(),
                kind: pipeline.kind,
                source_type: pipeline
                    .source_type()
                    .unwrap_or("transformation")
                    .to_string(),
                status: pipeline.status.clone(),
                created_at: pipeline.created_at,
                total_runs: runs.len(),
                last_run: runs.last().cloned(),
                next_scheduled_run: next_run_time(&pipeline),
            });
        }
        Ok(overviews)
    }

    pub async fn get_pipeline(
        &self,
        pipeline_id: &str,
        auth: &AuthContext,
    ) -> Result<PipelineDetail, RelayError> {
        auth.require(Role::Reader)?;
        let pipeline = self.store.require_pipeline(pipeline_id).await?;
        let runs = self.store.list_runs(pipeline_id).await?;
        Ok(PipelineDetail {
            next_steps: vec![
                format!("Run pipeline: POST /pipeline/{pipeline_id}/run"),
                "List all: GET /pipeline/list".to_string(),
            ],
            pipeline,
            runs,
        })
    }

    /// Dispatch a run to the background and return immediately.
    pub async fn run_pipeline(
        &self,
        pipeline_id: &str,
        auth: &AuthContext,
    ) -> Result<RunStarted, RelayError> {
        auth.require(Role::Writer)?;
        let pipeline = self.store.require_pipeline(pipeline_id).await?;

        let run_id = short_id("run");
        let engine = self.engine.clone();
        let spawn_pipeline_id = pipeline.id.clone();
        let spawn_run_id = run_id.clone();
        tokio::spawn(async move {
            engine.execute(&spawn_pipeline_id, &spawn_run_id).await;
        });

        self.record_event("pipeline_run_started", Some(pipeline_id), json!({"run_id": run_id}))
            .await;
        info!(pipeline_id, run_id = %run_id, "run dispatched");

        Ok(RunStarted {
            status: "started".to_string(),
            pipeline_id: pipeline_id.to_string(),
            next_steps: vec![
                format!("Check status: GET /pipeline/{pipeline_id}/run/{run_id}"),
                format!("View pipeline: GET /pipeline/{pipeline_id}"),
            ],
            run_id,
            started_at: Utc::now(),
        })
    }

    pub async fn run_status(
        &self,
        pipeline_id: &str,
        run_id: &str,
        auth: &AuthContext,
    ) -> Result<PipelineRun, RelayError> {
        auth.require(Role::Reader)?;
        self.store.require_pipeline(pipeline_id).await?;
        let run = self.store.get_run(run_id).await?.ok_or_else(|| {
            DomainError::NotFound {
                kind: "Run",
                id: run_id.to_string(),
            }
        })?;
        if run.pipeline_id != pipeline_id {
            return Err(DomainError::NotFound {
                kind: "Run",
                id: run_id.to_string(),
            }
            .into());
        }
        Ok(run)
    }

    pub async fn delete_pipeline(
        &self,
        pipeline_id: &str,
        auth: &AuthContext,
    ) -> Result<Deleted, RelayError> {
        auth.require(Role::Admin)?;
        let pipeline = self.store.require_pipeline(pipeline_id).await?;
        self.store.delete_pipeline(pipeline_id).await?;
        self.record_event("pipeline_deleted", Some(pipeline_id), json!({"name": pipeline.name}))
            .await;
        Ok(Deleted {
            status: "deleted".to_string(),
            id: pipeline_id.to_string(),
            message: format!("Pipeline '{}' deleted successfully", pipeline.name),
        })
    }

    pub async fn test_source(
        &self,
        source_type: &str,
        url: &str,
        auth: &AuthContext,
    ) -> Result<SourcePreview, RelayError> {
        auth.require(Role::Reader)?;
        self.engine.test_source(source_type, url).await
    }

    // ── Query ────────────────────────────────────────────────────────

    pub async fn query(
        &self,
        request: QueryRequest,
        auth: &AuthContext,
    ) -> Result<QueryResult, RelayError> {
        auth.require(Role::Reader)?;
        validate(&request)?;
        let result = self
            .query
            .execute(&request.pipelines, &request.sql, request.limit)
            .await?;
        self.record_event(
            "query_executed",
            None,
            json!({"pipelines": request.pipelines, "row_count": result.row_count}),
        )
        .await;
        Ok(result)
    }

    pub async fn schemas(
        &self,
        pipeline_ids: &[String],
        auth: &AuthContext,
    ) -> Result<Vec<PipelineSchema>, RelayError> {
        auth.require(Role::Reader)?;
        self.query.list_pipeline_schemas(pipeline_ids).await
    }

    // ── Metadata ─────────────────────────────────────────────────────

    pub async fn metadata(
        &self,
        pipeline_id: &str,
        auth: &AuthContext,
    ) -> Result<DatasetMetadata, RelayError> {
        auth.require(Role::Reader)?;
        self.store
            .get_metadata(pipeline_id)
            .await?
            .ok_or_else(|| {
                DomainError::NotFound {
                    kind: "Metadata",
                    id: pipeline_id.to_string(),
                }
                .into()
            })
    }

    pub async fn pending_reviews(
        &self,
        auth: &AuthContext,
    ) -> Result<Vec<PendingReview>, RelayError> {
        auth.require(Role::Reader)?;
        self.metadata.pending_reviews().await
    }

    pub async fn approve_column(
        &self,
        request: ApproveColumnRequest,
        auth: &AuthContext,
    ) -> Result<ColumnKnowledge, RelayError> {
        auth.require(Role::Writer)?;
        validate(&request)?;
        let knowledge = self
            .metadata
            .approve_column(
                &request.column_name,
                &request.description,
                request.business_meaning.as_deref(),
                &request.verified_by,
            )
            .await?;
        self.record_event(
            "metadata_column_approved",
            None,
            json!({"column_key": knowledge.column_key}),
        )
        .await;
        Ok(knowledge)
    }

    // ── Datasets ─────────────────────────────────────────────────────

    pub async fn search_datasets(
        &self,
        query: &str,
        auth: &AuthContext,
    ) -> Result<Vec<DatasetMatch>, RelayError> {
        auth.require(Role::Reader)?;
        self.search.search(query, 5).await
    }

    pub async fn join_suggestions(
        &self,
        dataset1: &str,
        dataset2: &str,
        auth: &AuthContext,
    ) -> Result<Vec<JoinSuggestion>, RelayError> {
        auth.require(Role::Reader)?;
        self.search.join_suggestions(dataset1, dataset2).await
    }

    // ── Connections ──────────────────────────────────────────────────

    pub async fn create_connection(
        &self,
        request: CreateConnectionRequest,
        auth: &AuthContext,
    ) -> Result<Connection, RelayError> {
        auth.require(Role::Writer)?;
        validate(&request)?;
        if !self
            .registry
            .supported_types()
            .contains(&request.connection_type.as_str())
        {
            return Err(DomainError::Validation(format!(
                "Unknown connection type: {}",
                request.connection_type
            ))
            .into());
        }

        let connection = Connection {
            id: short_id("conn"),
            name: request.name,
            connection_type: request.connection_type,
            description: request.description,
            last_tested_at: None,
            last_test_status: None,
            created_at: Utc::now(),
        };
        let ciphertext = self.cipher.encrypt_map(&request.credentials)?;
        self.store.save_connection(&connection, &ciphertext).await?;
        self.record_event(
            "connection_created",
            None,
            json!({"name": connection.name, "type": connection.connection_type}),
        )
        .await;
        Ok(connection)
    }

    pub async fn list_connections(
        &self,
        auth: &AuthContext,
    ) -> Result<Vec<Connection>, RelayError> {
        auth.require(Role::Reader)?;
        self.store.list_connections().await
    }

    pub async fn get_connection(
        &self,
        connection_id: &str,
        auth: &AuthContext,
    ) -> Result<Connection, RelayError> {
        auth.require(Role::Reader)?;
        self.store
            .get_connection(connection_id)
            .await?
            .ok_or_else(|| {
                DomainError::NotFound {
                    kind: "Connection",
                    id: connection_id.to_string(),
                }
                .into()
            })
    }

    pub async fn delete_connection(
        &self,
        connection_id: &str,
        auth: &AuthContext,
    ) -> Result<Deleted, RelayError> {
        auth.require(Role::Writer)?;
        let deleted = self.store.delete_connection(connection_id).await?;
        if !deleted {
            return Err(DomainError::NotFound {
                kind: "Connection",
                id: connection_id.to_string(),
            }
            .into());
        }
        self.record_event("connection_deleted", None, json!({"id": connection_id}))
            .await;
        Ok(Deleted {
            status: "deleted".to_string(),
            id: connection_id.to_string(),
            message: "Connection deleted".to_string(),
        })
    }

    /// Probe a stored connection with its decrypted credentials and
    /// record the outcome on the row.
    pub async fn test_connection(
        &self,
        connection_id: &str,
        auth: &AuthContext,
    ) -> Result<ConnectionTestResult, RelayError> {
        auth.require(Role::Writer)?;
        let connection = self.get_connection(connection_id, auth).await?;
        let (_, ciphertext) = self
            .store
            .get_connection_by_name(&connection.name)
            .await?
            .ok_or_else(|| DomainError::NotFound {
                kind: "Connection",
                id: connection_id.to_string(),
            })?;
        let credentials = self.cipher.decrypt_map(&ciphertext)?;

        let result = self
            .registry
            .test_connection(&connection.connection_type, &credentials)
            .await;
        self.store
            .record_connection_test(connection_id, &result.status, Utc::now())
            .await?;
        self.record_event(
            "connection_tested",
            None,
            json!({"id": connection_id, "status": result.status}),
        )
        .await;
        Ok(result)
    }

    // ── Ontology ─────────────────────────────────────────────────────

    pub async fn ontology_overview(
        &self,
        auth: &AuthContext,
    ) -> Result<OntologySnapshot, RelayError> {
        auth.require(Role::Reader)?;
        self.store.ontology_snapshot().await
    }

    pub async fn create_entity(
        &self,
        entity: Entity,
        auth: &AuthContext,
    ) -> Result<Entity, RelayError> {
        auth.require(Role::Writer)?;
        self.ontology.create_entity(entity).await
    }

    pub async fn create_relationship(
        &self,
        relationship: Relationship,
        auth: &AuthContext,
    ) -> Result<Relationship, RelayError> {
        auth.require(Role::Writer)?;
        self.ontology.create_relationship(relationship).await
    }

    pub async fn create_metric(
        &self,
        metric: Metric,
        auth: &AuthContext,
    ) -> Result<Metric, RelayError> {
        auth.require(Role::Writer)?;
        self.ontology.create_metric(metric).await
    }

    pub async fn create_dimension(
        &self,
        dimension: Dimension,
        auth: &AuthContext,
    ) -> Result<Dimension, RelayError> {
        auth.require(Role::Writer)?;
        self.ontology.create_dimension(dimension).await
    }

    pub async fn delete_entity(&self, id: &str, auth: &AuthContext) -> Result<Deleted, RelayError> {
        auth.require(Role::Writer)?;
        self.delete_ontology_row(self.store.delete_entity(id).await?, "Entity", id)
    }

    pub async fn delete_relationship(
        &self,
        id: &str,
        auth: &AuthContext,
    ) -> Result<Deleted, RelayError> {
        auth.require(Role::Writer)?;
        self.delete_ontology_row(self.store.delete_relationship(id).await?, "Relationship", id)
    }

    pub async fn delete_metric(&self, id: &str, auth: &AuthContext) -> Result<Deleted, RelayError> {
        auth.require(Role::Writer)?;
        self.delete_ontology_row(self.store.delete_metric(id).await?, "Metric", id)
    }

    pub async fn delete_dimension(
        &self,
        id: &str,
        auth: &AuthContext,
    ) -> Result<Deleted, RelayError> {
        auth.require(Role::Writer)?;
        self.delete_ontology_row(self.store.delete_dimension(id).await?, "Dimension", id)
    }

    fn delete_ontology_row(
        &self,
        deleted: bool,
        kind: &'static str,
        id: &str,
    ) -> Result<Deleted, RelayError> {
        if !deleted {
            return Err(DomainError::NotFound {
                kind,
                id: id.to_string(),
            }
            .into());
        }
        Ok(Deleted {
            status: "deleted".to_string(),
            id: id.to_string(),
            message: format!("{kind} deleted"),
        })
    }

    pub async fn propose_ontology(
        &self,
        pipeline_id: &str,
        include_relationships: bool,
        include_metrics: bool,
        auth: &AuthContext,
    ) -> Result<Vec<Proposal>, RelayError> {
        auth.require(Role::Writer)?;
        let proposals = self
            .ontology
            .propose_for_pipeline(pipeline_id, include_relationships, include_metrics)
            .await?;
        self.record_event(
            "ontology_proposed",
            Some(pipeline_id),
            json!({"count": proposals.len()}),
        )
        .await;
        Ok(proposals)
    }

    pub async fn list_proposals(
        &self,
        status: Option<ProposalStatus>,
        auth: &AuthContext,
    ) -> Result<Vec<Proposal>, RelayError> {
        auth.require(Role::Reader)?;
        self.store.list_proposals(status).await
    }

    pub async fn review_proposal(
        &self,
        proposal_id: &str,
        approve: bool,
        notes: Option<&str>,
        auth: &AuthContext,
    ) -> Result<ProposalReview, RelayError> {
        auth.require(Role::Writer)?;
        let review = if approve {
            let (proposal, created) = self
                .ontology
                .approve_proposal(proposal_id, &auth.principal)
                .await?;
            ProposalReview {
                status: "approved".to_string(),
                proposal,
                created: Some(created),
            }
        } else {
            let proposal = self
                .ontology
                .reject_proposal(proposal_id, &auth.principal, notes)
                .await?;
            ProposalReview {
                status: "rejected".to_string(),
                proposal,
                created: None,
            }
        };
        self.record_event(
            "proposal_reviewed",
            None,
            json!({"proposal_id": proposal_id, "status": review.status}),
        )
        .await;
        Ok(review)
    }

    pub async fn semantic_query(
        &self,
        request: &SemanticRequest,
        auth: &AuthContext,
    ) -> Result<SemanticQueryResult, RelayError> {
        auth.require(Role::Reader)?;
        let result = self.semantic.execute(request).await?;
        self.record_event(
            "semantic_query_executed",
            None,
            json!({
                "entities_used": result.entities_used,
                "row_count": result.result.row_count,
            }),
        )
        .await;
        Ok(result)
    }

    /// Pure read: the entity, its pipeline and source, its metrics and
    /// dimensions with column references, and the one-hop neighborhood.
    pub async fn lineage(
        &self,
        entity_name: &str,
        auth: &AuthContext,
    ) -> Result<LineageReport, RelayError> {
        auth.require(Role::Reader)?;
        compute_lineage(&self.store, entity_name)
            .await?
            .ok_or_else(|| {
                DomainError::NotFound {
                    kind: "Entity",
                    id: entity_name.to_string(),
                }
                .into()
            })
    }

    // ── Admin ────────────────────────────────────────────────────────

    pub async fn create_api_key(
        &self,
        request: CreateApiKeyRequest,
        auth: &AuthContext,
    ) -> Result<ApiKeyCreated, RelayError> {
        auth.require(Role::Admin)?;
        validate(&request)?;
        let (raw_key, stored) = self
            .auth
            .generate(&request.name, &request.description, request.role)
            .await?;
        self.record_event(
            "api_key_created",
            None,
            json!({"name": stored.name, "role": stored.role}),
        )
        .await;
        Ok(ApiKeyCreated {
            status: "created".to_string(),
            key: raw_key,
            key_prefix: stored.key_prefix,
            name: stored.name,
            role: stored.role,
            message: "Store this key securely - it will not be shown again.".to_string(),
        })
    }

    pub async fn list_api_keys(&self, auth: &AuthContext) -> Result<Vec<ApiKey>, RelayError> {
        auth.require(Role::Admin)?;
        self.store.list_api_keys().await
    }

    pub async fn deactivate_api_key(
        &self,
        key_id: i64,
        auth: &AuthContext,
    ) -> Result<Deleted, RelayError> {
        auth.require(Role::Admin)?;
        if !self.store.deactivate_api_key(key_id).await? {
            return Err(DomainError::NotFound {
                kind: "API key",
                id: key_id.to_string(),
            }
            .into());
        }
        Ok(Deleted {
            status: "deactivated".to_string(),
            id: key_id.to_string(),
            message: format!("API key {key_id} deactivated"),
        })
    }

    // ── Analytics ────────────────────────────────────────────────────

    pub async fn analytics_summary(
        &self,
        auth: &AuthContext,
    ) -> Result<AnalyticsSummary, RelayError> {
        auth.require(Role::Reader)?;
        self.store.analytics_summary().await
    }

    pub async fn analytics_events(
        &self,
        event_type: Option<&str>,
        pipeline_id: Option<&str>,
        limit: i64,
        auth: &AuthContext,
    ) -> Result<Vec<PlatformEvent>, RelayError> {
        auth.require(Role::Reader)?;
        self.store.list_events(event_type, pipeline_id, limit).await
    }

    /// Analytics must never break the operation it decorates.
    async fn record_event(&self, event_type: &str, pipeline_id: Option<&str>, details: Value) {
        if let Err(e) = self.store.record_event(event_type, pipeline_id, details).await {
            tracing::warn!(event_type, error = %e, "could not record platform event");
        }
    }
}

fn validate<T: Validate>(request: &T) -> Result<(), RelayError> {
    request
        .validate()
        .map_err(|e| DomainError::Validation(e.to_string()).into())
}
