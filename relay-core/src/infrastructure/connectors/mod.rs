// relay-core/src/infrastructure/connectors/mod.rs
//
// One registry maps every source type to a typed fetch handler pair
// (whole-table + streaming). Connection resolution happens here, before
// dispatch: a named connection is looked up, decrypted, and merged under
// the source config (source fields win).

mod database;
mod http;
mod salesforce;
mod synthetic;

use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::arrow::record_batch::RecordBatch;
use futures::Stream;
use serde_json::Value;
use tracing::debug;

use crate::domain::connection::ConnectionTestResult;
use crate::domain::error::DomainError;
use crate::domain::pipeline::SourceConfig;
use crate::error::RelayError;
use crate::infrastructure::config::Settings;
use crate::infrastructure::crypto::CredentialCipher;
use crate::infrastructure::store::Store;
use crate::infrastructure::tabular;

pub use http::unwrap_rest_payload;

/// Streaming fetches yield chunks of up to this many rows.
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<RecordBatch, RelayError>> + Send>>;

#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn source_type(&self) -> &'static str;

    /// Whole-table fetch.
    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<RecordBatch>, RelayError>;

    /// Lazy chunk stream. The default fetches whole and re-slices, which
    /// is correct for sources without server-side cursors.
    async fn fetch_streaming(
        &self,
        source: &SourceConfig,
        chunk_size: usize,
    ) -> Result<ChunkStream, RelayError> {
        let batches = self.fetch(source).await?;
        let chunks = tabular::rechunk(batches, chunk_size);
        Ok(Box::pin(futures::stream::iter(
            chunks.into_iter().map(Ok::<_, RelayError>),
        )))
    }

    /// Liveness probe with decrypted credentials. Returns a short human
    /// message on success.
    async fn probe(&self, _credentials: &BTreeMap<String, Value>) -> Result<String, RelayError> {
        Ok(format!(
            "Credentials stored for {} (no live test available)",
            self.source_type()
        ))
    }
}

pub struct ConnectorRegistry {
    connectors: HashMap<&'static str, Arc<dyn SourceConnector>>,
    store: Arc<Store>,
    cipher: Arc<CredentialCipher>,
}

impl ConnectorRegistry {
    pub fn new(
        store: Arc<Store>,
        cipher: Arc<CredentialCipher>,
        settings: &Settings,
    ) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .timeout(settings.fetch_timeout)
            .build()
            .map_err(|e| RelayError::Internal(format!("HTTP client init failed: {e}")))?;
        let probe_timeout = settings.connection_test_timeout;

        let mut registry = Self {
            connectors: HashMap::new(),
            store,
            cipher,
        };
        registry.register(Arc::new(http::CsvUrlConnector::new(client.clone())));
        registry.register(Arc::new(http::JsonUrlConnector::new(client.clone())));
        registry.register(Arc::new(http::RestApiConnector::new(
            client.clone(),
            probe_timeout,
        )));
        registry.register(Arc::new(database::MysqlConnector::new(probe_timeout)));
        registry.register(Arc::new(database::PostgresConnector::new(probe_timeout)));
        registry.register(Arc::new(salesforce::SalesforceConnector::new(
            client,
            probe_timeout,
        )));
        registry.register(Arc::new(synthetic::SyntheticConnector));
        Ok(registry)
    }

    /// Adding a source type is one registration.
    pub fn register(&mut self, connector: Arc<dyn SourceConnector>) {
        self.connectors.insert(connector.source_type(), connector);
    }

    pub fn supported_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.connectors.keys().copied().collect();
        types.sort_unstable();
        types
    }

    fn connector(&self, source_type: &str) -> Result<&Arc<dyn SourceConnector>, RelayError> {
        self.connectors.get(source_type).ok_or_else(|| {
            DomainError::Validation(format!("Unsupported source type: {source_type}")).into()
        })
    }

    /// Resolve a named connection into the source config. Source fields
    /// override connection fields; a type mismatch is an error.
    pub async fn resolve(&self, source: &SourceConfig) -> Result<SourceConfig, RelayError> {
        let Some(connection_name) = source.connection_name() else {
            return Ok(source.clone());
        };

        let (connection, ciphertext) = self
            .store
            .get_connection_by_name(connection_name)
            .await?
            .ok_or_else(|| DomainError::NotFound {
                kind: "Connection",
                id: connection_name.to_string(),
            })?;

        if connection.connection_type != source.source_type() {
            return Err(DomainError::ConnectionTypeMismatch {
                connection: connection_name.to_string(),
                connection_type: connection.connection_type,
                source_type: source.source_type().to_string(),
            }
            .into());
        }

        let credentials = self.cipher.decrypt_map(&ciphertext)?;
        let mut resolved = source.clone();
        resolved.merge_credentials(&credentials);
        debug!(connection = connection_name, "resolved source credentials");
        Ok(resolved)
    }

    pub async fn fetch(&self, source: &SourceConfig) -> Result<Vec<RecordBatch>, RelayError> {
        let resolved = self.resolve(source).await?;
        self.connector(resolved.source_type())?.fetch(&resolved).await
    }

    pub async fn fetch_streaming(
        &self,
        source: &SourceConfig,
        chunk_size: usize,
    ) -> Result<ChunkStream, RelayError> {
        let resolved = self.resolve(source).await?;
        self.connector(resolved.source_type())?
            .fetch_streaming(&resolved, chunk_size)
            .await
    }

    /// Lightweight liveness check. Never raises: failures come back as
    /// `{status: "failed", message}`.
    pub async fn test_connection(
        &self,
        connection_type: &str,
        credentials: &BTreeMap<String, Value>,
    ) -> ConnectionTestResult {
        let Some(connector) = self.connectors.get(connection_type) else {
            return ConnectionTestResult::success(format!(
                "Credentials stored for {connection_type} (no live test available)"
            ));
        };
        match connector.probe(credentials).await {
            Ok(message) => ConnectionTestResult::success(message),
            Err(e) => ConnectionTestResult::failed(e.to_string()),
        }
    }
}

pub(crate) fn cred_str(credentials: &BTreeMap<String, Value>, key: &str) -> Option<String> {
    credentials.get(key).and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::domain::connection::Connection;
    use crate::domain::error::DomainError;
    use base64::Engine;
    use chrono::Utc;

    async fn registry_with_connection(
        name: &str,
        connection_type: &str,
        credentials: serde_json::Value,
    ) -> Result<ConnectorRegistry, RelayError> {
        let settings = Settings {
            encryption_key: Some(
                base64::engine::general_purpose::STANDARD.encode([1u8; 32]),
            ),
            ..Settings::default()
        };
        let store = Arc::new(Store::in_memory().await?);
        let cipher = Arc::new(CredentialCipher::new(settings.encryption_key.clone()));

        let connection = Connection {
            id: "conn-1".to_string(),
            name: name.to_string(),
            connection_type: connection_type.to_string(),
            description: String::new(),
            last_tested_at: None,
            last_test_status: None,
            created_at: Utc::now(),
        };
        let sealed = cipher.encrypt_map(&serde_json::from_value(credentials)?)?;
        store.save_connection(&connection, &sealed).await?;

        ConnectorRegistry::new(store, cipher, &settings)
    }

    #[tokio::test]
    async fn test_resolve_merges_decrypted_credentials() -> anyhow::Result<()> {
        let registry = registry_with_connection(
            "warehouse",
            "postgres",
            serde_json::json!({
                "host": "db.internal",
                "port": 5433,
                "username": "svc",
                "password": "pw",
                "database": "crm"
            }),
        )
        .await?;

        let source: SourceConfig = serde_json::from_value(serde_json::json!({
            "type": "postgres",
            "table": "orders",
            "connection": "warehouse"
        }))?;
        let resolved = registry.resolve(&source).await?;
        match resolved {
            SourceConfig::Postgres { db, .. } => {
                assert_eq!(db.host.as_deref(), Some("db.internal"));
                assert_eq!(db.port, Some(5433));
                assert_eq!(db.table.as_deref(), Some("orders"));
            }
            _ => anyhow::bail!("expected postgres source"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_rejects_type_mismatch() -> anyhow::Result<()> {
        let registry =
            registry_with_connection("warehouse", "mysql", serde_json::json!({})).await?;
        let source: SourceConfig = serde_json::from_value(serde_json::json!({
            "type": "postgres",
            "table": "orders",
            "connection": "warehouse"
        }))?;
        let err = registry.resolve(&source).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Domain(DomainError::ConnectionTypeMismatch { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_unknown_connection_is_not_found() -> anyhow::Result<()> {
        let registry =
            registry_with_connection("warehouse", "postgres", serde_json::json!({})).await?;
        let source: SourceConfig = serde_json::from_value(serde_json::json!({
            "type": "postgres",
            "table": "orders",
            "connection": "missing"
        }))?;
        let err = registry.resolve(&source).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Domain(DomainError::NotFound { .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_connection_type_probe_is_soft() -> anyhow::Result<()> {
        let registry =
            registry_with_connection("warehouse", "postgres", serde_json::json!({})).await?;
        let result = registry
            .test_connection("snowflake", &BTreeMap::new())
            .await;
        assert_eq!(result.status, "success");
        assert!(result.message.contains("no live test available"));
        Ok(())
    }
}
