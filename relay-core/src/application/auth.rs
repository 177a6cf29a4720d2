// relay-core/src/application/auth.rs
//
// API keys: SHA-256 hashed secrets with a display prefix. The raw key
// leaves this module exactly once, at generation. Authentication
// resolves a raw key (or dev mode) into an AuthContext the service layer
// gates every operation on.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::domain::api_key::ApiKey;
use crate::domain::error::DomainError;
use crate::domain::role::{AuthContext, Role};
use crate::error::RelayError;
use crate::infrastructure::store::Store;

const KEY_PREFIX_LEN: usize = 12;

pub struct ApiKeyService {
    store: Arc<Store>,
    require_auth: bool,
}

impl ApiKeyService {
    pub fn new(store: Arc<Store>, require_auth: bool) -> Self {
        Self {
            store,
            require_auth,
        }
    }

    pub fn require_auth(&self) -> bool {
        self.require_auth
    }

    /// Generate a new key. Returns the raw secret (shown once) and the
    /// stored record.
    pub async fn generate(
        &self,
        name: &str,
        description: &str,
        role: Role,
    ) -> Result<(String, ApiKey), RelayError> {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let raw_key = format!("relay_{}", URL_SAFE_NO_PAD.encode(secret));

        let record = ApiKey {
            id: 0,
            key_hash: hash_key(&raw_key),
            key_prefix: raw_key.chars().take(KEY_PREFIX_LEN).collect(),
            name: name.to_string(),
            description: description.to_string(),
            role,
            active: true,
            created_at: Utc::now(),
        };
        let stored = self.store.insert_api_key(&record).await?;
        tracing::info!(name, prefix = %stored.key_prefix, role = %role, "generated API key");
        Ok((raw_key, stored))
    }

    /// Resolve a raw key into a caller identity. With auth disabled every
    /// request runs as dev mode (admin).
    pub async fn authenticate(&self, raw_key: Option<&str>) -> Result<AuthContext, RelayError> {
        if !self.require_auth {
            return Ok(AuthContext::dev_mode());
        }
        let raw_key = raw_key.ok_or(DomainError::Unauthorized)?;
        let record = self
            .store
            .get_api_key_by_hash(&hash_key(raw_key))
            .await?
            .ok_or_else(|| DomainError::Forbidden("Invalid or revoked API key.".to_string()))?;
        Ok(AuthContext {
            principal: record.name,
            role: record.role,
        })
    }
}

fn hash_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    async fn service(require_auth: bool) -> ApiKeyService {
        let store = Arc::new(Store::in_memory().await.unwrap());
        ApiKeyService::new(store, require_auth)
    }

    #[tokio::test]
    async fn test_only_hash_is_stored() -> anyhow::Result<()> {
        let svc = service(true).await;
        let (raw, stored) = svc.generate("ci", "", Role::Writer).await?;
        assert!(raw.starts_with("relay_"));
        assert_ne!(stored.key_hash, raw);
        assert_eq!(stored.key_hash, hash_key(&raw));
        assert_eq!(stored.key_prefix, &raw[..12]);
        Ok(())
    }

    #[tokio::test]
    async fn test_authenticate_round_trip_and_rejections() -> anyhow::Result<()> {
        let svc = service(true).await;
        let (raw, _) = svc.generate("ci", "", Role::Reader).await?;

        let ctx = svc.authenticate(Some(&raw)).await?;
        assert_eq!(ctx.role, Role::Reader);
        assert_eq!(ctx.principal, "ci");

        assert!(matches!(
            svc.authenticate(None).await.unwrap_err(),
            RelayError::Domain(DomainError::Unauthorized)
        ));
        assert!(matches!(
            svc.authenticate(Some("relay_bogus")).await.unwrap_err(),
            RelayError::Domain(DomainError::Forbidden(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_dev_mode_bypasses_auth() -> anyhow::Result<()> {
        let svc = service(false).await;
        let ctx = svc.authenticate(None).await?;
        assert_eq!(ctx.role, Role::Admin);
        assert_eq!(ctx.principal, "dev_mode");
        Ok(())
    }

    #[tokio::test]
    async fn test_deactivated_key_is_rejected() -> anyhow::Result<()> {
        let store = Arc::new(Store::in_memory().await?);
        let svc = ApiKeyService::new(store.clone(), true);
        let (raw, stored) = svc.generate("ci", "", Role::Admin).await?;
        store.deactivate_api_key(stored.id).await?;
        assert!(svc.authenticate(Some(&raw)).await.is_err());
        Ok(())
    }
}
