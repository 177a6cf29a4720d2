// relay-core/src/domain/api_key.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::role::Role;

/// Stored API key. Only the SHA-256 hash of the secret is persisted; the
/// raw key is returned exactly once at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: i64,
    #[serde(skip_serializing)]
    pub key_hash: String,
    /// First 12 chars of the raw key, for display.
    pub key_prefix: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub role: Role,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
