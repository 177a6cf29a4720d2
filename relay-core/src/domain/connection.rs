// relay-core/src/domain/connection.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A reusable credential bundle. The credential map itself is never held
/// on this struct: it lives encrypted in the store and is only decrypted
/// at fetch time into a [`ResolvedConnection`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub connection_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_tested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_test_status: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A connection with its credentials decrypted, as handed to the
/// connector registry.
#[derive(Debug, Clone)]
pub struct ResolvedConnection {
    pub connection: Connection,
    pub credentials: BTreeMap<String, Value>,
}

/// Outcome of a liveness probe. Never an error: failures are data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    pub status: String,
    pub message: String,
}

impl ConnectionTestResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: "success".to_string(),
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: "failed".to_string(),
            message: message.into(),
        }
    }
}
