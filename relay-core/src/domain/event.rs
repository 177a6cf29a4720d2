// relay-core/src/domain/event.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Append-only analytics record. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformEvent {
    pub id: i64,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub details: Value,
    pub created_at: DateTime<Utc>,
}

/// Event counts grouped by type plus the most recent events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    pub counts_by_type: std::collections::BTreeMap<String, u64>,
    pub total_events: u64,
    pub recent_events: Vec<PlatformEvent>,
}
