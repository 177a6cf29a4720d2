// relay-core/src/domain/metadata.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Semantic type inferred from a column's name and data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticType {
    Email,
    Phone,
    Datetime,
    Identifier,
    Name,
    Address,
    PostalCode,
    Currency,
    Percentage,
    Numeric,
    Boolean,
    Text,
}

impl SemanticType {
    pub fn as_str(self) -> &'static str {
        match self {
            SemanticType::Email => "email",
            SemanticType::Phone => "phone",
            SemanticType::Datetime => "datetime",
            SemanticType::Identifier => "identifier",
            SemanticType::Name => "name",
            SemanticType::Address => "address",
            SemanticType::PostalCode => "postal_code",
            SemanticType::Currency => "currency",
            SemanticType::Percentage => "percentage",
            SemanticType::Numeric => "numeric",
            SemanticType::Boolean => "boolean",
            SemanticType::Text => "text",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnProfile {
    pub name: String,
    /// Native Arrow type, e.g. `Int64` or `Utf8`.
    pub data_type: String,
    pub semantic_type: SemanticType,
    pub null_count: u64,
    pub null_percentage: f64,
    pub unique_values: u64,
    pub sample_values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    pub auto_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_meaning: Option<String>,
    pub needs_review: bool,
    pub human_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    // AI-generated enrichment, present only on unverified columns when a
    // model was available at generation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_business_meaning: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ai_use_cases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_quality_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_confidence: Option<f64>,
}

/// One metadata document per pipeline, overwritten on re-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub generated_at: DateTime<Utc>,
    pub row_count: u64,
    pub column_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,
    pub columns: Vec<ColumnProfile>,
    pub columns_needing_review: u64,
}

/// Human-verified column description, keyed by the normalized column name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnKnowledge {
    pub column_key: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_meaning: Option<String>,
    pub verified_by: String,
    pub verified_at: DateTime<Utc>,
}

/// A column waiting for a human description, surfaced by the review flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingReview {
    pub pipeline_id: String,
    pub pipeline_name: String,
    pub column: String,
    pub data_type: String,
    pub semantic_type: SemanticType,
    pub auto_description: String,
    pub sample_values: Vec<String>,
}
