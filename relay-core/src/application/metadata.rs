// relay-core/src/application/metadata.rs
//
// Column profiling over a sample of the fetched data: native type,
// semantic type from name patterns, null fraction, unique counts, sample
// values, numeric stats. Columns with a verified entry in the knowledge
// base pick up the human description; everything else is flagged for
// review and, when a model is configured, enriched with AI descriptions
// before the document is persisted.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use datafusion::arrow::datatypes::DataType;
use datafusion::arrow::record_batch::RecordBatch;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::domain::metadata::{
    ColumnKnowledge, ColumnProfile, DatasetMetadata, PendingReview, SemanticType,
};
use crate::domain::naming::normalize_column_key;
use crate::domain::pipeline::Pipeline;
use crate::error::RelayError;
use crate::infrastructure::llm::{AnthropicClient, parse_json_response};
use crate::infrastructure::store::Store;
use crate::infrastructure::tabular;

const SAMPLE_ROWS: usize = 1000;
const SAMPLE_VALUES: usize = 5;

pub struct MetadataGenerator {
    store: Arc<Store>,
    llm: Option<Arc<AnthropicClient>>,
}

impl MetadataGenerator {
    pub fn new(store: Arc<Store>, llm: Option<Arc<AnthropicClient>>) -> Self {
        Self { store, llm }
    }

    /// Profile a sample, merge the knowledge base, optionally enrich the
    /// unverified columns with AI descriptions, persist the document.
    pub async fn generate_and_store(
        &self,
        sample: &[RecordBatch],
        total_rows: u64,
        pipeline: &Pipeline,
    ) -> Result<DatasetMetadata, RelayError> {
        let knowledge = self.store.column_knowledge().await?;
        let mut metadata = profile(sample, total_rows, pipeline, &knowledge)?;
        if let Some(llm) = &self.llm {
            self.ai_enhance(llm, &mut metadata).await;
        }
        self.store.upsert_metadata(&metadata).await?;
        Ok(metadata)
    }

    /// AI decorator over the columns still needing review. Verified
    /// descriptions are never touched, and any model failure (network,
    /// non-JSON response) leaves the document exactly as profiled.
    async fn ai_enhance(&self, llm: &AnthropicClient, metadata: &mut DatasetMetadata) {
        let prompt = {
            let pending: Vec<&ColumnProfile> =
                metadata.columns.iter().filter(|c| c.needs_review).collect();
            if pending.is_empty() {
                return;
            }
            build_enhancement_prompt(&metadata.pipeline_name, &pending)
        };

        match llm.complete(&prompt, 2048).await {
            Ok(response) => match parse_json_response(&response) {
                Some(parsed) => {
                    let applied = apply_enhancements(metadata, &parsed);
                    debug!(applied, "AI column enhancement applied");
                }
                None => warn!("AI enhancement response was not JSON, keeping auto descriptions"),
            },
            Err(e) => warn!(error = %e, "AI enhancement failed, keeping auto descriptions"),
        }
    }

    /// All unverified columns across every metadata document.
    pub async fn pending_reviews(&self) -> Result<Vec<PendingReview>, RelayError> {
        let mut pending = Vec::new();
        for metadata in self.store.list_metadata().await? {
            for column in &metadata.columns {
                if column.needs_review {
                    pending.push(PendingReview {
                        pipeline_id: metadata.pipeline_id.clone(),
                        pipeline_name: metadata.pipeline_name.clone(),
                        column: column.name.clone(),
                        data_type: column.data_type.clone(),
                        semantic_type: column.semantic_type,
                        auto_description: column.auto_description.clone(),
                        sample_values: column.sample_values.clone(),
                    });
                }
            }
        }
        Ok(pending)
    }

    /// Record a human-verified description; future generations pick it up
    /// and stop flagging the column.
    pub async fn approve_column(
        &self,
        column_name: &str,
        description: &str,
        business_meaning: Option<&str>,
        verified_by: &str,
    ) -> Result<ColumnKnowledge, RelayError> {
        let knowledge = ColumnKnowledge {
            column_key: normalize_column_key(column_name),
            description: description.to_string(),
            business_meaning: business_meaning.map(str::to_string),
            verified_by: verified_by.to_string(),
            verified_at: Utc::now(),
        };
        self.store.upsert_column_knowledge(&knowledge).await?;
        Ok(knowledge)
    }
}

/// Pure profiling over a sample. `total_rows` is the full dataset size
/// (the sample may be smaller).
pub fn profile(
    sample: &[RecordBatch],
    total_rows: u64,
    pipeline: &Pipeline,
    knowledge: &BTreeMap<String, ColumnKnowledge>,
) -> Result<DatasetMetadata, RelayError> {
    let sample = cap_sample(sample, SAMPLE_ROWS)?;
    let sample_rows = sample.num_rows() as u64;
    let schema = sample.schema();

    let mut columns = Vec::with_capacity(schema.fields().len());
    for (idx, field) in schema.fields().iter().enumerate() {
        let col = sample.column(idx);
        let strings = tabular::column_to_strings(col)?;
        let null_count = col.null_count() as u64;
        let null_percentage = if sample_rows > 0 {
            (null_count as f64 / sample_rows as f64 * 100.0 * 100.0).round() / 100.0
        } else {
            0.0
        };

        let unique_values = strings
            .iter()
            .flatten()
            .collect::<HashSet<_>>()
            .len() as u64;
        let sample_values: Vec<String> = strings
            .iter()
            .flatten()
            .take(SAMPLE_VALUES)
            .cloned()
            .collect();

        let (min, max, mean) = numeric_stats(tabular::column_to_floats(col)?);
        let semantic_type = infer_semantic_type(field.name(), field.data_type());
        let auto_description =
            auto_description(field.name(), &field.data_type().to_string(), semantic_type);

        let mut column = ColumnProfile {
            name: field.name().clone(),
            data_type: field.data_type().to_string(),
            semantic_type,
            null_count,
            null_percentage,
            unique_values,
            sample_values,
            min,
            max,
            mean,
            auto_description,
            description: None,
            business_meaning: None,
            needs_review: true,
            human_verified: false,
            verified_at: None,
            ai_description: None,
            ai_business_meaning: None,
            ai_use_cases: Vec::new(),
            ai_quality_notes: None,
            ai_confidence: None,
        };

        if let Some(verified) = knowledge.get(&normalize_column_key(field.name())) {
            column.description = Some(verified.description.clone());
            column.business_meaning = verified.business_meaning.clone();
            column.needs_review = false;
            column.human_verified = true;
            column.verified_at = Some(verified.verified_at);
        }

        columns.push(column);
    }

    let columns_needing_review = columns.iter().filter(|c| c.needs_review).count() as u64;
    Ok(DatasetMetadata {
        pipeline_id: pipeline.id.clone(),
        pipeline_name: pipeline.name.clone(),
        generated_at: Utc::now(),
        row_count: total_rows,
        column_count: columns.len() as u64,
        source_type: pipeline.source_type().map(str::to_string),
        columns,
        columns_needing_review,
    })
}

fn cap_sample(batches: &[RecordBatch], limit: usize) -> Result<RecordBatch, RelayError> {
    let combined = tabular::concat(batches)?;
    if combined.num_rows() > limit {
        Ok(combined.slice(0, limit))
    } else {
        Ok(combined)
    }
}

fn numeric_stats(values: Option<Vec<Option<f64>>>) -> (Option<f64>, Option<f64>, Option<f64>) {
    let Some(values) = values else {
        return (None, None, None);
    };
    let present: Vec<f64> = values.into_iter().flatten().filter(|v| !v.is_nan()).collect();
    if present.is_empty() {
        return (None, None, None);
    }
    let min = present.iter().copied().fold(f64::INFINITY, f64::min);
    let max = present.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mean = present.iter().sum::<f64>() / present.len() as f64;
    (Some(min), Some(max), Some(mean))
}

/// Name patterns first, then the data type.
pub fn infer_semantic_type(name: &str, data_type: &DataType) -> SemanticType {
    let lower = name.to_lowercase();
    if lower.contains("email") {
        SemanticType::Email
    } else if lower.contains("phone") || lower.contains("tel") {
        SemanticType::Phone
    } else if lower.contains("date") || lower.contains("time") {
        SemanticType::Datetime
    } else if lower.contains("id") {
        SemanticType::Identifier
    } else if lower.contains("name") {
        SemanticType::Name
    } else if lower.contains("address") || lower.contains("street") {
        SemanticType::Address
    } else if lower.contains("zip") || lower.contains("postal") {
        SemanticType::PostalCode
    } else if lower.contains("amount") || lower.contains("price") || lower.contains("cost") {
        SemanticType::Currency
    } else if lower.contains("percent") || lower.contains("rate") {
        SemanticType::Percentage
    } else if data_type.is_numeric() {
        SemanticType::Numeric
    } else if matches!(
        data_type,
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _)
    ) {
        SemanticType::Datetime
    } else if *data_type == DataType::Boolean {
        SemanticType::Boolean
    } else {
        SemanticType::Text
    }
}

/// Prompt for the column-enhancement decorator: the unverified columns
/// with their profile, asking for per-column descriptions keyed by name.
fn build_enhancement_prompt(context: &str, columns: &[&ColumnProfile]) -> String {
    let column_info: Vec<Value> = columns
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "type": c.data_type,
                "semantic_type": c.semantic_type,
                "sample_values": c.sample_values,
                "null_percentage": c.null_percentage,
                "unique_values": c.unique_values,
            })
        })
        .collect();

    format!(
        "Analyze this dataset and provide semantic descriptions for each column.\n\n\
         Dataset context: {context}\n\n\
         Columns to analyze:\n{}\n\n\
         For each column, provide:\n\
         1. description: clear, concise description of what this column contains\n\
         2. business_meaning: what this represents in business/domain terms\n\
         3. use_cases: common ways this data is used (2-3 examples)\n\
         4. quality_notes: any data quality observations (nulls, patterns, anomalies)\n\
         5. confidence: your confidence in this analysis (0.0-1.0)\n\n\
         Respond ONLY with valid JSON of the form:\n\
         {{\"column_name\": {{\"description\": \"...\", \"business_meaning\": \"...\", \
         \"use_cases\": [\"...\"], \"quality_notes\": \"...\", \"confidence\": 0.9}}}}\n\n\
         Be specific based on the sample values, not generic.",
        json!(column_info)
    )
}

/// Merge a parsed enhancement object (column name -> fields) into the
/// document. Only columns still needing review are touched. Returns how
/// many columns picked up AI fields.
fn apply_enhancements(metadata: &mut DatasetMetadata, parsed: &Value) -> usize {
    let Value::Object(by_column) = parsed else {
        return 0;
    };
    let mut applied = 0;
    for column in metadata.columns.iter_mut().filter(|c| c.needs_review) {
        let Some(Value::Object(fields)) = by_column.get(&column.name) else {
            continue;
        };
        column.ai_description = fields
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        column.ai_business_meaning = fields
            .get("business_meaning")
            .and_then(Value::as_str)
            .map(str::to_string);
        column.ai_use_cases = fields
            .get("use_cases")
            .and_then(Value::as_array)
            .map(|cases| {
                cases
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        column.ai_quality_notes = fields
            .get("quality_notes")
            .and_then(Value::as_str)
            .map(str::to_string);
        column.ai_confidence = Some(
            fields
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.7),
        );
        applied += 1;
    }
    applied
}

fn auto_description(name: &str, data_type: &str, semantic: SemanticType) -> String {
    let readable: String = name
        .replace(['_', '-'], " ")
        .split_whitespace()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ");

    match semantic {
        SemanticType::Email => format!("Email address - {readable}"),
        SemanticType::Phone => format!("Phone number - {readable}"),
        SemanticType::Identifier => format!("Unique identifier - {readable}"),
        SemanticType::Currency => format!("Monetary amount - {readable}"),
        SemanticType::Datetime => format!("Date/time value - {readable}"),
        _ => format!("{readable} ({data_type})"),
    }
}
