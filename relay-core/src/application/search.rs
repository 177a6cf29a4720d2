// relay-core/src/application/search.rs
//
// Keyword dataset discovery: score pipelines against a free-text query
// using the name, the source config, and profiled column names. Also the
// join-suggestion heuristic between two datasets.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::pipeline::Pipeline;
use crate::error::RelayError;
use crate::infrastructure::store::Store;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetMatch {
    pub pipeline_id: String,
    pub name: String,
    pub confidence: f64,
    pub reason: String,
    pub source_type: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSuggestion {
    pub left_column: String,
    pub right_column: String,
    pub confidence: f64,
    pub reason: String,
}

pub struct DatasetSearch {
    store: Arc<Store>,
}

impl DatasetSearch {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<DatasetMatch>, RelayError> {
        let query_words = words(query);
        let mut scored = Vec::new();

        for pipeline in self.store.list_pipelines().await? {
            let metadata_columns: Vec<String> = self
                .store
                .get_metadata(&pipeline.id)
                .await?
                .map(|m| m.columns.into_iter().map(|c| c.name).collect())
                .unwrap_or_default();
            let (score, reason) = score_pipeline(&pipeline, &query_words, &metadata_columns);
            if score > 0.0 {
                scored.push(DatasetMatch {
                    pipeline_id: pipeline.id.clone(),
                    name: pipeline.name.clone(),
                    confidence: score,
                    reason,
                    source_type: pipeline
                        .source_type()
                        .unwrap_or("transformation")
                        .to_string(),
                    created_at: pipeline.created_at,
                });
            }
        }

        scored.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Column pairs worth joining on, between two datasets' metadata.
    pub async fn join_suggestions(
        &self,
        pipeline_id_1: &str,
        pipeline_id_2: &str,
    ) -> Result<Vec<JoinSuggestion>, RelayError> {
        let Some(metadata_1) = self.store.get_metadata(pipeline_id_1).await? else {
            return Ok(Vec::new());
        };
        let Some(metadata_2) = self.store.get_metadata(pipeline_id_2).await? else {
            return Ok(Vec::new());
        };

        let mut suggestions = Vec::new();
        for col1 in &metadata_1.columns {
            for col2 in &metadata_2.columns {
                let name1 = col1.name.to_lowercase();
                let name2 = col2.name.to_lowercase();
                let mut confidence: f64 = 0.0;
                let mut reasons: Vec<String> = Vec::new();

                if name1 == name2 {
                    confidence = 0.95;
                    reasons.push("Exact name match".to_string());
                } else if names_similar(&name1, &name2) {
                    confidence = 0.75;
                    reasons.push(format!("Name similarity: {name1} <-> {name2}"));
                }

                if col1.semantic_type == crate::domain::metadata::SemanticType::Identifier
                    && col2.semantic_type == crate::domain::metadata::SemanticType::Identifier
                {
                    confidence += 0.1;
                    reasons.push("Both are identifiers".to_string());
                }

                if confidence > 0.5 {
                    suggestions.push(JoinSuggestion {
                        left_column: col1.name.clone(),
                        right_column: col2.name.clone(),
                        confidence: confidence.min(1.0),
                        reason: reasons.join("; "),
                    });
                }
            }
        }

        suggestions.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(suggestions)
    }
}

fn words(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn score_pipeline(
    pipeline: &Pipeline,
    query_words: &HashSet<String>,
    metadata_columns: &[String],
) -> (f64, String) {
    let mut score = 0.0;
    let mut matched: Vec<String> = Vec::new();

    let name_words = words(&pipeline.name);
    let name_hits: Vec<_> = query_words.intersection(&name_words).cloned().collect();
    if !name_hits.is_empty() {
        score += 0.5 * name_hits.len() as f64;
        matched.extend(name_hits);
    }

    let source_text = pipeline
        .source
        .as_ref()
        .and_then(|s| serde_json::to_value(s).ok())
        .map(|v| source_text_fields(&v))
        .unwrap_or_default();
    let source_words = words(&source_text);
    let source_hits: Vec<_> = query_words.intersection(&source_words).cloned().collect();
    if !source_hits.is_empty() {
        score += 0.3 * source_hits.len() as f64;
        matched.extend(source_hits);
    }

    for column in metadata_columns {
        let column_lower = column.to_lowercase();
        if query_words.iter().any(|w| column_lower.contains(w)) {
            score += 0.1;
            matched.push(column.clone());
        }
    }

    let score = score.min(1.0);
    let reason = if matched.is_empty() {
        "Low relevance".to_string()
    } else {
        let unique: Vec<String> = dedupe_strings(matched);
        format!("Matched keywords: {}", unique.join(", "))
    };
    (score, reason)
}

fn source_text_fields(source: &Value) -> String {
    ["url", "query", "table"]
        .iter()
        .filter_map(|key| source.get(key).and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

fn dedupe_strings(values: Vec<String>) -> Vec<String> {
    let mut out = Vec::new();
    for value in values {
        if !out.contains(&value) {
            out.push(value);
        }
    }
    out
}

fn names_similar(name1: &str, name2: &str) -> bool {
    let clean1: String = name1.chars().filter(|c| c.is_alphanumeric()).collect();
    let clean2: String = name2.chars().filter(|c| c.is_alphanumeric()).collect();
    if clean1.is_empty() || clean2.is_empty() {
        return false;
    }
    if clean1.contains(&clean2) || clean2.contains(&clean1) {
        return true;
    }
    // id-suffix patterns: customer_id <-> id, userid <-> user_id
    name1.ends_with("id") && name2.ends_with("id")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pipeline::{
        PipelineKind, PipelineOptions, ScheduleConfig, SourceConfig,
    };
    use chrono::Utc;

    fn pipeline(name: &str, url: &str) -> Pipeline {
        Pipeline {
            id: format!("pipe-{name}"),
            name: name.into(),
            description: String::new(),
            kind: PipelineKind::Regular,
            status: "active".into(),
            source: Some(SourceConfig::CsvUrl {
                url: Some(url.into()),
                connection: None,
            }),
            destination: None,
            options: PipelineOptions::default(),
            schedule: ScheduleConfig::default(),
            transformation: None,
            last_scheduled_run: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_name_match_scores_highest() {
        let p = pipeline("Customer Orders", "http://x/data.csv");
        let (score, reason) = score_pipeline(&p, &words("customer revenue"), &[]);
        assert!(score >= 0.5);
        assert!(reason.contains("customer"));
    }

    #[test]
    fn test_column_hits_add_small_score() {
        let p = pipeline("Sales", "http://x/data.csv");
        let (score, _) = score_pipeline(&p, &words("segment"), &["segment".to_string()]);
        assert!((score - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_no_match_scores_zero() {
        let p = pipeline("Sales", "http://x/data.csv");
        let (score, _) = score_pipeline(&p, &words("weather"), &[]);
        assert_eq!(score, 0.0);
    }

    #[test]
    fn test_names_similar() {
        assert!(names_similar("customer_id", "customerid"));
        assert!(names_similar("user_id", "id"));
        assert!(!names_similar("amount", "segment"));
    }
}
