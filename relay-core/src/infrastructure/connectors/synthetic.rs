// relay-core/src/infrastructure/connectors/synthetic.rs
//
// Schema-driven test data generator. The generator grammar:
// `uuid`, `email`, `first_name`, `last_name`, `date`, `currency`,
// `boolean`, `country`, `integer:min:max`, `string:length`; anything
// else produces sequential `value_N` placeholders (N keeps counting
// across streamed chunks).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use datafusion::arrow::array::{
    ArrayRef, BooleanArray, Date32Array, Float64Array, Int64Array, StringArray,
};
use datafusion::arrow::datatypes::{DataType, Field, Schema};
use datafusion::arrow::record_batch::RecordBatch;
use rand::seq::SliceRandom;
use rand::{Rng, thread_rng};

use super::{ChunkStream, SourceConnector};
use crate::domain::pipeline::SourceConfig;
use crate::error::RelayError;
use crate::infrastructure::error::InfrastructureError;

const FIRST_NAMES: &[&str] = &[
    "James", "Mary", "John", "Patricia", "Robert", "Jennifer", "Michael", "Linda", "William",
    "Barbara", "David", "Elizabeth",
];
const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Williams", "Brown", "Jones", "Garcia", "Miller", "Davis", "Rodriguez",
    "Martinez",
];
const COUNTRIES: &[&str] = &[
    "USA", "UK", "Canada", "Australia", "Germany", "France", "Spain", "Italy", "Brazil", "Mexico",
    "Japan", "India",
];

pub struct SyntheticConnector;

#[async_trait]
impl SourceConnector for SyntheticConnector {
    fn source_type(&self) -> &'static str {
        "synthetic"
    }

    async fn fetch(&self, source: &SourceConfig) -> Result<Vec<RecordBatch>, RelayError> {
        let SourceConfig::Synthetic { schema, row_count } = source else {
            return Err(RelayError::Internal("synthetic connector got wrong config".into()));
        };
        Ok(vec![generate_chunk(schema, 0, *row_count)?])
    }

    async fn fetch_streaming(
        &self,
        source: &SourceConfig,
        chunk_size: usize,
    ) -> Result<ChunkStream, RelayError> {
        let SourceConfig::Synthetic { schema, row_count } = source else {
            return Err(RelayError::Internal("synthetic connector got wrong config".into()));
        };
        let schema = schema.clone();
        let total = *row_count;

        let stream = futures::stream::unfold(0usize, move |generated| {
            let schema = schema.clone();
            async move {
                if generated >= total {
                    return None;
                }
                let count = chunk_size.min(total - generated);
                let batch = generate_chunk(&schema, generated, count);
                Some((batch, generated + count))
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Generate one batch; `start` keeps sequential placeholders monotonic
/// across chunks.
fn generate_chunk(
    schema: &BTreeMap<String, String>,
    start: usize,
    count: usize,
) -> Result<RecordBatch, RelayError> {
    let mut fields = Vec::with_capacity(schema.len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.len());

    for (column, spec) in schema {
        let array = generate_column(spec, start, count)?;
        fields.push(Field::new(column, array.data_type().clone(), true));
        arrays.push(array);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .map_err(|e| RelayError::Internal(format!("Failed to assemble synthetic batch: {e}")))
}

fn generate_column(spec: &str, start: usize, count: usize) -> Result<ArrayRef, RelayError> {
    let mut rng = thread_rng();

    let array: ArrayRef = match spec {
        "uuid" => Arc::new(StringArray::from_iter_values(
            (0..count).map(|_| uuid::Uuid::new_v4().to_string()),
        )),
        "email" => Arc::new(StringArray::from_iter_values((0..count).map(|_| {
            let first = pick(&mut rng, FIRST_NAMES).to_lowercase();
            let last = pick(&mut rng, LAST_NAMES).to_lowercase();
            format!("{first}.{last}@example.com")
        }))),
        "first_name" => Arc::new(StringArray::from_iter_values(
            (0..count).map(|_| pick(&mut rng, FIRST_NAMES).to_string()),
        )),
        "last_name" => Arc::new(StringArray::from_iter_values(
            (0..count).map(|_| pick(&mut rng, LAST_NAMES).to_string()),
        )),
        "country" => Arc::new(StringArray::from_iter_values(
            (0..count).map(|_| pick(&mut rng, COUNTRIES).to_string()),
        )),
        "date" => {
            let today = Utc::now().date_naive();
            let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
                .ok_or_else(|| RelayError::Internal("epoch construction failed".into()))?;
            Arc::new(Date32Array::from_iter_values((0..count).map(|_| {
                let day = today - ChronoDuration::days(rng.gen_range(0..365 * 5));
                (day - epoch).num_days() as i32
            })))
        }
        "currency" => Arc::new(Float64Array::from_iter_values(
            (0..count).map(|_| (rng.gen_range(10.0..10_000.0) * 100.0_f64).round() / 100.0),
        )),
        "boolean" => Arc::new(BooleanArray::from_iter(
            (0..count).map(|_| Some(rng.r#gen::<bool>())),
        )),
        other => {
            if let Some(range) = other.strip_prefix("integer:") {
                let mut parts = range.splitn(2, ':');
                let lo: i64 = parse_bound(parts.next(), 0, other)?;
                let hi: i64 = parse_bound(parts.next(), 100, other)?;
                if lo > hi {
                    return Err(InfrastructureError::Source(format!(
                        "integer generator has empty range: {other}"
                    ))
                    .into());
                }
                Arc::new(Int64Array::from_iter_values(
                    (0..count).map(|_| rng.gen_range(lo..=hi)),
                ))
            } else if let Some(len) = other.strip_prefix("string:") {
                let length: usize = parse_bound(Some(len), 10, other)?;
                Arc::new(StringArray::from_iter_values((0..count).map(|_| {
                    (0..length)
                        .map(|_| rng.gen_range(b'a'..=b'z') as char)
                        .collect::<String>()
                })))
            } else {
                Arc::new(StringArray::from_iter_values(
                    (0..count).map(|i| format!("value_{}", start + i)),
                ))
            }
        }
    };
    Ok(array)
}

fn pick<'a>(rng: &mut impl Rng, values: &'a [&'a str]) -> &'a str {
    values.choose(rng).copied().unwrap_or("")
}

fn parse_bound<T: std::str::FromStr>(
    raw: Option<&str>,
    default: T,
    spec: &str,
) -> Result<T, RelayError> {
    match raw {
        None | Some("") => Ok(default),
        Some(s) => s.parse().map_err(|_| {
            InfrastructureError::Source(format!("Bad generator bound in '{spec}'")).into()
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::infrastructure::tabular;
    use futures::StreamExt;

    fn schema(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_fetch_generates_requested_rows() -> anyhow::Result<()> {
        let source: SourceConfig = serde_json::from_value(serde_json::json!({
            "type": "synthetic",
            "schema": {"id": "integer:1:1000", "amount": "currency", "active": "boolean"},
            "row_count": 200
        }))?;
        let batches = SyntheticConnector.fetch(&source).await?;
        assert_eq!(tabular::total_rows(&batches), 200);

        let batch = &batches[0];
        let idx = batch.schema().index_of("id")?;
        let ids = batch
            .column(idx)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert!(ids.iter().flatten().all(|v| (1..=1000).contains(&v)));
        Ok(())
    }

    #[tokio::test]
    async fn test_streaming_chunks_cover_total() -> anyhow::Result<()> {
        let source: SourceConfig = serde_json::from_value(serde_json::json!({
            "type": "synthetic",
            "schema": {"name": "first_name"},
            "row_count": 25
        }))?;
        let mut stream = SyntheticConnector.fetch_streaming(&source, 10).await?;
        let mut total = 0;
        let mut chunks = 0;
        while let Some(batch) = stream.next().await {
            total += batch?.num_rows();
            chunks += 1;
        }
        assert_eq!(total, 25);
        assert_eq!(chunks, 3);
        Ok(())
    }

    #[test]
    fn test_sequential_placeholders_continue_across_chunks() -> anyhow::Result<()> {
        let schema = schema(&[("tag", "whatever")]);
        let second = generate_chunk(&schema, 10, 5)?;
        let values = second
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(values.value(0), "value_10");
        assert_eq!(values.value(4), "value_14");
        Ok(())
    }

    #[test]
    fn test_bad_integer_range_is_an_error() {
        let schema = schema(&[("n", "integer:9:1")]);
        assert!(generate_chunk(&schema, 0, 3).is_err());
    }
}
