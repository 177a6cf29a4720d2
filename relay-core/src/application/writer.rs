// relay-core/src/application/writer.rs
//
// Destination writer: one tabular result or a chunk stream becomes
// parquet/csv/json artifacts in the blob store. Three modes: whole
// object, sequential chunks, parallel chunks with a bounded worker pool.

use std::sync::Arc;

use chrono::Utc;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::config::TableParquetOptions;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::prelude::SessionContext;
use futures::{StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::pipeline::{Compression, Destination, OutputFormat, PipelineOptions};
use crate::error::RelayError;
use crate::infrastructure::blob::BlobStore;
use crate::infrastructure::connectors::ChunkStream;
use crate::infrastructure::tabular;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteReport {
    pub total_rows: u64,
    pub total_chunks: u64,
    pub files_written: Vec<String>,
    pub primary_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers_used: Option<usize>,
}

pub struct DestinationWriter {
    blob: Arc<BlobStore>,
}

impl DestinationWriter {
    pub fn new(blob: Arc<BlobStore>) -> Self {
        Self { blob }
    }

    /// Whole-object write: a single timestamped file.
    pub async fn write_table(
        &self,
        batches: Vec<RecordBatch>,
        destination: &Destination,
        options: &PipelineOptions,
    ) -> Result<WriteReport, RelayError> {
        let stamp = timestamp();
        let key = object_key(&destination.path, &stamp, options);
        let (uri, rows) = self
            .write_file(batches, &destination.bucket, &key, options)
            .await?;
        info!(uri = %uri, rows, "wrote destination object");
        Ok(WriteReport {
            total_rows: rows,
            total_chunks: 0,
            files_written: vec![uri.clone()],
            primary_file: Some(uri),
            workers_used: None,
        })
    }

    /// Sequential chunked write: each chunk becomes a numbered file, or
    /// one combined file when `combine_chunks` is set.
    pub async fn write_stream(
        &self,
        mut chunks: ChunkStream,
        destination: &Destination,
        options: &PipelineOptions,
    ) -> Result<WriteReport, RelayError> {
        let stamp = timestamp();

        if options.combine_chunks {
            let mut collected = Vec::new();
            while let Some(chunk) = chunks.next().await {
                collected.push(chunk?);
            }
            let chunk_count = collected.len() as u64;
            let combined = tabular::concat(&collected)?;
            let key = object_key(&destination.path, &stamp, options);
            let (uri, rows) = self
                .write_file(vec![combined], &destination.bucket, &key, options)
                .await?;
            return Ok(WriteReport {
                total_rows: rows,
                total_chunks: chunk_count,
                files_written: vec![uri.clone()],
                primary_file: Some(uri),
                workers_used: None,
            });
        }

        let mut files_written = Vec::new();
        let mut total_rows = 0u64;
        let mut index = 0u64;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let key = chunk_key(&destination.path, &stamp, index, options);
            let (uri, rows) = self
                .write_file(vec![chunk], &destination.bucket, &key, options)
                .await?;
            files_written.push(uri);
            total_rows += rows;
            index += 1;
        }

        Ok(WriteReport {
            total_rows,
            total_chunks: index,
            primary_file: files_written.first().cloned(),
            files_written,
            workers_used: None,
        })
    }

    /// Parallel chunked write. Worker count scales with chunk count; a
    /// single chunk failure aborts the whole run. `files_written` comes
    /// back in chunk order regardless of completion order.
    pub async fn write_stream_parallel(
        &self,
        mut chunks: ChunkStream,
        destination: &Destination,
        options: &PipelineOptions,
    ) -> Result<WriteReport, RelayError> {
        let mut collected = Vec::new();
        while let Some(chunk) = chunks.next().await {
            collected.push(chunk?);
        }

        if options.combine_chunks {
            return self
                .write_stream(
                    Box::pin(futures::stream::iter(
                        collected.into_iter().map(Ok::<_, RelayError>),
                    )),
                    destination,
                    options,
                )
                .await;
        }

        let total_chunks = collected.len();
        let workers = scale_workers(total_chunks);
        let stamp = timestamp();
        debug!(total_chunks, workers, "starting parallel chunk write");

        let mut results: Vec<(u64, String, u64)> = futures::stream::iter(
            collected.into_iter().enumerate().map(|(index, chunk)| {
                let key = chunk_key(&destination.path, &stamp, index as u64, options);
                let bucket = destination.bucket.clone();
                async move {
                    let (uri, rows) = self.write_file(vec![chunk], &bucket, &key, options).await?;
                    Ok::<_, RelayError>((index as u64, uri, rows))
                }
            }),
        )
        .buffer_unordered(workers)
        .try_collect()
        .await?;

        results.sort_by_key(|(index, _, _)| *index);
        let total_rows = results.iter().map(|(_, _, rows)| rows).sum();
        let files_written: Vec<String> = results.into_iter().map(|(_, uri, _)| uri).collect();

        Ok(WriteReport {
            total_rows,
            total_chunks: total_chunks as u64,
            primary_file: files_written.first().cloned(),
            files_written,
            workers_used: Some(workers),
        })
    }

    /// Write one file in the configured format and return (uri, rows).
    async fn write_file(
        &self,
        batches: Vec<RecordBatch>,
        bucket: &str,
        key: &str,
        options: &PipelineOptions,
    ) -> Result<(String, u64), RelayError> {
        let rows = tabular::total_rows(&batches);
        let uri = match options.format {
            OutputFormat::Parquet => {
                let uri = self.blob.uri_for(bucket, key)?;
                self.write_parquet(batches, &uri, options.compression).await?;
                uri
            }
            OutputFormat::Csv => {
                let bytes = maybe_gzip(encode_csv(&batches)?, options.compression)?;
                self.blob.put_bytes(bucket, key, bytes).await?
            }
            OutputFormat::Json => {
                let bytes = maybe_gzip(encode_json(&batches)?, options.compression)?;
                self.blob.put_bytes(bucket, key, bytes).await?
            }
        };
        Ok((uri, rows))
    }

    async fn write_parquet(
        &self,
        batches: Vec<RecordBatch>,
        uri: &str,
        compression: Compression,
    ) -> Result<(), RelayError> {
        let ctx = SessionContext::new();
        self.blob.register_for_uri(&ctx, uri)?;
        self.blob.prepare_local_parent(uri).await?;

        let mut parquet_options = TableParquetOptions::default();
        parquet_options.global.compression = Some(
            match compression {
                Compression::Snappy => "snappy",
                Compression::Gzip => "gzip(6)",
                Compression::None => "uncompressed",
            }
            .to_string(),
        );

        let df = ctx.read_batches(batches)?;
        df.write_parquet(uri, DataFrameWriteOptions::new(), Some(parquet_options))
            .await?;
        Ok(())
    }
}

/// Worker count auto-scaled by chunk count.
pub fn scale_workers(chunk_count: usize) -> usize {
    match chunk_count {
        0..=10 => 2,
        11..=100 => 5,
        101..=1000 => 10,
        _ => 20,
    }
}

fn timestamp() -> String {
    Utc::now().format("%Y-%m-%d-%H%M%S").to_string()
}

fn extension(options: &PipelineOptions) -> String {
    let base = match options.format {
        OutputFormat::Parquet => "parquet",
        OutputFormat::Csv => "csv",
        OutputFormat::Json => "json",
    };
    // gzip is an outer envelope for text formats; parquet compresses
    // internally and snappy applies to parquet only.
    if options.format != OutputFormat::Parquet && options.compression == Compression::Gzip {
        format!("{base}.gz")
    } else {
        base.to_string()
    }
}

fn object_key(path: &str, stamp: &str, options: &PipelineOptions) -> String {
    format!(
        "{}/{stamp}.{}",
        path.trim_end_matches('/'),
        extension(options)
    )
}

fn chunk_key(path: &str, stamp: &str, index: u64, options: &PipelineOptions) -> String {
    format!(
        "{}/{stamp}_chunk_{index:06}.{}",
        path.trim_end_matches('/'),
        extension(options)
    )
}

fn encode_csv(batches: &[RecordBatch]) -> Result<Vec<u8>, RelayError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut wrote_header = false;

    for batch in batches {
        if !wrote_header {
            let schema = batch.schema();
            let names: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
            writer
                .write_record(&names)
                .map_err(|e| RelayError::Internal(format!("CSV encode failed: {e}")))?;
            wrote_header = true;
        }
        let mut columns = Vec::with_capacity(batch.num_columns());
        for col in batch.columns() {
            columns.push(tabular::column_to_strings(col)?);
        }
        for row in 0..batch.num_rows() {
            let record: Vec<String> = columns
                .iter()
                .map(|col| col[row].clone().unwrap_or_default())
                .collect();
            writer
                .write_record(&record)
                .map_err(|e| RelayError::Internal(format!("CSV encode failed: {e}")))?;
        }
    }

    writer
        .into_inner()
        .map_err(|e| RelayError::Internal(format!("CSV encode failed: {e}")))
}

fn encode_json(batches: &[RecordBatch]) -> Result<Vec<u8>, RelayError> {
    let rows = tabular::batches_to_json_rows(batches)?;
    Ok(serde_json::to_vec(&rows)?)
}

fn maybe_gzip(bytes: Vec<u8>, compression: Compression) -> Result<Vec<u8>, RelayError> {
    if compression != Compression::Gzip {
        return Ok(bytes);
    }
    use std::io::Write;
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(&bytes)?;
    Ok(encoder.finish()?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_scaling_table() {
        assert_eq!(scale_workers(1), 2);
        assert_eq!(scale_workers(10), 2);
        assert_eq!(scale_workers(11), 5);
        assert_eq!(scale_workers(100), 5);
        assert_eq!(scale_workers(101), 10);
        assert_eq!(scale_workers(1000), 10);
        assert_eq!(scale_workers(5000), 20);
    }

    #[test]
    fn test_object_key_extensions() {
        let mut options = PipelineOptions::default();
        assert_eq!(
            object_key("exports/", "2024-01-01-000000", &options),
            "exports/2024-01-01-000000.parquet"
        );
        options.format = OutputFormat::Csv;
        options.compression = Compression::Gzip;
        assert_eq!(
            chunk_key("exports", "2024-01-01-000000", 3, &options),
            "exports/2024-01-01-000000_chunk_000003.csv.gz"
        );
        // parquet never takes the .gz suffix
        options.format = OutputFormat::Parquet;
        assert_eq!(
            object_key("exports", "2024-01-01-000000", &options),
            "exports/2024-01-01-000000.parquet"
        );
    }

    #[test]
    fn test_encode_csv_quotes_and_nulls() -> anyhow::Result<()> {
        let rows = vec![
            [
                ("name".to_string(), serde_json::json!("a,b")),
                ("n".to_string(), serde_json::json!(1)),
            ]
            .into_iter()
            .collect(),
            [
                ("name".to_string(), serde_json::Value::Null),
                ("n".to_string(), serde_json::json!(2)),
            ]
            .into_iter()
            .collect(),
        ];
        let batch = tabular::rows_to_batch(&rows)?;
        let encoded = String::from_utf8(encode_csv(&[batch])?)?;
        assert!(encoded.starts_with("name,n\n"));
        assert!(encoded.contains("\"a,b\",1"));
        assert!(encoded.contains(",2"));
        Ok(())
    }
}
