// relay-core/src/application/engine.rs
//
// The central orchestrator: load pipeline, append a running run, fetch,
// write, close the run. Every failure is caught at this boundary and
// recorded on the run row; nothing propagates to the caller, because
// runs are asynchronous.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use datafusion::arrow::record_batch::RecordBatch;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use crate::application::metadata::MetadataGenerator;
use crate::application::transform::TransformationEngine;
use crate::application::writer::{DestinationWriter, WriteReport};
use crate::domain::error::DomainError;
use crate::domain::pipeline::{
    Pipeline, PipelineKind, PipelineRun, RunStatus, RunUpdate, SourceConfig, StreamingMode,
};
use crate::error::RelayError;
use crate::infrastructure::connectors::{ChunkStream, ConnectorRegistry, DEFAULT_CHUNK_SIZE};
use crate::infrastructure::store::Store;
use crate::infrastructure::tabular;

/// Source kinds that stream by default under `streaming: auto`.
const AUTO_STREAMING_SOURCES: &[&str] = &["mysql", "postgres", "salesforce", "synthetic"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePreview {
    pub columns: Vec<String>,
    pub rows: u64,
    pub sample: Vec<Vec<String>>,
}

pub struct PipelineEngine {
    store: Arc<Store>,
    registry: Arc<ConnectorRegistry>,
    writer: Arc<DestinationWriter>,
    transformer: Arc<TransformationEngine>,
    metadata: Arc<MetadataGenerator>,
}

impl PipelineEngine {
    pub fn new(
        store: Arc<Store>,
        registry: Arc<ConnectorRegistry>,
        writer: Arc<DestinationWriter>,
        transformer: Arc<TransformationEngine>,
        metadata: Arc<MetadataGenerator>,
    ) -> Self {
        Self {
            store,
            registry,
            writer,
            transformer,
            metadata,
        }
    }

    /// Execute one run to completion. Infallible by contract: failures
    /// land on the run row, not on the caller.
    #[instrument(skip(self))]
    pub async fn execute(&self, pipeline_id: &str, run_id: &str) {
        let pipeline = match self.store.get_pipeline(pipeline_id).await {
            Ok(Some(pipeline)) => pipeline,
            Ok(None) => {
                warn!(pipeline_id, "run requested for unknown pipeline");
                return;
            }
            Err(e) => {
                error!(pipeline_id, error = %e, "could not load pipeline for run");
                return;
            }
        };

        let streaming = use_streaming(&pipeline);
        let run = PipelineRun::started(run_id, pipeline_id, streaming);
        if let Err(e) = self.store.insert_run(&run).await {
            error!(run_id, error = %e, "could not record run start");
            return;
        }

        match self.try_execute(&pipeline, run_id, streaming, run.started_at).await {
            Ok(()) => info!(run_id, "run finished"),
            Err(e) => {
                error!(run_id, error = %e, "run failed");
                let failure = RunUpdate {
                    status: Some(RunStatus::Failed),
                    completed_at: Some(Utc::now()),
                    progress: Some(format!("Failed: {e}")),
                    error: Some(e.to_string()),
                    trace: Some(format!("{e:?}")),
                    ..RunUpdate::default()
                };
                if let Err(update_err) = self.store.update_run(run_id, failure).await {
                    error!(run_id, error = %update_err, "could not record run failure");
                }
            }
        }
    }

    async fn try_execute(
        &self,
        pipeline: &Pipeline,
        run_id: &str,
        streaming: bool,
        started: chrono::DateTime<Utc>,
    ) -> Result<(), RelayError> {
        let (report, sample) = match pipeline.kind {
            PipelineKind::Transformation => self.run_transformation(pipeline, run_id).await?,
            PipelineKind::Regular if streaming => self.run_streaming(pipeline, run_id).await?,
            PipelineKind::Regular => self.run_whole(pipeline, run_id).await?,
        };

        // Metadata generation happens before the terminal write (a run is
        // immutable once terminal) and never fails the run.
        let mut metadata_generated = false;
        let mut columns_needing_review = None;
        if pipeline.options.generate_metadata && !sample.is_empty() {
            match self
                .metadata
                .generate_and_store(&sample, report.total_rows, pipeline)
                .await
            {
                Ok(metadata) => {
                    metadata_generated = true;
                    columns_needing_review = Some(metadata.columns_needing_review);
                }
                Err(e) => warn!(run_id, error = %e, "metadata generation failed"),
            }
        }

        let completed = Utc::now();
        let duration = (completed - started).num_milliseconds() as f64 / 1000.0;
        self.store
            .update_run(
                run_id,
                RunUpdate {
                    status: Some(RunStatus::Success),
                    completed_at: Some(completed),
                    progress: Some("Complete".to_string()),
                    rows_processed: Some(report.total_rows),
                    chunks_processed: Some(report.total_chunks),
                    output_file: report.primary_file.clone(),
                    files_written: Some(report.files_written.clone()),
                    duration_seconds: Some(duration),
                    metadata_generated: Some(metadata_generated),
                    columns_needing_review,
                    ..RunUpdate::default()
                },
            )
            .await?;

        Ok(())
    }

    async fn run_whole(
        &self,
        pipeline: &Pipeline,
        run_id: &str,
    ) -> Result<(WriteReport, Vec<RecordBatch>), RelayError> {
        let source = required_source(pipeline)?;
        let destination = required_destination(pipeline)?;

        self.progress(run_id, "Fetching source data...").await;
        let batches = self.registry.fetch(source).await?;
        let rows = tabular::total_rows(&batches);

        self.progress(run_id, &format!("Writing {rows} rows to destination..."))
            .await;
        let report = self
            .writer
            .write_table(batches.clone(), destination, &pipeline.options)
            .await?;
        Ok((report, batches))
    }

    async fn run_streaming(
        &self,
        pipeline: &Pipeline,
        run_id: &str,
    ) -> Result<(WriteReport, Vec<RecordBatch>), RelayError> {
        let source = required_source(pipeline)?;
        let destination = required_destination(pipeline)?;

        self.progress(run_id, "Starting streaming pipeline...").await;
        let chunks = self
            .registry
            .fetch_streaming(source, DEFAULT_CHUNK_SIZE)
            .await?;
        let (chunks, sample) = capture_first_chunk(chunks);

        self.progress(run_id, "Streaming data...").await;
        let report = if pipeline.options.parallel {
            self.writer
                .write_stream_parallel(chunks, destination, &pipeline.options)
                .await?
        } else {
            self.writer
                .write_stream(chunks, destination, &pipeline.options)
                .await?
        };

        let sample = sample
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .into_iter()
            .collect();
        Ok((report, sample))
    }

    async fn run_transformation(
        &self,
        pipeline: &Pipeline,
        run_id: &str,
    ) -> Result<(WriteReport, Vec<RecordBatch>), RelayError> {
        let config = pipeline.transformation.as_ref().ok_or_else(|| {
            DomainError::Validation(format!(
                "Pipeline '{}' has no transformation config",
                pipeline.id
            ))
        })?;
        let destination = required_destination(pipeline)?;

        self.progress(run_id, "Executing transformation...").await;
        let batches = self.transformer.execute(config).await?;
        let rows = tabular::total_rows(&batches);

        self.progress(run_id, &format!("Writing {rows} rows to destination..."))
            .await;
        let report = self
            .writer
            .write_table(batches.clone(), destination, &pipeline.options)
            .await?;
        Ok((report, batches))
    }

    async fn progress(&self, run_id: &str, message: &str) {
        let update = RunUpdate {
            progress: Some(message.to_string()),
            ..RunUpdate::default()
        };
        if let Err(e) = self.store.update_run(run_id, update).await {
            warn!(run_id, error = %e, "could not update run progress");
        }
    }

    /// Read-only preview of a URL-backed source: fetch, report columns,
    /// row count, and the first three rows as strings.
    pub async fn test_source(
        &self,
        source_type: &str,
        url: &str,
    ) -> Result<SourcePreview, RelayError> {
        let source = match source_type {
            "csv_url" => SourceConfig::CsvUrl {
                url: Some(url.to_string()),
                connection: None,
            },
            "json_url" => SourceConfig::JsonUrl {
                url: Some(url.to_string()),
                connection: None,
            },
            other => {
                return Err(DomainError::Validation(format!(
                    "Source test supports csv_url and json_url, got '{other}'"
                ))
                .into());
            }
        };

        let batches = self.registry.fetch(&source).await?;
        let rows = tabular::total_rows(&batches);
        let combined = tabular::concat(&batches)?;
        let preview = combined.slice(0, combined.num_rows().min(3));

        let schema = preview.schema();
        let columns: Vec<String> = schema.fields().iter().map(|f| f.name().clone()).collect();
        let mut cells: Vec<Vec<Option<String>>> = Vec::new();
        for col in preview.columns() {
            cells.push(tabular::column_to_strings(col)?);
        }
        let sample = (0..preview.num_rows())
            .map(|row| {
                cells
                    .iter()
                    .map(|col| col[row].clone().unwrap_or_default())
                    .collect()
            })
            .collect();

        Ok(SourcePreview {
            columns,
            rows,
            sample,
        })
    }
}

/// Streaming decision: explicit wins, `auto` streams for database-backed
/// and generated sources.
pub fn use_streaming(pipeline: &Pipeline) -> bool {
    match pipeline.options.streaming {
        StreamingMode::On => true,
        StreamingMode::Off => false,
        StreamingMode::Auto => pipeline
            .source_type()
            .is_some_and(|ty| AUTO_STREAMING_SOURCES.contains(&ty)),
    }
}

fn required_source(pipeline: &Pipeline) -> Result<&SourceConfig, RelayError> {
    pipeline.source.as_ref().ok_or_else(|| {
        DomainError::Validation(format!("Pipeline '{}' has no source", pipeline.id)).into()
    })
}

fn required_destination(
    pipeline: &Pipeline,
) -> Result<&crate::domain::pipeline::Destination, RelayError> {
    pipeline.destination.as_ref().ok_or_else(|| {
        DomainError::Validation(format!("Pipeline '{}' has no destination", pipeline.id)).into()
    })
}

/// Tee the first chunk out of a stream so metadata generation has a
/// sample without buffering the whole table.
fn capture_first_chunk(
    chunks: ChunkStream,
) -> (ChunkStream, Arc<Mutex<Option<RecordBatch>>>) {
    let slot: Arc<Mutex<Option<RecordBatch>>> = Arc::new(Mutex::new(None));
    let writer_slot = slot.clone();
    let tapped = chunks.inspect(move |item| {
        if let Ok(batch) = item {
            if let Ok(mut guard) = writer_slot.lock() {
                if guard.is_none() {
                    *guard = Some(batch.clone());
                }
            }
        }
    });
    (Box::pin(tapped), slot)
}
