// relay-core/src/infrastructure/store/pipelines.rs

use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::{Store, enum_to_str, get_json, get_opt_json, get_opt_ts, get_ts, to_json};
use crate::domain::error::DomainError;
use crate::domain::pipeline::{Pipeline, PipelineRun, RunStatus, RunUpdate};
use crate::error::RelayError;

fn pipeline_from_row(row: &SqliteRow) -> Result<Pipeline, RelayError> {
    Ok(Pipeline {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        kind: super::enum_from_str(&row.try_get::<String, _>("kind")?)?,
        status: row.try_get("status")?,
        source: get_opt_json(row, "source_json")?,
        destination: get_opt_json(row, "destination_json")?,
        options: get_json(row, "options_json")?,
        schedule: get_json(row, "schedule_json")?,
        transformation: get_opt_json(row, "transformation_json")?,
        last_scheduled_run: get_opt_ts(row, "last_scheduled_run")?,
        created_at: get_ts(row, "created_at")?,
    })
}

fn run_from_row(row: &SqliteRow) -> Result<PipelineRun, RelayError> {
    Ok(PipelineRun {
        run_id: row.try_get("run_id")?,
        pipeline_id: row.try_get("pipeline_id")?,
        status: super::enum_from_str(&row.try_get::<String, _>("status")?)?,
        started_at: get_ts(row, "started_at")?,
        completed_at: get_opt_ts(row, "completed_at")?,
        progress: row.try_get("progress")?,
        streaming: row.try_get("streaming")?,
        rows_processed: row.try_get::<Option<i64>, _>("rows_processed")?.map(|v| v as u64),
        chunks_processed: row
            .try_get::<Option<i64>, _>("chunks_processed")?
            .map(|v| v as u64),
        output_file: row.try_get("output_file")?,
        files_written: get_json(row, "files_written_json")?,
        duration_seconds: row.try_get("duration_seconds")?,
        error: row.try_get("error")?,
        trace: row.try_get("trace")?,
        metadata_generated: row.try_get("metadata_generated")?,
        columns_needing_review: row
            .try_get::<Option<i64>, _>("columns_needing_review")?
            .map(|v| v as u64),
    })
}

impl Store {
    pub async fn save_pipeline(&self, pipeline: &Pipeline) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO pipelines
             (id, name, description, kind, status, source_json, destination_json,
              options_json, schedule_json, transformation_json, last_scheduled_run, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&pipeline.id)
        .bind(&pipeline.name)
        .bind(&pipeline.description)
        .bind(enum_to_str(&pipeline.kind)?)
        .bind(&pipeline.status)
        .bind(pipeline.source.as_ref().map(to_json).transpose()?)
        .bind(pipeline.destination.as_ref().map(to_json).transpose()?)
        .bind(to_json(&pipeline.options)?)
        .bind(to_json(&pipeline.schedule)?)
        .bind(pipeline.transformation.as_ref().map(to_json).transpose()?)
        .bind(pipeline.last_scheduled_run.map(|t| t.to_rfc3339()))
        .bind(pipeline.created_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_pipeline(&self, id: &str) -> Result<Option<Pipeline>, RelayError> {
        let row = sqlx::query("SELECT * FROM pipelines WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(pipeline_from_row).transpose()
    }

    /// Like [`get_pipeline`] but failing with NotFound instead of None.
    pub async fn require_pipeline(&self, id: &str) -> Result<Pipeline, RelayError> {
        self.get_pipeline(id).await?.ok_or_else(|| {
            DomainError::NotFound {
                kind: "Pipeline",
                id: id.to_string(),
            }
            .into()
        })
    }

    pub async fn list_pipelines(&self) -> Result<Vec<Pipeline>, RelayError> {
        let rows = sqlx::query("SELECT * FROM pipelines ORDER BY created_at")
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(pipeline_from_row).collect()
    }

    pub async fn set_last_scheduled_run(
        &self,
        id: &str,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), RelayError> {
        sqlx::query("UPDATE pipelines SET last_scheduled_run = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Delete a pipeline. Cascades to its runs and metadata document.
    pub async fn delete_pipeline(&self, id: &str) -> Result<bool, RelayError> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM pipeline_runs WHERE pipeline_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM dataset_metadata WHERE pipeline_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM pipelines WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Runs ─────────────────────────────────────────────────────────

    pub async fn insert_run(&self, run: &PipelineRun) -> Result<(), RelayError> {
        sqlx::query(
            "INSERT INTO pipeline_runs
             (run_id, pipeline_id, status, started_at, completed_at, progress, streaming,
              rows_processed, chunks_processed, output_file, files_written_json,
              duration_seconds, error, trace, metadata_generated, columns_needing_review)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.run_id)
        .bind(&run.pipeline_id)
        .bind(run.status.as_str())
        .bind(run.started_at.to_rfc3339())
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .bind(&run.progress)
        .bind(run.streaming)
        .bind(run.rows_processed.map(|v| v as i64))
        .bind(run.chunks_processed.map(|v| v as i64))
        .bind(&run.output_file)
        .bind(to_json(&run.files_written)?)
        .bind(run.duration_seconds)
        .bind(&run.error)
        .bind(&run.trace)
        .bind(run.metadata_generated)
        .bind(run.columns_needing_review.map(|v| v as i64))
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Apply a partial update to a run. Terminal runs are immutable: an
    /// update against a success/failed row fails with InvalidTransition.
    pub async fn update_run(&self, run_id: &str, update: RunUpdate) -> Result<PipelineRun, RelayError> {
        let mut tx = self.pool().begin().await?;

        let row = sqlx::query("SELECT * FROM pipeline_runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DomainError::NotFound {
                kind: "Run",
                id: run_id.to_string(),
            })?;
        let mut run = run_from_row(&row)?;

        if run.status.is_terminal() {
            return Err(DomainError::InvalidTransition(format!(
                "run '{run_id}' is already {}",
                run.status.as_str()
            ))
            .into());
        }
        if let Some(status) = update.status {
            // running -> running is a progress update; anything else must
            // land on a terminal state exactly once.
            if status == RunStatus::Running && run.status != RunStatus::Running {
                return Err(DomainError::InvalidTransition(format!(
                    "run '{run_id}' cannot return to running"
                ))
                .into());
            }
            run.status = status;
        }
        if let Some(v) = update.completed_at {
            run.completed_at = Some(v);
        }
        if let Some(v) = update.progress {
            run.progress = v;
        }
        if let Some(v) = update.rows_processed {
            run.rows_processed = Some(v);
        }
        if let Some(v) = update.chunks_processed {
            run.chunks_processed = Some(v);
        }
        if let Some(v) = update.output_file {
            run.output_file = Some(v);
        }
        if let Some(v) = update.files_written {
            run.files_written = v;
        }
        if let Some(v) = update.duration_seconds {
            run.duration_seconds = Some(v);
        }
        if let Some(v) = update.error {
            run.error = Some(v);
        }
        if let Some(v) = update.trace {
            run.trace = Some(v);
        }
        if let Some(v) = update.metadata_generated {
            run.metadata_generated = v;
        }
        if let Some(v) = update.columns_needing_review {
            run.columns_needing_review = Some(v);
        }

        sqlx::query(
            "UPDATE pipeline_runs SET status = ?, completed_at = ?, progress = ?,
             rows_processed = ?, chunks_processed = ?, output_file = ?,
             files_written_json = ?, duration_seconds = ?, error = ?, trace = ?,
             metadata_generated = ?, columns_needing_review = ?
             WHERE run_id = ? AND status = 'running'",
        )
        .bind(run.status.as_str())
        .bind(run.completed_at.map(|t| t.to_rfc3339()))
        .bind(&run.progress)
        .bind(run.rows_processed.map(|v| v as i64))
        .bind(run.chunks_processed.map(|v| v as i64))
        .bind(&run.output_file)
        .bind(to_json(&run.files_written)?)
        .bind(run.duration_seconds)
        .bind(&run.error)
        .bind(&run.trace)
        .bind(run.metadata_generated)
        .bind(run.columns_needing_review.map(|v| v as i64))
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(run)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<PipelineRun>, RelayError> {
        let row = sqlx::query("SELECT * FROM pipeline_runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    pub async fn list_runs(&self, pipeline_id: &str) -> Result<Vec<PipelineRun>, RelayError> {
        let rows = sqlx::query("SELECT * FROM pipeline_runs WHERE pipeline_id = ? ORDER BY id")
            .bind(pipeline_id)
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(run_from_row).collect()
    }

    /// Runs still marked running that started before the cutoff. These
    /// are surfaced to operators, never rolled forward automatically.
    pub async fn stale_running_runs(
        &self,
        cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<PipelineRun>, RelayError> {
        let rows = sqlx::query(
            "SELECT * FROM pipeline_runs WHERE status = 'running' AND started_at < ? ORDER BY id",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(run_from_row).collect()
    }

    /// Most recent successful run, the one the query engine reads from.
    pub async fn latest_successful_run(
        &self,
        pipeline_id: &str,
    ) -> Result<Option<PipelineRun>, RelayError> {
        let row = sqlx::query(
            "SELECT * FROM pipeline_runs WHERE pipeline_id = ? AND status = 'success'
             ORDER BY id DESC LIMIT 1",
        )
        .bind(pipeline_id)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(run_from_row).transpose()
    }
}
