// relay/src/commands/pipeline.rs
//
// USE CASE: pipeline lifecycle from the terminal.

use std::time::Duration;

use comfy_table::Table;
use relay_core::application::service::{
    CreatePipelineRequest, CreateTransformationRequest, RelayService,
};
use relay_core::domain::role::AuthContext;

use super::{load_json, print_json};
use crate::cli::PipelineCommands;

pub async fn execute(
    service: &RelayService,
    auth: &AuthContext,
    command: PipelineCommands,
) -> anyhow::Result<()> {
    match command {
        PipelineCommands::Create { file } => {
            let request: CreatePipelineRequest = load_json(&file)?;
            let created = service.create_pipeline(request, auth).await?;
            println!("✨ Pipeline created: {} ({})", created.name, created.pipeline_id);
            print_json(&created)
        }
        PipelineCommands::CreateTransformation { file } => {
            let request: CreateTransformationRequest = load_json(&file)?;
            let created = service.create_transformation(request, auth).await?;
            println!(
                "✨ Transformation created: {} ({})",
                created.name, created.pipeline_id
            );
            print_json(&created)
        }
        PipelineCommands::List => {
            let pipelines = service.list_pipelines(auth).await?;
            let mut table = Table::new();
            table.set_header(["ID", "Name", "Kind", "Source", "Status", "Runs", "Last run"]);
            for p in &pipelines {
                table.add_row([
                    p.id.clone(),
                    p.name.clone(),
                    format!("{:?}", p.kind).to_lowercase(),
                    p.source_type.clone(),
                    p.status.clone(),
                    p.total_runs.to_string(),
                    p.last_run
                        .as_ref()
                        .map(|r| r.status.as_str().to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ]);
            }
            println!("{table}");
            println!("   {} pipeline(s)", pipelines.len());
            Ok(())
        }
        PipelineCommands::Show { pipeline_id } => {
            let detail = service.get_pipeline(&pipeline_id, auth).await?;
            print_json(&detail)
        }
        PipelineCommands::Run { pipeline_id, wait } => {
            let started = service.run_pipeline(&pipeline_id, auth).await?;
            println!("🚀 Run {} started", started.run_id);
            if !wait {
                return print_json(&started);
            }

            // Poll until the run reaches a terminal state.
            loop {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let run = service
                    .run_status(&pipeline_id, &started.run_id, auth)
                    .await?;
                if run.status.is_terminal() {
                    match run.status {
                        relay_core::domain::pipeline::RunStatus::Success => {
                            println!(
                                "✨ SUCCESS! {} rows in {:.2}s",
                                run.rows_processed.unwrap_or(0),
                                run.duration_seconds.unwrap_or(0.0)
                            );
                        }
                        _ => {
                            eprintln!(
                                "💥 Run failed: {}",
                                run.error.as_deref().unwrap_or("unknown error")
                            );
                        }
                    }
                    return print_json(&run);
                }
            }
        }
        PipelineCommands::Status {
            pipeline_id,
            run_id,
        } => {
            let run = service.run_status(&pipeline_id, &run_id, auth).await?;
            print_json(&run)
        }
        PipelineCommands::Delete { pipeline_id } => {
            let deleted = service.delete_pipeline(&pipeline_id, auth).await?;
            println!("🧹 {}", deleted.message);
            Ok(())
        }
    }
}

pub async fn test_source(
    service: &RelayService,
    auth: &AuthContext,
    source_type: &str,
    url: &str,
) -> anyhow::Result<()> {
    let preview = service.test_source(source_type, url, auth).await?;
    println!(
        "✅ Source is accessible: {} column(s), {} row(s)",
        preview.columns.len(),
        preview.rows
    );
    print_json(&preview)
}
