// relay/src/main.rs

mod cli;
mod commands;

use clap::Parser;

use cli::{Cli, Commands};
use relay_core::application::service::RelayService;
use relay_core::infrastructure::config::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG=debug relay ... to see the details
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // A. Load settings (env) and wire the service
    let settings = Settings::from_env()?;
    let service = RelayService::new(settings).await?;

    // B. The discovery surface stays open even when auth is required
    match &cli.command {
        Commands::Capabilities => {
            println!("{}", serde_json::to_string_pretty(&service.capabilities())?);
            return Ok(());
        }
        Commands::Health => {
            println!("{}", serde_json::to_string_pretty(&service.health())?);
            return Ok(());
        }
        _ => {}
    }

    // C. Resolve the caller identity once
    let auth = match service.authenticate(cli.api_key.as_deref()).await {
        Ok(auth) => auth,
        Err(e) => {
            eprintln!("❌ Authentication failed: {e}");
            std::process::exit(1);
        }
    };

    // D. Dispatch
    let result = match cli.command {
        Commands::Capabilities | Commands::Health => unreachable!("handled above"),
        Commands::Pipeline { command } => commands::pipeline::execute(&service, &auth, command).await,
        Commands::TestSource { source_type, url } => {
            commands::pipeline::test_source(&service, &auth, &source_type, &url).await
        }
        Commands::Query {
            pipelines,
            sql,
            limit,
        } => commands::query::execute(&service, &auth, pipelines, sql, limit).await,
        Commands::Schema { pipelines } => commands::query::schema(&service, &auth, pipelines).await,
        Commands::Metadata { command } => commands::metadata::execute(&service, &auth, command).await,
        Commands::Datasets { command } => commands::datasets::execute(&service, &auth, command).await,
        Commands::Connection { command } => {
            commands::connection::execute(&service, &auth, command).await
        }
        Commands::Ontology { command } => commands::ontology::execute(&service, &auth, command).await,
        Commands::Keys { command } => commands::admin::keys(&service, &auth, command).await,
        Commands::Events { command } => commands::admin::events(&service, &auth, command).await,
        Commands::Scheduler => commands::scheduler::execute(&service).await,
    };

    if let Err(e) = result {
        eprintln!("❌ {e}");
        std::process::exit(1);
    }
    Ok(())
}
