// relay/src/commands/datasets.rs
//
// USE CASE: dataset discovery for agents and humans alike.

use relay_core::application::service::RelayService;
use relay_core::domain::role::AuthContext;

use super::print_json;
use crate::cli::DatasetCommands;

pub async fn execute(
    service: &RelayService,
    auth: &AuthContext,
    command: DatasetCommands,
) -> anyhow::Result<()> {
    match command {
        DatasetCommands::Search { query } => {
            let matches = service.search_datasets(&query, auth).await?;
            println!("🔎 {} match(es)", matches.len());
            print_json(&matches)
        }
        DatasetCommands::Suggest { dataset1, dataset2 } => {
            let suggestions = service.join_suggestions(&dataset1, &dataset2, auth).await?;
            print_json(&suggestions)
        }
    }
}
