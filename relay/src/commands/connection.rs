// relay/src/commands/connection.rs
//
// USE CASE: encrypted connection registry.

use comfy_table::Table;
use relay_core::application::service::{CreateConnectionRequest, RelayService};
use relay_core::domain::role::AuthContext;

use super::{load_json, print_json};
use crate::cli::ConnectionCommands;

pub async fn execute(
    service: &RelayService,
    auth: &AuthContext,
    command: ConnectionCommands,
) -> anyhow::Result<()> {
    match command {
        ConnectionCommands::Create { file } => {
            let request: CreateConnectionRequest = load_json(&file)?;
            let connection = service.create_connection(request, auth).await?;
            println!(
                "🔐 Connection '{}' stored ({})",
                connection.name, connection.id
            );
            print_json(&connection)
        }
        ConnectionCommands::List => {
            let connections = service.list_connections(auth).await?;
            let mut table = Table::new();
            table.set_header(["ID", "Name", "Type", "Last test", "Status"]);
            for c in &connections {
                table.add_row([
                    c.id.clone(),
                    c.name.clone(),
                    c.connection_type.clone(),
                    c.last_tested_at
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string()),
                    c.last_test_status.clone().unwrap_or_else(|| "-".to_string()),
                ]);
            }
            println!("{table}");
            Ok(())
        }
        ConnectionCommands::Show { connection_id } => {
            let connection = service.get_connection(&connection_id, auth).await?;
            print_json(&connection)
        }
        ConnectionCommands::Test { connection_id } => {
            let result = service.test_connection(&connection_id, auth).await?;
            if result.status == "success" {
                println!("✅ {}", result.message);
            } else {
                eprintln!("⚠️  {}", result.message);
            }
            Ok(())
        }
        ConnectionCommands::Delete { connection_id } => {
            let deleted = service.delete_connection(&connection_id, auth).await?;
            println!("🧹 {}", deleted.message);
            Ok(())
        }
    }
}
