// relay/src/commands/admin.rs
//
// USE CASE: key administration and platform analytics.

use std::str::FromStr;

use comfy_table::Table;
use relay_core::application::service::{CreateApiKeyRequest, RelayService};
use relay_core::domain::role::{AuthContext, Role};

use super::print_json;
use crate::cli::{EventCommands, KeyCommands};

pub async fn keys(
    service: &RelayService,
    auth: &AuthContext,
    command: KeyCommands,
) -> anyhow::Result<()> {
    match command {
        KeyCommands::Create {
            name,
            role,
            description,
        } => {
            let role = Role::from_str(&role)?;
            let created = service
                .create_api_key(
                    CreateApiKeyRequest {
                        name,
                        description,
                        role,
                    },
                    auth,
                )
                .await?;
            println!("🔑 {}", created.message);
            print_json(&created)
        }
        KeyCommands::List => {
            let keys = service.list_api_keys(auth).await?;
            let mut table = Table::new();
            table.set_header(["ID", "Prefix", "Name", "Role", "Active"]);
            for key in &keys {
                table.add_row([
                    key.id.to_string(),
                    format!("{}...", key.key_prefix),
                    key.name.clone(),
                    key.role.to_string(),
                    key.active.to_string(),
                ]);
            }
            println!("{table}");
            Ok(())
        }
        KeyCommands::Revoke { key_id } => {
            let result = service.deactivate_api_key(key_id, auth).await?;
            println!("🧹 {}", result.message);
            Ok(())
        }
    }
}

pub async fn events(
    service: &RelayService,
    auth: &AuthContext,
    command: EventCommands,
) -> anyhow::Result<()> {
    match command {
        EventCommands::Summary => {
            let summary = service.analytics_summary(auth).await?;
            print_json(&summary)
        }
        EventCommands::List {
            event_type,
            pipeline,
            limit,
        } => {
            let events = service
                .analytics_events(event_type.as_deref(), pipeline.as_deref(), limit, auth)
                .await?;
            print_json(&events)
        }
    }
}
