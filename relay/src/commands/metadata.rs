// relay/src/commands/metadata.rs
//
// USE CASE: column profiles and the human review loop.

use relay_core::application::service::{ApproveColumnRequest, RelayService};
use relay_core::domain::role::AuthContext;

use super::print_json;
use crate::cli::MetadataCommands;

pub async fn execute(
    service: &RelayService,
    auth: &AuthContext,
    command: MetadataCommands,
) -> anyhow::Result<()> {
    match command {
        MetadataCommands::Show { pipeline_id } => {
            let metadata = service.metadata(&pipeline_id, auth).await?;
            print_json(&metadata)
        }
        MetadataCommands::Pending => {
            let pending = service.pending_reviews(auth).await?;
            println!("📋 {} column(s) awaiting review", pending.len());
            print_json(&pending)
        }
        MetadataCommands::Approve {
            column,
            description,
            business_meaning,
        } => {
            let knowledge = service
                .approve_column(
                    ApproveColumnRequest {
                        column_name: column,
                        description,
                        business_meaning,
                        verified_by: auth.principal.clone(),
                    },
                    auth,
                )
                .await?;
            println!("✅ Verified column '{}'", knowledge.column_key);
            Ok(())
        }
    }
}
