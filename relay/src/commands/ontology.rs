// relay/src/commands/ontology.rs
//
// USE CASE: build and query the semantic layer.

use relay_core::application::semantic::SemanticRequest;
use relay_core::application::service::RelayService;
use relay_core::domain::ontology::ProposalStatus;
use relay_core::domain::role::AuthContext;

use super::{load_json, print_json};
use crate::cli::OntologyCommands;

pub async fn execute(
    service: &RelayService,
    auth: &AuthContext,
    command: OntologyCommands,
) -> anyhow::Result<()> {
    match command {
        OntologyCommands::Show => {
            let snapshot = service.ontology_overview(auth).await?;
            println!(
                "🕸️  {} entities, {} relationships, {} metrics, {} dimensions",
                snapshot.entities.len(),
                snapshot.relationships.len(),
                snapshot.metrics.len(),
                snapshot.dimensions.len()
            );
            print_json(&snapshot)
        }
        OntologyCommands::Propose {
            pipeline_id,
            no_relationships,
            no_metrics,
        } => {
            let proposals = service
                .propose_ontology(&pipeline_id, !no_relationships, !no_metrics, auth)
                .await?;
            println!("💡 {} proposal(s) recorded", proposals.len());
            print_json(&proposals)
        }
        OntologyCommands::Proposals { status } => {
            let status = match status.as_deref() {
                Some("pending") => Some(ProposalStatus::Pending),
                Some("approved") => Some(ProposalStatus::Approved),
                Some("rejected") => Some(ProposalStatus::Rejected),
                Some(other) => anyhow::bail!("Unknown proposal status: {other}"),
                None => None,
            };
            let proposals = service.list_proposals(status, auth).await?;
            print_json(&proposals)
        }
        OntologyCommands::Review {
            proposal_id,
            approve,
            reject,
            notes,
        } => {
            if approve == reject {
                anyhow::bail!("Pass exactly one of --approve or --reject");
            }
            let review = service
                .review_proposal(&proposal_id, approve, notes.as_deref(), auth)
                .await?;
            println!("✅ Proposal {} {}", proposal_id, review.status);
            print_json(&review)
        }
        OntologyCommands::Query {
            metrics,
            dimensions,
            filters,
            order_by,
            limit,
            ask,
        } => {
            let request = SemanticRequest {
                metrics,
                dimensions,
                filters,
                order_by,
                limit,
                natural_language: ask,
            };
            let result = service.semantic_query(&request, auth).await?;
            println!("⚡ {}", result.generated_sql);
            print_json(&result)
        }
        OntologyCommands::Lineage { entity } => {
            let report = service.lineage(&entity, auth).await?;
            print_json(&report)
        }
        OntologyCommands::Create { kind, file } => match kind.as_str() {
            "entity" => {
                let entity = service.create_entity(load_json(&file)?, auth).await?;
                print_json(&entity)
            }
            "relationship" => {
                let relationship = service
                    .create_relationship(load_json(&file)?, auth)
                    .await?;
                print_json(&relationship)
            }
            "metric" => {
                let metric = service.create_metric(load_json(&file)?, auth).await?;
                print_json(&metric)
            }
            "dimension" => {
                let dimension = service.create_dimension(load_json(&file)?, auth).await?;
                print_json(&dimension)
            }
            other => anyhow::bail!("Unknown ontology kind: {other}"),
        },
        OntologyCommands::Delete { kind, id } => {
            let deleted = match kind.as_str() {
                "entity" => service.delete_entity(&id, auth).await?,
                "relationship" => service.delete_relationship(&id, auth).await?,
                "metric" => service.delete_metric(&id, auth).await?,
                "dimension" => service.delete_dimension(&id, auth).await?,
                other => anyhow::bail!("Unknown ontology kind: {other}"),
            };
            println!("🧹 {}", deleted.message);
            Ok(())
        }
    }
}
