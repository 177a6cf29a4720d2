// relay/src/commands/query.rs
//
// USE CASE: ad-hoc SQL over pipeline artifacts.

use comfy_table::Table;
use relay_core::application::service::{QueryRequest, RelayService};
use relay_core::domain::role::AuthContext;

use super::print_json;

pub async fn execute(
    service: &RelayService,
    auth: &AuthContext,
    pipelines: Vec<String>,
    sql: String,
    limit: usize,
) -> anyhow::Result<()> {
    let result = service
        .query(
            QueryRequest {
                pipelines,
                sql,
                limit,
            },
            auth,
        )
        .await?;

    let mut table = Table::new();
    table.set_header(result.columns.clone());
    for row in &result.rows {
        table.add_row(
            result
                .columns
                .iter()
                .map(|column| match row.get(column) {
                    Some(serde_json::Value::Null) | None => String::new(),
                    Some(serde_json::Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                }),
        );
    }
    println!("{table}");
    println!(
        "   {} row(s) in {:.2} ms",
        result.row_count, result.execution_time_ms
    );
    Ok(())
}

pub async fn schema(
    service: &RelayService,
    auth: &AuthContext,
    pipelines: Vec<String>,
) -> anyhow::Result<()> {
    let schemas = service.schemas(&pipelines, auth).await?;
    print_json(&schemas)
}
