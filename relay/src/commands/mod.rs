// relay/src/commands/mod.rs

pub mod admin;
pub mod connection;
pub mod datasets;
pub mod metadata;
pub mod ontology;
pub mod pipeline;
pub mod query;
pub mod scheduler;

use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;

/// Load a JSON definition file into a typed request.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read definition file {path:?}"))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse JSON in {path:?}"))
}

/// Pretty-print any serializable response.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
