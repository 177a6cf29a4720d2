// relay-core/src/infrastructure/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum InfrastructureError {
    // --- STORE ---
    #[error("Store Error: {0}")]
    #[diagnostic(
        code(relay::infra::store),
        help("Check DATABASE_URL and that the database file is writable.")
    )]
    Database(#[from] sqlx::Error),

    // --- SQL ENGINE ---
    #[error("SQL Engine Error: {0}")]
    #[diagnostic(code(relay::infra::datafusion))]
    DataFusion(#[from] datafusion::error::DataFusionError),

    // --- OBJECT STORE ---
    #[error("Object Store Error: {0}")]
    #[diagnostic(
        code(relay::infra::object_store),
        help("Check STORAGE_MODE, bucket names and AWS credentials.")
    )]
    ObjectStore(#[from] object_store::Error),

    // --- FILESYSTEM (IO) ---
    #[error("File System Error: {0}")]
    #[diagnostic(
        code(relay::infra::io),
        help("Check file permissions or path validity.")
    )]
    Io(#[from] std::io::Error),

    // --- HTTP ---
    #[error("HTTP Error: {0}")]
    #[diagnostic(code(relay::infra::http))]
    Http(#[from] reqwest::Error),

    // --- SERIALIZATION ---
    #[error("JSON Error: {0}")]
    #[diagnostic(code(relay::infra::json))]
    Json(#[from] serde_json::Error),

    // --- CREDENTIAL CIPHER ---
    #[error("Encryption Error: {0}")]
    #[diagnostic(
        code(relay::infra::encryption),
        help("ENCRYPTION_KEY must be base64 of exactly 32 bytes; ciphertexts are only readable with the key that produced them.")
    )]
    Encryption(String),

    // --- CONFIG ---
    #[error("Configuration Error: {0}")]
    #[diagnostic(code(relay::infra::config))]
    Config(String),

    // --- SOURCE PAYLOADS ---
    #[error("Source Error: {0}")]
    #[diagnostic(code(relay::infra::source))]
    Source(String),
}
