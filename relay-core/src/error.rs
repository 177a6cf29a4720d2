// relay-core/src/error.rs

use crate::domain::error::DomainError;
use crate::infrastructure::error::InfrastructureError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    // --- DOMAIN ERRORS (business rules, ontology resolution, auth) ---
    #[error(transparent)]
    Domain(#[from] DomainError),

    // --- INFRASTRUCTURE ERRORS (store, engines, network, crypto) ---
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    // --- GENERIC / APPLICATIVE ERRORS ---
    #[error("Internal Error: {0}")]
    Internal(String),
}

impl RelayError {
    /// HTTP status the service edge maps this error to.
    /// Kept here so every collaborator (CLI today, HTTP shell tomorrow)
    /// agrees on the exit conditions.
    pub fn http_status(&self) -> u16 {
        match self {
            RelayError::Domain(e) => e.http_status(),
            RelayError::Infrastructure(_) => 500,
            RelayError::Internal(_) => 500,
        }
    }
}

// Manual implementations to keep `?` ergonomic at call sites without
// duplicating enum variants.
impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::Infrastructure(InfrastructureError::Io(err))
    }
}

impl From<sqlx::Error> for RelayError {
    fn from(err: sqlx::Error) -> Self {
        RelayError::Infrastructure(InfrastructureError::Database(err))
    }
}

impl From<datafusion::error::DataFusionError> for RelayError {
    fn from(err: datafusion::error::DataFusionError) -> Self {
        RelayError::Infrastructure(InfrastructureError::DataFusion(err))
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Infrastructure(InfrastructureError::Json(err))
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Infrastructure(InfrastructureError::Http(err))
    }
}

impl From<object_store::Error> for RelayError {
    fn from(err: object_store::Error) -> Self {
        RelayError::Infrastructure(InfrastructureError::ObjectStore(err))
    }
}
