// relay-core/src/domain/error.rs

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic)]
pub enum DomainError {
    #[error("{kind} not found: {id}")]
    #[diagnostic(code(relay::domain::not_found))]
    NotFound { kind: &'static str, id: String },

    #[error("Conflict: {0}")]
    #[diagnostic(code(relay::domain::conflict))]
    Conflict(String),

    #[error("Validation failed: {0}")]
    #[diagnostic(code(relay::domain::validation))]
    Validation(String),

    #[error(
        "Connection type mismatch: connection '{connection}' is type '{connection_type}' but source specifies type '{source_type}'"
    )]
    #[diagnostic(
        code(relay::domain::connection_type_mismatch),
        help("Reference a connection whose type matches the source, or fix the source type.")
    )]
    ConnectionTypeMismatch {
        connection: String,
        connection_type: String,
        source_type: String,
    },

    #[error("No queryable data for pipeline '{0}': no successful run with an output file")]
    #[diagnostic(
        code(relay::domain::no_data),
        help("Run the pipeline first and wait for a successful completion.")
    )]
    NoData(String),

    #[error("Query execution failed: {0}")]
    #[diagnostic(code(relay::domain::query_failed))]
    QueryFailed(String),

    #[error("Unknown metric: {0}")]
    #[diagnostic(code(relay::domain::unknown_metric))]
    UnknownMetric(String),

    #[error("Unknown dimension: {0}")]
    #[diagnostic(code(relay::domain::unknown_dimension))]
    UnknownDimension(String),

    #[error("Circular metric reference detected: {0}")]
    #[diagnostic(
        code(relay::domain::circular_metric),
        help("Check your ${{...}} metric references for cycles.")
    )]
    CircularMetric(String),

    #[error("Entity '{0}' has no relationship path to the rest of the query")]
    #[diagnostic(
        code(relay::domain::disconnected_ontology),
        help("Declare a relationship joining this entity to one of the others in the query.")
    )]
    DisconnectedOntology(String),

    #[error("Invalid transition: {0}")]
    #[diagnostic(code(relay::domain::invalid_transition))]
    InvalidTransition(String),

    #[error("At least one metric or dimension is required")]
    #[diagnostic(code(relay::domain::empty_query))]
    EmptyQuery,

    #[error(
        "Natural language queries require an Anthropic API key; use structured queries (metrics + dimensions) instead"
    )]
    #[diagnostic(code(relay::domain::nl_unavailable))]
    NlUnavailable,

    #[error("Missing API key")]
    #[diagnostic(code(relay::domain::unauthorized))]
    Unauthorized,

    #[error("{0}")]
    #[diagnostic(code(relay::domain::forbidden))]
    Forbidden(String),
}

impl DomainError {
    /// Exit condition at the service edge.
    pub fn http_status(&self) -> u16 {
        match self {
            DomainError::NotFound { .. } => 404,
            DomainError::Conflict(_) | DomainError::InvalidTransition(_) => 409,
            DomainError::Unauthorized => 401,
            DomainError::Forbidden(_) => 403,
            _ => 400,
        }
    }
}
