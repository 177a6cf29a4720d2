// relay-core/src/lib.rs

// 1. Mandatory documentation for production code
#![allow(missing_docs)]
// 2. Memory safety
#![deny(unsafe_code)]
// 3. Robustness
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
// 4. Performance
#![warn(clippy::perf)]

// --- HEXAGONAL MODULES ---

// 1. Domain (business core)
// Naming rules, pipelines, runs, ontology objects, roles...
// Depends on NOTHING else (no infra, no app).
pub mod domain;

// 2. Infrastructure (Adapters)
// Technical implementation (SQLite store, AES-GCM cipher, source
// connectors, blob backends, the Anthropic client, env configuration).
// Depends on the Domain.
pub mod infrastructure;

// 3. Application (Use Cases)
// Orchestration (Pipeline engine, Query engine, Ontology, Semantic layer)
// Depends on the Domain and the Infra.
pub mod application;

// --- GLOBAL ERROR HANDLING ---
pub mod error;

// --- RE-EXPORTS (FACADE) ---
// Lets consumers import the main error easily: use relay_core::RelayError;
pub use error::RelayError;
