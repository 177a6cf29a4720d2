// relay/src/cli.rs

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "relay")]
#[command(version)]
#[command(about = "Relay - Agent-Native Data Movement Platform", long_about = None)]
pub struct Cli {
    /// API key (or RELAY_API_KEY). Ignored while REQUIRE_AUTH is off.
    #[arg(long, global = true, env = "RELAY_API_KEY")]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 📖 Print the self-describing capabilities document
    Capabilities,

    /// ❤️ Service health
    Health,

    /// 🚚 Manage pipelines
    Pipeline {
        #[command(subcommand)]
        command: PipelineCommands,
    },

    /// 🔍 Preview a URL-backed source before creating a pipeline
    TestSource {
        /// Source type (csv_url or json_url)
        #[arg(long = "type")]
        source_type: String,
        #[arg(long)]
        url: String,
    },

    /// ⚡ Execute SQL over pipeline artifacts
    Query {
        /// Comma-separated pipeline ids
        #[arg(long, value_delimiter = ',')]
        pipelines: Vec<String>,
        #[arg(long)]
        sql: String,
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },

    /// 🧱 Show table schemas for pipelines
    Schema {
        #[arg(long, value_delimiter = ',')]
        pipelines: Vec<String>,
    },

    /// 📇 Dataset metadata and the review workflow
    Metadata {
        #[command(subcommand)]
        command: MetadataCommands,
    },

    /// 🗂️ Dataset discovery
    Datasets {
        #[command(subcommand)]
        command: DatasetCommands,
    },

    /// 🔐 Manage encrypted connections
    Connection {
        #[command(subcommand)]
        command: ConnectionCommands,
    },

    /// 🕸️ The semantic ontology: entities, metrics, dimensions, lineage
    Ontology {
        #[command(subcommand)]
        command: OntologyCommands,
    },

    /// 🔑 API key administration
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// 📊 Platform analytics
    Events {
        #[command(subcommand)]
        command: EventCommands,
    },

    /// ⏰ Run the schedule sweep loop in the foreground
    Scheduler,
}

#[derive(Subcommand)]
pub enum PipelineCommands {
    /// Create a pipeline from a JSON definition file
    Create {
        #[arg(long)]
        file: std::path::PathBuf,
    },
    /// Create a multi-source transformation pipeline from a JSON file
    CreateTransformation {
        #[arg(long)]
        file: std::path::PathBuf,
    },
    /// List all pipelines
    List,
    /// Show one pipeline with its run history
    Show { pipeline_id: String },
    /// Trigger a run (returns immediately unless --wait)
    Run {
        pipeline_id: String,
        /// Poll until the run reaches a terminal state
        #[arg(long)]
        wait: bool,
    },
    /// Show one run
    Status {
        pipeline_id: String,
        run_id: String,
    },
    /// Delete a pipeline and its runs (admin)
    Delete { pipeline_id: String },
}

#[derive(Subcommand)]
pub enum MetadataCommands {
    /// Show the metadata document for a pipeline
    Show { pipeline_id: String },
    /// Columns awaiting human review
    Pending,
    /// Record a verified column description
    Approve {
        #[arg(long)]
        column: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        business_meaning: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum DatasetCommands {
    /// Keyword search over pipelines
    Search { query: String },
    /// Join-key suggestions between two datasets
    Suggest { dataset1: String, dataset2: String },
}

#[derive(Subcommand)]
pub enum ConnectionCommands {
    /// Create a connection from a JSON definition file
    Create {
        #[arg(long)]
        file: std::path::PathBuf,
    },
    /// List connections (never shows credentials)
    List,
    /// Show one connection (never shows credentials)
    Show { connection_id: String },
    /// Probe a stored connection
    Test { connection_id: String },
    /// Delete a connection (fails while referenced by a pipeline)
    Delete { connection_id: String },
}

#[derive(Subcommand)]
pub enum OntologyCommands {
    /// The active ontology snapshot
    Show,
    /// Generate proposals from a pipeline's metadata
    Propose {
        pipeline_id: String,
        #[arg(long)]
        no_relationships: bool,
        #[arg(long)]
        no_metrics: bool,
    },
    /// List proposals
    Proposals {
        /// pending | approved | rejected
        #[arg(long)]
        status: Option<String>,
    },
    /// Approve or reject a pending proposal
    Review {
        proposal_id: String,
        #[arg(long, conflicts_with = "reject")]
        approve: bool,
        #[arg(long)]
        reject: bool,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Semantic query by metric/dimension names (or a question with --ask)
    Query {
        #[arg(long, value_delimiter = ',')]
        metrics: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        dimensions: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        filters: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        order_by: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
        /// Natural-language question (requires ANTHROPIC_API_KEY)
        #[arg(long)]
        ask: Option<String>,
    },
    /// Entity -> pipeline -> source trace
    Lineage { entity: String },
    /// Create an ontology object from a JSON definition file
    Create {
        /// entity | relationship | metric | dimension
        kind: String,
        #[arg(long)]
        file: std::path::PathBuf,
    },
    /// Delete an ontology object by id
    Delete {
        /// entity | relationship | metric | dimension
        kind: String,
        id: String,
    },
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Create an API key; the secret is printed once
    Create {
        #[arg(long)]
        name: String,
        /// reader | writer | admin
        #[arg(long, default_value = "writer")]
        role: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// List keys (hashes only)
    List,
    /// Deactivate a key
    Revoke { key_id: i64 },
}

#[derive(Subcommand)]
pub enum EventCommands {
    /// Counts by type plus recent events
    Summary,
    /// List events with optional filters
    List {
        #[arg(long)]
        event_type: Option<String>,
        #[arg(long)]
        pipeline: Option<String>,
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },
}
