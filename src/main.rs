//! # RagForge
//!
//! A retrieval-augmented knowledge engine over a property graph: hybrid
//! (BM25 + vector) search, a schema-driven tool surface, and an agent
//! runtime that iteratively calls those tools under a persona system.
//!
//! ## Command surface
//!
//! - `init` — create the backing store and run migrations
//! - `introspect` — print the schema's tool surface (`describe_schema`)
//! - `generate` — run ingestion across configured connectors
//! - `embeddings:index` — validate declared vector indexes against the schema
//! - `embeddings:generate` — (re)embed entities with stale or missing vectors
//! - `agent` — run one agent turn against a task string
//! - `tui` — not built here; prints a notice and exits 0
//! - `serve` — start the tool-invocation HTTP server (ambient addition)
//! - `watch` — poll the configured filesystem connector and re-ingest on change
//!
//! Exit codes: `0` success, `1` usage, `2` configuration error,
//! `3` external-service error, `4` cancelled — mapped from
//! [`error::RagForgeError`] where a component surfaces one.

mod agent;
mod chunking;
mod config;
mod connector_fs;
mod connector_web;
mod embedding;
mod error;
mod graph;
mod ingest;
mod llm;
mod models;
mod persona;
mod schema;
mod search;
mod server;
mod tools;
mod traits;
mod watcher;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use config::Config;
use error::RagForgeError;
use graph::{GraphAdapter, SqliteGraphAdapter};
use schema::default_schema;
use traits::{ConnectorRegistry, ToolRegistry};

#[derive(Parser)]
#[command(name = "ragforge", about = "A retrieval-augmented knowledge engine over a property graph", version)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "./config/ragforge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the backing store and run migrations
    Init,

    /// Print the generated tool surface for the active schema
    Introspect,

    /// Run ingestion across every configured connector
    Generate {
        /// Only run this connector type (filesystem|web); default: all configured
        #[arg(long)]
        only: Option<String>,
    },

    /// Validate declared vector indexes against the schema
    #[command(name = "embeddings:index")]
    EmbeddingsIndex,

    /// (Re)embed entities with stale or missing vectors
    #[command(name = "embeddings:generate")]
    EmbeddingsGenerate,

    /// Run one agent turn against a task string
    Agent {
        /// Natural-language task for the agent to pursue
        task: String,

        /// Persona id to use; defaults to the configured active persona
        #[arg(long)]
        persona: Option<String>,
    },

    /// Interactive terminal UI (out of scope here; prints a notice)
    Tui,

    /// Start the tool-invocation HTTP server
    Serve,

    /// Poll the configured filesystem connector for changes and re-ingest
    Watch,
}

#[tokio::main]
async fn main() {
    let exit_code = run().await;
    std::process::exit(exit_code);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    let config = match config::load_config(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{:#}", e);
            return RagForgeError::ConfigInvalid(e.to_string()).exit_code();
        }
    };

    match dispatch(&cli.command, &config).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{:#}", e);
            match e.downcast_ref::<RagForgeError>() {
                Some(rf) => rf.exit_code(),
                None => 3,
            }
        }
    }
}

async fn dispatch(command: &Commands, config: &Config) -> anyhow::Result<()> {
    match command {
        Commands::Init => cmd_init(config).await,
        Commands::Introspect => cmd_introspect(config).await,
        Commands::Generate { only } => cmd_generate(config, only.as_deref()).await,
        Commands::EmbeddingsIndex => cmd_embeddings_index(config).await,
        Commands::EmbeddingsGenerate => cmd_embeddings_generate(config).await,
        Commands::Agent { task, persona } => cmd_agent(config, task, persona.as_deref()).await,
        Commands::Tui => {
            println!("tui: not built here (out of scope per the agent/TUI boundary)");
            Ok(())
        }
        Commands::Serve => cmd_serve(config).await,
        Commands::Watch => cmd_watch(config).await,
    }
}

async fn connect_graph(config: &Config) -> anyhow::Result<SqliteGraphAdapter> {
    let graph = SqliteGraphAdapter::connect(config).await?;
    graph.run_migrations().await?;
    Ok(graph)
}

async fn cmd_init(config: &Config) -> anyhow::Result<()> {
    connect_graph(config).await?;
    println!("Graph store initialized at {}", config.graph.sqlite_path.display());
    Ok(())
}

async fn cmd_introspect(config: &Config) -> anyhow::Result<()> {
    let schema = default_schema();
    let tools = schema::generate_tools(&schema);
    println!("{} entities, {} generated tools:\n", schema.entities.len(), tools.len());
    for t in &tools {
        let validation = if t.requires_validation { " [requires confirmation]" } else { "" };
        println!("  {}{}", t.name, validation);
        println!("    {}", t.description);
    }
    let _ = config;
    Ok(())
}

async fn cmd_generate(config: &Config, only: Option<&str>) -> anyhow::Result<()> {
    let graph = connect_graph(config).await?;
    let schema = default_schema();
    let embedding_provider = embedding::create_provider(&config.embedding)?;
    let connectors = ConnectorRegistry::from_config(config);

    if connectors.is_empty() {
        println!("No connectors configured under [connectors]; nothing to do.");
        return Ok(());
    }

    for connector in connectors.connectors() {
        if let Some(filter) = only {
            if connector.connector_type() != filter {
                continue;
            }
        }
        println!("Syncing connector '{}' ({})...", connector.name(), connector.connector_type());
        let report = ingest::run_sync(config, &schema, &graph, embedding_provider.as_ref(), connector.as_ref())
            .await
            .map_err(|e| RagForgeError::GraphQueryFailed(e.to_string()))?;
        println!(
            "  scanned={} written={} unchanged={} relationships={} changes={} embeddings_written={} embeddings_pending={}",
            report.items_scanned,
            report.entities_written,
            report.entities_unchanged,
            report.relationships_written,
            report.changes_recorded,
            report.embeddings_written,
            report.embeddings_pending,
        );
    }

    Ok(())
}

async fn cmd_embeddings_index(config: &Config) -> anyhow::Result<()> {
    let schema = default_schema();
    for entity in &schema.entities {
        for index in &entity.vector_indexes {
            if entity.field(&index.source_field).is_none() {
                anyhow::bail!(
                    "vector index '{}' on {} names source field '{}' which is not declared",
                    index.name,
                    entity.label,
                    index.source_field
                );
            }
            println!(
                "{}.{} -> index '{}' (dim {}, {:?})",
                entity.label, index.source_field, index.name, index.dimension, index.similarity
            );
        }
    }
    let _ = config;
    Ok(())
}

async fn cmd_embeddings_generate(config: &Config) -> anyhow::Result<()> {
    if !config.embedding.is_enabled() {
        anyhow::bail!(RagForgeError::ConfigInvalid("embedding.provider is disabled".to_string()));
    }
    cmd_generate(config, None).await
}

async fn cmd_agent(config: &Config, task: &str, persona_override: Option<&str>) -> anyhow::Result<()> {
    let graph: Arc<dyn GraphAdapter> = Arc::new(connect_graph(config).await?);
    let schema = Arc::new(default_schema());
    let embedding_provider: Arc<dyn embedding::EmbeddingProvider> = Arc::from(embedding::create_provider(&config.embedding)?);
    let llm_provider: Arc<dyn llm::LLMProvider> = Arc::from(llm::create_provider(&config.llm)?);

    let ctx = tools::ToolContext::new(
        graph,
        schema.clone(),
        config.embedding.clone(),
        embedding_provider,
        Arc::new(config.clone()),
        llm_provider.clone(),
    );
    let registry = ToolRegistry::from_schema(&schema);
    let tool_descriptors = schema::generate_tools(&schema);

    let mut agent_config = config.agent.clone();
    if let Some(p) = persona_override {
        if persona::find_persona_index_pub(&agent_config, p).is_none() {
            anyhow::bail!("no persona matches '{}'", p);
        }
        agent_config.active_persona_id = agent_config
            .personas
            .iter()
            .find(|pc| pc.name.eq_ignore_ascii_case(p) || pc.id == p)
            .map(|pc| pc.id.clone())
            .unwrap();
    }
    let active = persona::active_persona(&agent_config)?;
    let runtime_persona = persona::to_runtime_persona(active);

    let capabilities = format!("{} entities available: {}", schema.entities.len(), schema.labels().join(", "));

    let outcome = agent::run_agent(
        &runtime_persona,
        task,
        &capabilities,
        &tool_descriptors,
        &registry,
        &ctx,
        llm_provider.as_ref(),
        &config.llm,
        &agent_config,
        &agent::AutoApprove,
        &agent::SilentObserver,
    )
    .await?;

    println!("{}", outcome.final_answer);
    if outcome.truncated {
        eprintln!("(truncated after {} iterations)", outcome.iterations);
    }
    Ok(())
}

async fn cmd_serve(config: &Config) -> anyhow::Result<()> {
    let graph: Arc<dyn GraphAdapter> = Arc::new(connect_graph(config).await?);
    let schema = Arc::new(default_schema());
    let embedding_provider: Arc<dyn embedding::EmbeddingProvider> = Arc::from(embedding::create_provider(&config.embedding)?);
    let llm_provider: Arc<dyn llm::LLMProvider> = Arc::from(llm::create_provider(&config.llm)?);
    server::run_server(config, schema, graph, embedding_provider, llm_provider).await
}

/// Polls the configured filesystem connector for changes and blocks until
/// Ctrl-C, at which point the watcher's cancellation signal is sent and it
/// is given a chance to return before the process exits.
async fn cmd_watch(config: &Config) -> anyhow::Result<()> {
    let schema = default_schema();

    let fs_config = config.connectors.filesystem.clone().ok_or_else(|| {
        RagForgeError::ConfigInvalid("watch requires [connectors.filesystem] to be configured".to_string())
    })?;

    let graph = connect_graph(config).await?;
    let embedding_provider = embedding::create_provider(&config.embedding)?;

    let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
    println!("Watching '{}' for changes (Ctrl-C to stop)...", fs_config.root.display());

    let watch = watcher::watch_filesystem(
        config,
        &schema,
        &graph,
        embedding_provider.as_ref(),
        "default".to_string(),
        fs_config,
        cancel_rx,
    );

    tokio::select! {
        result = watch => result,
        _ = tokio::signal::ctrl_c() => {
            let _ = cancel_tx.send(true);
            Ok(())
        }
    }
}
