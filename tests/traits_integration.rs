//! Integration tests for the `Connector`/`Tool` extension traits.
//!
//! Proves that a custom connector and a custom tool, implemented entirely
//! outside the crate against the public `Connector`/`Tool` traits, work
//! end-to-end through the real ingestion pipeline and tool dispatcher —
//! the same guarantee the teacher's own trait-integration test made for its
//! fixed document pipeline.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use ragforge::config::{
    AgentConfig, ChunkingConfig, Config, ConnectorsConfig, EmbeddingConfig, GraphConfig, LLMConfig, RetrievalConfig,
    ServerConfig,
};
use ragforge::embedding::DisabledProvider;
use ragforge::graph::{GraphAdapter, SqliteGraphAdapter};
use ragforge::ingest;
use ragforge::models::SourceItem;
use ragforge::schema::default_schema;
use ragforge::graph::QueryOptions;
use ragforge::tools::ToolContext;
use ragforge::traits::{Connector, ConnectorRegistry, Tool, ToolRegistry};
use serde_json::{json, Value};
use std::sync::Arc;

struct InMemoryConnector {
    docs: Vec<(String, String)>,
}

#[async_trait]
impl Connector for InMemoryConnector {
    fn name(&self) -> &str {
        "inmemory"
    }

    fn description(&self) -> &str {
        "In-memory test connector"
    }

    fn connector_type(&self) -> &str {
        "filesystem"
    }

    async fn scan(&self) -> Result<Vec<SourceItem>> {
        let now = Utc::now();
        Ok(self
            .docs
            .iter()
            .map(|(id, body)| SourceItem {
                source: "custom:inmemory".to_string(),
                source_id: id.clone(),
                source_url: None,
                title: None,
                content_type: "text/plain".to_string(),
                body: body.clone(),
                updated_at: now,
            })
            .collect())
    }
}

/// A tool that counts how many `File` entities the graph holds.
struct CountFilesTool;

#[async_trait]
impl Tool for CountFilesTool {
    fn name(&self) -> &str {
        "count_files"
    }

    fn description(&self) -> &str {
        "Count File entities in the graph"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let entities = ctx.graph.query_entities("File", &QueryOptions::default()).await?;
        Ok(json!({ "count": entities.len() }))
    }
}

fn test_config(path: &std::path::Path) -> Config {
    Config {
        graph: GraphConfig { sqlite_path: path.to_path_buf(), ingestion_lock_timeout_secs: 5 },
        chunking: ChunkingConfig { max_tokens: 200, overlap_tokens: 0 },
        retrieval: RetrievalConfig::default(),
        embedding: EmbeddingConfig::default(),
        llm: LLMConfig::default(),
        server: ServerConfig { bind: "127.0.0.1:0".to_string() },
        agent: AgentConfig::default(),
        connectors: ConnectorsConfig::default(),
    }
}

#[tokio::test]
async fn custom_connector_and_tool_work_through_the_real_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(&dir.path().join("g.db"));
    let graph = SqliteGraphAdapter::connect(&cfg).await.unwrap();
    graph.run_migrations().await.unwrap();
    let schema = default_schema();

    let mut connectors = ConnectorRegistry::new();
    connectors.register(Box::new(InMemoryConnector {
        docs: vec![
            ("a.txt".to_string(), "alpha content".to_string()),
            ("b.txt".to_string(), "beta content".to_string()),
        ],
    }));
    assert_eq!(connectors.len(), 1);

    let connector = connectors.find("filesystem", "inmemory").unwrap();
    let report = ingest::run_sync(&cfg, &schema, &graph, &DisabledProvider, connector).await.unwrap();
    assert_eq!(report.items_scanned, 2);
    assert!(report.entities_written >= 2);

    let graph: Arc<dyn GraphAdapter> = Arc::new(graph);
    let embedding_provider: Arc<dyn ragforge::embedding::EmbeddingProvider> = Arc::new(DisabledProvider);
    let llm_provider: Arc<dyn ragforge::llm::LLMProvider> = Arc::new(ragforge::llm::DisabledProvider);
    let ctx = ToolContext::new(
        graph,
        Arc::new(schema.clone()),
        cfg.embedding.clone(),
        embedding_provider,
        Arc::new(cfg.clone()),
        llm_provider,
    );

    let mut tools = ToolRegistry::from_schema(&schema);
    assert!(tools.find("count_files").is_none());
    tools.register(Box::new(CountFilesTool));

    let tool = tools.find("count_files").unwrap();
    let result = tool.execute(json!({}), &ctx).await.unwrap();
    assert_eq!(result["count"], json!(2));
}
