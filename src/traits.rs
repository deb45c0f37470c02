//! Extension traits for custom connectors and tools.
//!
//! This module provides the trait-based extension system for RagForge.
//! Users can implement [`Connector`] and [`Tool`] in Rust to create custom
//! ingestion sources and agent-callable tools alongside the schema-generated
//! ones ([`crate::tools::build_tools`]).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           ConnectorRegistry              │
//! │  ┌─────────────┐     ┌────────────┐      │
//! │  │ Filesystem  │     │  Custom    │      │
//! │  │   / Web     │     │  (Rust)    │      │
//! │  └─────────────┘     └────────────┘      │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!          ingest::run_sync() → graph adapter
//! ```
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │              ToolRegistry                │
//! │  ┌─────────────┐     ┌────────────┐      │
//! │  │  Schema-    │     │  Custom    │      │
//! │  │  generated  │     │  (Rust)    │      │
//! │  └─────────────┘     └────────────┘      │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!          agent runtime / HTTP tool surface
//! ```
//!
//! # Usage
//!
//! ```rust
//! use ragforge::traits::{ConnectorRegistry, ToolRegistry};
//!
//! let mut connectors = ConnectorRegistry::new();
//! // connectors.register(Box::new(MyConnector::new()));
//!
//! let mut tools = ToolRegistry::new();
//! // tools.register(Box::new(MyTool::new()));
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::config::Config;
use crate::models::SourceItem;

// ═══════════════════════════════════════════════════════════════════════
// Connector Trait
// ═══════════════════════════════════════════════════════════════════════

/// A data source connector that produces entities for ingestion.
///
/// Implement this trait to create a custom connector in Rust. The
/// connector is responsible for scanning an external data source and
/// returning a list of [`SourceItem`]s that flow through the standard
/// ingestion pipeline (chunking → hashing → graph upsert → embedding).
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use ragforge::models::SourceItem;
/// use ragforge::traits::Connector;
///
/// pub struct DatabaseConnector {
///     connection_string: String,
/// }
///
/// #[async_trait]
/// impl Connector for DatabaseConnector {
///     fn name(&self) -> &str { "database" }
///     fn description(&self) -> &str { "Ingest rows from a database table" }
///     fn connector_type(&self) -> &str { "custom" }
///
///     async fn scan(&self) -> Result<Vec<SourceItem>> {
///         Ok(vec![])
///     }
/// }
/// ```
#[async_trait]
pub trait Connector: Send + Sync {
    /// Returns the connector instance name (e.g. `"docs"`).
    fn name(&self) -> &str;

    /// Returns a one-line description of what this connector does.
    fn description(&self) -> &str;

    /// Returns the connector type identifier (e.g. `"filesystem"`, `"web"`, `"custom"`).
    fn connector_type(&self) -> &str {
        "custom"
    }

    /// Returns the source label used to tag entities from this connector.
    /// Defaults to `"{connector_type}:{name}"`.
    fn source_label(&self) -> String {
        format!("{}:{}", self.connector_type(), self.name())
    }

    /// Scan the data source and return all items to ingest.
    async fn scan(&self) -> Result<Vec<SourceItem>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// An agent-callable tool. Implement this trait to add a custom Rust tool
/// alongside the ones [`crate::tools::build_tools`] generates from the
/// schema.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's name, used as the agent-facing call name.
    fn name(&self) -> &str;

    /// Returns a one-line description for agent/tool-list discovery.
    fn description(&self) -> &str;

    /// Whether this tool is schema-generated/built-in. Defaults to `false`.
    fn is_builtin(&self) -> bool {
        false
    }

    /// Returns the JSON Schema for this tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with validated parameters against a context `C`.
    async fn execute(&self, params: Value, ctx: &crate::tools::ToolContext) -> Result<Value>;
}

// ═══════════════════════════════════════════════════════════════════════
// Registries
// ═══════════════════════════════════════════════════════════════════════

/// Registry for connectors (built-in and custom).
pub struct ConnectorRegistry {
    connectors: Vec<Box<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self { connectors: Vec::new() }
    }

    /// Create a registry pre-loaded with the filesystem/web connectors
    /// declared in config, if any.
    pub fn from_config(config: &Config) -> Self {
        use crate::connector_fs::FilesystemConnector;
        use crate::connector_web::WebConnector;

        let mut registry = Self::new();

        if let Some(fs_config) = &config.connectors.filesystem {
            registry.register(Box::new(FilesystemConnector::new("default".to_string(), fs_config.clone())));
        }
        if let Some(web_config) = &config.connectors.web {
            registry.register(Box::new(WebConnector::new("default".to_string(), web_config.clone())));
        }

        registry
    }

    pub fn register(&mut self, connector: Box<dyn Connector>) {
        self.connectors.push(connector);
    }

    pub fn connectors(&self) -> &[Box<dyn Connector>] {
        &self.connectors
    }

    pub fn connectors_by_type(&self, connector_type: &str) -> Vec<&dyn Connector> {
        self.connectors
            .iter()
            .filter(|c| c.connector_type() == connector_type)
            .map(|c| c.as_ref())
            .collect()
    }

    pub fn find(&self, connector_type: &str, name: &str) -> Option<&dyn Connector> {
        self.connectors
            .iter()
            .find(|c| c.connector_type() == connector_type && c.name() == name)
            .map(|c| c.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.connectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.connectors.len()
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry for tools (schema-generated and custom Rust).
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Create a tool registry pre-loaded with the schema-generated tools.
    pub fn from_schema(schema: &crate::schema::Schema) -> Self {
        let mut registry = Self::new();
        for tool in crate::tools::build_tools(schema) {
            registry.register(tool);
        }
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_registry_from_schema_includes_describe_schema() {
        let schema = crate::schema::default_schema();
        let registry = ToolRegistry::from_schema(&schema);
        assert!(registry.find("describe_schema").is_some());
        assert!(registry.find("raw_cypher").is_some());
    }

    #[test]
    fn connector_registry_from_config_is_empty_without_connectors() {
        let config_toml = r#"
            [graph]
            sqlite_path = "./t.db"
            [chunking]
            max_tokens = 100
            [server]
            bind = "127.0.0.1:8080"
        "#;
        let config: Config = toml::from_str(config_toml).unwrap();
        let registry = ConnectorRegistry::from_config(&config);
        assert!(registry.is_empty());
    }
}
