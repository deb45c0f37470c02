//! Configuration parsing and validation.
//!
//! RagForge is configured via a TOML file (default: `$HOME/.ragforge/config`).
//! The config defines the graph backing store, chunking parameters,
//! retrieval tuning (fusion weights, fan-out ceiling, rerank strategy),
//! embedding/LLM provider settings, server bind address, agent personas,
//! and connector configurations.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::PersonaColor;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub graph: GraphConfig,
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LLMConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphConfig {
    /// Path to the SQLite file backing the reference `SqliteGraphAdapter`.
    pub sqlite_path: PathBuf,
    /// Seconds to wait to acquire the ingestion lock before timing out.
    #[serde(default = "default_lock_timeout_secs")]
    pub ingestion_lock_timeout_secs: u64,
}

fn default_lock_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

fn default_overlap() -> usize {
    0
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RerankStrategy {
    None,
    TopologyCentrality,
    CodeQuality,
    Recency,
    Llm,
}

impl Default for RerankStrategy {
    fn default() -> Self {
        RerankStrategy::None
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f64,
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    #[serde(default = "default_final_limit")]
    pub final_limit: i64,
    #[serde(default = "default_fanout_ceiling")]
    pub fanout_ceiling: usize,
    #[serde(default)]
    pub reranker: RerankStrategy,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            bm25_weight: default_bm25_weight(),
            candidate_k: default_candidate_k(),
            final_limit: default_final_limit(),
            fanout_ceiling: default_fanout_ceiling(),
            reranker: RerankStrategy::default(),
            min_score: default_min_score(),
        }
    }
}

fn default_vector_weight() -> f64 {
    0.7
}
fn default_bm25_weight() -> f64 {
    0.3
}
fn default_candidate_k() -> i64 {
    80
}
fn default_final_limit() -> i64 {
    12
}
fn default_fanout_ceiling() -> usize {
    8
}
fn default_min_score() -> f64 {
    0.0
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RateLimitStrategy {
    Reactive,
    Proactive,
    None,
}

impl Default for RateLimitStrategy {
    fn default() -> Self {
        RateLimitStrategy::Reactive
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub rate_limit: RateLimitStrategy,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: 16,
            max_retries: 5,
            timeout_secs: 30,
            rate_limit: RateLimitStrategy::Reactive,
            requests_per_minute: 60,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    16
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_requests_per_minute() -> u32 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LLMConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub rate_limit: RateLimitStrategy,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            url: None,
            max_retries: 5,
            timeout_secs: 60,
            rate_limit: RateLimitStrategy::Reactive,
            requests_per_minute: 60,
        }
    }
}

fn default_llm_provider() -> String {
    "disabled".to_string()
}
fn default_llm_timeout_secs() -> u64 {
    60
}

impl LLMConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersonaConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_persona_color")]
    pub color: PersonaColor,
    #[serde(default = "default_persona_language")]
    pub language: String,
    pub description: String,
    pub persona: String,
    #[serde(default)]
    pub is_default: bool,
}

fn default_persona_color() -> PersonaColor {
    PersonaColor::Blue
}
fn default_persona_language() -> String {
    "en".to_string()
}

fn default_personas() -> Vec<PersonaConfig> {
    vec![
        PersonaConfig {
            id: "assistant".to_string(),
            name: "Assistant".to_string(),
            color: PersonaColor::Blue,
            language: "en".to_string(),
            description: "General-purpose helpful assistant".to_string(),
            persona: "You are a careful, concise engineering assistant.".to_string(),
            is_default: true,
        },
        PersonaConfig {
            id: "reviewer".to_string(),
            name: "Reviewer".to_string(),
            color: PersonaColor::Magenta,
            language: "en".to_string(),
            description: "Skeptical code reviewer".to_string(),
            persona: "You are a skeptical senior reviewer who looks for edge cases and regressions.".to_string(),
            is_default: true,
        },
    ]
}

fn default_active_persona() -> String {
    "assistant".to_string()
}

fn default_iteration_cap() -> usize {
    5
}

fn default_summarize_result_threshold() -> usize {
    10
}

fn default_summarize_byte_threshold() -> usize {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_personas")]
    pub personas: Vec<PersonaConfig>,
    #[serde(default = "default_active_persona")]
    pub active_persona_id: String,
    #[serde(default = "default_iteration_cap")]
    pub iteration_cap: usize,
    #[serde(default = "default_summarize_result_threshold")]
    pub summarize_result_threshold: usize,
    #[serde(default = "default_summarize_byte_threshold")]
    pub summarize_byte_threshold: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            personas: default_personas(),
            active_persona_id: default_active_persona(),
            iteration_cap: default_iteration_cap(),
            summarize_result_threshold: default_summarize_result_threshold(),
            summarize_byte_threshold: default_summarize_byte_threshold(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectorsConfig {
    pub filesystem: Option<FilesystemConnectorConfig>,
    pub web: Option<WebConnectorConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemConnectorConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
}

fn default_watch_debounce_ms() -> u64 {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConnectorConfig {
    pub start_url: String,
    #[serde(default = "default_crawl_depth")]
    pub max_depth: usize,
    #[serde(default = "default_crawl_pages")]
    pub max_pages: usize,
}

fn default_crawl_depth() -> usize {
    2
}
fn default_crawl_pages() -> usize {
    100
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.rs".to_string(), "**/*.ts".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    if config.retrieval.final_limit < 1 {
        anyhow::bail!("retrieval.final_limit must be >= 1");
    }

    let weight_sum = config.retrieval.vector_weight + config.retrieval.bm25_weight;
    if (weight_sum - 1.0).abs() > 1e-6 {
        anyhow::bail!(
            "retrieval.vector_weight + retrieval.bm25_weight must sum to 1.0 (got {})",
            weight_sum
        );
    }

    if config.retrieval.fanout_ceiling == 0 {
        anyhow::bail!("retrieval.fanout_ceiling must be > 0");
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!("Unknown embedding provider: '{}'", other),
    }

    match config.llm.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => anyhow::bail!("Unknown LLM provider: '{}'", other),
    }

    if !config
        .agent
        .personas
        .iter()
        .any(|p| p.id == config.agent.active_persona_id)
    {
        anyhow::bail!(
            "agent.active_persona_id '{}' does not match any configured persona",
            config.agent.active_persona_id
        );
    }

    let mut seen_ids = std::collections::HashSet::new();
    for p in &config.agent.personas {
        if !seen_ids.insert(p.id.clone()) {
            anyhow::bail!("duplicate persona id: '{}'", p.id);
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp_config(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f
    }

    const MINIMAL: &str = r#"
        [graph]
        sqlite_path = "./test.db"

        [chunking]
        max_tokens = 500

        [server]
        bind = "127.0.0.1:8080"
    "#;

    #[test]
    fn loads_minimal_config_with_defaults() {
        let f = write_temp_config(MINIMAL);
        let cfg = load_config(f.path()).unwrap();
        assert_eq!(cfg.retrieval.vector_weight, 0.7);
        assert_eq!(cfg.retrieval.bm25_weight, 0.3);
        assert_eq!(cfg.retrieval.fanout_ceiling, 8);
        assert_eq!(cfg.agent.personas.len(), 2);
        assert_eq!(cfg.agent.active_persona_id, "assistant");
    }

    #[test]
    fn rejects_weights_not_summing_to_one() {
        let bad = format!(
            "{MINIMAL}\n[retrieval]\nvector_weight = 0.5\nbm25_weight = 0.9\n"
        );
        let f = write_temp_config(&bad);
        assert!(load_config(f.path()).is_err());
    }

    #[test]
    fn rejects_unknown_active_persona() {
        let bad = format!("{MINIMAL}\n[agent]\nactive_persona_id = \"ghost\"\n");
        let f = write_temp_config(&bad);
        assert!(load_config(f.path()).is_err());
    }
}
