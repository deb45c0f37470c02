//! Ingestion engine.
//!
//! Coordinates the full sync flow: connector scan → entity parsing →
//! content-hash-gated graph upsert → relationship registration → change
//! log → embedding pipeline. Mirrors the teacher's `ingest.rs` shape
//! (scan → normalize → persist → embed, one summary printed at the end)
//! but targets the generic [`GraphAdapter`]/[`Schema`] pair instead of a
//! fixed `documents`/`chunks` store.
//!
//! Writers are serialized against each other (and against readers that
//! care about a consistent snapshot) via [`SqliteGraphAdapter::ingestion_lock`]
//! (`graph.rs`); a sync that cannot acquire the lock within
//! `graph.ingestion_lock_timeout_secs` fails rather than blocking forever.

use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use uuid::Uuid;

use crate::chunking::{content_hash, parse_markdown, LineWindowScopeParser, ScopeParser};
use crate::config::Config;
use crate::embedding::{self, EmbeddingProvider};
use crate::graph::{GraphAdapter, SqliteGraphAdapter};
use crate::models::{Change, ChangeType, EntityValue, FieldValue, SourceItem};
use crate::schema::Schema;
use crate::traits::Connector;

#[derive(Debug, Default, Clone, Copy)]
pub struct IngestReport {
    pub items_scanned: u64,
    pub entities_written: u64,
    pub entities_unchanged: u64,
    pub relationships_written: u64,
    pub changes_recorded: u64,
    pub embeddings_written: u64,
    pub embeddings_pending: u64,
}

struct Relationship {
    from_label: String,
    from_unique: String,
    rel_type: String,
    to_label: String,
    to_unique: String,
}

struct ParsedUnit {
    entity: EntityValue,
    unique_field: &'static str,
}

/// Run a full sync against one connector: scan, parse into schema entities,
/// upsert into the graph, and (if embeddings are enabled) embed every
/// vector-indexed entity that changed.
pub async fn run_sync(
    config: &Config,
    schema: &Schema,
    graph: &SqliteGraphAdapter,
    embedding_provider: &dyn EmbeddingProvider,
    connector: &dyn Connector,
) -> Result<IngestReport> {
    let permit = tokio::time::timeout(
        Duration::from_secs(config.graph.ingestion_lock_timeout_secs),
        graph.ingestion_lock.clone().acquire_owned(),
    )
    .await
    .context("timed out waiting for the ingestion lock")?
    .context("ingestion lock was closed")?;

    let result = run_sync_locked(config, schema, graph, embedding_provider, connector).await;
    drop(permit);
    result
}

async fn run_sync_locked(
    config: &Config,
    schema: &Schema,
    graph: &SqliteGraphAdapter,
    embedding_provider: &dyn EmbeddingProvider,
    connector: &dyn Connector,
) -> Result<IngestReport> {
    let items = connector.scan().await?;
    let mut report = IngestReport { items_scanned: items.len() as u64, ..Default::default() };

    let scope_parser = LineWindowScopeParser;
    let mut pending_embeddings: Vec<(String, String, String, String)> = Vec::new(); // (label, unique, index, text)

    for item in &items {
        let (units, relationships) = match connector.connector_type() {
            "filesystem" => parse_filesystem_item(item, config.chunking.max_tokens, &scope_parser),
            "web" => parse_web_item(item),
            other => {
                tracing_noop(other);
                continue;
            }
        };

        for unit in units {
            let entity_def = schema
                .entity(&unit.entity.label)
                .ok_or_else(|| anyhow::anyhow!("no schema entity for label '{}'", unit.entity.label))?;

            let prior_entity = graph
                .get_entity(&unit.entity.label, unit.entity.unique_value(unit.unique_field).unwrap_or_default())
                .await?;
            let existed_before = prior_entity.is_some();

            let changed = graph.upsert_entity(&unit.entity, unit.unique_field).await?;
            if !changed {
                report.entities_unchanged += 1;
                continue;
            }
            report.entities_written += 1;

            let unique_value = unit.entity.unique_value(unit.unique_field).unwrap_or_default().to_string();
            let (diff, lines_added, lines_removed) = match content_field(entity_def) {
                Some(field) => {
                    let old_text = prior_entity
                        .as_ref()
                        .and_then(|e| e.fields.get(field))
                        .and_then(FieldValue::as_str)
                        .unwrap_or("");
                    let new_text = unit.entity.fields.get(field).and_then(FieldValue::as_str).unwrap_or("");
                    line_diff(old_text, new_text)
                }
                None => (String::new(), 0, 0),
            };
            graph
                .record_change(&Change {
                    id: Uuid::new_v4().to_string(),
                    entity_label: unit.entity.label.clone(),
                    unique_value: unique_value.clone(),
                    change_type: if existed_before { ChangeType::Modified } else { ChangeType::Created },
                    timestamp: chrono::Utc::now(),
                    lines_added,
                    lines_removed,
                    diff,
                })
                .await?;
            report.changes_recorded += 1;

            for index in &entity_def.vector_indexes {
                if let Some(FieldValue::Str(text)) = unit.entity.fields.get(&index.source_field) {
                    pending_embeddings.push((
                        unit.entity.label.clone(),
                        unique_value.clone(),
                        index.name.clone(),
                        text.clone(),
                    ));
                }
            }
        }

        for rel in relationships {
            let from_known = schema
                .entity(&rel.from_label)
                .map(|e| e.relationships.iter().any(|r| r.rel_type == rel.rel_type && r.to_label == rel.to_label))
                .unwrap_or(false);
            if !from_known {
                continue;
            }
            graph
                .upsert_relationship(&rel.from_label, &rel.from_unique, &rel.rel_type, &rel.to_label, &rel.to_unique)
                .await?;
            report.relationships_written += 1;
        }
    }

    if !config.embedding.is_enabled() {
        report.embeddings_pending = pending_embeddings.len() as u64;
        return Ok(report);
    }

    for batch in pending_embeddings.chunks(config.embedding.batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|(_, _, _, text)| text.clone()).collect();
        match embedding::embed_texts(embedding_provider, &config.embedding, &texts).await {
            Ok(vectors) => {
                for (item, vector) in batch.iter().zip(vectors) {
                    let (label, unique_value, index_name, _) = item;
                    graph.write_embedding(label, unique_value, index_name, &vector).await?;
                    report.embeddings_written += 1;
                }
            }
            Err(_) => {
                report.embeddings_pending += batch.len() as u64;
            }
        }
    }

    Ok(report)
}

fn tracing_noop(_connector_type: &str) {}

/// The field whose text a `Change` record diffs, for entities with
/// content worth tracking. Prefers the fulltext field over the vector
/// source field since they usually coincide; falls back to `None` for
/// structural entities (`File`, `Directory`, `Project`) with no running text.
fn content_field(entity_def: &crate::schema::EntityDef) -> Option<&str> {
    entity_def
        .fulltext_fields
        .first()
        .map(|s| s.as_str())
        .or_else(|| entity_def.vector_indexes.first().map(|v| v.source_field.as_str()))
}

/// Computes a unified line diff from `old` to `new`, along with inserted/
/// removed line counts. Applying the returned diff to `old` reproduces `new`.
fn line_diff(old: &str, new: &str) -> (String, i64, i64) {
    use similar::{ChangeTag, TextDiff};

    let diff = TextDiff::from_lines(old, new);
    let (mut added, mut removed) = (0i64, 0i64);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }
    let unified = diff.unified_diff().context_radius(3).header("old", "new").to_string();
    (unified, added, removed)
}

fn parse_filesystem_item(
    item: &SourceItem,
    max_tokens: usize,
    scope_parser: &dyn ScopeParser,
) -> (Vec<ParsedUnit>, Vec<Relationship>) {
    let mut units = Vec::new();
    let mut rels = Vec::new();

    let path = Path::new(&item.source_id);
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_string();
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or(&item.source_id).to_string();
    let directory = path.parent().map(|p| p.to_string_lossy().to_string()).unwrap_or_default();

    let file_entity = EntityValue::new("File")
        .with_field("path", FieldValue::Str(item.source_id.clone()))
        .with_field("name", FieldValue::Str(name))
        .with_field("directory", FieldValue::Str(directory.clone()))
        .with_field("extension", FieldValue::Str(extension.clone()))
        .with_field("contentHash", FieldValue::Str(content_hash(&item.body)))
        .with_field("mtime", FieldValue::DateTime(item.updated_at));
    units.push(ParsedUnit { entity: file_entity, unique_field: "path" });

    for (dir_path, depth) in ancestor_directories(&directory) {
        let dir_entity = EntityValue::new("Directory")
            .with_field("path", FieldValue::Str(dir_path.clone()))
            .with_field("depth", FieldValue::Number(depth as f64));
        units.push(ParsedUnit { entity: dir_entity, unique_field: "path" });
    }
    if !directory.is_empty() {
        rels.push(Relationship {
            from_label: "File".to_string(),
            from_unique: item.source_id.clone(),
            rel_type: "IN_DIRECTORY".to_string(),
            to_label: "Directory".to_string(),
            to_unique: directory.clone(),
        });
        let ancestors = ancestor_directories(&directory);
        for pair in ancestors.windows(2) {
            rels.push(Relationship {
                from_label: "Directory".to_string(),
                from_unique: pair[1].0.clone(),
                rel_type: "PARENT_OF".to_string(),
                to_label: "Directory".to_string(),
                to_unique: pair[0].0.clone(),
            });
        }
    }

    if extension == "md" {
        let parsed = parse_markdown(&item.source_id, item.title.as_deref(), &item.body, max_tokens);
        let doc_unique = parsed.document.unique_value("uuid").unwrap_or_default().to_string();
        units.push(ParsedUnit { entity: parsed.document, unique_field: "uuid" });

        for section in parsed.sections {
            let section_unique = section.section.unique_value("uuid").unwrap_or_default().to_string();
            units.push(ParsedUnit { entity: section.section, unique_field: "uuid" });
            rels.push(Relationship {
                from_label: "MarkdownSection".to_string(),
                from_unique: section_unique.clone(),
                rel_type: "SECTION_OF".to_string(),
                to_label: "MarkdownDocument".to_string(),
                to_unique: doc_unique.clone(),
            });

            for code_block in section.code_blocks {
                let block_unique = code_block.unique_value("uuid").unwrap_or_default().to_string();
                units.push(ParsedUnit { entity: code_block, unique_field: "uuid" });
                rels.push(Relationship {
                    from_label: "CodeBlock".to_string(),
                    from_unique: block_unique,
                    rel_type: "CONTAINED_IN".to_string(),
                    to_label: "MarkdownSection".to_string(),
                    to_unique: section_unique.clone(),
                });
            }
        }
    } else {
        for scope in scope_parser.parse(&item.source_id, &item.body, max_tokens) {
            let scope_unique = scope.unique_value("uuid").unwrap_or_default().to_string();
            units.push(ParsedUnit { entity: scope, unique_field: "uuid" });
            rels.push(Relationship {
                from_label: "Scope".to_string(),
                from_unique: scope_unique,
                rel_type: "DEFINED_IN".to_string(),
                to_label: "File".to_string(),
                to_unique: item.source_id.clone(),
            });
        }
    }

    (units, rels)
}

/// Returns `(path, depth)` for every ancestor directory of `directory`,
/// nearest-first, so `windows(2)` pairs `[child, parent]`.
fn ancestor_directories(directory: &str) -> Vec<(String, usize)> {
    if directory.is_empty() {
        return Vec::new();
    }
    let mut out = Vec::new();
    let mut current = Path::new(directory);
    loop {
        let depth = current.components().count();
        out.push((current.to_string_lossy().to_string(), depth));
        match current.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => current = parent,
            _ => break,
        }
    }
    out
}

fn parse_web_item(item: &SourceItem) -> (Vec<ParsedUnit>, Vec<Relationship>) {
    let url = item.source_url.clone().unwrap_or_else(|| item.source_id.clone());
    let entity = EntityValue::new("WebPage")
        .with_field("url", FieldValue::Str(url))
        .with_field("textContent", FieldValue::Str(item.body.clone()))
        .with_field("crawlDepth", FieldValue::Number(0.0))
        .with_field("contentHash", FieldValue::Str(content_hash(&item.body)))
        .with_field("crawledAt", FieldValue::DateTime(item.updated_at));
    (vec![ParsedUnit { entity, unique_field: "url" }], Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AgentConfig, ChunkingConfig, ConnectorsConfig, EmbeddingConfig, GraphConfig, LLMConfig, RetrievalConfig,
        ServerConfig,
    };
    use crate::embedding::DisabledProvider;
    use crate::schema::default_schema;
    use async_trait::async_trait;
    use chrono::Utc;

    struct FixtureConnector(Vec<SourceItem>);

    #[async_trait]
    impl Connector for FixtureConnector {
        fn name(&self) -> &str {
            "fixture"
        }
        fn description(&self) -> &str {
            "test fixture"
        }
        fn connector_type(&self) -> &str {
            "filesystem"
        }
        async fn scan(&self) -> Result<Vec<SourceItem>> {
            Ok(self.0.clone())
        }
    }

    struct WebFixtureConnector(Vec<SourceItem>);

    #[async_trait]
    impl Connector for WebFixtureConnector {
        fn name(&self) -> &str {
            "fixture"
        }
        fn description(&self) -> &str {
            "test fixture"
        }
        fn connector_type(&self) -> &str {
            "web"
        }
        async fn scan(&self) -> Result<Vec<SourceItem>> {
            Ok(self.0.clone())
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
    async fn sync_writes_file_and_scope_entities() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir.path().join("g.db"));
        let graph = SqliteGraphAdapter::connect(&cfg).await.unwrap();
        graph.run_migrations().await.unwrap();
        let schema = default_schema();

        let connector = FixtureConnector(vec![SourceItem {
            source: "filesystem:test".to_string(),
            source_id: "src/lib.rs".to_string(),
            source_url: None,
            title: None,
            content_type: "text/plain".to_string(),
            body: "fn main() {\n    println!(\"hi\");\n}\n".to_string(),
            updated_at: Utc::now(),
        }]);

        let report = run_sync(&cfg, &schema, &graph, &DisabledProvider, &connector).await.unwrap();
        assert!(report.entities_written >= 2, "expected at least a File and a Scope entity");
        assert!(report.relationships_written >= 1);

        let file = graph.get_entity("File", "src/lib.rs").await.unwrap();
        assert!(file.is_some());
    }

    #[tokio::test]
    async fn modified_web_page_records_a_real_diff() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir.path().join("g.db"));
        let graph = SqliteGraphAdapter::connect(&cfg).await.unwrap();
        graph.run_migrations().await.unwrap();
        let schema = default_schema();

        let mut item = SourceItem {
            source: "web:test".to_string(),
            source_id: "https://example.com/page".to_string(),
            source_url: Some("https://example.com/page".to_string()),
            title: None,
            content_type: "text/html".to_string(),
            body: "line one\nline two\n".to_string(),
            updated_at: Utc::now(),
        };
        let connector = WebFixtureConnector(vec![item.clone()]);
        run_sync(&cfg, &schema, &graph, &DisabledProvider, &connector).await.unwrap();

        item.body = "line one\nline two\nline three\n".to_string();
        let connector = WebFixtureConnector(vec![item]);
        let report = run_sync(&cfg, &schema, &graph, &DisabledProvider, &connector).await.unwrap();
        assert!(report.changes_recorded > 0);

        let rows = graph
            .raw_query(
                "SELECT diff, lines_added, lines_removed FROM changes WHERE change_type = 'modified' AND entity_label = 'WebPage'",
                &[],
            )
            .await
            .unwrap();
        assert!(!rows.is_empty(), "expected a recorded WebPage modification");
        let row = &rows[0];
        assert!(row["lines_added"].as_i64().unwrap() > 0);
        assert_eq!(row["lines_removed"].as_i64().unwrap(), 0);
        let diff_text = row["diff"].as_str().unwrap();
        assert!(diff_text.contains("line three"), "diff should mention the added line: {diff_text}");
    }

    #[tokio::test]
    async fn sync_is_idempotent_on_unchanged_content() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir.path().join("g.db"));
        let graph = SqliteGraphAdapter::connect(&cfg).await.unwrap();
        graph.run_migrations().await.unwrap();
        let schema = default_schema();

        let item = SourceItem {
            source: "filesystem:test".to_string(),
            source_id: "README.md".to_string(),
            source_url: None,
            title: Some("Readme".to_string()),
            content_type: "text/markdown".to_string(),
            body: "# Title\n\nSome content.\n".to_string(),
            updated_at: Utc::now(),
        };
        let connector = FixtureConnector(vec![item]);

        let first = run_sync(&cfg, &schema, &graph, &DisabledProvider, &connector).await.unwrap();
        let second = run_sync(&cfg, &schema, &graph, &DisabledProvider, &connector).await.unwrap();
        assert!(first.entities_written > 0);
        assert_eq!(second.entities_written, 0, "unchanged content must not rewrite entities");
    }
}
