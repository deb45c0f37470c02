//! The [`GraphAdapter`] trait and a SQLite-backed reference implementation.
//!
//! The real property graph (§1) is an external collaborator this crate
//! does not implement; [`SqliteGraphAdapter`] exists so the rest of the
//! system — ingestion, hybrid search, the tool registry, the agent
//! runtime — is runnable and testable end to end. It generalizes the
//! teacher's `documents`/`chunks`/`chunks_fts`/`chunk_vectors` schema
//! (`migrate.rs`, `db.rs`) into generic entity/relationship/full-text/
//! vector/change tables keyed by `(label, unique_value)` instead of a
//! single hardcoded document shape. A Neo4j/Memgraph-backed adapter is a
//! drop-in future implementation of the same trait.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::models::{Change, ChangeType, EntityValue, FieldValue};
use crate::schema::VectorIndexDef;

#[derive(Debug, Clone)]
pub enum FilterOp {
    Equals(FieldValue),
    Contains(String),
    StartsWith(String),
    EndsWith(String),
    Regex(String),
    Gt(f64),
    Gte(f64),
    Lt(f64),
    Lte(f64),
    In(Vec<FieldValue>),
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub filters: BTreeMap<String, FilterOp>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub order_by: Option<String>,
}

fn matches_filter(value: Option<&FieldValue>, op: &FilterOp) -> bool {
    match op {
        FilterOp::Equals(expected) => value == Some(expected),
        FilterOp::Contains(sub) => value
            .and_then(FieldValue::as_str)
            .map(|s| s.contains(sub.as_str()))
            .unwrap_or(false),
        FilterOp::StartsWith(prefix) => value
            .and_then(FieldValue::as_str)
            .map(|s| s.starts_with(prefix.as_str()))
            .unwrap_or(false),
        FilterOp::EndsWith(suffix) => value
            .and_then(FieldValue::as_str)
            .map(|s| s.ends_with(suffix.as_str()))
            .unwrap_or(false),
        FilterOp::Regex(pattern) => regex::Regex::new(pattern)
            .ok()
            .zip(value.and_then(FieldValue::as_str))
            .map(|(re, s)| re.is_match(s))
            .unwrap_or(false),
        FilterOp::Gt(n) => value.and_then(FieldValue::as_f64).map(|v| v > *n).unwrap_or(false),
        FilterOp::Gte(n) => value.and_then(FieldValue::as_f64).map(|v| v >= *n).unwrap_or(false),
        FilterOp::Lt(n) => value.and_then(FieldValue::as_f64).map(|v| v < *n).unwrap_or(false),
        FilterOp::Lte(n) => value.and_then(FieldValue::as_f64).map(|v| v <= *n).unwrap_or(false),
        FilterOp::In(options) => value.map(|v| options.contains(v)).unwrap_or(false),
    }
}

/// Interface to the property store: parameterised lookups, vector/full-text
/// indexes, relationship traversal, and the change log. Implementations
/// must serialize writes so that readers never observe a half-written
/// entity (content-hash gating achieves this for `upsert_entity`).
#[async_trait]
pub trait GraphAdapter: Send + Sync {
    async fn upsert_entity(&self, entity: &EntityValue, unique_field: &str) -> Result<bool>;
    async fn get_entity(&self, label: &str, unique_value: &str) -> Result<Option<EntityValue>>;
    async fn query_entities(&self, label: &str, opts: &QueryOptions) -> Result<Vec<EntityValue>>;
    async fn delete_entity(&self, label: &str, unique_value: &str) -> Result<()>;

    async fn upsert_relationship(
        &self,
        from_label: &str,
        from_unique: &str,
        rel_type: &str,
        to_label: &str,
        to_unique: &str,
    ) -> Result<()>;

    async fn expand(
        &self,
        label: &str,
        unique_value: &str,
        rel_type: &str,
        depth: usize,
        max_items: usize,
    ) -> Result<Vec<EntityValue>>;

    async fn record_change(&self, change: &Change) -> Result<()>;

    async fn fulltext_search(
        &self,
        label: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<(EntityValue, f64, String)>>;

    async fn write_embedding(
        &self,
        label: &str,
        unique_value: &str,
        index_name: &str,
        embedding: &[f32],
    ) -> Result<()>;

    async fn vector_search(
        &self,
        label: &str,
        index: &VectorIndexDef,
        query_vec: &[f32],
        limit: i64,
    ) -> Result<Vec<(EntityValue, f64)>>;

    /// Raw, parameterised statement against the backing store. On this
    /// reference adapter the "Cypher" text is interpreted as raw SQL
    /// against the tables below — a documented stand-in, since the real
    /// property graph collaborator is out of scope (see DESIGN.md).
    async fn raw_query(&self, statement: &str, params: &[JsonValue]) -> Result<Vec<JsonValue>>;
}

pub struct SqliteGraphAdapter {
    pool: SqlitePool,
    pub ingestion_lock: Arc<Semaphore>,
}

impl SqliteGraphAdapter {
    pub async fn connect(config: &Config) -> Result<Self> {
        let db_path = &config.graph.sqlite_path;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self {
            pool,
            ingestion_lock: Arc::new(Semaphore::new(1)),
        })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entities (
                label TEXT NOT NULL,
                unique_value TEXT NOT NULL,
                fields_json TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (label, unique_value)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='entities_fts'",
        )
        .fetch_one(&self.pool)
        .await?;
        if !fts_exists {
            sqlx::query(
                r#"
                CREATE VIRTUAL TABLE entities_fts USING fts5(
                    label UNINDEXED,
                    unique_value UNINDEXED,
                    text
                )
                "#,
            )
            .execute(&self.pool)
            .await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entity_vectors (
                label TEXT NOT NULL,
                unique_value TEXT NOT NULL,
                index_name TEXT NOT NULL,
                embedding BLOB NOT NULL,
                PRIMARY KEY (label, unique_value, index_name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS relationships (
                from_label TEXT NOT NULL,
                from_unique TEXT NOT NULL,
                rel_type TEXT NOT NULL,
                to_label TEXT NOT NULL,
                to_unique TEXT NOT NULL,
                PRIMARY KEY (from_label, from_unique, rel_type, to_label, to_unique)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS changes (
                id TEXT PRIMARY KEY,
                entity_label TEXT NOT NULL,
                unique_value TEXT NOT NULL,
                change_type TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                lines_added INTEGER NOT NULL,
                lines_removed INTEGER NOT NULL,
                diff TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entities_label ON entities(label)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_relationships_from ON relationships(from_label, from_unique, rel_type)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_changes_entity ON changes(entity_label, unique_value)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_entity(label: &str, unique_value: String, fields_json: &str) -> Result<EntityValue> {
    let fields: BTreeMap<String, FieldValue> = serde_json::from_str(fields_json)?;
    let mut entity = EntityValue::new(label);
    entity.fields = fields;
    entity.fields.insert("__unique_value".to_string(), FieldValue::Str(unique_value));
    Ok(entity)
}

#[async_trait]
impl GraphAdapter for SqliteGraphAdapter {
    async fn upsert_entity(&self, entity: &EntityValue, unique_field: &str) -> Result<bool> {
        let unique_value = entity
            .unique_value(unique_field)
            .ok_or_else(|| anyhow::anyhow!("entity missing unique field '{}'", unique_field))?
            .to_string();

        let content_hash = entity
            .fields
            .get("contentHash")
            .and_then(FieldValue::as_str)
            .unwrap_or_default()
            .to_string();

        let existing_hash: Option<String> = sqlx::query_scalar(
            "SELECT content_hash FROM entities WHERE label = ? AND unique_value = ?",
        )
        .bind(&entity.label)
        .bind(&unique_value)
        .fetch_optional(&self.pool)
        .await?;

        if existing_hash.as_deref() == Some(content_hash.as_str()) && !content_hash.is_empty() {
            return Ok(false);
        }

        let fields_json = serde_json::to_string(&entity.fields)?;
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO entities (label, unique_value, fields_json, content_hash, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(label, unique_value) DO UPDATE SET
                fields_json = excluded.fields_json,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entity.label)
        .bind(&unique_value)
        .bind(&fields_json)
        .bind(&content_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;

        // Every string-valued field is indexed for full-text search; callers
        // that want to restrict matches to specific fields do so via the
        // query text itself (FTS5 `column:term` syntax isn't exposed here
        // since the index is a single unnamed `text` column per entity).
        let fts_text = entity
            .fields
            .values()
            .filter_map(FieldValue::as_str)
            .collect::<Vec<_>>()
            .join(" \n ");

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entities_fts WHERE label = ? AND unique_value = ?")
            .bind(&entity.label)
            .bind(&unique_value)
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO entities_fts (label, unique_value, text) VALUES (?, ?, ?)")
            .bind(&entity.label)
            .bind(&unique_value)
            .bind(&fts_text)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn get_entity(&self, label: &str, unique_value: &str) -> Result<Option<EntityValue>> {
        let row = sqlx::query(
            "SELECT unique_value, fields_json FROM entities WHERE label = ? AND unique_value = ?",
        )
        .bind(label)
        .bind(unique_value)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let uv: String = row.get("unique_value");
                let fields_json: String = row.get("fields_json");
                Ok(Some(row_to_entity(label, uv, &fields_json)?))
            }
            None => Ok(None),
        }
    }

    async fn query_entities(&self, label: &str, opts: &QueryOptions) -> Result<Vec<EntityValue>> {
        let rows = sqlx::query("SELECT unique_value, fields_json FROM entities WHERE label = ?")
            .bind(label)
            .fetch_all(&self.pool)
            .await?;

        let mut entities: Vec<EntityValue> = Vec::new();
        for row in rows {
            let uv: String = row.get("unique_value");
            let fields_json: String = row.get("fields_json");
            let entity = row_to_entity(label, uv, &fields_json)?;

            let matches = opts
                .filters
                .iter()
                .all(|(field, op)| matches_filter(entity.fields.get(field), op));
            if matches {
                entities.push(entity);
            }
        }

        if let Some(order_field) = &opts.order_by {
            entities.sort_by(|a, b| {
                let av = a.fields.get(order_field).and_then(FieldValue::as_str).unwrap_or("");
                let bv = b.fields.get(order_field).and_then(FieldValue::as_str).unwrap_or("");
                av.cmp(bv)
            });
        }

        if let Some(offset) = opts.offset {
            entities = entities.into_iter().skip(offset.max(0) as usize).collect();
        }
        if let Some(limit) = opts.limit {
            entities.truncate(limit.max(0) as usize);
        }

        Ok(entities)
    }

    async fn delete_entity(&self, label: &str, unique_value: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM entities WHERE label = ? AND unique_value = ?")
            .bind(label)
            .bind(unique_value)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM entities_fts WHERE label = ? AND unique_value = ?")
            .bind(label)
            .bind(unique_value)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM entity_vectors WHERE label = ? AND unique_value = ?")
            .bind(label)
            .bind(unique_value)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "DELETE FROM relationships WHERE (from_label = ? AND from_unique = ?) OR (to_label = ? AND to_unique = ?)",
        )
        .bind(label)
        .bind(unique_value)
        .bind(label)
        .bind(unique_value)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_relationship(
        &self,
        from_label: &str,
        from_unique: &str,
        rel_type: &str,
        to_label: &str,
        to_unique: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO relationships (from_label, from_unique, rel_type, to_label, to_unique)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(from_label)
        .bind(from_unique)
        .bind(rel_type)
        .bind(to_label)
        .bind(to_unique)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn expand(
        &self,
        label: &str,
        unique_value: &str,
        rel_type: &str,
        depth: usize,
        max_items: usize,
    ) -> Result<Vec<EntityValue>> {
        let depth = depth.clamp(1, 5);
        let mut frontier = vec![(label.to_string(), unique_value.to_string())];
        let mut results = Vec::new();
        let mut seen = std::collections::HashSet::new();
        seen.insert((label.to_string(), unique_value.to_string()));

        for _ in 0..depth {
            let mut next_frontier = Vec::new();
            for (cur_label, cur_unique) in &frontier {
                let rows = sqlx::query(
                    "SELECT to_label, to_unique FROM relationships WHERE from_label = ? AND from_unique = ? AND rel_type = ?",
                )
                .bind(cur_label)
                .bind(cur_unique)
                .bind(rel_type)
                .fetch_all(&self.pool)
                .await?;

                for row in rows {
                    let to_label: String = row.get("to_label");
                    let to_unique: String = row.get("to_unique");
                    let key = (to_label.clone(), to_unique.clone());
                    if seen.insert(key.clone()) {
                        if let Some(entity) = self.get_entity(&to_label, &to_unique).await? {
                            results.push(entity);
                            if results.len() >= max_items {
                                return Ok(results);
                            }
                        }
                        next_frontier.push((to_label, to_unique));
                    }
                }
            }
            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }

        Ok(results)
    }

    async fn record_change(&self, change: &Change) -> Result<()> {
        let change_type = match change.change_type {
            ChangeType::Created => "created",
            ChangeType::Modified => "modified",
            ChangeType::Deleted => "deleted",
        };
        sqlx::query(
            r#"
            INSERT INTO changes (id, entity_label, unique_value, change_type, timestamp, lines_added, lines_removed, diff)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&change.id)
        .bind(&change.entity_label)
        .bind(&change.unique_value)
        .bind(change_type)
        .bind(change.timestamp.timestamp())
        .bind(change.lines_added)
        .bind(change.lines_removed)
        .bind(&change.diff)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fulltext_search(
        &self,
        label: &str,
        query: &str,
        limit: i64,
    ) -> Result<Vec<(EntityValue, f64, String)>> {
        let rows = sqlx::query(
            r#"
            SELECT unique_value, rank,
                   snippet(entities_fts, 2, '>>>', '<<<', '...', 48) AS snippet
            FROM entities_fts
            WHERE label = ? AND entities_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(label)
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::new();
        for row in rows {
            let unique_value: String = row.get("unique_value");
            let rank: f64 = row.get("rank");
            let snippet: String = row.get("snippet");
            if let Some(entity) = self.get_entity(label, &unique_value).await? {
                out.push((entity, -rank, snippet));
            }
        }
        Ok(out)
    }

    async fn write_embedding(
        &self,
        label: &str,
        unique_value: &str,
        index_name: &str,
        embedding: &[f32],
    ) -> Result<()> {
        let blob = crate::embedding::vec_to_blob(embedding);
        sqlx::query(
            r#"
            INSERT INTO entity_vectors (label, unique_value, index_name, embedding)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(label, unique_value, index_name) DO UPDATE SET embedding = excluded.embedding
            "#,
        )
        .bind(label)
        .bind(unique_value)
        .bind(index_name)
        .bind(blob)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn vector_search(
        &self,
        label: &str,
        index: &VectorIndexDef,
        query_vec: &[f32],
        limit: i64,
    ) -> Result<Vec<(EntityValue, f64)>> {
        let rows = sqlx::query(
            "SELECT unique_value, embedding FROM entity_vectors WHERE label = ? AND index_name = ?",
        )
        .bind(label)
        .bind(&index.name)
        .fetch_all(&self.pool)
        .await?;

        let mut scored = Vec::new();
        for row in rows {
            let unique_value: String = row.get("unique_value");
            let blob: Vec<u8> = row.get("embedding");
            let vec = crate::embedding::blob_to_vec(&blob);
            let score = crate::embedding::cosine_similarity(query_vec, &vec) as f64;
            scored.push((unique_value, score));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit.max(0) as usize);

        let mut out = Vec::new();
        for (unique_value, score) in scored {
            if let Some(entity) = self.get_entity(label, &unique_value).await? {
                out.push((entity, score));
            }
        }
        Ok(out)
    }

    async fn raw_query(&self, statement: &str, params: &[JsonValue]) -> Result<Vec<JsonValue>> {
        let mut query = sqlx::query(statement);
        for p in params {
            query = match p {
                JsonValue::String(s) => query.bind(s.clone()),
                JsonValue::Number(n) if n.is_i64() => query.bind(n.as_i64().unwrap()),
                JsonValue::Number(n) => query.bind(n.as_f64().unwrap_or(0.0)),
                JsonValue::Bool(b) => query.bind(*b),
                _ => query.bind(p.to_string()),
            };
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut out = Vec::new();
        for row in rows {
            let mut obj = serde_json::Map::new();
            for (i, col) in row.columns().iter().enumerate() {
                let name = col.name().to_string();
                let value: Result<String, _> = row.try_get(i);
                if let Ok(v) = value {
                    obj.insert(name, JsonValue::String(v));
                } else if let Ok(v) = row.try_get::<i64, _>(i) {
                    obj.insert(name, JsonValue::Number(v.into()));
                } else if let Ok(v) = row.try_get::<f64, _>(i) {
                    obj.insert(
                        name,
                        serde_json::Number::from_f64(v).map(JsonValue::Number).unwrap_or(JsonValue::Null),
                    );
                } else {
                    obj.insert(name, JsonValue::Null);
                }
            }
            out.push(JsonValue::Object(obj));
        }
        Ok(out)
    }
}

use sqlx::Column;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, ChunkingConfig, ConnectorsConfig, EmbeddingConfig, GraphConfig, LLMConfig, RetrievalConfig, ServerConfig};
    use crate::models::FieldValue;

    fn test_config(path: &std::path::Path) -> Config {
        Config {
            graph: GraphConfig {
                sqlite_path: path.to_path_buf(),
                ingestion_lock_timeout_secs: 30,
            },
            chunking: ChunkingConfig { max_tokens: 500, overlap_tokens: 0 },
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LLMConfig::default(),
            server: ServerConfig { bind: "127.0.0.1:0".to_string() },
            agent: AgentConfig::default(),
            connectors: ConnectorsConfig::default(),
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_on_unchanged_hash() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir.path().join("g.db"));
        let adapter = SqliteGraphAdapter::connect(&cfg).await.unwrap();
        adapter.run_migrations().await.unwrap();

        let entity = EntityValue::new("File")
            .with_field("path", FieldValue::Str("a.rs".into()))
            .with_field("contentHash", FieldValue::Str("h1".into()));

        let changed1 = adapter.upsert_entity(&entity, "path").await.unwrap();
        let changed2 = adapter.upsert_entity(&entity, "path").await.unwrap();
        assert!(changed1);
        assert!(!changed2, "re-upserting identical content hash must be a no-op");
    }

    #[tokio::test]
    async fn expand_respects_depth_and_max_items() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir.path().join("g.db"));
        let adapter = SqliteGraphAdapter::connect(&cfg).await.unwrap();
        adapter.run_migrations().await.unwrap();

        for i in 0..3 {
            let e = EntityValue::new("Scope")
                .with_field("uuid", FieldValue::Str(format!("s{i}")))
                .with_field("contentHash", FieldValue::Str(format!("h{i}")));
            adapter.upsert_entity(&e, "uuid").await.unwrap();
            adapter
                .upsert_relationship("Scope", "s0", "CONSUMES", "Scope", &format!("s{i}"))
                .await
                .unwrap();
        }

        let related = adapter.expand("Scope", "s0", "CONSUMES", 1, 10).await.unwrap();
        assert_eq!(related.len(), 2);

        let limited = adapter.expand("Scope", "s0", "CONSUMES", 1, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn query_entities_applies_filters() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir.path().join("g.db"));
        let adapter = SqliteGraphAdapter::connect(&cfg).await.unwrap();
        adapter.run_migrations().await.unwrap();

        for (name, line) in [("alpha", 10.0), ("beta", 20.0), ("gamma", 30.0)] {
            let e = EntityValue::new("Scope")
                .with_field("uuid", FieldValue::Str(name.to_string()))
                .with_field("startLine", FieldValue::Number(line))
                .with_field("contentHash", FieldValue::Str(name.to_string()));
            adapter.upsert_entity(&e, "uuid").await.unwrap();
        }

        let mut opts = QueryOptions::default();
        opts.filters.insert("startLine".to_string(), FilterOp::Gte(20.0));
        let results = adapter.query_entities("Scope", &opts).await.unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn fulltext_search_finds_upserted_text() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir.path().join("g.db"));
        let adapter = SqliteGraphAdapter::connect(&cfg).await.unwrap();
        adapter.run_migrations().await.unwrap();

        let e = EntityValue::new("Scope")
            .with_field("uuid", FieldValue::Str("s0".into()))
            .with_field("source", FieldValue::Str("fn quicksort(items: &mut [i32])".into()))
            .with_field("contentHash", FieldValue::Str("h0".into()));
        adapter.upsert_entity(&e, "uuid").await.unwrap();

        let hits = adapter.fulltext_search("Scope", "quicksort", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.unique_value("uuid"), Some("s0"));
    }
}
