//! Concrete [`Tool`] implementations generated from the schema.
//!
//! [`schema::generate_tools`] produces pure descriptors; [`SchemaTool`]
//! wraps one descriptor and dispatches its name against a
//! [`ToolContext`] backed by a [`GraphAdapter`]. One generic dispatcher
//! replaces the teacher's three hand-written `SearchTool`/`GetTool`/
//! `SourcesTool` structs (`traits.rs`), because the tool surface here is
//! itself schema-driven rather than fixed at compile time.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::{Config, EmbeddingConfig};
use crate::embedding::{self, EmbeddingProvider};
use crate::graph::{FilterOp, GraphAdapter, QueryOptions};
use crate::llm::LLMProvider;
use crate::models::FieldValue;
use crate::schema::{ArgType, Schema, ToolArgSpec, ToolDescriptor};
use crate::search;
use crate::traits::Tool;

pub struct ToolContext {
    pub graph: Arc<dyn GraphAdapter>,
    pub schema: Arc<Schema>,
    pub embedding_config: EmbeddingConfig,
    pub embedding_provider: Arc<dyn EmbeddingProvider>,
    pub config: Arc<Config>,
    pub llm_provider: Arc<dyn LLMProvider>,
}

impl ToolContext {
    pub fn new(
        graph: Arc<dyn GraphAdapter>,
        schema: Arc<Schema>,
        embedding_config: EmbeddingConfig,
        embedding_provider: Arc<dyn EmbeddingProvider>,
        config: Arc<Config>,
        llm_provider: Arc<dyn LLMProvider>,
    ) -> Self {
        Self { graph, schema, embedding_config, embedding_provider, config, llm_provider }
    }
}

fn arg_type_to_json(arg_type: ArgType) -> &'static str {
    match arg_type {
        ArgType::String => "string",
        ArgType::Number => "number",
        ArgType::Boolean => "boolean",
        ArgType::Object => "object",
        ArgType::Array => "array",
    }
}

fn descriptor_to_json_schema(descriptor: &ToolDescriptor) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for a in &descriptor.args {
        properties.insert(
            a.name.clone(),
            json!({ "type": arg_type_to_json(a.arg_type), "description": a.description }),
        );
        if a.required {
            required.push(a.name.clone());
        }
    }

    json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": required,
    })
}

fn field_value_from_json(v: &Value) -> FieldValue {
    match v {
        Value::String(s) => FieldValue::Str(s.clone()),
        Value::Number(n) => FieldValue::Number(n.as_f64().unwrap_or(0.0)),
        Value::Bool(b) => FieldValue::Bool(*b),
        other => FieldValue::Unknown(other.clone()),
    }
}

fn entity_to_json(entity: &crate::models::EntityValue) -> Value {
    serde_json::to_value(entity).unwrap_or(Value::Null)
}

/// A [`Tool`] whose behavior is entirely determined by a generated
/// [`ToolDescriptor`] and the entity label/relationship/index it names.
pub struct SchemaTool {
    descriptor: ToolDescriptor,
}

impl SchemaTool {
    pub fn new(descriptor: ToolDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl Tool for SchemaTool {
    fn name(&self) -> &str {
        &self.descriptor.name
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        descriptor_to_json_schema(&self.descriptor)
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        dispatch(&self.descriptor.name, params, ctx).await
    }
}

async fn dispatch(tool_name: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
    if tool_name == "describe_schema" {
        return Ok(serde_json::to_value(ctx.schema.as_ref())?);
    }

    if tool_name == "raw_cypher" {
        return dispatch_raw_cypher(params, ctx).await;
    }

    if tool_name == "search" {
        return dispatch_search(params, ctx).await;
    }

    if let Some(label) = tool_name.strip_prefix("get_").and_then(|s| s.strip_suffix("_by_id")) {
        return dispatch_get_by_id(label, params, ctx).await;
    }

    if let Some(label) = tool_name.strip_prefix("semantic_search_") {
        return dispatch_semantic_search(label, params, ctx).await;
    }

    if let Some(label) = tool_name.strip_prefix("expand_") {
        return dispatch_expand(label, params, ctx).await;
    }

    if let Some(label) = tool_name.strip_prefix("mutate_") {
        return dispatch_mutate(label, params, ctx).await;
    }

    if let Some(rest) = tool_name.strip_prefix("query_") {
        if let Some(label) = rest.strip_suffix("_by_date_range") {
            return dispatch_range_query(label, params, ctx, true).await;
        }
        if let Some(label) = rest.strip_suffix("_by_number_range") {
            return dispatch_range_query(label, params, ctx, false).await;
        }
        if let Some(label) = rest.strip_suffix("_by_pattern") {
            return dispatch_pattern_query(label, params, ctx).await;
        }
        return dispatch_query(rest, params, ctx).await;
    }

    bail!("no handler registered for tool '{}'", tool_name)
}

async fn dispatch_query(label: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
    let mut opts = QueryOptions::default();

    if let Some(filter_obj) = params.get("filter").and_then(|f| f.as_object()) {
        for (field, predicate) in filter_obj {
            if let Some(op) = parse_predicate(predicate) {
                opts.filters.insert(field.clone(), op);
            }
        }
    }
    opts.limit = params.get("limit").and_then(|v| v.as_i64()).or(Some(20));
    opts.offset = params.get("offset").and_then(|v| v.as_i64());
    opts.order_by = params.get("orderBy").and_then(|v| v.as_str()).map(String::from);

    let entities = ctx.graph.query_entities(label, &opts).await?;
    Ok(json!({ "results": entities.iter().map(entity_to_json).collect::<Vec<_>>() }))
}

fn parse_predicate(predicate: &Value) -> Option<FilterOp> {
    let obj = predicate.as_object()?;
    let op = obj.get("op").and_then(|v| v.as_str()).unwrap_or("equals");
    let value = obj.get("value")?;

    match op {
        "equals" => Some(FilterOp::Equals(field_value_from_json(value))),
        "contains" => Some(FilterOp::Contains(value.as_str()?.to_string())),
        "startsWith" => Some(FilterOp::StartsWith(value.as_str()?.to_string())),
        "endsWith" => Some(FilterOp::EndsWith(value.as_str()?.to_string())),
        "regex" => Some(FilterOp::Regex(value.as_str()?.to_string())),
        "gt" => Some(FilterOp::Gt(value.as_f64()?)),
        "gte" => Some(FilterOp::Gte(value.as_f64()?)),
        "lt" => Some(FilterOp::Lt(value.as_f64()?)),
        "lte" => Some(FilterOp::Lte(value.as_f64()?)),
        "in" => Some(FilterOp::In(value.as_array()?.iter().map(field_value_from_json).collect())),
        _ => None,
    }
}

async fn dispatch_get_by_id(label: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
    let unique_value = params
        .get("uniqueValue")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("uniqueValue is required"))?;

    match ctx.graph.get_entity(label, unique_value).await? {
        Some(entity) => Ok(entity_to_json(&entity)),
        None => Ok(Value::Null),
    }
}

async fn dispatch_range_query(label: &str, params: Value, ctx: &ToolContext, is_date: bool) -> Result<Value> {
    let field = params
        .get("field")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("field is required"))?;

    let mut opts = QueryOptions::default();
    if is_date {
        if let Some(from) = params.get("from").and_then(|v| v.as_str()) {
            opts.filters.insert(field.to_string(), FilterOp::Gte(parse_iso_as_f64(from)?));
        }
        if let Some(to) = params.get("to").and_then(|v| v.as_str()) {
            opts.filters.insert(format!("{field}__to"), FilterOp::Lte(parse_iso_as_f64(to)?));
        }
    } else {
        if let Some(gte) = params.get("gte").and_then(|v| v.as_f64()) {
            opts.filters.insert(field.to_string(), FilterOp::Gte(gte));
        }
        if let Some(lte) = params.get("lte").and_then(|v| v.as_f64()) {
            opts.filters.insert(format!("{field}__to"), FilterOp::Lte(lte));
        }
    }

    let entities = ctx.graph.query_entities(label, &opts).await?;
    Ok(json!({ "results": entities.iter().map(entity_to_json).collect::<Vec<_>>() }))
}

fn parse_iso_as_f64(iso: &str) -> Result<f64> {
    let dt = chrono::DateTime::parse_from_rfc3339(iso)?;
    Ok(dt.timestamp() as f64)
}

async fn dispatch_pattern_query(label: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
    let field = params
        .get("field")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("field is required"))?;
    let op = params.get("op").and_then(|v| v.as_str()).unwrap_or("contains");
    let value = params
        .get("value")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("value is required"))?
        .to_string();

    let filter_op = match op {
        "startsWith" => FilterOp::StartsWith(value),
        "endsWith" => FilterOp::EndsWith(value),
        "regex" => FilterOp::Regex(value),
        _ => FilterOp::Contains(value),
    };

    let mut opts = QueryOptions::default();
    opts.filters.insert(field.to_string(), filter_op);
    let entities = ctx.graph.query_entities(label, &opts).await?;
    Ok(json!({ "results": entities.iter().map(entity_to_json).collect::<Vec<_>>() }))
}

async fn dispatch_semantic_search(label: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
    let query = params
        .get("query")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("query is required"))?;
    let top_k = params.get("topK").and_then(|v| v.as_i64()).unwrap_or(10);
    let min_score = params.get("minScore").and_then(|v| v.as_f64()).unwrap_or(0.0);

    let entity_def = ctx
        .schema
        .entity(label)
        .ok_or_else(|| anyhow::anyhow!("unknown entity label '{}'", label))?;

    let index = match params.get("index").and_then(|v| v.as_str()) {
        Some(name) => entity_def
            .vector_indexes
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| anyhow::anyhow!("entity '{}' has no vector index '{}'", label, name))?,
        None => entity_def
            .vector_indexes
            .first()
            .ok_or_else(|| anyhow::anyhow!("entity '{}' has no vector index", label))?,
    };

    let uuid_filter: Option<Vec<String>> = params
        .get("uuidFilter")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect());

    let field_filter = params.get("fieldFilter").and_then(|f| f.as_object());

    let query_vec = embedding::embed_query(ctx.embedding_provider.as_ref(), &ctx.embedding_config, query).await?;
    let results = ctx.graph.vector_search(label, index, &query_vec, top_k).await?;

    let filtered: Vec<Value> = results
        .into_iter()
        .filter(|(_, score)| *score >= min_score)
        .filter(|(entity, _)| match &uuid_filter {
            Some(allowed) => entity
                .unique_value(&entity_def.unique_field)
                .map(|uv| allowed.iter().any(|u| u == uv))
                .unwrap_or(false),
            None => true,
        })
        .filter(|(entity, _)| entity_matches_field_filter(entity, field_filter))
        .map(|(entity, score)| json!({ "entity": entity_to_json(&entity), "score": score }))
        .collect();

    Ok(json!({ "results": filtered }))
}

/// Applies the `fieldFilter` argument's `{field: {op, value}}` predicates as
/// an in-process post-filter over already-retrieved vector search hits.
fn entity_matches_field_filter(entity: &crate::models::EntityValue, field_filter: Option<&serde_json::Map<String, Value>>) -> bool {
    let Some(filter_obj) = field_filter else {
        return true;
    };
    filter_obj.iter().all(|(field, predicate)| {
        let Some(op) = parse_predicate(predicate) else {
            return true;
        };
        let Some(actual) = entity.fields.get(field) else {
            return false;
        };
        filter_op_matches(&op, actual)
    })
}

fn filter_op_matches(op: &FilterOp, actual: &FieldValue) -> bool {
    let as_str = || match actual {
        FieldValue::Str(s) => Some(s.as_str()),
        _ => None,
    };
    let as_num = || match actual {
        FieldValue::Number(n) => Some(*n),
        _ => None,
    };
    match op {
        FilterOp::Equals(expected) => field_values_equal(expected, actual),
        FilterOp::Contains(needle) => as_str().map(|s| s.contains(needle.as_str())).unwrap_or(false),
        FilterOp::StartsWith(prefix) => as_str().map(|s| s.starts_with(prefix.as_str())).unwrap_or(false),
        FilterOp::EndsWith(suffix) => as_str().map(|s| s.ends_with(suffix.as_str())).unwrap_or(false),
        FilterOp::Regex(pattern) => regex::Regex::new(pattern)
            .ok()
            .zip(as_str())
            .map(|(re, s)| re.is_match(s))
            .unwrap_or(false),
        FilterOp::Gt(bound) => as_num().map(|n| n > *bound).unwrap_or(false),
        FilterOp::Gte(bound) => as_num().map(|n| n >= *bound).unwrap_or(false),
        FilterOp::Lt(bound) => as_num().map(|n| n < *bound).unwrap_or(false),
        FilterOp::Lte(bound) => as_num().map(|n| n <= *bound).unwrap_or(false),
        FilterOp::In(values) => values.iter().any(|v| field_values_equal(v, actual)),
    }
}

fn field_values_equal(expected: &FieldValue, actual: &FieldValue) -> bool {
    expected == actual
}

async fn dispatch_expand(label: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
    let unique_value = params
        .get("uniqueValue")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("uniqueValue is required"))?;
    let rel_type = params
        .get("relType")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("relType is required"))?;
    let depth = params.get("depth").and_then(|v| v.as_u64()).unwrap_or(1) as usize;

    let entity_def = ctx
        .schema
        .entity(label)
        .ok_or_else(|| anyhow::anyhow!("unknown entity label '{}'", label))?;
    let rel_def = entity_def
        .relationships
        .iter()
        .find(|r| r.rel_type == rel_type)
        .ok_or_else(|| anyhow::anyhow!("'{}' has no relationship '{}'", label, rel_type))?;

    let related = ctx.graph.expand(label, unique_value, rel_type, depth, rel_def.max_items).await?;
    Ok(json!({ "results": related.iter().map(entity_to_json).collect::<Vec<_>>() }))
}

fn build_entity_from_fields(label: &str, fields: &serde_json::Map<String, Value>) -> crate::models::EntityValue {
    let mut entity = crate::models::EntityValue::new(label);
    for (k, v) in fields {
        entity.fields.insert(k.clone(), field_value_from_json(v));
    }
    entity
}

async fn dispatch_mutate(label: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
    let op = params
        .get("op")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("op is required"))?;

    let entity_def = ctx
        .schema
        .entity(label)
        .ok_or_else(|| anyhow::anyhow!("unknown entity label '{}'", label))?;
    if !entity_def.mutable {
        bail!("'{}' is not mutable", label);
    }

    match op {
        "delete" => {
            let unique_value = params
                .get("uniqueValue")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow::anyhow!("uniqueValue required for delete"))?;
            ctx.graph.delete_entity(label, unique_value).await?;
            Ok(json!({ "deleted": unique_value }))
        }
        "create" | "update" => {
            let fields = params
                .get("fields")
                .and_then(|v| v.as_object())
                .ok_or_else(|| anyhow::anyhow!("fields required for {}", op))?;
            let entity = build_entity_from_fields(label, fields);
            ctx.graph.upsert_entity(&entity, &entity_def.unique_field).await?;
            Ok(entity_to_json(&entity))
        }
        "createBatch" => {
            let items = params
                .get("items")
                .and_then(|v| v.as_array())
                .ok_or_else(|| anyhow::anyhow!("items array required for createBatch"))?;
            let mut created = Vec::with_capacity(items.len());
            for item in items {
                let fields = item
                    .as_object()
                    .ok_or_else(|| anyhow::anyhow!("each createBatch item must be a fields object"))?;
                let entity = build_entity_from_fields(label, fields);
                ctx.graph.upsert_entity(&entity, &entity_def.unique_field).await?;
                created.push(entity_to_json(&entity));
            }
            Ok(json!({ "created": created }))
        }
        other => bail!("unsupported mutate op '{}'", other),
    }
}

async fn dispatch_raw_cypher(params: Value, ctx: &ToolContext) -> Result<Value> {
    let statement = params
        .get("cypher")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("cypher is required"))?;
    let mutate = params.get("mutate").and_then(|v| v.as_bool()).unwrap_or(false);

    let upper = statement.to_uppercase();
    let is_write = ["INSERT", "UPDATE", "DELETE", "CREATE", "MERGE", "DROP", "ALTER"]
        .iter()
        .any(|kw| upper.contains(kw));

    if is_write && !mutate {
        bail!("write statement rejected: pass mutate=true to permit writes");
    }

    let bound_params: Vec<Value> = params
        .get("params")
        .and_then(|v| v.as_object())
        .map(|m| m.values().cloned().collect())
        .unwrap_or_default();

    let rows = ctx.graph.raw_query(statement, &bound_params).await?;
    Ok(json!({ "rows": rows }))
}

/// Runs [`search::hybrid_search`] across every indexed entity, or the
/// `entities` subset if given. `topK`/`minScore` are applied as a post-fusion
/// cut on top of the configured `[retrieval]` defaults the search itself uses.
async fn dispatch_search(params: Value, ctx: &ToolContext) -> Result<Value> {
    let query = params
        .get("query")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("query is required"))?;
    let labels: Option<Vec<String>> = params
        .get("entities")
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect());
    let top_k = params.get("topK").and_then(|v| v.as_i64());
    let min_score = params.get("minScore").and_then(|v| v.as_f64());

    let mut results = search::hybrid_search(
        &ctx.config,
        &ctx.schema,
        &ctx.graph,
        ctx.embedding_provider.as_ref(),
        ctx.llm_provider.as_ref(),
        query,
        labels.as_deref(),
    )
    .await?;

    if let Some(floor) = min_score {
        results.retain(|r| r.score >= floor);
    }
    if let Some(k) = top_k {
        results.truncate(k.max(0) as usize);
    }

    Ok(json!({ "results": results }))
}

/// Build [`Tool`] trait objects for every descriptor the schema generates.
pub fn build_tools(schema: &Schema) -> Vec<Box<dyn Tool>> {
    crate::schema::generate_tools(schema)
        .into_iter()
        .map(|d| Box::new(SchemaTool::new(d)) as Box<dyn Tool>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, ChunkingConfig, ConnectorsConfig, GraphConfig, LLMConfig, RetrievalConfig, ServerConfig};
    use crate::embedding::DisabledProvider;
    use crate::graph::SqliteGraphAdapter;
    use crate::models::EntityValue;
    use crate::schema::default_schema;

    fn test_config(path: &std::path::Path) -> crate::config::Config {
        crate::config::Config {
            graph: GraphConfig { sqlite_path: path.to_path_buf(), ingestion_lock_timeout_secs: 30 },
            chunking: ChunkingConfig { max_tokens: 500, overlap_tokens: 0 },
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LLMConfig::default(),
            server: ServerConfig { bind: "127.0.0.1:0".to_string() },
            agent: AgentConfig::default(),
            connectors: ConnectorsConfig::default(),
        }
    }

    async fn build_ctx(dir: &std::path::Path) -> ToolContext {
        let cfg = test_config(&dir.join("t.db"));
        let adapter = SqliteGraphAdapter::connect(&cfg).await.unwrap();
        adapter.run_migrations().await.unwrap();
        ToolContext::new(
            Arc::new(adapter),
            Arc::new(default_schema()),
            EmbeddingConfig::default(),
            Arc::new(DisabledProvider),
            Arc::new(cfg),
            Arc::new(crate::llm::DisabledProvider),
        )
    }

    #[tokio::test]
    async fn describe_schema_returns_schema_json() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = build_ctx(dir.path()).await;
        let result = dispatch("describe_schema", json!({}), &ctx).await.unwrap();
        assert!(result.get("entities").is_some());
    }

    #[tokio::test]
    async fn query_and_get_by_id_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = build_ctx(dir.path()).await;

        let entity = EntityValue::new("Project")
            .with_field("name", FieldValue::Str("demo".into()))
            .with_field("rootPath", FieldValue::Str("/tmp/demo".into()))
            .with_field("contentHash", FieldValue::Str("h1".into()));
        ctx.graph.upsert_entity(&entity, "name").await.unwrap();

        let result = dispatch("get_Project_by_id", json!({"uniqueValue": "demo"}), &ctx).await.unwrap();
        assert_eq!(result.get("label").and_then(|v| v.as_str()), Some("Project"));

        let queried = dispatch("query_Project", json!({}), &ctx).await.unwrap();
        assert_eq!(queried["results"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn raw_cypher_rejects_unguarded_writes() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = build_ctx(dir.path()).await;
        let result = dispatch(
            "raw_cypher",
            json!({"cypher": "DELETE FROM entities WHERE label = 'Project'"}),
            &ctx,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn raw_cypher_allows_reads() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = build_ctx(dir.path()).await;
        let result = dispatch("raw_cypher", json!({"cypher": "SELECT label FROM entities"}), &ctx).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn search_tool_is_reachable_through_dispatch() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = build_ctx(dir.path()).await;

        let entity = EntityValue::new("Scope")
            .with_field("uuid", FieldValue::Str("s0".into()))
            .with_field("source", FieldValue::Str("fn open_connection(pool: &Pool)".into()))
            .with_field("contentHash", FieldValue::Str("h0".into()));
        ctx.graph.upsert_entity(&entity, "uuid").await.unwrap();

        let result = dispatch("search", json!({"query": "open_connection", "entities": ["Scope"]}), &ctx)
            .await
            .unwrap();
        let results = result["results"].as_array().unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0]["unique_value"].as_str(), Some("s0"));
    }
}
