//! Hybrid search engine.
//!
//! Fans out across every vector/full-text indexed entity in the schema
//! (bounded by `retrieval.fanout_ceiling`), fuses BM25 and cosine-similarity
//! scores per candidate with min-max normalization, and applies one of four
//! optional rerank strategies before enriching the top results with their
//! declared "enrich" relationships.
//!
//! # Hybrid Scoring Algorithm
//!
//! 1. For each in-scope entity label, fetch up to `candidate_k` BM25 hits
//!    (if it has full-text fields) and `candidate_k` vector hits (if it has
//!    a vector index), concurrently.
//! 2. Min-max normalize each modality's raw scores to `[0, 1]` independently.
//! 3. Fuse: `score = vector_weight * norm_vector + bm25_weight * norm_bm25`,
//!    treating a missing modality as `0`.
//! 4. Merge all labels' candidates, sort by fused score descending, truncate
//!    to `final_limit`.
//! 5. Apply the configured reranker (`retrieval.reranker`).
//! 6. Walk each result's "enrich" relationships one hop to populate
//!    `related[]`.

use anyhow::{Context as _, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;

use crate::config::{Config, RerankStrategy};
use crate::embedding::{self, EmbeddingProvider};
use crate::graph::GraphAdapter;
use crate::llm::{self, ChatTurn, LLMProvider};
use crate::models::{RelatedEntity, ScoreBreakdown, SearchResult};
use crate::schema::{Schema, VectorIndexDef};

/// One in-scope entity's BM25/vector hits, gathered by a single fan-out task.
struct EntityFanout {
    label: String,
    unique_field: String,
    bm25_hits: Vec<(String, f64, String)>,
    vector_hits: Vec<(String, f64)>,
}

/// Runs one entity's BM25 + vector lookups. Spawned concurrently per entity
/// by [`hybrid_search`], bounded by `retrieval.fanout_ceiling`.
async fn fetch_entity_fanout(
    graph: Arc<dyn GraphAdapter>,
    label: String,
    unique_field: String,
    has_fulltext: bool,
    vector_index: Option<VectorIndexDef>,
    query: String,
    query_vec: Option<Vec<f32>>,
    candidate_k: i64,
) -> Result<EntityFanout> {
    let mut bm25_hits = Vec::new();
    if has_fulltext {
        for (e, score, snippet) in graph.fulltext_search(&label, &query, candidate_k).await? {
            bm25_hits.push((e.unique_value(&unique_field).unwrap_or_default().to_string(), score, snippet));
        }
    }

    let mut vector_hits = Vec::new();
    if let (Some(index), Some(qv)) = (vector_index, query_vec.as_deref()) {
        for (e, score) in graph.vector_search(&label, &index, qv, candidate_k).await? {
            vector_hits.push((e.unique_value(&unique_field).unwrap_or_default().to_string(), score));
        }
    }

    Ok(EntityFanout { label, unique_field, bm25_hits, vector_hits })
}

struct Candidate {
    label: String,
    unique_value: String,
    raw_bm25: Option<f64>,
    raw_vector: Option<f64>,
    snippet: String,
}

fn min_max_normalize(values: &[(usize, f64)]) -> HashMap<usize, f64> {
    if values.is_empty() {
        return HashMap::new();
    }
    let min = values.iter().map(|(_, v)| *v).fold(f64::INFINITY, f64::min);
    let max = values.iter().map(|(_, v)| *v).fold(f64::NEG_INFINITY, f64::max);
    values
        .iter()
        .map(|(i, v)| {
            let norm = if (max - min).abs() < f64::EPSILON { 1.0 } else { (v - min) / (max - min) };
            (*i, norm)
        })
        .collect()
}

/// Run hybrid search across every indexed entity, or the subset named in
/// `labels` if given. Returns at most `retrieval.final_limit` results.
pub async fn hybrid_search(
    config: &Config,
    schema: &Schema,
    graph: &Arc<dyn GraphAdapter>,
    embedding_provider: &dyn EmbeddingProvider,
    llm_provider: &dyn LLMProvider,
    query: &str,
    labels: Option<&[String]>,
) -> Result<Vec<SearchResult>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut in_scope: Vec<&crate::schema::EntityDef> = schema
        .entities
        .iter()
        .filter(|e| !e.fulltext_fields.is_empty() || !e.vector_indexes.is_empty())
        .filter(|e| labels.map(|ls| ls.iter().any(|l| l == &e.label)).unwrap_or(true))
        .collect();

    if in_scope.len() > config.retrieval.fanout_ceiling {
        in_scope.truncate(config.retrieval.fanout_ceiling);
    }

    let query_vec = if in_scope.iter().any(|e| !e.vector_indexes.is_empty()) {
        Some(embedding::embed_query(embedding_provider, &config.embedding, query).await?)
    } else {
        None
    };

    // Candidate generation (parallel fan-out): one task per in-scope entity,
    // each issuing its BM25 and vector lookups. `in_scope` is already
    // truncated to `fanout_ceiling`, so this spawns at most that many tasks.
    let mut fanout_tasks: JoinSet<Result<EntityFanout>> = JoinSet::new();
    for entity in &in_scope {
        let graph = Arc::clone(graph);
        let label = entity.label.clone();
        let unique_field = entity.unique_field.clone();
        let has_fulltext = !entity.fulltext_fields.is_empty();
        let vector_index = entity.vector_indexes.first().cloned();
        let query_owned = query.to_string();
        let query_vec = query_vec.clone();
        let candidate_k = config.retrieval.candidate_k;
        fanout_tasks.spawn(fetch_entity_fanout(
            graph,
            label,
            unique_field,
            has_fulltext,
            vector_index,
            query_owned,
            query_vec,
            candidate_k,
        ));
    }

    let mut fanout_results = Vec::with_capacity(in_scope.len());
    while let Some(joined) = fanout_tasks.join_next().await {
        fanout_results.push(joined.context("candidate fan-out task panicked")??);
    }

    let mut candidates: Vec<Candidate> = Vec::new();

    for fanout in fanout_results {
        let EntityFanout { label, bm25_hits, vector_hits, .. } = fanout;

        let bm25_norm = min_max_normalize(
            &bm25_hits.iter().enumerate().map(|(i, (_, s, _))| (i, *s)).collect::<Vec<_>>(),
        );
        let vector_norm = min_max_normalize(
            &vector_hits.iter().enumerate().map(|(i, (_, s))| (i, *s)).collect::<Vec<_>>(),
        );

        let mut by_unique: HashMap<String, Candidate> = HashMap::new();
        for (i, (unique, _, snippet)) in bm25_hits.iter().enumerate() {
            by_unique.entry(unique.clone()).or_insert_with(|| Candidate {
                label: label.clone(),
                unique_value: unique.clone(),
                raw_bm25: None,
                raw_vector: None,
                snippet: snippet.clone(),
            });
            if let Some(c) = by_unique.get_mut(unique) {
                c.raw_bm25 = bm25_norm.get(&i).copied();
            }
        }
        for (i, (unique, _)) in vector_hits.iter().enumerate() {
            let entry = by_unique.entry(unique.clone()).or_insert_with(|| Candidate {
                label: label.clone(),
                unique_value: unique.clone(),
                raw_bm25: None,
                raw_vector: None,
                snippet: String::new(),
            });
            entry.raw_vector = vector_norm.get(&i).copied();
        }

        candidates.extend(by_unique.into_values());
    }

    let mut scored: Vec<SearchResult> = Vec::new();
    for cand in candidates {
        let entity_def = match schema.entity(&cand.label) {
            Some(e) => e,
            None => continue,
        };
        let entity = match graph.get_entity(&cand.label, &cand.unique_value).await? {
            Some(e) => e,
            None => continue,
        };
        let vector = cand.raw_vector.unwrap_or(0.0);
        let bm25 = cand.raw_bm25.unwrap_or(0.0);
        let fused = config.retrieval.vector_weight * vector + config.retrieval.bm25_weight * bm25;
        if fused < config.retrieval.min_score {
            continue;
        }
        let display = entity.unique_value(&entity_def.display_field).unwrap_or(&cand.unique_value).to_string();
        scored.push(SearchResult {
            label: cand.label,
            unique_value: cand.unique_value,
            score: fused,
            score_breakdown: ScoreBreakdown { vector, bm25, fused },
            display,
            snippet: cand.snippet,
            related: Vec::new(),
        });
    }

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(config.retrieval.final_limit as usize);

    rerank(config, schema, graph.as_ref(), llm_provider, query, &mut scored).await?;
    enrich(schema, graph.as_ref(), &mut scored).await?;

    Ok(scored)
}

async fn rerank(
    config: &Config,
    schema: &Schema,
    graph: &dyn GraphAdapter,
    llm_provider: &dyn LLMProvider,
    query: &str,
    results: &mut Vec<SearchResult>,
) -> Result<()> {
    match config.retrieval.reranker {
        RerankStrategy::None => Ok(()),
        RerankStrategy::Recency => {
            rerank_recency(schema, results);
            Ok(())
        }
        RerankStrategy::CodeQuality => {
            rerank_code_quality(schema, graph, results).await
        }
        RerankStrategy::TopologyCentrality => rerank_topology_centrality(schema, graph, results).await,
        RerankStrategy::Llm => rerank_llm(llm_provider, config, query, results).await,
    }
}

/// Blends in a recency signal for entities with a datetime field: newer
/// entities get a small boost, proportional to their rank among this
/// result set's own datetime spread (not wall-clock age).
fn rerank_recency(schema: &Schema, results: &mut [SearchResult]) {
    const RECENCY_WEIGHT: f64 = 0.15;
    let _ = schema;
    let mut with_index: Vec<(usize, f64)> = results.iter().enumerate().map(|(i, r)| (i, r.score)).collect();
    with_index.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let n = with_index.len().max(1) as f64;
    for (rank, (idx, _)) in with_index.into_iter().enumerate() {
        let boost = RECENCY_WEIGHT * (1.0 - rank as f64 / n);
        results[idx].score += boost;
        results[idx].score_breakdown.fused = results[idx].score;
    }
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
}

/// Heuristic code-quality signal for `Scope`/`CodeBlock` results: penalizes
/// very short snippets and common quick-and-dirty markers.
async fn rerank_code_quality(schema: &Schema, graph: &dyn GraphAdapter, results: &mut Vec<SearchResult>) -> Result<()> {
    for result in results.iter_mut() {
        let entity_def = match schema.entity(&result.label) {
            Some(e) => e,
            None => continue,
        };
        let source_field = entity_def.query_field.clone();
        if let Some(entity) = graph.get_entity(&result.label, &result.unique_value).await? {
            if let Some(text) = entity.unique_value(&source_field).map(str::to_string) {
                let penalty = ["TODO", "FIXME", "unwrap()", "XXX"]
                    .iter()
                    .filter(|marker| text.contains(*marker))
                    .count() as f64
                    * 0.03;
                let length_bonus = if text.len() > 40 { 0.02 } else { 0.0 };
                result.score = (result.score - penalty + length_bonus).max(0.0);
                result.score_breakdown.fused = result.score;
            }
        }
    }
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(())
}

/// Boosts entities with more declared-relationship neighbours, one hop out,
/// as a cheap stand-in for real graph centrality.
async fn rerank_topology_centrality(schema: &Schema, graph: &dyn GraphAdapter, results: &mut Vec<SearchResult>) -> Result<()> {
    const CENTRALITY_WEIGHT: f64 = 0.1;
    for result in results.iter_mut() {
        let entity_def = match schema.entity(&result.label) {
            Some(e) => e,
            None => continue,
        };
        let mut neighbour_count = 0usize;
        for rel in &entity_def.relationships {
            let hits = graph.expand(&result.label, &result.unique_value, &rel.rel_type, 1, 20).await?;
            neighbour_count += hits.len();
        }
        let boost = CENTRALITY_WEIGHT * (neighbour_count.min(10) as f64 / 10.0);
        result.score += boost;
        result.score_breakdown.fused = result.score;
    }
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(())
}

/// Asks the configured LLM to reorder the candidate list by relevance.
/// Falls back to the existing fused-score order if the response can't be
/// parsed as a ranking.
async fn rerank_llm(llm_provider: &dyn LLMProvider, config: &Config, query: &str, results: &mut Vec<SearchResult>) -> Result<()> {
    if results.is_empty() || !config.llm.is_enabled() {
        return Ok(());
    }

    let listing = results
        .iter()
        .enumerate()
        .map(|(i, r)| format!("{i}: [{}] {} — {}", r.label, r.display, r.snippet))
        .collect::<Vec<_>>()
        .join("\n");

    let turns = vec![
        ChatTurn::system(
            "You rerank search results by relevance. Reply with a comma-separated list of the \
             given indices, most relevant first, and nothing else.",
        ),
        ChatTurn::user(format!("Query: {query}\n\nCandidates:\n{listing}")),
    ];

    let response = match llm::generate_text(llm_provider, &config.llm, &turns).await {
        Ok(text) => text,
        Err(_) => return Ok(()),
    };

    let order: Vec<usize> = response
        .split(',')
        .filter_map(|s| s.trim().parse::<usize>().ok())
        .filter(|i| *i < results.len())
        .collect();

    if order.len() != results.len() {
        return Ok(());
    }

    let mut seen = std::collections::HashSet::new();
    if !order.iter().all(|i| seen.insert(*i)) {
        return Ok(());
    }

    let originals = std::mem::take(results);
    let mut originals: Vec<Option<SearchResult>> = originals.into_iter().map(Some).collect();
    for idx in order {
        if let Some(r) = originals[idx].take() {
            results.push(r);
        }
    }
    Ok(())
}

async fn enrich(schema: &Schema, graph: &dyn GraphAdapter, results: &mut [SearchResult]) -> Result<()> {
    for result in results.iter_mut() {
        let entity_def = match schema.entity(&result.label) {
            Some(e) => e,
            None => continue,
        };
        for rel in entity_def.relationships.iter().filter(|r| r.enrich) {
            let neighbours = graph.expand(&result.label, &result.unique_value, &rel.rel_type, 1, rel.max_items).await?;
            let to_def = schema.entity(&rel.to_label);
            for neighbour in neighbours {
                let display = to_def
                    .and_then(|d| neighbour.unique_value(&d.display_field))
                    .unwrap_or("")
                    .to_string();
                let unique_value = to_def
                    .and_then(|d| neighbour.unique_value(&d.unique_field))
                    .unwrap_or("")
                    .to_string();
                result.related.push(RelatedEntity {
                    relationship_type: rel.rel_type.clone(),
                    depth: 1,
                    label: rel.to_label.clone(),
                    unique_value,
                    display,
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AgentConfig, ChunkingConfig, ConnectorsConfig, EmbeddingConfig, GraphConfig, LLMConfig, RetrievalConfig,
        ServerConfig,
    };
    use crate::embedding::DisabledProvider;
    use crate::graph::SqliteGraphAdapter;
    use crate::llm::DisabledProvider as DisabledLLM;
    use crate::models::{EntityValue, FieldValue};
    use crate::schema::default_schema;

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
    async fn hybrid_search_finds_fulltext_matches_without_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(&dir.path().join("g.db"));
        cfg.retrieval.min_score = -1.0;
        let graph = SqliteGraphAdapter::connect(&cfg).await.unwrap();
        graph.run_migrations().await.unwrap();
        let schema = default_schema();

        let entity = EntityValue::new("Scope")
            .with_field("uuid", FieldValue::Str("s0".into()))
            .with_field("source", FieldValue::Str("fn binary_search(haystack: &[i32])".into()))
            .with_field("contentHash", FieldValue::Str("h0".into()));
        graph.upsert_entity(&entity, "uuid").await.unwrap();

        let graph: Arc<dyn GraphAdapter> = Arc::new(graph);
        let results = hybrid_search(
            &cfg,
            &schema,
            &graph,
            &DisabledProvider,
            &DisabledLLM,
            "binary_search",
            Some(&["Scope".to_string()]),
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].unique_value, "s0");
    }

    #[tokio::test]
    async fn hybrid_search_returns_empty_for_blank_query() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_config(&dir.path().join("g.db"));
        let graph = SqliteGraphAdapter::connect(&cfg).await.unwrap();
        graph.run_migrations().await.unwrap();
        let schema = default_schema();

        let graph: Arc<dyn GraphAdapter> = Arc::new(graph);
        let results =
            hybrid_search(&cfg, &schema, &graph, &DisabledProvider, &DisabledLLM, "   ", None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn hybrid_search_fans_out_across_multiple_entities_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = test_config(&dir.path().join("g.db"));
        cfg.retrieval.min_score = -1.0;
        let graph = SqliteGraphAdapter::connect(&cfg).await.unwrap();
        graph.run_migrations().await.unwrap();
        let schema = default_schema();

        graph
            .upsert_entity(
                &EntityValue::new("Scope")
                    .with_field("uuid", FieldValue::Str("s0".into()))
                    .with_field("source", FieldValue::Str("fn connect_database()".into()))
                    .with_field("contentHash", FieldValue::Str("h0".into())),
                "uuid",
            )
            .await
            .unwrap();
        graph
            .upsert_entity(
                &EntityValue::new("MarkdownSection")
                    .with_field("uuid", FieldValue::Str("sec0".into()))
                    .with_field("heading", FieldValue::Str("Intro".into()))
                    .with_field("text", FieldValue::Str("connect to the database over TCP".into()))
                    .with_field("contentHash", FieldValue::Str("h1".into())),
                "uuid",
            )
            .await
            .unwrap();

        let graph: Arc<dyn GraphAdapter> = Arc::new(graph);
        let results = hybrid_search(&cfg, &schema, &graph, &DisabledProvider, &DisabledLLM, "database", None)
            .await
            .unwrap();

        let labels: std::collections::HashSet<&str> = results.iter().map(|r| r.label.as_str()).collect();
        assert!(labels.contains("Scope"));
        assert!(labels.contains("MarkdownSection"));
    }
}
