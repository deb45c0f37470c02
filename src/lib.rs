//! # RagForge
//!
//! **A local-first retrieval engine and agent runtime over a typed property graph.**
//!
//! RagForge ingests content from pluggable connectors (filesystem, web) into a
//! schema-defined property graph, indexes it for hybrid (BM25 + vector) search,
//! and exposes the schema as a generated set of tools that an agent runtime can
//! call in a plan/act/observe loop, over an HTTP surface or a CLI REPL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ Connectors  │──▶│  Ingestion   │──▶│   SQLite      │
//! │ FS/Web      │   │ Chunk+Embed │   │ FTS5+Vectors  │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                             │
//!                    ┌────────────────────────┤
//!                    ▼                        ▼
//!              ┌───────────┐            ┌───────────┐
//!              │  Search   │            │   Tools   │
//!              │  (hybrid) │            │ (schema)  │
//!              └─────┬─────┘            └─────┬─────┘
//!                    └──────────┬──────────────┘
//!                               ▼
//!                         ┌───────────┐
//!                         │   Agent   │
//!                         └───────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`models`] | Core data types: entities, search results, conversations, personas |
//! | [`schema`] | Entity/relationship/vector-index schema and tool generation |
//! | [`graph`] | `GraphAdapter` trait and the SQLite-backed property graph |
//! | [`connector_fs`] | Filesystem connector |
//! | [`connector_web`] | Regex-based HTML crawler connector |
//! | [`traits`] | `Connector`/`Tool` traits and their registries |
//! | [`chunking`] | Entity-aware content chunking |
//! | [`embedding`] | Embedding provider trait and dispatch |
//! | [`llm`] | Chat-completion provider trait and dispatch |
//! | [`ingest`] | Connector → parse → upsert → embed pipeline |
//! | [`search`] | Hybrid BM25 + vector search with fusion and rerank |
//! | [`tools`] | Schema-driven tool dispatcher |
//! | [`agent`] | Prompt construction, tool-call XML parsing, plan/act/observe loop |
//! | [`persona`] | Persona store and slash-command control plane |
//! | [`watcher`] | Polling filesystem watcher |
//! | [`server`] | Tool-invocation HTTP server (Axum) with CORS |
//! | [`error`] | Typed error taxonomy and process exit codes |
//!
//! ## Configuration
//!
//! RagForge is configured via a TOML file (default: `config/ragforge.toml`).
//! See [`config`] for all available options and [`config::load_config`] for
//! validation rules.

pub mod agent;
pub mod chunking;
pub mod config;
pub mod connector_fs;
pub mod connector_web;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod persona;
pub mod schema;
pub mod search;
pub mod server;
pub mod tools;
pub mod traits;
pub mod watcher;
