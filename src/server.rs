//! HTTP surface for tool invocation and the agent control plane (§6.4).
//!
//! Exposes the schema-generated tool registry over JSON, plus a health
//! check, following the same Axum + permissive-CORS shape the teacher's
//! MCP server used for its fixed `search`/`get`/`sources` endpoints —
//! generalized here to one `/tools/{name}` route per generated tool
//! instead of three hand-written ones.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools` | List available tool descriptors |
//! | `POST` | `/tools/{name}` | Invoke a tool with a JSON argument object |
//! | `GET`  | `/health` | Health check |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "..." } }
//! ```

use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::graph::GraphAdapter;
use crate::llm::LLMProvider;
use crate::schema::Schema;
use crate::tools::ToolContext;
use crate::traits::ToolRegistry;

#[derive(Clone)]
struct AppState {
    registry: Arc<ToolRegistry>,
    ctx: Arc<ToolContext>,
}

/// Starts the tool-invocation HTTP server, binding to `config.server.bind`.
pub async fn run_server(
    config: &Config,
    schema: Arc<Schema>,
    graph: Arc<dyn GraphAdapter>,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    llm_provider: Arc<dyn LLMProvider>,
) -> anyhow::Result<()> {
    let registry = Arc::new(ToolRegistry::from_schema(&schema));
    let ctx = Arc::new(ToolContext::new(
        graph,
        schema,
        config.embedding.clone(),
        embedding_provider,
        Arc::new(config.clone()),
        llm_provider,
    ));
    let state = AppState { registry, ctx };

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/tools", get(handle_list_tools))
        .route("/tools/{name}", post(handle_invoke_tool))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!("RagForge tool server listening on http://{}", config.server.bind);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: ErrorDetail { code: self.code, message: self.message } };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::NOT_FOUND, code: "not_found".to_string(), message: message.into() }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError { status: StatusCode::INTERNAL_SERVER_ERROR, code: "internal".to_string(), message: message.into() }
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolSummary>,
}

#[derive(Serialize)]
struct ToolSummary {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .registry
        .tools()
        .iter()
        .map(|t| ToolSummary {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();
    Json(ToolListResponse { tools })
}

async fn handle_invoke_tool(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
    Json(args): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tool = state.registry.find(&name).ok_or_else(|| not_found(format!("unknown tool '{}'", name)))?;
    tool.execute(args, &state.ctx).await.map(Json).map_err(|e| internal_error(e.to_string()))
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok".to_string(), version: env!("CARGO_PKG_VERSION").to_string() })
}
