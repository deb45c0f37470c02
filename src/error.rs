//! Typed error taxonomy for RagForge components.
//!
//! Internal component APIs that need to preserve the error *kind* for
//! caller branching (exit codes, retry decisions, agent observations)
//! return `Result<T, RagForgeError>`. CLI-level orchestration still uses
//! `anyhow::Result` and wraps these via `?`, matching the rest of the
//! codebase.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagForgeError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("graph unavailable: {0}")]
    GraphUnavailable(String),

    #[error("graph query failed: {0}")]
    GraphQueryFailed(String),

    #[error("index missing: {0}")]
    IndexMissing(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("LLM call failed: {0}")]
    LLMFailed(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("malformed output: {0}")]
    MalformedOutput(String),

    #[error("tool call rejected: {0}")]
    ToolRejected(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("search failed: {0}")]
    SearchFailed(String),
}

impl RagForgeError {
    /// Maps each taxonomy member to the process exit code named in the
    /// command surface: 0 success, 1 usage, 2 configuration, 3 external
    /// service, 4 cancelled.
    pub fn exit_code(&self) -> i32 {
        match self {
            RagForgeError::ConfigInvalid(_) => 2,
            RagForgeError::GraphUnavailable(_)
            | RagForgeError::GraphQueryFailed(_)
            | RagForgeError::IndexMissing(_)
            | RagForgeError::EmbeddingFailed(_)
            | RagForgeError::LLMFailed(_)
            | RagForgeError::RateLimited(_)
            | RagForgeError::MalformedOutput(_)
            | RagForgeError::SearchFailed(_) => 3,
            RagForgeError::ToolRejected(_) => 1,
            RagForgeError::Cancelled(_) => 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_taxonomy() {
        assert_eq!(RagForgeError::ConfigInvalid("x".into()).exit_code(), 2);
        assert_eq!(RagForgeError::Cancelled("x".into()).exit_code(), 4);
        assert_eq!(RagForgeError::ToolRejected("x".into()).exit_code(), 1);
        assert_eq!(RagForgeError::SearchFailed("x".into()).exit_code(), 3);
    }

    #[test]
    fn display_includes_detail() {
        let e = RagForgeError::GraphQueryFailed("timeout".into());
        assert_eq!(e.to_string(), "graph query failed: timeout");
    }
}
