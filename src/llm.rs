//! LLM provider abstraction for the agent runtime.
//!
//! Mirrors [`crate::embedding`]: a thin metadata trait plus free dispatch
//! functions, because an `async fn` in a trait used as `dyn Trait` isn't
//! object-safe. Two providers are wired up — OpenAI-compatible chat
//! completions and Ollama's `/api/chat` — sharing the same retry/backoff
//! and rate-limiting shape as the embedding providers.

use anyhow::{bail, Result};
use serde_json::Value as JsonValue;
use std::time::Duration;

use crate::config::{LLMConfig, RateLimitStrategy};

/// A single turn fed to the model: `role` is `"system"`, `"user"`, or
/// `"assistant"`.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

pub trait LLMProvider: Send + Sync {
    fn model_name(&self) -> &str;
}

pub struct DisabledProvider;

impl LLMProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
}

pub struct OpenAIChatProvider {
    model: String,
}

impl OpenAIChatProvider {
    pub fn new(config: &LLMConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self { model })
    }
}

impl LLMProvider for OpenAIChatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
}

pub struct OllamaChatProvider {
    model: String,
}

impl OllamaChatProvider {
    pub fn new(config: &LLMConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for Ollama provider"))?;
        Ok(Self { model })
    }
}

impl LLMProvider for OllamaChatProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
}

pub fn create_provider(config: &LLMConfig) -> Result<Box<dyn LLMProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "openai" => Ok(Box::new(OpenAIChatProvider::new(config)?)),
        "ollama" => Ok(Box::new(OllamaChatProvider::new(config)?)),
        other => bail!("Unknown LLM provider: {}", other),
    }
}

async fn rate_gate(strategy: RateLimitStrategy, requests_per_minute: u32) {
    if strategy != RateLimitStrategy::Proactive || requests_per_minute == 0 {
        return;
    }
    let interval = Duration::from_secs_f64(60.0 / requests_per_minute as f64);
    tokio::time::sleep(interval).await;
}

/// Send a chat completion request and return the assistant's reply text.
///
/// Dispatches on `config.provider`; retries transient failures with the
/// same exponential backoff as [`crate::embedding::embed_texts`] (1s, 2s,
/// 4s, ... capped at 32s), and fails fast on non-retryable 4xx errors.
pub async fn generate_text(
    _provider: &dyn LLMProvider,
    config: &LLMConfig,
    turns: &[ChatTurn],
) -> Result<String> {
    match config.provider.as_str() {
        "openai" => generate_openai(config, turns).await,
        "ollama" => generate_ollama(config, turns).await,
        "disabled" => bail!("LLM provider is disabled"),
        other => bail!("Unknown LLM provider: {}", other),
    }
}

async fn generate_openai(config: &LLMConfig, turns: &[ChatTurn]) -> Result<String> {
    let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;
    let model = config.model.as_ref().ok_or_else(|| anyhow::anyhow!("llm.model required"))?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let messages: Vec<JsonValue> = turns
        .iter()
        .map(|t| serde_json::json!({"role": t.role, "content": t.content}))
        .collect();

    let body = serde_json::json!({
        "model": model,
        "messages": messages,
    });

    rate_gate(config.rate_limit, config.requests_per_minute).await;

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let json: JsonValue = response.json().await?;
                    return parse_openai_chat_response(&json);
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("OpenAI chat error {}: {}", status, body_text));
                    continue;
                }
                let body_text = response.text().await.unwrap_or_default();
                bail!("OpenAI chat error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("LLM call failed after retries")))
}

fn parse_openai_chat_response(json: &JsonValue) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI chat response: missing choices[0].message.content"))
}

async fn generate_ollama(config: &LLMConfig, turns: &[ChatTurn]) -> Result<String> {
    let model = config.model.as_ref().ok_or_else(|| anyhow::anyhow!("llm.model required"))?;
    let url = config.url.as_deref().unwrap_or("http://localhost:11434");

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;

    let messages: Vec<JsonValue> = turns
        .iter()
        .map(|t| serde_json::json!({"role": t.role, "content": t.content}))
        .collect();

    let body = serde_json::json!({
        "model": model,
        "messages": messages,
        "stream": false,
    });

    rate_gate(config.rate_limit, config.requests_per_minute).await;

    let mut last_err = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let resp = client
            .post(format!("{}/api/chat", url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await;

        match resp {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    let json: JsonValue = response.json().await?;
                    return parse_ollama_chat_response(&json);
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("Ollama chat error {}: {}", status, body_text));
                    continue;
                }
                let body_text = response.text().await.unwrap_or_default();
                bail!("Ollama chat error {}: {}", status, body_text);
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("Ollama connection error (is Ollama running at {}?): {}", url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Ollama chat failed after retries")))
}

fn parse_ollama_chat_response(json: &JsonValue) -> Result<String> {
    json.get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama chat response: missing message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_openai_chat_response_extracts_content() {
        let json = serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "hello"}}]
        });
        assert_eq!(parse_openai_chat_response(&json).unwrap(), "hello");
    }

    #[test]
    fn parse_openai_chat_response_rejects_missing_content() {
        let json = serde_json::json!({"choices": []});
        assert!(parse_openai_chat_response(&json).is_err());
    }

    #[test]
    fn parse_ollama_chat_response_extracts_content() {
        let json = serde_json::json!({"message": {"role": "assistant", "content": "hi"}});
        assert_eq!(parse_ollama_chat_response(&json).unwrap(), "hi");
    }

    #[test]
    fn disabled_provider_reports_disabled_model() {
        let provider = DisabledProvider;
        assert_eq!(provider.model_name(), "disabled");
    }
}
