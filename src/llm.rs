//! Chat-completion provider abstraction.
//!
//! The chat relay talks to a language model through the [`ChatModel`]
//! trait. [`OpenAiModel`] calls an OpenAI-compatible
//! `POST {base_url}/chat/completions` endpoint.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;

/// One message of a chat-completion request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Send `messages` and return the assistant's reply text.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Build the configured model, or `None` when the relay should answer with
/// its offline fallback (provider disabled or API key unset).
pub fn create_model(config: &LlmConfig) -> Result<Option<Arc<dyn ChatModel>>> {
    if !config.is_enabled() {
        return Ok(None);
    }
    match config.provider.as_str() {
        "openai" => match std::env::var(&config.api_key_env) {
            Ok(key) if !key.trim().is_empty() => {
                let model: Arc<dyn ChatModel> = Arc::new(OpenAiModel::new(config, key)?);
                Ok(Some(model))
            }
            _ => {
                tracing::warn!(
                    env = %config.api_key_env,
                    "LLM API key not set; chat will answer with the offline fallback"
                );
                Ok(None)
            }
        },
        other => bail!("Unknown llm provider: {}", other),
    }
}

/// OpenAI-compatible chat completions client.
pub struct OpenAiModel {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAiModel {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiModel {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tracing::warn!(attempt, delay_secs = delay.as_secs(), "retrying LLM request");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&self.url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_completion(&json);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow::anyhow!("LLM API error {}: {}", status, body_text));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("LLM API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("LLM request failed after retries")))
    }
}

/// Extract `choices[0].message.content` from a chat-completions response.
pub fn parse_completion(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| anyhow::anyhow!("Invalid LLM response: missing choices[0].message.content"))
}
