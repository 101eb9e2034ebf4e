//! Language-model gateway
//!
//! Stages talk to the model through [`LanguageModel`], a stateless
//! prompt-in / text-out seam. [`OpenAiClient`] implements it against any
//! OpenAI-compatible `/chat/completions` endpoint.

use crate::agent_prompts::RenderedPrompt;
use crate::error::{ChatError, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(&self, prompt: &RenderedPrompt) -> Result<String>;
}

#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self::with_base_url(api_key, model, crate::config::DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: String, model: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    async fn invoke(&self, prompt: &RenderedPrompt) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": prompt.user}
            ],
            "temperature": prompt.temperature,
        });

        debug!(kind = ?prompt.kind, model = %self.model, "Calling language model");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if !status.is_success() {
            let detail = response_json["error"]["message"]
                .as_str()
                .unwrap_or("unknown error");
            return Err(ChatError::Llm(format!("LLM API returned {}: {}", status, detail)));
        }

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ChatError::Llm("No content in LLM response".to_string()))?;

        Ok(content.trim().to_string())
    }
}

/// Remove a surrounding markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = trimmed.trim_start_matches('`');
    // Drop an info string such as `json` or `sql`.
    let body = match body.find('\n') {
        Some(idx) if !body[..idx].trim().contains(' ') => &body[idx + 1..],
        _ => body,
    };
    body.trim_end().trim_end_matches('`').trim()
}

/// Parse a JSON object out of model output, tolerating code fences.
pub fn parse_json_reply<T: DeserializeOwned>(text: &str) -> Result<T> {
    Ok(serde_json::from_str(strip_code_fences(text))?)
}
