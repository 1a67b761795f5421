//! Anthropic (Claude) report generation provider.

use super::{LlmError, LlmProvider, DEFAULT_LLM_TIMEOUT, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";

/// Anthropic (Claude) LLM provider using the Messages API
pub struct AnthropicLlmProvider {
    client: Client,
    api_key: String,
    model: String,
    api_url: String,
    timeout: Option<Duration>,
}

impl AnthropicLlmProvider {
    /// Create a new Anthropic provider with the given API key
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL.to_string())
    }

    /// Create with a specific model
    pub fn with_model(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            api_url: ANTHROPIC_API_URL.to_string(),
            timeout: Some(DEFAULT_LLM_TIMEOUT),
        }
    }

    /// Point the provider at a different endpoint (proxies, local fakes).
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disable request timeouts entirely.
    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    fn build_request(&self, prompt: &str, system_prompt: Option<&str>) -> MessagesRequest {
        MessagesRequest {
            model: self.model.clone(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            system: system_prompt
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            messages: vec![Message {
                role: "user".to_string(),
                content: vec![MessageContent {
                    content_type: "text".to_string(),
                    text: prompt.to_string(),
                }],
            }],
        }
    }
}

#[derive(Debug, Serialize)]
struct MessageContent {
    #[serde(rename = "type")]
    content_type: String,
    text: String,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: Vec<MessageContent>,
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

fn extract_text(response: &MessagesResponse) -> Result<String, LlmError> {
    let text: String = response
        .content
        .iter()
        .filter(|block| block.content_type == "text")
        .filter_map(|block| block.text.as_deref())
        .collect();

    if text.trim().is_empty() {
        return Err(LlmError::InvalidResponse(
            "No text content in response".to_string(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl LlmProvider for AnthropicLlmProvider {
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, LlmError> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::NoApiKey("anthropic".to_string()));
        }

        let request = self.build_request(prompt, system_prompt);

        let mut req = self
            .client
            .post(&self.api_url)
            .header("x-api-key", self.api_key.trim())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&request);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }

        let response = req
            .send()
            .await
            .map_err(|e| LlmError::from_transport("anthropic", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&error_text)
                .map(|r| r.error.message)
                .unwrap_or(error_text);
            return Err(LlmError::from_status("anthropic", status.as_u16(), message));
        }

        let messages_response: MessagesResponse = response.json().await.map_err(|e| {
            LlmError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        if let Some(usage) = &messages_response.usage {
            log::info!(
                "Claude report generated - tokens: {} input, {} output",
                usage.input_tokens,
                usage.output_tokens
            );
        }

        extract_text(&messages_response)
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
