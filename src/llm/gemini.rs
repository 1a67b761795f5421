//! Google Gemini (Gemini Developer API) report generation provider.
//!
//! The wire types here are shared with the cloud transcription provider,
//! which calls the same `generateContent` endpoint with an uploaded file.

use super::{LlmError, LlmProvider, DEFAULT_LLM_TIMEOUT, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub(crate) const GEMINI_API_ROOT: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";

/// Gemini LLM provider using the `models.generateContent` REST API.
pub struct GeminiLlmProvider {
    client: Client,
    api_key: String,
    model: String,
    api_root: String,
    timeout: Option<Duration>,
}

impl GeminiLlmProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL.to_string())
    }

    pub fn with_model(api_key: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model,
            api_root: GEMINI_API_ROOT.to_string(),
            timeout: Some(DEFAULT_LLM_TIMEOUT),
        }
    }

    pub fn with_api_root(mut self, root: impl Into<String>) -> Self {
        self.api_root = root.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    fn build_request(&self, prompt: &str, system_prompt: Option<&str>) -> GenerateContentRequest {
        GenerateContentRequest {
            system_instruction: system_prompt
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Content {
                    role: None,
                    parts: vec![Part::text(s)],
                }),
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(prompt)],
            }],
            generation_config: Some(GenerationConfig {
                max_output_tokens: DEFAULT_MAX_TOKENS,
                temperature: Some(DEFAULT_TEMPERATURE),
            }),
        }
    }
}

pub(crate) fn normalize_model_name(model: &str) -> String {
    let trimmed = model.trim();
    if trimmed.starts_with("models/") {
        trimmed.to_string()
    } else {
        format!("models/{}", trimmed)
    }
}

/// `generateContent` URL for a model under `api_root`.
pub(crate) fn generate_content_url(api_root: &str, model: &str) -> String {
    format!(
        "{}/{}:generateContent",
        api_root.trim_end_matches('/'),
        normalize_model_name(model)
    )
}

/// Best-effort extraction of the `error.message` field from a Gemini error body.
pub(crate) fn gemini_error_message(body: String) -> String {
    serde_json::from_str::<GeminiErrorResponse>(&body)
        .map(|r| r.error.message)
        .unwrap_or(body)
}

pub(crate) fn extract_candidate_text(response: &GenerateContentResponse) -> Result<String, LlmError> {
    let candidate = response
        .candidates
        .as_ref()
        .and_then(|c| c.first())
        .ok_or_else(|| LlmError::InvalidResponse("Gemini API returned no candidates".to_string()))?;

    let parts = candidate
        .content
        .as_ref()
        .map(|c| c.parts.as_slice())
        .ok_or_else(|| {
            LlmError::InvalidResponse(
                "Gemini API returned a candidate without content.parts".to_string(),
            )
        })?;

    let mut combined = String::new();
    for p in parts {
        if let Some(text) = p.text.as_ref() {
            combined.push_str(text);
        }
    }

    if combined.trim().is_empty() {
        return Err(LlmError::InvalidResponse(
            "Gemini API returned empty candidate text".to_string(),
        ));
    }

    Ok(combined)
}

/// POST a `generateContent` request and return the candidate text.
pub(crate) async fn send_generate_content(
    client: &Client,
    api_root: &str,
    api_key: &str,
    model: &str,
    request: &GenerateContentRequest,
    timeout: Option<Duration>,
) -> Result<String, LlmError> {
    let mut req = client
        .post(generate_content_url(api_root, model))
        .header("x-goog-api-key", api_key.trim())
        .json(request);
    if let Some(timeout) = timeout {
        req = req.timeout(timeout);
    }

    let response = req
        .send()
        .await
        .map_err(|e| LlmError::from_transport("gemini", e))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(LlmError::from_status(
            "gemini",
            status.as_u16(),
            gemini_error_message(error_text),
        ));
    }

    let response_json: GenerateContentResponse = response.json().await.map_err(|e| {
        LlmError::InvalidResponse(format!("Failed to parse Gemini response: {}", e))
    })?;

    extract_candidate_text(&response_json)
}

#[derive(Debug, Serialize)]
pub(crate) struct GenerateContentRequest {
    #[serde(skip_serializing_if = "Option::is_none", rename = "systemInstruction")]
    pub system_instruction: Option<Content>,
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "generationConfig")]
    pub generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "fileData")]
    pub file_data: Option<FileData>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            file_data: None,
        }
    }

    pub fn file(mime_type: impl Into<String>, file_uri: impl Into<String>) -> Self {
        Self {
            text: None,
            file_data: Some(FileData {
                mime_type: mime_type.into(),
                file_uri: file_uri.into(),
            }),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct FileData {
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(rename = "fileUri")]
    pub file_uri: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct GenerationConfig {
    #[serde(rename = "maxOutputTokens")]
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for GeminiLlmProvider {
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, LlmError> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::NoApiKey("gemini".to_string()));
        }

        let request = self.build_request(prompt, system_prompt);
        let text = send_generate_content(
            &self.client,
            &self.api_root,
            &self.api_key,
            &self.model,
            &request,
            self.timeout,
        )
        .await?;

        log::info!("Gemini report generated ({} chars)", text.len());
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }
}
