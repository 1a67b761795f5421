//! Gemini multimodal transcription.
//!
//! The audio is uploaded through the Files API (resumable protocol, single
//! chunk), polled until it becomes ACTIVE, and then referenced from a
//! `generateContent` call as a `fileData` part.

use super::{mime_type_for, SttError, SttProvider, Transcription};
use crate::llm::{
    gemini_error_message, send_generate_content, Content, GenerateContentRequest, GenerationConfig,
    LlmError, Part, GEMINI_API_ROOT,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

const GEMINI_UPLOAD_URL: &str = "https://generativelanguage.googleapis.com/upload/v1beta/files";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
const TRANSCRIPTION_PROMPT: &str =
    "Transcreva este áudio de consulta veterinária fielmente em português.";
const TRANSCRIPT_MAX_TOKENS: u32 = 8192;

/// Gemini provider for speech-to-text.
pub struct GeminiSttProvider {
    client: Client,
    api_key: String,
    model: String,
    language: String,
    api_root: String,
    upload_url: String,
    timeout: Option<Duration>,
    poll_interval: Duration,
    max_polls: u32,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: FileResource,
}

#[derive(Debug, Clone, Deserialize)]
struct FileResource {
    name: String,
    #[serde(default)]
    uri: String,
    #[serde(default, rename = "mimeType")]
    mime_type: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileState {
    Processing,
    Active,
    Failed,
}

impl FileResource {
    fn state(&self) -> FileState {
        match self.state.as_deref() {
            Some("ACTIVE") => FileState::Active,
            Some("FAILED") => FileState::Failed,
            // Older API versions omit the state for files that are ready.
            None => FileState::Active,
            Some(_) => FileState::Processing,
        }
    }
}

impl GeminiSttProvider {
    pub fn new(api_key: String, model: Option<String>, language: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            language: language.into(),
            api_root: GEMINI_API_ROOT.to_string(),
            upload_url: GEMINI_UPLOAD_URL.to_string(),
            timeout: Some(DEFAULT_TIMEOUT),
            poll_interval: Duration::from_secs(2),
            max_polls: 60,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_endpoints(mut self, api_root: impl Into<String>, upload_url: impl Into<String>) -> Self {
        self.api_root = api_root.into();
        self.upload_url = upload_url.into();
        self
    }

    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls.max(1);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn with_timeout_opt(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.timeout {
            Some(timeout) => req.timeout(timeout),
            None => req,
        }
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(LlmError::from_status(
            "gemini",
            status.as_u16(),
            gemini_error_message(body),
        ))
    }

    async fn upload(&self, bytes: Vec<u8>, mime_type: &str, display_name: &str) -> Result<FileResource, LlmError> {
        let start = self
            .client
            .post(&self.upload_url)
            .header("x-goog-api-key", self.api_key.trim())
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }));

        let response = self
            .with_timeout_opt(start)
            .send()
            .await
            .map_err(|e| LlmError::from_transport("gemini", e))?;
        let response = Self::check_status(response).await?;

        let session_url = response
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                LlmError::InvalidResponse("Upload start response had no x-goog-upload-url".to_string())
            })?;

        let finish = self
            .client
            .post(&session_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes);

        let response = self
            .with_timeout_opt(finish)
            .send()
            .await
            .map_err(|e| LlmError::from_transport("gemini", e))?;
        let response = Self::check_status(response).await?;

        let uploaded: UploadResponse = response.json().await.map_err(|e| {
            LlmError::InvalidResponse(format!("Failed to parse upload response: {}", e))
        })?;
        Ok(uploaded.file)
    }

    async fn get_file(&self, name: &str) -> Result<FileResource, LlmError> {
        let url = format!("{}/{}", self.api_root.trim_end_matches('/'), name);
        let req = self
            .client
            .get(url)
            .header("x-goog-api-key", self.api_key.trim());
        let response = self
            .with_timeout_opt(req)
            .send()
            .await
            .map_err(|e| LlmError::from_transport("gemini", e))?;
        let response = Self::check_status(response).await?;

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse file resource: {}", e)))
    }

    async fn wait_until_active(&self, mut file: FileResource) -> Result<FileResource, SttError> {
        for _ in 0..self.max_polls {
            match file.state() {
                FileState::Active => return Ok(file),
                FileState::Failed => {
                    return Err(SttError::Audio(format!(
                        "Gemini could not process uploaded file {}",
                        file.name
                    )))
                }
                FileState::Processing => {
                    log::debug!("Waiting for Gemini file {} to become active", file.name);
                    tokio::time::sleep(self.poll_interval).await;
                    file = self.get_file(&file.name).await?;
                }
            }
        }

        if file.state() == FileState::Active {
            return Ok(file);
        }
        Err(SttError::Timeout(format!(
            "uploaded file {} not active after {} polls",
            file.name, self.max_polls
        )))
    }

    async fn delete_file(&self, name: &str) {
        let url = format!("{}/{}", self.api_root.trim_end_matches('/'), name);
        let result = self
            .client
            .delete(url)
            .header("x-goog-api-key", self.api_key.trim())
            .send()
            .await;
        if let Err(e) = result {
            log::warn!("Failed to delete Gemini file {}: {}", name, e);
        }
    }

    fn build_request(&self, mime_type: &str, file_uri: &str) -> GenerateContentRequest {
        GenerateContentRequest {
            system_instruction: None,
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part::text(TRANSCRIPTION_PROMPT), Part::file(mime_type, file_uri)],
            }],
            generation_config: Some(GenerationConfig {
                max_output_tokens: TRANSCRIPT_MAX_TOKENS,
                temperature: Some(0.0),
            }),
        }
    }
}

#[async_trait]
impl SttProvider for GeminiSttProvider {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcription, SttError> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::NoApiKey("gemini".to_string()).into());
        }

        let bytes = tokio::fs::read(audio_path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SttError::FileNotFound(audio_path.to_path_buf()),
            _ => SttError::Audio(format!("read {}: {}", audio_path.display(), e)),
        })?;

        let mime_type = mime_type_for(audio_path);
        let display_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("consulta");

        log::info!(
            "Uploading {} ({} bytes, {}) to Gemini",
            display_name,
            bytes.len(),
            mime_type
        );
        let uploaded = self.upload(bytes, mime_type, display_name).await?;
        let file = self.wait_until_active(uploaded).await?;
        let effective_mime = file.mime_type.as_deref().unwrap_or(mime_type);

        let request = self.build_request(effective_mime, &file.uri);
        let result = send_generate_content(
            &self.client,
            &self.api_root,
            &self.api_key,
            &self.model,
            &request,
            self.timeout,
        )
        .await;

        self.delete_file(&file.name).await;

        let text = result?;
        log::info!("Gemini transcription finished ({} chars)", text.len());

        Ok(Transcription {
            text: text.trim().to_string(),
            language: self.language.clone(),
        })
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_creation() {
        let provider = GeminiSttProvider::new("test-key".to_string(), None, "pt");
        assert_eq!(provider.name(), "gemini");
        assert_eq!(provider.model(), "gemini-2.5-flash");
    }

    #[test]
    fn test_request_references_uploaded_file() {
        let provider = GeminiSttProvider::new("k".to_string(), None, "pt");
        let body = serde_json::to_value(
            provider.build_request("audio/mp4", "https://generativelanguage.googleapis.com/v1beta/files/abc"),
        )
        .unwrap();

        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], TRANSCRIPTION_PROMPT);
        assert_eq!(parts[1]["fileData"]["mimeType"], "audio/mp4");
        assert!(parts[1]["fileData"]["fileUri"]
            .as_str()
            .unwrap()
            .ends_with("files/abc"));
    }

    #[test]
    fn test_file_state_parsing() {
        let file: UploadResponse = serde_json::from_str(
            r#"{"file":{"name":"files/abc","uri":"u","mimeType":"audio/mpeg","state":"PROCESSING"}}"#,
        )
        .unwrap();
        assert_eq!(file.file.state(), FileState::Processing);

        let active: FileResource =
            serde_json::from_str(r#"{"name":"files/abc","uri":"u","state":"ACTIVE"}"#).unwrap();
        assert_eq!(active.state(), FileState::Active);

        let failed: FileResource =
            serde_json::from_str(r#"{"name":"files/abc","state":"FAILED"}"#).unwrap();
        assert_eq!(failed.state(), FileState::Failed);
    }

    #[tokio::test]
    async fn test_missing_key_fails_before_reading_audio() {
        let provider = GeminiSttProvider::new(String::new(), None, "pt");
        let err = provider
            .transcribe(Path::new("/nonexistent/consulta.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, SttError::Remote(LlmError::NoApiKey(_))));
    }

    #[tokio::test]
    async fn test_missing_audio_file() {
        let provider = GeminiSttProvider::new("k".to_string(), None, "pt");
        let err = provider
            .transcribe(Path::new("/nonexistent/consulta.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, SttError::FileNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_upload_state_is_reported() {
        let provider = GeminiSttProvider::new("k".to_string(), None, "pt");
        let file = FileResource {
            name: "files/abc".to_string(),
            uri: String::new(),
            mime_type: None,
            state: Some("FAILED".to_string()),
        };
        assert!(matches!(
            provider.wait_until_active(file).await,
            Err(SttError::Audio(_))
        ));
    }
}
