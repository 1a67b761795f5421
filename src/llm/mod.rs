//! Report generation providers.
//!
//! A provider turns a rendered prompt into report text with a single remote
//! call. Providers classify upstream faults into [`LlmError`] variants at the
//! HTTP boundary; [`RetryingLlmProvider`] uses that classification to decide
//! whether another attempt is worth making.

mod anthropic;
mod gemini;
mod retrying;

pub use anthropic::AnthropicLlmProvider;
pub use gemini::GeminiLlmProvider;
pub(crate) use gemini::{
    gemini_error_message, send_generate_content, Content, GenerateContentRequest, GenerationConfig,
    Part, GEMINI_API_ROOT,
};
pub use retrying::RetryingLlmProvider;

use crate::retry::Retryable;
use async_trait::async_trait;
use std::time::Duration;

/// Default timeout for generation requests. Reports are long, so this is
/// well above what a short completion would need.
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);

/// Output token cap shared by both providers.
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

/// Low temperature keeps reports consistent between runs.
pub const DEFAULT_TEMPERATURE: f32 = 0.3;

/// Errors that can occur during generation.
///
/// The variant is the classification: see [`is_retryable_error`].
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Rate limited by {provider}: {message}")]
    RateLimited { provider: String, message: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("{provider} server error ({status}): {message}")]
    Server {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("{provider} rejected the credentials: {message}")]
    Authentication { provider: String, message: String },

    #[error("{provider} rejected the request ({status}): {message}")]
    InvalidRequest {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No API key configured for provider: {0}")]
    NoApiKey(String),

    #[error("API error: {0}")]
    Api(String),
}

impl LlmError {
    /// Map a non-success HTTP status to an error variant.
    pub fn from_status(provider: &str, status: u16, message: impl Into<String>) -> Self {
        let provider = provider.to_string();
        let message = message.into();
        match status {
            429 => LlmError::RateLimited { provider, message },
            408 => LlmError::Timeout(format!("{} returned 408: {}", provider, message)),
            401 | 403 => LlmError::Authentication { provider, message },
            400 | 404 | 413 | 422 => LlmError::InvalidRequest {
                provider,
                status,
                message,
            },
            // 529 is Anthropic's "overloaded"
            500..=599 => LlmError::Server {
                provider,
                status,
                message,
            },
            _ => LlmError::Api(format!("{} API error ({}): {}", provider, status, message)),
        }
    }

    /// Classify a transport failure from reqwest.
    pub fn from_transport(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(format!("{}: {}", provider, err))
        } else if err.is_connect() || err.is_request() {
            LlmError::Connection(format!("{}: {}", provider, err))
        } else {
            LlmError::Api(format!("{}: {}", provider, err))
        }
    }
}

/// Whether a failed generation call may succeed if attempted again.
///
/// Anything not positively known to be transient is fatal.
pub fn is_retryable_error(err: &LlmError) -> bool {
    match err {
        LlmError::RateLimited { .. }
        | LlmError::Connection(_)
        | LlmError::Timeout(_)
        | LlmError::Server { .. } => true,
        LlmError::Authentication { .. }
        | LlmError::InvalidRequest { .. }
        | LlmError::InvalidResponse(_)
        | LlmError::NoApiKey(_)
        | LlmError::Api(_) => false,
    }
}

impl Retryable for LlmError {
    fn is_retryable(&self) -> bool {
        is_retryable_error(self)
    }
}

/// Trait for report generation providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Send a single-turn prompt and return the generated text.
    async fn generate(&self, prompt: &str, system_prompt: Option<&str>)
        -> Result<String, LlmError>;

    /// Get the provider name
    fn name(&self) -> &'static str;

    /// Get the current model being used
    fn model(&self) -> &str;
}
