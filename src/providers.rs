//! Provider selection.
//!
//! Provider names from configuration are resolved into closed enums once, and
//! the matching provider is built from the same configuration snapshot. An
//! unknown name never fails: it logs a warning and the default is used.

use crate::config::{ConfigError, ProviderConfig};
use crate::llm::{AnthropicLlmProvider, GeminiLlmProvider, LlmProvider, RetryingLlmProvider};
use crate::stt::{GeminiSttProvider, LocalWhisperConfig, LocalWhisperProvider, SttProvider};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranscriptionBackend {
    #[default]
    LocalWhisper,
    Gemini,
}

impl TranscriptionBackend {
    /// Resolve a configured name. `None` or an unknown name gives the default.
    pub fn resolve(name: Option<&str>) -> Self {
        let Some(raw) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Self::default();
        };
        match raw.to_ascii_lowercase().as_str() {
            "local" | "openai_whisper" | "whisper" => TranscriptionBackend::LocalWhisper,
            "cloud-multimodal" | "google_gemini" | "gemini" => TranscriptionBackend::Gemini,
            _ => {
                log::warn!(
                    "Unknown transcription provider '{}', falling back to {}",
                    raw,
                    Self::default()
                );
                Self::default()
            }
        }
    }
}

impl fmt::Display for TranscriptionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptionBackend::LocalWhisper => write!(f, "local"),
            TranscriptionBackend::Gemini => write!(f, "cloud-multimodal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationBackend {
    #[default]
    Claude,
    Gemini,
}

impl GenerationBackend {
    /// Resolve a configured name. `None` or an unknown name gives the default.
    pub fn resolve(name: Option<&str>) -> Self {
        let Some(raw) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Self::default();
        };
        match raw.to_ascii_lowercase().as_str() {
            "llm-a" | "anthropic_claude" | "claude" | "anthropic" => GenerationBackend::Claude,
            "llm-b" | "google_gemini" | "gemini" => GenerationBackend::Gemini,
            _ => {
                log::warn!(
                    "Unknown generation provider '{}', falling back to {}",
                    raw,
                    Self::default()
                );
                Self::default()
            }
        }
    }
}

impl fmt::Display for GenerationBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationBackend::Claude => write!(f, "llm-a"),
            GenerationBackend::Gemini => write!(f, "llm-b"),
        }
    }
}

/// Builds providers from a configuration snapshot.
#[derive(Debug, Clone)]
pub struct ProviderSelector {
    config: ProviderConfig,
}

impl ProviderSelector {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }

    /// Selector over a fresh read of the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self::new(ProviderConfig::from_env()?))
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn transcription_backend(&self) -> TranscriptionBackend {
        TranscriptionBackend::resolve(self.config.transcription_provider.as_deref())
    }

    pub fn generation_backend(&self) -> GenerationBackend {
        GenerationBackend::resolve(self.config.generation_provider.as_deref())
    }

    pub fn transcription_provider(&self) -> Result<Arc<dyn SttProvider>, ConfigError> {
        let backend = self.transcription_backend();
        log::info!("Using transcription provider: {}", backend);

        match backend {
            TranscriptionBackend::LocalWhisper => {
                Ok(Arc::new(LocalWhisperProvider::new(LocalWhisperConfig {
                    tier: self.config.whisper_model,
                    model_dir: self.config.whisper_model_dir.clone(),
                    language: self.config.language.clone(),
                })))
            }
            TranscriptionBackend::Gemini => {
                let key = require_key(self.config.google_api_key.as_deref(), "gemini", "GOOGLE_API_KEY")?;
                Ok(Arc::new(GeminiSttProvider::new(
                    key,
                    Some(self.config.gemini_flash_model.clone()),
                    self.config.language.clone(),
                )))
            }
        }
    }

    /// Generation provider, always wrapped in the retrier.
    pub fn generation_provider(&self) -> Result<Arc<dyn LlmProvider>, ConfigError> {
        let backend = self.generation_backend();

        let inner: Arc<dyn LlmProvider> = match backend {
            GenerationBackend::Claude => {
                let key =
                    require_key(self.config.anthropic_api_key.as_deref(), "anthropic", "ANTHROPIC_API_KEY")?;
                Arc::new(
                    AnthropicLlmProvider::with_model(key, self.config.claude_model.clone())
                        .with_timeout(self.config.llm_timeout),
                )
            }
            GenerationBackend::Gemini => {
                let key = require_key(self.config.google_api_key.as_deref(), "gemini", "GOOGLE_API_KEY")?;
                Arc::new(
                    GeminiLlmProvider::with_model(key, self.config.gemini_pro_model.clone())
                        .with_timeout(self.config.llm_timeout),
                )
            }
        };

        log::info!(
            "Using generation provider: {} ({})",
            backend,
            inner.model()
        );
        Ok(Arc::new(RetryingLlmProvider::new(
            inner,
            self.config.retry.clone(),
        )))
    }
}

fn require_key(
    key: Option<&str>,
    provider: &'static str,
    env_key: &'static str,
) -> Result<String, ConfigError> {
    key.map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .ok_or(ConfigError::MissingApiKey {
            provider,
            key: env_key,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(transcription: Option<&str>, generation: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            transcription_provider: transcription.map(str::to_string),
            generation_provider: generation.map(str::to_string),
            anthropic_api_key: Some("sk-ant-test".to_string()),
            google_api_key: Some("g-test".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_transcription_names() {
        for name in ["local", "openai_whisper", "Whisper", " LOCAL "] {
            assert_eq!(
                TranscriptionBackend::resolve(Some(name)),
                TranscriptionBackend::LocalWhisper
            );
        }
        for name in ["cloud-multimodal", "google_gemini", "Gemini"] {
            assert_eq!(TranscriptionBackend::resolve(Some(name)), TranscriptionBackend::Gemini);
        }
        assert_eq!(TranscriptionBackend::resolve(None), TranscriptionBackend::LocalWhisper);
        assert_eq!(
            TranscriptionBackend::resolve(Some("azure")),
            TranscriptionBackend::LocalWhisper
        );
    }

    #[test]
    fn test_generation_names() {
        for name in ["llm-a", "anthropic_claude", "claude", "Anthropic"] {
            assert_eq!(GenerationBackend::resolve(Some(name)), GenerationBackend::Claude);
        }
        for name in ["llm-b", "google_gemini", "GEMINI"] {
            assert_eq!(GenerationBackend::resolve(Some(name)), GenerationBackend::Gemini);
        }
        assert_eq!(GenerationBackend::resolve(Some("")), GenerationBackend::Claude);
        assert_eq!(GenerationBackend::resolve(Some("gpt-5")), GenerationBackend::Claude);
    }

    #[test]
    fn test_unknown_generation_name_builds_default_provider() {
        let selector = ProviderSelector::new(config_with(None, Some("unknown-llm")));
        let provider = selector.generation_provider().unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.model(), "claude-sonnet-4-20250514");
    }

    #[test]
    fn test_selected_providers() {
        let selector = ProviderSelector::new(config_with(Some("cloud-multimodal"), Some("llm-b")));
        assert_eq!(selector.transcription_provider().unwrap().name(), "gemini");
        let llm = selector.generation_provider().unwrap();
        assert_eq!(llm.name(), "gemini");
        assert_eq!(llm.model(), "gemini-2.5-pro");

        let local = ProviderSelector::new(config_with(None, None));
        assert_eq!(local.transcription_provider().unwrap().name(), "local-whisper");
    }

    #[test]
    fn test_missing_keys_fail_at_construction() {
        let mut config = config_with(Some("gemini"), Some("claude"));
        config.anthropic_api_key = None;
        config.google_api_key = Some("   ".to_string());
        let selector = ProviderSelector::new(config);

        assert_eq!(
            selector.generation_provider().err(),
            Some(ConfigError::MissingApiKey {
                provider: "anthropic",
                key: "ANTHROPIC_API_KEY"
            })
        );
        assert!(matches!(
            selector.transcription_provider().err(),
            Some(ConfigError::MissingApiKey { key: "GOOGLE_API_KEY", .. })
        ));
    }

    #[test]
    fn test_local_whisper_needs_no_key() {
        let mut config = config_with(Some("local"), None);
        config.google_api_key = None;
        assert!(ProviderSelector::new(config).transcription_provider().is_ok());
    }
}
