//! Runtime configuration, read from the environment (optionally via `.env`).
//!
//! Values are read once into plain structs. Pipelines take a snapshot at
//! construction, so changing the environment later only affects pipelines
//! built afterwards.

use crate::retry::RetryConfig;
use crate::storage::StorageLayout;
use crate::stt::{default_model_dir, ModelTier};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_LANGUAGE: &str = "pt";
pub const DEFAULT_CLAUDE_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_GEMINI_FLASH: &str = "gemini-2.5-flash";
pub const DEFAULT_GEMINI_PRO: &str = "gemini-2.5-pro";
pub const DEFAULT_COST_PER_REPORT: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{provider} is selected but {key} is not set")]
    MissingApiKey {
        provider: &'static str,
        key: &'static str,
    },

    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Provider selection and credentials.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Raw transcription provider name; resolved by the selector.
    pub transcription_provider: Option<String>,
    /// Raw generation provider name; resolved by the selector.
    pub generation_provider: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub language: String,
    pub whisper_model: ModelTier,
    pub whisper_model_dir: PathBuf,
    pub claude_model: String,
    pub gemini_flash_model: String,
    pub gemini_pro_model: String,
    pub llm_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            transcription_provider: None,
            generation_provider: None,
            anthropic_api_key: None,
            google_api_key: None,
            language: DEFAULT_LANGUAGE.to_string(),
            whisper_model: ModelTier::default(),
            whisper_model_dir: default_model_dir(),
            claude_model: DEFAULT_CLAUDE_MODEL.to_string(),
            gemini_flash_model: DEFAULT_GEMINI_FLASH.to_string(),
            gemini_pro_model: DEFAULT_GEMINI_PRO.to_string(),
            llm_timeout: crate::llm::DEFAULT_LLM_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

impl ProviderConfig {
    /// Read from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read using `lookup` for every key. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let retry = RetryConfig {
            max_retries: parse_or("RETRY_MAX_RETRIES", get("RETRY_MAX_RETRIES"), defaults.retry.max_retries)?,
            initial_delay: parse_secs(
                "RETRY_INITIAL_DELAY_SECS",
                get("RETRY_INITIAL_DELAY_SECS"),
                defaults.retry.initial_delay,
            )?,
            backoff_factor: parse_or(
                "RETRY_BACKOFF_FACTOR",
                get("RETRY_BACKOFF_FACTOR"),
                defaults.retry.backoff_factor,
            )?,
        };
        if !(retry.backoff_factor.is_finite() && retry.backoff_factor >= 1.0) {
            return Err(ConfigError::InvalidValue {
                key: "RETRY_BACKOFF_FACTOR",
                value: retry.backoff_factor.to_string(),
                reason: "must be a finite number >= 1".to_string(),
            });
        }

        Ok(Self {
            transcription_provider: get("TRANSCRIPTION_PROVIDER"),
            generation_provider: get("LLM_PROVIDER"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            google_api_key: get("GOOGLE_API_KEY"),
            language: get("DEFAULT_LANGUAGE").unwrap_or(defaults.language),
            whisper_model: get("WHISPER_MODEL")
                .map(|m| ModelTier::from_name(&m))
                .unwrap_or(defaults.whisper_model),
            whisper_model_dir: get("WHISPER_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.whisper_model_dir),
            claude_model: get("CLAUDE_MODEL").unwrap_or(defaults.claude_model),
            gemini_flash_model: get("GEMINI_MODEL_FLASH").unwrap_or(defaults.gemini_flash_model),
            gemini_pro_model: get("GEMINI_MODEL_PRO").unwrap_or(defaults.gemini_pro_model),
            llm_timeout: parse_secs("LLM_TIMEOUT_SECS", get("LLM_TIMEOUT_SECS"), defaults.llm_timeout)?,
            retry,
        })
    }
}

/// Full application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub providers: ProviderConfig,
    /// Root of the `audios`, `transcricoes` and `relatorios` directories.
    pub data_dir: PathBuf,
    pub template_dir: PathBuf,
    pub cost_per_report: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            providers: ProviderConfig::default(),
            data_dir: PathBuf::from("."),
            template_dir: PathBuf::from("templates"),
            cost_per_report: DEFAULT_COST_PER_REPORT,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        load_dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        Ok(Self {
            providers: ProviderConfig::from_lookup(&lookup)?,
            data_dir: get("VETSCRIBE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            template_dir: get("VETSCRIBE_TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.template_dir),
            cost_per_report: parse_or(
                "VETSCRIBE_COST_PER_REPORT",
                get("VETSCRIBE_COST_PER_REPORT"),
                defaults.cost_per_report,
            )?,
        })
    }

    pub fn storage_layout(&self) -> StorageLayout {
        StorageLayout::under(&self.data_dir)
    }
}

fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => log::debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => log::warn!("Ignoring unreadable .env file: {}", e),
    }
}

fn parse_or<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

fn parse_secs(key: &'static str, raw: Option<String>, default: Duration) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_or(key, raw, default.as_secs_f64())?;
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
        key,
        value: secs.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_nothing_set() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.providers.language, "pt");
        assert_eq!(config.providers.whisper_model, ModelTier::Base);
        assert_eq!(config.providers.claude_model, "claude-sonnet-4-20250514");
        assert_eq!(config.providers.gemini_pro_model, "gemini-2.5-pro");
        assert_eq!(config.providers.llm_timeout, Duration::from_secs(120));
        assert_eq!(config.providers.retry, RetryConfig::default());
        assert!(config.providers.transcription_provider.is_none());
        assert_eq!(config.data_dir, PathBuf::from("."));
        assert_eq!(config.cost_per_report, 0.05);
    }

    #[test]
    fn test_values_are_read_and_blank_is_unset() {
        let config = AppConfig::from_lookup(lookup(&[
            ("TRANSCRIPTION_PROVIDER", "cloud-multimodal"),
            ("LLM_PROVIDER", "  "),
            ("ANTHROPIC_API_KEY", " sk-test "),
            ("WHISPER_MODEL", "small"),
            ("LLM_TIMEOUT_SECS", "45"),
            ("RETRY_MAX_RETRIES", "5"),
            ("RETRY_INITIAL_DELAY_SECS", "0.5"),
            ("VETSCRIBE_DATA_DIR", "/srv/clinica"),
        ]))
        .unwrap();

        let p = &config.providers;
        assert_eq!(p.transcription_provider.as_deref(), Some("cloud-multimodal"));
        assert!(p.generation_provider.is_none());
        assert_eq!(p.anthropic_api_key.as_deref(), Some("sk-test"));
        assert_eq!(p.whisper_model, ModelTier::Small);
        assert_eq!(p.llm_timeout, Duration::from_secs(45));
        assert_eq!(p.retry.max_retries, 5);
        assert_eq!(p.retry.initial_delay, Duration::from_millis(500));
        assert_eq!(
            config.storage_layout().reports_dir,
            PathBuf::from("/srv/clinica/relatorios")
        );
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let err = ProviderConfig::from_lookup(lookup(&[("RETRY_MAX_RETRIES", "many")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "RETRY_MAX_RETRIES",
                ..
            }
        ));

        let err = ProviderConfig::from_lookup(lookup(&[("LLM_TIMEOUT_SECS", "-3")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "LLM_TIMEOUT_SECS", .. }));

        let err = ProviderConfig::from_lookup(lookup(&[("RETRY_BACKOFF_FACTOR", "0.5")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "RETRY_BACKOFF_FACTOR", .. }));
    }
}
