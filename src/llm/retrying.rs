//! Retry decorator for generation providers.

use super::{LlmError, LlmProvider};
use crate::retry::{with_retry, RetryConfig};
use async_trait::async_trait;
use std::sync::Arc;

/// Wraps a provider so every `generate` call goes through [`with_retry`].
pub struct RetryingLlmProvider {
    inner: Arc<dyn LlmProvider>,
    config: RetryConfig,
}

impl RetryingLlmProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.config
    }
}

#[async_trait]
impl LlmProvider for RetryingLlmProvider {
    async fn generate(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> Result<String, LlmError> {
        log::debug!(
            "Generating with {} ({}), up to {} attempts",
            self.inner.name(),
            self.inner.model(),
            self.config.max_attempts()
        );
        with_retry(&self.config, || self.inner.generate(prompt, system_prompt)).await
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}
