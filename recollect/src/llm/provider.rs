use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::config::{parse_llm_provider_model, LlmConfig};
use crate::error::{RecollectError, Result};
use crate::llm::api::{default_base_url, JsonCompletion, LlmApiClient};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAI,
    OpenRouter,
    Ollama,
    LmStudio,
    OpenAICompatible { base_url: String },
    Unavailable { reason: String },
}

#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Clone)]
pub struct LlmProvider {
    backend: LlmBackend,
    config: Option<Arc<LlmConfig>>,
    client: Option<LlmApiClient>,
}

impl std::fmt::Debug for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmProvider")
            .field("backend", &self.backend)
            .field("model", &self.model())
            .finish()
    }
}

impl LlmProvider {
    pub fn new(config: Option<&LlmConfig>) -> Self {
        let Some(config) = config else {
            return Self::unavailable("No LLM configuration provided");
        };

        let (provider, _model) = parse_llm_provider_model(&config.model);

        let backend = match provider.to_lowercase().as_str() {
            "openai" => LlmBackend::OpenAI,
            "openrouter" => LlmBackend::OpenRouter,
            "ollama" => LlmBackend::Ollama,
            "lmstudio" => LlmBackend::LmStudio,
            _ => {
                if let Some(base_url) = &config.base_url {
                    LlmBackend::OpenAICompatible {
                        base_url: base_url.clone(),
                    }
                } else {
                    LlmBackend::Unavailable {
                        reason: format!("Unknown provider in model: {}", config.model),
                    }
                }
            }
        };

        if let LlmBackend::Unavailable { reason } = &backend {
            return Self::unavailable(reason);
        }

        let client = match LlmApiClient::new(config) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(model = %config.model, error = %e, "LLM client could not be created");
                return Self::unavailable(&e.to_string());
            }
        };

        Self {
            backend,
            config: Some(Arc::new(config.clone())),
            client: Some(client),
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            backend: LlmBackend::Unavailable {
                reason: reason.to_string(),
            },
            config: None,
            client: None,
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.backend, LlmBackend::Unavailable { .. })
    }

    pub fn backend(&self) -> &LlmBackend {
        &self.backend
    }

    pub fn config(&self) -> Option<&LlmConfig> {
        self.config.as_deref()
    }

    /// Model label without the provider prefix.
    pub fn model(&self) -> Option<&str> {
        self.client.as_ref().map(|client| client.model())
    }

    pub fn base_url(&self) -> Option<&str> {
        let config = self.config()?;
        if let Some(base_url) = config.base_url.as_deref() {
            return Some(base_url);
        }
        let (provider, _) = parse_llm_provider_model(&config.model);
        Some(default_base_url(provider))
    }

    pub async fn complete_json(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: Option<&CompletionOptions>,
    ) -> Result<JsonCompletion> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| RecollectError::EnhancementUnavailable(self.unavailable_reason()))?;

        client.complete_json(prompt, system_prompt, options).await
    }

    /// Deserialize the completion into `T`, returning the tokens spent with it.
    pub async fn complete_structured<T: DeserializeOwned>(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: Option<&CompletionOptions>,
    ) -> Result<(T, u32)> {
        let completion = self.complete_json(prompt, system_prompt, options).await?;

        let parsed = serde_json::from_value(completion.value)
            .map_err(|e| RecollectError::Llm(format!("Failed to deserialize response: {e}")))?;
        Ok((parsed, completion.total_tokens))
    }

    fn unavailable_reason(&self) -> String {
        match &self.backend {
            LlmBackend::Unavailable { reason } => reason.clone(),
            _ => "LLM client not initialized".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(model: &str) -> LlmConfig {
        LlmConfig {
            model: model.to_string(),
            api_key: Some("test-key".to_string()),
            base_url: None,
            timeout_secs: 5,
            max_retries: 0,
        }
    }

    #[test]
    fn test_provider_detection() {
        let provider = LlmProvider::new(Some(&config("openrouter/openai/gpt-4o")));
        assert_eq!(provider.backend(), &LlmBackend::OpenRouter);
        assert_eq!(provider.base_url(), Some("https://openrouter.ai/api/v1"));
        assert_eq!(provider.model(), Some("openai/gpt-4o"));
    }

    #[test]
    fn test_unknown_provider_without_base_url_is_unavailable() {
        let provider = LlmProvider::new(Some(&config("mystery-model")));
        assert!(!provider.is_available());
    }

    #[test]
    fn test_unknown_provider_with_base_url_is_compatible() {
        let mut cfg = config("mystery-model");
        cfg.base_url = Some("http://localhost:9999/v1".to_string());
        let provider = LlmProvider::new(Some(&cfg));
        assert!(matches!(
            provider.backend(),
            LlmBackend::OpenAICompatible { .. }
        ));
    }

    #[tokio::test]
    async fn test_unavailable_provider_reports_enhancement_failure() {
        let provider = LlmProvider::new(None);
        let err = provider
            .complete_json("prompt", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, RecollectError::EnhancementUnavailable(_)));
        assert!(err.is_enhancement_failure());
    }
}
