use std::time::Duration;

use serde_json::Value;

use async_openai::{
    config::OpenAIConfig,
    error::{ApiError, OpenAIError},
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionResponse,
    },
    Client,
};

use crate::{
    config::{parse_llm_provider_model, LlmConfig},
    error::{RecollectError, Result},
    llm::provider::CompletionOptions,
};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";
const LMSTUDIO_BASE_URL: &str = "http://localhost:1234/v1";

#[derive(Debug, Clone)]
struct ApiConfig {
    base_url: String,
    api_key: Option<String>,
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

/// Parsed JSON body of a completion plus the tokens it consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonCompletion {
    pub value: Value,
    pub total_tokens: u32,
}

#[derive(Clone)]
pub struct LlmApiClient {
    client: Client<OpenAIConfig>,
    config: ApiConfig,
}

impl LlmApiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_config = ApiConfig::from_llm_config(config);

        let (provider, _) = parse_llm_provider_model(&config.model);
        let needs_api_key = !matches!(
            provider.to_lowercase().as_str(),
            "ollama" | "local" | "lmstudio"
        );

        if needs_api_key && api_config.api_key.is_none() {
            return Err(RecollectError::Llm(
                "API key required for this provider".to_string(),
            ));
        }

        let openai_config = OpenAIConfig::new()
            .with_api_base(api_config.base_url.clone())
            .with_api_key(api_config.api_key.clone().unwrap_or_default());

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api_config.timeout_secs))
            .build()
            .map_err(|error| {
                RecollectError::Llm(format!("Failed to create LLM HTTP client: {error}"))
            })?;

        // async-openai retries 5xx on its own for up to 15 minutes by default;
        // bound it by the request timeout so our retry loop stays in charge.
        let backoff = backoff::ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(api_config.timeout_secs)),
            ..Default::default()
        };

        let client = Client::with_config(openai_config)
            .with_http_client(http_client)
            .with_backoff(backoff);

        Ok(Self {
            client,
            config: api_config,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Run a chat completion expecting a JSON document back.
    pub async fn complete_json(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: Option<&CompletionOptions>,
    ) -> Result<JsonCompletion> {
        if prompt.trim().is_empty() {
            return Err(RecollectError::Validation(
                "Prompt cannot be empty".to_string(),
            ));
        }

        let mut last_error: Option<RecollectError> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay_ms = 100 * 2_u64.pow(attempt - 1);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            let request = self.build_request(prompt, system_prompt, options)?;

            match self.client.chat().create(request).await {
                Ok(response) => {
                    let total_tokens = response
                        .usage
                        .as_ref()
                        .map(|usage| usage.total_tokens)
                        .unwrap_or(0);
                    let content = Self::extract_content(response)?;
                    tracing::debug!(
                        response_len = content.len(),
                        total_tokens,
                        "LLM JSON response received"
                    );
                    let value = serde_json::from_str(strip_code_fence(&content)).map_err(|e| {
                        tracing::error!(response_len = content.len(), response_preview = %content.chars().take(100).collect::<String>(), error = %e, "Failed to parse JSON response");
                        RecollectError::Llm(format!("Failed to parse JSON response: {e}"))
                    })?;
                    return Ok(JsonCompletion {
                        value,
                        total_tokens,
                    });
                }
                Err(error) => {
                    if let Some(terminal) = Self::terminal_error(&error) {
                        return Err(terminal);
                    }

                    let retryable = Self::is_retryable(&error);
                    let mapped_error = Self::map_openai_error(error);

                    if retryable && attempt < self.config.max_retries {
                        tracing::debug!(attempt, error = %mapped_error, "Retrying LLM request");
                        last_error = Some(mapped_error);
                        continue;
                    }

                    return Err(mapped_error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RecollectError::Llm("LLM JSON completion failed after retries".to_string())
        }))
    }

    fn build_request(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        options: Option<&CompletionOptions>,
    ) -> Result<CreateChatCompletionRequest> {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();

        if let Some(system_prompt) = system_prompt.filter(|value| !value.trim().is_empty()) {
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system_prompt)
                    .build()
                    .map_err(|error| {
                        RecollectError::Validation(format!("Invalid system prompt: {error}"))
                    })?
                    .into(),
            );
        }

        messages.push(
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(|error| {
                    RecollectError::Validation(format!("Invalid user prompt: {error}"))
                })?
                .into(),
        );

        let mut request = CreateChatCompletionRequestArgs::default();
        request.model(self.config.model.clone()).messages(messages);
        Self::apply_completion_options(&mut request, options);

        request.build().map_err(|error| {
            RecollectError::Validation(format!("Invalid LLM completion request: {error}"))
        })
    }

    fn apply_completion_options(
        request: &mut CreateChatCompletionRequestArgs,
        options: Option<&CompletionOptions>,
    ) {
        let Some(options) = options else {
            return;
        };

        if let Some(temperature) = options.temperature {
            request.temperature(temperature);
        }

        if let Some(max_tokens) = options.max_tokens {
            request.max_tokens(max_tokens);
        }
    }

    fn extract_content(response: CreateChatCompletionResponse) -> Result<String> {
        let message = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RecollectError::Llm("LLM response contained no choices".to_string()))?
            .message
            .content
            .unwrap_or_default();

        if message.trim().is_empty() {
            return Err(RecollectError::Llm(
                "LLM response contained empty content".to_string(),
            ));
        }

        Ok(message)
    }

    /// 5xx responses, transport failures and untyped API errors are worth another try.
    fn is_retryable(error: &OpenAIError) -> bool {
        match error {
            OpenAIError::ApiError(api_error) => {
                api_error.r#type.is_none() && api_error.code.is_none()
            }
            OpenAIError::Reqwest(reqwest_error) => reqwest_error
                .status()
                .map_or(true, |status| status.is_server_error()),
            _ => false,
        }
    }

    /// Rate limits and rejected credentials end the attempt loop immediately.
    fn terminal_error(error: &OpenAIError) -> Option<RecollectError> {
        let status = match error {
            OpenAIError::Reqwest(reqwest_error) => reqwest_error.status(),
            _ => None,
        };
        if status == Some(reqwest::StatusCode::TOO_MANY_REQUESTS) {
            return Some(RecollectError::LlmRateLimit { retry_after: None });
        }
        if status == Some(reqwest::StatusCode::UNAUTHORIZED)
            || status == Some(reqwest::StatusCode::FORBIDDEN)
        {
            return Some(RecollectError::Llm(format!(
                "LLM authentication failed: {error}"
            )));
        }

        let OpenAIError::ApiError(api_error) = error else {
            return None;
        };
        if api_error_mentions(api_error, RATE_LIMIT_MARKERS) {
            Some(RecollectError::LlmRateLimit { retry_after: None })
        } else if api_error_mentions(api_error, AUTH_MARKERS) {
            Some(RecollectError::Llm(format!(
                "LLM authentication failed: {api_error}"
            )))
        } else {
            None
        }
    }

    fn map_openai_error(error: OpenAIError) -> RecollectError {
        match error {
            OpenAIError::Reqwest(reqwest_error) => {
                RecollectError::Llm(format!("LLM request failed: {reqwest_error}"))
            }
            OpenAIError::ApiError(api_error) => {
                RecollectError::Llm(format!("LLM API error: {api_error}"))
            }
            OpenAIError::JSONDeserialize(err) => {
                RecollectError::Llm(format!("Failed to parse LLM response: {err}"))
            }
            OpenAIError::InvalidArgument(message) => RecollectError::Validation(message),
            other => RecollectError::Llm(other.to_string()),
        }
    }
}

const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "rate_limit", "too many requests", "insufficient_quota"];
const AUTH_MARKERS: &[&str] = &["unauthorized", "authentication", "invalid api key", "invalid_api_key"];

fn api_error_mentions(api_error: &ApiError, markers: &[&str]) -> bool {
    let haystack = format!(
        "{} {} {}",
        api_error.message,
        api_error.r#type.as_deref().unwrap_or_default(),
        api_error.code.as_deref().unwrap_or_default()
    )
    .to_lowercase();
    markers.iter().any(|marker| haystack.contains(marker))
}

/// Some models wrap JSON in a markdown fence even when told not to.
fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

impl ApiConfig {
    fn from_llm_config(config: &LlmConfig) -> Self {
        let (provider, model) = parse_llm_provider_model(&config.model);

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| default_base_url(provider).to_string());

        let normalized_model = if provider.eq_ignore_ascii_case("local") {
            config.model.clone()
        } else {
            model.to_string()
        };

        Self {
            base_url,
            api_key: config.api_key.clone(),
            model: normalized_model,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        }
    }
}

pub(crate) fn default_base_url(provider: &str) -> &'static str {
    match provider.to_lowercase().as_str() {
        "openai" => OPENAI_BASE_URL,
        "openrouter" => OPENROUTER_BASE_URL,
        "ollama" => OLLAMA_BASE_URL,
        "lmstudio" => LMSTUDIO_BASE_URL,
        _ => OPENAI_BASE_URL,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_llm_config() -> LlmConfig {
        LlmConfig {
            model: "ollama/llama3".to_string(),
            api_key: None,
            base_url: None,
            timeout_secs: 30,
            max_retries: 0,
        }
    }

    #[test]
    fn test_local_provider_needs_no_key() {
        let client = LlmApiClient::new(&test_llm_config()).expect("client should be created");
        assert_eq!(client.model(), "llama3");
    }

    #[test]
    fn test_hosted_provider_requires_key() {
        let config = LlmConfig {
            model: "openai/gpt-4o-mini".to_string(),
            ..test_llm_config()
        };
        let result = LlmApiClient::new(&config);
        assert!(matches!(result, Err(RecollectError::Llm(_))));
    }

    #[test]
    fn test_request_carries_system_prompt() {
        let client = LlmApiClient::new(&test_llm_config()).unwrap();
        let request = client
            .build_request("statement", Some("be terse"), None)
            .expect("request should build");
        assert_eq!(request.messages.len(), 2);
        assert!(request.response_format.is_none());
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_default_base_urls() {
        assert_eq!(default_base_url("OpenRouter"), OPENROUTER_BASE_URL);
        assert_eq!(default_base_url("lmstudio"), LMSTUDIO_BASE_URL);
        assert_eq!(default_base_url("mystery"), OPENAI_BASE_URL);
    }
}
