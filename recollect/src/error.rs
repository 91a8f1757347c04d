use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecollectError {
    /// Bad or missing pattern resource. Recovered locally with built-in defaults.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The optional enhancement stage could not be used (timeout, cancellation,
    /// missing backend). Callers fall back to the rule-only classification.
    #[error("Enhancement unavailable: {0}")]
    EnhancementUnavailable(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("LLM rate limit exceeded, retry after {retry_after:?} seconds")]
    LlmRateLimit { retry_after: Option<u64> },

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RecollectError {
    /// Whether the error belongs to the broker family and should degrade to the
    /// pre-escalation classification.
    pub fn is_enhancement_failure(&self) -> bool {
        matches!(
            self,
            RecollectError::EnhancementUnavailable(_)
                | RecollectError::Llm(_)
                | RecollectError::LlmRateLimit { .. }
        )
    }
}

impl From<validator::ValidationErrors> for RecollectError {
    fn from(errors: validator::ValidationErrors) -> Self {
        RecollectError::Validation(errors.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RecollectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enhancement_failure_family() {
        assert!(RecollectError::Llm("boom".into()).is_enhancement_failure());
        assert!(RecollectError::LlmRateLimit { retry_after: None }.is_enhancement_failure());
        assert!(RecollectError::EnhancementUnavailable("off".into()).is_enhancement_failure());
        assert!(!RecollectError::Validation("bad".into()).is_enhancement_failure());
    }

    #[test]
    fn test_display_messages() {
        let err = RecollectError::Persistence("disk full".to_string());
        assert_eq!(err.to_string(), "Persistence error: disk full");
    }
}
