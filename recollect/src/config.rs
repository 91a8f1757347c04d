use serde::Deserialize;
use std::env;
use std::path::PathBuf;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_list(var: &str, default: &[&str]) -> Vec<String> {
    match env::var(var) {
        Ok(val) if !val.trim().is_empty() => val
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default.iter().map(|s| s.to_string()).collect(),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub patterns: PatternsConfig,
    pub classifier: ClassifierConfig,
    pub thresholds: ThresholdConfig,
    pub semantic: SemanticConfig,
    pub context: ContextConfig,
    pub decay: DecayConfig,
    pub learning: LearningConfig,
    pub broker: BrokerConfig,
    pub llm: Option<LlmConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PatternsConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Statements shorter than this are noise unless they carry a critical keyword
    pub noise_min_words: usize,
    pub critical_short_keywords: Vec<String>,
}

/// Bounds and targets for the per-session threshold controller
#[derive(Debug, Clone, Deserialize)]
pub struct ThresholdConfig {
    pub long_term: f64,
    pub short_term: f64,
    /// Number of most recent decisions considered when nudging cutoffs
    pub window: usize,
    /// No adaptation happens before this many decisions were recorded
    pub min_samples: usize,
    pub target_long_share: f64,
    pub target_immediate_share: f64,
    pub tolerance: f64,
    pub max_step: f64,
    pub gain: f64,
    pub long_term_min: f64,
    pub long_term_max: f64,
    pub short_term_min: f64,
    pub short_term_max: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemanticBackendKind {
    Tokens,
    Embeddings,
}

impl std::str::FromStr for SemanticBackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tokens" | "token" | "jaccard" => Ok(Self::Tokens),
            "embeddings" | "embedding" => Ok(Self::Embeddings),
            other => Err(format!("unknown semantic backend '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SemanticConfig {
    pub backend: SemanticBackendKind,
    pub similarity_threshold: f64,
    pub embedding_model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    pub window_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecayConfig {
    pub grace_turns: u32,
    pub rate: f64,
    pub floor: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LearningConfig {
    pub storage_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerMode {
    Off,
    Heuristic,
    Llm,
}

impl std::str::FromStr for BrokerMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" | "none" | "disabled" => Ok(Self::Off),
            "heuristic" | "mock" => Ok(Self::Heuristic),
            "llm" => Ok(Self::Llm),
            other => Err(format!("unknown broker mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub mode: BrokerMode,
    pub cache_size: usize,
    pub timeout_secs: u64,
    pub cost_per_1k_tokens: f64,
}

/// LLM configuration for chat/completion models
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for PatternsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/pattern_registry.json"),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            noise_min_words: 3,
            critical_short_keywords: DEFAULT_CRITICAL_SHORT_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

const DEFAULT_CRITICAL_SHORT_KEYWORDS: &[&str] = &[
    "married", "divorced", "died", "pregnant", "allergy", "ptsd", "fired", "quit",
];

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            long_term: 12.0,
            short_term: 4.0,
            window: 50,
            min_samples: 20,
            target_long_share: 0.175,
            target_immediate_share: 0.45,
            tolerance: 0.05,
            max_step: 0.5,
            gain: 4.0,
            long_term_min: 8.0,
            long_term_max: 20.0,
            short_term_min: 2.0,
            short_term_max: 8.0,
        }
    }
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            backend: SemanticBackendKind::Tokens,
            similarity_threshold: 0.78,
            embedding_model: "all-MiniLM-L6-v2".to_string(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self { window_size: 8 }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            grace_turns: 5,
            rate: 0.5,
            floor: 3.0,
        }
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("data/weights"),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            mode: BrokerMode::Off,
            cache_size: 1000,
            timeout_secs: 10,
            cost_per_1k_tokens: 0.00015,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let thresholds = ThresholdConfig::default();
        let llm = env::var("LLM_MODEL").ok().map(|model| LlmConfig {
            model,
            api_key: env::var("LLM_API_KEY").ok(),
            base_url: env::var("LLM_BASE_URL").ok(),
            timeout_secs: parse_env_or("LLM_TIMEOUT", 30),
            max_retries: parse_env_or("LLM_MAX_RETRIES", 3),
        });
        let default_mode = if llm.is_some() {
            BrokerMode::Llm
        } else {
            BrokerMode::Off
        };

        Self {
            patterns: PatternsConfig {
                path: env::var("PATTERN_REGISTRY_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PatternsConfig::default().path),
            },
            classifier: ClassifierConfig {
                noise_min_words: parse_env_or("NOISE_MIN_WORDS", 3),
                critical_short_keywords: parse_env_list(
                    "CRITICAL_SHORT_KEYWORDS",
                    DEFAULT_CRITICAL_SHORT_KEYWORDS,
                ),
            },
            thresholds: ThresholdConfig {
                long_term: parse_env_or("THRESHOLD_LONG_TERM", thresholds.long_term),
                short_term: parse_env_or("THRESHOLD_SHORT_TERM", thresholds.short_term),
                window: parse_env_or("THRESHOLD_WINDOW", thresholds.window),
                min_samples: parse_env_or("THRESHOLD_MIN_SAMPLES", thresholds.min_samples),
                target_long_share: parse_env_or(
                    "THRESHOLD_TARGET_LONG_SHARE",
                    thresholds.target_long_share,
                ),
                target_immediate_share: parse_env_or(
                    "THRESHOLD_TARGET_IMMEDIATE_SHARE",
                    thresholds.target_immediate_share,
                ),
                tolerance: parse_env_or("THRESHOLD_TOLERANCE", thresholds.tolerance),
                max_step: parse_env_or("THRESHOLD_MAX_STEP", thresholds.max_step),
                gain: parse_env_or("THRESHOLD_GAIN", thresholds.gain),
                long_term_min: parse_env_or("THRESHOLD_LONG_MIN", thresholds.long_term_min),
                long_term_max: parse_env_or("THRESHOLD_LONG_MAX", thresholds.long_term_max),
                short_term_min: parse_env_or("THRESHOLD_SHORT_MIN", thresholds.short_term_min),
                short_term_max: parse_env_or("THRESHOLD_SHORT_MAX", thresholds.short_term_max),
            },
            semantic: SemanticConfig {
                backend: parse_env_or("SEMANTIC_BACKEND", SemanticBackendKind::Tokens),
                similarity_threshold: parse_env_or("SEMANTIC_SIMILARITY_THRESHOLD", 0.78),
                embedding_model: env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| SemanticConfig::default().embedding_model),
            },
            context: ContextConfig {
                window_size: parse_env_or("CONTEXT_WINDOW_SIZE", 8),
            },
            decay: DecayConfig {
                grace_turns: parse_env_or("DECAY_GRACE_TURNS", 5),
                rate: parse_env_or("DECAY_RATE", 0.5),
                floor: parse_env_or("DECAY_FLOOR", 3.0),
            },
            learning: LearningConfig {
                storage_dir: env::var("LEARNING_STORAGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| LearningConfig::default().storage_dir),
            },
            broker: BrokerConfig {
                mode: parse_env_or("BROKER_MODE", default_mode),
                cache_size: parse_env_or("BROKER_CACHE_SIZE", 1000),
                timeout_secs: parse_env_or("BROKER_TIMEOUT_SECS", 10),
                cost_per_1k_tokens: parse_env_or("LLM_COST_PER_1K_TOKENS", 0.00015),
            },
            llm,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

/// Known LLM providers that use OpenAI-compatible APIs
pub const KNOWN_LLM_PROVIDERS: &[&str] = &["openai", "openrouter", "ollama", "lmstudio"];

/// Parse an LLM model name into (provider, model) tuple.
pub fn parse_llm_provider_model(model: &str) -> (&str, &str) {
    if let Some((prefix, rest)) = model.split_once('/') {
        let prefix_lower = prefix.to_lowercase();
        if KNOWN_LLM_PROVIDERS.contains(&prefix_lower.as_str()) {
            return (prefix, rest);
        }
    }
    // Default to treating the whole string as a local model
    ("local", model)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_backend_parse() {
        assert_eq!(
            "Embeddings".parse::<SemanticBackendKind>().unwrap(),
            SemanticBackendKind::Embeddings
        );
        assert!("vectors".parse::<SemanticBackendKind>().is_err());
    }

    #[test]
    fn test_parse_llm_provider_model() {
        assert_eq!(
            parse_llm_provider_model("openai/gpt-4o-mini"),
            ("openai", "gpt-4o-mini")
        );
        assert_eq!(parse_llm_provider_model("llama3"), ("local", "llama3"));
    }
}
