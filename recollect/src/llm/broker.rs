use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::config::{BrokerConfig, BrokerMode, LlmConfig};
use crate::error::{RecollectError, Result};
use crate::llm::{prompts, CompletionOptions, LlmProvider};
use crate::models::RetentionTier;

/// Arbitrary key/value context sent along with a statement. Keys are kept
/// sorted so the cache key is canonical.
pub type BrokerContext = BTreeMap<String, Value>;

pub const MAX_IMPORTANCE_BOOST: u32 = 20;
const HEURISTIC_MODEL: &str = "heuristic";

/// Validated broker verdict for one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerAnalysis {
    /// Always within `0..=20`
    pub importance_boost: u32,
    pub categories: Vec<String>,
    pub reasoning: String,
    /// Always within `0.0..=1.0`
    pub confidence: f64,
    /// Tier the backend would pick on its own. Informational only.
    pub suggested_retention: Option<RetentionTier>,
}

/// Usage counters exposed through [`Enhancer::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BrokerStats {
    pub calls: u64,
    pub cache_hits: u64,
    pub failures: u64,
    pub total_tokens: u64,
    pub avg_tokens_per_call: f64,
    pub estimated_cost_usd: f64,
    pub model: String,
}

/// Optional enhancement stage consulted by the classifier for borderline
/// statements.
#[async_trait]
pub trait Enhancer: Send + Sync {
    async fn analyze(&self, statement: &str, context: &BrokerContext) -> Result<BrokerAnalysis>;

    fn stats(&self) -> BrokerStats;
}

/// Shape of the JSON a model returns. Every field is optional so partial
/// answers still validate.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    importance_boost: f64,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    reasoning: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    retention_level: Option<String>,
}

fn default_confidence() -> f64 {
    0.5
}

impl From<RawAnalysis> for BrokerAnalysis {
    fn from(raw: RawAnalysis) -> Self {
        let boost = if raw.importance_boost.is_finite() {
            raw.importance_boost
                .round()
                .clamp(0.0, MAX_IMPORTANCE_BOOST as f64) as u32
        } else {
            0
        };
        let confidence = if raw.confidence.is_finite() {
            raw.confidence.clamp(0.0, 1.0)
        } else {
            default_confidence()
        };
        let categories = raw
            .categories
            .into_iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        Self {
            importance_boost: boost,
            categories,
            reasoning: raw.reasoning,
            confidence,
            suggested_retention: raw
                .retention_level
                .and_then(|level| level.parse::<RetentionTier>().ok()),
        }
    }
}

enum BrokerBackend {
    Llm(LlmProvider),
    Heuristic,
}

#[derive(Debug, Default)]
struct Counters {
    calls: u64,
    cache_hits: u64,
    failures: u64,
    llm_calls: u64,
    total_tokens: u64,
}

/// Cached, metered broker in front of either a chat model or the offline
/// keyword analyzer.
pub struct LlmBroker {
    backend: BrokerBackend,
    cache: Mutex<LruCache<String, BrokerAnalysis>>,
    counters: Mutex<Counters>,
    cost_per_1k_tokens: f64,
}

impl LlmBroker {
    pub fn heuristic(cache_size: usize) -> Self {
        Self::with_backend(BrokerBackend::Heuristic, cache_size, 0.0)
    }

    pub fn with_provider(provider: LlmProvider, cache_size: usize, cost_per_1k_tokens: f64) -> Self {
        Self::with_backend(BrokerBackend::Llm(provider), cache_size, cost_per_1k_tokens)
    }

    /// Build the broker selected by `BROKER_MODE`, or `None` when it is off.
    ///
    /// An `llm` mode whose provider cannot be used falls back to the heuristic
    /// backend.
    pub fn from_config(broker: &BrokerConfig, llm: Option<&LlmConfig>) -> Option<Self> {
        match broker.mode {
            BrokerMode::Off => None,
            BrokerMode::Heuristic => Some(Self::heuristic(broker.cache_size)),
            BrokerMode::Llm => {
                let provider = LlmProvider::new(llm);
                if provider.is_available() {
                    tracing::info!(model = ?provider.model(), "LLM broker enabled");
                    Some(Self::with_provider(
                        provider,
                        broker.cache_size,
                        broker.cost_per_1k_tokens,
                    ))
                } else {
                    tracing::warn!(
                        backend = ?provider.backend(),
                        "LLM broker unavailable, falling back to heuristic broker"
                    );
                    Some(Self::heuristic(broker.cache_size))
                }
            }
        }
    }

    fn with_backend(backend: BrokerBackend, cache_size: usize, cost_per_1k_tokens: f64) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            cache: Mutex::new(LruCache::new(capacity)),
            counters: Mutex::new(Counters::default()),
            cost_per_1k_tokens,
        }
    }

    /// SHA-256 over the canonical JSON of `{context, statement}`.
    pub fn cache_key(statement: &str, context: &BrokerContext) -> String {
        #[derive(Serialize)]
        struct Payload<'a> {
            context: &'a BrokerContext,
            statement: &'a str,
        }

        let payload = serde_json::to_string(&Payload { context, statement }).unwrap_or_default();
        format!("{:x}", Sha256::digest(payload.as_bytes()))
    }

    fn model_label(&self) -> String {
        match &self.backend {
            BrokerBackend::Llm(provider) => provider.model().unwrap_or("llm").to_string(),
            BrokerBackend::Heuristic => HEURISTIC_MODEL.to_string(),
        }
    }

    async fn call_llm(
        provider: &LlmProvider,
        statement: &str,
        context: &BrokerContext,
    ) -> Result<(BrokerAnalysis, u32)> {
        let context_value = serde_json::to_value(context)?;
        let prompt = prompts::importance_analysis_prompt(statement, &context_value);
        let options = CompletionOptions {
            temperature: Some(0.3),
            max_tokens: Some(500),
            ..Default::default()
        };

        let (raw, tokens): (RawAnalysis, u32) = provider
            .complete_structured(&prompt, Some(prompts::IMPORTANCE_SYSTEM_PROMPT), Some(&options))
            .await?;
        Ok((raw.into(), tokens))
    }

    fn lock_counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Enhancer for LlmBroker {
    async fn analyze(&self, statement: &str, context: &BrokerContext) -> Result<BrokerAnalysis> {
        let key = Self::cache_key(statement, context);

        let cached = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(hit) = cached {
            self.lock_counters().cache_hits += 1;
            return Ok(hit);
        }

        self.lock_counters().calls += 1;

        let result = match &self.backend {
            BrokerBackend::Heuristic => Ok((heuristic_analysis(statement), 0)),
            BrokerBackend::Llm(provider) => Self::call_llm(provider, statement, context).await,
        };

        match result {
            Ok((analysis, tokens)) => {
                {
                    let mut counters = self.lock_counters();
                    if matches!(self.backend, BrokerBackend::Llm(_)) {
                        counters.llm_calls += 1;
                        counters.total_tokens += u64::from(tokens);
                    }
                }
                self.cache
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .put(key, analysis.clone());
                Ok(analysis)
            }
            Err(e) => {
                self.lock_counters().failures += 1;
                tracing::warn!(error = %e, "Broker analysis failed");
                if e.is_enhancement_failure() {
                    Err(e)
                } else {
                    Err(RecollectError::EnhancementUnavailable(e.to_string()))
                }
            }
        }
    }

    fn stats(&self) -> BrokerStats {
        let counters = self.lock_counters();
        let avg_tokens_per_call = if counters.llm_calls > 0 {
            counters.total_tokens as f64 / counters.llm_calls as f64
        } else {
            0.0
        };
        BrokerStats {
            calls: counters.calls,
            cache_hits: counters.cache_hits,
            failures: counters.failures,
            total_tokens: counters.total_tokens,
            avg_tokens_per_call,
            estimated_cost_usd: counters.total_tokens as f64 / 1000.0 * self.cost_per_1k_tokens,
            model: self.model_label(),
        }
    }
}

const FEAR_MARKERS: &[&str] = &["phobia", "terrified", "fear of", "afraid of"];
const MEDICAL_MARKERS: &[&str] = &["medication", "diagnosed"];
const RECURRING_MARKERS: &[&str] = &["keeps happening", "recurring", "every time"];

/// Offline keyword analyzer used when no model is configured.
fn heuristic_analysis(statement: &str) -> BrokerAnalysis {
    let text = statement.to_lowercase();
    let contains_any = |markers: &[&str]| markers.iter().any(|m| text.contains(m));

    let (boost, categories, reasoning): (u32, &[&str], &str) = if contains_any(FEAR_MARKERS) {
        (
            12,
            &["mental_health", "safety_concern"],
            "Detected fear/trauma language",
        )
    } else if contains_any(MEDICAL_MARKERS) {
        (8, &["medical"], "Detected implicit medical detail")
    } else if contains_any(RECURRING_MARKERS) {
        (6, &["pattern"], "Detected recurring pattern language")
    } else {
        (0, &[], "No additional signal")
    };

    BrokerAnalysis {
        importance_boost: boost,
        categories: categories.iter().map(|c| c.to_string()).collect(),
        reasoning: reasoning.to_string(),
        confidence: if boost > 0 { 0.75 } else { 0.5 },
        suggested_retention: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn context() -> BrokerContext {
        let mut ctx = BrokerContext::new();
        ctx.insert("importance".to_string(), json!(5.0));
        ctx.insert("turn".to_string(), json!(2));
        ctx
    }

    fn llm_response(content: &str, total_tokens: u32) -> serde_json::Value {
        json!({
            "id": "chatcmpl-test",
            "object": "chat.completion",
            "created": 1,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {
                "prompt_tokens": total_tokens - 10,
                "completion_tokens": 10,
                "total_tokens": total_tokens
            }
        })
    }

    fn provider_for(server: &MockServer) -> LlmProvider {
        LlmProvider::new(Some(&LlmConfig {
            model: "openai/gpt-4o-mini".to_string(),
            api_key: Some("test-key".to_string()),
            base_url: Some(server.uri()),
            timeout_secs: 5,
            max_retries: 0,
        }))
    }

    #[tokio::test]
    async fn test_heuristic_fear_language() {
        let broker = LlmBroker::heuristic(10);
        let analysis = broker
            .analyze("I have been terrified of elevators since June", &context())
            .await
            .unwrap();
        assert_eq!(analysis.importance_boost, 12);
        assert_eq!(
            analysis.categories,
            vec!["mental_health".to_string(), "safety_concern".to_string()]
        );
        assert_eq!(analysis.confidence, 0.75);
    }

    #[tokio::test]
    async fn test_heuristic_neutral_statement() {
        let broker = LlmBroker::heuristic(10);
        let analysis = broker
            .analyze("The weather looks fine", &BrokerContext::new())
            .await
            .unwrap();
        assert_eq!(analysis.importance_boost, 0);
        assert!(analysis.categories.is_empty());
        assert_eq!(analysis.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_repeated_request_hits_cache() {
        let broker = LlmBroker::heuristic(10);
        broker.analyze("I was diagnosed last year", &context()).await.unwrap();
        broker.analyze("I was diagnosed last year", &context()).await.unwrap();

        let stats = broker.stats();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.model, "heuristic");
    }

    #[test]
    fn test_cache_key_depends_on_context() {
        let a = LlmBroker::cache_key("same", &context());
        let b = LlmBroker::cache_key("same", &BrokerContext::new());
        assert_ne!(a, b);
        assert_eq!(a, LlmBroker::cache_key("same", &context()));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_raw_analysis_is_clamped() {
        let raw: RawAnalysis = serde_json::from_value(json!({
            "importance_boost": 45,
            "categories": [" Medical ", ""],
            "confidence": 1.7,
            "retention_level": "long_term"
        }))
        .unwrap();
        let analysis = BrokerAnalysis::from(raw);
        assert_eq!(analysis.importance_boost, MAX_IMPORTANCE_BOOST);
        assert_eq!(analysis.categories, vec!["medical".to_string()]);
        assert_eq!(analysis.confidence, 1.0);
        assert_eq!(analysis.suggested_retention, Some(RetentionTier::LongTerm));

        let raw: RawAnalysis =
            serde_json::from_value(json!({"importance_boost": -3, "confidence": -1})).unwrap();
        let analysis = BrokerAnalysis::from(raw);
        assert_eq!(analysis.importance_boost, 0);
        assert_eq!(analysis.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_llm_backend_tracks_tokens_and_cost() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(llm_response(
                r#"{"retention_level": "long_term", "importance_boost": 9, "categories": ["medical"], "reasoning": "Chronic condition", "confidence": 0.9}"#,
                200,
            )))
            .expect(1)
            .mount(&server)
            .await;

        let broker = LlmBroker::with_provider(provider_for(&server), 10, 0.002);
        let analysis = broker.analyze("My son has asthma", &context()).await.unwrap();
        assert_eq!(analysis.importance_boost, 9);
        assert_eq!(analysis.suggested_retention, Some(RetentionTier::LongTerm));

        // second call is served from the cache
        broker.analyze("My son has asthma", &context()).await.unwrap();

        let stats = broker.stats();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.total_tokens, 200);
        assert_eq!(stats.avg_tokens_per_call, 200.0);
        assert!((stats.estimated_cost_usd - 0.0004).abs() < 1e-12);
        assert_eq!(stats.model, "gpt-4o-mini");
    }

    #[tokio::test]
    async fn test_llm_error_is_reported_as_enhancement_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {
                    "message": "bad request",
                    "type": "invalid_request_error",
                    "param": null,
                    "code": null
                }
            })))
            .mount(&server)
            .await;

        let broker = LlmBroker::with_provider(provider_for(&server), 10, 0.0);
        let err = broker.analyze("My son has asthma", &context()).await.unwrap_err();
        assert!(err.is_enhancement_failure());
        assert_eq!(broker.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_unparseable_llm_content_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(llm_response("not json", 20)))
            .mount(&server)
            .await;

        let broker = LlmBroker::with_provider(provider_for(&server), 10, 0.0);
        assert!(broker.analyze("anything at all", &context()).await.is_err());
        assert_eq!(broker.stats().failures, 1);
    }

    #[test]
    fn test_from_config_modes() {
        let off = BrokerConfig::default();
        assert!(LlmBroker::from_config(&off, None).is_none());

        let llm_without_config = BrokerConfig {
            mode: BrokerMode::Llm,
            ..BrokerConfig::default()
        };
        let broker = LlmBroker::from_config(&llm_without_config, None).unwrap();
        assert_eq!(broker.stats().model, "heuristic");
    }
}
