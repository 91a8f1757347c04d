use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use regex::Regex;
use serde::Serialize;

use crate::config::{SemanticBackendKind, SemanticConfig};
use crate::error::Result;
use crate::intelligence::utils::jaccard;

/// Tokens that flip the polarity of a statement.
const NEGATION_WORDS: &[&str] = &[
    "not", "never", "can't", "cannot", "won't", "no", "nothing", "nobody", "hardly", "barely",
    "rarely",
];

/// A statement encoded for comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Encoding {
    Tokens(HashSet<String>),
    Vector(Vec<f32>),
}

/// Similarity strategy behind the matcher. Implementations must return
/// values in `[0, 1]` for encodings they produced themselves.
pub trait SimilarityBackend: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, text: &str) -> Result<Encoding>;
    fn similarity(&self, a: &Encoding, b: &Encoding) -> f64;
}

/// Lowercased word tokens compared with Jaccard similarity.
#[derive(Debug)]
pub struct TokenSetBackend {
    token_re: Regex,
}

impl TokenSetBackend {
    pub fn new() -> Result<Self> {
        Ok(Self {
            token_re: Regex::new(r"[a-zA-Z']+")?,
        })
    }

    fn tokens(&self, text: &str) -> HashSet<String> {
        let lowered = text.to_lowercase();
        self.token_re
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}

impl SimilarityBackend for TokenSetBackend {
    fn name(&self) -> &'static str {
        "tokens"
    }

    fn encode(&self, text: &str) -> Result<Encoding> {
        Ok(Encoding::Tokens(self.tokens(text)))
    }

    fn similarity(&self, a: &Encoding, b: &Encoding) -> f64 {
        match (a, b) {
            (Encoding::Tokens(a), Encoding::Tokens(b)) => jaccard(a, b),
            _ => 0.0,
        }
    }
}

/// Normalised sentence embeddings compared by dot product.
#[cfg(feature = "local-embeddings")]
#[derive(Debug)]
pub struct EmbeddingBackend {
    provider: crate::embeddings::EmbeddingProvider,
}

#[cfg(feature = "local-embeddings")]
impl EmbeddingBackend {
    pub fn new(model_name: &str) -> Result<Self> {
        Ok(Self {
            provider: crate::embeddings::EmbeddingProvider::new(model_name)?,
        })
    }
}

#[cfg(feature = "local-embeddings")]
impl SimilarityBackend for EmbeddingBackend {
    fn name(&self) -> &'static str {
        "embeddings"
    }

    fn encode(&self, text: &str) -> Result<Encoding> {
        Ok(Encoding::Vector(self.provider.embed_single(text)?))
    }

    fn similarity(&self, a: &Encoding, b: &Encoding) -> f64 {
        match (a, b) {
            (Encoding::Vector(a), Encoding::Vector(b)) if a.len() == b.len() => {
                let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
                f64::from(dot).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SemanticMatch {
    pub text: String,
    pub similarity: f64,
    pub turn_number: u32,
}

#[derive(Default)]
struct MatcherCache {
    encodings: HashMap<String, Encoding>,
    // Registration order, so `find_similar` ties break by first mention.
    order: Vec<(String, u32)>,
}

/// Similarity and negation-disagreement checks over registered statements.
pub struct SemanticMatcher {
    backend: Box<dyn SimilarityBackend>,
    token_re: Regex,
    similarity_threshold: f64,
    cache: Mutex<MatcherCache>,
}

impl std::fmt::Debug for SemanticMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticMatcher")
            .field("backend", &self.backend.name())
            .field("similarity_threshold", &self.similarity_threshold)
            .finish_non_exhaustive()
    }
}

impl SemanticMatcher {
    pub fn new(backend: Box<dyn SimilarityBackend>, similarity_threshold: f64) -> Result<Self> {
        Ok(Self {
            backend,
            token_re: Regex::new(r"[a-zA-Z']+")?,
            similarity_threshold,
            cache: Mutex::new(MatcherCache::default()),
        })
    }

    /// Pick the backend named in config. The embedding backend needs the
    /// `local-embeddings` feature; when it is missing or the model fails to
    /// load the matcher runs on token sets.
    pub fn from_config(config: &SemanticConfig) -> Result<Self> {
        let backend: Box<dyn SimilarityBackend> = match config.backend {
            SemanticBackendKind::Tokens => Box::new(TokenSetBackend::new()?),
            SemanticBackendKind::Embeddings => embedding_backend(&config.embedding_model)?,
        };
        tracing::debug!(backend = backend.name(), "Semantic matcher ready");
        Self::new(backend, config.similarity_threshold)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.similarity_threshold
    }

    /// Cache the encoding of `text`. The first registration keeps its turn.
    pub fn register_statement(&self, text: &str, turn_number: u32) {
        if self.lock().encodings.contains_key(text) {
            return;
        }
        match self.backend.encode(text) {
            Ok(encoding) => {
                let mut cache = self.lock();
                if !cache.encodings.contains_key(text) {
                    cache.encodings.insert(text.to_string(), encoding);
                    cache.order.push((text.to_string(), turn_number));
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to encode statement"),
        }
    }

    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        match (self.encode(a), self.encode(b)) {
            (Some(a), Some(b)) => self.backend.similarity(&a, &b),
            _ => 0.0,
        }
    }

    /// Registered statements at or above the similarity threshold, best first.
    pub fn find_similar(&self, statement: &str, top_k: usize) -> Vec<SemanticMatch> {
        let Some(target) = self.encode(statement) else {
            return Vec::new();
        };
        let cache = self.lock();
        let mut matches: Vec<SemanticMatch> = cache
            .order
            .iter()
            .filter_map(|(text, turn_number)| {
                let encoding = cache.encodings.get(text)?;
                let similarity = self.backend.similarity(&target, encoding);
                (similarity >= self.similarity_threshold).then(|| SemanticMatch {
                    text: text.clone(),
                    similarity,
                    turn_number: *turn_number,
                })
            })
            .collect();
        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(top_k);
        matches
    }

    /// Similar enough, and exactly one side carries negation.
    pub fn detect_contradiction(&self, a: &str, b: &str) -> bool {
        if self.similarity(a, b) < self.similarity_threshold {
            return false;
        }
        self.negation_disagreement(a, b)
    }

    fn negation_disagreement(&self, a: &str, b: &str) -> bool {
        let negations = |text: &str| -> HashSet<String> {
            let lowered = text.to_lowercase();
            self.token_re
                .find_iter(&lowered)
                .map(|m| m.as_str())
                .filter(|token| NEGATION_WORDS.contains(token))
                .map(str::to_string)
                .collect()
        };
        let neg_a = negations(a);
        let neg_b = negations(b);
        neg_a.is_empty() != neg_b.is_empty()
    }

    fn encode(&self, text: &str) -> Option<Encoding> {
        if let Some(cached) = self.lock().encodings.get(text) {
            return Some(cached.clone());
        }
        match self.backend.encode(text) {
            Ok(encoding) => Some(encoding),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode statement");
                None
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MatcherCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(feature = "local-embeddings")]
fn embedding_backend(model: &str) -> Result<Box<dyn SimilarityBackend>> {
    match EmbeddingBackend::new(model) {
        Ok(backend) => Ok(Box::new(backend)),
        Err(e) => {
            tracing::warn!(error = %e, model, "Embedding model unavailable, using token sets");
            Ok(Box::new(TokenSetBackend::new()?))
        }
    }
}

#[cfg(not(feature = "local-embeddings"))]
fn embedding_backend(model: &str) -> Result<Box<dyn SimilarityBackend>> {
    tracing::warn!(
        model,
        "Embedding backend requested but the local-embeddings feature is disabled, using token sets"
    );
    Ok(Box::new(TokenSetBackend::new()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(threshold: f64) -> SemanticMatcher {
        SemanticMatcher::new(Box::new(TokenSetBackend::new().unwrap()), threshold).unwrap()
    }

    #[test]
    fn test_negated_restatement_is_contradiction() {
        let matcher = matcher(0.6);
        assert!(matcher.detect_contradiction("I eat meat", "I do not eat meat"));
    }

    #[test]
    fn test_both_negated_is_not_contradiction() {
        let matcher = matcher(0.5);
        assert!(!matcher.detect_contradiction("I never eat meat", "I do not eat meat"));
    }

    #[test]
    fn test_dissimilar_statements_are_not_contradiction() {
        let matcher = matcher(0.78);
        assert!(!matcher.detect_contradiction("I like hiking", "I never drink coffee"));
    }

    #[test]
    fn test_identical_statements_score_one() {
        let matcher = matcher(0.78);
        assert_eq!(matcher.similarity("The cat sat", "the cat sat"), 1.0);
    }

    #[test]
    fn test_find_similar_returns_registered_matches() {
        let matcher = matcher(0.5);
        matcher.register_statement("I work at the hospital", 1);
        matcher.register_statement("The weather is nice", 2);
        matcher.register_statement("I work at the hospital", 7);

        let matches = matcher.find_similar("I work at a hospital", 3);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].turn_number, 1);
        assert!(matches[0].similarity >= 0.5);
    }

    #[test]
    fn test_find_similar_empty_cache() {
        let matcher = matcher(0.1);
        assert!(matcher.find_similar("anything", 3).is_empty());
    }

    #[test]
    fn test_embeddings_request_without_feature_uses_tokens() {
        let config = SemanticConfig {
            backend: SemanticBackendKind::Embeddings,
            ..SemanticConfig::default()
        };
        if cfg!(not(feature = "local-embeddings")) {
            let matcher = SemanticMatcher::from_config(&config).unwrap();
            assert_eq!(matcher.backend_name(), "tokens");
        }
    }
}
