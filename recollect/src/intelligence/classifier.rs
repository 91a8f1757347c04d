use std::sync::Arc;
use std::time::Duration;

use regex::{Regex, RegexBuilder};
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::ClassifierConfig;
use crate::error::{RecollectError, Result};
use crate::intelligence::patterns::PatternSet;
use crate::intelligence::semantic::SemanticMatcher;
use crate::intelligence::thresholds::ThresholdController;
use crate::intelligence::utils::contains_phrase;
use crate::llm::{BrokerAnalysis, BrokerContext, Enhancer};
use crate::models::{MemoryItem, RetentionTier, ThresholdSnapshot, UserWeights};

const DETAILED_WORD_COUNT: usize = 15;
const ESCALATION_STRONG_WORDS: &[&str] = &["never", "always", "must", "need", "have to", "essential"];

/// Compiled heuristic detectors applied after the weighted rules.
#[derive(Debug)]
struct Heuristics {
    proper_noun: Regex,
    number: Regex,
    first_person: Regex,
    permanence: Regex,
    immediacy: Regex,
    emotional: Vec<Regex>,
    escalation_first_person: Regex,
}

impl Heuristics {
    fn new() -> Result<Self> {
        let ci = |pattern: &str| RegexBuilder::new(pattern).case_insensitive(true).build();
        Ok(Self {
            proper_noun: Regex::new(r"\b[A-Z][a-z]+\b")?,
            number: Regex::new(r"\b\d+\b")?,
            first_person: ci(r"\b(I|my|me|I'm|I've)\b")?,
            permanence: ci(r"\b(always|never|forever|permanently)\b")?,
            immediacy: ci(r"\b(today|now|currently|right now)\b")?,
            emotional: vec![
                ci(r"\b(terrified|terrifying|terrifies|frightens|scares)\b")?,
                ci(r"\b(devastated|heartbroken|tragic|traumatic)\b")?,
                ci(r"\b(desperate|urgent|critical|emergency)\b")?,
                ci(r"\b(anxious|worried|concerned|stressed)\b")?,
            ],
            escalation_first_person: ci(r"\b(I|my|me)\b")?,
        })
    }
}

/// Scores statements against the weighted rule set and picks a tier.
///
/// Borderline statements are optionally sent to an [`Enhancer`]; any failure
/// there leaves the rule-only classification in place.
pub struct StatementClassifier {
    patterns: Arc<PatternSet>,
    config: ClassifierConfig,
    heuristics: Heuristics,
    thresholds: Arc<ThresholdController>,
    matcher: Arc<SemanticMatcher>,
    enhancer: Option<Arc<dyn Enhancer>>,
    enhancement_timeout: Duration,
    cancel: Option<CancellationToken>,
}

impl std::fmt::Debug for StatementClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementClassifier")
            .field("config", &self.config)
            .field("enhancer", &self.enhancer.is_some())
            .field("enhancement_timeout", &self.enhancement_timeout)
            .finish_non_exhaustive()
    }
}

impl StatementClassifier {
    pub fn new(
        patterns: Arc<PatternSet>,
        config: ClassifierConfig,
        thresholds: Arc<ThresholdController>,
        matcher: Arc<SemanticMatcher>,
    ) -> Result<Self> {
        Ok(Self {
            patterns,
            config,
            heuristics: Heuristics::new()?,
            thresholds,
            matcher,
            enhancer: None,
            enhancement_timeout: Duration::from_secs(10),
            cancel: None,
        })
    }

    pub fn with_enhancer(mut self, enhancer: Arc<dyn Enhancer>, timeout: Duration) -> Self {
        self.enhancer = Some(enhancer);
        self.enhancement_timeout = timeout;
        self
    }

    /// Abort in-flight enhancement calls when `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn enhancer(&self) -> Option<&Arc<dyn Enhancer>> {
        self.enhancer.as_ref()
    }

    /// Cutoffs for this user right now: controller snapshot plus learned adjustments.
    pub fn effective_thresholds(&self, weights: Option<&UserWeights>) -> ThresholdSnapshot {
        let snapshot = self.thresholds.snapshot();
        match weights {
            Some(w) => snapshot.adjusted(
                w.threshold_adjustments.long_term,
                w.threshold_adjustments.short_term,
            ),
            None => snapshot,
        }
    }

    /// Too short to carry information and no critical keyword to save it.
    pub fn is_noise(&self, statement: &str) -> bool {
        if statement.split_whitespace().count() >= self.config.noise_min_words {
            return false;
        }
        let lowered = statement.to_lowercase();
        !self
            .config
            .critical_short_keywords
            .iter()
            .any(|keyword| lowered.contains(&keyword.to_lowercase()))
    }

    /// Full classification: rule pass, optional enhancement, then the
    /// matcher and controller side effects. Noise short-circuits before all of it.
    pub async fn classify(
        &self,
        statement: &str,
        turn_number: u32,
        weights: Option<&UserWeights>,
    ) -> MemoryItem {
        if self.is_noise(statement) {
            return MemoryItem::noise(statement, turn_number);
        }

        let thresholds = self.effective_thresholds(weights);
        let base = self.score_with(statement, turn_number, weights, &thresholds);

        let item = match &self.enhancer {
            Some(enhancer) if self.should_escalate(statement, &base) => {
                match self.enhance(enhancer.as_ref(), statement, &base).await {
                    Ok(analysis) => apply_analysis(base, analysis, &thresholds),
                    Err(e) => {
                        tracing::warn!(
                            turn = turn_number,
                            error = %e,
                            "Enhancement failed, keeping rule-based classification"
                        );
                        base
                    }
                }
            }
            _ => base,
        };

        self.matcher.register_statement(&item.content, item.turn_number);
        self.thresholds
            .record_decision(item.retention, item.importance_score);
        item
    }

    /// Rule-only pass with no side effects.
    pub fn score(&self, statement: &str, turn_number: u32, weights: Option<&UserWeights>) -> MemoryItem {
        if self.is_noise(statement) {
            return MemoryItem::noise(statement, turn_number);
        }
        let thresholds = self.effective_thresholds(weights);
        self.score_with(statement, turn_number, weights, &thresholds)
    }

    fn score_with(
        &self,
        statement: &str,
        turn_number: u32,
        weights: Option<&UserWeights>,
        thresholds: &ThresholdSnapshot,
    ) -> MemoryItem {
        let mut score = 0.0;
        let mut categories: Vec<String> = Vec::new();
        let mut reasoning: Vec<String> = Vec::new();

        for (group, rules) in self.patterns.groups() {
            for rule in rules.iter().filter(|rule| rule.is_match(statement)) {
                score += f64::from(rule.weight);
                push_unique(&mut categories, &rule.category);
                reasoning.push(format!("{}: {}", group.label(), rule.category));
            }
        }

        let h = &self.heuristics;
        if statement.split_whitespace().count() > DETAILED_WORD_COUNT {
            score += 3.0;
            reasoning.push("Detailed statement".to_string());
        }
        if h.proper_noun.find_iter(statement).count() > 1 {
            score += 4.0;
            push_unique(&mut categories, "named_entity");
            reasoning.push("Contains named entities".to_string());
        }
        if h.number.is_match(statement) {
            score += 2.0;
            push_unique(&mut categories, "quantitative");
            reasoning.push("Contains specific numbers/dates".to_string());
        }
        if h.first_person.is_match(statement) {
            score += 2.0;
            reasoning.push("First-person statement".to_string());
        }
        if statement.trim_end().ends_with('?') {
            score -= 3.0;
            push_unique(&mut categories, "question");
            reasoning.push("Question (short-term)".to_string());
        }
        if h.permanence.is_match(statement) {
            score += 5.0;
            reasoning.push("Permanent/absolute statement".to_string());
        }
        if h.immediacy.is_match(statement) {
            score -= 2.0;
            reasoning.push("Immediate temporal context".to_string());
        }

        if let Some(weights) = weights {
            let adjustment = weights.category_adjustment(&categories);
            if adjustment != 0.0 {
                score += adjustment;
                reasoning.push(format!("Learned weights {adjustment:+.1}"));
            }
        }

        let reasoning = if reasoning.is_empty() {
            "Default classification".to_string()
        } else {
            reasoning.join("; ")
        };

        MemoryItem::new(
            statement,
            RetentionTier::from_score(score, thresholds),
            score,
            turn_number,
            categories,
            reasoning,
        )
    }

    /// Near a cutoff, emotionally loaded, or an emphatic first-person claim.
    pub fn should_escalate(&self, statement: &str, item: &MemoryItem) -> bool {
        let score = item.importance_score;
        if (10.0..=14.0).contains(&score) || (2.0..=6.0).contains(&score) {
            return true;
        }

        let h = &self.heuristics;
        if score < 15.0 && h.emotional.iter().any(|re| re.is_match(statement)) {
            return true;
        }

        if score < 10.0 && h.escalation_first_person.is_match(statement) {
            let lowered = statement.to_lowercase();
            return ESCALATION_STRONG_WORDS
                .iter()
                .any(|word| contains_phrase(&lowered, word));
        }
        false
    }

    async fn enhance(
        &self,
        enhancer: &dyn Enhancer,
        statement: &str,
        base: &MemoryItem,
    ) -> Result<BrokerAnalysis> {
        let mut context = BrokerContext::new();
        context.insert("importance".to_string(), json!(base.importance_score));
        context.insert("categories".to_string(), json!(base.categories));
        context.insert("turn".to_string(), json!(base.turn_number));

        let timeout = self.enhancement_timeout;
        let call = tokio::time::timeout(timeout, enhancer.analyze(statement, &context));
        let outcome = match &self.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => {
                    return Err(RecollectError::EnhancementUnavailable(
                        "enhancement cancelled".to_string(),
                    ));
                }
                outcome = call => outcome,
            },
            None => call.await,
        };

        outcome.map_err(|_| {
            RecollectError::EnhancementUnavailable(format!(
                "enhancement timed out after {}s",
                timeout.as_secs_f64()
            ))
        })?
    }
}

fn push_unique(categories: &mut Vec<String>, category: &str) {
    if !categories.iter().any(|c| c == category) {
        categories.push(category.to_string());
    }
}

/// Fold a broker verdict into the item and re-tier against the same cutoffs.
fn apply_analysis(
    mut item: MemoryItem,
    analysis: BrokerAnalysis,
    thresholds: &ThresholdSnapshot,
) -> MemoryItem {
    item.importance_score += f64::from(analysis.importance_boost);
    for category in &analysis.categories {
        push_unique(&mut item.categories, category);
    }
    item.retention = RetentionTier::from_score(item.importance_score, thresholds);
    item.reasoning.push_str(&format!(" | LLM: {}", analysis.reasoning));
    item.enhanced = true;
    item.suggested_retention = analysis.suggested_retention;
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThresholdConfig;
    use crate::intelligence::patterns::default_patterns;
    use crate::intelligence::semantic::TokenSetBackend;
    use crate::llm::{BrokerStats, LlmBroker};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn classifier() -> StatementClassifier {
        let patterns = Arc::new(PatternSet::compile(&default_patterns()));
        let thresholds = Arc::new(ThresholdController::new(ThresholdConfig::default()));
        let matcher = Arc::new(
            SemanticMatcher::new(Box::new(TokenSetBackend::new().unwrap()), 0.78).unwrap(),
        );
        StatementClassifier::new(patterns, ClassifierConfig::default(), thresholds, matcher).unwrap()
    }

    struct SlowEnhancer;

    #[async_trait]
    impl Enhancer for SlowEnhancer {
        async fn analyze(&self, _: &str, _: &BrokerContext) -> Result<BrokerAnalysis> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(BrokerAnalysis {
                importance_boost: 20,
                categories: vec!["late".to_string()],
                reasoning: "too late".to_string(),
                confidence: 1.0,
                suggested_retention: None,
            })
        }

        fn stats(&self) -> BrokerStats {
            BrokerStats::default()
        }
    }

    struct FailingEnhancer;

    #[async_trait]
    impl Enhancer for FailingEnhancer {
        async fn analyze(&self, _: &str, _: &BrokerContext) -> Result<BrokerAnalysis> {
            Err(RecollectError::Llm("backend down".to_string()))
        }

        fn stats(&self) -> BrokerStats {
            BrokerStats::default()
        }
    }

    #[tokio::test]
    async fn test_peanut_allergy_is_long_term() {
        let item = classifier().classify("I have a severe peanut allergy", 1, None).await;
        assert_eq!(item.importance_score, 17.0);
        assert_eq!(item.retention, RetentionTier::LongTerm);
        assert_eq!(item.categories, vec!["medical".to_string()]);
        assert_eq!(item.reasoning, "Critical: medical; First-person statement");
    }

    #[tokio::test]
    async fn test_short_greeting_is_noise() {
        let item = classifier().classify("Hi there!", 1, None).await;
        assert_eq!(item.importance_score, 0.0);
        assert_eq!(item.retention, RetentionTier::Immediate);
        assert!(item.is_noise());
    }

    #[tokio::test]
    async fn test_short_statement_with_critical_keyword_is_scored() {
        let item = classifier().classify("Got divorced", 2, None).await;
        assert!(!item.is_noise());
        assert!(item.has_category("relationship_status"));
    }

    #[test]
    fn test_question_and_immediacy_penalties() {
        let item = classifier().score("What are you doing right now?", 1, None);
        // question_word -2, question -3, immediacy -2
        assert_eq!(item.importance_score, -7.0);
        assert_eq!(item.retention, RetentionTier::Immediate);
        assert!(item.has_category("question"));
    }

    #[test]
    fn test_named_entities_and_numbers() {
        let item = classifier().score("We flew from Paris to Berlin in 2019 together", 3, None);
        assert!(item.has_category("named_entity"));
        assert!(item.has_category("quantitative"));
        assert_eq!(item.importance_score, 6.0);
    }

    #[test]
    fn test_uncategorized_default() {
        let item = classifier().score("the weather seems fine", 1, None);
        assert_eq!(item.categories, vec!["uncategorized".to_string()]);
        assert_eq!(item.reasoning, "Default classification");
    }

    #[test]
    fn test_filler_like_cancels_plain_preference() {
        let classifier = classifier();
        // preference 6, filler -8, first person 2
        let item = classifier.score("I like hiking on weekends", 1, None);
        assert_eq!(item.importance_score, 0.0);
        assert_eq!(item.retention, RetentionTier::Immediate);
        assert_eq!(item.categories, vec!["preference".to_string(), "filler".to_string()]);

        let with_um = classifier.score("Um I like hiking on weekends", 1, None);
        assert_eq!(with_um.importance_score, item.importance_score);
        assert_eq!(with_um.categories, item.categories);
    }

    #[test]
    fn test_learned_weights_shift_score_and_thresholds() {
        let mut weights = UserWeights::new("u1");
        weights.adjust_weight(&UserWeights::category_key("preference"), 2.0);
        weights.threshold_adjustments.long_term = -1.0;

        let classifier = classifier();
        let plain = classifier.score("I enjoy long walks in the park", 1, None);
        let tuned = classifier.score("I enjoy long walks in the park", 1, Some(&weights));
        assert_eq!(tuned.importance_score, plain.importance_score + 2.0);
        assert_eq!(classifier.effective_thresholds(Some(&weights)).long_term, 11.0);
    }

    #[test]
    fn test_escalation_rules() {
        let classifier = classifier();
        let near_cutoff = classifier.score("I love pizza", 1, None);
        assert!(classifier.should_escalate("I love pizza", &near_cutoff));

        let emotional = "The storm last night was scary and I was worried about the roof";
        let item = classifier.score(emotional, 1, None);
        assert!(item.importance_score < 15.0);
        assert!(classifier.should_escalate(emotional, &item));

        let confident = classifier.score("I have a severe peanut allergy", 1, None);
        assert!(!classifier.should_escalate("I have a severe peanut allergy", &confident));
    }

    #[tokio::test]
    async fn test_heuristic_broker_boosts_borderline_statement() {
        let classifier = classifier().with_enhancer(
            Arc::new(LlmBroker::heuristic(16)),
            Duration::from_secs(1),
        );
        let item = classifier
            .classify("I take my medication every morning", 1, None)
            .await;
        // medical_treatment 12 + first person 2, then +8 from the broker
        assert!(item.enhanced);
        assert_eq!(item.importance_score, 22.0);
        assert_eq!(
            item.categories,
            vec!["medical_treatment".to_string(), "medical".to_string()]
        );
        assert!(item.reasoning.contains(" | LLM: "));
        assert_eq!(item.retention, RetentionTier::LongTerm);
    }

    #[tokio::test]
    async fn test_enhancer_failure_keeps_base_item() {
        let plain = classifier().score("I love pizza", 1, None);
        let classifier = classifier().with_enhancer(Arc::new(FailingEnhancer), Duration::from_secs(1));
        let item = classifier.classify("I love pizza", 1, None).await;
        assert_eq!(item, plain);
    }

    #[tokio::test]
    async fn test_enhancer_timeout_keeps_base_item() {
        let classifier = classifier().with_enhancer(Arc::new(SlowEnhancer), Duration::from_millis(50));
        let item = classifier.classify("I love pizza", 1, None).await;
        assert!(!item.enhanced);
        assert_eq!(item.importance_score, 14.0);
    }

    #[tokio::test]
    async fn test_cancelled_enhancement_keeps_base_item() {
        let token = CancellationToken::new();
        token.cancel();
        let classifier = classifier()
            .with_enhancer(Arc::new(SlowEnhancer), Duration::from_secs(30))
            .with_cancellation(token);
        let item = classifier.classify("I love pizza", 1, None).await;
        assert!(!item.enhanced);
    }

    #[tokio::test]
    async fn test_classify_records_decision_and_registers_statement() {
        let patterns = Arc::new(PatternSet::compile(&default_patterns()));
        let thresholds = Arc::new(ThresholdController::new(ThresholdConfig::default()));
        let matcher = Arc::new(
            SemanticMatcher::new(Box::new(TokenSetBackend::new().unwrap()), 0.78).unwrap(),
        );
        let classifier = StatementClassifier::new(
            patterns,
            ClassifierConfig::default(),
            Arc::clone(&thresholds),
            Arc::clone(&matcher),
        )
        .unwrap();

        classifier.classify("I work at the hospital downtown", 1, None).await;
        assert_eq!(thresholds.stats().decisions, 1);
        assert_eq!(matcher.find_similar("I work at the hospital downtown", 1).len(), 1);
    }
}
