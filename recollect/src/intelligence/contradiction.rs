use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::intelligence::semantic::SemanticMatcher;
use crate::intelligence::utils::{contains_phrase, normalized_words, stem_overlap};
use crate::models::{Annotation, MemoryItem};

/// Score added to the later statement of a contradicting pair.
pub const UPDATE_BOOST: f64 = 5.0;
const MIN_STEM_OVERLAP: usize = 2;

/// Why a pair was (or was not) judged contradictory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContradictionCheckResult {
    /// No contradiction detected
    None,
    /// Related categories, negation in the later statement and shared stems
    Lexical,
    /// Near-identical wording with opposite polarity
    Semantic,
}

impl std::fmt::Display for ContradictionCheckResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Lexical => write!(f, "lexical"),
            Self::Semantic => write!(f, "semantic"),
        }
    }
}

impl ContradictionCheckResult {
    pub fn is_contradiction(&self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Two categories that can describe the same fact from different angles.
#[derive(Debug, Clone)]
pub struct RelatedCategories {
    pub a: &'static str,
    pub b: &'static str,
}

impl RelatedCategories {
    fn touches(&self, categories: &[String]) -> bool {
        categories.iter().any(|c| c == self.a || c == self.b)
    }
}

const RELATED_CATEGORIES: &[RelatedCategories] = &[
    RelatedCategories { a: "strong_preference", b: "dietary_restriction" },
    RelatedCategories { a: "strong_preference", b: "dietary" },
    // "I love X" -> "I don't like X": the reversal usually drops to the
    // weaker preference rule, and the token backend scores it below threshold.
    RelatedCategories { a: "strong_preference", b: "preference" },
    RelatedCategories { a: "dietary", b: "dietary_restriction" },
    RelatedCategories { a: "dietary", b: "life_change" },
    RelatedCategories { a: "strong_preference", b: "life_change" },
    RelatedCategories { a: "preference", b: "life_change" },
    RelatedCategories { a: "career", b: "life_change" },
    RelatedCategories { a: "career", b: "past_status" },
    RelatedCategories { a: "career", b: "status_change" },
    RelatedCategories { a: "relationship_status", b: "past_status" },
    RelatedCategories { a: "relationship_status", b: "status_change" },
    // sometimes -> never
    RelatedCategories { a: "occasional_behavior", b: "strong_preference" },
];

/// Positive/negative sentiment pair used for double-negation detection.
#[derive(Debug, Clone)]
pub struct SentimentPair {
    pub positive: &'static str,
    pub negative: &'static str,
}

const SENTIMENT_PAIRS: &[SentimentPair] = &[
    SentimentPair { positive: "like", negative: "dislike" },
    SentimentPair { positive: "love", negative: "hate" },
    SentimentPair { positive: "enjoy", negative: "dislike" },
    SentimentPair { positive: "want", negative: "refuse" },
    SentimentPair { positive: "prefer", negative: "avoid" },
];

const HYPOTHETICAL_MARKERS: &[&str] = &[
    "would", "could", "might", "if", "thinking about", "planning to", "considering",
];

const NEGATION_WORDS: &[&str] = &[
    "not", "never", "don't", "doesn't", "didn't", "can't", "cannot", "won't", "wouldn't",
    // reversal
    "but", "however", "although", "though", "actually",
    // past state
    "was", "were", "divorced", "fired", "quit", "stopped",
];

const NEGATION_PHRASES: &[&str] = &["no longer", "not anymore", "used to", "gave up"];

const DOUBLE_NEGATION_MARKERS: &[&str] = &["don't", "doesn't", "not", "never"];

/// Post-pass that finds later statements contradicting earlier ones.
///
/// Contradictions boost the later item and mark the earlier one superseded;
/// tiers are left as classified.
#[derive(Debug, Clone, Default)]
pub struct ContradictionResolver {
    matcher: Option<Arc<SemanticMatcher>>,
}

impl ContradictionResolver {
    pub fn new(matcher: Option<Arc<SemanticMatcher>>) -> Self {
        Self { matcher }
    }

    /// Compare every earlier/later pair and annotate in place. Returns the
    /// number of contradicting pairs.
    pub fn resolve(&self, items: &mut [MemoryItem]) -> usize {
        let mut found = 0;
        for j in 1..items.len() {
            for i in 0..j {
                let result = self.check(&items[i], &items[j]);
                if !result.is_contradiction() {
                    continue;
                }
                found += 1;
                tracing::debug!(
                    earlier_turn = items[i].turn_number,
                    later_turn = items[j].turn_number,
                    evidence = %result,
                    "Contradiction detected"
                );

                items[j].importance_score += UPDATE_BOOST;
                items[j].annotate(Annotation::Update, "Contradicts earlier statement");
                items[i].annotate(Annotation::Superseded, "Later contradicting info exists");
            }
        }
        found
    }

    pub fn check(&self, earlier: &MemoryItem, later: &MemoryItem) -> ContradictionCheckResult {
        if earlier.turn_number == later.turn_number || earlier.is_noise() || later.is_noise() {
            return ContradictionCheckResult::None;
        }

        let earlier_text = earlier.content.to_lowercase();
        let later_text = later.content.to_lowercase();
        if is_hypothetical(&earlier_text) || is_hypothetical(&later_text) {
            return ContradictionCheckResult::None;
        }

        if categories_related(&earlier.categories, &later.categories)
            && has_negation_evidence(&earlier_text, &later_text)
            && stem_overlap(&earlier_text, &later_text) >= MIN_STEM_OVERLAP
        {
            return ContradictionCheckResult::Lexical;
        }

        match &self.matcher {
            Some(matcher) if matcher.detect_contradiction(&earlier.content, &later.content) => {
                ContradictionCheckResult::Semantic
            }
            _ => ContradictionCheckResult::None,
        }
    }
}

/// Shared category, or a pair from the related-categories table split across
/// the two items.
pub fn categories_related(a: &[String], b: &[String]) -> bool {
    if a.iter().any(|c| b.contains(c)) {
        return true;
    }
    RELATED_CATEGORIES
        .iter()
        .any(|pair| pair.touches(a) && pair.touches(b))
}

pub fn is_hypothetical(lowered: &str) -> bool {
    HYPOTHETICAL_MARKERS
        .iter()
        .any(|marker| contains_phrase(lowered, marker))
}

/// Negation in the later statement, or opposite sentiment words with
/// negation on both sides ("don't like" vs "don't dislike").
fn has_negation_evidence(earlier: &str, later: &str) -> bool {
    let later_words = normalized_words(later);
    if NEGATION_PHRASES.iter().any(|p| contains_phrase(later, p))
        || NEGATION_WORDS.iter().any(|w| later_words.contains(*w))
    {
        return true;
    }

    let negated = |text: &str| DOUBLE_NEGATION_MARKERS.iter().any(|m| contains_phrase(text, m));
    if !(negated(earlier) && negated(later)) {
        return false;
    }
    SENTIMENT_PAIRS.iter().any(|pair| {
        (contains_phrase(earlier, pair.positive) && contains_phrase(later, pair.negative))
            || (contains_phrase(earlier, pair.negative) && contains_phrase(later, pair.positive))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intelligence::semantic::TokenSetBackend;
    use crate::models::RetentionTier;

    fn item(content: &str, turn: u32, categories: &[&str], score: f64) -> MemoryItem {
        MemoryItem::new(
            content,
            RetentionTier::ShortTerm,
            score,
            turn,
            categories.iter().map(|c| c.to_string()).collect(),
            "test",
        )
    }

    fn resolver() -> ContradictionResolver {
        ContradictionResolver::default()
    }

    // =======================================================================
    // Pair checks
    // =======================================================================

    #[test]
    fn test_preference_reversal_is_lexical_contradiction() {
        let earlier = item("I love pizza", 1, &["strong_preference"], 14.0);
        let later = item("Actually I don't like pizza anymore", 5, &["preference", "filler"], 0.0);
        assert_eq!(resolver().check(&earlier, &later), ContradictionCheckResult::Lexical);
    }

    #[test]
    fn test_hypothetical_never_contradicts() {
        let earlier = item("I might start running", 1, &["life_change"], 4.0);
        let later = item("I stopped running", 3, &["life_change"], 14.0);
        assert_eq!(resolver().check(&earlier, &later), ContradictionCheckResult::None);
    }

    #[test]
    fn test_same_turn_is_skipped() {
        let earlier = item("I love pizza", 2, &["strong_preference"], 14.0);
        let later = item("Actually I don't like pizza", 2, &["preference"], 8.0);
        assert_eq!(resolver().check(&earlier, &later), ContradictionCheckResult::None);
    }

    #[test]
    fn test_noise_is_skipped() {
        let earlier = MemoryItem::noise("pizza yes", 1);
        let later = item("Actually I don't like pizza", 2, &["noise"], 8.0);
        assert_eq!(resolver().check(&earlier, &later), ContradictionCheckResult::None);
    }

    #[test]
    fn test_unrelated_categories_do_not_contradict() {
        let earlier = item("I work at the bank downtown", 1, &["career"], 12.0);
        let later = item("I don't work at the gym", 4, &["logistics"], 6.0);
        assert_eq!(resolver().check(&earlier, &later), ContradictionCheckResult::None);
    }

    #[test]
    fn test_negation_needs_word_overlap() {
        let earlier = item("I love jazz", 1, &["strong_preference"], 14.0);
        let later = item("Actually never mind", 2, &["strong_preference"], 12.0);
        assert_eq!(resolver().check(&earlier, &later), ContradictionCheckResult::None);
    }

    #[test]
    fn test_double_negation_with_opposite_sentiment() {
        assert!(has_negation_evidence("i don't like olives", "i don't dislike olives"));
        assert!(!has_negation_evidence("i like olives", "i enjoy olives"));
    }

    #[test]
    fn test_semantic_check_catches_unrelated_categories() {
        let matcher = Arc::new(
            SemanticMatcher::new(Box::new(TokenSetBackend::new().unwrap()), 0.6).unwrap(),
        );
        let resolver = ContradictionResolver::new(Some(matcher));
        let earlier = item("I eat meat", 1, &["uncategorized"], 2.0);
        let later = item("I do not eat meat", 3, &["dietary_restriction"], 12.0);
        assert_eq!(resolver.check(&earlier, &later), ContradictionCheckResult::Semantic);
    }

    #[test]
    fn test_related_table_is_symmetric() {
        let a = vec!["career".to_string()];
        let b = vec!["life_change".to_string()];
        assert!(categories_related(&a, &b));
        assert!(categories_related(&b, &a));
        assert!(!categories_related(&a, &["grief".to_string()]));
    }

    // =======================================================================
    // Batch resolution
    // =======================================================================

    #[test]
    fn test_resolve_boosts_later_and_supersedes_earlier() {
        let mut items = vec![
            item("I love pizza", 1, &["strong_preference"], 14.0),
            item("The weather is grey", 3, &["uncategorized"], 0.0),
            item("Actually I don't like pizza anymore", 5, &["preference"], 8.0),
        ];
        let found = resolver().resolve(&mut items);

        assert_eq!(found, 1);
        assert_eq!(items[2].importance_score, 13.0);
        assert!(items[2].has_annotation(Annotation::Update));
        assert!(items[2].reasoning.ends_with(" | UPDATE: Contradicts earlier statement"));
        assert_eq!(items[0].importance_score, 14.0);
        assert_eq!(items[0].retention, RetentionTier::ShortTerm);
        assert!(items[0].has_annotation(Annotation::Superseded));
        assert!(items[1].annotations.is_empty());
    }

    #[test]
    fn test_result_display() {
        assert_eq!(ContradictionCheckResult::None.to_string(), "none");
        assert_eq!(ContradictionCheckResult::Lexical.to_string(), "lexical");
        assert!(ContradictionCheckResult::Semantic.is_contradiction());
    }
}
