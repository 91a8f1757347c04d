use serde::{Deserialize, Serialize};

use crate::error::{RecollectError, Result};

/// How long a statement should be remembered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionTier {
    /// Days, weeks, months
    LongTerm,
    /// A handful of conversation turns
    ShortTerm,
    /// Forget after this turn
    Immediate,
}

impl RetentionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LongTerm => "long_term",
            Self::ShortTerm => "short_term",
            Self::Immediate => "immediate",
        }
    }

    /// Pick the tier for `score` under the given cutoffs.
    pub fn from_score(score: f64, thresholds: &ThresholdSnapshot) -> Self {
        if score >= thresholds.long_term {
            Self::LongTerm
        } else if score >= thresholds.short_term {
            Self::ShortTerm
        } else {
            Self::Immediate
        }
    }

    pub fn all() -> [RetentionTier; 3] {
        [Self::LongTerm, Self::ShortTerm, Self::Immediate]
    }
}

impl std::fmt::Display for RetentionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RetentionTier {
    type Err = RecollectError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "long_term" => Ok(Self::LongTerm),
            "short_term" => Ok(Self::ShortTerm),
            "immediate" => Ok(Self::Immediate),
            other => Err(RecollectError::Validation(format!(
                "Unknown retention tier: '{other}'"
            ))),
        }
    }
}

/// Immutable pair of tier cutoffs. Replaced wholesale, never edited.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSnapshot {
    pub long_term: f64,
    pub short_term: f64,
}

impl ThresholdSnapshot {
    /// Smallest distance kept between the two cutoffs.
    pub const MIN_GAP: f64 = 1.0;

    /// Build a snapshot, restoring `long_term > short_term >= 0` if the inputs
    /// violate it.
    pub fn new(long_term: f64, short_term: f64) -> Self {
        let short_term = short_term.max(0.0);
        let long_term = if long_term < short_term + Self::MIN_GAP {
            short_term + Self::MIN_GAP
        } else {
            long_term
        };
        Self {
            long_term,
            short_term,
        }
    }

    /// Shift both cutoffs by per-user adjustments; each adjusted cutoff floors at zero.
    pub fn adjusted(&self, long_term_delta: f64, short_term_delta: f64) -> Self {
        Self::new(
            (self.long_term + long_term_delta).max(0.0),
            (self.short_term + short_term_delta).max(0.0),
        )
    }
}

impl Default for ThresholdSnapshot {
    fn default() -> Self {
        Self {
            long_term: 12.0,
            short_term: 4.0,
        }
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub speaker: String,
    pub text: String,
    pub turn_number: u32,
}

impl ConversationTurn {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>, turn_number: u32) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            turn_number,
        }
    }
}

/// Marker left on an item by a post-processing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Annotation {
    /// Contradicts an earlier statement
    Update,
    /// A later statement contradicts this one
    Superseded,
    /// Short-term fact that went stale
    Decayed,
}

impl std::fmt::Display for Annotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Update => write!(f, "UPDATE"),
            Self::Superseded => write!(f, "SUPERSEDED"),
            Self::Decayed => write!(f, "DECAYED"),
        }
    }
}

pub const NOISE_CATEGORY: &str = "noise";
pub const UNCATEGORIZED: &str = "uncategorized";

/// A classified statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub content: String,
    pub retention: RetentionTier,
    pub importance_score: f64,
    pub turn_number: u32,
    /// Never empty; `uncategorized` when nothing matched
    pub categories: Vec<String>,
    /// Every rule and heuristic that contributed, in evaluation order
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context_rationale: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    /// Set when the enhancement stage changed the item
    #[serde(default)]
    pub enhanced: bool,
    /// Tier the enhancement stage would have picked, if it offered one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_retention: Option<RetentionTier>,
}

impl MemoryItem {
    pub fn new(
        content: impl Into<String>,
        retention: RetentionTier,
        importance_score: f64,
        turn_number: u32,
        categories: Vec<String>,
        reasoning: impl Into<String>,
    ) -> Self {
        let categories = if categories.is_empty() {
            vec![UNCATEGORIZED.to_string()]
        } else {
            categories
        };
        Self {
            content: content.into(),
            retention,
            importance_score,
            turn_number,
            categories,
            reasoning: reasoning.into(),
            context_rationale: String::new(),
            annotations: Vec::new(),
            enhanced: false,
            suggested_retention: None,
        }
    }

    /// Item for a statement rejected by the noise gate.
    pub fn noise(content: impl Into<String>, turn_number: u32) -> Self {
        Self::new(
            content,
            RetentionTier::Immediate,
            0.0,
            turn_number,
            vec![NOISE_CATEGORY.to_string()],
            "Too short to be meaningful",
        )
    }

    pub fn is_noise(&self) -> bool {
        self.has_category(NOISE_CATEGORY)
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c == category)
    }

    pub fn has_annotation(&self, annotation: Annotation) -> bool {
        self.annotations.contains(&annotation)
    }

    /// Record a post-pass marker both structurally and in the reasoning trace.
    pub fn annotate(&mut self, annotation: Annotation, detail: &str) {
        self.annotations.push(annotation);
        self.reasoning.push_str(&format!(" | {annotation}: {detail}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_from_score_boundaries() {
        let thresholds = ThresholdSnapshot::default();
        assert_eq!(RetentionTier::from_score(12.0, &thresholds), RetentionTier::LongTerm);
        assert_eq!(RetentionTier::from_score(11.9, &thresholds), RetentionTier::ShortTerm);
        assert_eq!(RetentionTier::from_score(4.0, &thresholds), RetentionTier::ShortTerm);
        assert_eq!(RetentionTier::from_score(3.5, &thresholds), RetentionTier::Immediate);
        assert_eq!(RetentionTier::from_score(-2.0, &thresholds), RetentionTier::Immediate);
    }

    #[test]
    fn test_tier_parse() {
        assert_eq!("LONG_TERM".parse::<RetentionTier>().unwrap(), RetentionTier::LongTerm);
        assert_eq!(" immediate ".parse::<RetentionTier>().unwrap(), RetentionTier::Immediate);
        let err = "forever".parse::<RetentionTier>().unwrap_err();
        assert!(matches!(err, RecollectError::Validation(_)));
    }

    #[test]
    fn test_tier_serde_labels() {
        let json = serde_json::to_string(&RetentionTier::ShortTerm).unwrap();
        assert_eq!(json, "\"short_term\"");
    }

    #[test]
    fn test_snapshot_restores_ordering() {
        let snapshot = ThresholdSnapshot::new(3.0, 5.0);
        assert!(snapshot.long_term > snapshot.short_term);

        let snapshot = ThresholdSnapshot::new(10.0, -2.0);
        assert_eq!(snapshot.short_term, 0.0);
    }

    #[test]
    fn test_snapshot_adjusted_floors_at_zero() {
        let snapshot = ThresholdSnapshot::default().adjusted(-20.0, -10.0);
        assert_eq!(snapshot.short_term, 0.0);
        assert!(snapshot.long_term >= ThresholdSnapshot::MIN_GAP);
    }

    #[test]
    fn test_memory_item_defaults_to_uncategorized() {
        let item = MemoryItem::new("text", RetentionTier::Immediate, 0.0, 1, vec![], "none");
        assert_eq!(item.categories, vec![UNCATEGORIZED.to_string()]);
    }

    #[test]
    fn test_annotate_appends_reasoning() {
        let mut item = MemoryItem::noise("ok", 2);
        assert!(item.is_noise());
        item.annotate(Annotation::Decayed, "Too many turns ago");
        assert!(item.has_annotation(Annotation::Decayed));
        assert!(item.reasoning.ends_with("| DECAYED: Too many turns ago"));
    }
}
