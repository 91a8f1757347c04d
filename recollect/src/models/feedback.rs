use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use super::RetentionTier;

/// How a user's correction relates to what the system predicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// The prediction matched
    Correct,
    /// Expected long-term, got something shorter
    ForgotImportant,
    /// Expected immediate, got something longer
    RememberedTrivial,
    /// Any other mismatch
    WrongCategory,
}

impl FeedbackKind {
    /// Derive the kind from the predicted and expected tiers.
    pub fn derive(actual: RetentionTier, expected: RetentionTier) -> Self {
        if actual == expected {
            Self::Correct
        } else if expected == RetentionTier::LongTerm {
            Self::ForgotImportant
        } else if expected == RetentionTier::Immediate {
            Self::RememberedTrivial
        } else {
            Self::WrongCategory
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::ForgotImportant => "forgot_important",
            Self::RememberedTrivial => "remembered_trivial",
            Self::WrongCategory => "wrong_category",
        }
    }
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Inbound feedback, validated before any weight is touched.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct FeedbackRequest {
    #[validate(length(min = 1, max = 256))]
    pub user_id: String,
    #[validate(length(min = 1, max = 10_000))]
    pub statement: String,
    /// Tier the system predicted (`long_term` | `short_term` | `immediate`)
    pub predicted: String,
    /// Tier the user expected
    pub expected: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub importance_score: f64,
    #[validate(length(max = 2000))]
    pub comment: Option<String>,
}

/// A recorded correction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: String,
    pub user_id: String,
    pub statement: String,
    pub actual: RetentionTier,
    pub expected: RetentionTier,
    pub kind: FeedbackKind,
    pub categories: Vec<String>,
    pub importance_score: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

/// Learned per-user adjustments. This is the persisted record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserWeights {
    pub user_id: String,
    /// Additive adjustment per key (`category_<name>`)
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub threshold_adjustments: ThresholdAdjustments,
    #[serde(default)]
    pub feedback_count: u64,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdAdjustments {
    #[serde(default)]
    pub long_term: f64,
    #[serde(default)]
    pub short_term: f64,
}

impl UserWeights {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            weights: BTreeMap::new(),
            threshold_adjustments: ThresholdAdjustments::default(),
            feedback_count: 0,
            last_updated: Utc::now(),
        }
    }

    pub fn category_key(category: &str) -> String {
        format!("category_{category}")
    }

    pub fn adjust_weight(&mut self, key: &str, adjustment: f64) {
        *self.weights.entry(key.to_string()).or_insert(0.0) += adjustment;
        self.last_updated = Utc::now();
    }

    pub fn weight(&self, key: &str) -> f64 {
        self.weights.get(key).copied().unwrap_or(0.0)
    }

    /// Sum of learned weights for the given categories.
    pub fn category_adjustment<S: AsRef<str>>(&self, categories: &[S]) -> f64 {
        categories
            .iter()
            .map(|c| self.weight(&Self::category_key(c.as_ref())))
            .sum()
    }
}

/// Per-variant outcome of an A/B test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStats {
    pub users: usize,
    pub feedback_count: usize,
    pub accuracy: f64,
    pub correct: usize,
    pub forgot_important: usize,
    pub remembered_trivial: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbWinner {
    pub variant: String,
    pub accuracy: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestAnalysis {
    pub test_name: String,
    pub variants: BTreeMap<String, VariantStats>,
    pub winner: Option<AbWinner>,
}

/// Learning statistics for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLearningStats {
    pub user_id: String,
    pub feedback_count: u64,
    pub weights_learned: usize,
    pub threshold_adjustments: ThresholdAdjustments,
    pub feedback_breakdown: BTreeMap<FeedbackKind, usize>,
    pub last_updated: Option<DateTime<Utc>>,
    pub top_adjusted: Vec<(String, f64)>,
}
