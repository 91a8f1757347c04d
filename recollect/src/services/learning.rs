use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use validator::Validate;

use crate::config::LearningConfig;
use crate::error::{RecollectError, Result};
use crate::models::{
    AbTestAnalysis, AbWinner, Feedback, FeedbackKind, FeedbackRequest, RetentionTier,
    ThresholdSnapshot, UserLearningStats, UserWeights, VariantStats,
};
use crate::services::weight_store::WeightStore;

const FORGOT_IMPORTANT_BOOST: f64 = 2.0;
const REMEMBERED_TRIVIAL_PENALTY: f64 = -1.0;
const CORRECT_REINFORCEMENT: f64 = 0.5;
const THRESHOLD_NUDGE: f64 = 1.0;
const TOP_ADJUSTED: usize = 5;

#[derive(Debug, Default)]
struct VariantResults {
    users: BTreeSet<String>,
    feedback: Vec<FeedbackKind>,
}

#[derive(Debug)]
struct AbTest {
    name: String,
    variants: BTreeMap<String, Value>,
    results: BTreeMap<String, VariantResults>,
    assignments: HashMap<String, String>,
    active: bool,
}

/// Feedback-driven weight adaptation shared by every session.
///
/// Weights for different users are independent. Feedback for one user is
/// serialized by that user's async lock, which is held across the snapshot
/// write so updates are never lost.
pub struct AdaptiveLearningSystem {
    store: Option<WeightStore>,
    weights: RwLock<HashMap<String, UserWeights>>,
    history: Mutex<Vec<Feedback>>,
    user_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    ab_tests: Mutex<HashMap<String, AbTest>>,
}

impl std::fmt::Debug for AdaptiveLearningSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveLearningSystem")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl AdaptiveLearningSystem {
    /// No persistence; weights live as long as the process.
    pub fn in_memory() -> Self {
        Self::with_weights(None, HashMap::new())
    }

    /// Load every persisted record from `store` once and keep writing there.
    pub async fn open(store: WeightStore) -> Self {
        let weights = store.load_all().await;
        Self::with_weights(Some(store), weights)
    }

    pub async fn from_config(config: &LearningConfig) -> Self {
        Self::open(WeightStore::new(config.storage_dir.clone())).await
    }

    fn with_weights(store: Option<WeightStore>, weights: HashMap<String, UserWeights>) -> Self {
        Self {
            store,
            weights: RwLock::new(weights),
            history: Mutex::new(Vec::new()),
            user_locks: Mutex::new(HashMap::new()),
            ab_tests: Mutex::new(HashMap::new()),
        }
    }

    /// Validate, derive the feedback kind, update and persist the user's
    /// weights. A persistence failure is logged; the in-memory update stands.
    pub async fn collect_feedback(&self, request: FeedbackRequest) -> Result<Feedback> {
        request.validate()?;
        let actual: RetentionTier = request.predicted.parse()?;
        let expected: RetentionTier = request.expected.parse()?;
        if !request.importance_score.is_finite() {
            return Err(RecollectError::Validation(
                "importance_score must be a finite number".to_string(),
            ));
        }

        let kind = FeedbackKind::derive(actual, expected);
        let mut context = BTreeMap::new();
        if let Some(comment) = &request.comment {
            context.insert("comment".to_string(), comment.clone());
        }
        let feedback = Feedback {
            id: feedback_id(&request.user_id),
            user_id: request.user_id,
            statement: request.statement,
            actual,
            expected,
            kind,
            categories: request.categories,
            importance_score: request.importance_score,
            timestamp: Utc::now(),
            context,
        };

        let lock = self.user_lock(&feedback.user_id);
        let _guard = lock.lock().await;

        let mut updated = self
            .user_weights(&feedback.user_id)
            .unwrap_or_else(|| UserWeights::new(feedback.user_id.clone()));
        apply_feedback(&mut updated, &feedback);

        self.weights
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(feedback.user_id.clone(), updated.clone());
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(feedback.clone());
        self.record_for_assigned_tests(&feedback);

        tracing::info!(
            user_id = %feedback.user_id,
            kind = %feedback.kind,
            feedback_count = updated.feedback_count,
            "Feedback collected"
        );

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&updated).await {
                tracing::error!(user_id = %feedback.user_id, error = %e, "Failed to persist learned weights");
            }
        }

        Ok(feedback)
    }

    /// `base_score` plus the user's learned weight for each category.
    pub fn get_adjusted_score<S: AsRef<str>>(&self, user_id: &str, base_score: f64, categories: &[S]) -> f64 {
        let weights = self.weights.read().unwrap_or_else(PoisonError::into_inner);
        match weights.get(user_id) {
            Some(w) => base_score + w.category_adjustment(categories),
            None => base_score,
        }
    }

    /// `base` shifted by the user's threshold adjustments, each cutoff floored at zero.
    pub fn get_adjusted_thresholds(&self, user_id: &str, base: ThresholdSnapshot) -> ThresholdSnapshot {
        let weights = self.weights.read().unwrap_or_else(PoisonError::into_inner);
        match weights.get(user_id) {
            Some(w) => base.adjusted(
                w.threshold_adjustments.long_term,
                w.threshold_adjustments.short_term,
            ),
            None => base,
        }
    }

    pub fn user_weights(&self, user_id: &str) -> Option<UserWeights> {
        self.weights
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(user_id)
            .cloned()
    }

    pub fn feedback_history(&self, user_id: &str) -> Vec<Feedback> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|f| f.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn get_user_stats(&self, user_id: &str) -> UserLearningStats {
        let mut breakdown = BTreeMap::new();
        for feedback in self.feedback_history(user_id) {
            *breakdown.entry(feedback.kind).or_insert(0) += 1;
        }

        let Some(weights) = self.user_weights(user_id) else {
            return UserLearningStats {
                user_id: user_id.to_string(),
                feedback_count: 0,
                weights_learned: 0,
                threshold_adjustments: Default::default(),
                feedback_breakdown: breakdown,
                last_updated: None,
                top_adjusted: Vec::new(),
            };
        };

        let mut top: Vec<(String, f64)> = weights
            .weights
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        top.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()).then_with(|| a.0.cmp(&b.0)));
        top.truncate(TOP_ADJUSTED);

        UserLearningStats {
            user_id: user_id.to_string(),
            feedback_count: weights.feedback_count,
            weights_learned: weights.weights.len(),
            threshold_adjustments: weights.threshold_adjustments,
            feedback_breakdown: breakdown,
            last_updated: Some(weights.last_updated),
            top_adjusted: top,
        }
    }

    /// Register an in-memory A/B test and return its id.
    pub fn create_ab_test(&self, name: &str, variants: BTreeMap<String, Value>) -> Result<String> {
        if variants.is_empty() {
            return Err(RecollectError::Validation(format!(
                "A/B test '{name}' needs at least one variant"
            )));
        }
        let test_id = format!("test_{}_{name}", Utc::now().timestamp());
        self.ab_tests.lock().unwrap_or_else(PoisonError::into_inner).insert(
            test_id.clone(),
            AbTest {
                name: name.to_string(),
                variants,
                results: BTreeMap::new(),
                assignments: HashMap::new(),
                active: true,
            },
        );
        tracing::info!(test_id = %test_id, "Created A/B test");
        Ok(test_id)
    }

    /// Random variant on first request, the same one afterwards. `None` for
    /// unknown or inactive tests.
    pub fn assign_variant(&self, test_id: &str, user_id: &str) -> Option<String> {
        let mut tests = self.ab_tests.lock().unwrap_or_else(PoisonError::into_inner);
        let test = tests.get_mut(test_id).filter(|t| t.active)?;
        if let Some(existing) = test.assignments.get(user_id) {
            return Some(existing.clone());
        }

        let names: Vec<&String> = test.variants.keys().collect();
        let variant = (*names.choose(&mut rand::thread_rng())?).clone();
        test.assignments.insert(user_id.to_string(), variant.clone());
        test.results
            .entry(variant.clone())
            .or_default()
            .users
            .insert(user_id.to_string());
        Some(variant)
    }

    pub fn variant_config(&self, test_id: &str, variant: &str) -> Option<Value> {
        let tests = self.ab_tests.lock().unwrap_or_else(PoisonError::into_inner);
        tests.get(test_id)?.variants.get(variant).cloned()
    }

    pub fn record_ab_result(&self, test_id: &str, variant: &str, feedback: &Feedback) {
        let mut tests = self.ab_tests.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(test) = tests.get_mut(test_id) else {
            return;
        };
        if !test.variants.contains_key(variant) {
            tracing::warn!(test_id, variant, "Ignoring result for unknown variant");
            return;
        }
        test.results
            .entry(variant.to_string())
            .or_default()
            .feedback
            .push(feedback.kind);
    }

    pub fn stop_ab_test(&self, test_id: &str) -> bool {
        let mut tests = self.ab_tests.lock().unwrap_or_else(PoisonError::into_inner);
        match tests.get_mut(test_id) {
            Some(test) => {
                test.active = false;
                true
            }
            None => false,
        }
    }

    /// Per-variant accuracy; the most accurate variant wins. Variants without
    /// feedback are left out.
    pub fn analyze_ab_test(&self, test_id: &str) -> Option<AbTestAnalysis> {
        let tests = self.ab_tests.lock().unwrap_or_else(PoisonError::into_inner);
        let test = tests.get(test_id)?;

        let mut variants = BTreeMap::new();
        for (name, results) in &test.results {
            let total = results.feedback.len();
            if total == 0 {
                continue;
            }
            let count = |kind: FeedbackKind| results.feedback.iter().filter(|k| **k == kind).count();
            let correct = count(FeedbackKind::Correct);
            variants.insert(
                name.clone(),
                VariantStats {
                    users: results.users.len(),
                    feedback_count: total,
                    accuracy: correct as f64 / total as f64,
                    correct,
                    forgot_important: count(FeedbackKind::ForgotImportant),
                    remembered_trivial: count(FeedbackKind::RememberedTrivial),
                },
            );
        }

        let mut winner: Option<AbWinner> = None;
        for (name, stats) in &variants {
            if winner.as_ref().map_or(true, |w| stats.accuracy > w.accuracy) {
                winner = Some(AbWinner {
                    variant: name.clone(),
                    accuracy: stats.accuracy,
                });
            }
        }

        Some(AbTestAnalysis {
            test_name: test.name.clone(),
            variants,
            winner,
        })
    }

    fn record_for_assigned_tests(&self, feedback: &Feedback) {
        let mut tests = self.ab_tests.lock().unwrap_or_else(PoisonError::into_inner);
        for test in tests.values_mut().filter(|t| t.active) {
            if let Some(variant) = test.assignments.get(&feedback.user_id) {
                test.results
                    .entry(variant.clone())
                    .or_default()
                    .feedback
                    .push(feedback.kind);
            }
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.user_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }
}

fn apply_feedback(weights: &mut UserWeights, feedback: &Feedback) {
    let score = feedback.importance_score;
    let per_category = match feedback.kind {
        FeedbackKind::ForgotImportant => {
            if (10.0..=14.0).contains(&score) {
                weights.threshold_adjustments.long_term -= THRESHOLD_NUDGE;
            }
            Some(FORGOT_IMPORTANT_BOOST)
        }
        FeedbackKind::RememberedTrivial => {
            if (4.0..=8.0).contains(&score) {
                weights.threshold_adjustments.short_term += THRESHOLD_NUDGE;
            }
            Some(REMEMBERED_TRIVIAL_PENALTY)
        }
        FeedbackKind::Correct => Some(CORRECT_REINFORCEMENT),
        FeedbackKind::WrongCategory => None,
    };

    if let Some(delta) = per_category {
        for category in &feedback.categories {
            weights.adjust_weight(&UserWeights::category_key(category), delta);
        }
    }
    weights.feedback_count += 1;
    weights.last_updated = Utc::now();
}

fn feedback_id(user_id: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(1000..10000);
    format!("{user_id}_{}_{suffix}", Utc::now().timestamp())
}
