use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::intelligence::context::{ContextEvidence, ContextReasoner};
use crate::intelligence::contradiction::ContradictionResolver;
use crate::intelligence::entities::EntityLinker;
use crate::intelligence::patterns::{PatternRegistry, PatternSet, PatternStats};
use crate::intelligence::semantic::SemanticMatcher;
use crate::intelligence::temporal::DecayProcessor;
use crate::intelligence::thresholds::{ThresholdController, ThresholdStats};
use crate::intelligence::utils::round3;
use crate::intelligence::StatementClassifier;
use crate::llm::{BrokerStats, Enhancer, LlmBroker};
use crate::models::{
    ConversationTurn, Entity, Feedback, FeedbackRequest, GraphSummary, MemoryItem, RetentionTier,
    UserLearningStats, UserProfile, UserWeights,
};
use crate::services::knowledge_graph::KnowledgeGraph;
use crate::services::learning::AdaptiveLearningSystem;

const MIN_STATEMENT_CHARS: usize = 10;
const REPORT_IMMEDIATE_LIMIT: usize = 10;
const CONFIDENCE_SCORE_SCALE: f64 = 40.0;
const BROKER_AGREEMENT_BOOST: f64 = 0.2;
const ENTITY_BOOST_PER_ENTITY: f64 = 0.05;
const MAX_ENTITY_BOOST: f64 = 0.2;

/// A classified statement with its session-level confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedItem {
    #[serde(flatten)]
    pub item: MemoryItem,
    pub confidence: f64,
    /// Entities mentioned in the statement's turn
    pub entity_ids: Vec<String>,
}

/// Everything one pass over a conversation produced.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationAnalysis {
    pub user_id: String,
    pub total_turns: u32,
    pub items: Vec<AnalyzedItem>,
    pub entities: Vec<Entity>,
    pub profile: UserProfile,
    pub graph: GraphSummary,
    pub contradictions: usize,
    pub decayed: usize,
}

impl ConversationAnalysis {
    pub fn memory_items(&self) -> Vec<MemoryItem> {
        self.items.iter().map(|a| a.item.clone()).collect()
    }

    pub fn items_in(&self, tier: RetentionTier) -> impl Iterator<Item = &AnalyzedItem> {
        self.items.iter().filter(move |a| a.item.retention == tier)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySummary {
    pub total_items: usize,
    pub retention_distribution: BTreeMap<String, usize>,
    pub retention_percentages: BTreeMap<String, f64>,
    pub average_confidence: BTreeMap<String, f64>,
    /// Percentage of items the enhancement stage changed
    pub enhanced_share: f64,
    pub entities_found: usize,
    pub knowledge_graph: GraphSummary,
    pub context_window: Vec<ContextEvidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub user_id: String,
    pub patterns: PatternStats,
    pub entity_rules: usize,
    pub semantic_backend: String,
    pub thresholds: ThresholdStats,
    pub learning: UserLearningStats,
    pub broker: Option<BrokerStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDataExport {
    pub user_id: String,
    pub exported_at: DateTime<Utc>,
    pub feedback_count: u64,
    pub weights: Option<UserWeights>,
}

/// Per-user analysis context.
///
/// Owns every piece of mutable per-user state (threshold controller, context
/// window, entity set, graph). Only the learning system is shared, and it
/// serializes writes per user.
pub struct MemorySession {
    user_id: String,
    patterns: Arc<PatternSet>,
    classifier: StatementClassifier,
    thresholds: Arc<ThresholdController>,
    matcher: Arc<SemanticMatcher>,
    resolver: ContradictionResolver,
    decay: DecayProcessor,
    context: ContextReasoner,
    linker: EntityLinker,
    graph: KnowledgeGraph,
    learning: Arc<AdaptiveLearningSystem>,
}

impl std::fmt::Debug for MemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemorySession")
            .field("user_id", &self.user_id)
            .field("classifier", &self.classifier)
            .field("entities", &self.linker.len())
            .finish_non_exhaustive()
    }
}

impl MemorySession {
    pub fn new(
        user_id: impl Into<String>,
        config: &Config,
        patterns: Arc<PatternSet>,
        learning: Arc<AdaptiveLearningSystem>,
        enhancer: Option<Arc<dyn Enhancer>>,
    ) -> Result<Self> {
        let thresholds = Arc::new(ThresholdController::new(config.thresholds.clone()));
        let matcher = Arc::new(SemanticMatcher::from_config(&config.semantic)?);

        let mut classifier = StatementClassifier::new(
            Arc::clone(&patterns),
            config.classifier.clone(),
            Arc::clone(&thresholds),
            Arc::clone(&matcher),
        )?;
        if let Some(enhancer) = enhancer {
            classifier = classifier
                .with_enhancer(enhancer, Duration::from_secs(config.broker.timeout_secs));
        }

        Ok(Self {
            user_id: user_id.into(),
            patterns,
            classifier,
            thresholds,
            resolver: ContradictionResolver::new(Some(Arc::clone(&matcher))),
            matcher,
            decay: DecayProcessor::from_config(&config.decay),
            context: ContextReasoner::new(config.context.window_size),
            linker: EntityLinker::new()?,
            graph: KnowledgeGraph::new(),
            learning,
        })
    }

    /// Build a session with the pattern registry, learning store and broker
    /// selected by `config`.
    pub async fn from_config(user_id: impl Into<String>, config: &Config) -> Result<Self> {
        let patterns = PatternRegistry::new(config.patterns.path.clone()).load();
        let learning = Arc::new(AdaptiveLearningSystem::from_config(&config.learning).await);
        let enhancer = LlmBroker::from_config(&config.broker, config.llm.as_ref())
            .map(|broker| Arc::new(broker) as Arc<dyn Enhancer>);
        Self::new(user_id, config, patterns, learning, enhancer)
    }

    /// Abort in-flight enhancement calls when `token` fires.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.classifier = self.classifier.with_cancellation(token);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn learning(&self) -> &Arc<AdaptiveLearningSystem> {
        &self.learning
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    /// Classify every statement turn by turn, link entities into the graph,
    /// then resolve contradictions and apply decay across the whole batch.
    pub async fn analyze_conversation(&mut self, turns: &[ConversationTurn]) -> ConversationAnalysis {
        let weights = self.learning.user_weights(&self.user_id);
        let mut items: Vec<AnalyzedItem> = Vec::new();

        for turn in turns {
            let mut turn_items = Vec::new();
            for statement in segment_statements(&turn.text) {
                let mut item = self
                    .classifier
                    .classify(&statement, turn.turn_number, weights.as_ref())
                    .await;
                if !item.is_noise() {
                    let rationale = self.context.build_rationale(&item.categories);
                    if !rationale.is_empty() {
                        item.reasoning.push_str(" | ");
                        item.reasoning.push_str(&rationale);
                        item.context_rationale = rationale;
                    }
                    self.context.update(
                        item.turn_number,
                        &item.content,
                        &item.categories,
                        item.retention,
                    );
                }
                turn_items.push(item);
            }

            let entity_ids = self.linker.extract_turn(turn);
            for id in &entity_ids {
                if let Some(entity) = self.linker.entity(id) {
                    self.graph.upsert_entity(entity);
                }
            }
            for item in turn_items.into_iter() {
                if !item.is_noise() {
                    let node = self.graph.ingest_memory(&item);
                    self.graph.link_memory_to_entities(&node, &entity_ids);
                }
                items.push(AnalyzedItem {
                    item,
                    confidence: 0.0,
                    entity_ids: entity_ids.clone(),
                });
            }
        }

        let total_turns = turns.iter().map(|t| t.turn_number).max().unwrap_or(0);
        let mut memory: Vec<MemoryItem> = items.iter().map(|a| a.item.clone()).collect();
        let contradictions = self.resolver.resolve(&mut memory);
        let decayed = self.decay.apply(&mut memory, total_turns);
        for (analyzed, item) in items.iter_mut().zip(memory) {
            analyzed.confidence = item_confidence(&item, analyzed.entity_ids.len());
            analyzed.item = item;
        }

        let entities: Vec<Entity> = self.linker.entities().cloned().collect();
        let profile = self.linker.build_profile(&self.user_id);
        let graph = self.graph.get_summary();

        tracing::info!(
            user_id = %self.user_id,
            turns = turns.len(),
            items = items.len(),
            entities = entities.len(),
            contradictions,
            decayed,
            "Conversation analyzed"
        );

        ConversationAnalysis {
            user_id: self.user_id.clone(),
            total_turns,
            items,
            entities,
            profile,
            graph,
            contradictions,
            decayed,
        }
    }

    /// Send a correction for `item` to the learning system.
    pub async fn record_feedback(
        &self,
        item: &MemoryItem,
        expected: RetentionTier,
        comment: Option<String>,
    ) -> Result<Feedback> {
        self.learning
            .collect_feedback(FeedbackRequest {
                user_id: self.user_id.clone(),
                statement: item.content.clone(),
                predicted: item.retention.to_string(),
                expected: expected.to_string(),
                categories: item.categories.clone(),
                importance_score: item.importance_score,
                comment,
            })
            .await
    }

    pub fn memory_summary(&self, analysis: &ConversationAnalysis) -> MemorySummary {
        let total = analysis.items.len();
        let mut distribution = BTreeMap::new();
        let mut percentages = BTreeMap::new();
        let mut average_confidence = BTreeMap::new();

        for tier in RetentionTier::all() {
            let in_tier: Vec<&AnalyzedItem> = analysis.items_in(tier).collect();
            let count = in_tier.len();
            let mean = if count == 0 {
                0.0
            } else {
                in_tier.iter().map(|a| a.confidence).sum::<f64>() / count as f64
            };
            distribution.insert(tier.to_string(), count);
            percentages.insert(tier.to_string(), percentage(count, total));
            average_confidence.insert(tier.to_string(), round3(mean));
        }

        let enhanced = analysis.items.iter().filter(|a| a.item.enhanced).count();
        let unique_entities: HashSet<&str> = analysis
            .items
            .iter()
            .flat_map(|a| a.entity_ids.iter().map(String::as_str))
            .collect();

        MemorySummary {
            total_items: total,
            retention_distribution: distribution,
            retention_percentages: percentages,
            average_confidence,
            enhanced_share: percentage(enhanced, total),
            entities_found: unique_entities.len(),
            knowledge_graph: self.graph.get_summary(),
            context_window: self.context.summarize_window(),
        }
    }

    pub fn statistics(&self) -> SessionStatistics {
        SessionStatistics {
            user_id: self.user_id.clone(),
            patterns: self.patterns.stats(),
            entity_rules: self.linker.rule_count(),
            semantic_backend: self.matcher.backend_name().to_string(),
            thresholds: self.thresholds.stats(),
            learning: self.learning.get_user_stats(&self.user_id),
            broker: self.classifier.enhancer().map(|e| e.stats()),
        }
    }

    pub fn export_user_data(&self) -> UserDataExport {
        let weights = self.learning.user_weights(&self.user_id);
        UserDataExport {
            user_id: self.user_id.clone(),
            exported_at: Utc::now(),
            feedback_count: weights.as_ref().map_or(0, |w| w.feedback_count),
            weights,
        }
    }
}

/// `min(score / 40, 1)`, plus 0.2 when the broker's suggested tier matches,
/// plus 0.05 per entity in the turn (at most 0.2). Capped at 1.
fn item_confidence(item: &MemoryItem, entities_in_turn: usize) -> f64 {
    let mut confidence = (item.importance_score / CONFIDENCE_SCORE_SCALE).clamp(0.0, 1.0);
    if item.suggested_retention == Some(item.retention) {
        confidence += BROKER_AGREEMENT_BOOST;
    }
    if entities_in_turn > 0 {
        confidence += (entities_in_turn as f64 * ENTITY_BOOST_PER_ENTITY).min(MAX_ENTITY_BOOST);
    }
    round3(confidence.min(1.0))
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 / total as f64 * 1000.0).round() / 10.0
}

/// Parse `Speaker: text` lines. Blank lines, `#` comments and lines without a
/// speaker are skipped; turns are numbered from 1.
pub fn parse_transcript(text: &str) -> Vec<ConversationTurn> {
    let mut turns = Vec::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((speaker, body)) = line.split_once(':') else {
            continue;
        };
        let turn_number = turns.len() as u32 + 1;
        turns.push(ConversationTurn::new(speaker.trim(), body.trim(), turn_number));
    }
    turns
}

/// Split on sentence punctuation, keeping fragments longer than ten
/// characters. A turn with no such fragment is one statement.
pub fn segment_statements(text: &str) -> Vec<String> {
    let statements: Vec<String> = text
        .split(&['.', '!', '?'][..])
        .map(str::trim)
        .filter(|s| s.chars().count() > MIN_STATEMENT_CHARS)
        .map(str::to_string)
        .collect();
    if statements.is_empty() {
        vec![text.to_string()]
    } else {
        statements
    }
}

/// Human-readable report grouped by tier.
pub fn format_report(items: &[MemoryItem]) -> String {
    let rule = "=".repeat(80);
    let thin = "-".repeat(80);
    let mut out: Vec<String> = vec![
        rule.clone(),
        "CONVERSATIONAL MEMORY ANALYSIS".to_string(),
        rule.clone(),
        String::new(),
    ];

    let by_tier = |tier: RetentionTier| -> Vec<&MemoryItem> {
        items.iter().filter(|i| i.retention == tier).collect()
    };
    let mut long_term = by_tier(RetentionTier::LongTerm);
    let mut short_term = by_tier(RetentionTier::ShortTerm);
    let immediate = by_tier(RetentionTier::Immediate);
    long_term.sort_by(|a, b| b.importance_score.total_cmp(&a.importance_score));
    short_term.sort_by(|a, b| b.importance_score.total_cmp(&a.importance_score));

    let push_item = |out: &mut Vec<String>, item: &MemoryItem, with_categories: bool| {
        out.push(format!(
            "  Turn {} | Score: {:.1}",
            item.turn_number, item.importance_score
        ));
        out.push(format!("  \"{}\"", item.content));
        if with_categories {
            out.push(format!("  Categories: {}", item.categories.join(", ")));
        }
        out.push(format!("  Reasoning: {}", item.reasoning));
        out.push(String::new());
    };

    out.push(format!(
        "LONG-TERM MEMORIES ({}): Persist for days/weeks/months",
        long_term.len()
    ));
    out.push(thin.clone());
    for item in long_term.iter().copied() {
        push_item(&mut out, item, true);
    }

    out.push(format!(
        "\nSHORT-TERM MEMORIES ({}): Keep for 1-5 turns",
        short_term.len()
    ));
    out.push(thin.clone());
    for item in short_term.iter().copied() {
        push_item(&mut out, item, true);
    }

    out.push(format!(
        "\nIMMEDIATE DISCARD ({}): Forget after this turn",
        immediate.len()
    ));
    out.push(thin);
    for item in immediate.iter().copied().take(REPORT_IMMEDIATE_LIMIT) {
        push_item(&mut out, item, false);
    }
    if immediate.len() > REPORT_IMMEDIATE_LIMIT {
        out.push(format!(
            "  ... and {} more items",
            immediate.len() - REPORT_IMMEDIATE_LIMIT
        ));
    }

    let total = items.len();
    out.push(format!("\n{rule}"));
    out.push("SUMMARY STATISTICS".to_string());
    out.push(rule);
    out.push(format!("Total items analyzed: {total}"));
    for (label, count) in [
        ("Long-term", long_term.len()),
        ("Short-term", short_term.len()),
        ("Immediate", immediate.len()),
    ] {
        out.push(format!(
            "{label}: {count} ({:.1}%)",
            percentage(count, total)
        ));
    }

    out.join("\n")
}
