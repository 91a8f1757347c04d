#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use recollect::config::{
    BrokerConfig, ClassifierConfig, Config, ContextConfig, DecayConfig, LearningConfig,
    PatternsConfig, SemanticConfig, ThresholdConfig,
};
use recollect::intelligence::patterns::default_patterns;
use recollect::intelligence::PatternSet;
use recollect::llm::Enhancer;
use recollect::models::ConversationTurn;
use recollect::services::{parse_transcript, AdaptiveLearningSystem, MemorySession};

/// Built-in defaults only, so ambient environment variables cannot leak in.
pub fn test_config(storage_dir: impl Into<PathBuf>) -> Config {
    Config {
        patterns: PatternsConfig {
            path: PathBuf::from("tests/fixtures/does-not-exist.json"),
        },
        classifier: ClassifierConfig::default(),
        thresholds: ThresholdConfig::default(),
        semantic: SemanticConfig::default(),
        context: ContextConfig::default(),
        decay: DecayConfig::default(),
        learning: LearningConfig {
            storage_dir: storage_dir.into(),
        },
        broker: BrokerConfig::default(),
        llm: None,
    }
}

pub fn default_pattern_set() -> Arc<PatternSet> {
    Arc::new(PatternSet::compile(&default_patterns()))
}

pub fn session_with(
    user_id: &str,
    learning: Arc<AdaptiveLearningSystem>,
    enhancer: Option<Arc<dyn Enhancer>>,
) -> MemorySession {
    MemorySession::new(
        user_id,
        &test_config("unused"),
        default_pattern_set(),
        learning,
        enhancer,
    )
    .expect("Failed to build session")
}

pub fn session(user_id: &str) -> MemorySession {
    session_with(user_id, Arc::new(AdaptiveLearningSystem::in_memory()), None)
}

pub fn user_turn(text: &str, turn_number: u32) -> ConversationTurn {
    ConversationTurn::new("User", text, turn_number)
}

pub fn transcript(lines: &[&str]) -> Vec<ConversationTurn> {
    parse_transcript(&lines.join("\n"))
}
