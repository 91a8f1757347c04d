pub mod classifier;
pub mod context;
pub mod contradiction;
pub mod entities;
pub mod patterns;
pub mod semantic;
pub mod temporal;
pub mod thresholds;
pub mod utils;

pub use classifier::StatementClassifier;
pub use context::{ContextEvidence, ContextReasoner};
pub use contradiction::{ContradictionCheckResult, ContradictionResolver};
pub use entities::EntityLinker;
pub use patterns::{PatternRegistry, PatternSet, PatternStats};
pub use semantic::{SemanticMatch, SemanticMatcher, SimilarityBackend, TokenSetBackend};
pub use temporal::DecayProcessor;
pub use thresholds::{ThresholdController, ThresholdStats};
