mod knowledge_graph;
mod learning;
pub mod session;
mod weight_store;

pub use knowledge_graph::{memory_node_id, KnowledgeGraph};
pub use learning::AdaptiveLearningSystem;
pub use session::{
    format_report, parse_transcript, segment_statements, AnalyzedItem, ConversationAnalysis,
    MemorySession, MemorySummary, SessionStatistics, UserDataExport,
};
pub use weight_store::WeightStore;
