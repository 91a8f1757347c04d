//! Conversational memory triage.
//!
//! Statements from a conversation are scored against weighted rules, tiered
//! into long-term, short-term or immediate retention, reconciled against
//! earlier contradicting statements and decayed over turns. Entities are
//! consolidated into a per-user knowledge graph, and user corrections feed
//! back into the weights used on the next pass.

pub mod config;
#[cfg(feature = "local-embeddings")]
pub mod embeddings;
pub mod error;
pub mod intelligence;
pub mod llm;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{RecollectError, Result};
pub use services::{AdaptiveLearningSystem, ConversationAnalysis, MemorySession};
