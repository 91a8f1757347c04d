//! Local sentence embeddings for the semantic matcher.
//!
//! Only compiled with the `local-embeddings` feature; without it the matcher
//! runs on token sets.

mod provider;

pub use provider::EmbeddingProvider;
