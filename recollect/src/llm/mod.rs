mod api;
pub mod broker;
pub mod prompts;
mod provider;

pub use api::{JsonCompletion, LlmApiClient};
pub use broker::{BrokerAnalysis, BrokerContext, BrokerStats, Enhancer, LlmBroker};
pub use provider::{CompletionOptions, LlmBackend, LlmProvider};
