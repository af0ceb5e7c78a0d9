//! # unstuck-model
//!
//! The seam between recovery and the language models it relies on.
//!
//! Pruning and summarization go to a cheap compression model, decomposition
//! to a stronger planning model. Both sit behind [`CompletionModel`] so the
//! orchestrator can be driven by [`ScriptedModel`] in tests and by
//! [`AnthropicModel`] in production.

mod anthropic;
mod auth;
mod circuit_breaker;
mod error;
mod model;
mod scripted;
mod types;

pub use anthropic::AnthropicModel;
pub use auth::resolve_api_key;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use error::ModelError;
pub use model::CompletionModel;
pub use scripted::ScriptedModel;
pub use types::Usage;
