use async_trait::async_trait;
use std::sync::Arc;

use crate::ModelError;

/// A text-completion model
///
/// Implementations must be safe to share between concurrently recovering
/// tasks. A call either returns the completion text or a [`ModelError`];
/// callers decide whether to fall back.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Complete `prompt`, producing at most `max_tokens` output tokens
    async fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String, ModelError>;

    /// Model identifier for logs
    fn name(&self) -> &str;
}

#[async_trait]
impl<M: CompletionModel + ?Sized> CompletionModel for Arc<M> {
    async fn complete(&self, prompt: &str, max_tokens: usize) -> Result<String, ModelError> {
        (**self).complete(prompt, max_tokens).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
