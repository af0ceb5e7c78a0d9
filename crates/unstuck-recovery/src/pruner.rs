//! Context pruner
//!
//! Shrinks a stuck task's working context toward the diagnosed cause using
//! the compression model. When the model fails or answers with nothing, the
//! most recent half of the raw context is kept instead. Either way the
//! result fits `max_pruned_tokens`.

use std::sync::Arc;
use tracing::{debug, warn};
use unstuck_core::{StuckSignal, Task};
use unstuck_model::CompletionModel;

use crate::prompt::build_prune_prompt;
use crate::tokens::{estimate_tokens, recent_half, truncate_head, truncate_tail};

/// Pruned context and how it was produced
#[derive(Debug, Clone, PartialEq)]
pub struct PruneOutcome {
    pub context: String,
    /// True when the model could not be used and truncation was applied
    pub fallback: bool,
}

/// Model-backed context compressor
#[derive(Clone)]
pub struct ContextPruner {
    model: Arc<dyn CompletionModel>,
    max_pruned_tokens: usize,
}

impl ContextPruner {
    pub fn new(model: Arc<dyn CompletionModel>, max_pruned_tokens: usize) -> Self {
        Self {
            model,
            max_pruned_tokens,
        }
    }

    pub fn max_pruned_tokens(&self) -> usize {
        self.max_pruned_tokens
    }

    /// Pruned context for the next attempt at `task`
    pub async fn prune(&self, context: &str, signal: &StuckSignal, task: &Task) -> String {
        self.prune_detailed(context, signal, task).await.context
    }

    /// Like [`prune`](Self::prune) but reports whether the fallback was used
    pub async fn prune_detailed(&self, context: &str, signal: &StuckSignal, task: &Task) -> PruneOutcome {
        if context.trim().is_empty() {
            return PruneOutcome {
                context: String::new(),
                fallback: false,
            };
        }

        let prompt = build_prune_prompt(context, signal, task, self.max_pruned_tokens);

        match self.model.complete(&prompt, self.max_pruned_tokens).await {
            Ok(text) if !text.trim().is_empty() => {
                let pruned = text.trim();
                let tokens = estimate_tokens(pruned);
                if tokens > self.max_pruned_tokens {
                    debug!(
                        task_id = %task.id,
                        tokens,
                        budget = self.max_pruned_tokens,
                        "Pruned context over budget, truncating"
                    );
                }
                PruneOutcome {
                    context: truncate_head(pruned, self.max_pruned_tokens),
                    fallback: false,
                }
            }
            Ok(_) => {
                warn!(task_id = %task.id, model = self.model.name(), "Pruning model returned empty output, truncating");
                self.fallback(context)
            }
            Err(e) => {
                warn!(task_id = %task.id, model = self.model.name(), "Pruning model failed, truncating: {}", e);
                self.fallback(context)
            }
        }
    }

    /// Freshest half of the raw context, clamped to the budget
    fn fallback(&self, context: &str) -> PruneOutcome {
        PruneOutcome {
            context: truncate_tail(&recent_half(context), self.max_pruned_tokens),
            fallback: true,
        }
    }
}

impl std::fmt::Debug for ContextPruner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextPruner")
            .field("model", &self.model.name())
            .field("max_pruned_tokens", &self.max_pruned_tokens)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unstuck_model::{ModelError, ScriptedModel};

    fn task() -> Task {
        Task::new("T-1", "Fix parser")
    }

    fn signal() -> StuckSignal {
        StuckSignal::repetitive_output("same output three times")
    }

    #[tokio::test]
    async fn test_model_output_used() {
        let model = Arc::new(ScriptedModel::new("compression").with_response("  src/parser.rs: E0382 at line 40  "));
        let pruner = ContextPruner::new(model.clone(), 100);

        let outcome = pruner.prune_detailed("long history ...", &signal(), &task()).await;
        assert_eq!(outcome.context, "src/parser.rs: E0382 at line 40");
        assert!(!outcome.fallback);
        assert!(model.prompts()[0].contains("same output three times"));
    }

    #[tokio::test]
    async fn test_oversized_output_truncated_to_budget() {
        let model = Arc::new(ScriptedModel::new("compression").with_response("y".repeat(1000)));
        let pruner = ContextPruner::new(model, 10);

        let pruned = pruner.prune("context", &signal(), &task()).await;
        assert!(estimate_tokens(&pruned) <= 10);
        assert_eq!(pruned, "y".repeat(40));
    }

    #[tokio::test]
    async fn test_failure_keeps_recent_half() {
        let model = Arc::new(
            ScriptedModel::new("compression").with_failure(ModelError::Unavailable("503".into())),
        );
        let pruner = ContextPruner::new(model, 100);

        let outcome = pruner.prune_detailed("old old old new new new", &signal(), &task()).await;
        assert!(outcome.fallback);
        assert_eq!(outcome.context, " new new new");
    }

    #[tokio::test]
    async fn test_empty_output_falls_back() {
        let model = Arc::new(ScriptedModel::new("compression").with_response("   \n"));
        let pruner = ContextPruner::new(model, 100);

        let outcome = pruner.prune_detailed("abcdefgh", &signal(), &task()).await;
        assert!(outcome.fallback);
        assert_eq!(outcome.context, "efgh");
    }

    #[tokio::test]
    async fn test_fallback_clamped_to_budget() {
        let model = Arc::new(ScriptedModel::new("compression"));
        let pruner = ContextPruner::new(model, 5);

        let context: String = (0..200).map(|n| char::from(b'a' + (n % 26) as u8)).collect();
        let outcome = pruner.prune_detailed(&context, &signal(), &task()).await;
        assert!(outcome.fallback);
        assert!(estimate_tokens(&outcome.context) <= 5);
        assert!(context.ends_with(&outcome.context));
    }

    #[tokio::test]
    async fn test_empty_context_skips_model() {
        let model = Arc::new(ScriptedModel::new("compression"));
        let pruner = ContextPruner::new(model.clone(), 100);

        assert_eq!(pruner.prune("  ", &signal(), &task()).await, "");
        assert_eq!(model.call_count(), 0);
    }
}
