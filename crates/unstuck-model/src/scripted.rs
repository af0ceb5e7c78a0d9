//! Scripted completion model for tests and offline runs

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::{CompletionModel, ModelError};

/// Replays queued responses in order and records every prompt it receives
///
/// Once the script runs out every call fails with
/// [`ModelError::Unavailable`], which is what a test usually wants when it
/// did not expect a call.
///
/// ```
/// use unstuck_model::{CompletionModel, ScriptedModel};
///
/// # tokio_test_block_on(async {
/// let model = ScriptedModel::new("planner").with_response("{\"subtasks\": []}");
/// assert!(model.complete("plan", 100).await.is_ok());
/// assert!(model.complete("plan", 100).await.is_err());
/// assert_eq!(model.call_count(), 2);
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ScriptedModel {
    name: String,
    script: Mutex<VecDeque<Result<String, ModelError>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Queue a successful completion
    pub fn with_response(self, text: impl Into<String>) -> Self {
        locked(&self.script).push_back(Ok(text.into()));
        self
    }

    /// Queue a failed completion
    pub fn with_failure(self, err: ModelError) -> Self {
        locked(&self.script).push_back(Err(err));
        self
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue more responses after construction
    pub fn push_response(&self, text: impl Into<String>) {
        locked(&self.script).push_back(Ok(text.into()));
    }

    pub fn call_count(&self) -> usize {
        locked(&self.prompts).len()
    }

    /// Every prompt received so far, in order
    pub fn prompts(&self) -> Vec<String> {
        locked(&self.prompts).clone()
    }

    /// Responses not yet consumed
    pub fn remaining(&self) -> usize {
        locked(&self.script).len()
    }
}

#[async_trait]
impl CompletionModel for ScriptedModel {
    async fn complete(&self, prompt: &str, _max_tokens: usize) -> Result<String, ModelError> {
        locked(&self.prompts).push(prompt.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = locked(&self.script).pop_front();
        next.unwrap_or_else(|| {
            Err(ModelError::Unavailable(format!(
                "scripted model '{}' has no more responses",
                self.name
            )))
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
