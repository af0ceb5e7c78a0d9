//! Task decomposer
//!
//! Splits an overwhelmed task into 2..=`max_subtasks` ordered subtasks using
//! the planning model. Output is validated in full before anything is
//! returned; a single bad entry rejects the whole decomposition.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use unstuck_core::{Result, StuckSignal, Task, UnstuckError};
use unstuck_model::CompletionModel;

use crate::prompt::build_decompose_prompt;

/// Fewest subtasks a decomposition may produce
pub const MIN_SUBTASKS: usize = 2;

const PLANNING_MAX_TOKENS: usize = 4096;

#[derive(Debug, Deserialize)]
struct SubtaskSpec {
    title: Option<String>,
    description: Option<String>,
    #[serde(default)]
    acceptance_criteria: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DecompositionOutput {
    Wrapped { subtasks: Vec<SubtaskSpec> },
    Bare(Vec<SubtaskSpec>),
}

impl DecompositionOutput {
    fn into_specs(self) -> Vec<SubtaskSpec> {
        match self {
            Self::Wrapped { subtasks } => subtasks,
            Self::Bare(subtasks) => subtasks,
        }
    }
}

/// Model-backed task splitter
#[derive(Clone)]
pub struct TaskDecomposer {
    model: Arc<dyn CompletionModel>,
    max_subtasks: usize,
    max_depth: u32,
}

impl TaskDecomposer {
    pub fn new(model: Arc<dyn CompletionModel>, max_subtasks: usize, max_depth: u32) -> Self {
        Self {
            model,
            max_subtasks: max_subtasks.max(MIN_SUBTASKS),
            max_depth,
        }
    }

    /// Produce ordered subtasks for `task`
    ///
    /// Fails with [`UnstuckError::DepthExceeded`] before calling the model
    /// when the subtasks would be deeper than allowed,
    /// [`UnstuckError::ModelUnavailable`] when the model call fails and
    /// [`UnstuckError::MalformedDecomposition`] when its output does not
    /// validate. Never returns an empty list.
    pub async fn decompose(&self, task: &Task, signal: &StuckSignal) -> Result<Vec<Task>> {
        let depth = task.decomposition_depth + 1;
        if depth > self.max_depth {
            warn!(task_id = %task.id, depth, max = self.max_depth, "Refusing decomposition");
            return Err(UnstuckError::DepthExceeded {
                depth,
                max: self.max_depth,
            });
        }

        let prompt = build_decompose_prompt(task, signal, self.max_subtasks);
        let response = self.model.complete(&prompt, PLANNING_MAX_TOKENS).await?;

        let subtasks = self.parse(task, &response)?;
        info!(
            task_id = %task.id,
            count = subtasks.len(),
            depth,
            "Task decomposed"
        );
        Ok(subtasks)
    }

    /// Validate the planning model's response into subtasks of `parent`
    pub fn parse(&self, parent: &Task, response: &str) -> Result<Vec<Task>> {
        let json = extract_json(response).ok_or_else(|| {
            UnstuckError::MalformedDecomposition("no JSON found in planning output".to_string())
        })?;

        let specs = serde_json::from_str::<DecompositionOutput>(json)
            .map_err(|e| UnstuckError::MalformedDecomposition(format!("invalid JSON: {}", e)))?
            .into_specs();

        if specs.len() < MIN_SUBTASKS || specs.len() > self.max_subtasks {
            return Err(UnstuckError::MalformedDecomposition(format!(
                "expected {}..={} subtasks, got {}",
                MIN_SUBTASKS,
                self.max_subtasks,
                specs.len()
            )));
        }

        specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| {
                let title = required(spec.title, index, "title")?;
                let description = required(spec.description, index, "description")?;
                let criteria: Vec<String> = spec
                    .acceptance_criteria
                    .unwrap_or_default()
                    .into_iter()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect();
                if criteria.is_empty() {
                    return Err(UnstuckError::MalformedDecomposition(format!(
                        "subtask {} has no acceptance criteria",
                        index + 1
                    )));
                }
                Ok(Task::child_of(parent, index, title, description, criteria))
            })
            .collect()
    }
}

impl std::fmt::Debug for TaskDecomposer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskDecomposer")
            .field("model", &self.model.name())
            .field("max_subtasks", &self.max_subtasks)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

fn required(value: Option<String>, index: usize, field: &str) -> Result<String> {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(UnstuckError::MalformedDecomposition(format!(
            "subtask {} is missing {}",
            index + 1,
            field
        ))),
    }
}

/// Locate the JSON payload in a model response
///
/// Accepts a fenced code block, or the outermost `{...}` / `[...]` span
/// after any leading prose.
fn extract_json(response: &str) -> Option<&str> {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            let block = body[..end].trim();
            if !block.is_empty() {
                return Some(block);
            }
        }
    }

    let open = trimmed.find(|c: char| c == '{' || c == '[')?;
    let close_char = if trimmed[open..].starts_with('{') { '}' } else { ']' };
    let close = trimmed.rfind(close_char)?;
    (close > open).then(|| &trimmed[open..=close])
}
