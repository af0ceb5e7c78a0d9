//! Memory frame summarizer
//!
//! Compacts batches of long-term memory frames with the compression model.
//! Errors and decisions survive; routine narration does not. The output is
//! never longer than the text it was made from, so feeding a digest back in
//! cannot grow it, and a digest that already fits the budget comes back
//! untouched.

use std::sync::Arc;
use tracing::{debug, warn};
use unstuck_core::{Frame, FrameKind};
use unstuck_model::CompletionModel;

use crate::prompt::build_summary_prompt;
use crate::tokens::{budget_chars, estimate_tokens, truncate_head_chars};

/// Model-backed memory compactor
#[derive(Clone)]
pub struct Summarizer {
    model: Arc<dyn CompletionModel>,
    max_summary_tokens: usize,
}

impl Summarizer {
    pub fn new(model: Arc<dyn CompletionModel>, max_summary_tokens: usize) -> Self {
        Self {
            model,
            max_summary_tokens,
        }
    }

    /// Compact `frames` into a digest of at most `max_summary_tokens`
    pub async fn summarize(&self, frames: &[Frame]) -> String {
        if frames.is_empty() {
            return String::new();
        }

        if let [frame] = frames {
            if frame.kind == FrameKind::Digest && estimate_tokens(&frame.content) <= self.max_summary_tokens {
                debug!("Digest already within budget, leaving unchanged");
                return frame.content.clone();
            }
        }

        let cap = self.output_cap(frames);
        let prompt = build_summary_prompt(frames, self.max_summary_tokens);

        match self.model.complete(&prompt, self.max_summary_tokens).await {
            Ok(text) if !text.trim().is_empty() => truncate_head_chars(text.trim(), cap),
            Ok(_) => {
                warn!(model = self.model.name(), "Summarizer returned empty output, using offline digest");
                self.digest_offline(frames)
            }
            Err(e) => {
                warn!(model = self.model.name(), "Summarizer failed, using offline digest: {}", e);
                self.digest_offline(frames)
            }
        }
    }

    /// Deterministic digest without a model call
    pub fn digest_offline(&self, frames: &[Frame]) -> String {
        offline_digest(frames, self.max_summary_tokens)
    }

    fn output_cap(&self, frames: &[Frame]) -> usize {
        output_cap(frames, self.max_summary_tokens)
    }
}

impl std::fmt::Debug for Summarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Summarizer")
            .field("model", &self.model.name())
            .field("max_summary_tokens", &self.max_summary_tokens)
            .finish()
    }
}

/// Digest `frames` without a model
///
/// Keeps errors, decisions and earlier digests in order, adds observations
/// while they still fit and drops narration.
pub fn offline_digest(frames: &[Frame], max_summary_tokens: usize) -> String {
    let cap = output_cap(frames, max_summary_tokens);

    let lines: Vec<(FrameKind, String)> = frames
        .iter()
        .filter(|f| f.kind != FrameKind::Narration)
        .map(|f| (f.kind, render_line(f)))
        .collect();

    let essential_chars: usize = lines
        .iter()
        .filter(|(kind, _)| kind.is_essential())
        .map(|(_, line)| line.chars().count() + 1)
        .sum();

    let mut used = essential_chars;
    let mut kept = Vec::new();
    for (kind, line) in lines {
        if kind.is_essential() {
            kept.push(line);
            continue;
        }
        let cost = line.chars().count() + 1;
        if used + cost <= cap {
            used += cost;
            kept.push(line);
        }
    }

    truncate_head_chars(&kept.join("\n"), cap)
}

/// Output never exceeds the budget or the size of the input
fn output_cap(frames: &[Frame], max_summary_tokens: usize) -> usize {
    let input_chars: usize = frames.iter().map(|f| f.content.chars().count()).sum();
    budget_chars(max_summary_tokens).min(input_chars)
}

fn render_line(frame: &Frame) -> String {
    match frame.kind {
        FrameKind::Digest => frame.content.trim().to_string(),
        kind => format!("[{}] {}", kind, frame.content.trim()),
    }
}
