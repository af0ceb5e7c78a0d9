//! Stuck detector
//!
//! Classifies a full [`HistoryWindow`] as stuck, ambiguous or clear. The
//! rules are pure functions of the window; the detector never touches the
//! task itself.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use unstuck_core::{IterationRecord, RecoveryConfig, StuckPattern, StuckSignal, TaskId, ToolCall};

use crate::similarity::min_pairwise_similarity;
use crate::HistoryWindow;

/// Near-miss level as a fraction of the similarity threshold
const NEAR_MISS_SIMILARITY_RATIO: f64 = 0.75;

/// Detector thresholds, taken from [`RecoveryConfig`]
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub history_window: usize,
    pub similarity_threshold: f64,
    pub repetitive_output_count: usize,
    pub circular_tool_repeat_count: usize,
    pub no_progress_iterations: usize,
}

impl From<&RecoveryConfig> for DetectorConfig {
    fn from(config: &RecoveryConfig) -> Self {
        Self {
            history_window: config.history_window,
            similarity_threshold: config.repetitive_similarity_threshold,
            repetitive_output_count: config.repetitive_output_count,
            circular_tool_repeat_count: config.circular_tool_repeat_count,
            no_progress_iterations: config.no_progress_iterations,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::from(&RecoveryConfig::default())
    }
}

/// A rule that came close to firing without crossing its bar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearMiss {
    pub pattern: StuckPattern,
    pub detail: String,
}

/// Result of evaluating the window
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Detection {
    /// Window not yet full
    Insufficient { observed: usize, required: usize },
    /// At least one rule fired; the winning signal
    Stuck { signal: StuckSignal },
    /// Two or more rules nearly fired and none did; no action
    Ambiguous { near_misses: Vec<NearMiss> },
    Clear,
}

impl Detection {
    pub fn signal(&self) -> Option<&StuckSignal> {
        match self {
            Self::Stuck { signal } => Some(signal),
            _ => None,
        }
    }
}

/// Per-task stuck detector owning the task's history window
#[derive(Debug, Clone)]
pub struct StuckDetector {
    task_id: TaskId,
    config: DetectorConfig,
    window: HistoryWindow,
    task_done: bool,
}

/// Outcome of one rule: fired, nearly fired, or neither
enum RuleResult {
    Fired(StuckSignal),
    NearMiss(NearMiss),
    Quiet,
}

impl StuckDetector {
    pub fn new(task_id: impl Into<String>, config: DetectorConfig) -> Self {
        let window = HistoryWindow::new(config.history_window);
        Self {
            task_id: task_id.into(),
            config,
            window,
            task_done: false,
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn window(&self) -> &HistoryWindow {
        &self.window
    }

    /// Record a completed attempt and return a signal if the task is stuck
    ///
    /// Returns `None` until the window is full, for records belonging to a
    /// different task, and whenever [`evaluate`](Self::evaluate) is not
    /// [`Detection::Stuck`].
    pub fn analyze(&mut self, record: IterationRecord) -> Option<StuckSignal> {
        match self.observe(record) {
            Detection::Stuck { signal } => Some(signal),
            _ => None,
        }
    }

    /// Like [`analyze`](Self::analyze) but returns the full classification
    pub fn observe(&mut self, record: IterationRecord) -> Detection {
        if record.task_id() != self.task_id {
            warn!(
                detector_task = %self.task_id,
                record_task = %record.task_id(),
                "Ignoring iteration record for another task"
            );
            return self.evaluate();
        }

        if record.success() {
            self.task_done = true;
        }
        self.window.push(record);
        self.evaluate()
    }

    /// Classify the current window without recording anything
    pub fn evaluate(&self) -> Detection {
        if !self.window.is_full() {
            return Detection::Insufficient {
                observed: self.window.len(),
                required: self.window.capacity(),
            };
        }

        let mut fired = Vec::new();
        let mut near_misses = Vec::new();

        for result in [
            self.check_repetitive_output(),
            self.check_circular_tools(),
            self.check_no_progress(),
        ] {
            match result {
                RuleResult::Fired(signal) => fired.push(signal),
                RuleResult::NearMiss(near_miss) => near_misses.push(near_miss),
                RuleResult::Quiet => {}
            }
        }

        if let Some(signal) = select_signal(fired) {
            debug!(task_id = %self.task_id, pattern = %signal.pattern, "Stuck pattern detected");
            return Detection::Stuck { signal };
        }

        if near_misses.len() >= 2 {
            return Detection::Ambiguous { near_misses };
        }

        Detection::Clear
    }

    /// Forget all recorded history; the next signal needs a full fresh window
    pub fn reset(&mut self) {
        self.window.clear();
    }

    /// Suppress the no-progress rule once the task is complete
    pub fn mark_done(&mut self) {
        self.task_done = true;
    }

    fn check_repetitive_output(&self) -> RuleResult {
        let count = self.config.repetitive_output_count;
        let outputs: Vec<&str> = self.window.recent(count).map(|r| r.output_text()).collect();
        if outputs.len() < count {
            return RuleResult::Quiet;
        }

        let Some(lowest) = min_pairwise_similarity(&outputs) else {
            return RuleResult::Quiet;
        };

        let threshold = self.config.similarity_threshold;
        if lowest > threshold {
            RuleResult::Fired(StuckSignal::repetitive_output(format!(
                "last {} outputs are at least {:.0}% similar (threshold {:.0}%)",
                count,
                lowest * 100.0,
                threshold * 100.0
            )))
        } else if lowest >= threshold * NEAR_MISS_SIMILARITY_RATIO {
            RuleResult::NearMiss(NearMiss {
                pattern: StuckPattern::RepetitiveOutput,
                detail: format!(
                    "last {} outputs are {:.0}% similar, below threshold {:.0}%",
                    count,
                    lowest * 100.0,
                    threshold * 100.0
                ),
            })
        } else {
            RuleResult::Quiet
        }
    }

    fn check_circular_tools(&self) -> RuleResult {
        let calls: Vec<&ToolCall> = self.window.iter().flat_map(|r| r.tool_calls()).collect();
        if calls.is_empty() {
            return RuleResult::Quiet;
        }

        let mut counts: HashMap<&ToolCall, usize> = HashMap::new();
        let mut first_seen: HashMap<&ToolCall, usize> = HashMap::new();
        for (index, &call) in calls.iter().enumerate() {
            *counts.entry(call).or_insert(0) += 1;
            first_seen.entry(call).or_insert(index);
        }

        let repeat = self.config.circular_tool_repeat_count;

        // Most repeated first; earliest first occurrence breaks ties
        let mut candidates: Vec<(&ToolCall, usize, usize)> = counts
            .iter()
            .map(|(call, count)| (*call, *count, first_seen[call]))
            .collect();
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

        for &(call, count, first) in &candidates {
            if count < repeat {
                break;
            }
            let known: HashSet<&ToolCall> = calls[..=first].iter().copied().collect();
            if calls[first + 1..].iter().all(|c| known.contains(c)) {
                return RuleResult::Fired(StuckSignal::circular_tools(format!(
                    "tool call {} repeated {} times with no new calls since its first use",
                    call, count
                )));
            }
        }

        match candidates.first() {
            Some(&(call, count, _)) if count >= repeat.saturating_sub(1).max(2) => {
                RuleResult::NearMiss(NearMiss {
                    pattern: StuckPattern::CircularTools,
                    detail: format!("tool call {} repeated {} times", call, count),
                })
            }
            _ => RuleResult::Quiet,
        }
    }

    fn check_no_progress(&self) -> RuleResult {
        if self.task_done {
            return RuleResult::Quiet;
        }

        let streak = self
            .window
            .iter()
            .rev()
            .take_while(|r| r.files_touched().is_empty())
            .count();
        let required = self.config.no_progress_iterations;

        if streak >= required {
            RuleResult::Fired(StuckSignal::no_progress(format!(
                "{} consecutive iterations touched no files",
                streak
            )))
        } else if streak > 0 && streak + 1 >= required {
            RuleResult::NearMiss(NearMiss {
                pattern: StuckPattern::NoProgress,
                detail: format!("{} consecutive iterations touched no files", streak),
            })
        } else {
            RuleResult::Quiet
        }
    }
}

/// Highest confidence wins; exact ties go to the pattern with precedence
fn select_signal(signals: Vec<StuckSignal>) -> Option<StuckSignal> {
    signals.into_iter().min_by(|a, b| {
        b.confidence
            .value()
            .total_cmp(&a.confidence.value())
            .then(a.pattern.precedence().cmp(&b.pattern.precedence()))
    })
}
