//! Core type definitions for stuck recovery

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use uuid::Uuid;

/// Task identifier, assigned by the external task source
pub type TaskId = String;

/// Task status as seen by the task queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Ready,
    Running,
    /// Split into subtasks; retained for audit, never deleted
    Decomposed,
    /// Parked for human review
    Escalated,
    Done,
}

impl TaskStatus {
    /// Whether the task will never run again under automation
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Decomposed | Self::Escalated | Self::Done)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Decomposed => write!(f, "decomposed"),
            Self::Escalated => write!(f, "escalated"),
            Self::Done => write!(f, "done"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ready" => Ok(Self::Ready),
            "running" => Ok(Self::Running),
            "decomposed" => Ok(Self::Decomposed),
            "escalated" => Ok(Self::Escalated),
            "done" => Ok(Self::Done),
            _ => Err(format!("Invalid status: {}", s)),
        }
    }
}

/// A queued unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    /// Set on subtasks produced by decomposition
    pub parent_task_id: Option<TaskId>,
    /// 0 for tasks from the external source, parent depth + 1 for subtasks
    pub decomposition_depth: u32,
    pub status: TaskStatus,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            acceptance_criteria: Vec::new(),
            parent_task_id: None,
            decomposition_depth: 0,
            status: TaskStatus::Ready,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_acceptance_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.acceptance_criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.decomposition_depth = depth;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Create the `index`-th (0-based) subtask of `parent`
    ///
    /// Subtask IDs are `{parent}.{n}` with `n` starting at 1, so the
    /// lineage of any task is readable from its ID alone.
    pub fn child_of(
        parent: &Task,
        index: usize,
        title: impl Into<String>,
        description: impl Into<String>,
        acceptance_criteria: Vec<String>,
    ) -> Self {
        Self {
            id: format!("{}.{}", parent.id, index + 1),
            title: title.into(),
            description: description.into(),
            acceptance_criteria,
            parent_task_id: Some(parent.id.clone()),
            decomposition_depth: parent.decomposition_depth + 1,
            status: TaskStatus::Ready,
        }
    }

    /// Render the task as the opening brief of a working context
    pub fn brief(&self) -> String {
        let mut brief = format!("# Task {}: {}\n", self.id, self.title);
        if !self.description.is_empty() {
            brief.push('\n');
            brief.push_str(&self.description);
            brief.push('\n');
        }
        if !self.acceptance_criteria.is_empty() {
            brief.push_str("\n## Acceptance Criteria\n\n");
            for criterion in &self.acceptance_criteria {
                brief.push_str(&format!("- [ ] {}\n", criterion));
            }
        }
        brief
    }
}

/// One tool invocation made during an attempt
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    /// Arguments in a canonical textual form (usually compact JSON)
    pub args: String,
}

impl ToolCall {
    pub fn new(tool: impl Into<String>, args: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            args: args.into(),
        }
    }
}

impl std::fmt::Display for ToolCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.tool, self.args)
    }
}

/// Outcome of one completed attempt at a task
///
/// Built once by the execution loop and never mutated afterwards: the
/// fields are private and only readable through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    #[serde(default = "Utc::now")]
    timestamp: DateTime<Utc>,
    task_id: TaskId,
    output_text: String,
    #[serde(default)]
    files_touched: BTreeSet<PathBuf>,
    #[serde(default)]
    tool_calls: Vec<ToolCall>,
    #[serde(default)]
    success: bool,
}

impl IterationRecord {
    pub fn new(task_id: impl Into<String>, output_text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            task_id: task_id.into(),
            output_text: output_text.into(),
            files_touched: BTreeSet::new(),
            tool_calls: Vec::new(),
            success: false,
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.files_touched.insert(path.into());
        self
    }

    pub fn with_files<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.files_touched.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn with_tool_call(mut self, tool: impl Into<String>, args: impl Into<String>) -> Self {
        self.tool_calls.push(ToolCall::new(tool, args));
        self
    }

    /// Mark the attempt as having passed acceptance verification
    pub fn verified(mut self) -> Self {
        self.success = true;
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn output_text(&self) -> &str {
        &self.output_text
    }

    pub fn files_touched(&self) -> &BTreeSet<PathBuf> {
        &self.files_touched
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    pub fn success(&self) -> bool {
        self.success
    }
}

/// Non-convergence pattern recognised by the stuck detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StuckPattern {
    RepetitiveOutput,
    CircularTools,
    NoProgress,
}

impl StuckPattern {
    /// Tie-break rank when confidences are equal (lower wins)
    pub fn precedence(&self) -> u8 {
        match self {
            Self::RepetitiveOutput => 0,
            Self::CircularTools => 1,
            Self::NoProgress => 2,
        }
    }
}

impl std::fmt::Display for StuckPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RepetitiveOutput => write!(f, "REPETITIVE_OUTPUT"),
            Self::CircularTools => write!(f, "CIRCULAR_TOOLS"),
            Self::NoProgress => write!(f, "NO_PROGRESS"),
        }
    }
}

/// Remediation the detector recommends for a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    PruneContext,
    DecomposeTask,
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PruneContext => write!(f, "PRUNE_CONTEXT"),
            Self::DecomposeTask => write!(f, "DECOMPOSE_TASK"),
        }
    }
}

/// Detector confidence, always within `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    /// Clamp `value` into `[0, 1]`; NaN becomes 0
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            Self(0.0)
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl From<f64> for Confidence {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<Confidence> for f64 {
    fn from(confidence: Confidence) -> Self {
        confidence.0
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// Diagnosis produced when the detector judges a task stuck
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StuckSignal {
    pub pattern: StuckPattern,
    pub confidence: Confidence,
    pub diagnosis: String,
    pub recommended_action: RecommendedAction,
}

impl StuckSignal {
    pub const REPETITIVE_OUTPUT_CONFIDENCE: f64 = 0.9;
    pub const CIRCULAR_TOOLS_CONFIDENCE: f64 = 0.85;
    pub const NO_PROGRESS_CONFIDENCE: f64 = 0.8;

    pub fn repetitive_output(diagnosis: impl Into<String>) -> Self {
        Self {
            pattern: StuckPattern::RepetitiveOutput,
            confidence: Confidence::new(Self::REPETITIVE_OUTPUT_CONFIDENCE),
            diagnosis: diagnosis.into(),
            recommended_action: RecommendedAction::PruneContext,
        }
    }

    pub fn circular_tools(diagnosis: impl Into<String>) -> Self {
        Self {
            pattern: StuckPattern::CircularTools,
            confidence: Confidence::new(Self::CIRCULAR_TOOLS_CONFIDENCE),
            diagnosis: diagnosis.into(),
            recommended_action: RecommendedAction::PruneContext,
        }
    }

    pub fn no_progress(diagnosis: impl Into<String>) -> Self {
        Self {
            pattern: StuckPattern::NoProgress,
            confidence: Confidence::new(Self::NO_PROGRESS_CONFIDENCE),
            diagnosis: diagnosis.into(),
            recommended_action: RecommendedAction::DecomposeTask,
        }
    }
}

impl std::fmt::Display for StuckSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (confidence {}, action {}): {}",
            self.pattern, self.confidence, self.recommended_action, self.diagnosis
        )
    }
}

/// Why a task was parked for human review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    /// A model call needed for remediation failed
    ModelUnavailable { detail: String },
    /// The planning model's output could not be turned into subtasks
    MalformedDecomposition { detail: String },
    /// Decomposing would exceed the configured depth
    DepthExceeded { depth: u32, max: u32 },
    /// Too many consecutive prunes without convergence
    RetryBudgetExceeded { count: u32, max: u32 },
    /// Task-level iteration budget exhausted
    IterationBudgetExceeded { iterations: u32, max: u32 },
    /// Per-task deadline elapsed during a blocking call
    Cancelled { detail: String },
    /// Any other failure caught at the orchestrator boundary
    Internal { detail: String },
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelUnavailable { detail } => write!(f, "model unavailable: {}", detail),
            Self::MalformedDecomposition { detail } => {
                write!(f, "malformed decomposition: {}", detail)
            }
            Self::DepthExceeded { depth, max } => {
                write!(f, "decomposition depth {} exceeds maximum {}", depth, max)
            }
            Self::RetryBudgetExceeded { count, max } => {
                write!(f, "{} consecutive prunes exceed retry budget {}", count, max)
            }
            Self::IterationBudgetExceeded { iterations, max } => {
                write!(f, "{} iterations exceed task budget {}", iterations, max)
            }
            Self::Cancelled { detail } => write!(f, "cancelled: {}", detail),
            Self::Internal { detail } => write!(f, "internal failure: {}", detail),
        }
    }
}

/// Remediation actually carried out by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTaken {
    PruneContext,
    DecomposeTask,
    Escalate,
}

impl std::fmt::Display for ActionTaken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PruneContext => write!(f, "prune_context"),
            Self::DecomposeTask => write!(f, "decompose_task"),
            Self::Escalate => write!(f, "escalate"),
        }
    }
}

/// Result of a remediation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Task retried with pruned context; `fallback` when the model could
    /// not prune and deterministic truncation was used instead
    Retried { fallback: bool },
    /// Task split into the listed subtasks
    Decomposed { subtask_ids: Vec<TaskId> },
    Escalated { reason: EscalationReason },
}

impl std::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Retried { fallback: false } => write!(f, "retried with pruned context"),
            Self::Retried { fallback: true } => write!(f, "retried with truncated context"),
            Self::Decomposed { subtask_ids } => {
                write!(f, "decomposed into {}", subtask_ids.join(", "))
            }
            Self::Escalated { reason } => write!(f, "escalated: {}", reason),
        }
    }
}

/// One entry of a task's diagnostic trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub task_id: TaskId,
    /// Signal that triggered the attempt; absent for budget/deadline escalations
    pub signal: Option<StuckSignal>,
    pub action_taken: ActionTaken,
    pub outcome: AttemptOutcome,
    pub consecutive_prune_count: u32,
    pub recorded_at: DateTime<Utc>,
}

/// Everything a reviewer needs to pick up an escalated task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationReport {
    pub task: Task,
    pub reason: EscalationReason,
    /// Signals raised for this task, in order
    pub signals: Vec<StuckSignal>,
    /// Remediations attempted for this task, in order
    pub trail: Vec<RecoveryAttempt>,
    /// Trail of ancestor tasks handled by the same orchestrator before
    /// decomposition switched it onto this task
    #[serde(default)]
    pub ancestry: Vec<RecoveryAttempt>,
    pub iterations: u32,
    pub escalated_at: DateTime<Utc>,
}

impl EscalationReport {
    /// Render the report as markdown for humans
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "# Escalated: {} ({})\n\n**Reason**: {}\n**Iterations**: {}\n**Depth**: {}\n**Escalated at**: {}\n",
            self.task.title,
            self.task.id,
            self.reason,
            self.iterations,
            self.task.decomposition_depth,
            self.escalated_at.format("%Y-%m-%d %H:%M:%S UTC"),
        );

        if !self.signals.is_empty() {
            out.push_str("\n## Signals\n\n");
            for signal in &self.signals {
                out.push_str(&format!("- {}\n", signal));
            }
        }

        for (header, attempts) in [("Trail", &self.trail), ("Ancestry", &self.ancestry)] {
            if attempts.is_empty() {
                continue;
            }
            out.push_str(&format!("\n## {}\n\n", header));
            for attempt in attempts {
                out.push_str(&format!(
                    "- [{}] {} -> {} (prunes: {})\n",
                    attempt.task_id,
                    attempt.action_taken,
                    attempt.outcome,
                    attempt.consecutive_prune_count
                ));
            }
        }

        out
    }
}

/// Kind of long-term memory frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameKind {
    Error,
    Decision,
    Observation,
    Narration,
    /// Output of an earlier summarization pass
    Digest,
}

impl FrameKind {
    /// Errors, decisions and digests must survive compaction
    pub fn is_essential(&self) -> bool {
        matches!(self, Self::Error | Self::Decision | Self::Digest)
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Decision => write!(f, "decision"),
            Self::Observation => write!(f, "observation"),
            Self::Narration => write!(f, "narration"),
            Self::Digest => write!(f, "digest"),
        }
    }
}

/// A long-term memory frame consumed by the summarizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub kind: FrameKind,
    pub content: String,
}

impl Frame {
    pub fn new(kind: FrameKind, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            content: content.into(),
        }
    }

    /// Wrap an existing summary so it can be compacted again
    pub fn digest(content: impl Into<String>) -> Self {
        Self::new(FrameKind::Digest, content)
    }
}
