//! Recovery orchestrator
//!
//! Owns one in-flight task: its detector, retry counters and diagnostic
//! trail. Each completed attempt is fed to [`RecoveryOrchestrator::observe`],
//! which turns it into a state machine event, carries out the resulting
//! actions and tells the caller what to do next.
//!
//! Model calls run under the per-task deadline. Nothing here returns an
//! error: every failure ends in an escalation with the trail attached.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};
use unstuck_core::fail_open::{fail_open, fail_open_with_retries};
use unstuck_core::{
    ActionTaken, AttemptOutcome, EscalationReason, EscalationReport, IterationRecord,
    RecoveryAttempt, RecoveryConfig, Result, StuckSignal, Task, TaskId, TaskStatus,
};
use unstuck_detect::{Detection, DetectorConfig, StuckDetector};
use unstuck_model::CompletionModel;

use crate::decomposer::TaskDecomposer;
use crate::events::{EventSink, RecoveryEvent};
use crate::pruner::ContextPruner;
use crate::queue::TaskQueue;
use crate::review::ReviewQueue;
use crate::state_machine::{transition, Action, Event, Limits, State};

/// Attempts made to park a report before giving up on the review queue
const PARK_ATTEMPTS: usize = 3;

/// External collaborators shared by every orchestrator
#[derive(Clone)]
pub struct RecoveryDeps {
    /// Used for pruning and summarization
    pub compression: Arc<dyn CompletionModel>,
    /// Used for decomposition
    pub planning: Arc<dyn CompletionModel>,
    pub queue: Arc<dyn TaskQueue>,
    pub review: Arc<dyn ReviewQueue>,
    pub events: Arc<dyn EventSink>,
}

/// What the execution loop should do after an attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Keep attempting the current task with the current context
    Continue,
    /// Retry the current task with this pruned context
    Retry { context: String },
    /// The task was decomposed; continue on this subtask
    Switch { task: Task },
    /// The task was parked for review
    Escalated { report: EscalationReport },
    /// The task's acceptance criteria were verified
    Terminated { task_id: TaskId },
}

/// Per-task recovery driver
pub struct RecoveryOrchestrator {
    deps: RecoveryDeps,
    detector_config: DetectorConfig,
    limits: Limits,
    max_task_iterations: u32,
    task_timeout: Duration,
    pruner: ContextPruner,
    decomposer: TaskDecomposer,

    task: Task,
    state: State,
    detector: StuckDetector,
    deadline: Instant,
    iterations: u32,
    active_signal: Option<StuckSignal>,
    signals: Vec<StuckSignal>,
    trail: Vec<RecoveryAttempt>,
    ancestry: Vec<RecoveryAttempt>,
    report: Option<EscalationReport>,
}

impl RecoveryOrchestrator {
    pub fn new(config: &RecoveryConfig, deps: RecoveryDeps, task: Task) -> Self {
        let detector_config = DetectorConfig::from(config);
        let detector = StuckDetector::new(task.id.clone(), detector_config.clone());
        let pruner = ContextPruner::new(deps.compression.clone(), config.max_pruned_tokens);
        let decomposer = TaskDecomposer::new(
            deps.planning.clone(),
            config.max_subtasks,
            config.max_decomposition_depth,
        );
        let task_timeout = config.task_timeout();

        Self {
            deps,
            detector_config,
            limits: Limits {
                max_prune_retries: config.max_prune_retries,
            },
            max_task_iterations: config.max_task_iterations,
            task_timeout,
            pruner,
            decomposer,
            task,
            state: State::initial(),
            detector,
            deadline: Instant::now() + task_timeout,
            iterations: 0,
            active_signal: None,
            signals: Vec::new(),
            trail: Vec::new(),
            ancestry: Vec::new(),
            report: None,
        }
    }

    /// Override the per-task timeout, restarting the deadline from now
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self.deadline = Instant::now() + timeout;
        self
    }

    /// Task currently being driven (a subtask after decomposition)
    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    /// Attempts observed for the current task
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn trail(&self) -> &[RecoveryAttempt] {
        &self.trail
    }

    pub fn signals(&self) -> &[StuckSignal] {
        &self.signals
    }

    /// Feed one completed attempt; `context` is what the next attempt would use
    pub async fn observe(&mut self, record: IterationRecord, context: &str) -> Step {
        if let Some(step) = self.terminal_step() {
            return step;
        }

        if record.task_id() != self.task.id {
            warn!(
                task_id = %self.task.id,
                record_task = %record.task_id(),
                "Ignoring iteration record for another task"
            );
            return Step::Continue;
        }

        self.iterations += 1;

        let event = if record.success() {
            Event::Verified
        } else if self.iterations > self.max_task_iterations {
            Event::IterationBudgetExceeded {
                iterations: self.iterations,
                max: self.max_task_iterations,
            }
        } else if Instant::now() >= self.deadline {
            Event::Failed {
                reason: cancelled("task deadline elapsed"),
            }
        } else {
            match self.detector.observe(record) {
                Detection::Stuck { signal } => {
                    self.deps
                        .events
                        .emit(RecoveryEvent::SignalRaised {
                            task_id: self.task.id.clone(),
                            signal: signal.clone(),
                        })
                        .await;
                    self.signals.push(signal.clone());
                    Event::Stuck { signal }
                }
                Detection::Ambiguous { near_misses } => {
                    debug!(task_id = %self.task.id, count = near_misses.len(), "Ambiguous detection");
                    self.deps
                        .events
                        .emit(RecoveryEvent::DetectionAmbiguous {
                            task_id: self.task.id.clone(),
                            near_misses,
                        })
                        .await;
                    return Step::Continue;
                }
                Detection::Clear => Event::Clear,
                Detection::Insufficient { .. } => return Step::Continue,
            }
        };

        self.drive(event, context).await
    }

    /// Escalate the current task with `reason` (runner failure, shutdown)
    pub async fn fail(&mut self, reason: EscalationReason) -> Step {
        if let Some(step) = self.terminal_step() {
            return step;
        }
        self.drive(Event::Failed { reason }, "").await
    }

    /// Escalate the current task as cancelled
    pub async fn cancel(&mut self, detail: impl Into<String>) -> Step {
        self.fail(cancelled(detail)).await
    }

    fn terminal_step(&self) -> Option<Step> {
        match &self.state {
            State::Terminated => Some(Step::Terminated {
                task_id: self.task.id.clone(),
            }),
            State::Escalated { reason } => Some(Step::Escalated {
                report: self
                    .report
                    .clone()
                    .unwrap_or_else(|| self.build_report(reason.clone())),
            }),
            _ => None,
        }
    }

    /// Run events through the state machine until no follow-up event remains
    async fn drive(&mut self, event: Event, context: &str) -> Step {
        let mut step = Step::Continue;
        let mut next = Some(event);
        let mut pruned: Option<String> = None;
        let mut inserted: Vec<Task> = Vec::new();

        while let Some(event) = next.take() {
            if let Event::Stuck { signal } = &event {
                self.active_signal = Some(signal.clone());
            }

            // Subtasks must reach the queue before the trail records the split
            let event = match event {
                Event::DecompositionSucceeded { subtasks } => {
                    match self.insert_subtasks(subtasks).await {
                        Ok(subtasks) => Event::DecompositionSucceeded { subtasks },
                        Err(e) => {
                            warn!(task_id = %self.task.id, "Subtask insertion failed: {}", e);
                            Event::Failed {
                                reason: e.escalation_reason(),
                            }
                        }
                    }
                }
                other => other,
            };

            let from = self.state.clone();
            let (to, actions) = transition(from.clone(), event.clone(), self.limits);
            self.state = to.clone();

            let attempt = self.attempt_for(&from, &event, &to);
            if let Some(attempt) = &attempt {
                self.trail.push(attempt.clone());
            }
            if from.name() != to.name() || attempt.is_some() {
                let action = attempt.as_ref().map(|a| a.action_taken).or(match to {
                    State::Pruning { .. } => Some(ActionTaken::PruneContext),
                    State::Decomposing { .. } => Some(ActionTaken::DecomposeTask),
                    _ => None,
                });
                self.deps
                    .events
                    .emit(RecoveryEvent::Transition {
                        task_id: self.task.id.clone(),
                        from: from.name().to_string(),
                        to: to.name().to_string(),
                        action,
                        outcome: attempt.map(|a| a.outcome),
                    })
                    .await;
            }

            for action in actions {
                match action {
                    Action::RunPruner { signal } => {
                        let (event, context) = self.run_pruner(&signal, context).await;
                        pruned = context;
                        next = Some(event);
                    }
                    Action::RunDecomposer { signal } => {
                        next = Some(self.run_decomposer(&signal).await);
                    }
                    Action::ResetWindow => self.detector.reset(),
                    Action::RetryWithPrunedContext => {
                        step = Step::Retry {
                            context: pruned.take().unwrap_or_default(),
                        };
                    }
                    // Inserted before the transition ran
                    Action::InsertSubtasks { subtasks } => inserted = subtasks,
                    Action::SwitchTask { task_id } => {
                        match inserted.iter().find(|t| t.id == task_id).cloned() {
                            Some(subtask) => {
                                self.switch_to(subtask);
                                step = Step::Switch {
                                    task: self.task.clone(),
                                };
                            }
                            None => {
                                next = Some(Event::Failed {
                                    reason: EscalationReason::Internal {
                                        detail: format!("subtask {} was not inserted", task_id),
                                    },
                                });
                                break;
                            }
                        }
                    }
                    Action::MarkDone => {
                        self.mark_done().await;
                        step = Step::Terminated {
                            task_id: self.task.id.clone(),
                        };
                    }
                    Action::Escalate { reason } => {
                        step = Step::Escalated {
                            report: self.escalate(reason).await,
                        };
                    }
                }
            }
        }

        step
    }

    async fn run_pruner(&self, signal: &StuckSignal, context: &str) -> (Event, Option<String>) {
        match timeout_at(self.deadline, self.pruner.prune_detailed(context, signal, &self.task)).await {
            Ok(outcome) => {
                info!(
                    task_id = %self.task.id,
                    fallback = outcome.fallback,
                    prune_count = self.state.prune_count(),
                    "Context pruned"
                );
                (
                    Event::PruneApplied {
                        fallback: outcome.fallback,
                    },
                    Some(outcome.context),
                )
            }
            Err(_) => (
                Event::Failed {
                    reason: cancelled("task deadline elapsed while pruning"),
                },
                None,
            ),
        }
    }

    async fn run_decomposer(&self, signal: &StuckSignal) -> Event {
        match timeout_at(self.deadline, self.decomposer.decompose(&self.task, signal)).await {
            Ok(Ok(subtasks)) => Event::DecompositionSucceeded { subtasks },
            Ok(Err(e)) => {
                warn!(task_id = %self.task.id, "Decomposition failed: {}", e);
                Event::DecompositionFailed {
                    reason: e.escalation_reason(),
                }
            }
            Err(_) => Event::Failed {
                reason: cancelled("task deadline elapsed while decomposing"),
            },
        }
    }

    /// Insert subtasks ahead of the current task and mark it decomposed
    ///
    /// The first subtask is inserted already `Running` so no other driver
    /// can claim it before this orchestrator switches to it.
    async fn insert_subtasks(&mut self, mut subtasks: Vec<Task>) -> Result<Vec<Task>> {
        if let Some(first) = subtasks.first_mut() {
            first.status = TaskStatus::Running;
        }

        self.deps
            .queue
            .insert_subtasks(&self.task.id, subtasks.clone())
            .await?;
        self.deps
            .queue
            .set_status(&self.task.id, TaskStatus::Decomposed)
            .await?;
        self.task.status = TaskStatus::Decomposed;

        info!(
            task_id = %self.task.id,
            subtasks = ?subtasks.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            "Subtasks inserted"
        );
        Ok(subtasks)
    }

    /// Continue on `subtask` with fresh counters, window and trail
    fn switch_to(&mut self, subtask: Task) {
        info!(from = %self.task.id, to = %subtask.id, "Switching to subtask");

        self.ancestry.append(&mut self.trail);
        self.signals.clear();
        self.active_signal = None;
        self.iterations = 0;
        self.deadline = Instant::now() + self.task_timeout;
        self.detector = StuckDetector::new(subtask.id.clone(), self.detector_config.clone());
        self.task = subtask;
    }

    async fn mark_done(&mut self) {
        self.task.status = TaskStatus::Done;
        info!(task_id = %self.task.id, iterations = self.iterations, "Task verified");

        let queue = &self.deps.queue;
        let task_id = &self.task.id;
        fail_open("orchestrator::mark_done", || async {
            queue.set_status(task_id, TaskStatus::Done).await
        })
        .await;
    }

    async fn escalate(&mut self, reason: EscalationReason) -> EscalationReport {
        self.task.status = TaskStatus::Escalated;
        let report = self.build_report(reason);

        warn!(
            task_id = %self.task.id,
            reason = %report.reason,
            iterations = self.iterations,
            "Escalating task for human review"
        );
        park(&self.deps, &report).await;

        self.report = Some(report.clone());
        report
    }

    fn build_report(&self, reason: EscalationReason) -> EscalationReport {
        EscalationReport {
            task: self.task.clone(),
            reason,
            signals: self.signals.clone(),
            trail: self.trail.clone(),
            ancestry: self.ancestry.clone(),
            iterations: self.iterations,
            escalated_at: Utc::now(),
        }
    }

    /// Trail entry for a transition that completed a remediation
    fn attempt_for(&self, from: &State, event: &Event, to: &State) -> Option<RecoveryAttempt> {
        let (action_taken, outcome) = match (from, event, to) {
            (_, _, State::Escalated { reason }) => (
                ActionTaken::Escalate,
                AttemptOutcome::Escalated {
                    reason: reason.clone(),
                },
            ),
            (State::Pruning { .. }, Event::PruneApplied { fallback }, State::Running { .. }) => (
                ActionTaken::PruneContext,
                AttemptOutcome::Retried {
                    fallback: *fallback,
                },
            ),
            (State::Decomposing { .. }, Event::DecompositionSucceeded { subtasks }, State::Running { .. }) => (
                ActionTaken::DecomposeTask,
                AttemptOutcome::Decomposed {
                    subtask_ids: subtasks.iter().map(|t| t.id.clone()).collect(),
                },
            ),
            _ => return None,
        };

        let signal_driven = matches!(event, Event::Stuck { .. })
            || matches!(from, State::Pruning { .. } | State::Decomposing { .. });

        Some(RecoveryAttempt {
            task_id: self.task.id.clone(),
            signal: if signal_driven {
                self.active_signal.clone()
            } else {
                None
            },
            action_taken,
            outcome,
            consecutive_prune_count: from.prune_count(),
            recorded_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("task", &self.task.id)
            .field("state", &self.state)
            .field("iterations", &self.iterations)
            .field("trail", &self.trail.len())
            .finish()
    }
}

fn cancelled(detail: impl Into<String>) -> EscalationReason {
    EscalationReason::Cancelled {
        detail: detail.into(),
    }
}

/// Mark the report's task escalated and park it for review, fail-open
pub(crate) async fn park(deps: &RecoveryDeps, report: &EscalationReport) {
    let queue = &deps.queue;
    let review = &deps.review;
    let task_id = &report.task.id;

    fail_open("orchestrator::set_escalated", || async {
        queue.set_status(task_id, TaskStatus::Escalated).await
    })
    .await;
    fail_open_with_retries(
        "orchestrator::park",
        || async { review.park(report.clone()).await },
        PARK_ATTEMPTS,
    )
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventSink;
    use crate::queue::MemoryTaskQueue;
    use crate::review::MemoryReviewQueue;
    use unstuck_model::{ModelError, ScriptedModel};

    struct Harness {
        compression: Arc<ScriptedModel>,
        planning: Arc<ScriptedModel>,
        queue: Arc<MemoryTaskQueue>,
        review: Arc<MemoryReviewQueue>,
        events: Arc<MemoryEventSink>,
    }

    impl Harness {
        fn new(task: &Task) -> Self {
            Self {
                compression: Arc::new(ScriptedModel::new("compression")),
                planning: Arc::new(ScriptedModel::new("planning")),
                queue: Arc::new(MemoryTaskQueue::with_tasks(vec![task
                    .clone()
                    .with_status(TaskStatus::Running)])),
                review: Arc::new(MemoryReviewQueue::new()),
                events: Arc::new(MemoryEventSink::new()),
            }
        }

        fn deps(&self) -> RecoveryDeps {
            RecoveryDeps {
                compression: self.compression.clone(),
                planning: self.planning.clone(),
                queue: self.queue.clone(),
                review: self.review.clone(),
                events: self.events.clone(),
            }
        }

        fn orchestrator(&self, task: Task) -> RecoveryOrchestrator {
            RecoveryOrchestrator::new(&RecoveryConfig::default(), self.deps(), task)
        }
    }

    fn task() -> Task {
        Task::new("T-1", "Implement parser").with_acceptance_criteria(["parses 1+2"])
    }

    /// Touches no files; output differs every call
    fn idle(task_id: &str) -> IterationRecord {
        IterationRecord::new(task_id, distinct_output(task_id))
    }

    fn repeated(task_id: &str) -> IterationRecord {
        IterationRecord::new(task_id, "error[E0382]: borrow of moved value `tokens`")
            .with_file("src/parser.rs")
    }

    fn distinct_output(seed: &str) -> String {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("attempt {} alpha{} beta{} gamma{}", seed, n, n * 7, n * 13)
    }

    #[tokio::test]
    async fn test_prune_retry_returns_pruned_context() {
        let task = task();
        let harness = Harness::new(&task);
        harness.compression.push_response("E0382 at src/parser.rs:40");
        let mut orchestrator = harness.orchestrator(task);

        let mut last = Step::Continue;
        for _ in 0..5 {
            last = orchestrator.observe(repeated("T-1"), "long context").await;
        }

        assert_eq!(
            last,
            Step::Retry {
                context: "E0382 at src/parser.rs:40".to_string()
            }
        );
        assert_eq!(orchestrator.state(), &State::Running { prune_count: 1 });
        assert_eq!(orchestrator.trail().len(), 1);
        assert_eq!(orchestrator.trail()[0].outcome, AttemptOutcome::Retried { fallback: false });
        assert!(orchestrator.trail()[0].signal.is_some());
        assert_eq!(orchestrator.signals().len(), 1);
    }

    #[tokio::test]
    async fn test_verified_record_terminates() {
        let task = task();
        let harness = Harness::new(&task);
        let mut orchestrator = harness.orchestrator(task);

        let step = orchestrator
            .observe(IterationRecord::new("T-1", "all green").verified(), "")
            .await;
        assert_eq!(
            step,
            Step::Terminated {
                task_id: "T-1".to_string()
            }
        );
        assert_eq!(harness.queue.get("T-1").await.unwrap().status, TaskStatus::Done);

        // Terminal: further records change nothing
        let again = orchestrator.observe(repeated("T-1"), "").await;
        assert!(matches!(again, Step::Terminated { .. }));
        assert_eq!(orchestrator.iterations(), 1);
    }

    #[tokio::test]
    async fn test_decomposition_switches_to_first_subtask() {
        let task = task();
        let harness = Harness::new(&task);
        harness.planning.push_response(
            r#"{"subtasks": [
                {"title": "Lexer", "description": "Tokenize", "acceptance_criteria": ["lexes"]},
                {"title": "Parser", "description": "Parse tokens", "acceptance_criteria": ["parses"]}
            ]}"#,
        );
        let mut orchestrator = harness.orchestrator(task);

        let mut last = Step::Continue;
        for _ in 0..5 {
            last = orchestrator.observe(idle("T-1"), "ctx").await;
        }

        let Step::Switch { task: subtask } = last else {
            panic!("expected switch, got {:?}", last);
        };
        assert_eq!(subtask.id, "T-1.1");
        assert_eq!(orchestrator.task().id, "T-1.1");
        assert_eq!(orchestrator.iterations(), 0);
        assert!(orchestrator.trail().is_empty());
        assert_eq!(orchestrator.state(), &State::initial());

        assert_eq!(harness.queue.order().await, vec!["T-1.1", "T-1.2", "T-1"]);
        assert_eq!(harness.queue.get("T-1").await.unwrap().status, TaskStatus::Decomposed);
        assert_eq!(harness.queue.get("T-1.1").await.unwrap().status, TaskStatus::Running);
        assert_eq!(harness.queue.get("T-1.2").await.unwrap().status, TaskStatus::Ready);
    }

    #[tokio::test]
    async fn test_escalation_carries_ancestry() {
        let task = task().with_depth(1);
        let harness = Harness::new(&task);
        harness.planning.push_response(
            r#"[{"title": "A", "description": "a", "acceptance_criteria": ["a"]},
                {"title": "B", "description": "b", "acceptance_criteria": ["b"]}]"#,
        );
        let mut orchestrator = harness.orchestrator(task);

        for _ in 0..5 {
            orchestrator.observe(idle("T-1"), "ctx").await;
        }
        assert_eq!(orchestrator.task().decomposition_depth, 2);

        // Subtask at max depth stalls too: refusal escalates
        let mut last = Step::Continue;
        for _ in 0..5 {
            last = orchestrator.observe(idle("T-1.1"), "ctx").await;
        }

        let Step::Escalated { report } = last else {
            panic!("expected escalation, got {:?}", last);
        };
        assert_eq!(report.task.id, "T-1.1");
        assert_eq!(report.reason, EscalationReason::DepthExceeded { depth: 3, max: 2 });
        assert_eq!(report.ancestry.len(), 1);
        assert_eq!(report.ancestry[0].action_taken, ActionTaken::DecomposeTask);
        assert_eq!(report.trail.last().map(|a| a.action_taken), Some(ActionTaken::Escalate));
        assert_eq!(harness.planning.call_count(), 1);
        assert_eq!(harness.review.load("T-1.1").await.unwrap().reason, report.reason);
        assert_eq!(harness.queue.get("T-1.1").await.unwrap().status, TaskStatus::Escalated);
    }

    #[tokio::test]
    async fn test_iteration_budget_escalates() {
        let task = task();
        let harness = Harness::new(&task);
        let config = RecoveryConfig {
            max_task_iterations: 3,
            ..RecoveryConfig::default()
        };
        let mut orchestrator = RecoveryOrchestrator::new(&config, harness.deps(), task);

        for _ in 0..3 {
            assert_eq!(orchestrator.observe(idle("T-1"), "").await, Step::Continue);
        }
        let step = orchestrator.observe(idle("T-1"), "").await;

        let Step::Escalated { report } = step else {
            panic!("expected escalation");
        };
        assert_eq!(
            report.reason,
            EscalationReason::IterationBudgetExceeded { iterations: 4, max: 3 }
        );
        assert!(report.trail[0].signal.is_none());
    }

    #[tokio::test]
    async fn test_deadline_during_decomposition_escalates_cancelled() {
        let task = task();
        let harness = Harness::new(&task);
        let planning = Arc::new(
            ScriptedModel::new("planning")
                .with_delay(Duration::from_secs(5))
                .with_failure(ModelError::Unavailable("never reached".into())),
        );
        let deps = RecoveryDeps {
            planning,
            ..harness.deps()
        };
        let mut orchestrator = RecoveryOrchestrator::new(&RecoveryConfig::default(), deps, task)
            .with_timeout(Duration::from_secs(60));

        for _ in 0..4 {
            orchestrator.observe(idle("T-1"), "").await;
        }
        orchestrator.deadline = Instant::now() + Duration::from_millis(50);
        let step = orchestrator.observe(idle("T-1"), "").await;

        let Step::Escalated { report } = step else {
            panic!("expected escalation, got {:?}", step);
        };
        assert!(matches!(report.reason, EscalationReason::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_foreign_records_ignored() {
        let task = task();
        let harness = Harness::new(&task);
        let mut orchestrator = harness.orchestrator(task);

        let step = orchestrator
            .observe(IterationRecord::new("T-9", "done").verified(), "")
            .await;
        assert_eq!(step, Step::Continue);

        // Foreign records never count against this task's budget
        for _ in 0..20 {
            assert_eq!(orchestrator.observe(repeated("T-9"), "").await, Step::Continue);
        }
        assert_eq!(orchestrator.iterations(), 0);
        assert_eq!(orchestrator.state(), &State::initial());
        assert!(harness.review.is_empty().await);
    }

    #[tokio::test]
    async fn test_failed_insertion_leaves_no_decomposed_entry() {
        let task = task();
        let harness = Harness::new(&task);
        harness.planning.push_response(
            r#"[{"title": "A", "description": "a", "acceptance_criteria": ["a"]},
                {"title": "B", "description": "b", "acceptance_criteria": ["b"]}]"#,
        );
        let queue = Arc::new(MemoryTaskQueue::new());
        let deps = RecoveryDeps {
            queue: queue.clone(),
            ..harness.deps()
        };
        let mut orchestrator = RecoveryOrchestrator::new(&RecoveryConfig::default(), deps, task);

        let mut last = Step::Continue;
        for _ in 0..5 {
            last = orchestrator.observe(idle("T-1"), "ctx").await;
        }

        let Step::Escalated { report } = last else {
            panic!("expected escalation, got {:?}", last);
        };
        assert!(matches!(report.reason, EscalationReason::Internal { .. }));
        assert_eq!(report.task.id, "T-1");
        assert_eq!(report.trail.len(), 1);
        assert_eq!(report.trail[0].action_taken, ActionTaken::Escalate);
        assert!(report.trail[0].signal.is_some());
        assert!(report
            .trail
            .iter()
            .all(|a| !matches!(a.outcome, AttemptOutcome::Decomposed { .. })));
        assert!(queue.tasks().await.is_empty());

        let transitions: Vec<(String, String)> = harness
            .events
            .events()
            .iter()
            .filter_map(|e| match e {
                RecoveryEvent::Transition { from, to, .. } => Some((from.clone(), to.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                ("running".to_string(), "decomposing".to_string()),
                ("decomposing".to_string(), "escalated".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_deadline_during_pruning_escalates_cancelled() {
        let task = task();
        let harness = Harness::new(&task);
        let compression =
            Arc::new(ScriptedModel::new("compression").with_delay(Duration::from_secs(5)));
        compression.push_response("never reached");
        let deps = RecoveryDeps {
            compression,
            ..harness.deps()
        };
        let mut orchestrator = RecoveryOrchestrator::new(&RecoveryConfig::default(), deps, task)
            .with_timeout(Duration::from_secs(60));

        for _ in 0..4 {
            orchestrator.observe(repeated("T-1"), "ctx").await;
        }
        orchestrator.deadline = Instant::now() + Duration::from_millis(50);
        let step = orchestrator.observe(repeated("T-1"), "ctx").await;

        let Step::Escalated { report } = step else {
            panic!("expected escalation, got {:?}", step);
        };
        let EscalationReason::Cancelled { detail } = &report.reason else {
            panic!("expected cancellation, got {:?}", report.reason);
        };
        assert!(detail.contains("pruning"));
        assert!(report.trail.iter().all(|a| a.action_taken == ActionTaken::Escalate));
        assert_eq!(harness.review.len().await, 1);
    }

    #[tokio::test]
    async fn test_clear_after_prune_emits_no_transition() {
        let task = task();
        let harness = Harness::new(&task);
        harness.compression.push_response("pruned");
        let mut orchestrator = harness.orchestrator(task);

        for _ in 0..5 {
            orchestrator.observe(repeated("T-1"), "ctx").await;
        }
        assert_eq!(orchestrator.state(), &State::Running { prune_count: 1 });

        for _ in 0..5 {
            let progress = IterationRecord::new("T-1", distinct_output("T-1")).with_file("src/parser.rs");
            assert_eq!(orchestrator.observe(progress, "ctx").await, Step::Continue);
        }
        assert_eq!(orchestrator.state(), &State::initial());

        let transitions = harness
            .events
            .events()
            .iter()
            .filter(|e| matches!(e, RecoveryEvent::Transition { .. }))
            .count();
        assert_eq!(transitions, 2);
    }

    #[tokio::test]
    async fn test_events_emitted_per_signal_and_transition() {
        let task = task();
        let harness = Harness::new(&task);
        harness.compression.push_response("pruned");
        let mut orchestrator = harness.orchestrator(task);

        for _ in 0..5 {
            orchestrator.observe(repeated("T-1"), "ctx").await;
        }

        let events = harness.events.events();
        assert!(matches!(events[0], RecoveryEvent::SignalRaised { .. }));
        let transitions: Vec<(String, String)> = events
            .iter()
            .filter_map(|e| match e {
                RecoveryEvent::Transition { from, to, .. } => Some((from.clone(), to.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                ("running".to_string(), "pruning".to_string()),
                ("pruning".to_string(), "running".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_cancel_parks_task() {
        let task = task();
        let harness = Harness::new(&task);
        let mut orchestrator = harness.orchestrator(task);

        let step = orchestrator.cancel("shutdown").await;
        assert!(matches!(step, Step::Escalated { .. }));
        assert_eq!(harness.review.len().await, 1);
    }
}
