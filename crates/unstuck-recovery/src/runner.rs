//! Execution loop driver
//!
//! [`RecoveryLoop`] pulls ready tasks from the queue, attempts them through
//! a [`TaskRunner`] and lets one [`RecoveryOrchestrator`] per task decide
//! what happens after each attempt. Escalated tasks are parked and the
//! loop moves on; nothing escapes as an error.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::timeout_at;
use tracing::{error, info, warn};
use unstuck_core::{
    EscalationReason, EscalationReport, IterationRecord, RecoveryConfig, Result, Task, TaskId,
    TaskStatus,
};

use crate::orchestrator::{park, RecoveryDeps, RecoveryOrchestrator, Step};

/// The external "attempt this task with this context" capability
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn attempt(&self, task: &Task, context: &str) -> Result<IterationRecord>;
}

/// How one task (and any subtask it was switched onto) ended
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Completed { task_id: TaskId, iterations: u32 },
    Escalated { report: EscalationReport },
}

/// Tasks finished by [`RecoveryLoop::run_until_idle`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopSummary {
    pub completed: Vec<TaskId>,
    pub escalated: Vec<EscalationReport>,
}

impl LoopSummary {
    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed { task_id, .. } => self.completed.push(task_id),
            TaskOutcome::Escalated { report } => self.escalated.push(report),
        }
    }
}

#[derive(Clone)]
pub struct RecoveryLoop {
    config: Arc<RecoveryConfig>,
    deps: RecoveryDeps,
    runner: Arc<dyn TaskRunner>,
}

impl RecoveryLoop {
    pub fn new(config: RecoveryConfig, deps: RecoveryDeps, runner: Arc<dyn TaskRunner>) -> Self {
        Self {
            config: Arc::new(config),
            deps,
            runner,
        }
    }

    /// Drive `task` until it is verified or escalated
    ///
    /// Attempts start from the task brief; each output is appended to the
    /// context until a prune replaces it or a decomposition switches to a
    /// subtask's brief.
    pub async fn run_task(&self, task: Task) -> TaskOutcome {
        let mut orchestrator = RecoveryOrchestrator::new(&self.config, self.deps.clone(), task);
        let mut context = orchestrator.task().brief();

        info!(task_id = %orchestrator.task().id, "Starting task");

        loop {
            let current = orchestrator.task().clone();
            let attempt = timeout_at(orchestrator.deadline(), self.runner.attempt(&current, &context)).await;

            let step = match attempt {
                Ok(Ok(record)) => {
                    append_output(&mut context, record.output_text());
                    orchestrator.observe(record, &context).await
                }
                Ok(Err(e)) => {
                    warn!(task_id = %current.id, "Task runner failed: {}", e);
                    orchestrator.fail(e.escalation_reason()).await
                }
                Err(_) => orchestrator.cancel("task deadline elapsed during attempt").await,
            };

            match step {
                Step::Continue => {}
                Step::Retry { context: pruned } => context = pruned,
                Step::Switch { task } => context = task.brief(),
                Step::Escalated { report } => return TaskOutcome::Escalated { report },
                Step::Terminated { task_id } => {
                    return TaskOutcome::Completed {
                        task_id,
                        iterations: orchestrator.iterations(),
                    }
                }
            }
        }
    }

    /// Drain the queue with up to `concurrency` tasks in flight
    ///
    /// Each task gets its own orchestrator. A driver that panics is caught
    /// at the join boundary and its task escalated.
    pub async fn run_until_idle(&self, concurrency: usize) -> LoopSummary {
        let concurrency = concurrency.max(1);
        let mut summary = LoopSummary::default();
        let mut in_flight = JoinSet::new();

        loop {
            while in_flight.len() < concurrency {
                match self.deps.queue.next_ready().await {
                    Ok(Some(task)) => {
                        let driver = self.clone();
                        in_flight.spawn(async move {
                            let handle = tokio::spawn({
                                let task = task.clone();
                                async move { driver.run_task(task).await }
                            });
                            (task, handle.await)
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to claim next task: {}", e);
                        break;
                    }
                }
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            match joined {
                Ok((_, Ok(outcome))) => summary.record(outcome),
                Ok((task, Err(join_error))) => {
                    error!(task_id = %task.id, "Task driver crashed: {}", join_error);
                    let report = self.escalate_crashed(task, join_error.to_string()).await;
                    summary.escalated.push(report);
                }
                Err(e) => error!("Task supervisor failed: {}", e),
            }
        }

        info!(
            completed = summary.completed.len(),
            escalated = summary.escalated.len(),
            "Queue drained"
        );
        summary
    }

    async fn escalate_crashed(&self, mut task: Task, detail: String) -> EscalationReport {
        task.status = TaskStatus::Escalated;
        let report = EscalationReport {
            task,
            reason: EscalationReason::Internal {
                detail: format!("task driver crashed: {}", detail),
            },
            signals: Vec::new(),
            trail: Vec::new(),
            ancestry: Vec::new(),
            iterations: 0,
            escalated_at: Utc::now(),
        };
        park(&self.deps, &report).await;
        report
    }
}

fn append_output(context: &mut String, output: &str) {
    if output.trim().is_empty() {
        return;
    }
    if !context.is_empty() {
        context.push_str("\n\n");
    }
    context.push_str(output);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemoryEventSink;
    use crate::queue::{MemoryTaskQueue, TaskQueue};
    use crate::review::{MemoryReviewQueue, ReviewQueue};
    use unstuck_core::UnstuckError;
    use unstuck_model::ScriptedModel;

    struct Fixed(fn(&Task) -> Result<IterationRecord>);

    #[async_trait]
    impl TaskRunner for Fixed {
        async fn attempt(&self, task: &Task, _context: &str) -> Result<IterationRecord> {
            if task.id == "T-panic" {
                panic!("runner bug");
            }
            (self.0)(task)
        }
    }

    fn deps(queue: Arc<MemoryTaskQueue>, review: Arc<MemoryReviewQueue>) -> RecoveryDeps {
        RecoveryDeps {
            compression: Arc::new(ScriptedModel::new("compression")),
            planning: Arc::new(ScriptedModel::new("planning")),
            queue,
            review,
            events: Arc::new(MemoryEventSink::new()),
        }
    }

    #[test]
    fn test_append_output() {
        let mut context = String::from("brief");
        append_output(&mut context, "first");
        append_output(&mut context, "  ");
        assert_eq!(context, "brief\n\nfirst");
    }

    #[tokio::test]
    async fn test_runner_error_escalates_internal() {
        let queue = Arc::new(MemoryTaskQueue::with_tasks(vec![Task::new("T-1", "t")]));
        let review = Arc::new(MemoryReviewQueue::new());
        let driver = RecoveryLoop::new(
            RecoveryConfig::default(),
            deps(queue.clone(), review.clone()),
            Arc::new(Fixed(|_| Err(UnstuckError::Other("sandbox died".into())))),
        );

        let outcome = driver.run_task(Task::new("T-1", "t")).await;
        let TaskOutcome::Escalated { report } = outcome else {
            panic!("expected escalation");
        };
        assert!(matches!(report.reason, EscalationReason::Internal { .. }));
        assert_eq!(review.load("T-1").await.unwrap().task.id, "T-1");
        assert_eq!(queue.get("T-1").await.unwrap().status, TaskStatus::Escalated);
    }

    #[tokio::test]
    async fn test_panicking_driver_is_escalated_and_loop_continues() {
        let queue = Arc::new(MemoryTaskQueue::with_tasks(vec![
            Task::new("T-panic", "explodes"),
            Task::new("T-2", "fine"),
        ]));
        let review = Arc::new(MemoryReviewQueue::new());
        let driver = RecoveryLoop::new(
            RecoveryConfig::default(),
            deps(queue.clone(), review.clone()),
            Arc::new(Fixed(|task| Ok(IterationRecord::new(task.id.clone(), "done").verified()))),
        );

        let summary = driver.run_until_idle(1).await;
        assert_eq!(summary.completed, vec!["T-2".to_string()]);
        assert_eq!(summary.escalated.len(), 1);
        assert_eq!(summary.escalated[0].task.id, "T-panic");
        assert_eq!(queue.get("T-panic").await.unwrap().status, TaskStatus::Escalated);
        assert_eq!(queue.get("T-2").await.unwrap().status, TaskStatus::Done);
    }
}
