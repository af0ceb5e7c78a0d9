//! Pure state machine for recovery control flow
//!
//! `transition(state, event, limits) -> (state, actions)` with no I/O. The
//! orchestrator feeds it events and carries out the actions it returns.
//!
//! - Retry budgets live in the state, so every path is bounded
//! - Invalid events escalate instead of panicking
//! - Terminal states absorb every event

use serde::Serialize;
use unstuck_core::{EscalationReason, RecommendedAction, StuckSignal, Task, TaskId};

/// Recovery state for the current task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum State {
    /// Executing attempts; `prune_count` consecutive prunes so far
    Running { prune_count: u32 },
    /// Pruner running for the `prune_count`-th consecutive time
    Pruning { prune_count: u32 },
    /// Decomposer running
    Decomposing { prune_count: u32 },
    /// Parked for human review (terminal)
    Escalated { reason: EscalationReason },
    /// Acceptance criteria verified (terminal)
    Terminated,
}

impl State {
    /// Initial state for a fresh task
    pub fn initial() -> Self {
        Self::Running { prune_count: 0 }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Escalated { .. } | Self::Terminated)
    }

    pub fn prune_count(&self) -> u32 {
        match self {
            Self::Running { prune_count }
            | Self::Pruning { prune_count }
            | Self::Decomposing { prune_count } => *prune_count,
            Self::Escalated { .. } | Self::Terminated => 0,
        }
    }

    /// Short name for logs and events
    pub fn name(&self) -> &'static str {
        match self {
            Self::Running { .. } => "running",
            Self::Pruning { .. } => "pruning",
            Self::Decomposing { .. } => "decomposing",
            Self::Escalated { .. } => "escalated",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Detector raised a signal
    Stuck { signal: StuckSignal },
    /// Full window evaluated with nothing wrong
    Clear,
    /// Pruner finished; `fallback` when truncation replaced the model
    PruneApplied { fallback: bool },
    /// Decomposer produced validated subtasks
    DecompositionSucceeded { subtasks: Vec<Task> },
    /// Decomposer refused or failed
    DecompositionFailed { reason: EscalationReason },
    /// Task-level iteration budget spent
    IterationBudgetExceeded { iterations: u32, max: u32 },
    /// An attempt passed acceptance verification
    Verified,
    /// Unrecoverable failure (deadline, internal error)
    Failed { reason: EscalationReason },
}

/// Side effects requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Run the context pruner for this signal
    RunPruner { signal: StuckSignal },
    /// Run the task decomposer for this signal
    RunDecomposer { signal: StuckSignal },
    /// Clear the history window
    ResetWindow,
    /// Retry the current task with the pruned context
    RetryWithPrunedContext,
    /// Insert subtasks ahead of the parent and mark it decomposed
    InsertSubtasks { subtasks: Vec<Task> },
    /// Continue on another task with fresh counters and trail
    SwitchTask { task_id: TaskId },
    /// Mark the current task done
    MarkDone,
    /// Park the current task for review
    Escalate { reason: EscalationReason },
}

/// Budgets the transition function enforces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_prune_retries: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_prune_retries: 2,
        }
    }
}

fn escalate(reason: EscalationReason) -> (State, Vec<Action>) {
    (
        State::Escalated {
            reason: reason.clone(),
        },
        vec![Action::Escalate { reason }],
    )
}

/// Pure state transition function
///
/// Deterministic and side-effect free. Never panics: events that make no
/// sense in the current state escalate with an internal reason.
pub fn transition(state: State, event: Event, limits: Limits) -> (State, Vec<Action>) {
    match (state, event) {
        // Terminal states absorb everything
        (state @ State::Escalated { .. }, _) | (state @ State::Terminated, _) => (state, vec![]),

        // Budgets and failures from any live state
        (_, Event::IterationBudgetExceeded { iterations, max }) => {
            escalate(EscalationReason::IterationBudgetExceeded { iterations, max })
        }
        (_, Event::Failed { reason }) => escalate(reason),

        // From Running
        (State::Running { prune_count }, Event::Stuck { signal }) => match signal.recommended_action {
            RecommendedAction::PruneContext => {
                let next = prune_count + 1;
                if next > limits.max_prune_retries {
                    escalate(EscalationReason::RetryBudgetExceeded {
                        count: next,
                        max: limits.max_prune_retries,
                    })
                } else {
                    (State::Pruning { prune_count: next }, vec![Action::RunPruner { signal }])
                }
            }
            RecommendedAction::DecomposeTask => (
                State::Decomposing { prune_count },
                vec![Action::RunDecomposer { signal }],
            ),
        },

        (State::Running { .. }, Event::Clear) => (State::Running { prune_count: 0 }, vec![]),

        (State::Running { .. }, Event::Verified) => (State::Terminated, vec![Action::MarkDone]),

        // From Pruning
        (State::Pruning { prune_count }, Event::PruneApplied { fallback }) => {
            if fallback && prune_count + 1 > limits.max_prune_retries {
                escalate(EscalationReason::RetryBudgetExceeded {
                    count: prune_count + 1,
                    max: limits.max_prune_retries,
                })
            } else {
                (
                    State::Running { prune_count },
                    vec![Action::ResetWindow, Action::RetryWithPrunedContext],
                )
            }
        }

        // From Decomposing
        (State::Decomposing { .. }, Event::DecompositionSucceeded { subtasks }) => {
            match subtasks.first().map(|t| t.id.clone()) {
                Some(task_id) => (
                    State::initial(),
                    vec![
                        Action::InsertSubtasks { subtasks },
                        Action::SwitchTask { task_id },
                        Action::ResetWindow,
                    ],
                ),
                None => escalate(EscalationReason::MalformedDecomposition {
                    detail: "decomposition produced no subtasks".to_string(),
                }),
            }
        }

        (State::Decomposing { .. }, Event::DecompositionFailed { reason }) => escalate(reason),

        // Everything else is a driver bug
        (state, event) => escalate(EscalationReason::Internal {
            detail: format!("invalid transition: {} cannot handle {:?}", state, event),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prune_signal() -> StuckSignal {
        StuckSignal::repetitive_output("same output")
    }

    fn decompose_signal() -> StuckSignal {
        StuckSignal::no_progress("no files touched")
    }

    fn stuck(signal: StuckSignal) -> Event {
        Event::Stuck { signal }
    }

    fn limits() -> Limits {
        Limits::default()
    }

    #[test]
    fn test_prune_cycle_returns_to_running() {
        let (state, actions) = transition(State::initial(), stuck(prune_signal()), limits());
        assert_eq!(state, State::Pruning { prune_count: 1 });
        assert!(matches!(actions[0], Action::RunPruner { .. }));

        let (state, actions) = transition(state, Event::PruneApplied { fallback: false }, limits());
        assert_eq!(state, State::Running { prune_count: 1 });
        assert_eq!(actions, vec![Action::ResetWindow, Action::RetryWithPrunedContext]);
    }

    #[test]
    fn test_prune_budget_escalates() {
        let mut state = State::initial();
        for _ in 0..2 {
            let (next, _) = transition(state, stuck(prune_signal()), limits());
            let (next, _) = transition(next, Event::PruneApplied { fallback: false }, limits());
            state = next;
        }
        assert_eq!(state, State::Running { prune_count: 2 });

        let (state, actions) = transition(state, stuck(prune_signal()), limits());
        assert_eq!(
            state,
            State::Escalated {
                reason: EscalationReason::RetryBudgetExceeded { count: 3, max: 2 }
            }
        );
        assert!(matches!(actions[0], Action::Escalate { .. }));
    }

    #[test]
    fn test_second_fallback_prune_escalates() {
        let (state, _) = transition(State::initial(), stuck(prune_signal()), limits());
        let (state, _) = transition(state, Event::PruneApplied { fallback: true }, limits());
        assert_eq!(state, State::Running { prune_count: 1 });

        let (state, _) = transition(state, stuck(prune_signal()), limits());
        assert_eq!(state, State::Pruning { prune_count: 2 });
        let (state, actions) = transition(state, Event::PruneApplied { fallback: true }, limits());
        assert_eq!(
            state,
            State::Escalated {
                reason: EscalationReason::RetryBudgetExceeded { count: 3, max: 2 }
            }
        );
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_clear_resets_prune_count() {
        let (state, _) = transition(State::Running { prune_count: 2 }, Event::Clear, limits());
        assert_eq!(state, State::Running { prune_count: 0 });
    }

    #[test]
    fn test_decomposition_success_switches_task() {
        let parent = Task::new("T-1", "Big task");
        let subtasks = vec![
            Task::child_of(&parent, 0, "A", "a", vec!["a".into()]),
            Task::child_of(&parent, 1, "B", "b", vec!["b".into()]),
        ];

        let (state, actions) = transition(State::Running { prune_count: 1 }, stuck(decompose_signal()), limits());
        assert_eq!(state, State::Decomposing { prune_count: 1 });
        assert!(matches!(actions[0], Action::RunDecomposer { .. }));

        let (state, actions) = transition(
            state,
            Event::DecompositionSucceeded { subtasks: subtasks.clone() },
            limits(),
        );
        assert_eq!(state, State::initial());
        assert_eq!(
            actions,
            vec![
                Action::InsertSubtasks { subtasks },
                Action::SwitchTask { task_id: "T-1.1".to_string() },
                Action::ResetWindow,
            ]
        );
    }

    #[test]
    fn test_decomposition_failure_escalates() {
        let reason = EscalationReason::DepthExceeded { depth: 3, max: 2 };
        let (state, actions) = transition(
            State::Decomposing { prune_count: 0 },
            Event::DecompositionFailed { reason: reason.clone() },
            limits(),
        );
        assert_eq!(state, State::Escalated { reason: reason.clone() });
        assert_eq!(actions, vec![Action::Escalate { reason }]);
    }

    #[test]
    fn test_empty_decomposition_escalates() {
        let (state, _) = transition(
            State::Decomposing { prune_count: 0 },
            Event::DecompositionSucceeded { subtasks: vec![] },
            limits(),
        );
        assert!(matches!(
            state,
            State::Escalated { reason: EscalationReason::MalformedDecomposition { .. } }
        ));
    }

    #[test]
    fn test_iteration_budget_from_any_live_state() {
        for state in [
            State::initial(),
            State::Pruning { prune_count: 1 },
            State::Decomposing { prune_count: 0 },
        ] {
            let (next, _) = transition(state, Event::IterationBudgetExceeded { iterations: 21, max: 20 }, limits());
            assert!(matches!(
                next,
                State::Escalated { reason: EscalationReason::IterationBudgetExceeded { iterations: 21, max: 20 } }
            ));
        }
    }

    #[test]
    fn test_verified_terminates() {
        let (state, actions) = transition(State::Running { prune_count: 1 }, Event::Verified, limits());
        assert_eq!(state, State::Terminated);
        assert_eq!(actions, vec![Action::MarkDone]);
    }

    #[test]
    fn test_invalid_event_escalates_without_panic() {
        let (state, _) = transition(State::Pruning { prune_count: 1 }, Event::Verified, limits());
        assert!(matches!(state, State::Escalated { reason: EscalationReason::Internal { .. } }));

        let (state, _) = transition(State::initial(), Event::PruneApplied { fallback: false }, limits());
        assert!(matches!(state, State::Escalated { reason: EscalationReason::Internal { .. } }));
    }

    #[test]
    fn test_terminal_states_absorb_events() {
        let escalated = State::Escalated {
            reason: EscalationReason::Cancelled { detail: "deadline".into() },
        };
        let (state, actions) = transition(escalated.clone(), Event::Verified, limits());
        assert_eq!(state, escalated);
        assert!(actions.is_empty());

        let (state, actions) = transition(State::Terminated, stuck(prune_signal()), limits());
        assert_eq!(state, State::Terminated);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_escalation_reachable_from_any_live_state() {
        // Feeding only prune signals and prune completions must escalate
        // within a bounded number of steps, whatever the fallback pattern.
        for fallback in [false, true] {
            let mut state = State::initial();
            let mut steps = 0;
            while !state.is_terminal() {
                let event = match state {
                    State::Pruning { .. } => Event::PruneApplied { fallback },
                    _ => stuck(prune_signal()),
                };
                state = transition(state, event, limits()).0;
                steps += 1;
                assert!(steps <= 2 * (limits().max_prune_retries as usize + 1));
            }
            assert!(matches!(state, State::Escalated { .. }));
        }
    }
}
