//! # unstuck-recovery
//!
//! Remediation and control flow for stuck tasks.
//!
//! This crate provides:
//! - Context pruner and task decomposer backed by the model layer
//! - Memory-frame summarizer
//! - Pure recovery state machine and the orchestrator that drives it
//! - Task queue and human-review queue seams with in-memory/file backends
//! - Event sinks (tracing, markdown activity log)
//! - `RecoveryLoop`, which drains a queue through a task runner

mod activity_logger;
mod decomposer;
mod events;
mod orchestrator;
mod prompt;
mod pruner;
mod queue;
mod review;
mod runner;
mod state_machine;
mod summarizer;
pub mod tokens;

pub use activity_logger::ActivityLogger;
pub use decomposer::{TaskDecomposer, MIN_SUBTASKS};
pub use events::{EventSink, FanoutSink, MemoryEventSink, RecoveryEvent, TracingEventSink};
pub use orchestrator::{RecoveryDeps, RecoveryOrchestrator, Step};
pub use prompt::{build_decompose_prompt, build_prune_prompt, build_summary_prompt};
pub use pruner::{ContextPruner, PruneOutcome};
pub use queue::{MemoryTaskQueue, TaskQueue};
pub use review::{FileReviewQueue, MemoryReviewQueue, ReviewQueue};
pub use runner::{LoopSummary, RecoveryLoop, TaskOutcome, TaskRunner};
pub use state_machine::{transition, Action, Event, Limits, State};
pub use summarizer::{offline_digest, Summarizer};
