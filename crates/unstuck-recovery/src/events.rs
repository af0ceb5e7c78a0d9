//! Structured recovery events
//!
//! Every signal and every state transition is reported through an
//! [`EventSink`]. Sinks are observers only; nothing they do feeds back into
//! recovery decisions.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::info;
use unstuck_core::{ActionTaken, AttemptOutcome, StuckSignal, TaskId};
use unstuck_detect::NearMiss;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RecoveryEvent {
    /// Detector raised a signal for a task
    SignalRaised { task_id: TaskId, signal: StuckSignal },
    /// Several rules nearly fired; no remediation was taken
    DetectionAmbiguous {
        task_id: TaskId,
        near_misses: Vec<NearMiss>,
    },
    /// The state machine moved
    Transition {
        task_id: TaskId,
        from: String,
        to: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        action: Option<ActionTaken>,
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<AttemptOutcome>,
    },
}

impl RecoveryEvent {
    pub fn task_id(&self) -> &str {
        match self {
            Self::SignalRaised { task_id, .. }
            | Self::DetectionAmbiguous { task_id, .. }
            | Self::Transition { task_id, .. } => task_id,
        }
    }
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: RecoveryEvent);
}

/// Logs events through `tracing` under the `unstuck::events` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

#[async_trait]
impl EventSink for TracingEventSink {
    async fn emit(&self, event: RecoveryEvent) {
        match &event {
            RecoveryEvent::SignalRaised { task_id, signal } => info!(
                target: "unstuck::events",
                task_id = %task_id,
                pattern = %signal.pattern,
                confidence = signal.confidence.value(),
                action = %signal.recommended_action,
                "Stuck signal raised: {}",
                signal.diagnosis
            ),
            RecoveryEvent::DetectionAmbiguous { task_id, near_misses } => info!(
                target: "unstuck::events",
                task_id = %task_id,
                near_misses = near_misses.len(),
                "Ambiguous detection, no action taken"
            ),
            RecoveryEvent::Transition {
                task_id,
                from,
                to,
                action,
                outcome,
            } => info!(
                target: "unstuck::events",
                task_id = %task_id,
                from = %from,
                to = %to,
                action = ?action,
                outcome = ?outcome,
                "Recovery transition"
            ),
        }
    }
}

/// Collects events in memory
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<RecoveryEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecoveryEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn emit(&self, event: RecoveryEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

/// Forwards every event to each inner sink in order
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl EventSink for FanoutSink {
    async fn emit(&self, event: RecoveryEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone()).await;
        }
    }
}
