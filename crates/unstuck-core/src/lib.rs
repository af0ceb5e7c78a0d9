//! # unstuck-core
//!
//! Core types for the Unstuck stuck-recovery subsystem.
//!
//! An autonomous executor repeatedly asks a model to implement one queued
//! task, verifies the result, and moves on. Unstuck watches those attempts,
//! notices when they stop converging, and picks a bounded remediation:
//!
//! - Prune the working context toward the diagnosed cause
//! - Decompose the task into smaller ordered subtasks
//! - Escalate to a human-review queue with the full diagnostic trail
//!
//! This crate holds the shared vocabulary (tasks, iteration records,
//! signals, escalation reports), the unified error type and the
//! configuration surface.

pub mod config;
mod error;
pub mod fail_open;
mod types;

pub use config::{ModelConfig, RecoveryConfig};
pub use error::{Result, UnstuckError};
pub use types::*;
