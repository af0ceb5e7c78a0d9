//! # unstuck-detect
//!
//! Deterministic, model-free detection of non-converging task execution.
//!
//! A [`StuckDetector`] owns one task's [`HistoryWindow`] and classifies it
//! after every completed attempt. Three rules run against a full window,
//! cheapest first:
//!
//! - **Repetitive output**: the most recent outputs are near-identical
//! - **Circular tools**: the same tool call keeps recurring with nothing new in between
//! - **No progress**: several attempts in a row touched no files
//!
//! Detection has no side effects on the task; the orchestrator decides
//! what to do with a signal.

mod detector;
pub mod similarity;
mod window;

pub use detector::{Detection, DetectorConfig, NearMiss, StuckDetector};
pub use window::HistoryWindow;
