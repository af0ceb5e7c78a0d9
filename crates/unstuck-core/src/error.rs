//! Unified error types for Unstuck

use thiserror::Error;

use crate::types::EscalationReason;

/// Unified error type for all Unstuck operations
#[derive(Error, Debug)]
pub enum UnstuckError {
    // Model errors
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    // Decomposition errors
    #[error("Malformed decomposition: {0}")]
    MalformedDecomposition(String),

    #[error("Decomposition depth exceeded: depth {depth} would exceed maximum {max}")]
    DepthExceeded { depth: u32, max: u32 },

    // Budget errors
    #[error("Retry budget exceeded: {count} consecutive prunes (max {max})")]
    RetryBudgetExceeded { count: u32, max: u32 },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    // Queue errors
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task queue error: {0}")]
    Queue(String),

    #[error("Review queue error: {0}")]
    Review(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl UnstuckError {
    /// Map this error to the escalation reason recorded in the review queue
    pub fn escalation_reason(&self) -> EscalationReason {
        match self {
            Self::ModelUnavailable(detail) => EscalationReason::ModelUnavailable {
                detail: detail.clone(),
            },
            Self::MalformedDecomposition(detail) => EscalationReason::MalformedDecomposition {
                detail: detail.clone(),
            },
            Self::DepthExceeded { depth, max } => EscalationReason::DepthExceeded {
                depth: *depth,
                max: *max,
            },
            Self::RetryBudgetExceeded { count, max } => EscalationReason::RetryBudgetExceeded {
                count: *count,
                max: *max,
            },
            Self::Cancelled(detail) => EscalationReason::Cancelled {
                detail: detail.clone(),
            },
            other => EscalationReason::Internal {
                detail: other.to_string(),
            },
        }
    }
}

/// Result type alias using UnstuckError
pub type Result<T> = std::result::Result<T, UnstuckError>;
