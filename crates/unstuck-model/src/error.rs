//! Model call errors

use thiserror::Error;
use unstuck_core::UnstuckError;

/// Failure of a single completion call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Model unavailable: {0}")]
    Unavailable(String),

    #[error("Circuit breaker open, retry in {retry_in_ms}ms")]
    CircuitOpen { retry_in_ms: u64 },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rate limited after {retries} retries: {message}")]
    RateLimited { retries: u32, message: String },

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    /// Whether the same request could succeed if sent again
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::CircuitOpen { .. } | Self::Auth(_) | Self::InvalidResponse(_) => false,
        }
    }
}

impl From<ModelError> for UnstuckError {
    fn from(err: ModelError) -> Self {
        UnstuckError::ModelUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ModelError::Api { status: 503, message: "overloaded".into() }.is_retryable());
        assert!(ModelError::Api { status: 429, message: "slow down".into() }.is_retryable());
        assert!(!ModelError::Api { status: 400, message: "bad".into() }.is_retryable());
        assert!(!ModelError::Auth("missing key".into()).is_retryable());
    }

    #[test]
    fn test_converts_to_model_unavailable() {
        let err: UnstuckError = ModelError::CircuitOpen { retry_in_ms: 500 }.into();
        assert!(matches!(err, UnstuckError::ModelUnavailable(ref s) if s.contains("500ms")));
    }
}
