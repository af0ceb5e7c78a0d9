//! Circuit breaker guarding a model endpoint
//!
//! After `threshold` consecutive failures the breaker opens and calls fail
//! fast with [`ModelError::CircuitOpen`](crate::ModelError::CircuitOpen),
//! which the pruner treats like any other model failure and falls back to
//! truncation. After `cooldown` one probe call is let through.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls allowed
    Closed,
    /// Calls rejected until the cooldown elapses
    Open,
    /// Cooldown elapsed, next call is a probe
    HalfOpen,
}

#[derive(Debug, Default)]
struct Inner {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

/// Per-endpoint circuit breaker
///
/// ```
/// use unstuck_model::{CircuitBreaker, CircuitState};
/// use std::time::Duration;
///
/// let cb = CircuitBreaker::new(2, Duration::from_secs(60));
/// cb.record_failure();
/// cb.record_failure();
/// assert_eq!(cb.state(), CircuitState::Open);
/// ```
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            threshold: threshold.max(1),
            cooldown,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // State is two plain counters; a panic mid-update cannot corrupt it
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        if inner.consecutive_failures < self.threshold {
            return CircuitState::Closed;
        }
        match inner.last_failure {
            Some(at) if at.elapsed() < self.cooldown => CircuitState::Open,
            _ => CircuitState::HalfOpen,
        }
    }

    pub fn can_execute(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = 0;
        inner.last_failure = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Time until a probe is allowed; zero unless open
    pub fn time_until_retry(&self) -> Duration {
        let inner = self.lock();
        if inner.consecutive_failures < self.threshold {
            return Duration::ZERO;
        }
        inner
            .last_failure
            .map(|at| self.cooldown.saturating_sub(at.elapsed()))
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(60))
    }
}
