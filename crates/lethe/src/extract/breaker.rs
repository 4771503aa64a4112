//! Circuit breaker for the remote capability
//!
//! Closed -> Open after a configured number of consecutive failures; Open
//! until the cooldown elapses; then a single half-open probe decides whether
//! to close again. Keeps the engines from hammering a failing dependency.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Consecutive-failure circuit breaker
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    /// Whether a call may proceed. Transitions Open -> HalfOpen once the
    /// cooldown has elapsed, admitting a single probe.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            State::Closed => true,
            State::HalfOpen => false,
            State::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.cooldown {
                    debug!("Circuit breaker half-open, admitting probe");
                    inner.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call; closes the breaker
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state != State::Closed {
            debug!("Circuit breaker closed after successful probe");
        }
        inner.state = State::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Record a failed call; may open the breaker
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            State::HalfOpen => {
                warn!("Circuit breaker re-opened after failed probe");
                inner.state = State::Open;
                inner.opened_at = Some(Instant::now());
            }
            State::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    warn!(
                        "Circuit breaker opened after {} consecutive failures",
                        inner.consecutive_failures
                    );
                    inner.state = State::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            State::Open => {}
        }
    }

    /// Whether the breaker is currently refusing calls
    pub fn is_open(&self) -> bool {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state != State::Closed
    }
}
