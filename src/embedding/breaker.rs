//! Circuit breaker for the embedding model.
//!
//! Consecutive failures beyond the threshold open the circuit; while open,
//! calls fail fast without invoking the model. After the cool-down the
//! breaker half-opens and admits one trial call; a success closes it, a
//! failure re-opens it.

use std::time::{Duration, Instant};

#[derive(Debug)]
enum State {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen,
}

/// Circuit breaker state machine.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: State,
    failure_threshold: u32,
    reset_timeout: Duration,
}

impl CircuitBreaker {
    /// Creates a closed breaker.
    #[must_use]
    pub const fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            state: State::Closed { failures: 0 },
            failure_threshold,
            reset_timeout,
        }
    }

    /// Returns whether a call may proceed, advancing open -> half-open
    /// after the cool-down.
    pub fn allow(&mut self) -> bool {
        match self.state {
            State::Closed { .. } | State::HalfOpen => true,
            State::Open { opened_at } => {
                if opened_at.elapsed() >= self.reset_timeout {
                    self.state = State::HalfOpen;
                    true
                } else {
                    false
                }
            },
        }
    }

    /// Records a successful call, closing the circuit.
    pub const fn on_success(&mut self) {
        self.state = State::Closed { failures: 0 };
    }

    /// Records a failed call. Returns true when this failure opened the
    /// circuit.
    pub fn on_failure(&mut self) -> bool {
        match self.state {
            State::Closed { ref mut failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    self.state = State::Open {
                        opened_at: Instant::now(),
                    };
                    return true;
                }
            },
            State::HalfOpen => {
                self.state = State::Open {
                    opened_at: Instant::now(),
                };
                return true;
            },
            State::Open { .. } => {},
        }
        false
    }

    /// Returns true while the circuit is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, State::Open { .. })
    }
}
