//! Per-call-site circuit breaker.
//!
//! One `CircuitBreaker` guards one named external call (the embedding
//! model, the extraction model, the classification model). State is kept
//! in memory here and mirrored to the `circuit_state` table by the caller
//! after every transition, so a restart resumes in the last observed state
//! rather than re-probing a still-down dependency.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "open" => CircuitState::Open,
            "half-open" => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// A named circuit breaker. `call` invokes `f` when closed or probing
/// half-open; otherwise it calls `fallback` without touching `f`.
pub struct CircuitBreaker {
    name: &'static str,
    failure_threshold: u32,
    recovery_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            name,
            failure_threshold,
            recovery_timeout,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Restore a persisted state at startup (skips the in-process ramp-up).
    pub fn restore(&self, state: CircuitState) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = state;
        if state == CircuitState::Open {
            inner.opened_at = Some(Instant::now());
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }

    /// Whether the next call should actually invoke `f` (closed, or the
    /// single half-open probe) versus short-circuit to the fallback.
    fn should_attempt(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.recovery_timeout {
                    inner.state = CircuitState::HalfOpen;
                    tracing::info!(circuit = self.name, "half-open probe starting");
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != CircuitState::Closed {
            tracing::info!(circuit = self.name, "circuit closed after successful probe");
        }
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                tracing::warn!(circuit = self.name, "probe failed, circuit re-opened");
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.failure_threshold {
                    tracing::warn!(
                        circuit = self.name,
                        failures = inner.consecutive_failures,
                        "circuit opened"
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Call `f` if the circuit permits it, recording the outcome;
    /// otherwise call `fallback` without touching `f`.
    pub fn call<T>(&self, f: impl FnOnce() -> Result<T, ()>, fallback: impl FnOnce() -> T) -> T
    where
        T: CircuitOutcome,
    {
        if !self.should_attempt() {
            return fallback();
        }
        match f() {
            Ok(value) => {
                self.record_success();
                value
            }
            Err(()) => {
                self.record_failure();
                fallback()
            }
        }
    }
}

/// Marker so `call`'s generic bound reads naturally; every `T` qualifies.
pub trait CircuitOutcome {}
impl<T> CircuitOutcome for T {}
