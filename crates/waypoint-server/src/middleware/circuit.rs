// crates/waypoint-server/src/middleware/circuit.rs
// Per-endpoint circuit breaker — trips endpoints that keep failing and
// temporarily rejects calls to them without touching the underlying server.

use crate::error::{GatewayError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Breaker tuning. Shared by every endpoint registered with one breaker.
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Failures within the window before the circuit trips.
    pub failure_threshold: u32,
    /// Failures older than this no longer count toward the threshold.
    pub failure_window: Duration,
    /// How long a tripped circuit stays open before allowing a single probe.
    pub recovery_timeout: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit state for a single endpoint.
#[derive(Debug, Clone)]
enum State {
    /// Normal operation — tracking recent failures.
    Closed { failures: Vec<Instant> },
    /// Tripped — calls are rejected until the recovery timeout elapses.
    Open { opened_at: Instant },
    /// Recovery elapsed — exactly one probe call is in flight.
    HalfOpen,
}

impl Default for State {
    fn default() -> Self {
        Self::Closed { failures: Vec::new() }
    }
}

/// Observable state snapshot for listings and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitSnapshot {
    Closed,
    Open,
    HalfOpen,
}

/// Thread-safe breaker tracking per-endpoint health.
///
/// Transitions are atomic under the states mutex; the critical sections are
/// O(1) apart from the bounded failure-window sweep.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    states: Arc<Mutex<HashMap<String, State>>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Admit or reject a call for `endpoint`.
    ///
    /// Closed admits. Open rejects with `CircuitOpen` until the recovery
    /// timeout elapses, at which point the state moves to HalfOpen and this
    /// call becomes the single probe. A second caller during HalfOpen is
    /// rejected until the probe resolves.
    pub fn check(&self, endpoint: &str) -> Result<()> {
        let Ok(mut states) = self.states.lock() else {
            return Ok(()); // poisoned mutex: fail open, let the call proceed
        };
        let state = states.entry(endpoint.to_string()).or_default();

        match state {
            State::Closed { .. } => Ok(()),
            State::Open { opened_at } => {
                if opened_at.elapsed() >= self.config.recovery_timeout {
                    info!(endpoint, "Circuit half-open, admitting probe");
                    *state = State::HalfOpen;
                    Ok(())
                } else {
                    Err(GatewayError::CircuitOpen(endpoint.to_string()))
                }
            }
            State::HalfOpen => Err(GatewayError::CircuitOpen(endpoint.to_string())),
        }
    }

    /// Record a successful call — closes the circuit and clears the counter.
    pub fn record_success(&self, endpoint: &str) {
        let Ok(mut states) = self.states.lock() else {
            return;
        };
        let state = states.entry(endpoint.to_string()).or_default();
        let was_half_open = matches!(state, State::HalfOpen);
        *state = State::Closed { failures: Vec::new() };
        if was_half_open {
            info!(endpoint, "Circuit recovered (probe succeeded)");
        }
    }

    /// Record a failed call — may trip the circuit.
    pub fn record_failure(&self, endpoint: &str) {
        let Ok(mut states) = self.states.lock() else {
            return;
        };
        let state = states.entry(endpoint.to_string()).or_default();
        let now = Instant::now();

        match state {
            State::Closed { failures } => {
                failures.push(now);
                failures.retain(|t| now.duration_since(*t) < self.config.failure_window);
                if failures.len() as u32 >= self.config.failure_threshold {
                    warn!(
                        endpoint,
                        failures = failures.len(),
                        recovery_secs = self.config.recovery_timeout.as_secs(),
                        "Circuit tripped"
                    );
                    *state = State::Open { opened_at: now };
                }
            }
            State::HalfOpen => {
                warn!(endpoint, "Probe failed, circuit re-tripped");
                *state = State::Open { opened_at: now };
            }
            State::Open { .. } => {}
        }
    }

    /// Current state without side effects (no Open→HalfOpen promotion).
    pub fn snapshot(&self, endpoint: &str) -> CircuitSnapshot {
        let Ok(states) = self.states.lock() else {
            return CircuitSnapshot::Closed;
        };
        match states.get(endpoint) {
            None | Some(State::Closed { .. }) => CircuitSnapshot::Closed,
            Some(State::Open { .. }) => CircuitSnapshot::Open,
            Some(State::HalfOpen) => CircuitSnapshot::HalfOpen,
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitConfig::default())
    }
}
