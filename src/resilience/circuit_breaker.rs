use crate::{Error, Result};
use futures::FutureExt;
use serde::Serialize;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub generation: u64,
    pub failure_threshold: u32,
    pub open_timeout_ms: u64,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub half_open_inflight: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in `Closed` that trip the breaker.
    pub failure_threshold: u32,
    /// Time spent `Open` before the next call is let through as a trial.
    pub open_timeout: Duration,
    /// Trial calls allowed in flight at once while `HalfOpen`.
    pub half_open_max_requests: u32,
    /// Trial successes needed to close again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            half_open_max_requests: 1,
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the failure threshold
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set how long the breaker stays open
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_half_open_max_requests(mut self, n: u32) -> Self {
        self.half_open_max_requests = n;
        self
    }

    pub fn with_success_threshold(mut self, n: u32) -> Self {
        self.success_threshold = n;
        self
    }
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    generation: u64,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_inflight: u32,
    half_open_successes: u32,
}

/// Consecutive-failure circuit breaker.
///
/// - `Closed`: calls pass; `failure_threshold` consecutive failures trip it open
/// - `Open`: calls fail fast with [`Error::CircuitOpen`]; once `open_timeout` has
///   elapsed the next call attempt moves it to `HalfOpen`
/// - `HalfOpen`: a bounded number of trial calls run; `success_threshold`
///   successes close it, any failure reopens it
///
/// Every transition bumps a generation counter. Outcomes are recorded against the
/// generation the call was admitted under, and outcomes from an older generation
/// are dropped.
#[derive(Debug)]
pub struct CircuitBreaker {
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        let cfg = CircuitBreakerConfig {
            failure_threshold: cfg.failure_threshold.max(1),
            half_open_max_requests: cfg.half_open_max_requests.max(1),
            success_threshold: cfg.success_threshold.max(1),
            ..cfg
        };
        Self {
            cfg,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                generation: 0,
                consecutive_failures: 0,
                opened_at: None,
                half_open_inflight: 0,
                half_open_successes: 0,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Every mutation below leaves the counters consistent before it can panic.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition_locked(&self, st: &mut State, to: CircuitState) {
        let from = st.state;
        st.state = to;
        st.generation = st.generation.wrapping_add(1);
        st.consecutive_failures = 0;
        st.half_open_inflight = 0;
        st.half_open_successes = 0;
        st.opened_at = match to {
            CircuitState::Open => Some(Instant::now()),
            _ => None,
        };

        match to {
            CircuitState::Open => warn!(
                from = %from,
                generation = st.generation,
                open_timeout_ms = self.cfg.open_timeout.as_millis() as u64,
                "circuit breaker opened"
            ),
            _ => info!(from = %from, to = %to, generation = st.generation, "circuit breaker transition"),
        }
    }

    fn open_remaining(&self, st: &State, now: Instant) -> Option<Duration> {
        let opened = st.opened_at?;
        let elapsed = now.duration_since(opened);
        if elapsed < self.cfg.open_timeout {
            Some(self.cfg.open_timeout - elapsed)
        } else {
            None
        }
    }

    /// Ask to run one call.
    ///
    /// Returns a [`Permit`] to report the outcome on, or [`Error::CircuitOpen`].
    pub fn try_acquire(&self) -> Result<Permit<'_>> {
        let mut st = self.lock();
        let now = Instant::now();

        if st.state == CircuitState::Open {
            if let Some(remaining) = self.open_remaining(&st, now) {
                return Err(Error::CircuitOpen {
                    retry_after_ms: remaining.as_millis() as u64,
                });
            }
            self.transition_locked(&mut st, CircuitState::HalfOpen);
        }

        if st.state == CircuitState::HalfOpen {
            if st.half_open_inflight >= self.cfg.half_open_max_requests {
                return Err(Error::CircuitOpen { retry_after_ms: 0 });
            }
            st.half_open_inflight += 1;
        }

        Ok(Permit {
            breaker: self,
            generation: st.generation,
            done: false,
        })
    }

    fn record(&self, generation: u64, success: bool) {
        let mut st = self.lock();
        if generation != st.generation {
            debug!(
                call_generation = generation,
                current_generation = st.generation,
                success,
                "ignoring outcome from stale breaker generation"
            );
            return;
        }

        match st.state {
            CircuitState::Closed => {
                if success {
                    st.consecutive_failures = 0;
                } else {
                    st.consecutive_failures = st.consecutive_failures.saturating_add(1);
                    if st.consecutive_failures >= self.cfg.failure_threshold {
                        self.transition_locked(&mut st, CircuitState::Open);
                    }
                }
            }
            CircuitState::HalfOpen => {
                st.half_open_inflight = st.half_open_inflight.saturating_sub(1);
                if success {
                    st.half_open_successes += 1;
                    if st.half_open_successes >= self.cfg.success_threshold {
                        self.transition_locked(&mut st, CircuitState::Closed);
                    }
                } else {
                    self.transition_locked(&mut st, CircuitState::Open);
                }
            }
            // Entering Open bumps the generation, so no admitted call can match it.
            CircuitState::Open => {}
        }
    }

    fn release(&self, generation: u64) {
        let mut st = self.lock();
        if generation == st.generation && st.state == CircuitState::HalfOpen {
            st.half_open_inflight = st.half_open_inflight.saturating_sub(1);
        }
    }

    /// Run `f` under the breaker.
    ///
    /// Rejected calls return [`Error::CircuitOpen`] converted into `E` without calling `f`.
    /// A panic inside `f` is recorded as a failure and then resumed.
    pub async fn execute<F, Fut, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let permit = self.try_acquire().map_err(E::from)?;
        match AssertUnwindSafe(async move { f().await }).catch_unwind().await {
            Ok(Ok(value)) => {
                permit.success();
                Ok(value)
            }
            Ok(Err(err)) => {
                permit.failure();
                Err(err)
            }
            Err(panic) => {
                permit.failure();
                std::panic::resume_unwind(panic)
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// True while the breaker is open and its timeout has not yet elapsed.
    ///
    /// Does not perform the `Open -> HalfOpen` transition.
    pub fn is_open(&self) -> bool {
        let st = self.lock();
        st.state == CircuitState::Open && self.open_remaining(&st, Instant::now()).is_some()
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let st = self.lock();
        CircuitBreakerSnapshot {
            state: st.state,
            generation: st.generation,
            failure_threshold: self.cfg.failure_threshold,
            open_timeout_ms: self.cfg.open_timeout.as_millis() as u64,
            consecutive_failures: st.consecutive_failures,
            half_open_successes: st.half_open_successes,
            half_open_inflight: st.half_open_inflight,
            open_remaining_ms: self
                .open_remaining(&st, Instant::now())
                .map(|d| d.as_millis() as u64),
        }
    }
}

/// Admission ticket for one call, bound to the generation it was issued under.
///
/// Dropping it without reporting releases its half-open trial slot and records nothing.
#[must_use = "report the call outcome with `success` or `failure`"]
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    done: bool,
}

impl Permit<'_> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn success(mut self) {
        self.done = true;
        self.breaker.record(self.generation, true);
    }

    pub fn failure(mut self) {
        self.done = true;
        self.breaker.record(self.generation, false);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.breaker.release(self.generation);
        }
    }
}
