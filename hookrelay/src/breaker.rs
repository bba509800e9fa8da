//! Circuit breaker protecting outbound delivery calls.
//!
//! Tracks consecutive failures per destination and temporarily rejects calls
//! to endpoints that have exceeded the failure threshold, with a bounded
//! half-open probe phase before fully recovering. One breaker instance is
//! shared per outbound target; the [`CircuitBreakerRegistry`] owns them and
//! is injected from the composition root rather than living in a global.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - calls proceed.
    #[default]
    Closed,
    /// Circuit tripped - calls rejected immediately.
    Open,
    /// Testing recovery - a bounded number of probe calls allowed.
    HalfOpen,
}

impl CircuitState {
    /// Stable string representation (used in logs and serialized state).
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Error raised when the breaker rejects a call without executing it.
#[derive(Debug, Clone, Error)]
#[error("circuit breaker '{name}' is {}; retry in {remaining_secs}s", state.as_str())]
pub struct CircuitBreakerError {
    /// Destination key of the rejecting breaker.
    pub name: String,
    /// State at rejection time.
    pub state: CircuitState,
    /// Seconds until the next probe is allowed (0 when only the half-open
    /// call budget is exhausted).
    pub remaining_secs: i64,
}

/// Error returned by [`CircuitBreaker::call`].
#[derive(Debug, Error)]
pub enum CallError<E> {
    /// The breaker rejected the call before it executed.
    #[error(transparent)]
    Rejected(#[from] CircuitBreakerError),
    /// The wrapped call executed and returned its own error.
    #[error("{0}")]
    Inner(E),
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive qualifying failures before opening the circuit.
    pub failure_threshold: u32,
    /// Seconds spent open before a probe call is allowed through.
    pub recovery_timeout_secs: u64,
    /// Maximum concurrent probe calls while half-open.
    pub half_open_max_calls: u32,
    /// Consecutive half-open successes required to close the circuit.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
            half_open_max_calls: 3,
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Set the consecutive-failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set the open-state recovery timeout in seconds.
    #[must_use]
    pub const fn with_recovery_timeout(mut self, secs: u64) -> Self {
        self.recovery_timeout_secs = secs;
        self
    }

    /// Set the half-open probe call budget.
    #[must_use]
    pub const fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }

    /// Set the consecutive-success threshold for closing.
    #[must_use]
    pub const fn with_success_threshold(mut self, successes: u32) -> Self {
        self.success_threshold = successes;
        self
    }
}

/// Counters describing a breaker's lifetime activity.
///
/// Mutated only while holding the breaker's internal lock.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    /// Calls allowed through the breaker (executed or in flight).
    pub total_calls: u64,
    /// Calls that completed and were recorded as successes.
    pub successful_calls: u64,
    /// Calls that completed and were recorded as qualifying failures.
    pub failed_calls: u64,
    /// Calls rejected without executing.
    pub rejected_calls: u64,
    /// Number of state transitions since creation (or last reset).
    pub state_changes: u64,
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    half_open_in_flight: u32,
    opened_at: Option<DateTime<Utc>>,
    stats: CircuitBreakerStats,
}

impl BreakerInner {
    fn transition(&mut self, to: CircuitState, name: &str) {
        if self.state == to {
            return;
        }
        tracing::info!(
            target: "hookrelay_breaker",
            breaker = name,
            from = self.state.as_str(),
            to = to.as_str(),
            "Circuit breaker state change"
        );
        self.state = to;
        self.stats.state_changes += 1;
    }
}

/// Call-gating state machine for a single outbound destination.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker for a destination key.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    /// Destination key this breaker guards.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state (without forcing a recovery probe transition).
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot of the breaker's counters.
    #[must_use]
    pub fn stats(&self) -> CircuitBreakerStats {
        self.inner.lock().stats
    }

    /// Try to acquire permission to execute one call.
    ///
    /// On success the returned [`CallPermit`] must be completed with
    /// [`CallPermit::success`] or [`CallPermit::failure`]; dropping it
    /// without completing (for example on cancellation, or for an error
    /// kind that does not qualify as a breaker failure) releases the
    /// half-open slot without touching the failure counters.
    pub fn try_acquire(&self) -> Result<CallPermit<'_>, CircuitBreakerError> {
        let mut inner = self.inner.lock();

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map_or(i64::MAX, |t| Utc::now().signed_duration_since(t).num_seconds());

            #[allow(clippy::cast_possible_wrap)]
            let recovery = self.config.recovery_timeout_secs as i64;
            if elapsed >= recovery {
                inner.half_open_successes = 0;
                inner.half_open_in_flight = 0;
                inner.transition(CircuitState::HalfOpen, &self.name);
            } else {
                inner.stats.rejected_calls += 1;
                return Err(CircuitBreakerError {
                    name: self.name.clone(),
                    state: CircuitState::Open,
                    remaining_secs: (recovery - elapsed).max(0),
                });
            }
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.half_open_in_flight >= self.config.half_open_max_calls {
                inner.stats.rejected_calls += 1;
                return Err(CircuitBreakerError {
                    name: self.name.clone(),
                    state: CircuitState::HalfOpen,
                    remaining_secs: 0,
                });
            }
            inner.half_open_in_flight += 1;
            inner.stats.total_calls += 1;
            return Ok(CallPermit {
                breaker: self,
                half_open: true,
                completed: false,
            });
        }

        inner.stats.total_calls += 1;
        Ok(CallPermit {
            breaker: self,
            half_open: false,
            completed: false,
        })
    }

    /// Execute a future under the breaker.
    ///
    /// `qualifies` decides whether a returned error counts as a breaker
    /// failure; non-qualifying errors pass through without affecting state.
    pub async fn call<F, T, E>(
        &self,
        fut: F,
        qualifies: impl FnOnce(&E) -> bool,
    ) -> Result<T, CallError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire()?;
        match fut.await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(err) => {
                if qualifies(&err) {
                    permit.failure();
                }
                // Non-qualifying: permit drop releases without counting.
                Err(CallError::Inner(err))
            }
        }
    }

    /// Manual override back to `Closed` with all counters cleared.
    ///
    /// Operational escape hatch for when an endpoint is known to be healthy
    /// again and waiting out the recovery timeout is not acceptable.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        tracing::info!(
            target: "hookrelay_breaker",
            breaker = %self.name,
            "Circuit breaker manually reset"
        );
        *inner = BreakerInner::default();
    }

    fn record_success(&self, half_open: bool) {
        let mut inner = self.inner.lock();
        inner.stats.successful_calls += 1;

        if half_open {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            if inner.state == CircuitState::HalfOpen {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.success_threshold {
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    inner.transition(CircuitState::Closed, &self.name);
                }
            }
        } else if inner.state == CircuitState::Closed {
            inner.consecutive_failures = 0;
        }
    }

    fn record_failure(&self, half_open: bool) {
        let mut inner = self.inner.lock();
        inner.stats.failed_calls += 1;
        inner.consecutive_failures += 1;

        if half_open {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        match inner.state {
            CircuitState::Closed => {
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.opened_at = Some(Utc::now());
                    inner.transition(CircuitState::Open, &self.name);
                }
            }
            CircuitState::HalfOpen => {
                // Failed probe reopens the circuit and restarts the timer.
                inner.opened_at = Some(Utc::now());
                inner.transition(CircuitState::Open, &self.name);
            }
            CircuitState::Open => {}
        }
    }

    fn release(&self, half_open: bool) {
        if half_open {
            let mut inner = self.inner.lock();
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }
}

/// Scoped permission to execute one call under a breaker.
///
/// Completing the permit updates the breaker on the success or failure path;
/// dropping it uncompleted (cancellation, non-qualifying error) releases the
/// half-open slot so the breaker can never leak probe budget.
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    half_open: bool,
    completed: bool,
}

impl CallPermit<'_> {
    /// Record a successful call.
    pub fn success(mut self) {
        self.completed = true;
        self.breaker.record_success(self.half_open);
    }

    /// Record a qualifying failure.
    pub fn failure(mut self) {
        self.completed = true;
        self.breaker.record_failure(self.half_open);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.breaker.release(self.half_open);
        }
    }
}

/// Registry of circuit breakers, one per outbound destination key.
///
/// Created once at startup by the composition root and passed by reference;
/// breakers are created lazily on first use and never torn down.
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    /// Create a registry applying `config` to every new breaker.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get the breaker for a destination, creating it on first use.
    #[must_use]
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write();
        Arc::clone(breakers.entry(name.to_string()).or_insert_with(|| {
            Arc::new(CircuitBreaker::new(name.to_string(), self.config.clone()))
        }))
    }

    /// Look up an existing breaker without creating one.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Snapshot `(destination, state, stats)` for every known breaker.
    #[must_use]
    pub fn statuses(&self) -> Vec<(String, CircuitState, CircuitBreakerStats)> {
        self.breakers
            .read()
            .iter()
            .map(|(name, b)| (name.clone(), b.state(), b.stats()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(config: CircuitBreakerConfig) -> CircuitBreaker {
        CircuitBreaker::new("test", config)
    }

    fn fail_once(b: &CircuitBreaker) {
        b.try_acquire().expect("acquire").failure();
    }

    #[test]
    fn test_initial_state_is_closed() {
        let b = breaker(CircuitBreakerConfig::default());
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().total_calls, 0);
    }

    #[test]
    fn test_opens_after_consecutive_failures() {
        let b = breaker(CircuitBreakerConfig::default().with_failure_threshold(3));
        for _ in 0..3 {
            fail_once(&b);
        }
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.stats().failed_calls, 3);
        assert_eq!(b.stats().state_changes, 1);
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let b = breaker(CircuitBreakerConfig::default().with_failure_threshold(3));
        fail_once(&b);
        fail_once(&b);
        b.try_acquire().expect("acquire").success();
        fail_once(&b);
        fail_once(&b);
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_open_rejects_without_executing() {
        let b = breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_recovery_timeout(3600),
        );
        fail_once(&b);

        let before = b.stats().total_calls;
        let err = b.try_acquire().expect_err("must reject");
        assert_eq!(err.state, CircuitState::Open);
        assert!(err.remaining_secs > 0);
        // Rejection is bookkeeping only, never an attempted call.
        assert_eq!(b.stats().total_calls, before);
        assert_eq!(b.stats().rejected_calls, 1);
    }

    #[test]
    fn test_recovery_timeout_moves_to_half_open() {
        let b = breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_recovery_timeout(0)
                .with_success_threshold(2),
        );
        fail_once(&b);
        assert_eq!(b.state(), CircuitState::Open);

        // Zero recovery timeout: the next acquisition probes immediately.
        let permit = b.try_acquire().expect("probe allowed");
        assert_eq!(b.state(), CircuitState::HalfOpen);
        permit.success();
        assert_eq!(b.state(), CircuitState::HalfOpen);

        b.try_acquire().expect("second probe").success();
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let b = breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_recovery_timeout(0),
        );
        fail_once(&b);

        let permit = b.try_acquire().expect("probe allowed");
        assert_eq!(b.state(), CircuitState::HalfOpen);
        permit.failure();
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[test]
    fn test_half_open_call_budget_is_bounded() {
        let b = breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_recovery_timeout(0)
                .with_half_open_max_calls(1),
        );
        fail_once(&b);

        let first = b.try_acquire().expect("probe allowed");
        let err = b.try_acquire().expect_err("budget exhausted");
        assert_eq!(err.state, CircuitState::HalfOpen);
        assert_eq!(err.remaining_secs, 0);
        drop(first);
    }

    #[test]
    fn test_dropped_permit_releases_half_open_slot() {
        let b = breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_recovery_timeout(0)
                .with_half_open_max_calls(1),
        );
        fail_once(&b);

        // Simulates a cancelled in-flight probe.
        drop(b.try_acquire().expect("probe allowed"));

        // Slot released, breaker consistent, next probe allowed.
        let permit = b.try_acquire().expect("slot was released");
        assert_eq!(b.state(), CircuitState::HalfOpen);
        drop(permit);
    }

    #[test]
    fn test_reset_returns_to_closed_and_clears_counters() {
        let b = breaker(CircuitBreakerConfig::default().with_failure_threshold(1));
        fail_once(&b);
        assert_eq!(b.state(), CircuitState::Open);

        b.reset();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().failed_calls, 0);
        assert_eq!(b.stats().state_changes, 0);
        assert!(b.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn test_call_wrapper_success_and_failure_paths() {
        let b = breaker(CircuitBreakerConfig::default().with_failure_threshold(1));

        let ok: Result<u32, CallError<&str>> =
            b.call(async { Ok::<_, &str>(7) }, |_| true).await;
        assert_eq!(ok.expect("success"), 7);
        assert_eq!(b.stats().successful_calls, 1);

        let err: Result<u32, CallError<&str>> =
            b.call(async { Err::<u32, _>("boom") }, |_| true).await;
        assert!(matches!(err, Err(CallError::Inner("boom"))));
        assert_eq!(b.state(), CircuitState::Open);

        let rejected: Result<u32, CallError<&str>> =
            b.call(async { Ok::<_, &str>(7) }, |_| true).await;
        assert!(matches!(rejected, Err(CallError::Rejected(_))));
    }

    #[tokio::test]
    async fn test_call_wrapper_non_qualifying_error_passes_through() {
        let b = breaker(CircuitBreakerConfig::default().with_failure_threshold(1));

        let err: Result<u32, CallError<&str>> =
            b.call(async { Err::<u32, _>("not-a-failure") }, |_| false).await;
        assert!(matches!(err, Err(CallError::Inner(_))));
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.stats().failed_calls, 0);
    }

    #[test]
    fn test_registry_creates_lazily_and_shares() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig::default());
        assert!(registry.get("https://a.example").is_none());

        let a1 = registry.get_or_create("https://a.example");
        let a2 = registry.get_or_create("https://a.example");
        assert!(Arc::ptr_eq(&a1, &a2));

        let b = registry.get_or_create("https://b.example");
        assert!(!Arc::ptr_eq(&a1, &b));
        assert_eq!(registry.statuses().len(), 2);
    }
}
