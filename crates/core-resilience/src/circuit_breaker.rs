//! Circuit Breaker implementation for fault tolerance
//!
//! The circuit breaker prevents cascading failures by failing fast when a
//! downstream call is misbehaving. It has three states:
//! - Closed: Normal operation, calls pass through and their outcomes are counted
//! - Open: Downstream is unhealthy, calls are rejected without being attempted
//! - HalfOpen: A limited number of probe calls test whether it has recovered
//!
//! # State Transitions
//!
//! ```text
//! Closed   → Open:     window holds >= minimum_calls and failure rate >= threshold
//! Open     → HalfOpen: first permit() after open_state_duration has elapsed
//! HalfOpen → Closed:   every one of half_open_trial_calls probes succeeded
//! HalfOpen → Open:     any probe failed or timed out
//! ```
//!
//! Every transition clears the outcome window and advances a generation
//! counter. A [`CallPermit`] remembers the generation it was issued in, and an
//! outcome reported with a permit from an older generation is dropped. That is
//! what keeps a slow probe that finishes after its half-open round was already
//! decided from changing the state again.

use crate::clock::{Clock, TokioClock};
use crate::error::{OpenCircuitError, ResilienceError};
use crate::outcome::{Outcome, RecordedOutcome};
use crate::window::OutcomeWindow;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// State of the circuit breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests fail immediately.
    /// `opened_at` is when the circuit (re)opened.
    Open { opened_at: Instant },
    /// Circuit is half-open, testing service recovery
    HalfOpen,
}

impl CircuitState {
    /// Short lowercase label, stable for logs and JSON
    pub fn name(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open { .. } => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, CircuitState::Open { .. })
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Failure rate in percent (0 < t <= 100) at which the circuit opens
    pub failure_rate_threshold: f64,
    /// Number of most recent outcomes kept in the window
    pub sliding_window_size: usize,
    /// Outcomes required in the window before the failure rate is evaluated
    pub minimum_calls: usize,
    /// How long the circuit stays open before probing resumes
    pub open_state_duration: Duration,
    /// Number of probe calls allowed while half-open
    pub half_open_trial_calls: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 50.0,
            sliding_window_size: 100,
            minimum_calls: 100,
            open_state_duration: Duration::from_secs(60),
            half_open_trial_calls: 10,
        }
    }
}

impl CircuitBreakerConfig {
    /// Reject configurations the state machine cannot run with
    pub fn validate(&self) -> Result<(), ResilienceError> {
        let threshold = self.failure_rate_threshold;
        if !threshold.is_finite() || threshold <= 0.0 || threshold > 100.0 {
            return Err(ResilienceError::InvalidConfig(format!(
                "failure_rate_threshold must be in (0, 100], got {}",
                threshold
            )));
        }
        if self.sliding_window_size == 0 {
            return Err(ResilienceError::InvalidConfig(
                "sliding_window_size must be > 0".to_string(),
            ));
        }
        if self.minimum_calls == 0 {
            return Err(ResilienceError::InvalidConfig(
                "minimum_calls must be > 0".to_string(),
            ));
        }
        if self.half_open_trial_calls == 0 {
            return Err(ResilienceError::InvalidConfig(
                "half_open_trial_calls must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// A minimum larger than the window could never be reached, so the
    /// window size wins.
    pub fn effective_minimum_calls(&self) -> usize {
        self.minimum_calls.min(self.sliding_window_size)
    }
}

/// Token for one permitted call attempt.
///
/// It is consumed by [`CircuitBreaker::on_outcome`] or
/// [`CircuitBreaker::release`], so an attempt can report at most once.
#[must_use = "a permitted call must report its outcome or be released"]
#[derive(Debug, PartialEq, Eq)]
pub struct CallPermit {
    generation: u64,
}

impl CallPermit {
    /// Breaker generation this permit was issued in
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Result of asking the breaker whether a call may proceed
#[derive(Debug, PartialEq, Eq)]
pub enum Permit {
    Allowed(CallPermit),
    Rejected(OpenCircuitError),
}

impl Permit {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Permit::Allowed(_))
    }
}

/// Point-in-time view of a breaker, for health endpoints and metrics hooks
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerMetrics {
    pub state: CircuitState,
    /// Outcomes currently held in the window
    pub buffered_calls: usize,
    /// Failures and timeouts currently held in the window
    pub failed_calls: usize,
    pub successful_calls: usize,
    /// Failure rate in percent, `None` below the minimum number of calls
    pub failure_rate: Option<f64>,
    /// Calls rejected since the breaker was created
    pub not_permitted_calls: u64,
}

/// Internal state of the circuit breaker
#[derive(Debug)]
struct CircuitBreakerState {
    state: CircuitState,
    window: OutcomeWindow,
    /// Advanced on every transition
    generation: u64,
    /// Probes handed out in the current half-open round
    trials_issued: usize,
    /// Probes that came back successful in the current half-open round
    trial_successes: usize,
    not_permitted: u64,
}

impl CircuitBreakerState {
    fn new(window_size: usize) -> Self {
        Self {
            state: CircuitState::Closed,
            window: OutcomeWindow::new(window_size),
            generation: 0,
            trials_issued: 0,
            trial_successes: 0,
            not_permitted: 0,
        }
    }
}

/// Circuit breaker for protecting against cascading failures
///
/// Clones share the same state. All state changes happen under one mutex
/// whose critical sections never await, so `permit`, `on_outcome` and
/// `release` are plain synchronous calls that are safe from any task.
///
/// # Example
/// ```
/// use tripwire_core_resilience::{CircuitBreaker, CircuitBreakerConfig, Outcome, Permit};
///
/// let breaker = CircuitBreaker::new("inventory", CircuitBreakerConfig::default()).unwrap();
///
/// match breaker.permit() {
///     Permit::Allowed(permit) => {
///         // ... make the call ...
///         breaker.on_outcome(permit, Outcome::Success);
///     }
///     Permit::Rejected(err) => println!("skipped: {}", err),
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: Arc<str>,
    config: Arc<CircuitBreakerConfig>,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<CircuitBreakerState>>,
    state_tx: Arc<watch::Sender<CircuitState>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker driven by the tokio clock
    pub fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
    ) -> Result<Self, ResilienceError> {
        Self::with_clock(name, config, Arc::new(TokioClock))
    }

    /// Create a new circuit breaker with default configuration
    pub fn new_default(name: impl Into<String>) -> Self {
        let config = CircuitBreakerConfig::default();
        Self::build(name.into(), config, Arc::new(TokioClock))
    }

    /// Create a new circuit breaker reading time from `clock`
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ResilienceError> {
        config.validate()?;
        Ok(Self::build(name.into(), config, clock))
    }

    fn build(name: String, config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        let (state_tx, _) = watch::channel(CircuitState::Closed);
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(CircuitBreakerState::new(
                config.sliding_window_size,
            ))),
            config: Arc::new(config),
            clock,
            state_tx: Arc::new(state_tx),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current state of the circuit breaker.
    ///
    /// An open circuit whose wait has elapsed still reports `Open` here; the
    /// move to `HalfOpen` only happens inside [`permit`](Self::permit).
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Snapshot of the window and counters
    pub fn metrics(&self) -> BreakerMetrics {
        let inner = self.lock();
        BreakerMetrics {
            state: inner.state,
            buffered_calls: inner.window.len(),
            failed_calls: inner.window.failure_count(),
            successful_calls: inner.window.success_count(),
            failure_rate: inner
                .window
                .failure_rate(self.config.effective_minimum_calls()),
            not_permitted_calls: inner.not_permitted,
        }
    }

    /// Watch state transitions. The receiver starts at the current state.
    pub fn subscribe(&self) -> watch::Receiver<CircuitState> {
        self.state_tx.subscribe()
    }

    /// Force the circuit back to closed with an empty window.
    ///
    /// Permits handed out before the reset can no longer affect state.
    pub fn reset(&self) {
        let mut inner = self.lock();
        self.transition_to(&mut inner, CircuitState::Closed);
    }

    /// Decide whether a call may proceed right now.
    ///
    /// Performs the lazy Open → HalfOpen transition once the open duration
    /// has elapsed. Rejections are never recorded into the outcome window.
    pub fn permit(&self) -> Permit {
        let now = self.clock.now();
        let mut inner = self.lock();

        if let CircuitState::Open { opened_at } = inner.state {
            let elapsed = now.saturating_duration_since(opened_at);
            if elapsed < self.config.open_state_duration {
                inner.not_permitted += 1;
                let retry_after = self.config.open_state_duration - elapsed;
                tracing::debug!(
                    breaker = %self.name,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Call rejected, circuit open"
                );
                return Permit::Rejected(self.rejection(Some(retry_after)));
            }
            self.transition_to(&mut inner, CircuitState::HalfOpen);
        }

        match inner.state {
            CircuitState::Closed => Permit::Allowed(CallPermit {
                generation: inner.generation,
            }),
            CircuitState::HalfOpen => {
                if inner.trials_issued < self.config.half_open_trial_calls {
                    inner.trials_issued += 1;
                    Permit::Allowed(CallPermit {
                        generation: inner.generation,
                    })
                } else {
                    inner.not_permitted += 1;
                    tracing::debug!(
                        breaker = %self.name,
                        "Call rejected, half-open probes still pending"
                    );
                    Permit::Rejected(self.rejection(None))
                }
            }
            CircuitState::Open { .. } => {
                inner.not_permitted += 1;
                Permit::Rejected(self.rejection(None))
            }
        }
    }

    /// Record how a permitted call ended and apply any resulting transition
    pub fn on_outcome(&self, permit: CallPermit, outcome: Outcome) {
        let now = self.clock.now();
        let mut inner = self.lock();

        if permit.generation != inner.generation {
            tracing::debug!(
                breaker = %self.name,
                %outcome,
                "Ignoring outcome from a previous breaker generation"
            );
            return;
        }

        inner.window.record(RecordedOutcome::new(outcome, now));

        match inner.state {
            CircuitState::Closed => {
                let minimum = self.config.effective_minimum_calls();
                if let Some(rate) = inner.window.failure_rate(minimum) {
                    if rate >= self.config.failure_rate_threshold {
                        tracing::warn!(
                            breaker = %self.name,
                            failure_rate = rate,
                            threshold = self.config.failure_rate_threshold,
                            "Failure rate threshold exceeded"
                        );
                        self.transition_to(&mut inner, CircuitState::Open { opened_at: now });
                    }
                }
            }
            CircuitState::HalfOpen => {
                if outcome.is_failure() {
                    self.transition_to(&mut inner, CircuitState::Open { opened_at: now });
                } else {
                    inner.trial_successes += 1;
                    if inner.trial_successes >= self.config.half_open_trial_calls {
                        self.transition_to(&mut inner, CircuitState::Closed);
                    }
                }
            }
            // Entering Open advances the generation, so a current permit
            // cannot observe this state.
            CircuitState::Open { .. } => {}
        }
    }

    /// Give back a permit whose call was abandoned before it produced an
    /// outcome. A half-open probe slot is returned; nothing is recorded.
    pub fn release(&self, permit: CallPermit) {
        let mut inner = self.lock();
        if permit.generation == inner.generation && inner.state == CircuitState::HalfOpen {
            inner.trials_issued = inner.trials_issued.saturating_sub(1);
        }
    }

    fn rejection(&self, retry_after: Option<Duration>) -> OpenCircuitError {
        OpenCircuitError {
            breaker: self.name.to_string(),
            retry_after,
        }
    }

    fn transition_to(&self, inner: &mut CircuitBreakerState, next: CircuitState) {
        let previous = inner.state;
        inner.state = next;
        inner.generation = inner.generation.wrapping_add(1);
        inner.window.reset();
        inner.trials_issued = 0;
        inner.trial_successes = 0;

        if next.is_open() {
            tracing::warn!(breaker = %self.name, from = %previous, to = %next, "Circuit breaker opened");
        } else {
            tracing::info!(breaker = %self.name, from = %previous, to = %next, "Circuit breaker state change");
        }

        self.state_tx.send_replace(next);
    }

    fn lock(&self) -> MutexGuard<'_, CircuitBreakerState> {
        // Critical sections hold no partially-applied updates across a panic point.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker_with(config: CircuitBreakerConfig) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::with_clock("test", config, Arc::new(clock.clone()))
            .expect("valid config");
        (breaker, clock)
    }

    fn ten_call_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_rate_threshold: 50.0,
            sliding_window_size: 10,
            minimum_calls: 10,
            open_state_duration: Duration::from_secs(60),
            half_open_trial_calls: 3,
        }
    }

    fn record(breaker: &CircuitBreaker, outcome: Outcome) {
        match breaker.permit() {
            Permit::Allowed(permit) => breaker.on_outcome(permit, outcome),
            Permit::Rejected(err) => panic!("expected a permit, got {:?}", err),
        }
    }

    fn open(breaker: &CircuitBreaker, calls: usize) {
        for _ in 0..calls {
            record(breaker, Outcome::Failure);
        }
        assert!(breaker.state().is_open(), "breaker should be open");
    }

    #[test]
    fn test_trips_at_half_failures_in_any_order() {
        // Every arrangement of 5 failures among 10 calls opens the circuit
        for mask in 0u32..(1 << 10) {
            if mask.count_ones() != 5 {
                continue;
            }
            let (breaker, _clock) = breaker_with(ten_call_config());
            for bit in 0..10 {
                let outcome = if mask & (1 << bit) != 0 {
                    Outcome::Failure
                } else {
                    Outcome::Success
                };
                record(&breaker, outcome);
            }
            assert!(
                !breaker.permit().is_allowed(),
                "mask {:010b} should have opened the circuit",
                mask
            );
        }
    }

    #[test]
    fn test_four_failures_in_ten_stay_closed() {
        for mask in 0u32..(1 << 10) {
            if mask.count_ones() != 4 {
                continue;
            }
            let (breaker, _clock) = breaker_with(ten_call_config());
            for bit in 0..10 {
                let outcome = if mask & (1 << bit) != 0 {
                    Outcome::Timeout
                } else {
                    Outcome::Success
                };
                record(&breaker, outcome);
            }
            assert_eq!(breaker.state(), CircuitState::Closed, "mask {:010b}", mask);
        }
    }

    #[test]
    fn test_evaluates_only_the_most_recent_outcomes() {
        let (breaker, _clock) = breaker_with(ten_call_config());
        for _ in 0..10 {
            record(&breaker, Outcome::Success);
        }
        for _ in 0..4 {
            record(&breaker, Outcome::Failure);
        }
        // Last ten: 6 successes, 4 failures
        assert_eq!(breaker.state(), CircuitState::Closed);

        record(&breaker, Outcome::Failure);
        // Last ten: 5 successes, 5 failures
        assert!(breaker.state().is_open());
        assert_eq!(breaker.metrics().buffered_calls, 0, "window cleared on open");
    }

    #[test]
    fn test_below_minimum_calls_never_trips() {
        let (breaker, _clock) = breaker_with(ten_call_config());
        for _ in 0..9 {
            record(&breaker, Outcome::Failure);
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().failure_rate, None);
    }

    #[test]
    fn test_minimum_calls_capped_by_window_size() {
        let config = CircuitBreakerConfig {
            sliding_window_size: 4,
            minimum_calls: 100,
            ..ten_call_config()
        };
        let (breaker, _clock) = breaker_with(config);
        for _ in 0..4 {
            record(&breaker, Outcome::Failure);
        }
        assert!(breaker.state().is_open());
    }

    #[test]
    fn test_open_rejects_until_duration_elapses() {
        let (breaker, clock) = breaker_with(ten_call_config());
        open(&breaker, 10);

        clock.advance(Duration::from_secs(59));
        match breaker.permit() {
            Permit::Rejected(err) => {
                assert_eq!(err.breaker, "test");
                assert_eq!(err.retry_after, Some(Duration::from_secs(1)));
            }
            Permit::Allowed(_) => panic!("should still be open"),
        }
        assert!(breaker.state().is_open());

        clock.advance(Duration::from_secs(1));
        let permit = breaker.permit();
        assert!(permit.is_allowed());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_allows_exactly_trial_quota() {
        let (breaker, clock) = breaker_with(ten_call_config());
        open(&breaker, 10);
        clock.advance(Duration::from_secs(60));

        let probes: Vec<_> = (0..5).map(|_| breaker.permit()).collect();
        let allowed = probes.iter().filter(|p| p.is_allowed()).count();
        assert_eq!(allowed, 3);
        assert!(matches!(
            &probes[3],
            Permit::Rejected(OpenCircuitError {
                retry_after: None,
                ..
            })
        ));
    }

    #[test]
    fn test_half_open_all_success_closes() {
        let (breaker, clock) = breaker_with(ten_call_config());
        open(&breaker, 10);
        clock.advance(Duration::from_secs(60));

        record(&breaker, Outcome::Success);
        record(&breaker, Outcome::Success);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        record(&breaker, Outcome::Success);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().buffered_calls, 0);
    }

    #[test]
    fn test_single_probe_failure_reopens_and_discards_pending() {
        let (breaker, clock) = breaker_with(ten_call_config());
        open(&breaker, 10);
        clock.advance(Duration::from_secs(60));

        let mut permits = Vec::new();
        for _ in 0..3 {
            match breaker.permit() {
                Permit::Allowed(p) => permits.push(p),
                Permit::Rejected(err) => panic!("unexpected rejection: {}", err),
            }
        }
        let mut permits = permits.into_iter();
        let first = permits.next().unwrap();
        let second = permits.next().unwrap();
        let third = permits.next().unwrap();

        breaker.on_outcome(first, Outcome::Success);
        breaker.on_outcome(second, Outcome::Timeout);
        let reopened = breaker.state();
        assert!(reopened.is_open());

        // The last probe finishes late; it must not close the circuit
        breaker.on_outcome(third, Outcome::Success);
        assert_eq!(breaker.state(), reopened);
        assert_eq!(breaker.metrics().buffered_calls, 0);

        // Fresh open duration counted from the reopen
        clock.advance(Duration::from_secs(30));
        assert!(!breaker.permit().is_allowed());
    }

    #[test]
    fn test_rejections_do_not_touch_window() {
        let config = CircuitBreakerConfig {
            minimum_calls: 2,
            ..ten_call_config()
        };
        let (breaker, _clock) = breaker_with(config);
        record(&breaker, Outcome::Success);
        record(&breaker, Outcome::Failure);
        assert!(breaker.state().is_open());

        let before = breaker.metrics();
        for _ in 0..25 {
            assert!(!breaker.permit().is_allowed());
        }
        let after = breaker.metrics();

        assert_eq!(after.buffered_calls, before.buffered_calls);
        assert_eq!(after.not_permitted_calls, before.not_permitted_calls + 25);
    }

    #[test]
    fn test_release_returns_probe_slot() {
        let config = CircuitBreakerConfig {
            half_open_trial_calls: 1,
            ..ten_call_config()
        };
        let (breaker, clock) = breaker_with(config);
        open(&breaker, 10);
        clock.advance(Duration::from_secs(60));

        let probe = match breaker.permit() {
            Permit::Allowed(p) => p,
            Permit::Rejected(err) => panic!("unexpected rejection: {}", err),
        };
        assert!(!breaker.permit().is_allowed());

        breaker.release(probe);
        assert_eq!(breaker.metrics().buffered_calls, 0);
        record(&breaker, Outcome::Success);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_reset_discards_outstanding_permits() {
        let (breaker, _clock) = breaker_with(ten_call_config());
        let stale = match breaker.permit() {
            Permit::Allowed(p) => p,
            Permit::Rejected(err) => panic!("unexpected rejection: {}", err),
        };
        open(&breaker, 10);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.on_outcome(stale, Outcome::Failure);
        assert_eq!(breaker.metrics().buffered_calls, 0);
    }

    #[test]
    fn test_invalid_config() {
        let bad = [
            CircuitBreakerConfig {
                failure_rate_threshold: 0.0,
                ..Default::default()
            },
            CircuitBreakerConfig {
                failure_rate_threshold: 100.5,
                ..Default::default()
            },
            CircuitBreakerConfig {
                failure_rate_threshold: f64::NAN,
                ..Default::default()
            },
            CircuitBreakerConfig {
                sliding_window_size: 0,
                ..Default::default()
            },
            CircuitBreakerConfig {
                minimum_calls: 0,
                ..Default::default()
            },
            CircuitBreakerConfig {
                half_open_trial_calls: 0,
                ..Default::default()
            },
        ];
        for config in bad {
            let result = CircuitBreaker::new("bad", config.clone());
            assert!(
                matches!(result, Err(ResilienceError::InvalidConfig(_))),
                "{:?} should be rejected",
                config
            );
        }
    }

    #[test]
    fn test_default_config() {
        let config = CircuitBreakerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.failure_rate_threshold, 50.0);
        assert_eq!(config.sliding_window_size, 100);
        assert_eq!(config.open_state_duration, Duration::from_secs(60));

        let breaker = CircuitBreaker::new_default("defaults");
        assert_eq!(breaker.name(), "defaults");
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_subscribe_sees_transitions() {
        let (breaker, clock) = breaker_with(ten_call_config());
        let mut rx = breaker.subscribe();
        assert_eq!(*rx.borrow_and_update(), CircuitState::Closed);

        open(&breaker, 10);
        rx.changed().await.expect("sender alive");
        assert!(rx.borrow_and_update().is_open());

        clock.advance(Duration::from_secs(60));
        let _probe = breaker.permit();
        rx.changed().await.expect("sender alive");
        assert_eq!(*rx.borrow_and_update(), CircuitState::HalfOpen);
    }
}
