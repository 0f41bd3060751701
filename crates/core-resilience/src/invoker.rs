//! Guarded Invoker: breaker + time limiter + fallback in one call
//!
//! ```text
//! permit() ──rejected──────────────────────────────┐
//!    │                                             │
//!  allowed                                         │
//!    ▼                                             ▼
//! run_with_deadline(operation) ─► on_outcome ─► success? ─no─► fallback(failure)
//!                                                  │
//!                                                 yes ─► value
//! ```
//!
//! Each permitted attempt reports exactly one outcome. A rejected attempt
//! never runs the operation and records nothing. If the caller drops the
//! guarded future before the operation settles, the permit is released
//! instead, so an abandoned half-open probe does not hold its slot forever.

use crate::circuit_breaker::{CallPermit, CircuitBreaker, Permit};
use crate::error::{OpenCircuitError, ResilienceError};
use crate::outcome::Outcome;
use crate::time_limiter::{Completion, TimeLimiter};
use std::fmt;
use std::future::Future;
use std::time::Duration;

/// Why a guarded call did not produce the operation's value.
/// This is what the fallback receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure<E> {
    /// The operation itself returned an error
    Operation(E),
    /// The operation missed its deadline
    Timeout(Duration),
    /// The breaker refused to attempt the call
    OpenCircuit(OpenCircuitError),
}

impl<E> CallFailure<E> {
    /// Outcome recorded for this failure; `None` for rejections, which are
    /// not call attempts.
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            CallFailure::Operation(_) => Some(Outcome::Failure),
            CallFailure::Timeout(_) => Some(Outcome::Timeout),
            CallFailure::OpenCircuit(_) => None,
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, CallFailure::OpenCircuit(_))
    }
}

impl<E: fmt::Display> fmt::Display for CallFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallFailure::Operation(err) => write!(f, "operation failed: {}", err),
            CallFailure::Timeout(after) => write!(f, "operation timed out after {:?}", after),
            CallFailure::OpenCircuit(err) => write!(f, "{}", err),
        }
    }
}

fn into_result<T, E>(completion: Completion<T, E>) -> Result<T, CallFailure<E>> {
    match completion {
        Completion::Success(value) => Ok(value),
        Completion::Failure(err) => Err(CallFailure::Operation(err)),
        Completion::Timeout(after) => Err(CallFailure::Timeout(after)),
    }
}

/// Holds a permit for the duration of one attempt and releases it if the
/// attempt is dropped before reporting.
struct AttemptGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Option<CallPermit>,
}

impl<'a> AttemptGuard<'a> {
    fn new(breaker: &'a CircuitBreaker, permit: CallPermit) -> Self {
        Self {
            breaker,
            permit: Some(permit),
        }
    }

    fn complete(mut self, outcome: Outcome) {
        if let Some(permit) = self.permit.take() {
            self.breaker.on_outcome(permit, outcome);
        }
    }
}

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            tracing::debug!(breaker = %self.breaker.name(), "Guarded call abandoned, releasing permit");
            self.breaker.release(permit);
        }
    }
}

/// Stateless orchestrator; one instance can serve every breaker
#[derive(Debug, Clone, Default)]
pub struct GuardedInvoker {
    limiter: TimeLimiter,
}

impl GuardedInvoker {
    pub fn new(limiter: TimeLimiter) -> Self {
        Self { limiter }
    }

    pub fn limiter(&self) -> &TimeLimiter {
        &self.limiter
    }

    /// Run `operation` under `breaker` and `timeout`, without a fallback.
    ///
    /// The operation factory is only called once the breaker permits the call.
    pub async fn attempt<F, Fut, T, E>(
        &self,
        operation: F,
        breaker: &CircuitBreaker,
        timeout: Duration,
    ) -> Result<T, CallFailure<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = match breaker.permit() {
            Permit::Allowed(permit) => permit,
            Permit::Rejected(err) => return Err(CallFailure::OpenCircuit(err)),
        };
        let guard = AttemptGuard::new(breaker, permit);

        let completion = self.limiter.run_with_deadline(operation(), timeout).await;
        guard.complete(completion.outcome());
        into_result(completion)
    }

    /// Guarded call with a total fallback. Always yields a value.
    pub async fn invoke<F, Fut, T, E, FB>(
        &self,
        operation: F,
        fallback: FB,
        breaker: &CircuitBreaker,
        timeout: Duration,
    ) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(CallFailure<E>) -> T,
    {
        match self.attempt(operation, breaker, timeout).await {
            Ok(value) => value,
            Err(failure) => {
                log_fallback(breaker, &failure);
                fallback(failure)
            }
        }
    }

    /// Guarded call whose fallback may fail. A failing fallback is the only
    /// error that leaves this layer.
    pub async fn try_invoke<F, Fut, T, E, FB, FE>(
        &self,
        operation: F,
        fallback: FB,
        breaker: &CircuitBreaker,
        timeout: Duration,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(CallFailure<E>) -> Result<T, FE>,
        FE: fmt::Display,
    {
        match self.attempt(operation, breaker, timeout).await {
            Ok(value) => Ok(value),
            Err(failure) => {
                log_fallback(breaker, &failure);
                fallback(failure).map_err(|err| {
                    tracing::error!(breaker = %breaker.name(), error = %err, "Fallback failed");
                    ResilienceError::FallbackDefect(err.to_string())
                })
            }
        }
    }

    /// Like [`invoke`](Self::invoke), but the operation runs as its own tokio
    /// task. Whether a timed-out task is aborted or left detached follows the
    /// limiter's `cancel_running_future`.
    pub async fn invoke_spawned<F, Fut, T, E, FB>(
        &self,
        operation: F,
        fallback: FB,
        breaker: &CircuitBreaker,
        timeout: Duration,
    ) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        FB: FnOnce(CallFailure<E>) -> T,
    {
        let permit = match breaker.permit() {
            Permit::Allowed(permit) => permit,
            Permit::Rejected(err) => {
                let failure = CallFailure::OpenCircuit(err);
                log_fallback(breaker, &failure);
                return fallback(failure);
            }
        };
        let guard = AttemptGuard::new(breaker, permit);

        let completion = self.limiter.run_spawned(operation(), timeout).await;
        guard.complete(completion.outcome());

        match into_result(completion) {
            Ok(value) => value,
            Err(failure) => {
                log_fallback(breaker, &failure);
                fallback(failure)
            }
        }
    }
}

fn log_fallback<E>(breaker: &CircuitBreaker, failure: &CallFailure<E>) {
    let reason = match failure {
        CallFailure::Operation(_) => "operation_failed",
        CallFailure::Timeout(_) => "timeout",
        CallFailure::OpenCircuit(_) => "circuit_open",
    };
    tracing::debug!(breaker = %breaker.name(), reason, "Using fallback");
}
