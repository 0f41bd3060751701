//! Time limiting for asynchronous operations
//!
//! Races an operation against a deadline. Exactly one side wins: either the
//! operation completes first and its own result decides the outcome, or the
//! timer fires first and the attempt is reported as a timeout. The loser is
//! never reported.
//!
//! Two execution modes are available:
//! - [`TimeLimiter::run_with_deadline`] polls the operation in place. On
//!   timeout the future is dropped, which cancels it at its next await point.
//! - [`TimeLimiter::run_spawned`] runs the operation as a tokio task. On
//!   timeout, or when the caller drops the call, the task is aborted if
//!   `cancel_running_future` is set; otherwise it keeps running detached and
//!   its eventual result is discarded.
//!
//! Neither mode waits for abandoned work to actually stop.

use crate::outcome::Outcome;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Configuration for the time limiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeLimiterConfig {
    /// Deadline applied to each call
    pub timeout: Duration,
    /// Abort spawned operations that miss the deadline
    pub cancel_running_future: bool,
}

impl Default for TimeLimiterConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            cancel_running_future: true,
        }
    }
}

/// How a time-limited operation finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion<T, E> {
    /// Operation returned a value before the deadline
    Success(T),
    /// Operation returned an error before the deadline
    Failure(E),
    /// Deadline passed first
    Timeout(Duration),
}

impl<T, E> Completion<T, E> {
    /// Outcome to record into the circuit breaker
    pub fn outcome(&self) -> Outcome {
        match self {
            Completion::Success(_) => Outcome::Success,
            Completion::Failure(_) => Outcome::Failure,
            Completion::Timeout(_) => Outcome::Timeout,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Completion::Success(_))
    }
}

/// Stateless deadline enforcer; safe to share across concurrent calls
///
/// # Example
/// ```
/// use tripwire_core_resilience::time_limiter::{Completion, TimeLimiter};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() {
/// let limiter = TimeLimiter::with_timeout(Duration::from_secs(5));
///
/// let slow = async {
///     tokio::time::sleep(Duration::from_secs(10)).await;
///     Ok::<_, std::io::Error>("late")
/// };
/// assert!(matches!(limiter.run(slow).await, Completion::Timeout(_)));
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct TimeLimiter {
    config: TimeLimiterConfig,
}

impl TimeLimiter {
    pub fn new(config: TimeLimiterConfig) -> Self {
        Self { config }
    }

    /// Create a limiter with the given deadline and default cancellation
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(TimeLimiterConfig {
            timeout,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &TimeLimiterConfig {
        &self.config
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Run `operation` against the configured deadline
    pub async fn run<F, T, E>(&self, operation: F) -> Completion<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.run_with_deadline(operation, self.config.timeout).await
    }

    /// Run `operation` in place against an explicit deadline.
    ///
    /// On timeout the operation future is dropped.
    pub async fn run_with_deadline<F, T, E>(&self, operation: F, timeout: Duration) -> Completion<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        match tokio::time::timeout(timeout, operation).await {
            Ok(Ok(value)) => Completion::Success(value),
            Ok(Err(err)) => Completion::Failure(err),
            Err(_) => {
                tracing::debug!(timeout_ms = timeout.as_millis() as u64, "Operation timed out");
                Completion::Timeout(timeout)
            }
        }
    }

    /// Run `operation` as a separate tokio task against an explicit deadline.
    ///
    /// A panic inside the operation is propagated to the caller. With
    /// `cancel_running_future` set, the task is also aborted when the
    /// returned future is dropped before it settles.
    pub async fn run_spawned<F, T, E>(&self, operation: F, timeout: Duration) -> Completion<T, E>
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let mut task = SpawnedTask {
            handle: tokio::spawn(operation),
            abort_on_drop: self.config.cancel_running_future,
        };

        match tokio::time::timeout(timeout, &mut task.handle).await {
            Ok(Ok(Ok(value))) => Completion::Success(value),
            Ok(Ok(Err(err))) => Completion::Failure(err),
            Ok(Err(join_err)) if join_err.is_panic() => {
                std::panic::resume_unwind(join_err.into_panic())
            }
            // Only reachable when the runtime is shutting down and cancels the task
            Ok(Err(_)) => Completion::Timeout(timeout),
            Err(_) => {
                if task.abort_on_drop {
                    tracing::debug!(
                        timeout_ms = timeout.as_millis() as u64,
                        "Spawned operation timed out, aborted"
                    );
                } else {
                    tracing::debug!(
                        timeout_ms = timeout.as_millis() as u64,
                        "Spawned operation timed out, left running detached"
                    );
                }
                Completion::Timeout(timeout)
            }
        }
    }
}

/// Join handle that aborts its task when dropped, unless detached
struct SpawnedTask<T> {
    handle: JoinHandle<T>,
    abort_on_drop: bool,
}

impl<T> Drop for SpawnedTask<T> {
    fn drop(&mut self) {
        if self.abort_on_drop {
            self.handle.abort();
        }
    }
}
