//! Breaker Registry: one named breaker per protected call site
//!
//! The registry is an ordinary value created at startup and passed to every
//! call site that needs it; there is no process-global instance. Creating a
//! breaker under a name that already exists hands back the existing breaker,
//! so re-running setup code never throws away accumulated state.
//!
//! # Example
//!
//! ```
//! use tripwire_core_resilience::registry::{guarded_call, BreakerRegistry, GuardConfig};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tripwire_core_resilience::ResilienceError> {
//! let registry = BreakerRegistry::new(GuardConfig::default())?;
//! let greet = registry.get_or_create("greet")?;
//!
//! let reply = guarded_call(
//!     &greet,
//!     || async { Ok::<_, std::io::Error>("Hello Ada!".to_string()) },
//!     |_failure| "hello world!".to_string(),
//!     Duration::from_secs(5),
//! )
//! .await;
//! assert_eq!(reply, "Hello Ada!");
//! # Ok(())
//! # }
//! ```

use crate::circuit_breaker::{BreakerMetrics, CircuitBreaker, CircuitBreakerConfig};
use crate::clock::{Clock, TokioClock};
use crate::error::ResilienceError;
use crate::invoker::{CallFailure, GuardedInvoker};
use crate::time_limiter::{TimeLimiter, TimeLimiterConfig};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

/// Everything needed to guard one call site
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GuardConfig {
    pub circuit_breaker: CircuitBreakerConfig,
    pub time_limiter: TimeLimiterConfig,
}

impl GuardConfig {
    pub fn validate(&self) -> Result<(), ResilienceError> {
        self.circuit_breaker.validate()?;
        if self.time_limiter.timeout.is_zero() {
            return Err(ResilienceError::InvalidConfig(
                "timeout must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Handle to a named breaker plus the time limiter configured for it.
/// Cheap to clone; clones share the breaker state.
#[derive(Debug, Clone)]
pub struct BreakerHandle {
    breaker: CircuitBreaker,
    invoker: GuardedInvoker,
}

impl BreakerHandle {
    fn new(breaker: CircuitBreaker, time_limiter: TimeLimiterConfig) -> Self {
        Self {
            breaker,
            invoker: GuardedInvoker::new(TimeLimiter::new(time_limiter)),
        }
    }

    pub fn name(&self) -> &str {
        self.breaker.name()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn invoker(&self) -> &GuardedInvoker {
        &self.invoker
    }

    /// Per-call deadline configured for this breaker
    pub fn timeout(&self) -> Duration {
        self.invoker.limiter().timeout()
    }

    /// Guarded call using the configured deadline
    pub async fn call<F, Fut, T, E, FB>(&self, operation: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(CallFailure<E>) -> T,
    {
        guarded_call(self, operation, fallback, self.timeout()).await
    }

    /// Guarded call with a fallible fallback, using the configured deadline
    pub async fn try_call<F, Fut, T, E, FB, FE>(
        &self,
        operation: F,
        fallback: FB,
    ) -> Result<T, ResilienceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        FB: FnOnce(CallFailure<E>) -> Result<T, FE>,
        FE: fmt::Display,
    {
        self.invoker
            .try_invoke(operation, fallback, &self.breaker, self.timeout())
            .await
    }

    /// Guarded call running the operation as its own task
    pub async fn call_spawned<F, Fut, T, E, FB>(&self, operation: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        FB: FnOnce(CallFailure<E>) -> T,
    {
        self.invoker
            .invoke_spawned(operation, fallback, &self.breaker, self.timeout())
            .await
    }
}

/// The single call surface collaborators need: run `operation` through the
/// handle's breaker with an explicit deadline, falling back on any failure.
pub async fn guarded_call<F, Fut, T, E, FB>(
    handle: &BreakerHandle,
    operation: F,
    fallback: FB,
    timeout: Duration,
) -> T
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    FB: FnOnce(CallFailure<E>) -> T,
{
    handle
        .invoker
        .invoke(operation, fallback, &handle.breaker, timeout)
        .await
}

/// Named breakers, reused by name
#[derive(Debug, Clone)]
pub struct BreakerRegistry {
    defaults: Arc<GuardConfig>,
    clock: Arc<dyn Clock>,
    handles: Arc<RwLock<HashMap<String, BreakerHandle>>>,
}

impl BreakerRegistry {
    /// Create an empty registry whose unnamed-config breakers use `defaults`
    pub fn new(defaults: GuardConfig) -> Result<Self, ResilienceError> {
        Self::with_clock(defaults, Arc::new(TokioClock))
    }

    /// Create an empty registry whose breakers read time from `clock`
    pub fn with_clock(defaults: GuardConfig, clock: Arc<dyn Clock>) -> Result<Self, ResilienceError> {
        defaults.validate()?;
        Ok(Self {
            defaults: Arc::new(defaults),
            clock,
            handles: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn defaults(&self) -> &GuardConfig {
        &self.defaults
    }

    /// Create the breaker for `name`, or return the existing one unchanged
    pub fn create_breaker(
        &self,
        name: &str,
        config: GuardConfig,
    ) -> Result<BreakerHandle, ResilienceError> {
        if let Some(existing) = self.get(name) {
            if existing.breaker.config() != &config.circuit_breaker
                || existing.invoker.limiter().config() != &config.time_limiter
            {
                tracing::debug!(breaker = name, "Breaker already registered, keeping existing configuration");
            }
            return Ok(existing);
        }

        config.validate()?;
        let breaker = CircuitBreaker::with_clock(
            name,
            config.circuit_breaker,
            self.clock.clone(),
        )?;
        let candidate = BreakerHandle::new(breaker, config.time_limiter);

        let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
        let handle = handles
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(breaker = name, "Circuit breaker registered");
                candidate
            })
            .clone();
        Ok(handle)
    }

    /// Breaker for `name`, created with the registry defaults if missing
    pub fn get_or_create(&self, name: &str) -> Result<BreakerHandle, ResilienceError> {
        self.create_breaker(name, (*self.defaults).clone())
    }

    pub fn get(&self, name: &str) -> Option<BreakerHandle> {
        let handles = self.handles.read().unwrap_or_else(PoisonError::into_inner);
        handles.get(name).cloned()
    }

    /// Remove a breaker; the next creation under this name starts fresh
    pub fn remove(&self, name: &str) -> Option<BreakerHandle> {
        let mut handles = self.handles.write().unwrap_or_else(PoisonError::into_inner);
        handles.remove(name)
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let handles = self.handles.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = handles.keys().cloned().collect();
        names.sort();
        names
    }

    /// Metrics snapshot of every breaker, sorted by name
    pub fn all_metrics(&self) -> Vec<(String, BreakerMetrics)> {
        let handles = self.handles.read().unwrap_or_else(PoisonError::into_inner);
        let mut all: Vec<(String, BreakerMetrics)> = handles
            .iter()
            .map(|(name, handle)| (name.clone(), handle.breaker.metrics()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn len(&self) -> usize {
        self.handles.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;
    use crate::clock::ManualClock;
    use crate::outcome::Outcome;
    use crate::Permit;

    fn small_config() -> GuardConfig {
        GuardConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_rate_threshold: 50.0,
                sliding_window_size: 4,
                minimum_calls: 2,
                open_state_duration: Duration::from_secs(10),
                half_open_trial_calls: 1,
            },
            time_limiter: TimeLimiterConfig {
                timeout: Duration::from_secs(5),
                cancel_running_future: true,
            },
        }
    }

    fn fail_twice(handle: &BreakerHandle) {
        for _ in 0..2 {
            match handle.breaker().permit() {
                Permit::Allowed(p) => handle.breaker().on_outcome(p, Outcome::Failure),
                Permit::Rejected(err) => panic!("unexpected rejection: {}", err),
            }
        }
    }

    #[test]
    fn test_reuse_by_name_shares_state() {
        let registry = BreakerRegistry::new(small_config()).unwrap();
        let first = registry.create_breaker("greet", small_config()).unwrap();
        fail_twice(&first);

        // Second creation with different settings keeps the first breaker
        let second = registry
            .create_breaker("greet", GuardConfig::default())
            .unwrap();
        assert!(second.breaker().state().is_open());
        assert_eq!(second.breaker().config().sliding_window_size, 4);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_names_are_independent() {
        let registry = BreakerRegistry::new(small_config()).unwrap();
        let a = registry.get_or_create("a").unwrap();
        let b = registry.get_or_create("b").unwrap();
        fail_twice(&a);

        assert!(a.breaker().state().is_open());
        assert_eq!(b.breaker().state(), CircuitState::Closed);
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let mut bad = small_config();
        bad.time_limiter.timeout = Duration::ZERO;
        assert!(matches!(
            BreakerRegistry::new(bad.clone()),
            Err(ResilienceError::InvalidConfig(_))
        ));

        let registry = BreakerRegistry::new(small_config()).unwrap();
        assert!(registry.create_breaker("bad", bad).is_err());
        assert!(registry.get("bad").is_none());
    }

    #[test]
    fn test_remove_starts_fresh() {
        let clock = ManualClock::new();
        let registry = BreakerRegistry::with_clock(small_config(), Arc::new(clock)).unwrap();
        let handle = registry.get_or_create("greet").unwrap();
        fail_twice(&handle);

        assert!(registry.remove("greet").is_some());
        assert!(registry.remove("greet").is_none());

        let fresh = registry.get_or_create("greet").unwrap();
        assert_eq!(fresh.breaker().state(), CircuitState::Closed);
    }

    #[test]
    fn test_all_metrics_sorted() {
        let registry = BreakerRegistry::new(small_config()).unwrap();
        registry.get_or_create("zeta").unwrap();
        registry.get_or_create("alpha").unwrap();
        fail_twice(&registry.get("alpha").unwrap());

        let metrics = registry.all_metrics();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].0, "alpha");
        assert!(metrics[0].1.state.is_open());
        assert_eq!(metrics[1].0, "zeta");
        assert_eq!(metrics[1].1.state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_call_uses_configured_timeout() {
        let registry = BreakerRegistry::new(small_config()).unwrap();
        let handle = registry.get_or_create("slow").unwrap();
        assert_eq!(handle.timeout(), Duration::from_secs(5));

        let reply = handle
            .call(
                || async {
                    tokio::time::sleep(Duration::from_secs(6)).await;
                    Ok::<_, String>("late")
                },
                |failure| {
                    assert!(matches!(failure, CallFailure::Timeout(_)));
                    "fallback"
                },
            )
            .await;
        assert_eq!(reply, "fallback");
        assert_eq!(handle.breaker().metrics().failed_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_call_fallback_defect() {
        let registry = BreakerRegistry::new(small_config()).unwrap();
        let handle = registry.get_or_create("defect").unwrap();

        let result = handle
            .try_call(
                || async { Err::<u8, _>("down") },
                |_| Err::<u8, _>("no fallback value"),
            )
            .await;
        assert!(matches!(result, Err(ResilienceError::FallbackDefect(_))));
    }
}
