//! Tripwire Core Resilience: Pure-logic call protection primitives
//!
//! # Overview
//!
//! This crate guards a slow or failing asynchronous operation so that the
//! caller always gets an answer in bounded time. It includes:
//!
//! - **Outcome Window**: Count-bounded ring of recent outcomes giving a rolling failure rate
//! - **Circuit Breaker**: Stops issuing calls once the failure rate crosses a threshold,
//!   then probes for recovery with a limited number of half-open trial calls
//! - **Time Limiter**: Races an operation against a deadline and reports a timeout
//! - **Guarded Invoker**: Breaker + time limiter + fallback composed into one call
//! - **Breaker Registry**: One breaker per named call site, reused by name
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Network transport (HTTP, gRPC)
//! - Request parsing or input validation
//! - Metrics exporters or log sinks
//!
//! It consumes "an asynchronous operation producing a value or an error" and
//! returns "a value, possibly substituted by a fallback".
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Your Application                │
//! └─────────────┬───────────────────────────┘
//!               │ guarded_call(handle, op, fallback, timeout)
//!               ▼
//! ┌─────────────────────────────────────────┐
//! │       Circuit Breaker                   │  ← Fail-fast protection
//! │  (Outcome window, opens on threshold)   │──── rejected ───┐
//! └─────────────┬───────────────────────────┘                 │
//!               │ permitted                                   │
//!               ▼                                             │
//! ┌─────────────────────────────────────────┐                 │
//! │       Time Limiter                      │  ← Bounded wait │
//! │  (Deadline race, drop/abort on expiry)  │                 │
//! └─────────────┬───────────────────────────┘                 │
//!               │ outcome recorded                            │
//!               ▼                                             ▼
//!         value ◄──── success      failure/timeout ────► Fallback
//! ```
//!
//! # Usage Example
//!
//! ```no_run
//! use tripwire_core_resilience::{BreakerRegistry, GuardConfig, ResilienceError};
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let registry = BreakerRegistry::new(GuardConfig::default())?;
//! let inventory = registry.get_or_create("inventory")?;
//!
//! let stock = inventory
//!     .call(
//!         || async {
//!             // Your potentially slow or failing operation
//!             Ok::<u32, std::io::Error>(42)
//!         },
//!         |_failure| 0,
//!     )
//!     .await;
//! # let _ = stock;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod invoker;
pub mod outcome;
pub mod registry;
pub mod time_limiter;
pub mod window;

// Re-export main types for convenience
pub use circuit_breaker::{
    BreakerMetrics, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitState, Permit,
};
pub use clock::{Clock, ManualClock, TokioClock};
pub use error::{OpenCircuitError, ResilienceError};
pub use invoker::{CallFailure, GuardedInvoker};
pub use outcome::{Outcome, RecordedOutcome};
pub use registry::{guarded_call, BreakerHandle, BreakerRegistry, GuardConfig};
pub use time_limiter::{Completion, TimeLimiter, TimeLimiterConfig};
pub use window::OutcomeWindow;

/// Prelude module for convenient imports
///
/// # Example
/// ```
/// use tripwire_core_resilience::prelude::*;
/// ```
pub mod prelude {
    pub use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState, Permit};
    pub use super::error::{OpenCircuitError, ResilienceError};
    pub use super::invoker::{CallFailure, GuardedInvoker};
    pub use super::outcome::Outcome;
    pub use super::registry::{guarded_call, BreakerHandle, BreakerRegistry, GuardConfig};
    pub use super::time_limiter::{Completion, TimeLimiter, TimeLimiterConfig};
}
