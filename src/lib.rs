/*!
 * Tripwire - guarded greeting service
 *
 * A small HTTP service whose slow, occasionally failing greeting downstream
 * is protected by the resilience core:
 * - Circuit breaker with a count-based outcome window
 * - Per-call time limit
 * - Fallback reply whenever the guarded call cannot succeed
 * - TOML configuration with per-breaker overrides
 */

pub mod config;
pub mod error;
pub mod greet;
pub mod logging;
pub mod server;

// Re-export commonly used types
pub use config::{AppConfig, GuardSettings, LogLevel};
pub use error::{Result, TripwireError};
pub use greet::{DelayPolicy, GreetingService};
pub use server::{router, run_server, AppState, GREET_BREAKER};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
