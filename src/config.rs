/*!
 * Configuration types for Tripwire
 */

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tripwire_core_resilience::{
    BreakerRegistry, CircuitBreakerConfig, GuardConfig, TimeLimiterConfig,
};

use crate::error::Result;

/// Top-level configuration loaded from TOML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Greeting service settings
    #[serde(default)]
    pub greeting: GreetingConfig,

    /// Guard settings applied to every breaker without an override
    #[serde(default)]
    pub defaults: GuardSettings,

    /// Per-breaker overrides, keyed by breaker name
    #[serde(default)]
    pub breakers: BTreeMap<String, GuardSettings>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            log_file: None,
            verbose: false,
            server: ServerConfig::default(),
            greeting: GreetingConfig::default(),
            defaults: GuardSettings::default(),
            breakers: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Guard settings for `name`: its override if present, else the defaults
    pub fn settings_for(&self, name: &str) -> &GuardSettings {
        self.breakers.get(name).unwrap_or(&self.defaults)
    }

    /// Build the breaker registry and register every configured override
    pub fn build_registry(&self) -> Result<BreakerRegistry> {
        let registry = BreakerRegistry::new(self.defaults.to_guard_config())?;
        for (name, settings) in &self.breakers {
            registry.create_breaker(name, settings.to_guard_config())?;
        }
        Ok(registry)
    }
}

/// HTTP server settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind, e.g. "127.0.0.1:8080"
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

/// Greeting service settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GreetingConfig {
    /// Greetings take a random 0..max_delay_secs seconds
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Reply used whenever the guarded greeting cannot produce one
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,
}

impl Default for GreetingConfig {
    fn default() -> Self {
        Self {
            max_delay_secs: default_max_delay_secs(),
            fallback_message: default_fallback_message(),
        }
    }
}

/// Breaker and time limiter settings in file-friendly units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardSettings {
    /// Failure rate in percent at which the circuit opens
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,

    /// Number of recent outcomes considered
    #[serde(default = "default_sliding_window_size")]
    pub sliding_window_size: usize,

    /// Outcomes needed before the failure rate is evaluated
    #[serde(default = "default_minimum_calls")]
    pub minimum_calls: usize,

    /// Time the circuit stays open before probing, in milliseconds
    #[serde(default = "default_open_state_duration_ms")]
    pub open_state_duration_ms: u64,

    /// Probe calls allowed while half-open
    #[serde(default = "default_half_open_trial_calls")]
    pub half_open_trial_calls: usize,

    /// Per-call deadline in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Abort spawned operations that miss the deadline
    #[serde(default = "default_true")]
    pub cancel_running_future: bool,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            failure_rate_threshold: default_failure_rate_threshold(),
            sliding_window_size: default_sliding_window_size(),
            minimum_calls: default_minimum_calls(),
            open_state_duration_ms: default_open_state_duration_ms(),
            half_open_trial_calls: default_half_open_trial_calls(),
            timeout_ms: default_timeout_ms(),
            cancel_running_future: true,
        }
    }
}

impl GuardSettings {
    /// Convert to the resilience core's configuration
    pub fn to_guard_config(&self) -> GuardConfig {
        GuardConfig {
            circuit_breaker: CircuitBreakerConfig {
                failure_rate_threshold: self.failure_rate_threshold,
                sliding_window_size: self.sliding_window_size,
                minimum_calls: self.minimum_calls,
                open_state_duration: Duration::from_millis(self.open_state_duration_ms),
                half_open_trial_calls: self.half_open_trial_calls,
            },
            time_limiter: TimeLimiterConfig {
                timeout: Duration::from_millis(self.timeout_ms),
                cancel_running_future: self.cancel_running_future,
            },
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_delay_secs() -> u64 {
    10
}

fn default_fallback_message() -> String {
    "hello world!".to_string()
}

fn default_failure_rate_threshold() -> f64 {
    50.0
}

fn default_sliding_window_size() -> usize {
    100
}

fn default_minimum_calls() -> usize {
    100
}

fn default_open_state_duration_ms() -> u64 {
    60_000
}

fn default_half_open_trial_calls() -> usize {
    10
}

fn default_timeout_ms() -> u64 {
    5_000
}
