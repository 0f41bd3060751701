//! Axum server exposing the guarded greeting

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tripwire_core_resilience::{BreakerHandle, BreakerMetrics, BreakerRegistry, CallFailure};

use crate::config::AppConfig;
use crate::error::{Result, TripwireError};
use crate::greet::{require_name, GreetingService};

/// Name of the breaker guarding the greeting downstream
pub const GREET_BREAKER: &str = "greet";

/// Shared state handed to every handler
#[derive(Debug, Clone)]
pub struct AppState {
    registry: BreakerRegistry,
    greeter: GreetingService,
    greet: BreakerHandle,
    fallback_message: Arc<str>,
}

impl AppState {
    pub fn new(
        registry: BreakerRegistry,
        greeter: GreetingService,
        fallback_message: impl Into<Arc<str>>,
    ) -> Result<Self> {
        let greet = registry.get_or_create(GREET_BREAKER)?;
        Ok(Self {
            registry,
            greeter,
            greet,
            fallback_message: fallback_message.into(),
        })
    }

    /// State built from configuration: registry with overrides, random-delay greeter
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.build_registry()?,
            GreetingService::from_config(&config.greeting),
            config.greeting.fallback_message.as_str(),
        )
    }

    pub fn registry(&self) -> &BreakerRegistry {
        &self.registry
    }

    pub fn greet_breaker(&self) -> &BreakerHandle {
        &self.greet
    }

    /// Greet `name` through the greet breaker.
    ///
    /// A missing or blank name is rejected before the breaker is consulted and
    /// is never counted as a downstream failure. Past that check any timeout
    /// or rejection yields the fallback message.
    pub async fn guarded_greeting(&self, name: &str) -> Result<String> {
        let name = require_name(Some(name))?;
        let reply = self
            .greet
            .call(
                move || async move { Ok::<_, Infallible>(self.greeter.greet(name).await) },
                |failure: CallFailure<Infallible>| {
                    tracing::debug!(breaker = GREET_BREAKER, "Serving fallback greeting: {}", failure);
                    self.fallback_message.to_string()
                },
            )
            .await;
        Ok(reply)
    }
}

/// Query string for `/greet`
#[derive(Debug, Deserialize)]
pub struct GreetQuery {
    pub name: Option<String>,
}

/// One breaker in the `/breakers` listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub name: String,
    pub state: String,
    pub buffered_calls: usize,
    pub failed_calls: usize,
    pub successful_calls: usize,
    pub failure_rate: Option<f64>,
    pub not_permitted_calls: u64,
}

impl BreakerStatus {
    fn from_metrics(name: String, metrics: BreakerMetrics) -> Self {
        Self {
            name,
            state: metrics.state.name().to_string(),
            buffered_calls: metrics.buffered_calls,
            failed_calls: metrics.failed_calls,
            successful_calls: metrics.successful_calls,
            failure_rate: metrics.failure_rate,
            not_permitted_calls: metrics.not_permitted_calls,
        }
    }
}

impl IntoResponse for TripwireError {
    fn into_response(self) -> Response {
        let status = if self.is_client_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, self.to_string()).into_response()
    }
}

/// Greeting handler
async fn greet_handler(
    State(state): State<AppState>,
    Query(query): Query<GreetQuery>,
) -> Result<String> {
    let name = query.name.as_deref().unwrap_or_default();
    state.guarded_greeting(name).await.map_err(|e| {
        tracing::debug!("Rejected greeting request: {}", e);
        e
    })
}

/// Breaker listing handler
async fn breakers_handler(State(state): State<AppState>) -> Json<Vec<BreakerStatus>> {
    let statuses = state
        .registry
        .all_metrics()
        .into_iter()
        .map(|(name, metrics)| BreakerStatus::from_metrics(name, metrics))
        .collect();
    Json(statuses)
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/greet", get(greet_handler))
        .route("/breakers", get(breakers_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves
pub async fn run_server<S>(state: AppState, listener: TcpListener, shutdown: S) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    tracing::info!("Tripwire listening on http://{}", addr);
    tracing::info!("   Greet: http://{}/greet?name=you", addr);
    tracing::info!("   Breakers: http://{}/breakers", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| TripwireError::Server(e.to_string()))?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(e) => tracing::warn!("Failed to listen for Ctrl-C: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::greet::DelayPolicy;
    use std::time::Duration;
    use tripwire_core_resilience::CircuitState;

    fn state_with_delay(delay: Duration) -> AppState {
        crate::logging::init_test_logging();
        let registry = AppConfig::default().build_registry().unwrap();
        AppState::new(
            registry,
            GreetingService::new(DelayPolicy::Fixed(delay)),
            "hello world!",
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_greeting_success() {
        let state = state_with_delay(Duration::from_secs(2));
        assert_eq!(state.guarded_greeting("Ada").await.unwrap(), "Hello Ada! (in 2)");
        assert_eq!(state.greet_breaker().breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_guarded_greeting_timeout_falls_back() {
        let mut config = AppConfig::default();
        config.defaults.timeout_ms = 1_000;
        let registry = config.build_registry().unwrap();
        let state = AppState::new(
            registry,
            GreetingService::new(DelayPolicy::Fixed(Duration::from_secs(3))),
            "hello world!",
        )
        .unwrap();

        assert_eq!(state.guarded_greeting("Ada").await.unwrap(), "hello world!");
        assert_eq!(state.greet_breaker().breaker().metrics().failed_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_name_never_reaches_breaker() {
        let state = state_with_delay(Duration::ZERO);

        for name in ["", "   ", "\t"] {
            let err = state.guarded_greeting(name).await.unwrap_err();
            assert!(err.is_client_error());
        }

        let metrics = state.greet_breaker().breaker().metrics();
        assert_eq!(metrics.buffered_calls, 0);
        assert_eq!(metrics.failed_calls, 0);
        assert_eq!(metrics.not_permitted_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_is_trimmed_before_greeting() {
        let state = state_with_delay(Duration::ZERO);
        assert_eq!(state.guarded_greeting("  Ada ").await.unwrap(), "Hello Ada! (in 0)");
        assert_eq!(state.greet_breaker().breaker().metrics().successful_calls, 1);
    }

    #[test]
    fn test_breaker_registered_on_startup() {
        let state = state_with_delay(Duration::ZERO);
        assert_eq!(state.registry().names(), vec![GREET_BREAKER.to_string()]);
    }

    #[test]
    fn test_client_error_maps_to_bad_request() {
        let response = TripwireError::InvalidInput("name".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = TripwireError::Server("down".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
