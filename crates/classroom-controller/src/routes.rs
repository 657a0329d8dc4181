//! HTTP routes for the Classroom Controller.
//!
//! Defines the Axum router and application state.

use crate::actors::RoomDirectoryActorHandle;
use crate::auth::TokenIssuer;
use crate::config::Config;
use crate::generator::QuestionGenerator;
use crate::handlers;
use crate::middleware::{http_metrics_middleware, require_room_credential, AuthState};
use crate::observability::{health_router, HealthState};
use crate::store::{ActivityLog, RetryPolicy};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Room Directory supervisor.
    pub directory: RoomDirectoryActorHandle,

    /// Token Issuer, shared with the credential middleware.
    pub issuer: Arc<TokenIssuer>,

    /// Durable activity log.
    pub log: Arc<dyn ActivityLog>,

    /// Retry schedule for direct log appends.
    pub retry: RetryPolicy,

    /// Question generator; `None` when no API key is configured.
    pub generator: Option<Arc<dyn QuestionGenerator>>,
}

/// Build the application routes.
///
/// - `/health`, `/ready` - health checks, public
/// - `/metrics` - Prometheus scrape endpoint, public
/// - `/api/v1/token`, `/api/v1/rooms`, `/api/v1/rooms/{code}`,
///   `/api/v1/rooms/{code}/join`, `/api/v1/activity` - public
/// - `/api/v1/rooms/{code}/ws` - public route, credential in `?token=`
/// - everything else under `/api/v1/rooms/{code}/...` - Bearer credential
/// - TraceLayer, 30 second timeout, and HTTP metrics (outermost)
pub fn build_routes(
    state: Arc<AppState>,
    health: Arc<HealthState>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let auth_state = Arc::new(AuthState {
        issuer: Arc::clone(&state.issuer),
    });

    let public_routes = Router::new()
        .route("/api/v1/token", get(handlers::issue_token))
        .route("/api/v1/rooms", post(handlers::create_room))
        .route("/api/v1/rooms/:code", get(handlers::get_room))
        .route("/api/v1/rooms/:code/join", post(handlers::join_room))
        .route("/api/v1/rooms/:code/ws", get(handlers::connect))
        .route("/api/v1/activity", post(handlers::log_activity))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let protected_routes = Router::new()
        .route("/api/v1/rooms/:code/start", post(handlers::start_room))
        .route("/api/v1/rooms/:code/end", post(handlers::end_room))
        .route("/api/v1/rooms/:code/topics", post(handlers::add_topic))
        .route(
            "/api/v1/rooms/:code/topics/generate",
            post(handlers::generate_topic),
        )
        .route(
            "/api/v1/rooms/:code/topics/next",
            post(handlers::trigger_next),
        )
        .route(
            "/api/v1/rooms/:code/topics/:id/trigger",
            post(handlers::trigger_topic),
        )
        .route(
            "/api/v1/rooms/:code/topics/:id/close",
            post(handlers::close_topic),
        )
        .route("/api/v1/rooms/:code/answers", post(handlers::submit_answer))
        .route(
            "/api/v1/rooms/:code/transcripts",
            post(handlers::feed_transcript),
        )
        .route("/api/v1/rooms/:code/voice", get(handlers::voice_status))
        .route("/api/v1/rooms/:code/report", get(handlers::get_report))
        .route_layer(middleware::from_fn_with_state(
            auth_state,
            require_room_credential,
        ))
        .with_state(state);

    // Layer order (bottom-to-top execution):
    // 1. TraceLayer (innermost)
    // 2. TimeoutLayer
    // 3. http_metrics_middleware (outermost, sees framework rejections too)
    public_routes
        .merge(health_router(health))
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
