//! Classroom Controller
//!
//! HTTP and WebSocket server for live classroom sessions.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing and the Prometheus metrics recorder
//! 3. Open the durable activity log (Postgres, or in-memory without `DATABASE_URL`)
//! 4. Start the Room Directory actor
//! 5. Serve the HTTP API until SIGINT/SIGTERM, then drain rooms

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use classroom_controller::actors::{
    ActorMetrics, DirectorySettings, RoomDirectoryActorHandle, RoomSettings,
};
use classroom_controller::auth::TokenIssuer;
use classroom_controller::config::Config;
use classroom_controller::generator::{HttpQuestionGenerator, QuestionGenerator};
use classroom_controller::observability::{metrics::init_metrics_recorder, HealthState};
use classroom_controller::presenter::voice::VoiceSettings;
use classroom_controller::routes::{build_routes, AppState};
use classroom_controller::store::{ActivityLog, InMemoryActivityLog, PgActivityLog, RetryPolicy};
use common::secret::ExposeSecret;
use tokio::signal;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration first; the log format depends on it.
    let config = Config::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {e}");
        e
    })?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "classroom_controller=debug,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    info!("Starting Classroom Controller");
    info!(
        bind_address = %config.bind_address,
        max_rooms = config.max_rooms,
        round_duration_seconds = config.round_duration.as_secs(),
        distraction_penalty = config.distraction_penalty,
        durable_log = config.database_url.is_some(),
        generator_enabled = config.generator_api_key.is_some(),
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    let log: Arc<dyn ActivityLog> = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(20)
                .min_connections(2)
                .acquire_timeout(Duration::from_secs(5))
                .idle_timeout(Duration::from_secs(600))
                .connect(url.expose_secret())
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to connect to database");
                    e
                })?;

            sqlx::migrate!("../../migrations")
                .run(&pool)
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to run database migrations");
                    e
                })?;
            info!("Database connection established");
            Arc::new(PgActivityLog::new(pool))
        }
        None => {
            warn!("DATABASE_URL not set, activity log is in-memory and lost on restart");
            Arc::new(InMemoryActivityLog::new())
        }
    };

    let generator: Option<Arc<dyn QuestionGenerator>> = match &config.generator_api_key {
        Some(key) => Some(Arc::new(HttpQuestionGenerator::new(
            config.generator_url.clone(),
            key.clone(),
            config.generator_model.clone(),
        )?)),
        None => {
            warn!("CC_GENERATOR_API_KEY not set, topic generation disabled");
            None
        }
    };

    let retry = RetryPolicy::default();
    let directory = RoomDirectoryActorHandle::new(
        DirectorySettings {
            max_rooms: config.max_rooms,
            ended_room_retention: config.ended_room_retention,
            idle_room_timeout: config.idle_room_timeout,
            room: RoomSettings {
                round_duration: config.round_duration,
                voice: VoiceSettings {
                    trigger_phrase: config.trigger_phrase.clone(),
                    cooldown: config.voice_cooldown,
                    restart_delay: config.voice_restart_delay,
                },
                log: Arc::clone(&log),
                retry,
                appends: TaskTracker::new(),
            },
        },
        ActorMetrics::new(),
    );
    info!("Room directory started");

    let issuer = Arc::new(TokenIssuer::new(
        config.media_api_key.clone(),
        config.media_api_secret.clone(),
        config.token_ttl,
    ));
    info!(token_ttl_secs = issuer.ttl().as_secs(), "Token issuer ready");

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        e
    })?;

    let state = Arc::new(AppState {
        config,
        directory: directory.clone(),
        issuer,
        log,
        retry,
        generator,
    });
    let app = build_routes(state, Arc::clone(&health_state), prometheus_handle);

    // Bind before reporting ready so a bind failure fails startup.
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, addr = %addr, "Failed to bind HTTP server");
        e
    })?;
    health_state.set_ready();
    info!(addr = %addr, "Classroom Controller listening");

    let shutdown_health = Arc::clone(&health_state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown...");
            // Stop receiving traffic before the rooms go away.
            shutdown_health.set_not_ready();
        })
        .await?;

    match directory.get_status().await {
        Ok(status) => info!(
            rooms = status.room_count,
            members = status.member_count,
            pending_appends = status.pending_appends,
            peak_mailbox_depth = status.peak_mailbox_depth,
            "Draining room directory"
        ),
        Err(e) => warn!(error = %e, "Room directory status unavailable"),
    }
    if let Err(e) = directory.shutdown().await {
        warn!(error = %e, "Room directory shutdown error");
    }

    info!("Classroom Controller shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Without signal handlers the service cannot shut down gracefully"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Without signal handlers the service cannot shut down gracefully"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
