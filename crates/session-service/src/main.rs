//! Session Service
//!
//! Real-time room coordinator for multi-party signaling.
//!
//! # Servers
//!
//! - HTTP server for the WebSocket upgrade route (default: 0.0.0.0:8080)
//! - HTTP server for health endpoints and metrics (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Build the identity validator and the room hub
//! 4. Start health HTTP server (liveness, readiness, metrics)
//! 5. Start WebSocket server, then mark ready
//! 6. Wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use session_service::auth::{IdentityValidator, JwtIdentityValidator, StaticIdentityValidator};
use session_service::config::Config;
use session_service::observability::{health_router, init_metrics_recorder, HealthState};
use session_service::session::Hub;
use session_service::ws::{ws_router, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Session Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        auth_disabled = config.auth_disabled,
        allowed_origins = ?config.allowed_origins,
        max_chat_history = config.max_chat_history,
        recent_chats_limit = config.recent_chats_limit,
        outbound_buffer = config.outbound_buffer,
        "Configuration loaded successfully"
    );

    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let shutdown_token = CancellationToken::new();

    let validator: Arc<dyn IdentityValidator> = match &config.jwt_secret {
        Some(secret) if !config.auth_disabled => Arc::new(JwtIdentityValidator::new(secret)),
        _ => {
            warn!("Authentication disabled, tokens are accepted as client ids");
            Arc::new(StaticIdentityValidator)
        }
    };

    let hub = Hub::new(config.room_settings());
    let health_state = Arc::new(HealthState::new(Arc::clone(&hub)));

    // Start health HTTP server (liveness, readiness and /metrics)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    // Bind listener BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let health_shutdown_token = shutdown_token.child_token();
    let health_task = tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Start WebSocket server
    let ws_addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.bind_address, "Invalid bind address");
        format!("Invalid bind address: {e}")
    })?;

    let app_state = Arc::new(AppState {
        hub: Arc::clone(&hub),
        validator,
        allowed_origins: config.allowed_origins.clone(),
        outbound_buffer: config.outbound_buffer,
        shutdown: shutdown_token.child_token(),
    });

    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await.map_err(|e| {
        error!(error = %e, addr = %ws_addr, "Failed to bind WebSocket server");
        format!("Failed to bind WebSocket server to {ws_addr}: {e}")
    })?;

    let ws_shutdown_token = shutdown_token.child_token();
    let ws_task = tokio::spawn(async move {
        info!(addr = %ws_addr, "WebSocket server starting");
        let server = axum::serve(ws_listener, ws_router(app_state)).with_graceful_shutdown(
            async move {
                ws_shutdown_token.cancelled().await;
                info!("WebSocket server shutting down");
            },
        );
        if let Err(e) = server.await {
            error!(error = %e, "WebSocket server failed");
        }
    });

    health_state.set_accepting();
    info!("Session Service running - press Ctrl+C to shutdown");

    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so k8s stops sending traffic
    health_state.set_draining();

    // Cancels every connection's pumps, which disconnects each client from its room
    shutdown_token.cancel();

    for (name, task) in [("websocket", ws_task), ("health", health_task)] {
        if let Err(e) = task.await {
            warn!(server = name, error = %e, "Server task ended abnormally");
        }
    }

    info!(rooms_remaining = hub.room_count(), "Session Service shutdown complete");

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
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
