//! Health endpoints for the Session Service.
//!
//! - `GET /health` - Liveness: the process is up and serving HTTP.
//! - `GET /ready` - Readiness: the WebSocket listener is accepting and the
//!   service is not draining. The body reports the live room count from the
//!   [`Hub`] so operators can see load before a rollout drains a pod.
//!
//! The `/metrics` endpoint is merged onto the same listener in `main.rs`.

use crate::session::Hub;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Readiness flag plus the hub whose load `/ready` reports.
#[derive(Debug)]
pub struct HealthState {
    hub: Arc<Hub>,
    /// Set once the WebSocket listener is bound, cleared when shutdown starts.
    accepting: AtomicBool,
}

impl HealthState {
    /// Not accepting until [`HealthState::set_accepting`] is called.
    #[must_use]
    pub fn new(hub: Arc<Hub>) -> Self {
        Self {
            hub,
            accepting: AtomicBool::new(false),
        }
    }

    pub fn set_accepting(&self) {
        self.accepting.store(true, Ordering::SeqCst);
    }

    /// Stop advertising readiness so new clients go elsewhere while
    /// connected rooms drain.
    pub fn set_draining(&self) {
        self.accepting.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn active_rooms(&self) -> usize {
        self.hub.room_count()
    }
}

/// `/ready` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessResponse {
    /// "ready" or "draining".
    pub status: &'static str,
    /// Rooms currently held by the hub.
    pub rooms: usize,
}

/// Router serving `/health` and `/ready`.
pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler() -> &'static str {
    "OK"
}

async fn readiness_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let rooms = state.active_rooms();
    if state.is_accepting() {
        (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                rooms,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "draining",
                rooms,
            }),
        )
    }
}
