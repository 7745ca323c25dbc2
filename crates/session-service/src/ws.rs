//! WebSocket upgrade route.
//!
//! `GET /ws/:room_id?token=...` checks the Origin header and the identity
//! token BEFORE upgrading, so a refused client gets a plain HTTP error
//! (403 or 401) instead of a socket that closes immediately. After the
//! upgrade the socket is split into a [`WsSource`] and [`WsSink`] and handed
//! to [`run_client`] together with the room returned by [`Hub::join`].

use crate::auth::IdentityValidator;
use crate::errors::SessionError;
use crate::session::{run_client, ClientHandle, ClientIdentity, Hub};
use crate::transport::{FrameSink, FrameSource, TransportError};
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header::ORIGIN, HeaderMap},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Shared state for the WebSocket route.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub validator: Arc<dyn IdentityValidator>,
    pub allowed_origins: Vec<String>,
    pub outbound_buffer: usize,
    /// Cancelled at shutdown; every connection runs on a child token.
    pub shutdown: CancellationToken,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("rooms", &self.hub.room_count())
            .field("allowed_origins", &self.allowed_origins)
            .field("outbound_buffer", &self.outbound_buffer)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// Router serving the WebSocket upgrade route.
pub fn ws_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws/:room_id", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
    Path(room_id): Path<String>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Response {
    // A non-UTF-8 Origin is present but unusable; treat it as a mismatch.
    let origin = headers
        .get(ORIGIN)
        .map(|value| value.to_str().unwrap_or_default());
    if !origin_allowed(origin, &state.allowed_origins) {
        warn!(
            target: "session.ws",
            room_id = %room_id,
            origin = origin.unwrap_or_default(),
            "Origin rejected"
        );
        return SessionError::OriginRejected(origin.unwrap_or_default().to_string())
            .into_response();
    }

    let token = query.token.unwrap_or_default();
    let identity = match state.validator.validate(&token) {
        Ok(identity) => identity,
        Err(e) => {
            warn!(target: "session.ws", room_id = %room_id, error = %e, "Upgrade refused");
            return SessionError::from(e).into_response();
        }
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    upgrade.on_upgrade(move |socket| serve_socket(socket, state, room_id, identity))
}

async fn serve_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    room_id: String,
    identity: ClientIdentity,
) {
    let (sink, stream) = socket.split();
    let mut sink = WsSink::new(sink);

    let (client, outbound) = ClientHandle::new(identity, state.outbound_buffer);
    let room = match state.hub.join(&room_id, client.clone()).await {
        Ok((room, role)) => {
            info!(
                target: "session.ws",
                room_id = %room_id,
                client_id = %client.client_id(),
                role = %role,
                "Client joined"
            );
            room
        }
        Err(e) => {
            warn!(target: "session.ws", room_id = %room_id, error = %e, "Join failed");
            if let Err(e) = sink.close().await {
                debug!(target: "session.ws", error = %e, "Close after failed join failed");
            }
            return;
        }
    };

    run_client(
        room,
        client,
        outbound,
        WsSource::new(stream),
        sink,
        state.shutdown.child_token(),
    )
    .await;
}

/// Whether a request with `origin` may upgrade.
///
/// Requests without an Origin header (non-browser clients) are allowed.
/// Otherwise scheme and host (with port) must match an allow-list entry,
/// ignoring case and any trailing path. `*` allows every origin.
#[must_use]
pub fn origin_allowed(origin: Option<&str>, allowed: &[String]) -> bool {
    let Some(origin) = origin else {
        return true;
    };
    let Some(origin) = normalize_origin(origin) else {
        return false;
    };

    allowed.iter().any(|entry| {
        entry.trim() == "*" || normalize_origin(entry).is_some_and(|entry| entry == origin)
    })
}

fn normalize_origin(origin: &str) -> Option<String> {
    let (scheme, rest) = origin.trim().split_once("://")?;
    let authority = rest.split('/').next().unwrap_or_default();
    if scheme.is_empty() || authority.is_empty() {
        return None;
    }
    Some(format!(
        "{}://{}",
        scheme.to_ascii_lowercase(),
        authority.to_ascii_lowercase()
    ))
}

// ============================================================================
// Transport adapter
// ============================================================================

/// Inbound half of an upgraded socket.
pub struct WsSource {
    inner: SplitStream<WebSocket>,
}

impl WsSource {
    #[must_use]
    pub fn new(inner: SplitStream<WebSocket>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl FrameSource for WsSource {
    async fn receive(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            let message = match self.inner.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(TransportError::Io(e.to_string())),
                None => return Ok(None),
            };

            match message {
                Message::Text(text) => return Ok(Some(Bytes::from(text))),
                Message::Binary(data) => return Ok(Some(Bytes::from(data))),
                Message::Close(_) => return Ok(None),
                // axum answers pings itself
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    }
}

/// Outbound half of an upgraded socket.
pub struct WsSink {
    inner: SplitSink<WebSocket, Message>,
    closed: bool,
}

impl WsSink {
    #[must_use]
    pub fn new(inner: SplitSink<WebSocket, Message>) -> Self {
        Self {
            inner,
            closed: false,
        }
    }
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        // Outbound frames are serialized JSON, so this is the text path in practice.
        let message = match String::from_utf8(Vec::from(frame)) {
            Ok(text) => Message::Text(text),
            Err(e) => Message::Binary(e.into_bytes()),
        };
        self.inner
            .send(message)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}
