//! Connection adapter: bridges one external connection to a room.
//!
//! A connected client is represented inside the room by a [`ClientHandle`]:
//! its identity plus the producer side of a bounded outbound queue. The room
//! only ever `try_send`s into that queue, so a slow consumer loses frames
//! instead of stalling the room lock.
//!
//! Two pumps run per connection:
//!
//! - **Inbound**: read frame, parse envelope, [`Room::route`]. A malformed
//!   frame is logged and skipped. Close or transport error ends the pump,
//!   which disconnects the client from the room exactly once.
//! - **Outbound**: take the next frame from the queue, write it to the
//!   connection. A write error ends the pump.
//!
//! The pumps share a [`CancellationToken`]; whichever stops first cancels
//! the other.

use super::messages::InboundEnvelope;
use super::room::Room;
use crate::observability::metrics;
use crate::transport::{FrameSink, FrameSource};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Stable identity of a connected client, fixed at connection time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    client_id: String,
    display_name: String,
}

impl ClientIdentity {
    pub fn new(client_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            display_name: display_name.into(),
        }
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// Why a frame could not be enqueued for a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Outbound queue at capacity.
    QueueFull,
    /// Outbound pump has gone away.
    Closed,
}

impl DropReason {
    /// Bounded metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DropReason::QueueFull => "queue_full",
            DropReason::Closed => "closed",
        }
    }
}

/// A client as the room sees it: identity plus outbound queue.
///
/// Cloning is cheap; all clones feed the same outbound queue.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    identity: Arc<ClientIdentity>,
    connection_id: Uuid,
    outbound: mpsc::Sender<Bytes>,
}

impl ClientHandle {
    /// Create a handle with an outbound queue of `capacity` frames.
    ///
    /// Returns the handle and the receiving end for the outbound pump.
    /// `capacity` is clamped to at least 1.
    #[must_use]
    pub fn new(identity: ClientIdentity, capacity: usize) -> (Self, mpsc::Receiver<Bytes>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                identity: Arc::new(identity),
                connection_id: Uuid::new_v4(),
                outbound,
            },
            rx,
        )
    }

    #[must_use]
    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.identity.client_id()
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.identity.display_name()
    }

    /// Unique per connection; distinguishes a reconnect from the stale socket it replaced.
    #[must_use]
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Enqueue a frame without waiting.
    pub fn try_deliver(&self, frame: Bytes) -> Result<(), DropReason> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DropReason::QueueFull,
            TrySendError::Closed(_) => DropReason::Closed,
        })
    }
}

/// Run both pumps for a client that has already joined `room`.
///
/// Returns once the connection is finished and the client has been
/// disconnected from the room.
#[instrument(skip_all, fields(room_id = %room.room_id(), client_id = %client.client_id()))]
pub async fn run_client<S, K>(
    room: Arc<Room>,
    client: ClientHandle,
    outbound: mpsc::Receiver<Bytes>,
    source: S,
    sink: K,
    cancel_token: CancellationToken,
) where
    S: FrameSource + 'static,
    K: FrameSink + 'static,
{
    metrics::client_connected();

    let outbound_task = tokio::spawn(run_outbound_pump(outbound, sink, cancel_token.clone()));
    run_inbound_pump(Arc::clone(&room), client, source, cancel_token).await;

    if let Err(e) = outbound_task.await {
        warn!(target: "session.client", error = %e, "Outbound pump task failed");
    }

    metrics::client_disconnected();
}

/// Read, parse and route frames until the connection ends, then disconnect.
pub async fn run_inbound_pump<S>(
    room: Arc<Room>,
    client: ClientHandle,
    mut source: S,
    cancel_token: CancellationToken,
) where
    S: FrameSource,
{
    loop {
        let received = tokio::select! {
            () = cancel_token.cancelled() => {
                debug!(target: "session.client", "Inbound pump cancelled");
                break;
            }
            received = source.receive() => received,
        };

        let frame = match received {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                debug!(target: "session.client", "Connection closed by peer");
                break;
            }
            Err(e) => {
                debug!(target: "session.client", error = %e, "Transport error, closing connection");
                break;
            }
        };

        match InboundEnvelope::from_slice(&frame) {
            Ok(envelope) => {
                room.route(&client, envelope).await;
            }
            Err(e) => {
                debug!(
                    target: "session.client",
                    error = %e,
                    frame_len = frame.len(),
                    "Malformed inbound frame, skipping"
                );
                metrics::record_message_rejected("malformed");
            }
        }
    }

    room.disconnect(&client).await;
    cancel_token.cancel();

    info!(target: "session.client", "Client connection finished");
}

/// Write queued frames to the connection until cancelled or the write fails.
pub async fn run_outbound_pump<K>(
    mut outbound: mpsc::Receiver<Bytes>,
    mut sink: K,
    cancel_token: CancellationToken,
) where
    K: FrameSink,
{
    loop {
        let frame = tokio::select! {
            () = cancel_token.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        if let Err(e) = sink.send(frame).await {
            debug!(target: "session.client", error = %e, "Write failed, stopping outbound pump");
            break;
        }
    }

    cancel_token.cancel();
    if let Err(e) = sink.close().await {
        debug!(target: "session.client", error = %e, "Close after outbound pump ended failed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_accessors() {
        let identity = ClientIdentity::new("user-1", "Alice");
        assert_eq!(identity.client_id(), "user-1");
        assert_eq!(identity.display_name(), "Alice");
    }

    #[test]
    fn test_handle_clones_share_queue_and_connection() {
        let (handle, mut rx) = ClientHandle::new(ClientIdentity::new("a", "A"), 4);
        let clone = handle.clone();
        assert_eq!(handle.connection_id(), clone.connection_id());

        clone.try_deliver(Bytes::from_static(b"1")).unwrap();
        handle.try_deliver(Bytes::from_static(b"2")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"1"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"2"));
    }

    #[test]
    fn test_each_connection_gets_distinct_id() {
        let (a, _ra) = ClientHandle::new(ClientIdentity::new("a", "A"), 1);
        let (b, _rb) = ClientHandle::new(ClientIdentity::new("a", "A"), 1);
        assert_ne!(a.connection_id(), b.connection_id());
    }

    #[test]
    fn test_try_deliver_reports_full_then_closed() {
        let (handle, rx) = ClientHandle::new(ClientIdentity::new("a", "A"), 1);
        handle.try_deliver(Bytes::from_static(b"1")).unwrap();
        assert_eq!(
            handle.try_deliver(Bytes::from_static(b"2")),
            Err(DropReason::QueueFull)
        );

        drop(rx);
        assert_eq!(
            handle.try_deliver(Bytes::from_static(b"3")),
            Err(DropReason::Closed)
        );
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (handle, _rx) = ClientHandle::new(ClientIdentity::new("a", "A"), 0);
        assert!(handle.try_deliver(Bytes::from_static(b"1")).is_ok());
    }
}
