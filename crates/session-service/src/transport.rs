//! Transport collaborator seam.
//!
//! The room core never sees sockets. A connection is split into a
//! [`FrameSource`] (inbound frames) and a [`FrameSink`] (outbound frames);
//! the WebSocket adapter in [`crate::ws`] implements both for axum, and
//! tests substitute channel-backed mocks.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors surfaced by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The connection is already closed.
    #[error("connection closed")]
    Closed,

    /// The underlying stream failed.
    #[error("transport I/O error: {0}")]
    Io(String),
}

/// Inbound half of a connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Wait for the next frame.
    ///
    /// `Ok(None)` means the peer closed the connection cleanly.
    async fn receive(&mut self) -> Result<Option<Bytes>, TransportError>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Write one frame.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}
