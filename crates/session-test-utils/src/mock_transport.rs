//! Channel-backed transport for connection pump tests.
//!
//! [`MockTransport::new`] returns the two halves the service consumes
//! ([`MockSource`], [`MockSink`]) and a [`MockPeer`] that plays the remote
//! client: it pushes inbound frames, reads what the service wrote, and can
//! close the connection or make writes fail.
//!
//! # Example
//!
//! ```rust,ignore
//! let MockTransport { source, sink, mut peer } = MockTransport::new();
//! tokio::spawn(run_client(room, client, rx, source, sink, CancellationToken::new()));
//!
//! peer.send_event("add_chat", json!({"content": "hi"}));
//! let chat = peer.expect_event("add_chat").await;
//! peer.close();
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use session_service::transport::{FrameSink, FrameSource, TransportError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long [`MockPeer`] waits for an outbound frame before failing.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

enum Inbound {
    Frame(Bytes),
    Error(String),
}

#[derive(Debug, Default)]
struct Flags {
    closed: AtomicBool,
    fail_writes: AtomicBool,
}

/// A connected source/sink pair plus the remote end.
pub struct MockTransport {
    pub source: MockSource,
    pub sink: MockSink,
    pub peer: MockPeer,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let flags = Arc::new(Flags::default());

        Self {
            source: MockSource { inbound: inbound_rx },
            sink: MockSink {
                outbound: outbound_tx,
                flags: Arc::clone(&flags),
            },
            peer: MockPeer {
                inbound: Some(inbound_tx),
                outbound: outbound_rx,
                flags,
            },
        }
    }
}

/// Inbound half handed to the service.
pub struct MockSource {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameSource for MockSource {
    async fn receive(&mut self) -> Result<Option<Bytes>, TransportError> {
        match self.inbound.recv().await {
            Some(Inbound::Frame(frame)) => Ok(Some(frame)),
            Some(Inbound::Error(reason)) => Err(TransportError::Io(reason)),
            None => Ok(None),
        }
    }
}

/// Outbound half handed to the service.
pub struct MockSink {
    outbound: mpsc::UnboundedSender<Bytes>,
    flags: Arc<Flags>,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        if self.flags.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.flags.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Io("injected write failure".to_string()));
        }
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.flags.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// The remote client.
pub struct MockPeer {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    flags: Arc<Flags>,
}

impl MockPeer {
    /// Send a raw frame to the service.
    pub fn send_raw(&self, frame: impl Into<Bytes>) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(Inbound::Frame(frame.into()));
        }
    }

    /// Send `{"event": event, "payload": payload}`.
    pub fn send_event(&self, event: &str, payload: Value) {
        let frame = json!({ "event": event, "payload": payload });
        self.send_raw(frame.to_string());
    }

    /// Make the service's next `receive` fail with a transport error.
    pub fn inject_error(&self, reason: &str) {
        if let Some(inbound) = &self.inbound {
            let _ = inbound.send(Inbound::Error(reason.to_string()));
        }
    }

    /// Close the inbound direction, as a client hanging up would.
    pub fn close(&mut self) {
        self.inbound = None;
    }

    /// Make every subsequent write from the service fail.
    pub fn fail_writes(&self) {
        self.flags.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Whether the service closed its sink.
    pub fn is_closed(&self) -> bool {
        self.flags.closed.load(Ordering::SeqCst)
    }

    /// Next frame the service wrote, parsed as JSON. `None` on timeout or
    /// once the sink is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        match tokio::time::timeout(RECV_TIMEOUT, self.outbound.recv()).await {
            Ok(Some(frame)) => Some(
                serde_json::from_slice(&frame).expect("service wrote a frame that is not JSON"),
            ),
            _ => None,
        }
    }

    /// Skip frames until one with `event` arrives and return its payload.
    ///
    /// # Panics
    ///
    /// Panics if no such frame arrives within [`RECV_TIMEOUT`] per frame.
    pub async fn expect_event(&mut self, event: &str) -> Value {
        loop {
            let frame = self
                .recv()
                .await
                .unwrap_or_else(|| panic!("timed out waiting for {event}"));
            if frame["event"] == event {
                return frame["payload"].clone();
            }
        }
    }

    /// Every frame written so far, without waiting.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            let frame =
                serde_json::from_slice(&frame).expect("service wrote a frame that is not JSON");
            frames.push(frame);
        }
        frames
    }

    /// Event names of every frame written so far, without waiting.
    pub fn drain_events(&mut self) -> Vec<String> {
        self.drain()
            .into_iter()
            .filter_map(|frame| frame["event"].as_str().map(str::to_string))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let MockTransport {
            mut source,
            mut sink,
            mut peer,
        } = MockTransport::new();

        peer.send_event("raise_hand", json!({"clientId": "alice"}));
        let inbound = source.receive().await.unwrap().unwrap();
        let inbound: Value = serde_json::from_slice(&inbound).unwrap();
        assert_eq!(inbound["event"], "raise_hand");

        sink.send(Bytes::from(r#"{"event":"connect","payload":{}}"#))
            .await
            .unwrap();
        assert_eq!(peer.expect_event("connect").await, json!({}));
    }

    #[tokio::test]
    async fn test_close_and_errors() {
        let MockTransport {
            mut source,
            mut sink,
            mut peer,
        } = MockTransport::new();

        peer.inject_error("reset");
        assert!(matches!(source.receive().await, Err(TransportError::Io(_))));

        peer.close();
        assert!(source.receive().await.unwrap().is_none());

        peer.fail_writes();
        assert!(sink.send(Bytes::from_static(b"{}")).await.is_err());

        sink.close().await.unwrap();
        sink.close().await.unwrap();
        assert!(peer.is_closed());
    }
}
