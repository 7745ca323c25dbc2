//! Room: one lock around all per-room state, plus the message router.
//!
//! # Locking
//!
//! Every state mutation runs under the room's single async mutex: the
//! router holds it across the permission check, the handler and any
//! broadcast the handler performs. Handlers never re-acquire it.
//!
//! # Occupancy
//!
//! The number of admitted members (hosts plus participants) is mirrored into
//! an atomic after every locked operation so the [`Hub`](super::hub::Hub)
//! can decide on eviction without taking the room lock. Eviction swaps the
//! mirror from `0` to a sentinel; once that happens no further joins are
//! accepted and the room is gone from the registry. Joins reserve occupancy
//! before admitting, so a room with a joiner in flight cannot be evicted.
//!
//! # Empty callback
//!
//! When a disconnect takes occupancy from non-zero to zero, the room-empty
//! callback is spawned on its own task after the lock is released. A panic
//! inside the callback is caught, logged and counted.

use super::client::ClientHandle;
use super::messages::{Access, Event, InboundEnvelope};
use super::permissions::{Role, Tier};
use super::state::{RoomSettings, RoomState};
use crate::errors::SessionError;
use crate::observability::metrics;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Invoked with the room id when a room's occupancy drops to zero.
pub type RoomEmptyCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// What the router did with one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Passed the permission check and reached its handler.
    Dispatched,
    UnknownEvent,
    /// The sender's connection is not registered in the room.
    NotMember,
    /// The sender's role is outside the event's tier, or the event is server-only.
    Denied,
}

/// Occupancy value of an evicted room.
const EVICTED: usize = usize::MAX;

/// A room and its lock-guarded state.
pub struct Room {
    room_id: String,
    state: Mutex<RoomState>,
    occupancy: AtomicUsize,
    on_empty: Option<RoomEmptyCallback>,
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Room")
            .field("room_id", &self.room_id)
            .field("occupancy", &self.occupancy.load(Ordering::Acquire))
            .field("on_empty", &self.on_empty.is_some())
            .finish_non_exhaustive()
    }
}

impl Room {
    pub fn new(
        room_id: impl Into<String>,
        settings: RoomSettings,
        on_empty: Option<RoomEmptyCallback>,
    ) -> Self {
        let room_id = room_id.into();
        Self {
            state: Mutex::new(RoomState::new(room_id.clone(), settings)),
            room_id,
            occupancy: AtomicUsize::new(0),
            on_empty,
        }
    }

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Admitted members as of the last completed operation. Zero once evicted.
    #[must_use]
    pub fn occupancy(&self) -> usize {
        match self.occupancy.load(Ordering::Acquire) {
            EVICTED => 0,
            n => n,
        }
    }

    #[must_use]
    pub fn is_evicted(&self) -> bool {
        self.occupancy.load(Ordering::Acquire) == EVICTED
    }

    /// Mark the room evicted if it is empty. Never takes the room lock.
    pub(crate) fn try_evict(&self) -> bool {
        self.occupancy
            .compare_exchange(0, EVICTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Register a client with the room.
    ///
    /// Returns the role the client was given.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::RoomClosed` if the room was evicted before the
    /// client could be admitted; the caller should look the room up again.
    pub async fn connect(&self, client: ClientHandle) -> Result<Role, SessionError> {
        let mut state = self.state.lock().await;

        // The first member of an empty room lifts occupancy to 1; reserving
        // that now keeps a concurrent eviction from slipping in.
        if self
            .occupancy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n != EVICTED).then_some(n.max(1))
            })
            .is_err()
        {
            debug!(
                target: "session.room",
                room_id = %self.room_id,
                client_id = %client.client_id(),
                "Connect raced with eviction"
            );
            return Err(SessionError::RoomClosed(self.room_id.clone()));
        }

        let role = state.admit(client);
        self.publish_occupancy(&state);
        Ok(role)
    }

    /// Remove a client from the room. Idempotent, and a no-op for a
    /// connection that has since been replaced by a reconnect.
    pub async fn disconnect(&self, client: &ClientHandle) {
        let mut state = self.state.lock().await;
        state.depart(client);
        let emptied = self.publish_occupancy(&state);
        drop(state);

        if emptied {
            self.notify_empty();
        }
    }

    // ========================================================================
    // Routing
    // ========================================================================

    /// Permission-check and dispatch one inbound message from `client`.
    ///
    /// Never fails: unknown events, unregistered senders, missing
    /// permissions and bad payloads are logged and dropped. A dispatched
    /// event whose payload the handler then rejects still reports
    /// [`RouteOutcome::Dispatched`].
    pub async fn route(&self, client: &ClientHandle, envelope: InboundEnvelope) -> RouteOutcome {
        let started = Instant::now();

        let event = match envelope.event.parse::<Event>() {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    target: "session.room",
                    room_id = %self.room_id,
                    client_id = %client.client_id(),
                    error = %e,
                    "Unknown event, dropping"
                );
                metrics::record_message_rejected("unknown_event");
                return RouteOutcome::UnknownEvent;
            }
        };

        let mut state = self.state.lock().await;

        let Some(role) = state.member_for(client).map(|m| m.role) else {
            debug!(
                target: "session.room",
                room_id = %self.room_id,
                client_id = %client.client_id(),
                event = %event,
                "Sender not registered in room, dropping"
            );
            metrics::record_message_rejected("not_member");
            return RouteOutcome::NotMember;
        };

        if !Self::permitted(event, role) {
            warn!(
                target: "session.room",
                room_id = %self.room_id,
                client_id = %client.client_id(),
                role = %role,
                event = %event,
                "Permission denied"
            );
            metrics::record_message_denied(event.as_str());
            return RouteOutcome::Denied;
        }

        if event == Event::Disconnect {
            state.depart(client);
        } else {
            state.dispatch(client, role, event, envelope.payload);
        }

        let emptied = self.publish_occupancy(&state);
        drop(state);

        if emptied {
            self.notify_empty();
        }
        metrics::record_message_routed(event.as_str(), started.elapsed());
        RouteOutcome::Dispatched
    }

    fn permitted(event: Event, role: Role) -> bool {
        match event.access() {
            Access::Tier(tier) => tier.permits(role),
            Access::AnyMember => true,
            Access::ServerOnly => false,
        }
    }

    // ========================================================================
    // Fan-out from outside the router
    // ========================================================================

    /// Lock the room and broadcast `payload` to `audience` (everyone if `None`).
    pub async fn broadcast<P>(&self, event: Event, payload: &P, audience: Option<Tier>) -> usize
    where
        P: Serialize + Sync,
    {
        self.state.lock().await.broadcast(event, payload, audience)
    }

    /// Run `f` against the room state under the lock.
    pub async fn inspect<R>(&self, f: impl FnOnce(&RoomState) -> R) -> R {
        let state = self.state.lock().await;
        f(&state)
    }

    // ========================================================================
    // Occupancy
    // ========================================================================

    /// Mirror the locked state's occupancy. Returns true when this call took
    /// the room from occupied to empty.
    fn publish_occupancy(&self, state: &RoomState) -> bool {
        let current = state.occupancy();
        match self
            .occupancy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n != EVICTED).then_some(current)
            }) {
            Ok(previous) => previous > 0 && current == 0,
            Err(_) => false,
        }
    }

    fn notify_empty(&self) {
        info!(target: "session.room", room_id = %self.room_id, "Room is empty");

        let Some(callback) = self.on_empty.clone() else {
            return;
        };
        let room_id = self.room_id.clone();
        tokio::spawn(async move {
            if std::panic::catch_unwind(AssertUnwindSafe(|| callback(&room_id))).is_err() {
                error!(
                    target: "session.room",
                    room_id = %room_id,
                    "Room-empty callback panicked"
                );
                metrics::record_callback_panic();
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::session::client::ClientIdentity;
    use bytes::Bytes;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn client(id: &str) -> (ClientHandle, mpsc::Receiver<Bytes>) {
        ClientHandle::new(ClientIdentity::new(id, id.to_uppercase()), 16)
    }

    fn envelope(event: &str, payload: Value) -> InboundEnvelope {
        InboundEnvelope {
            event: event.to_string(),
            payload,
        }
    }

    fn events(rx: &mut mpsc::Receiver<Bytes>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            let value: Value = serde_json::from_slice(&frame).unwrap();
            out.push(value["event"].as_str().unwrap().to_string());
        }
        out
    }

    fn counting_callback() -> (RoomEmptyCallback, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let callback: RoomEmptyCallback = Arc::new(move |_room_id: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (callback, fired)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_connect_assigns_host_then_waiting() {
        let room = Room::new("r1", RoomSettings::default(), None);
        let (a, _ra) = client("a");
        let (b, _rb) = client("b");

        assert_eq!(room.connect(a).await.unwrap(), Role::Host);
        assert_eq!(room.connect(b).await.unwrap(), Role::Waiting);
        assert_eq!(room.occupancy(), 1);
    }

    #[tokio::test]
    async fn test_route_denies_event_outside_tier() {
        let room = Room::new("r1", RoomSettings::default(), None);
        let (a, mut ra) = client("a");
        let (b, mut rb) = client("b");
        room.connect(a.clone()).await.unwrap();
        room.connect(b.clone()).await.unwrap();
        events(&mut ra);
        events(&mut rb);

        // Waiting client tries to chat and to admit itself
        let chat = json!({"clientId": "b", "displayName": "B", "chatContent": "hi"});
        assert_eq!(
            room.route(&b, envelope("add_chat", chat)).await,
            RouteOutcome::Denied
        );
        assert_eq!(
            room.route(&b, envelope("accept_waiting", json!({"clientId": "b"}))).await,
            RouteOutcome::Denied
        );

        assert_eq!(room.inspect(|s| s.chat().len()).await, 0);
        assert_eq!(room.inspect(|s| s.role_of("b")).await, Some(Role::Waiting));
        assert!(events(&mut ra).is_empty());
        assert!(events(&mut rb).is_empty());
    }

    #[tokio::test]
    async fn test_route_rejects_server_only_and_unknown_events() {
        let room = Room::new("r1", RoomSettings::default(), None);
        let (a, mut ra) = client("a");
        room.connect(a.clone()).await.unwrap();
        events(&mut ra);

        let outcome = room.route(&a, envelope("room_state", json!({}))).await;
        assert_eq!(outcome, RouteOutcome::Denied);
        let outcome = room.route(&a, envelope("connect", json!({"clientId": "a"}))).await;
        assert_eq!(outcome, RouteOutcome::Denied);
        let outcome = room.route(&a, envelope("teleport", json!({}))).await;
        assert_eq!(outcome, RouteOutcome::UnknownEvent);

        assert!(events(&mut ra).is_empty());
        assert_eq!(room.occupancy(), 1);
    }

    #[tokio::test]
    async fn test_route_ignores_unregistered_sender() {
        let room = Room::new("r1", RoomSettings::default(), None);
        let (a, mut ra) = client("a");
        let (stranger, _rs) = client("s");
        room.connect(a).await.unwrap();
        events(&mut ra);

        let outcome = room.route(&stranger, envelope("request_waiting", json!({}))).await;
        assert_eq!(outcome, RouteOutcome::NotMember);
        assert!(events(&mut ra).is_empty());
    }

    #[tokio::test]
    async fn test_last_admitted_departure_fires_callback_once() {
        let (callback, fired) = counting_callback();
        let room = Room::new("r1", RoomSettings::default(), Some(callback));
        let (a, _ra) = client("a");
        let (b, _rb) = client("b");
        room.connect(a.clone()).await.unwrap();
        room.connect(b.clone()).await.unwrap();

        room.disconnect(&a).await;
        settle().await;
        // Only a waiting client is left
        assert_eq!(room.occupancy(), 0);
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        room.disconnect(&b).await;
        room.disconnect(&a).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_explicit_disconnect_event_leaves_room() {
        let (callback, fired) = counting_callback();
        let room = Room::new("r1", RoomSettings::default(), Some(callback));
        let (a, _ra) = client("a");
        room.connect(a.clone()).await.unwrap();

        room.route(&a, envelope("disconnect", Value::Null)).await;
        settle().await;

        assert!(!room.inspect(|s| s.is_tracked("a")).await);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    #[allow(clippy::panic)]
    async fn test_callback_panic_is_contained() {
        let callback: RoomEmptyCallback = Arc::new(|_room_id: &str| panic!("callback failure"));
        let room = Room::new("r1", RoomSettings::default(), Some(callback));
        let (a, _ra) = client("a");
        let (b, _rb) = client("b");

        room.connect(a.clone()).await.unwrap();
        room.disconnect(&a).await;
        settle().await;

        // Room keeps working after the panic
        assert_eq!(room.connect(b).await.unwrap(), Role::Host);
    }

    #[tokio::test]
    async fn test_evicted_room_rejects_connect() {
        let room = Room::new("r1", RoomSettings::default(), None);
        assert!(room.try_evict());
        assert!(room.is_evicted());
        assert_eq!(room.occupancy(), 0);

        let (a, _ra) = client("a");
        let err = room.connect(a).await.unwrap_err();
        assert!(matches!(err, SessionError::RoomClosed(_)));
    }

    #[tokio::test]
    async fn test_occupied_room_cannot_be_evicted() {
        let room = Room::new("r1", RoomSettings::default(), None);
        let (a, _ra) = client("a");
        room.connect(a).await.unwrap();
        assert!(!room.try_evict());
        assert!(!room.is_evicted());
    }

    #[tokio::test]
    async fn test_stale_connection_disconnect_is_ignored_after_reconnect() {
        let room = Room::new("r1", RoomSettings::default(), None);
        let (first, _r1) = client("a");
        let (second, mut r2) = client("a");
        room.connect(first.clone()).await.unwrap();
        assert_eq!(room.connect(second.clone()).await.unwrap(), Role::Host);
        events(&mut r2);

        room.disconnect(&first).await;
        assert_eq!(room.occupancy(), 1);
        assert_eq!(room.inspect(|s| s.role_of("a")).await, Some(Role::Host));

        // The live connection still routes
        room.route(&second, envelope("get_recent_chats", Value::Null)).await;
        assert_eq!(events(&mut r2), vec!["get_recent_chats"]);
    }

    #[tokio::test]
    async fn test_broadcast_wrapper_uses_audience() {
        let room = Room::new("r1", RoomSettings::default(), None);
        let (a, mut ra) = client("a");
        let (b, mut rb) = client("b");
        room.connect(a).await.unwrap();
        room.connect(b).await.unwrap();
        events(&mut ra);
        events(&mut rb);

        let info = crate::session::messages::ClientInfo::new("x", "X");
        assert_eq!(room.broadcast(Event::RequestWaiting, &info, Some(Tier::Host)).await, 1);
        assert_eq!(room.broadcast(Event::DenyWaiting, &info, Some(Tier::Waiting)).await, 1);
        assert_eq!(events(&mut ra), vec!["request_waiting"]);
        assert_eq!(events(&mut rb), vec!["deny_waiting"]);
    }

    #[tokio::test]
    async fn test_callback_does_not_block_disconnect() {
        let callback: RoomEmptyCallback = Arc::new(|_room_id: &str| {
            std::thread::sleep(Duration::from_millis(50));
        });
        let room = Room::new("r1", RoomSettings::default(), Some(callback));
        let (a, _ra) = client("a");
        room.connect(a.clone()).await.unwrap();

        tokio::time::timeout(Duration::from_millis(10), room.disconnect(&a))
            .await
            .expect("disconnect returned while callback still pending");
    }
}
