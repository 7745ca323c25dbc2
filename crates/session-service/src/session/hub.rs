//! Room registry.
//!
//! Maps room ids to live rooms. Rooms are created on first join and removed
//! when their room-empty callback reports them empty.
//!
//! The registry lock is a plain `std::sync::Mutex` held only for map
//! operations. It is never held across an await and never while a room lock
//! is held; eviction reads the room's occupancy atomic instead of locking
//! the room.

use super::client::ClientHandle;
use super::permissions::Role;
use super::room::{Room, RoomEmptyCallback};
use super::state::RoomSettings;
use crate::errors::SessionError;
use crate::observability::metrics;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info, instrument, warn};

/// Attempts at joining before giving up on a room that keeps being evicted.
const MAX_JOIN_ATTEMPTS: usize = 3;

/// Process-wide registry of rooms.
#[derive(Debug)]
pub struct Hub {
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    settings: RoomSettings,
    this: Weak<Hub>,
}

impl Hub {
    /// Create a registry whose rooms use `settings`.
    #[must_use]
    pub fn new(settings: RoomSettings) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            rooms: Mutex::new(HashMap::new()),
            settings,
            this: this.clone(),
        })
    }

    fn rooms(&self) -> MutexGuard<'_, HashMap<String, Arc<Room>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a room, creating it if absent.
    pub fn get_or_create(&self, room_id: &str) -> Arc<Room> {
        let mut rooms = self.rooms();
        if let Some(room) = rooms.get(room_id) {
            return Arc::clone(room);
        }

        let room = Arc::new(Room::new(
            room_id,
            self.settings,
            Some(self.eviction_callback()),
        ));
        rooms.insert(room_id.to_string(), Arc::clone(&room));
        metrics::set_rooms_active(rooms.len());

        info!(target: "session.hub", room_id = %room_id, rooms = rooms.len(), "Room created");
        room
    }

    /// Remove a room if it is still registered and still empty.
    ///
    /// Returns true if the room was evicted.
    pub fn evict_if_empty(&self, room_id: &str) -> bool {
        let mut rooms = self.rooms();
        let Some(room) = rooms.get(room_id) else {
            debug!(target: "session.hub", room_id = %room_id, "Room already gone");
            return false;
        };
        if !room.try_evict() {
            debug!(
                target: "session.hub",
                room_id = %room_id,
                occupancy = room.occupancy(),
                "Room repopulated before eviction, keeping"
            );
            return false;
        }

        rooms.remove(room_id);
        metrics::set_rooms_active(rooms.len());
        info!(target: "session.hub", room_id = %room_id, rooms = rooms.len(), "Room evicted");
        true
    }

    fn eviction_callback(&self) -> RoomEmptyCallback {
        let hub = self.this.clone();
        Arc::new(move |room_id: &str| {
            if let Some(hub) = hub.upgrade() {
                hub.evict_if_empty(room_id);
            }
        })
    }

    /// Connect `client` to `room_id`, creating the room if needed.
    ///
    /// A room can be evicted between lookup and connect; the lookup is
    /// retried a bounded number of times.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::RoomClosed` if every attempt lost the race.
    #[instrument(skip_all, fields(room_id = %room_id, client_id = %client.client_id()))]
    pub async fn join(
        &self,
        room_id: &str,
        client: ClientHandle,
    ) -> Result<(Arc<Room>, Role), SessionError> {
        for attempt in 1..=MAX_JOIN_ATTEMPTS {
            let room = self.get_or_create(room_id);
            match room.connect(client.clone()).await {
                Ok(role) => return Ok((room, role)),
                Err(SessionError::RoomClosed(_)) => {
                    debug!(target: "session.hub", attempt, "Room evicted during join, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            target: "session.hub",
            attempts = MAX_JOIN_ATTEMPTS,
            "Giving up on join, room kept closing"
        );
        Err(SessionError::RoomClosed(room_id.to_string()))
    }

    /// Registered room, if any.
    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<Arc<Room>> {
        self.rooms().get(room_id).cloned()
    }

    #[must_use]
    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms().contains_key(room_id)
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms().len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::session::client::ClientIdentity;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn client(id: &str) -> (ClientHandle, mpsc::Receiver<Bytes>) {
        ClientHandle::new(ClientIdentity::new(id, id), 16)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[test]
    fn test_get_or_create_returns_same_room() {
        let hub = Hub::new(RoomSettings::default());
        let a = hub.get_or_create("r1");
        let b = hub.get_or_create("r1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(hub.room_count(), 1);

        hub.get_or_create("r2");
        assert_eq!(hub.room_count(), 2);
    }

    #[test]
    fn test_evict_if_empty_removes_only_empty_rooms() {
        let hub = Hub::new(RoomSettings::default());
        hub.get_or_create("r1");

        assert!(hub.evict_if_empty("r1"));
        assert!(!hub.contains("r1"));
        assert!(!hub.evict_if_empty("r1"));
        assert!(!hub.evict_if_empty("never-existed"));
    }

    #[tokio::test]
    async fn test_occupied_room_survives_eviction_attempt() {
        let hub = Hub::new(RoomSettings::default());
        let (a, _ra) = client("a");
        let (room, role) = hub.join("r1", a).await.unwrap();
        assert_eq!(role, Role::Host);

        assert!(!hub.evict_if_empty("r1"));
        assert!(hub.contains("r1"));
        assert!(!room.is_evicted());
    }

    #[tokio::test]
    async fn test_last_departure_evicts_room() {
        let hub = Hub::new(RoomSettings::default());
        let (a, _ra) = client("a");
        let (b, _rb) = client("b");
        let (room, _) = hub.join("r1", a.clone()).await.unwrap();
        hub.join("r1", b.clone()).await.unwrap();

        room.disconnect(&a).await;
        wait_until(|| !hub.contains("r1")).await;
        assert!(room.is_evicted());
        assert_eq!(hub.room_count(), 0);

        // Waiting client still attached to the evicted room can leave cleanly
        room.disconnect(&b).await;
    }

    #[tokio::test]
    async fn test_join_after_eviction_creates_fresh_room() {
        let hub = Hub::new(RoomSettings::default());
        let (a, _ra) = client("a");
        let (old, _) = hub.join("r1", a.clone()).await.unwrap();
        old.disconnect(&a).await;
        wait_until(|| !hub.contains("r1")).await;

        let (c, _rc) = client("c");
        let (fresh, role) = hub.join("r1", c).await.unwrap();
        assert_eq!(role, Role::Host);
        assert!(!Arc::ptr_eq(&old, &fresh));
    }

    #[tokio::test]
    async fn test_join_skips_room_evicted_before_connect() {
        let hub = Hub::new(RoomSettings::default());
        let stale = hub.get_or_create("r1");
        assert!(hub.evict_if_empty("r1"));
        assert!(stale.is_evicted());

        let (a, _ra) = client("a");
        let (room, role) = hub.join("r1", a).await.unwrap();
        assert_eq!(role, Role::Host);
        assert!(!Arc::ptr_eq(&stale, &room));
    }

    #[tokio::test]
    async fn test_callback_after_hub_dropped_is_harmless() {
        let hub = Hub::new(RoomSettings::default());
        let (a, _ra) = client("a");
        let (room, _) = hub.join("r1", a.clone()).await.unwrap();
        drop(hub);

        room.disconnect(&a).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!room.is_evicted());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_joins_and_leaves_keep_registry_consistent() {
        let hub = Hub::new(RoomSettings::default());

        let mut tasks = Vec::new();
        for i in 0..32 {
            let hub = Arc::clone(&hub);
            tasks.push(tokio::spawn(async move {
                let (c, _rx) = client(&format!("c{i}"));
                let (room, _) = hub.join("shared", c.clone()).await.unwrap();
                tokio::task::yield_now().await;
                room.disconnect(&c).await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Every departure that emptied the room fired an eviction
        wait_until(|| !hub.contains("shared")).await;
        assert_eq!(hub.room_count(), 0);
    }
}
