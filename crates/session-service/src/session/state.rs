//! Per-room state and the primitives handlers build on.
//!
//! [`RoomState`] is only ever touched while the owning room's lock is held,
//! so nothing in here synchronizes. The three role maps (`hosts`,
//! `participants`, `waiting`) partition every admitted or waiting client:
//! a client id is in at most one of them. Screen sharers stay in
//! `participants` with their role set to [`Role::Screenshare`].
//!
//! Each [`Member`] holds at most one handle per ordered queue:
//!
//! - `waiting` slot into the waiting stack (most recent first)
//! - `draw` slot into the draw-order queue
//! - `hand` slot into the hand-raise queue
//!
//! Every transition releases the slots it no longer needs before acquiring
//! new ones, and [`RoomState::remove_member`] releases all three.

use super::chat::ChatHistory;
use super::client::{ClientHandle, DropReason};
use super::messages::{self, ClientInfo, Event, RoomStatePayload};
use super::permissions::{Role, Tier};
use super::queue::{OrderedQueue, QueueHandle};
use crate::observability::metrics;
use bytes::Bytes;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, warn};

/// Tunables a room is created with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSettings {
    /// Chat history bound (0 = unbounded).
    pub max_chat_history: usize,
    /// Window size for `get_recent_chats`.
    pub recent_chats_limit: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            max_chat_history: crate::config::DEFAULT_MAX_CHAT_HISTORY,
            recent_chats_limit: super::chat::DEFAULT_RECENT_CHATS_LIMIT,
        }
    }
}

#[derive(Debug, Default)]
struct QueueSlots {
    waiting: Option<QueueHandle>,
    draw: Option<QueueHandle>,
    hand: Option<QueueHandle>,
}

/// A client registered in the room.
#[derive(Debug)]
pub(crate) struct Member {
    pub(crate) client: ClientHandle,
    pub(crate) role: Role,
    slots: QueueSlots,
}

impl Member {
    pub(crate) fn new(client: ClientHandle) -> Self {
        Self {
            client,
            role: Role::Waiting,
            slots: QueueSlots::default(),
        }
    }

    pub(crate) fn info(&self) -> ClientInfo {
        ClientInfo::new(self.client.client_id(), self.client.display_name())
    }
}

/// All mutable state of one room.
#[derive(Debug)]
pub struct RoomState {
    room_id: String,
    settings: RoomSettings,

    hosts: HashMap<String, Member>,
    participants: HashMap<String, Member>,
    waiting: HashMap<String, Member>,

    raising_hand: HashSet<String>,
    sharing_screen: HashSet<String>,
    unmuted: HashSet<String>,
    camera_on: HashSet<String>,

    waiting_order: OrderedQueue<String>,
    draw_order: OrderedQueue<String>,
    hand_order: OrderedQueue<String>,

    pub(crate) chat: ChatHistory,
}

impl RoomState {
    pub(crate) fn new(room_id: String, settings: RoomSettings) -> Self {
        Self {
            room_id,
            settings,
            hosts: HashMap::new(),
            participants: HashMap::new(),
            waiting: HashMap::new(),
            raising_hand: HashSet::new(),
            sharing_screen: HashSet::new(),
            unmuted: HashSet::new(),
            camera_on: HashSet::new(),
            waiting_order: OrderedQueue::new(),
            draw_order: OrderedQueue::new(),
            hand_order: OrderedQueue::new(),
            chat: ChatHistory::new(settings.max_chat_history),
        }
    }

    // ========================================================================
    // Read-only views
    // ========================================================================

    #[must_use]
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    #[must_use]
    pub fn settings(&self) -> RoomSettings {
        self.settings
    }

    /// Admitted members: hosts plus participants (screen sharers included).
    #[must_use]
    pub fn occupancy(&self) -> usize {
        self.hosts.len() + self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occupancy() == 0
    }

    #[must_use]
    pub fn role_of(&self, client_id: &str) -> Option<Role> {
        self.member(client_id).map(|m| m.role)
    }

    #[must_use]
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    /// Admitted members in draw order.
    #[must_use]
    pub fn draw_order(&self) -> Vec<&str> {
        self.draw_order.iter().map(String::as_str).collect()
    }

    /// Waiting clients, most recent first.
    #[must_use]
    pub fn waiting_order(&self) -> Vec<&str> {
        self.waiting_order.iter().map(String::as_str).collect()
    }

    /// Raised hands, oldest first.
    #[must_use]
    pub fn hands_raised(&self) -> Vec<&str> {
        self.hand_order.iter().map(String::as_str).collect()
    }

    #[must_use]
    pub fn is_sharing_screen(&self, client_id: &str) -> bool {
        self.sharing_screen.contains(client_id)
    }

    #[must_use]
    pub fn is_unmuted(&self, client_id: &str) -> bool {
        self.unmuted.contains(client_id)
    }

    #[must_use]
    pub fn has_camera_on(&self, client_id: &str) -> bool {
        self.camera_on.contains(client_id)
    }

    #[must_use]
    pub fn chat(&self) -> &ChatHistory {
        &self.chat
    }

    /// Whether any map, set or queue still references `client_id`.
    #[must_use]
    pub fn is_tracked(&self, client_id: &str) -> bool {
        self.member(client_id).is_some()
            || self.raising_hand.contains(client_id)
            || self.sharing_screen.contains(client_id)
            || self.unmuted.contains(client_id)
            || self.camera_on.contains(client_id)
            || self.waiting_order.iter().any(|id| id == client_id)
            || self.draw_order.iter().any(|id| id == client_id)
            || self.hand_order.iter().any(|id| id == client_id)
    }

    /// Snapshot of the room as seen by `viewer`.
    ///
    /// Waiting clients only learn their own standing, not who is inside.
    #[must_use]
    pub fn snapshot_for(&self, viewer: &ClientInfo) -> RoomStatePayload {
        let role = self.role_of(&viewer.client_id);
        let mut payload = RoomStatePayload {
            client: viewer.clone(),
            room_id: self.room_id.clone(),
            role,
            ..RoomStatePayload::default()
        };
        if role.is_none() || role == Some(Role::Waiting) {
            return payload;
        }

        payload.hosts = self
            .draw_order
            .iter()
            .filter_map(|id| self.hosts.get(id))
            .map(Member::info)
            .collect();
        payload.participants = self
            .draw_order
            .iter()
            .filter_map(|id| self.participants.get(id))
            .map(Member::info)
            .collect();
        payload.hands_raised = self.infos(self.hand_order.iter());
        payload.waiting_users = self.infos(self.waiting_order.iter());
        payload.sharing_screen = self
            .draw_order
            .iter()
            .filter(|id| self.sharing_screen.contains(id.as_str()))
            .filter_map(|id| self.member(id))
            .map(Member::info)
            .collect();
        payload
    }

    fn infos<'a>(&self, ids: impl Iterator<Item = &'a String>) -> Vec<ClientInfo> {
        ids.filter_map(|id| self.member(id)).map(Member::info).collect()
    }

    // ========================================================================
    // Membership
    // ========================================================================

    pub(crate) fn member(&self, client_id: &str) -> Option<&Member> {
        self.hosts
            .get(client_id)
            .or_else(|| self.participants.get(client_id))
            .or_else(|| self.waiting.get(client_id))
    }

    pub(crate) fn member_mut(&mut self, client_id: &str) -> Option<&mut Member> {
        if let Some(member) = self.hosts.get_mut(client_id) {
            return Some(member);
        }
        if let Some(member) = self.participants.get_mut(client_id) {
            return Some(member);
        }
        self.waiting.get_mut(client_id)
    }

    /// The member registered for exactly this connection, if any.
    pub(crate) fn member_for(&self, client: &ClientHandle) -> Option<&Member> {
        self.member(client.client_id())
            .filter(|m| m.client.connection_id() == client.connection_id())
    }

    pub(crate) fn is_waiting(&self, client_id: &str) -> bool {
        self.waiting.contains_key(client_id)
    }

    pub(crate) fn participant(&self, client_id: &str) -> Option<&Member> {
        self.participants.get(client_id)
    }

    /// Admitted member (host or participant) by id.
    pub(crate) fn admitted(&self, client_id: &str) -> Option<&Member> {
        self.hosts
            .get(client_id)
            .or_else(|| self.participants.get(client_id))
    }

    pub(crate) fn add_host(&mut self, mut member: Member) {
        self.release_slots(&mut member);
        let client_id = member.client.client_id().to_string();
        member.role = Role::Host;
        member.slots.draw = Some(self.draw_order.push_back(client_id.clone()));
        self.hosts.insert(client_id, member);
    }

    pub(crate) fn add_participant(&mut self, mut member: Member) {
        self.release_slots(&mut member);
        let client_id = member.client.client_id().to_string();
        member.role = Role::Participant;
        member.slots.draw = Some(self.draw_order.push_back(client_id.clone()));
        self.participants.insert(client_id, member);
    }

    pub(crate) fn add_waiting(&mut self, mut member: Member) {
        self.release_slots(&mut member);
        let client_id = member.client.client_id().to_string();
        member.role = Role::Waiting;
        member.slots.waiting = Some(self.waiting_order.push_front(client_id.clone()));
        self.waiting.insert(client_id, member);
    }

    /// Move a waiting client into the participants. Returns the admitted member's info.
    pub(crate) fn admit_waiting(&mut self, client_id: &str) -> Option<ClientInfo> {
        let member = self.waiting.remove(client_id)?;
        let info = member.info();
        self.add_participant(member);
        Some(info)
    }

    /// Remove a client from every map, set and queue. Safe to call repeatedly.
    pub(crate) fn remove_member(&mut self, client_id: &str) -> Option<Member> {
        let mut removed = self
            .hosts
            .remove(client_id)
            .or_else(|| self.participants.remove(client_id))
            .or_else(|| self.waiting.remove(client_id));

        if let Some(member) = removed.as_mut() {
            self.release_slots(member);
        }

        self.raising_hand.remove(client_id);
        self.sharing_screen.remove(client_id);
        self.unmuted.remove(client_id);
        self.camera_on.remove(client_id);
        removed
    }

    fn release_slots(&mut self, member: &mut Member) {
        if let Some(handle) = member.slots.waiting.take() {
            self.waiting_order.remove(handle);
        }
        if let Some(handle) = member.slots.draw.take() {
            self.draw_order.remove(handle);
        }
        if let Some(handle) = member.slots.hand.take() {
            self.hand_order.remove(handle);
        }
    }

    /// Put `client_id` (a participant) in the hand-raise queue.
    ///
    /// Returns `None` if the client is not a participant.
    pub(crate) fn raise_hand(&mut self, client_id: &str) -> Option<ClientInfo> {
        let member = self.participants.get_mut(client_id)?;
        if member.slots.hand.is_none() {
            member.slots.hand = Some(self.hand_order.push_back(client_id.to_string()));
        }
        self.raising_hand.insert(client_id.to_string());
        Some(member.info())
    }

    /// Take `client_id` (a participant) out of the hand-raise queue.
    pub(crate) fn lower_hand(&mut self, client_id: &str) -> Option<ClientInfo> {
        let member = self.participants.get_mut(client_id)?;
        if let Some(handle) = member.slots.hand.take() {
            self.hand_order.remove(handle);
        }
        self.raising_hand.remove(client_id);
        Some(member.info())
    }

    /// Grant the screenshare role to a participant.
    pub(crate) fn start_screenshare(&mut self, client_id: &str) -> Option<ClientInfo> {
        let member = self.participants.get_mut(client_id)?;
        member.role = Role::Screenshare;
        if member.slots.draw.is_none() {
            member.slots.draw = Some(self.draw_order.push_back(client_id.to_string()));
        }
        self.sharing_screen.insert(client_id.to_string());
        Some(member.info())
    }

    /// Revert a screen sharer to participant.
    pub(crate) fn stop_screenshare(&mut self, client_id: &str) -> Option<ClientInfo> {
        let member = self
            .participants
            .get_mut(client_id)
            .filter(|m| m.role == Role::Screenshare)?;
        member.role = Role::Participant;
        self.sharing_screen.remove(client_id);
        Some(member.info())
    }

    pub(crate) fn set_audio(&mut self, client_id: &str, enabled: bool) {
        if enabled {
            self.unmuted.insert(client_id.to_string());
        } else {
            self.unmuted.remove(client_id);
        }
    }

    pub(crate) fn set_video(&mut self, client_id: &str, enabled: bool) {
        if enabled {
            self.camera_on.insert(client_id.to_string());
        } else {
            self.camera_on.remove(client_id);
        }
    }

    // ========================================================================
    // Fan-out
    // ========================================================================

    fn members(&self) -> impl Iterator<Item = &Member> {
        self.hosts
            .values()
            .chain(self.participants.values())
            .chain(self.waiting.values())
    }

    /// Serialize once and enqueue to every member whose role is in `audience`
    /// (everyone when `None`). Never blocks; full queues drop the frame.
    ///
    /// Returns the number of members the frame was enqueued for.
    pub(crate) fn broadcast<P: Serialize>(
        &self,
        event: Event,
        payload: &P,
        audience: Option<Tier>,
    ) -> usize {
        let Some(frame) = self.encode(event, payload) else {
            return 0;
        };

        let mut delivered = 0;
        for member in self.members() {
            if audience.is_some_and(|tier| !tier.permits(member.role)) {
                continue;
            }
            if self.deliver(member, event, frame.clone()) {
                delivered += 1;
            }
        }

        debug!(
            target: "session.room",
            room_id = %self.room_id,
            event = %event,
            audience = ?audience,
            delivered,
            "Broadcast"
        );
        delivered
    }

    /// Enqueue to a single member, bypassing audience filtering.
    pub(crate) fn unicast<P: Serialize>(&self, target_id: &str, event: Event, payload: &P) -> bool {
        let Some(member) = self.member(target_id) else {
            debug!(
                target: "session.room",
                room_id = %self.room_id,
                event = %event,
                target_id = %target_id,
                "Unicast target not in room"
            );
            return false;
        };
        match self.encode(event, payload) {
            Some(frame) => self.deliver(member, event, frame),
            None => false,
        }
    }

    /// Enqueue to a connection that may not be registered as a member.
    pub(crate) fn unicast_to<P: Serialize>(
        &self,
        client: &ClientHandle,
        event: Event,
        payload: &P,
    ) -> bool {
        match self.encode(event, payload) {
            Some(frame) => self.deliver_to(client, event, frame),
            None => false,
        }
    }

    fn encode<P: Serialize>(&self, event: Event, payload: &P) -> Option<Bytes> {
        match messages::encode(event, payload) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!(
                    target: "session.room",
                    room_id = %self.room_id,
                    event = %event,
                    error = %e,
                    "Failed to serialize outbound payload, dropping"
                );
                None
            }
        }
    }

    fn deliver(&self, member: &Member, event: Event, frame: Bytes) -> bool {
        self.deliver_to(&member.client, event, frame)
    }

    fn deliver_to(&self, client: &ClientHandle, event: Event, frame: Bytes) -> bool {
        match client.try_deliver(frame) {
            Ok(()) => true,
            Err(reason) => {
                match reason {
                    DropReason::QueueFull => warn!(
                        target: "session.room",
                        room_id = %self.room_id,
                        client_id = %client.client_id(),
                        event = %event,
                        "Outbound queue full, dropping frame for client"
                    ),
                    DropReason::Closed => debug!(
                        target: "session.room",
                        room_id = %self.room_id,
                        client_id = %client.client_id(),
                        event = %event,
                        "Outbound queue closed, dropping frame for client"
                    ),
                }
                metrics::record_frame_dropped(reason.as_str());
                false
            }
        }
    }
}
