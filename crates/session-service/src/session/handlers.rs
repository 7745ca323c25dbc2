//! Event handlers.
//!
//! Handlers run with the room lock held, after the router has checked the
//! caller's tier. They never return errors: a payload of the wrong shape, a
//! failed validation or a target that is not where it should be is logged
//! and the message is dropped without a reply.
//!
//! Payload convention: requests carry the sender's `ClientInfo`, host
//! actions carry the target's. The server always stamps the authenticated
//! identity over sender fields before anything is stored or broadcast.

use super::chat::ChatEntry;
use super::client::ClientHandle;
use super::messages::{
    ClientInfo, DeleteChatPayload, Event, MediaStatePayload, RELAY_TARGET_FIELD,
};
use super::permissions::{Role, Tier};
use super::state::{Member, RoomState};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

impl RoomState {
    /// Register a newly connected client and announce it.
    ///
    /// The first admitted member of an empty room becomes host; everyone
    /// else waits for admission. A client id that is already present is a
    /// reconnect: the new connection replaces the old one and keeps its role.
    pub(crate) fn admit(&mut self, client: ClientHandle) -> Role {
        let info = ClientInfo::new(client.client_id(), client.display_name());

        if let Some(existing) = self.member_mut(client.client_id()) {
            existing.client = client;
            let role = existing.role;
            info!(
                target: "session.room",
                room_id = %self.room_id(),
                client_id = %info.client_id,
                role = %role,
                "Client reconnected, replacing previous connection"
            );
            self.unicast(&info.client_id, Event::RoomState, &self.snapshot_for(&info));
            return role;
        }

        let role = if self.is_empty() {
            self.add_host(Member::new(client));
            self.broadcast(Event::Connect, &info, None);
            Role::Host
        } else {
            self.add_waiting(Member::new(client));
            self.broadcast(Event::RequestWaiting, &info, Some(Tier::Host));
            Role::Waiting
        };

        info!(
            target: "session.room",
            room_id = %self.room_id(),
            client_id = %info.client_id,
            role = %role,
            "Client connected"
        );
        self.unicast(&info.client_id, Event::RoomState, &self.snapshot_for(&info));
        role
    }

    /// Remove `client` from the room and tell everyone left.
    ///
    /// Only the connection currently registered for the client id is
    /// removed, so a stale socket closing after a reconnect is a no-op.
    /// Returns the role the client held, if it was present.
    pub(crate) fn depart(&mut self, client: &ClientHandle) -> Option<Role> {
        self.member_for(client)?;
        let member = self.remove_member(client.client_id())?;
        let info = member.info();

        self.broadcast(Event::Disconnect, &info, None);
        info!(
            target: "session.room",
            room_id = %self.room_id(),
            client_id = %info.client_id,
            role = %member.role,
            remaining = self.occupancy(),
            "Client disconnected"
        );
        Some(member.role)
    }

    /// Dispatch a permission-checked event to its handler.
    pub(crate) fn dispatch(
        &mut self,
        sender: &ClientHandle,
        role: Role,
        event: Event,
        payload: Value,
    ) {
        match event {
            Event::AddChat => self.handle_add_chat(sender, payload),
            Event::DeleteChat => self.handle_delete_chat(sender, payload),
            Event::GetRecentChats => self.handle_get_recent_chats(sender),
            Event::RaiseHand => self.handle_raise_hand(sender, payload),
            Event::LowerHand => self.handle_lower_hand(sender, payload),
            Event::RequestWaiting => self.handle_request_waiting(sender),
            Event::AcceptWaiting => self.handle_accept_waiting(sender, payload),
            Event::DenyWaiting => self.handle_deny_waiting(sender, payload),
            Event::RequestScreenshare => self.handle_request_screenshare(sender, role),
            Event::AcceptScreenshare => self.handle_accept_screenshare(sender, payload),
            Event::DenyScreenshare => self.handle_deny_screenshare(sender, payload),
            Event::StopScreenshare => self.handle_stop_screenshare(sender),
            Event::ToggleAudio | Event::ToggleVideo => {
                self.handle_media_toggle(sender, event, payload);
            }
            Event::Offer | Event::Answer | Event::Candidate | Event::Renegotiate => {
                self.handle_relay(sender, event, payload);
            }
            Event::Connect | Event::Disconnect | Event::RoomState => {
                debug!(
                    target: "session.room",
                    room_id = %self.room_id(),
                    event = %event,
                    "Lifecycle event reached dispatch, ignoring"
                );
            }
        }
    }

    fn decode<T: DeserializeOwned>(
        &self,
        sender: &ClientHandle,
        event: Event,
        payload: Value,
    ) -> Option<T> {
        match serde_json::from_value(payload) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(
                    target: "session.room",
                    room_id = %self.room_id(),
                    client_id = %sender.client_id(),
                    event = %event,
                    error = %e,
                    "Payload does not match event shape, dropping"
                );
                None
            }
        }
    }

    fn sender_info(sender: &ClientHandle) -> ClientInfo {
        ClientInfo::new(sender.client_id(), sender.display_name())
    }

    fn target_missing(&self, sender: &ClientHandle, event: Event, target_id: &str) {
        warn!(
            target: "session.room",
            room_id = %self.room_id(),
            client_id = %sender.client_id(),
            target_id = %target_id,
            event = %event,
            "Target not in expected state, ignoring"
        );
    }

    // ========================================================================
    // Chat
    // ========================================================================

    fn handle_add_chat(&mut self, sender: &ClientHandle, payload: Value) {
        let Some(mut entry) = self.decode::<ChatEntry>(sender, Event::AddChat, payload) else {
            return;
        };
        if let Err(e) = entry.validate() {
            debug!(
                target: "session.room",
                room_id = %self.room_id(),
                client_id = %sender.client_id(),
                error = %e,
                "Invalid chat payload, dropping"
            );
            return;
        }

        sender.client_id().clone_into(&mut entry.sender_id);
        sender
            .display_name()
            .clone_into(&mut entry.sender_display_name);
        if entry.chat_id.is_empty() {
            entry.chat_id = uuid::Uuid::new_v4().to_string();
        }
        entry.timestamp = chrono::Utc::now().timestamp();

        let evicted = self.chat.append(entry.clone());
        if evicted > 0 {
            debug!(
                target: "session.room",
                room_id = %self.room_id(),
                evicted,
                "Chat history over bound, evicted oldest"
            );
        }
        self.broadcast(Event::AddChat, &entry, Some(Tier::Participant));
    }

    fn handle_delete_chat(&mut self, sender: &ClientHandle, payload: Value) {
        let Some(mut request) = self.decode::<DeleteChatPayload>(sender, Event::DeleteChat, payload)
        else {
            return;
        };

        if self.chat.delete_by_id(&request.chat_id).is_none() {
            debug!(
                target: "session.room",
                room_id = %self.room_id(),
                chat_id = %request.chat_id,
                "Chat not in history, nothing to delete"
            );
        }

        sender.client_id().clone_into(&mut request.client_id);
        sender.display_name().clone_into(&mut request.display_name);
        self.broadcast(Event::DeleteChat, &request, Some(Tier::Participant));
    }

    fn handle_get_recent_chats(&mut self, sender: &ClientHandle) {
        let recent = self.chat.recent(self.settings().recent_chats_limit);
        self.unicast_to(sender, Event::GetRecentChats, &recent);
    }

    // ========================================================================
    // Hand raising
    // ========================================================================

    fn handle_raise_hand(&mut self, sender: &ClientHandle, payload: Value) {
        let Some(target) = self.decode::<ClientInfo>(sender, Event::RaiseHand, payload) else {
            return;
        };
        match self.raise_hand(&target.client_id) {
            Some(info) => {
                self.broadcast(Event::RaiseHand, &info, Some(Tier::Participant));
            }
            None => self.target_missing(sender, Event::RaiseHand, &target.client_id),
        }
    }

    fn handle_lower_hand(&mut self, sender: &ClientHandle, payload: Value) {
        let Some(target) = self.decode::<ClientInfo>(sender, Event::LowerHand, payload) else {
            return;
        };
        match self.lower_hand(&target.client_id) {
            Some(info) => {
                self.broadcast(Event::LowerHand, &info, Some(Tier::Participant));
            }
            None => self.target_missing(sender, Event::LowerHand, &target.client_id),
        }
    }

    // ========================================================================
    // Waiting room
    // ========================================================================

    fn handle_request_waiting(&mut self, sender: &ClientHandle) {
        self.broadcast(Event::RequestWaiting, &Self::sender_info(sender), Some(Tier::Host));
    }

    fn handle_accept_waiting(&mut self, sender: &ClientHandle, payload: Value) {
        let Some(target) = self.decode::<ClientInfo>(sender, Event::AcceptWaiting, payload) else {
            return;
        };
        // The router only checked the caller; the target may have left or
        // been accepted by another host in the meantime.
        let Some(admitted) = self.admit_waiting(&target.client_id) else {
            self.target_missing(sender, Event::AcceptWaiting, &target.client_id);
            return;
        };

        info!(
            target: "session.room",
            room_id = %self.room_id(),
            client_id = %admitted.client_id,
            accepted_by = %sender.client_id(),
            "Client accepted from waiting room"
        );
        self.broadcast(Event::AcceptWaiting, &admitted, None);
        self.unicast(&admitted.client_id, Event::RoomState, &self.snapshot_for(&admitted));
    }

    fn handle_deny_waiting(&mut self, sender: &ClientHandle, payload: Value) {
        let Some(target) = self.decode::<ClientInfo>(sender, Event::DenyWaiting, payload) else {
            return;
        };

        let mut announced = target.clone();
        if self.is_waiting(&target.client_id) {
            if let Some(denied) = self.remove_member(&target.client_id) {
                announced = denied.info();
                // Out of the waiting map now, so the broadcast below would miss it
                self.unicast_to(&denied.client, Event::DenyWaiting, &announced);
                info!(
                    target: "session.room",
                    room_id = %self.room_id(),
                    client_id = %announced.client_id,
                    denied_by = %sender.client_id(),
                    "Client denied from waiting room"
                );
            }
        } else {
            debug!(
                target: "session.room",
                room_id = %self.room_id(),
                target_id = %target.client_id,
                "Deny for client that is not waiting"
            );
        }

        self.broadcast(Event::DenyWaiting, &announced, Some(Tier::Waiting));
    }

    // ========================================================================
    // Screen sharing
    // ========================================================================

    fn handle_request_screenshare(&mut self, sender: &ClientHandle, role: Role) {
        if role == Role::Screenshare {
            debug!(
                target: "session.room",
                room_id = %self.room_id(),
                client_id = %sender.client_id(),
                "Client already sharing, ignoring request"
            );
            return;
        }
        self.broadcast(
            Event::RequestScreenshare,
            &Self::sender_info(sender),
            Some(Tier::Host),
        );
    }

    fn handle_accept_screenshare(&mut self, sender: &ClientHandle, payload: Value) {
        let Some(target) = self.decode::<ClientInfo>(sender, Event::AcceptScreenshare, payload)
        else {
            return;
        };
        match self.start_screenshare(&target.client_id) {
            Some(info) => {
                info!(
                    target: "session.room",
                    room_id = %self.room_id(),
                    client_id = %info.client_id,
                    accepted_by = %sender.client_id(),
                    "Screenshare granted"
                );
                self.unicast(&info.client_id, Event::AcceptScreenshare, &info);
            }
            None => self.target_missing(sender, Event::AcceptScreenshare, &target.client_id),
        }
    }

    fn handle_deny_screenshare(&mut self, sender: &ClientHandle, payload: Value) {
        let Some(target) = self.decode::<ClientInfo>(sender, Event::DenyScreenshare, payload) else {
            return;
        };
        let announced = match self.participant(&target.client_id) {
            Some(member) => {
                let info = member.info();
                self.unicast(&info.client_id, Event::DenyScreenshare, &info);
                info
            }
            None => {
                self.target_missing(sender, Event::DenyScreenshare, &target.client_id);
                target
            }
        };
        self.broadcast(Event::DenyScreenshare, &announced, Some(Tier::Host));
    }

    fn handle_stop_screenshare(&mut self, sender: &ClientHandle) {
        match self.stop_screenshare(sender.client_id()) {
            Some(info) => {
                self.broadcast(Event::StopScreenshare, &info, Some(Tier::Participant));
            }
            None => debug!(
                target: "session.room",
                room_id = %self.room_id(),
                client_id = %sender.client_id(),
                "Stop screenshare from client that is not sharing"
            ),
        }
    }

    // ========================================================================
    // Media state
    // ========================================================================

    fn handle_media_toggle(&mut self, sender: &ClientHandle, event: Event, payload: Value) {
        let Some(mut state) = self.decode::<MediaStatePayload>(sender, event, payload) else {
            return;
        };
        if event == Event::ToggleAudio {
            self.set_audio(sender.client_id(), state.enabled);
        } else {
            self.set_video(sender.client_id(), state.enabled);
        }

        sender.client_id().clone_into(&mut state.client_id);
        sender.display_name().clone_into(&mut state.display_name);
        self.broadcast(event, &state, Some(Tier::Participant));
    }

    // ========================================================================
    // Peer connection relay
    // ========================================================================

    /// Forward an opaque negotiation payload to one admitted peer.
    fn handle_relay(&mut self, sender: &ClientHandle, event: Event, payload: Value) {
        let Value::Object(mut body) = payload else {
            warn!(
                target: "session.room",
                room_id = %self.room_id(),
                client_id = %sender.client_id(),
                event = %event,
                "Relay payload is not an object, dropping"
            );
            return;
        };
        let Some(target_id) = body
            .get(RELAY_TARGET_FIELD)
            .and_then(Value::as_str)
            .map(str::to_string)
        else {
            warn!(
                target: "session.room",
                room_id = %self.room_id(),
                client_id = %sender.client_id(),
                event = %event,
                "Relay payload has no target, dropping"
            );
            return;
        };
        if target_id == sender.client_id() || self.admitted(&target_id).is_none() {
            self.target_missing(sender, event, &target_id);
            return;
        }

        body.insert("clientId".to_string(), Value::from(sender.client_id()));
        body.insert("displayName".to_string(), Value::from(sender.display_name()));
        self.unicast(&target_id, event, &Value::Object(body));
    }
}
