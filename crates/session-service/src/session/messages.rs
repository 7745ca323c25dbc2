//! Wire messages for the room protocol.
//!
//! Every frame is a JSON envelope:
//!
//! ```text
//! { "event": "<event-name>", "payload": <event-specific object> }
//! ```
//!
//! Inbound frames are parsed in two steps: the envelope first (with the
//! event kept as a raw string) and then the event name, so an unknown event
//! is a loggable drop rather than a parse failure of the whole frame.
//! Payloads stay as [`serde_json::Value`] until the handler for the event
//! decodes them into the shape it expects.

use super::permissions::{Role, Tier};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Every event name known to the room protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Event {
    // Chat
    AddChat,
    DeleteChat,
    GetRecentChats,

    // Hand raising
    RaiseHand,
    LowerHand,

    // Waiting room
    RequestWaiting,
    AcceptWaiting,
    DenyWaiting,

    // Screen sharing
    RequestScreenshare,
    AcceptScreenshare,
    DenyScreenshare,
    StopScreenshare,

    // Media state
    ToggleAudio,
    ToggleVideo,

    // Peer connection relay
    Offer,
    Answer,
    Candidate,
    Renegotiate,

    // Lifecycle
    Connect,
    Disconnect,
    RoomState,
}

/// Who may send an event to the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Caller's role must belong to the tier.
    Tier(Tier),
    /// Any connected client, whatever its role.
    AnyMember,
    /// Emitted by the server only; never routed from a client.
    ServerOnly,
}

impl Event {
    pub const ALL: [Event; 21] = [
        Event::AddChat,
        Event::DeleteChat,
        Event::GetRecentChats,
        Event::RaiseHand,
        Event::LowerHand,
        Event::RequestWaiting,
        Event::AcceptWaiting,
        Event::DenyWaiting,
        Event::RequestScreenshare,
        Event::AcceptScreenshare,
        Event::DenyScreenshare,
        Event::StopScreenshare,
        Event::ToggleAudio,
        Event::ToggleVideo,
        Event::Offer,
        Event::Answer,
        Event::Candidate,
        Event::Renegotiate,
        Event::Connect,
        Event::Disconnect,
        Event::RoomState,
    ];

    /// Wire name of the event. Also used as a bounded metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Event::AddChat => "add_chat",
            Event::DeleteChat => "delete_chat",
            Event::GetRecentChats => "get_recent_chats",
            Event::RaiseHand => "raise_hand",
            Event::LowerHand => "lower_hand",
            Event::RequestWaiting => "request_waiting",
            Event::AcceptWaiting => "accept_waiting",
            Event::DenyWaiting => "deny_waiting",
            Event::RequestScreenshare => "request_screenshare",
            Event::AcceptScreenshare => "accept_screenshare",
            Event::DenyScreenshare => "deny_screenshare",
            Event::StopScreenshare => "stop_screenshare",
            Event::ToggleAudio => "toggle_audio",
            Event::ToggleVideo => "toggle_video",
            Event::Offer => "offer",
            Event::Answer => "answer",
            Event::Candidate => "candidate",
            Event::Renegotiate => "renegotiate",
            Event::Connect => "connect",
            Event::Disconnect => "disconnect",
            Event::RoomState => "room_state",
        }
    }

    /// Access rule the router enforces before dispatching this event.
    #[must_use]
    pub const fn access(self) -> Access {
        match self {
            Event::RequestWaiting => Access::Tier(Tier::Waiting),

            Event::AddChat
            | Event::DeleteChat
            | Event::GetRecentChats
            | Event::RaiseHand
            | Event::LowerHand
            | Event::RequestScreenshare
            | Event::ToggleAudio
            | Event::ToggleVideo
            | Event::Offer
            | Event::Answer
            | Event::Candidate
            | Event::Renegotiate => Access::Tier(Tier::Participant),

            Event::StopScreenshare => Access::Tier(Tier::Screenshare),

            Event::AcceptWaiting
            | Event::DenyWaiting
            | Event::AcceptScreenshare
            | Event::DenyScreenshare => Access::Tier(Tier::Host),

            Event::Disconnect => Access::AnyMember,

            Event::Connect | Event::RoomState => Access::ServerOnly,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown event: {0}")]
pub struct UnknownEvent(pub String);

impl FromStr for Event {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Event::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// Inbound envelope with the event still unparsed.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl InboundEnvelope {
    /// Parse a raw frame into an envelope.
    pub fn from_slice(frame: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(frame)
    }
}

#[derive(Serialize)]
struct OutboundEnvelope<'a, P: Serialize> {
    event: Event,
    payload: &'a P,
}

/// Serialize an outbound envelope once into a shareable frame.
pub fn encode<P: Serialize>(event: Event, payload: &P) -> Result<Bytes, serde_json::Error> {
    serde_json::to_vec(&OutboundEnvelope { event, payload }).map(Bytes::from)
}

// ============================================================================
// Payloads
// ============================================================================

/// Identifies one client: the sender of a request or the target of a host action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub client_id: String,
    #[serde(default)]
    pub display_name: String,
}

impl ClientInfo {
    pub fn new(client_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// `delete_chat` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteChatPayload {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub display_name: String,
    pub chat_id: String,
}

/// `toggle_audio` / `toggle_video` payload, and their broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaStatePayload {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub display_name: String,
    pub enabled: bool,
}

/// Body of the `room_state` snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatePayload {
    /// The client the snapshot was produced for.
    #[serde(flatten)]
    pub client: ClientInfo,
    pub room_id: String,
    /// The recipient's own role.
    pub role: Option<Role>,
    pub hosts: Vec<ClientInfo>,
    pub participants: Vec<ClientInfo>,
    pub hands_raised: Vec<ClientInfo>,
    pub waiting_users: Vec<ClientInfo>,
    pub sharing_screen: Vec<ClientInfo>,
}

/// Key in relay payloads naming the peer a frame is addressed to.
pub const RELAY_TARGET_FIELD: &str = "targetClientId";
