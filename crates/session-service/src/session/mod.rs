//! Room coordination core.
//!
//! ```text
//! Hub (registry, std mutex, map ops only)
//! └── Room (one per room id)
//!     ├── tokio mutex around RoomState
//!     │   ├── role maps: hosts / participants / waiting
//!     │   ├── ordered queues: waiting stack, draw order, hand raises
//!     │   └── chat history
//!     └── occupancy atomic (read by the Hub for eviction)
//!
//! Client connection
//! ├── inbound pump: frame -> envelope -> Room::route
//! └── outbound pump: bounded queue -> transport
//! ```
//!
//! - [`permissions`] - roles and capability tiers
//! - [`queue`] - ordered queue with O(1) handle removal
//! - [`chat`] - bounded chat history
//! - [`messages`] - wire envelope, event catalogue, payloads
//! - [`state`] - per-room state and fan-out primitives
//! - `handlers` - per-event transitions
//! - [`room`] - lock, router, occupancy, empty callback
//! - [`hub`] - room registry
//! - [`client`] - connection adapter and pumps

pub mod chat;
pub mod client;
mod handlers;
pub mod hub;
pub mod messages;
pub mod permissions;
pub mod queue;
pub mod room;
pub mod state;

pub use chat::{ChatEntry, ChatHistory};
pub use client::{run_client, ClientHandle, ClientIdentity, DropReason};
pub use hub::Hub;
pub use messages::{ClientInfo, Event, InboundEnvelope, RoomStatePayload};
pub use permissions::{has_permission, Role, Tier};
pub use room::{Room, RoomEmptyCallback, RouteOutcome};
pub use state::{RoomSettings, RoomState};
