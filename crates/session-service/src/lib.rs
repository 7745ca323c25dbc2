//! Session Service Library
//!
//! Real-time room coordinator for multi-party sessions. Clients connect over
//! WebSocket to a room; the service tracks who is in the room and in which
//! role, routes each inbound event through a permission check, and fans state
//! changes out to the right audience without blocking on slow consumers.
//!
//! # Architecture
//!
//! ```text
//! WebSocket upgrade (ws)
//! ├── origin check, identity validation (auth)
//! └── Hub::join -> Room
//!     └── run_client: inbound pump -> Room::route -> handler -> broadcast
//!                     outbound pump <- bounded per-client queue
//! ```
//!
//! # Key Design Decisions
//!
//! - **One lock per room**: routing, handling and broadcast share a single
//!   critical section; the registry lock is never held at the same time
//! - **Non-blocking fan-out**: a full outbound queue drops the frame for that
//!   client only
//! - **Fail silent**: malformed, invalid or unauthorized client messages are
//!   logged and dropped, never answered with an error
//! - **In-memory only**: rooms live as long as someone is in them
//!
//! # Modules
//!
//! - [`auth`] - Token validation into a client identity
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with status codes
//! - [`observability`] - Health endpoints and metrics
//! - [`session`] - Room registry, room state machine, connection pumps
//! - [`transport`] - Frame source/sink seam
//! - [`ws`] - axum WebSocket route and transport adapter

pub mod auth;
pub mod config;
pub mod errors;
pub mod observability;
pub mod session;
pub mod transport;
pub mod ws;
