//! # Session Test Utilities
//!
//! Shared test utilities for the Session Service.
//!
//! This crate provides a mock transport and identity fixtures for testing
//! rooms and connection pumps without opening sockets.
//!
//! ## Modules
//!
//! - `mock_transport` - Channel-backed `FrameSource`/`FrameSink` with a test-side peer
//! - `fixtures` - Test identities and signed identity tokens
//!
//! ## Usage
//!
//! ```rust,ignore
//! use session_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let alice = TestIdentity::new("alice");
//!     let MockTransport { source, sink, mut peer } = MockTransport::new();
//!
//!     // Hand `source` and `sink` to run_client, drive the connection via `peer`
//!     peer.send_event("raise_hand", serde_json::json!({"clientId": "alice"}));
//!     let frame = peer.expect_event("raise_hand").await;
//! }
//! ```

pub mod fixtures;
pub mod mock_transport;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_transport::*;
