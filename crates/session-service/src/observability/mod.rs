//! Observability for the Session Service.
//!
//! # Privacy by Default
//!
//! Tracing spans use `#[instrument(skip_all)]` with explicit safe fields.
//! Chat content and tokens are never logged; room and client ids appear in
//! log fields but never as metric labels.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `session_rooms_active` | Gauge | none | Rooms in the registry |
//! | `session_clients_connected` | Gauge | none | Connections with running pumps |
//! | `session_messages_routed_total` | Counter | `event` | Messages dispatched to a handler |
//! | `session_messages_denied_total` | Counter | `event` | Messages failing the tier check |
//! | `session_messages_rejected_total` | Counter | `reason` | Messages dropped before dispatch |
//! | `session_messages_dropped_total` | Counter | `reason` | Outbound frames dropped per recipient |
//! | `session_route_latency_seconds` | Histogram | `event` | Lock wait + handler + fan-out |
//! | `session_callback_panics_total` | Counter | none | Room-empty callback panics |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
