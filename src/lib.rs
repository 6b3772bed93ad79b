//! # Prints Realtime
//!
//! Realtime notifications for a school print office. Teachers submit print
//! requests and a secretary works through the queue; both sides keep a
//! WebSocket open and are told, as it happens, about requests that concern
//! them.
//!
//! ## Core Features
//!
//! - **`ConnectionRegistry`**: Groups live connections (`secretary`, `teacher:<id>`) and fans events out without ever waiting on a slow client.
//! - **`NotificationGateway`**: Opens one session per authenticated connection and cleans up on every way a connection can end.
//! - **`NotificationPublisher`**: `publish_new_request` / `publish_request_printed` for the request workflow.
//! - **Flexible Authentication**: A `SessionIdentity` extractor that works with headers, query params or a session cookie.
//! - **Redis Relay (Optional)**: Share groups between several instances over Redis Pub/Sub.
//!
//! ## Getting Started
//!
//! See [`ws::upgrade::upgrade_handler`] for wiring the gateway into an Axum router.
//!
//! ---

pub mod config;
pub mod error;
pub mod events;
pub mod publish;
pub mod ws;

// It will only be part of the crate if the "redis-relay" feature is enabled.
#[cfg(feature = "redis-relay")]
pub mod relay;

// It will only be part of the crate if the "auth" feature is enabled.
#[cfg(feature = "auth")]
pub mod auth;

/// Public prelude for convenience.
///
/// This allows users to import the most common types with a single `use` statement:
/// `use prints_realtime::prelude::*;`
pub mod prelude {
    pub use crate::config::GatewayConfig;
    pub use crate::error::GatewayError;
    pub use crate::events::NotificationEvent;
    pub use crate::publish::NotificationPublisher;
    pub use crate::ws::{
        registry::ConnectionRegistry,
        service::NotificationGateway,
        session::{NotificationSession, SessionState},
        types::{GroupKey, Identity},
        upgrade::upgrade_handler,
    };

    #[cfg(feature = "redis-relay")]
    pub use crate::relay::RedisRelay;

    #[cfg(feature = "auth")]
    pub use crate::auth::{IdentityResolver, SessionIdentity};
}
