//! WebSocket notification fan-out.
//!
//! Connections are grouped by [`types::GroupKey`]: one shared `secretary`
//! group and one `teacher:<id>` group per teacher. The
//! [`service::NotificationGateway`] opens a [`session::NotificationSession`]
//! per client, the [`registry::ConnectionRegistry`] tracks group membership,
//! and [`crate::publish::NotificationPublisher`] fans events out.

pub mod registry;
pub mod service;
pub mod session;
pub mod types;
pub mod upgrade;
