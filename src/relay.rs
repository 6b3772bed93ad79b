//! Redis Pub/Sub relay so several gateway instances share the same groups.
//!
//! Every group maps to one Redis channel, `<prefix><group>`, for example
//! `prints:secretary` or `prints:teacher:7`. Publishing sends the wire JSON to
//! that channel. A background listener pattern-subscribes to `<prefix>*` and
//! broadcasts whatever arrives into the local registry, including events this
//! instance published itself.

use crate::error::GatewayError;
use crate::events::NotificationEvent;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::types::GroupKey;
use futures_util::StreamExt;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub struct RedisRelay {
    client: redis::Client,
    channel_prefix: String,
}

impl RedisRelay {
    pub fn new(redis_url: &str, channel_prefix: impl Into<String>) -> Result<Self, GatewayError> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            channel_prefix: channel_prefix.into(),
        })
    }

    pub fn channel_for(&self, group: &GroupKey) -> String {
        format!("{}{}", self.channel_prefix, group)
    }

    /// Inverse of [`channel_for`](Self::channel_for).
    pub fn group_for(&self, channel: &str) -> Option<GroupKey> {
        channel.strip_prefix(&self.channel_prefix)?.parse().ok()
    }

    /// Publishes an event to the group's channel and returns how many
    /// subscribers Redis handed it to.
    pub async fn publish(
        &self,
        group: &GroupKey,
        event: &NotificationEvent,
    ) -> Result<usize, GatewayError> {
        let payload = event.to_wire()?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let receivers: usize = conn.publish(self.channel_for(group), payload).await?;
        Ok(receivers)
    }

    pub(crate) fn spawn_listener(self: &Arc<Self>, registry: Arc<ConnectionRegistry>) -> JoinHandle<()> {
        info!("Spawning Redis Pub/Sub listener task...");
        let relay = Arc::clone(self);
        tokio::spawn(async move { relay.run_listener(registry).await })
    }

    /// Keeps a pattern subscription alive, reconnecting after failures.
    async fn run_listener(&self, registry: Arc<ConnectionRegistry>) {
        let pattern = format!("{}*", self.channel_prefix);
        loop {
            let mut pubsub = match self.client.get_async_pubsub().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(
                        "Failed to connect to Redis for Pub/Sub: {}. Retrying in {:?}.",
                        e, RECONNECT_DELAY
                    );
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
            };

            if let Err(e) = pubsub.psubscribe(&pattern).await {
                error!(%pattern, "Failed to subscribe to relay channels: {}. Retrying.", e);
                tokio::time::sleep(RECONNECT_DELAY).await;
                continue;
            }
            info!(%pattern, "Redis Pub/Sub listener subscribed.");

            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                self.handle_message(&registry, msg);
            }

            warn!("Redis Pub/Sub stream ended. Reconnecting in {:?}.", RECONNECT_DELAY);
            tokio::time::sleep(RECONNECT_DELAY).await;
        }
    }

    fn handle_message(&self, registry: &ConnectionRegistry, msg: redis::Msg) {
        let channel = msg.get_channel_name();
        match msg.get_payload::<String>() {
            Ok(payload) => {
                self.deliver(registry, channel, &payload);
            }
            Err(e) => error!(%channel, "Failed to get payload from Redis message: {}", e),
        }
    }

    /// Broadcasts one relayed payload into the local registry. Unknown
    /// channels and undecodable payloads are dropped. Returns the number of
    /// local connections reached.
    fn deliver(&self, registry: &ConnectionRegistry, channel: &str, payload: &str) -> usize {
        let Some(group) = self.group_for(channel) else {
            warn!(%channel, "Ignoring relay message on unrecognized channel");
            return 0;
        };

        match NotificationEvent::from_wire(payload) {
            Ok(event) => {
                let delivered = registry.broadcast(&group, event);
                debug!(%group, delivered, "Relayed event to local connections");
                delivered
            }
            Err(e) => {
                warn!(%channel, "Dropping malformed relay payload: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::types::{ConnectionHandle, Inbox};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn member(registry: &ConnectionRegistry, group: GroupKey) -> Inbox {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.join(group, ConnectionHandle::new(Uuid::new_v4(), tx));
        rx
    }

    #[test]
    fn channel_names_round_trip_through_groups() {
        let relay = RedisRelay::new("redis://127.0.0.1/", "prints:").unwrap();
        assert_eq!(relay.channel_for(&GroupKey::Secretary), "prints:secretary");
        assert_eq!(relay.channel_for(&GroupKey::Teacher(7)), "prints:teacher:7");
        assert_eq!(relay.group_for("prints:teacher:7"), Some(GroupKey::Teacher(7)));
        assert_eq!(relay.group_for("prints:secretary"), Some(GroupKey::Secretary));
    }

    #[test]
    fn foreign_channels_are_ignored() {
        let relay = RedisRelay::new("redis://127.0.0.1/", "prints:").unwrap();
        assert_eq!(relay.group_for("chat:secretary"), None);
        assert_eq!(relay.group_for("prints:teacher:x"), None);
    }

    #[test]
    fn relayed_payload_reaches_local_group() {
        let relay = RedisRelay::new("redis://127.0.0.1/", "prints:").unwrap();
        let registry = ConnectionRegistry::new();
        let mut secretary_rx = member(&registry, GroupKey::Secretary);
        let mut teacher_rx = member(&registry, GroupKey::Teacher(7));

        let payload = r#"{"type":"new_request","request_id":42,"teacher":"Jean Baptiste","filename":"essay.pdf","deadline":"2024-06-01 14:00"}"#;
        assert_eq!(relay.deliver(&registry, "prints:secretary", payload), 1);

        assert_eq!(
            *secretary_rx.try_recv().unwrap(),
            NotificationEvent::NewRequest {
                request_id: 42,
                teacher: "Jean Baptiste".into(),
                filename: "essay.pdf".into(),
                deadline: "2024-06-01 14:00".into(),
            }
        );
        assert!(teacher_rx.try_recv().is_err());
    }

    #[test]
    fn malformed_or_misrouted_payloads_are_dropped() {
        let relay = RedisRelay::new("redis://127.0.0.1/", "prints:").unwrap();
        let registry = ConnectionRegistry::new();
        let mut secretary_rx = member(&registry, GroupKey::Secretary);
        let printed = r#"{"type":"request_printed","request_id":1,"filename":"a.pdf"}"#;

        assert_eq!(relay.deliver(&registry, "prints:secretary", "not json"), 0);
        assert_eq!(relay.deliver(&registry, "prints:secretary", r#"{"type":"unknown"}"#), 0);
        assert_eq!(relay.deliver(&registry, "chat:secretary", printed), 0);
        assert!(secretary_rx.try_recv().is_err());
        assert_eq!(registry.member_count(&GroupKey::Secretary), 1);
    }
}
