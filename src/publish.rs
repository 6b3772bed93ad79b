//! The API the request workflow uses to raise notifications.

use crate::events::{NotificationEvent, RequestId};
#[cfg(feature = "redis-relay")]
use crate::relay::RedisRelay;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::types::{GroupKey, UserId};
use std::sync::Arc;
use tracing::{debug, instrument};
#[cfg(feature = "redis-relay")]
use tracing::error;

/// A cloneable handle for publishing events into the gateway's groups.
///
/// Publishing is fire-and-forget: nothing here reports delivery failures to
/// the caller. With a relay configured, events go through Redis so every
/// instance fans them out; otherwise they are broadcast to local connections.
#[derive(Debug, Clone)]
pub struct NotificationPublisher {
    registry: Arc<ConnectionRegistry>,
    #[cfg(feature = "redis-relay")]
    relay: Option<Arc<RedisRelay>>,
}

impl NotificationPublisher {
    pub(crate) fn local(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            #[cfg(feature = "redis-relay")]
            relay: None,
        }
    }

    #[cfg(feature = "redis-relay")]
    pub(crate) fn relayed(registry: Arc<ConnectionRegistry>, relay: Arc<RedisRelay>) -> Self {
        Self {
            registry,
            relay: Some(relay),
        }
    }

    /// Tells every secretary connection that a teacher submitted a request.
    pub async fn publish_new_request(
        &self,
        request_id: RequestId,
        teacher_display_name: impl Into<String>,
        filename: impl Into<String>,
        deadline: impl Into<String>,
    ) {
        let event = NotificationEvent::NewRequest {
            request_id,
            teacher: teacher_display_name.into(),
            filename: filename.into(),
            deadline: deadline.into(),
        };
        self.publish(GroupKey::Secretary, event).await;
    }

    /// Tells the owning teacher's connections that their request was printed.
    pub async fn publish_request_printed(
        &self,
        request_id: RequestId,
        teacher_id: UserId,
        filename: impl Into<String>,
    ) {
        let event = NotificationEvent::RequestPrinted {
            request_id,
            filename: filename.into(),
        };
        self.publish(GroupKey::Teacher(teacher_id), event).await;
    }

    #[instrument(skip_all, fields(%group, kind = event.kind()))]
    pub async fn publish(&self, group: GroupKey, event: NotificationEvent) {
        #[cfg(feature = "redis-relay")]
        if let Some(relay) = &self.relay {
            match relay.publish(&group, &event).await {
                Ok(receivers) => {
                    debug!(receivers, "Published event to relay");
                    return;
                }
                Err(e) => {
                    error!("Relay publish failed, delivering locally only: {}", e);
                }
            }
        }

        let delivered = self.registry.broadcast(&group, event);
        debug!(delivered, "Published event to local connections");
    }
}
