//! The `NotificationGateway` that owns the registry and drives connections.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::publish::NotificationPublisher;
#[cfg(feature = "redis-relay")]
use crate::relay::RedisRelay;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::session::NotificationSession;
use crate::ws::types::Identity;
use axum::extract::ws::WebSocket;
use futures_util::StreamExt;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument};

/// The notification service shared by every connection on this instance.
///
/// Constructed once at startup and handed to the router as state. It owns
/// the [`ConnectionRegistry`]; sessions and publishers hold it by `Arc`.
#[derive(Debug)]
pub struct NotificationGateway {
    registry: Arc<ConnectionRegistry>,
    config: GatewayConfig,
    publisher: NotificationPublisher,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationGateway {
    /// Creates a gateway that fans out to local connections only.
    pub fn new(config: GatewayConfig) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        Arc::new(Self {
            publisher: NotificationPublisher::local(Arc::clone(&registry)),
            registry,
            config,
            listener: Mutex::new(None),
        })
    }

    /// Creates a gateway whose publishes travel through Redis and spawns the
    /// background listener. Falls back to [`new`](Self::new) when
    /// `config.redis_url` is unset.
    #[cfg(feature = "redis-relay")]
    pub fn with_relay(config: GatewayConfig) -> Result<Arc<Self>, GatewayError> {
        let Some(redis_url) = config.redis_url.clone() else {
            info!("No REDIS_URL configured, running without relay.");
            return Ok(Self::new(config));
        };

        let registry = Arc::new(ConnectionRegistry::new());
        let relay = Arc::new(RedisRelay::new(&redis_url, config.redis_channel_prefix.clone())?);
        let listener = relay.spawn_listener(Arc::clone(&registry));

        Ok(Arc::new(Self {
            publisher: NotificationPublisher::relayed(Arc::clone(&registry), relay),
            registry,
            config,
            listener: Mutex::new(Some(listener)),
        }))
    }

    /// Builds a gateway from `PRINTS_*` and `REDIS_URL` environment
    /// variables. With the `redis-relay` feature a configured `REDIS_URL`
    /// enables the relay.
    pub fn from_env() -> Result<Arc<Self>, GatewayError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Arc<Self>, GatewayError> {
        Self::from_config(GatewayConfig::from_lookup(lookup)?)
    }

    #[cfg(feature = "redis-relay")]
    fn from_config(config: GatewayConfig) -> Result<Arc<Self>, GatewayError> {
        Self::with_relay(config)
    }

    #[cfg(not(feature = "redis-relay"))]
    fn from_config(config: GatewayConfig) -> Result<Arc<Self>, GatewayError> {
        Ok(Self::new(config))
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// A handle for the request workflow to publish events with.
    pub fn publisher(&self) -> NotificationPublisher {
        self.publisher.clone()
    }

    /// The connecting step for a new client: refuses anonymous identities,
    /// otherwise joins the identity's group.
    pub fn open_session(&self, identity: Option<Identity>) -> Result<NotificationSession, GatewayError> {
        NotificationSession::connect(Arc::clone(&self.registry), identity, &self.config)
    }

    /// Runs an accepted WebSocket until it closes.
    #[instrument(skip_all, fields(conn_id = %session.conn_id(), group = %session.group()))]
    pub async fn handle_connection(&self, socket: WebSocket, session: NotificationSession) {
        info!("Client connected.");
        let (sink, stream) = socket.split();
        session.run(sink, stream).await;
        info!("Client disconnected.");
    }

    /// Releases every connection and stops the relay listener. Each session
    /// sees its outbox close, sends a close frame and exits.
    pub fn shutdown(&self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(handle) = listener.take() {
                handle.abort();
            }
        }
        let released = self.registry.clear();
        info!(released, "Notification gateway shut down.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::session::tests::{TRACING, recording_sink, silent_client};
    use crate::config::ConfigError;
    use crate::ws::types::GroupKey;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use once_cell::sync::Lazy;
    use std::time::Duration;

    async fn expect_silence(frames: &mut tokio::sync::mpsc::UnboundedReceiver<String>) {
        let waited = tokio::time::timeout(Duration::from_millis(50), frames.recv()).await;
        assert!(waited.is_err(), "unexpected frame: {:?}", waited);
    }

    #[tokio::test]
    async fn print_office_scenario() {
        Lazy::force(&TRACING);
        let gateway = NotificationGateway::new(GatewayConfig::default());
        let publisher = gateway.publisher();

        let teacher = gateway
            .open_session(Some(Identity::teacher(7, "Jean Baptiste")))
            .unwrap();
        assert_eq!(gateway.registry().member_count(&GroupKey::Teacher(7)), 1);
        let secretary = gateway
            .open_session(Some(Identity::secretary(1, "Marie Mukamana")))
            .unwrap();
        assert_eq!(gateway.registry().member_count(&GroupKey::Secretary), 1);

        let (teacher_sink, mut teacher_frames) = recording_sink();
        let (secretary_sink, mut secretary_frames) = recording_sink();
        let teacher_task = tokio::spawn(teacher.run(teacher_sink, silent_client()));
        let secretary_task = tokio::spawn(secretary.run(secretary_sink, silent_client()));

        publisher
            .publish_new_request(42, "Jean Baptiste", "essay.pdf", "2024-06-01 14:00")
            .await;
        assert_eq!(
            secretary_frames.recv().await.unwrap(),
            r#"{"type":"new_request","request_id":42,"teacher":"Jean Baptiste","filename":"essay.pdf","deadline":"2024-06-01 14:00"}"#
        );
        expect_silence(&mut teacher_frames).await;

        publisher.publish_request_printed(42, 7, "essay.pdf").await;
        assert_eq!(
            teacher_frames.recv().await.unwrap(),
            r#"{"type":"request_printed","request_id":42,"filename":"essay.pdf"}"#
        );
        expect_silence(&mut secretary_frames).await;

        gateway.shutdown();
        assert_eq!(gateway.registry().connection_count(), 0);
        teacher_task.await.unwrap();
        secretary_task.await.unwrap();
    }

    #[tokio::test]
    async fn teachers_never_see_each_others_events() {
        Lazy::force(&TRACING);
        let gateway = NotificationGateway::new(GatewayConfig::default());

        let seven = gateway.open_session(Some(Identity::teacher(7, "Jean Baptiste"))).unwrap();
        let nine = gateway.open_session(Some(Identity::teacher(9, "Alice Uwamahoro"))).unwrap();
        let (seven_sink, mut seven_frames) = recording_sink();
        let (nine_sink, mut nine_frames) = recording_sink();
        tokio::spawn(seven.run(seven_sink, silent_client()));
        tokio::spawn(nine.run(nine_sink, silent_client()));

        gateway.publisher().publish_request_printed(5, 9, "lab.docx").await;

        let frame: serde_json::Value =
            serde_json::from_str(&nine_frames.recv().await.unwrap()).unwrap();
        assert_eq!(frame["request_id"], 5);
        expect_silence(&mut seven_frames).await;

        gateway.shutdown();
    }

    #[test]
    fn anonymous_connection_never_joins() {
        let gateway = NotificationGateway::new(GatewayConfig::default());
        assert!(matches!(
            gateway.open_session(None),
            Err(GatewayError::Unauthenticated)
        ));
        assert_eq!(gateway.registry().group_count(), 0);
    }

    #[test]
    fn anonymous_refusal_maps_to_unauthorized() {
        let gateway = NotificationGateway::new(GatewayConfig::default());
        let err = gateway.open_session(None).unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn gateway_is_built_from_environment_values() {
        let gateway = NotificationGateway::from_lookup(|key| match key {
            "PRINTS_WRITE_TIMEOUT_MS" => Some("250".to_owned()),
            _ => None,
        })
        .unwrap();
        assert_eq!(gateway.config().write_timeout, Duration::from_millis(250));
        assert_eq!(gateway.config().redis_url, None);
    }

    #[tokio::test]
    async fn invalid_environment_surfaces_config_error() {
        let err = NotificationGateway::from_lookup(|key| match key {
            "PRINTS_WRITE_TIMEOUT_MS" => Some("soon".to_owned()),
            _ => None,
        })
        .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Config(ConfigError::Invalid {
                key: "PRINTS_WRITE_TIMEOUT_MS",
                ..
            })
        ));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn reconnect_rejoins_same_group() {
        Lazy::force(&TRACING);
        let gateway = NotificationGateway::new(GatewayConfig::default());
        let identity = Identity::teacher(7, "Jean Baptiste");

        let first = gateway.open_session(Some(identity.clone())).unwrap();
        let first_id = first.conn_id();
        drop(first);
        assert!(!gateway.registry().contains(&GroupKey::Teacher(7), first_id));

        let second = gateway.open_session(Some(identity)).unwrap();
        assert_ne!(second.conn_id(), first_id);
        assert_eq!(gateway.registry().members(&GroupKey::Teacher(7)), vec![second.conn_id()]);
    }
}
