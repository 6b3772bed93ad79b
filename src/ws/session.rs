// prints-realtime/src/ws/session.rs

//! The per-connection session: `Open -> Closed`.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::events::NotificationEvent;
use crate::ws::registry::ConnectionRegistry;
use crate::ws::types::{ConnectionHandle, ConnectionId, GroupKey, Identity, Inbox};
use axum::extract::ws::{Message, Utf8Bytes};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

/// Lifecycle of a session. The connecting step happens entirely inside
/// [`NotificationSession::connect`], so a session value is `Open` or `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Closed,
}

/// Server-side state for one client connection.
///
/// Created by [`connect`](Self::connect), which joins the registry group
/// derived from the identity. Whatever ends the session (close frame,
/// transport error, write timeout, eviction, or simply dropping the value)
/// leaves that group exactly once.
#[derive(Debug)]
pub struct NotificationSession {
    conn_id: ConnectionId,
    identity: Identity,
    group: GroupKey,
    state: SessionState,
    registry: Arc<ConnectionRegistry>,
    inbox: Inbox,
    write_timeout: Duration,
}

/// What woke the session loop up.
enum Step {
    Deliver(Arc<NotificationEvent>),
    Evicted,
    Inbound(Message),
    Disconnected(Option<String>),
}

impl NotificationSession {
    /// Runs the connecting step. Without an identity the connection is
    /// refused and nothing is registered; otherwise the session joins its
    /// group and is returned `Open`, ready for the transport to accept.
    pub fn connect(
        registry: Arc<ConnectionRegistry>,
        identity: Option<Identity>,
        config: &GatewayConfig,
    ) -> Result<Self, GatewayError> {
        let Some(identity) = identity else {
            debug!("Refusing unauthenticated connection");
            return Err(GatewayError::Unauthenticated);
        };

        let conn_id = ConnectionId::new_v4();
        let group = GroupKey::for_identity(&identity);
        let (outbox, inbox) = mpsc::unbounded_channel();

        registry.join(group.clone(), ConnectionHandle::new(conn_id, outbox));
        info!(%conn_id, %group, user_id = identity.id, "Session opened");

        Ok(Self {
            conn_id,
            identity,
            group,
            state: SessionState::Open,
            registry,
            inbox,
            write_timeout: config.write_timeout,
        })
    }

    pub fn conn_id(&self) -> ConnectionId {
        self.conn_id
    }

    pub fn group(&self) -> &GroupKey {
        &self.group
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Serializes one event and writes it to the client. A failed or
    /// timed-out write closes the session.
    pub async fn handle<W>(
        &mut self,
        event: &NotificationEvent,
        sink: &mut W,
    ) -> Result<(), GatewayError>
    where
        W: Sink<Message> + Unpin,
        W::Error: Display,
    {
        if self.state != SessionState::Open {
            return Err(GatewayError::SessionClosed);
        }

        let payload = event.to_wire()?;

        match timeout(
            self.write_timeout,
            sink.send(Message::Text(Utf8Bytes::from(payload))),
        )
        .await
        {
            Ok(Ok(())) => {
                trace!(conn_id = %self.conn_id, kind = event.kind(), "Pushed event to client");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(conn_id = %self.conn_id, "Failed to push event, client likely disconnected: {}", e);
                self.close();
                Err(GatewayError::Transport(e.to_string()))
            }
            Err(_) => {
                warn!(conn_id = %self.conn_id, timeout = ?self.write_timeout, "Push to client timed out");
                self.close();
                Err(GatewayError::WriteTimeout(self.write_timeout))
            }
        }
    }

    /// Drives the session until the client goes away, the write path fails,
    /// or the registry drops this connection. Inbound frames carry no meaning
    /// and are discarded.
    pub async fn run<W, R, E>(mut self, mut sink: W, mut stream: R)
    where
        W: Sink<Message> + Unpin,
        W::Error: Display,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        debug!(conn_id = %self.conn_id, group = %self.group, "Starting session loop");
        while self.state == SessionState::Open {
            let step = tokio::select! {
                event = self.inbox.recv() => match event {
                    Some(event) => Step::Deliver(event),
                    None => Step::Evicted,
                },
                incoming = stream.next() => match incoming {
                    Some(Ok(message)) => Step::Inbound(message),
                    Some(Err(e)) => Step::Disconnected(Some(e.to_string())),
                    None => Step::Disconnected(None),
                },
            };

            match step {
                Step::Deliver(event) => {
                    // Errors already closed the session and were logged.
                    let _ = self.handle(&event, &mut sink).await;
                }
                Step::Evicted => {
                    info!(conn_id = %self.conn_id, "Connection released by registry");
                    self.close();
                }
                Step::Inbound(Message::Close(_)) => {
                    debug!(conn_id = %self.conn_id, "Received close frame from client.");
                    self.close();
                }
                Step::Inbound(message) => {
                    trace!(conn_id = %self.conn_id, ?message, "Discarding inbound message");
                }
                Step::Disconnected(reason) => {
                    if let Some(reason) = reason {
                        debug!(conn_id = %self.conn_id, "Client stream failed: {}", reason);
                    }
                    self.close();
                }
            }
        }

        if timeout(self.write_timeout, sink.close()).await.is_err() {
            debug!(conn_id = %self.conn_id, "Timed out closing client sink");
        }
    }

    /// Enters `Closed`, leaving the group on the first call only.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.registry.leave(&self.group, self.conn_id);
        info!(conn_id = %self.conn_id, group = %self.group, "Session closed");
    }
}

impl Drop for NotificationSession {
    fn drop(&mut self) {
        self.close();
    }
}
