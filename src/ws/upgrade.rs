//! Provides the Axum handler for upgrading HTTP requests to notification sockets.

use crate::ws::service::NotificationGateway;
use crate::ws::types::Identity;
use axum::{
    extract::{State, ws::WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{instrument, warn};

/// Opens a session for `identity` and, only if that succeeds, upgrades the
/// connection and hands it to the [`NotificationGateway`].
///
/// An absent identity is refused with `401 Unauthorized` before the upgrade,
/// so the WebSocket is never accepted. The identity itself is resolved by the
/// caller, typically with the `SessionIdentity` extractor from the `auth`
/// module:
///
/// ```rust,no_run
/// # use axum::{Router, routing::get, extract::{State, WebSocketUpgrade}};
/// # use std::sync::Arc;
/// # use prints_realtime::prelude::*;
/// # use prints_realtime::auth::{IdentityResolver, SessionIdentity};
/// # use async_trait::async_trait;
/// # #[derive(Clone)] struct AppState { gateway: Arc<NotificationGateway> }
/// # #[async_trait]
/// # impl IdentityResolver for AppState {
/// #   type Error = std::io::Error;
/// #   async fn resolve(&self, _token: &str) -> Result<Identity, Self::Error> {
/// #     Ok(Identity::teacher(7, "Jean Baptiste"))
/// #   }
/// # }
/// let gateway = NotificationGateway::new(GatewayConfig::default());
/// let app: Router = Router::new()
///     .route(
///         "/ws/notifications",
///         get(
///             |ws: WebSocketUpgrade,
///              State(state): State<AppState>,
///              SessionIdentity(identity): SessionIdentity| async move {
///                 upgrade_handler(ws, State(state.gateway), identity).await
///             },
///         ),
///     )
///     .with_state(AppState { gateway });
/// ```
#[instrument(skip_all, fields(user_id = ?identity.as_ref().map(|i| i.id)))]
pub async fn upgrade_handler(
    ws: WebSocketUpgrade,
    State(gateway): State<Arc<NotificationGateway>>,
    identity: Option<Identity>,
) -> Response {
    let session = match gateway.open_session(identity) {
        Ok(session) => session,
        Err(e) => {
            warn!("WebSocket connection refused: {}", e);
            return e.into_response();
        }
    };

    // If the upgrade never completes, the callback and the session inside it
    // are dropped, which leaves the group.
    ws.on_upgrade(move |socket| async move {
        gateway.handle_connection(socket, session).await;
    })
}
