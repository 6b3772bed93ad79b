//! Resolves the identity attached to an incoming WebSocket request.
//!
//! ## Example
//!
//! ```rust,no_run
//! # use async_trait::async_trait;
//! # use axum::{response::{IntoResponse, Response}, routing::get, Router};
//! # use prints_realtime::auth::{IdentityResolver, SessionIdentity};
//! # use prints_realtime::ws::types::Identity;
//! #
//! // Your application's shared state
//! #[derive(Clone)]
//! struct AppState {
//!     // ... your session store, etc.
//! }
//!
//! // Implement the trait on your state
//! #[async_trait]
//! impl IdentityResolver for AppState {
//!     type Error = std::io::Error;
//!
//!     async fn resolve(&self, token: &str) -> Result<Identity, Self::Error> {
//!         // ...
//! #        if token == "secret-token" {
//! #            Ok(Identity::secretary(1, "Marie Mukamana"))
//! #        } else {
//! #            Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "Invalid token"))
//! #        }
//!     }
//! }
//!
//! // Use the extractor in your handler
//! async fn whoami(SessionIdentity(identity): SessionIdentity) -> Response {
//!     match identity {
//!         Some(identity) => identity.display_name.into_response(),
//!         None => "anonymous".into_response(),
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let app: Router = Router::new()
//!         .route("/whoami", get(whoami))
//!         .with_state(AppState {});
//!     // ...
//! }
//! ```

use crate::ws::types::Identity;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Query},
    http::{HeaderMap, header, request::Parts},
};
use serde::Deserialize;
use std::convert::Infallible;
use tracing::debug;

/// Name of the cookie carrying a session token.
pub const SESSION_COOKIE: &str = "session";

/// The trait the application state implements to turn a token into an
/// [`Identity`]. This is the seam to the external authentication provider.
#[async_trait]
pub trait IdentityResolver {
    /// The error type returned on resolution failure.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Resolves a session or bearer token to the user it belongs to.
    async fn resolve(&self, token: &str) -> Result<Identity, Self::Error>;
}

/// The identity attached to a request, if any.
///
/// This extractor never rejects: a missing or invalid token yields `None`, and
/// it is the gateway's job to refuse the connection. The token is taken from
/// `Authorization: Bearer ...`, then a `token` query parameter, then the
/// [`SESSION_COOKIE`] cookie.
#[derive(Debug, Clone)]
pub struct SessionIdentity(pub Option<Identity>);

/// The query parameter struct used internally for token extraction.
#[derive(Deserialize)]
struct WebSocketAuthQuery {
    token: String,
}

impl<S> FromRequestParts<S> for SessionIdentity
where
    S: IdentityResolver + Send + Sync + 'static,
{
    type Rejection = Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl Future<Output = Result<Self, <Self as FromRequestParts<S>>::Rejection>> + Send {
        Box::pin(async move {
            let token = match get_token_from_headers(&parts.headers) {
                Some(t) => Some(t),
                None => match Query::<WebSocketAuthQuery>::from_request_parts(parts, state).await {
                    Ok(Query(q)) => Some(q.token),
                    Err(_) => get_token_from_cookie(&parts.headers, SESSION_COOKIE),
                },
            };

            let Some(token) = token else {
                return Ok(SessionIdentity(None));
            };

            match state.resolve(&token).await {
                Ok(identity) => Ok(SessionIdentity(Some(identity))),
                Err(e) => {
                    debug!("Token did not resolve to an identity: {}", e);
                    Ok(SessionIdentity(None))
                }
            }
        })
    }
}

/// A private helper function to extract a bearer token from the Authorization header.
fn get_token_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header_val| {
            header_val
                .strip_prefix("Bearer ")
                .map(|token| token.trim().to_owned())
        })
        .filter(|token| !token.is_empty())
}

fn get_token_from_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_owned())
        .filter(|value| !value.is_empty())
}
