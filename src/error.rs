//! Error types for the notification gateway.

use crate::config::ConfigError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;

/// Errors raised on the connection path. None of these ever reach a
/// publisher: fan-out failures are contained in the registry.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The connection arrived without an authenticated identity.
    #[error("connection is not authenticated")]
    Unauthenticated,

    /// A push was attempted after the session reached `Closed`.
    #[error("session is closed")]
    SessionClosed,

    #[error("failed to serialize notification: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("transport write failed: {0}")]
    Transport(String),

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[cfg(feature = "redis-relay")]
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match self {
            GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        status.into_response()
    }
}
