//! Gateway errors and their HTTP mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use smsgate_core::ConnectionId;
use smsgate_protocol::VersionError;

/// Errors that can occur admitting or serving a realtime request.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("origin not allowed: {origin}")]
    OriginDenied { origin: String },

    #[error("protocol version rejected: {0}")]
    Version(#[from] VersionError),

    #[error("missing session id")]
    MissingSession,

    #[error("unknown session: {0}")]
    UnknownSession(ConnectionId),

    #[error("session {0} is on the websocket transport")]
    TransportMismatch(ConnectionId),

    #[error("session {0} already has a pending poll")]
    OverlappingPoll(ConnectionId),
}

impl GatewayError {
    /// Returns the HTTP status code for this error.
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::OriginDenied { .. } => StatusCode::FORBIDDEN,
            Self::Version(_)
            | Self::MissingSession
            | Self::UnknownSession(_)
            | Self::TransportMismatch(_)
            | Self::OverlappingPoll(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}
