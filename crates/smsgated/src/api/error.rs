//! HTTP error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::service::CodeError;

/// Errors returned by the HTTP handlers.
///
/// Business outcomes (already pending, expired, invalid) are not errors;
/// they are 200 responses with `success: false`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed body or phone number
    #[error("{0}")]
    BadRequest(&'static str),

    /// Store or randomness failure
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Returns the HTTP status code for this error.
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CodeError> for ApiError {
    fn from(e: CodeError) -> Self {
        match e {
            CodeError::InvalidPhone(_) => Self::BadRequest("Bad request"),
            CodeError::StoreUnavailable(e) => Self::Internal(e.to_string()),
            CodeError::Randomness(_) => Self::Internal("Failed to generate OTP".to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}
