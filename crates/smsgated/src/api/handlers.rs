//! Route handlers.
//!
//! Bodies are parsed from raw bytes regardless of `Content-Type` so any
//! parse failure maps to the route's own 400 message.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ApiError, AppState};
use crate::service::{IssueOutcome, VerifyOutcome};

const BAD_REQUEST: &str = "Bad request";
const BAD_PHONE: &str = "Bad request: Invalid phone number";

#[derive(Debug, Deserialize)]
pub struct IssueRequest {
    #[serde(default)]
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub pass: String,
}

#[derive(Debug, Deserialize)]
pub struct DispatchRequest {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub message: String,
}

/// `{success, message?}`
#[derive(Debug, Serialize)]
pub struct OutcomeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

impl OutcomeResponse {
    fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    fn rejected(message: &'static str) -> Self {
        Self {
            success: false,
            message: Some(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DispatchResponse {
    pub success: bool,
    pub message: &'static str,
    pub phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
    pub busy: usize,
}

fn parse_body<T: DeserializeOwned>(
    route: &'static str,
    body: &Bytes,
    message: &'static str,
) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(route, error = %e, "Failed to parse request body");
        ApiError::BadRequest(message)
    })
}

/// `POST /otp`
pub async fn issue(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let request: IssueRequest = parse_body("otp", &body, BAD_REQUEST)?;

    match state.codes.issue(&request.phone).await? {
        IssueOutcome::Sent => Ok(Json(OutcomeResponse::ok())),
        IssueOutcome::AlreadyPending => Ok(Json(OutcomeResponse::rejected(
            "OTP already sent. Please wait.",
        ))),
    }
}

/// `POST /compare`
pub async fn verify(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<OutcomeResponse>, ApiError> {
    let request: VerifyRequest = parse_body("compare", &body, BAD_REQUEST)?;

    let response = match state.codes.verify(&request.phone, &request.pass).await? {
        VerifyOutcome::Verified => OutcomeResponse::ok(),
        VerifyOutcome::Expired => OutcomeResponse::rejected("OTP expired"),
        VerifyOutcome::Invalid => OutcomeResponse::rejected("Invalid OTP"),
    };
    Ok(Json(response))
}

/// `POST /group_sms`
pub async fn group_sms(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DispatchResponse>, ApiError> {
    let request: DispatchRequest = parse_body("group_sms", &body, BAD_PHONE)?;

    let job = state
        .dispatch
        .send_local(&request.phone, &request.message)
        .map_err(|_| ApiError::BadRequest(BAD_PHONE))?;

    Ok(Json(DispatchResponse {
        success: true,
        message: "Group SMS sent successfully",
        phone: job.phone,
        pass: None,
    }))
}

/// `POST /send-sms`
pub async fn send_sms(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<DispatchResponse>, ApiError> {
    let request: DispatchRequest = parse_body("send-sms", &body, BAD_REQUEST)?;

    let job = state
        .dispatch
        .send_prefixed(&request.phone, &request.message)
        .map_err(|_| ApiError::BadRequest(BAD_REQUEST))?;

    Ok(Json(DispatchResponse {
        success: true,
        message: "Message sent",
        phone: job.phone,
        pass: Some(job.pass),
    }))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let response = HealthResponse {
        status: "ok",
        connections: state.registry.count(),
        busy: state.registry.busy_count(),
    };
    debug!(
        connections = response.connections,
        busy = response.busy,
        "Health check"
    );
    Json(response)
}
