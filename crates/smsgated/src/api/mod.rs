//! HTTP API.
//!
//! ```text
//! POST /otp         issue a code
//! POST /compare     verify a code
//! POST /group_sms   dispatch to a local number
//! POST /send-sms    dispatch to a local or prefixed number
//! GET  /health      liveness and connection counts
//! ```
//!
//! The realtime routes are merged in from the gateway so every response
//! shares the same CORS, security header, panic and trace layers.

mod error;
mod handlers;

pub use error::ApiError;
pub use handlers::{DispatchResponse, HealthResponse, OutcomeResponse};

use std::sync::Arc;

use axum::extract::Request;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::gateway::Gateway;
use crate::registry::ConnectionRegistry;
use crate::service::{CodeService, DispatchService};

/// Headers added to every response.
const SECURITY_HEADERS: [(&str, &str); 9] = [
    ("x-frame-options", "DENY"),
    ("x-content-type-options", "nosniff"),
    ("x-xss-protection", "1; mode=block"),
    ("strict-transport-security", "max-age=123456"),
    ("referrer-policy", "origin, unsafe-url"),
    (
        "content-security-policy",
        "default-src 'self'; script-src 'self' securecoding.com",
    ),
    ("x-dns-prefetch-control", "on"),
    ("x-download-options", "noopen"),
    ("cross-origin-opener-policy", "same-origin"),
];

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    pub codes: CodeService,
    pub dispatch: DispatchService,
    pub registry: Arc<ConnectionRegistry>,
}

/// Builds the full router: API routes, realtime routes and middleware.
pub fn router(state: AppState, gateway: Arc<Gateway>) -> Router {
    let router = Router::new()
        .route("/otp", post(handlers::issue))
        .route("/compare", post(handlers::verify))
        .route("/group_sms", post(handlers::group_sms))
        .route("/send-sms", post(handlers::send_sms))
        .route("/health", get(handlers::health))
        .with_state(state)
        .merge(gateway.routes())
        .layer(CatchPanicLayer::new())
        .layer(middleware::from_fn(cors));

    SECURITY_HEADERS
        .into_iter()
        .fold(router, |router, (name, value)| {
            router.layer(SetResponseHeaderLayer::overriding(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            ))
        })
        .layer(TraceLayer::new_for_http())
}

/// Echoes the request origin with credentials and answers preflights.
async fn cors(request: Request, next: Next) -> Response {
    let origin = request.headers().get(header::ORIGIN).cloned();

    let mut response = if *request.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(request).await
    };

    let headers = response.headers_mut();
    match origin.filter(|o| !o.is_empty()) {
        Some(origin) => {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        None => {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_ORIGIN,
                HeaderValue::from_static("*"),
            );
        }
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{GatewaySettings, OriginPolicy};
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http;
    use smsgate_protocol::Transport;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    struct Harness {
        router: Router,
        gateway: Arc<Gateway>,
    }

    fn harness() -> Harness {
        let registry = Arc::new(ConnectionRegistry::new());
        let gateway = Arc::new(Gateway::new(
            Arc::clone(&registry),
            OriginPolicy::new(["http://localhost"]),
            GatewaySettings::default(),
            CancellationToken::new(),
        ));
        let state = AppState {
            codes: CodeService::new(Arc::new(MemoryStore::new()), gateway.clone()),
            dispatch: DispatchService::new(gateway.clone()),
            registry,
        };
        Harness {
            router: router(state, Arc::clone(&gateway)),
            gateway,
        }
    }

    async fn post_json(router: &Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .clone()
            .oneshot(
                http::Request::builder()
                    .method(Method::POST)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_issue_then_already_pending() {
        let h = harness();
        let worker = h.gateway.open(Transport::Polling);

        let (status, body) = post_json(&h.router, "/otp", r#"{"phone":"61234567"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"success": true}));
        assert_eq!(h.gateway.registry().is_busy(worker.id()), Some(true));

        let (status, body) = post_json(&h.router, "/otp", r#"{"phone":"61234567"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({"success": false, "message": "OTP already sent. Please wait."})
        );
    }

    #[tokio::test]
    async fn test_issue_bad_phone_and_body() {
        let h = harness();
        let (status, body) = post_json(&h.router, "/otp", r#"{"phone":"+99361234567"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, serde_json::json!({"message": "Bad request"}));

        let (status, _) = post_json(&h.router, "/otp", "not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_compare_outcomes() {
        let h = harness();
        let (status, body) =
            post_json(&h.router, "/compare", r#"{"phone":"61234567","pass":"12345"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({"success": false, "message": "OTP expired"})
        );
    }

    #[tokio::test]
    async fn test_group_sms() {
        let h = harness();
        let (status, body) = post_json(
            &h.router,
            "/group_sms",
            r#"{"phone":"61234567","message":"hi"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            serde_json::json!({
                "success": true,
                "message": "Group SMS sent successfully",
                "phone": "+99361234567"
            })
        );

        let (status, body) =
            post_json(&h.router, "/group_sms", r#"{"phone":"123","message":"hi"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body,
            serde_json::json!({"message": "Bad request: Invalid phone number"})
        );
    }

    #[tokio::test]
    async fn test_send_sms_accepts_prefix() {
        let h = harness();
        for phone in ["+99361234567", "61234567"] {
            let (status, body) = post_json(
                &h.router,
                "/send-sms",
                &format!(r#"{{"phone":"{phone}","message":"hi"}}"#),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(
                body,
                serde_json::json!({
                    "success": true,
                    "message": "Message sent",
                    "phone": "+99361234567",
                    "pass": "hi"
                })
            );
        }
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let h = harness();
        h.gateway.open(Transport::Polling);

        let response = h
            .router
            .clone()
            .oneshot(http::Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["access-control-allow-origin"], "*");

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"status": "ok", "connections": 1, "busy": 0})
        );
    }

    #[tokio::test]
    async fn test_preflight_echoes_origin() {
        let h = harness();
        let response = h
            .router
            .clone()
            .oneshot(
                http::Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/otp")
                    .header(header::ORIGIN, "http://app.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "http://app.example");
        assert_eq!(headers["access-control-allow-credentials"], "true");
        assert_eq!(headers["strict-transport-security"], "max-age=123456");
    }

    #[tokio::test]
    async fn test_realtime_handshake_through_router() {
        let h = harness();
        let response = h
            .router
            .clone()
            .oneshot(
                http::Request::builder()
                    .uri("/realtime/poll")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(h.gateway.registry().count(), 1);
    }

    #[tokio::test]
    async fn test_realtime_denied_origin() {
        let h = harness();
        let response = h
            .router
            .clone()
            .oneshot(
                http::Request::builder()
                    .uri("/realtime/poll")
                    .header(header::ORIGIN, "http://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(h.gateway.registry().count(), 0);
    }
}
