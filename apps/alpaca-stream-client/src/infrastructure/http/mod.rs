//! Login, Health Check, and Metrics Endpoint
//!
//! HTTP front end that accepts a user's Alpaca credentials and starts the
//! stream session, plus liveness and Prometheus endpoints.
//!
//! # Endpoints
//!
//! - `GET /api/v1/hello` - Greeting, used as a smoke test
//! - `POST /api/v1/login` - Connect, authenticate, and start the session
//! - `GET /api/v1/session` - Active session id and server time
//! - `GET /healthz` - Liveness probe (simple OK)
//! - `GET /metrics` - Prometheus metrics in text format
//!
//! Unknown routes answer `404 {}`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{LaunchError, SessionLauncher};
use crate::infrastructure::alpaca::Credentials;
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Request/Response Types
// =============================================================================

/// Login request body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginRequest {
    /// Display name of the user logging in.
    pub name: String,
    /// Alpaca API key.
    pub alpaca_api_key: String,
    /// Alpaca API secret.
    pub alpaca_api_secret: String,
}

/// Status/message response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    /// HTTP status code, echoed.
    pub status: u16,
    /// Outcome description.
    pub message: String,
}

impl StatusResponse {
    fn reply(status: StatusCode, message: impl Into<String>) -> Response {
        let body = Self {
            status: status.as_u16(),
            message: message.into(),
        };
        (status, Json(body)).into_response()
    }
}

/// Response of the session status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusResponse {
    /// Running session, if any.
    pub session_id: Option<String>,
    /// Current time.
    pub current_time: DateTime<Utc>,
}

// =============================================================================
// HTTP Server
// =============================================================================

/// Login front end HTTP server.
pub struct HttpServer {
    port: u16,
    launcher: Arc<SessionLauncher>,
    cancel: CancellationToken,
}

impl HttpServer {
    /// Create a new HTTP server.
    #[must_use]
    pub const fn new(port: u16, launcher: Arc<SessionLauncher>, cancel: CancellationToken) -> Self {
        Self {
            port,
            launcher,
            cancel,
        }
    }

    /// Run the server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HttpServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HttpServerError> {
        let app = router(self.launcher);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HttpServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "HTTP server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HttpServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the application routes.
pub fn router(launcher: Arc<SessionLauncher>) -> Router {
    Router::new()
        .route("/api/v1/hello", get(hello_handler))
        .route("/api/v1/login", post(login_handler))
        .route("/api/v1/session", get(session_handler))
        .route("/healthz", get(liveness_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(not_found_handler)
        .with_state(launcher)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn hello_handler() -> impl IntoResponse {
    Json(json!({"code": 200, "message": "hello world!"}))
}

async fn login_handler(
    State(launcher): State<Arc<SessionLauncher>>,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Rejected login body");
            return StatusResponse::reply(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let credentials = match Credentials::new(request.alpaca_api_key, request.alpaca_api_secret) {
        Ok(credentials) => credentials,
        Err(e) => return StatusResponse::reply(StatusCode::BAD_REQUEST, e.to_string()),
    };

    match launcher.launch(&request.name, &credentials).await {
        Ok(session_id) => {
            tracing::info!(session_id = %session_id, name = %request.name, "Login succeeded");
            StatusResponse::reply(StatusCode::OK, "success")
        }
        Err(e) => {
            let status = login_error_status(&e);
            tracing::warn!(status = status.as_u16(), error = %e, "Login failed");
            StatusResponse::reply(status, e.to_string())
        }
    }
}

async fn session_handler(State(launcher): State<Arc<SessionLauncher>>) -> impl IntoResponse {
    Json(SessionStatusResponse {
        session_id: launcher.active_session().map(|id| id.to_string()),
        current_time: Utc::now(),
    })
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

async fn not_found_handler() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({})))
}

fn login_error_status(error: &LaunchError) -> StatusCode {
    match error {
        LaunchError::SessionActive(_) => StatusCode::CONFLICT,
        e if e.is_bad_credentials() => StatusCode::BAD_REQUEST,
        LaunchError::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
