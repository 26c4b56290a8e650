use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures of a single backend generation or listing call.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode backend response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Classify a reqwest failure, recording the timeout that was in force.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            BackendError::Timeout(timeout)
        } else if err.is_connect() {
            BackendError::Unreachable(err.to_string())
        } else if err.is_decode() {
            BackendError::Decode(err.to_string())
        } else {
            BackendError::Unreachable(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay connect failed: {0}")]
    Connect(String),
    #[error("relay transport error: {0}")]
    Transport(String),
    #[error("relay connection closed")]
    Closed,
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => RelayError::Closed,
            other => RelayError::Transport(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("malformed relay message: {0}")]
    MalformedMessage(String),
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("relay disconnected: {0}")]
    RelayDisconnected(#[from] RelayError),
    #[error("startup failed: {0}")]
    Startup(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        let status = match self {
            BridgeError::MalformedMessage(_) => StatusCode::BAD_REQUEST,
            BridgeError::NotFound(_) => StatusCode::NOT_FOUND,
            BridgeError::BackendUnavailable(_) | BridgeError::RelayDisconnected(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            BridgeError::Backend(BackendError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            BridgeError::Backend(_) => StatusCode::BAD_GATEWAY,
            BridgeError::Startup(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
