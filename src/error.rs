//! Error types for chatgate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::time::Duration;

/// Result type alias for chatgate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for chatgate.
///
/// Everything except [`Error::InactivityTimeout`] is raised before a response
/// stream exists and is rendered as a single JSON error body. Once streaming
/// has started, failures are written as a terminal `{"error": ...}` frame.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Unknown provider '{0}'")]
    UnknownProvider(String),

    #[error("Provider '{provider}' unavailable: {message}")]
    ProviderUnavailable { provider: String, message: String },

    #[error("Stream timed out after {}s without data from the provider", .0.as_secs())]
    InactivityTimeout(Duration),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status used when the error is returned before streaming starts.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::UnknownProvider(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::ProviderUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Error::InactivityTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let body = serde_json::json!({
            "error": {
                "message": self.to_string(),
                "type": "gateway_error",
                "code": status.as_u16()
            }
        });

        (status, axum::Json(body)).into_response()
    }
}
