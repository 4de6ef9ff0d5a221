//! Error types for the cellhost server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Registry or context error.
    #[error(transparent)]
    Core(#[from] cellhost_core::Error),

    /// Request body is not valid JSON.
    #[error("invalid request body: {0}")]
    Body(#[from] serde_json::Error),

    /// Request path does not name a route.
    #[error("no route for {0}")]
    NoRoute(String),

    /// Missing or invalid ticket or token.
    #[error("not authorized")]
    Unauthorized,

    /// Listen address could not be parsed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A blocking registry call panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Core(cellhost_core::Error::UnknownInstance(_)) => StatusCode::NOT_FOUND,
            ServerError::Core(err) if err.is_client_error() => StatusCode::BAD_REQUEST,
            ServerError::Body(_) | ServerError::NoRoute(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A server error paired with whether internal detail may be shown.
#[derive(Debug)]
pub struct HttpError {
    pub error: ServerError,
    pub debug: bool,
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.error.status();
        if status.is_server_error() {
            tracing::error!(error = ?self.error, "request failed");
            let body = if self.debug {
                format!("{}\n\n{:#?}", self.error, self.error)
            } else {
                "Internal server error".to_string()
            };
            (status, body).into_response()
        } else {
            tracing::warn!(error = %self.error, "request rejected");
            (status, self.error.to_string()).into_response()
        }
    }
}
