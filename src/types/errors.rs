//! Application error types.
//!
//! All errors use `thiserror` for automatic Error trait derivation and provide
//! clear error messages with context.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Application result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error enum for the cluster master.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed client input (map to HTTP 400 / INVALID_ARGUMENT).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Resource not found (map to HTTP 404 / NOT_FOUND).
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing or rejected credentials (map to HTTP 401 / UNAUTHENTICATED).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Bounded ask or queued lock wait exceeded (map to HTTP 504 / DEADLINE_EXCEEDED).
    #[error("timeout: {0}")]
    Timeout(String),

    /// Message addressed to an actor that has already exited.
    #[error("actor terminated: {0}")]
    TargetTerminated(String),

    /// An actor with the same name is already live under the same parent.
    #[error("duplicate actor address: {0}")]
    DuplicateAddress(String),

    /// One of the top-level servers exited; ends the process.
    #[error("{task} failed: {source}")]
    Fatal {
        task: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// Internal errors (map to HTTP 500 / INTERNAL).
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization errors.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TLS configuration errors.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// I/O errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status used when this error crosses the request/response boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::TargetTerminated(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::DuplicateAddress(_)
            | Error::Fatal { .. }
            | Error::Internal(_)
            | Error::Serialization(_)
            | Error::Tls(_)
            | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Error code carried in RPC error frames.
    pub fn to_ipc_error_code(&self) -> &'static str {
        match self {
            Error::BadRequest(_) => "INVALID_ARGUMENT",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Unauthorized(_) => "UNAUTHENTICATED",
            Error::Timeout(_) => "DEADLINE_EXCEEDED",
            Error::TargetTerminated(_) => "UNAVAILABLE",
            Error::DuplicateAddress(_)
            | Error::Fatal { .. }
            | Error::Internal(_)
            | Error::Serialization(_)
            | Error::Tls(_)
            | Error::Io(_) => "INTERNAL",
        }
    }
}

// Convenience constructors
impl Error {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn target_terminated(msg: impl Into<String>) -> Self {
        Self::TargetTerminated(msg.into())
    }

    pub fn duplicate_address(msg: impl Into<String>) -> Self {
        Self::DuplicateAddress(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn fatal(task: &'static str, source: Error) -> Self {
        Self::Fatal {
            task,
            source: Box::new(source),
        }
    }
}

/// JSON error body: `{"message": "..."}`.
impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request_failed");
        }
        let body = serde_json::json!({ "message": self.to_string() });
        (status, Json(body)).into_response()
    }
}
