//! Error types for the HTTP server.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::proxy::ProxyError;

/// Server error type.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Request path could not be decoded.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Path escapes the root or names a denied dotfile.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Nothing to serve at the given path.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Upstream request failed.
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// Middleware name not present in the registry.
    #[error("Unknown middleware: {0}")]
    UnknownMiddleware(String),

    /// Invalid listen address.
    #[error("Invalid address {address}: {source}")]
    Address {
        /// Address as configured.
        address: String,
        /// Parse failure.
        source: std::net::AddrParseError,
    },

    /// File watcher could not be started.
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Worker pool could not be started.
    #[error("Worker pool error: {0}")]
    Pool(#[from] lvs_pool::PoolError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Map a filesystem error for `path` to the matching HTTP error.
    pub(crate) fn from_fs(error: std::io::Error, path: &str) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_owned()),
            std::io::ErrorKind::PermissionDenied => Self::Forbidden(path.to_owned()),
            _ => Self::Io(error),
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Proxy(e) => e.status(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let reason = status.canonical_reason().unwrap_or("Error");
        let body = format!(
            "<!DOCTYPE html>\n<html><head><title>{code} {reason}</title></head>\
             <body><h1>{code} {reason}</h1></body></html>\n",
            code = status.as_u16(),
        );

        (
            status,
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            body,
        )
            .into_response()
    }
}
