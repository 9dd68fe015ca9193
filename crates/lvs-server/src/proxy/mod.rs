//! Reverse proxy routes.
//!
//! Each configured `[[proxy]]` route forwards everything below its prefix to
//! the upstream. Markup responses get the sync script like local files do;
//! other responses stream through untouched.

mod forwarder;
mod retry;
mod rewrite;

use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::any;

pub use forwarder::ProxyForwarder;
pub use retry::{MAX_RETRY, RETRY_TIMEOUT, RetryPolicy};

use crate::error::ServerError;
use crate::state::AppState;

/// Proxy error.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// Configured target is not a URL.
    #[error("Invalid proxy target {target}: {source}")]
    InvalidTarget {
        /// Target as configured.
        target: String,
        /// Parse failure.
        source: url::ParseError,
    },

    /// HTTP client could not be built.
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    /// Request body could not be read.
    #[error("Failed to read request body: {0}")]
    Body(#[source] axum::Error),

    /// Upstream did not answer.
    #[error("Upstream request failed after {attempts} attempt(s): {source}")]
    Upstream {
        /// Attempts made, including the first.
        attempts: u32,
        /// Last failure.
        source: reqwest::Error,
    },

    /// Upstream response body could not be read.
    #[error("Failed to read upstream response: {0}")]
    Read(#[source] reqwest::Error),
}

impl ProxyError {
    /// HTTP status reported to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidTarget { .. } | Self::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::Upstream { .. } | Self::Read(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Routes for one forwarder.
pub(crate) fn proxy_router(forwarder: Arc<ProxyForwarder>) -> Router<Arc<AppState>> {
    let route = forwarder.route().to_owned();
    let handler = move |request: Request| {
        let forwarder = Arc::clone(&forwarder);
        async move { relay(&forwarder, request).await }
    };

    if route.is_empty() {
        return Router::new()
            .route("/", any(handler.clone()))
            .route("/{*rest}", any(handler));
    }

    Router::new()
        .route(&route, any(handler.clone()))
        .route(&format!("{route}/"), any(handler.clone()))
        .route(&format!("{route}/{{*rest}}"), any(handler))
}

async fn relay(forwarder: &ProxyForwarder, request: Request) -> Response {
    match forwarder.forward(request).await {
        Ok(response) => response,
        Err(e) => ServerError::from(e).into_response(),
    }
}
