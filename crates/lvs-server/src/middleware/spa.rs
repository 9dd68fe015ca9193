//! Single-page-app redirects.
//!
//! Extensionless paths are redirected to the root with the original path as
//! fragment, so client-side routers can take over.

use axum::extract::Request;
use axum::http::header::{ACCEPT, LOCATION};
use axum::http::{Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// `spa`: redirect every extensionless path.
pub(crate) async fn spa(request: Request, next: Next) -> Response {
    match redirect_target(&request, false) {
        Some(location) => (StatusCode::FOUND, [(LOCATION, location)]).into_response(),
        None => next.run(request).await,
    }
}

/// `spa-ignore-assets`: redirect only requests for documents.
pub(crate) async fn spa_ignore_assets(request: Request, next: Next) -> Response {
    match redirect_target(&request, true) {
        Some(location) => (StatusCode::FOUND, [(LOCATION, location)]).into_response(),
        None => next.run(request).await,
    }
}

fn redirect_target(request: &Request, documents_only: bool) -> Option<String> {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return None;
    }

    let path = request.uri().path();
    if path == "/" || path.starts_with("/__lvs/") {
        return None;
    }
    let last = path.rsplit('/').next().unwrap_or_default();
    if last.contains('.') {
        return None;
    }

    if documents_only {
        let wants_document = request
            .headers()
            .get(ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/html"));
        if !wants_document {
            return None;
        }
    }

    Some(format!("/#{path}"))
}
