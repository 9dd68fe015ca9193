//! Static responder and sync-script injection.

mod anchor;
mod path;
mod responder;

use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::Uri;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};

pub use anchor::{ANCHORS, Injection, find_anchor, injected_length};
pub use responder::{Site, StaticRoot};
pub(crate) use responder::is_cross_origin;

use crate::state::AppState;

/// Fallback router serving the site, with clean-URL rewriting.
pub(crate) fn static_router(state: &Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .fallback(serve)
        .layer(middleware::from_fn_with_state(Arc::clone(state), clean_urls))
}

async fn serve(State(state): State<Arc<AppState>>, request: Request) -> Response {
    match state.site.serve(request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Rewrite `/sub/` and `/sub` to `/sub.html` when only the latter exists.
async fn clean_urls(State(state): State<Arc<AppState>>, mut request: Request, next: Next) -> Response {
    if let Some(rewritten) = state.site.clean_url(request.uri().path()).await {
        let path_and_query = match request.uri().query() {
            Some(query) => format!("{rewritten}?{query}"),
            None => rewritten,
        };
        if let Ok(uri) = path_and_query.parse::<Uri>() {
            tracing::debug!(from = %request.uri(), to = %uri, "Clean URL rewrite");
            *request.uri_mut() = uri;
        }
    }
    next.run(request).await
}
