//! Router construction.
//!
//! Builds the axum router with all routes and middleware.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use lvs_protocol::{SCRIPT_PATH, STATUS_PATH, WS_PATH};
use tower_http::trace::TraceLayer;

use crate::inject;
use crate::middleware::{self, ApplyMiddleware};
use crate::proxy::{self, ProxyForwarder};
use crate::state::AppState;
use crate::sync;

/// Create the application router.
///
/// Route order: sync endpoints, proxy prefixes, then the static site as
/// fallback. `middleware` wraps everything, first entry outermost.
pub(crate) fn create_router(
    state: Arc<AppState>,
    forwarders: &[Arc<ProxyForwarder>],
    middleware: &[ApplyMiddleware],
) -> Router {
    let mut router = Router::new()
        .route(STATUS_PATH, get(sync::status))
        .route(SCRIPT_PATH, get(sync::script));

    if state.live_reload {
        router = router.route(WS_PATH, get(sync::ws_handler));
    }

    for forwarder in forwarders {
        router = router.merge(proxy::proxy_router(Arc::clone(forwarder)));
    }

    router = router.merge(inject::static_router(&state));

    let router = router.layer(TraceLayer::new_for_http()).with_state(state);
    middleware::apply(router, middleware)
}
