//! Response header middleware.
//!
//! - `security-headers`: Content-Security-Policy, X-Content-Type-Options,
//!   X-Frame-Options
//! - `no-cache`: disables browser caching

use axum::http::HeaderValue;
use axum::http::header::{CACHE_CONTROL, EXPIRES, HeaderName, PRAGMA};
use tower::ServiceBuilder;
use tower::layer::util::{Identity, Stack};
use tower_http::set_header::SetResponseHeaderLayer;

/// Content-Security-Policy header value.
///
/// Pages may use inline scripts and styles; the sync channel needs `ws:`.
const CSP: &str = "default-src 'self'; \
                   script-src 'self' 'unsafe-inline'; \
                   style-src 'self' 'unsafe-inline'; \
                   font-src 'self' data:; \
                   img-src 'self' data: blob:; \
                   connect-src 'self' ws: wss:; \
                   frame-ancestors 'self'";

type HeaderLayer = SetResponseHeaderLayer<HeaderValue>;

/// Layers added by `security-headers`.
pub(crate) fn security_headers()
-> ServiceBuilder<Stack<HeaderLayer, Stack<HeaderLayer, Stack<HeaderLayer, Identity>>>> {
    ServiceBuilder::new()
        .layer(overriding("content-security-policy", CSP))
        .layer(overriding("x-content-type-options", "nosniff"))
        .layer(overriding("x-frame-options", "SAMEORIGIN"))
}

/// Layers added by `no-cache`.
pub(crate) fn no_cache()
-> ServiceBuilder<Stack<HeaderLayer, Stack<HeaderLayer, Stack<HeaderLayer, Identity>>>> {
    ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            PRAGMA,
            HeaderValue::from_static("no-cache"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            EXPIRES,
            HeaderValue::from_static("0"),
        ))
}

fn overriding(name: &'static str, value: &'static str) -> HeaderLayer {
    SetResponseHeaderLayer::overriding(
        HeaderName::from_static(name),
        HeaderValue::from_static(value),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csp_value() {
        assert!(CSP.contains("default-src 'self'"));
        assert!(CSP.contains("connect-src 'self' ws: wss:"));
        assert!(CSP.contains("frame-ancestors 'self'"));
    }
}
