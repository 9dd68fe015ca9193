//! Named middleware registry.
//!
//! `server.middleware` lists names; each name maps to a function that wraps
//! the router. Built-in names are `cors`, `no-cache`, `security-headers`,
//! `spa` and `spa-ignore-assets`. Embedders can register more through
//! [`MiddlewareRegistry::register`].

mod security;
mod spa;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use tower_http::cors::CorsLayer;

use crate::error::ServerError;

/// Wraps a router with one middleware.
pub type ApplyMiddleware = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// Registry of middleware by name.
#[derive(Clone, Default)]
pub struct MiddlewareRegistry {
    entries: HashMap<String, ApplyMiddleware>,
}

impl fmt::Debug for MiddlewareRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl MiddlewareRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in middleware.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_layer("cors", |router| router.layer(CorsLayer::very_permissive()));
        registry.register_layer("no-cache", |router| router.layer(security::no_cache()));
        registry.register_layer("security-headers", |router| {
            router.layer(security::security_headers())
        });
        registry.register("spa", spa::spa);
        registry.register("spa-ignore-assets", spa::spa_ignore_assets);
        registry
    }

    /// Register a request/next handler under `name`, replacing any previous
    /// entry.
    pub fn register<F, Fut>(&mut self, name: &str, handler: F)
    where
        F: Fn(Request, Next) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.register_layer(name, move |router| {
            router.layer(middleware::from_fn(handler.clone()))
        });
    }

    /// Register a router transformation under `name`.
    pub fn register_layer(
        &mut self,
        name: &str,
        apply: impl Fn(Router) -> Router + Send + Sync + 'static,
    ) {
        self.entries.insert(name.to_owned(), Arc::new(apply));
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Look up `names` in order. Unknown names are an error.
    pub fn resolve(&self, names: &[String]) -> Result<Vec<ApplyMiddleware>, ServerError> {
        names
            .iter()
            .map(|name| {
                self.entries
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ServerError::UnknownMiddleware(name.clone()))
            })
            .collect()
    }
}

/// Wrap `router` with `middleware`; the first entry ends up outermost.
pub(crate) fn apply(router: Router, middleware: &[ApplyMiddleware]) -> Router {
    middleware
        .iter()
        .rev()
        .fold(router, |router, apply| apply(router))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{HeaderValue, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    fn router() -> Router {
        Router::new().route("/", get(|| async { "ok" }))
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(
            MiddlewareRegistry::with_builtins().names(),
            vec!["cors", "no-cache", "security-headers", "spa", "spa-ignore-assets"]
        );
    }

    #[test]
    fn test_unknown_name_is_an_error() {
        let registry = MiddlewareRegistry::with_builtins();
        let err = registry
            .resolve(&["cors".to_owned(), "gzip-everything".to_owned()])
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::UnknownMiddleware(name) if name == "gzip-everything"));
    }

    #[tokio::test]
    async fn test_custom_middleware() {
        async fn stamp(request: Request, next: Next) -> Response {
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert("x-stamp", HeaderValue::from_static("1"));
            response
        }

        let mut registry = MiddlewareRegistry::new();
        registry.register("stamp", stamp);
        let middleware = registry.resolve(&["stamp".to_owned()]).unwrap();

        let response = apply(router(), &middleware)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-stamp"], "1");
    }

    #[tokio::test]
    async fn test_no_cache_headers() {
        let registry = MiddlewareRegistry::with_builtins();
        let middleware = registry.resolve(&["no-cache".to_owned()]).unwrap();

        let response = apply(router(), &middleware)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            response.headers()["cache-control"],
            "no-cache, no-store, must-revalidate"
        );
    }
}
