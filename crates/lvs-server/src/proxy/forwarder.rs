//! Upstream request relay.

use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::header::{
    ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, HOST, LOCATION,
};
use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;
use lvs_config::ProxyConfig;
use reqwest::redirect::Policy;
use url::Url;

use super::ProxyError;
use super::retry::{RetryPolicy, retry};
use super::rewrite::{
    append_via, host_without_port, merge_headers, rewrite_cookies, rewrite_location,
    strip_hop_by_hop, upstream_url,
};
use crate::inject::{Injection, is_cross_origin};

/// Extensions treated as markup.
const MARKUP_EXTENSIONS: [&str; 4] = ["html", "htm", "xhtml", "svg"];

/// Content types treated as markup.
const MARKUP_TYPES: [&str; 3] = ["text/html", "application/xhtml+xml", "image/svg+xml"];

/// Forwards requests below a route prefix to an upstream origin.
#[derive(Debug)]
pub struct ProxyForwarder {
    route: String,
    target: Url,
    preserve_host: bool,
    via: Option<String>,
    cookie_rewrite: bool,
    default_headers: HeaderMap,
    /// Decompresses bodies so markup can be rewritten.
    decoding: reqwest::Client,
    /// Leaves bodies untouched when nothing will be injected.
    raw: reqwest::Client,
    injection: Option<Injection>,
    retry: RetryPolicy,
}

impl ProxyForwarder {
    /// Forwarder for one configured route.
    pub fn new(config: &ProxyConfig, injection: Option<Injection>) -> Result<Self, ProxyError> {
        let target = Url::parse(&config.target).map_err(|source| ProxyError::InvalidTarget {
            target: config.target.clone(),
            source,
        })?;

        let decoding = reqwest::Client::builder()
            .redirect(Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(ProxyError::Client)?;
        let raw = reqwest::Client::builder()
            .redirect(Policy::none())
            .connect_timeout(Duration::from_secs(10))
            .no_gzip()
            .no_brotli()
            .no_deflate()
            .build()
            .map_err(ProxyError::Client)?;

        Ok(Self {
            route: config.route.trim_end_matches('/').to_owned(),
            target,
            preserve_host: config.preserve_host,
            via: config.via.clone(),
            cookie_rewrite: config.cookie_rewrite,
            default_headers: HeaderMap::new(),
            decoding,
            raw,
            injection,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Headers sent upstream unless the request carries its own.
    #[must_use]
    pub fn with_default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = headers;
        self
    }

    /// Route prefix, without trailing slash.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Relay one request.
    pub async fn forward(&self, request: Request) -> Result<Response, ProxyError> {
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(ProxyError::Body)?;

        let url = upstream_url(&self.target, &self.route, &parts.uri);
        // Whether the response is markup is only known once headers arrive, so
        // any response that may be injected goes through the decoding client.
        let inject = self.injection.is_some() && !is_cross_origin(&parts.headers);
        let client = if inject { &self.decoding } else { &self.raw };

        let mut headers = merge_headers(&self.default_headers, &parts.headers);
        strip_hop_by_hop(&mut headers);
        headers.remove(CONTENT_LENGTH);
        if !self.preserve_host {
            headers.remove(HOST);
        }
        if inject {
            // Only encodings the client can decode.
            headers.remove(ACCEPT_ENCODING);
        }
        if let Some(via) = &self.via {
            append_via(&mut headers, parts.version, via);
        }

        tracing::debug!(method = %parts.method, %url, "Proxying request");
        let upstream = retry(self.retry, is_connect_failure, || {
            client
                .request(parts.method.clone(), url.clone())
                .headers(headers.clone())
                .body(body.clone())
                .send()
        })
        .await
        .map_err(|failure| ProxyError::Upstream {
            attempts: failure.retries + 1,
            source: failure.error,
        })?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        if matches!(status.as_u16(), 301..=303)
            && let Some(location) = response_headers
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|l| rewrite_location(l, &self.target, &self.route))
            && let Ok(value) = HeaderValue::from_str(&location)
        {
            response_headers.insert(LOCATION, value);
        }

        if self.cookie_rewrite {
            let host = parts
                .headers
                .get(HOST)
                .and_then(|v| v.to_str().ok())
                .map(host_without_port);
            let secure = parts.uri.scheme_str() == Some("https");
            rewrite_cookies(&mut response_headers, host, secure);
        }

        // The decoding client already dropped Content-Encoding and
        // Content-Length for any body it decompresses.
        let body = match &self.injection {
            Some(injection) if inject && is_markup_response(&response_headers, &url) => {
                let original = upstream.bytes().await.map_err(ProxyError::Read)?;
                let rewritten = injection
                    .apply(&original, parts.uri.path())
                    .unwrap_or_else(|| original.to_vec());
                response_headers.remove(CONTENT_ENCODING);
                response_headers.insert(CONTENT_LENGTH, HeaderValue::from(rewritten.len()));
                Body::from(rewritten)
            }
            _ => Body::from_stream(upstream.bytes_stream()),
        };

        let mut response = Response::new(body);
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Markup by Content-Type or by extension.
fn is_markup_response(headers: &HeaderMap, url: &Url) -> bool {
    let by_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| MARKUP_TYPES.iter().any(|t| v.starts_with(t)));
    let by_extension = url
        .path()
        .rsplit_once('.')
        .is_some_and(|(_, ext)| MARKUP_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
    by_type || by_extension
}

/// Connection-level failures are retried; everything else is final.
fn is_connect_failure(error: &reqwest::Error) -> bool {
    error.is_connect() || (error.is_timeout() && error.status().is_none())
}
