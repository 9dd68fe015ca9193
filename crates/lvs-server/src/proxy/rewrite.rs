//! Request and response rewriting for the proxy.

use axum::http::header::{CONNECTION, HeaderName, SET_COOKIE, VIA};
use axum::http::{HeaderMap, HeaderValue, Uri, Version};
use url::Url;

/// Headers that describe one connection and are never forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Remove hop-by-hop headers, including those named by `Connection`.
pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

/// Request headers layered over the route defaults; request values win.
pub(crate) fn merge_headers(defaults: &HeaderMap, request: &HeaderMap) -> HeaderMap {
    let mut merged = defaults.clone();
    for name in request.keys() {
        merged.remove(name);
        for value in request.get_all(name) {
            merged.append(name.clone(), value.clone());
        }
    }
    merged
}

/// Append this proxy to the `Via` chain.
pub(crate) fn append_via(headers: &mut HeaderMap, version: Version, pseudonym: &str) {
    let protocol = match version {
        Version::HTTP_09 => "0.9",
        Version::HTTP_10 => "1.0",
        Version::HTTP_2 => "2",
        Version::HTTP_3 => "3",
        _ => "1.1",
    };
    let hop = format!("{protocol} {pseudonym}");
    let value = match headers.get(VIA).and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {hop}"),
        None => hop,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(VIA, value);
    }
}

/// Rewrite every `Set-Cookie` for the proxy host.
///
/// `Domain` is replaced with `host` (dropped when the host is unknown) and
/// `Secure` is dropped on insecure connections.
pub(crate) fn rewrite_cookies(headers: &mut HeaderMap, host: Option<&str>, secure: bool) {
    let cookies: Vec<String> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(|cookie| rewrite_cookie(cookie, host, secure))
        .collect();
    if cookies.is_empty() {
        return;
    }

    headers.remove(SET_COOKIE);
    for cookie in cookies {
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            headers.append(SET_COOKIE, value);
        }
    }
}

fn rewrite_cookie(cookie: &str, host: Option<&str>, secure: bool) -> String {
    let mut parts = Vec::new();
    for (n, part) in cookie.split(';').map(str::trim).enumerate() {
        if n == 0 {
            parts.push(part.to_owned());
            continue;
        }
        let name = part.split('=').next().unwrap_or_default().trim();
        if name.eq_ignore_ascii_case("domain") {
            if let Some(host) = host {
                parts.push(format!("Domain={host}"));
            }
        } else if name.eq_ignore_ascii_case("secure") {
            if secure {
                parts.push(part.to_owned());
            }
        } else if !part.is_empty() {
            parts.push(part.to_owned());
        }
    }
    parts.join("; ")
}

/// Hostname of a `Host` header value.
pub(crate) fn host_without_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal
        return host.split_once(']').map_or(host, |(h, _)| &h[1..]);
    }
    host.rsplit_once(':').map_or(host, |(h, _)| h)
}

/// Upstream URL for a request below `route`.
pub(crate) fn upstream_url(target: &Url, route: &str, uri: &Uri) -> Url {
    let rest = uri.path().strip_prefix(route).unwrap_or(uri.path());
    let base = target.path().trim_end_matches('/');
    let mut path = format!("{base}{rest}");
    if !path.starts_with('/') {
        path.insert(0, '/');
    }

    let query = match (target.query(), uri.query()) {
        (Some(a), Some(b)) if !a.is_empty() => Some(format!("{a}&{b}")),
        (Some(a), None) if !a.is_empty() => Some(a.to_owned()),
        (_, Some(b)) => Some(b.to_owned()),
        _ => None,
    };

    let mut url = target.clone();
    url.set_path(&path);
    url.set_query(query.as_deref());
    url
}

/// Map an upstream redirect back below the proxy route.
///
/// Only absolute locations on the upstream's own origin and base path are
/// rewritten.
pub(crate) fn rewrite_location(location: &str, target: &Url, route: &str) -> Option<String> {
    let location = Url::parse(location).ok()?;
    if location.origin() != target.origin() {
        return None;
    }

    let base = target.path().trim_end_matches('/');
    let rest = location.path().strip_prefix(base)?;
    if !(rest.is_empty() || rest.starts_with('/')) {
        return None;
    }

    let mut rewritten = format!("{route}{rest}");
    if rewritten.is_empty() {
        rewritten.push('/');
    }
    if let Some(query) = location.query() {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    if let Some(fragment) = location.fragment() {
        rewritten.push('#');
        rewritten.push_str(fragment);
    }
    Some(rewritten)
}
