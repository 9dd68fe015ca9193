//! Static file responder with sync-script injection.
//!
//! The site is one root directory (or file) plus optional mounts, each a
//! route prefix mapped to another directory or file. Markup files are read
//! whole and rewritten; everything else is delegated to
//! [`tower_http::services::ServeFile`].

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use lvs_config::DotfilesPolicy;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use super::anchor::{Injection, find_anchor, injected_length};
use super::path::{check_dotfiles, decode_segments};
use crate::error::ServerError;

/// Index files tried for directory requests, in order.
const INDEX_FILES: [&str; 2] = ["index.html", "index.htm"];

/// Extensions whose responses receive the sync script.
const INJECTABLE_EXTENSIONS: [&str; 4] = ["html", "htm", "xhtml", "svg"];

/// A directory or single file served under a route prefix.
#[derive(Clone, Debug)]
pub struct StaticRoot {
    /// Route prefix without trailing slash; empty for the site root.
    route: String,
    /// Directory or file on disk.
    path: PathBuf,
}

impl StaticRoot {
    /// Serve `path` under `route`.
    pub fn new(route: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            route: route.trim_end_matches('/').to_owned(),
            path: path.into(),
        }
    }

    /// Route prefix.
    pub fn route(&self) -> &str {
        &self.route
    }

    /// Location on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn is_single_file(&self) -> bool {
        self.path.is_file()
    }

    /// Part of `uri_path` below this root, if the root handles it.
    fn strip<'a>(&self, uri_path: &'a str) -> Option<&'a str> {
        if self.route.is_empty() {
            return Some(uri_path);
        }
        let rest = uri_path.strip_prefix(&self.route)?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    fn join(&self, segments: &[String]) -> PathBuf {
        segments.iter().fold(self.path.clone(), |path, s| path.join(s))
    }

    /// URL of a file below this root, relative to the site root.
    fn url_of(&self, segments: &[String]) -> String {
        let mut url = self.route.clone();
        for segment in segments {
            url.push('/');
            url.push_str(segment);
        }
        if url.is_empty() {
            url.push('/');
        }
        url
    }
}

/// Everything the static responder serves.
#[derive(Clone, Debug)]
pub struct Site {
    root: StaticRoot,
    /// Longest route first.
    mounts: Vec<StaticRoot>,
    dotfiles: DotfilesPolicy,
    injection: Option<Injection>,
}

impl Site {
    /// Site serving `root`, injecting when `injection` is set.
    pub fn new(root: impl Into<PathBuf>, dotfiles: DotfilesPolicy, injection: Option<Injection>) -> Self {
        Self {
            root: StaticRoot::new("", root),
            mounts: Vec::new(),
            dotfiles,
            injection,
        }
    }

    /// Add a mount.
    #[must_use]
    pub fn with_mount(mut self, mount: StaticRoot) -> Self {
        self.mounts.push(mount);
        self.mounts
            .sort_by_key(|m| std::cmp::Reverse(m.route.len()));
        self
    }

    /// Root and mounts, mounts first.
    pub fn roots(&self) -> impl Iterator<Item = &StaticRoot> {
        self.mounts.iter().chain(std::iter::once(&self.root))
    }

    fn locate<'a>(&self, uri_path: &'a str) -> (&StaticRoot, &'a str) {
        self.mounts
            .iter()
            .find_map(|mount| mount.strip(uri_path).map(|rest| (mount, rest)))
            .unwrap_or((&self.root, uri_path))
    }

    /// Site-relative file id (no leading `/`) of a path on disk.
    pub fn file_id(&self, fs_path: &Path) -> Option<String> {
        self.roots().find_map(|root| {
            let relative = fs_path.strip_prefix(&root.path).ok()?;
            let segments: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            Some(root.url_of(&segments).trim_start_matches('/').to_owned())
        })
    }

    /// Serve a request.
    pub async fn serve(&self, request: Request) -> Result<Response, ServerError> {
        let uri_path = request.uri().path().to_owned();
        let (root, rest) = self.locate(&uri_path);
        let segments = decode_segments(rest)?;
        check_dotfiles(&segments, self.dotfiles, &uri_path)?;

        let (file, url) = if root.is_single_file() {
            if !segments.is_empty() {
                return Err(ServerError::NotFound(uri_path));
            }
            (root.path.clone(), root.url_of(&[]))
        } else {
            let target = root.join(&segments);
            let metadata = tokio::fs::metadata(&target)
                .await
                .map_err(|e| ServerError::from_fs(e, &uri_path))?;

            if metadata.is_dir() {
                if !uri_path.ends_with('/') {
                    return Ok(redirect_to_slash(&request));
                }
                let (index, name) = find_index(&target)
                    .await
                    .ok_or_else(|| ServerError::NotFound(uri_path.clone()))?;
                let mut segments = segments;
                segments.push(name.to_owned());
                (index, root.url_of(&segments))
            } else {
                (target, root.url_of(&segments))
            }
        };

        match &self.injection {
            Some(injection) if is_injectable(&file) && !is_cross_origin(request.headers()) => {
                serve_injected(injection, &file, &url, &uri_path).await
            }
            _ => serve_file(&file, request).await,
        }
    }

    /// Rewrite target for clean URLs.
    ///
    /// `/sub/` (a directory without index but with a `sub.html` sibling) and
    /// extensionless `/sub` (nothing on disk, but `sub.html` exists) both
    /// map to `/sub.html`.
    pub async fn clean_url(&self, uri_path: &str) -> Option<String> {
        let (root, rest) = self.locate(uri_path);
        if root.is_single_file() {
            return None;
        }
        let segments = decode_segments(rest).ok()?;
        let last = segments.last()?;
        let target = root.join(&segments);
        let sibling = target.with_file_name(format!("{last}.html"));

        if uri_path.ends_with('/') {
            let is_dir = tokio::fs::metadata(&target).await.is_ok_and(|m| m.is_dir());
            if !is_dir || find_index(&target).await.is_some() {
                return None;
            }
        } else if Path::new(last).extension().is_some() || tokio::fs::metadata(&target).await.is_ok() {
            return None;
        }

        if !tokio::fs::metadata(&sibling).await.is_ok_and(|m| m.is_file()) {
            return None;
        }
        Some(format!("{}.html", uri_path.trim_end_matches('/')))
    }
}

async fn find_index(dir: &Path) -> Option<(PathBuf, &'static str)> {
    for name in INDEX_FILES {
        let candidate = dir.join(name);
        if tokio::fs::metadata(&candidate).await.is_ok_and(|m| m.is_file()) {
            return Some((candidate, name));
        }
    }
    None
}

fn redirect_to_slash(request: &Request) -> Response {
    let mut location = format!("{}/", request.uri().path());
    if let Some(query) = request.uri().query() {
        location.push('?');
        location.push_str(query);
    }
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
}

/// Whether responses for `path` receive the sync script.
pub(crate) fn is_injectable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| INJECTABLE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

/// Requests made by cross-origin fetches never get the script.
pub(crate) fn is_cross_origin(headers: &HeaderMap) -> bool {
    headers
        .get("sec-fetch-mode")
        .is_some_and(|mode| mode.as_bytes().eq_ignore_ascii_case(b"cors"))
}

async fn serve_injected(
    injection: &Injection,
    file: &Path,
    url: &str,
    uri_path: &str,
) -> Result<Response, ServerError> {
    let original = tokio::fs::read(file)
        .await
        .map_err(|e| ServerError::from_fs(e, uri_path))?;
    let content_type = content_type_for(file);

    let Some((_, anchor)) = find_anchor(&original) else {
        tracing::trace!(file = %file.display(), "No injection anchor, serving unmodified");
        return Ok(markup_response(content_type, original.len(), original));
    };

    let snippet = injection.snippet(url);
    let length = injected_length(original.len(), &snippet, anchor);
    let body = injection
        .apply(&original, url)
        .ok_or_else(|| ServerError::Io(std::io::Error::other("injection anchor vanished")))?;
    debug_assert_eq!(length, body.len());

    Ok(markup_response(content_type, length, body))
}

fn markup_response(content_type: HeaderValue, length: usize, body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, HeaderValue::from(length)),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
        ],
        body,
    )
        .into_response()
}

fn content_type_for(file: &Path) -> HeaderValue {
    let mime = mime_guess::from_path(file).first_or_octet_stream();
    let value = if mime.type_() == mime_guess::mime::TEXT {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.essence_str().to_owned()
    };
    HeaderValue::from_str(&value).unwrap_or(HeaderValue::from_static("application/octet-stream"))
}

async fn serve_file(file: &Path, request: Request) -> Result<Response, ServerError> {
    match ServeFile::new(file).oneshot(request).await {
        Ok(response) => Ok(response.map(Body::new)),
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lvs_config::PatchFailurePolicy;
    use pretty_assertions::assert_eq;

    fn site(dir: &Path) -> Site {
        Site::new(
            dir,
            DotfilesPolicy::Ignore,
            Some(Injection::new(PatchFailurePolicy::Banner)),
        )
    }

    fn get(path: &str) -> Request {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    async fn body_of(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_markup_is_injected_with_exact_length() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<html><head></head><body></body></html>").unwrap();

        let response = site(dir.path()).serve(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let length: usize = response.headers()[header::CONTENT_LENGTH]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        let body = body_of(response).await;
        assert_eq!(length, body.len());
        assert!(body.contains("data-file=\"/index.html\""));
    }

    #[tokio::test]
    async fn test_cross_origin_request_is_not_injected() {
        let dir = tempfile::tempdir().unwrap();
        let html = "<html><head></head></html>";
        std::fs::write(dir.path().join("a.html"), html).unwrap();

        let request = Request::builder()
            .uri("/a.html")
            .header("sec-fetch-mode", "cors")
            .body(Body::empty())
            .unwrap();
        let response = site(dir.path()).serve(request).await.unwrap();
        assert_eq!(body_of(response).await, html);
    }

    #[tokio::test]
    async fn test_directory_without_slash_redirects_keeping_query() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();

        let response = site(dir.path()).serve(get("/docs?x=1")).await.unwrap();
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/docs/?x=1");
    }

    #[tokio::test]
    async fn test_directory_without_index_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("empty")).unwrap();

        let err = site(dir.path()).serve(get("/empty/")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_mounted_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lib.js");
        std::fs::write(&file, "export {}").unwrap();

        let site = site(dir.path()).with_mount(StaticRoot::new("/vendor/lib.js", &file));
        let response = site.serve(get("/vendor/lib.js")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, "export {}");

        let err = site.serve(get("/vendor/lib.js/x")).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_clean_url_targets() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub.html"), "<p>sub</p>").unwrap();
        std::fs::write(dir.path().join("about.html"), "<p>about</p>").unwrap();
        std::fs::create_dir(dir.path().join("full")).unwrap();
        std::fs::write(dir.path().join("full/index.html"), "").unwrap();
        std::fs::write(dir.path().join("full.html"), "").unwrap();

        let site = site(dir.path());
        assert_eq!(site.clean_url("/sub/").await.as_deref(), Some("/sub.html"));
        assert_eq!(site.clean_url("/about").await.as_deref(), Some("/about.html"));
        assert_eq!(site.clean_url("/full/").await, None);
        assert_eq!(site.clean_url("/sub").await, None);
        assert_eq!(site.clean_url("/missing").await, None);
    }

    #[test]
    fn test_file_id() {
        let site = Site::new("/srv/site", DotfilesPolicy::Ignore, None)
            .with_mount(StaticRoot::new("/vendor", "/srv/node_modules"));
        assert_eq!(
            site.file_id(Path::new("/srv/site/blog/post.html")).as_deref(),
            Some("blog/post.html")
        );
        assert_eq!(
            site.file_id(Path::new("/srv/node_modules/x/y.css")).as_deref(),
            Some("vendor/x/y.css")
        );
        assert_eq!(site.file_id(Path::new("/elsewhere/a.html")), None);
    }
}
