//! The page a client keeps in sync.

use crate::dom::{Document, DomError};

/// Cache-busting query parameter added to refreshed stylesheets.
pub const CACHE_BUST_PARAM: &str = "__lvs";

/// What to do when a hot patch cannot be applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PatchFailure {
    /// Keep the page and show a persistent error banner.
    #[default]
    Banner,
    /// Reload the page.
    Reload,
}

/// Operations the sync client performs on the page it drives.
pub trait Page {
    /// Full reload.
    fn reload(&mut self);

    /// Replace the page URL.
    fn navigate(&mut self, url: &str);

    /// Files the page announces to the server once connected.
    fn files(&self) -> Vec<String>;

    /// Current body tree.
    fn body(&mut self) -> &mut Document;

    /// Replace the body wholesale.
    fn replace_body(&mut self, markup: &str) -> Result<(), DomError> {
        self.body().replace(markup)
    }

    /// Re-fetch external stylesheets, tagging each with `stamp`.
    fn refresh_stylesheets(&mut self, stamp: u64);

    fn show_banner(&mut self, text: &str, persistent: bool);

    fn hide_banner(&mut self);
}

/// Append or replace the cache-busting parameter on `href`.
pub fn cache_bust(href: &str, stamp: u64) -> String {
    let (path, fragment) = match href.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (href, None),
    };
    let (base, query) = match path.split_once('?') {
        Some((base, query)) => (base, query),
        None => (path, ""),
    };

    let prefix = format!("{CACHE_BUST_PARAM}=");
    let mut params: Vec<String> = query
        .split('&')
        .filter(|p| !p.is_empty() && !p.starts_with(&prefix))
        .map(str::to_owned)
        .collect();
    params.push(format!("{prefix}{stamp}"));

    let mut out = format!("{base}?{}", params.join("&"));
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}

/// Banner shown on the page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Banner {
    pub text: String,
    pub persistent: bool,
}

/// In-memory page holding a parsed body.
///
/// Records every navigation so callers can inspect what a live page would
/// have done.
#[derive(Debug, Default)]
pub struct DocumentPage {
    body: Document,
    files: Vec<String>,
    /// Number of full reloads.
    pub reloads: usize,
    /// URLs navigated to, oldest first.
    pub navigations: Vec<String>,
    pub banner: Option<Banner>,
}

impl DocumentPage {
    /// Page showing `body`, announcing `files`.
    pub fn new(body: &str, files: Vec<String>) -> Result<Self, DomError> {
        Ok(Self {
            body: Document::parse(body)?,
            files,
            ..Self::default()
        })
    }

    /// Read-only view of the body.
    pub fn document(&self) -> &Document {
        &self.body
    }
}

impl Page for DocumentPage {
    fn reload(&mut self) {
        self.reloads += 1;
    }

    fn navigate(&mut self, url: &str) {
        self.navigations.push(url.to_owned());
    }

    fn files(&self) -> Vec<String> {
        self.files.clone()
    }

    fn body(&mut self) -> &mut Document {
        &mut self.body
    }

    fn refresh_stylesheets(&mut self, stamp: u64) {
        for link in self.body.elements_by_name("link") {
            let is_stylesheet = self
                .body
                .attribute(link, "rel")
                .is_some_and(|rel| rel.eq_ignore_ascii_case("stylesheet"));
            let Some(href) = self.body.attribute(link, "href").map(str::to_owned) else {
                continue;
            };
            if is_stylesheet {
                self.body.set_attribute(link, "href", &cache_bust(&href, stamp));
            }
        }
    }

    fn show_banner(&mut self, text: &str, persistent: bool) {
        self.banner = Some(Banner {
            text: text.to_owned(),
            persistent,
        });
    }

    fn hide_banner(&mut self) {
        self.banner = None;
    }
}
