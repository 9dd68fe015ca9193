//! Change classification.

use std::path::{Path, PathBuf};

use tokio::time::Instant;

use super::debouncer::FsOp;

const MARKUP: [&str; 5] = ["html", "htm", "xhtml", "svg", "php"];
const STYLESHEET: [&str; 4] = ["css", "scss", "sass", "less"];

/// What kind of file changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Markup,
    Stylesheet,
    Other,
}

impl ChangeKind {
    /// Classify by extension, case-insensitively.
    pub fn of(path: &Path) -> Self {
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            return Self::Other;
        };
        let extension = extension.to_ascii_lowercase();
        if MARKUP.contains(&extension.as_str()) {
            Self::Markup
        } else if STYLESHEET.contains(&extension.as_str()) {
            Self::Stylesheet
        } else {
            Self::Other
        }
    }
}

/// A debounced, classified change.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    /// Changed path on disk.
    pub path: PathBuf,
    /// Classification by extension.
    pub kind: ChangeKind,
    /// Operation after coalescing.
    pub op: FsOp,
    /// When the change left the debouncer.
    pub at: Instant,
}

impl ChangeEvent {
    /// Classify `path`.
    pub fn new(path: PathBuf, op: FsOp) -> Self {
        Self {
            kind: ChangeKind::of(&path),
            path,
            op,
            at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(ChangeKind::of(Path::new("a/index.HTML")), ChangeKind::Markup);
        assert_eq!(ChangeKind::of(Path::new("logo.svg")), ChangeKind::Markup);
        assert_eq!(ChangeKind::of(Path::new("page.php")), ChangeKind::Markup);
        assert_eq!(ChangeKind::of(Path::new("theme.scss")), ChangeKind::Stylesheet);
        assert_eq!(ChangeKind::of(Path::new("app.js")), ChangeKind::Other);
        assert_eq!(ChangeKind::of(Path::new("Makefile")), ChangeKind::Other);
    }
}
