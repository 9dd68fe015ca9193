//! Sync-script insertion point.

use lvs_config::PatchFailurePolicy;
use lvs_protocol::SCRIPT_PATH;

/// Anchor tags in priority order.
pub const ANCHORS: [&str; 4] = ["</head>", "</html>", "</body>", "</svg>"];

/// Script reference inserted into markup.
#[derive(Clone, Debug)]
pub struct Injection {
    patch_failure: PatchFailurePolicy,
}

impl Injection {
    /// Injection announcing `patch_failure` to the client script.
    pub fn new(patch_failure: PatchFailurePolicy) -> Self {
        Self { patch_failure }
    }

    /// Snippet for a document served at `file`.
    pub fn snippet(&self, file: &str) -> String {
        let query = match self.patch_failure {
            PatchFailurePolicy::Banner => String::new(),
            policy => format!("?patch={}", policy.as_str()),
        };
        format!(
            "<script async data-file=\"{}\" src=\"{SCRIPT_PATH}{query}\"></script>",
            html_escape::encode_double_quoted_attribute(file)
        )
    }

    /// Insert the snippet for `file` before the anchor of `body`.
    ///
    /// Returns `None` when the body has no anchor.
    pub fn apply(&self, body: &[u8], file: &str) -> Option<Vec<u8>> {
        let (at, _) = find_anchor(body)?;
        let snippet = self.snippet(file);

        let mut out = Vec::with_capacity(body.len() + snippet.len());
        out.extend_from_slice(&body[..at]);
        out.extend_from_slice(snippet.as_bytes());
        out.extend_from_slice(&body[at..]);
        Some(out)
    }
}

/// Offset and text of the anchor the snippet goes before.
///
/// Anchors are tried in priority order, each with one case-insensitive scan;
/// the first occurrence of the first anchor present wins.
pub fn find_anchor(body: &[u8]) -> Option<(usize, &'static str)> {
    ANCHORS.iter().find_map(|anchor| {
        let needle = anchor.as_bytes();
        body.windows(needle.len())
            .position(|window| window.eq_ignore_ascii_case(needle))
            .map(|at| (at, *anchor))
    })
}

/// `Content-Length` after injection.
///
/// The injected text is the snippet followed by the anchor it replaces.
pub fn injected_length(original: usize, snippet: &str, anchor: &str) -> usize {
    original + (snippet.len() + anchor.len()) - anchor.len()
}
