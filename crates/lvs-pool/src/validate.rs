//! Structural markup validation.
//!
//! Body extraction and cursor highlighting locate elements through `tl` and
//! the byte ranges of its nodes. The parser recovers from stray and
//! mismatched end tags without telling, so tag balance is checked by a
//! separate scan over start and end tags that reports unclosed and
//! mismatched tags with one-based positions. Elements whose end tag is
//! optional in HTML never produce a report.

use std::ops::Range;

use lvs_protocol::{CursorPosition, ValidationIssue};

/// Elements that never have an end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "keygen", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Elements whose end tag may be omitted.
const OPTIONAL_END: &[&str] = &[
    "body", "colgroup", "dd", "dt", "head", "html", "li", "optgroup", "option", "p", "rp", "rt",
    "tbody", "td", "tfoot", "th", "thead", "tr",
];

/// Elements whose content is raw text.
const RAW_TEXT: &[&str] = &["script", "style", "textarea", "title"];

/// Attribute added to the element under the cursor.
pub const HIGHLIGHT_ATTR: &str = "data-lvs-highlight";

#[derive(Debug)]
struct OpenTag {
    name: String,
    offset: usize,
}

/// Check tag balance of `text`.
pub fn validate(text: &str) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut stack: Vec<OpenTag> = Vec::new();

    for tag in Tags::new(text) {
        if tag.closing {
            let Some(pos) = stack.iter().rposition(|open| open.name == tag.name) else {
                issues.push(issue(text, tag.start, format!("unexpected </{}>", tag.name)));
                continue;
            };
            for open in stack.drain(pos + 1..) {
                if !OPTIONAL_END.contains(&open.name.as_str()) {
                    issues.push(issue(
                        text,
                        open.offset,
                        format!("<{}> closed by </{}>", open.name, tag.name),
                    ));
                }
            }
            stack.pop();
        } else if !tag.self_closing && !VOID_ELEMENTS.contains(&tag.name.as_str()) {
            stack.push(OpenTag {
                name: tag.name,
                offset: tag.start,
            });
        }
    }

    for open in stack {
        if !OPTIONAL_END.contains(&open.name.as_str()) {
            issues.push(issue(text, open.offset, format!("unclosed <{}>", open.name)));
        }
    }

    issues.sort_by_key(|i| (i.line, i.column));
    issues
}

/// Inner markup of `<body>`, or the whole text when there is no body element.
pub fn extract_body(text: &str) -> &str {
    elements(text)
        .into_iter()
        .find(|element| element.name == "body")
        .and_then(|body| text.get(body.inner))
        .unwrap_or(text)
}

/// Mark the innermost start tag at or before `cursor` with [`HIGHLIGHT_ATTR`].
///
/// Returns `None` when the cursor lies before every tag.
pub fn highlight(text: &str, cursor: CursorPosition) -> Option<String> {
    let offset = offset_of(text, cursor);
    let target = elements(text)
        .into_iter()
        .filter(|element| element.outer.start <= offset)
        .filter(|element| !matches!(element.name.as_str(), "html" | "head" | "body"))
        .max_by_key(|element| element.outer.start)?;

    // Insert before `>` or `/>`.
    let start_tag = text.get(..target.open_end)?;
    let close = start_tag.strip_suffix('>')?.len();
    let insert_at = if start_tag[..close].ends_with('/') {
        close - 1
    } else {
        close
    };

    let mut out = String::with_capacity(text.len() + HIGHLIGHT_ATTR.len() + 1);
    out.push_str(&text[..insert_at]);
    out.push(' ');
    out.push_str(HIGHLIGHT_ATTR);
    out.push_str(&text[insert_at..]);
    Some(out)
}

/// An element found by the parser, as byte ranges into the source.
#[derive(Debug)]
struct Element {
    name: String,
    /// Start tag through end tag.
    outer: Range<usize>,
    /// Just past the `>` of the start tag.
    open_end: usize,
    /// Child nodes; empty at `open_end` when there are none.
    inner: Range<usize>,
}

/// Every element of `text`, in no particular order. Empty if parsing fails.
fn elements(text: &str) -> Vec<Element> {
    let Ok(dom) = tl::parse(text, tl::ParserOptions::default()) else {
        return Vec::new();
    };
    let parser = dom.parser();

    let mut found = Vec::new();
    let mut pending: Vec<tl::NodeHandle> = dom.children().to_vec();
    while let Some(handle) = pending.pop() {
        let Some(tl::Node::Tag(tag)) = handle.get(parser) else {
            continue;
        };
        let name = tag.name().as_utf8_str().to_ascii_lowercase();
        let outer = span_of(text, tag.raw().as_bytes());

        let children = tag.children();
        let top = children.top();
        let spans: Vec<Range<usize>> = top
            .iter()
            .filter_map(|child| child.get(parser))
            .map(|child| node_span(text, child))
            .collect();
        pending.extend(top.iter().copied());

        let (open_end, inner) = match (spans.first(), spans.last()) {
            (Some(first), Some(last)) => (first.start, first.start..last.end),
            _ => {
                let end = end_tag_start(text, &outer, &name).unwrap_or(outer.end);
                (end, end..end)
            }
        };
        found.push(Element {
            name,
            outer,
            open_end,
            inner,
        });
    }
    found
}

fn node_span(text: &str, node: &tl::Node<'_>) -> Range<usize> {
    match node {
        tl::Node::Tag(tag) => span_of(text, tag.raw().as_bytes()),
        tl::Node::Raw(bytes) | tl::Node::Comment(bytes) => span_of(text, bytes.as_bytes()),
    }
}

/// Range of `part` within `text`; parser nodes borrow from the source.
fn span_of(text: &str, part: &[u8]) -> Range<usize> {
    let start = part
        .as_ptr()
        .addr()
        .saturating_sub(text.as_ptr().addr())
        .min(text.len());
    start..(start + part.len()).min(text.len())
}

/// Offset of `</name` in a childless element's outer range.
fn end_tag_start(text: &str, outer: &Range<usize>, name: &str) -> Option<usize> {
    let raw = text.get(outer.clone())?;
    let at = raw.rfind("</")?;
    raw[at + 2..]
        .to_ascii_lowercase()
        .starts_with(name)
        .then_some(outer.start + at)
}

fn issue(text: &str, offset: usize, message: String) -> ValidationIssue {
    let (line, column) = position_of(text, offset);
    ValidationIssue {
        line,
        column,
        message,
    }
}

/// One-based line and column of a byte offset.
fn position_of(text: &str, offset: usize) -> (u32, u32) {
    let before = &text[..offset.min(text.len())];
    let line = before.matches('\n').count() + 1;
    let column = before
        .rfind('\n')
        .map_or(before.chars().count(), |nl| before[nl + 1..].chars().count())
        + 1;
    (
        u32::try_from(line).unwrap_or(u32::MAX),
        u32::try_from(column).unwrap_or(u32::MAX),
    )
}

/// Byte offset of a zero-based cursor, clamped to the text.
fn offset_of(text: &str, cursor: CursorPosition) -> usize {
    let mut offset = 0;
    for (n, line) in text.split_inclusive('\n').enumerate() {
        if n == cursor.line as usize {
            let chars = line
                .char_indices()
                .nth(cursor.character as usize)
                .map_or(line.len(), |(i, _)| i);
            return offset + chars;
        }
        offset += line.len();
    }
    text.len()
}

/// A start or end tag found by the balance scan.
#[derive(Debug)]
struct Tag {
    name: String,
    closing: bool,
    self_closing: bool,
    /// Offset of `<`.
    start: usize,
}

/// Iterator over tags, skipping comments, declarations and raw text content.
struct Tags<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Tags<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn skip_past(&mut self, needle: &str) {
        self.pos = self.text[self.pos..]
            .find(needle)
            .map_or(self.text.len(), |i| self.pos + i + needle.len());
    }

    fn skip_raw_text(&mut self, name: &str) {
        let closing = format!("</{name}");
        let rest = self.text[self.pos..].to_ascii_lowercase();
        self.pos = rest.find(&closing).map_or(self.text.len(), |i| self.pos + i);
    }
}

impl Iterator for Tags<'_> {
    type Item = Tag;

    fn next(&mut self) -> Option<Tag> {
        loop {
            let lt = self.text[self.pos..].find('<')? + self.pos;
            let rest = &self.text[lt..];

            if rest.starts_with("<!--") {
                self.pos = lt + 4;
                self.skip_past("-->");
                continue;
            }
            if rest.starts_with("<!") || rest.starts_with("<?") {
                self.pos = lt + 2;
                self.skip_past(">");
                continue;
            }

            let closing = rest.starts_with("</");
            let name_start = lt + if closing { 2 } else { 1 };
            let name_len = self.text[name_start..]
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == ':'))
                .unwrap_or(self.text.len() - name_start);
            if name_len == 0 {
                // Stray `<` in text.
                self.pos = lt + 1;
                continue;
            }
            let name = self.text[name_start..name_start + name_len].to_ascii_lowercase();

            let Some(end) = find_tag_end(self.text, name_start + name_len) else {
                self.pos = self.text.len();
                return None;
            };
            let self_closing = !closing && self.text[..end - 1].ends_with('/');
            self.pos = end;

            if !closing && !self_closing && RAW_TEXT.contains(&name.as_str()) {
                self.skip_raw_text(&name);
            }

            return Some(Tag {
                name,
                closing,
                self_closing,
                start: lt,
            });
        }
    }
}

/// Offset just past the `>` closing a tag, honoring quoted attribute values.
fn find_tag_end(text: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in text[from..].char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '>') => return Some(from + i + 1),
            (None, _) => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_balanced_document_has_no_issues() {
        let html = "<!DOCTYPE html>\n<html><head><title>a < b</title></head>\n<body><div class=\"x>y\"><p>hi<br><img src=a.png/></div></body></html>";
        assert!(validate(html).is_empty());
    }

    #[test]
    fn test_unclosed_element_reported_with_position() {
        let issues = validate("<main>\n  <div>\n</main>");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].line, 2);
        assert_eq!(issues[0].column, 3);
        assert_eq!(issues[0].message, "<div> closed by </main>");
    }

    #[test]
    fn test_stray_end_tag() {
        let issues = validate("<div></span></div>");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].message, "unexpected </span>");
    }

    #[test]
    fn test_unclosed_at_end_of_input() {
        let issues = validate("<section><ul><li>one");
        let messages: Vec<_> = issues.iter().map(|i| i.message.as_str()).collect();
        assert_eq!(messages, vec!["unclosed <section>", "unclosed <ul>"]);
    }

    #[test]
    fn test_script_content_is_skipped() {
        assert!(validate("<script>if (a < b) { x = '</div>' }</script>").is_empty());
    }

    #[test]
    fn test_comments_are_skipped() {
        assert!(validate("<!-- <div> --><p></p>").is_empty());
    }

    #[test]
    fn test_extract_body() {
        let html = "<html><head></head><body class=\"x\">\n<p>x</p>\n</body></html>";
        assert_eq!(extract_body(html), "\n<p>x</p>\n");
    }

    #[test]
    fn test_extract_body_of_fragment() {
        assert_eq!(extract_body("<p>x</p>"), "<p>x</p>");
    }

    #[test]
    fn test_highlight_marks_element_under_cursor() {
        let html = "<body>\n<h1>Title</h1>\n<p>text</p>\n</body>";
        let marked = highlight(
            html,
            CursorPosition {
                line: 2,
                character: 4,
            },
        )
        .unwrap();
        assert!(marked.contains("<p data-lvs-highlight>text</p>"));
        assert!(marked.contains("<h1>Title</h1>"));
    }

    #[test]
    fn test_highlight_self_closing() {
        let marked = highlight(
            "<img src=\"a.png\"/>",
            CursorPosition {
                line: 0,
                character: 3,
            },
        )
        .unwrap();
        assert_eq!(marked, "<img src=\"a.png\" data-lvs-highlight/>");
    }

    #[test]
    fn test_extract_body_keeps_source_formatting() {
        let html = "<body>\n  <a href='x'  title=\"t\">x</a>\n</body>";
        assert_eq!(extract_body(html), "\n  <a href='x'  title=\"t\">x</a>\n");
    }

    #[test]
    fn test_extract_empty_body() {
        assert_eq!(extract_body("<html><body></body></html>"), "");
    }

    #[test]
    fn test_highlight_element_with_quoted_gt() {
        let html = "<div title=\"a>b\">\n<span>x</span>\n</div>";
        let marked = highlight(
            html,
            CursorPosition {
                line: 1,
                character: 2,
            },
        )
        .unwrap();
        assert_eq!(
            marked,
            "<div title=\"a>b\">\n<span data-lvs-highlight>x</span>\n</div>"
        );
    }

    #[test]
    fn test_highlight_childless_element() {
        let marked = highlight(
            "<p></p>",
            CursorPosition {
                line: 0,
                character: 1,
            },
        )
        .unwrap();
        assert_eq!(marked, "<p data-lvs-highlight></p>");
    }

    #[test]
    fn test_highlight_before_any_tag() {
        assert!(highlight("text <b>x</b>", CursorPosition { line: 0, character: 0 }).is_none());
    }
}
