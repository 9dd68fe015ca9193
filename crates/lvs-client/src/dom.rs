//! Owned markup tree for hot patching.
//!
//! Nodes live in an arena and keep their [`NodeId`] for as long as a patch
//! leaves them in place. Patching walks the current tree and the new markup
//! side by side and only touches nodes that differ, so references to
//! surviving nodes (the focused element in particular) stay valid. Ids of
//! dropped nodes are recycled for later nodes.

use std::fmt::Write as _;

/// Stable identifier of a node in a [`Document`].
pub type NodeId = usize;

/// Deepest element nesting accepted.
pub const MAX_DEPTH: usize = 512;

/// Elements rendered without an end tag.
const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const FRAGMENT: &str = "#fragment";

/// Markup tree error.
#[derive(Debug, thiserror::Error)]
pub enum DomError {
    /// The markup parser gave up.
    #[error("markup could not be parsed: {0}")]
    Parse(String),

    /// Nesting exceeds [`MAX_DEPTH`].
    #[error("markup nests deeper than 512 elements")]
    TooDeep,
}

/// Content of a node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    /// Element with lowercase name and attributes sorted by name.
    Element {
        name: String,
        attributes: Vec<(String, Option<String>)>,
    },
    /// Raw text.
    Text(String),
}

#[derive(Clone, Debug)]
struct Slot {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Counts of changes made by [`Document::patch`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatchStats {
    /// Nodes whose attributes or text changed in place.
    pub updated: usize,
    /// Nodes swapped for a different node.
    pub replaced: usize,
    /// Nodes appended.
    pub inserted: usize,
    /// Nodes dropped.
    pub removed: usize,
}

impl PatchStats {
    /// Whether the patch changed nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A parsed fragment of markup.
#[derive(Clone, Debug)]
pub struct Document {
    slots: Vec<Option<Slot>>,
    /// Empty slots, reused before the arena grows.
    free: Vec<NodeId>,
    root: NodeId,
    focus: Option<NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            slots: vec![Some(Slot {
                kind: NodeKind::Element {
                    name: FRAGMENT.to_owned(),
                    attributes: Vec::new(),
                },
                parent: None,
                children: Vec::new(),
            })],
            free: Vec::new(),
            root: 0,
            focus: None,
        }
    }
}

impl Document {
    /// Parse `markup` into a tree.
    pub fn parse(markup: &str) -> Result<Self, DomError> {
        let dom = tl::parse(markup, tl::ParserOptions::default())
            .map_err(|e| DomError::Parse(format!("{e:?}")))?;
        let parser = dom.parser();

        let mut document = Self::default();
        let root = document.root;
        for handle in dom.children() {
            document.import_markup(*handle, parser, root, 1)?;
        }
        Ok(document)
    }

    fn import_markup(
        &mut self,
        handle: tl::NodeHandle,
        parser: &tl::Parser<'_>,
        parent: NodeId,
        depth: usize,
    ) -> Result<(), DomError> {
        if depth > MAX_DEPTH {
            return Err(DomError::TooDeep);
        }
        let Some(node) = handle.get(parser) else {
            return Ok(());
        };

        match node {
            tl::Node::Tag(tag) => {
                let name = tag.name().as_utf8_str().to_ascii_lowercase();
                let attributes = collect_attributes(tag.attributes());
                let id = self.alloc(NodeKind::Element { name, attributes }, Some(parent));
                self.attach(parent, id, None);
                for child in tag.children().top().iter() {
                    self.import_markup(*child, parser, id, depth + 1)?;
                }
            }
            tl::Node::Raw(bytes) => {
                let id = self.alloc(NodeKind::Text(bytes.as_utf8_str().into_owned()), Some(parent));
                self.attach(parent, id, None);
            }
            tl::Node::Comment(_) => {}
        }
        Ok(())
    }

    fn alloc(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let slot = Slot {
            kind,
            parent,
            children: Vec::new(),
        };
        if let Some(id) = self.free.pop()
            && let Some(empty) = self.slots.get_mut(id)
        {
            *empty = Some(slot);
            return id;
        }
        self.slots.push(Some(slot));
        self.slots.len() - 1
    }

    fn attach(&mut self, parent: NodeId, child: NodeId, at: Option<usize>) {
        if let Some(slot) = self.slot_mut(parent) {
            match at {
                Some(at) => slot.children.insert(at, child),
                None => slot.children.push(child),
            }
        }
    }

    fn slot(&self, id: NodeId) -> Option<&Slot> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    fn slot_mut(&mut self, id: NodeId) -> Option<&mut Slot> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }

    /// The synthetic node holding the top-level nodes.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Children of `id`; empty for unknown ids.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.slot(id).map_or(&[], |slot| slot.children.as_slice())
    }

    /// Parent of `id`.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.slot(id).and_then(|slot| slot.parent)
    }

    /// Content of `id`, if the node exists.
    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.slot(id).map(|slot| &slot.kind)
    }

    /// Whether `id` is still part of the tree.
    pub fn contains(&self, id: NodeId) -> bool {
        self.slot(id).is_some()
    }

    /// Value of attribute `name` on element `id`.
    pub fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        match self.kind(id)? {
            NodeKind::Element { attributes, .. } => attributes
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v.as_deref().unwrap_or_default()),
            NodeKind::Text(_) => None,
        }
    }

    /// First element, in document order, whose `id` attribute is `value`.
    pub fn element_by_id(&self, value: &str) -> Option<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .find(|&id| self.attribute(id, "id") == Some(value))
    }

    /// Elements named `name`, in document order.
    pub fn elements_by_name(&self, name: &str) -> Vec<NodeId> {
        self.descendants(self.root)
            .into_iter()
            .filter(|&id| {
                matches!(self.kind(id), Some(NodeKind::Element { name: n, .. }) if n == name)
            })
            .collect()
    }

    /// Set attribute `name` on element `id`. Returns whether the node is an
    /// element.
    pub fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> bool {
        let Some(NodeKind::Element { attributes, .. }) = self.slot_mut(id).map(|s| &mut s.kind)
        else {
            return false;
        };
        match attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = Some(value.to_owned()),
            None => attributes.push((name.to_owned(), Some(value.to_owned()))),
        }
        true
    }

    /// Concatenated text below `id`.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        for node in self.descendants(id) {
            if let Some(NodeKind::Text(text)) = self.kind(node) {
                out.push_str(text);
            }
        }
        out
    }

    /// Nodes below `id` in document order, excluding `id`.
    fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev());
        }
        out
    }

    /// Focus element `id`. Returns `false` when the node does not exist.
    pub fn focus(&mut self, id: NodeId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.focus = Some(id);
        true
    }

    /// Focused node, if it is still in the tree.
    pub fn focused(&self) -> Option<NodeId> {
        self.focus
    }

    /// Replace the whole content with `markup`. Focus is lost.
    pub fn replace(&mut self, markup: &str) -> Result<(), DomError> {
        *self = Self::parse(markup)?;
        Ok(())
    }

    /// Bring the tree in line with `markup`, touching only what differs.
    ///
    /// Children are matched by position. A pair is kept when both are text,
    /// or both are elements with the same name and `id` attribute; kept
    /// elements get their attributes synced and are patched recursively.
    /// Anything else is replaced by a copy of the new node.
    pub fn patch(&mut self, markup: &str) -> Result<PatchStats, DomError> {
        let source = Self::parse(markup)?;
        let mut stats = PatchStats::default();
        self.morph(self.root, &source, source.root, &mut stats);
        Ok(stats)
    }

    fn morph(&mut self, target: NodeId, source: &Self, from: NodeId, stats: &mut PatchStats) {
        let current = self.children(target).to_vec();
        let wanted = source.children(from);

        for (index, &incoming) in wanted.iter().enumerate() {
            let Some(&existing) = current.get(index) else {
                let copy = self.copy_from(source, incoming, target);
                self.attach(target, copy, None);
                stats.inserted += 1;
                continue;
            };

            if !self.same_node(existing, source, incoming) {
                let copy = self.copy_from(source, incoming, target);
                if let Some(slot) = self.slot_mut(target) {
                    slot.children[index] = copy;
                }
                self.drop_subtree(existing);
                stats.replaced += 1;
                continue;
            }

            let Some(new_kind) = source.kind(incoming) else {
                continue;
            };
            if let Some(slot) = self.slot_mut(existing)
                && slot.kind != *new_kind
            {
                slot.kind = new_kind.clone();
                stats.updated += 1;
            }
            if matches!(new_kind, NodeKind::Element { .. }) {
                self.morph(existing, source, incoming, stats);
            }
        }

        for &extra in current.iter().skip(wanted.len()) {
            if let Some(slot) = self.slot_mut(target) {
                slot.children.retain(|&child| child != extra);
            }
            self.drop_subtree(extra);
            stats.removed += 1;
        }
    }

    fn same_node(&self, existing: NodeId, source: &Self, incoming: NodeId) -> bool {
        match (self.kind(existing), source.kind(incoming)) {
            (Some(NodeKind::Text(_)), Some(NodeKind::Text(_))) => true,
            (
                Some(NodeKind::Element { name: a, .. }),
                Some(NodeKind::Element { name: b, .. }),
            ) => a == b && self.attribute(existing, "id") == source.attribute(incoming, "id"),
            _ => false,
        }
    }

    /// Copy node `from` of `source`, with its subtree, below `parent`.
    /// The copy is not attached.
    fn copy_from(&mut self, source: &Self, from: NodeId, parent: NodeId) -> NodeId {
        let kind = source
            .kind(from)
            .cloned()
            .unwrap_or(NodeKind::Text(String::new()));
        let id = self.alloc(kind, Some(parent));
        for &child in source.children(from) {
            let copy = self.copy_from(source, child, id);
            self.attach(id, copy, None);
        }
        id
    }

    fn drop_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            if let Some(slot) = self.slots.get_mut(next).and_then(Option::take) {
                stack.extend(slot.children);
                self.free.push(next);
            }
            if self.focus == Some(next) {
                self.focus = None;
            }
        }
    }

    /// Serialize the tree.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for &child in self.children(self.root) {
            self.render_node(child, &mut out);
        }
        out
    }

    fn render_node(&self, id: NodeId, out: &mut String) {
        match self.kind(id) {
            Some(NodeKind::Text(text)) => out.push_str(text),
            Some(NodeKind::Element { name, attributes }) => {
                out.push('<');
                out.push_str(name);
                for (attr, value) in attributes {
                    match value {
                        Some(value) => {
                            let _ = write!(out, " {attr}=\"{}\"", value.replace('"', "&quot;"));
                        }
                        None => {
                            let _ = write!(out, " {attr}");
                        }
                    }
                }
                out.push('>');
                if VOID_ELEMENTS.contains(&name.as_str()) {
                    return;
                }
                for &child in self.children(id) {
                    self.render_node(child, out);
                }
                let _ = write!(out, "</{name}>");
            }
            None => {}
        }
    }
}

fn collect_attributes(attributes: &tl::Attributes<'_>) -> Vec<(String, Option<String>)> {
    let mut out: Vec<(String, Option<String>)> = Vec::new();
    let mut push = |name: String, value: Option<String>| {
        if !out.iter().any(|(n, _)| *n == name) {
            out.push((name, value));
        }
    };

    for (name, value) in attributes.iter() {
        push(name.to_ascii_lowercase(), value.map(std::borrow::Cow::into_owned));
    }
    // `id` and `class` are kept apart by the parser.
    for name in ["id", "class"] {
        if let Some(value) = attributes.get(name) {
            push(name.to_owned(), value.map(|v| v.as_utf8_str().into_owned()));
        }
    }
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_and_render() {
        let doc = Document::parse(r#"<p class="lead">Hello <b>world</b></p>"#).unwrap();
        assert_eq!(doc.render(), r#"<p class="lead">Hello <b>world</b></p>"#);
        let p = doc.elements_by_name("p")[0];
        assert_eq!(doc.attribute(p, "class"), Some("lead"));
        assert_eq!(doc.text_content(p), "Hello world");
    }

    #[test]
    fn test_patch_keeps_focused_input() {
        let mut doc =
            Document::parse(r#"<form><input id="q" type="text" /><p>old</p></form>"#).unwrap();
        let input = doc.element_by_id("q").unwrap();
        assert!(doc.focus(input));

        let stats = doc
            .patch(r#"<form><input id="q" type="text" /><p>new</p></form>"#)
            .unwrap();

        assert_eq!(doc.focused(), Some(input));
        assert_eq!(doc.element_by_id("q"), Some(input));
        let p = doc.elements_by_name("p")[0];
        assert_eq!(doc.text_content(p), "new");
        assert_eq!(
            stats,
            PatchStats {
                updated: 1,
                ..PatchStats::default()
            }
        );
    }

    #[test]
    fn test_identical_patch_changes_nothing() {
        let markup = "<ul><li>a</li><li>b</li></ul>";
        let mut doc = Document::parse(markup).unwrap();
        assert!(doc.patch(markup).unwrap().is_empty());
    }

    #[test]
    fn test_attribute_change_updates_in_place() {
        let mut doc = Document::parse(r#"<div id="box" class="a">x</div>"#).unwrap();
        let before = doc.element_by_id("box").unwrap();
        doc.patch(r#"<div id="box" class="b">x</div>"#).unwrap();
        assert_eq!(doc.element_by_id("box"), Some(before));
        assert_eq!(doc.attribute(before, "class"), Some("b"));
    }

    #[test]
    fn test_different_element_is_replaced_and_focus_dropped() {
        let mut doc = Document::parse(r#"<input id="q" /><p>a</p>"#).unwrap();
        let input = doc.element_by_id("q").unwrap();
        doc.focus(input);

        let stats = doc.patch("<span>q</span><p>a</p>").unwrap();
        assert_eq!(stats.replaced, 1);
        assert!(!doc.contains(input));
        assert_eq!(doc.focused(), None);
    }

    #[test]
    fn test_children_appended_and_removed() {
        let mut doc = Document::parse("<ul><li>a</li></ul>").unwrap();
        let stats = doc.patch("<ul><li>a</li><li>b</li></ul>").unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(doc.render(), "<ul><li>a</li><li>b</li></ul>");

        let stats = doc.patch("<ul></ul>").unwrap();
        assert_eq!(stats.removed, 2);
        assert_eq!(doc.render(), "<ul></ul>");
    }

    #[test]
    fn test_repeated_patches_reuse_slots() {
        let mut doc = Document::parse("<main><p>a</p></main>").unwrap();
        doc.patch("<main><span>b</span></main>").unwrap();
        let settled = doc.slots.len();

        for n in 0..100 {
            let markup = if n % 2 == 0 {
                "<main><p>a</p></main>"
            } else {
                "<main><span>b</span></main>"
            };
            doc.patch(markup).unwrap();
        }
        assert_eq!(doc.slots.len(), settled);
        assert_eq!(doc.render(), "<main><span>b</span></main>");
    }

    #[test]
    fn test_too_deep_markup_is_rejected() {
        let markup = format!(
            "{}{}",
            "<div>".repeat(MAX_DEPTH + 1),
            "</div>".repeat(MAX_DEPTH + 1)
        );
        assert!(matches!(Document::parse(&markup), Err(DomError::TooDeep)));
    }

    #[test]
    fn test_set_attribute() {
        let mut doc = Document::parse(r#"<link rel="stylesheet" href="a.css" />"#).unwrap();
        let link = doc.elements_by_name("link")[0];
        assert!(doc.set_attribute(link, "href", "a.css?v=2"));
        assert_eq!(doc.attribute(link, "href"), Some("a.css?v=2"));
    }
}
