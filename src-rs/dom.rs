//! Page snapshot model: an arena of element nodes plus the viewport they are
//! rendered in.
//!
//! Everything that the browser would normally provide as ambient state
//! (scroll offsets, the document root, layout boxes) is carried explicitly so
//! the anchor pipeline can run against recorded snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::TourError;

/// Upper bound on any ancestor walk. Snapshots deeper than this are malformed.
pub const MAX_ANCESTOR_DEPTH: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    #[serde(alias = "w")]
    pub width: f64,
    #[serde(alias = "h")]
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    pub fn translate(&self, dx: f64, dy: f64) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    pub fn inflate(&self, pad: f64) -> Self {
        Self::new(
            self.x - pad,
            self.y - pad,
            self.width + pad * 2.0,
            self.height + pad * 2.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub scroll_x: f64,
    #[serde(default)]
    pub scroll_y: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 720.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }
}

/// Serialized form of one element and its subtree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub tag: String,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    /// The element's own text, excluding descendants.
    #[serde(default)]
    pub text: String,
    /// Current value for form controls.
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub rect: Option<Rect>,
    #[serde(default)]
    pub children: Vec<NodeSnapshot>,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub tag: String,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
    pub value: Option<String>,
    pub rect: Rect,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or_default().split_whitespace()
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes().any(|c| c == class)
    }
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Document {
    /// Builds the arena from a snapshot. A root that is not `html` gets wrapped
    /// in a synthetic `html` sentinel.
    pub fn from_snapshot(root: NodeSnapshot) -> Self {
        let root = if root.tag.eq_ignore_ascii_case("html") {
            root
        } else {
            NodeSnapshot {
                tag: "html".to_string(),
                rect: root.rect,
                children: vec![root],
                ..NodeSnapshot::default()
            }
        };

        let mut nodes: Vec<Node> = Vec::new();
        let mut stack: Vec<(NodeSnapshot, Option<NodeId>)> = vec![(root, None)];
        while let Some((snap, parent)) = stack.pop() {
            let id = NodeId(nodes.len());
            nodes.push(Node {
                tag: snap.tag.to_ascii_lowercase(),
                attrs: snap.attrs,
                text: snap.text,
                value: snap.value,
                rect: snap.rect.unwrap_or_default(),
                parent,
                children: Vec::new(),
            });
            if let Some(parent) = parent {
                nodes[parent.0].children.push(id);
            }
            for child in snap.children.into_iter().rev() {
                stack.push((child, Some(id)));
            }
        }
        // Children were linked in pop order, which is already document order.
        Self {
            nodes,
            root: NodeId(0),
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let snap: NodeSnapshot = serde_json::from_str(raw)?;
        Ok(Self::from_snapshot(snap))
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|n| n.parent)
    }

    /// Appends a fresh element under `parent` and returns its id.
    pub fn append_child(&mut self, parent: NodeId, snap: NodeSnapshot) -> NodeId {
        let sub = Document::from_snapshot(NodeSnapshot {
            tag: "html".to_string(),
            children: vec![snap],
            ..NodeSnapshot::default()
        });
        let offset = self.nodes.len() - 1;
        let mut first = None;
        for (index, mut node) in sub.nodes.into_iter().enumerate().skip(1) {
            node.parent = match node.parent {
                Some(NodeId(0)) | None => Some(parent),
                Some(NodeId(p)) => Some(NodeId(p + offset)),
            };
            node.children = node
                .children
                .iter()
                .map(|c| NodeId(c.0 + offset))
                .collect();
            let id = NodeId(index + offset);
            if first.is_none() {
                first = Some(id);
            }
            self.nodes.push(node);
        }
        let Some(first) = first else {
            return parent;
        };
        self.nodes[parent.0].children.push(first);
        first
    }

    /// Unlinks `id` from its parent. The node stays in the arena but is no
    /// longer reachable from the root.
    pub fn detach(&mut self, id: NodeId) {
        if let Some(parent) = self.parent(id) {
            self.nodes[parent.0].children.retain(|c| *c != id);
            self.nodes[id.0].parent = None;
        }
    }

    /// All attached elements in document (pre-)order, root included.
    pub fn elements(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            out.push(id);
            for child in self.node(id).children.iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Parent chain from `id` upward, stopping before the root sentinel.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut cursor = self.parent(id);
        while let Some(current) = cursor {
            if current == self.root || out.len() >= MAX_ANCESTOR_DEPTH {
                break;
            }
            out.push(current);
            cursor = self.parent(current);
        }
        out
    }

    pub fn is_attached(&self, id: NodeId) -> bool {
        if id == self.root {
            return true;
        }
        let mut cursor = self.parent(id);
        let mut hops = 0;
        while let Some(current) = cursor {
            if current == self.root {
                return true;
            }
            hops += 1;
            if hops > MAX_ANCESTOR_DEPTH {
                return false;
            }
            cursor = self.parent(current);
        }
        false
    }

    /// Own text followed by every descendant's text, space separated.
    pub fn text_content(&self, id: NodeId) -> String {
        let mut parts: Vec<&str> = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let node = self.node(current);
            if !node.text.is_empty() {
                parts.push(&node.text);
            }
            for child in node.children.iter().rev() {
                stack.push(*child);
            }
        }
        parts.join(" ")
    }

    /// 1-based position among the parent's element children.
    pub fn nth_child(&self, id: NodeId) -> usize {
        match self.parent(id) {
            Some(parent) => self
                .node(parent)
                .children
                .iter()
                .position(|c| *c == id)
                .map(|p| p + 1)
                .unwrap_or(1),
            None => 1,
        }
    }

    pub fn siblings_with_tag(&self, id: NodeId) -> usize {
        let tag = &self.node(id).tag;
        match self.parent(id) {
            Some(parent) => self
                .node(parent)
                .children
                .iter()
                .filter(|c| &self.node(**c).tag == tag)
                .count(),
            None => 1,
        }
    }

    pub fn class_count(&self, class: &str) -> usize {
        self.elements()
            .into_iter()
            .filter(|id| self.node(*id).has_class(class))
            .count()
    }

    pub fn attr_count(&self, name: &str, value: &str) -> usize {
        self.elements()
            .into_iter()
            .filter(|id| self.node(*id).attr(name) == Some(value))
            .count()
    }

    /// Extent of the laid-out page.
    pub fn height(&self) -> f64 {
        self.elements()
            .into_iter()
            .map(|id| self.node(id).rect.bottom())
            .fold(0.0, f64::max)
    }
}

/// The ambient browser capabilities the positioning code needs.
pub trait ViewportContext {
    fn document(&self) -> &Document;

    fn viewport(&self) -> Viewport;

    fn scroll_to(&mut self, x: f64, y: f64);

    /// Element box relative to the viewport (document box minus scroll).
    fn client_rect(&self, id: NodeId) -> Rect {
        let vp = self.viewport();
        self.document()
            .node(id)
            .rect
            .translate(-vp.scroll_x, -vp.scroll_y)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub url: String,
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub viewport: Viewport,
    /// Full-page screenshot at 1 px per CSS px, relative to the snapshot file.
    #[serde(default)]
    pub screenshot: Option<PathBuf>,
    pub root: NodeSnapshot,
}

/// A live page: document, viewport state, and an optional full-page raster.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: String,
    pub route: String,
    pub document: Document,
    pub viewport: Viewport,
    pub screenshot: Option<PathBuf>,
}

impl Page {
    pub fn new(url: &str, document: Document, viewport: Viewport) -> Self {
        Self {
            url: url.to_string(),
            route: route_from_url(url),
            document,
            viewport,
            screenshot: None,
        }
    }

    pub fn from_snapshot(snap: PageSnapshot, base_dir: Option<&Path>) -> Self {
        let route = snap
            .route
            .clone()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| route_from_url(&snap.url));
        let screenshot = snap.screenshot.map(|p| match base_dir {
            Some(base) if p.is_relative() => base.join(p),
            _ => p,
        });
        Self {
            url: snap.url,
            route,
            document: Document::from_snapshot(snap.root),
            viewport: snap.viewport,
            screenshot,
        }
    }

    pub fn load(path: &Path) -> Result<Self, TourError> {
        let raw = fs::read_to_string(path).map_err(|err| {
            TourError::Config(format!("failed to read page {}: {err}", path.display()))
        })?;
        let snap: PageSnapshot = serde_json::from_str(&raw).map_err(|err| {
            TourError::Config(format!("invalid page snapshot {}: {err}", path.display()))
        })?;
        Ok(Self::from_snapshot(snap, path.parent()))
    }

    pub fn origin(&self) -> String {
        origin_from_url(&self.url)
    }

    pub fn set_viewport_size(&mut self, width: f64, height: f64) {
        self.viewport.width = width;
        self.viewport.height = height;
        let (x, y) = (self.viewport.scroll_x, self.viewport.scroll_y);
        self.scroll_to(x, y);
    }
}

impl ViewportContext for Page {
    fn document(&self) -> &Document {
        &self.document
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn scroll_to(&mut self, x: f64, y: f64) {
        let max_y = (self.document.height() - self.viewport.height).max(0.0);
        let max_x = (self.document.node(self.document.root()).rect.width - self.viewport.width)
            .max(0.0);
        self.viewport.scroll_x = x.clamp(0.0, max_x);
        self.viewport.scroll_y = y.clamp(0.0, max_y);
    }
}

/// Origin of a URL with no host, e.g. `about:blank` or `data:`.
pub const OPAQUE_ORIGIN: &str = "null";

/// Serialized origin of a URL, normalized the way browsers compare them
/// (lowercase host, default port dropped, no userinfo). Unparseable or
/// opaque URLs give [`OPAQUE_ORIGIN`].
pub fn origin_from_url(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => parsed.origin().ascii_serialization(),
        Err(_) => OPAQUE_ORIGIN.to_string(),
    }
}

/// Path component of a URL without query or fragment. Relative references
/// such as `/reports#top` are resolved against a placeholder base.
pub fn route_from_url(url: &str) -> String {
    let parsed = Url::parse(url).or_else(|_| {
        Url::parse("http://localhost/").and_then(|base| base.join(url))
    });
    match parsed {
        Ok(parsed) if !parsed.path().is_empty() => parsed.path().to_string(),
        _ => "/".to_string(),
    }
}
