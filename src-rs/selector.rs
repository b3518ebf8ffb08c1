//! Selector synthesis: a CSS path that re-locates the same element later.

use crate::dom::{Document, NodeId};
use crate::query::{css_string, is_css_ident};

/// Builds a selector for `id`, preferring the explicit marker, then the DOM
/// id, then an ancestor path. Marker and id are only used while they are
/// unique in the document; the result resolves to exactly `id` at the time it
/// is generated.
pub fn synthesize_selector(doc: &Document, id: NodeId, marker_attribute: &str) -> String {
    let node = doc.node(id);

    if let Some(marker) = node.attr(marker_attribute).filter(|v| !v.trim().is_empty()) {
        if doc.attr_count(marker_attribute, marker) == 1 {
            return format!("[{marker_attribute}={}]", css_string(marker));
        }
    }

    if let Some(dom_id) = node.attr("id").filter(|v| !v.trim().is_empty()) {
        if doc.attr_count("id", dom_id) == 1 {
            return if is_css_ident(dom_id) {
                format!("#{dom_id}")
            } else {
                format!("[id={}]", css_string(dom_id))
            };
        }
    }

    path_selector(doc, id)
}

fn path_selector(doc: &Document, id: NodeId) -> String {
    if id == doc.root() {
        return doc.node(id).tag.clone();
    }

    let mut chain = vec![id];
    chain.extend(doc.ancestors(id));

    let mut segments: Vec<String> = chain
        .iter()
        .rev()
        .map(|current| path_segment(doc, *current))
        .collect();

    let mut selector = segments.join(" > ");
    let top = chain[chain.len() - 1];
    // The path is only anchored at the root when the top segment is unique on
    // its own; otherwise pin it to the root element explicitly.
    let anchored = doc.parent(top) == Some(doc.root())
        && doc
            .query_selector_all(&segments[0])
            .map(|hits| hits.len() == 1)
            .unwrap_or(false);
    if !anchored {
        segments.insert(0, doc.node(doc.root()).tag.clone());
        selector = segments.join(" > ");
    }
    selector
}

fn path_segment(doc: &Document, id: NodeId) -> String {
    let node = doc.node(id);
    let mut segment = node.tag.clone();
    if let Some(class) = node
        .classes()
        .find(|class| is_css_ident(class) && doc.class_count(class) == 1)
    {
        segment.push('.');
        segment.push_str(class);
    }
    if doc.siblings_with_tag(id) > 1 {
        segment.push_str(&format!(":nth-child({})", doc.nth_child(id)));
    }
    segment
}
