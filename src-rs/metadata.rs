//! Structural and accessibility metadata read off a single element.

use serde::{Deserialize, Serialize};

use crate::config::TourConfig;
use crate::dom::{Document, NodeId};
use crate::selector::synthesize_selector;

const INPUT_LIKE_TAGS: &[&str] = &["input", "textarea", "select"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementMetadata {
    pub tag_name: String,
    pub visible_text: String,
    pub aria_label: Option<String>,
    pub title: Option<String>,
    pub placeholder: Option<String>,
    pub role: Option<String>,
    pub class_name: String,
    pub dom_id: String,
    pub explicit_tour_id: Option<String>,
    pub synthesized_selector: String,
    /// `type` attribute of `<input>` elements.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
}

pub fn extract_metadata(doc: &Document, id: NodeId, config: &TourConfig) -> ElementMetadata {
    let node = doc.node(id);
    let attr = |name: &str| {
        node.attr(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    let placeholder = attr("placeholder");
    let raw_text = if INPUT_LIKE_TAGS.contains(&node.tag.as_str()) {
        placeholder
            .clone()
            .or_else(|| node.value.clone())
            .unwrap_or_default()
    } else {
        doc.text_content(id)
    };

    ElementMetadata {
        tag_name: node.tag.clone(),
        visible_text: truncate_chars(&normalize_whitespace(&raw_text), config.text_limit),
        aria_label: attr("aria-label"),
        title: attr("title"),
        placeholder,
        role: attr("role"),
        class_name: node.attr("class").unwrap_or_default().to_string(),
        dom_id: node.attr("id").unwrap_or_default().to_string(),
        explicit_tour_id: attr(&config.marker_attribute),
        synthesized_selector: synthesize_selector(doc, id, &config.marker_attribute),
        input_type: (node.tag == "input").then(|| attr("type")).flatten(),
    }
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn truncate_chars(input: &str, limit: usize) -> String {
    input.chars().take(limit).collect()
}

/// Cuts to `limit` characters, ending with `...` when something was dropped.
pub fn ellipsize(input: &str, limit: usize) -> String {
    if input.chars().count() <= limit {
        return input.to_string();
    }
    let keep = limit.saturating_sub(3);
    let mut out: String = input.chars().take(keep).collect();
    out.truncate(out.trim_end().len());
    out.push_str("...");
    out
}
