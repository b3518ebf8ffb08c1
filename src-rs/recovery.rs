//! Similarity-based recovery for anchors whose selector stopped resolving.
//!
//! Output is advisory: suggestions are ranked for an operator, nothing is
//! repointed automatically.

use serde::Serialize;
use tracing::debug;

use crate::anchor::{describe_element, Anchor, AnchorCandidate, SimilarityScore};
use crate::config::{RecoveryConfig, TourConfig};
use crate::dom::{Document, NodeId};
use crate::metadata::normalize_whitespace;

pub const INTERACTIVE_TAGS: &[&str] = &["button", "a", "input", "select", "textarea", "summary"];

pub const INTERACTIVE_ROLES: &[&str] = &[
    "button",
    "link",
    "tab",
    "menuitem",
    "checkbox",
    "radio",
    "switch",
    "textbox",
    "searchbox",
    "combobox",
    "listbox",
    "option",
    "slider",
];

pub fn is_interactive(doc: &Document, id: NodeId, marker_attribute: &str) -> bool {
    let node = doc.node(id);
    INTERACTIVE_TAGS.contains(&node.tag.as_str())
        || node.attr(marker_attribute).is_some()
        || node
            .attr("role")
            .is_some_and(|r| INTERACTIVE_ROLES.contains(&r.trim().to_ascii_lowercase().as_str()))
}

/// Every element a stored anchor could plausibly have moved to, in document order.
pub fn selectable_elements(doc: &Document, marker_attribute: &str) -> Vec<NodeId> {
    doc.elements()
        .into_iter()
        .filter(|id| is_interactive(doc, *id, marker_attribute))
        .collect()
}

/// Character-level edit distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// `1 - distance / max_len`, clamped to `[0, 1]`; two empty strings score 1.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_whitespace(a).to_lowercase();
    let b = normalize_whitespace(b).to_lowercase();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    (1.0 - levenshtein(&a, &b) as f64 / max_len as f64).clamp(0.0, 1.0)
}

fn candidate_text(candidate: &AnchorCandidate) -> &str {
    let meta = &candidate.metadata;
    if !meta.visible_text.is_empty() {
        return &meta.visible_text;
    }
    meta.aria_label
        .as_deref()
        .or(meta.placeholder.as_deref())
        .or(meta.title.as_deref())
        .unwrap_or_default()
}

pub fn score_candidate(
    anchor: &Anchor,
    candidate: &AnchorCandidate,
    config: &RecoveryConfig,
) -> SimilarityScore {
    let text = text_similarity(&anchor.friendly_name, candidate_text(candidate));
    let role = if candidate.kind == anchor.kind { 1.0 } else { 0.0 };
    // No original coordinates are stored with an anchor.
    let position = config.neutral_position;
    let total =
        config.text_weight * text + config.role_weight * role + config.position_weight * position;
    SimilarityScore {
        text,
        role,
        position,
        total,
    }
}

pub fn describe_reason(score: &SimilarityScore, config: &RecoveryConfig) -> String {
    let mut reasons = Vec::new();
    if score.text > config.text_reason_threshold {
        reasons.push("similar text");
    }
    if score.role > config.role_reason_threshold {
        reasons.push("same type");
    }
    if score.position > config.position_reason_threshold {
        reasons.push("nearby position");
    }
    if reasons.is_empty() {
        "partial match".to_string()
    } else {
        reasons.join(", ")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySuggestion {
    pub candidate: AnchorCandidate,
    pub score: SimilarityScore,
    pub reason: String,
}

/// Ranks every selectable element against `anchor`. Survivors score above
/// the configured floor; at most `max_suggestions` are returned, best first.
pub fn suggest_replacements(
    doc: &Document,
    route: &str,
    anchor: &Anchor,
    config: &TourConfig,
) -> Vec<RecoverySuggestion> {
    let rc = &config.recovery;
    let mut ranked: Vec<RecoverySuggestion> = selectable_elements(doc, &config.marker_attribute)
        .into_iter()
        .map(|id| {
            let mut candidate = describe_element(doc, id, route, config);
            let score = score_candidate(anchor, &candidate, rc);
            candidate.score = Some(score);
            RecoverySuggestion {
                reason: describe_reason(&score, rc),
                candidate,
                score,
            }
        })
        .filter(|s| s.score.total > rc.min_total)
        .collect();
    // Stable sort keeps document order among equal scores.
    ranked.sort_by(|a, b| b.score.total.total_cmp(&a.score.total));
    ranked.truncate(rc.max_suggestions);
    debug!(
        anchor_id = %anchor.anchor_id,
        suggestions = ranked.len(),
        "ranked recovery candidates"
    );
    ranked
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// The stored selector still resolves; nothing to recover.
    Resolved { selector: String },
    Suggestions { suggestions: Vec<RecoverySuggestion> },
}

/// Recovery only runs when the stored selector resolves to nothing. A
/// selector that no longer parses counts as not resolving.
pub fn recover_anchor(
    doc: &Document,
    route: &str,
    anchor: &Anchor,
    config: &TourConfig,
) -> RecoveryOutcome {
    let resolved = doc
        .query_selector(&anchor.selector)
        .ok()
        .flatten()
        .is_some();
    if resolved {
        return RecoveryOutcome::Resolved {
            selector: anchor.selector.clone(),
        };
    }
    RecoveryOutcome::Suggestions {
        suggestions: suggest_replacements(doc, route, anchor, config),
    }
}
