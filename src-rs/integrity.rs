//! Operator actions on stored anchors: archival and integrity checks.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::info;

use crate::anchor::{Anchor, AnchorPatch, ARCHIVED_TAG};
use crate::config::ValidationConfig;
use crate::dom::Document;
use crate::error::{TourError, TourResult};
use crate::store::AnchorStore;

pub const ISSUE_INVALID_SELECTOR: &str = "invalid selector";
pub const ISSUE_MISSING_THUMBNAIL: &str = "missing thumbnail";
pub const ISSUE_NEVER_VERIFIED: &str = "never verified";
pub const ISSUE_STALE_VERIFICATION: &str = "verification is stale";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveResult {
    pub anchor: Anchor,
    /// False when the anchor was already archived.
    pub changed: bool,
}

/// Tags the anchor as archived. Archiving twice is a no-op.
pub fn archive(store: &mut dyn AnchorStore, anchor_id: &str) -> TourResult<ArchiveResult> {
    let anchor = store
        .get_by_anchor_id(anchor_id)?
        .ok_or_else(|| TourError::NotFound(anchor_id.to_string()))?;
    if anchor.is_archived() {
        return Ok(ArchiveResult {
            anchor,
            changed: false,
        });
    }
    let mut tags = anchor.tags.clone();
    tags.insert(ARCHIVED_TAG.to_string());
    let anchor = store.update(
        &anchor.id,
        &AnchorPatch {
            tags: Some(tags),
            ..AnchorPatch::default()
        },
    )?;
    info!(anchor_id, "archived anchor");
    Ok(ArchiveResult {
        anchor,
        changed: true,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub issues: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationReport {
    fn flag(&mut self, issue: &str, suggestion: &str) {
        self.issues.push(issue.to_string());
        self.suggestions.push(suggestion.to_string());
    }
}

pub fn validate(
    anchor: &Anchor,
    doc: &Document,
    now: DateTime<Utc>,
    config: &ValidationConfig,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    let resolves = !anchor.selector.trim().is_empty()
        && matches!(doc.query_selector(&anchor.selector), Ok(Some(_)));
    if !resolves {
        report.flag(ISSUE_INVALID_SELECTOR, "reindex the route to refresh the selector");
    }

    if anchor.thumb_url.as_deref().map_or(true, str::is_empty) {
        report.flag(ISSUE_MISSING_THUMBNAIL, "regenerate the thumbnail");
    }

    match anchor.last_verified_at {
        None => report.flag(ISSUE_NEVER_VERIFIED, "re-verify the anchor in the running app"),
        Some(at) if now - at > Duration::days(config.verify_max_age_days) => {
            report.flag(ISSUE_STALE_VERIFICATION, "re-verify the anchor in the running app")
        }
        Some(_) => {}
    }

    report.is_valid = report.issues.is_empty();
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::AnchorKind;
    use crate::store::MemoryStore;
    use crate::testing::{at, draft, page_from_json};
    use serde_json::json;

    fn doc() -> Document {
        page_from_json(json!({
            "tag": "body",
            "children": [{"tag": "button", "attrs": {"id": "save"}, "text": "Save"}]
        }))
        .document
    }

    #[test]
    fn archive_is_idempotent() {
        let mut store = MemoryStore::new();
        store
            .create(draft("/", "home.content.save-button", AnchorKind::Button, "#save"))
            .unwrap();
        let first = archive(&mut store, "home.content.save-button").unwrap();
        assert!(first.changed);
        assert!(first.anchor.is_archived());
        let second = archive(&mut store, "home.content.save-button").unwrap();
        assert!(!second.changed);
        assert_eq!(second.anchor.tags.len(), 1);
        assert!(matches!(
            archive(&mut store, "missing"),
            Err(TourError::NotFound(_))
        ));
    }

    #[test]
    fn healthy_anchor_is_valid() {
        let mut anchor = crate::anchor::Anchor::from_draft(
            "anc-1".to_string(),
            draft("/", "home.content.save-button", AnchorKind::Button, "#save"),
        );
        anchor.thumb_url = Some("thumbnails/home/home.content.save-button.png".to_string());
        anchor.last_verified_at = Some(at(2026, 3, 1));
        let report = validate(&anchor, &doc(), at(2026, 3, 20), &ValidationConfig::default());
        assert!(report.is_valid);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn every_problem_is_reported_with_a_suggestion() {
        let anchor = crate::anchor::Anchor::from_draft(
            "anc-1".to_string(),
            draft("/", "home.content.gone-button", AnchorKind::Button, "#gone"),
        );
        let report = validate(&anchor, &doc(), at(2026, 3, 20), &ValidationConfig::default());
        assert!(!report.is_valid);
        assert_eq!(
            report.issues,
            vec![ISSUE_INVALID_SELECTOR, ISSUE_MISSING_THUMBNAIL, ISSUE_NEVER_VERIFIED]
        );
        assert_eq!(report.suggestions.len(), 3);
        assert!(report.suggestions[0].contains("reindex"));
    }

    #[test]
    fn stale_verification_and_broken_selector_syntax() {
        let mut anchor = crate::anchor::Anchor::from_draft(
            "anc-1".to_string(),
            draft("/", "home.content.save-button", AnchorKind::Button, "button[[["),
        );
        anchor.thumb_url = Some("x.png".to_string());
        anchor.last_verified_at = Some(at(2026, 1, 1));
        let report = validate(&anchor, &doc(), at(2026, 3, 1), &ValidationConfig::default());
        assert_eq!(report.issues, vec![ISSUE_INVALID_SELECTOR, ISSUE_STALE_VERIFICATION]);
    }
}
