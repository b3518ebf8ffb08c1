//! Fixtures shared by the unit tests.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use std::collections::BTreeSet;

use crate::anchor::AnchorDraft;
use crate::dom::{Document, NodeId, Page, Viewport};
use crate::kind::AnchorKind;

pub const TEST_URL: &str = "https://app.example.com/";

/// Page at [`TEST_URL`] with the default viewport, built from a root node.
pub fn page_from_json(root: Value) -> Page {
    page_at(TEST_URL, root, Viewport::default())
}

pub fn page_at(url: &str, root: Value, viewport: Viewport) -> Page {
    let snap = serde_json::from_value(root).expect("valid node snapshot");
    Page::new(url, Document::from_snapshot(snap), viewport)
}

pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
}

/// First element whose attribute `name` equals `value`.
pub fn find(doc: &Document, name: &str, value: &str) -> NodeId {
    doc.elements()
        .into_iter()
        .find(|id| doc.node(*id).attr(name) == Some(value))
        .unwrap_or_else(|| panic!("no element with {name}={value}"))
}

pub fn draft(route: &str, anchor_id: &str, kind: AnchorKind, selector: &str) -> AnchorDraft {
    AnchorDraft {
        route: route.to_string(),
        anchor_id: anchor_id.to_string(),
        friendly_name: anchor_id.rsplit('.').next().unwrap_or_default().to_string(),
        kind,
        selector: selector.to_string(),
        width: 100,
        height: 40,
        thumb_url: None,
        last_verified_at: None,
        tags: BTreeSet::new(),
        updated_at: at(2026, 1, 1),
    }
}
