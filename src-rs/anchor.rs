//! Persistent anchor records and the transient candidates they are built from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::TourConfig;
use crate::dom::{Document, NodeId, Rect};
use crate::kind::{classify, AnchorKind};
use crate::metadata::{extract_metadata, ElementMetadata};
use crate::naming::{friendly_name, generate_anchor_id};

pub const ARCHIVED_TAG: &str = "archived";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anchor {
    /// Store record id.
    pub id: String,
    pub route: String,
    pub anchor_id: String,
    pub friendly_name: String,
    pub kind: AnchorKind,
    pub selector: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub thumb_url: Option<String>,
    #[serde(default)]
    pub last_verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

impl Anchor {
    pub fn from_draft(id: String, draft: AnchorDraft) -> Self {
        Self {
            id,
            route: draft.route,
            anchor_id: draft.anchor_id,
            friendly_name: draft.friendly_name,
            kind: draft.kind,
            selector: draft.selector,
            width: draft.width,
            height: draft.height,
            thumb_url: draft.thumb_url,
            last_verified_at: draft.last_verified_at,
            tags: draft.tags,
            updated_at: draft.updated_at,
        }
    }

    pub fn is_archived(&self) -> bool {
        self.tags.contains(ARCHIVED_TAG)
    }

    pub fn apply(&mut self, patch: &AnchorPatch) {
        if let Some(v) = &patch.friendly_name {
            self.friendly_name = v.clone();
        }
        if let Some(v) = patch.kind {
            self.kind = v;
        }
        if let Some(v) = &patch.selector {
            self.selector = v.clone();
        }
        if let Some(v) = patch.width {
            self.width = v;
        }
        if let Some(v) = patch.height {
            self.height = v;
        }
        if let Some(v) = &patch.thumb_url {
            self.thumb_url = v.clone();
        }
        if let Some(v) = patch.last_verified_at {
            self.last_verified_at = Some(v);
        }
        if let Some(v) = &patch.tags {
            self.tags = v.clone();
        }
        if let Some(v) = patch.updated_at {
            self.updated_at = v;
        }
    }
}

/// A record that has not been assigned a store id yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorDraft {
    pub route: String,
    pub anchor_id: String,
    pub friendly_name: String,
    pub kind: AnchorKind,
    pub selector: String,
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub thumb_url: Option<String>,
    #[serde(default)]
    pub last_verified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update. `None` leaves a field untouched; `thumb_url: Some(None)`
/// clears the thumbnail.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<AnchorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb_url: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_verified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl AnchorPatch {
    pub fn verified(at: DateTime<Utc>) -> Self {
        Self {
            last_verified_at: Some(at),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityScore {
    pub text: f64,
    pub role: f64,
    pub position: f64,
    pub total: f64,
}

/// A live element run through the extraction pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorCandidate {
    #[serde(skip)]
    pub node: NodeId,
    pub metadata: ElementMetadata,
    pub bbox: Rect,
    pub selector: String,
    pub kind: AnchorKind,
    pub anchor_id: String,
    pub friendly_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<SimilarityScore>,
}

impl AnchorCandidate {
    pub fn to_draft(&self, route: &str, now: DateTime<Utc>) -> AnchorDraft {
        AnchorDraft {
            route: route.to_string(),
            anchor_id: self.anchor_id.clone(),
            friendly_name: self.friendly_name.clone(),
            kind: self.kind,
            selector: self.selector.clone(),
            width: box_dimension(self.bbox.width),
            height: box_dimension(self.bbox.height),
            thumb_url: None,
            last_verified_at: Some(now),
            tags: BTreeSet::new(),
            updated_at: now,
        }
    }
}

/// Metadata -> kind -> selector -> anchor id -> friendly name.
pub fn describe_element(
    doc: &Document,
    id: NodeId,
    route: &str,
    config: &TourConfig,
) -> AnchorCandidate {
    let metadata = extract_metadata(doc, id, config);
    let kind = classify(&metadata);
    let anchor_id = generate_anchor_id(doc, id, route, &metadata, kind, config);
    let name = friendly_name(&metadata, kind, config);
    AnchorCandidate {
        node: id,
        bbox: doc.node(id).rect,
        selector: metadata.synthesized_selector.clone(),
        kind,
        anchor_id,
        friendly_name: name,
        metadata,
        score: None,
    }
}

pub fn box_dimension(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.round().min(u32::MAX as f64) as u32
    } else {
        0
    }
}
