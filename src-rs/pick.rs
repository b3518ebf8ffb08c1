//! Element picking across a frame boundary.
//!
//! The embedding (parent) context drives the embedded page through a small
//! tagged message protocol. Every inbound message must come from the page's
//! own origin; everything else is dropped.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TourConfig;
use crate::dom::{NodeId, Page, Rect, ViewportContext, OPAQUE_ORIGIN};
use crate::error::{TourError, TourResult};
use crate::metadata::{extract_metadata, normalize_whitespace, ElementMetadata};
use crate::recovery::is_interactive;
use crate::scheduler::{Scheduler, TaskId};
use crate::spotlight::{resolve_target, SpotlightTarget};

/// Wire envelope: `{type, route, bbox?, meta?, anchorId?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PickMessage {
    PickStart {
        #[serde(default)]
        route: String,
    },
    PickStop {
        #[serde(default)]
        route: String,
    },
    AnchorCandidate {
        route: String,
        bbox: Rect,
        meta: ElementMetadata,
    },
    AnchorPicked {
        route: String,
        bbox: Rect,
        meta: ElementMetadata,
    },
    #[serde(rename_all = "camelCase")]
    AnchorHighlight {
        #[serde(default)]
        route: String,
        anchor_id: String,
    },
}

impl PickMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::PickStart { .. } => "PICK_START",
            Self::PickStop { .. } => "PICK_STOP",
            Self::AnchorCandidate { .. } => "ANCHOR_CANDIDATE",
            Self::AnchorPicked { .. } => "ANCHOR_PICKED",
            Self::AnchorHighlight { .. } => "ANCHOR_HIGHLIGHT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Accepted,
    /// Wrong origin.
    Rejected,
    /// Right origin, but not meaningful for the embedded page.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClickOutcome {
    /// Default action suppressed, element picked.
    Picked,
    PassThrough,
}

/// Marker, interactive tag or role, or real text plus a class or id.
pub fn is_selectable(page: &Page, id: NodeId, marker_attribute: &str) -> bool {
    let doc = &page.document;
    let node = doc.node(id);
    if matches!(node.tag.as_str(), "html" | "body") {
        return false;
    }
    if is_interactive(doc, id, marker_attribute) {
        return true;
    }
    let has_hook = node.attr("class").is_some_and(|c| !c.trim().is_empty())
        || node.attr("id").is_some_and(|i| !i.trim().is_empty());
    has_hook && normalize_whitespace(&doc.text_content(id)).chars().count() >= 2
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HoverFlush;

/// Child-side pick state for one page.
pub struct PickSession<'p> {
    page: &'p Page,
    config: TourConfig,
    origin: String,
    active: bool,
    clock: Scheduler<HoverFlush>,
    flush: Option<TaskId>,
    hovered: Option<NodeId>,
    last_candidate: Option<NodeId>,
    highlight: Option<Rect>,
    outbox: Vec<PickMessage>,
}

impl<'p> PickSession<'p> {
    pub fn new(page: &'p Page, config: &TourConfig) -> Self {
        Self {
            page,
            config: config.clone(),
            origin: page.origin(),
            active: false,
            clock: Scheduler::new(),
            flush: None,
            hovered: None,
            last_candidate: None,
            highlight: None,
            outbox: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn highlight(&self) -> Option<Rect> {
        self.highlight
    }

    pub fn outbox(&self) -> &[PickMessage] {
        &self.outbox
    }

    pub fn take_outbox(&mut self) -> Vec<PickMessage> {
        std::mem::take(&mut self.outbox)
    }

    pub fn receive(&mut self, origin: &str, message: PickMessage) -> Delivery {
        if self.origin == OPAQUE_ORIGIN || origin != self.origin {
            warn!(origin, expected = %self.origin, kind = message.type_name(), "rejected message");
            return Delivery::Rejected;
        }
        match message {
            PickMessage::PickStart { .. } => {
                if !self.active {
                    debug!(route = %self.page.route, "pick mode on");
                    self.active = true;
                }
                Delivery::Accepted
            }
            PickMessage::PickStop { .. } => {
                self.stop();
                Delivery::Accepted
            }
            PickMessage::AnchorHighlight { anchor_id, .. } => {
                let target = SpotlightTarget {
                    anchor_id,
                    selector: None,
                };
                let page = self.page;
                self.highlight = resolve_target(&page.document, &target, &self.config.marker_attribute)
                    .map(|node| page.client_rect(node));
                Delivery::Accepted
            }
            PickMessage::AnchorCandidate { .. } | PickMessage::AnchorPicked { .. } => Delivery::Ignored,
        }
    }

    /// Records the hover target. At most one candidate goes out per
    /// throttle window, for whatever was hovered last.
    pub fn hover(&mut self, node: NodeId) {
        if !self.active {
            return;
        }
        self.hovered = Some(node);
        if self.flush.is_none() {
            let window = Duration::from_millis(self.config.pick.hover_throttle_ms);
            self.flush = Some(self.clock.schedule(window, HoverFlush));
        }
    }

    pub fn click(&mut self, node: NodeId) -> ClickOutcome {
        if !self.active || !is_selectable(self.page, node, &self.config.marker_attribute) {
            return ClickOutcome::PassThrough;
        }
        let (bbox, meta) = self.describe(node);
        self.outbox.push(PickMessage::AnchorPicked {
            route: self.page.route.clone(),
            bbox,
            meta,
        });
        self.stop();
        ClickOutcome::Picked
    }

    pub fn key(&mut self, key: &str) {
        if self.active && key == self.config.pick.cancel_key {
            self.stop();
            self.outbox.push(PickMessage::PickStop {
                route: self.page.route.clone(),
            });
        }
    }

    /// Lets virtual time pass, firing any hover flush that falls due.
    pub fn advance(&mut self, delay: Duration) {
        let deadline = self.clock.now_ms() + delay.as_millis() as u64;
        while self.clock.next_due_ms().is_some_and(|due| due <= deadline) {
            if let Some((id, HoverFlush)) = self.clock.next_task() {
                if self.flush == Some(id) {
                    self.flush = None;
                }
                self.flush_hover();
            }
        }
        let remaining = deadline.saturating_sub(self.clock.now_ms());
        self.clock.advance(Duration::from_millis(remaining));
    }

    /// Leaves pick mode. Safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(id) = self.flush.take() {
            self.clock.cancel(id);
        }
        self.active = false;
        self.hovered = None;
        self.last_candidate = None;
    }

    fn flush_hover(&mut self) {
        let Some(node) = self.hovered else {
            return;
        };
        if !self.active
            || self.last_candidate == Some(node)
            || !is_selectable(self.page, node, &self.config.marker_attribute)
        {
            return;
        }
        let (bbox, meta) = self.describe(node);
        self.last_candidate = Some(node);
        self.outbox.push(PickMessage::AnchorCandidate {
            route: self.page.route.clone(),
            bbox,
            meta,
        });
    }

    fn describe(&self, node: NodeId) -> (Rect, ElementMetadata) {
        (
            self.page.client_rect(node),
            extract_metadata(&self.page.document, node, &self.config),
        )
    }
}

/// One entry of a recorded pick session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Message { origin: String, message: PickMessage },
    Hover { selector: String },
    Click { selector: String },
    Key { key: String },
    Wait { ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub outbound: Vec<PickMessage>,
    pub rejected: usize,
    pub active: bool,
    pub highlight: Option<Rect>,
}

/// Plays `events` against a fresh session. Pending hover flushes are
/// drained at the end.
pub fn replay(page: &Page, config: &TourConfig, events: &[SessionEvent]) -> TourResult<ReplayReport> {
    let mut session = PickSession::new(page, config);
    let mut rejected = 0;
    let find = |selector: &str| -> TourResult<NodeId> {
        page.document
            .query_selector(selector)?
            .ok_or_else(|| TourError::NotFound(selector.to_string()))
    };
    for event in events {
        match event {
            SessionEvent::Message { origin, message } => {
                if session.receive(origin, message.clone()) == Delivery::Rejected {
                    rejected += 1;
                }
            }
            SessionEvent::Hover { selector } => session.hover(find(selector)?),
            SessionEvent::Click { selector } => {
                session.click(find(selector)?);
            }
            SessionEvent::Key { key } => session.key(key),
            SessionEvent::Wait { ms } => session.advance(Duration::from_millis(*ms)),
        }
    }
    session.advance(Duration::from_millis(config.pick.hover_throttle_ms));
    Ok(ReplayReport {
        active: session.is_active(),
        highlight: session.highlight(),
        outbound: session.take_outbox(),
        rejected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Viewport;
    use crate::testing::{find, page_at, page_from_json, TEST_URL};
    use serde_json::json;

    const ORIGIN: &str = "https://app.example.com";

    fn page() -> Page {
        let mut page = page_from_json(json!({
            "tag": "body",
            "children": [
                {"tag": "button", "attrs": {"id": "save"}, "text": "Save",
                 "rect": {"x": 10, "y": 20, "w": 80, "h": 30}},
                {"tag": "div", "attrs": {"class": "card", "id": "summary"}, "text": "Monthly summary"},
                {"tag": "div", "attrs": {"id": "spacer"}},
                {"tag": "span", "attrs": {"data-tour-id": "balance"}, "text": "$0"},
                {"tag": "p", "attrs": {"id": "note"}, "text": "x"}
            ]
        }));
        page.route = "/transactions".to_string();
        page
    }

    fn start(session: &mut PickSession<'_>) {
        assert_eq!(
            session.receive(ORIGIN, PickMessage::PickStart { route: String::new() }),
            Delivery::Accepted
        );
    }

    #[test]
    fn wire_format() {
        let msg: PickMessage =
            serde_json::from_value(json!({"type": "ANCHOR_HIGHLIGHT", "route": "/", "anchorId": "home.x"})).unwrap();
        assert_eq!(
            msg,
            PickMessage::AnchorHighlight { route: "/".to_string(), anchor_id: "home.x".to_string() }
        );
        let start: PickMessage = serde_json::from_value(json!({"type": "PICK_START"})).unwrap();
        assert_eq!(start.type_name(), "PICK_START");
        let out = serde_json::to_value(PickMessage::PickStop { route: "/a".to_string() }).unwrap();
        assert_eq!(out, json!({"type": "PICK_STOP", "route": "/a"}));
    }

    #[test]
    fn selectable_filter() {
        let page = page();
        let doc = &page.document;
        let marker = "data-tour-id";
        assert!(is_selectable(&page, find(doc, "id", "save"), marker));
        assert!(is_selectable(&page, find(doc, "id", "summary"), marker));
        assert!(is_selectable(&page, find(doc, "data-tour-id", "balance"), marker));
        assert!(!is_selectable(&page, find(doc, "id", "spacer"), marker));
        assert!(!is_selectable(&page, find(doc, "id", "note"), marker));
        assert!(!is_selectable(&page, doc.root(), marker));
    }

    #[test]
    fn foreign_origin_is_rejected() {
        let page = page();
        let mut session = PickSession::new(&page, &TourConfig::default());
        assert_eq!(
            session.receive("https://evil.example", PickMessage::PickStart { route: String::new() }),
            Delivery::Rejected
        );
        assert!(!session.is_active());
        assert_eq!(session.click(find(&page.document, "id", "save")), ClickOutcome::PassThrough);
        assert!(session.outbox().is_empty());
    }

    #[test]
    fn origin_check_uses_normalized_page_origin() {
        let root = json!({"tag": "body", "children": [{"tag": "button", "attrs": {"id": "save"}, "text": "Save"}]});
        let page = page_at("https://App.Example.com:443/transactions", root.clone(), Viewport::default());
        let mut session = PickSession::new(&page, &TourConfig::default());
        assert_eq!(
            session.receive("https://app.example.com", PickMessage::PickStart { route: String::new() }),
            Delivery::Accepted
        );
        assert!(session.is_active());

        let page = page_at("https://user:pw@app.example.com/x", root.clone(), Viewport::default());
        let mut session = PickSession::new(&page, &TourConfig::default());
        assert_eq!(
            session.receive("https://app.example.com", PickMessage::PickStart { route: String::new() }),
            Delivery::Accepted
        );

        let page = page_at("about:blank", root, Viewport::default());
        let mut session = PickSession::new(&page, &TourConfig::default());
        assert_eq!(
            session.receive("null", PickMessage::PickStart { route: String::new() }),
            Delivery::Rejected
        );
    }

    #[test]
    fn hover_is_throttled_to_latest_target() {
        let page = page();
        let doc = &page.document;
        let mut session = PickSession::new(&page, &TourConfig::default());
        start(&mut session);
        session.hover(find(doc, "id", "spacer"));
        session.advance(Duration::from_millis(10));
        session.hover(find(doc, "id", "summary"));
        session.advance(Duration::from_millis(10));
        session.hover(find(doc, "id", "save"));
        assert!(session.outbox().is_empty());
        session.advance(Duration::from_millis(30));
        let out = session.take_outbox();
        assert_eq!(out.len(), 1);
        let PickMessage::AnchorCandidate { meta, route, .. } = &out[0] else {
            panic!("expected candidate");
        };
        assert_eq!(meta.dom_id, "save");
        assert_eq!(route, "/transactions");

        // Same target again: no duplicate notification.
        session.hover(find(doc, "id", "save"));
        session.advance(Duration::from_millis(50));
        assert!(session.outbox().is_empty());
    }

    #[test]
    fn click_picks_and_exits() {
        let page = page();
        let doc = &page.document;
        let mut session = PickSession::new(&page, &TourConfig::default());
        start(&mut session);
        assert_eq!(session.click(find(doc, "id", "spacer")), ClickOutcome::PassThrough);
        session.hover(find(doc, "id", "summary"));
        assert_eq!(session.click(find(doc, "id", "save")), ClickOutcome::Picked);
        assert!(!session.is_active());
        session.advance(Duration::from_millis(100));
        let out = session.take_outbox();
        assert_eq!(out.len(), 1);
        let PickMessage::AnchorPicked { bbox, meta, .. } = &out[0] else {
            panic!("expected pick");
        };
        assert_eq!(*bbox, Rect::new(10.0, 20.0, 80.0, 30.0));
        assert_eq!(meta.synthesized_selector, "#save");
    }

    #[test]
    fn cancel_key_and_stop_are_idempotent() {
        let page = page();
        let mut session = PickSession::new(&page, &TourConfig::default());
        start(&mut session);
        session.key("a");
        assert!(session.is_active());
        session.key("Escape");
        session.key("Escape");
        assert_eq!(session.take_outbox(), vec![PickMessage::PickStop { route: "/transactions".to_string() }]);
        session.receive(ORIGIN, PickMessage::PickStop { route: String::new() });
        session.stop();
        assert!(!session.is_active());
        assert!(session.outbox().is_empty());
    }

    #[test]
    fn replay_recorded_session() {
        let page = page();
        let events: Vec<SessionEvent> = serde_json::from_value(json!([
            {"event": "message", "origin": "https://other.example", "message": {"type": "PICK_START"}},
            {"event": "message", "origin": TEST_URL.trim_end_matches('/'), "message": {"type": "PICK_START"}},
            {"event": "message", "origin": ORIGIN, "message": {"type": "ANCHOR_HIGHLIGHT", "anchorId": "transactions.balance"}},
            {"event": "hover", "selector": "#summary"},
            {"event": "wait", "ms": 60},
            {"event": "click", "selector": "#save"}
        ]))
        .unwrap();
        let report = replay(&page, &TourConfig::default(), &events).unwrap();
        assert_eq!(report.rejected, 1);
        assert!(!report.active);
        assert!(report.highlight.is_some());
        let kinds: Vec<&str> = report.outbound.iter().map(PickMessage::type_name).collect();
        assert_eq!(kinds, vec!["ANCHOR_CANDIDATE", "ANCHOR_PICKED"]);

        let missing: Vec<SessionEvent> =
            serde_json::from_value(json!([{"event": "click", "selector": "#nope"}])).unwrap();
        assert!(matches!(
            replay(&page, &TourConfig::default(), &missing),
            Err(TourError::NotFound(_))
        ));
    }
}
