//! Route reindexing: reconcile the marked elements of a live page with the
//! anchors persisted for that route.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::anchor::{box_dimension, describe_element, Anchor, AnchorCandidate, AnchorPatch};
use crate::config::TourConfig;
use crate::dom::{NodeId, Page};
use crate::error::StoreError;
use crate::scheduler::Pacer;
use crate::store::AnchorStore;
use crate::thumbnail::{CaptureJob, CaptureOutcome, ThumbnailPipeline, ThumbnailRenderer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReindexStatus {
    Scanning,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexProgress {
    pub total: usize,
    pub current: usize,
    pub status: ReindexStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_anchor: Option<String>,
    pub errors: Vec<String>,
    pub updated: usize,
    pub created: usize,
    pub invalid: usize,
}

impl ReindexProgress {
    fn new(total: usize) -> Self {
        Self {
            total,
            current: 0,
            status: ReindexStatus::Scanning,
            current_anchor: None,
            errors: Vec::new(),
            updated: 0,
            created: 0,
            invalid: 0,
        }
    }
}

/// Elements carrying the marker attribute, in document order.
pub fn marked_elements(page: &Page, marker_attribute: &str) -> Vec<NodeId> {
    page.document
        .elements()
        .into_iter()
        .filter(|id| page.document.node(*id).attr(marker_attribute).is_some())
        .collect()
}

/// Why an existing record should be refreshed, if at all.
pub fn needs_update(
    existing: &Anchor,
    candidate: &AnchorCandidate,
    can_capture: bool,
    now: DateTime<Utc>,
    stale_after_days: i64,
) -> Option<&'static str> {
    if existing.friendly_name != candidate.friendly_name {
        return Some("name changed");
    }
    if can_capture && existing.thumb_url.is_none() && !candidate.bbox.is_empty() {
        return Some("thumbnail missing");
    }
    if now - existing.updated_at > ChronoDuration::days(stale_after_days) {
        return Some("stale");
    }
    None
}

fn refresh_patch(candidate: &AnchorCandidate, now: DateTime<Utc>) -> AnchorPatch {
    AnchorPatch {
        friendly_name: Some(candidate.friendly_name.clone()),
        kind: Some(candidate.kind),
        selector: Some(candidate.selector.clone()),
        width: Some(box_dimension(candidate.bbox.width)),
        height: Some(box_dimension(candidate.bbox.height)),
        last_verified_at: Some(now),
        updated_at: Some(now),
        ..AnchorPatch::default()
    }
}

pub struct Reindexer<'a> {
    config: &'a TourConfig,
    renderer: Option<&'a dyn ThumbnailRenderer>,
    now: DateTime<Utc>,
}

impl<'a> Reindexer<'a> {
    pub fn new(config: &'a TourConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            renderer: None,
            now,
        }
    }

    pub fn with_renderer(mut self, renderer: &'a dyn ThumbnailRenderer) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Walks the marked elements of `page` in document order. A failing
    /// element is recorded in `errors` and the walk continues. Persisted
    /// anchors with no live element are counted as invalid, never deleted.
    pub fn run(
        &self,
        page: &Page,
        route: &str,
        store: &mut dyn AnchorStore,
        pacer: &mut dyn Pacer,
        on_progress: &mut dyn FnMut(&ReindexProgress),
    ) -> ReindexProgress {
        let marker = &self.config.marker_attribute;
        let elements = marked_elements(page, marker);
        let mut progress = ReindexProgress::new(elements.len());
        on_progress(&progress);

        let persisted = match store.get_by_route(route) {
            Ok(records) => records,
            Err(err) => {
                warn!(route, error = %err, "failed to load anchors");
                progress.status = ReindexStatus::Error;
                progress.errors.push(format!("load {route}: {err}"));
                on_progress(&progress);
                return progress;
            }
        };
        let mut known: BTreeMap<String, Anchor> = persisted
            .iter()
            .map(|a| (a.anchor_id.clone(), a.clone()))
            .collect();
        let mut processed: BTreeSet<String> = BTreeSet::new();
        let mut thumbnails = ThumbnailPipeline::new(self.renderer);
        let throttle = Duration::from_millis(self.config.reindex.throttle_ms);

        progress.status = ReindexStatus::Processing;
        for (index, node) in elements.iter().enumerate() {
            if index > 0 {
                pacer.pause(throttle);
            }
            let candidate = describe_element(&page.document, *node, route, self.config);
            progress.current = index + 1;
            progress.current_anchor = Some(candidate.anchor_id.clone());

            match self.process(&candidate, route, store, &mut known, &mut thumbnails) {
                Ok(Change::Created) => progress.created += 1,
                Ok(Change::Updated) => progress.updated += 1,
                Ok(Change::Verified) => {}
                Err(err) => {
                    warn!(anchor_id = %candidate.anchor_id, error = %err, "reindex element failed");
                    progress.errors.push(format!("{}: {err}", candidate.anchor_id));
                }
            }
            processed.insert(candidate.anchor_id);
            on_progress(&progress);
        }

        for outcome in thumbnails.run_idle(page, store) {
            if let CaptureOutcome::Failed { anchor_id, error } = outcome {
                progress.errors.push(format!("{anchor_id}: thumbnail: {error}"));
            }
        }

        progress.invalid = persisted
            .iter()
            .filter(|a| !processed.contains(&a.anchor_id))
            .count();
        progress.status = ReindexStatus::Completed;
        progress.current_anchor = None;
        info!(
            route,
            created = progress.created,
            updated = progress.updated,
            invalid = progress.invalid,
            errors = progress.errors.len(),
            "reindex finished"
        );
        on_progress(&progress);
        progress
    }

    fn process(
        &self,
        candidate: &AnchorCandidate,
        route: &str,
        store: &mut dyn AnchorStore,
        known: &mut BTreeMap<String, Anchor>,
        thumbnails: &mut ThumbnailPipeline<'_>,
    ) -> Result<Change, StoreError> {
        let capture = |record: &Anchor| CaptureJob {
            record_id: record.id.clone(),
            anchor_id: record.anchor_id.clone(),
            route: route.to_string(),
            node: candidate.node,
        };

        if let Some(existing) = known.get(&candidate.anchor_id) {
            let stale = needs_update(
                existing,
                candidate,
                thumbnails.can_capture(),
                self.now,
                self.config.reindex.stale_after_days,
            );
            let Some(reason) = stale else {
                let verified = store.update(&existing.id, &AnchorPatch::verified(self.now))?;
                known.insert(verified.anchor_id.clone(), verified);
                return Ok(Change::Verified);
            };
            debug!(anchor_id = %candidate.anchor_id, reason, "refreshing anchor");
            let updated = store.update(&existing.id, &refresh_patch(candidate, self.now))?;
            thumbnails.defer(capture(&updated));
            known.insert(updated.anchor_id.clone(), updated);
            return Ok(Change::Updated);
        }

        let created = store.create(candidate.to_draft(route, self.now))?;
        debug!(anchor_id = %created.anchor_id, id = %created.id, "created anchor");
        thumbnails.defer(capture(&created));
        known.insert(created.anchor_id.clone(), created);
        Ok(Change::Created)
    }
}

enum Change {
    Created,
    Updated,
    Verified,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::AnchorDraft;
    use crate::config::ThumbnailConfig;
    use crate::kind::AnchorKind;
    use crate::scheduler::Scheduler;
    use crate::store::{MemoryStore, SearchPage, SearchQuery};
    use crate::testing::{at, draft, page_from_json};
    use crate::thumbnail::ScreenshotRenderer;
    use image::{DynamicImage, Rgba, RgbaImage};
    use serde_json::json;

    fn transactions_page() -> Page {
        let mut page = page_from_json(json!({
            "tag": "body",
            "rect": {"x": 0, "y": 0, "w": 1280, "h": 900},
            "children": [
                {"tag": "nav", "children": [
                    {"tag": "button", "attrs": {"data-tour-id": "add-transaction"}, "text": "Nova Transação",
                     "rect": {"x": 10, "y": 10, "w": 120, "h": 32}}
                ]},
                {"tag": "main", "children": [
                    {"tag": "table", "attrs": {"data-tour-id": "ledger"},
                     "rect": {"x": 10, "y": 80, "w": 800, "h": 400}},
                    {"tag": "button", "text": "unmarked"}
                ]}
            ]
        }));
        page.route = "/transactions".to_string();
        page
    }

    fn run(
        page: &Page,
        store: &mut dyn AnchorStore,
        now: DateTime<Utc>,
    ) -> (ReindexProgress, Vec<ReindexProgress>) {
        let config = TourConfig::default();
        let mut events = Vec::new();
        let mut clock: Scheduler<()> = Scheduler::new();
        let result = Reindexer::new(&config, now).run(
            page,
            "/transactions",
            store,
            &mut clock,
            &mut |p| events.push(p.clone()),
        );
        (result, events)
    }

    #[test]
    fn first_run_creates_then_second_run_is_idempotent() {
        let page = transactions_page();
        let mut store = MemoryStore::new();
        let (first, events) = run(&page, &mut store, at(2026, 3, 1));
        assert_eq!(first.status, ReindexStatus::Completed);
        assert_eq!((first.created, first.updated, first.invalid), (2, 0, 0));
        assert!(first.errors.is_empty());

        let order: Vec<Option<String>> = events.iter().map(|p| p.current_anchor.clone()).collect();
        assert_eq!(
            order,
            vec![
                None,
                Some("transactions.nav.add-transaction-button".to_string()),
                Some("transactions.content.ledger-table".to_string()),
                None,
            ]
        );
        assert_eq!(events[0].status, ReindexStatus::Scanning);
        assert_eq!(events[1].status, ReindexStatus::Processing);

        let (second, _) = run(&page, &mut store, at(2026, 3, 2));
        assert_eq!((second.created, second.updated, second.invalid), (0, 0, 0));
        let record = store
            .get_by_anchor_id("transactions.nav.add-transaction-button")
            .unwrap()
            .unwrap();
        assert_eq!(record.last_verified_at, Some(at(2026, 3, 2)));
        assert_eq!(record.updated_at, at(2026, 3, 1));
    }

    #[test]
    fn drift_and_staleness_trigger_updates() {
        let page = transactions_page();
        let mut store = MemoryStore::new();
        let mut renamed = draft(
            "/transactions",
            "transactions.nav.add-transaction-button",
            AnchorKind::Button,
            "#old",
        );
        renamed.updated_at = at(2026, 3, 1);
        store.create(renamed).unwrap();
        let mut old = draft(
            "/transactions",
            "transactions.content.ledger-table",
            AnchorKind::Table,
            "#old",
        );
        old.friendly_name = "Ledger".to_string();
        old.updated_at = at(2026, 2, 1);
        store.create(old).unwrap();

        let (result, _) = run(&page, &mut store, at(2026, 3, 2));
        assert_eq!((result.created, result.updated), (0, 2));
        let record = store
            .get_by_anchor_id("transactions.nav.add-transaction-button")
            .unwrap()
            .unwrap();
        assert_eq!(record.friendly_name, "Add Transaction");
        assert_eq!(record.selector, r#"[data-tour-id="add-transaction"]"#);
        assert_eq!(record.width, 120);
    }

    #[test]
    fn orphans_are_counted_not_deleted() {
        let page = transactions_page();
        let mut store = MemoryStore::new();
        store
            .create(draft("/transactions", "transactions.content.gone-button", AnchorKind::Button, "#gone"))
            .unwrap();
        store
            .create(draft("/reports", "reports.content.other-button", AnchorKind::Button, "#other"))
            .unwrap();
        let (result, _) = run(&page, &mut store, at(2026, 3, 1));
        assert_eq!(result.invalid, 1);
        assert!(store
            .get_by_anchor_id("transactions.content.gone-button")
            .unwrap()
            .is_some());
    }

    /// Rejects every create for one anchor id.
    struct FlakyStore {
        inner: MemoryStore,
        reject: &'static str,
        offline: bool,
    }

    impl AnchorStore for FlakyStore {
        fn create(&mut self, draft: AnchorDraft) -> Result<Anchor, StoreError> {
            if draft.anchor_id == self.reject {
                return Err(StoreError::Backend("write refused".to_string()));
            }
            self.inner.create(draft)
        }
        fn update(&mut self, id: &str, patch: &AnchorPatch) -> Result<Anchor, StoreError> {
            self.inner.update(id, patch)
        }
        fn get_by_id(&self, id: &str) -> Result<Option<Anchor>, StoreError> {
            self.inner.get_by_id(id)
        }
        fn get_by_anchor_id(&self, anchor_id: &str) -> Result<Option<Anchor>, StoreError> {
            self.inner.get_by_anchor_id(anchor_id)
        }
        fn get_by_route(&self, route: &str) -> Result<Vec<Anchor>, StoreError> {
            if self.offline {
                return Err(StoreError::Backend("connection lost".to_string()));
            }
            self.inner.get_by_route(route)
        }
        fn get_all(&self) -> Result<Vec<Anchor>, StoreError> {
            self.inner.get_all()
        }
        fn delete(&mut self, id: &str) -> Result<bool, StoreError> {
            self.inner.delete(id)
        }
        fn search(&self, query: &SearchQuery) -> Result<SearchPage, StoreError> {
            self.inner.search(query)
        }
        fn upload_thumbnail(&mut self, anchor_id: &str, png: &[u8], route: &str) -> Result<String, StoreError> {
            self.inner.upload_thumbnail(anchor_id, png, route)
        }
        fn delete_thumbnail(&mut self, url: &str) -> Result<bool, StoreError> {
            self.inner.delete_thumbnail(url)
        }
    }

    #[test]
    fn element_failure_does_not_abort_the_run() {
        let page = transactions_page();
        let mut store = FlakyStore {
            inner: MemoryStore::new(),
            reject: "transactions.nav.add-transaction-button",
            offline: false,
        };
        let (result, _) = run(&page, &mut store, at(2026, 3, 1));
        assert_eq!(result.status, ReindexStatus::Completed);
        assert_eq!(result.created, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("write refused"));
    }

    #[test]
    fn failed_route_load_ends_in_error_state() {
        let page = transactions_page();
        let config = TourConfig::default();
        let mut store = FlakyStore {
            inner: MemoryStore::new(),
            reject: "",
            offline: true,
        };
        let mut clock: Scheduler<()> = Scheduler::new();
        let mut statuses = Vec::new();
        let result = Reindexer::new(&config, at(2026, 3, 1)).run(
            &page,
            "/transactions",
            &mut store,
            &mut clock,
            &mut |p| statuses.push(p.status),
        );
        assert_eq!(result.status, ReindexStatus::Error);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("connection lost"));
        assert_eq!(result.current, 0);
        assert_eq!((result.created, result.updated, result.invalid), (0, 0, 0));
        assert_eq!(statuses, vec![ReindexStatus::Scanning, ReindexStatus::Error]);
        assert_eq!(clock.now_ms(), 0);
        assert!(store.inner.get_all().unwrap().is_empty());
    }

    #[test]
    fn throttle_yields_between_elements() {
        let page = transactions_page();
        let config = TourConfig::default();
        let mut store = MemoryStore::new();
        let mut clock: Scheduler<()> = Scheduler::new();
        Reindexer::new(&config, at(2026, 3, 1)).run(&page, "/transactions", &mut store, &mut clock, &mut |_| {});
        assert_eq!(clock.now_ms(), 50);
    }

    #[test]
    fn thumbnails_are_captured_after_the_scan() {
        let page = transactions_page();
        let config = TourConfig::default();
        let shot = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1280, 900, Rgba([0, 0, 0, 255])));
        let renderer = ScreenshotRenderer::new(shot, ThumbnailConfig::default());
        let mut store = MemoryStore::new();
        let mut clock: Scheduler<()> = Scheduler::new();
        let result = Reindexer::new(&config, at(2026, 3, 1))
            .with_renderer(&renderer)
            .run(&page, "/transactions", &mut store, &mut clock, &mut |_| {});
        assert!(result.errors.is_empty());
        assert_eq!(store.blob_count(), 2);
        let record = store
            .get_by_anchor_id("transactions.content.ledger-table")
            .unwrap()
            .unwrap();
        assert_eq!(
            record.thumb_url.as_deref(),
            Some("mem://thumbnails/transactions/transactions.content.ledger-table.png")
        );

        let second = Reindexer::new(&config, at(2026, 3, 2))
            .with_renderer(&renderer)
            .run(&page, "/transactions", &mut store, &mut clock, &mut |_| {});
        assert_eq!((second.created, second.updated), (0, 0));
    }
}
