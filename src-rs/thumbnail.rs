//! Element thumbnails: capture off the critical path, upload to a
//! deterministic location, reconcile duplicates.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, RgbaImage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

use crate::anchor::{Anchor, AnchorPatch};
use crate::config::ThumbnailConfig;
use crate::dom::{NodeId, Page, Rect};
use crate::error::{CaptureError, StoreError};
use crate::scheduler::Scheduler;
use crate::store::AnchorStore;

pub trait ThumbnailRenderer {
    fn render(&self, page: &Page, node: NodeId) -> Result<RgbaImage, CaptureError>;
}

/// Crops element boxes out of a full-page screenshot.
pub struct ScreenshotRenderer {
    screenshot: DynamicImage,
    config: ThumbnailConfig,
}

impl ScreenshotRenderer {
    pub fn new(screenshot: DynamicImage, config: ThumbnailConfig) -> Self {
        Self { screenshot, config }
    }

    pub fn open(path: &Path, config: ThumbnailConfig) -> Result<Self, CaptureError> {
        let screenshot = image::open(path).map_err(|source| CaptureError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(screenshot, config))
    }

    /// Renderer for the page's own screenshot, if it has one.
    pub fn for_page(page: &Page, config: ThumbnailConfig) -> Result<Self, CaptureError> {
        let path = page.screenshot.as_deref().ok_or(CaptureError::NoScreenshot)?;
        Self::open(path, config)
    }
}

impl ThumbnailRenderer for ScreenshotRenderer {
    fn render(&self, page: &Page, node: NodeId) -> Result<RgbaImage, CaptureError> {
        let rect = page.document.node(node).rect;
        crop_and_fit(&self.screenshot, rect, &self.config)
    }
}

pub fn crop_and_fit(
    source: &DynamicImage,
    rect: Rect,
    config: &ThumbnailConfig,
) -> Result<RgbaImage, CaptureError> {
    if rect.is_empty() {
        return Err(CaptureError::EmptyBox {
            width: rect.width,
            height: rect.height,
        });
    }
    let (img_w, img_h) = source.dimensions();
    let x0 = rect.x.max(0.0).floor() as u32;
    let y0 = rect.y.max(0.0).floor() as u32;
    let x1 = (rect.right().ceil().max(0.0) as u32).min(img_w);
    let y1 = (rect.bottom().ceil().max(0.0) as u32).min(img_h);
    if x0 >= x1 || y0 >= y1 {
        return Err(CaptureError::OutOfBounds);
    }

    let cropped = source.crop_imm(x0, y0, x1 - x0, y1 - y0);
    let scale = config.render_scale.clamp(0.05, 1.0);
    let scaled_w = ((f64::from(x1 - x0) * scale).round() as u32).max(1);
    let scaled_h = ((f64::from(y1 - y0) * scale).round() as u32).max(1);
    let bound_w = scaled_w.min(config.max_width);
    let bound_h = scaled_h.min(config.max_height);
    // `resize` keeps aspect ratio and fits inside the bounds.
    Ok(cropped
        .resize(bound_w, bound_h, FilterType::Triangle)
        .to_rgba8())
}

pub fn encode_png(image: RgbaImage) -> Result<Vec<u8>, CaptureError> {
    let mut buf = Vec::new();
    DynamicImage::ImageRgba8(image).write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(buf)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureJob {
    pub record_id: String,
    pub anchor_id: String,
    pub route: String,
    pub node: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CaptureOutcome {
    Stored { anchor_id: String, url: String },
    /// Render failed; the anchor stays without a thumbnail.
    Skipped { anchor_id: String, reason: String },
    Failed { anchor_id: String, error: String },
}

/// Deferred capture queue. Jobs wait in the idle lane of a scheduler and run
/// only when [`ThumbnailPipeline::run_idle`] is called.
pub struct ThumbnailPipeline<'r> {
    renderer: Option<&'r dyn ThumbnailRenderer>,
    queue: Scheduler<CaptureJob>,
}

impl<'r> ThumbnailPipeline<'r> {
    pub fn new(renderer: Option<&'r dyn ThumbnailRenderer>) -> Self {
        Self {
            renderer,
            queue: Scheduler::new(),
        }
    }

    pub fn can_capture(&self) -> bool {
        self.renderer.is_some()
    }

    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    pub fn defer(&mut self, job: CaptureJob) {
        if self.renderer.is_some() {
            self.queue.schedule_idle(job);
        }
    }

    /// Renders without touching the store. Failures become `None`.
    pub fn capture(&self, page: &Page, node: NodeId) -> Option<Vec<u8>> {
        let renderer = self.renderer?;
        match renderer.render(page, node).and_then(encode_png) {
            Ok(png) => Some(png),
            Err(err) => {
                warn!(error = %err, "thumbnail capture failed");
                None
            }
        }
    }

    pub fn run_idle(&mut self, page: &Page, store: &mut dyn AnchorStore) -> Vec<CaptureOutcome> {
        let mut outcomes = Vec::new();
        while let Some((_, job)) = self.queue.next_task() {
            outcomes.push(self.process(page, store, &job));
        }
        outcomes
    }

    fn process(&self, page: &Page, store: &mut dyn AnchorStore, job: &CaptureJob) -> CaptureOutcome {
        let Some(png) = self.capture(page, job.node) else {
            return CaptureOutcome::Skipped {
                anchor_id: job.anchor_id.clone(),
                reason: "capture failed".to_string(),
            };
        };
        let stored = store
            .upload_thumbnail(&job.anchor_id, &png, &job.route)
            .and_then(|url| {
                store.update(
                    &job.record_id,
                    &AnchorPatch {
                        thumb_url: Some(Some(url.clone())),
                        ..AnchorPatch::default()
                    },
                )?;
                Ok(url)
            });
        match stored {
            Ok(url) => {
                debug!(anchor_id = %job.anchor_id, url = %url, "stored thumbnail");
                CaptureOutcome::Stored {
                    anchor_id: job.anchor_id.clone(),
                    url,
                }
            }
            Err(err) => {
                warn!(anchor_id = %job.anchor_id, error = %err, "thumbnail upload failed");
                CaptureOutcome::Failed {
                    anchor_id: job.anchor_id.clone(),
                    error: err.to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub groups: usize,
    pub duplicates: usize,
    pub thumbnails_deleted: usize,
    pub errors: Vec<String>,
}

/// For every anchor id stored more than once, keeps the most recently updated
/// record and drops the thumbnails of the others. Blobs shared with the kept
/// record are left alone.
pub fn cleanup_duplicate_thumbnails(
    store: &mut dyn AnchorStore,
) -> Result<CleanupReport, StoreError> {
    let mut groups: BTreeMap<String, Vec<Anchor>> = BTreeMap::new();
    for anchor in store.get_all()? {
        groups.entry(anchor.anchor_id.clone()).or_default().push(anchor);
    }

    let mut report = CleanupReport::default();
    for (anchor_id, mut records) in groups {
        if records.len() < 2 {
            continue;
        }
        report.groups += 1;
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let kept_url = records[0].thumb_url.clone();
        for stale in &records[1..] {
            report.duplicates += 1;
            let Some(url) = stale.thumb_url.as_deref() else {
                continue;
            };
            if kept_url.as_deref() != Some(url) {
                match store.delete_thumbnail(url) {
                    Ok(true) => report.thumbnails_deleted += 1,
                    Ok(false) => {}
                    Err(err) => {
                        report.errors.push(format!("{anchor_id} ({}): {err}", stale.id));
                        continue;
                    }
                }
            }
            let cleared = AnchorPatch {
                thumb_url: Some(None),
                ..AnchorPatch::default()
            };
            if let Err(err) = store.update(&stale.id, &cleared) {
                report.errors.push(format!("{anchor_id} ({}): {err}", stale.id));
            }
        }
    }
    Ok(report)
}
