//! Spotlight positioning: find a tour step's element, scroll it into a good
//! spot, then lay out the highlight and its tooltip.
//!
//! Lookups and the post-scroll settle run as tasks on the engine's own
//! [`Scheduler`], so an unmounted step leaves nothing behind.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::{SpotlightConfig, TourConfig};
use crate::dom::{Document, NodeId, Rect, Viewport, ViewportContext};
use crate::query::css_string;
use crate::scheduler::{Scheduler, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotlightTarget {
    pub anchor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    Bottom,
    Top,
    Right,
    Left,
    Overlay,
}

/// Highlight box in document coordinates. `found` is false for the fallback.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct SpotlightPosition {
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
    pub found: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TooltipLayout {
    pub placement: Placement,
    pub top: f64,
    pub left: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpotlightLayout {
    pub highlight: SpotlightPosition,
    pub tooltip: TooltipLayout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackAction {
    Skip,
    Advance,
}

/// Shown in place of a highlight when the element never appeared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FallbackCard {
    pub title: String,
    pub message: String,
    pub actions: Vec<FallbackAction>,
}

impl FallbackCard {
    fn for_target(target: &SpotlightTarget) -> Self {
        Self {
            title: "Element not found".to_string(),
            message: format!(
                "The element for \"{}\" is not on this page. Skip this step or continue the tour.",
                target.anchor_id
            ),
            actions: vec![FallbackAction::Skip, FallbackAction::Advance],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SpotlightState {
    Searching { attempt: u32 },
    Found { node: NodeId },
    Visible { node: NodeId, layout: SpotlightLayout },
    NotFound { fallback: FallbackCard },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpotlightTask {
    Lookup,
    Settle(NodeId),
}

/// Resolves the target: its selector first, then the marker attribute
/// holding the full anchor id or the part after the route segment.
pub fn resolve_target(doc: &Document, target: &SpotlightTarget, marker_attribute: &str) -> Option<NodeId> {
    let by_selector = target
        .selector
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| doc.query_selector(s).ok().flatten());
    if by_selector.is_some() {
        return by_selector;
    }
    let mut markers = vec![target.anchor_id.as_str()];
    if let Some((_, rest)) = target.anchor_id.split_once('.') {
        markers.push(rest);
    }
    markers.into_iter().find_map(|marker| {
        let selector = format!("[{marker_attribute}={}]", css_string(marker));
        doc.query_selector(&selector).ok().flatten()
    })
}

/// `base * factor^attempt`, capped.
pub fn retry_delay(attempt: u32, config: &SpotlightConfig) -> Duration {
    let raw = config.retry_base_ms as f64 * config.retry_factor.powi(attempt as i32);
    let capped = raw.min(config.retry_cap_ms as f64).max(0.0);
    Duration::from_millis(capped.round() as u64)
}

/// Vertical scroll offset for `element` (document coordinates). Centers the
/// element and its tooltip together when both fit, otherwise puts the
/// element in the upper third of the viewport.
pub fn optimal_scroll_top(element: Rect, viewport: Viewport, config: &SpotlightConfig) -> f64 {
    let pair = element.height + config.spacing + config.tooltip_height;
    let target = if pair <= viewport.height {
        element.y - (viewport.height - pair) / 2.0
    } else {
        element.y - viewport.height / 3.0
    };
    target.max(0.0)
}

fn clamp_axis(value: f64, size: f64, extent: f64, margin: f64) -> f64 {
    let margin = margin.min(((extent - size) / 2.0).max(0.0));
    let max = (extent - size - margin).max(margin);
    value.clamp(margin, max)
}

/// Places the tooltip around `highlight` (document coordinates). Tries
/// bottom, top, right, left, then overlays on the roomier vertical side.
/// The result always lies inside the visible viewport.
pub fn place_tooltip(highlight: Rect, viewport: Viewport, config: &SpotlightConfig) -> TooltipLayout {
    let margin = config.viewport_margin.max(0.0);
    let spacing = config.spacing;
    let (vw, vh) = (viewport.width.max(0.0), viewport.height.max(0.0));
    let tw = config.tooltip_width.min(vw - 2.0 * margin).max(0.0);
    let th = config.tooltip_height.min(vh - 2.0 * margin).max(0.0);

    let h = highlight.translate(-viewport.scroll_x, -viewport.scroll_y);
    let (cx, cy) = h.center();
    let space_below = vh - h.bottom();
    let space_above = h.y;
    let space_right = vw - h.right();
    let space_left = h.x;
    let need_v = th + spacing + margin;
    let need_h = tw + spacing + margin;

    let below = h.bottom() + spacing;
    let above = h.y - spacing - th;
    let (placement, top, left) = if space_below >= need_v {
        (Placement::Bottom, below, cx - tw / 2.0)
    } else if space_above >= need_v {
        (Placement::Top, above, cx - tw / 2.0)
    } else if space_right >= need_h {
        (Placement::Right, cy - th / 2.0, h.right() + spacing)
    } else if space_left >= need_h {
        (Placement::Left, cy - th / 2.0, h.x - spacing - tw)
    } else if space_below >= space_above {
        (Placement::Overlay, below, cx - tw / 2.0)
    } else {
        (Placement::Overlay, above, cx - tw / 2.0)
    };

    TooltipLayout {
        placement,
        top: clamp_axis(top, th, vh, margin) + viewport.scroll_y,
        left: clamp_axis(left, tw, vw, margin) + viewport.scroll_x,
        width: tw,
        height: th,
    }
}

/// Per-step positioning state machine.
pub struct SpotlightEngine {
    target: SpotlightTarget,
    config: SpotlightConfig,
    marker_attribute: String,
    state: SpotlightState,
    tasks: Scheduler<SpotlightTask>,
    pending: Option<TaskId>,
    lookups: u32,
}

impl SpotlightEngine {
    pub fn new(target: SpotlightTarget, config: &TourConfig) -> Self {
        Self {
            target,
            config: config.spotlight.clone(),
            marker_attribute: config.marker_attribute.clone(),
            state: SpotlightState::Searching { attempt: 0 },
            tasks: Scheduler::new(),
            pending: None,
            lookups: 0,
        }
    }

    pub fn state(&self) -> &SpotlightState {
        &self.state
    }

    pub fn target(&self) -> &SpotlightTarget {
        &self.target
    }

    /// Failed lookups so far.
    pub fn lookups(&self) -> u32 {
        self.lookups
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.tasks.now_ms()
    }

    pub fn has_pending_work(&self) -> bool {
        self.tasks.pending() > 0
    }

    /// The highlight to draw; the not-found placeholder otherwise.
    pub fn position(&self) -> SpotlightPosition {
        match &self.state {
            SpotlightState::Visible { layout, .. } => layout.highlight,
            _ => SpotlightPosition::default(),
        }
    }

    /// (Re)starts from scratch and performs the first lookup right away.
    pub fn start(&mut self, ctx: &mut dyn ViewportContext) {
        self.cancel();
        self.lookups = 0;
        self.state = SpotlightState::Searching { attempt: 0 };
        self.lookup(ctx);
    }

    /// Drops every scheduled task. Called when the step goes away.
    pub fn cancel(&mut self) {
        if let Some(id) = self.pending.take() {
            self.tasks.cancel(id);
        }
    }

    /// Runs the next scheduled task, if any. Returns false when idle.
    pub fn tick(&mut self, ctx: &mut dyn ViewportContext) -> bool {
        let Some((id, task)) = self.tasks.next_task() else {
            return false;
        };
        if self.pending == Some(id) {
            self.pending = None;
        }
        match task {
            SpotlightTask::Lookup => self.lookup(ctx),
            SpotlightTask::Settle(node) => self.settle(ctx, node),
        }
        true
    }

    pub fn run_until_idle(&mut self, ctx: &mut dyn ViewportContext) -> &SpotlightState {
        while self.tick(ctx) {}
        &self.state
    }

    fn schedule(&mut self, delay: Duration, task: SpotlightTask) {
        self.pending = Some(self.tasks.schedule(delay, task));
    }

    fn lookup(&mut self, ctx: &mut dyn ViewportContext) {
        if let Some(node) = resolve_target(ctx.document(), &self.target, &self.marker_attribute) {
            self.on_found(ctx, node);
            return;
        }
        self.lookups += 1;
        if self.lookups >= self.config.max_retries {
            info!(anchor_id = %self.target.anchor_id, lookups = self.lookups, "spotlight target not found");
            self.state = SpotlightState::NotFound {
                fallback: FallbackCard::for_target(&self.target),
            };
            return;
        }
        let attempt = self.lookups;
        let delay = retry_delay(attempt - 1, &self.config);
        debug!(anchor_id = %self.target.anchor_id, attempt, delay_ms = delay.as_millis() as u64, "retrying lookup");
        self.state = SpotlightState::Searching { attempt };
        self.schedule(delay, SpotlightTask::Lookup);
    }

    fn on_found(&mut self, ctx: &mut dyn ViewportContext, node: NodeId) {
        let element = ctx.document().node(node).rect;
        let viewport = ctx.viewport();
        let top = optimal_scroll_top(element, viewport, &self.config);
        ctx.scroll_to(viewport.scroll_x, top);
        self.state = SpotlightState::Found { node };
        self.schedule(Duration::from_millis(self.config.settle_ms), SpotlightTask::Settle(node));
    }

    fn settle(&mut self, ctx: &mut dyn ViewportContext, node: NodeId) {
        if !ctx.document().is_attached(node) {
            self.start(ctx);
            return;
        }
        let viewport = ctx.viewport();
        let highlight = ctx
            .client_rect(node)
            .translate(viewport.scroll_x, viewport.scroll_y)
            .inflate(self.config.padding);
        let tooltip = place_tooltip(highlight, viewport, &self.config);
        self.state = SpotlightState::Visible {
            node,
            layout: SpotlightLayout {
                highlight: SpotlightPosition {
                    top: highlight.y,
                    left: highlight.x,
                    width: highlight.width,
                    height: highlight.height,
                    found: true,
                },
                tooltip,
            },
        };
    }
}
