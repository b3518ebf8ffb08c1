//! Step navigation for a guided tour. Each active step owns one
//! [`SpotlightEngine`]; changing step or resizing restarts it.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::TourConfig;
use crate::dom::ViewportContext;
use crate::error::{TourError, TourResult};
use crate::spotlight::{FallbackAction, SpotlightEngine, SpotlightTarget};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TourStep {
    pub anchor_id: String,
    #[serde(default)]
    pub selector: Option<String>,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

impl TourStep {
    fn target(&self) -> SpotlightTarget {
        SpotlightTarget {
            anchor_id: self.anchor_id.clone(),
            selector: self.selector.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TourKey {
    Advance,
    Previous,
    Cancel,
}

impl TourKey {
    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "ArrowRight" | "Enter" => Some(Self::Advance),
            "ArrowLeft" => Some(Self::Previous),
            "Escape" => Some(Self::Cancel),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TourStatus {
    Idle,
    Running { step: usize },
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TourEvent {
    StepChanged { step: usize },
    Completed,
    Cancelled,
    /// Input that does nothing in the current state.
    Ignored,
}

pub struct TourController {
    steps: Vec<TourStep>,
    config: TourConfig,
    status: TourStatus,
    engine: Option<SpotlightEngine>,
}

impl TourController {
    pub fn new(steps: Vec<TourStep>, config: TourConfig) -> TourResult<Self> {
        if steps.is_empty() {
            return Err(TourError::Validation("a tour needs at least one step".to_string()));
        }
        Ok(Self {
            steps,
            config,
            status: TourStatus::Idle,
            engine: None,
        })
    }

    pub fn status(&self) -> TourStatus {
        self.status
    }

    pub fn steps(&self) -> &[TourStep] {
        &self.steps
    }

    pub fn current_step(&self) -> Option<&TourStep> {
        match self.status {
            TourStatus::Running { step } => self.steps.get(step),
            _ => None,
        }
    }

    pub fn engine(&self) -> Option<&SpotlightEngine> {
        self.engine.as_ref()
    }

    pub fn start(&mut self, ctx: &mut dyn ViewportContext) -> TourEvent {
        self.show(0, ctx)
    }

    pub fn handle_key(&mut self, key: &str, ctx: &mut dyn ViewportContext) -> TourEvent {
        match TourKey::from_key(key) {
            Some(TourKey::Advance) => self.advance(ctx),
            Some(TourKey::Previous) => self.previous(ctx),
            Some(TourKey::Cancel) => self.cancel(),
            None => TourEvent::Ignored,
        }
    }

    /// Moves forward; from the last step the tour completes.
    pub fn advance(&mut self, ctx: &mut dyn ViewportContext) -> TourEvent {
        let TourStatus::Running { step } = self.status else {
            return TourEvent::Ignored;
        };
        if step + 1 >= self.steps.len() {
            self.unmount();
            self.status = TourStatus::Completed;
            return TourEvent::Completed;
        }
        self.show(step + 1, ctx)
    }

    pub fn previous(&mut self, ctx: &mut dyn ViewportContext) -> TourEvent {
        match self.status {
            TourStatus::Running { step } if step > 0 => self.show(step - 1, ctx),
            _ => TourEvent::Ignored,
        }
    }

    pub fn cancel(&mut self) -> TourEvent {
        if !matches!(self.status, TourStatus::Running { .. }) {
            return TourEvent::Ignored;
        }
        self.unmount();
        self.status = TourStatus::Cancelled;
        TourEvent::Cancelled
    }

    /// Both fallback-card buttons move the tour forward.
    pub fn fallback(&mut self, action: FallbackAction, ctx: &mut dyn ViewportContext) -> TourEvent {
        match action {
            FallbackAction::Skip | FallbackAction::Advance => self.advance(ctx),
        }
    }

    /// Call after the viewport changed size; re-runs positioning.
    pub fn on_resize(&mut self, ctx: &mut dyn ViewportContext) {
        if let Some(engine) = self.engine.as_mut() {
            engine.start(ctx);
        }
    }

    /// Runs one scheduled spotlight task.
    pub fn tick(&mut self, ctx: &mut dyn ViewportContext) -> bool {
        self.engine.as_mut().is_some_and(|engine| engine.tick(ctx))
    }

    pub fn run_until_idle(&mut self, ctx: &mut dyn ViewportContext) {
        while self.tick(ctx) {}
    }

    fn show(&mut self, step: usize, ctx: &mut dyn ViewportContext) -> TourEvent {
        self.unmount();
        let mut engine = SpotlightEngine::new(self.steps[step].target(), &self.config);
        engine.start(ctx);
        debug!(step, anchor_id = %self.steps[step].anchor_id, "showing tour step");
        self.engine = Some(engine);
        self.status = TourStatus::Running { step };
        TourEvent::StepChanged { step }
    }

    fn unmount(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            engine.cancel();
        }
    }
}
