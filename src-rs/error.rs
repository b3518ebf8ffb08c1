use std::path::PathBuf;
use thiserror::Error;

/// A selector string could not be parsed by the query engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid selector {selector:?}: {reason}")]
pub struct SelectorError {
    pub selector: String,
    pub reason: String,
}

impl SelectorError {
    pub fn new(selector: &str, reason: impl Into<String>) -> Self {
        Self {
            selector: selector.to_string(),
            reason: reason.into(),
        }
    }
}

/// Failures surfaced by an [`crate::store::AnchorStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `(route, anchorId)` already exists.
    #[error("anchor already exists (route={route}, anchor_id={anchor_id})")]
    Duplicate { route: String, anchor_id: String },

    #[error("unknown id: {0}")]
    UnknownId(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Opaque failure from a remote backend.
    #[error("backend: {0}")]
    Backend(String),
}

/// Thumbnail rendering failed. Always non-fatal for callers.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("page has no screenshot to capture from")]
    NoScreenshot,

    #[error("element has an empty box ({width}x{height})")]
    EmptyBox { width: f64, height: f64 },

    #[error("element box lies outside the screenshot")]
    OutOfBounds,

    #[error("failed to decode screenshot {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("image encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[derive(Debug, Error)]
pub enum TourError {
    /// Selector resolved to nothing.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("persistence: {0}")]
    Persistence(#[source] StoreError),

    #[error("validation: {0}")]
    Validation(String),

    #[error("capture: {0}")]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("config: {0}")]
    Config(String),
}

impl From<StoreError> for TourError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Duplicate { route, anchor_id } => Self::Validation(format!(
                "duplicate anchor id {anchor_id} for route {route}"
            )),
            other => Self::Persistence(other),
        }
    }
}

pub type TourResult<T> = Result<T, TourError>;
