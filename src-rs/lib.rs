//! Anchor engine for guided product tours: turns live page elements into
//! stable, named anchors, keeps them in sync with the page, and positions
//! the tour spotlight on them.

pub mod anchor;
pub mod config;
pub mod dom;
pub mod error;
pub mod integrity;
pub mod kind;
pub mod metadata;
pub mod naming;
pub mod pick;
pub mod query;
pub mod recovery;
pub mod reindex;
pub mod scheduler;
pub mod selector;
pub mod spotlight;
pub mod store;
pub mod thumbnail;
pub mod tour;

#[cfg(test)]
mod testing;

pub use anchor::{Anchor, AnchorCandidate, AnchorDraft, AnchorPatch};
pub use config::TourConfig;
pub use dom::{Document, NodeId, Page, Rect, Viewport, ViewportContext};
pub use error::{CaptureError, SelectorError, StoreError, TourError, TourResult};
pub use kind::AnchorKind;
pub use store::{AnchorStore, FileStore, MemoryStore};
