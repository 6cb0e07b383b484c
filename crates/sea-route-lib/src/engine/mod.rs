//! Map engine boundary
//!
//! [`MapEngine`] is the capability set the orchestration code needs from a
//! rendering engine: a mutable style graph of sources and layers, wholesale
//! style replacement with a transform hook, and a stream of lifecycle events.
//! Calls are synchronous; completion is observed through [`EngineEvent`]s,
//! which [`EngineAdapter`] turns into awaitable one-shot waits.

mod adapter;
mod headless;

pub use adapter::{EngineAdapter, EventWaiter};
pub use headless::{FrameReport, HeadlessConfig, HeadlessEngine};

use crate::style::{LayerSpec, SourceSpec, Style, StyleDocument};
use serde_json::Value;
use tokio::sync::broadcast;

/// Lifecycle notifications emitted by an engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A style document finished loading and is now current.
    StyleData,
    /// A source finished loading its data.
    SourceData { id: String },
    /// All pending work has settled.
    Idle,
    /// An asynchronous failure, e.g. a style document that could not be loaded.
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("source already exists: {0}")]
    SourceExists(String),

    #[error("no such source: {0}")]
    MissingSource(String),

    #[error("source {source_id} is still used by layer {layer}")]
    SourceInUse { source_id: String, layer: String },

    #[error("layer already exists: {0}")]
    LayerExists(String),

    #[error("no such layer: {0}")]
    MissingLayer(String),

    #[error("style failed to load: {0}")]
    StyleLoad(String),

    #[error("engine rejected the request: {0}")]
    Rejected(String),

    #[error("engine event stream closed")]
    Closed,
}

/// Rewrites the incoming style given the one being replaced.
pub type StyleTransform = Box<dyn FnOnce(&Style, Style) -> Style + Send>;

/// Options of [`MapEngine::set_style`].
#[derive(Default)]
pub struct SetStyleOptions {
    pub transform: Option<StyleTransform>,
    /// Apply as a diff against the current style instead of a full reload.
    pub diff: bool,
}

impl std::fmt::Debug for SetStyleOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetStyleOptions")
            .field("transform", &self.transform.is_some())
            .field("diff", &self.diff)
            .finish()
    }
}

/// The rendering engine as seen by the orchestration code.
pub trait MapEngine: Send + Sync {
    fn add_source(&self, id: &str, spec: SourceSpec) -> Result<(), EngineError>;

    fn remove_source(&self, id: &str) -> Result<(), EngineError>;

    /// Insert `spec` below `before`, or on top of the stack when `None`.
    fn add_layer(&self, spec: LayerSpec, before: Option<&str>) -> Result<(), EngineError>;

    fn remove_layer(&self, id: &str) -> Result<(), EngineError>;

    /// Move a layer below `before`, or to the top of the stack when `None`.
    fn move_layer(&self, id: &str, before: Option<&str>) -> Result<(), EngineError>;

    fn set_layout_property(&self, layer: &str, name: &str, value: Value)
    -> Result<(), EngineError>;

    fn set_filter(&self, layer: &str, filter: Option<Value>) -> Result<(), EngineError>;

    /// Snapshot of the current style graph.
    fn style(&self) -> Style;

    fn is_source_loaded(&self, id: &str) -> bool;

    /// Replace the style. Completion is reported by `StyleData` or `Error`.
    fn set_style(&self, document: StyleDocument, options: SetStyleOptions)
    -> Result<(), EngineError>;

    fn has_image(&self, id: &str) -> bool;

    /// Load the image at `url` and register it under `id`.
    fn add_image(&self, id: &str, url: &str) -> Result<(), EngineError>;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;

    fn has_source(&self, id: &str) -> bool {
        self.style().has_source(id)
    }

    fn has_layer(&self, id: &str) -> bool {
        self.style().has_layer(id)
    }

    fn layer_ids(&self) -> Vec<String> {
        self.style().layers.into_iter().map(|l| l.id).collect()
    }
}
