use super::{EngineError, EngineEvent, MapEngine};
use crate::catalog::MarkerImage;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

/// Shared handle to the engine plus awaitable lifecycle signals.
#[derive(Clone)]
pub struct EngineAdapter {
    engine: Arc<dyn MapEngine>,
    /// Prefix prepended to relative image paths.
    asset_root: String,
}

impl EngineAdapter {
    pub fn new(engine: Arc<dyn MapEngine>) -> Self {
        Self {
            engine,
            asset_root: String::new(),
        }
    }

    pub fn with_asset_root(mut self, root: impl Into<String>) -> Self {
        self.asset_root = root.into();
        self
    }

    pub fn engine(&self) -> &dyn MapEngine {
        self.engine.as_ref()
    }

    /// Start listening for engine events.
    ///
    /// Subscribe before issuing the mutation being waited for, otherwise its
    /// completion event may be missed.
    pub fn waiter(&self) -> EventWaiter {
        EventWaiter {
            engine: self.engine.clone(),
            rx: self.engine.subscribe(),
        }
    }

    /// Register a marker image unless the engine already has it.
    pub fn ensure_image(&self, image: &MarkerImage) -> Result<bool, EngineError> {
        if self.engine.has_image(&image.id) {
            return Ok(false);
        }
        let url = resolve(&self.asset_root, &image.path);
        self.engine.add_image(&image.id, &url)?;
        tracing::debug!(image = %image.id, %url, "marker image attached");
        Ok(true)
    }

    /// All `sources` exist and report loaded.
    pub fn sources_ready(&self, sources: &[String]) -> bool {
        sources
            .iter()
            .all(|s| self.engine.has_source(s) && self.engine.is_source_loaded(s))
    }

    /// The bottom-most layer of the current stack matching `pred`.
    pub fn lowest_layer(&self, pred: impl Fn(&str) -> bool) -> Option<String> {
        self.engine.layer_ids().into_iter().find(|l| pred(l))
    }
}

fn resolve(root: &str, path: &str) -> String {
    if root.is_empty() || path.contains("://") || path.starts_with('/') {
        return path.to_string();
    }
    format!("{}/{}", root.trim_end_matches('/'), path.trim_start_matches("./"))
}

/// A one-shot wait on engine events, subscribed at creation time.
pub struct EventWaiter {
    engine: Arc<dyn MapEngine>,
    rx: broadcast::Receiver<EngineEvent>,
}

impl EventWaiter {
    async fn next(&mut self) -> Result<Option<EngineEvent>, EngineError> {
        match self.rx.recv().await {
            Ok(event) => Ok(Some(event)),
            Err(RecvError::Lagged(skipped)) => {
                tracing::trace!(skipped, "engine events lagged");
                Ok(None)
            }
            Err(RecvError::Closed) => Err(EngineError::Closed),
        }
    }

    /// Resolve on the first `idle` at which every one of `sources` is present.
    ///
    /// Whether the sources actually loaded is left to the draw-order pass: a
    /// source whose tiles keep failing still lets the engine go idle, and the
    /// overlay must not stay pending because of it. An `idle` emitted before
    /// the sources were added is skipped; a source that disappears again fails
    /// the wait.
    pub async fn settled(mut self, sources: &[String]) -> Result<(), EngineError> {
        let mut seen = vec![false; sources.len()];
        loop {
            for (source, seen) in sources.iter().zip(seen.iter_mut()) {
                *seen |= self.engine.has_source(source);
            }
            match self.next().await? {
                Some(EngineEvent::Idle) | None => {
                    for (source, seen) in sources.iter().zip(&seen) {
                        if *seen && !self.engine.has_source(source) {
                            return Err(EngineError::MissingSource(source.clone()));
                        }
                    }
                    if sources.iter().all(|s| self.engine.has_source(s)) {
                        return Ok(());
                    }
                }
                Some(_) => {}
            }
        }
    }

    /// Resolve on the next `styledata`, or fail on an engine `error`.
    pub async fn style_loaded(mut self) -> Result<(), EngineError> {
        loop {
            match self.next().await? {
                Some(EngineEvent::StyleData) => return Ok(()),
                Some(EngineEvent::Error { message }) => {
                    return Err(EngineError::StyleLoad(message));
                }
                _ => {}
            }
        }
    }
}
