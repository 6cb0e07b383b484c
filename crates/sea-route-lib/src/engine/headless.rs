//! In-process engine that keeps the style graph without rendering it.
//!
//! Work is advanced explicitly by [`HeadlessEngine::frame`], which the viewer
//! calls once per UI frame and tests drive from a timer. Within a frame the
//! engine applies a pending style replacement, progresses source loading and
//! finally reports `idle` once nothing is left to do, in the same order a
//! browser engine would.

use super::{EngineError, EngineEvent, MapEngine, SetStyleOptions};
use crate::catalog::EMPTY_STYLE_URL;
use crate::features::Feature;
use crate::style::expr::{EvalContext, evaluate_filter};
use crate::style::{GeoJsonSource, LayerSpec, SourceSpec, Style, StyleDocument};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Frames a newly added source needs before it reports loaded.
    pub source_load_frames: u32,
    pub event_capacity: usize,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            source_load_frames: 2,
            event_capacity: 256,
        }
    }
}

/// What a call to [`HeadlessEngine::frame`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub style_applied: bool,
    pub sources_loaded: usize,
    /// More frames are needed before the engine goes idle.
    pub busy: bool,
}

struct PendingStyle {
    document: StyleDocument,
    options: SetStyleOptions,
}

#[derive(Default)]
struct EngineState {
    style: Style,
    /// Source id to frames left before it is loaded.
    loading: HashMap<String, u32>,
    stalled: HashSet<String>,
    /// Sources whose tiles fail: never loaded, but they do not keep the engine busy.
    failing: HashSet<String>,
    /// Image id to the URL it was loaded from.
    images: BTreeMap<String, String>,
    pending_style: Option<PendingStyle>,
    /// Work happened since the last `idle`.
    dirty: bool,
    rejected_layers: HashSet<String>,
}

pub struct HeadlessEngine {
    state: Mutex<EngineState>,
    documents: Mutex<HashMap<String, Style>>,
    events: broadcast::Sender<EngineEvent>,
    config: HeadlessConfig,
    mutations: AtomicUsize,
}

impl Default for HeadlessEngine {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl HeadlessEngine {
    pub fn new(config: HeadlessConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let mut documents = HashMap::new();
        documents.insert(EMPTY_STYLE_URL.to_string(), Style::named("empty"));
        Self {
            state: Mutex::new(EngineState::default()),
            documents: Mutex::new(documents),
            events,
            config,
            mutations: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutated(&self) {
        self.mutations.fetch_add(1, Ordering::Relaxed);
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is fine: nobody is waiting.
        let _ = self.events.send(event);
    }

    /// Make a style document resolvable by URL.
    pub fn register_document(&self, url: impl Into<String>, style: Style) {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.into(), style);
    }

    /// Number of mutating calls received so far, failed ones included.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::Relaxed)
    }

    /// Keep a source loading until [`HeadlessEngine::release_source`].
    pub fn stall_source(&self, id: &str) {
        self.lock().stalled.insert(id.to_string());
    }

    /// Make tile requests for `id` fail. The source stays unloaded while the
    /// engine still reaches `idle`.
    pub fn fail_source(&self, id: &str) {
        let mut state = self.lock();
        state.failing.insert(id.to_string());
        state.dirty = true;
    }

    pub fn release_source(&self, id: &str) {
        let mut state = self.lock();
        state.stalled.remove(id);
        state.dirty = true;
    }

    /// Mark an existing source as loading again, as after a tile refetch.
    pub fn reload_source(&self, id: &str) {
        let mut state = self.lock();
        if state.style.has_source(id) {
            let frames = self.config.source_load_frames.max(1);
            state.loading.insert(id.to_string(), frames);
            state.dirty = true;
        }
    }

    /// Make every later `add_layer` for `id` fail.
    pub fn reject_layer(&self, id: &str) {
        self.lock().rejected_layers.insert(id.to_string());
    }

    /// Borrow the live style without cloning it.
    pub fn with_style<R>(&self, f: impl FnOnce(&Style) -> R) -> R {
        f(&self.lock().style)
    }

    pub fn images(&self) -> BTreeMap<String, String> {
        self.lock().images.clone()
    }

    /// Features a layer draws at `zoom`: those of its inline GeoJSON source
    /// that pass its filter. Empty for hidden layers and other source kinds.
    pub fn rendered_features(&self, layer_id: &str, zoom: f64) -> Vec<Feature> {
        let state = self.lock();
        let Some(layer) = state.style.layer(layer_id) else {
            return Vec::new();
        };
        if !layer.is_visible() || !layer.applies_at(zoom) {
            return Vec::new();
        }
        let Some(SourceSpec::Geojson(source)) = layer
            .source
            .as_deref()
            .and_then(|id| state.style.sources.get(id))
        else {
            return Vec::new();
        };
        let Some(collection) = source.features() else {
            return Vec::new();
        };
        collection
            .features
            .iter()
            .filter(|f| evaluate_filter(layer.filter.as_ref(), &EvalContext::new(zoom, &f.properties)))
            .cloned()
            .collect()
    }

    /// Advance pending work by one step and emit the resulting events.
    pub fn frame(&self) -> FrameReport {
        let mut report = FrameReport::default();
        let mut events = Vec::new();
        {
            let mut state = self.lock();

            if let Some(pending) = state.pending_style.take() {
                match self.resolve(&pending.document) {
                    Ok(next) => {
                        self.apply_style(&mut state, next, pending.options);
                        report.style_applied = true;
                        events.push(EngineEvent::StyleData);
                    }
                    Err(message) => {
                        tracing::warn!(document = pending.document.describe(), %message, "style load failed");
                        events.push(EngineEvent::Error { message });
                    }
                }
                state.dirty = true;
            }

            let stalled = state.stalled.clone();
            let failing = state.failing.clone();
            let mut finished = Vec::new();
            for (id, frames) in state.loading.iter_mut() {
                if stalled.contains(id) || failing.contains(id) {
                    continue;
                }
                *frames = frames.saturating_sub(1);
                if *frames == 0 {
                    finished.push(id.clone());
                }
            }
            finished.sort();
            for id in finished {
                state.loading.remove(&id);
                report.sources_loaded += 1;
                events.push(EngineEvent::SourceData { id });
            }

            report.busy = state.pending_style.is_some()
                || state.loading.keys().any(|id| !failing.contains(id));
            if !report.busy && state.dirty {
                state.dirty = false;
                events.push(EngineEvent::Idle);
            }
        }

        for event in events {
            self.emit(event);
        }
        report
    }

    /// Call [`HeadlessEngine::frame`] every `period` until the returned task is aborted.
    pub fn drive(self: &Arc<Self>, period: Duration) -> crate::runtime::JoinHandle<()> {
        let engine = Arc::clone(self);
        crate::runtime::spawn(async move {
            loop {
                engine.frame();
                crate::runtime::sleep(period).await;
            }
        })
    }

    fn resolve(&self, document: &StyleDocument) -> Result<Style, String> {
        match document {
            StyleDocument::Inline(style) => Ok(style.as_ref().clone()),
            StyleDocument::Url(url) => self
                .documents
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(url)
                .cloned()
                .ok_or_else(|| format!("unable to load style document {url}")),
        }
    }

    fn apply_style(&self, state: &mut EngineState, next: Style, options: SetStyleOptions) {
        let previous = std::mem::take(&mut state.style);
        let next = match options.transform {
            Some(transform) => transform(&previous, next),
            None => next,
        };

        // A diff keeps sources whose definition did not change.
        let mut loading = HashMap::new();
        for (id, spec) in &next.sources {
            let unchanged = options.diff
                && previous.sources.get(id) == Some(spec)
                && !state.loading.contains_key(id);
            if !unchanged {
                loading.insert(id.clone(), self.config.source_load_frames);
            }
        }
        loading.retain(|_, frames| *frames > 0);

        tracing::debug!(
            name = next.name.as_deref().unwrap_or(""),
            layers = next.layers.len(),
            sources = next.sources.len(),
            diff = options.diff,
            "style applied"
        );
        state.style = next;
        state.loading = loading;
        state.images.clear();
    }
}

impl MapEngine for HeadlessEngine {
    fn add_source(&self, id: &str, spec: SourceSpec) -> Result<(), EngineError> {
        self.mutated();
        let mut state = self.lock();
        if state.style.has_source(id) {
            return Err(EngineError::SourceExists(id.to_string()));
        }
        if let SourceSpec::Geojson(GeoJsonSource { data, .. }) = &spec {
            tracing::trace!(source = id, inline = matches!(data, crate::style::GeoJsonData::Inline(_)), "adding geojson source");
        }
        state.style.sources.insert(id.to_string(), spec);
        if self.config.source_load_frames > 0 {
            state
                .loading
                .insert(id.to_string(), self.config.source_load_frames);
        }
        state.dirty = true;
        Ok(())
    }

    fn remove_source(&self, id: &str) -> Result<(), EngineError> {
        self.mutated();
        let mut state = self.lock();
        if !state.style.has_source(id) {
            return Err(EngineError::MissingSource(id.to_string()));
        }
        if let Some(layer) = state.style.layers_using(id).next() {
            return Err(EngineError::SourceInUse {
                source_id: id.to_string(),
                layer: layer.id.clone(),
            });
        }
        state.style.sources.remove(id);
        state.loading.remove(id);
        state.dirty = true;
        Ok(())
    }

    fn add_layer(&self, spec: LayerSpec, before: Option<&str>) -> Result<(), EngineError> {
        self.mutated();
        let mut state = self.lock();
        if state.rejected_layers.contains(&spec.id) {
            return Err(EngineError::Rejected(format!("layer {}", spec.id)));
        }
        if state.style.has_layer(&spec.id) {
            return Err(EngineError::LayerExists(spec.id));
        }
        if let Some(source) = spec.source.as_deref()
            && !state.style.has_source(source)
        {
            return Err(EngineError::MissingSource(source.to_string()));
        }
        let index = match before {
            Some(before) => state
                .style
                .layer_index(before)
                .ok_or_else(|| EngineError::MissingLayer(before.to_string()))?,
            None => state.style.layers.len(),
        };
        state.style.layers.insert(index, spec);
        state.dirty = true;
        Ok(())
    }

    fn remove_layer(&self, id: &str) -> Result<(), EngineError> {
        self.mutated();
        let mut state = self.lock();
        let index = state
            .style
            .layer_index(id)
            .ok_or_else(|| EngineError::MissingLayer(id.to_string()))?;
        state.style.layers.remove(index);
        state.dirty = true;
        Ok(())
    }

    fn move_layer(&self, id: &str, before: Option<&str>) -> Result<(), EngineError> {
        self.mutated();
        let mut state = self.lock();
        let from = state
            .style
            .layer_index(id)
            .ok_or_else(|| EngineError::MissingLayer(id.to_string()))?;
        if let Some(before) = before
            && !state.style.has_layer(before)
        {
            return Err(EngineError::MissingLayer(before.to_string()));
        }
        let layer = state.style.layers.remove(from);
        let to = match before {
            Some(before) => state.style.layer_index(before).unwrap_or(state.style.layers.len()),
            None => state.style.layers.len(),
        };
        state.style.layers.insert(to, layer);
        state.dirty = true;
        Ok(())
    }

    fn set_layout_property(&self, layer: &str, name: &str, value: Value) -> Result<(), EngineError> {
        self.mutated();
        let mut state = self.lock();
        let spec = state
            .style
            .layers
            .iter_mut()
            .find(|l| l.id == layer)
            .ok_or_else(|| EngineError::MissingLayer(layer.to_string()))?;
        spec.layout.insert(name.to_string(), value);
        state.dirty = true;
        Ok(())
    }

    fn set_filter(&self, layer: &str, filter: Option<Value>) -> Result<(), EngineError> {
        self.mutated();
        let mut state = self.lock();
        let spec = state
            .style
            .layers
            .iter_mut()
            .find(|l| l.id == layer)
            .ok_or_else(|| EngineError::MissingLayer(layer.to_string()))?;
        spec.filter = filter;
        state.dirty = true;
        Ok(())
    }

    fn style(&self) -> Style {
        self.lock().style.clone()
    }

    fn is_source_loaded(&self, id: &str) -> bool {
        let state = self.lock();
        state.style.has_source(id) && !state.loading.contains_key(id)
    }

    fn set_style(&self, document: StyleDocument, options: SetStyleOptions) -> Result<(), EngineError> {
        self.mutated();
        let mut state = self.lock();
        if state.pending_style.is_some() {
            tracing::debug!("replacing a style that had not finished loading");
        }
        state.pending_style = Some(PendingStyle { document, options });
        state.dirty = true;
        Ok(())
    }

    fn has_image(&self, id: &str) -> bool {
        self.lock().images.contains_key(id)
    }

    fn add_image(&self, id: &str, url: &str) -> Result<(), EngineError> {
        self.mutated();
        let mut state = self.lock();
        if state.images.contains_key(id) {
            return Err(EngineError::Rejected(format!("image {id} already exists")));
        }
        state.images.insert(id.to_string(), url.to_string());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    fn has_source(&self, id: &str) -> bool {
        self.lock().style.has_source(id)
    }

    fn has_layer(&self, id: &str) -> bool {
        self.lock().style.has_layer(id)
    }

    fn layer_ids(&self) -> Vec<String> {
        self.lock().style.layers.iter().map(|l| l.id.clone()).collect()
    }
}
