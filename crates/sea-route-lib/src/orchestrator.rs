//! Overlay add/remove sequencing.
//!
//! Every add walks `Absent -> Adding -> Active` and every remove walks
//! `Active -> Removing -> Absent`; all failure paths end in `Absent`. Engine
//! mutations for one overlay are issued back to back without suspension, so
//! sub-layers land in the engine in recipe order.

use crate::catalog::{DataJob, OverlayId, OverlayKind, OverlayRecipe};
use crate::engine::{EngineAdapter, EngineError};
use crate::loader::DataLoader;
use crate::ordering::{OrderingPolicy, OrderingScheduler};
use crate::prefs::Preferences;
use crate::registry::{LayerRegistry, OverlayStatus, RealizedOverlay};
use crate::session::{MapSessionState, StyleSwitchGate};
use crate::style::{GeoJsonSource, SourceSpec};
use crate::{LayerError, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct LayerOrchestrator<L> {
    adapter: EngineAdapter,
    registry: Arc<LayerRegistry>,
    loader: Arc<L>,
    prefs: Preferences,
    session: Arc<Mutex<MapSessionState>>,
    gate: StyleSwitchGate,
    ordering: OrderingScheduler,
}

impl<L> Clone for LayerOrchestrator<L> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            registry: self.registry.clone(),
            loader: self.loader.clone(),
            prefs: self.prefs.clone(),
            session: self.session.clone(),
            gate: self.gate.clone(),
            ordering: self.ordering.clone(),
        }
    }
}

impl<L: DataLoader> LayerOrchestrator<L> {
    pub fn new(
        adapter: EngineAdapter,
        registry: Arc<LayerRegistry>,
        loader: Arc<L>,
        prefs: Preferences,
        priority: Vec<OverlayId>,
        policy: OrderingPolicy,
    ) -> Self {
        let session = Arc::new(Mutex::new(MapSessionState::default()));
        let gate = StyleSwitchGate::default();
        let ordering = OrderingScheduler::new(
            adapter.clone(),
            registry.clone(),
            session.clone(),
            gate.clone(),
            priority,
            policy,
        );
        Self {
            adapter,
            registry,
            loader,
            prefs,
            session,
            gate,
            ordering,
        }
    }

    pub fn adapter(&self) -> &EngineAdapter {
        &self.adapter
    }

    pub fn registry(&self) -> &Arc<LayerRegistry> {
        &self.registry
    }

    pub fn prefs(&self) -> &Preferences {
        &self.prefs
    }

    pub fn gate(&self) -> &StyleSwitchGate {
        &self.gate
    }

    pub fn ordering(&self) -> &OrderingScheduler {
        &self.ordering
    }

    pub(crate) fn session(&self) -> MutexGuard<'_, MapSessionState> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Activate `id`, resolving once the engine goes idle with its sources in place.
    pub async fn add_overlay(&self, id: &OverlayId) -> Result<()> {
        if !self.gate.is_open() {
            tracing::warn!(overlay = %id, "add rejected: base map switch in progress");
            return Err(LayerError::StyleSwitchInProgress);
        }
        if self.registry.status(id) != OverlayStatus::Absent {
            tracing::warn!(overlay = %id, "add rejected: already present");
            return Err(LayerError::DuplicateRequest(id.clone()));
        }
        let recipe = self.registry.recipe_for(id).map_err(|_| {
            tracing::warn!(overlay = %id, "add rejected: unknown overlay");
            LayerError::UnknownIdentifier(id.clone())
        })?;
        let state = self.registry.state_for(id);
        if state
            .transition(OverlayStatus::Absent, OverlayStatus::Adding)
            .is_err()
        {
            tracing::warn!(overlay = %id, "add rejected: already present");
            return Err(LayerError::DuplicateRequest(id.clone()));
        }

        match self.construct(&recipe).await {
            Ok(realized) => {
                let (sequence, active) = {
                    let mut session = self.session();
                    let sequence = session.next_sequence();
                    session.activate(id);
                    (sequence, session.active.clone())
                };
                state.set_realized(Some(realized));
                state.set_status(OverlayStatus::Active);
                self.prefs.set_overlays(&active);
                self.ordering.schedule();
                tracing::info!(overlay = %id, sequence, "overlay active");
                Ok(())
            }
            Err(e) => {
                state.take_realized();
                state.set_status(OverlayStatus::Absent);
                tracing::warn!(overlay = %id, error = %e, "overlay add failed");
                Err(e)
            }
        }
    }

    /// Deactivate `id`. A remove issued while the same overlay is still being
    /// added runs after that add settles.
    pub async fn remove_overlay(&self, id: &OverlayId) -> Result<()> {
        if !self.gate.is_open() {
            tracing::warn!(overlay = %id, "remove rejected: base map switch in progress");
            return Err(LayerError::StyleSwitchInProgress);
        }
        let Some(state) = self.registry.state(id) else {
            tracing::warn!(overlay = %id, "remove rejected: not active");
            return Err(LayerError::NotFound(id.clone()));
        };
        loop {
            match state.transition(OverlayStatus::Active, OverlayStatus::Removing) {
                Ok(()) => break,
                Err(OverlayStatus::Adding) => {
                    tracing::debug!(overlay = %id, "remove queued behind add");
                    state.settled().await;
                }
                Err(OverlayStatus::Removing) => {
                    tracing::warn!(overlay = %id, "remove rejected: already removing");
                    return Err(LayerError::DuplicateRequest(id.clone()));
                }
                Err(OverlayStatus::Absent) => {
                    tracing::warn!(overlay = %id, "remove rejected: not active");
                    return Err(LayerError::NotFound(id.clone()));
                }
                Err(OverlayStatus::Active) => {}
            }
        }

        // A switch may have begun while this remove was queued.
        if !self.gate.is_open() {
            tracing::debug!(overlay = %id, "waiting for base map switch to finish");
            self.gate.wait_open().await;
        }

        let realized = state.take_realized().unwrap_or_default();
        self.dismantle(&realized);
        let active = {
            let mut session = self.session();
            session.deactivate(id);
            session.active.clone()
        };
        state.set_status(OverlayStatus::Absent);
        self.prefs.set_overlays(&active);
        tracing::info!(overlay = %id, "overlay removed");
        Ok(())
    }

    async fn construct(&self, recipe: &OverlayRecipe) -> Result<RealizedOverlay> {
        let source = match &recipe.kind {
            OverlayKind::Tile { source } => SourceSpec::Raster(source.clone()),
            OverlayKind::FeatureCollection { job, attribution } => {
                let loaded = match job {
                    DataJob::Load { path } => self.loader.load(path).await,
                    DataJob::LoadAndMerge {
                        path,
                        details_path,
                        join_property,
                    } => {
                        self.loader
                            .load_and_merge(path, details_path, join_property)
                            .await
                    }
                };
                let data = loaded.map_err(|source| LayerError::LoadFailure {
                    id: recipe.id.clone(),
                    source,
                })?;
                SourceSpec::Geojson(GeoJsonSource::inline(data, attribution.clone()))
            }
        };

        if !self.gate.is_open() {
            tracing::debug!(overlay = %recipe.id, "waiting for base map switch to finish");
            self.gate.wait_open().await;
        }

        let waiter = self.adapter.waiter();
        let mut realized = RealizedOverlay::default();
        if let Err(e) = self.create(recipe, source, None, &mut realized) {
            self.dismantle(&realized);
            return Err(e.into());
        }

        if let Err(e) = waiter.settled(&realized.sources).await {
            self.dismantle(&realized);
            return Err(e.into());
        }
        Ok(realized)
    }

    /// Issue the engine calls for one overlay, recording each object as it is created.
    fn create(
        &self,
        recipe: &OverlayRecipe,
        source: SourceSpec,
        before: Option<&str>,
        realized: &mut RealizedOverlay,
    ) -> std::result::Result<(), EngineError> {
        let engine = self.adapter.engine();
        let source_id = recipe.id.as_str();
        engine.add_source(source_id, source)?;
        realized.sources.push(source_id.to_string());

        for image in &recipe.images {
            self.adapter.ensure_image(image)?;
            realized.images.push(image.id.clone());
        }
        for layer in &recipe.layers {
            engine.add_layer(layer.clone(), before)?;
            realized.layers.push(layer.id.clone());
        }
        tracing::debug!(
            overlay = %recipe.id,
            layers = realized.layers.len(),
            "overlay realized"
        );
        Ok(())
    }

    /// Remove layers, then sources, newest first. Objects already gone are skipped.
    fn dismantle(&self, realized: &RealizedOverlay) {
        let engine = self.adapter.engine();
        for layer in realized.layers.iter().rev() {
            if let Err(e) = engine.remove_layer(layer) {
                tracing::debug!(layer, error = %e, "layer already gone");
            }
        }
        for source in realized.sources.iter().rev() {
            if let Err(e) = engine.remove_source(source) {
                tracing::debug!(source, error = %e, "source already gone");
            }
        }
    }

    /// Add the tiles of a raster base map beneath every managed overlay layer.
    pub(crate) fn realize_base_raster(&self, id: &OverlayId) -> Result<()> {
        let recipe = self
            .registry
            .base_raster_for(id)
            .map_err(|_| LayerError::UnknownIdentifier(id.clone()))?;
        let Some(source) = recipe.static_source() else {
            return Err(LayerError::UnknownIdentifier(id.clone()));
        };
        let namespace = self.registry.namespace().clone();
        let before = self.adapter.lowest_layer(|l| namespace.contains(l));

        let mut realized = RealizedOverlay::default();
        if let Err(e) = self.create(&recipe, source, before.as_deref(), &mut realized) {
            self.dismantle(&realized);
            return Err(e.into());
        }
        tracing::debug!(base = %id, below = before.as_deref().unwrap_or(""), "raster base map added");
        self.session().base_raster = Some((id.clone(), realized));
        Ok(())
    }

    /// Remove the current raster base map, returning its id.
    pub(crate) fn release_base_raster(&self) -> Option<OverlayId> {
        let (id, realized) = self.session().base_raster.take()?;
        self.dismantle(&realized);
        tracing::debug!(base = %id, "raster base map removed");
        Some(id)
    }

    /// Re-register the marker images of active overlays after a style replacement.
    pub(crate) fn reattach_images(&self) {
        let active = self.session().active.clone();
        for id in &active {
            let Ok(recipe) = self.registry.recipe_for(id) else {
                continue;
            };
            for image in &recipe.images {
                if let Err(e) = self.adapter.ensure_image(image) {
                    tracing::warn!(overlay = %id, image = %image.id, error = %e, "failed to reattach image");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, CatalogOptions, default_priority_order};
    use crate::engine::{HeadlessEngine, MapEngine};
    use crate::loader::StaticDataLoader;
    use crate::prefs::MemoryStore;
    use crate::registry::OverlayNamespace;
    use std::time::Duration;

    fn orchestrator(engine: Arc<HeadlessEngine>) -> LayerOrchestrator<StaticDataLoader> {
        let catalog = Arc::new(Catalog::standard(&CatalogOptions::default()));
        let registry = Arc::new(LayerRegistry::new(catalog, OverlayNamespace::default()).unwrap());
        LayerOrchestrator::new(
            EngineAdapter::new(engine),
            registry,
            Arc::new(StaticDataLoader::new()),
            Preferences::new(Arc::new(MemoryStore::new())),
            default_priority_order(),
            OrderingPolicy::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_tile_overlay_round_trip() {
        let engine = Arc::new(HeadlessEngine::default());
        let driver = engine.drive(Duration::from_millis(16));
        let orchestrator = orchestrator(engine.clone());
        let id = OverlayId::from("tile_openseamap");

        orchestrator.add_overlay(&id).await.unwrap();
        assert_eq!(orchestrator.registry().status(&id), OverlayStatus::Active);
        assert!(engine.has_layer("tile_openseamap"));
        assert!(engine.is_source_loaded("tile_openseamap"));

        orchestrator.remove_overlay(&id).await.unwrap();
        assert_eq!(orchestrator.registry().status(&id), OverlayStatus::Absent);
        assert!(engine.style().layers.is_empty());
        assert!(engine.style().sources.is_empty());
        driver.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_completes_when_tiles_fail() {
        let engine = Arc::new(HeadlessEngine::default());
        engine.fail_source("tile_openseamap");
        let driver = engine.drive(Duration::from_millis(16));
        let orchestrator = orchestrator(engine.clone());
        let id = OverlayId::from("tile_openseamap");

        orchestrator.add_overlay(&id).await.unwrap();
        assert_eq!(orchestrator.registry().status(&id), OverlayStatus::Active);
        assert!(!engine.is_source_loaded("tile_openseamap"));
        driver.abort();
    }

    #[tokio::test]
    async fn test_unknown_overlay_is_rejected_without_engine_calls() {
        let engine = Arc::new(HeadlessEngine::default());
        let orchestrator = orchestrator(engine.clone());
        let err = orchestrator
            .add_overlay(&OverlayId::from("geojson_ferry"))
            .await
            .unwrap_err();
        assert!(matches!(err, LayerError::UnknownIdentifier(_)));
        assert_eq!(engine.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_layer_rolls_back() {
        let engine = Arc::new(HeadlessEngine::default());
        engine.reject_layer("tile_railwaymap");
        let orchestrator = orchestrator(engine.clone());
        let err = orchestrator
            .add_overlay(&OverlayId::from("tile_railwaymap"))
            .await
            .unwrap_err();
        assert!(matches!(err, LayerError::Engine(EngineError::Rejected(_))));
        assert!(engine.style().sources.is_empty());
        assert_eq!(
            orchestrator.registry().status(&OverlayId::from("tile_railwaymap")),
            OverlayStatus::Absent
        );
    }

    #[tokio::test]
    async fn test_entry_rejected_while_switching() {
        let engine = Arc::new(HeadlessEngine::default());
        let orchestrator = orchestrator(engine);
        let _guard = orchestrator.gate().try_begin().unwrap();
        let id = OverlayId::from("tile_openseamap");
        assert!(matches!(
            orchestrator.add_overlay(&id).await,
            Err(LayerError::StyleSwitchInProgress)
        ));
        assert!(matches!(
            orchestrator.remove_overlay(&id).await,
            Err(LayerError::StyleSwitchInProgress)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_remove_waits_for_switch_to_finish() {
        async fn settle() {
            for _ in 0..20 {
                tokio::task::yield_now().await;
            }
        }

        let engine = Arc::new(HeadlessEngine::default());
        let orchestrator = orchestrator(engine.clone());
        let id = OverlayId::from("tile_openseamap");

        let adding = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let id = id.clone();
            async move { orchestrator.add_overlay(&id).await }
        });
        settle().await;
        assert_eq!(orchestrator.registry().status(&id), OverlayStatus::Adding);

        let removing = tokio::spawn({
            let orchestrator = orchestrator.clone();
            let id = id.clone();
            async move { orchestrator.remove_overlay(&id).await }
        });
        settle().await;

        let guard = orchestrator.gate().try_begin().unwrap();
        for _ in 0..50 {
            if adding.is_finished() {
                break;
            }
            engine.frame();
            settle().await;
        }
        adding.await.unwrap().unwrap();
        settle().await;

        assert_eq!(orchestrator.registry().status(&id), OverlayStatus::Removing);
        assert!(engine.has_layer("tile_openseamap"));
        assert!(!removing.is_finished());

        drop(guard);
        removing.await.unwrap().unwrap();
        assert_eq!(orchestrator.registry().status(&id), OverlayStatus::Absent);
        assert!(!engine.has_layer("tile_openseamap"));
    }
}
