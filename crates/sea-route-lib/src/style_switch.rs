//! Base-map switching.
//!
//! Replacing the engine style drops every source, layer and image. The
//! coordinator hands the engine a transform that carries managed overlay
//! objects over into the incoming style, keeps overlay requests out while the
//! replacement is in flight, and afterwards restores what the transform cannot
//! carry: the raster base map tiles and marker images.

use crate::catalog::BaseMap;
use crate::engine::SetStyleOptions;
use crate::loader::DataLoader;
use crate::orchestrator::LayerOrchestrator;
use crate::registry::OverlayNamespace;
use crate::style::{Style, StyleDocument};
use crate::{LayerError, Result};

/// Carry managed overlay layers and sources from `previous` into `next`.
///
/// Layers whose ids fall in `namespace` are appended after the incoming
/// style's own layers, keeping their relative order. Sources in `namespace`
/// are copied by id and replace an incoming source of the same id.
pub fn preserve_overlays(namespace: &OverlayNamespace, previous: &Style, mut next: Style) -> Style {
    for (id, spec) in &previous.sources {
        if namespace.contains(id) {
            next.sources.insert(id.clone(), spec.clone());
        }
    }
    let carried: Vec<_> = previous
        .layers
        .iter()
        .filter(|l| namespace.contains(&l.id) && !next.has_layer(&l.id))
        .cloned()
        .collect();
    next.layers.extend(carried);
    next
}

pub struct StyleSwitchCoordinator<L> {
    orchestrator: LayerOrchestrator<L>,
}

impl<L> Clone for StyleSwitchCoordinator<L> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
        }
    }
}

impl<L: DataLoader> StyleSwitchCoordinator<L> {
    pub fn new(orchestrator: LayerOrchestrator<L>) -> Self {
        Self { orchestrator }
    }

    /// Replace the base map, keeping every active overlay.
    ///
    /// On failure the previous base map stays selected and visible.
    pub async fn update_base_map(&self, target: BaseMap) -> Result<()> {
        let orchestrator = &self.orchestrator;
        let current = orchestrator.session().base_map;
        if current == Some(target) {
            tracing::debug!(base_map = %target, "base map unchanged");
            return Ok(());
        }
        let Some(guard) = orchestrator.gate().try_begin() else {
            tracing::warn!(base_map = %target, "base map switch rejected: another switch in progress");
            return Err(LayerError::StyleSwitchInProgress);
        };

        let previous_raster = orchestrator.release_base_raster();

        let adapter = orchestrator.adapter();
        let waiter = adapter.waiter();
        let namespace = orchestrator.registry().namespace().clone();
        let options = SetStyleOptions {
            transform: Some(Box::new(move |previous: &Style, next: Style| {
                preserve_overlays(&namespace, previous, next)
            })),
            diff: current.is_some(),
        };
        let document = StyleDocument::Url(target.document_url().to_string());
        let loaded = match adapter.engine().set_style(document, options) {
            Ok(()) => waiter.style_loaded().await,
            Err(e) => Err(e),
        };

        if let Err(e) = loaded {
            tracing::warn!(base_map = %target, error = %e, "base map switch failed");
            if let Some(id) = previous_raster
                && let Err(restore) = orchestrator.realize_base_raster(&id)
            {
                tracing::warn!(base = %id, error = %restore, "failed to restore raster base map");
            }
            return Err(e.into());
        }

        orchestrator.session().base_map = Some(target);
        if let Some(raster) = target.raster_overlay()
            && let Err(e) = orchestrator.realize_base_raster(&raster)
        {
            tracing::warn!(base = %raster, error = %e, "failed to add raster base map");
        }
        orchestrator.reattach_images();
        orchestrator.prefs().set_base_map(target);
        drop(guard);

        orchestrator.ordering().schedule();
        tracing::info!(base_map = %target, code = target.code(), "base map switched");
        Ok(())
    }
}
