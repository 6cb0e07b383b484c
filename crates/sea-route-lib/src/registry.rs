//! Recipe lookup and per-overlay runtime status.

use crate::catalog::{Catalog, OverlayId, OverlayRecipe};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("No recipe for overlay {0}")]
    NotFound(OverlayId),

    #[error("Overlay {0} is outside the overlay namespace")]
    OutsideNamespace(OverlayId),
}

/// Id prefixes that mark engine sources and layers as managed overlays.
///
/// Style replacement carries over exactly the objects whose ids carry one of
/// these prefixes, so every recipe id and sub-layer id must carry one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayNamespace {
    prefixes: Vec<String>,
}

impl Default for OverlayNamespace {
    fn default() -> Self {
        Self::new(["geojson", "tile"])
    }
}

impl OverlayNamespace {
    pub fn new<S: Into<String>>(prefixes: impl IntoIterator<Item = S>) -> Self {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn contains(&self, id: &str) -> bool {
        self.prefixes.iter().any(|p| id.starts_with(p.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayStatus {
    Absent,
    Adding,
    Active,
    Removing,
}

impl OverlayStatus {
    /// `Adding` and `Removing` are transient.
    pub fn is_settled(self) -> bool {
        matches!(self, OverlayStatus::Absent | OverlayStatus::Active)
    }
}

/// Engine objects created for one overlay, in creation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealizedOverlay {
    pub sources: Vec<String>,
    pub layers: Vec<String>,
    pub images: Vec<String>,
}

/// Mutable state of one overlay identifier.
#[derive(Debug)]
pub struct OverlayRuntimeState {
    status: watch::Sender<OverlayStatus>,
    realized: Mutex<Option<RealizedOverlay>>,
}

impl OverlayRuntimeState {
    fn new() -> Self {
        Self {
            status: watch::Sender::new(OverlayStatus::Absent),
            realized: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<RealizedOverlay>> {
        self.realized.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> OverlayStatus {
        *self.status.borrow()
    }

    /// Move from `from` to `to`; fails with the current status otherwise.
    pub(crate) fn transition(&self, from: OverlayStatus, to: OverlayStatus) -> Result<(), OverlayStatus> {
        let mut current = OverlayStatus::Absent;
        let moved = self.status.send_if_modified(|status| {
            current = *status;
            if *status == from {
                *status = to;
                true
            } else {
                false
            }
        });
        if moved { Ok(()) } else { Err(current) }
    }

    pub(crate) fn set_status(&self, status: OverlayStatus) {
        self.status.send_replace(status);
    }

    /// Watch status transitions.
    pub fn subscribe(&self) -> watch::Receiver<OverlayStatus> {
        self.status.subscribe()
    }

    /// Wait until the status is `Absent` or `Active`.
    pub async fn settled(&self) -> OverlayStatus {
        let mut rx = self.subscribe();
        match rx.wait_for(|s| s.is_settled()).await {
            Ok(status) => *status,
            // The sender lives as long as `self`.
            Err(_) => self.status(),
        }
    }

    pub fn realized(&self) -> Option<RealizedOverlay> {
        self.lock().clone()
    }

    pub(crate) fn set_realized(&self, realized: Option<RealizedOverlay>) {
        *self.lock() = realized;
    }

    pub(crate) fn take_realized(&self) -> Option<RealizedOverlay> {
        self.lock().take()
    }
}

/// Lookup from overlay id to recipe, plus the lazily created runtime states.
pub struct LayerRegistry {
    catalog: Arc<Catalog>,
    namespace: OverlayNamespace,
    states: Mutex<HashMap<OverlayId, Arc<OverlayRuntimeState>>>,
}

impl LayerRegistry {
    pub fn new(catalog: Arc<Catalog>, namespace: OverlayNamespace) -> Result<Self, RegistryError> {
        for recipe in catalog.overlays().iter().chain(catalog.base_rasters()) {
            let outside = !namespace.contains(recipe.id.as_str())
                || recipe.layer_ids().any(|l| !namespace.contains(l))
                || recipe.source_ids().iter().any(|s| !namespace.contains(s));
            if outside {
                return Err(RegistryError::OutsideNamespace(recipe.id.clone()));
            }
        }
        Ok(Self {
            catalog,
            namespace,
            states: Mutex::new(HashMap::new()),
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn namespace(&self) -> &OverlayNamespace {
        &self.namespace
    }

    /// Recipe of a user-toggleable overlay.
    pub fn recipe_for(&self, id: &OverlayId) -> Result<Arc<OverlayRecipe>, RegistryError> {
        self.catalog
            .overlay(id.as_str())
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Recipe of a raster base map. These are never user-addable.
    pub fn base_raster_for(&self, id: &OverlayId) -> Result<Arc<OverlayRecipe>, RegistryError> {
        self.catalog
            .base_rasters()
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// Runtime state of `id`, created as `Absent` on first access.
    pub fn state_for(&self, id: &OverlayId) -> Arc<OverlayRuntimeState> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        states
            .entry(id.clone())
            .or_insert_with(|| Arc::new(OverlayRuntimeState::new()))
            .clone()
    }

    /// Runtime state of `id` if it was ever touched.
    pub fn state(&self, id: &OverlayId) -> Option<Arc<OverlayRuntimeState>> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    pub fn status(&self, id: &OverlayId) -> OverlayStatus {
        self.state(id)
            .map(|s| s.status())
            .unwrap_or(OverlayStatus::Absent)
    }

    pub fn is_known_active(list: &[OverlayId], id: &OverlayId) -> bool {
        list.contains(id)
    }
}
