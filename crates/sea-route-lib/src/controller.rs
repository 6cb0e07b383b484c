use crate::catalog::{self, BaseMap, Catalog, OverlayId};
use crate::control::{ControlAction, LayersControl};
use crate::engine::EngineAdapter;
use crate::loader::DataLoader;
use crate::orchestrator::LayerOrchestrator;
use crate::ordering::{OrderingOutcome, OrderingPolicy};
use crate::prefs::{DEFAULT_TTL_DAYS, MapView, PreferenceStore, Preferences};
use crate::registry::{LayerRegistry, OverlayNamespace, OverlayStatus, RegistryError};
use crate::session::SessionSnapshot;
use crate::style_switch::StyleSwitchCoordinator;
use crate::Result;
use std::sync::Arc;

/// Session-level settings of one map instance.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Draw order, lowest first.
    pub priority: Vec<OverlayId>,
    pub default_base_map: BaseMap,
    pub default_overlays: Vec<OverlayId>,
    pub ordering: OrderingPolicy,
    pub ttl_days: u32,
    pub namespace: OverlayNamespace,
    /// Start from the defaults even if preferences were stored.
    pub ignore_persisted: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            priority: catalog::default_priority_order(),
            default_base_map: BaseMap::Empty,
            default_overlays: catalog::default_overlays(),
            ordering: OrderingPolicy::default(),
            ttl_days: DEFAULT_TTL_DAYS,
            namespace: OverlayNamespace::default(),
            ignore_persisted: false,
        }
    }
}

/// Summary of [`MapController::restore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub base_map: Option<BaseMap>,
    pub activated: Vec<OverlayId>,
    pub skipped: Vec<OverlayId>,
}

/// The operations one map instance offers its UI.
pub struct MapController<L> {
    orchestrator: LayerOrchestrator<L>,
    coordinator: StyleSwitchCoordinator<L>,
    config: SessionConfig,
}

impl<L> Clone for MapController<L> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            coordinator: self.coordinator.clone(),
            config: self.config.clone(),
        }
    }
}

impl<L: DataLoader> MapController<L> {
    pub fn new(
        adapter: EngineAdapter,
        catalog: Arc<Catalog>,
        loader: Arc<L>,
        store: Arc<dyn PreferenceStore>,
        config: SessionConfig,
    ) -> std::result::Result<Self, RegistryError> {
        let registry = Arc::new(LayerRegistry::new(catalog, config.namespace.clone())?);
        let prefs = Preferences::new(store).with_ttl_days(config.ttl_days);
        let orchestrator = LayerOrchestrator::new(
            adapter,
            registry,
            loader,
            prefs,
            config.priority.clone(),
            config.ordering,
        );
        let coordinator = StyleSwitchCoordinator::new(orchestrator.clone());
        Ok(Self {
            orchestrator,
            coordinator,
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        self.orchestrator.registry().catalog()
    }

    pub fn orchestrator(&self) -> &LayerOrchestrator<L> {
        &self.orchestrator
    }

    pub async fn add_overlay(&self, id: &OverlayId) -> Result<()> {
        self.orchestrator.add_overlay(id).await
    }

    pub async fn remove_overlay(&self, id: &OverlayId) -> Result<()> {
        self.orchestrator.remove_overlay(id).await
    }

    pub async fn update_base_map(&self, base: BaseMap) -> Result<()> {
        self.coordinator.update_base_map(base).await
    }

    pub async fn apply(&self, action: ControlAction) -> Result<()> {
        match action {
            ControlAction::SelectBaseMap(base) => self.update_base_map(base).await,
            ControlAction::SetOverlay { id, active: true } => self.add_overlay(&id).await,
            ControlAction::SetOverlay { id, active: false } => self.remove_overlay(&id).await,
        }
    }

    /// Active overlays in activation order.
    pub fn active_overlays(&self) -> Vec<OverlayId> {
        self.orchestrator.session().active.clone()
    }

    pub fn base_map(&self) -> Option<BaseMap> {
        self.orchestrator.session().base_map
    }

    pub fn overlay_status(&self, id: &OverlayId) -> OverlayStatus {
        self.orchestrator.registry().status(id)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut snapshot = self.orchestrator.session().snapshot();
        let registry = self.orchestrator.registry();
        snapshot.pending = self
            .catalog()
            .overlays()
            .iter()
            .filter(|r| !registry.status(&r.id).is_settled())
            .map(|r| r.id.clone())
            .collect();
        snapshot.switching = !self.orchestrator.gate().is_open();
        snapshot
    }

    pub fn layers_control(&self) -> LayersControl {
        LayersControl::build(self.catalog(), &self.snapshot())
    }

    /// Bring the map back to the persisted selection, or to the configured
    /// defaults when nothing usable was stored.
    pub async fn restore(&self) -> RestoreReport {
        let prefs = self.orchestrator.prefs();
        let stored_base = if self.config.ignore_persisted {
            None
        } else {
            prefs.base_map()
        };
        let base = match stored_base {
            Some(Some(base)) => base,
            Some(None) => {
                tracing::warn!("stored base map is unknown, using the empty style");
                BaseMap::Empty
            }
            None => self.config.default_base_map,
        };

        let mut report = RestoreReport::default();
        match self.update_base_map(base).await {
            Ok(()) => report.base_map = Some(base),
            Err(e) => {
                tracing::warn!(base_map = %base, error = %e, "failed to restore base map");
                if base != BaseMap::Empty && self.update_base_map(BaseMap::Empty).await.is_ok() {
                    report.base_map = Some(BaseMap::Empty);
                }
            }
        }

        // An empty stored list means nothing usable was stored.
        let stored = if self.config.ignore_persisted {
            None
        } else {
            prefs.overlays().filter(|list| !list.is_empty())
        };
        let requested = stored.unwrap_or_else(|| self.config.default_overlays.clone());
        let mut seen: Vec<OverlayId> = Vec::new();
        for id in requested {
            if LayerRegistry::is_known_active(&seen, &id) {
                continue;
            }
            seen.push(id.clone());
            match self.add_overlay(&id).await {
                Ok(()) => report.activated.push(id),
                Err(e) => {
                    tracing::warn!(overlay = %id, error = %e, "skipping overlay during restore");
                    report.skipped.push(id);
                }
            }
        }

        tracing::info!(
            base_map = report.base_map.map(|b| b.code()),
            activated = report.activated.len(),
            skipped = report.skipped.len(),
            "session restored"
        );
        report
    }

    pub fn view(&self) -> MapView {
        self.orchestrator.prefs().view()
    }

    pub fn save_view(&self, view: MapView) {
        self.orchestrator.prefs().set_view(view);
    }

    /// Wait for the latest draw-order pass.
    pub async fn ordering_settled(&self) -> Option<OrderingOutcome> {
        self.orchestrator.ordering().settled().await
    }
}
