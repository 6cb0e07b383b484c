//! Sea Route Library - Layer-State Orchestration for Sea Route Maps
//!
//! This library keeps track of which overlays are shown on a sea route map and
//! drives a rendering engine to match, even while the engine's whole style is
//! being swapped underneath it.
//!
//! # Architecture
//!
//! - **[`Catalog`]**: immutable overlay recipes, base maps and the default draw priority
//! - **[`LayerRegistry`]**: recipe lookup plus per-overlay runtime status
//! - **[`LayerOrchestrator`]**: sequences overlay add/remove against the engine
//! - **[`StyleSwitchCoordinator`]**: replaces the base style while keeping overlays alive
//! - **[`OrderingScheduler`]**: re-asserts the draw order once sources have loaded
//! - **[`MapController`]**: the public surface one map instance exposes to its UI
//!
//! Collaborators live behind traits: [`MapEngine`] (with the in-process
//! [`HeadlessEngine`]), [`DataLoader`] and [`PreferenceStore`].

pub mod catalog;
pub mod control;
mod controller;
pub mod engine;
pub mod features;
pub mod loader;
mod orchestrator;
mod ordering;
pub mod popup;
pub mod prefs;
mod registry;
pub mod runtime;
mod session;
pub mod style;
mod style_switch;

// Public API exports
pub use catalog::{BaseMap, Catalog, CatalogOptions, OverlayId, OverlayRecipe};
pub use control::LayersControl;
pub use controller::{MapController, RestoreReport, SessionConfig};
pub use engine::{EngineAdapter, EngineError, EngineEvent, HeadlessEngine, MapEngine};
pub use features::FeatureCollection;
pub use loader::{DataLoader, LoadError, RetryPolicy};
pub use orchestrator::LayerOrchestrator;
pub use ordering::{OrderingOutcome, OrderingPolicy, OrderingScheduler};
pub use popup::FeaturePopup;
pub use prefs::{MapView, PreferenceStore, Preferences, StoreError};
pub use registry::{
    LayerRegistry, OverlayNamespace, OverlayRuntimeState, OverlayStatus, RealizedOverlay,
    RegistryError,
};
pub use session::{MapSessionState, SessionSnapshot, StyleSwitchGate, SwitchGuard};
pub use style_switch::{StyleSwitchCoordinator, preserve_overlays};

/// Failures reported by overlay and base-map operations.
#[derive(Debug, thiserror::Error)]
pub enum LayerError {
    #[error("Unknown overlay: {0}")]
    UnknownIdentifier(OverlayId),

    #[error("Overlay {0} is already being handled")]
    DuplicateRequest(OverlayId),

    #[error("Overlay {0} is not active")]
    NotFound(OverlayId),

    #[error("Failed to load data for {id}: {source}")]
    LoadFailure {
        id: OverlayId,
        #[source]
        source: LoadError,
    },

    #[error("A base map switch is in progress")]
    StyleSwitchInProgress,

    #[error("Map engine error: {0}")]
    Engine(#[from] EngineError),
}

impl LayerError {
    /// Whether the UI should show a notice for this error. The others are
    /// logged and leave state unchanged.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, LayerError::LoadFailure { .. } | LayerError::Engine(_))
    }
}

pub type Result<T> = std::result::Result<T, LayerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_exports() {
        let _: fn(&CatalogOptions) -> Catalog = Catalog::standard;
        let _: fn() -> SessionConfig = SessionConfig::default;
        let _: fn() -> HeadlessEngine = HeadlessEngine::default;
    }

    #[test]
    fn test_only_load_and_engine_errors_reach_the_user() {
        let id = OverlayId::from("geojson_port");
        assert!(!LayerError::NotFound(id.clone()).is_user_visible());
        assert!(!LayerError::DuplicateRequest(id.clone()).is_user_visible());
        assert!(!LayerError::StyleSwitchInProgress.is_user_visible());
        assert!(
            LayerError::LoadFailure {
                id,
                source: LoadError::NotFound("data/portData.geojson".into()),
            }
            .is_user_visible()
        );
        assert!(LayerError::Engine(EngineError::Closed).is_user_visible());
    }
}
