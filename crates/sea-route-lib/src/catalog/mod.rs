//! Overlay catalog
//!
//! Every toggleable overlay and every raster base map is described here once,
//! as an immutable [`OverlayRecipe`]. Recipes are built at start-up and never
//! change; the registry hands them out behind `Arc`.

mod base;
mod geojson;
mod raster;

pub use base::{BaseMap, BaseStyle, EMPTY_STYLE_URL};

use crate::popup::PopupKind;
use crate::style::{LayerSpec, RasterSource, SourceSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Stable name of one overlay, e.g. `geojson_sea_route` or `tile_openseamap`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OverlayId(String);

impl OverlayId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn carries_prefix(&self, prefixes: &[String]) -> bool {
        prefixes.iter().any(|p| self.0.starts_with(p.as_str()))
    }
}

impl fmt::Display for OverlayId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OverlayId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().to_string()))
    }
}

impl From<&str> for OverlayId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for OverlayId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Control-panel group an overlay is listed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerGroup {
    Tile,
    GeoJson,
}

impl LayerGroup {
    pub fn title(self) -> &'static str {
        match self {
            LayerGroup::Tile => "Overlays",
            LayerGroup::GeoJson => "Sea routes & ports",
        }
    }
}

/// Data the orchestrator must fetch before a feature overlay can be added.
#[derive(Debug, Clone, PartialEq)]
pub enum DataJob {
    Load {
        path: String,
    },
    LoadAndMerge {
        path: String,
        details_path: String,
        join_property: String,
    },
}

/// How an overlay's backing source is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum OverlayKind {
    /// Raster tiles; the source spec is known up front.
    Tile { source: RasterSource },
    /// GeoJSON fetched through the data loader.
    FeatureCollection {
        job: DataJob,
        attribution: Option<String>,
    },
}

/// A named image a symbol layer refers to through `icon-image`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerImage {
    pub id: String,
    pub path: String,
}

/// Immutable construction recipe of one overlay.
#[derive(Debug, Clone)]
pub struct OverlayRecipe {
    pub id: OverlayId,
    pub label: String,
    pub group: LayerGroup,
    pub kind: OverlayKind,
    /// Sub-layers in paint order: later entries draw above earlier ones.
    pub layers: Vec<LayerSpec>,
    pub images: Vec<MarkerImage>,
    /// Sub-layer that receives clicks, if the overlay has popups.
    pub interactive_layer: Option<String>,
    pub popup: Option<PopupKind>,
}

impl OverlayRecipe {
    /// Every overlay is backed by exactly one source named after it.
    pub fn source_ids(&self) -> Vec<String> {
        vec![self.id.as_str().to_string()]
    }

    pub fn layer_ids(&self) -> impl Iterator<Item = &str> {
        self.layers.iter().map(|l| l.id.as_str())
    }

    /// The source spec for tile overlays; feature overlays need loading first.
    pub fn static_source(&self) -> Option<SourceSpec> {
        match &self.kind {
            OverlayKind::Tile { source } => Some(SourceSpec::Raster(source.clone())),
            OverlayKind::FeatureCollection { .. } => None,
        }
    }
}

/// Options that change which URLs the standard catalog produces.
#[derive(Debug, Clone, Default)]
pub struct CatalogOptions {
    /// Required by the Thunderforest transport base map.
    pub thunderforest_api_key: Option<String>,
}

/// All overlays and raster base maps known to the application.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    overlays: Vec<Arc<OverlayRecipe>>,
    base_rasters: Vec<Arc<OverlayRecipe>>,
}

impl Catalog {
    /// The sea route map's overlays, in control-panel order.
    pub fn standard(options: &CatalogOptions) -> Self {
        let mut overlays = raster::tile_overlays();
        overlays.extend(geojson::feature_overlays());
        Self::from_recipes(overlays, raster::base_rasters(options))
    }

    pub fn from_recipes(overlays: Vec<OverlayRecipe>, base_rasters: Vec<OverlayRecipe>) -> Self {
        Self {
            overlays: overlays.into_iter().map(Arc::new).collect(),
            base_rasters: base_rasters.into_iter().map(Arc::new).collect(),
        }
    }

    /// User-toggleable overlays.
    pub fn overlays(&self) -> &[Arc<OverlayRecipe>] {
        &self.overlays
    }

    /// Raster base maps, realized as overlays beneath everything else.
    pub fn base_rasters(&self) -> &[Arc<OverlayRecipe>] {
        &self.base_rasters
    }

    pub fn overlay(&self, id: &str) -> Option<&Arc<OverlayRecipe>> {
        self.overlays.iter().find(|r| r.id.as_str() == id)
    }

    /// Find the recipe that owns a sub-layer.
    pub fn owner_of_layer(&self, layer_id: &str) -> Option<&Arc<OverlayRecipe>> {
        self.overlays
            .iter()
            .chain(self.base_rasters.iter())
            .find(|r| r.layer_ids().any(|l| l == layer_id))
    }
}

/// Draw order, lowest first: later entries end up on top.
pub fn default_priority_order() -> Vec<OverlayId> {
    [
        "tile_gsi_photo",
        "tile_gsi_relief",
        "tile_esriimagery",
        "tile_railwaymap",
        "tile_openseamap",
        "geojson_sea_route",
        "geojson_international_sea_route",
        "geojson_limited_sea_route",
        "geojson_port",
    ]
    .into_iter()
    .map(OverlayId::from)
    .collect()
}

/// Overlays shown on a first visit.
pub fn default_overlays() -> Vec<OverlayId> {
    vec![OverlayId::from("geojson_sea_route")]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog_ids_are_unique() {
        let catalog = Catalog::standard(&CatalogOptions::default());
        let mut ids: Vec<&str> = catalog
            .overlays()
            .iter()
            .chain(catalog.base_rasters())
            .map(|r| r.id.as_str())
            .collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_priority_order_covers_catalog() {
        let catalog = Catalog::standard(&CatalogOptions::default());
        for id in default_priority_order() {
            assert!(catalog.overlay(id.as_str()).is_some(), "{id} missing");
        }
    }

    #[test]
    fn test_owner_of_sub_layer() {
        let catalog = Catalog::standard(&CatalogOptions::default());
        let owner = catalog.owner_of_layer("geojson_sea_route_dashline").unwrap();
        assert_eq!(owner.id.as_str(), "geojson_sea_route");
        assert_eq!(
            catalog.owner_of_layer("tile_otm").map(|r| r.id.as_str()),
            Some("tile_otm")
        );
        assert!(catalog.owner_of_layer("water").is_none());
    }

    #[test]
    fn test_overlay_id_parsing_trims() {
        let id: OverlayId = " tile_openseamap ".parse().unwrap();
        assert_eq!(id.as_str(), "tile_openseamap");
        assert!(id.carries_prefix(&["tile".to_string()]));
        assert!(!id.carries_prefix(&["geojson".to_string()]));
    }
}
