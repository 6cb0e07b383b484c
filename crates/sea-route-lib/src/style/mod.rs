//! Style document model
//!
//! A trimmed-down MapLibre style graph: named sources, an ordered list of
//! layers (index 0 paints first, the last layer paints on top) and whatever
//! other top-level keys a remote style carries, kept verbatim so that a
//! document survives a load/serialize cycle.

pub mod expr;

use crate::features::FeatureCollection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Style document version understood by the engine.
pub const STYLE_VERSION: u8 = 8;

fn default_version() -> u8 {
    STYLE_VERSION
}

/// A complete style document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Style {
    #[serde(default = "default_version")]
    pub version: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceSpec>,
    #[serde(default)]
    pub layers: Vec<LayerSpec>,
    /// Keys this model does not interpret (glyphs, sprite, center, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Style {
    fn default() -> Self {
        Self::empty()
    }
}

impl Style {
    /// A style with no sources and no layers.
    pub fn empty() -> Self {
        Self {
            version: STYLE_VERSION,
            name: None,
            sources: BTreeMap::new(),
            layers: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::empty()
        }
    }

    pub fn layer_index(&self, id: &str) -> Option<usize> {
        self.layers.iter().position(|l| l.id == id)
    }

    pub fn layer(&self, id: &str) -> Option<&LayerSpec> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn has_layer(&self, id: &str) -> bool {
        self.layer_index(id).is_some()
    }

    pub fn has_source(&self, id: &str) -> bool {
        self.sources.contains_key(id)
    }

    /// Layer ids in paint order (bottom first).
    pub fn layer_ids(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.id.as_str()).collect()
    }

    /// Layers drawing from the given source.
    pub fn layers_using(&self, source: &str) -> impl Iterator<Item = &LayerSpec> {
        self.layers
            .iter()
            .filter(move |l| l.source.as_deref() == Some(source))
    }
}

/// Where a new style comes from when the base map changes.
#[derive(Debug, Clone, PartialEq)]
pub enum StyleDocument {
    /// Resolved by the engine (remote style.json or bundled asset path).
    Url(String),
    Inline(Box<Style>),
}

impl StyleDocument {
    pub fn describe(&self) -> &str {
        match self {
            StyleDocument::Url(url) => url,
            StyleDocument::Inline(style) => style.name.as_deref().unwrap_or("<inline>"),
        }
    }
}

/// A source definition, discriminated by its `type` key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceSpec {
    Raster(RasterSource),
    Geojson(GeoJsonSource),
    Vector(VectorSource),
    /// Any source kind the engine passes through without interpreting.
    #[serde(other)]
    Unsupported,
}

impl SourceSpec {
    pub fn attribution(&self) -> Option<&str> {
        match self {
            SourceSpec::Raster(s) => s.attribution.as_deref(),
            SourceSpec::Geojson(s) => s.attribution.as_deref(),
            SourceSpec::Vector(s) => s.attribution.as_deref(),
            SourceSpec::Unsupported => None,
        }
    }
}

fn default_tile_size() -> u32 {
    256
}

/// XYZ raster tiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterSource {
    pub tiles: Vec<String>,
    #[serde(rename = "tileSize", default = "default_tile_size")]
    pub tile_size: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
}

/// GeoJSON source data is either inline or fetched by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeoJsonData {
    Inline(FeatureCollection),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoJsonSource {
    pub data: GeoJsonData,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
}

impl GeoJsonSource {
    pub fn inline(data: FeatureCollection, attribution: Option<String>) -> Self {
        Self {
            data: GeoJsonData::Inline(data),
            attribution,
        }
    }

    pub fn features(&self) -> Option<&FeatureCollection> {
        match &self.data {
            GeoJsonData::Inline(fc) => Some(fc),
            GeoJsonData::Url(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tiles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
}

/// Layer rendering kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerKind {
    Background,
    Fill,
    Line,
    Symbol,
    Circle,
    Raster,
    FillExtrusion,
    Heatmap,
    Hillshade,
    #[serde(other)]
    Other,
}

/// One renderable layer of a style.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: LayerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(
        rename = "source-layer",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source_layer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minzoom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxzoom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub layout: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub paint: Map<String, Value>,
}

impl LayerSpec {
    pub fn new(id: impl Into<String>, kind: LayerKind, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            source: Some(source.into()),
            source_layer: None,
            minzoom: None,
            maxzoom: None,
            filter: None,
            layout: Map::new(),
            paint: Map::new(),
        }
    }

    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_layout(mut self, key: &str, value: Value) -> Self {
        self.layout.insert(key.to_string(), value);
        self
    }

    pub fn with_paint(mut self, key: &str, value: Value) -> Self {
        self.paint.insert(key.to_string(), value);
        self
    }

    /// `false` only when the layout explicitly says `visibility: none`.
    pub fn is_visible(&self) -> bool {
        self.layout.get("visibility").and_then(Value::as_str) != Some("none")
    }

    pub fn applies_at(&self, zoom: f64) -> bool {
        self.minzoom.is_none_or(|min| zoom >= min) && self.maxzoom.is_none_or(|max| zoom < max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_style_keeps_unknown_keys() {
        let doc = json!({
            "version": 8,
            "glyphs": "https://example.org/fonts/{fontstack}/{range}.pbf",
            "sources": {
                "osm": {"type": "vector", "url": "https://example.org/tiles.json"},
                "dem": {"type": "raster-dem", "url": "https://example.org/dem.json"}
            },
            "layers": [
                {"id": "water", "type": "fill", "source": "osm", "source-layer": "water"}
            ]
        });
        let style: Style = serde_json::from_value(doc).unwrap();
        assert_eq!(style.layers.len(), 1);
        assert!(matches!(style.sources.get("dem"), Some(SourceSpec::Unsupported)));
        assert!(style.extra.contains_key("glyphs"));
        assert_eq!(style.layers[0].source_layer.as_deref(), Some("water"));
    }

    #[test]
    fn test_raster_source_defaults_tile_size() {
        let source: SourceSpec = serde_json::from_value(json!({
            "type": "raster",
            "tiles": ["https://tiles.example.org/{z}/{x}/{y}.png"]
        }))
        .unwrap();
        match source {
            SourceSpec::Raster(r) => assert_eq!(r.tile_size, 256),
            other => panic!("unexpected source {other:?}"),
        }
    }

    #[test]
    fn test_layer_visibility_and_zoom_range() {
        let mut layer = LayerSpec::new("a", LayerKind::Line, "src");
        assert!(layer.is_visible());
        layer = layer.with_layout("visibility", json!("none"));
        assert!(!layer.is_visible());

        layer.minzoom = Some(5.0);
        layer.maxzoom = Some(15.0);
        assert!(!layer.applies_at(4.0));
        assert!(layer.applies_at(5.0));
        assert!(!layer.applies_at(15.0));
    }
}
