//! Raster tile sources for walkers, built from style raster sources.

use sea_route_lib::style::{LayerKind, LayerSpec, RasterSource, SourceSpec, Style};
use sea_route_lib::BaseMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use walkers::TileId;
use walkers::sources::{Attribution, TileSource};

const OSM_TILES: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";
const OSM_ATTRIBUTION: &str = "© OpenStreetMap contributors";
const GSI_ATTRIBUTION: &str = "国土地理院";

/// An XYZ URL template source, rotating through mirror templates.
pub struct TemplateTiles {
    templates: Vec<String>,
    next: AtomicUsize,
    attribution: &'static str,
    max_zoom: u8,
}

impl TemplateTiles {
    pub fn from_source(source: &RasterSource) -> Self {
        // walkers wants 'static attribution text; sources are created once per id.
        let attribution: &'static str = match &source.attribution {
            Some(text) => Box::leak(text.clone().into_boxed_str()),
            None => "",
        };
        Self {
            templates: source.tiles.clone(),
            next: AtomicUsize::new(0),
            attribution,
            max_zoom: source.maxzoom.unwrap_or(19).min(19),
        }
    }
}

pub fn expand(template: &str, tile: TileId) -> String {
    template
        .replace("{z}", &tile.zoom.to_string())
        .replace("{x}", &tile.x.to_string())
        .replace("{y}", &tile.y.to_string())
}

impl TileSource for TemplateTiles {
    fn tile_url(&self, tile_id: TileId) -> String {
        if self.templates.is_empty() {
            return String::new();
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.templates.len();
        expand(&self.templates[index], tile_id)
    }

    fn attribution(&self) -> Attribution {
        Attribution {
            text: self.attribution,
            url: "",
            logo_light: None,
            logo_dark: None,
        }
    }

    fn max_zoom(&self) -> u8 {
        self.max_zoom
    }
}

fn raster_style(name: &str, source_id: &str, tiles: &str, attribution: &str) -> Style {
    let mut style = Style::named(name);
    style.sources.insert(
        source_id.to_string(),
        SourceSpec::Raster(RasterSource {
            tiles: vec![tiles.to_string()],
            tile_size: 256,
            minzoom: None,
            maxzoom: Some(18),
            attribution: Some(attribution.to_string()),
        }),
    );
    style.layers = vec![LayerSpec::new(source_id, LayerKind::Raster, source_id)];
    style
}

/// Raster stand-ins for the vector base map documents, which this viewer
/// cannot draw. Keyed by the document URL the coordinator asks for.
pub fn stand_in_styles() -> Vec<(&'static str, Style)> {
    let gsi = |kind: &str| format!("https://cyberjapandata.gsi.go.jp/xyz/{kind}/{{z}}/{{x}}/{{y}}.png");
    BaseMap::ALL
        .into_iter()
        .filter(|base| base.raster_overlay().is_none() && *base != BaseMap::Empty)
        .map(|base| {
            let style = match base {
                BaseMap::GsiStd => raster_style(base.label(), "gsi_std", &gsi("std"), GSI_ATTRIBUTION),
                BaseMap::GsiPale => {
                    raster_style(base.label(), "gsi_pale", &gsi("pale"), GSI_ATTRIBUTION)
                }
                BaseMap::GsiBlank => {
                    raster_style(base.label(), "gsi_blank", &gsi("blank"), GSI_ATTRIBUTION)
                }
                _ => raster_style(base.label(), "osm", OSM_TILES, OSM_ATTRIBUTION),
            };
            (base.document_url(), style)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_expansion_rotates_mirrors() {
        let tiles = TemplateTiles::from_source(&RasterSource {
            tiles: vec![
                "https://a.example.org/{z}/{x}/{y}.png".to_string(),
                "https://b.example.org/{z}/{x}/{y}.png".to_string(),
            ],
            tile_size: 256,
            minzoom: None,
            maxzoom: Some(17),
            attribution: Some("© Example".to_string()),
        });
        let tile = TileId { x: 3, y: 5, zoom: 4 };
        assert_eq!(tiles.tile_url(tile), "https://a.example.org/4/3/5.png");
        assert_eq!(tiles.tile_url(tile), "https://b.example.org/4/3/5.png");
        assert_eq!(tiles.max_zoom(), 17);
        assert_eq!(tiles.attribution().text, "© Example");
    }

    #[test]
    fn test_every_vector_base_has_a_stand_in() {
        let styles = stand_in_styles();
        assert_eq!(styles.len(), 6);
        for (url, style) in &styles {
            assert!(!url.is_empty());
            assert_eq!(style.layers.len(), 1);
            assert!(style.has_source(style.layers[0].source.as_deref().unwrap_or_default()));
        }
    }
}
