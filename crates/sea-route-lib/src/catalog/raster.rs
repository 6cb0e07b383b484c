use super::{CatalogOptions, LayerGroup, OverlayId, OverlayKind, OverlayRecipe};
use crate::style::{LayerKind, LayerSpec, RasterSource};
use serde_json::json;

const OSM_ATTRIBUTION: &str = "© OpenStreetMap contributors";
const GSI_ATTRIBUTION: &str = "国土地理院";

struct TileRecipe<'a> {
    id: &'a str,
    label: &'a str,
    tiles: Vec<String>,
    attribution: String,
    zoom: (u8, u8),
    opacity: Option<f64>,
}

impl TileRecipe<'_> {
    fn build(self) -> OverlayRecipe {
        let (minzoom, maxzoom) = self.zoom;
        let mut layer = LayerSpec::new(self.id, LayerKind::Raster, self.id);
        layer.minzoom = Some(f64::from(minzoom));
        layer.maxzoom = Some(f64::from(maxzoom));
        if let Some(opacity) = self.opacity {
            layer = layer.with_paint("raster-opacity", json!(opacity));
        }

        OverlayRecipe {
            id: OverlayId::from(self.id),
            label: self.label.to_string(),
            group: LayerGroup::Tile,
            kind: OverlayKind::Tile {
                source: RasterSource {
                    tiles: self.tiles,
                    tile_size: 256,
                    minzoom: None,
                    maxzoom: None,
                    attribution: Some(self.attribution),
                },
            },
            layers: vec![layer],
            images: Vec::new(),
            interactive_layer: None,
            popup: None,
        }
    }
}

/// `https://{a,b,c}.<host>/...` mirrors.
fn abc(template: &str) -> Vec<String> {
    ["a", "b", "c"]
        .iter()
        .map(|s| template.replace("{s}", s))
        .collect()
}

fn osm_and(other: &str) -> String {
    format!("{OSM_ATTRIBUTION} {other}")
}

fn esri_imagery(id: &str, label: &str) -> OverlayRecipe {
    TileRecipe {
        id,
        label,
        tiles: vec![
            "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}"
                .to_string(),
        ],
        attribution: "Tiles © Esri".to_string(),
        zoom: (2, 19),
        opacity: None,
    }
    .build()
}

/// Tile overlays the user can toggle.
pub(super) fn tile_overlays() -> Vec<OverlayRecipe> {
    vec![
        TileRecipe {
            id: "tile_gsi_photo",
            label: "地理院 写真",
            tiles: vec![
                "https://cyberjapandata.gsi.go.jp/xyz/seamlessphoto/{z}/{x}/{y}.jpg".to_string(),
            ],
            attribution: GSI_ATTRIBUTION.to_string(),
            zoom: (2, 18),
            opacity: Some(0.6),
        }
        .build(),
        TileRecipe {
            id: "tile_gsi_relief",
            label: "地理院 標高図",
            tiles: vec!["https://cyberjapandata.gsi.go.jp/xyz/relief/{z}/{x}/{y}.png".to_string()],
            attribution: GSI_ATTRIBUTION.to_string(),
            zoom: (5, 15),
            opacity: Some(0.7),
        }
        .build(),
        esri_imagery("tile_esriimagery", "EsriWorldImagery"),
        TileRecipe {
            id: "tile_railwaymap",
            label: "OpenRailwayMap",
            tiles: abc("https://{s}.tiles.openrailwaymap.org/standard/{z}/{x}/{y}.png"),
            attribution: osm_and("© OpenRailwayMap"),
            zoom: (2, 19),
            opacity: None,
        }
        .build(),
        TileRecipe {
            id: "tile_openseamap",
            label: "OpenSeaMap",
            tiles: vec!["https://tiles.openseamap.org/seamark/{z}/{x}/{y}.png".to_string()],
            attribution: osm_and("© OpenSeaMap"),
            zoom: (2, 18),
            opacity: None,
        }
        .build(),
    ]
}

/// Raster base maps. Their ids never collide with user overlays.
pub(super) fn base_rasters(options: &CatalogOptions) -> Vec<OverlayRecipe> {
    let apikey = options.thunderforest_api_key.as_deref().unwrap_or_default();
    if apikey.is_empty() {
        tracing::debug!("no Thunderforest API key configured, transport tiles will be watermarked");
    }
    vec![
        TileRecipe {
            id: "tile_otm",
            label: "OpenTopoMap",
            tiles: abc("https://{s}.tile.opentopomap.org/{z}/{x}/{y}.png"),
            attribution: osm_and("© OpenTopoMap"),
            zoom: (2, 18),
            opacity: None,
        }
        .build(),
        TileRecipe {
            id: "tile_transportmap",
            label: "TransportMap",
            tiles: abc(&format!(
                "https://{{s}}.tile.thunderforest.com/transport/{{z}}/{{x}}/{{y}}.png?apikey={apikey}"
            )),
            attribution: osm_and("© Thunderforest"),
            zoom: (2, 19),
            opacity: None,
        }
        .build(),
        esri_imagery("tile_esri_base", "Esri World Imagery"),
    ]
}
