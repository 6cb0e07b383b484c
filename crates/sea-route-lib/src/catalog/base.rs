use super::OverlayId;
use std::fmt;

/// Style document loaded for raster base maps and unknown selections.
pub const EMPTY_STYLE_URL: &str = "./style/empty.json";

/// Selectable base maps. The discriminants are the persisted codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum BaseMap {
    Empty = 0,
    OsmBright = 10,
    OsmPlanet = 11,
    OpenTopoMap = 12,
    GsiStd = 20,
    GsiPale = 21,
    GsiBlank = 22,
    Transport = 30,
    EsriPhoto = 40,
    OsmCustom = 90,
}

/// How a base map is realized in the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseStyle {
    /// A full style document.
    Vector { url: &'static str },
    /// The empty style plus a raster overlay beneath all other overlays.
    Raster { overlay: OverlayId },
}

impl BaseMap {
    /// Control-panel order.
    pub const ALL: [BaseMap; 10] = [
        BaseMap::OsmCustom,
        BaseMap::OsmBright,
        BaseMap::OsmPlanet,
        BaseMap::GsiStd,
        BaseMap::GsiPale,
        BaseMap::GsiBlank,
        BaseMap::OpenTopoMap,
        BaseMap::Transport,
        BaseMap::EsriPhoto,
        BaseMap::Empty,
    ];

    pub fn code(self) -> u16 {
        self as u16
    }

    /// `None` for codes this build does not know.
    pub fn from_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.code() == code)
    }

    pub fn label(self) -> &'static str {
        match self {
            BaseMap::Empty => "None",
            BaseMap::OsmBright => "OSM Bright",
            BaseMap::OsmPlanet => "OSM Planet",
            BaseMap::OpenTopoMap => "OpenTopoMap",
            BaseMap::GsiStd => "地理院 標準",
            BaseMap::GsiPale => "地理院 淡色",
            BaseMap::GsiBlank => "地理院 白地図",
            BaseMap::Transport => "TransportMap",
            BaseMap::EsriPhoto => "Esri World Imagery",
            BaseMap::OsmCustom => "OSM Custom",
        }
    }

    pub fn style(self) -> BaseStyle {
        let vector = |url| BaseStyle::Vector { url };
        let raster = |id: &str| BaseStyle::Raster {
            overlay: OverlayId::from(id),
        };
        match self {
            BaseMap::Empty => vector(EMPTY_STYLE_URL),
            BaseMap::OsmBright => {
                vector("https://tile.openstreetmap.jp/styles/osm-bright-ja/style.json")
            }
            BaseMap::OsmPlanet => {
                vector("https://tile.openstreetmap.jp/styles/openmaptiles/style.json")
            }
            BaseMap::GsiStd => {
                vector("https://gsi-cyberjapan.github.io/gsivectortile-mapbox-gl-js/std.json")
            }
            BaseMap::GsiPale => {
                vector("https://gsi-cyberjapan.github.io/gsivectortile-mapbox-gl-js/pale.json")
            }
            BaseMap::GsiBlank => {
                vector("https://gsi-cyberjapan.github.io/gsivectortile-mapbox-gl-js/blank.json")
            }
            BaseMap::OsmCustom => vector("./style/osm-bright-style.json"),
            BaseMap::OpenTopoMap => raster("tile_otm"),
            BaseMap::Transport => raster("tile_transportmap"),
            BaseMap::EsriPhoto => raster("tile_esri_base"),
        }
    }

    /// The style document `setStyle` receives for this base map.
    pub fn document_url(self) -> &'static str {
        match self.style() {
            BaseStyle::Vector { url } => url,
            BaseStyle::Raster { .. } => EMPTY_STYLE_URL,
        }
    }

    pub fn raster_overlay(self) -> Option<OverlayId> {
        match self.style() {
            BaseStyle::Raster { overlay } => Some(overlay),
            BaseStyle::Vector { .. } => None,
        }
    }
}

impl fmt::Display for BaseMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for base in BaseMap::ALL {
            assert_eq!(BaseMap::from_code(base.code()), Some(base));
        }
        assert_eq!(BaseMap::from_code(13), None);
        assert_eq!(BaseMap::from_code(999), None);
    }

    #[test]
    fn test_raster_base_maps_load_empty_style() {
        assert_eq!(BaseMap::OpenTopoMap.document_url(), EMPTY_STYLE_URL);
        assert_eq!(
            BaseMap::Transport.raster_overlay().map(|o| o.to_string()),
            Some("tile_transportmap".to_string())
        );
        assert!(BaseMap::GsiPale.raster_overlay().is_none());
        assert!(BaseMap::GsiPale.document_url().ends_with("pale.json"));
    }
}
