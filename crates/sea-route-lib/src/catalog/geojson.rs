use super::{DataJob, LayerGroup, MarkerImage, OverlayId, OverlayKind, OverlayRecipe};
use crate::popup::PopupKind;
use crate::style::{LayerKind, LayerSpec};
use serde_json::{Value, json};

const ANCHOR_MARKER: &str = "anchor_marker";
const ANCHOR_MARKER_PATH: &str = "img/anchor.png";
const PORT_ATTRIBUTION: &str = "「国土数値情報（港湾データ）」を加工して作成";
const LABEL_FONT: &str = "NotoSansCJKjp-Regular";

/// Line-width parameters that differ between route families.
struct RouteStyle {
    outline_color: &'static str,
    /// `coalesce` fallback for `freq` on solid and dashed lines.
    default_freq: f64,
    /// Width factor at zoom 3 for solid and dashed lines.
    low_zoom_factor: f64,
}

const DOMESTIC: RouteStyle = RouteStyle {
    outline_color: "#FFFFFF",
    default_freq: 3.0,
    low_zoom_factor: 0.5,
};

const INTERNATIONAL: RouteStyle = RouteStyle {
    outline_color: "#FFFFFF",
    default_freq: 1.0,
    low_zoom_factor: 0.75,
};

const LIMITED: RouteStyle = RouteStyle {
    outline_color: "#000000",
    default_freq: 1.0,
    low_zoom_factor: 0.75,
};

fn width(low: Value, high: Value) -> Value {
    json!(["interpolate", ["linear"], ["zoom"], 3, low, 6, high])
}

fn freq(default_freq: f64) -> Value {
    json!(["coalesce", ["get", "freq"], default_freq])
}

fn route_color() -> Value {
    json!(["coalesce", ["get", "color"], "#000000"])
}

fn route_line(
    id: &str,
    suffix: &str,
    note: Value,
    dash: Value,
    default_freq: f64,
    low: f64,
) -> LayerSpec {
    LayerSpec::new(format!("{id}_{suffix}"), LayerKind::Line, id)
        .with_layout("line-join", json!("round"))
        .with_layout("line-cap", json!("round"))
        .with_filter(json!(["==", ["get", "note"], note]))
        .with_paint("line-color", route_color())
        .with_paint(
            "line-width",
            width(
                json!(["*", freq(default_freq), low]),
                json!(["*", freq(default_freq), 1.0]),
            ),
        )
        .with_paint("line-dasharray", dash)
}

/// Outline, solid, seasonal, suspended and label layers of one route overlay.
fn route_layers(id: &str, style: &RouteStyle) -> Vec<LayerSpec> {
    let outline = LayerSpec::new(format!("{id}_outline"), LayerKind::Line, id)
        .with_layout("line-join", json!("round"))
        .with_layout("line-cap", json!("round"))
        .with_paint("line-color", json!(style.outline_color))
        .with_paint(
            "line-width",
            width(
                json!(["*", freq(3.0), 0.5]),
                json!(["+", ["*", freq(3.0), 1.0], 4]),
            ),
        )
        .with_paint("line-opacity", json!(0.5));

    let label = LayerSpec::new(format!("{id}_name"), LayerKind::Symbol, id)
        .with_layout("symbol-placement", json!("line"))
        .with_layout("text-offset", json!([0, 1]))
        .with_layout(
            "text-field",
            json!([
                "step", ["zoom"],
                "",
                4, ["get", "businessName"],
                6, ["format",
                    ["get", "businessName"], {},
                    " (", {},
                    ["get", "routeName"], {},
                    ") ", {}]
            ]),
        )
        .with_layout("text-font", json!([LABEL_FONT]))
        .with_layout("text-size", json!(9))
        .with_paint("text-color", route_color())
        .with_paint("text-halo-color", json!("#FFFFFF"))
        .with_paint("text-halo-width", json!(2))
        .with_paint("text-halo-blur", json!(2));

    vec![
        outline,
        route_line(id, "solidline", Value::Null, json!([1, 0]), style.default_freq, style.low_zoom_factor),
        route_line(id, "dashline", json!("season"), json!([1, 2]), style.default_freq, style.low_zoom_factor),
        // Suspended routes keep the thin defaults in every family.
        route_line(id, "thinline", json!("suspend"), json!([1, 4]), 1.0, 0.75),
        label,
    ]
}

fn route_overlay(id: &str, label: &str, data: &str, style: &RouteStyle) -> OverlayRecipe {
    OverlayRecipe {
        id: OverlayId::from(id),
        label: label.to_string(),
        group: LayerGroup::GeoJson,
        kind: OverlayKind::FeatureCollection {
            job: DataJob::LoadAndMerge {
                path: format!("data/{data}.geojson"),
                details_path: format!("data/{data}Details.json"),
                join_property: "routeId".to_string(),
            },
            attribution: None,
        },
        layers: route_layers(id, style),
        images: Vec::new(),
        interactive_layer: Some(format!("{id}_outline")),
        popup: Some(PopupKind::SeaRoute),
    }
}

fn port_overlay() -> OverlayRecipe {
    let id = "geojson_port";
    let layer = LayerSpec::new(id, LayerKind::Symbol, id)
        .with_layout("icon-image", json!(ANCHOR_MARKER))
        .with_layout("icon-size", json!(0.3))
        .with_layout("text-field", json!(["get", "Name"]))
        .with_layout("text-font", json!([LABEL_FONT]))
        .with_layout("text-size", json!(12))
        .with_layout("text-offset", json!([0, 0.8]))
        .with_layout("text-anchor", json!("top"));

    OverlayRecipe {
        id: OverlayId::from(id),
        label: "港湾情報".to_string(),
        group: LayerGroup::GeoJson,
        kind: OverlayKind::FeatureCollection {
            job: DataJob::Load {
                path: "data/portData.geojson".to_string(),
            },
            attribution: Some(PORT_ATTRIBUTION.to_string()),
        },
        layers: vec![layer],
        images: vec![MarkerImage {
            id: ANCHOR_MARKER.to_string(),
            path: ANCHOR_MARKER_PATH.to_string(),
        }],
        interactive_layer: Some(id.to_string()),
        popup: Some(PopupKind::Port),
    }
}

pub(super) fn feature_overlays() -> Vec<OverlayRecipe> {
    vec![
        port_overlay(),
        route_overlay("geojson_sea_route", "国内航路", "seaRoute", &DOMESTIC),
        route_overlay(
            "geojson_international_sea_route",
            "国際航路",
            "internationalSeaRoute",
            &INTERNATIONAL,
        ),
        route_overlay(
            "geojson_limited_sea_route",
            "期間限定航路",
            "limitedSeaRoute",
            &LIMITED,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::style::expr::{EvalContext, evaluate_number};
    use serde_json::Map;

    #[test]
    fn test_route_sub_layers_in_paint_order() {
        let recipe = route_overlay("geojson_sea_route", "x", "seaRoute", &DOMESTIC);
        let ids: Vec<&str> = recipe.layer_ids().collect();
        assert_eq!(
            ids,
            vec![
                "geojson_sea_route_outline",
                "geojson_sea_route_solidline",
                "geojson_sea_route_dashline",
                "geojson_sea_route_thinline",
                "geojson_sea_route_name",
            ]
        );
        assert_eq!(recipe.interactive_layer.as_deref(), Some("geojson_sea_route_outline"));
        assert!(recipe.layers.iter().all(|l| l.source.as_deref() == Some("geojson_sea_route")));
    }

    #[test]
    fn test_limited_routes_use_dark_outline_and_thin_defaults() {
        let recipe = route_overlay("geojson_limited_sea_route", "x", "limitedSeaRoute", &LIMITED);
        assert_eq!(recipe.layers[0].paint.get("line-color"), Some(&json!("#000000")));

        let props = Map::new();
        let solid_width = recipe.layers[1].paint.get("line-width").unwrap();
        assert_eq!(evaluate_number(solid_width, &EvalContext::new(3.0, &props)), Some(0.75));
    }

    #[test]
    fn test_port_overlay_needs_marker() {
        let port = port_overlay();
        assert_eq!(port.images.len(), 1);
        assert_eq!(port.layers[0].layout.get("icon-image"), Some(&json!(ANCHOR_MARKER)));
        match &port.kind {
            OverlayKind::FeatureCollection { job: DataJob::Load { path }, attribution } => {
                assert_eq!(path, "data/portData.geojson");
                assert!(attribution.is_some());
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }
}
