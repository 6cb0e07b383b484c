//! Walkers plugin drawing the feature layers of the engine's style
//!
//! Line and symbol layers backed by inline GeoJSON are painted in stack
//! order, each feature through the layer's filter and paint expressions.
//! Raster layers are not handled here; they are walkers tile layers.
//! A click on an interactive layer records the nearest feature for the popup.

use egui::{Align2, Color32, FontId, Painter, Pos2, Shape, Stroke};
use sea_route_lib::engine::HeadlessEngine;
use sea_route_lib::features::{Geometry, Position};
use sea_route_lib::style::expr::{EvalContext, evaluate, evaluate_filter, evaluate_number, evaluate_text};
use sea_route_lib::style::{LayerKind, LayerSpec, SourceSpec};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use walkers::{MapMemory, Plugin, Projector};

/// Clicks further than this from every feature pick nothing.
const PICK_RADIUS: f32 = 8.0;

/// Style zoom levels count 512 px tiles, walkers counts 256 px ones.
pub fn style_zoom(map_zoom: f64) -> f64 {
    (map_zoom - 1.0).max(0.0)
}

pub fn map_zoom(style_zoom: f64) -> f64 {
    style_zoom + 1.0
}

/// A feature the user clicked.
#[derive(Debug, Clone, PartialEq)]
pub struct Pick {
    pub layer: String,
    pub properties: Map<String, Value>,
}

/// Draw statistics of the last frame, shown in the sidebar.
#[derive(Debug, Default, Clone, Copy)]
pub struct RenderStats {
    pub layers_drawn: usize,
    pub features_drawn: usize,
}

pub struct StylePlugin {
    engine: Arc<HeadlessEngine>,
    interactive: Arc<HashSet<String>>,
    picked: Arc<RwLock<Option<Pick>>>,
    stats: Arc<RwLock<RenderStats>>,
}

impl StylePlugin {
    pub fn new(
        engine: Arc<HeadlessEngine>,
        interactive: Arc<HashSet<String>>,
        picked: Arc<RwLock<Option<Pick>>>,
        stats: Arc<RwLock<RenderStats>>,
    ) -> Self {
        Self {
            engine,
            interactive,
            picked,
            stats,
        }
    }
}

impl Plugin for StylePlugin {
    fn run(
        self: Box<Self>,
        ui: &mut egui::Ui,
        response: &egui::Response,
        projector: &Projector,
        map_memory: &MapMemory,
    ) {
        profiling::scope!("StylePlugin::run");

        let zoom = style_zoom(map_memory.zoom());
        let painter = ui.painter();
        let click = if response.clicked() {
            response.interact_pointer_pos()
        } else {
            None
        };
        let mut best: Option<(f32, Pick)> = None;
        let mut stats = RenderStats::default();

        self.engine.with_style(|style| {
            for layer in &style.layers {
                if !matches!(layer.kind, LayerKind::Line | LayerKind::Symbol)
                    || !layer.is_visible()
                    || !layer.applies_at(zoom)
                {
                    continue;
                }
                let Some(SourceSpec::Geojson(source)) = layer
                    .source
                    .as_deref()
                    .and_then(|id| style.sources.get(id))
                else {
                    continue;
                };
                let Some(collection) = source.features() else {
                    continue;
                };
                stats.layers_drawn += 1;

                for feature in &collection.features {
                    let ctx = EvalContext::new(zoom, &feature.properties);
                    let Some(geometry) = &feature.geometry else {
                        continue;
                    };
                    if !evaluate_filter(layer.filter.as_ref(), &ctx) {
                        continue;
                    }
                    let screen = project(projector, geometry);
                    match layer.kind {
                        LayerKind::Line => draw_line(painter, layer, &ctx, &screen),
                        _ => draw_symbol(painter, layer, &ctx, &screen),
                    }
                    stats.features_drawn += 1;

                    if let Some(pointer) = click
                        && self.interactive.contains(&layer.id)
                    {
                        let distance = screen.distance_to(pointer);
                        if distance <= PICK_RADIUS && best.as_ref().is_none_or(|(d, _)| distance < *d) {
                            best = Some((
                                distance,
                                Pick {
                                    layer: layer.id.clone(),
                                    properties: feature.properties.clone(),
                                },
                            ));
                        }
                    }
                }
            }
        });

        if let Ok(mut slot) = self.stats.try_write() {
            *slot = stats;
        }
        if let Some((_, pick)) = best
            && let Ok(mut slot) = self.picked.try_write()
        {
            tracing::debug!(layer = %pick.layer, "feature picked");
            *slot = Some(pick);
        }
    }
}

/// A geometry in screen space.
#[derive(Debug, Default, PartialEq)]
pub struct ScreenGeometry {
    pub lines: Vec<Vec<Pos2>>,
    pub points: Vec<Pos2>,
}

impl ScreenGeometry {
    pub fn distance_to(&self, pointer: Pos2) -> f32 {
        let to_points = self.points.iter().map(|p| p.distance(pointer));
        let to_lines = self.lines.iter().flat_map(|line| {
            line.windows(2)
                .map(move |pair| distance_to_segment(pointer, pair[0], pair[1]))
        });
        to_points.chain(to_lines).fold(f32::INFINITY, f32::min)
    }

    /// Where a label along the longest line goes.
    fn label_anchor(&self) -> Option<Pos2> {
        let longest = self.lines.iter().max_by(|a, b| {
            polyline_length(a).total_cmp(&polyline_length(b))
        })?;
        let half = polyline_length(longest) / 2.0;
        let mut walked = 0.0;
        for pair in longest.windows(2) {
            let step = pair[0].distance(pair[1]);
            if walked + step >= half && step > 0.0 {
                return Some(pair[0].lerp(pair[1], (half - walked) / step));
            }
            walked += step;
        }
        longest.first().copied()
    }
}

fn polyline_length(line: &[Pos2]) -> f32 {
    line.windows(2).map(|p| p[0].distance(p[1])).sum()
}

pub fn distance_to_segment(p: Pos2, a: Pos2, b: Pos2) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_sq();
    if len_sq == 0.0 {
        return p.distance(a);
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    p.distance(a + ab * t)
}

fn to_screen(projector: &Projector, position: &Position) -> Pos2 {
    let [lng, lat] = *position;
    projector.project(walkers::lon_lat(lng, lat)).to_pos2()
}

fn project(projector: &Projector, geometry: &Geometry) -> ScreenGeometry {
    ScreenGeometry {
        lines: geometry
            .lines()
            .into_iter()
            .map(|line| line.iter().map(|p| to_screen(projector, p)).collect())
            .collect(),
        points: geometry
            .points()
            .iter()
            .map(|p| to_screen(projector, p))
            .collect(),
    }
}

/// `#rgb` and `#rrggbb` colours.
pub fn parse_color(text: &str) -> Option<Color32> {
    let hex = text.trim().strip_prefix('#')?;
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut rgb = hex.chars().map(|c| channel(&c.to_string()).map(|v| v * 17));
            Some(Color32::from_rgb(rgb.next()??, rgb.next()??, rgb.next()??))
        }
        6 => Some(Color32::from_rgb(
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
        )),
        _ => None,
    }
}

fn paint_color(layer: &LayerSpec, key: &str, ctx: &EvalContext<'_>, fallback: Color32) -> Color32 {
    layer
        .paint
        .get(key)
        .and_then(|expr| evaluate_text(expr, ctx))
        .and_then(|text| parse_color(&text))
        .unwrap_or(fallback)
}

fn number(map: &Map<String, Value>, key: &str, ctx: &EvalContext<'_>) -> Option<f32> {
    map.get(key)
        .and_then(|expr| evaluate_number(expr, ctx))
        .map(|v| v as f32)
}

fn draw_line(painter: &Painter, layer: &LayerSpec, ctx: &EvalContext<'_>, screen: &ScreenGeometry) {
    let width = number(&layer.paint, "line-width", ctx).unwrap_or(1.0).max(0.5);
    let opacity = number(&layer.paint, "line-opacity", ctx).unwrap_or(1.0);
    let color = paint_color(layer, "line-color", ctx, Color32::BLACK).gamma_multiply(opacity);
    let stroke = Stroke::new(width, color);

    let dash = layer
        .paint
        .get("line-dasharray")
        .map(|expr| evaluate(expr, ctx))
        .and_then(|v| {
            let parts = v.as_array()?;
            Some((parts.first()?.as_f64()? as f32, parts.get(1)?.as_f64()? as f32))
        })
        .filter(|(_, gap)| *gap > 0.0);

    for line in screen.lines.iter().filter(|l| l.len() >= 2) {
        match dash {
            Some((on, off)) => {
                painter.extend(Shape::dashed_line(line, stroke, on * width, off * width));
            }
            None => {
                painter.add(Shape::line(line.clone(), stroke));
            }
        }
    }
}

fn draw_symbol(painter: &Painter, layer: &LayerSpec, ctx: &EvalContext<'_>, screen: &ScreenGeometry) {
    let along_line = layer.layout.get("symbol-placement").and_then(Value::as_str) == Some("line");
    let anchors: Vec<Pos2> = if along_line {
        screen.label_anchor().into_iter().collect()
    } else {
        screen.points.clone()
    };
    let has_icon = layer.layout.contains_key("icon-image");
    let text = layer
        .layout
        .get("text-field")
        .and_then(|expr| evaluate_text(expr, ctx))
        .filter(|t| !t.is_empty());
    let size = number(&layer.layout, "text-size", ctx).unwrap_or(12.0);
    let color = paint_color(layer, "text-color", ctx, Color32::from_gray(30));
    let halo = paint_color(layer, "text-halo-color", ctx, Color32::WHITE);
    let offset = layer
        .layout
        .get("text-offset")
        .and_then(Value::as_array)
        .map(|o| {
            let em = |i: usize| o.get(i).and_then(Value::as_f64).unwrap_or(0.0) as f32 * size;
            egui::vec2(em(0), em(1))
        })
        .unwrap_or_default();

    for anchor in anchors {
        if has_icon {
            let radius = 5.0;
            painter.circle(anchor, radius, Color32::from_rgb(20, 60, 130), Stroke::new(1.5, Color32::WHITE));
        }
        if let Some(text) = &text {
            let at = anchor + offset;
            let align = if has_icon { Align2::CENTER_TOP } else { Align2::CENTER_CENTER };
            let font = FontId::proportional(size);
            for d in [egui::vec2(-1.0, 0.0), egui::vec2(1.0, 0.0), egui::vec2(0.0, -1.0), egui::vec2(0.0, 1.0)] {
                painter.text(at + d, align, text, font.clone(), halo);
            }
            painter.text(at, align, text, font, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("#1E90FF"), Some(Color32::from_rgb(0x1E, 0x90, 0xFF)));
        assert_eq!(parse_color("#fff"), Some(Color32::WHITE));
        assert_eq!(parse_color("red"), None);
        assert_eq!(parse_color("#12345"), None);
    }

    #[test]
    fn test_distance_to_segment() {
        let a = Pos2::new(0.0, 0.0);
        let b = Pos2::new(10.0, 0.0);
        assert_eq!(distance_to_segment(Pos2::new(5.0, 3.0), a, b), 3.0);
        assert_eq!(distance_to_segment(Pos2::new(14.0, 3.0), a, b), 5.0);
        assert_eq!(distance_to_segment(Pos2::new(1.0, 1.0), a, a), 2f32.sqrt());
    }

    #[test]
    fn test_label_sits_halfway_along_longest_line() {
        let screen = ScreenGeometry {
            lines: vec![
                vec![Pos2::new(0.0, 0.0), Pos2::new(2.0, 0.0)],
                vec![Pos2::new(0.0, 10.0), Pos2::new(10.0, 10.0), Pos2::new(10.0, 20.0)],
            ],
            points: Vec::new(),
        };
        assert_eq!(screen.label_anchor(), Some(Pos2::new(10.0, 10.0)));
        assert_eq!(screen.distance_to(Pos2::new(1.0, 1.0)), 1.0);
    }

    #[test]
    fn test_zoom_conversion() {
        assert_eq!(style_zoom(6.0), 5.0);
        assert_eq!(style_zoom(0.5), 0.0);
        assert_eq!(map_zoom(style_zoom(9.0)), 9.0);
    }
}
