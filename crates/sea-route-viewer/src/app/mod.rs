//! Main application: the map, the layers control and feature popups.

mod style_plugin;
mod tiles;
mod ui_panels;

use crate::cli::Settings;
use crate::loader::AnyDataLoader;
use sea_route_lib::control::ControlAction;
use sea_route_lib::popup::PopupKind;
use sea_route_lib::prefs::{MemoryStore, default_store};
use sea_route_lib::style::{LayerKind, SourceSpec};
use sea_route_lib::{
    Catalog, EngineAdapter, FeaturePopup, HeadlessEngine, LoadError, MapController, MapEngine,
    MapView, RegistryError,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use style_plugin::{Pick, RenderStats, StylePlugin, map_zoom, style_zoom};
use tiles::TemplateTiles;
use tokio::sync::RwLock;
use walkers::{HttpTiles, Map, MapMemory, Tiles};

const NOTICE_TTL: Duration = Duration::from_secs(6);
const FRAME_INTERVAL: Duration = Duration::from_millis(16);

/// Why the viewer could not start.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to set up data loading: {0}")]
    Loader(#[from] LoadError),

    #[error("Invalid overlay catalog: {0}")]
    Catalog(#[from] RegistryError),
}

/// A message shown to the user for a while.
pub struct Notice {
    pub text: String,
    pub shown_at: instant::Instant,
}

/// The open feature popup.
pub struct PopupState {
    pub popup: FeaturePopup,
    pub open: bool,
}

pub struct SeaRouteApp {
    engine: Arc<HeadlessEngine>,
    controller: MapController<AnyDataLoader>,
    map_memory: MapMemory,
    /// One tile cache per raster source id.
    tiles: HashMap<String, HttpTiles>,
    /// Interactive layer id to the popup it opens.
    popups: HashMap<String, PopupKind>,
    interactive: Arc<HashSet<String>>,
    picked: Arc<RwLock<Option<Pick>>>,
    render_stats: Arc<RwLock<RenderStats>>,
    notices_tx: mpsc::Sender<String>,
    notices_rx: mpsc::Receiver<String>,
    notices: Vec<Notice>,
    /// Controller operations still running.
    in_flight: Arc<AtomicUsize>,
    popup: Option<PopupState>,
    show_sidebar: bool,
}

impl SeaRouteApp {
    pub fn new(cc: &eframe::CreationContext<'_>) -> Result<Self, StartupError> {
        let settings = Settings::from_cli();
        tracing::info!(data_root = %settings.data_root, "starting viewer");

        let engine = Arc::new(HeadlessEngine::default());
        for (url, style) in tiles::stand_in_styles() {
            engine.register_document(url, style);
        }

        let loader = Arc::new(AnyDataLoader::for_root(&settings.data_root)?);
        let adapter = EngineAdapter::new(engine.clone() as Arc<dyn MapEngine>)
            .with_asset_root(AnyDataLoader::asset_root(&settings.data_root));
        let store = default_store(settings.storage_path.clone()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "preferences will not be kept across sessions");
            Arc::new(MemoryStore::new())
        });
        let catalog = Arc::new(Catalog::standard(&settings.catalog_options()));

        let popups: HashMap<String, PopupKind> = catalog
            .overlays()
            .iter()
            .filter_map(|recipe| Some((recipe.interactive_layer.clone()?, recipe.popup?)))
            .collect();
        let interactive = Arc::new(popups.keys().cloned().collect());

        let controller = MapController::new(
            adapter,
            catalog,
            loader,
            store,
            settings.session_config(),
        )?;

        let mut map_memory = MapMemory::default();
        let view = controller.view();
        map_memory.center_at(walkers::lon_lat(view.center[0], view.center[1]));
        if let Err(e) = map_memory.set_zoom(map_zoom(view.zoom)) {
            tracing::warn!(zoom = view.zoom, error = ?e, "stored zoom rejected");
        }

        let (notices_tx, notices_rx) = mpsc::channel();
        let app = Self {
            engine,
            controller,
            map_memory,
            tiles: HashMap::new(),
            popups,
            interactive,
            picked: Arc::new(RwLock::new(None)),
            render_stats: Arc::new(RwLock::new(RenderStats::default())),
            notices_tx,
            notices_rx,
            notices: Vec::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
            popup: None,
            show_sidebar: true,
        };

        let controller = app.controller.clone();
        let in_flight = app.in_flight.clone();
        let ctx = cc.egui_ctx.clone();
        in_flight.fetch_add(1, Ordering::SeqCst);
        sea_route_lib::runtime::spawn(async move {
            let report = controller.restore().await;
            if !report.skipped.is_empty() {
                tracing::info!(skipped = ?report.skipped, "some stored overlays were not restored");
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
            ctx.request_repaint();
        });

        Ok(app)
    }

    /// Run a layers control action in the background.
    fn dispatch(&self, ctx: &egui::Context, action: ControlAction) {
        let controller = self.controller.clone();
        let notices = self.notices_tx.clone();
        let in_flight = self.in_flight.clone();
        let ctx = ctx.clone();
        in_flight.fetch_add(1, Ordering::SeqCst);
        sea_route_lib::runtime::spawn(async move {
            if let Err(e) = controller.apply(action.clone()).await {
                if e.is_user_visible() {
                    tracing::error!(?action, error = %e, "layer operation failed");
                    let _ = notices.send(e.to_string());
                } else {
                    tracing::debug!(?action, error = %e, "layer operation declined");
                }
            }
            in_flight.fetch_sub(1, Ordering::SeqCst);
            ctx.request_repaint();
        });
    }

    /// Create tile caches for raster sources that appeared in the style.
    fn sync_tiles(&mut self, ctx: &egui::Context) {
        let new_sources: Vec<(String, TemplateTiles)> = self.engine.with_style(|style| {
            style
                .sources
                .iter()
                .filter(|(id, _)| !self.tiles.contains_key(*id))
                .filter_map(|(id, source)| match source {
                    SourceSpec::Raster(raster) => {
                        Some((id.clone(), TemplateTiles::from_source(raster)))
                    }
                    _ => None,
                })
                .collect()
        });
        for (id, source) in new_sources {
            tracing::debug!(source = %id, "creating tile cache");
            self.tiles.insert(id, HttpTiles::new(source, ctx.clone()));
        }
    }

    /// Visible raster layers bottom first, as source id and opacity.
    fn raster_stack(&self, zoom: f64) -> Vec<(String, f32)> {
        self.engine.with_style(|style| {
            style
                .layers
                .iter()
                .filter(|l| l.kind == LayerKind::Raster && l.is_visible() && l.applies_at(zoom))
                .filter_map(|l| {
                    let opacity = l
                        .paint
                        .get("raster-opacity")
                        .and_then(serde_json::Value::as_f64)
                        .unwrap_or(1.0);
                    Some((l.source.clone()?, opacity as f32))
                })
                .collect()
        })
    }

    fn attribution(&self) -> String {
        self.engine.with_style(|style| {
            let mut seen = Vec::new();
            for layer in style.layers.iter().filter(|l| l.is_visible()) {
                if let Some(text) = layer
                    .source
                    .as_deref()
                    .and_then(|id| style.sources.get(id))
                    .and_then(SourceSpec::attribution)
                    && !seen.contains(&text)
                {
                    seen.push(text);
                }
            }
            seen.join(" | ")
        })
    }

    fn drain_notices(&mut self) {
        while let Ok(text) = self.notices_rx.try_recv() {
            self.notices.push(Notice {
                text,
                shown_at: instant::Instant::now(),
            });
        }
        self.notices.retain(|n| n.shown_at.elapsed() < NOTICE_TTL);
    }

    fn take_pick(&mut self) {
        let pick = match self.picked.try_write() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let Some(pick) = pick
            && let Some(kind) = self.popups.get(&pick.layer)
        {
            self.popup = Some(PopupState {
                popup: FeaturePopup::from_feature(*kind, &pick.properties),
                open: true,
            });
        }
    }
}

#[profiling::all_functions]
impl eframe::App for SeaRouteApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let report = self.engine.frame();
        if report.style_applied || report.sources_loaded > 0 {
            ctx.request_repaint();
        } else if report.busy || self.in_flight.load(Ordering::SeqCst) > 0 {
            ctx.request_repaint_after(FRAME_INTERVAL);
        }

        self.sync_tiles(ctx);
        self.drain_notices();
        if !self.notices.is_empty() {
            ctx.request_repaint_after(Duration::from_millis(250));
        }

        let control = self.controller.layers_control();
        let stats = self
            .render_stats
            .try_read()
            .map(|stats| *stats)
            .unwrap_or_default();
        if let Some(action) = ui_panels::render_sidebar(ctx, self.show_sidebar, &control, stats) {
            self.dispatch(ctx, action);
        }

        let zoom = style_zoom(self.map_memory.zoom());
        let stack = self.raster_stack(zoom);
        let attribution = self.attribution();
        let plugin = StylePlugin::new(
            self.engine.clone(),
            self.interactive.clone(),
            self.picked.clone(),
            self.render_stats.clone(),
        );

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| {
                profiling::scope!("map_panel");

                // Disjoint borrows of the caches, ordered like the style.
                let mut layers: Vec<(usize, f32, &mut HttpTiles)> = self
                    .tiles
                    .iter_mut()
                    .filter_map(|(id, tiles)| {
                        let index = stack.iter().position(|(source, _)| source == id)?;
                        Some((index, stack[index].1, tiles))
                    })
                    .collect();
                layers.sort_by_key(|(index, ..)| *index);
                let mut layers = layers.into_iter();

                let base = layers.next().map(|(_, _, tiles)| tiles as &mut dyn Tiles);
                let mut map = Map::new(base, &mut self.map_memory, walkers::lon_lat(136.29, 35.36))
                    .with_plugin(plugin);
                for (_, opacity, tiles) in layers {
                    map = map.with_layer(tiles, opacity);
                }
                ui.add(map);

                ui_panels::sidebar_toggle_button(ui, &mut self.show_sidebar);
                ui_panels::render_notices(ui, &self.notices);

                let painter = ui.painter();
                let screen_rect = ui.max_rect();
                painter.text(
                    screen_rect.center_bottom() + egui::vec2(0.0, -5.0),
                    egui::Align2::CENTER_BOTTOM,
                    attribution,
                    egui::FontId::proportional(10.0),
                    egui::Color32::from_black_alpha(180),
                );
            });

        self.take_pick();
        if let Some(state) = &mut self.popup {
            ui_panels::popup_window(ctx, state);
            if !state.open {
                self.popup = None;
            }
        }
    }

    fn save(&mut self, _storage: &mut dyn eframe::Storage) {
        let center = self
            .map_memory
            .detached()
            .map(|p| [p.x(), p.y()])
            .unwrap_or_else(|| self.controller.view().center);
        self.controller.save_view(MapView {
            center,
            zoom: style_zoom(self.map_memory.zoom()),
        });
    }
}
