//! UI panels for the application
//!
//! The layers control sidebar, the feature popup window and notices.

use super::style_plugin::{RenderStats, parse_color};
use super::{Notice, PopupState};
use egui::{Color32, RichText, Ui};
use sea_route_lib::control::{ControlAction, ControlKind, LayersControl};
use sea_route_lib::popup::{FeaturePopup, SeaRouteDetails};

/// Render the sidebar toggle button (overlaid on top-right of map)
pub fn sidebar_toggle_button(ui: &mut Ui, open: &mut bool) {
    let button_size = egui::vec2(40.0, 40.0);
    let margin = 10.0;

    let rect = ui.max_rect();
    let button_pos = rect.right_top() + egui::vec2(-button_size.x - margin, margin);
    let button_rect = egui::Rect::from_min_size(button_pos, button_size);

    let response = ui.allocate_rect(button_rect, egui::Sense::click());
    if response.clicked() {
        *open = !*open;
    }

    let bg_color = if response.hovered() {
        ui.visuals().widgets.hovered.bg_fill
    } else {
        ui.visuals().widgets.inactive.bg_fill
    };
    ui.painter().rect_filled(button_rect, 5.0, bg_color);

    let icon = if *open { "✕" } else { "☰" };
    ui.painter().text(
        button_rect.center(),
        egui::Align2::CENTER_CENTER,
        icon,
        egui::FontId::proportional(20.0),
        ui.visuals().text_color(),
    );
}

/// Render the layers sidebar (side on landscape, bottom on portrait).
/// Returns the action the user picked, if any.
pub fn render_sidebar(
    ctx: &egui::Context,
    open: bool,
    control: &LayersControl,
    stats: RenderStats,
) -> Option<ControlAction> {
    if !open {
        return None;
    }

    let screen_size = ctx.viewport_rect().size();
    let mut action = None;
    if screen_size.y > screen_size.x {
        egui::TopBottomPanel::bottom("main_sidebar")
            .default_height(280.0)
            .min_height(180.0)
            .max_height(screen_size.y * 0.6)
            .resizable(true)
            .show(ctx, |ui| action = render_sidebar_content(ui, control, stats));
    } else {
        egui::SidePanel::right("main_sidebar")
            .default_width(280.0)
            .min_width(220.0)
            .max_width(420.0)
            .resizable(true)
            .show(ctx, |ui| action = render_sidebar_content(ui, control, stats));
    }
    action
}

fn render_sidebar_content(
    ui: &mut Ui,
    control: &LayersControl,
    stats: RenderStats,
) -> Option<ControlAction> {
    let mut action = None;
    egui::ScrollArea::vertical()
        .auto_shrink([false, false])
        .show(ui, |ui| {
            for group in &control.groups {
                ui.label(RichText::new(group.title).strong());
                ui.add_space(4.0);
                for entry in &group.entries {
                    let enabled = !entry.pending;
                    let picked = match group.kind {
                        ControlKind::Radio => {
                            let response = ui.add_enabled(
                                enabled,
                                egui::RadioButton::new(entry.checked, &entry.label),
                            );
                            response.clicked().then(|| entry.action(true)).flatten()
                        }
                        ControlKind::Checkbox => {
                            let mut checked = entry.checked;
                            let response = ui.add_enabled(
                                enabled,
                                egui::Checkbox::new(&mut checked, &entry.label),
                            );
                            response.changed().then(|| entry.action(checked)).flatten()
                        }
                    };
                    if picked.is_some() {
                        action = picked;
                    }
                }
                ui.add_space(8.0);
                ui.separator();
            }

            ui.label(
                RichText::new(format!(
                    "{} layers, {} features drawn",
                    stats.layers_drawn, stats.features_drawn
                ))
                .small()
                .weak(),
            );
        });
    action
}

/// Show pending notices near the top of the map.
pub fn render_notices(ui: &Ui, notices: &[Notice]) {
    if notices.is_empty() {
        return;
    }
    egui::Area::new(egui::Id::new("notices"))
        .anchor(egui::Align2::CENTER_TOP, egui::vec2(0.0, 10.0))
        .interactable(false)
        .show(ui.ctx(), |ui| {
            egui::Frame::popup(ui.style()).show(ui, |ui| {
                for notice in notices {
                    ui.label(
                        RichText::new(format!("⚠ {}", notice.text)).color(ui.visuals().warn_fg_color),
                    );
                }
            });
        });
}

/// The popup for a clicked route or port.
pub fn popup_window(ctx: &egui::Context, state: &mut PopupState) {
    let PopupState { popup, open } = state;
    egui::Window::new(popup.title().to_string())
        .id(egui::Id::new("feature_popup"))
        .open(open)
        .collapsible(false)
        .resizable(false)
        .show(ctx, |ui| match popup {
            FeaturePopup::SeaRoute(details) => sea_route_details(ui, details),
            FeaturePopup::Port { name } => {
                ui.label(RichText::new(name.as_str()).strong());
            }
        });
}

fn sea_route_details(ui: &mut Ui, details: &SeaRouteDetails) {
    if let Some(sub) = &details.business_name_sub {
        ui.label(RichText::new(sub).weak());
    }
    ui.horizontal(|ui| {
        if let Some(color) = details.color.as_deref().and_then(parse_color) {
            let (rect, _) = ui.allocate_exact_size(egui::vec2(12.0, 12.0), egui::Sense::hover());
            ui.painter().rect_filled(rect, 2.0, color);
        }
        ui.label(details.section());
    });

    egui::Grid::new("sea_route_details")
        .num_columns(2)
        .spacing([8.0, 4.0])
        .show(ui, |ui| {
            let row = |ui: &mut Ui, key: &str, value: Option<&str>| {
                if let Some(value) = value {
                    ui.label(RichText::new(key).color(Color32::GRAY));
                    ui.label(value);
                    ui.end_row();
                }
            };
            row(ui, "Route", details.route_name.as_deref());
            row(ui, "Frequency", details.frequency.as_deref());
            let ships = details.ships.join(", ");
            row(ui, "Ships", (!ships.is_empty()).then_some(ships.as_str()));
            row(ui, "Info", details.info.as_deref());
        });

    if let Some(url) = &details.schedule_url {
        ui.hyperlink_to("Timetable", url);
    }
}
