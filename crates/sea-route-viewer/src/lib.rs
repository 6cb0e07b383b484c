//! Sea Route Map - Viewer Application
//!
//! Desktop and web front end for `sea-route-lib`: a slippy map that renders
//! the headless engine's style graph, the layers control, feature popups and
//! user notices.

mod app;
mod cli;
mod loader;
mod logging;

#[cfg(target_arch = "wasm32")]
mod web;

pub use app::SeaRouteApp;
pub use cli::Settings;
pub use loader::AnyDataLoader;

#[cfg(target_arch = "wasm32")]
pub use web::WebHandle;

pub const APP_NAME: &str = "Sea Route Map";

/// Run the application on native (desktop) platforms.
#[cfg(not(target_arch = "wasm32"))]
pub fn run_native() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to create Tokio runtime");

    rt.block_on(async {
        logging::setup_logging();

        let native_options = eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default()
                .with_inner_size([1280.0, 720.0])
                .with_title(APP_NAME),
            ..Default::default()
        };

        if let Err(e) = eframe::run_native(
            APP_NAME,
            native_options,
            Box::new(|cc| Ok(Box::new(SeaRouteApp::new(cc)?))),
        ) {
            tracing::error!(error = %e, "viewer exited with an error");
        }
    });
}
