//! Command line settings.
//!
//! Native builds read argv. On the web the same flags come from the page's
//! query string: `?clibase-map=21&clioverlay=tile_openseamap` becomes
//! `--base-map 21 --overlay tile_openseamap`, and `env*` parameters stand in
//! for environment variables (`?envLOG_LEVEL=debug`).

use clap::Parser;
use sea_route_lib::catalog::default_overlays;
use sea_route_lib::{BaseMap, CatalogOptions, OrderingPolicy, OverlayId, SessionConfig};
use std::time::Duration;

#[cfg(target_arch = "wasm32")]
use std::collections::HashMap;

#[cfg(target_arch = "wasm32")]
thread_local! {
    static ENV_MAP: std::cell::RefCell<HashMap<String, String>> = std::cell::RefCell::new(HashMap::new());
}

/// Read an environment variable (a query parameter on the web) as `T`.
pub fn get_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    #[cfg(target_arch = "wasm32")]
    {
        ENV_MAP.with(|map| map.borrow().get(key).and_then(|s| s.parse().ok()))
    }
    #[cfg(not(target_arch = "wasm32"))]
    {
        std::env::var(key).ok().and_then(|s| s.parse().ok())
    }
}

/// Split a query string into argv-style flags and `env*` values.
#[cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]
fn query_args(program: &str, query: &str) -> (Vec<String>, Vec<(String, String)>) {
    let mut args = vec![program.to_string()];
    let mut env = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if let Some(flag) = key.strip_prefix("cli") {
            if !flag.is_empty() {
                args.push(format!("--{flag}"));
            }
            if !value.is_empty() {
                args.push(value.to_string());
            }
        } else if let Some(name) = key.strip_prefix("env")
            && !name.is_empty()
        {
            env.push((name.to_string(), value.to_string()));
        }
    }
    (args, env)
}

#[cfg(target_arch = "wasm32")]
fn location_query() -> String {
    let href = web_sys::window()
        .and_then(|w| w.location().href().ok())
        .unwrap_or_default();
    href.split_once('?')
        .map(|(_, q)| q.split('#').next().unwrap_or_default().to_string())
        .unwrap_or_default()
}

/// Record `env*` query parameters so [`get_env`] sees them.
#[cfg(target_arch = "wasm32")]
pub fn parse_env() {
    let (_, env) = query_args("", &location_query());
    ENV_MAP.with(|map| map.borrow_mut().extend(env));
}

/// Parse from the command line on native and from GET parameters on web.
pub fn parse_args<T: Parser>() -> Result<T, clap::Error> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        T::try_parse()
    }
    #[cfg(target_arch = "wasm32")]
    {
        let (args, env) = query_args("sea-route-viewer", &location_query());
        ENV_MAP.with(|map| map.borrow_mut().extend(env));
        T::try_parse_from(args)
    }
}

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Sea Route Map - ferry and sea route overlays on a slippy map
pub struct Settings {
    /// URL or directory holding the `data/` and `img/` folders
    #[clap(long, default_value = ".")]
    pub data_root: String,

    /// Base map code to start with instead of the stored one
    #[clap(long, value_name = "CODE")]
    pub base_map: Option<u16>,

    /// Overlay to show on a first visit (repeatable)
    #[clap(long = "overlay", value_name = "ID")]
    pub overlays: Vec<String>,

    /// Ignore previously persisted state and start fresh
    #[clap(long, default_value = "false")]
    pub ignore_persisted: bool,

    /// API key for the Thunderforest transport map
    #[clap(long, env = "THUNDERFOREST_API_KEY")]
    pub thunderforest_api_key: Option<String>,

    /// Attempts made to re-assert the draw order before giving up
    #[clap(long, default_value = "30")]
    pub ordering_attempts: u32,

    /// Delay between draw order attempts, in milliseconds
    #[clap(long, default_value = "1000")]
    pub ordering_delay_ms: u64,

    /// Preference file (desktop only)
    #[clap(long, value_name = "FILE")]
    pub storage_path: Option<std::path::PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings::parse_from(["sea-route-viewer"])
    }
}

impl Settings {
    pub fn from_cli() -> Self {
        match parse_args::<Settings>() {
            Ok(args) => args,
            Err(e) => {
                #[cfg(not(target_arch = "wasm32"))]
                e.exit();
                #[cfg(target_arch = "wasm32")]
                {
                    let user_msg = format!(
                        "Error parsing CLI:\n{e}\n\nChange the GET params, using the cli prefix.\nStarting anyway without args."
                    );
                    if let Some(window) = web_sys::window() {
                        window.alert_with_message(&user_msg).unwrap_or(());
                    } else {
                        tracing::error!(user_msg);
                    }
                    Settings::default()
                }
            }
        }
    }

    pub fn catalog_options(&self) -> CatalogOptions {
        CatalogOptions {
            thunderforest_api_key: self.thunderforest_api_key.clone().filter(|k| !k.is_empty()),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig {
            ignore_persisted: self.ignore_persisted,
            ordering: OrderingPolicy {
                max_retries: self.ordering_attempts,
                delay: Duration::from_millis(self.ordering_delay_ms),
            },
            ..SessionConfig::default()
        };
        if let Some(code) = self.base_map {
            match BaseMap::from_code(code) {
                Some(base) => {
                    config.default_base_map = base;
                    // An explicit base map wins over the stored one.
                    config.ignore_persisted = true;
                }
                None => tracing::warn!(code, "unknown base map code on the command line"),
            }
        }
        config.default_overlays = if self.overlays.is_empty() {
            default_overlays()
        } else {
            self.overlays.iter().map(|s| OverlayId::from(s.as_str())).collect()
        };
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_string_becomes_flags() {
        let (args, env) = query_args(
            "viewer",
            "clibase-map=21&clioverlay=tile_openseamap&cliignore-persisted&envLOG_LEVEL=debug&other=1",
        );
        assert_eq!(
            args,
            vec!["viewer", "--base-map", "21", "--overlay", "tile_openseamap", "--ignore-persisted"]
        );
        assert_eq!(env, vec![("LOG_LEVEL".to_string(), "debug".to_string())]);
    }

    #[test]
    fn test_session_config_from_flags() {
        let settings = Settings::parse_from([
            "viewer",
            "--base-map",
            "12",
            "--overlay",
            "tile_openseamap",
            "--overlay",
            "geojson_port",
            "--ordering-attempts",
            "5",
        ]);
        let config = settings.session_config();
        assert_eq!(config.default_base_map, BaseMap::OpenTopoMap);
        assert!(config.ignore_persisted);
        assert_eq!(config.ordering.max_retries, 5);
        assert_eq!(
            config.default_overlays,
            vec![OverlayId::from("tile_openseamap"), OverlayId::from("geojson_port")]
        );
    }

    #[test]
    fn test_unknown_base_map_keeps_defaults() {
        let settings = Settings::parse_from(["viewer", "--base-map", "77"]);
        let config = settings.session_config();
        assert_eq!(config.default_base_map, BaseMap::Empty);
        assert!(!config.ignore_persisted);
        assert_eq!(config.default_overlays, default_overlays());
    }
}
