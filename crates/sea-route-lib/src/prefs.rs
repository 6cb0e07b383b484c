//! Preference persistence.
//!
//! [`PreferenceStore`] persists small string values with an expiry, the way
//! cookies behave in the browser build. Three backends are provided:
//!
//! - `LocalStore` (compiled for `wasm32`) uses `window.localStorage`.
//! - `FileStore` (native targets) keeps one JSON file in the per-user
//!   configuration directory, read once and rewritten on every change.
//! - [`MemoryStore`] keeps everything in memory; used by tests.
//!
//! [`Preferences`] layers the typed keys of the map session on top.

use crate::catalog::{BaseMap, OverlayId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    #[cfg(not(target_arch = "wasm32"))]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Platform storage error: {0}")]
    Platform(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub const KEY_BASE_MAP: &str = "currentMap";
pub const KEY_OVERLAYS: &str = "currentLayer";
pub const KEY_CENTER: &str = "mapCenter";
pub const KEY_ZOOM: &str = "mapZoom";

/// How long persisted values live.
pub const DEFAULT_TTL_DAYS: u32 = 30;

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

/// A stored value and the wall-clock time (ms since the epoch) it expires at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Entry {
    value: String,
    expires_at: u64,
}

impl Entry {
    fn new(value: &str, ttl_days: u32) -> Self {
        Self {
            value: value.to_string(),
            expires_at: now_ms().saturating_add(u64::from(ttl_days) * DAY_MS),
        }
    }

    fn is_live(&self) -> bool {
        self.expires_at > now_ms()
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(target_arch = "wasm32")]
fn now_ms() -> u64 {
    js_sys::Date::now() as u64
}

/// String key/value store with per-entry expiry. Expired entries read as absent.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str, ttl_days: u32) -> StoreResult<()>;

    /// No-op if the key does not exist.
    fn remove(&self, key: &str) -> StoreResult<()>;
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .get(key)
            .filter(|e| e.is_live())
            .map(|e| e.value.clone()))
    }

    fn set(&self, key: &str, value: &str, ttl_days: u32) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), Entry::new(value, ttl_days));
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

//
// Web implementation (localStorage)
//
#[cfg(target_arch = "wasm32")]
mod local_store {
    use super::*;
    use web_sys::Storage;

    fn local_storage() -> Result<Storage, StoreError> {
        web_sys::window()
            .ok_or_else(|| StoreError::Platform("no window".into()))?
            .local_storage()
            .map_err(|e| StoreError::Platform(format!("local_storage() failed: {e:?}")))?
            .ok_or_else(|| StoreError::Platform("local_storage not available".into()))
    }

    /// Browser-backed store. Each value is kept as a JSON entry with its expiry.
    #[derive(Debug, Default)]
    pub struct LocalStore;

    impl PreferenceStore for LocalStore {
        fn get(&self, key: &str) -> StoreResult<Option<String>> {
            let storage = local_storage()?;
            let raw = storage
                .get_item(key)
                .map_err(|e| StoreError::Platform(format!("get_item error: {e:?}")))?;
            let Some(raw) = raw else {
                return Ok(None);
            };
            match serde_json::from_str::<Entry>(&raw) {
                Ok(entry) if entry.is_live() => Ok(Some(entry.value)),
                Ok(_) => {
                    let _ = storage.remove_item(key);
                    Ok(None)
                }
                Err(e) => Err(StoreError::Json(e.to_string())),
            }
        }

        fn set(&self, key: &str, value: &str, ttl_days: u32) -> StoreResult<()> {
            let raw = serde_json::to_string(&Entry::new(value, ttl_days))
                .map_err(|e| StoreError::Json(e.to_string()))?;
            local_storage()?
                .set_item(key, &raw)
                .map_err(|e| StoreError::Platform(format!("set_item error: {e:?}")))
        }

        fn remove(&self, key: &str) -> StoreResult<()> {
            local_storage()?
                .remove_item(key)
                .map_err(|e| StoreError::Platform(format!("remove_item error: {e:?}")))
        }
    }

    pub fn default_store(_path: Option<std::path::PathBuf>) -> StoreResult<Arc<dyn PreferenceStore>> {
        Ok(Arc::new(LocalStore))
    }
}

//
// Native file-backed implementation
//
#[cfg(not(target_arch = "wasm32"))]
mod file_store {
    use super::*;
    use std::fs;
    use std::path::{Path, PathBuf};

    /// One JSON file holding a map of key to entry.
    pub struct FileStore {
        path: PathBuf,
        inner: Mutex<HashMap<String, Entry>>,
    }

    impl FileStore {
        /// - On Windows: %APPDATA%/SeaRouteMap/preferences.json
        /// - Else: $HOME/.config/sea-route-map/preferences.json
        pub fn default_path() -> PathBuf {
            if cfg!(windows)
                && let Ok(appdata) = std::env::var("APPDATA")
            {
                return Path::new(&appdata)
                    .join("SeaRouteMap")
                    .join("preferences.json");
            }

            if let Ok(home) = std::env::var("HOME") {
                return Path::new(&home)
                    .join(".config")
                    .join("sea-route-map")
                    .join("preferences.json");
            }

            Path::new(".").join("sea-route-map-preferences.json")
        }

        pub fn open(path: Option<PathBuf>) -> StoreResult<Self> {
            let path = path.unwrap_or_else(Self::default_path);

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Io(format!("Failed to create preferences directory: {e}"))
                })?;
            }

            let mut map = HashMap::new();
            if path.exists() {
                let s = fs::read_to_string(&path)
                    .map_err(|e| StoreError::Io(format!("Failed to read preferences: {e}")))?;
                if !s.trim().is_empty() {
                    map = serde_json::from_str(&s).map_err(|e| {
                        StoreError::Json(format!("Failed to parse preferences: {e}"))
                    })?;
                }
            }

            Ok(FileStore {
                path,
                inner: Mutex::new(map),
            })
        }

        pub fn path(&self) -> &Path {
            &self.path
        }

        fn flush_locked(&self, locked: &HashMap<String, Entry>) -> StoreResult<()> {
            let s = serde_json::to_string_pretty(locked)
                .map_err(|e| StoreError::Json(e.to_string()))?;
            fs::write(&self.path, s).map_err(|e| StoreError::Io(format!("write failed: {e}")))
        }
    }

    impl PreferenceStore for FileStore {
        fn get(&self, key: &str) -> StoreResult<Option<String>> {
            let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Ok(guard
                .get(key)
                .filter(|e| e.is_live())
                .map(|e| e.value.clone()))
        }

        fn set(&self, key: &str, value: &str, ttl_days: u32) -> StoreResult<()> {
            let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            guard.retain(|_, e| e.is_live());
            guard.insert(key.to_string(), Entry::new(value, ttl_days));
            self.flush_locked(&guard)
        }

        fn remove(&self, key: &str) -> StoreResult<()> {
            let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.remove(key).is_some() {
                self.flush_locked(&guard)?;
            }
            Ok(())
        }
    }

    pub fn default_store(path: Option<PathBuf>) -> StoreResult<Arc<dyn PreferenceStore>> {
        Ok(Arc::new(FileStore::open(path)?))
    }
}

#[cfg(target_arch = "wasm32")]
pub use local_store::{LocalStore, default_store};

#[cfg(not(target_arch = "wasm32"))]
pub use file_store::{FileStore, default_store};

/// Map centre as `[lng, lat]` and zoom level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapView {
    pub center: [f64; 2],
    pub zoom: f64,
}

impl Default for MapView {
    fn default() -> Self {
        Self {
            center: [136.2923, 35.3622],
            zoom: 5.0,
        }
    }
}

/// Typed access to the session keys.
///
/// Store failures are logged and treated as missing values; persistence is
/// never allowed to fail a map operation.
#[derive(Clone)]
pub struct Preferences {
    store: Arc<dyn PreferenceStore>,
    ttl_days: u32,
}

impl Preferences {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self {
            store,
            ttl_days: DEFAULT_TTL_DAYS,
        }
    }

    pub fn with_ttl_days(mut self, ttl_days: u32) -> Self {
        self.ttl_days = ttl_days;
        self
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read preference");
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value, self.ttl_days) {
            tracing::warn!(key, error = %e, "failed to persist preference");
        }
    }

    /// The stored base map. `Some(None)` is a stored code no base map has.
    pub fn base_map(&self) -> Option<Option<BaseMap>> {
        let raw = self.read(KEY_BASE_MAP)?;
        Some(raw.trim().parse::<u16>().ok().and_then(BaseMap::from_code))
    }

    pub fn set_base_map(&self, base: BaseMap) {
        self.write(KEY_BASE_MAP, &base.code().to_string());
    }

    /// The stored overlay list in stored order; `None` when nothing was stored.
    pub fn overlays(&self) -> Option<Vec<OverlayId>> {
        let raw = self.read(KEY_OVERLAYS)?;
        Some(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(OverlayId::from)
                .collect(),
        )
    }

    pub fn set_overlays(&self, overlays: &[OverlayId]) {
        let joined = overlays
            .iter()
            .map(OverlayId::as_str)
            .collect::<Vec<_>>()
            .join(",");
        self.write(KEY_OVERLAYS, &joined);
    }

    /// Stored centre and zoom, each falling back to its default.
    pub fn view(&self) -> MapView {
        let default = MapView::default();
        let center = self
            .read(KEY_CENTER)
            .and_then(|raw| serde_json::from_str::<[f64; 2]>(&raw).ok())
            .filter(|[lng, lat]| lng.is_finite() && lat.is_finite())
            .unwrap_or(default.center);
        let zoom = self
            .read(KEY_ZOOM)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|z| z.is_finite())
            .unwrap_or(default.zoom);
        MapView { center, zoom }
    }

    pub fn set_view(&self, view: MapView) {
        match serde_json::to_string(&view.center) {
            Ok(center) => self.write(KEY_CENTER, &center),
            Err(e) => tracing::warn!(error = %e, "failed to encode map centre"),
        }
        self.write(KEY_ZOOM, &view.zoom.to_string());
    }
}
