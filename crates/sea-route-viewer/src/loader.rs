//! Data loader chosen from the `--data-root` setting.

use sea_route_lib::loader::HttpDataLoader;
#[cfg(not(target_arch = "wasm32"))]
use sea_route_lib::loader::DirectoryDataLoader;
use sea_route_lib::{DataLoader, LoadError, RetryPolicy};
use std::future::Future;

/// HTTP for URLs, the file system for local directories.
pub enum AnyDataLoader {
    Http(HttpDataLoader),
    #[cfg(not(target_arch = "wasm32"))]
    Directory(DirectoryDataLoader),
}

impl AnyDataLoader {
    pub fn for_root(root: &str) -> Result<Self, LoadError> {
        #[cfg(not(target_arch = "wasm32"))]
        if !root.contains("://") {
            return Ok(Self::Directory(DirectoryDataLoader::new(root)));
        }
        Ok(Self::Http(HttpDataLoader::new(root)?))
    }

    /// Prefix for marker image paths handed to the engine.
    pub fn asset_root(root: &str) -> String {
        root.trim_end_matches('/').to_string()
    }
}

impl DataLoader for AnyDataLoader {
    fn fetch(&self, path: &str) -> impl Future<Output = Result<String, LoadError>> + Send {
        async move {
            match self {
                Self::Http(loader) => loader.fetch(path).await,
                #[cfg(not(target_arch = "wasm32"))]
                Self::Directory(loader) => loader.fetch(path).await,
            }
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Http(loader) => loader.retry_policy(),
            #[cfg(not(target_arch = "wasm32"))]
            Self::Directory(loader) => loader.retry_policy(),
        }
    }
}
