//! Data loading for feature-collection overlays.
//!
//! A [`DataLoader`] only has to fetch one document as text in a single
//! attempt; the provided `load` and `load_and_merge` methods add the bounded
//! retry, JSON decoding and the detail-table merge on top.

use crate::features::{FeatureCollection, merge_details};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("HTTP error for {path}: {message}")]
    Http { path: String, message: String },

    #[error("IO error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Giving up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<LoadError> },
}

impl LoadError {
    /// Failures worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, LoadError::Http { .. } | LoadError::Io { .. })
    }
}

/// Bounded retry of a single fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

async fn fetch_with_retry<L: DataLoader + ?Sized>(
    loader: &L,
    path: &str,
) -> Result<String, LoadError> {
    let policy = loader.retry_policy();
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match loader.fetch(path).await {
            Ok(text) => return Ok(text),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= attempts => {
                tracing::warn!(path, attempts, error = %e, "fetch failed, giving up");
                return Err(LoadError::Exhausted {
                    attempts,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                tracing::debug!(path, attempt, error = %e, "fetch failed, retrying");
                attempt += 1;
                crate::runtime::sleep(policy.delay).await;
            }
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(path: &str, text: &str) -> Result<T, LoadError> {
    serde_json::from_str(text).map_err(|source| LoadError::Json {
        path: path.to_string(),
        source,
    })
}

/// Fetches feature collections and their detail tables.
pub trait DataLoader: Send + Sync + 'static {
    /// Read `path` as text in one attempt.
    fn fetch(&self, path: &str) -> impl Future<Output = Result<String, LoadError>> + Send;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    fn load(&self, path: &str) -> impl Future<Output = Result<FeatureCollection, LoadError>> + Send {
        async move {
            let text = fetch_with_retry(self, path).await?;
            parse(path, &text)
        }
    }

    /// Load `path` and merge each feature's `join_property`-keyed record from
    /// `details_path` into its properties.
    fn load_and_merge(
        &self,
        path: &str,
        details_path: &str,
        join_property: &str,
    ) -> impl Future<Output = Result<FeatureCollection, LoadError>> + Send {
        async move {
            let (features, details) = tokio::join!(
                fetch_with_retry(self, path),
                fetch_with_retry(self, details_path)
            );
            let collection: FeatureCollection = parse(path, &features?)?;
            let details: Map<String, Value> = parse(details_path, &details?)?;
            Ok(merge_details(collection, &details, join_property))
        }
    }
}

/// Loads documents over HTTP relative to a base URL.
#[cfg(feature = "http")]
#[derive(Clone)]
pub struct HttpDataLoader {
    client: reqwest::Client,
    base_url: String,
    policy: RetryPolicy,
}

#[cfg(feature = "http")]
impl HttpDataLoader {
    pub fn new(base_url: impl Into<String>) -> Result<Self, LoadError> {
        let builder = reqwest::Client::builder();
        #[cfg(not(target_arch = "wasm32"))]
        let builder = builder.timeout(Duration::from_secs(30));
        let client = builder.build().map_err(|e| LoadError::Http {
            path: String::new(),
            message: format!("Failed to create HTTP client: {e}"),
        })?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            policy: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    fn url(&self, path: &str) -> String {
        if path.contains("://") || self.base_url.is_empty() {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches("./")
        )
    }
}

#[cfg(feature = "http")]
async fn http_get(client: reqwest::Client, url: String, path: String) -> Result<String, LoadError> {
    let response = client.get(&url).send().await.map_err(|e| LoadError::Http {
        path: path.clone(),
        message: format!("Request failed: {e}"),
    })?;
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(LoadError::NotFound(path));
    }
    if !status.is_success() {
        return Err(LoadError::Http {
            path,
            message: format!("HTTP {status} from {url}"),
        });
    }
    response.text().await.map_err(|e| LoadError::Http {
        path,
        message: format!("Failed to read response: {e}"),
    })
}

#[cfg(feature = "http")]
impl DataLoader for HttpDataLoader {
    #[cfg(not(target_arch = "wasm32"))]
    fn fetch(&self, path: &str) -> impl Future<Output = Result<String, LoadError>> + Send {
        http_get(self.client.clone(), self.url(path), path.to_string())
    }

    // Browser fetches are not `Send`; run them on the page's executor and
    // hand the result back over a channel.
    #[cfg(target_arch = "wasm32")]
    fn fetch(&self, path: &str) -> impl Future<Output = Result<String, LoadError>> + Send {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let (client, url, owned) = (self.client.clone(), self.url(path), path.to_string());
        wasm_bindgen_futures::spawn_local(async move {
            let _ = tx.send(http_get(client, url, owned).await);
        });
        let path = path.to_string();
        async move {
            rx.await.map_err(|_| LoadError::Http {
                path,
                message: "request dropped".to_string(),
            })?
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }
}

/// Loads documents from a local directory.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Debug, Clone)]
pub struct DirectoryDataLoader {
    root: std::path::PathBuf,
    policy: RetryPolicy,
}

#[cfg(not(target_arch = "wasm32"))]
impl DirectoryDataLoader {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            root: root.into(),
            policy: RetryPolicy::none(),
        }
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl DataLoader for DirectoryDataLoader {
    fn fetch(&self, path: &str) -> impl Future<Output = Result<String, LoadError>> + Send {
        let full = self.root.join(path.trim_start_matches("./"));
        let path = path.to_string();
        async move {
            match tokio::fs::read_to_string(&full).await {
                Ok(text) => Ok(text),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(LoadError::NotFound(path)),
                Err(source) => Err(LoadError::Io { path, source }),
            }
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }
}

/// In-memory documents, with optional injected failures.
#[derive(Debug, Default)]
pub struct StaticDataLoader {
    documents: HashMap<String, String>,
    /// Path to the number of upcoming fetches that fail transiently.
    failures: Mutex<HashMap<String, u32>>,
    fetches: Mutex<Vec<String>>,
    policy: Option<RetryPolicy>,
}

impl StaticDataLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, path: impl Into<String>, body: impl Into<String>) -> Self {
        self.documents.insert(path.into(), body.into());
        self
    }

    pub fn with_json(self, path: impl Into<String>, body: &Value) -> Self {
        self.with_document(path, body.to_string())
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Make the next `count` fetches of `path` fail.
    pub fn fail(&self, path: &str, count: u32) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), count);
    }

    /// Every fetch attempted so far, in order.
    pub fn fetches(&self) -> Vec<String> {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DataLoader for StaticDataLoader {
    fn fetch(&self, path: &str) -> impl Future<Output = Result<String, LoadError>> + Send {
        self.fetches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(path.to_string());

        let failing = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            match failures.get_mut(path) {
                Some(left) if *left > 0 => {
                    *left -= 1;
                    true
                }
                _ => false,
            }
        };
        let result = if failing {
            Err(LoadError::Http {
                path: path.to_string(),
                message: "injected failure".to_string(),
            })
        } else {
            self.documents
                .get(path)
                .cloned()
                .ok_or_else(|| LoadError::NotFound(path.to_string()))
        };
        std::future::ready(result)
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy.unwrap_or_default()
    }
}
