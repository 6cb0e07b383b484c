//! Cross-platform task spawning and timers
//!
//! Native builds run on tokio; web builds run on the JavaScript event loop
//! through tokio-with-wasm. Both expose the same `spawn` and `sleep`.

use std::future::Future;
use std::time::Duration;

#[cfg(not(target_arch = "wasm32"))]
pub use tokio::task::JoinHandle;

#[cfg(target_arch = "wasm32")]
pub use tokio_with_wasm::task::JoinHandle;

/// Spawn a background task.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    #[cfg(feature = "profiling")]
    {
        tokio::spawn(async move {
            profiling::scope!("runtime::spawn", std::any::type_name::<F>());
            future.await
        })
    }
    #[cfg(not(feature = "profiling"))]
    {
        tokio::spawn(future)
    }
}

/// Spawn a background task.
#[cfg(target_arch = "wasm32")]
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio_with_wasm::spawn(future)
}

#[cfg(not(target_arch = "wasm32"))]
pub async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await
}

#[cfg(target_arch = "wasm32")]
pub async fn sleep(duration: Duration) {
    tokio_with_wasm::time::sleep(duration).await
}
