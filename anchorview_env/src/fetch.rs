//! Asset transport abstraction.

use async_trait::async_trait;
use url::Url;

use crate::error::EnvError;

/// Progress callback handed to a fetcher. Values are fractions in `[0, 1]`.
pub type ProgressFn<'a> = &'a (dyn Fn(f32) + Send + Sync);

/// Abstraction over "give me the bytes behind this URL".
///
/// # Implementations
///
/// - **Production**: `HttpFetcher` (reqwest for http/https, tokio::fs for file)
/// - **Simulation**: in-memory registry with injected latency and failures
///
/// ```text
/// Loader                     Fetcher                    Remote
///   |-- fetch(url, progress) -->|                          |
///   |                           |-- GET ------------------>|
///   |<-- progress(0.25) --------|<-- chunk ----------------|
///   |<-- progress(0.50) --------|<-- chunk ----------------|
///   |<-- Ok(bytes) -------------|                          |
/// ```
#[async_trait]
pub trait AssetFetcher: Send + Sync + 'static {
    /// Fetches the full payload behind `url`.
    ///
    /// # Arguments
    /// * `url` - An already validated URL
    /// * `progress` - Called with the downloaded fraction when the total size
    ///   is known; may never be called
    ///
    /// # Returns
    /// * `Ok(bytes)` - The complete payload
    /// * `Err(EnvError)` - Transport failure, timeout, or unsupported scheme
    async fn fetch(&self, url: &Url, progress: ProgressFn<'_>) -> Result<Vec<u8>, EnvError>;
}
