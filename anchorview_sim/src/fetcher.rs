//! In-memory asset fetcher with fault injection.

use anchorview_env::{AssetFetcher, EnvError, ProgressFn, Url};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Serves registered payloads by URL.
///
/// Payloads are delivered in `chunks` progress steps; injected faults are
/// returned after the first step so partial progress is observable.
pub struct SimFetcher {
    assets: Mutex<HashMap<String, Vec<u8>>>,
    faults: Mutex<HashMap<String, EnvError>>,
    requests: Mutex<Vec<String>>,
    chunks: usize,
}

impl SimFetcher {
    pub fn new() -> Self {
        Self::with_chunks(4)
    }

    pub fn with_chunks(chunks: usize) -> Self {
        Self {
            assets: Mutex::new(HashMap::new()),
            faults: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            chunks: chunks.max(1),
        }
    }

    /// Serves `bytes` for `url`.
    pub fn insert(&self, url: &str, bytes: Vec<u8>) {
        self.assets.lock().unwrap().insert(url.to_string(), bytes);
    }

    /// Makes every fetch of `url` fail with `error`.
    pub fn fail(&self, url: &str, error: EnvError) {
        self.faults.lock().unwrap().insert(url.to_string(), error);
    }

    /// Removes an injected fault.
    pub fn heal(&self, url: &str) {
        self.faults.lock().unwrap().remove(url);
    }

    /// Number of fetches issued for `url`.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| *r == url).count()
    }
}

impl Default for SimFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssetFetcher for SimFetcher {
    async fn fetch(&self, url: &Url, progress: ProgressFn<'_>) -> Result<Vec<u8>, EnvError> {
        let key = url.as_str().to_string();
        self.requests.lock().unwrap().push(key.clone());

        let fault = self.faults.lock().unwrap().get(&key).cloned();
        if let Some(error) = fault {
            progress(1.0 / (self.chunks as f32 + 1.0));
            return Err(error);
        }

        let bytes = self.assets.lock().unwrap().get(&key).cloned();
        let Some(bytes) = bytes else {
            return Err(EnvError::HttpStatus { status: 404, url: key });
        };

        for chunk in 1..=self.chunks {
            progress(chunk as f32 / self.chunks as f32);
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_serves_registered_bytes_with_progress() {
        let fetcher = SimFetcher::with_chunks(2);
        fetcher.insert("https://sim.local/a.glb", b"abc".to_vec());

        let seen = Mutex::new(Vec::new());
        let bytes = fetcher
            .fetch(&url("https://sim.local/a.glb"), &|p| seen.lock().unwrap().push(p))
            .await
            .unwrap();

        assert_eq!(bytes, b"abc");
        assert_eq!(seen.into_inner().unwrap(), vec![0.5, 1.0]);
        assert_eq!(fetcher.fetch_count("https://sim.local/a.glb"), 1);
    }

    #[tokio::test]
    async fn test_unknown_url_is_404() {
        let fetcher = SimFetcher::new();
        let err = fetcher.fetch(&url("https://sim.local/missing.glb"), &|_| {}).await.unwrap_err();
        assert!(matches!(err, EnvError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_fault_injection_and_heal() {
        let fetcher = SimFetcher::new();
        fetcher.insert("https://sim.local/a.glb", b"abc".to_vec());
        fetcher.fail("https://sim.local/a.glb", EnvError::Timeout(30_000));

        let target = url("https://sim.local/a.glb");
        assert!(matches!(fetcher.fetch(&target, &|_| {}).await, Err(EnvError::Timeout(_))));

        fetcher.heal("https://sim.local/a.glb");
        assert!(fetcher.fetch(&target, &|_| {}).await.is_ok());
    }
}
