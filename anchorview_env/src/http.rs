//! Production asset transport: HTTP(S) through reqwest, local files through tokio.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::EnvError;
use crate::fetch::{AssetFetcher, ProgressFn};

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct HttpFetcherConfig {
    /// Whole-request timeout (default: 30s)
    pub timeout: Duration,

    /// User-Agent header sent with every request
    pub user_agent: String,
}

impl Default for HttpFetcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: concat!("anchorview/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Fetches `http`, `https` and `file` URLs.
///
/// Progress is reported per received chunk when the server announces a
/// `Content-Length`; chunked responses without a length report nothing
/// until the loader's own completion signal.
pub struct HttpFetcher {
    client: reqwest::Client,
    config: HttpFetcherConfig,
}

impl HttpFetcher {
    pub fn new(config: HttpFetcherConfig) -> Result<Self, EnvError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| EnvError::network(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn with_defaults() -> Result<Self, EnvError> {
        Self::new(HttpFetcherConfig::default())
    }

    async fn fetch_http(&self, url: &Url, progress: ProgressFn<'_>) -> Result<Vec<u8>, EnvError> {
        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| self.map_reqwest(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnvError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let total = response.content_length().filter(|len| *len > 0);
        let mut bytes = Vec::with_capacity(total.unwrap_or(0) as usize);

        while let Some(chunk) = response.chunk().await.map_err(|e| self.map_reqwest(e))? {
            bytes.extend_from_slice(&chunk);
            if let Some(total) = total {
                progress((bytes.len() as f64 / total as f64).min(1.0) as f32);
            }
        }

        debug!(url = %url, bytes = bytes.len(), "HTTP fetch complete");
        Ok(bytes)
    }

    async fn fetch_file(&self, url: &Url, progress: ProgressFn<'_>) -> Result<Vec<u8>, EnvError> {
        let path = url
            .to_file_path()
            .map_err(|_| EnvError::Io(format!("not a local path: {}", url)))?;

        let bytes = tokio::fs::read(&path).await.map_err(EnvError::io)?;
        progress(1.0);

        debug!(path = %path.display(), bytes = bytes.len(), "file fetch complete");
        Ok(bytes)
    }

    fn map_reqwest(&self, err: reqwest::Error) -> EnvError {
        if err.is_timeout() {
            EnvError::Timeout(self.config.timeout.as_millis() as u64)
        } else {
            EnvError::network(err.to_string())
        }
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, progress: ProgressFn<'_>) -> Result<Vec<u8>, EnvError> {
        match url.scheme() {
            "http" | "https" => self.fetch_http(url, progress).await,
            "file" => self.fetch_file(url, progress).await,
            other => Err(EnvError::UnsupportedScheme(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    #[tokio::test]
    async fn test_file_url_is_read_with_progress() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"glTF-bytes").unwrap();
        let url = Url::from_file_path(file.path()).unwrap();

        let fetcher = HttpFetcher::with_defaults().unwrap();
        let seen = Mutex::new(Vec::new());
        let bytes = fetcher
            .fetch(&url, &|p| seen.lock().unwrap().push(p))
            .await
            .unwrap();

        assert_eq!(bytes, b"glTF-bytes");
        assert_eq!(*seen.lock().unwrap(), vec![1.0]);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(dir.path().join("missing.glb")).unwrap();

        let fetcher = HttpFetcher::with_defaults().unwrap();
        let err = fetcher.fetch(&url, &|_| {}).await.unwrap_err();
        assert!(matches!(err, EnvError::Io(_)));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let url = Url::parse("ftp://example.com/model.glb").unwrap();
        let fetcher = HttpFetcher::with_defaults().unwrap();
        let err = fetcher.fetch(&url, &|_| {}).await.unwrap_err();
        assert!(matches!(err, EnvError::UnsupportedScheme(ref s) if s == "ftp"));
    }
}
