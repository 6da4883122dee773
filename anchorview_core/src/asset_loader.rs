//! The "LOADER" Engine - Remote Asset Loading
//!
//! Fetches a model through the environment's [`AssetFetcher`], parses it with
//! an [`AssetParser`] and reports monotonic progress on the way.
//!
//! At most one load per slot is live: [`LoadSlots`] hands out generation
//! tokens, and a completion whose token is no longer current is discarded
//! by the owner instead of being applied.

use anchorview_env::{AssetFetcher, EnvError, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::LoaderConfig;
use crate::scene::{AssetParser, ParseError, SceneNode};

/// Highest value reported before a load has actually succeeded.
const MAX_INTERMEDIATE_PROGRESS: f32 = 0.99;

// ============================================================================
// LOAD SLOTS (Supersession)
// ============================================================================

/// Identity of one load attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LoadToken {
    /// Logical slot (the tracking target name)
    pub slot: String,

    /// Generation valid when the load started
    pub generation: u64,
}

/// Generation counters per slot.
///
/// Starting a load or superseding a slot bumps its generation, which
/// invalidates every token issued before.
#[derive(Debug, Default, Clone)]
pub struct LoadSlots {
    generations: HashMap<String, u64>,
}

impl LoadSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh token for `slot`, superseding any outstanding load.
    pub fn begin(&mut self, slot: &str) -> LoadToken {
        let generation = self.bump(slot);
        LoadToken {
            slot: slot.to_string(),
            generation,
        }
    }

    /// Invalidates the outstanding load for `slot` without starting another.
    pub fn supersede(&mut self, slot: &str) {
        self.bump(slot);
    }

    pub fn is_current(&self, token: &LoadToken) -> bool {
        self.generations.get(&token.slot) == Some(&token.generation)
    }

    fn bump(&mut self, slot: &str) -> u64 {
        let generation = self.generations.entry(slot.to_string()).or_insert(0);
        *generation += 1;
        *generation
    }
}

// ============================================================================
// PROGRESS
// ============================================================================

/// Forwards progress to a callback, keeping it non-decreasing and below 1.0
/// until [`finish`](Self::finish).
struct ProgressReporter<'a> {
    sink: &'a (dyn Fn(f32) + Send + Sync),
    // f32 bits of the last value emitted; NaN means "nothing yet"
    last: AtomicU32,
}

impl<'a> ProgressReporter<'a> {
    fn new(sink: &'a (dyn Fn(f32) + Send + Sync)) -> Self {
        Self {
            sink,
            last: AtomicU32::new(f32::NAN.to_bits()),
        }
    }

    fn report(&self, value: f32) {
        if !value.is_finite() {
            return;
        }
        let value = value.clamp(0.0, MAX_INTERMEDIATE_PROGRESS);
        let advanced = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let last = f32::from_bits(bits);
                (last.is_nan() || value > last).then_some(value.to_bits())
            })
            .is_ok();
        if advanced {
            (self.sink)(value);
        }
    }

    fn finish(&self) {
        self.last.store(1.0f32.to_bits(), Ordering::Release);
        (self.sink)(1.0);
    }
}

// ============================================================================
// ASSET LOADER
// ============================================================================

/// Validates, fetches and parses remote assets.
pub struct AssetLoader {
    fetcher: Arc<dyn AssetFetcher>,
    parser: Arc<dyn AssetParser>,
    config: LoaderConfig,
}

impl AssetLoader {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, parser: Arc<dyn AssetParser>, config: LoaderConfig) -> Self {
        Self {
            fetcher,
            parser,
            config,
        }
    }

    /// Syntactic URL check performed before any I/O.
    pub fn validate_url(raw: &str) -> Result<Url, LoadError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(LoadError::InvalidUrl("URL is empty".to_string()));
        }

        let url = Url::parse(trimmed).map_err(|e| LoadError::InvalidUrl(format!("{}: {}", trimmed, e)))?;
        if url.cannot_be_a_base() {
            return Err(LoadError::InvalidUrl(format!("{}: not a hierarchical URL", trimmed)));
        }
        if matches!(url.scheme(), "http" | "https") && url.host_str().map_or(true, str::is_empty) {
            return Err(LoadError::InvalidUrl(format!("{}: missing host", trimmed)));
        }
        Ok(url)
    }

    /// Downloads `raw_url` without parsing (reference images).
    pub async fn fetch_bytes(&self, raw_url: &str) -> Result<Vec<u8>, LoadError> {
        let url = Self::validate_url(raw_url)?;
        Ok(self.fetcher.fetch(&url, &|_| {}).await?)
    }

    /// Loads and parses the asset behind `raw_url`.
    ///
    /// `on_progress` sees non-decreasing values in `[0, 1]`; 1.0 is only
    /// ever emitted on success, right before returning.
    pub async fn load(
        &self,
        raw_url: &str,
        on_progress: &(dyn Fn(f32) + Send + Sync),
    ) -> Result<SceneNode, LoadError> {
        let url = Self::validate_url(raw_url)?;
        let progress = ProgressReporter::new(on_progress);
        let fetch_share = self.config.fetch_share.clamp(0.0, MAX_INTERMEDIATE_PROGRESS);

        info!(url = %url, "loading asset");
        progress.report(0.0);

        let bytes = self
            .fetcher
            .fetch(&url, &|p| progress.report(p * fetch_share))
            .await?;
        progress.report(fetch_share);
        debug!(url = %url, bytes = bytes.len(), "asset downloaded, parsing");

        let node = self.parser.parse(&url, &bytes)?;
        progress.finish();

        info!(url = %url, node = %node.id(), "asset loaded");
        Ok(node)
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Why a load did not produce a node. Always reported, never fatal.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Network error: {0}")]
    Network(#[from] EnvError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use anchorview_env::ProgressFn;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StaticFetcher {
        result: Result<Vec<u8>, EnvError>,
        steps: Vec<f32>,
    }

    #[async_trait]
    impl AssetFetcher for StaticFetcher {
        async fn fetch(&self, _url: &Url, progress: ProgressFn<'_>) -> Result<Vec<u8>, EnvError> {
            for step in &self.steps {
                progress(*step);
            }
            self.result.clone()
        }
    }

    struct BytesParser;

    impl AssetParser for BytesParser {
        fn parse(&self, source: &Url, bytes: &[u8]) -> Result<SceneNode, ParseError> {
            if bytes.starts_with(b"glTF") {
                Ok(SceneNode::new(source.clone(), Default::default()))
            } else {
                Err(ParseError::new("bad magic"))
            }
        }
    }

    fn loader(result: Result<Vec<u8>, EnvError>, steps: Vec<f32>) -> AssetLoader {
        AssetLoader::new(
            Arc::new(StaticFetcher { result, steps }),
            Arc::new(BytesParser),
            LoaderConfig::default(),
        )
    }

    async fn run(loader: &AssetLoader, url: &str) -> (Result<SceneNode, LoadError>, Vec<f32>) {
        let seen = Mutex::new(Vec::new());
        let result = loader.load(url, &|p| seen.lock().unwrap().push(p)).await;
        (result, seen.into_inner().unwrap())
    }

    #[test]
    fn test_validate_url() {
        assert!(AssetLoader::validate_url("https://cdn.example.com/model.glb").is_ok());
        assert!(AssetLoader::validate_url("file:///tmp/model.glb").is_ok());
        assert!(matches!(AssetLoader::validate_url(""), Err(LoadError::InvalidUrl(_))));
        assert!(matches!(AssetLoader::validate_url("   "), Err(LoadError::InvalidUrl(_))));
        assert!(matches!(AssetLoader::validate_url("not a url"), Err(LoadError::InvalidUrl(_))));
        assert!(matches!(AssetLoader::validate_url("mailto:a@b.c"), Err(LoadError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_success_progress_is_monotonic_and_ends_at_one() {
        let loader = loader(Ok(b"glTF....".to_vec()), vec![0.5, 0.25, 1.0]);
        let (result, seen) = run(&loader, "https://cdn.example.com/model.glb").await;

        assert!(result.is_ok());
        assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{:?}", seen);
        assert_eq!(seen.last(), Some(&1.0));
        assert_eq!(seen.iter().filter(|p| **p == 1.0).count(), 1);
    }

    #[tokio::test]
    async fn test_parse_failure_never_reports_one() {
        // Fetcher claims the download is complete; parsing still fails
        let loader = loader(Ok(b"<html>".to_vec()), vec![0.5, 1.0]);
        let (result, seen) = run(&loader, "https://cdn.example.com/model.glb").await;

        assert!(matches!(result, Err(LoadError::Parse(_))));
        assert!(seen.iter().all(|p| *p < 1.0), "{:?}", seen);
    }

    #[tokio::test]
    async fn test_network_failure_maps_to_network_error() {
        let loader = loader(Err(EnvError::Timeout(30_000)), vec![0.1]);
        let (result, seen) = run(&loader, "https://cdn.example.com/model.glb").await;

        assert!(matches!(result, Err(LoadError::Network(EnvError::Timeout(_)))));
        assert!(seen.iter().all(|p| *p < 1.0));
    }

    #[tokio::test]
    async fn test_invalid_url_fails_before_fetch() {
        let loader = loader(Ok(b"glTF".to_vec()), vec![0.5]);
        let (result, seen) = run(&loader, "").await;

        assert!(matches!(result, Err(LoadError::InvalidUrl(_))));
        assert!(seen.is_empty());
    }

    #[test]
    fn test_load_slots_supersede() {
        let mut slots = LoadSlots::new();
        let first = slots.begin("TargetQR");
        assert!(slots.is_current(&first));

        let second = slots.begin("TargetQR");
        assert!(!slots.is_current(&first));
        assert!(slots.is_current(&second));

        slots.supersede("TargetQR");
        assert!(!slots.is_current(&second));

        // Slots are independent
        let other = slots.begin("Poster");
        assert!(slots.is_current(&other));
        assert_eq!(other.generation, 1);
    }
}
