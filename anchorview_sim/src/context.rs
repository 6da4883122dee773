//! Virtual clock for simulated runs.
//!
//! Time moves only when the runner ticks or a task sleeps, so observation
//! timestamps, runtime readiness and driver waits replay identically for a
//! given seed.

use anchorview_env::AnchorViewContext;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Wall-clock second that virtual time zero maps to (2024-01-01T00:00:00Z).
const EPOCH_SECS: u64 = 1_704_067_200;

/// [`AnchorViewContext`] over a shared virtual clock. Clones tick together.
#[derive(Debug, Clone)]
pub struct SimContext {
    seed: u64,
    elapsed: Arc<Mutex<Duration>>,
}

impl SimContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Moves the clock forward; one call per simulated frame.
    pub fn advance_time(&self, by: Duration) {
        *self.elapsed.lock().unwrap() += by;
    }
}

#[async_trait]
impl AnchorViewContext for SimContext {
    fn now(&self) -> Duration {
        *self.elapsed.lock().unwrap()
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(EPOCH_SECS) + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        // Jump instead of waiting, then let spawned loads run
        self.advance_time(duration);
        tokio::task::yield_now().await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        trace!(task = name, at = ?self.now(), "spawn");
        tokio::spawn(future);
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}
