//! Session Driver - Runs a TrackingSession against the environment context.
//!
//! The driver is the only writer of the [`TrackingSession`]. Every input is a
//! [`SessionEvent`] on one bounded queue, so a load completion can never race
//! a loss-of-tracking transition.
//!
//! # Architecture
//!
//! ```text
//!  per-frame callback ──try_send(Frame)──┐
//!                                        ▼
//!  load task ──Progress/LoadFinished──► [mpsc] ──► SessionDriver ──► TrackingSession
//!      ▲                                                │
//!      └────────────── ctx.spawn("asset-load") ◄────────┘
//!                                                       │
//!                                   watch<SessionSnapshot> ──► adapters
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let (driver, handle) = SessionDriver::new(ctx.clone(), session, loader, runtime, host, config, launch);
//! ctx.spawn("session-driver", async move { let _ = driver.run().await; });
//!
//! // From the AR frame callback
//! handle.submit_frame(observations);
//! ```

use anchorview_env::{AnchorViewContext, HostChannel};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::asset_loader::{AssetLoader, LoadError, LoadToken};
use crate::config::SessionConfig;
use crate::host_protocol::StatusEvent;
use crate::launcher::ValidatedLaunch;
use crate::scene::{ReferenceTarget, RuntimeError, SceneNode, TrackingRuntime};
use crate::tracking_session::{
    LoadRequest, SessionSnapshot, SessionStats, TrackingObservation, TrackingSession,
};

/// Input to the driver.
#[derive(Debug)]
pub enum SessionEvent {
    /// All observations of one rendered frame
    Frame(Vec<TrackingObservation>),
    Progress {
        token: LoadToken,
        value: f32,
    },
    LoadFinished {
        token: LoadToken,
        result: Result<SceneNode, LoadError>,
    },
    Shutdown,
}

/// Owns the session and processes events until shutdown.
pub struct SessionDriver<Ctx: AnchorViewContext> {
    context: Arc<Ctx>,
    session: TrackingSession,
    loader: Arc<AssetLoader>,
    runtime: Arc<dyn TrackingRuntime>,
    host: Arc<dyn HostChannel>,
    config: SessionConfig,
    launch: ValidatedLaunch,
    events: mpsc::Receiver<SessionEvent>,
    /// Weak so dropping every handle ends the loop
    loads_tx: mpsc::WeakSender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl<Ctx: AnchorViewContext> SessionDriver<Ctx> {
    pub fn new(
        context: Arc<Ctx>,
        session: TrackingSession,
        loader: Arc<AssetLoader>,
        runtime: Arc<dyn TrackingRuntime>,
        host: Arc<dyn HostChannel>,
        config: SessionConfig,
        launch: ValidatedLaunch,
    ) -> (Self, SessionHandle) {
        let (tx, rx) = mpsc::channel(config.event_queue_capacity.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

        let driver = Self {
            context,
            session,
            loader,
            runtime,
            host,
            config,
            launch,
            events: rx,
            loads_tx: tx.downgrade(),
            snapshot: snapshot_tx,
        };
        let handle = SessionHandle {
            events: tx,
            snapshot: snapshot_rx,
        };
        (driver, handle)
    }

    /// Starts the session and processes events until shutdown.
    ///
    /// # Returns
    /// The session counters on a clean exit, or the startup failure (already
    /// reported to the host as `StartupFailed`).
    pub async fn run(mut self) -> Result<SessionStats, StartupError> {
        if let Err(err) = self.start().await {
            error!(error = %err, "session startup failed");
            self.emit(StatusEvent::StartupFailed { reason: err.to_string() });
            return Err(err);
        }

        while let Some(event) = self.events.recv().await {
            match event {
                SessionEvent::Frame(observations) => {
                    for request in self.session.observe_frame(&observations) {
                        self.spawn_load(request);
                    }
                }
                SessionEvent::Progress { token, value } => self.session.on_progress(&token, value),
                SessionEvent::LoadFinished { token, result } => {
                    let outcome = self.session.complete_load(&token, result);
                    debug!(target = %token.slot, generation = token.generation, ?outcome, "load completed");
                }
                SessionEvent::Shutdown => {
                    info!("session shutdown requested");
                    break;
                }
            }
            self.publish();
        }

        self.session.teardown();
        self.publish();

        let stats = self.session.stats();
        info!(?stats, "session finished");
        Ok(stats)
    }

    /// Waits for the runtime, then registers the reference image and arms the target.
    async fn start(&mut self) -> Result<(), StartupError> {
        self.wait_for_runtime().await?;
        self.emit(StatusEvent::RuntimeReady);

        let target_name = self.config.target_name.clone();
        let image = self
            .loader
            .fetch_bytes(self.launch.image_url.as_str())
            .await
            .map_err(StartupError::ReferenceImage)?;
        if image.is_empty() {
            return Err(StartupError::EmptyReferenceImage);
        }

        let target = ReferenceTarget {
            name: target_name.clone(),
            image,
            physical_width_m: self.config.physical_width_m,
        };
        self.runtime.register_target(&target)?;
        info!(target = %target_name, width_m = target.physical_width_m, "reference image registered");
        self.emit(StatusEvent::ReferenceImageRegistered {
            target: target_name.clone(),
        });

        self.session.arm(&target_name, self.launch.model_url.as_str());
        self.publish();
        Ok(())
    }

    async fn wait_for_runtime(&self) -> Result<(), StartupError> {
        let timeout = self.config.runtime_ready_timeout();
        let poll = self.config.runtime_poll_interval();
        let deadline = self.context.now() + timeout;

        loop {
            if self.runtime.is_ready() {
                debug!("AR runtime ready");
                return Ok(());
            }
            if self.context.now() >= deadline {
                return Err(StartupError::TrackingUnavailable(timeout.as_millis() as u64));
            }
            self.context.sleep(poll).await;
        }
    }

    fn spawn_load(&self, request: LoadRequest) {
        let Some(tx) = self.loads_tx.upgrade() else {
            warn!(target = %request.token.slot, "session closing, load not started");
            return;
        };
        let loader = self.loader.clone();

        self.context.spawn("asset-load", async move {
            let LoadRequest { token, url } = request;

            let progress_tx = tx.clone();
            let progress_token = token.clone();
            let on_progress = move |value: f32| {
                // Dropped progress is harmless; the next value supersedes it
                let _ = progress_tx.try_send(SessionEvent::Progress {
                    token: progress_token.clone(),
                    value,
                });
            };

            let result = loader.load(&url, &on_progress).await;
            if tx.send(SessionEvent::LoadFinished { token, result }).await.is_err() {
                debug!("session closed before load finished");
            }
        });
    }

    fn publish(&self) {
        let next = self.session.snapshot();
        self.snapshot.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn emit(&self, event: StatusEvent) {
        self.host.invoke(event.to_host_message());
    }
}

// ============================================================================
// HANDLE
// ============================================================================

/// Caller-side handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::Sender<SessionEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Queues one frame of observations without blocking.
    ///
    /// Returns `false` if the frame was dropped (queue full or session closed).
    pub fn submit_frame(&self, observations: Vec<TrackingObservation>) -> bool {
        match self.events.try_send(SessionEvent::Frame(observations)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("session queue full, dropping frame");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Asks the driver to tear down and stop.
    pub async fn shutdown(&self) {
        let _ = self.events.send(SessionEvent::Shutdown).await;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that wakes on every session change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// Failures before the session could start tracking.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StartupError {
    #[error("Tracking unavailable: AR runtime not ready after {0} ms")]
    TrackingUnavailable(u64),

    #[error("Reference image download failed: {0}")]
    ReferenceImage(LoadError),

    #[error("Reference image is empty")]
    EmptyReferenceImage,

    #[error("Reference image registration failed: {0}")]
    Registration(#[from] RuntimeError),
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LaunchRequest;
    use crate::launcher::validate_launch;
    use crate::scene::{AssetParser, AssetSummary, ParseError, SceneError, SceneGraph};
    use crate::tracking_session::{TargetPhase, TrackingState};
    use crate::transform_codec::{DecomposedTransform, PoseMatrix, TransformCodec};
    use anchorview_env::{
        AnchorId, AssetFetcher, EnvError, HostMessage, ProgressFn, SceneNodeId, TokioContext, Url,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    const MODEL: &str = "https://cdn.example.com/model.glb";
    const IMAGE: &str = "https://cdn.example.com/target.png";

    /// Model fetches wait for `release`; images return immediately.
    struct GatedFetcher {
        release: Notify,
        gated: bool,
    }

    #[async_trait]
    impl AssetFetcher for GatedFetcher {
        async fn fetch(&self, url: &Url, progress: ProgressFn<'_>) -> Result<Vec<u8>, EnvError> {
            if url.path().ends_with(".png") {
                return Ok(vec![0x89, b'P', b'N', b'G']);
            }
            progress(0.5);
            if self.gated {
                self.release.notified().await;
            }
            Ok(b"glTF".to_vec())
        }
    }

    struct AnyParser;

    impl AssetParser for AnyParser {
        fn parse(&self, source: &Url, _bytes: &[u8]) -> Result<SceneNode, ParseError> {
            Ok(SceneNode::new(source.clone(), AssetSummary::default()))
        }
    }

    #[derive(Default)]
    struct CountingScene {
        anchors: Mutex<Vec<AnchorId>>,
    }

    impl SceneGraph for CountingScene {
        fn create_anchor(&self, _pose: &PoseMatrix) -> Result<AnchorId, SceneError> {
            let id = AnchorId::new();
            self.anchors.lock().unwrap().push(id);
            Ok(id)
        }

        fn attach(
            &self,
            _anchor: AnchorId,
            _node: &SceneNode,
            _name: &str,
            _local: &DecomposedTransform,
        ) -> Result<SceneNodeId, SceneError> {
            Ok(SceneNodeId::new())
        }

        fn set_local_transform(&self, _node: SceneNodeId, _local: &DecomposedTransform) -> Result<(), SceneError> {
            Ok(())
        }

        fn remove(&self, _anchor: AnchorId) {}
    }

    struct Runtime {
        ready: AtomicBool,
        registered: Mutex<Vec<String>>,
    }

    impl TrackingRuntime for Runtime {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn register_target(&self, target: &ReferenceTarget) -> Result<(), RuntimeError> {
            self.registered.lock().unwrap().push(target.name.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct Host {
        messages: Mutex<Vec<HostMessage>>,
    }

    impl HostChannel for Host {
        fn invoke(&self, message: HostMessage) {
            self.messages.lock().unwrap().push(message);
        }
    }

    impl Host {
        fn events(&self) -> Vec<String> {
            self.messages
                .lock()
                .unwrap()
                .iter()
                .filter_map(|m| m.arguments["event"].as_str().map(str::to_string))
                .collect()
        }
    }

    struct Fixture {
        fetcher: Arc<GatedFetcher>,
        scene: Arc<CountingScene>,
        runtime: Arc<Runtime>,
        host: Arc<Host>,
    }

    fn fixture(gated: bool, ready: bool) -> Fixture {
        Fixture {
            fetcher: Arc::new(GatedFetcher {
                release: Notify::new(),
                gated,
            }),
            scene: Arc::new(CountingScene::default()),
            runtime: Arc::new(Runtime {
                ready: AtomicBool::new(ready),
                registered: Mutex::new(Vec::new()),
            }),
            host: Arc::new(Host::default()),
        }
    }

    fn driver(f: &Fixture) -> (SessionDriver<TokioContext>, SessionHandle) {
        let config = SessionConfig::default();
        let launch = validate_launch(&LaunchRequest::new(MODEL, IMAGE, 1.0)).unwrap();
        let session = TrackingSession::new(
            f.scene.clone(),
            f.host.clone(),
            TransformCodec::new(config.convention),
            launch.scale_factor,
            config.node_name.clone(),
        );
        let loader = Arc::new(AssetLoader::new(f.fetcher.clone(), Arc::new(AnyParser), config.loader.clone()));
        SessionDriver::new(
            TokioContext::shared(),
            session,
            loader,
            f.runtime.clone(),
            f.host.clone(),
            config,
            launch,
        )
    }

    fn frame(state: TrackingState) -> Vec<TrackingObservation> {
        vec![TrackingObservation::new("TargetQR", state, PoseMatrix::IDENTITY, 0.0)]
    }

    async fn wait_for_phase(handle: &SessionHandle, phase: TargetPhase) {
        let mut rx = handle.subscribe();
        rx.wait_for(|s| s.target("TargetQR").map(|t| t.phase) == Some(phase))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_detect_load_place_end_to_end() {
        let f = fixture(false, true);
        let (driver, handle) = driver(&f);
        let task = tokio::spawn(driver.run());

        wait_for_phase(&handle, TargetPhase::AwaitingDetection).await;
        assert_eq!(*f.runtime.registered.lock().unwrap(), vec!["TargetQR".to_string()]);

        assert!(handle.submit_frame(frame(TrackingState::Tracking)));
        wait_for_phase(&handle, TargetPhase::Placed).await;
        assert_eq!(f.scene.anchors.lock().unwrap().len(), 1);

        handle.shutdown().await;
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats.loads_started, 1);
        assert_eq!(stats.placements, 1);
        assert_eq!(stats.removals, 1);

        let events = f.host.events();
        assert_eq!(events[0], "runtime_ready");
        assert!(events.contains(&"loading_progress".to_string()));
        assert!(events.contains(&"asset_placed".to_string()));
    }

    #[tokio::test]
    async fn test_stop_during_inflight_load_never_places() {
        let f = fixture(true, true);
        let (driver, handle) = driver(&f);
        let task = tokio::spawn(driver.run());

        wait_for_phase(&handle, TargetPhase::AwaitingDetection).await;
        handle.submit_frame(frame(TrackingState::Tracking));
        wait_for_phase(&handle, TargetPhase::Loading).await;

        handle.submit_frame(frame(TrackingState::Stopped));
        wait_for_phase(&handle, TargetPhase::AwaitingDetection).await;

        f.fetcher.release.notify_one();
        handle.shutdown().await;
        let stats = task.await.unwrap().unwrap();

        assert!(f.scene.anchors.lock().unwrap().is_empty());
        assert_eq!(stats.placements, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_never_ready_is_tracking_unavailable() {
        let f = fixture(false, false);
        let (driver, _handle) = driver(&f);

        let err = driver.run().await.unwrap_err();
        assert!(matches!(err, StartupError::TrackingUnavailable(10_000)));
        assert_eq!(f.host.events(), vec!["startup_failed"]);
        assert!(f.runtime.registered.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runtime_becomes_ready_while_polling() {
        let f = fixture(false, false);
        let (driver, handle) = driver(&f);
        let task = tokio::spawn(driver.run());

        tokio::time::sleep(Duration::from_millis(450)).await;
        f.runtime.ready.store(true, Ordering::SeqCst);
        wait_for_phase(&handle, TargetPhase::AwaitingDetection).await;

        handle.shutdown().await;
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_dropping_handle_ends_session() {
        let f = fixture(false, true);
        let (driver, handle) = driver(&f);
        let task = tokio::spawn(driver.run());
        wait_for_phase(&handle, TargetPhase::AwaitingDetection).await;

        drop(handle);
        assert!(task.await.unwrap().is_ok());
    }
}
