//! Scenario runner - executes tracking pipeline scenarios.
//!
//! Most scenarios drive a [`TrackingSession`] tick by tick from the
//! [`TrackingOracle`]: every load the session requests is resolved through
//! the real [`AssetLoader`] after a configurable number of ticks, which is
//! how slow downloads racing tracking changes are reproduced. The driver
//! scenarios instead run the full [`SessionDriver`] actor on [`SimContext`].

use crate::context::SimContext;
use crate::fetcher::SimFetcher;
use crate::oracle::{random_script, ScriptedTarget, Segment, TrackingOracle};
use crate::runtime::SimTrackingRuntime;
use crate::scenarios::ScenarioId;
use crate::scene::{RecordingHost, RecordingScene};

use anchorview_core::{
    AnchoredAsset, AssetLoader, Collaborators, CompletionOutcome, ConfigError, DecomposedTransform, Gesture,
    GestureConfig, GesturePhase, GltfParser, LaunchError, LaunchRequest, Launcher, LoadRequest, ManipulableNode,
    PoseMatrix, SerializedTransform, SessionConfig, SessionHandle, StartupError, StatusEvent, TargetPhase,
    TrackingObservation, TrackingSession, TrackingState, TransformCodec,
};
use anchorview_env::{AnchorViewContext, EnvError};
use nalgebra::{UnitQuaternion, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the simulated CDN serves the model.
pub const MODEL_URL: &str = "https://sim.anchorview.local/models/chair.glb";

/// Where the simulated CDN serves the reference image.
pub const IMAGE_URL: &str = "https://sim.anchorview.local/targets/qr.png";

/// Real-time bound on waiting for the driver to reach a phase.
const DRIVER_WAIT: Duration = Duration::from_secs(5);

/// A minimal valid glTF 2.0 document.
pub fn sample_model() -> Vec<u8> {
    br#"{"asset":{"version":"2.0"},"scene":0,"scenes":[{"nodes":[0]}],"nodes":[{"name":"Chair"}]}"#.to_vec()
}

/// Stand-in for the encoded reference image.
pub fn sample_image() -> Vec<u8> {
    let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    png.extend(std::iter::repeat(0u8).take(56));
    png
}

// ============================================================================
// RESULTS
// ============================================================================

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final virtual time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    pub observations: u64,
    pub loads_requested: u64,
    pub loads_discarded: u64,
    pub loads_failed: u64,
    pub loads_parked: u64,
    pub placements: u64,
    pub removals: u64,
    pub status_events: usize,
    pub gesture_events: usize,
    pub max_live_anchors: usize,
}

/// Errors setting up a simulation.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Failed to build executor: {0}")]
    Executor(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Collected assertion failures.
#[derive(Debug, Default)]
struct Checks {
    failures: Vec<String>,
}

impl Checks {
    fn expect(&mut self, ok: bool, msg: impl Into<String>) {
        if !ok {
            self.failures.push(msg.into());
        }
    }

    fn expect_eq<T: PartialEq + std::fmt::Debug>(&mut self, what: &str, actual: T, expected: T) {
        if actual != expected {
            self.failures.push(format!("{}: expected {:?}, got {:?}", what, expected, actual));
        }
    }
}

// ============================================================================
// TICK HARNESS
// ============================================================================

struct PendingLoad {
    request: LoadRequest,
    due_tick: u64,
}

/// One session plus recording adapters, stepped by hand.
struct Harness {
    context: Arc<SimContext>,
    executor: tokio::runtime::Runtime,
    fetcher: Arc<SimFetcher>,
    scene: Arc<RecordingScene>,
    host: Arc<RecordingHost>,
    loader: AssetLoader,
    session: TrackingSession,
    codec: TransformCodec,
    config: SessionConfig,
    scale_factor: f64,
    pending: Vec<PendingLoad>,
    latency_ticks: u64,
    dt: Duration,
    tick: u64,
    parked: u64,
    last_state: HashMap<String, TrackingState>,
    /// Progress values of every resolved load, and whether it succeeded
    progress_log: Vec<(Vec<f32>, bool)>,
    violations: Vec<String>,
}

impl Harness {
    fn new(
        seed: u64,
        config: &SessionConfig,
        scale_factor: f64,
        tick_rate_hz: u32,
        latency_ticks: u64,
    ) -> Result<Self, SimError> {
        let executor = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
        let context = SimContext::shared(seed);

        let fetcher = Arc::new(SimFetcher::new());
        fetcher.insert(MODEL_URL, sample_model());
        fetcher.insert(IMAGE_URL, sample_image());

        let scene = Arc::new(RecordingScene::new());
        let host = Arc::new(RecordingHost::new());
        let codec = TransformCodec::new(config.convention);
        let loader = AssetLoader::new(fetcher.clone(), Arc::new(GltfParser), config.loader.clone());

        let mut session = TrackingSession::new(
            scene.clone(),
            host.clone(),
            codec.clone(),
            scale_factor,
            config.node_name.clone(),
        );
        session.arm(&config.target_name, MODEL_URL);

        Ok(Self {
            context,
            executor,
            fetcher,
            scene,
            host,
            loader,
            session,
            codec,
            config: config.clone(),
            scale_factor,
            pending: Vec::new(),
            latency_ticks,
            dt: Duration::from_secs_f64(1.0 / tick_rate_hz.max(1) as f64),
            tick: 0,
            parked: 0,
            last_state: HashMap::new(),
            progress_log: Vec::new(),
            violations: Vec::new(),
        })
    }

    fn target(&self) -> &str {
        &self.config.target_name
    }

    /// Feeds one frame, then resolves every load that is due.
    fn step(&mut self, frame: &[TrackingObservation]) {
        self.tick += 1;
        self.context.advance_time(self.dt);

        for obs in frame {
            self.last_state.insert(obs.target_name.clone(), obs.state);
        }
        for request in self.session.observe_frame(frame) {
            debug!(
                tick = self.tick,
                target = %request.token.slot,
                generation = request.token.generation,
                "load requested"
            );
            self.pending.push(PendingLoad {
                request,
                due_tick: self.tick + self.latency_ticks,
            });
        }

        self.resolve_due();
        self.check_invariants();
    }

    /// Plays the oracle to the end; `before_tick` runs ahead of each frame.
    fn play(&mut self, oracle: &mut TrackingOracle, mut before_tick: impl FnMut(&mut Self, u64)) {
        while !oracle.is_finished() {
            before_tick(self, oracle.tick());
            let frame = oracle.next_frame();
            self.step(&frame);
        }
    }

    /// Keeps ticking without observations until no load is outstanding.
    fn drain(&mut self) {
        while !self.pending.is_empty() {
            self.step(&[]);
        }
    }

    fn resolve_due(&mut self) {
        let tick = self.tick;
        let (due, waiting): (Vec<PendingLoad>, Vec<PendingLoad>) =
            std::mem::take(&mut self.pending).into_iter().partition(|p| p.due_tick <= tick);
        self.pending = waiting;

        for PendingLoad { request, .. } in due {
            let seen = Mutex::new(Vec::new());
            let result = self
                .executor
                .block_on(self.loader.load(&request.url, &|p| seen.lock().unwrap().push(p)));
            let values = seen.into_inner().unwrap_or_default();

            for value in &values {
                self.session.on_progress(&request.token, *value);
            }
            self.progress_log.push((values, result.is_ok()));

            match self.session.complete_load(&request.token, result) {
                CompletionOutcome::Parked => self.parked += 1,
                CompletionOutcome::Failed(reason) => debug!(tick, %reason, "load failed"),
                outcome => debug!(tick, ?outcome, "load resolved"),
            }
        }
    }

    fn check_invariants(&mut self) {
        let snapshot = self.session.snapshot();
        let anchored = snapshot.targets.iter().filter(|t| t.anchored.is_some()).count();
        if self.scene.live_anchors() != anchored {
            self.violations.push(format!(
                "tick {}: {} live anchors for {} anchored assets",
                self.tick,
                self.scene.live_anchors(),
                anchored
            ));
        }
        for target in &snapshot.targets {
            if target.anchored.is_some() && self.last_state.get(&target.target_name) == Some(&TrackingState::Stopped) {
                self.violations
                    .push(format!("tick {}: {} anchored after Stopped", self.tick, target.target_name));
            }
        }
    }

    /// Progress must be non-decreasing, end at 1.0 on success and never reach 1.0 on failure.
    fn progress_violation(&self) -> Option<String> {
        for (i, (values, succeeded)) in self.progress_log.iter().enumerate() {
            if values.windows(2).any(|w| w[1] < w[0]) {
                return Some(format!("load #{} progress decreased: {:?}", i + 1, values));
            }
            if *succeeded && values.last() != Some(&1.0) {
                return Some(format!("load #{} succeeded without final 1.0: {:?}", i + 1, values));
            }
            if !*succeeded && values.iter().any(|v| *v >= 1.0) {
                return Some(format!("load #{} failed but reported 1.0", i + 1));
            }
        }
        None
    }

    /// Local transform every placement should carry.
    fn expected_local(&self) -> Option<DecomposedTransform> {
        self.codec.decompose(&PoseMatrix::uniform_scale(self.scale_factor)).ok()
    }

    fn finish(mut self, scenario: ScenarioId, seed: u64, checks: Checks) -> ScenarioResult {
        let mut failures = checks.failures;
        failures.append(&mut self.violations);
        failures.extend(self.progress_violation());

        let stats = self.session.stats();
        let metrics = ScenarioMetrics {
            observations: stats.observations,
            loads_requested: stats.loads_started,
            loads_discarded: stats.loads_discarded,
            loads_failed: stats.loads_failed,
            loads_parked: self.parked,
            placements: stats.placements,
            removals: stats.removals,
            status_events: self.host.status_events().len(),
            gesture_events: self.host.gesture_messages().len(),
            max_live_anchors: self.scene.max_live_anchors(),
        };

        build_result(scenario, seed, self.tick, self.context.now(), failures, metrics)
    }
}

fn build_result(
    scenario: ScenarioId,
    seed: u64,
    total_ticks: u64,
    elapsed: Duration,
    failures: Vec<String>,
    metrics: ScenarioMetrics,
) -> ScenarioResult {
    let passed = failures.is_empty();
    ScenarioResult {
        scenario,
        seed,
        passed,
        total_ticks,
        final_time_secs: elapsed.as_secs_f64(),
        failure_reason: if passed { None } else { Some(failures.join("; ")) },
        metrics,
    }
}

fn setup_failure(scenario: ScenarioId, seed: u64, err: SimError) -> ScenarioResult {
    build_result(
        scenario,
        seed,
        0,
        Duration::ZERO,
        vec![format!("setup failed: {}", err)],
        ScenarioMetrics::default(),
    )
}

// ============================================================================
// SCENARIO RUNNER
// ============================================================================

/// Runs pipeline scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Frames per second fed to the session
    tick_rate_hz: u32,

    /// Ticks between a load request and its resolution
    load_latency_ticks: u64,

    /// Host `scaleFactor`
    scale_factor: f64,

    config: SessionConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            tick_rate_hz: 30,
            load_latency_ticks: 5,
            scale_factor: 0.25,
            config: SessionConfig::default(),
        }
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    /// Sets the default load latency in ticks.
    pub fn with_load_latency(mut self, ticks: u64) -> Self {
        self.load_latency_ticks = ticks;
        self
    }

    pub fn with_scale_factor(mut self, scale: f64) -> Self {
        self.scale_factor = scale;
        self
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        if scenario.is_chaos() {
            warn!("Randomised scenario, reproduce with --seed {}", self.seed);
        }

        let outcome = match scenario {
            ScenarioId::DetectAndPlace => self.run_detect_and_place(),
            ScenarioId::FlickerDuringLoad => self.run_flicker_during_load(),
            ScenarioId::LostAfterPlacement => self.run_lost_after_placement(),
            ScenarioId::NetworkFailure => self.run_network_failure(),
            ScenarioId::CorruptAsset => self.run_corrupt_asset(),
            ScenarioId::PausedDuringLoad => self.run_paused_during_load(),
            ScenarioId::ForeignTargets => self.run_foreign_targets(),
            ScenarioId::GestureSession => self.run_gesture_session(),
            ScenarioId::TrackingChaos => self.run_tracking_chaos(),
            ScenarioId::DriverLifecycle => self.run_driver_lifecycle(),
            ScenarioId::RuntimeUnavailable => self.run_runtime_unavailable(),
        };

        outcome.unwrap_or_else(|err| setup_failure(scenario, self.seed, err))
    }

    fn harness(&self, latency_ticks: u64) -> Result<Harness, SimError> {
        Harness::new(
            self.seed,
            &self.config,
            self.scale_factor,
            self.tick_rate_hz,
            latency_ticks,
        )
    }

    fn oracle(&self, targets: Vec<ScriptedTarget>) -> TrackingOracle {
        let mut oracle = TrackingOracle::new(self.seed.wrapping_mul(0x9e3779b97f4a7c15), self.tick_rate_hz);
        for target in targets {
            oracle.add_target(target);
        }
        oracle
    }

    fn scripted(&self, script: Vec<Segment>) -> ScriptedTarget {
        ScriptedTarget::new(&self.config.target_name, script)
    }

    /// AV-001: DetectAndPlace.
    ///
    /// **Assertion**: exactly one fetch; the attached node carries the scale
    /// factor and the axis correction; the anchor sits at the observed pose.
    fn run_detect_and_place(&self) -> Result<ScenarioResult, SimError> {
        use TrackingState::*;
        info!("AV-001: DetectAndPlace");

        let mut h = self.harness(self.load_latency_ticks)?;
        let target = self.scripted(vec![Segment::new(NotTracking, 10), Segment::new(Tracking, 60)]);
        let true_pose = TrackingOracle::true_pose(&target);
        let mut oracle = self.oracle(vec![target]);
        h.play(&mut oracle, |_, _| {});

        let mut checks = Checks::default();
        let stats = h.session.stats();
        checks.expect_eq("loads", stats.loads_started, 1);
        checks.expect_eq("placements", stats.placements, 1);
        checks.expect_eq("model fetches", h.fetcher.fetch_count(MODEL_URL), 1);
        checks.expect_eq("phase", h.session.phase(h.target()), Some(TargetPhase::Placed));

        let attached = h.scene.attached();
        checks.expect_eq("attached nodes", attached.len(), 1);
        if let Some((anchor_pose, node)) = attached.first() {
            checks.expect_eq("node name", node.name.as_str(), self.config.node_name.as_str());
            checks.expect_eq("node source", node.source.as_str(), MODEL_URL);
            checks.expect(Some(node.local) == h.expected_local(), "placed node has wrong local transform");
            checks.expect(
                anchor_pose.max_abs_diff(&true_pose) < 0.01,
                "anchor not at the observed target pose",
            );
        }

        let events = h.host.status_events();
        checks.expect_eq(
            "loading shown",
            h.host.count_status(|e| matches!(e, StatusEvent::LoadingShown { .. })),
            1,
        );
        checks.expect_eq(
            "asset placed",
            h.host.count_status(|e| matches!(e, StatusEvent::AssetPlaced { .. })),
            1,
        );
        let last_percent = events.iter().rev().find_map(|e| match e {
            StatusEvent::LoadingProgress { percent, .. } => Some(*percent),
            _ => None,
        });
        checks.expect_eq("final percent", last_percent, Some(100));

        info!("✓ DetectAndPlace complete: {} status events", events.len());
        Ok(h.finish(ScenarioId::DetectAndPlace, self.seed, checks))
    }

    /// AV-002: FlickerDuringLoad.
    ///
    /// **Assertion**: two loads for two runs, the first is discarded, one anchor.
    fn run_flicker_during_load(&self) -> Result<ScenarioResult, SimError> {
        use TrackingState::*;
        info!("AV-002: FlickerDuringLoad");

        // Slower than the flicker: the first load resolves after Stopped
        let mut h = self.harness(5)?;
        let target = self.scripted(vec![
            Segment::new(Tracking, 2),
            Segment::new(Stopped, 1),
            Segment::new(Tracking, 30),
        ]);
        let runs = target.tracking_runs();
        let mut oracle = self.oracle(vec![target]);
        h.play(&mut oracle, |_, _| {});

        let mut checks = Checks::default();
        let stats = h.session.stats();
        checks.expect_eq("loads", stats.loads_started as usize, runs);
        checks.expect_eq("discarded", stats.loads_discarded, 1);
        checks.expect_eq("placements", stats.placements, 1);
        checks.expect_eq("live anchors", h.scene.live_anchors(), 1);
        checks.expect_eq("max live anchors", h.scene.max_live_anchors(), 1);

        info!("✓ FlickerDuringLoad complete: {} loads, {} discarded", stats.loads_started, stats.loads_discarded);
        Ok(h.finish(ScenarioId::FlickerDuringLoad, self.seed, checks))
    }

    /// AV-003: LostAfterPlacement.
    fn run_lost_after_placement(&self) -> Result<ScenarioResult, SimError> {
        use TrackingState::*;
        info!("AV-003: LostAfterPlacement");

        let mut h = self.harness(3)?;
        let mut oracle = self.oracle(vec![self.scripted(vec![
            Segment::new(Tracking, 20),
            Segment::new(Stopped, 5),
            Segment::new(Tracking, 20),
        ])]);

        let mut removed_during_loss = false;
        h.play(&mut oracle, |h, tick| {
            if tick == 22 {
                removed_during_loss = h.scene.live_anchors() == 0;
            }
        });

        let mut checks = Checks::default();
        let stats = h.session.stats();
        checks.expect(removed_during_loss, "anchor survived tracking loss");
        checks.expect_eq("loads", stats.loads_started, 2);
        checks.expect_eq("placements", stats.placements, 2);
        checks.expect_eq("removals", stats.removals, 1);
        checks.expect_eq("live anchors", h.scene.live_anchors(), 1);
        checks.expect_eq(
            "asset removed events",
            h.host.count_status(|e| matches!(e, StatusEvent::AssetRemoved { .. })),
            1,
        );
        checks.expect_eq(
            "tracking lost events",
            h.host.count_status(|e| matches!(e, StatusEvent::TrackingLost { .. })),
            1,
        );

        Ok(h.finish(ScenarioId::LostAfterPlacement, self.seed, checks))
    }

    /// AV-004: NetworkFailure.
    ///
    /// Timeouts for the first two runs, the CDN recovers before the third.
    /// **Assertion**: one attempt per run, no retry inside a run.
    fn run_network_failure(&self) -> Result<ScenarioResult, SimError> {
        use TrackingState::*;
        info!("AV-004: NetworkFailure");

        let mut h = self.harness(4)?;
        h.fetcher.fail(MODEL_URL, EnvError::Timeout(30_000));

        let target = self.scripted(vec![
            Segment::new(Tracking, 15),
            Segment::new(NotTracking, 3),
            Segment::new(Tracking, 15),
            Segment::new(Stopped, 2),
            Segment::new(Tracking, 10),
        ]);
        let heal_at = target.total_ticks() - 10;
        let mut oracle = self.oracle(vec![target]);
        h.play(&mut oracle, |h, tick| {
            if tick == heal_at {
                h.fetcher.heal(MODEL_URL);
            }
        });

        let mut checks = Checks::default();
        let stats = h.session.stats();
        checks.expect_eq("loads", stats.loads_started, 3);
        checks.expect_eq("failures", stats.loads_failed, 2);
        checks.expect_eq("placements", stats.placements, 1);
        checks.expect_eq("model fetches", h.fetcher.fetch_count(MODEL_URL), 3);
        checks.expect_eq(
            "load failed events",
            h.host.count_status(|e| matches!(e, StatusEvent::LoadFailed { .. })),
            2,
        );
        checks.expect_eq(
            "loading hidden events",
            h.host.count_status(|e| matches!(e, StatusEvent::LoadingHidden { .. })),
            3,
        );

        Ok(h.finish(ScenarioId::NetworkFailure, self.seed, checks))
    }

    /// AV-005: CorruptAsset.
    fn run_corrupt_asset(&self) -> Result<ScenarioResult, SimError> {
        info!("AV-005: CorruptAsset");

        let mut h = self.harness(self.load_latency_ticks)?;
        h.fetcher.insert(MODEL_URL, b"<html><body>404 Not Found</body></html>".to_vec());
        let mut oracle = self.oracle(vec![self.scripted(vec![Segment::new(TrackingState::Tracking, 20)])]);
        h.play(&mut oracle, |_, _| {});

        let mut checks = Checks::default();
        let stats = h.session.stats();
        checks.expect_eq("loads", stats.loads_started, 1);
        checks.expect_eq("failures", stats.loads_failed, 1);
        checks.expect_eq("live anchors", h.scene.live_anchors(), 0);
        checks.expect_eq("phase", h.session.phase(h.target()), Some(TargetPhase::AwaitingDetection));

        let parse_reported = h.host.status_events().iter().any(|e| {
            matches!(e, StatusEvent::LoadFailed { reason, .. } if reason.starts_with("Parse error"))
        });
        checks.expect(parse_reported, "parse failure not reported to host");

        Ok(h.finish(ScenarioId::CorruptAsset, self.seed, checks))
    }

    /// AV-006: PausedDuringLoad.
    fn run_paused_during_load(&self) -> Result<ScenarioResult, SimError> {
        use TrackingState::*;
        info!("AV-006: PausedDuringLoad");

        let mut h = self.harness(5)?;
        let mut oracle = self.oracle(vec![self.scripted(vec![
            Segment::new(Tracking, 2),
            Segment::new(NotTracking, 10),
            Segment::new(Tracking, 10),
        ])]);

        let mut anchored_while_paused = false;
        h.play(&mut oracle, |h, tick| {
            if (2..12).contains(&tick) && h.scene.anchors_created() > 0 {
                anchored_while_paused = true;
            }
        });

        let mut checks = Checks::default();
        let stats = h.session.stats();
        checks.expect(!anchored_while_paused, "anchor created while target paused");
        checks.expect_eq("loads", stats.loads_started, 1);
        checks.expect_eq("parked", h.parked, 1);
        checks.expect_eq("placements", stats.placements, 1);
        checks.expect_eq("live anchors", h.scene.live_anchors(), 1);

        Ok(h.finish(ScenarioId::PausedDuringLoad, self.seed, checks))
    }

    /// AV-007: ForeignTargets.
    fn run_foreign_targets(&self) -> Result<ScenarioResult, SimError> {
        use TrackingState::*;
        info!("AV-007: ForeignTargets");

        let mut h = self.harness(self.load_latency_ticks)?;
        let mut poster = ScriptedTarget::new("Poster", vec![Segment::new(Tracking, 40)]);
        poster.position = Vector3::new(0.3, 0.0, -0.8);
        let billboard = ScriptedTarget::new(
            "Billboard",
            vec![Segment::new(Tracking, 5), Segment::new(Stopped, 5), Segment::new(Tracking, 30)],
        );
        let ours = self.scripted(vec![Segment::new(NotTracking, 20), Segment::new(Tracking, 20)]);
        let mut oracle = self.oracle(vec![poster, billboard, ours]);
        h.play(&mut oracle, |_, _| {});

        let mut checks = Checks::default();
        let stats = h.session.stats();
        checks.expect_eq("loads", stats.loads_started, 1);
        checks.expect_eq("ignored observations", stats.ignored_observations, 80);
        checks.expect_eq("placements", stats.placements, 1);
        checks.expect_eq("foreign phase", h.session.phase("Poster"), None);

        Ok(h.finish(ScenarioId::ForeignTargets, self.seed, checks))
    }

    /// AV-008: GestureSession.
    ///
    /// **Assertion**: rejected gestures only report Start and leave the scene
    /// untouched; accepted ones end with a payload that decodes to the
    /// manipulated local transform, and the scene node carries that same
    /// transform after every change.
    fn run_gesture_session(&self) -> Result<ScenarioResult, SimError> {
        info!("AV-008: GestureSession");

        let mut h = self.harness(self.load_latency_ticks)?;
        let mut oracle = self.oracle(vec![self.scripted(vec![Segment::new(TrackingState::Tracking, 30)])]);
        h.play(&mut oracle, |_, _| {});

        let mut checks = Checks::default();
        let Some(asset) = h.session.anchored(h.target()).cloned() else {
            checks.expect(false, "model was never placed");
            return Ok(h.finish(ScenarioId::GestureSession, self.seed, checks));
        };

        let gestures = GestureConfig {
            enable_pan: true,
            enable_rotate: true,
            ..self.config.gestures.clone()
        };
        let mut node =
            ManipulableNode::from_anchored(&asset, h.scene.clone(), h.host.clone(), h.codec.clone(), &gestures);
        let initial = *node.local_transform();
        h.host.clear();

        // Not selected: Start only, nothing moves
        let nudge = Gesture::Drag {
            delta: Vector3::new(0.1, 0.0, 0.0),
        };
        node.handle(GesturePhase::Start, &nudge);
        node.handle(GesturePhase::Continue, &nudge);
        node.handle(GesturePhase::End, &nudge);
        let methods: Vec<String> = h.host.gesture_messages().into_iter().map(|m| m.method).collect();
        checks.expect_eq("rejected pan events", methods, vec!["onPanStart".to_string()]);
        checks.expect(*node.local_transform() == initial, "rejected pan moved the node");
        checks.expect_eq("scene updates after rejected pan", h.scene.transform_updates(), 0);

        node.select();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ 0x6765_7374);

        // Pan
        let mut total = Vector3::zeros();
        let mut changes = 0u64;
        node.handle(GesturePhase::Start, &Gesture::Drag { delta: Vector3::zeros() });
        for _ in 0..rng.gen_range(3..8) {
            let delta = Vector3::new(rng.gen_range(-0.05..0.05), 0.0, rng.gen_range(-0.05..0.05));
            total += delta;
            node.handle(GesturePhase::Continue, &Gesture::Drag { delta });
            changes += 1;
            checks.expect(
                scene_local(&h.scene, &asset) == Some(*node.local_transform()),
                "scene node lags behind pan",
            );
        }
        node.handle(GesturePhase::End, &Gesture::Drag { delta: Vector3::zeros() });

        match end_payload(&h.host, "onPanEnd") {
            Some(payload) => match h.codec.decompose(&payload.transform) {
                Ok(decoded) => {
                    checks.expect_eq("payload name", payload.name.as_str(), asset.node_name.as_str());
                    checks.expect(
                        (decoded.translation() - (initial.translation() + total)).amax() < 1e-9,
                        "pan payload translation does not match applied deltas",
                    );
                    checks.expect(
                        (decoded.scale() - initial.scale()).amax() < 1e-9,
                        "pan payload changed scale",
                    );
                }
                Err(err) => checks.expect(false, format!("pan payload does not decode: {}", err)),
            },
            None => checks.expect(false, "no onPanEnd payload"),
        }

        // Rotate
        let mut twist_total = 0.0;
        let before = node.local_transform().rotation();
        node.handle(GesturePhase::Start, &Gesture::Twist { delta_degrees: 0.0 });
        for _ in 0..rng.gen_range(3..8) {
            let delta_degrees = rng.gen_range(-10.0..10.0);
            twist_total += delta_degrees;
            node.handle(GesturePhase::Continue, &Gesture::Twist { delta_degrees });
            changes += 1;
            checks.expect(
                scene_local(&h.scene, &asset) == Some(*node.local_transform()),
                "scene node lags behind twist",
            );
        }
        node.handle(GesturePhase::End, &Gesture::Twist { delta_degrees: 0.0 });

        let expected = before
            * UnitQuaternion::from_axis_angle(
                &Vector3::y_axis(),
                (-twist_total * gestures.rotation_rate_degrees).to_radians(),
            );
        checks.expect(
            node.local_transform().rotation().angle_to(&expected) < 1e-7,
            "twist applied the wrong rotation",
        );
        match end_payload(&h.host, "onRotationEnd").map(|p| h.codec.decompose(&p.transform)) {
            Some(Ok(decoded)) => checks.expect(
                decoded.rotation().angle_to(&expected) < 1e-7,
                "rotation payload does not match node",
            ),
            _ => checks.expect(false, "no decodable onRotationEnd payload"),
        }

        checks.expect_eq("scene transform updates", h.scene.transform_updates(), changes);
        let target = h.target().to_string();
        checks.expect(
            h.session.record_manipulation(&target, *node.local_transform()),
            "placed asset vanished during gestures",
        );
        checks.expect(
            h.session.anchored(&target).map(|a| a.applied_transform) == Some(*node.local_transform()),
            "session did not keep the manipulated transform",
        );

        info!("✓ GestureSession complete: {} gesture events", h.host.gesture_messages().len());
        Ok(h.finish(ScenarioId::GestureSession, self.seed, checks))
    }

    /// AV-009: TrackingChaos.
    ///
    /// **Assertion**: loads never exceed tracking runs; no anchor outlives a
    /// Stopped observation; everything is removed after the final loss.
    fn run_tracking_chaos(&self) -> Result<ScenarioResult, SimError> {
        info!("AV-009: TrackingChaos");

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ 0x6368_616f_73);
        let latency = rng.gen_range(0..=8);
        let mut script = random_script(&mut rng, 16, 20);
        script.push(Segment::new(TrackingState::Stopped, 1));

        let mut h = self.harness(latency)?;
        let target = self.scripted(script);
        let runs = target.tracking_runs();
        let mut oracle = self.oracle(vec![target]).with_jitter(0.005);
        h.play(&mut oracle, |_, _| {});
        h.drain();

        let mut checks = Checks::default();
        let stats = h.session.stats();
        checks.expect(
            stats.loads_started as usize <= runs,
            format!("{} loads for {} tracking runs", stats.loads_started, runs),
        );
        checks.expect_eq("live anchors after loss", h.scene.live_anchors(), 0);
        checks.expect_eq("placements vs removals", stats.placements, stats.removals);
        checks.expect(h.scene.max_live_anchors() <= 1, "more than one anchor alive");

        debug!(latency, runs, ?stats, "chaos run finished");
        Ok(h.finish(ScenarioId::TrackingChaos, self.seed, checks))
    }

    /// AV-010: DriverLifecycle.
    ///
    /// Runtime ready after 300ms of virtual time; frames go through the
    /// driver queue; shutdown tears the placement down.
    fn run_driver_lifecycle(&self) -> Result<ScenarioResult, SimError> {
        use TrackingState::*;
        info!("AV-010: DriverLifecycle");

        let rig = DriverRig::new(self.seed, Some(Duration::from_millis(300)));
        let launcher = rig.launcher(&self.config);
        let executor = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
        let mut checks = Checks::default();

        // Rejected synchronously, nothing spawned
        let rejected = launcher.launch(&LaunchRequest::new("", IMAGE_URL, self.scale_factor));
        checks.expect(
            matches!(rejected, Err(LaunchError::InvalidArguments(_))),
            "empty model URL was accepted",
        );

        let mut oracle = self.oracle(vec![self.scripted(vec![
            Segment::new(NotTracking, 5),
            Segment::new(Tracking, 30),
        ])]);
        let dt = Duration::from_secs_f64(1.0 / self.tick_rate_hz as f64);
        let target = self.config.target_name.clone();

        let frames = executor.block_on(async {
            let ack = match launcher.launch(&LaunchRequest::new(MODEL_URL, IMAGE_URL, self.scale_factor)) {
                Ok(ack) => ack,
                Err(err) => {
                    checks.expect(false, format!("launch failed: {}", err));
                    return 0;
                }
            };
            checks.expect(
                wait_for_phase(&ack.handle, &target, TargetPhase::AwaitingDetection).await,
                "session never armed",
            );

            let mut frames = 0;
            while !oracle.is_finished() {
                if ack.handle.submit_frame(oracle.next_frame()) {
                    frames += 1;
                }
                rig.context.advance_time(dt);
                tokio::task::yield_now().await;
            }
            checks.expect(
                wait_for_phase(&ack.handle, &target, TargetPhase::Placed).await,
                "model never placed",
            );

            ack.handle.shutdown().await;
            checks.expect(
                wait_for_phase(&ack.handle, &target, TargetPhase::Idle).await,
                "session not torn down",
            );
            frames
        });

        let registered = rig.runtime.registered();
        checks.expect_eq("registered targets", registered.len(), 1);
        if let Some(reference) = registered.first() {
            checks.expect_eq("reference name", reference.name.as_str(), self.config.target_name.as_str());
            checks.expect_eq("reference width", reference.physical_width_m, self.config.physical_width_m);
            checks.expect(reference.image == sample_image(), "registered image bytes differ");
        }
        checks.expect(rig.context.now() >= Duration::from_millis(300), "registered before runtime was ready");

        let events = rig.host.status_events();
        checks.expect(
            events.first() == Some(&StatusEvent::RuntimeReady),
            "first status event is not RuntimeReady",
        );
        checks.expect_eq("anchors created", rig.scene.anchors_created(), 1);
        checks.expect_eq("live anchors after shutdown", rig.scene.live_anchors(), 0);

        let metrics = ScenarioMetrics {
            observations: frames,
            placements: rig.scene.anchors_created(),
            removals: rig.scene.anchors_removed(),
            status_events: events.len(),
            max_live_anchors: rig.scene.max_live_anchors(),
            ..Default::default()
        };
        Ok(build_result(
            ScenarioId::DriverLifecycle,
            self.seed,
            frames,
            rig.context.now(),
            checks.failures,
            metrics,
        ))
    }

    /// AV-011: RuntimeUnavailable.
    fn run_runtime_unavailable(&self) -> Result<ScenarioResult, SimError> {
        info!("AV-011: RuntimeUnavailable");

        let rig = DriverRig::new(self.seed, None);
        let launcher = rig.launcher(&self.config);
        let executor = tokio::runtime::Builder::new_current_thread().enable_time().build()?;
        let mut checks = Checks::default();

        let request = LaunchRequest::new(MODEL_URL, IMAGE_URL, self.scale_factor);
        match anchorview_core::validate_launch(&request) {
            Ok(validated) => {
                let (driver, _handle) = launcher.build(validated);
                match executor.block_on(driver.run()) {
                    Err(StartupError::TrackingUnavailable(ms)) => {
                        checks.expect_eq("timeout ms", ms, self.config.runtime_ready_timeout_ms)
                    }
                    other => checks.expect(false, format!("expected TrackingUnavailable, got {:?}", other)),
                }
            }
            Err(err) => checks.expect(false, format!("launch rejected: {}", err)),
        }

        checks.expect(
            rig.context.now() >= self.config.runtime_ready_timeout(),
            "gave up before the timeout",
        );
        checks.expect(rig.runtime.registered().is_empty(), "target registered without runtime");
        checks.expect_eq("image fetches", rig.fetcher.fetch_count(IMAGE_URL), 0);
        let events = rig.host.status_events();
        checks.expect(
            matches!(events.as_slice(), [StatusEvent::StartupFailed { .. }]),
            format!("unexpected status events: {:?}", events),
        );

        let metrics = ScenarioMetrics {
            status_events: events.len(),
            ..Default::default()
        };
        Ok(build_result(
            ScenarioId::RuntimeUnavailable,
            self.seed,
            0,
            rig.context.now(),
            checks.failures,
            metrics,
        ))
    }
}

// ============================================================================
// DRIVER RIG
// ============================================================================

/// Adapters for scenarios that run the full driver.
struct DriverRig {
    context: Arc<SimContext>,
    fetcher: Arc<SimFetcher>,
    scene: Arc<RecordingScene>,
    host: Arc<RecordingHost>,
    runtime: Arc<SimTrackingRuntime>,
}

impl DriverRig {
    fn new(seed: u64, ready_at: Option<Duration>) -> Self {
        let context = SimContext::shared(seed);
        let fetcher = Arc::new(SimFetcher::new());
        fetcher.insert(MODEL_URL, sample_model());
        fetcher.insert(IMAGE_URL, sample_image());

        Self {
            runtime: Arc::new(SimTrackingRuntime::new(context.clone(), ready_at)),
            context,
            fetcher,
            scene: Arc::new(RecordingScene::new()),
            host: Arc::new(RecordingHost::new()),
        }
    }

    fn launcher(&self, config: &SessionConfig) -> Launcher<SimContext> {
        let collaborators = Collaborators {
            fetcher: self.fetcher.clone(),
            parser: Arc::new(GltfParser),
            scene: self.scene.clone(),
            runtime: self.runtime.clone(),
            host: self.host.clone(),
        };
        Launcher::new(self.context.clone(), collaborators, config.clone())
    }
}

async fn wait_for_phase(handle: &SessionHandle, target: &str, phase: TargetPhase) -> bool {
    let mut rx = handle.subscribe();
    let reached = tokio::time::timeout(
        DRIVER_WAIT,
        rx.wait_for(|s| s.target(target).map(|t| t.phase) == Some(phase)),
    )
    .await;
    matches!(reached, Ok(Ok(_)))
}

/// Local transform the scene currently holds for the asset's node.
fn scene_local(scene: &RecordingScene, asset: &AnchoredAsset) -> Option<DecomposedTransform> {
    scene
        .attached()
        .into_iter()
        .find(|(_, node)| node.id == asset.scene_node)
        .map(|(_, node)| node.local)
}

fn end_payload(host: &RecordingHost, method: &str) -> Option<SerializedTransform> {
    host.gesture_messages()
        .into_iter()
        .rev()
        .find(|m| m.method == method)
        .and_then(|m| serde_json::from_value(m.arguments).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_model_parses() {
        use anchorview_core::AssetParser;
        let url = anchorview_env::Url::parse(MODEL_URL).unwrap();
        let node = GltfParser.parse(&url, &sample_model()).unwrap();
        assert_eq!(node.summary().nodes, 1);
    }

    #[test]
    fn test_detect_and_place_passes() {
        let result = ScenarioRunner::new(42).run(ScenarioId::DetectAndPlace);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.loads_requested, 1);
        assert_eq!(result.total_ticks, 70);
    }

    #[test]
    fn test_flicker_discards_first_load() {
        let result = ScenarioRunner::new(7).run(ScenarioId::FlickerDuringLoad);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.metrics.loads_requested, 2);
        assert_eq!(result.metrics.loads_discarded, 1);
    }

    #[test]
    fn test_same_seed_same_metrics() {
        let a = ScenarioRunner::new(99).run(ScenarioId::TrackingChaos);
        let b = ScenarioRunner::new(99).run(ScenarioId::TrackingChaos);
        assert_eq!(a.metrics.loads_requested, b.metrics.loads_requested);
        assert_eq!(a.metrics.placements, b.metrics.placements);
        assert_eq!(a.total_ticks, b.total_ticks);
    }
}
