//! The "TRACKING" Engine - Detection-Triggered Asset Placement
//!
//! Turns the noisy per-frame stream of image-tracking observations into at
//! most one asset load per continuous tracking run, and anchors the result
//! to the target's pose.
//!
//! Per-target lifecycle:
//!
//! ```text
//!   Idle ──arm──► AwaitingDetection ──Tracking──► Loading ──loaded──► Placed
//!                        ▲                           │                   │
//!                        └──── Stopped / failure ────┘◄──── Stopped ─────┘
//! ```
//!
//! The session is a plain single-writer state machine. Load completions
//! carry the [`LoadToken`] they were started with; anything that no longer
//! matches the slot's current generation is discarded, which is how a load
//! that resolves after tracking was lost is kept out of the scene.

use anchorview_env::{AnchorId, HostChannel, SceneNodeId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::asset_loader::{LoadError, LoadSlots, LoadToken};
use crate::host_protocol::StatusEvent;
use crate::scene::{SceneGraph, SceneNode};
use crate::transform_codec::{DecomposedTransform, PoseMatrix, TransformCodec};

// ============================================================================
// OBSERVATIONS (Input)
// ============================================================================

/// Tracking state reported by the AR runtime for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingState {
    /// Temporarily not tracked (paused); may resume
    NotTracking,
    Tracking,
    /// Tracking lost for good; the runtime will not resume this instance
    Stopped,
}

/// One per-frame report for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingObservation {
    pub target_name: String,
    pub state: TrackingState,
    pub pose: PoseMatrix,
    /// Seconds, runtime clock
    pub timestamp: f64,
}

impl TrackingObservation {
    pub fn new(target_name: impl Into<String>, state: TrackingState, pose: PoseMatrix, timestamp: f64) -> Self {
        Self {
            target_name: target_name.into(),
            state,
            pose,
            timestamp,
        }
    }
}

// ============================================================================
// PER-TARGET STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetPhase {
    Idle,
    AwaitingDetection,
    Loading,
    Placed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    Idle,
    Loading,
    /// Loaded; placed, or parked until the target is tracked again
    Loaded,
    Failed,
}

/// Load bookkeeping for one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadSession {
    pub target_name: String,
    pub url: String,
    pub state: LoadState,
    /// In `[0, 1]`
    pub progress: f32,
}

impl LoadSession {
    fn new(target_name: &str, url: &str) -> Self {
        Self {
            target_name: target_name.to_string(),
            url: url.to_string(),
            state: LoadState::Idle,
            progress: 0.0,
        }
    }

    fn reset(&mut self) {
        self.state = LoadState::Idle;
        self.progress = 0.0;
    }
}

/// A loaded asset attached to the target's anchor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchoredAsset {
    pub target_name: String,
    pub node: SceneNode,
    pub node_name: String,
    pub anchor: AnchorId,
    pub scene_node: SceneNodeId,
    pub applied_transform: DecomposedTransform,
}

/// A load the caller must start.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRequest {
    pub token: LoadToken,
    pub url: String,
}

/// What happened to a load completion.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Placed(SceneNodeId),
    /// Loaded while the target is paused; placed on the next Tracking frame
    Parked,
    Failed(String),
    /// Superseded or stale; the result was dropped
    Discarded,
}

#[derive(Debug)]
struct TargetSlot {
    phase: TargetPhase,
    /// A load was started for the current detection and not yet resolved
    triggered: bool,
    last_state: Option<TrackingState>,
    last_pose: PoseMatrix,
    /// Counts maximal runs of consecutive Tracking observations
    run: u64,
    /// Run that last started a load
    loaded_run: Option<u64>,
    load: LoadSession,
    parked: Option<SceneNode>,
    anchored: Option<AnchoredAsset>,
}

impl TargetSlot {
    fn new(target_name: &str, url: &str) -> Self {
        Self {
            phase: TargetPhase::Idle,
            triggered: false,
            last_state: None,
            last_pose: PoseMatrix::IDENTITY,
            run: 0,
            loaded_run: None,
            load: LoadSession::new(target_name, url),
            parked: None,
            anchored: None,
        }
    }
}

// ============================================================================
// SNAPSHOT & STATS
// ============================================================================

/// Read-only view of one target, for adapters and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSnapshot {
    pub target_name: String,
    pub phase: TargetPhase,
    pub load: LoadSession,
    pub anchored: Option<AnchoredAsset>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub targets: Vec<TargetSnapshot>,
}

impl SessionSnapshot {
    pub fn target(&self, name: &str) -> Option<&TargetSnapshot> {
        self.targets.iter().find(|t| t.target_name == name)
    }
}

/// Counters kept over the session's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub observations: u64,
    pub ignored_observations: u64,
    pub loads_started: u64,
    pub loads_discarded: u64,
    pub loads_failed: u64,
    pub placements: u64,
    pub removals: u64,
}

// ============================================================================
// TRACKING SESSION (The Engine)
// ============================================================================

/// Decides when to load, place and discard assets for registered targets.
pub struct TrackingSession {
    scene: Arc<dyn SceneGraph>,
    host: Arc<dyn HostChannel>,
    codec: TransformCodec,
    /// Local transform given to every placed node (scale factor)
    initial_transform: PoseMatrix,
    node_name: String,
    targets: HashMap<String, TargetSlot>,
    slots: LoadSlots,
    stats: SessionStats,
}

impl TrackingSession {
    pub fn new(
        scene: Arc<dyn SceneGraph>,
        host: Arc<dyn HostChannel>,
        codec: TransformCodec,
        scale_factor: f64,
        node_name: impl Into<String>,
    ) -> Self {
        Self {
            scene,
            host,
            codec,
            initial_transform: PoseMatrix::uniform_scale(scale_factor),
            node_name: node_name.into(),
            targets: HashMap::new(),
            slots: LoadSlots::new(),
            stats: SessionStats::default(),
        }
    }

    /// Registers `target` and starts waiting for it: `Idle → AwaitingDetection`.
    ///
    /// Re-arming a target that is already armed is a no-op.
    pub fn arm(&mut self, target: &str, model_url: &str) {
        let slot = self
            .targets
            .entry(target.to_string())
            .or_insert_with(|| TargetSlot::new(target, model_url));

        if slot.phase == TargetPhase::Idle {
            slot.phase = TargetPhase::AwaitingDetection;
            info!(target, url = model_url, "awaiting detection");
        }
    }

    /// Feeds every observation of one frame, in order.
    pub fn observe_frame(&mut self, observations: &[TrackingObservation]) -> Vec<LoadRequest> {
        observations.iter().filter_map(|obs| self.observe(obs)).collect()
    }

    /// Feeds one observation. Returns a load the caller must start, if any.
    pub fn observe(&mut self, obs: &TrackingObservation) -> Option<LoadRequest> {
        self.stats.observations += 1;

        let Some(slot) = self.targets.get_mut(&obs.target_name) else {
            self.stats.ignored_observations += 1;
            trace!(target = %obs.target_name, "ignoring unknown target");
            return None;
        };

        let previous = slot.last_state.replace(obs.state);
        slot.last_pose = obs.pose;
        let target = obs.target_name.as_str();

        match obs.state {
            TrackingState::Tracking => {
                if previous != Some(TrackingState::Tracking) {
                    slot.run += 1;
                    debug!(target, run = slot.run, "tracking run started");
                }

                match slot.phase {
                    TargetPhase::AwaitingDetection => {
                        // One load per run: a failed load is not retried until
                        // the target is re-detected
                        if slot.triggered || slot.loaded_run == Some(slot.run) {
                            return None;
                        }

                        slot.triggered = true;
                        slot.loaded_run = Some(slot.run);
                        slot.phase = TargetPhase::Loading;
                        slot.load.state = LoadState::Loading;
                        slot.load.progress = 0.0;

                        let token = self.slots.begin(target);
                        self.stats.loads_started += 1;
                        info!(target, generation = token.generation, "target detected, loading model");

                        emit(&*self.host, StatusEvent::TargetDetected { target: target.to_string() });
                        emit(&*self.host, StatusEvent::LoadingShown { target: target.to_string() });

                        Some(LoadRequest {
                            token,
                            url: slot.load.url.clone(),
                        })
                    }
                    TargetPhase::Loading => {
                        if let Some(node) = slot.parked.take() {
                            debug!(target, "tracking resumed, placing parked asset");
                            Self::place(
                                &*self.scene,
                                &*self.host,
                                &self.codec,
                                &self.initial_transform,
                                &self.node_name,
                                &mut self.stats,
                                target,
                                slot,
                                node,
                            );
                        }
                        None
                    }
                    TargetPhase::Idle | TargetPhase::Placed => None,
                }
            }
            TrackingState::NotTracking => {
                if previous == Some(TrackingState::Tracking) {
                    debug!(target, "tracking paused");
                }
                None
            }
            TrackingState::Stopped => {
                if previous != Some(TrackingState::Stopped) {
                    self.handle_lost(target);
                }
                None
            }
        }
    }

    /// Records load progress for a live token.
    pub fn on_progress(&mut self, token: &LoadToken, value: f32) {
        if !self.slots.is_current(token) {
            return;
        }
        let Some(slot) = self.targets.get_mut(&token.slot) else {
            return;
        };
        if slot.phase != TargetPhase::Loading || slot.load.state != LoadState::Loading {
            return;
        }

        let value = value.clamp(0.0, 1.0);
        let before = percent(slot.load.progress);
        slot.load.progress = slot.load.progress.max(value);
        let after = percent(slot.load.progress);

        if after != before || value == 0.0 {
            emit(
                &*self.host,
                StatusEvent::LoadingProgress {
                    target: token.slot.clone(),
                    percent: after,
                },
            );
        }
    }

    /// Applies a load result, unless it has been superseded.
    pub fn complete_load(
        &mut self,
        token: &LoadToken,
        result: Result<SceneNode, LoadError>,
    ) -> CompletionOutcome {
        if !self.slots.is_current(token) {
            self.stats.loads_discarded += 1;
            debug!(target = %token.slot, generation = token.generation, "discarding superseded load");
            return CompletionOutcome::Discarded;
        }
        let Some(slot) = self.targets.get_mut(&token.slot) else {
            self.stats.loads_discarded += 1;
            return CompletionOutcome::Discarded;
        };
        if slot.phase != TargetPhase::Loading || slot.load.state != LoadState::Loading {
            self.stats.loads_discarded += 1;
            return CompletionOutcome::Discarded;
        }
        let target = token.slot.as_str();

        match result {
            Err(err) => {
                Self::fail(&*self.host, &mut self.stats, target, slot, err.to_string());
                CompletionOutcome::Failed(err.to_string())
            }
            Ok(node) if slot.last_state == Some(TrackingState::Tracking) => Self::place(
                &*self.scene,
                &*self.host,
                &self.codec,
                &self.initial_transform,
                &self.node_name,
                &mut self.stats,
                target,
                slot,
                node,
            ),
            Ok(node) => {
                debug!(target, "load finished while target paused, parking");
                slot.load.state = LoadState::Loaded;
                slot.parked = Some(node);
                CompletionOutcome::Parked
            }
        }
    }

    /// Removes every anchored asset and invalidates outstanding loads.
    pub fn teardown(&mut self) {
        let names: Vec<String> = self.targets.keys().cloned().collect();
        for name in names {
            self.release(&name);
            if let Some(slot) = self.targets.get_mut(&name) {
                slot.phase = TargetPhase::Idle;
            }
        }
    }

    /// Stores the local transform a gesture left on a placed asset. Returns
    /// `false` when the target has nothing placed.
    pub fn record_manipulation(&mut self, target: &str, transform: DecomposedTransform) -> bool {
        match self.targets.get_mut(target).and_then(|s| s.anchored.as_mut()) {
            Some(asset) => {
                asset.applied_transform = transform;
                true
            }
            None => false,
        }
    }

    pub fn phase(&self, target: &str) -> Option<TargetPhase> {
        self.targets.get(target).map(|s| s.phase)
    }

    pub fn load_session(&self, target: &str) -> Option<&LoadSession> {
        self.targets.get(target).map(|s| &s.load)
    }

    pub fn anchored(&self, target: &str) -> Option<&AnchoredAsset> {
        self.targets.get(target).and_then(|s| s.anchored.as_ref())
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn codec(&self) -> &TransformCodec {
        &self.codec
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut targets: Vec<TargetSnapshot> = self
            .targets
            .iter()
            .map(|(name, slot)| TargetSnapshot {
                target_name: name.clone(),
                phase: slot.phase,
                load: slot.load.clone(),
                anchored: slot.anchored.clone(),
            })
            .collect();
        targets.sort_by(|a, b| a.target_name.cmp(&b.target_name));
        SessionSnapshot { targets }
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// `Stopped`: supersede in-flight loads, detach anything placed.
    fn handle_lost(&mut self, target: &str) {
        if self.release(target) {
            info!(target, "tracking lost");
            emit(&*self.host, StatusEvent::TrackingLost { target: target.to_string() });
        }
    }

    /// Supersedes an in-flight load or removes the placed asset, then clears
    /// the load state. Returns whether a load or a placement was released.
    fn release(&mut self, target: &str) -> bool {
        let Some(slot) = self.targets.get_mut(target) else {
            return false;
        };

        let released = match slot.phase {
            TargetPhase::Loading => {
                self.slots.supersede(target);
                slot.parked = None;
                slot.phase = TargetPhase::AwaitingDetection;
                info!(target, "load superseded");
                emit(&*self.host, StatusEvent::LoadingHidden { target: target.to_string() });
                true
            }
            TargetPhase::Placed => {
                if let Some(asset) = slot.anchored.take() {
                    self.scene.remove(asset.anchor);
                    self.stats.removals += 1;
                    info!(target, anchor = %asset.anchor, "asset removed");
                    emit(&*self.host, StatusEvent::AssetRemoved { target: target.to_string() });
                }
                slot.phase = TargetPhase::AwaitingDetection;
                true
            }
            TargetPhase::AwaitingDetection | TargetPhase::Idle => false,
        };

        slot.load.reset();
        slot.triggered = false;
        released
    }

    #[allow(clippy::too_many_arguments)]
    fn place(
        scene: &dyn SceneGraph,
        host: &dyn HostChannel,
        codec: &TransformCodec,
        initial_transform: &PoseMatrix,
        node_name: &str,
        stats: &mut SessionStats,
        target: &str,
        slot: &mut TargetSlot,
        node: SceneNode,
    ) -> CompletionOutcome {
        let local = match codec.decompose(initial_transform) {
            Ok(local) => local,
            Err(err) => {
                let reason = format!("initial transform: {}", err);
                Self::fail(host, stats, target, slot, reason.clone());
                return CompletionOutcome::Failed(reason);
            }
        };

        let anchor = match scene.create_anchor(&slot.last_pose) {
            Ok(anchor) => anchor,
            Err(err) => {
                Self::fail(host, stats, target, slot, err.to_string());
                return CompletionOutcome::Failed(err.to_string());
            }
        };

        let scene_node = match scene.attach(anchor, &node, node_name, &local) {
            Ok(id) => id,
            Err(err) => {
                scene.remove(anchor);
                Self::fail(host, stats, target, slot, err.to_string());
                return CompletionOutcome::Failed(err.to_string());
            }
        };

        slot.anchored = Some(AnchoredAsset {
            target_name: target.to_string(),
            node,
            node_name: node_name.to_string(),
            anchor,
            scene_node,
            applied_transform: local,
        });
        slot.phase = TargetPhase::Placed;
        slot.load.state = LoadState::Loaded;
        slot.load.progress = 1.0;
        slot.triggered = false;
        stats.placements += 1;

        info!(target, anchor = %anchor, node = %scene_node, "model placed successfully");
        emit(host, StatusEvent::LoadingHidden { target: target.to_string() });
        emit(
            host,
            StatusEvent::AssetPlaced {
                target: target.to_string(),
                node: node_name.to_string(),
            },
        );
        CompletionOutcome::Placed(scene_node)
    }

    /// Load or placement failed: back to waiting, re-detection retries.
    fn fail(host: &dyn HostChannel, stats: &mut SessionStats, target: &str, slot: &mut TargetSlot, reason: String) {
        warn!(target, %reason, "model loading failed");
        slot.load.state = LoadState::Failed;
        slot.parked = None;
        slot.phase = TargetPhase::AwaitingDetection;
        slot.triggered = false;
        stats.loads_failed += 1;

        emit(host, StatusEvent::LoadingHidden { target: target.to_string() });
        emit(
            host,
            StatusEvent::LoadFailed {
                target: target.to_string(),
                reason,
            },
        );
    }
}

fn emit(host: &dyn HostChannel, event: StatusEvent) {
    host.invoke(event.to_host_message());
}

fn percent(progress: f32) -> u8 {
    (progress.clamp(0.0, 1.0) * 100.0).floor() as u8
}

// ============================================================================
// TESTS
// ============================================================================
