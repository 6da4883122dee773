//! Scenarios for the tracking pipeline.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// AV-001: Detection triggers one load and the model is placed
    DetectAndPlace,

    /// AV-002: [Tracking, Tracking, Stopped, Tracking] with a slow download
    FlickerDuringLoad,

    /// AV-003: Placed model removed on loss, reloaded on re-detection
    LostAfterPlacement,

    /// AV-004: Download times out; only re-detection retries
    NetworkFailure,

    /// AV-005: Payload is not a glTF asset
    CorruptAsset,

    /// AV-006: Download finishes while the target is paused
    PausedDuringLoad,

    /// AV-007: Other images in view are ignored
    ForeignTargets,

    /// AV-008: Pan and rotate a placed model, check host payloads
    GestureSession,

    // ═══════════════════════════════════════════════════
    // CHAOS
    // ═══════════════════════════════════════════════════
    /// AV-009: Random tracking flicker with random load latency
    TrackingChaos,

    /// AV-010: Full driver with virtual-time runtime startup
    DriverLifecycle,

    /// AV-011: AR runtime never becomes ready
    RuntimeUnavailable,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::DetectAndPlace,
            ScenarioId::FlickerDuringLoad,
            ScenarioId::LostAfterPlacement,
            ScenarioId::NetworkFailure,
            ScenarioId::CorruptAsset,
            ScenarioId::PausedDuringLoad,
            ScenarioId::ForeignTargets,
            ScenarioId::GestureSession,
            ScenarioId::TrackingChaos,
            ScenarioId::DriverLifecycle,
            ScenarioId::RuntimeUnavailable,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::DetectAndPlace => "detect_and_place",
            ScenarioId::FlickerDuringLoad => "flicker_during_load",
            ScenarioId::LostAfterPlacement => "lost_after_placement",
            ScenarioId::NetworkFailure => "network_failure",
            ScenarioId::CorruptAsset => "corrupt_asset",
            ScenarioId::PausedDuringLoad => "paused_during_load",
            ScenarioId::ForeignTargets => "foreign_targets",
            ScenarioId::GestureSession => "gesture_session",
            ScenarioId::TrackingChaos => "tracking_chaos",
            ScenarioId::DriverLifecycle => "driver_lifecycle",
            ScenarioId::RuntimeUnavailable => "runtime_unavailable",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::DetectAndPlace => "First Tracking frame loads the model once; placed with scale and axis correction",
            ScenarioId::FlickerDuringLoad => "Two loads for two tracking runs; the first resolves after Stopped and is discarded",
            ScenarioId::LostAfterPlacement => "Stopped removes the anchor; re-detection loads and places again",
            ScenarioId::NetworkFailure => "Timeouts hide the indicator; one attempt per tracking run, no auto-retry",
            ScenarioId::CorruptAsset => "Parse failure never reports 100% and leaves no anchor",
            ScenarioId::PausedDuringLoad => "Completion during NotTracking is parked and placed on resume",
            ScenarioId::ForeignTargets => "Observations for unregistered images never trigger loads",
            ScenarioId::GestureSession => "Pan/rotate deltas round-trip through the serialized end payload",
            ScenarioId::TrackingChaos => "Random flicker: at most one load per run, never an anchor after loss",
            ScenarioId::DriverLifecycle => "Runtime wait, image registration, actor-driven placement and teardown",
            ScenarioId::RuntimeUnavailable => "Startup gives up with TrackingUnavailable after the configured timeout",
        }
    }

    /// Returns true if this scenario uses randomised scripts.
    pub fn is_chaos(&self) -> bool {
        matches!(self, ScenarioId::TrackingChaos)
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_lowercase();
        ScenarioId::all()
            .into_iter()
            .enumerate()
            .find(|(i, id)| {
                id.name() == wanted || id.name().replace('_', "") == wanted || format!("av-{:03}", i + 1) == wanted
            })
            .map(|(_, id)| id)
            .ok_or_else(|| format!("Unknown scenario: {}", s))
    }
}
