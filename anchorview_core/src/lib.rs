//! AnchorView Core - Tracking-Triggered Asset Pipeline
//!
//! Detects a reference image, loads a 3D asset when it is first seen,
//! anchors the asset to the image's pose and reports user manipulation back
//! to the host application:
//! 1. **Transform Codec**: 4×4 pose matrix ⇄ scale / translation / rotation
//! 2. **Asset Loader**: validated, progress-reporting loads with per-target supersession
//! 3. **Tracking Session**: one load per tracking run, placement and removal
//! 4. **Gestures**: pan/rotate controllers streaming events and the final transform
//!
//! I/O lives behind `anchorview_env` and the adapter traits in [`scene`].

pub mod transform_codec;
pub mod config;
pub mod host_protocol;
pub mod scene;
pub mod asset_loader;
pub mod tracking_session;
pub mod gestures;
pub mod session_driver;
pub mod launcher;

// Re-export key types for convenience
pub use transform_codec::{AxisConvention, DecomposedTransform, DecompositionError, PoseMatrix, TransformCodec};
pub use config::{ConfigError, GestureConfig, LaunchRequest, LoaderConfig, SessionConfig};
pub use host_protocol::{GestureEvent, GestureKind, SerializedTransform, StatusEvent};
pub use scene::{
    AssetParser, AssetSummary, ParseError, ReferenceTarget, RuntimeError, SceneError, SceneGraph, SceneNode,
    TrackingRuntime,
};
#[cfg(feature = "gltf")]
pub use scene::GltfParser;
pub use asset_loader::{AssetLoader, LoadError, LoadSlots, LoadToken};
pub use tracking_session::{
    AnchoredAsset, CompletionOutcome, LoadRequest, LoadSession, LoadState, SessionSnapshot, SessionStats,
    TargetPhase, TargetSnapshot, TrackingObservation, TrackingSession, TrackingState,
};
pub use gestures::{
    Gesture, GesturePhase, GestureReporter, ManipulableNode, NodeState, PanController, RotateController,
    TransformController,
};
pub use session_driver::{SessionDriver, SessionEvent, SessionHandle, StartupError};
pub use launcher::{validate_launch, Collaborators, LaunchAck, LaunchError, Launcher, ValidatedLaunch};
