//! AnchorView Deterministic Simulation Harness
//!
//! Runs the tracking pipeline against scripted image tracking, an in-memory
//! CDN and a recording scene graph, all driven from a single 64-bit seed.
//!
//! # Core Principle
//!
//! Every source of non-determinism is intercepted:
//! - **Time**: virtual clock advanced by the runner (`SimContext`)
//! - **Tracking**: per-target state scripts with seeded pose jitter (`TrackingOracle`)
//! - **Network**: canned payloads, injected faults and load latency (`SimFetcher`)
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                      ScenarioRunner                       │
//! │  ┌──────────────┐   frames   ┌─────────────────────────┐  │
//! │  │ TrackingOracle├──────────►│ TrackingSession          │  │
//! │  └──────────────┘            │  (or full SessionDriver) │  │
//! │                              └──┬──────────┬───────────┘  │
//! │                   loads (delay) │          │ anchors/events│
//! │                     ┌───────────▼──┐  ┌────▼──────────────┐│
//! │                     │  SimFetcher  │  │ RecordingScene/Host││
//! │                     └──────────────┘  └───────────────────┘│
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use anchorview_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::FlickerDuringLoad);
//! assert!(result.passed);
//! ```

mod context;
mod fetcher;
mod scene;
mod runtime;
mod oracle;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use fetcher::SimFetcher;
pub use scene::{AttachedNode, RecordingHost, RecordingScene};
pub use runtime::SimTrackingRuntime;
pub use oracle::{random_script, ScriptedTarget, Segment, TrackingOracle};
pub use runner::{
    sample_image, sample_model, ScenarioMetrics, ScenarioResult, ScenarioRunner, SimError, IMAGE_URL, MODEL_URL,
};
