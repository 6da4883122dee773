//! Runtime configuration for an AnchorView session.
//!
//! Every struct has a `Default` matching the behaviour of the mobile
//! plugin and can be loaded from JSON; missing fields fall back to the
//! defaults.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::transform_codec::AxisConvention;

/// Arguments the host passes to `launch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    pub model_url: String,
    pub image_url: String,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
}

fn default_scale_factor() -> f64 {
    1.0
}

impl LaunchRequest {
    pub fn new(model_url: impl Into<String>, image_url: impl Into<String>, scale_factor: f64) -> Self {
        Self {
            model_url: model_url.into(),
            image_url: image_url.into(),
            scale_factor,
        }
    }
}

/// Configuration for one tracking session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name the reference image is registered under (default: "TargetQR")
    pub target_name: String,

    /// Name given to the placed model node (default: "ModelNode")
    pub node_name: String,

    /// Physical width of the printed reference image in meters (default: 0.15)
    pub physical_width_m: f64,

    /// How long to wait for the AR runtime before giving up (default: 10s)
    pub runtime_ready_timeout_ms: u64,

    /// Readiness polling interval (default: 100ms)
    pub runtime_poll_interval_ms: u64,

    /// Bounded capacity of the driver's event queue (default: 64)
    pub event_queue_capacity: usize,

    /// Engine axis correction applied to decoded rotations
    pub convention: AxisConvention,

    pub loader: LoaderConfig,

    pub gestures: GestureConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_name: "TargetQR".to_string(),
            node_name: "ModelNode".to_string(),
            physical_width_m: 0.15,
            runtime_ready_timeout_ms: 10_000,
            runtime_poll_interval_ms: 100,
            event_queue_capacity: 64,
            convention: AxisConvention::Sceneform,
            loader: LoaderConfig::default(),
            gestures: GestureConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn runtime_ready_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime_ready_timeout_ms)
    }

    pub fn runtime_poll_interval(&self) -> Duration {
        // A zero interval would spin the executor
        Duration::from_millis(self.runtime_poll_interval_ms.max(1))
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }
}

/// Asset loader tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Fraction of the progress range attributed to the download (default: 0.9).
    /// The rest is reported once parsing succeeds.
    pub fetch_share: f32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { fetch_share: 0.9 }
    }
}

/// Gesture controller tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GestureConfig {
    /// Degrees of node rotation per degree of twist (default: 2.5)
    pub rotation_rate_degrees: f64,

    pub enable_pan: bool,

    pub enable_rotate: bool,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            rotation_rate_degrees: 2.5,
            enable_pan: true,
            enable_rotate: true,
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(String),

    #[error("Invalid config: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.target_name, "TargetQR");
        assert_eq!(config.physical_width_m, 0.15);
        assert_eq!(config.runtime_poll_interval(), Duration::from_millis(100));
        assert_eq!(config.gestures.rotation_rate_degrees, 2.5);
        assert_eq!(config.convention, AxisConvention::Sceneform);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = SessionConfig::from_json_str(
            r#"{ "target_name": "Poster", "convention": { "kind": "identity" } }"#,
        )
        .unwrap();
        assert_eq!(config.target_name, "Poster");
        assert_eq!(config.convention, AxisConvention::Identity);
        assert_eq!(config.node_name, "ModelNode");
        assert_eq!(config.loader.fetch_share, 0.9);
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = SessionConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_launch_request_host_field_names() {
        let request: LaunchRequest = serde_json::from_str(
            r#"{ "modelUrl": "https://a/b.glb", "imageUrl": "https://a/c.png" }"#,
        )
        .unwrap();
        assert_eq!(request.scale_factor, 1.0);
        assert_eq!(request.model_url, "https://a/b.glb");
    }

    #[test]
    fn test_zero_poll_interval_clamped() {
        let config = SessionConfig {
            runtime_poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(config.runtime_poll_interval(), Duration::from_millis(1));
    }
}
