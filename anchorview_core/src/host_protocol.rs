//! Messages sent to the host application.
//!
//! Method names match the platform method channel the host listens on.

use anchorview_env::HostMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::transform_codec::PoseMatrix;

/// The six gesture notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GestureKind {
    PanStart,
    PanChange,
    PanEnd,
    RotateStart,
    RotateChange,
    RotateEnd,
}

impl GestureKind {
    /// Host method name for this notification.
    pub fn method_name(&self) -> &'static str {
        match self {
            GestureKind::PanStart => "onPanStart",
            GestureKind::PanChange => "onPanChange",
            GestureKind::PanEnd => "onPanEnd",
            GestureKind::RotateStart => "onRotationStart",
            GestureKind::RotateChange => "onRotationChange",
            GestureKind::RotateEnd => "onRotationEnd",
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, GestureKind::PanEnd | GestureKind::RotateEnd)
    }
}

/// A node's local transform as the host persists it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedTransform {
    pub name: String,
    pub transform: PoseMatrix,
}

/// One gesture notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureEvent {
    pub kind: GestureKind,
    pub node_name: String,
    pub payload: Option<SerializedTransform>,
}

impl GestureEvent {
    /// Start/change carry the node name; end carries the serialized transform.
    pub fn to_host_message(&self) -> HostMessage {
        let arguments = match &self.payload {
            Some(payload) => to_json(payload),
            None => Value::String(self.node_name.clone()),
        };
        HostMessage::new(self.kind.method_name(), arguments)
    }
}

/// Session lifecycle and loading-indicator notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    RuntimeReady,
    ReferenceImageRegistered { target: String },
    TargetDetected { target: String },
    LoadingShown { target: String },
    LoadingProgress { target: String, percent: u8 },
    LoadingHidden { target: String },
    AssetPlaced { target: String, node: String },
    AssetRemoved { target: String },
    LoadFailed { target: String, reason: String },
    TrackingLost { target: String },
    StartupFailed { reason: String },
}

impl StatusEvent {
    pub const METHOD: &'static str = "onStatus";

    pub fn to_host_message(&self) -> HostMessage {
        HostMessage::new(Self::METHOD, to_json(self))
    }
}

fn to_json<T: Serialize>(value: &T) -> Value {
    // Plain data structs; serialization cannot fail
    serde_json::to_value(value).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names() {
        assert_eq!(GestureKind::PanStart.method_name(), "onPanStart");
        assert_eq!(GestureKind::RotateEnd.method_name(), "onRotationEnd");
        assert!(GestureKind::PanEnd.is_end());
        assert!(!GestureKind::RotateChange.is_end());
    }

    #[test]
    fn test_start_event_carries_node_name() {
        let event = GestureEvent {
            kind: GestureKind::PanStart,
            node_name: "ModelNode".to_string(),
            payload: None,
        };
        let msg = event.to_host_message();
        assert_eq!(msg.method, "onPanStart");
        assert_eq!(msg.arguments, Value::String("ModelNode".to_string()));
    }

    #[test]
    fn test_end_event_carries_transform() {
        let event = GestureEvent {
            kind: GestureKind::RotateEnd,
            node_name: "ModelNode".to_string(),
            payload: Some(SerializedTransform {
                name: "ModelNode".to_string(),
                transform: PoseMatrix::IDENTITY,
            }),
        };
        let msg = event.to_host_message();
        assert_eq!(msg.method, "onRotationEnd");
        assert_eq!(msg.arguments["name"], "ModelNode");
        assert_eq!(msg.arguments["transform"].as_array().map(|a| a.len()), Some(16));
    }

    #[test]
    fn test_status_event_is_tagged() {
        let msg = StatusEvent::LoadingProgress {
            target: "TargetQR".to_string(),
            percent: 42,
        }
        .to_host_message();
        assert_eq!(msg.method, "onStatus");
        assert_eq!(msg.arguments["event"], "loading_progress");
        assert_eq!(msg.arguments["percent"], 42);
    }
}
