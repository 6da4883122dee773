//! Fire-and-forget channel back to the embedding host application.

use serde::{Deserialize, Serialize};

/// A single method invocation delivered to the host.
///
/// Mirrors a platform method channel: a method name plus JSON arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMessage {
    pub method: String,
    pub arguments: serde_json::Value,
}

impl HostMessage {
    pub fn new(method: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            arguments,
        }
    }
}

/// Outbound channel to the host.
///
/// Delivery is best-effort: implementations must not block the caller and
/// have no way to report failure. Callers on a non-UI thread rely on the
/// implementation to marshal onto whatever thread the host requires.
pub trait HostChannel: Send + Sync + 'static {
    fn invoke(&self, message: HostMessage);
}

/// Host channel that drops everything. Useful when no listener is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl HostChannel for NullHost {
    fn invoke(&self, _message: HostMessage) {}
}
