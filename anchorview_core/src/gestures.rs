//! Gesture → host transform reporting.
//!
//! A [`ManipulableNode`] is a placed asset plus a list of attached
//! [`TransformController`]s. Each controller follows the same
//! start / continue / end contract and reports to the host through a
//! shared [`GestureReporter`]:
//!
//! - start: always reports `*Start`, accepts only if the node is selected
//! - continue: mutates the local transform, reports `*Change`
//! - end: reports `*End` with the serialized local transform
//!
//! A node bound to a scene graph pushes its local transform to the scene
//! after every accepted continue.

use anchorview_env::{HostChannel, SceneNodeId};
use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::config::GestureConfig;
use crate::host_protocol::{GestureEvent, GestureKind, SerializedTransform};
use crate::scene::SceneGraph;
use crate::tracking_session::AnchoredAsset;
use crate::transform_codec::{DecomposedTransform, TransformCodec};

// ============================================================================
// GESTURE INPUT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GesturePhase {
    Start,
    Continue,
    End,
}

/// Recognizer output, already projected into the node's parent space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Gesture {
    /// One-finger drag; `delta` is the incremental translation
    Drag { delta: Vector3<f64> },
    /// Two-finger twist; incremental angle in degrees (clockwise positive)
    Twist { delta_degrees: f64 },
}

/// The part of a placed node gesture controllers operate on.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeState {
    pub name: String,
    pub local: DecomposedTransform,
    pub selected: bool,
}

// ============================================================================
// REPORTER
// ============================================================================

/// Sends gesture notifications to the host.
#[derive(Clone)]
pub struct GestureReporter {
    host: Arc<dyn HostChannel>,
    codec: TransformCodec,
}

impl GestureReporter {
    pub fn new(host: Arc<dyn HostChannel>, codec: TransformCodec) -> Self {
        Self { host, codec }
    }

    /// Reports a start/change notification (node name only).
    pub fn report(&self, kind: GestureKind, node: &NodeState) {
        self.send(GestureEvent {
            kind,
            node_name: node.name.clone(),
            payload: None,
        });
    }

    /// Reports an end notification carrying the node's local transform.
    pub fn report_end(&self, kind: GestureKind, node: &NodeState) {
        let payload = self.serialize(node);
        self.send(GestureEvent {
            kind,
            node_name: node.name.clone(),
            payload: Some(payload),
        });
    }

    /// Re-encodes the local transform so `decompose` returns it unchanged.
    pub fn serialize(&self, node: &NodeState) -> SerializedTransform {
        SerializedTransform {
            name: node.name.clone(),
            transform: self.codec.encode(&node.local),
        }
    }

    fn send(&self, event: GestureEvent) {
        trace!(method = event.kind.method_name(), node = %event.node_name, "gesture event");
        self.host.invoke(event.to_host_message());
    }
}

// ============================================================================
// CONTROLLERS
// ============================================================================

/// One gesture capability attached to a node.
pub trait TransformController: Send {
    /// `true` if this controller consumes `gesture`.
    fn handles(&self, gesture: &Gesture) -> bool;

    /// Returns whether the gesture was accepted.
    fn start(&mut self, node: &NodeState) -> bool;

    fn update(&mut self, node: &mut NodeState, gesture: &Gesture);

    fn end(&mut self, node: &NodeState);

    fn is_active(&self) -> bool;
}

/// Drag → translation.
pub struct PanController {
    reporter: GestureReporter,
    active: bool,
}

impl PanController {
    pub fn new(reporter: GestureReporter) -> Self {
        Self { reporter, active: false }
    }
}

impl TransformController for PanController {
    fn handles(&self, gesture: &Gesture) -> bool {
        matches!(gesture, Gesture::Drag { .. })
    }

    fn start(&mut self, node: &NodeState) -> bool {
        self.reporter.report(GestureKind::PanStart, node);
        self.active = node.selected;
        if !self.active {
            debug!(node = %node.name, "pan rejected, node not selected");
        }
        self.active
    }

    fn update(&mut self, node: &mut NodeState, gesture: &Gesture) {
        let Gesture::Drag { delta } = gesture else {
            return;
        };
        if !self.active {
            return;
        }
        node.local = node.local.translated(delta);
        self.reporter.report(GestureKind::PanChange, node);
    }

    fn end(&mut self, node: &NodeState) {
        if !self.active {
            return;
        }
        self.active = false;
        self.reporter.report_end(GestureKind::PanEnd, node);
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

/// Twist → rotation about the node's up axis.
pub struct RotateController {
    reporter: GestureReporter,
    rate_degrees: f64,
    active: bool,
}

impl RotateController {
    /// `rate_degrees`: node rotation per degree of twist
    pub fn new(reporter: GestureReporter, rate_degrees: f64) -> Self {
        Self {
            reporter,
            rate_degrees,
            active: false,
        }
    }
}

impl TransformController for RotateController {
    fn handles(&self, gesture: &Gesture) -> bool {
        matches!(gesture, Gesture::Twist { .. })
    }

    fn start(&mut self, node: &NodeState) -> bool {
        self.reporter.report(GestureKind::RotateStart, node);
        self.active = node.selected;
        if !self.active {
            debug!(node = %node.name, "rotation rejected, node not selected");
        }
        self.active
    }

    fn update(&mut self, node: &mut NodeState, gesture: &Gesture) {
        let Gesture::Twist { delta_degrees } = gesture else {
            return;
        };
        if !self.active {
            return;
        }
        // Clockwise twist turns the model clockwise seen from above
        let angle = (-delta_degrees * self.rate_degrees).to_radians();
        let delta = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), angle);
        node.local = node.local.rotated(&delta);
        self.reporter.report(GestureKind::RotateChange, node);
    }

    fn end(&mut self, node: &NodeState) {
        if !self.active {
            return;
        }
        self.active = false;
        self.reporter.report_end(GestureKind::RotateEnd, node);
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

// ============================================================================
// MANIPULABLE NODE
// ============================================================================

/// A placed node with its attached gesture controllers.
pub struct ManipulableNode {
    state: NodeState,
    controllers: Vec<Box<dyn TransformController>>,
    binding: Option<(Arc<dyn SceneGraph>, SceneNodeId)>,
}

impl ManipulableNode {
    pub fn new(name: impl Into<String>, local: DecomposedTransform) -> Self {
        Self {
            state: NodeState {
                name: name.into(),
                local,
                selected: false,
            },
            controllers: Vec::new(),
            binding: None,
        }
    }

    /// Mirrors accepted transform changes onto `node` in `scene`.
    pub fn bound_to(mut self, scene: Arc<dyn SceneGraph>, node: SceneNodeId) -> Self {
        self.binding = Some((scene, node));
        self
    }

    pub fn with_controller(mut self, controller: Box<dyn TransformController>) -> Self {
        self.controllers.push(controller);
        self
    }

    /// Builds the node for a freshly placed asset with the configured
    /// pan/rotate controllers.
    pub fn from_anchored(
        asset: &AnchoredAsset,
        scene: Arc<dyn SceneGraph>,
        host: Arc<dyn HostChannel>,
        codec: TransformCodec,
        config: &GestureConfig,
    ) -> Self {
        let reporter = GestureReporter::new(host, codec);
        let mut node = Self::new(asset.node_name.clone(), asset.applied_transform).bound_to(scene, asset.scene_node);
        if config.enable_pan {
            node = node.with_controller(Box::new(PanController::new(reporter.clone())));
        }
        if config.enable_rotate {
            node = node.with_controller(Box::new(RotateController::new(reporter, config.rotation_rate_degrees)));
        }
        node
    }

    /// Routes one recognizer callback to every controller handling it.
    pub fn handle(&mut self, phase: GesturePhase, gesture: &Gesture) {
        let state = &mut self.state;
        let mut changed = false;
        for controller in self.controllers.iter_mut().filter(|c| c.handles(gesture)) {
            match phase {
                GesturePhase::Start => {
                    controller.start(state);
                }
                GesturePhase::Continue => {
                    controller.update(state, gesture);
                    changed |= controller.is_active();
                }
                GesturePhase::End => controller.end(state),
            }
        }

        if !changed {
            return;
        }
        if let Some((scene, node)) = &self.binding {
            if let Err(err) = scene.set_local_transform(*node, &self.state.local) {
                warn!(node = %self.state.name, %err, "scene rejected transform update");
            }
        }
    }

    pub fn select(&mut self) {
        self.state.selected = true;
    }

    pub fn deselect(&mut self) {
        self.state.selected = false;
    }

    pub fn is_selected(&self) -> bool {
        self.state.selected
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn local_transform(&self) -> &DecomposedTransform {
        &self.state.local
    }

    pub fn scene_node(&self) -> Option<SceneNodeId> {
        self.binding.as_ref().map(|(_, node)| *node)
    }

    pub fn is_manipulating(&self) -> bool {
        self.controllers.iter().any(|c| c.is_active())
    }
}

// ============================================================================
// TESTS
// ============================================================================
