//! Recording adapters: a scene graph and a host channel that remember
//! everything done to them.

use anchorview_core::{DecomposedTransform, PoseMatrix, SceneError, SceneGraph, SceneNode, StatusEvent};
use anchorview_env::{AnchorId, HostChannel, HostMessage, SceneNodeId};
use std::collections::HashMap;
use std::sync::Mutex;

/// A node attached under an anchor.
#[derive(Debug, Clone)]
pub struct AttachedNode {
    pub id: SceneNodeId,
    pub name: String,
    pub source: String,
    pub local: DecomposedTransform,
}

#[derive(Debug, Default)]
struct SceneState {
    next_id: u64,
    anchors: HashMap<AnchorId, (PoseMatrix, Vec<AttachedNode>)>,
    created: u64,
    removed: u64,
    transform_updates: u64,
    max_live: usize,
}

/// Scene graph with deterministic ids and a live-anchor count.
#[derive(Debug, Default)]
pub struct RecordingScene {
    state: Mutex<SceneState>,
    fail_anchors: Mutex<bool>,
}

impl RecordingScene {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent anchor creation fail (runtime lost its session).
    pub fn set_fail_anchors(&self, fail: bool) {
        *self.fail_anchors.lock().unwrap() = fail;
    }

    pub fn live_anchors(&self) -> usize {
        self.state.lock().unwrap().anchors.len()
    }

    pub fn max_live_anchors(&self) -> usize {
        self.state.lock().unwrap().max_live
    }

    pub fn anchors_created(&self) -> u64 {
        self.state.lock().unwrap().created
    }

    pub fn anchors_removed(&self) -> u64 {
        self.state.lock().unwrap().removed
    }

    /// Accepted `set_local_transform` calls.
    pub fn transform_updates(&self) -> u64 {
        self.state.lock().unwrap().transform_updates
    }

    /// Every node currently attached, with its anchor pose.
    pub fn attached(&self) -> Vec<(PoseMatrix, AttachedNode)> {
        self.state
            .lock()
            .unwrap()
            .anchors
            .values()
            .flat_map(|(pose, nodes)| nodes.iter().map(move |n| (*pose, n.clone())))
            .collect()
    }
}

impl SceneGraph for RecordingScene {
    fn create_anchor(&self, pose: &PoseMatrix) -> Result<AnchorId, SceneError> {
        if *self.fail_anchors.lock().unwrap() {
            return Err(SceneError::AnchorFailed("tracking session interrupted".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = AnchorId::from_seed(state.next_id);
        state.anchors.insert(id, (*pose, Vec::new()));
        state.created += 1;
        state.max_live = state.max_live.max(state.anchors.len());
        Ok(id)
    }

    fn attach(
        &self,
        anchor: AnchorId,
        node: &SceneNode,
        name: &str,
        local: &DecomposedTransform,
    ) -> Result<SceneNodeId, SceneError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = SceneNodeId::from_seed(state.next_id);
        let Some((_, nodes)) = state.anchors.get_mut(&anchor) else {
            return Err(SceneError::AttachFailed(format!("unknown anchor {}", anchor)));
        };
        nodes.push(AttachedNode {
            id,
            name: name.to_string(),
            source: node.source().to_string(),
            local: *local,
        });
        Ok(id)
    }

    fn set_local_transform(&self, node: SceneNodeId, local: &DecomposedTransform) -> Result<(), SceneError> {
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let target = state
            .anchors
            .values_mut()
            .flat_map(|(_, nodes)| nodes.iter_mut())
            .find(|n| n.id == node);
        match target {
            Some(attached) => {
                attached.local = *local;
                state.transform_updates += 1;
                Ok(())
            }
            None => Err(SceneError::UnknownNode(node)),
        }
    }

    fn remove(&self, anchor: AnchorId) {
        let mut state = self.state.lock().unwrap();
        if state.anchors.remove(&anchor).is_some() {
            state.removed += 1;
        }
    }
}

/// Host channel that keeps every message.
#[derive(Debug, Default)]
pub struct RecordingHost {
    messages: Mutex<Vec<HostMessage>>,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<HostMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Decoded `onStatus` payloads, in order.
    pub fn status_events(&self) -> Vec<StatusEvent> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.method == StatusEvent::METHOD)
            .filter_map(|m| serde_json::from_value(m.arguments.clone()).ok())
            .collect()
    }

    /// Messages that are not status events (gesture notifications).
    pub fn gesture_messages(&self) -> Vec<HostMessage> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.method != StatusEvent::METHOD)
            .cloned()
            .collect()
    }

    pub fn count_status(&self, predicate: impl Fn(&StatusEvent) -> bool) -> usize {
        self.status_events().iter().filter(|e| predicate(*e)).count()
    }

    pub fn clear(&self) {
        self.messages.lock().unwrap().clear();
    }
}

impl HostChannel for RecordingHost {
    fn invoke(&self, message: HostMessage) {
        self.messages.lock().unwrap().push(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchorview_core::TransformCodec;
    use anchorview_env::Url;

    fn node() -> SceneNode {
        SceneNode::new(Url::parse("https://sim.local/m.glb").unwrap(), Default::default())
    }

    #[test]
    fn test_anchor_lifecycle() {
        let scene = RecordingScene::new();
        let local = TransformCodec::default().decompose(&PoseMatrix::IDENTITY).unwrap();

        let anchor = scene.create_anchor(&PoseMatrix::from_translation(0.0, 0.0, -1.0)).unwrap();
        scene.attach(anchor, &node(), "ModelNode", &local).unwrap();
        assert_eq!(scene.live_anchors(), 1);
        assert_eq!(scene.attached()[0].1.name, "ModelNode");

        scene.remove(anchor);
        scene.remove(anchor);
        assert_eq!(scene.live_anchors(), 0);
        assert_eq!(scene.anchors_removed(), 1);
        assert_eq!(scene.max_live_anchors(), 1);
    }

    #[test]
    fn test_attach_to_unknown_anchor_fails() {
        let scene = RecordingScene::new();
        let local = TransformCodec::default().decompose(&PoseMatrix::IDENTITY).unwrap();
        assert!(scene.attach(AnchorId::from_seed(99), &node(), "ModelNode", &local).is_err());
    }

    #[test]
    fn test_local_transform_updates_attached_node() {
        let scene = RecordingScene::new();
        let local = TransformCodec::default().decompose(&PoseMatrix::IDENTITY).unwrap();
        let anchor = scene.create_anchor(&PoseMatrix::IDENTITY).unwrap();
        let id = scene.attach(anchor, &node(), "ModelNode", &local).unwrap();

        let moved = local.translated(&nalgebra::Vector3::new(0.0, 0.1, 0.0));
        scene.set_local_transform(id, &moved).unwrap();
        assert_eq!(scene.attached()[0].1.local, moved);
        assert_eq!(scene.transform_updates(), 1);

        scene.remove(anchor);
        assert!(matches!(
            scene.set_local_transform(id, &local),
            Err(SceneError::UnknownNode(n)) if n == id
        ));
        assert_eq!(scene.transform_updates(), 1);
    }

    #[test]
    fn test_host_splits_status_and_gestures() {
        let host = RecordingHost::new();
        host.invoke(StatusEvent::RuntimeReady.to_host_message());
        host.invoke(HostMessage::new("onPanStart", serde_json::json!("ModelNode")));

        assert_eq!(host.status_events(), vec![StatusEvent::RuntimeReady]);
        assert_eq!(host.gesture_messages().len(), 1);
    }
}
