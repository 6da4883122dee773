//! Adapter seams to the 3D engine and the AR runtime.
//!
//! The pipeline never renders or tracks anything itself. It drives three
//! collaborators through these traits:
//! - [`AssetParser`] turns downloaded bytes into a [`SceneNode`]
//! - [`SceneGraph`] creates anchors and owns attached nodes
//! - [`TrackingRuntime`] reports readiness and accepts reference images
//!
//! Each platform (and the simulator) supplies its own implementations.

use anchorview_env::{AnchorId, SceneNodeId, Url};
use serde::{Deserialize, Serialize};

use crate::transform_codec::{DecomposedTransform, PoseMatrix};

/// Shape of a parsed asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSummary {
    pub byte_len: usize,
    pub scenes: usize,
    pub nodes: usize,
    pub meshes: usize,
    pub materials: usize,
}

/// Handle to the root of a loaded asset.
///
/// Opaque to the pipeline; the scene graph takes ownership once attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneNode {
    id: SceneNodeId,
    source: Url,
    summary: AssetSummary,
}

impl SceneNode {
    pub fn new(source: Url, summary: AssetSummary) -> Self {
        Self::with_id(SceneNodeId::new(), source, summary)
    }

    pub fn with_id(id: SceneNodeId, source: Url, summary: AssetSummary) -> Self {
        Self { id, source, summary }
    }

    pub fn id(&self) -> SceneNodeId {
        self.id
    }

    pub fn source(&self) -> &Url {
        &self.source
    }

    pub fn summary(&self) -> &AssetSummary {
        &self.summary
    }
}

/// Bytes → scene subtree.
pub trait AssetParser: Send + Sync + 'static {
    fn parse(&self, source: &Url, bytes: &[u8]) -> Result<SceneNode, ParseError>;
}

/// The host's scene graph.
pub trait SceneGraph: Send + Sync + 'static {
    /// Creates a world anchor at `pose`.
    fn create_anchor(&self, pose: &PoseMatrix) -> Result<AnchorId, SceneError>;

    /// Attaches `node` under `anchor` with the given local transform.
    fn attach(
        &self,
        anchor: AnchorId,
        node: &SceneNode,
        name: &str,
        local: &DecomposedTransform,
    ) -> Result<SceneNodeId, SceneError>;

    /// Replaces the local transform of an attached node.
    fn set_local_transform(&self, node: SceneNodeId, local: &DecomposedTransform) -> Result<(), SceneError>;

    /// Detaches and destroys `anchor` together with everything under it.
    fn remove(&self, anchor: AnchorId);
}

/// A reference image registered for detection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceTarget {
    pub name: String,
    pub image: Vec<u8>,
    pub physical_width_m: f64,
}

/// The AR runtime as seen by the session.
///
/// Observations are pushed separately, once per rendered frame.
pub trait TrackingRuntime: Send + Sync + 'static {
    /// `true` once the camera session can accept configuration.
    fn is_ready(&self) -> bool;

    fn register_target(&self, target: &ReferenceTarget) -> Result<(), RuntimeError>;
}

// ============================================================================
// GLTF PARSER
// ============================================================================

/// Default parser for binary (`.glb`) and JSON (`.gltf`) glTF 2.0 assets.
#[cfg(feature = "gltf")]
#[derive(Debug, Default, Clone, Copy)]
pub struct GltfParser;

#[cfg(feature = "gltf")]
impl AssetParser for GltfParser {
    fn parse(&self, source: &Url, bytes: &[u8]) -> Result<SceneNode, ParseError> {
        if bytes.is_empty() {
            return Err(ParseError::new("empty payload"));
        }

        let document = gltf::Gltf::from_slice(bytes).map_err(|e| ParseError::new(e.to_string()))?;
        let summary = AssetSummary {
            byte_len: bytes.len(),
            scenes: document.scenes().count(),
            nodes: document.nodes().count(),
            meshes: document.meshes().count(),
            materials: document.materials().count(),
        };

        tracing::debug!(url = %source, ?summary, "parsed glTF asset");
        Ok(SceneNode::new(source.clone(), summary))
    }
}

// ============================================================================
// ERRORS
// ============================================================================

/// The payload is not a valid asset.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ParseError(pub String);

impl ParseError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Scene graph operation failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SceneError {
    #[error("Anchor creation failed: {0}")]
    AnchorFailed(String),

    #[error("Attach failed: {0}")]
    AttachFailed(String),

    #[error("Unknown scene node: {0}")]
    UnknownNode(SceneNodeId),
}

/// AR runtime operation failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    #[error("Invalid reference image: {0}")]
    InvalidImage(String),

    #[error("Runtime rejected configuration: {0}")]
    Rejected(String),
}

#[cfg(all(test, feature = "gltf"))]
mod tests {
    use super::*;

    fn source() -> Url {
        Url::parse("https://assets.example.com/chair.glb").unwrap()
    }

    fn glb_with_json(json: &str) -> Vec<u8> {
        let mut chunk = json.as_bytes().to_vec();
        while chunk.len() % 4 != 0 {
            chunk.push(b' ');
        }
        let total = 12 + 8 + chunk.len();

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(b"glTF");
        out.extend_from_slice(&2u32.to_le_bytes());
        out.extend_from_slice(&(total as u32).to_le_bytes());
        out.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
        out.extend_from_slice(b"JSON");
        out.extend_from_slice(&chunk);
        out
    }

    #[test]
    fn test_parses_json_gltf() {
        let json = r#"{"asset":{"version":"2.0"},"scenes":[{"nodes":[0]}],"nodes":[{"name":"root"}]}"#;
        let node = GltfParser.parse(&source(), json.as_bytes()).unwrap();
        assert_eq!(node.summary().scenes, 1);
        assert_eq!(node.summary().nodes, 1);
        assert_eq!(node.summary().byte_len, json.len());
        assert_eq!(node.source(), &source());
    }

    #[test]
    fn test_parses_binary_glb() {
        let bytes = glb_with_json(r#"{"asset":{"version":"2.0"}}"#);
        let node = GltfParser.parse(&source(), &bytes).unwrap();
        assert_eq!(node.summary().nodes, 0);
        assert_eq!(node.summary().byte_len, bytes.len());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(GltfParser.parse(&source(), b"<html>404</html>").is_err());
        assert_eq!(GltfParser.parse(&source(), b"").unwrap_err(), ParseError::new("empty payload"));
    }
}
