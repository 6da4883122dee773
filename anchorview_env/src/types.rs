//! Common identifier types shared between the pipeline and its adapters.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a node living in the host's scene graph.
///
/// Uses UUID v4 so adapters can mint ids without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SceneNodeId(pub Uuid);

impl SceneNodeId {
    /// Creates a new random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a deterministic id from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        Self(uuid_from_seed(seed))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SceneNodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SceneNodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Identifier of a world anchor created by the AR runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorId(pub Uuid);

impl AnchorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_seed(seed: u64) -> Self {
        Self(uuid_from_seed(seed))
    }
}

impl Default for AnchorId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AnchorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

fn uuid_from_seed(seed: u64) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[0..8].copy_from_slice(&seed.to_le_bytes());
    bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
    Uuid::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_ids_are_deterministic() {
        assert_eq!(SceneNodeId::from_seed(7), SceneNodeId::from_seed(7));
        assert_ne!(SceneNodeId::from_seed(7), SceneNodeId::from_seed(8));
        assert_eq!(AnchorId::from_seed(3).0, SceneNodeId::from_seed(3).0);
    }

    #[test]
    fn test_display_is_short() {
        let id = SceneNodeId::from_seed(1);
        assert_eq!(id.to_string().len(), 8);
    }
}
