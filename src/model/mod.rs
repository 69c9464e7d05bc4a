//! Data structures representing a loaded scene

mod mesh;
mod scene;

pub use mesh::{MeshBuffer, MeshId, MeshIdAllocator, Triangle, Vertex};
pub use scene::{DepthFirst, ModelStats, NodeId, NodeKind, SceneNode, SceneTree};
