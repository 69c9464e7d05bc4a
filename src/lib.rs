//! # cadscene
//!
//! Assembly extraction and scene caching for hierarchical CAD documents.
//!
//! This library turns a CAD document, read through a pluggable geometry
//! kernel, into a renderable scene: an assembly tree of named nodes plus one
//! triangle mesh per Part. Scenes are cached on disk keyed by the source
//! file's identity, so reopening an unchanged file never touches the kernel.
//!
//! ## Features
//!
//! - Pure Rust implementation with no unsafe code
//! - Kernel-agnostic traversal through the [`GeometryKernel`] trait
//! - Per-node failure isolation: one bad label or shape never aborts a load
//! - Structure-first on-disk cache with lazy, per-part mesh recovery
//! - Background load pipeline with progress, cancellation and
//!   non-blocking cache persistence
//! - Visibility and selection state for the renderer boundary
//!
//! ## Example
//!
//! ```no_run
//! use cadscene::kernel::MemoryKernel;
//! use cadscene::{LoadConfig, LoadMode, LoadPipeline, VisibilityModel};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = LoadPipeline::new(Arc::new(MemoryKernel::new()), LoadConfig::from_env());
//! let scene = pipeline.load_blocking("gearbox.step", LoadMode::CacheAware)?;
//!
//! println!("Scene contains {} nodes", scene.tree.len());
//! let view = VisibilityModel::new(scene.tree);
//! for id in view.visible_meshes() {
//!     let mesh = scene.meshes.get(&id);
//!     println!("{}: {} triangles", id, mesh.map_or(0, |m| m.triangles.len()));
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod config;
pub mod error;
pub mod kernel;
#[cfg(feature = "mesh-ops")]
pub mod mesh_ops;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod store;
pub mod traversal;
pub mod validator;
pub mod visibility;

pub use cache::{CacheEntry, CacheKey, CacheManager, CachedScene, SaveReport};
pub use config::LoadConfig;
pub use error::{CacheError, KernelError, LoadError, Result, TraversalError};
pub use kernel::{GeometryKernel, ShapeKind};
pub use model::{
    MeshBuffer, MeshId, ModelStats, NodeId, NodeKind, SceneNode, SceneTree, Triangle, Vertex,
};
pub use pipeline::{
    LoadEvent, LoadHandle, LoadMode, LoadPipeline, LoadState, LoadedScene, Progress,
    SceneOrigin, Stage,
};
pub use report::{Degradation, DegradationKind, LoadReport};
pub use store::MeshStore;
pub use traversal::{
    AssemblyTraversal, BuiltScene, CancelToken, Classifier, ClassifierRule, SkipRules,
};
pub use validator::validate_scene;
pub use visibility::VisibilityModel;
