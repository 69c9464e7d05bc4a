//! Boundary to the CAD geometry kernel
//!
//! The crate never reads CAD containers or triangulates B-rep geometry
//! itself. A host plugs its kernel in by implementing [`GeometryKernel`];
//! the traversal only talks to the kernel through this trait, and renderers
//! never see any of its handles.
//!
//! [`MemoryKernel`] is an in-memory implementation for hosts that already
//! hold a decoded assembly, and for tests.

pub mod memory;

use std::fmt;
use std::path::Path;

use crate::error::KernelError;
use crate::model::MeshBuffer;

pub use memory::{LabelFault, MemoryDocument, MemoryKernel, MemoryLabel, MemoryShape, cuboid_mesh};

/// Topological type of a kernel shape, as far as decomposition cares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    /// Container of sub-shapes with no labels of their own
    Compound,
    /// Closed solid
    Solid,
    /// Shell
    Shell,
    /// Single face
    Face,
    /// Anything else (wires, edges, vertices, compsolids)
    Other,
}

impl ShapeKind {
    /// Prefix used when naming a decomposed sub-shape, e.g. `Solid_3`
    pub fn synthetic_prefix(&self) -> &'static str {
        match self {
            ShapeKind::Compound => "Compound",
            ShapeKind::Solid => "Solid",
            ShapeKind::Shell => "Shell",
            ShapeKind::Face => "Face",
            ShapeKind::Other => "Shape",
        }
    }
}

/// Operations the traversal needs from a CAD geometry kernel
///
/// A document is produced in two steps: [`read`](Self::read) parses the
/// container, [`transfer`](Self::transfer) extracts the labelled assembly
/// structure. The kernel is shared across the load worker and the caller,
/// so implementations must be `Send + Sync`; the document and its handles
/// only ever live on the worker thread.
///
/// Any query may panic inside a misbehaving kernel. The traversal isolates
/// every call, so a panic costs one node, not the load.
pub trait GeometryKernel: Send + Sync {
    /// Parsed but not yet transferred container
    type Container;
    /// Transferred document
    type Document;
    /// Handle identifying one node of the document hierarchy
    type Label: Clone + PartialEq + fmt::Debug;
    /// Handle to exact geometry
    type Shape: Clone;

    /// Whether the kernel can be used at all (license, native library present)
    fn is_available(&self) -> bool {
        true
    }

    /// Parse the container at `path`
    fn read(&self, path: &Path) -> Result<Self::Container, KernelError>;

    /// Extract the labelled document from a parsed container
    fn transfer(&self, container: Self::Container) -> Result<Self::Document, KernelError>;

    /// Read and transfer in one step
    fn open(&self, path: &Path) -> Result<Self::Document, KernelError> {
        let container = self.read(path)?;
        self.transfer(container)
    }

    /// Top-level labels not referenced by any other label, in document order
    fn free_shape_labels(&self, doc: &Self::Document) -> Vec<Self::Label>;

    /// Name attribute of a label, if it has one
    fn label_name(&self, doc: &Self::Document, label: &Self::Label) -> Option<String>;

    /// Stable textual entry of a label, such as `0:1:1:3`
    fn label_entry(&self, doc: &Self::Document, label: &Self::Label) -> String;

    /// Whether the kernel flags the label as an assembly
    fn is_assembly(&self, doc: &Self::Document, label: &Self::Label) -> bool;

    /// Component labels of an assembly, in document order
    fn components(
        &self,
        doc: &Self::Document,
        label: &Self::Label,
    ) -> Result<Vec<Self::Label>, KernelError>;

    /// Label that a component instance refers to
    fn resolve_referred(&self, doc: &Self::Document, label: &Self::Label) -> Option<Self::Label>;

    /// Geometry attached to a label
    fn shape_for(&self, doc: &Self::Document, label: &Self::Label) -> Option<Self::Shape>;

    /// Topological type of a shape
    fn shape_kind(&self, shape: &Self::Shape) -> ShapeKind;

    /// Direct sub-shapes of a compound, empty for other kinds
    fn sub_shapes(&self, shape: &Self::Shape) -> Vec<Self::Shape>;

    /// Every label carrying a shape, used to name decomposed sub-shapes
    fn shape_labels(&self, _doc: &Self::Document) -> Vec<Self::Label> {
        Vec::new()
    }

    /// Whether two handles denote the same geometry
    fn same_shape(&self, _a: &Self::Shape, _b: &Self::Shape) -> bool {
        false
    }

    /// Triangulate a shape within `max_deviation` model units
    fn tessellate(&self, shape: &Self::Shape, max_deviation: f64) -> Result<MeshBuffer, KernelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_prefixes() {
        assert_eq!(ShapeKind::Compound.synthetic_prefix(), "Compound");
        assert_eq!(ShapeKind::Solid.synthetic_prefix(), "Solid");
        assert_eq!(ShapeKind::Shell.synthetic_prefix(), "Shell");
        assert_eq!(ShapeKind::Face.synthetic_prefix(), "Face");
        assert_eq!(ShapeKind::Other.synthetic_prefix(), "Shape");
    }
}
