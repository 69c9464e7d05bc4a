//! In-memory geometry kernel
//!
//! [`MemoryKernel`] serves documents that were assembled in memory with
//! [`MemoryDocument`]. Documents are registered under a source path; reading
//! any other path fails the way a real kernel fails on an unreadable file.
//!
//! Shapes can be scripted to fail or panic during tessellation and labels
//! can be scripted to fail their queries, which makes the kernel useful for
//! exercising every recovery path of the traversal.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{GeometryKernel, ShapeKind};
use crate::error::KernelError;
use crate::model::{MeshBuffer, Triangle, Vertex};

static NEXT_SHAPE_ID: AtomicUsize = AtomicUsize::new(1);

#[derive(Debug, Clone, PartialEq)]
enum Tessellation {
    Mesh(Arc<MeshBuffer>),
    Fail(String),
    Panic,
}

/// Geometry handle of the in-memory kernel
///
/// Clones share an identity: a clone placed inside a compound is recognized
/// as the same geometry as the labelled original.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryShape {
    id: usize,
    kind: ShapeKind,
    sub_shapes: Vec<MemoryShape>,
    tessellation: Tessellation,
}

impl MemoryShape {
    fn with(kind: ShapeKind, sub_shapes: Vec<MemoryShape>, tessellation: Tessellation) -> Self {
        Self {
            id: NEXT_SHAPE_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            sub_shapes,
            tessellation,
        }
    }

    /// A solid that tessellates to `mesh`
    pub fn solid(mesh: MeshBuffer) -> Self {
        Self::with(ShapeKind::Solid, Vec::new(), Tessellation::Mesh(Arc::new(mesh)))
    }

    /// An axis-aligned box solid with one corner at `origin`
    pub fn cuboid(origin: [f64; 3], size: [f64; 3]) -> Self {
        Self::solid(cuboid_mesh(origin, size))
    }

    /// A solid whose tessellation returns an error
    pub fn failing(reason: impl Into<String>) -> Self {
        Self::with(ShapeKind::Solid, Vec::new(), Tessellation::Fail(reason.into()))
    }

    /// A solid whose tessellation panics inside the kernel
    pub fn crashing() -> Self {
        Self::with(ShapeKind::Solid, Vec::new(), Tessellation::Panic)
    }

    /// A solid that tessellates to nothing
    pub fn empty() -> Self {
        Self::solid(MeshBuffer::new())
    }

    /// A compound of `sub_shapes`; tessellates to their merged meshes
    pub fn compound(sub_shapes: Vec<MemoryShape>) -> Self {
        Self::with(
            ShapeKind::Compound,
            sub_shapes,
            Tessellation::Mesh(Arc::new(MeshBuffer::new())),
        )
    }

    /// Same geometry reported under another topological type
    pub fn as_kind(mut self, kind: ShapeKind) -> Self {
        self.kind = kind;
        self
    }

    fn tessellate(&self) -> Result<MeshBuffer, KernelError> {
        match &self.tessellation {
            Tessellation::Fail(reason) => Err(KernelError::Tessellation(reason.clone())),
            Tessellation::Panic => panic!("memory kernel: scripted tessellation crash"),
            Tessellation::Mesh(mesh) if self.sub_shapes.is_empty() => Ok(mesh.as_ref().clone()),
            Tessellation::Mesh(_) => {
                let mut merged = MeshBuffer::new();
                for sub in &self.sub_shapes {
                    let part = sub.tessellate()?;
                    let offset = merged.points.len() as u32;
                    merged.points.extend_from_slice(&part.points);
                    merged.triangles.extend(part.triangles.iter().map(|t| {
                        Triangle::new(t.v1 + offset, t.v2 + offset, t.v3 + offset)
                    }));
                }
                Ok(merged)
            }
        }
    }
}

/// Twelve-triangle box mesh
pub fn cuboid_mesh(origin: [f64; 3], size: [f64; 3]) -> MeshBuffer {
    let [x0, y0, z0] = origin;
    let [x1, y1, z1] = [x0 + size[0], y0 + size[1], z0 + size[2]];
    let points = vec![
        Vertex::new(x0, y0, z0),
        Vertex::new(x1, y0, z0),
        Vertex::new(x1, y1, z0),
        Vertex::new(x0, y1, z0),
        Vertex::new(x0, y0, z1),
        Vertex::new(x1, y0, z1),
        Vertex::new(x1, y1, z1),
        Vertex::new(x0, y1, z1),
    ];
    let faces: [[u32; 3]; 12] = [
        [0, 2, 1],
        [0, 3, 2],
        [4, 5, 6],
        [4, 6, 7],
        [0, 1, 5],
        [0, 5, 4],
        [1, 2, 6],
        [1, 6, 5],
        [2, 3, 7],
        [2, 7, 6],
        [3, 0, 4],
        [3, 4, 7],
    ];
    MeshBuffer {
        points,
        triangles: faces
            .iter()
            .map(|f| Triangle::new(f[0], f[1], f[2]))
            .collect(),
    }
}

/// Scripted failure of a label's queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelFault {
    /// `components` returns an error
    QueryError,
    /// Every query on the label panics
    Panic,
}

#[derive(Debug, Clone, Default)]
struct LabelData {
    name: Option<String>,
    entry: String,
    assembly_flag: bool,
    components: Vec<usize>,
    referred: Option<usize>,
    shape: Option<MemoryShape>,
    fault: Option<LabelFault>,
}

/// Label handle of the in-memory kernel
pub type MemoryLabel = usize;

/// A labelled assembly held in memory
///
/// ```
/// use cadscene::kernel::{MemoryDocument, MemoryShape};
///
/// let mut doc = MemoryDocument::new();
/// let bracket = doc.add_part("Bracket", MemoryShape::cuboid([0.0; 3], [1.0; 3]));
/// let frame = doc.add_assembly("Frame");
/// doc.add_component(frame, bracket);
/// doc.mark_free(frame);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryDocument {
    labels: Vec<LabelData>,
    free: Vec<usize>,
    transfer_error: Option<String>,
    free_shapes_panic: bool,
}

impl MemoryDocument {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, data: LabelData) -> MemoryLabel {
        let id = self.labels.len();
        self.labels.push(LabelData {
            entry: format!("0:1:1:{}", id + 1),
            ..data
        });
        id
    }

    /// Add a named label carrying geometry
    pub fn add_part(&mut self, name: &str, shape: MemoryShape) -> MemoryLabel {
        self.push(LabelData {
            name: Some(name.to_string()),
            shape: Some(shape),
            ..LabelData::default()
        })
    }

    /// Add a named label the kernel flags as an assembly
    pub fn add_assembly(&mut self, name: &str) -> MemoryLabel {
        self.push(LabelData {
            name: Some(name.to_string()),
            assembly_flag: true,
            ..LabelData::default()
        })
    }

    /// Add an unnamed label, optionally carrying geometry
    pub fn add_unnamed(&mut self, shape: Option<MemoryShape>) -> MemoryLabel {
        self.push(LabelData {
            shape,
            ..LabelData::default()
        })
    }

    /// Add a component instance under `parent` referring to `referred`
    ///
    /// The instance itself is unnamed; the traversal takes the name of the
    /// referred label.
    pub fn add_component(&mut self, parent: MemoryLabel, referred: MemoryLabel) -> MemoryLabel {
        let instance = self.push(LabelData {
            referred: Some(referred),
            ..LabelData::default()
        });
        if let Some(p) = self.labels.get_mut(parent) {
            p.components.push(instance);
        }
        instance
    }

    /// Make `label` a top-level free shape
    pub fn mark_free(&mut self, label: MemoryLabel) {
        self.free.push(label);
    }

    /// Override the name of a label
    pub fn set_name(&mut self, label: MemoryLabel, name: Option<&str>) {
        if let Some(l) = self.labels.get_mut(label) {
            l.name = name.map(str::to_string);
        }
    }

    /// Override the kernel's assembly flag
    pub fn set_assembly_flag(&mut self, label: MemoryLabel, flag: bool) {
        if let Some(l) = self.labels.get_mut(label) {
            l.assembly_flag = flag;
        }
    }

    /// Attach geometry to an existing label
    pub fn set_shape(&mut self, label: MemoryLabel, shape: MemoryShape) {
        if let Some(l) = self.labels.get_mut(label) {
            l.shape = Some(shape);
        }
    }

    /// Make queries on `label` fail
    pub fn break_label(&mut self, label: MemoryLabel, fault: LabelFault) {
        if let Some(l) = self.labels.get_mut(label) {
            l.fault = Some(fault);
        }
    }

    /// Make the transfer step fail for this document
    pub fn fail_transfer(&mut self, reason: impl Into<String>) {
        self.transfer_error = Some(reason.into());
    }

    /// Make free-shape enumeration panic inside the kernel
    pub fn crash_free_shapes(&mut self) {
        self.free_shapes_panic = true;
    }

    fn label(&self, label: MemoryLabel) -> Result<&LabelData, KernelError> {
        let data = self
            .labels
            .get(label)
            .ok_or_else(|| KernelError::Query(format!("unknown label {}", label)))?;
        if data.fault == Some(LabelFault::Panic) {
            panic!("memory kernel: scripted crash on label {}", data.entry);
        }
        Ok(data)
    }
}

/// Kernel serving [`MemoryDocument`]s registered by source path
///
/// Every trait call is counted, so callers can prove a cache hit never
/// touched the kernel.
#[derive(Debug)]
pub struct MemoryKernel {
    documents: Mutex<HashMap<PathBuf, Arc<MemoryDocument>>>,
    available: bool,
    calls: AtomicUsize,
}

impl MemoryKernel {
    /// Create an available kernel with no documents
    pub fn new() -> Self {
        Self {
            documents: Mutex::new(HashMap::new()),
            available: true,
            calls: AtomicUsize::new(0),
        }
    }

    /// Create a kernel that reports itself unavailable
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Serve `document` when `path` is read
    pub fn insert(&self, path: impl Into<PathBuf>, document: MemoryDocument) {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), Arc::new(document));
    }

    /// Number of trait calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for MemoryKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometryKernel for MemoryKernel {
    type Container = Arc<MemoryDocument>;
    type Document = Arc<MemoryDocument>;
    type Label = MemoryLabel;
    type Shape = MemoryShape;

    fn is_available(&self) -> bool {
        self.tick();
        self.available
    }

    fn read(&self, path: &Path) -> Result<Self::Container, KernelError> {
        self.tick();
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
            .ok_or_else(|| KernelError::Read(format!("cannot parse {}", path.display())))
    }

    fn transfer(&self, container: Self::Container) -> Result<Self::Document, KernelError> {
        self.tick();
        match &container.transfer_error {
            Some(reason) => Err(KernelError::Transfer(reason.clone())),
            None => Ok(container),
        }
    }

    fn free_shape_labels(&self, doc: &Self::Document) -> Vec<Self::Label> {
        self.tick();
        if doc.free_shapes_panic {
            panic!("memory kernel: scripted crash enumerating free shapes");
        }
        doc.free.clone()
    }

    fn label_name(&self, doc: &Self::Document, label: &Self::Label) -> Option<String> {
        self.tick();
        doc.label(*label).ok()?.name.clone()
    }

    fn label_entry(&self, doc: &Self::Document, label: &Self::Label) -> String {
        self.tick();
        doc.labels
            .get(*label)
            .map(|l| l.entry.clone())
            .unwrap_or_default()
    }

    fn is_assembly(&self, doc: &Self::Document, label: &Self::Label) -> bool {
        self.tick();
        doc.label(*label).map(|l| l.assembly_flag).unwrap_or(false)
    }

    fn components(
        &self,
        doc: &Self::Document,
        label: &Self::Label,
    ) -> Result<Vec<Self::Label>, KernelError> {
        self.tick();
        let data = doc.label(*label)?;
        if data.fault == Some(LabelFault::QueryError) {
            return Err(KernelError::Query(format!(
                "component enumeration failed on {}",
                data.entry
            )));
        }
        Ok(data.components.clone())
    }

    fn resolve_referred(&self, doc: &Self::Document, label: &Self::Label) -> Option<Self::Label> {
        self.tick();
        doc.label(*label).ok()?.referred
    }

    fn shape_for(&self, doc: &Self::Document, label: &Self::Label) -> Option<Self::Shape> {
        self.tick();
        doc.label(*label).ok()?.shape.clone()
    }

    fn shape_kind(&self, shape: &Self::Shape) -> ShapeKind {
        self.tick();
        shape.kind
    }

    fn sub_shapes(&self, shape: &Self::Shape) -> Vec<Self::Shape> {
        self.tick();
        shape.sub_shapes.clone()
    }

    fn shape_labels(&self, doc: &Self::Document) -> Vec<Self::Label> {
        self.tick();
        doc.labels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.shape.is_some() && l.fault.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    fn same_shape(&self, a: &Self::Shape, b: &Self::Shape) -> bool {
        self.tick();
        a.id == b.id
    }

    fn tessellate(&self, shape: &Self::Shape, _max_deviation: f64) -> Result<MeshBuffer, KernelError> {
        self.tick();
        shape.tessellate()
    }
}
