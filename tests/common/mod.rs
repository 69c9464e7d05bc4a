//! Shared fixtures for integration tests
//!
//! Every fixture that goes through the pipeline writes a real source file
//! into a temporary directory, because the pipeline checks that the source
//! exists and the cache keys on its modification time.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

use cadscene::kernel::{GeometryKernel, MemoryDocument, MemoryKernel, MemoryLabel, MemoryShape};
use cadscene::{KernelError, LoadConfig, MeshBuffer, ShapeKind};
use tempfile::TempDir;

/// Route library logs through the test harness; `RUST_LOG=debug` to see them
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// One Assembly holding three Parts; the second Part cannot be tessellated
pub fn bracket_assembly() -> MemoryDocument {
    let mut doc = MemoryDocument::new();
    let base = doc.add_part("Base", MemoryShape::cuboid([0.0, 0.0, 0.0], [10.0, 10.0, 1.0]));
    let rib = doc.add_part("Rib", MemoryShape::failing("open shell"));
    let arm = doc.add_part("Arm", MemoryShape::cuboid([0.0, 0.0, 1.0], [1.0, 10.0, 8.0]));
    let bracket = doc.add_assembly("Bracket");
    doc.add_component(bracket, base);
    doc.add_component(bracket, rib);
    doc.add_component(bracket, arm);
    doc.mark_free(bracket);
    doc
}

/// Two levels of assemblies with a compound part that must be decomposed
pub fn gearbox() -> MemoryDocument {
    let mut doc = MemoryDocument::new();
    let gear = MemoryShape::cuboid([0.0, 0.0, 0.0], [2.0, 2.0, 0.5]);
    let gear_label = doc.add_part("Gear", gear.clone());
    let pinion = MemoryShape::cuboid([3.0, 0.0, 0.0], [1.0, 1.0, 0.5]);
    let drive = doc.add_part("Drive Train", MemoryShape::compound(vec![gear, pinion]));
    let shaft = doc.add_part("Shaft", MemoryShape::cuboid([0.0, 0.0, -2.0], [0.2, 0.2, 4.0]));
    let housing = doc.add_part("Housing", MemoryShape::cuboid([-1.0, -1.0, -3.0], [6.0, 4.0, 6.0]));

    let inner = doc.add_assembly("Gear Stage");
    doc.add_component(inner, drive);
    doc.add_component(inner, shaft);
    let outer = doc.add_assembly("Gearbox");
    doc.add_component(outer, inner);
    doc.add_component(outer, housing);
    doc.mark_free(outer);
    // Only reachable through the compound; still used to name its sub-shape
    let _ = gear_label;
    doc
}

/// A source file registered with a kernel, plus a cache directory
pub struct Workspace {
    pub dir: TempDir,
    pub source: PathBuf,
    pub cache_dir: PathBuf,
}

impl Workspace {
    /// Write a placeholder source file named `file_name` and register `doc` for it
    pub fn new(kernel: &MemoryKernel, file_name: &str, doc: MemoryDocument) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join(file_name);
        fs::write(&source, b"ISO-10303-21;\nEND-ISO-10303-21;\n").unwrap();
        kernel.insert(&source, doc);
        let cache_dir = dir.path().join("cache");
        Self {
            dir,
            source,
            cache_dir,
        }
    }

    /// Pipeline configuration caching inside this workspace
    pub fn config(&self) -> LoadConfig {
        LoadConfig::new().with_cache_dir(&self.cache_dir)
    }

    /// Structure files currently in the cache directory
    pub fn structure_files(&self) -> Vec<PathBuf> {
        list_with_extension(&self.cache_dir, "xml")
    }

    /// Mesh files currently in the cache directory
    pub fn mesh_files(&self) -> Vec<PathBuf> {
        list_with_extension(&self.cache_dir, "mesh")
    }
}

fn list_with_extension(dir: &Path, ext: &str) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|e| e == ext))
        .collect();
    files.sort();
    files
}

/// Kernel that blocks inside its first `free_shape_labels` call
///
/// The test learns through `entered` that the worker is inside the kernel,
/// then unblocks it by sending on the release channel.
pub struct PausingKernel {
    pub inner: MemoryKernel,
    entered: Mutex<Option<Sender<()>>>,
    release: Mutex<Receiver<()>>,
}

/// Test-side controls of a [`PausingKernel`]
pub struct PauseControl {
    pub entered: Receiver<()>,
    pub release: Sender<()>,
}

impl PausingKernel {
    pub fn new() -> (Arc<Self>, PauseControl) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let kernel = Arc::new(Self {
            inner: MemoryKernel::new(),
            entered: Mutex::new(Some(entered_tx)),
            release: Mutex::new(release_rx),
        });
        (
            kernel,
            PauseControl {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }
}

impl GeometryKernel for PausingKernel {
    type Container = <MemoryKernel as GeometryKernel>::Container;
    type Document = <MemoryKernel as GeometryKernel>::Document;
    type Label = MemoryLabel;
    type Shape = MemoryShape;

    fn read(&self, path: &Path) -> Result<Self::Container, KernelError> {
        self.inner.read(path)
    }

    fn transfer(&self, container: Self::Container) -> Result<Self::Document, KernelError> {
        self.inner.transfer(container)
    }

    fn free_shape_labels(&self, doc: &Self::Document) -> Vec<Self::Label> {
        let entered = self
            .entered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(entered) = entered {
            let _ = entered.send(());
            let _ = self
                .release
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recv();
        }
        self.inner.free_shape_labels(doc)
    }

    fn label_name(&self, doc: &Self::Document, label: &Self::Label) -> Option<String> {
        self.inner.label_name(doc, label)
    }

    fn label_entry(&self, doc: &Self::Document, label: &Self::Label) -> String {
        self.inner.label_entry(doc, label)
    }

    fn is_assembly(&self, doc: &Self::Document, label: &Self::Label) -> bool {
        self.inner.is_assembly(doc, label)
    }

    fn components(&self, doc: &Self::Document, label: &Self::Label) -> Result<Vec<Self::Label>, KernelError> {
        self.inner.components(doc, label)
    }

    fn resolve_referred(&self, doc: &Self::Document, label: &Self::Label) -> Option<Self::Label> {
        self.inner.resolve_referred(doc, label)
    }

    fn shape_for(&self, doc: &Self::Document, label: &Self::Label) -> Option<Self::Shape> {
        self.inner.shape_for(doc, label)
    }

    fn shape_kind(&self, shape: &Self::Shape) -> ShapeKind {
        self.inner.shape_kind(shape)
    }

    fn sub_shapes(&self, shape: &Self::Shape) -> Vec<Self::Shape> {
        self.inner.sub_shapes(shape)
    }

    fn shape_labels(&self, doc: &Self::Document) -> Vec<Self::Label> {
        self.inner.shape_labels(doc)
    }

    fn same_shape(&self, a: &Self::Shape, b: &Self::Shape) -> bool {
        self.inner.same_shape(a, b)
    }

    fn tessellate(&self, shape: &Self::Shape, max_deviation: f64) -> Result<MeshBuffer, KernelError> {
        self.inner.tessellate(shape, max_deviation)
    }
}
