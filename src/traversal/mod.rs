//! Assembly traversal
//!
//! Walks a kernel document into a [`SceneTree`] plus a [`MeshStore`]. The
//! walk runs in two phases:
//!
//! 1. **Walking**: an explicit worklist visits the free-shape labels and
//!    their components in document order. Each label is named, classified
//!    and attached to the tree; Parts with geometry are queued.
//! 2. **Tessellating**: queued Parts are triangulated one by one.
//!
//! Failures of a single label or shape never abort the walk. Every kernel
//! call runs inside an isolation wrapper that turns both errors and panics into a
//! recorded [`Degradation`](crate::report::Degradation).

mod classify;
mod skip;

pub use classify::{Classifier, ClassifierRule, DEFAULT_ASSEMBLY_PATTERNS, LabelFacts};
pub use skip::{SkipPredicate, SkipRules};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, error, info, warn};

use crate::config::{DEFAULT_MAX_DEPTH, DEFAULT_MAX_DEVIATION, DEFAULT_POLL_INTERVAL, LoadConfig};
use crate::error::{KernelError, TraversalError};
use crate::kernel::{GeometryKernel, ShapeKind};
use crate::model::{MeshIdAllocator, NodeId, NodeKind, SceneTree};
use crate::report::{DegradationKind, LoadReport};
use crate::store::MeshStore;

/// Shared cooperative cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Phase of a traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Visiting labels and building the tree
    Walking,
    /// Triangulating queued Parts
    Tessellating,
}

/// Progress report passed to the observer of [`AssemblyTraversal::build_with_progress`]
///
/// During walking `total` is the number of items known so far and grows as
/// assemblies are opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalProgress {
    /// Current phase
    pub phase: Phase,
    /// Items finished in this phase
    pub done: usize,
    /// Items known in this phase
    pub total: usize,
}

/// Result of a successful traversal
#[derive(Debug, Clone)]
pub struct BuiltScene {
    /// The scene hierarchy
    pub tree: SceneTree,
    /// Meshes of the Parts that tessellated
    pub meshes: MeshStore,
    /// Recovered failures
    pub report: LoadReport,
}

enum WorkItem<L, S> {
    Label {
        label: L,
        parent: NodeId,
        index: usize,
    },
    SubShape {
        shape: S,
        parent: NodeId,
        index: usize,
    },
}

struct LabelInfo<L, S> {
    name: String,
    kind: NodeKind,
    origin: L,
    components: Vec<L>,
    shape: Option<S>,
    sub_shapes: Vec<S>,
}

/// Builds a scene from a kernel document
///
/// # Example
///
/// ```
/// use cadscene::kernel::{GeometryKernel, MemoryDocument, MemoryKernel, MemoryShape};
/// use cadscene::AssemblyTraversal;
/// use std::path::Path;
///
/// let mut doc = MemoryDocument::new();
/// let plate = doc.add_part("Plate", MemoryShape::cuboid([0.0; 3], [4.0, 4.0, 0.5]));
/// doc.mark_free(plate);
///
/// let kernel = MemoryKernel::new();
/// kernel.insert("/models/plate.step", doc);
/// let document = kernel.open(Path::new("/models/plate.step")).unwrap();
///
/// let scene = AssemblyTraversal::new(&kernel)
///     .with_max_depth(10)
///     .build(&document, "plate")
///     .unwrap();
/// assert_eq!(scene.tree.len(), 2);
/// assert_eq!(scene.meshes.len(), 1);
/// ```
pub struct AssemblyTraversal<'k, K: GeometryKernel> {
    kernel: &'k K,
    skip_rules: SkipRules,
    classifier: Classifier,
    max_depth: usize,
    max_deviation: f64,
    poll_interval: usize,
    cancel: CancelToken,
}

impl<'k, K: GeometryKernel> AssemblyTraversal<'k, K> {
    /// Traversal with default limits and no skip rules
    pub fn new(kernel: &'k K) -> Self {
        Self {
            kernel,
            skip_rules: SkipRules::new(),
            classifier: Classifier::default(),
            max_depth: DEFAULT_MAX_DEPTH,
            max_deviation: DEFAULT_MAX_DEVIATION,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: CancelToken::new(),
        }
    }

    /// Take limits, rules and classifier from a load configuration
    pub fn with_config(self, config: &LoadConfig) -> Self {
        self.with_skip_rules(config.skip_rules().clone())
            .with_classifier(config.classifier().clone())
            .with_max_depth(config.max_depth())
            .with_max_deviation(config.max_deviation())
            .with_poll_interval(config.poll_interval())
    }

    /// Positions to skip unconditionally
    pub fn with_skip_rules(mut self, skip_rules: SkipRules) -> Self {
        self.skip_rules = skip_rules;
        self
    }

    /// Assembly/Part classification rules
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Deepest level a node may occupy
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Tessellation deviation
    pub fn with_max_deviation(mut self, max_deviation: f64) -> Self {
        self.max_deviation = max_deviation;
        self
    }

    /// Work items between cancellation polls
    pub fn with_poll_interval(mut self, poll_interval: usize) -> Self {
        self.poll_interval = poll_interval.max(1);
        self
    }

    /// Token observed between items
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the scene for `doc` under a root named `root_name`
    pub fn build(&self, doc: &K::Document, root_name: &str) -> Result<BuiltScene, TraversalError> {
        self.build_with_progress(doc, root_name, |_| {})
    }

    /// Build the scene, reporting progress after every item
    pub fn build_with_progress<F>(
        &self,
        doc: &K::Document,
        root_name: &str,
        mut progress: F,
    ) -> Result<BuiltScene, TraversalError>
    where
        F: FnMut(TraversalProgress),
    {
        if !isolate(|| Ok(self.kernel.is_available())).unwrap_or(false) {
            return Err(TraversalError::KernelUnavailable);
        }
        let free = isolate(|| Ok(self.kernel.free_shape_labels(doc))).map_err(|msg| {
            error!("Could not enumerate free shapes: {}", msg);
            TraversalError::Extraction(msg)
        })?;
        if free.is_empty() {
            return Err(TraversalError::EmptyDocument);
        }
        info!(
            "Traversing '{}': {} free shape(s), max depth {}",
            root_name,
            free.len(),
            self.max_depth
        );

        let mut walk = Walk {
            tree: SceneTree::new(root_name),
            origins: vec![None],
            jobs: Vec::new(),
            report: LoadReport::new(),
            named_shapes: None,
        };
        let root = walk.tree.root();
        let mut stack: Vec<WorkItem<K::Label, K::Shape>> = free
            .into_iter()
            .enumerate()
            .rev()
            .map(|(index, label)| WorkItem::Label {
                label,
                parent: root,
                index,
            })
            .collect();

        let mut processed = 0usize;
        let mut known = stack.len();
        while let Some(item) = stack.pop() {
            let top_level = matches!(&item, WorkItem::Label { parent, .. } | WorkItem::SubShape { parent, .. } if *parent == root);
            if (top_level || processed % self.poll_interval == 0) && self.cancel.is_cancelled() {
                info!("Traversal of '{}' cancelled after {} item(s)", root_name, processed);
                return Err(TraversalError::Cancelled);
            }
            let pushed = match item {
                WorkItem::Label {
                    label,
                    parent,
                    index,
                } => self.visit_label(doc, &mut walk, &mut stack, label, parent, index),
                WorkItem::SubShape {
                    shape,
                    parent,
                    index,
                } => self.visit_sub_shape(doc, &mut walk, &mut stack, shape, parent, index),
            };
            processed += 1;
            known += pushed;
            progress(TraversalProgress {
                phase: Phase::Walking,
                done: processed,
                total: known,
            });
        }
        debug!(
            "Walk finished: {} node(s), {} part(s) queued for tessellation",
            walk.tree.len(),
            walk.jobs.len()
        );

        let Walk {
            mut tree,
            jobs,
            mut report,
            ..
        } = walk;
        let mut meshes = MeshStore::new();
        let mut ids = MeshIdAllocator::new();
        let total = jobs.len();
        for (done, (node, shape)) in jobs.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                info!("Tessellation of '{}' cancelled at {}/{}", root_name, done, total);
                return Err(TraversalError::Cancelled);
            }
            progress(TraversalProgress {
                phase: Phase::Tessellating,
                done,
                total,
            });
            let name = tree[node].name.clone();
            match isolate(|| self.kernel.tessellate(&shape, self.max_deviation)) {
                Ok(mesh) if mesh.is_empty() => {
                    warn!("Tessellation of '{}' produced no triangles", name);
                    report.push(DegradationKind::TessellationFailure, Some(node), format!("{}: empty mesh", name));
                }
                Ok(mesh) => {
                    if let Some(bad) = mesh.first_out_of_range() {
                        warn!("Tessellation of '{}' has out-of-range triangle {}", name, bad);
                        report.push(
                            DegradationKind::TessellationFailure,
                            Some(node),
                            format!("{}: triangle {} indexes past the point list", name, bad),
                        );
                        continue;
                    }
                    let id = ids.allocate(&name);
                    meshes.put(id.clone(), mesh);
                    if let Some(n) = tree.get_mut(node) {
                        n.mesh_ref = Some(id);
                    }
                }
                Err(msg) => {
                    warn!("Tessellation of '{}' failed: {}", name, msg);
                    report.push(DegradationKind::TessellationFailure, Some(node), format!("{}: {}", name, msg));
                }
            }
        }
        progress(TraversalProgress {
            phase: Phase::Tessellating,
            done: total,
            total,
        });

        info!(
            "Built '{}': {} node(s), {} mesh(es), {} degradation(s)",
            root_name,
            tree.len(),
            meshes.len(),
            report.entries().len()
        );
        Ok(BuiltScene {
            tree,
            meshes,
            report,
        })
    }

    /// Level and skip checks shared by both item kinds
    fn admit(&self, walk: &mut Walk<K>, parent: NodeId, index: usize, what: &dyn Fn() -> String) -> bool {
        let level = walk.tree[parent].level() + 1;
        if self.skip_rules.should_skip(level, index) {
            warn!("Skipping {} at level {}, index {} by rule", what(), level, index);
            walk.report.push(
                DegradationKind::SkippedByRule,
                None,
                format!("{} at level {}, index {}", what(), level, index),
            );
            return false;
        }
        if level > self.max_depth {
            warn!(
                "Depth limit {} reached under '{}'; {} dropped",
                self.max_depth,
                walk.tree[parent].name,
                what()
            );
            walk.report.push(
                DegradationKind::MaxDepthExceeded,
                Some(parent),
                format!("{} at level {}", what(), level),
            );
            return false;
        }
        true
    }

    fn visit_label(
        &self,
        doc: &K::Document,
        walk: &mut Walk<K>,
        stack: &mut Vec<WorkItem<K::Label, K::Shape>>,
        label: K::Label,
        parent: NodeId,
        index: usize,
    ) -> usize {
        if !self.admit(walk, parent, index, &|| format!("label {:?}", label)) {
            return 0;
        }
        let info = match isolate(|| self.inspect(doc, &label)) {
            Ok(info) => info,
            Err(msg) => {
                warn!("Dropping label {:?}: {}", label, msg);
                walk.report.push(
                    DegradationKind::PerNodeFailure,
                    None,
                    format!("label {:?}: {}", label, msg),
                );
                return 0;
            }
        };
        if walk.on_path(parent, &info.origin) {
            warn!("Label {:?} ('{}') is its own ancestor; not revisiting", info.origin, info.name);
            walk.report.push(
                DegradationKind::CycleBroken,
                Some(parent),
                format!("{} ({:?})", info.name, info.origin),
            );
            return 0;
        }

        let node = walk.tree.add_child(parent, info.name, info.kind);
        walk.origins.push(Some(info.origin));
        match info.kind {
            NodeKind::Assembly if !info.components.is_empty() => {
                let n = info.components.len();
                stack.extend(
                    info.components
                        .into_iter()
                        .enumerate()
                        .rev()
                        .map(|(index, label)| WorkItem::Label {
                            label,
                            parent: node,
                            index,
                        }),
                );
                n
            }
            NodeKind::Assembly if info.sub_shapes.len() > 1 => {
                debug!(
                    "Decomposing compound of '{}' into {} sub-shapes",
                    walk.tree[node].name,
                    info.sub_shapes.len()
                );
                let n = info.sub_shapes.len();
                push_sub_shapes(stack, info.sub_shapes, node);
                n
            }
            NodeKind::Assembly => {
                if let Some(shape) = info.shape {
                    debug!("'{}' has no components; keeping it as a Part", walk.tree[node].name);
                    if let Some(n) = walk.tree.get_mut(node) {
                        n.kind = NodeKind::Part;
                    }
                    walk.jobs.push((node, shape));
                }
                0
            }
            NodeKind::Part => {
                if let Some(shape) = info.shape {
                    walk.jobs.push((node, shape));
                }
                0
            }
        }
    }

    fn visit_sub_shape(
        &self,
        doc: &K::Document,
        walk: &mut Walk<K>,
        stack: &mut Vec<WorkItem<K::Label, K::Shape>>,
        shape: K::Shape,
        parent: NodeId,
        index: usize,
    ) -> usize {
        if !self.admit(walk, parent, index, &|| format!("sub-shape {}", index + 1)) {
            return 0;
        }
        if walk.named_shapes.is_none() {
            let named = isolate(|| Ok(self.named_shapes(doc))).unwrap_or_default();
            walk.named_shapes = Some(named);
        }
        let named = walk.named_shapes.as_deref().unwrap_or_default();
        let inspected = isolate(|| {
            let kind = self.kernel.shape_kind(&shape);
            let subs = if kind == ShapeKind::Compound {
                self.kernel.sub_shapes(&shape)
            } else {
                Vec::new()
            };
            let name = named
                .iter()
                .find(|(_, candidate)| self.kernel.same_shape(candidate, &shape))
                .map(|(name, _)| name.clone())
                .unwrap_or_else(|| format!("{}_{}", kind.synthetic_prefix(), index + 1));
            Ok((kind, subs, name))
        });
        let (kind, subs, name) = match inspected {
            Ok(v) => v,
            Err(msg) => {
                warn!("Dropping sub-shape {} of '{}': {}", index + 1, walk.tree[parent].name, msg);
                walk.report.push(
                    DegradationKind::PerNodeFailure,
                    None,
                    format!("sub-shape {} of {}: {}", index + 1, walk.tree[parent].name, msg),
                );
                return 0;
            }
        };

        if kind == ShapeKind::Compound && !subs.is_empty() {
            let node = walk.tree.add_child(parent, name, NodeKind::Assembly);
            walk.origins.push(None);
            let n = subs.len();
            push_sub_shapes(stack, subs, node);
            n
        } else {
            let node = walk.tree.add_child(parent, name, NodeKind::Part);
            walk.origins.push(None);
            walk.jobs.push((node, shape));
            0
        }
    }

    /// Gather everything needed to place one label in the tree
    fn inspect(&self, doc: &K::Document, label: &K::Label) -> Result<LabelInfo<K::Label, K::Shape>, KernelError> {
        let kernel = self.kernel;
        let referred = kernel.resolve_referred(doc, label);
        let origin = referred.clone().unwrap_or_else(|| label.clone());
        let name = kernel
            .label_name(doc, label)
            .or_else(|| referred.as_ref().and_then(|r| kernel.label_name(doc, r)))
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("Component_{}", kernel.label_entry(doc, label)));

        let kernel_flag = kernel.is_assembly(doc, &origin);
        let components = kernel.components(doc, &origin)?;
        let shape = kernel.shape_for(doc, &origin);
        let sub_shapes = match &shape {
            Some(s) if kernel.shape_kind(s) == ShapeKind::Compound => kernel.sub_shapes(s),
            _ => Vec::new(),
        };
        let facts = LabelFacts {
            kernel_flag,
            component_count: components.len(),
            name: &name,
            compound_children: shape.as_ref().map(|_| sub_shapes.len()).filter(|n| *n > 0),
        };
        let kind = self.classifier.classify(&facts);
        Ok(LabelInfo {
            name,
            kind,
            origin,
            components,
            shape,
            sub_shapes,
        })
    }

    /// Named labels with geometry, for matching decomposed sub-shapes
    fn named_shapes(&self, doc: &K::Document) -> Vec<(String, K::Shape)> {
        self.kernel
            .shape_labels(doc)
            .iter()
            .filter_map(|label| {
                let name = self.kernel.label_name(doc, label)?;
                let shape = self.kernel.shape_for(doc, label)?;
                Some((name, shape))
            })
            .collect()
    }
}

struct Walk<K: GeometryKernel> {
    tree: SceneTree,
    /// Kernel label each node came from, indexed like the tree arena
    origins: Vec<Option<K::Label>>,
    jobs: Vec<(NodeId, K::Shape)>,
    report: LoadReport,
    named_shapes: Option<Vec<(String, K::Shape)>>,
}

impl<K: GeometryKernel> Walk<K> {
    /// Whether `label` is `start` or one of its ancestors
    fn on_path(&self, start: NodeId, label: &K::Label) -> bool {
        let mut current = Some(start);
        while let Some(id) = current {
            if self.origins.get(id.index()).and_then(|o| o.as_ref()) == Some(label) {
                return true;
            }
            current = self.tree[id].parent();
        }
        false
    }
}

fn push_sub_shapes<L, S>(stack: &mut Vec<WorkItem<L, S>>, shapes: Vec<S>, parent: NodeId) {
    stack.extend(
        shapes
            .into_iter()
            .enumerate()
            .rev()
            .map(|(index, shape)| WorkItem::SubShape {
                shape,
                parent,
                index,
            }),
    );
}

/// Run one kernel interaction, turning errors and panics into a message
pub(crate) fn isolate<T>(f: impl FnOnce() -> Result<T, KernelError>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(payload) => Err(format!("kernel panicked: {}", panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
