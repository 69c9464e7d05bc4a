//! Per-node visibility and highlight state
//!
//! [`VisibilityModel`] is the renderer boundary: it owns a loaded
//! [`SceneTree`] and answers [`visible_meshes`](VisibilityModel::visible_meshes),
//! which together with [`MeshStore::get`](crate::store::MeshStore::get) is everything a renderer needs.
//!
//! Visibility lives on the nodes. Highlighting is a separate, non-persistent
//! set that is never written to the cache.

use std::collections::HashSet;

use log::debug;

use crate::model::{MeshId, NodeId, NodeKind, SceneTree};
#[cfg(feature = "mesh-ops")]
use crate::store::MeshStore;

/// Visibility and selection state over a scene tree
#[derive(Debug, Clone)]
pub struct VisibilityModel {
    tree: SceneTree,
    highlighted: HashSet<NodeId>,
}

impl VisibilityModel {
    /// Wrap a loaded tree; visibility flags are taken as they are
    pub fn new(tree: SceneTree) -> Self {
        Self {
            tree,
            highlighted: HashSet::new(),
        }
    }

    /// The wrapped tree
    pub fn tree(&self) -> &SceneTree {
        &self.tree
    }

    /// Give the tree back, dropping the selection
    pub fn into_tree(self) -> SceneTree {
        self.tree
    }

    /// Set the visibility of `node`
    ///
    /// With `recursive`, every descendant's flag is overwritten with the same
    /// value. Unknown ids are ignored.
    pub fn set_visible(&mut self, node: NodeId, visible: bool, recursive: bool) {
        if self.tree.get(node).is_none() {
            return;
        }
        let targets: Vec<NodeId> = if recursive {
            self.tree.subtree(node).collect()
        } else {
            vec![node]
        };
        debug!(
            "Setting {} node(s) under '{}' {}",
            targets.len(),
            self.tree[node].name,
            if visible { "visible" } else { "hidden" }
        );
        for id in targets {
            if let Some(n) = self.tree.get_mut(id) {
                n.visible = visible;
            }
        }
    }

    /// Make `node` and all its ancestors visible
    pub fn reveal(&mut self, node: NodeId) {
        if self.tree.get(node).is_none() {
            return;
        }
        let mut chain = self.tree.ancestors(node);
        chain.push(node);
        for id in chain {
            if let Some(n) = self.tree.get_mut(id) {
                n.visible = true;
            }
        }
    }

    /// Whether `node` itself is flagged visible
    pub fn is_visible(&self, node: NodeId) -> bool {
        self.tree.get(node).is_some_and(|n| n.visible)
    }

    /// Mesh ids of visible Parts reachable through visible nodes, in document order
    pub fn visible_meshes(&self) -> Vec<MeshId> {
        let mut out = Vec::new();
        let mut stack = vec![self.tree.root()];
        while let Some(id) = stack.pop() {
            let node = &self.tree[id];
            if !node.visible {
                continue;
            }
            if node.kind == NodeKind::Part
                && let Some(mesh) = &node.mesh_ref
            {
                out.push(mesh.clone());
            }
            stack.extend(node.children().iter().rev().copied());
        }
        out
    }

    /// Highlight `node` and every descendant
    pub fn select(&mut self, node: NodeId) {
        if self.tree.get(node).is_none() {
            return;
        }
        self.highlighted.extend(self.tree.subtree(node));
    }

    /// Drop every highlight
    pub fn clear_selection(&mut self) {
        self.highlighted.clear();
    }

    /// Whether `node` is highlighted
    pub fn is_highlighted(&self, node: NodeId) -> bool {
        self.highlighted.contains(&node)
    }

    /// Highlighted nodes in document order
    pub fn highlighted(&self) -> Vec<NodeId> {
        self.tree
            .iter_depth_first()
            .filter(|id| self.highlighted.contains(id))
            .collect()
    }

    /// Bounding box of every visible mesh found in `store`
    ///
    /// Returns `None` when nothing with geometry is visible.
    #[cfg(feature = "mesh-ops")]
    pub fn visible_bounds(&self, store: &MeshStore) -> Option<crate::mesh_ops::BoundingBox> {
        self.visible_meshes()
            .iter()
            .filter_map(|id| store.get(id))
            .filter_map(crate::mesh_ops::compute_aabb)
            .reduce(crate::mesh_ops::merge_bounds)
    }
}

impl From<SceneTree> for VisibilityModel {
    fn from(tree: SceneTree) -> Self {
        Self::new(tree)
    }
}
