//! Arena-backed scene tree

use std::ops::Index;

use super::mesh::MeshId;

/// Stable index of a node inside a [`SceneTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in the arena
    pub fn index(self) -> usize {
        self.0
    }
}

/// Classification of a scene node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Groups other components; never carries a mesh itself
    Assembly,
    /// Leaf component; may carry tessellated geometry
    Part,
}

impl NodeKind {
    /// Lowercase name used in the cache structure file
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Assembly => "assembly",
            NodeKind::Part => "part",
        }
    }

    /// Inverse of [`NodeKind::as_str`]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assembly" => Some(NodeKind::Assembly),
            "part" => Some(NodeKind::Part),
            _ => None,
        }
    }
}

/// One CAD component
#[derive(Debug, Clone, PartialEq)]
pub struct SceneNode {
    /// Display name
    pub name: String,
    /// Assembly or Part
    pub kind: NodeKind,
    /// Whether the node is drawn
    pub visible: bool,
    /// Key into the [`MeshStore`](crate::store::MeshStore), Parts only
    pub mesh_ref: Option<MeshId>,
    pub(crate) level: usize,
    pub(crate) children: Vec<NodeId>,
    pub(crate) parent: Option<NodeId>,
}

impl SceneNode {
    /// Depth from the synthetic root (root = 0)
    pub fn level(&self) -> usize {
        self.level
    }

    /// Children in document order
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Parent index, `None` for the root
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// True for Assembly nodes
    pub fn is_assembly(&self) -> bool {
        self.kind == NodeKind::Assembly
    }
}

/// Summary counts over a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelStats {
    /// Every node including the synthetic root
    pub total_nodes: usize,
    /// Nodes whose own flag is visible
    pub visible_nodes: usize,
    /// Assembly nodes
    pub assemblies: usize,
    /// Part nodes
    pub parts: usize,
    /// Deepest level present
    pub max_depth: usize,
}

/// The scene hierarchy produced by one load
///
/// Nodes live in a flat arena addressed by [`NodeId`]. Parents own their
/// children through the ordered `children` list; the `parent` back-link is an
/// index and never keeps anything alive. Node 0 is always the synthetic root.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneTree {
    nodes: Vec<SceneNode>,
}

impl SceneTree {
    /// Create a tree holding only the synthetic root Assembly
    pub fn new(root_name: impl Into<String>) -> Self {
        Self {
            nodes: vec![SceneNode {
                name: root_name.into(),
                kind: NodeKind::Assembly,
                visible: true,
                mesh_ref: None,
                level: 0,
                children: Vec::new(),
                parent: None,
            }],
        }
    }

    /// The synthetic root
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Number of nodes including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; a tree has at least its root
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Append a child under `parent` and return its id
    ///
    /// The parent becomes an Assembly if it was classified as a Part, since a
    /// node with children is an Assembly by definition.
    pub fn add_child(&mut self, parent: NodeId, name: impl Into<String>, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        let parent_node = &mut self.nodes[parent.0];
        if parent_node.kind == NodeKind::Part {
            parent_node.kind = NodeKind::Assembly;
            parent_node.mesh_ref = None;
        }
        parent_node.children.push(id);
        let level = parent_node.level + 1;
        self.nodes.push(SceneNode {
            name: name.into(),
            kind,
            visible: true,
            mesh_ref: None,
            level,
            children: Vec::new(),
            parent: Some(parent),
        });
        id
    }

    /// Look up a node
    pub fn get(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id.0)
    }

    /// Look up a node mutably
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id.0)
    }

    /// Pre-order walk of the whole tree in document order
    pub fn iter_depth_first(&self) -> DepthFirst<'_> {
        self.subtree(self.root())
    }

    /// Pre-order walk of `id` and everything below it
    pub fn subtree(&self, id: NodeId) -> DepthFirst<'_> {
        let stack = if id.0 < self.nodes.len() {
            vec![id]
        } else {
            Vec::new()
        };
        DepthFirst { tree: self, stack }
    }

    /// Parent chain of `id`, nearest first, ending at the root
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut current = self.get(id).and_then(|n| n.parent);
        while let Some(p) = current {
            out.push(p);
            current = self.nodes[p.0].parent;
        }
        out
    }

    /// Display path of a node, `" / "`-separated, excluding the synthetic root
    ///
    /// The root itself has an empty path.
    pub fn path(&self, id: NodeId) -> String {
        let Some(node) = self.get(id) else {
            return String::new();
        };
        if node.parent.is_none() {
            return String::new();
        }
        let mut names: Vec<&str> = self
            .ancestors(id)
            .into_iter()
            .filter(|a| self.nodes[a.0].parent.is_some())
            .map(|a| self.nodes[a.0].name.as_str())
            .collect();
        names.reverse();
        names.push(node.name.as_str());
        names.join(" / ")
    }

    /// All nodes with exactly this display name, in document order
    pub fn find_by_name(&self, name: &str) -> Vec<NodeId> {
        self.iter_depth_first()
            .filter(|id| self.nodes[id.0].name == name)
            .collect()
    }

    /// Part nodes in document order
    pub fn parts(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.iter_depth_first()
            .filter(|id| self.nodes[id.0].kind == NodeKind::Part)
    }

    /// Count nodes by kind and visibility
    pub fn stats(&self) -> ModelStats {
        let mut stats = ModelStats::default();
        for node in &self.nodes {
            stats.total_nodes += 1;
            if node.visible {
                stats.visible_nodes += 1;
            }
            match node.kind {
                NodeKind::Assembly => stats.assemblies += 1,
                NodeKind::Part => stats.parts += 1,
            }
            stats.max_depth = stats.max_depth.max(node.level);
        }
        stats
    }
}

impl Index<NodeId> for SceneTree {
    type Output = SceneNode;

    fn index(&self, id: NodeId) -> &SceneNode {
        &self.nodes[id.0]
    }
}

/// Pre-order iterator returned by [`SceneTree::iter_depth_first`]
pub struct DepthFirst<'a> {
    tree: &'a SceneTree,
    stack: Vec<NodeId>,
}

impl Iterator for DepthFirst<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        // Reverse so the first child is popped next
        self.stack
            .extend(self.tree.nodes[id.0].children.iter().rev().copied());
        Some(id)
    }
}
