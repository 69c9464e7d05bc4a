//! Validation of scene invariants
//!
//! This module checks that a tree and its mesh store agree with the rules
//! every loaded scene must satisfy:
//! - A node with children is an Assembly
//! - A node with a mesh reference is a Part
//! - Mesh references are unique and, when a store is given, resolve in it
//! - Levels and parent links match the child lists
//! - Every node is reachable from the root exactly once
//!
//! The cache reader runs this on every structure file, so a file that parses
//! but breaks an invariant is treated as corrupt rather than handed out.

use std::collections::HashSet;

use crate::error::{CacheError, Result};
use crate::model::{NodeKind, SceneTree};
use crate::store::MeshStore;

/// Validate a scene
///
/// Pass `store` to additionally require that every mesh reference resolves.
pub fn validate_scene(tree: &SceneTree, store: Option<&MeshStore>) -> Result<()> {
    validate_links(tree)?;
    validate_kinds(tree)?;
    validate_mesh_refs(tree, store)?;
    Ok(())
}

/// Levels, parent links and reachability
pub(crate) fn validate_links(tree: &SceneTree) -> Result<()> {
    let root = &tree[tree.root()];
    if root.parent().is_some() || root.level() != 0 {
        return Err(CacheError::Corrupt(
            "Root node must have level 0 and no parent".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for id in tree.iter_depth_first() {
        if !seen.insert(id) {
            return Err(CacheError::Corrupt(format!(
                "Node {} is reachable more than once",
                id.index()
            )));
        }
        let node = &tree[id];
        for &child in node.children() {
            let c = tree.get(child).ok_or_else(|| {
                CacheError::Corrupt(format!(
                    "Node '{}' lists missing child {}",
                    node.name,
                    child.index()
                ))
            })?;
            if c.parent() != Some(id) || c.level() != node.level() + 1 {
                return Err(CacheError::Corrupt(format!(
                    "Node '{}' (level {}) is not linked to its parent '{}' (level {})",
                    c.name,
                    c.level(),
                    node.name,
                    node.level()
                )));
            }
        }
    }
    if seen.len() != tree.len() {
        return Err(CacheError::Corrupt(format!(
            "{} of {} nodes are unreachable from the root",
            tree.len() - seen.len(),
            tree.len()
        )));
    }
    Ok(())
}

/// Kind rules: children imply Assembly, a mesh implies Part
pub(crate) fn validate_kinds(tree: &SceneTree) -> Result<()> {
    for id in tree.iter_depth_first() {
        let node = &tree[id];
        if !node.children().is_empty() && node.kind != NodeKind::Assembly {
            return Err(CacheError::Corrupt(format!(
                "Part '{}' has {} children",
                node.name,
                node.children().len()
            )));
        }
        if node.mesh_ref.is_some() && node.kind != NodeKind::Part {
            return Err(CacheError::Corrupt(format!(
                "Assembly '{}' carries a mesh reference",
                node.name
            )));
        }
    }
    Ok(())
}

/// Mesh references are unique and resolve in `store` when given
pub(crate) fn validate_mesh_refs(tree: &SceneTree, store: Option<&MeshStore>) -> Result<()> {
    let mut ids = HashSet::new();
    for id in tree.iter_depth_first() {
        let node = &tree[id];
        let Some(ref mesh) = node.mesh_ref else {
            continue;
        };
        if !ids.insert(mesh.clone()) {
            return Err(CacheError::Corrupt(format!(
                "Mesh id '{}' is used by more than one node",
                mesh
            )));
        }
        if let Some(store) = store
            && !store.contains(mesh)
        {
            return Err(CacheError::Corrupt(format!(
                "Mesh '{}' of '{}' is not in the store",
                mesh, node.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MeshBuffer, MeshId};

    fn tree_with_part() -> (SceneTree, crate::model::NodeId) {
        let mut tree = SceneTree::new("root");
        let asm = tree.add_child(tree.root(), "Frame", NodeKind::Assembly);
        let part = tree.add_child(asm, "Bolt", NodeKind::Part);
        (tree, part)
    }

    #[test]
    fn test_valid_tree_passes() {
        let (mut tree, part) = tree_with_part();
        let id = MeshId::from_name("Bolt");
        tree.get_mut(part).unwrap().mesh_ref = Some(id.clone());
        let mut store = MeshStore::new();
        store.put(id, MeshBuffer::new());
        assert!(validate_scene(&tree, Some(&store)).is_ok());
    }

    #[test]
    fn test_assembly_with_mesh_rejected() {
        let (mut tree, _) = tree_with_part();
        let root = tree.root();
        tree.get_mut(root).unwrap().mesh_ref = Some(MeshId::from_name("x"));
        let err = validate_scene(&tree, None).unwrap_err();
        assert!(err.to_string().contains("carries a mesh reference"));
    }

    #[test]
    fn test_part_with_children_rejected() {
        let (mut tree, part) = tree_with_part();
        tree.add_child(part, "Washer", NodeKind::Part);
        // add_child promotes the parent; force it back to exercise the check
        tree.get_mut(part).unwrap().kind = NodeKind::Part;
        let err = validate_scene(&tree, None).unwrap_err();
        assert!(err.to_string().contains("Part 'Bolt' has 1 children"));
    }

    #[test]
    fn test_duplicate_and_unresolved_mesh_ids() {
        let mut tree = SceneTree::new("root");
        let a = tree.add_child(tree.root(), "A", NodeKind::Part);
        let b = tree.add_child(tree.root(), "B", NodeKind::Part);
        let id = MeshId::from_name("same");
        tree.get_mut(a).unwrap().mesh_ref = Some(id.clone());
        tree.get_mut(b).unwrap().mesh_ref = Some(id);
        let err = validate_scene(&tree, None).unwrap_err();
        assert!(err.to_string().contains("used by more than one node"));

        tree.get_mut(b).unwrap().mesh_ref = None;
        let err = validate_scene(&tree, Some(&MeshStore::new())).unwrap_err();
        assert!(err.to_string().contains("not in the store"));
    }
}
