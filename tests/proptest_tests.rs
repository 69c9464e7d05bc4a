//! Property-based tests for cadscene
//!
//! These tests generate random assembly documents and verify that the
//! traversal, cache and visibility invariants hold across them.

use std::path::Path;

use cadscene::kernel::{GeometryKernel, MemoryDocument, MemoryKernel, MemoryShape};
use cadscene::model::MeshIdAllocator;
use cadscene::{
    AssemblyTraversal, BuiltScene, CacheManager, MeshId, NodeKind, VisibilityModel, validate_scene,
};
use proptest::prelude::*;

// ============================================================================
// Generators
// ============================================================================

/// One label: whether it is an assembly, where it attaches, and how its
/// geometry behaves
#[derive(Debug, Clone)]
struct LabelPlan {
    assembly: bool,
    parent: usize,
    free: bool,
    geometry: u8,
}

fn label_plan_strategy() -> impl Strategy<Value = LabelPlan> {
    (any::<bool>(), any::<usize>(), prop::bool::weighted(0.2), 0u8..10).prop_map(
        |(assembly, parent, free, geometry)| LabelPlan {
            assembly,
            parent,
            free,
            geometry,
        },
    )
}

/// Random documents: every label hangs under an earlier assembly or is free
fn document_strategy() -> impl Strategy<Value = MemoryDocument> {
    prop::collection::vec(label_plan_strategy(), 1..40).prop_map(|plans| {
        let mut doc = MemoryDocument::new();
        let mut assemblies = Vec::new();
        for (i, plan) in plans.iter().enumerate() {
            let label = if plan.assembly {
                let label = doc.add_assembly(&format!("Group{}", i));
                assemblies.push(label);
                label
            } else {
                let shape = match plan.geometry {
                    0 => MemoryShape::failing("bad edge"),
                    1 => MemoryShape::empty(),
                    _ => MemoryShape::cuboid([i as f64, 0.0, 0.0], [1.0, 1.0, 1.0]),
                };
                doc.add_part(&format!("Piece{}", i), shape)
            };
            let attachable = &assemblies[..assemblies.len() - usize::from(plan.assembly)];
            if i == 0 || plan.free || attachable.is_empty() {
                doc.mark_free(label);
            } else {
                doc.add_component(attachable[plan.parent % attachable.len()], label);
            }
        }
        doc
    })
}

fn traverse(doc: MemoryDocument, max_depth: usize) -> BuiltScene {
    let kernel = MemoryKernel::new();
    kernel.insert("/random.step", doc);
    let document = kernel.open(Path::new("/random.step")).unwrap();
    AssemblyTraversal::new(&kernel)
        .with_max_depth(max_depth)
        .build(&document, "random")
        .unwrap()
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_traversal_respects_depth_and_invariants(doc in document_strategy(), max_depth in 1usize..6) {
        let scene = traverse(doc, max_depth);
        for id in scene.tree.iter_depth_first() {
            let node = &scene.tree[id];
            prop_assert!(node.level() <= max_depth);
            if let Some(mesh) = &node.mesh_ref {
                prop_assert_eq!(node.kind, NodeKind::Part);
                prop_assert!(scene.meshes.get(mesh).is_some());
            }
        }
        prop_assert!(validate_scene(&scene.tree, Some(&scene.meshes)).is_ok());
        prop_assert_eq!(
            scene.meshes.len(),
            scene.tree.parts().filter(|id| scene.tree[*id].mesh_ref.is_some()).count()
        );
    }

    #[test]
    fn prop_visibility_reset_shows_every_mesh_once(doc in document_strategy(), hide in prop::collection::vec(any::<usize>(), 0..10)) {
        let scene = traverse(doc, 100);
        let expected: Vec<MeshId> = scene
            .tree
            .parts()
            .filter_map(|id| scene.tree[id].mesh_ref.clone())
            .collect();
        let nodes: Vec<_> = scene.tree.iter_depth_first().collect();
        let mut view = VisibilityModel::new(scene.tree);

        for pick in hide {
            view.set_visible(nodes[pick % nodes.len()], false, pick % 2 == 0);
        }
        let root = view.tree().root();
        view.set_visible(root, false, true);
        prop_assert!(view.visible_meshes().is_empty());
        view.set_visible(root, true, true);
        prop_assert_eq!(view.visible_meshes(), expected);
    }

    #[test]
    fn prop_mesh_ids_are_file_safe_and_unique(names in prop::collection::vec(".{0,12}", 1..20)) {
        let mut ids = MeshIdAllocator::new();
        let mut seen = std::collections::HashSet::new();
        for name in &names {
            let id = ids.allocate(name);
            prop_assert!(!id.as_str().is_empty());
            prop_assert!(id.as_str().chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
            prop_assert!(seen.insert(id));
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_cache_round_trip(doc in document_strategy()) {
        let scene = traverse(doc, 100);
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("random.step");
        std::fs::write(&source, b"solid").unwrap();

        let cache = CacheManager::new(dir.path().join("cache"));
        let key = cache.cache_key(&source).unwrap();
        cache.save(&key, &scene.tree, &scene.meshes).unwrap();
        let cached = cache.load(&key).unwrap();

        let outline = |tree: &cadscene::SceneTree| -> Vec<(String, NodeKind, usize)> {
            tree.iter_depth_first()
                .map(|id| (tree[id].name.clone(), tree[id].kind, tree[id].level()))
                .collect()
        };
        prop_assert_eq!(outline(&cached.tree), outline(&scene.tree));
        prop_assert_eq!(cached.meshes.len(), scene.meshes.len());
        for (id, mesh) in scene.meshes.all() {
            let back = cached.meshes.get(id).unwrap();
            prop_assert_eq!(back.points.len(), mesh.points.len());
            prop_assert_eq!(back.triangles.len(), mesh.triangles.len());
        }
    }
}
