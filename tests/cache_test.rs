//! Integration tests for the on-disk scene cache

mod common;

use std::fs::{self, File};
use std::time::{Duration, SystemTime};

use cadscene::kernel::{GeometryKernel, MemoryDocument, MemoryKernel, MemoryShape};
use cadscene::{
    AssemblyTraversal, BuiltScene, CacheError, CacheManager, DegradationKind, NodeKind, SceneTree,
};
use common::Workspace;

fn built(kernel: &MemoryKernel, ws: &Workspace) -> BuiltScene {
    let document = kernel.open(&ws.source).unwrap();
    AssemblyTraversal::new(kernel).build(&document, "gearbox").unwrap()
}

fn outline(tree: &SceneTree) -> Vec<(String, NodeKind, usize)> {
    tree.iter_depth_first()
        .map(|id| (tree[id].name.clone(), tree[id].kind, tree[id].level()))
        .collect()
}

fn touch_later(path: &std::path::Path) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(3600)).unwrap();
}

#[test]
fn test_save_then_load_reproduces_scene() {
    common::init_logging();
    let kernel = MemoryKernel::new();
    let ws = Workspace::new(&kernel, "gearbox.step", common::gearbox());
    let scene = built(&kernel, &ws);

    let cache = CacheManager::new(&ws.cache_dir);
    let key = cache.cache_key(&ws.source).unwrap();
    let report = cache.save(&key, &scene.tree, &scene.meshes).unwrap();
    assert_eq!(report.meshes_written, 4);
    assert_eq!(report.meshes_failed, 0);
    assert_eq!(ws.structure_files(), vec![cache.structure_path(&key)]);
    assert_eq!(ws.mesh_files().len(), 4);

    let cached = cache.load(&key).unwrap();
    assert_eq!(outline(&cached.tree), outline(&scene.tree));
    assert!(cached.report.is_clean());
    for (id, mesh) in scene.meshes.all() {
        let back = cached.meshes.get(id).expect("mesh recovered");
        assert_eq!(back.points.len(), mesh.points.len());
        assert_eq!(back.triangles.len(), mesh.triangles.len());
        assert_eq!(back, mesh);
    }
}

#[test]
fn test_key_names_and_entry_layout() {
    let kernel = MemoryKernel::new();
    let ws = Workspace::new(&kernel, "Gear Box v2.step", common::gearbox());
    let cache = CacheManager::new(&ws.cache_dir);
    let key = cache.cache_key(&ws.source).unwrap();

    assert_eq!(key.base_name(), "Gear Box v2");
    assert_eq!(key.digest().len(), 8);
    assert!(key.digest().chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(key.stem(), format!("Gear_Box_v2_{}", key.digest()));

    let entry = cache.entry(&key);
    assert_eq!(entry.source_path, ws.source);
    assert_eq!(entry.tree_blob_path, ws.cache_dir.join(format!("{}.xml", key.stem())));
    assert_eq!(entry.mesh_blob_dir, ws.cache_dir);
}

#[test]
fn test_touching_source_invalidates() {
    let kernel = MemoryKernel::new();
    let ws = Workspace::new(&kernel, "gearbox.step", common::gearbox());
    let scene = built(&kernel, &ws);
    let cache = CacheManager::new(&ws.cache_dir);
    let key = cache.cache_key(&ws.source).unwrap();

    assert!(!cache.is_valid(&key, &ws.source), "nothing saved yet");
    cache.save(&key, &scene.tree, &scene.meshes).unwrap();
    assert!(cache.is_valid(&key, &ws.source));
    assert!(cache.is_valid(&key, &ws.source), "validity is stable without changes");

    touch_later(&ws.source);
    assert!(!cache.is_valid(&key, &ws.source));
    let fresh = cache.cache_key(&ws.source).unwrap();
    assert_ne!(fresh.digest(), key.digest());
    assert!(!cache.is_valid(&fresh, &ws.source));
    // The stale entry stays on disk
    assert!(cache.structure_path(&key).exists());
}

#[test]
fn test_saving_twice_still_loads() {
    let kernel = MemoryKernel::new();
    let ws = Workspace::new(&kernel, "gearbox.step", common::gearbox());
    let scene = built(&kernel, &ws);
    let cache = CacheManager::new(&ws.cache_dir);
    let key = cache.cache_key(&ws.source).unwrap();

    cache.save(&key, &scene.tree, &scene.meshes).unwrap();
    cache.save(&key, &scene.tree, &scene.meshes).unwrap();
    assert_eq!(ws.structure_files().len(), 1);
    assert_eq!(ws.mesh_files().len(), 4);
    let cached = cache.load(&key).unwrap();
    assert_eq!(cached.tree.len(), scene.tree.len());
    assert_eq!(cached.meshes.len(), 4);
}

#[test]
fn test_missing_and_damaged_mesh_files_degrade_one_part() {
    let kernel = MemoryKernel::new();
    let ws = Workspace::new(&kernel, "gearbox.step", common::gearbox());
    let scene = built(&kernel, &ws);
    let cache = CacheManager::new(&ws.cache_dir);
    let key = cache.cache_key(&ws.source).unwrap();
    cache.save(&key, &scene.tree, &scene.meshes).unwrap();

    let shaft = scene.tree[scene.tree.find_by_name("Shaft")[0]].mesh_ref.clone().unwrap();
    let housing = scene.tree[scene.tree.find_by_name("Housing")[0]].mesh_ref.clone().unwrap();
    fs::remove_file(cache.mesh_path(&key, &shaft)).unwrap();
    fs::write(cache.mesh_path(&key, &housing), b"not a zip archive").unwrap();

    assert!(cache.is_valid(&key, &ws.source), "mesh files are checked lazily");
    let cached = cache.load(&key).unwrap();
    assert_eq!(cached.tree.len(), scene.tree.len());
    assert_eq!(cached.meshes.len(), 2);
    assert_eq!(cached.report.count(DegradationKind::CachePartialMiss), 2);
    for name in ["Shaft", "Housing"] {
        let node = &cached.tree[cached.tree.find_by_name(name)[0]];
        assert_eq!(node.kind, NodeKind::Part);
        assert!(node.mesh_ref.is_none());
    }
}

#[test]
fn test_unwritable_mesh_file_does_not_abort_save() {
    common::init_logging();
    let kernel = MemoryKernel::new();
    let ws = Workspace::new(&kernel, "gearbox.step", common::gearbox());
    let scene = built(&kernel, &ws);
    let cache = CacheManager::new(&ws.cache_dir);
    let key = cache.cache_key(&ws.source).unwrap();

    let shaft = scene.tree[scene.tree.find_by_name("Shaft")[0]].mesh_ref.clone().unwrap();
    let blocked = cache.mesh_path(&key, &shaft);
    fs::create_dir_all(blocked.join("occupied")).unwrap();

    let report = cache.save(&key, &scene.tree, &scene.meshes).unwrap();
    assert_eq!(report.meshes_written, 3);
    assert_eq!(report.meshes_failed, 1);
    assert!(cache.structure_path(&key).is_file());
    for (id, _) in scene.meshes.all() {
        assert_eq!(cache.mesh_path(&key, id).is_file(), *id != shaft, "{}", id);
    }

    let cached = cache.load(&key).unwrap();
    assert_eq!(cached.meshes.len(), 3);
    assert_eq!(cached.report.count(DegradationKind::CachePartialMiss), 1);
    assert!(cached.tree[cached.tree.find_by_name("Shaft")[0]].mesh_ref.is_none());
}

#[test]
fn test_parts_differing_only_in_case_keep_their_geometry() {
    let mut doc = MemoryDocument::new();
    let kit = doc.add_assembly("Kit");
    let upper = doc.add_part("Bolt", MemoryShape::cuboid([0.0; 3], [1.0; 3]));
    let lower = doc.add_part("bolt", MemoryShape::cuboid([5.0, 0.0, 0.0], [2.0; 3]));
    doc.add_component(kit, upper);
    doc.add_component(kit, lower);
    doc.mark_free(kit);

    let kernel = MemoryKernel::new();
    let ws = Workspace::new(&kernel, "kit.step", doc);
    let scene = built(&kernel, &ws);
    let cache = CacheManager::new(&ws.cache_dir);
    let key = cache.cache_key(&ws.source).unwrap();
    cache.save(&key, &scene.tree, &scene.meshes).unwrap();

    let mut names: Vec<String> = ws
        .mesh_files()
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_ascii_lowercase())
        .collect();
    names.dedup();
    assert_eq!(names.len(), 2, "file names must differ beyond case: {:?}", names);

    let cached = cache.load(&key).unwrap();
    for name in ["Bolt", "bolt"] {
        let id = cached.tree[cached.tree.find_by_name(name)[0]].mesh_ref.clone().unwrap();
        let original = scene.tree[scene.tree.find_by_name(name)[0]].mesh_ref.clone().unwrap();
        assert_eq!(cached.meshes.get(&id), scene.meshes.get(&original));
    }
}

#[cfg(target_os = "linux")]
#[test]
fn test_non_utf8_paths_get_distinct_keys() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join(OsStr::from_bytes(b"part\xff.step"));
    let b = dir.path().join(OsStr::from_bytes(b"part\xfe.step"));
    let stamp = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    for path in [&a, &b] {
        fs::write(path, b"ISO-10303-21;").unwrap();
        File::options().write(true).open(path).unwrap().set_modified(stamp).unwrap();
    }

    let cache = CacheManager::new(dir.path().join("cache"));
    let key_a = cache.cache_key(&a).unwrap();
    let key_b = cache.cache_key(&b).unwrap();
    assert_ne!(key_a.digest(), key_b.digest());
    assert_ne!(cache.structure_path(&key_a), cache.structure_path(&key_b));
}

#[test]
fn test_visibility_is_persisted() {
    let kernel = MemoryKernel::new();
    let ws = Workspace::new(&kernel, "gearbox.step", common::gearbox());
    let mut scene = built(&kernel, &ws);
    let housing = scene.tree.find_by_name("Housing")[0];
    scene.tree.get_mut(housing).unwrap().visible = false;

    let cache = CacheManager::new(&ws.cache_dir);
    let key = cache.cache_key(&ws.source).unwrap();
    cache.save(&key, &scene.tree, &scene.meshes).unwrap();
    let cached = cache.load(&key).unwrap();
    let stats = cached.tree.stats();
    assert_eq!(stats.visible_nodes, stats.total_nodes - 1);
    assert!(!cached.tree[cached.tree.find_by_name("Housing")[0]].visible);
}

#[test]
fn test_unusable_structure_file_is_an_error() {
    let kernel = MemoryKernel::new();
    let ws = Workspace::new(&kernel, "gearbox.step", common::gearbox());
    let scene = built(&kernel, &ws);
    let cache = CacheManager::new(&ws.cache_dir);
    let key = cache.cache_key(&ws.source).unwrap();

    assert!(matches!(cache.load(&key), Err(CacheError::MissingFile(_))));

    cache.save(&key, &scene.tree, &scene.meshes).unwrap();
    let path = cache.structure_path(&key);
    let xml = fs::read_to_string(&path).unwrap();
    fs::write(&path, xml.replacen("version=\"1\"", "version=\"9\"", 1)).unwrap();
    assert!(matches!(cache.load(&key), Err(CacheError::VersionMismatch { .. })));

    fs::write(&path, &xml[..xml.len() / 2]).unwrap();
    assert!(cache.load(&key).is_err());
}
