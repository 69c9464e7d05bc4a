use cadscene::kernel::{GeometryKernel, MemoryDocument, MemoryKernel, MemoryShape};
use cadscene::{AssemblyTraversal, BuiltScene, CacheManager};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::path::Path;
use tempfile::TempDir;

/// Generate a document with `groups` assemblies of `parts` boxes each
fn generate_document(groups: usize, parts: usize) -> MemoryDocument {
    let mut doc = MemoryDocument::new();
    let top = doc.add_assembly("Plant");
    for g in 0..groups {
        let group = doc.add_assembly(&format!("Cell {}", g));
        for p in 0..parts {
            let origin = [g as f64 * 10.0, p as f64 * 2.0, 0.0];
            let part = doc.add_part(&format!("Block {}-{}", g, p), MemoryShape::cuboid(origin, [1.0, 1.0, 1.0]));
            doc.add_component(group, part);
        }
        doc.add_component(top, group);
    }
    doc.mark_free(top);
    doc
}

fn build_scene(kernel: &MemoryKernel, groups: usize, parts: usize) -> BuiltScene {
    let path = format!("/bench/{}x{}.step", groups, parts);
    kernel.insert(&path, generate_document(groups, parts));
    let document = kernel.open(Path::new(&path)).unwrap();
    AssemblyTraversal::new(kernel).build(&document, "plant").unwrap()
}

/// A cache directory with a source file to key against
fn cache_fixture() -> (TempDir, CacheManager, cadscene::CacheKey) {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("plant.step");
    std::fs::write(&source, b"ISO-10303-21;").unwrap();
    let cache = CacheManager::new(dir.path().join("cache"));
    let key = cache.cache_key(&source).unwrap();
    (dir, cache, key)
}

fn bench_traversal(c: &mut Criterion) {
    let mut group = c.benchmark_group("traverse");
    let kernel = MemoryKernel::new();

    for &(groups, parts) in &[(4, 10), (10, 50), (20, 100)] {
        let path = format!("/bench/{}x{}.step", groups, parts);
        kernel.insert(&path, generate_document(groups, parts));
        let document = kernel.open(Path::new(&path)).unwrap();
        group.bench_with_input(
            BenchmarkId::from_parameter(groups * parts),
            &document,
            |b, document| {
                b.iter(|| {
                    AssemblyTraversal::new(&kernel)
                        .build(black_box(document), "plant")
                        .unwrap()
                });
            },
        );
    }

    group.finish();
}

fn bench_cache_save(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_save");
    let kernel = MemoryKernel::new();

    for &(groups, parts) in &[(4, 10), (10, 50)] {
        let scene = build_scene(&kernel, groups, parts);
        let (_dir, cache, key) = cache_fixture();
        group.bench_with_input(
            BenchmarkId::from_parameter(groups * parts),
            &scene,
            |b, scene| {
                b.iter(|| cache.save(black_box(&key), &scene.tree, &scene.meshes).unwrap());
            },
        );
    }

    group.finish();
}

fn bench_cache_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_load");
    let kernel = MemoryKernel::new();

    for &(groups, parts) in &[(4, 10), (10, 50)] {
        let scene = build_scene(&kernel, groups, parts);
        let (_dir, cache, key) = cache_fixture();
        cache.save(&key, &scene.tree, &scene.meshes).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(groups * parts), &key, |b, key| {
            b.iter(|| cache.load(black_box(key)).unwrap());
        });
    }

    group.finish();
}

criterion_group!(benches, bench_traversal, bench_cache_save, bench_cache_load);
criterion_main!(benches);
