//! Geometric queries on tessellated meshes using nalgebra
//!
//! This module provides the measurements a renderer needs to frame a scene:
//! - Bounding box calculation, per mesh and merged across meshes
//! - Surface area
//! - Vertex normal calculation
//!
//! Triangles that index past the point list are skipped rather than
//! reported; the cache reader and the traversal already reject such meshes.

use nalgebra::{Point3, Vector3 as NVector3};

use crate::model::{MeshBuffer, Triangle, Vertex};

/// A 3D point represented as (x, y, z)
pub type Point3d = (f64, f64, f64);

/// A 3D vector represented as (x, y, z)
pub type Vector3 = (f64, f64, f64);

/// An axis-aligned bounding box represented as (min_point, max_point)
pub type BoundingBox = (Point3d, Point3d);

fn point(v: &Vertex) -> Point3<f64> {
    Point3::new(v.x, v.y, v.z)
}

fn corners<'a>(mesh: &'a MeshBuffer, t: &Triangle) -> Option<[&'a Vertex; 3]> {
    let get = |i: u32| mesh.points.get(i as usize);
    Some([get(t.v1)?, get(t.v2)?, get(t.v3)?])
}

/// Twice the area, pointing along the right-handed face normal
fn scaled_normal(mesh: &MeshBuffer, t: &Triangle) -> Option<NVector3<f64>> {
    let [a, b, c] = corners(mesh, t)?;
    let (a, b, c) = (point(a), point(b), point(c));
    Some((b - a).cross(&(c - a)))
}

/// Compute the axis-aligned bounding box of a mesh
///
/// Returns `None` for a mesh without points.
///
/// # Example
/// ```
/// use cadscene::kernel::cuboid_mesh;
/// use cadscene::mesh_ops::compute_aabb;
///
/// let mesh = cuboid_mesh([1.0, 0.0, 0.0], [2.0, 3.0, 4.0]);
/// assert_eq!(compute_aabb(&mesh), Some(((1.0, 0.0, 0.0), (3.0, 3.0, 4.0))));
/// ```
pub fn compute_aabb(mesh: &MeshBuffer) -> Option<BoundingBox> {
    let mut points = mesh.points.iter().map(point);
    let first = points.next()?;
    let (min, max) = points.fold((first, first), |(min, max), p| (min.inf(&p), max.sup(&p)));
    Some(((min.x, min.y, min.z), (max.x, max.y, max.z)))
}

/// Smallest box containing both boxes
pub fn merge_bounds(a: BoundingBox, b: BoundingBox) -> BoundingBox {
    let (amin, amax) = a;
    let (bmin, bmax) = b;
    (
        (amin.0.min(bmin.0), amin.1.min(bmin.1), amin.2.min(bmin.2)),
        (amax.0.max(bmax.0), amax.1.max(bmax.1), amax.2.max(bmax.2)),
    )
}

/// Total area of all valid triangles
pub fn surface_area(mesh: &MeshBuffer) -> f64 {
    mesh.triangles
        .iter()
        .filter_map(|t| scaled_normal(mesh, t))
        .map(|n| n.norm() * 0.5)
        .sum()
}

/// Calculate area-weighted vertex normals for an entire mesh
///
/// Each vertex receives the normalized sum of the face normals of its
/// adjacent triangles, weighted by face area. Degenerate triangles are
/// skipped, and a vertex not referenced by any valid triangle gets
/// `(0, 0, 0)`. The result has one entry per point, in point order.
pub fn calculate_vertex_normals(mesh: &MeshBuffer) -> Vec<Vector3> {
    let mut normals = vec![NVector3::zeros(); mesh.points.len()];
    for triangle in &mesh.triangles {
        let Some(n) = scaled_normal(mesh, triangle) else {
            continue;
        };
        if n.norm_squared() == 0.0 {
            continue;
        }
        for i in [triangle.v1, triangle.v2, triangle.v3] {
            normals[i as usize] += n;
        }
    }
    normals
        .into_iter()
        .map(|n| match n.try_normalize(0.0) {
            Some(u) => (u.x, u.y, u.z),
            None => (0.0, 0.0, 0.0),
        })
        .collect()
}
