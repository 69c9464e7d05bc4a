//! Triangle mesh buffers and their identifiers

use std::collections::HashSet;
use std::fmt;

/// A 3D vertex with x, y, z coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Z coordinate
    pub z: f64,
}

impl Vertex {
    /// Create a new vertex
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A triangle defined by three vertex indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Triangle {
    /// Index of first vertex
    pub v1: u32,
    /// Index of second vertex
    pub v2: u32,
    /// Index of third vertex
    pub v3: u32,
}

impl Triangle {
    /// Create a new triangle
    pub fn new(v1: u32, v2: u32, v3: u32) -> Self {
        Self { v1, v2, v3 }
    }
}

/// Renderable geometry of one Part
///
/// A buffer is never modified after the traversal or the cache reader
/// produced it. [`MeshStore`](crate::store::MeshStore) shares it with
/// renderers behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshBuffer {
    /// List of points
    pub points: Vec<Vertex>,
    /// List of triangles indexing into `points`
    pub triangles: Vec<Triangle>,
}

impl MeshBuffer {
    /// Create a new empty mesh buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new mesh buffer with pre-allocated capacity
    pub fn with_capacity(points: usize, triangles: usize) -> Self {
        Self {
            points: Vec::with_capacity(points),
            triangles: Vec::with_capacity(triangles),
        }
    }

    /// True when the buffer has nothing to draw
    pub fn is_empty(&self) -> bool {
        self.points.is_empty() || self.triangles.is_empty()
    }

    /// Index of the first triangle referencing a point that does not exist
    pub fn first_out_of_range(&self) -> Option<usize> {
        let n = self.points.len() as u64;
        self.triangles.iter().position(|t| {
            u64::from(t.v1) >= n || u64::from(t.v2) >= n || u64::from(t.v3) >= n
        })
    }
}

/// Identifier of a mesh within one load session
///
/// Derived from the owning node's display name: every character outside
/// `[A-Za-z0-9_-]` becomes `_`. The same string is the `MeshStore` key and
/// the suffix of the on-disk mesh file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(String);

impl MeshId {
    /// Build an id from a display name, normalizing non-identifier characters
    pub fn from_name(name: &str) -> Self {
        Self(sanitize(name))
    }

    /// Wrap a string that is already a valid identifier
    ///
    /// Used by the cache reader; the string is sanitized again so a
    /// hand-edited cache cannot smuggle path separators into file names.
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(sanitize(raw.as_ref()))
    }

    /// The identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MeshId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "part".to_string()
    } else {
        cleaned
    }
}

/// Hands out [`MeshId`]s that are unique within one load
///
/// Two Parts named `Bolt M6` and `Bolt-M6?` sanitize to different ids, but
/// two Parts both named `Bolt` do not; the second gets `Bolt_2`.
///
/// Ids become file names, so uniqueness ignores ASCII case: `bolt` after
/// `Bolt` also gets a suffix.
#[derive(Debug, Default)]
pub struct MeshIdAllocator {
    /// Lowercased ids handed out so far
    used: HashSet<String>,
}

impl MeshIdAllocator {
    /// Create an empty allocator
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh id for `name`
    pub fn allocate(&mut self, name: &str) -> MeshId {
        let base = sanitize(name);
        if self.used.insert(base.to_ascii_lowercase()) {
            return MeshId(base);
        }
        let mut n = 2usize;
        loop {
            let candidate = format!("{}_{}", base, n);
            if self.used.insert(candidate.to_ascii_lowercase()) {
                return MeshId(candidate);
            }
            n += 1;
        }
    }
}
