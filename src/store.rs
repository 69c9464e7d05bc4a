//! Mesh storage decoupled from the scene tree
//!
//! Nodes refer to meshes by [`MeshId`]; the store owns the buffers. Only the
//! load worker writes to a store, and consumers receive it after the whole
//! tree is built.

use std::collections::HashMap;
use std::sync::Arc;

use crate::model::{MeshBuffer, MeshId};

/// Owner of every [`MeshBuffer`] produced by one load
#[derive(Debug, Clone, Default)]
pub struct MeshStore {
    meshes: HashMap<MeshId, Arc<MeshBuffer>>,
    order: Vec<MeshId>,
}

impl MeshStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the buffer for `id`
    ///
    /// Replacing keeps the id's original insertion position.
    pub fn put(&mut self, id: MeshId, buffer: MeshBuffer) {
        if self.meshes.insert(id.clone(), Arc::new(buffer)).is_none() {
            self.order.push(id);
        }
    }

    /// Borrow the buffer for `id`
    pub fn get(&self, id: &MeshId) -> Option<&MeshBuffer> {
        self.meshes.get(id).map(|m| m.as_ref())
    }

    /// Shared handle to the buffer for `id`, for renderers on other threads
    pub fn get_shared(&self, id: &MeshId) -> Option<Arc<MeshBuffer>> {
        self.meshes.get(id).cloned()
    }

    /// Whether a buffer is stored under `id`
    pub fn contains(&self, id: &MeshId) -> bool {
        self.meshes.contains_key(id)
    }

    /// Remove and return the buffer for `id`
    pub fn remove(&mut self, id: &MeshId) -> Option<Arc<MeshBuffer>> {
        let removed = self.meshes.remove(id)?;
        self.order.retain(|k| k != id);
        Some(removed)
    }

    /// Every `(id, buffer)` pair in insertion order
    pub fn all(&self) -> impl Iterator<Item = (&MeshId, &MeshBuffer)> + '_ {
        self.order
            .iter()
            .filter_map(|id| self.meshes.get(id).map(|m| (id, m.as_ref())))
    }

    /// Number of stored meshes
    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    /// True when no mesh is stored
    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    /// Total triangles across all meshes
    pub fn triangle_count(&self) -> usize {
        self.meshes.values().map(|m| m.triangles.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Triangle, Vertex};

    fn tri() -> MeshBuffer {
        MeshBuffer {
            points: vec![
                Vertex::new(0.0, 0.0, 0.0),
                Vertex::new(1.0, 0.0, 0.0),
                Vertex::new(0.0, 1.0, 0.0),
            ],
            triangles: vec![Triangle::new(0, 1, 2)],
        }
    }

    #[test]
    fn test_put_get_remove() {
        let mut store = MeshStore::new();
        let id = MeshId::from_name("Bracket");
        store.put(id.clone(), tri());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&id).map(|m| m.triangles.len()), Some(1));
        assert!(store.contains(&id));

        let removed = store.remove(&id);
        assert!(removed.is_some());
        assert!(store.is_empty());
        assert!(store.get(&id).is_none());
        assert!(store.remove(&id).is_none());
    }

    #[test]
    fn test_all_keeps_insertion_order() {
        let mut store = MeshStore::new();
        for name in ["c", "a", "b"] {
            store.put(MeshId::from_name(name), tri());
        }
        store.put(MeshId::from_name("a"), MeshBuffer::new());
        let ids: Vec<&str> = store.all().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
        assert_eq!(store.triangle_count(), 2);
    }

    #[test]
    fn test_shared_handle_outlives_store() {
        let mut store = MeshStore::new();
        let id = MeshId::from_name("Shaft");
        store.put(id.clone(), tri());
        let shared = store.get_shared(&id);
        drop(store);
        assert_eq!(shared.map(|m| m.points.len()), Some(3));
    }
}
