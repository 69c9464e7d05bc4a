//! On-disk scene cache
//!
//! A cache entry is keyed by the source file's identity: its path and
//! modification time, hashed to an 8-character digest, plus its base name.
//! Each entry consists of
//!
//! - one structure file, `<base>_<digest>.xml`, holding the node hierarchy
//!   (see [`structure`]);
//! - one mesh file per Part with geometry, `<base>_<digest>_<mesh-id>.mesh`,
//!   a deflated ZIP holding `mesh.xml`.
//!
//! The structure file is written first and its presence alone makes an
//! entry eligible for the hit path. Mesh files are checked lazily: a missing
//! or unreadable one leaves that Part without geometry and is recorded as a
//! [`DegradationKind::CachePartialMiss`].
//!
//! Stale entries are never deleted; a changed source simply hashes to a new
//! key.

mod archive;
pub mod structure;

pub use archive::MESH_ENTRY;
pub use structure::parse_structure;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use sha2::{Digest, Sha256};

use crate::error::{CacheError, Result};
use crate::model::{MeshId, SceneTree};
use crate::report::{DegradationKind, LoadReport};
use crate::store::MeshStore;

/// Version written to and required from every cache file
pub const FORMAT_VERSION: &str = "1";

/// Extension of structure files
pub const STRUCTURE_EXTENSION: &str = "xml";

/// Extension of mesh files
pub const MESH_EXTENSION: &str = "mesh";

/// Identity of one source file at one modification time
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    base_name: String,
    digest: String,
    source_path: PathBuf,
    source_mtime: SystemTime,
}

impl CacheKey {
    /// Source file stem, e.g. `gearbox` for `/models/gearbox.step`
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// First 8 hex characters of the identity hash
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Source path the key was derived from
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Source modification time the key was derived from
    pub fn source_mtime(&self) -> SystemTime {
        self.source_mtime
    }

    /// File-name stem shared by every file of this entry
    pub fn stem(&self) -> String {
        format!("{}_{}", MeshId::from_name(&self.base_name), self.digest)
    }
}

/// Where one cache entry lives on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Source file
    pub source_path: PathBuf,
    /// Source modification time at save
    pub source_mtime: SystemTime,
    /// Structure file
    pub tree_blob_path: PathBuf,
    /// Directory holding the mesh files
    pub mesh_blob_dir: PathBuf,
}

/// Outcome of [`CacheManager::save`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaveReport {
    /// Mesh files written
    pub meshes_written: usize,
    /// Mesh files that could not be written
    pub meshes_failed: usize,
}

/// A scene reconstructed from the cache
#[derive(Debug, Clone)]
pub struct CachedScene {
    /// The hierarchy as saved
    pub tree: SceneTree,
    /// Every mesh that could be read
    pub meshes: MeshStore,
    /// Parts whose mesh file was missing or unreadable
    pub report: LoadReport,
}

fn modified(path: &Path) -> Result<SystemTime> {
    Ok(fs::metadata(path)?.modified()?)
}

fn digest_for(path: &Path, mtime: SystemTime) -> String {
    let nanos = mtime
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let mut hasher = Sha256::new();
    hasher.update(path.as_os_str().as_encoded_bytes());
    hasher.update([0u8]);
    hasher.update(nanos.to_string().as_bytes());
    let hash = hasher.finalize();
    hash.iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Write `path` through a temporary sibling so readers never see a partial file
fn write_atomically<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(BufWriter<File>) -> Result<BufWriter<File>>,
{
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let result = File::create(&tmp)
        .map_err(CacheError::from)
        .and_then(|file| write(BufWriter::new(file)))
        .and_then(|mut out| {
            out.flush()?;
            Ok(())
        })
        .and_then(|()| fs::rename(&tmp, path).map_err(CacheError::from));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Reads and writes cache entries under one directory
#[derive(Debug, Clone)]
pub struct CacheManager {
    dir: PathBuf,
}

impl CacheManager {
    /// Manager for entries under `dir`; the directory is created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Derive the key for the source file's current identity
    ///
    /// # Errors
    ///
    /// Fails with [`CacheError::Io`] when the source cannot be stat'ed.
    pub fn cache_key(&self, source_path: &Path) -> Result<CacheKey> {
        let mtime = modified(source_path)?;
        let base_name = source_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "scene".to_string());
        Ok(CacheKey {
            base_name,
            digest: digest_for(source_path, mtime),
            source_path: source_path.to_path_buf(),
            source_mtime: mtime,
        })
    }

    /// Path of the structure file for `key`
    pub fn structure_path(&self, key: &CacheKey) -> PathBuf {
        self.dir
            .join(format!("{}.{}", key.stem(), STRUCTURE_EXTENSION))
    }

    /// Path of the mesh file for `id` under `key`
    pub fn mesh_path(&self, key: &CacheKey, id: &MeshId) -> PathBuf {
        self.dir
            .join(format!("{}_{}.{}", key.stem(), id, MESH_EXTENSION))
    }

    /// Locations of the entry for `key`
    pub fn entry(&self, key: &CacheKey) -> CacheEntry {
        CacheEntry {
            source_path: key.source_path.clone(),
            source_mtime: key.source_mtime,
            tree_blob_path: self.structure_path(key),
            mesh_blob_dir: self.dir.clone(),
        }
    }

    /// Whether the entry for `key` may serve `source_path`
    ///
    /// True when the source still hashes to `key`, the structure file
    /// exists, and the structure file is not older than the source. Mesh
    /// files are not inspected.
    pub fn is_valid(&self, key: &CacheKey, source_path: &Path) -> bool {
        let source_mtime = match modified(source_path) {
            Ok(t) => t,
            Err(e) => {
                debug!("Cannot stat source {}: {}", source_path.display(), e);
                return false;
            }
        };
        if digest_for(source_path, source_mtime) != key.digest {
            debug!("Source {} changed since key {}", source_path.display(), key.stem());
            return false;
        }
        match modified(&self.structure_path(key)) {
            Ok(cache_mtime) => cache_mtime >= source_mtime,
            Err(_) => false,
        }
    }

    /// Persist `tree` and the meshes it references
    ///
    /// The structure file is written first, atomically. Mesh files follow in
    /// document order; a failed mesh is logged and counted, never fatal.
    ///
    /// # Errors
    ///
    /// Fails only when the directory or the structure file cannot be written.
    pub fn save(&self, key: &CacheKey, tree: &SceneTree, store: &MeshStore) -> Result<SaveReport> {
        fs::create_dir_all(&self.dir)?;
        let source = key.source_path.to_string_lossy();
        write_atomically(&self.structure_path(key), |out| {
            structure::write_structure(out, tree, &source)
        })?;

        let mut report = SaveReport::default();
        for id in tree.parts() {
            let Some(mesh_id) = tree[id].mesh_ref.as_ref() else {
                continue;
            };
            let Some(mesh) = store.get(mesh_id) else {
                warn!("Mesh '{}' referenced by '{}' is not in the store", mesh_id, tree[id].name);
                report.meshes_failed += 1;
                continue;
            };
            let path = self.mesh_path(key, mesh_id);
            match write_atomically(&path, |out| archive::write_mesh_archive(out, mesh_id, mesh)) {
                Ok(()) => report.meshes_written += 1,
                Err(e) => {
                    warn!("Failed to write mesh file {}: {}", path.display(), e);
                    report.meshes_failed += 1;
                }
            }
        }
        info!(
            "Saved cache entry {}: {} node(s), {} mesh file(s), {} failed",
            key.stem(),
            tree.len(),
            report.meshes_written,
            report.meshes_failed
        );
        Ok(report)
    }

    /// Reconstruct the scene stored under `key`
    ///
    /// # Errors
    ///
    /// Fails when the structure file is missing, unreadable, of another
    /// format version, or inconsistent. Missing mesh files are not errors.
    pub fn load(&self, key: &CacheKey) -> Result<CachedScene> {
        let structure_path = self.structure_path(key);
        if !structure_path.exists() {
            return Err(CacheError::MissingFile(structure_path.display().to_string()));
        }
        let xml = fs::read_to_string(&structure_path)?;
        let mut tree = parse_structure(&xml)?;

        let mut meshes = MeshStore::new();
        let mut report = LoadReport::new();
        let parts: Vec<_> = tree.parts().collect();
        for id in parts {
            let Some(mesh_id) = tree[id].mesh_ref.clone() else {
                continue;
            };
            let path = self.mesh_path(key, &mesh_id);
            let loaded = File::open(&path)
                .map_err(CacheError::from)
                .and_then(|f| archive::read_mesh_archive(BufReader::new(f)));
            match loaded {
                Ok(mesh) => meshes.put(mesh_id, mesh),
                Err(e) => {
                    warn!("Mesh file {} unusable, keeping '{}' without geometry: {}", path.display(), tree[id].name, e);
                    report.push(
                        DegradationKind::CachePartialMiss,
                        Some(id),
                        format!("{}: {}", path.display(), e),
                    );
                    if let Some(node) = tree.get_mut(id) {
                        node.mesh_ref = None;
                    }
                }
            }
        }
        debug!(
            "Loaded cache entry {}: {} node(s), {} mesh(es), {} missing",
            key.stem(),
            tree.len(),
            meshes.len(),
            report.count(DegradationKind::CachePartialMiss)
        );
        Ok(CachedScene {
            tree,
            meshes,
            report,
        })
    }
}
