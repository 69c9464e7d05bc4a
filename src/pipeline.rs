//! Asynchronous load pipeline
//!
//! A [`LoadPipeline`] owns one dedicated worker thread per load. The caller
//! issues [`load`](LoadPipeline::load) and [`cancel`](LoadPipeline::cancel)
//! and receives [`LoadEvent`]s on a channel; it never touches the scene
//! while it is being built.
//!
//! ```text
//! Idle -> CheckingCache -> CacheHit -> Reconstructing -> Done
//!                       \-> CacheMiss -> Traversing -> Tessellating -> Persisting -> Done
//!      (any stage)      -> Failed | Cancelled
//! ```
//!
//! Progress percentages never decrease and [`LoadEvent::Finished`] is always
//! the last event of a load. After a load from the kernel the worker hands
//! the scene to the caller first and only then writes the cache entry, so
//! persistence never delays availability. The next load waits for that write
//! before it looks at the cache.
//!
//! # Example
//!
//! ```no_run
//! use cadscene::kernel::MemoryKernel;
//! use cadscene::{LoadConfig, LoadEvent, LoadMode, LoadPipeline};
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = LoadPipeline::new(Arc::new(MemoryKernel::new()), LoadConfig::from_env());
//! let handle = pipeline.load("/models/gearbox.step", LoadMode::CacheAware)?;
//! while let Some(event) = handle.recv() {
//!     match event {
//!         LoadEvent::Progress(p) => println!("{:3}% {}", p.percent, p.stage),
//!         LoadEvent::Finished(result) => {
//!             let scene = result?;
//!             println!("{} nodes", scene.tree.len());
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use crate::cache::{CacheKey, CacheManager};
use crate::config::LoadConfig;
use crate::error::LoadError;
use crate::kernel::GeometryKernel;
use crate::model::SceneTree;
use crate::report::{DegradationKind, LoadReport};
use crate::store::MeshStore;
use crate::traversal::{AssemblyTraversal, CancelToken, Phase, TraversalProgress, panic_message};

/// Whether a load may use the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Serve from the cache when the entry is valid
    CacheAware,
    /// Always go through the kernel; the result is still persisted
    ForceFresh,
}

/// Observable state of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// No load has run yet
    Idle,
    /// Deriving the cache key and checking validity
    CheckingCache,
    /// A valid entry exists
    CacheHit,
    /// Reading the entry back
    Reconstructing,
    /// No usable entry; going to the kernel
    CacheMiss,
    /// Reading the source and walking its labels
    Traversing,
    /// Triangulating Parts
    Tessellating,
    /// Scene delivered; writing the cache entry
    Persisting,
    /// Last load completed
    Done,
    /// Last load failed
    Failed,
    /// Last load was cancelled
    Cancelled,
}

/// Coarse stage label reported with progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Looking for a valid cache entry
    CheckingCache,
    /// Reading a cache entry
    LoadingCache,
    /// Kernel read
    ReadingContainer,
    /// Kernel transfer
    ExtractingGeometry,
    /// Label walk
    BuildingTree,
    /// Tessellation
    GeneratingMesh,
    /// Packaging the result
    ConvertingFormat,
    /// Finished
    Done,
}

impl Stage {
    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            Stage::CheckingCache => "checking cache",
            Stage::LoadingCache => "loading cached scene",
            Stage::ReadingContainer => "reading container",
            Stage::ExtractingGeometry => "extracting geometry",
            Stage::BuildingTree => "building assembly tree",
            Stage::GeneratingMesh => "generating mesh",
            Stage::ConvertingFormat => "converting format",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One progress notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// 0 to 100, never decreasing within a load
    pub percent: u8,
    /// What the worker is doing
    pub stage: Stage,
}

/// Where a loaded scene came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneOrigin {
    /// Reconstructed from a cache entry
    Cache,
    /// Built through the geometry kernel
    Kernel,
}

/// A completed load, owned by the caller
#[derive(Debug, Clone)]
pub struct LoadedScene {
    /// The scene hierarchy
    pub tree: SceneTree,
    /// Meshes referenced by the tree
    pub meshes: MeshStore,
    /// Cache or kernel
    pub origin: SceneOrigin,
    /// Recovered failures
    pub report: LoadReport,
    /// Source file
    pub source: PathBuf,
}

/// Message from the worker to the caller
#[derive(Debug)]
pub enum LoadEvent {
    /// Progress update
    Progress(Progress),
    /// Terminal result; always the last event of a load
    Finished(Result<LoadedScene, LoadError>),
}

/// Caller's side of one load
#[derive(Debug)]
pub struct LoadHandle {
    events: Receiver<LoadEvent>,
    cancel: CancelToken,
}

impl LoadHandle {
    /// Block for the next event; `None` once the worker is gone
    pub fn recv(&self) -> Option<LoadEvent> {
        self.events.recv().ok()
    }

    /// Next event if one is ready
    pub fn try_recv(&self) -> Option<LoadEvent> {
        self.events.try_recv().ok()
    }

    /// Request cooperative cancellation
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Block until the load finishes, discarding progress
    pub fn wait(self) -> Result<LoadedScene, LoadError> {
        while let Ok(event) = self.events.recv() {
            if let LoadEvent::Finished(result) = event {
                return result;
            }
        }
        Err(LoadError::Worker(
            "worker exited without a result".to_string(),
        ))
    }
}

struct Shared {
    busy: AtomicBool,
    state: Mutex<LoadState>,
    cancel: Mutex<CancelToken>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Shared {
    fn set_state(&self, state: LoadState) {
        let mut current = lock(&self.state);
        if *current != state {
            debug!("Load state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loads scenes through a kernel and a cache, one at a time
pub struct LoadPipeline<K: GeometryKernel + 'static> {
    kernel: Arc<K>,
    config: LoadConfig,
    cache: CacheManager,
    shared: Arc<Shared>,
}

impl<K: GeometryKernel + 'static> LoadPipeline<K> {
    /// Pipeline using `kernel`, caching under `config.cache_dir()`
    pub fn new(kernel: Arc<K>, config: LoadConfig) -> Self {
        let cache = CacheManager::new(config.cache_dir());
        Self {
            kernel,
            config,
            cache,
            shared: Arc::new(Shared {
                busy: AtomicBool::new(false),
                state: Mutex::new(LoadState::Idle),
                cancel: Mutex::new(CancelToken::new()),
                worker: Mutex::new(None),
            }),
        }
    }

    /// The kernel
    pub fn kernel(&self) -> &Arc<K> {
        &self.kernel
    }

    /// The configuration cloned into every load
    pub fn config(&self) -> &LoadConfig {
        &self.config
    }

    /// The cache manager
    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Current state
    pub fn state(&self) -> LoadState {
        *lock(&self.shared.state)
    }

    /// Whether a load is in flight (persistence excluded)
    pub fn is_loading(&self) -> bool {
        self.shared.busy.load(Ordering::SeqCst)
    }

    /// Start loading `source`
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::AlreadyLoading`] while another load is in
    /// flight; loads are never queued. Every other failure arrives as the
    /// [`LoadEvent::Finished`] event.
    pub fn load(&self, source: impl AsRef<Path>, mode: LoadMode) -> Result<LoadHandle, LoadError> {
        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Rejecting load of {}: a load is in progress", source.as_ref().display());
            return Err(LoadError::AlreadyLoading);
        }

        let cancel = CancelToken::new();
        *lock(&self.shared.cancel) = cancel.clone();
        let (tx, rx) = mpsc::channel();
        let previous = lock(&self.shared.worker).take();

        let worker = Worker {
            kernel: Arc::clone(&self.kernel),
            config: self.config.clone(),
            cache: self.cache.clone(),
            shared: Arc::clone(&self.shared),
            cancel: cancel.clone(),
            reporter: Reporter { events: tx, last: 0 },
            source: source.as_ref().to_path_buf(),
            mode,
        };
        info!("Loading {} ({:?})", worker.source.display(), mode);

        let spawned = thread::Builder::new()
            .name("cadscene-load".to_string())
            .spawn(move || {
                if let Some(previous) = previous {
                    // A finished load may still be writing its cache entry
                    let _ = previous.join();
                }
                worker.run();
            });
        match spawned {
            Ok(handle) => {
                *lock(&self.shared.worker) = Some(handle);
                Ok(LoadHandle { events: rx, cancel })
            }
            Err(e) => {
                self.shared.busy.store(false, Ordering::SeqCst);
                error!("Could not spawn load worker: {}", e);
                Err(LoadError::Worker(e.to_string()))
            }
        }
    }

    /// Start a load and block until it finishes
    pub fn load_blocking(&self, source: impl AsRef<Path>, mode: LoadMode) -> Result<LoadedScene, LoadError> {
        self.load(source, mode)?.wait()
    }

    /// Request cancellation of the load in flight
    pub fn cancel(&self) {
        lock(&self.shared.cancel).cancel();
    }

    /// Block until the worker, including any cache write, has exited
    pub fn wait_idle(&self) {
        let handle = lock(&self.shared.worker).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl<K: GeometryKernel + 'static> Drop for LoadPipeline<K> {
    fn drop(&mut self) {
        if self.is_loading() {
            self.cancel();
        }
        self.wait_idle();
    }
}

impl<K: GeometryKernel + 'static> fmt::Debug for LoadPipeline<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadPipeline")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("loading", &self.is_loading())
            .finish()
    }
}

struct Reporter {
    events: Sender<LoadEvent>,
    last: u8,
}

impl Reporter {
    fn progress(&mut self, percent: u8, stage: Stage) {
        let percent = percent.min(100).max(self.last);
        self.last = percent;
        let _ = self.events.send(LoadEvent::Progress(Progress { percent, stage }));
    }
}

fn scaled(base: u8, span: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return base;
    }
    let step = (span as usize * done.min(total)) / total;
    base.saturating_add(step as u8)
}

struct Snapshot {
    key: CacheKey,
    tree: SceneTree,
    meshes: MeshStore,
}

struct Worker<K: GeometryKernel> {
    kernel: Arc<K>,
    config: LoadConfig,
    cache: CacheManager,
    shared: Arc<Shared>,
    cancel: CancelToken,
    reporter: Reporter,
    source: PathBuf,
    mode: LoadMode,
}

impl<K: GeometryKernel> Worker<K> {
    fn run(mut self) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute()));
        let (result, snapshot) = match outcome {
            Ok(Ok((scene, snapshot))) => (Ok(scene), snapshot),
            Ok(Err(e)) => (Err(e), None),
            Err(payload) => {
                let msg = panic_message(payload.as_ref());
                error!("Load worker panicked: {}", msg);
                (Err(LoadError::Worker(msg)), None)
            }
        };

        match &result {
            Ok(scene) => {
                info!(
                    "Loaded {} from {:?}: {} node(s), {} mesh(es)",
                    self.source.display(),
                    scene.origin,
                    scene.tree.len(),
                    scene.meshes.len()
                );
                self.shared.set_state(if snapshot.is_some() {
                    LoadState::Persisting
                } else {
                    LoadState::Done
                });
                self.reporter.progress(100, Stage::Done);
            }
            Err(LoadError::Cancelled) => {
                info!("Load of {} cancelled", self.source.display());
                self.shared.set_state(LoadState::Cancelled);
            }
            Err(e) => {
                error!("Load of {} failed: {}", self.source.display(), e);
                self.shared.set_state(LoadState::Failed);
            }
        }

        self.shared.busy.store(false, Ordering::SeqCst);
        let _ = self.reporter.events.send(LoadEvent::Finished(result));

        if let Some(snapshot) = snapshot {
            match self.cache.save(&snapshot.key, &snapshot.tree, &snapshot.meshes) {
                Ok(report) if report.meshes_failed > 0 => {
                    warn!("Cache entry {} saved with {} missing mesh file(s)", snapshot.key.stem(), report.meshes_failed);
                }
                Ok(_) => {}
                Err(e) => warn!("Could not persist cache entry {}: {}", snapshot.key.stem(), e),
            }
            self.shared.set_state(LoadState::Done);
        }
    }

    fn check_cancel(&self) -> Result<(), LoadError> {
        if self.cancel.is_cancelled() {
            Err(LoadError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn execute(&mut self) -> Result<(LoadedScene, Option<Snapshot>), LoadError> {
        let source = self.source.clone();
        if !source.is_file() {
            return Err(LoadError::SourceNotFound(source));
        }
        let key = match self.cache.cache_key(&source) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("No cache key for {}: {}", source.display(), e);
                None
            }
        };
        let mut report = LoadReport::new();

        if self.mode == LoadMode::CacheAware {
            self.shared.set_state(LoadState::CheckingCache);
            self.reporter.progress(2, Stage::CheckingCache);
            if let Some(key) = key.as_ref().filter(|k| self.cache.is_valid(k, &source)) {
                self.shared.set_state(LoadState::CacheHit);
                info!("Cache hit for {} ({})", source.display(), key.stem());
                self.reporter.progress(10, Stage::LoadingCache);
                self.shared.set_state(LoadState::Reconstructing);
                match self.cache.load(key) {
                    Ok(cached) => {
                        self.check_cancel()?;
                        report.extend(cached.report);
                        let scene = LoadedScene {
                            tree: cached.tree,
                            meshes: cached.meshes,
                            origin: SceneOrigin::Cache,
                            report,
                            source,
                        };
                        return Ok((scene, None));
                    }
                    Err(e) => {
                        warn!("Cache entry {} is corrupt, loading from source: {}", key.stem(), e);
                        report.push(DegradationKind::CacheCorrupt, None, e.to_string());
                    }
                }
            }
            self.shared.set_state(LoadState::CacheMiss);
            debug!("Cache miss for {}", source.display());
        }

        self.check_cancel()?;
        self.shared.set_state(LoadState::Traversing);
        self.reporter.progress(10, Stage::ReadingContainer);
        let kernel = Arc::clone(&self.kernel);
        if !kernel.is_available() {
            return Err(LoadError::KernelUnavailable);
        }
        let container = match panic::catch_unwind(AssertUnwindSafe(|| kernel.read(&source))) {
            Ok(result) => result.map_err(LoadError::from)?,
            Err(payload) => {
                return Err(LoadError::KernelReadFailure(panic_message(payload.as_ref())));
            }
        };

        self.check_cancel()?;
        self.reporter.progress(25, Stage::ExtractingGeometry);
        let document = match panic::catch_unwind(AssertUnwindSafe(|| kernel.transfer(container))) {
            Ok(result) => result.map_err(LoadError::from)?,
            Err(payload) => {
                return Err(LoadError::KernelTransferFailure(panic_message(payload.as_ref())));
            }
        };

        self.check_cancel()?;
        self.reporter.progress(35, Stage::BuildingTree);
        let root_name = key
            .as_ref()
            .map(|k| k.base_name().to_string())
            .or_else(|| source.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "scene".to_string());

        let shared = Arc::clone(&self.shared);
        let reporter = &mut self.reporter;
        let built = AssemblyTraversal::new(kernel.as_ref())
            .with_config(&self.config)
            .with_cancel_token(self.cancel.clone())
            .build_with_progress(&document, &root_name, |p: TraversalProgress| match p.phase {
                Phase::Walking => {
                    reporter.progress(scaled(35, 25, p.done, p.total), Stage::BuildingTree);
                }
                Phase::Tessellating => {
                    shared.set_state(LoadState::Tessellating);
                    reporter.progress(scaled(60, 35, p.done, p.total), Stage::GeneratingMesh);
                }
            })?;
        drop(document);

        self.check_cancel()?;
        self.reporter.progress(97, Stage::ConvertingFormat);
        report.extend(built.report);

        let snapshot = if self.config.persist_cache() {
            key.map(|key| Snapshot {
                key,
                tree: built.tree.clone(),
                meshes: built.meshes.clone(),
            })
        } else {
            None
        };
        let scene = LoadedScene {
            tree: built.tree,
            meshes: built.meshes,
            origin: SceneOrigin::Kernel,
            report,
            source,
        };
        Ok((scene, snapshot))
    }
}
