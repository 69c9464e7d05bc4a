//! Load configuration

use std::path::{Path, PathBuf};

use crate::traversal::{Classifier, SkipRules};

/// Default bound on node depth below the synthetic root
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Default tessellation deviation in model units
pub const DEFAULT_MAX_DEVIATION: f64 = 0.5;

/// Default number of work items between cancellation polls
pub const DEFAULT_POLL_INTERVAL: usize = 5;

/// Environment variable overriding the cache directory in [`LoadConfig::from_env`]
pub const CACHE_DIR_ENV: &str = "CADSCENE_CACHE_DIR";

/// Configuration for a [`LoadPipeline`](crate::pipeline::LoadPipeline)
///
/// Built with `new()` and chained `with_*` calls. Each load clones the
/// configuration into its worker, so changing it never affects a load that
/// is already running.
///
/// # Example
///
/// ```
/// use cadscene::{LoadConfig, SkipRules};
///
/// let config = LoadConfig::new()
///     .with_cache_dir("/var/cache/cadscene")
///     .with_max_depth(40)
///     .with_skip_rules(SkipRules::new().with_position(3, 13));
/// assert_eq!(config.max_depth(), 40);
/// ```
#[derive(Debug, Clone)]
pub struct LoadConfig {
    cache_dir: PathBuf,
    max_depth: usize,
    max_deviation: f64,
    skip_rules: SkipRules,
    classifier: Classifier,
    poll_interval: usize,
    persist_cache: bool,
}

impl LoadConfig {
    /// Defaults: cache under the system temp dir, depth 100, deviation 0.5
    pub fn new() -> Self {
        Self {
            cache_dir: std::env::temp_dir().join("cadscene-cache"),
            max_depth: DEFAULT_MAX_DEPTH,
            max_deviation: DEFAULT_MAX_DEVIATION,
            skip_rules: SkipRules::new(),
            classifier: Classifier::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            persist_cache: true,
        }
    }

    /// Defaults, with the cache directory taken from `CADSCENE_CACHE_DIR` when set
    pub fn from_env() -> Self {
        match std::env::var_os(CACHE_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::new().with_cache_dir(PathBuf::from(dir)),
            _ => Self::new(),
        }
    }

    /// Directory holding structure and mesh files
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Deepest level a node may occupy
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Tessellation deviation passed to the kernel
    pub fn with_max_deviation(mut self, max_deviation: f64) -> Self {
        self.max_deviation = max_deviation;
        self
    }

    /// Positions the traversal must skip
    pub fn with_skip_rules(mut self, skip_rules: SkipRules) -> Self {
        self.skip_rules = skip_rules;
        self
    }

    /// Assembly/Part classification rules
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Work items between cancellation polls; zero is treated as one
    pub fn with_poll_interval(mut self, poll_interval: usize) -> Self {
        self.poll_interval = poll_interval.max(1);
        self
    }

    /// Whether kernel loads are written back to the cache
    pub fn with_persist_cache(mut self, persist: bool) -> Self {
        self.persist_cache = persist;
        self
    }

    /// Cache directory
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Depth bound
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Tessellation deviation
    pub fn max_deviation(&self) -> f64 {
        self.max_deviation
    }

    /// Skip rules
    pub fn skip_rules(&self) -> &SkipRules {
        &self.skip_rules
    }

    /// Classifier
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Cancellation poll cadence
    pub fn poll_interval(&self) -> usize {
        self.poll_interval
    }

    /// Whether results are persisted
    pub fn persist_cache(&self) -> bool {
        self.persist_cache
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self::new()
    }
}
