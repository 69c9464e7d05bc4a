//! Caller-controlled skip policy

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Predicate deciding whether `(level, sibling_index)` is skipped
pub type SkipPredicate = Arc<dyn Fn(usize, usize) -> bool + Send + Sync>;

/// Positions the traversal must never visit
///
/// Some documents contain a specific component that takes the kernel down
/// with no error signal at all; naming its position is the only safe way
/// around it. A position is the level the node would occupy (free shapes are
/// level 1) and its 0-based index among its siblings.
///
/// # Example
///
/// ```
/// use cadscene::SkipRules;
///
/// let rules = SkipRules::new()
///     .with_position(3, 13)
///     .with_predicate(|level, index| level > 8 && index > 500);
/// assert!(rules.should_skip(3, 13));
/// assert!(!rules.should_skip(3, 12));
/// assert!(rules.should_skip(9, 501));
/// ```
#[derive(Clone, Default)]
pub struct SkipRules {
    positions: HashSet<(usize, usize)>,
    predicate: Option<SkipPredicate>,
}

impl SkipRules {
    /// Rules that skip nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Skip the node at `level`, `sibling_index`
    pub fn with_position(mut self, level: usize, sibling_index: usize) -> Self {
        self.positions.insert((level, sibling_index));
        self
    }

    /// Additionally skip every position the predicate accepts
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(usize, usize) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Whether the node at this position must be skipped
    pub fn should_skip(&self, level: usize, sibling_index: usize) -> bool {
        self.positions.contains(&(level, sibling_index))
            || self
                .predicate
                .as_ref()
                .is_some_and(|p| p(level, sibling_index))
    }

    /// True when no position and no predicate is configured
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.predicate.is_none()
    }
}

impl fmt::Debug for SkipRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkipRules")
            .field("positions", &self.positions)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .finish()
    }
}
