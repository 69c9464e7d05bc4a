//! Recovered degradations of a load
//!
//! Failures below the document level never abort a load. Each one is logged
//! where it happens and recorded here, so a caller can tell a clean load from
//! one where some nodes came back without geometry.

use std::fmt;

use crate::model::NodeId;

/// Kind of locally recovered failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DegradationKind {
    /// Processing one label failed or panicked; the label was dropped
    PerNodeFailure,
    /// A Part's tessellation failed, panicked or produced no triangles
    TessellationFailure,
    /// A subtree below the depth limit was truncated
    MaxDepthExceeded,
    /// A label matched the caller's skip rules
    SkippedByRule,
    /// A label already on the current path was not revisited
    CycleBroken,
    /// The structure file was unreadable; the load fell back to the kernel
    CacheCorrupt,
    /// A Part's mesh file was missing or unreadable
    CachePartialMiss,
}

impl fmt::Display for DegradationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DegradationKind::PerNodeFailure => "per-node failure",
            DegradationKind::TessellationFailure => "tessellation failure",
            DegradationKind::MaxDepthExceeded => "max depth exceeded",
            DegradationKind::SkippedByRule => "skipped by rule",
            DegradationKind::CycleBroken => "cycle broken",
            DegradationKind::CacheCorrupt => "cache corrupt",
            DegradationKind::CachePartialMiss => "cache partial miss",
        };
        f.write_str(s)
    }
}

/// One recovered failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Degradation {
    /// What went wrong
    pub kind: DegradationKind,
    /// Node affected, when one exists in the final tree
    pub node: Option<NodeId>,
    /// Human-readable context (label entry, error message, file name)
    pub detail: String,
}

/// Every degradation recorded during one load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    entries: Vec<Degradation>,
}

impl LoadReport {
    /// Create an empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a degradation
    pub fn push(&mut self, kind: DegradationKind, node: Option<NodeId>, detail: impl Into<String>) {
        self.entries.push(Degradation {
            kind,
            node,
            detail: detail.into(),
        });
    }

    /// Append all entries of `other`
    pub fn extend(&mut self, other: LoadReport) {
        self.entries.extend(other.entries);
    }

    /// All entries in the order they were recorded
    pub fn entries(&self) -> &[Degradation] {
        &self.entries
    }

    /// Number of entries of `kind`
    pub fn count(&self, kind: DegradationKind) -> usize {
        self.entries.iter().filter(|d| d.kind == kind).count()
    }

    /// True when nothing was degraded
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }
}
