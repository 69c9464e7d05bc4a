//! Error types for scene extraction and caching
//!
//! This module provides the error enums used across the crate. All errors
//! carry an error code for categorization plus enough context to tell where
//! a load went wrong.
//!
//! # Error Codes
//!
//! Error codes follow the pattern: `E<category><number>`
//!
//! Categories:
//! - **E1xxx**: I/O and archive errors
//! - **E2xxx**: XML parsing and structure errors
//! - **E3xxx**: Cache content errors
//! - **E5xxx**: Geometry kernel errors
//! - **E6xxx**: Traversal errors
//! - **E7xxx**: Load pipeline errors
//!
//! ## Common Error Codes
//!
//! - `E1001`: I/O error reading or writing a cache file
//! - `E1002`: ZIP archive format error in a mesh file
//! - `E1003`: Missing required file in the cache
//! - `E2001`: XML parsing error
//! - `E2003`: Invalid XML structure
//! - `E3001`: Corrupt cache structure
//! - `E3003`: Cache format version mismatch
//! - `E5001`: Kernel could not read a source document
//! - `E6002`: Document has no free shapes
//! - `E7007`: A load is already in flight

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Errors raised while reading or writing the on-disk scene cache
#[derive(Error, Debug)]
pub enum CacheError {
    /// IO error occurred while reading or writing a cache file
    ///
    /// **Error Code**: E1001
    ///
    /// **Common Causes**:
    /// - Cache directory not writable
    /// - Source file removed between key derivation and load
    #[error("[E1001] I/O error: {0}")]
    Io(#[from] io::Error),

    /// ZIP archive error inside a mesh file
    ///
    /// **Error Code**: E1002
    #[error("[E1002] ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Missing required file in the cache
    ///
    /// **Error Code**: E1003
    #[error("[E1003] Missing required file: {0}")]
    MissingFile(String),

    /// XML parsing error
    ///
    /// **Error Code**: E2001
    #[error("[E2001] XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// XML attribute error
    ///
    /// **Error Code**: E2002
    #[error("[E2002] XML attribute error: {0}")]
    XmlAttr(String),

    /// Invalid XML structure
    ///
    /// **Error Code**: E2003
    ///
    /// **Common Causes**:
    /// - Missing required attributes on `<node>` or `<vertex>`
    /// - Elements nested in the wrong order
    #[error("[E2003] Invalid XML structure: {0}")]
    InvalidXml(String),

    /// XML writing error
    ///
    /// **Error Code**: E2005
    #[error("[E2005] XML writing error: {0}")]
    XmlWrite(String),

    /// The structure file parsed but describes an inconsistent scene
    ///
    /// **Error Code**: E3001
    ///
    /// **Common Causes**:
    /// - Node count attribute does not match the nodes present
    /// - A Part node carrying children
    /// - Duplicate mesh identifiers
    ///
    /// **Suggestions**:
    /// - Delete the cache entry; the next load rebuilds it from the source
    #[error("[E3001] Corrupt cache: {0}")]
    Corrupt(String),

    /// Parse error for numeric values
    ///
    /// **Error Code**: E3002
    #[error("[E3002] Parse error: {0}")]
    ParseError(String),

    /// The cache was written by an incompatible format version
    ///
    /// **Error Code**: E3003
    #[error("[E3003] Cache version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Version this build reads and writes
        expected: String,
        /// Version recorded in the file
        found: String,
    },
}

impl From<std::num::ParseFloatError> for CacheError {
    fn from(err: std::num::ParseFloatError) -> Self {
        CacheError::ParseError(format!("Failed to parse floating-point number: {}", err))
    }
}

impl From<std::num::ParseIntError> for CacheError {
    fn from(err: std::num::ParseIntError) -> Self {
        CacheError::ParseError(format!("Failed to parse integer: {}", err))
    }
}

impl From<quick_xml::events::attributes::AttrError> for CacheError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        CacheError::XmlAttr(format!("Attribute parsing failed: {}", err))
    }
}

impl CacheError {
    /// Create an InvalidXml error for a missing required attribute
    ///
    /// # Arguments
    /// * `element` - The XML element name
    /// * `attribute` - The missing attribute name
    ///
    /// # Example
    /// ```ignore
    /// CacheError::missing_attribute("node", "name")
    /// ```
    pub fn missing_attribute(element: &str, attribute: &str) -> Self {
        CacheError::InvalidXml(format!(
            "Element '<{}>' is missing required attribute '{}'",
            element, attribute
        ))
    }

    /// Create a ParseError with context about what was being parsed
    ///
    /// # Arguments
    /// * `field_name` - The name of the field being parsed (e.g., "vertex x coordinate")
    /// * `value` - The value that failed to parse
    /// * `expected_type` - The expected type (e.g., "floating-point number")
    pub fn parse_error_with_context(field_name: &str, value: &str, expected_type: &str) -> Self {
        CacheError::ParseError(format!(
            "Failed to parse '{}': expected {}, got '{}'",
            field_name, expected_type, value
        ))
    }

    /// Create an XmlWrite error
    pub fn xml_write(message: String) -> Self {
        CacheError::XmlWrite(message)
    }
}

/// Errors reported by a [`GeometryKernel`](crate::kernel::GeometryKernel) implementation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// The container could not be opened or parsed
    ///
    /// **Error Code**: E5001
    #[error("[E5001] Kernel read failure: {0}")]
    Read(String),

    /// The container was read but its geometry could not be transferred
    ///
    /// **Error Code**: E5002
    #[error("[E5002] Kernel transfer failure: {0}")]
    Transfer(String),

    /// A shape could not be triangulated
    ///
    /// **Error Code**: E5003
    #[error("[E5003] Tessellation failure: {0}")]
    Tessellation(String),

    /// A document query failed for one label
    ///
    /// **Error Code**: E5004
    #[error("[E5004] Kernel query failure: {0}")]
    Query(String),
}

/// Document-level failures of [`AssemblyTraversal`](crate::traversal::AssemblyTraversal)
///
/// Everything below the document level is recovered locally and recorded in
/// the [`LoadReport`](crate::report::LoadReport) instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraversalError {
    /// **Error Code**: E6001
    #[error("[E6001] Geometry kernel unavailable")]
    KernelUnavailable,

    /// **Error Code**: E6002
    #[error("[E6002] Document has no free shapes")]
    EmptyDocument,

    /// **Error Code**: E6003
    #[error("[E6003] Traversal cancelled")]
    Cancelled,

    /// **Error Code**: E6004
    #[error("[E6004] Could not enumerate free shapes: {0}")]
    Extraction(String),
}

/// Terminal failures of a [`LoadPipeline`](crate::pipeline::LoadPipeline) load
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// **Error Code**: E7001
    #[error("[E7001] Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// **Error Code**: E7002
    #[error("[E7002] Could not read source document: {0}")]
    KernelReadFailure(String),

    /// **Error Code**: E7003
    #[error("[E7003] Could not extract geometry from source document: {0}")]
    KernelTransferFailure(String),

    /// **Error Code**: E7004
    #[error("[E7004] Geometry kernel unavailable")]
    KernelUnavailable,

    /// **Error Code**: E7005
    #[error("[E7005] Document has no free shapes")]
    EmptyDocument,

    /// **Error Code**: E7006
    #[error("[E7006] Load cancelled")]
    Cancelled,

    /// **Error Code**: E7007
    ///
    /// Returned synchronously by `load()`; loads are never queued.
    #[error("[E7007] A load is already in progress")]
    AlreadyLoading,

    /// The worker thread panicked or could not be spawned
    ///
    /// **Error Code**: E7008
    #[error("[E7008] Load worker failed: {0}")]
    Worker(String),
}

impl From<TraversalError> for LoadError {
    fn from(err: TraversalError) -> Self {
        match err {
            TraversalError::KernelUnavailable => LoadError::KernelUnavailable,
            TraversalError::EmptyDocument => LoadError::EmptyDocument,
            TraversalError::Cancelled => LoadError::Cancelled,
            TraversalError::Extraction(msg) => LoadError::KernelTransferFailure(msg),
        }
    }
}

impl From<KernelError> for LoadError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Read(msg) => LoadError::KernelReadFailure(msg),
            KernelError::Transfer(msg) => LoadError::KernelTransferFailure(msg),
            // Tessellation and query failures are per node; reaching here means
            // the document itself could not be interpreted.
            KernelError::Tessellation(msg) | KernelError::Query(msg) => {
                LoadError::KernelTransferFailure(msg)
            }
        }
    }
}
