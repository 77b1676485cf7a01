//! Error Module - MGC Error Types
//!
//! Defines all error types used by the collector.
//!
//! # Error Categories
//!
//! ## Fatal Errors
//! - `HeapInitialization` - The initial major heap could not be obtained
//! - `OutOfMemory` - The heap could not be extended for an allocation
//! - `PageTable` - The address-range index could not record a chunk
//! - `GrayStackAllocation` - The gray worklist could not be created
//! - `HeapCorruption` - A heap check found an inconsistency
//!
//! ## Configuration Errors
//! - `Configuration` - Invalid configuration (including an inverted lifetime range)
//!
//! ## Caller Errors
//! - `InvalidArgument` - Argument outside the accepted range
//! - `InvalidState` - Operation requested in the wrong collector phase
//!
//! ## Report Errors
//! - `Report` - A report destination could not be written

use crate::config::ConfigError;
use thiserror::Error;

/// Main error type for all collector operations
///
/// # Examples
///
/// ```rust
/// use mgc::error::MgcError;
///
/// fn handle_error(err: MgcError) {
///     if err.is_fatal() {
///         eprintln!("fatal: {}", err);
///         std::process::abort();
///     }
///     eprintln!("recoverable: {}", err);
/// }
/// ```
#[derive(Debug, Error)]
pub enum MgcError {
    /// The major heap could not be extended
    ///
    /// **When returned:** The free list cannot satisfy an allocation and the
    /// OS refuses a new chunk
    ///
    /// **Recovery strategy:** Cannot recover - the mutator cannot make progress
    #[error("Out of memory: cannot extend the major heap by {requested_words} words")]
    OutOfMemory { requested_words: usize },

    /// Heap initialization failed
    ///
    /// **When returned:** The first chunk of the major heap cannot be mapped
    ///
    /// **Recovery strategy:** Cannot recover - terminate
    #[error("Heap initialization failed: {0}")]
    HeapInitialization(String),

    /// The address-range index could not record a chunk
    ///
    /// **When returned:** Growing the page table fails while adding a chunk
    ///
    /// **Recovery strategy:** Cannot recover - terminate
    #[error("Page table registration failed: {0}")]
    PageTable(String),

    /// Gray worklist could not be allocated
    ///
    /// **When returned:** The initial worklist reservation fails at startup
    ///
    /// **Recovery strategy:** Cannot recover - terminate. Growth failures later
    /// on are not errors: they degrade to the heap-order scan.
    #[error("Not enough memory for the gray worklist ({entries} entries)")]
    GrayStackAllocation { entries: usize },

    /// A heap check found an inconsistency
    ///
    /// **When returned:** `check_heap` finds a block that does not tile its
    /// chunk, a dangling reference or a broken tri-color invariant
    ///
    /// **Recovery strategy:** Cannot recover - the heap can no longer be trusted
    #[error("Heap corruption: {0}")]
    HeapCorruption(String),

    /// Invalid configuration
    ///
    /// **When returned:** `GcConfig::validate` rejects the configuration
    ///
    /// **Recovery strategy:** Fix the configuration. An inverted lifetime
    /// range is treated as fatal by the runtime.
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// Invalid argument
    ///
    /// **When returned:** A size, window or field index is out of range
    ///
    /// **Recovery strategy:** Fix the caller
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted in the wrong phase
    ///
    /// **When returned:** A slice entry point is called outside its phase
    ///
    /// **Recovery strategy:** Drive the collector through `major_slice`
    #[error("Invalid state: expected {expected}, actual {actual}")]
    InvalidState { expected: String, actual: String },

    /// A report could not be written
    ///
    /// **When returned:** Opening or writing a report destination fails
    ///
    /// **Recovery strategy:** Log and continue; no collector state is affected
    #[error("Cannot write report '{path}': {source}")]
    Report {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl MgcError {
    /// Whether the runtime must abort the process on this error
    pub fn is_fatal(&self) -> bool {
        match self {
            MgcError::OutOfMemory { .. }
            | MgcError::HeapInitialization(_)
            | MgcError::PageTable(_)
            | MgcError::GrayStackAllocation { .. }
            | MgcError::HeapCorruption(_) => true,
            MgcError::Configuration(err) => err.is_fatal(),
            MgcError::InvalidArgument(_)
            | MgcError::InvalidState { .. }
            | MgcError::Report { .. } => false,
        }
    }

    /// Whether the caller can carry on after logging this error
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    /// Whether this error indicates a misuse of the API rather than resource exhaustion
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            MgcError::InvalidArgument(_) | MgcError::InvalidState { .. }
        )
    }
}

/// Result type alias for collector operations
pub type Result<T> = std::result::Result<T, MgcError>;
