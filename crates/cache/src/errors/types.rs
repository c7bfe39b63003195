//! Core error types for the cache engine

use std::path::PathBuf;

/// Result type for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;

/// Re-export CacheError as Error for convenience
pub use CacheError as Error;

/// Error type for cache operations
#[derive(Debug)]
pub enum CacheError {
    /// The backing filesystem cannot be used for this operation, for example
    /// because its block size exceeds the page size
    NotSupported {
        reason: String,
        recovery_hint: RecoveryHint,
    },

    /// Admission was denied or the cache cannot store the page
    NoBuffers {
        reason: &'static str,
        recovery_hint: RecoveryHint,
    },

    /// The cache holds no data for this page
    NoData {
        index: u64,
        recovery_hint: RecoveryHint,
    },

    /// I/O errors against the backing filesystem
    Io {
        path: PathBuf,
        operation: &'static str,
        source: std::io::Error,
        recovery_hint: RecoveryHint,
    },

    /// An allocation could not be satisfied
    OutOfMemory {
        requested_bytes: usize,
        recovery_hint: RecoveryHint,
    },

    /// Invalid raw cache key
    InvalidKey {
        length: usize,
        reason: String,
        recovery_hint: RecoveryHint,
    },

    /// Object or parent not found
    NotFound {
        path: PathBuf,
        recovery_hint: RecoveryHint,
    },

    /// The backing entry is bound to an object that is going away, or is in use
    Busy {
        path: PathBuf,
        recovery_hint: RecoveryHint,
    },

    /// Configuration error
    Configuration {
        message: String,
        recovery_hint: RecoveryHint,
    },

    /// Serialization/deserialization errors
    Serialization {
        context: String,
        operation: SerializationOp,
        source: Box<dyn std::error::Error + Send + Sync>,
        recovery_hint: RecoveryHint,
    },
}

/// Recovery hints for error handling
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryHint {
    /// Fetch the data from the original source instead of the cache
    UseOriginalSource,

    /// Fetch from the original source, then write the page into the cache
    FetchAndStore,

    /// Retry the operation once the conflicting object has gone away
    RetryLater,

    /// Let the culler free space, then retry
    RunEviction,

    /// Check file permissions
    CheckPermissions { path: PathBuf },

    /// Check disk space and clean up if needed
    CheckDiskSpace,

    /// Update cache configuration
    UpdateConfiguration,

    /// Fix the calling code
    FixCaller,

    /// Contact system administrator
    ContactAdmin,

    /// Custom recovery action
    Custom(String),
}

/// Serialization operation types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializationOp {
    Serialize,
    Deserialize,
}

impl CacheError {
    /// Capacity gate denial or an unusable object
    pub fn no_buffers(reason: &'static str) -> Self {
        Self::NoBuffers {
            reason,
            recovery_hint: RecoveryHint::UseOriginalSource,
        }
    }

    /// Cache miss for the page at `index`
    pub fn no_data(index: u64) -> Self {
        Self::NoData {
            index,
            recovery_hint: RecoveryHint::FetchAndStore,
        }
    }

    /// I/O failure with the path and operation it happened on
    pub fn io(path: impl Into<PathBuf>, operation: &'static str, source: std::io::Error) -> Self {
        let path = path.into();
        let recovery_hint = match source.kind() {
            std::io::ErrorKind::PermissionDenied => RecoveryHint::CheckPermissions { path: path.clone() },
            _ => RecoveryHint::UseOriginalSource,
        };
        Self::Io {
            path,
            operation,
            source,
            recovery_hint,
        }
    }

    /// Allocation failure
    pub fn out_of_memory(requested_bytes: usize) -> Self {
        Self::OutOfMemory {
            requested_bytes,
            recovery_hint: RecoveryHint::UseOriginalSource,
        }
    }

    /// Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            recovery_hint: RecoveryHint::UpdateConfiguration,
        }
    }
}
