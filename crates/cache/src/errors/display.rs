//! Display implementations for cache errors

use super::types::CacheError;
use std::fmt;

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotSupported { reason, .. } => write!(f, "Operation not supported: {reason}"),
            Self::NoBuffers { reason, .. } => write!(f, "No cache buffers available: {reason}"),
            Self::NoData { index, .. } => write!(f, "No cached data for page {index}"),
            Self::Io {
                path,
                operation,
                source,
                ..
            } => write!(
                f,
                "I/O error during {} on '{}': {}",
                operation,
                path.display(),
                source
            ),
            Self::OutOfMemory {
                requested_bytes, ..
            } => write!(f, "Out of memory allocating {requested_bytes} bytes"),
            Self::InvalidKey { length, reason, .. } => {
                write!(f, "Invalid cache key of {length} bytes: {reason}")
            }
            Self::NotFound { path, .. } => write!(f, "Cache object '{}' not found", path.display()),
            Self::Busy { path, .. } => write!(f, "Cache object '{}' is busy", path.display()),
            Self::Configuration { message, .. } => {
                write!(f, "Cache configuration error: {message}")
            }
            Self::Serialization {
                context,
                operation,
                source,
                ..
            } => write!(f, "Failed to {operation:?} {context}: {source}"),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Serialization { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}
