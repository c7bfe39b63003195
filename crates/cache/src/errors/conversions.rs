//! Error conversion utilities

use super::types::{CacheError, RecoveryHint, SerializationOp};
use std::path::PathBuf;

impl From<std::io::Error> for CacheError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::OutOfMemory => Self::out_of_memory(0),
            _ => Self::Io {
                path: PathBuf::from("."),
                operation: "unknown",
                source: error,
                recovery_hint: RecoveryHint::UseOriginalSource,
            },
        }
    }
}

/// Convert serde_json errors to cache errors
impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization {
            context: "configuration".to_string(),
            operation: SerializationOp::Deserialize,
            source: Box::new(error),
            recovery_hint: RecoveryHint::Custom("Check JSON format and data types".to_string()),
        }
    }
}

impl From<std::collections::TryReserveError> for CacheError {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::out_of_memory(0)
    }
}
