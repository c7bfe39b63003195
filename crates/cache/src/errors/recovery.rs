//! Recovery utilities for cache errors

use super::types::{CacheError, RecoveryHint};

impl CacheError {
    /// Get the recovery hint for this error
    #[must_use]
    pub const fn recovery_hint(&self) -> &RecoveryHint {
        match self {
            Self::NotSupported { recovery_hint, .. }
            | Self::NoBuffers { recovery_hint, .. }
            | Self::NoData { recovery_hint, .. }
            | Self::Io { recovery_hint, .. }
            | Self::OutOfMemory { recovery_hint, .. }
            | Self::InvalidKey { recovery_hint, .. }
            | Self::NotFound { recovery_hint, .. }
            | Self::Busy { recovery_hint, .. }
            | Self::Configuration { recovery_hint, .. }
            | Self::Serialization { recovery_hint, .. } => recovery_hint,
        }
    }

    /// Check if this error is transient and can be retried
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self.recovery_hint(),
            RecoveryHint::RetryLater | RecoveryHint::RunEviction
        )
    }

    /// Check if the caller should simply fall back to the original data source
    #[must_use]
    pub const fn is_cache_miss(&self) -> bool {
        matches!(
            self,
            Self::NoData { .. }
                | Self::NoBuffers { .. }
                | Self::OutOfMemory { .. }
                | Self::NotSupported { .. }
                | Self::Io { .. }
        )
    }

    /// Collapse a write-side failure into "cannot cache this page"
    #[must_use]
    pub fn into_no_buffers(self) -> Self {
        match self {
            Self::Io { .. } => Self::no_buffers("write to backing file failed"),
            other => other,
        }
    }
}
