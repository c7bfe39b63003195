//! Core eviction policy trait definition

use std::path::{Path, PathBuf};

/// Eviction policy trait
pub trait EvictionPolicy: Send + Sync {
    /// Record use of an entry, making it the last to be evicted
    fn on_access(&self, key: &Path, size: u64);

    /// Record a new entry
    fn on_insert(&self, key: &Path, size: u64);

    /// Forget an entry
    fn on_remove(&self, key: &Path);

    /// Next entry to evict, without removing it
    fn next_eviction(&self) -> Option<PathBuf>;

    /// Number of tracked entries
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all tracking data
    fn clear(&self);

    /// Total size of the tracked entries
    fn tracked_size(&self) -> u64;
}
