//! LRU (Least Recently Used) eviction policy implementation

use crate::eviction::traits::EvictionPolicy;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// LRU (Least Recently Used) eviction policy
#[derive(Default)]
pub struct LruPolicy {
    /// Access order tracking, least recent first
    access_order: Mutex<VecDeque<PathBuf>>,
    /// Size tracking
    sizes: DashMap<PathBuf, u64>,
    /// Total tracked size
    total_size: AtomicU64,
}

impl LruPolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EvictionPolicy for LruPolicy {
    fn on_access(&self, key: &Path, size: u64) {
        if !self.sizes.contains_key(key) {
            self.on_insert(key, size);
            return;
        }

        let mut order = self.access_order.lock();
        order.retain(|k| k != key);
        order.push_back(key.to_path_buf());
    }

    fn on_insert(&self, key: &Path, size: u64) {
        if let Some(old) = self.sizes.insert(key.to_path_buf(), size) {
            self.total_size.fetch_sub(old, Ordering::AcqRel);
        }
        self.total_size.fetch_add(size, Ordering::AcqRel);

        let mut order = self.access_order.lock();
        order.retain(|k| k != key);
        order.push_back(key.to_path_buf());
    }

    fn on_remove(&self, key: &Path) {
        if let Some((_, size)) = self.sizes.remove(key) {
            self.total_size.fetch_sub(size, Ordering::AcqRel);
        }

        self.access_order.lock().retain(|k| k != key);
    }

    fn next_eviction(&self) -> Option<PathBuf> {
        self.access_order.lock().front().cloned()
    }

    fn len(&self) -> usize {
        self.sizes.len()
    }

    fn clear(&self) {
        self.sizes.clear();
        self.total_size.store(0, Ordering::Release);
        self.access_order.lock().clear();
    }

    fn tracked_size(&self) -> u64 {
        self.total_size.load(Ordering::Acquire)
    }
}
