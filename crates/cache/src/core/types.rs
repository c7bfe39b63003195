//! Core cache types and structures

use crate::backend::{BackingFile, BackingFs, FileId};
use crate::config::CacheConfig;
use crate::errors::{CacheError, Result};
use crate::eviction::EvictionPolicy;
use crate::object::{ActiveIndex, AuxValidator, CacheObject};
use crate::page::{Mapping, Page};
use crate::space::CapacityGate;
use crate::workqueue::WorkQueue;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::internal::CacheStats;

/// Handle on a running cache
#[derive(Clone)]
pub struct Cache {
    pub(super) inner: Arc<CacheInner>,
}

pub(crate) struct CacheInner {
    /// Configuration
    pub config: CacheConfig,
    /// Backing filesystem
    pub backend: Arc<dyn BackingFs>,
    /// Admission control
    pub gate: CapacityGate,
    /// Objects currently in use, by backing file identity
    pub active: ActiveIndex,
    /// Per-path locks serialising lookups of the same entry
    pub in_flight: DashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>,
    /// Unused objects in the order they should be culled
    pub cull_candidates: Box<dyn EvictionPolicy>,
    /// Backing page caches, shared by backing file identity
    pub mappings: DashMap<FileId, Weak<Mapping>>,
    /// Judge of auxiliary data found on disk
    pub validator: Arc<dyn AuxValidator>,
    /// Copier queue
    pub work_queue: WorkQueue,
    /// Statistics
    pub stats: CacheStats,
    /// Runtime used for blocking backing I/O started outside async code
    pub runtime: Handle,
    /// The top-level index object
    pub root: Arc<CacheObject>,
    /// Set once the cache has been withdrawn
    pub dead: AtomicBool,
    pub next_object_id: AtomicU64,
    pub next_op_id: AtomicU64,
    /// Background culler task handle
    pub cull_handle: RwLock<Option<JoinHandle<()>>>,
    /// Copier worker task handles
    pub worker_handles: RwLock<Vec<JoinHandle<()>>>,
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        if let Some(handle) = self.cull_handle.write().take() {
            handle.abort();
        }
        for handle in self.worker_handles.write().drain(..) {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("tag", &self.inner.config.tag)
            .field("active_objects", &self.inner.active.len())
            .field("culling", &self.inner.gate.is_culling())
            .field("dead", &self.inner.is_dead())
            .finish()
    }
}

impl CacheInner {
    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    /// Stop accepting work
    pub fn withdraw(&self, reason: &str) {
        if !self.dead.swap(true, Ordering::AcqRel) {
            tracing::error!("Cache {} withdrawn: {}", self.config.tag, reason);
        }
    }

    /// Log and count a backing filesystem error, returning it as a cache error
    pub fn io_error(&self, path: &Path, operation: &'static str, source: io::Error) -> CacheError {
        tracing::error!(
            "I/O error on backing file {} during {}: {}",
            path.display(),
            operation,
            source
        );
        let count = self.stats.record_io_error();
        let limit = u64::from(self.config.io_error_limit);
        if limit > 0 && count >= limit {
            self.withdraw("too many backing filesystem errors");
        }
        CacheError::io(path, operation, source)
    }

    pub fn next_object_id(&self) -> u64 {
        self.next_object_id.fetch_add(1, Ordering::Relaxed)
    }

    /// The page cache of backing file `id`, creating it if nobody holds one
    pub fn backing_mapping(&self, id: FileId) -> Arc<Mapping> {
        let mut entry = self.mappings.entry(id).or_default();
        if let Some(mapping) = entry.upgrade() {
            return mapping;
        }
        let mapping = Mapping::with_capacity(Some(id), self.config.backing_pages_per_file);
        *entry = Arc::downgrade(&mapping);
        mapping
    }

    /// Forget backing page caches nobody uses any more
    pub fn prune_mappings(&self) {
        self.mappings.retain(|_, mapping| mapping.strong_count() > 0);
    }

    /// Read `page` from `file` on the blocking pool and unlock it when done
    ///
    /// The caller must hold the page lock.
    pub fn issue_read(&self, file: &Arc<dyn BackingFile>, page: &Arc<Page>) {
        let file = Arc::clone(file);
        let page = Arc::clone(page);
        self.runtime.spawn_blocking(move || {
            let result = {
                let mut data = page.data_mut();
                file.read_page(page.index(), &mut data)
            };
            match result {
                Ok(()) => {
                    page.clear_error();
                    page.set_uptodate();
                }
                Err(e) => {
                    tracing::warn!("Read of backing page {} failed: {}", page.index(), e);
                    page.set_error();
                }
            }
            page.unlock();
        });
    }

    pub fn has_space(&self, fnr: u64, bnr: u64) -> Result<()> {
        self.gate.has_space(&*self.backend, fnr, bnr)
    }
}
