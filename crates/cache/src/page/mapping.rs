//! Per-file page cache

use super::Page;
use crate::backend::FileId;
use lru::LruCache;
use parking_lot::Mutex;
use std::sync::Arc;

/// Pages of one file indexed by page number, in LRU order
///
/// Backing mappings are shared by every object bound to the same backing
/// file. When the page count exceeds the capacity the least recently used
/// unlocked pages are dropped. Dropped and truncated pages are detached so a
/// holder can tell that its page no longer represents the file.
pub struct Mapping {
    id: Option<FileId>,
    capacity: usize,
    pages: Mutex<LruCache<u64, Arc<Page>>>,
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapping")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("pages", &self.len())
            .finish()
    }
}

impl Mapping {
    /// An unbounded mapping, as used for destination page caches
    pub fn new() -> Arc<Self> {
        Self::with_capacity(None, 0)
    }

    /// A mapping for backing file `id` holding at most `capacity` pages
    /// (zero for unbounded)
    pub fn with_capacity(id: Option<FileId>, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            capacity,
            pages: Mutex::new(LruCache::unbounded()),
        })
    }

    pub fn file_id(&self) -> Option<FileId> {
        self.id
    }

    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look a page up and mark it recently used
    pub fn find(&self, index: u64) -> Option<Arc<Page>> {
        self.pages.lock().get(&index).cloned()
    }

    /// Insert `page`, or hand back the page already present at its index
    pub fn add(&self, page: Arc<Page>) -> Result<(), Arc<Page>> {
        let mut pages = self.pages.lock();
        if let Some(existing) = pages.get(&page.index()) {
            return Err(Arc::clone(existing));
        }
        page.set_attached(true);
        pages.put(page.index(), page);

        if self.capacity > 0 {
            while pages.len() > self.capacity {
                let victim = pages
                    .iter()
                    .rev()
                    .find(|(_, p)| !p.is_locked())
                    .map(|(&index, _)| index);
                let Some(index) = victim else {
                    break;
                };
                if let Some(evicted) = pages.pop(&index) {
                    evicted.set_attached(false);
                }
            }
        }
        Ok(())
    }

    /// Whether `page` is the page currently cached at its index
    pub fn contains(&self, page: &Arc<Page>) -> bool {
        self.pages
            .lock()
            .peek(&page.index())
            .is_some_and(|p| Arc::ptr_eq(p, page))
    }

    /// Drop the page at `index`
    pub fn remove(&self, index: u64) -> Option<Arc<Page>> {
        let page = self.pages.lock().pop(&index)?;
        page.set_attached(false);
        Some(page)
    }

    /// Drop every page at or beyond `from_index`
    pub fn truncate(&self, from_index: u64) -> usize {
        let mut pages = self.pages.lock();
        let doomed: Vec<u64> = pages
            .iter()
            .map(|(&index, _)| index)
            .filter(|&index| index >= from_index)
            .collect();
        for index in &doomed {
            if let Some(page) = pages.pop(index) {
                page.set_attached(false);
            }
        }
        doomed.len()
    }
}
