//! Page retrieval
//!
//! A netfs page is served from the backing file when its block is mapped.
//! Holes mean the cache has nothing; if there is room, the page is admitted
//! for a later write and the caller is told to fetch it elsewhere.

use crate::backend::BackingFile;
use crate::errors::{CacheError, RecoveryHint, Result};
use crate::object::CacheObject;
use crate::page::{Mapping, Page, PAGE_SHIFT, PAGE_SIZE};
use crate::retrieval::{Completion, PagesOutcome, PagesStatus, ReadStatus, Retrieval};
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::super::types::{Cache, CacheInner};

/// The backing file of a retrieval's object, checked for use
pub(super) struct Backing {
    pub(super) file: Arc<dyn BackingFile>,
    pub(super) mapping: Arc<Mapping>,
    /// Converts a page index into a block number
    pub(super) shift: u32,
}

impl Cache {
    /// Start a retrieval against `object`
    ///
    /// `netfs_mapping` is the destination page cache for multi-page reads;
    /// `completion` is told about every page the cache takes on.
    pub fn new_retrieval(
        &self,
        object: &Arc<CacheObject>,
        netfs_mapping: Arc<Mapping>,
        completion: Completion,
    ) -> Arc<Retrieval> {
        Retrieval::new(
            self.inner.next_op_id.fetch_add(1, Ordering::Relaxed),
            Arc::clone(&self.inner),
            Arc::clone(object),
            netfs_mapping,
            completion,
        )
    }

    /// Read one page from the cache, or admit it for a later write
    ///
    /// `NoData` means the cache holds nothing for the page but has reserved
    /// room for it (the page is marked cached); `NoBuffers` means the cache
    /// cannot help at all. `Completed` pages have been filled already;
    /// `InProgress` pages are reported through the completion callback.
    pub fn read_or_alloc_page(&self, op: &Arc<Retrieval>, page: &Arc<Page>) -> Result<ReadStatus> {
        self.inner.stats.record_retrieval();
        let result = self
            .inner
            .backing(op)
            .and_then(|backing| self.inner.read_page(op, page, &backing));
        self.inner.account(&result);
        result
    }

    /// Read several pages
    ///
    /// Pages with mapped blocks are taken out of `pages`, added to the
    /// retrieval's netfs mapping and read like single pages; their errors go
    /// to the completion callback only. Pages left in `pages` are for the
    /// caller to fetch; when there is room they are marked cached.
    pub fn read_or_alloc_pages(
        &self,
        op: &Arc<Retrieval>,
        pages: &mut Vec<Arc<Page>>,
    ) -> Result<PagesOutcome> {
        self.inner.stats.record_retrieval();
        let backing = match self.inner.backing(op) {
            Ok(backing) => backing,
            Err(e) => {
                self.inner.account_error(&e);
                return Err(e);
            }
        };

        let space = self.inner.has_space(0, pages.len() as u64).is_ok();
        let netfs_mapping = Arc::clone(op.netfs_mapping());
        let mut remaining = Vec::new();
        let mut submitted = 0usize;

        for page in pages.drain(..) {
            let block = match backing.file.map_block(page.index() << backing.shift) {
                Ok(block) => block,
                Err(e) => {
                    self.inner.io_error(op.object().path(), "map backing block", e);
                    remaining.push(page);
                    continue;
                }
            };

            if block == 0 {
                if space {
                    page.mark_cached();
                }
                self.inner.stats.record_miss();
                remaining.push(page);
                continue;
            }

            if netfs_mapping.add(Arc::clone(&page)).is_err() {
                tracing::debug!("Page {} already in the netfs mapping, skipped", page.index());
                continue;
            }

            submitted += 1;
            if let Err(e) = self.inner.read_mapped(op, &page, &backing) {
                op.complete(&page, Err(e));
            }
        }

        let status = if remaining.is_empty() {
            PagesStatus::Submitted
        } else if space {
            PagesStatus::NoData
        } else {
            self.inner.stats.record_nobufs();
            PagesStatus::NoBuffers
        };
        let outcome = PagesOutcome {
            status,
            remaining: remaining.len(),
        };
        pages.extend(remaining);

        tracing::debug!(
            "Retrieval {}: {} pages submitted, {} left to the caller",
            op.debug_id(),
            submitted,
            outcome.remaining
        );
        Ok(outcome)
    }
}

impl CacheInner {
    pub(super) fn backing(&self, op: &Retrieval) -> Result<Backing> {
        if self.is_dead() {
            return Err(CacheError::no_buffers("cache is withdrawn"));
        }
        let object = op.object();
        let (Some(file), Some(mapping)) = (object.backing_file(), object.backing_mapping()) else {
            return Err(CacheError::no_buffers("object has no backing file"));
        };

        let block_size = file.block_size();
        if block_size == 0 || !block_size.is_power_of_two() || block_size as usize > PAGE_SIZE {
            return Err(CacheError::NotSupported {
                reason: format!(
                    "backing block size {block_size} does not fit the {PAGE_SIZE} byte page size"
                ),
                recovery_hint: RecoveryHint::UseOriginalSource,
            });
        }

        Ok(Backing {
            file: Arc::clone(file),
            mapping: Arc::clone(mapping),
            shift: PAGE_SHIFT - block_size.trailing_zeros(),
        })
    }

    fn read_page(&self, op: &Arc<Retrieval>, page: &Arc<Page>, backing: &Backing) -> Result<ReadStatus> {
        let block = backing
            .file
            .map_block(page.index() << backing.shift)
            .map_err(|e| self.io_error(op.object().path(), "map backing block", e))?;

        if block == 0 {
            self.has_space(0, 1)?;
            page.mark_cached();
            return Err(CacheError::no_data(page.index()));
        }

        self.read_mapped(op, page, backing)
    }

    /// Serve a page whose backing block is known to be mapped
    fn read_mapped(&self, op: &Arc<Retrieval>, page: &Arc<Page>, backing: &Backing) -> Result<ReadStatus> {
        let index = page.index();
        let back = match backing.mapping.find(index) {
            Some(back) => back,
            None => {
                let fresh = Page::new_locked(index)?;
                match backing.mapping.add(Arc::clone(&fresh)) {
                    Ok(()) => {
                        op.begin();
                        op.add_monitor(page, &fresh);
                        self.issue_read(&backing.file, &fresh);
                        return Ok(ReadStatus::InProgress);
                    }
                    Err(existing) => existing,
                }
            }
        };

        if back.is_error() {
            return Err(self.io_error(
                op.object().path(),
                "read backing page",
                io::Error::new(io::ErrorKind::Other, "backing page is in error"),
            ));
        }

        if back.is_uptodate() {
            page.copy_from(&back);
            page.set_uptodate();
            page.mark_cached();
            self.stats.record_hit();
            op.complete(page, Ok(()));
            return Ok(ReadStatus::Completed);
        }

        op.begin();
        op.watch(page, &back, &backing.file);
        Ok(ReadStatus::InProgress)
    }

    pub(super) fn account<T>(&self, result: &Result<T>) {
        if let Err(e) = result {
            self.account_error(e);
        }
    }

    pub(super) fn account_error(&self, error: &CacheError) {
        match error {
            CacheError::NoData { .. } => self.stats.record_miss(),
            CacheError::NoBuffers { .. } => self.stats.record_nobufs(),
            _ => {}
        }
    }
}
