//! Page allocation and uncaching

use crate::errors::{CacheError, Result};
use crate::object::CacheObject;
use crate::page::Page;
use crate::retrieval::Retrieval;
use std::sync::Arc;

use super::super::types::Cache;

impl Cache {
    /// Reserve room in the cache for a page the caller will write later
    pub fn allocate_page(&self, op: &Arc<Retrieval>, page: &Arc<Page>) -> Result<()> {
        self.allocate_pages(op, std::slice::from_ref(page))
    }

    /// Reserve room for several pages at once; all or nothing
    pub fn allocate_pages(&self, op: &Arc<Retrieval>, pages: &[Arc<Page>]) -> Result<()> {
        if self.inner.is_dead() {
            return Err(CacheError::no_buffers("cache is withdrawn"));
        }
        if op.object().backing_file().is_none() {
            return Err(CacheError::no_buffers("object has no backing file"));
        }

        let result = self.inner.has_space(0, pages.len() as u64);
        self.inner.account(&result);
        result?;

        for page in pages {
            page.mark_cached();
        }
        Ok(())
    }

    /// Tell the cache a page is no longer backed by it
    pub fn uncache_page(&self, object: &Arc<CacheObject>, page: &Arc<Page>) {
        page.clear_cached();
        tracing::trace!("Object {} page {} uncached", object.debug_id(), page.index());
    }
}
