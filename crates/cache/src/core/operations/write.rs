//! Page write-back

use crate::errors::{CacheError, Result};
use crate::object::CacheObject;
use crate::page::{Page, PAGE_SIZE};
use std::io;
use std::sync::Arc;

use super::super::types::Cache;

impl Cache {
    /// Store a netfs page in its object's backing file
    ///
    /// The write covers the page, cut short at the object's declared size.
    /// Any failure leaves the page uncached and is reported as `NoBuffers`.
    pub async fn write_page(&self, object: &Arc<CacheObject>, page: &Arc<Page>) -> Result<()> {
        let inner = &self.inner;
        if inner.is_dead() {
            inner.stats.record_nobufs();
            return Err(CacheError::no_buffers("cache is withdrawn"));
        }
        let Some(file) = object.backing_file() else {
            return Err(CacheError::no_buffers("object has no backing file"));
        };

        let pos = page.offset();
        let limit = object.store_limit();
        if pos >= limit {
            inner.stats.record_nobufs();
            return Err(CacheError::no_buffers("page lies beyond the object's size"));
        }
        let len = (limit - pos).min(PAGE_SIZE as u64) as usize;

        let file = Arc::clone(file);
        let source = Arc::clone(page);
        let written = tokio::task::spawn_blocking(move || {
            let data = source.data();
            file.write_at(pos, &data[..len])
        })
        .await;

        let outcome = match written {
            Ok(Ok(n)) if n == len => Ok(()),
            Ok(Ok(n)) => Err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {n} of {len} bytes"),
            )),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
        };

        if let Err(e) = outcome {
            inner.stats.record_write_failure();
            let error = inner.io_error(object.path(), "write backing page", e);
            return Err(error.into_no_buffers());
        }

        object.grow_size(pos + len as u64);
        inner.stats.record_write(len as u64);

        if let Some(mapping) = object.backing_mapping() {
            if let Some(back) = mapping.find(page.index()) {
                if back.try_lock() {
                    if back.is_uptodate() {
                        back.fill(&page.data()[..len]);
                    }
                    back.unlock();
                } else {
                    mapping.remove(page.index());
                }
            }
        }
        Ok(())
    }
}
