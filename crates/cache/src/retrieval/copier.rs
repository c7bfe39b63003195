//! Deferred copy of backing pages into netfs pages

use super::{Monitor, Retrieval};
use crate::errors::{CacheError, Result};
use crate::page::Page;
use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// Monitors handled per run before the retrieval goes back on the queue
const COPY_BATCH: usize = 8;

/// Service a retrieval's woken monitors
pub(crate) fn run(op: &Arc<Retrieval>) {
    op.queued.store(false, Ordering::Release);

    for monitor in op.take_batch(COPY_BATCH) {
        copy_one(op, monitor);
    }

    if op.has_work() {
        op.schedule();
    }
}

fn copy_one(op: &Arc<Retrieval>, monitor: Monitor) {
    let Monitor {
        netfs_page,
        back_page,
    } = monitor;

    let result = if back_page.is_uptodate() {
        netfs_page.copy_from(&back_page);
        netfs_page.set_uptodate();
        netfs_page.mark_cached();
        op.cache().stats.record_hit();
        Ok(())
    } else if back_page.is_error() {
        Err(op.cache().io_error(
            op.object().path(),
            "read backing page",
            io::Error::new(io::ErrorKind::Other, "backing page read failed"),
        ))
    } else {
        match reissue(op, &netfs_page, &back_page) {
            Ok(()) => return,
            Err(e) => Err(e),
        }
    };

    op.end_io(&netfs_page, result);
}

/// The backing page was unlocked without being read
///
/// Wait on it again unless it has been dropped from the backing page cache.
/// There is no limit on how often this can happen for one page.
fn reissue(op: &Arc<Retrieval>, netfs_page: &Arc<Page>, back_page: &Arc<Page>) -> Result<()> {
    let object = op.object();
    let (Some(file), Some(mapping)) = (object.backing_file(), object.backing_mapping()) else {
        return Err(CacheError::no_data(netfs_page.index()));
    };

    if !back_page.is_attached() || !mapping.contains(back_page) {
        tracing::debug!(
            "Backing page {} of object {} went away",
            back_page.index(),
            object.debug_id()
        );
        return Err(CacheError::no_data(netfs_page.index()));
    }

    tracing::debug!(
        "Reissue read of backing page {} of object {}",
        back_page.index(),
        object.debug_id()
    );
    op.watch(netfs_page, back_page, file);
    Ok(())
}
