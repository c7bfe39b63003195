//! Retrieval operations
//!
//! A [`Retrieval`] carries one read request from the netfs side: the object
//! being read, the destination page cache, and the callback told about each
//! page as it finishes. Pages whose backing data is not in memory yet get a
//! [`Monitor`] parked on the backing page's wait queue; when the backing page
//! is unlocked the monitor lands on the retrieval's to-do list and the
//! retrieval is put on the work queue, where the copier finishes the job.

pub(crate) mod copier;

use crate::backend::BackingFile;
use crate::core::CacheInner;
use crate::errors::{CacheError, Result};
use crate::object::CacheObject;
use crate::page::{Mapping, Page};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Per-page completion callback
///
/// Invoked once for every page the cache took responsibility for, either
/// synchronously from the read call or later from a copier worker.
pub type Completion = Arc<dyn Fn(&Arc<Page>, Result<()>) + Send + Sync>;

/// Result of a single-page read that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// The page was filled from the cache and the completion already ran
    Completed,
    /// A backing read is underway; the completion will run later
    InProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagesStatus {
    /// Every page went to the cache
    Submitted,
    /// Some pages are not cached; space was reserved for them
    NoData,
    /// Some pages are not cached and there is no room to cache them
    NoBuffers,
}

/// Result of a multi-page read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagesOutcome {
    pub status: PagesStatus,
    /// Pages left in the caller's list for it to fetch itself
    pub remaining: usize,
}

/// A netfs page waiting for its backing page
pub(crate) struct Monitor {
    pub(crate) netfs_page: Arc<Page>,
    pub(crate) back_page: Arc<Page>,
}

pub struct Retrieval {
    debug_id: u64,
    cache: Arc<CacheInner>,
    object: Arc<CacheObject>,
    netfs_mapping: Arc<Mapping>,
    completion: Completion,
    to_do: Mutex<VecDeque<Monitor>>,
    queued: AtomicBool,
    pending: AtomicUsize,
    done: Notify,
}

impl fmt::Debug for Retrieval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retrieval")
            .field("debug_id", &self.debug_id)
            .field("object", &self.object.debug_id())
            .field("pending", &self.pending())
            .finish()
    }
}

impl Retrieval {
    pub(crate) fn new(
        debug_id: u64,
        cache: Arc<CacheInner>,
        object: Arc<CacheObject>,
        netfs_mapping: Arc<Mapping>,
        completion: Completion,
    ) -> Arc<Self> {
        Arc::new(Self {
            debug_id,
            cache,
            object,
            netfs_mapping,
            completion,
            to_do: Mutex::new(VecDeque::new()),
            queued: AtomicBool::new(false),
            pending: AtomicUsize::new(0),
            done: Notify::new(),
        })
    }

    pub fn debug_id(&self) -> u64 {
        self.debug_id
    }

    pub fn object(&self) -> &Arc<CacheObject> {
        &self.object
    }

    pub fn netfs_mapping(&self) -> &Arc<Mapping> {
        &self.netfs_mapping
    }

    /// Pages handed to the copier whose completion has not run yet
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.pending() == 0
    }

    /// Wait until every in-progress page has completed
    ///
    /// Monitors cannot be cancelled, so this only returns once each of them
    /// has been serviced. Any number of tasks may wait at once.
    pub async fn wait(&self) {
        loop {
            let notified = self.done.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_complete() {
                return;
            }
            notified.await;
        }
    }

    pub(crate) fn cache(&self) -> &Arc<CacheInner> {
        &self.cache
    }

    /// Report a page that finished without going through a monitor
    pub(crate) fn complete(&self, page: &Arc<Page>, result: Result<()>) {
        (self.completion)(page, result);
    }

    /// Report a page that was handed to a monitor
    pub(crate) fn end_io(&self, page: &Arc<Page>, result: Result<()>) {
        if let Err(e) = &result {
            tracing::debug!(
                "Retrieval {} page {} failed: {}",
                self.debug_id,
                page.index(),
                e
            );
        }
        self.complete(page, result);
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.done.notify_waiters();
        }
    }

    /// Park `netfs_page` on `back` and make sure something unlocks `back`
    ///
    /// If the page lock is free, either the page is already settled and
    /// unlocking it fires the monitor at once, or a read is started. If the
    /// lock is held, a second try covers an unlock that raced with parking
    /// the monitor.
    pub(crate) fn watch(
        self: &Arc<Self>,
        netfs_page: &Arc<Page>,
        back: &Arc<Page>,
        file: &Arc<dyn BackingFile>,
    ) {
        self.add_monitor(netfs_page, back);
        if back.try_lock() {
            if back.is_uptodate() || back.is_error() {
                back.unlock();
            } else {
                self.cache.issue_read(file, back);
            }
        } else if back.try_lock() {
            tracing::trace!("Jumpstart backing page {}", back.index());
            back.unlock();
        }
    }

    /// Queue a waiter on `back` that hands the pair to the copier
    pub(crate) fn add_monitor(self: &Arc<Self>, netfs_page: &Arc<Page>, back: &Arc<Page>) {
        let op = Arc::clone(self);
        let netfs_page = Arc::clone(netfs_page);
        back.add_waiter(Box::new(move |back_page| {
            op.push_monitor(Monitor {
                netfs_page,
                back_page: Arc::clone(back_page),
            });
        }));
    }

    /// Count one more page as in progress
    pub(crate) fn begin(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Fail every woken monitor with `NoBuffers`
    ///
    /// Used when no copier is left to service them.
    pub(crate) fn abandon(&self) {
        self.queued.store(false, Ordering::Release);
        let monitors: Vec<Monitor> = self.to_do.lock().drain(..).collect();
        for monitor in monitors {
            self.end_io(
                &monitor.netfs_page,
                Err(CacheError::no_buffers("copier work queue is closed")),
            );
        }
    }

    fn push_monitor(self: &Arc<Self>, monitor: Monitor) {
        self.to_do.lock().push_back(monitor);
        self.schedule();
    }

    fn schedule(self: &Arc<Self>) {
        if !self.queued.swap(true, Ordering::AcqRel) {
            self.cache.work_queue.enqueue(Arc::clone(self));
        }
    }

    fn take_batch(&self, max: usize) -> Vec<Monitor> {
        let mut to_do = self.to_do.lock();
        let n = max.min(to_do.len());
        to_do.drain(..n).collect()
    }

    fn has_work(&self) -> bool {
        !self.to_do.lock().is_empty()
    }
}
